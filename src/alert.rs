//! Security alert generation
//!
//! Converts qualifying security findings into persisted alerts. Only the
//! highest-severity finding per event is considered, and nothing below
//! the configured severity floor ever alerts — alerts exist for activity
//! meaningfully above baseline risk, not for informational noise.

use crate::config::AlertConfig;
use crate::error::Result;
use crate::metrics::MetricRecorder;
use crate::types::{ActivityEvent, SecurityAlert, SecurityEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Repository for persisted alerts.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert(&self, alert: SecurityAlert) -> Result<()>;

    /// Recent alerts, newest first.
    async fn list(&self, limit: usize) -> Result<Vec<SecurityAlert>>;

    async fn count(&self) -> Result<usize>;
}

/// In-memory alert store for tests and single-process use.
#[derive(Default)]
pub struct MemoryAlertStore {
    alerts: Arc<RwLock<Vec<SecurityAlert>>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn insert(&self, alert: SecurityAlert) -> Result<()> {
        self.alerts.write().await.push(alert);
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<SecurityAlert>> {
        let alerts = self.alerts.read().await;
        Ok(alerts.iter().rev().take(limit).cloned().collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.alerts.read().await.len())
    }
}

/// Notification collaborator — channel-agnostic.
///
/// The alert generator decides whether and at what severity to notify;
/// implementations decide how (log line, persisted record, external
/// messaging).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &SecurityAlert) -> Result<()>;
}

/// Default notifier: a structured log line per alert.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &SecurityAlert) -> Result<()> {
        tracing::warn!(
            alert_id = %alert.id,
            activity_id = %alert.activity_id,
            kind = %alert.kind,
            severity = ?alert.severity,
            "Security alert raised"
        );
        Ok(())
    }
}

/// Converts security findings into persisted alerts.
pub struct AlertGenerator {
    config: AlertConfig,
    store: Arc<dyn AlertStore>,
    notifier: Arc<dyn Notifier>,
    metrics: Option<Arc<MetricRecorder>>,
}

impl AlertGenerator {
    pub fn new(
        config: AlertConfig,
        store: Arc<dyn AlertStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            store,
            notifier,
            metrics: None,
        }
    }

    /// Count generated alerts through the given recorder.
    pub fn with_metrics(mut self, metrics: Arc<MetricRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Generate at most one alert for an event from its findings.
    ///
    /// Picks the highest-severity finding; returns `None` without side
    /// effects when that severity is below the configured floor.
    /// Notification failures are logged but do not fail the alert — the
    /// persisted record is the source of truth.
    pub async fn generate(
        &self,
        event: &ActivityEvent,
        findings: &[SecurityEvent],
    ) -> Result<Option<SecurityAlert>> {
        let Some(selected) = findings.iter().max_by_key(|f| f.severity) else {
            return Ok(None);
        };
        if selected.severity < self.config.severity_floor {
            return Ok(None);
        }

        let alert = SecurityAlert::for_activity(&event.id, selected);
        self.store.insert(alert.clone()).await?;
        if let Some(ref metrics) = self.metrics {
            metrics.incr_alerts_generated();
        }

        if let Err(e) = self.notifier.notify(&alert).await {
            tracing::warn!(alert_id = %alert.id, error = %e, "Alert notification failed");
        }
        Ok(Some(alert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlertSeverity;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_event(id: &str) -> ActivityEvent {
        ActivityEvent {
            id: id.to_string(),
            sequence: 0,
            kind: "login".to_string(),
            description: "login".to_string(),
            causer: None,
            subject: None,
            module: "auth".to_string(),
            properties: serde_json::Map::new(),
            ip_address: None,
            user_agent: None,
            result: crate::types::EventResult::Failed,
            risk_level: 6,
            signature: None,
            signature_version: 1,
            created_at: Utc::now(),
            archived: false,
        }
    }

    fn generator(store: Arc<MemoryAlertStore>) -> AlertGenerator {
        AlertGenerator::new(AlertConfig::default(), store, Arc::new(LogNotifier))
    }

    #[tokio::test]
    async fn test_high_finding_produces_one_alert() {
        let store = Arc::new(MemoryAlertStore::new());
        let generator = generator(store.clone());
        let findings = vec![SecurityEvent::new("login_failure", AlertSeverity::High)];

        let alert = generator
            .generate(&make_event("evt-1"), &findings)
            .await
            .unwrap()
            .expect("alert expected");
        assert_eq!(alert.severity, AlertSeverity::High);
        assert_eq!(alert.kind, "login_failure");
        assert_eq!(alert.activity_id, "evt-1");
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_low_finding_produces_no_alert() {
        let store = Arc::new(MemoryAlertStore::new());
        let generator = generator(store.clone());
        let findings = vec![SecurityEvent::new("odd_hours", AlertSeverity::Low)];

        let alert = generator
            .generate(&make_event("evt-1"), &findings)
            .await
            .unwrap();
        assert!(alert.is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_no_findings_no_alert() {
        let store = Arc::new(MemoryAlertStore::new());
        let generator = generator(store.clone());
        let alert = generator.generate(&make_event("evt-1"), &[]).await.unwrap();
        assert!(alert.is_none());
    }

    #[tokio::test]
    async fn test_highest_severity_finding_selected() {
        let store = Arc::new(MemoryAlertStore::new());
        let generator = generator(store.clone());
        let findings = vec![
            SecurityEvent::new("odd_hours", AlertSeverity::Medium),
            SecurityEvent::new("brute_force", AlertSeverity::Critical),
            SecurityEvent::new("login_failure", AlertSeverity::High),
        ];

        let alert = generator
            .generate(&make_event("evt-1"), &findings)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.kind, "brute_force");
        assert_eq!(alert.severity, AlertSeverity::Critical);
        // Exactly one alert despite three findings
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_floor_is_configurable() {
        let store = Arc::new(MemoryAlertStore::new());
        let generator = AlertGenerator::new(
            AlertConfig {
                severity_floor: AlertSeverity::Critical,
            },
            store.clone(),
            Arc::new(LogNotifier),
        );
        let findings = vec![SecurityEvent::new("login_failure", AlertSeverity::High)];
        let alert = generator
            .generate(&make_event("evt-1"), &findings)
            .await
            .unwrap();
        assert!(alert.is_none());
    }

    #[tokio::test]
    async fn test_medium_meets_default_floor() {
        let store = Arc::new(MemoryAlertStore::new());
        let generator = generator(store.clone());
        let findings = vec![SecurityEvent::new("odd_hours", AlertSeverity::Medium)];
        let alert = generator
            .generate(&make_event("evt-1"), &findings)
            .await
            .unwrap();
        assert!(alert.is_some());
    }

    #[tokio::test]
    async fn test_notifier_receives_alert() {
        struct CountingNotifier(AtomicUsize);

        #[async_trait]
        impl Notifier for CountingNotifier {
            async fn notify(&self, _alert: &SecurityAlert) -> Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let notifier = Arc::new(CountingNotifier(AtomicUsize::new(0)));
        let generator = AlertGenerator::new(
            AlertConfig::default(),
            Arc::new(MemoryAlertStore::new()),
            notifier.clone(),
        );

        let findings = vec![SecurityEvent::new("login_failure", AlertSeverity::High)];
        generator
            .generate(&make_event("evt-1"), &findings)
            .await
            .unwrap();
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_alert() {
        struct FailingNotifier;

        #[async_trait]
        impl Notifier for FailingNotifier {
            async fn notify(&self, _alert: &SecurityAlert) -> Result<()> {
                Err(crate::error::AuditError::Storage("channel down".into()))
            }
        }

        let store = Arc::new(MemoryAlertStore::new());
        let generator = AlertGenerator::new(
            AlertConfig::default(),
            store.clone(),
            Arc::new(FailingNotifier),
        );

        let findings = vec![SecurityEvent::new("login_failure", AlertSeverity::High)];
        let alert = generator
            .generate(&make_event("evt-1"), &findings)
            .await
            .unwrap();
        assert!(alert.is_some());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = Arc::new(MemoryAlertStore::new());
        let generator = generator(store.clone());
        for i in 0..3 {
            let findings = vec![SecurityEvent::new(
                format!("finding-{}", i),
                AlertSeverity::High,
            )];
            generator
                .generate(&make_event(&format!("evt-{}", i)), &findings)
                .await
                .unwrap();
        }

        let alerts = store.list(2).await.unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].activity_id, "evt-2");
    }

    #[tokio::test]
    async fn test_generated_alerts_are_counted() {
        let metrics = Arc::new(MetricRecorder::new());
        let store = Arc::new(MemoryAlertStore::new());
        let generator = generator(store).with_metrics(metrics.clone());

        let high = vec![SecurityEvent::new("login_failure", AlertSeverity::High)];
        generator.generate(&make_event("evt-1"), &high).await.unwrap();
        assert_eq!(metrics.snapshot().alerts_generated, 1);

        // Suppressed findings never count
        let low = vec![SecurityEvent::new("login_failure", AlertSeverity::Low)];
        generator.generate(&make_event("evt-2"), &low).await.unwrap();
        assert_eq!(metrics.snapshot().alerts_generated, 1);
    }
}
