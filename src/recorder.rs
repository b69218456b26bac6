//! Event recording pipeline
//!
//! `EventRecorder` is the single write path into the audit trail:
//! validate, filter sensitive data, score risk, sign, persist. The
//! synchronous path (`record`) blocks the caller until the record is
//! durable and is used for security-critical events that must not be
//! lost. `RecorderQueue` is the asynchronous path: a bounded channel
//! feeding a worker that invokes the same pipeline, preserving FIFO
//! order for events submitted through the same queue.

use crate::config::RiskConfig;
use crate::error::{AuditError, Result};
use crate::filter::SensitiveDataFilter;
use crate::metrics::MetricRecorder;
use crate::risk::{RiskScorer, ScoreContext};
use crate::signer::IntegritySigner;
use crate::store::EventStore;
use crate::types::{ActivityEvent, EventResult, NewEvent};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Upper bound on the event `kind` string.
const MAX_KIND_LEN: usize = 128;

/// Tracks failed operations per actor inside a sliding window, feeding
/// the consecutive-failure factor of the risk score.
struct FailureTracker {
    window: Duration,
    failures: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl FailureTracker {
    fn new(window_secs: u64) -> Self {
        Self {
            window: Duration::seconds(window_secs as i64),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Failures recorded for this actor inside the window, pruning
    /// expired entries as a side effect.
    async fn recent_failures(&self, actor_id: &str, now: DateTime<Utc>) -> u32 {
        let mut failures = self.failures.lock().await;
        let Some(timestamps) = failures.get_mut(actor_id) else {
            return 0;
        };
        let cutoff = now - self.window;
        timestamps.retain(|t| *t >= cutoff);
        let count = timestamps.len() as u32;
        if timestamps.is_empty() {
            failures.remove(actor_id);
        }
        count
    }

    async fn record_failure(&self, actor_id: &str, at: DateTime<Utc>) {
        let mut failures = self.failures.lock().await;
        failures.entry(actor_id.to_string()).or_default().push(at);
    }

    async fn clear(&self, actor_id: &str) {
        self.failures.lock().await.remove(actor_id);
    }
}

/// The write path: validate → filter → score → sign → persist.
pub struct EventRecorder {
    filter: SensitiveDataFilter,
    scorer: RiskScorer,
    signer: IntegritySigner,
    store: Arc<dyn EventStore>,
    metrics: Arc<MetricRecorder>,
    failures: FailureTracker,
}

impl EventRecorder {
    pub fn new(
        filter: SensitiveDataFilter,
        scorer: RiskScorer,
        signer: IntegritySigner,
        risk_config: &RiskConfig,
        store: Arc<dyn EventStore>,
        metrics: Arc<MetricRecorder>,
    ) -> Self {
        Self {
            filter,
            scorer,
            signer,
            store,
            metrics,
            failures: FailureTracker::new(risk_config.failure_window_secs),
        }
    }

    /// Record one event synchronously.
    ///
    /// Returns the persisted record with its assigned sequence number,
    /// risk level, and signature. Non-security kinds skip risk scoring
    /// and store risk level 0.
    pub async fn record(&self, new_event: NewEvent) -> Result<ActivityEvent> {
        let started = std::time::Instant::now();

        if let Err(e) = validate(&new_event) {
            self.metrics.incr_events_rejected();
            return Err(e);
        }

        let now = Utc::now();
        let mut event = ActivityEvent {
            id: format!("evt-{}", Uuid::new_v4()),
            sequence: 0,
            kind: new_event.kind,
            description: new_event.description,
            causer: new_event.causer,
            subject: new_event.subject,
            module: new_event.module,
            properties: self.filter.filter(&new_event.properties),
            ip_address: new_event.ip_address,
            user_agent: new_event.user_agent,
            result: new_event.result,
            risk_level: 0,
            signature: None,
            signature_version: self.signer.active_version(),
            created_at: now,
            archived: false,
        };

        if self.scorer.is_security_kind(&event.kind) {
            let ctx = match event.causer_id() {
                Some(actor) => ScoreContext {
                    recent_failures: self.failures.recent_failures(actor, now).await,
                },
                None => ScoreContext::default(),
            };
            let score = self.scorer.score(&event, &ctx);
            event.risk_level = self.scorer.risk_level(score);
        }

        self.signer.sign_event(&mut event);
        let stored = self.store.append(event).await?;

        // Failure context feeds the next score for the same actor
        if let Some(actor) = stored.causer_id() {
            match stored.result {
                EventResult::Failed => {
                    self.failures.record_failure(actor, stored.created_at).await;
                }
                EventResult::Success => self.failures.clear(actor).await,
                EventResult::Warning => {}
            }
        }

        self.metrics.incr_events_recorded();
        self.metrics
            .record_duration(
                "latency",
                "record_event",
                started.elapsed().as_secs_f64() * 1000.0,
            )
            .await;

        Ok(stored)
    }
}

fn validate(new_event: &NewEvent) -> Result<()> {
    if new_event.kind.trim().is_empty() {
        return Err(AuditError::Validation("event kind must not be empty".into()));
    }
    if new_event.kind.len() > MAX_KIND_LEN {
        return Err(AuditError::Validation(format!(
            "event kind exceeds {MAX_KIND_LEN} characters"
        )));
    }
    if new_event.description.trim().is_empty() {
        return Err(AuditError::Validation(
            "event description must not be empty".into(),
        ));
    }
    Ok(())
}

/// Handle to the asynchronous recording path.
///
/// Events enqueued through the same handle are processed FIFO by a
/// single worker running the synchronous pipeline. Pipeline failures
/// inside the worker are logged, not surfaced to the submitter.
pub struct RecorderQueue {
    sender: mpsc::Sender<NewEvent>,
    worker: tokio::task::JoinHandle<()>,
}

impl RecorderQueue {
    /// Spawn the worker loop over a bounded channel.
    pub fn spawn(recorder: Arc<EventRecorder>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<NewEvent>(capacity);
        let worker = tokio::spawn(async move {
            while let Some(new_event) = receiver.recv().await {
                let kind = new_event.kind.clone();
                if let Err(e) = recorder.record(new_event).await {
                    tracing::warn!(kind = %kind, error = %e, "Queued event recording failed");
                }
            }
        });
        Self { sender, worker }
    }

    /// Submit an event for background recording. Blocks only when the
    /// channel is at capacity; fails once the queue is shut down.
    pub async fn enqueue(&self, new_event: NewEvent) -> Result<()> {
        self.sender
            .send(new_event)
            .await
            .map_err(|_| AuditError::Storage("recorder queue is closed".into()))
    }

    /// Close the queue and wait for the worker to drain and exit.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "Recorder worker terminated abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::risk::SuspiciousIpSet;
    use crate::store::MemoryEventStore;
    use crate::types::EntityRef;

    fn build_recorder(store: Arc<MemoryEventStore>) -> EventRecorder {
        let config = AuditConfig::default();
        let suspicious = SuspiciousIpSet::new();
        EventRecorder::new(
            SensitiveDataFilter::new(&config.filter).unwrap(),
            RiskScorer::new(config.risk.clone(), suspicious),
            IntegritySigner::new(&config.signer).unwrap(),
            &config.risk,
            store,
            Arc::new(MetricRecorder::new()),
        )
    }

    #[tokio::test]
    async fn test_record_persists_signed_event() {
        let store = Arc::new(MemoryEventStore::new());
        let recorder = build_recorder(store.clone());

        let stored = recorder
            .record(
                NewEvent::new("login", "User logged in")
                    .with_causer(EntityRef::user("user-1"))
                    .with_ip("192.168.1.10"),
            )
            .await
            .unwrap();

        assert!(stored.id.starts_with("evt-"));
        assert_eq!(stored.sequence, 1);
        assert!(stored.is_signed());
        let fetched = store.get(&stored.id).await.unwrap().unwrap();
        assert_eq!(fetched.signature, stored.signature);
    }

    #[tokio::test]
    async fn test_record_masks_sensitive_properties() {
        let store = Arc::new(MemoryEventStore::new());
        let recorder = build_recorder(store.clone());

        let stored = recorder
            .record(
                NewEvent::new("login", "User logged in")
                    .with_property("password", "secret123")
                    .with_property("email", "alice@example.com"),
            )
            .await
            .unwrap();

        let reread = store.get(&stored.id).await.unwrap().unwrap();
        assert_eq!(reread.properties["password"], "[FILTERED]");
        assert_eq!(reread.properties["email"], "alice@example.com");
    }

    #[tokio::test]
    async fn test_signature_covers_filtered_properties() {
        // The signature must bind what was stored, not the raw input
        let store = Arc::new(MemoryEventStore::new());
        let recorder = build_recorder(store.clone());
        let config = AuditConfig::default();
        let signer = IntegritySigner::new(&config.signer).unwrap();

        let stored = recorder
            .record(NewEvent::new("login", "x").with_property("token", "abc"))
            .await
            .unwrap();
        assert!(signer.verify(&stored));
    }

    #[tokio::test]
    async fn test_validation_rejects_empty_kind() {
        let store = Arc::new(MemoryEventStore::new());
        let recorder = build_recorder(store);

        let err = recorder
            .record(NewEvent::new("  ", "something"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Validation(_)));
    }

    #[tokio::test]
    async fn test_validation_rejects_oversized_kind() {
        let store = Arc::new(MemoryEventStore::new());
        let recorder = build_recorder(store);

        let err = recorder
            .record(NewEvent::new("k".repeat(MAX_KIND_LEN + 1), "something"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Validation(_)));
    }

    #[tokio::test]
    async fn test_non_security_kind_stores_zero_risk() {
        let store = Arc::new(MemoryEventStore::new());
        let recorder = build_recorder(store);

        let stored = recorder
            .record(NewEvent::new("page.view", "Viewed dashboard"))
            .await
            .unwrap();
        assert_eq!(stored.risk_level, 0);
    }

    #[tokio::test]
    async fn test_security_kind_gets_scored() {
        let store = Arc::new(MemoryEventStore::new());
        let recorder = build_recorder(store);

        let stored = recorder
            .record(
                NewEvent::new("login", "Login attempt")
                    .with_causer(EntityRef::user("user-1"))
                    .with_result(EventResult::Failed)
                    .with_ip("203.0.113.9"),
            )
            .await
            .unwrap();
        assert!(stored.risk_level > 0);
    }

    #[tokio::test]
    async fn test_consecutive_failures_raise_risk() {
        let store = Arc::new(MemoryEventStore::new());
        let recorder = build_recorder(store);

        let failed_login = || {
            NewEvent::new("login", "Login attempt")
                .with_causer(EntityRef::user("user-1"))
                .with_result(EventResult::Failed)
        };

        let first = recorder.record(failed_login()).await.unwrap();
        let second = recorder.record(failed_login()).await.unwrap();
        let third = recorder.record(failed_login()).await.unwrap();

        assert!(second.risk_level >= first.risk_level);
        assert!(third.risk_level >= second.risk_level);
    }

    #[tokio::test]
    async fn test_success_resets_failure_context() {
        let store = Arc::new(MemoryEventStore::new());
        let recorder = build_recorder(store);

        for _ in 0..3 {
            recorder
                .record(
                    NewEvent::new("login", "Login attempt")
                        .with_causer(EntityRef::user("user-1"))
                        .with_result(EventResult::Failed),
                )
                .await
                .unwrap();
        }
        recorder
            .record(
                NewEvent::new("login", "Login succeeded")
                    .with_causer(EntityRef::user("user-1")),
            )
            .await
            .unwrap();

        // After a success, a lone failure scores as if it were the first
        let after_reset = recorder
            .record(
                NewEvent::new("login", "Login attempt")
                    .with_causer(EntityRef::user("user-1"))
                    .with_result(EventResult::Failed),
            )
            .await
            .unwrap();

        let store2 = Arc::new(MemoryEventStore::new());
        let fresh = build_recorder(store2);
        let baseline = fresh
            .record(
                NewEvent::new("login", "Login attempt")
                    .with_causer(EntityRef::user("user-1"))
                    .with_result(EventResult::Failed),
            )
            .await
            .unwrap();

        assert_eq!(after_reset.risk_level, baseline.risk_level);
    }

    #[tokio::test]
    async fn test_queue_preserves_fifo_order() {
        let store = Arc::new(MemoryEventStore::new());
        let recorder = Arc::new(build_recorder(store.clone()));
        let queue = RecorderQueue::spawn(recorder, 16);

        for i in 0..10 {
            queue
                .enqueue(NewEvent::new("login", format!("attempt {i}")))
                .await
                .unwrap();
        }
        queue.shutdown().await;

        let events = store.dump().await;
        assert_eq!(events.len(), 10);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.description, format!("attempt {i}"));
            assert_eq!(event.sequence, (i + 1) as u64);
        }
    }

    #[tokio::test]
    async fn test_queue_worker_survives_invalid_event() {
        let store = Arc::new(MemoryEventStore::new());
        let recorder = Arc::new(build_recorder(store.clone()));
        let queue = RecorderQueue::spawn(recorder, 16);

        queue.enqueue(NewEvent::new("", "invalid")).await.unwrap();
        queue
            .enqueue(NewEvent::new("login", "valid"))
            .await
            .unwrap();
        queue.shutdown().await;

        let events = store.dump().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].description, "valid");
    }
}
