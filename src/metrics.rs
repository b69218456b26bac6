//! Performance metric instrumentation
//!
//! Counters use atomic increments and never block. Persisted duration
//! metrics go through `MetricStore`; a store failure is swallowed and
//! logged at debug severity — instrumentation must never fail the
//! operation it measures.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One persisted measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetric {
    /// Measurement category (e.g., "latency", "throughput")
    pub metric_type: String,
    /// Instrumented operation (e.g., "record_event", "verify_batch")
    pub operation: String,
    pub value: f64,
    /// Unit of `value` (e.g., "ms", "records")
    pub unit: String,
    pub recorded_at: DateTime<Utc>,
}

/// Repository for persisted metrics.
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn record(&self, metric: PerformanceMetric) -> Result<()>;
}

/// In-memory metric store for tests.
#[derive(Default)]
pub struct MemoryMetricStore {
    metrics: Arc<RwLock<Vec<PerformanceMetric>>>,
}

impl MemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<PerformanceMetric> {
        self.metrics.read().await.clone()
    }
}

#[async_trait]
impl MetricStore for MemoryMetricStore {
    async fn record(&self, metric: PerformanceMetric) -> Result<()> {
        self.metrics.write().await.push(metric);
        Ok(())
    }
}

/// Snapshot of the live counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricCounters {
    pub events_recorded: u64,
    pub events_rejected: u64,
    pub signatures_verified: u64,
    pub alerts_generated: u64,
    pub backups_completed: u64,
}

/// Instrumentation facade shared across components.
#[derive(Default)]
pub struct MetricRecorder {
    events_recorded: AtomicU64,
    events_rejected: AtomicU64,
    signatures_verified: AtomicU64,
    alerts_generated: AtomicU64,
    backups_completed: AtomicU64,
    store: Option<Arc<dyn MetricStore>>,
}

impl MetricRecorder {
    /// Counter-only recorder with no persistence backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorder that also persists duration metrics.
    pub fn with_store(store: Arc<dyn MetricStore>) -> Self {
        Self {
            store: Some(store),
            ..Default::default()
        }
    }

    pub fn incr_events_recorded(&self) {
        self.events_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_events_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_signatures_verified(&self, n: u64) {
        self.signatures_verified.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_alerts_generated(&self) {
        self.alerts_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_backups_completed(&self) {
        self.backups_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Persist a duration measurement. Never fails the caller.
    pub async fn record_duration(&self, metric_type: &str, operation: &str, millis: f64) {
        let Some(ref store) = self.store else {
            return;
        };
        let metric = PerformanceMetric {
            metric_type: metric_type.to_string(),
            operation: operation.to_string(),
            value: millis,
            unit: "ms".to_string(),
            recorded_at: Utc::now(),
        };
        if let Err(e) = store.record(metric).await {
            tracing::debug!(
                operation = %operation,
                error = %e,
                "Metric recording failed, ignoring"
            );
        }
    }

    pub fn snapshot(&self) -> MetricCounters {
        MetricCounters {
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            signatures_verified: self.signatures_verified.load(Ordering::Relaxed),
            alerts_generated: self.alerts_generated.load(Ordering::Relaxed),
            backups_completed: self.backups_completed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let recorder = MetricRecorder::new();
        recorder.incr_events_recorded();
        recorder.incr_events_recorded();
        recorder.incr_alerts_generated();
        recorder.incr_signatures_verified(10);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.events_recorded, 2);
        assert_eq!(snapshot.alerts_generated, 1);
        assert_eq!(snapshot.signatures_verified, 10);
        assert_eq!(snapshot.backups_completed, 0);
    }

    #[tokio::test]
    async fn test_duration_persisted_through_store() {
        let store = Arc::new(MemoryMetricStore::new());
        let recorder = MetricRecorder::with_store(store.clone());

        recorder.record_duration("latency", "record_event", 12.5).await;

        let metrics = store.all().await;
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].operation, "record_event");
        assert_eq!(metrics[0].value, 12.5);
        assert_eq!(metrics[0].unit, "ms");
    }

    #[tokio::test]
    async fn test_duration_without_store_is_noop() {
        let recorder = MetricRecorder::new();
        // Must not panic or error
        recorder.record_duration("latency", "record_event", 1.0).await;
    }

    #[tokio::test]
    async fn test_store_failure_swallowed() {
        struct FailingStore;

        #[async_trait]
        impl MetricStore for FailingStore {
            async fn record(&self, _metric: PerformanceMetric) -> Result<()> {
                Err(crate::error::AuditError::Storage("table missing".into()))
            }
        }

        let recorder = MetricRecorder::with_store(Arc::new(FailingStore));
        // Failure is logged, never surfaced
        recorder.record_duration("latency", "record_event", 3.0).await;
    }

    #[tokio::test]
    async fn test_concurrent_increments() {
        let recorder = Arc::new(MetricRecorder::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let recorder = recorder.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    recorder.incr_events_recorded();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(recorder.snapshot().events_recorded, 800);
    }
}
