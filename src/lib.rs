//! # vigil-audit
//!
//! Tamper-evident activity audit trail with security-risk analytics.
//!
//! ## Overview
//!
//! `vigil-audit` records application activity as immutable, HMAC-signed
//! events, masks sensitive data before storage, scores each security
//! event for risk, detects frequency and brute-force anomalies across
//! actors and IPs, raises alerts, and ships encrypted, compressed
//! backups of the trail. Storage is behind a repository trait — swap the
//! in-memory store for a relational backend without touching the
//! pipeline.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use vigil_audit::{
//!     AuditConfig, EntityRef, EventRecorder, IntegritySigner, MemoryEventStore,
//!     MetricRecorder, NewEvent, RiskScorer, SensitiveDataFilter, SuspiciousIpSet,
//! };
//!
//! # async fn example() -> vigil_audit::Result<()> {
//! let config = AuditConfig::default();
//! let store = Arc::new(MemoryEventStore::new());
//! let recorder = EventRecorder::new(
//!     SensitiveDataFilter::new(&config.filter)?,
//!     RiskScorer::new(config.risk.clone(), SuspiciousIpSet::new()),
//!     IntegritySigner::new(&config.signer)?,
//!     &config.risk,
//!     store,
//!     Arc::new(MetricRecorder::new()),
//! );
//!
//! let event = recorder
//!     .record(
//!         NewEvent::new("login", "User logged in")
//!             .with_causer(EntityRef::user("user-42"))
//!             .with_ip("192.168.1.10")
//!             .with_property("password", "hunter2"), // stored as [FILTERED]
//!     )
//!     .await?;
//!
//! assert!(event.is_signed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Components
//!
//! - **EventRecorder** — validate, filter, score, sign, persist; sync and
//!   queued async paths
//! - **SensitiveDataFilter** — key- and value-pattern masking of properties
//! - **IntegritySigner** — versioned HMAC-SHA256 over protected fields,
//!   chunked batch verification
//! - **RiskScorer** — weighted 0-100 score and 0-10 level per event
//! - **AnomalyDetector** — frequency, brute-force, and behavioral-pattern
//!   analysis feeding the suspicious-IP set
//! - **AlertGenerator** — severity-gated persisted alerts with pluggable
//!   notification
//! - **BackupEngine** — export, gzip, AES-256-GCM encrypt, checksum,
//!   restore with conflict policies, retention cleanup

pub mod alert;
pub mod anomaly;
pub mod backup;
pub mod config;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod recorder;
pub mod risk;
pub mod signer;
pub mod store;
pub mod types;

// Re-export core types
pub use alert::{AlertGenerator, AlertStore, LogNotifier, MemoryAlertStore, Notifier};
pub use anomaly::{Anomaly, AnomalyDetector, AnomalyKind, PatternSummary, SuspiciousIp};
pub use backup::{BackupEngine, CleanupReport, RestoreReport};
pub use config::{
    AlertConfig, AnomalyConfig, AuditConfig, BackupConfig, BusinessHours, FilterConfig,
    RiskConfig, SignerConfig, ValuePattern,
};
pub use error::{AuditError, Result};
pub use filter::SensitiveDataFilter;
pub use metrics::{MemoryMetricStore, MetricCounters, MetricRecorder, MetricStore, PerformanceMetric};
pub use recorder::{EventRecorder, RecorderQueue};
pub use risk::{RiskLevel, RiskScorer, ScoreContext, SuspiciousIpSet};
pub use signer::{CorruptedRecord, IntegritySigner, VerifyReport};
pub use store::{EventCriteria, EventStore, MemoryEventStore, RestorePolicy, RestoreStats};
pub use types::{
    ActivityEvent, AlertSeverity, BackupManifest, EncryptionMetadata, EntityRef, EventResult,
    NewEvent, SecurityAlert, SecurityEvent,
};
