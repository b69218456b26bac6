//! Integrity signing and verification for audit records
//!
//! Each record carries an HMAC-SHA256 digest over its protected fields,
//! keyed by a versioned application secret. Verification recomputes the
//! digest using the scheme version recorded on the event, so old records
//! stay verifiable across secret rotation.

use crate::config::SignerConfig;
use crate::error::{AuditError, Result};
use crate::metrics::MetricRecorder;
use crate::store::{EventCriteria, EventStore};
use crate::types::ActivityEvent;
use chrono::SecondsFormat;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// A record that failed batch verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorruptedRecord {
    pub id: String,
    pub sequence: u64,
    pub reason: String,
}

/// Outcome of a batch verification run.
///
/// Per-record mismatches are collected here, never raised — the batch
/// always runs to completion (or its deadline).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    /// Records examined
    pub total: usize,
    /// Records whose signature matched
    pub verified: usize,
    /// Records that failed verification
    pub corrupted: Vec<CorruptedRecord>,
}

impl VerifyReport {
    /// True when every examined record verified.
    pub fn success(&self) -> bool {
        self.corrupted.is_empty()
    }
}

/// Computes and verifies integrity signatures over protected fields.
///
/// Holds one secret per scheme version (rotation map); signing always uses
/// the active version, verification uses whatever version the record
/// carries.
pub struct IntegritySigner {
    secrets: HashMap<u32, Vec<u8>>,
    active_version: u32,
    chunk_size: usize,
    batch_timeout_secs: u64,
    metrics: Option<Arc<MetricRecorder>>,
}

impl IntegritySigner {
    pub fn new(config: &SignerConfig) -> Result<Self> {
        if !config.secrets.contains_key(&config.active_version) {
            return Err(AuditError::Config(format!(
                "No signing secret registered for active version {}",
                config.active_version
            )));
        }
        Ok(Self {
            secrets: config
                .secrets
                .iter()
                .map(|(v, s)| (*v, s.as_bytes().to_vec()))
                .collect(),
            active_version: config.active_version,
            chunk_size: config.chunk_size.max(1),
            batch_timeout_secs: config.batch_timeout_secs,
            metrics: None,
        })
    }

    /// Count verified signatures through the given recorder.
    pub fn with_metrics(mut self, metrics: Arc<MetricRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Version used for new signatures.
    pub fn active_version(&self) -> u32 {
        self.active_version
    }

    /// Compute the signature for an event's protected fields with the
    /// active secret. Deterministic: identical input yields an identical
    /// hex digest.
    pub fn sign(&self, event: &ActivityEvent) -> String {
        self.digest(event, self.active_version)
            .unwrap_or_default()
    }

    /// Sign an event in place, stamping digest and scheme version.
    pub fn sign_event(&self, event: &mut ActivityEvent) {
        event.signature_version = self.active_version;
        event.signature = Some(self.sign(event));
    }

    fn digest(&self, event: &ActivityEvent, version: u32) -> Option<String> {
        let secret = self.secrets.get(&version)?;
        let mut mac =
            HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any size");
        mac.update(canonical_payload(event).as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    /// Recompute and compare an event's signature in constant time.
    ///
    /// Unsigned records, unknown scheme versions, and malformed digests
    /// all verify `false`; verification never fails with an error.
    pub fn verify(&self, event: &ActivityEvent) -> bool {
        let Some(ref recorded) = event.signature else {
            return false;
        };
        let Some(expected) = self.digest(event, event.signature_version) else {
            return false;
        };
        let (Ok(recorded_bytes), Ok(expected_bytes)) =
            (hex::decode(recorded), hex::decode(&expected))
        else {
            return false;
        };
        recorded_bytes.ct_eq(&expected_bytes).into()
    }

    /// Verify every record matching `criteria`, streaming in fixed-size
    /// chunks to bound memory.
    ///
    /// Mismatches are classified per record and collected into the report;
    /// the scan aborts only if the configured deadline elapses between
    /// chunks.
    pub async fn verify_batch(
        &self,
        store: &dyn EventStore,
        criteria: &EventCriteria,
    ) -> Result<VerifyReport> {
        let deadline = (self.batch_timeout_secs > 0)
            .then(|| tokio::time::Instant::now() + std::time::Duration::from_secs(self.batch_timeout_secs));

        let mut report = VerifyReport::default();
        let mut offset = 0;
        loop {
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    return Err(AuditError::Timeout(format!(
                        "Batch verification exceeded {}s after {} records",
                        self.batch_timeout_secs, report.total
                    )));
                }
            }

            let chunk = store.fetch_chunk(criteria, offset, self.chunk_size).await?;
            if chunk.is_empty() {
                break;
            }
            offset += chunk.len();

            for event in &chunk {
                report.total += 1;
                if self.verify(event) {
                    report.verified += 1;
                } else {
                    let reason = if event.signature.is_none() {
                        "record is unsigned".to_string()
                    } else if !self.secrets.contains_key(&event.signature_version) {
                        format!("unknown signature version {}", event.signature_version)
                    } else {
                        "signature mismatch".to_string()
                    };
                    tracing::warn!(
                        record_id = %event.id,
                        sequence = event.sequence,
                        reason = %reason,
                        "Integrity verification failed"
                    );
                    report.corrupted.push(CorruptedRecord {
                        id: event.id.clone(),
                        sequence: event.sequence,
                        reason,
                    });
                }
            }
        }

        if let Some(ref metrics) = self.metrics {
            metrics.incr_signatures_verified(report.verified as u64);
        }
        tracing::info!(
            total = report.total,
            verified = report.verified,
            corrupted = report.corrupted.len(),
            "Batch verification completed"
        );
        Ok(report)
    }
}

/// Concatenate the protected fields in canonical order.
///
/// The properties map serializes in insertion order, which is part of the
/// record's identity — reordering keys is a mutation.
fn canonical_payload(event: &ActivityEvent) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        event.kind,
        event.description,
        event.causer_id().unwrap_or(""),
        event.subject_id().unwrap_or(""),
        event
            .created_at
            .to_rfc3339_opts(SecondsFormat::Micros, true),
        serde_json::to_string(&event.properties).unwrap_or_default(),
    )
}
