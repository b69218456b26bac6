//! Anomaly and behavioral pattern detection
//!
//! Scans windows of events per actor and per source IP for frequency
//! anomalies and brute-force patterns. Flagged IPs are fed back into the
//! shared suspicious-IP set, which raises the risk scorer's output for
//! subsequent events from those origins.

use crate::config::AnomalyConfig;
use crate::risk::SuspiciousIpSet;
use crate::types::{ActivityEvent, EventResult};
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Kind of detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// An actor produced more events than the frequency threshold allows
    HighFrequency,
    /// An IP accumulated failed logins past the brute-force threshold
    BruteForce,
}

/// A flagged deviation for an actor or IP over a window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub kind: AnomalyKind,
    /// Actor the anomaly is attributed to (frequency anomalies)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    /// Source IP the anomaly is attributed to (brute-force anomalies)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Events counted inside the window
    pub count: usize,
    /// Risk score assigned to the anomaly source, 0-100
    pub risk_score: u8,
    pub description: String,
}

/// A brute-force-flagged source IP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspiciousIp {
    pub ip: String,
    /// Failed logins from this IP inside the window
    pub failure_count: usize,
    /// Distinct accounts those failures targeted
    pub distinct_accounts: usize,
    /// Weighted risk score, 0-100
    pub risk_score: u8,
}

/// Per-actor activity profile over a time range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternSummary {
    pub actor_id: String,
    /// Total events in the range
    pub total: usize,
    /// Event count per kind
    pub by_kind: BTreeMap<String, usize>,
    /// Coarse time-of-day histogram, one bucket per hour
    pub hour_histogram: Vec<usize>,
    /// Normalized deviation of the current window from the actor's own
    /// historical baseline, 0 (routine) to 1 (extreme)
    pub anomaly_score: f64,
}

/// Threshold-based detector over event windows.
pub struct AnomalyDetector {
    config: AnomalyConfig,
    suspicious_ips: SuspiciousIpSet,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig, suspicious_ips: SuspiciousIpSet) -> Self {
        Self {
            config,
            suspicious_ips,
        }
    }

    /// Scan a window of events for frequency and brute-force anomalies.
    ///
    /// Emits at most one `high_frequency` anomaly per actor and one
    /// `brute_force` anomaly per IP. Flagged IPs are added to the shared
    /// suspicious set.
    pub fn detect_anomalies(&self, window: &[ActivityEvent]) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        // Frequency: events per actor, anomaly at >= threshold
        let mut per_actor: HashMap<&str, usize> = HashMap::new();
        for event in window {
            if let Some(actor) = event.causer_id() {
                *per_actor.entry(actor).or_insert(0) += 1;
            }
        }
        let mut actors: Vec<_> = per_actor.into_iter().collect();
        actors.sort_unstable();
        for (actor, count) in actors {
            if count >= self.config.frequency_threshold {
                tracing::warn!(
                    actor = %actor,
                    count,
                    threshold = self.config.frequency_threshold,
                    "High-frequency anomaly detected"
                );
                anomalies.push(Anomaly {
                    kind: AnomalyKind::HighFrequency,
                    actor_id: Some(actor.to_string()),
                    ip_address: None,
                    count,
                    risk_score: frequency_risk(count, self.config.frequency_threshold),
                    description: format!(
                        "Actor {} produced {} events in the window (threshold {})",
                        actor, count, self.config.frequency_threshold
                    ),
                });
            }
        }

        // Brute force: failed logins per IP
        for flagged in self.check_suspicious_ips(window) {
            anomalies.push(Anomaly {
                kind: AnomalyKind::BruteForce,
                actor_id: None,
                ip_address: Some(flagged.ip.clone()),
                count: flagged.failure_count,
                risk_score: flagged.risk_score,
                description: format!(
                    "IP {} accumulated {} failed logins against {} account(s)",
                    flagged.ip, flagged.failure_count, flagged.distinct_accounts
                ),
            });
        }

        anomalies
    }

    /// Group failed logins by source IP and flag IPs past the brute-force
    /// threshold, feeding each into the shared suspicious-IP set.
    ///
    /// The score is weighted by failure count and by how many distinct
    /// accounts the failures targeted.
    pub fn check_suspicious_ips(&self, window: &[ActivityEvent]) -> Vec<SuspiciousIp> {
        let mut failures: BTreeMap<&str, (usize, HashSet<&str>)> = BTreeMap::new();
        for event in window {
            if event.kind != "login" || event.result != EventResult::Failed {
                continue;
            }
            let Some(ip) = event.ip_address.as_deref() else {
                continue;
            };
            let entry = failures.entry(ip).or_default();
            entry.0 += 1;
            if let Some(actor) = event.causer_id() {
                entry.1.insert(actor);
            }
        }

        let mut flagged = Vec::new();
        for (ip, (count, accounts)) in failures {
            if count < self.config.brute_force_threshold {
                continue;
            }
            let risk_score = ip_risk(count, accounts.len());
            tracing::warn!(
                ip = %ip,
                failures = count,
                accounts = accounts.len(),
                risk_score,
                "Brute-force pattern detected, flagging IP"
            );
            self.suspicious_ips.insert(ip);
            flagged.push(SuspiciousIp {
                ip: ip.to_string(),
                failure_count: count,
                distinct_accounts: accounts.len(),
                risk_score,
            });
        }
        flagged
    }

    /// Aggregate one actor's activity over a time range into a profile.
    ///
    /// The anomaly score compares the most recent window's event count
    /// against the mean and deviation of the actor's earlier windows in
    /// the same range — a z-score mapped onto [0, 1], deterministic and
    /// monotonic in deviation magnitude.
    pub fn identify_patterns(
        &self,
        actor_id: &str,
        events: &[ActivityEvent],
    ) -> PatternSummary {
        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        let mut hour_histogram = vec![0usize; 24];
        let mut own: Vec<&ActivityEvent> = Vec::new();

        for event in events {
            if event.causer_id() != Some(actor_id) {
                continue;
            }
            *by_kind.entry(event.kind.clone()).or_insert(0) += 1;
            hour_histogram[event.created_at.hour() as usize] += 1;
            own.push(event);
        }

        PatternSummary {
            actor_id: actor_id.to_string(),
            total: own.len(),
            by_kind,
            hour_histogram,
            anomaly_score: self.deviation_score(&own),
        }
    }

    /// Bucket the actor's events into fixed windows anchored at the range
    /// end, then z-score the newest bucket against the rest.
    fn deviation_score(&self, events: &[&ActivityEvent]) -> f64 {
        let window_secs = self.config.window_secs.max(1) as i64;
        let Some(end) = events.iter().map(|e| e.created_at).max() else {
            return 0.0;
        };
        let start = events
            .iter()
            .map(|e| e.created_at)
            .min()
            .unwrap_or(end);

        let span_secs = (end - start).num_seconds().max(0);
        let bucket_count = (span_secs / window_secs) as usize + 1;
        if bucket_count < 2 {
            return 0.0;
        }

        let mut buckets = vec![0f64; bucket_count];
        for event in events {
            let age = (end - event.created_at).num_seconds().max(0);
            let index = bucket_count - 1 - (age / window_secs) as usize;
            buckets[index] += 1.0;
        }

        let current = buckets[bucket_count - 1];
        let history = &buckets[..bucket_count - 1];
        let mean = history.iter().sum::<f64>() / history.len() as f64;
        let variance = history
            .iter()
            .map(|c| (c - mean).powi(2))
            .sum::<f64>()
            / history.len() as f64;
        let stddev = variance.sqrt();

        let z = if stddev > f64::EPSILON {
            ((current - mean) / stddev).abs()
        } else if (current - mean).abs() > f64::EPSILON {
            // Flat baseline, any change is maximal deviation
            return 1.0;
        } else {
            0.0
        };

        // Map z >= 0 onto [0, 1), monotonic in z
        z / (1.0 + z)
    }
}

fn ip_risk(failures: usize, distinct_accounts: usize) -> u8 {
    (failures * 10 + distinct_accounts * 5).min(100) as u8
}

fn frequency_risk(count: usize, threshold: usize) -> u8 {
    let threshold = threshold.max(1);
    // 50 at the threshold, climbing toward 100 as the overrun doubles
    (50 + (count.saturating_sub(threshold) * 50 / threshold)).min(100) as u8
}
