//! Multi-factor risk scoring for security events
//!
//! Combines weighted contextual factors — event kind, time of day, source
//! IP reputation, operation volume, and outcome — into a bounded score.
//! Every weight and threshold comes from `RiskConfig`; the formula itself
//! has no hardcoded constants.

use crate::config::RiskConfig;
use crate::types::{ActivityEvent, AlertSeverity, EventResult, SecurityEvent};
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// Qualitative risk classification of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Shared suspicious-IP set.
///
/// Append-mostly: readers dominate, writers are the anomaly detector's
/// occasional feedback updates. A plain `RwLock<HashSet>` keeps reads
/// uncontended in practice.
#[derive(Debug, Clone, Default)]
pub struct SuspiciousIpSet {
    inner: Arc<RwLock<HashSet<String>>>,
}

impl SuspiciousIpSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.inner
            .read()
            .map(|set| set.contains(ip))
            .unwrap_or(false)
    }

    pub fn insert(&self, ip: impl Into<String>) {
        if let Ok(mut set) = self.inner.write() {
            set.insert(ip.into());
        }
    }

    /// Point-in-time copy of the set.
    pub fn snapshot(&self) -> HashSet<String> {
        self.inner.read().map(|set| set.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|set| set.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-actor context the recorder accumulates between events.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreContext {
    /// Consecutive failed operations by the same actor inside the
    /// configured failure window
    pub recent_failures: u32,
}

/// Computes bounded risk scores from weighted factors.
pub struct RiskScorer {
    config: RiskConfig,
    suspicious_ips: SuspiciousIpSet,
}

impl RiskScorer {
    pub fn new(config: RiskConfig, suspicious_ips: SuspiciousIpSet) -> Self {
        Self {
            config,
            suspicious_ips,
        }
    }

    /// Whether this event kind undergoes security scoring at all.
    pub fn is_security_kind(&self, kind: &str) -> bool {
        self.config.security_kinds.iter().any(|k| k == kind)
    }

    /// Score an event in [0, 100].
    ///
    /// Monotonic in each factor held independently: adding a risk signal
    /// never lowers the score.
    pub fn score(&self, event: &ActivityEvent, ctx: &ScoreContext) -> u8 {
        let mut score = *self
            .config
            .base_weights
            .get(&event.kind)
            .unwrap_or(&self.config.default_base_weight) as f64;

        // Volume factor: bulk operations add points proportional to the
        // batch size above the threshold, capped
        if let Some(batch_size) = event
            .properties
            .get("batch_size")
            .and_then(|v| v.as_u64())
        {
            if batch_size > self.config.bulk_threshold {
                let excess = (batch_size - self.config.bulk_threshold) as f64;
                score += (excess * self.config.bulk_points_per_item)
                    .min(self.config.bulk_points_cap as f64);
            }
        }

        // Result factor, compounded by recent consecutive failures
        if event.result == EventResult::Failed {
            score += self.config.failure_points as f64;
            score +=
                (self.config.consecutive_failure_points * ctx.recent_failures) as f64;
        }

        // Origin factor
        if let Some(ref ip) = event.ip_address {
            if self.suspicious_ips.contains(ip) {
                score += self.config.suspicious_ip_points as f64;
            }
            if !self.is_internal_ip(ip) {
                score += self.config.external_ip_points as f64;
            }
        }

        // Temporal factor: off-hours activity is inherently riskier
        if !self
            .config
            .business_hours
            .contains(event.created_at.hour())
        {
            score *= self.config.off_hours_multiplier.max(1.0);
        }

        score.round().clamp(0.0, 100.0) as u8
    }

    /// Rescale a 0-100 score to the 0-10 risk level stored on the event.
    pub fn risk_level(&self, score: u8) -> u8 {
        ((score as f64) / 10.0).round().min(10.0) as u8
    }

    /// Classify a 0-100 score into a qualitative level using the
    /// configured 0-10 bucket floors.
    pub fn classify(&self, score: u8) -> RiskLevel {
        let level = self.risk_level(score);
        if level >= self.config.critical_floor {
            RiskLevel::Critical
        } else if level >= self.config.high_floor {
            RiskLevel::High
        } else if level >= self.config.medium_floor {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Derive security findings for an event from its score.
    ///
    /// These feed the alert generator, which keeps only the
    /// highest-severity finding per event.
    pub fn findings(&self, event: &ActivityEvent, score: u8) -> Vec<SecurityEvent> {
        let mut findings = Vec::new();
        let severity = severity_for(self.classify(score));

        if event.kind == "login" && event.result == EventResult::Failed {
            findings.push(SecurityEvent::new("login_failure", severity));
        }

        match self.classify(score) {
            RiskLevel::High | RiskLevel::Critical => {
                findings.push(SecurityEvent::new("high_risk_activity", severity));
            }
            _ => {}
        }

        if let Some(ref ip) = event.ip_address {
            if self.suspicious_ips.contains(ip) {
                findings.push(SecurityEvent::new(
                    "suspicious_origin",
                    severity.max(AlertSeverity::Medium),
                ));
            }
        }

        findings
    }

    fn is_internal_ip(&self, ip: &str) -> bool {
        self.config
            .internal_ranges
            .iter()
            .any(|prefix| ip.starts_with(prefix.as_str()))
    }
}

fn severity_for(level: RiskLevel) -> AlertSeverity {
    match level {
        RiskLevel::Low => AlertSeverity::Low,
        RiskLevel::Medium => AlertSeverity::Medium,
        RiskLevel::High => AlertSeverity::High,
        RiskLevel::Critical => AlertSeverity::Critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityRef;
    use chrono::{TimeZone, Utc};

    fn scorer() -> RiskScorer {
        RiskScorer::new(RiskConfig::default(), SuspiciousIpSet::new())
    }

    fn event_at_hour(hour: u32) -> ActivityEvent {
        ActivityEvent {
            id: "evt-1".to_string(),
            sequence: 0,
            kind: "login".to_string(),
            description: "login".to_string(),
            causer: Some(EntityRef::user("u-1")),
            subject: None,
            module: "auth".to_string(),
            properties: serde_json::Map::new(),
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: None,
            result: EventResult::Success,
            risk_level: 0,
            signature: None,
            signature_version: 1,
            created_at: Utc.with_ymd_and_hms(2024, 3, 5, hour, 0, 0).unwrap(),
            archived: false,
        }
    }

    #[test]
    fn test_off_hours_scores_at_least_business_hours() {
        let scorer = scorer();
        let ctx = ScoreContext::default();
        let day = scorer.score(&event_at_hour(14), &ctx);
        let night = scorer.score(&event_at_hour(2), &ctx);
        assert!(night >= day);
        assert!(night > day, "default multiplier is > 1");
    }

    #[test]
    fn test_failed_scores_at_least_success() {
        let scorer = scorer();
        let ctx = ScoreContext::default();
        let success = scorer.score(&event_at_hour(14), &ctx);

        let mut failed_event = event_at_hour(14);
        failed_event.result = EventResult::Failed;
        let failed = scorer.score(&failed_event, &ctx);
        assert!(failed >= success);
    }

    #[test]
    fn test_consecutive_failures_compound() {
        let scorer = scorer();
        let mut event = event_at_hour(14);
        event.result = EventResult::Failed;

        let first = scorer.score(&event, &ScoreContext { recent_failures: 0 });
        let fourth = scorer.score(&event, &ScoreContext { recent_failures: 3 });
        assert!(fourth > first);
    }

    #[test]
    fn test_suspicious_ip_adds_large_increment() {
        let ips = SuspiciousIpSet::new();
        let scorer = RiskScorer::new(RiskConfig::default(), ips.clone());
        let event = event_at_hour(14);

        let clean = scorer.score(&event, &ScoreContext::default());
        ips.insert("10.0.0.1");
        let flagged = scorer.score(&event, &ScoreContext::default());
        assert_eq!(flagged as u32, clean as u32 + 40);
    }

    #[test]
    fn test_external_ip_adds_small_increment() {
        let scorer = scorer();
        let internal = scorer.score(&event_at_hour(14), &ScoreContext::default());

        let mut external_event = event_at_hour(14);
        external_event.ip_address = Some("203.0.113.7".to_string());
        let external = scorer.score(&external_event, &ScoreContext::default());
        assert_eq!(external as u32, internal as u32 + 10);
    }

    #[test]
    fn test_bulk_operation_points_capped() {
        let scorer = scorer();
        let base = scorer.score(&event_at_hour(14), &ScoreContext::default());

        let mut small_bulk = event_at_hour(14);
        small_bulk
            .properties
            .insert("batch_size".to_string(), serde_json::json!(20));
        let small = scorer.score(&small_bulk, &ScoreContext::default());
        assert!(small > base);

        let mut huge_bulk = event_at_hour(14);
        huge_bulk
            .properties
            .insert("batch_size".to_string(), serde_json::json!(100_000));
        let huge = scorer.score(&huge_bulk, &ScoreContext::default());
        // Cap: no more than bulk_points_cap above base
        assert_eq!(huge as u32, base as u32 + 20);
    }

    #[test]
    fn test_unknown_kind_takes_lowest_base_weight() {
        let scorer = scorer();
        let mut event = event_at_hour(14);
        event.kind = "reports.view".to_string();
        let score = scorer.score(&event, &ScoreContext::default());
        assert_eq!(score as u32, RiskConfig::default().default_base_weight);
    }

    #[test]
    fn test_score_clamped_to_100() {
        let ips = SuspiciousIpSet::new();
        ips.insert("203.0.113.7");
        let scorer = RiskScorer::new(RiskConfig::default(), ips);

        let mut event = event_at_hour(2);
        event.kind = "roles.assign".to_string();
        event.result = EventResult::Failed;
        event.ip_address = Some("203.0.113.7".to_string());
        event
            .properties
            .insert("batch_size".to_string(), serde_json::json!(10_000));
        let score = scorer.score(&event, &ScoreContext { recent_failures: 10 });
        assert_eq!(score, 100);
    }

    #[test]
    fn test_risk_level_rescaling() {
        let scorer = scorer();
        assert_eq!(scorer.risk_level(0), 0);
        assert_eq!(scorer.risk_level(34), 3);
        assert_eq!(scorer.risk_level(75), 8);
        assert_eq!(scorer.risk_level(100), 10);
    }

    #[test]
    fn test_classification_buckets() {
        let scorer = scorer();
        assert_eq!(scorer.classify(10), RiskLevel::Low);
        assert_eq!(scorer.classify(30), RiskLevel::Medium);
        assert_eq!(scorer.classify(54), RiskLevel::Medium);
        assert_eq!(scorer.classify(60), RiskLevel::High);
        assert_eq!(scorer.classify(84), RiskLevel::High);
        assert_eq!(scorer.classify(90), RiskLevel::Critical);
    }

    #[test]
    fn test_security_kind_membership() {
        let scorer = scorer();
        assert!(scorer.is_security_kind("login"));
        assert!(scorer.is_security_kind("roles.assign"));
        assert!(!scorer.is_security_kind("reports.view"));
    }

    #[test]
    fn test_findings_for_failed_login() {
        let scorer = scorer();
        let mut event = event_at_hour(14);
        event.result = EventResult::Failed;
        let score = scorer.score(&event, &ScoreContext::default());
        let findings = scorer.findings(&event, score);
        assert!(findings.iter().any(|f| f.kind == "login_failure"));
    }

    #[test]
    fn test_no_findings_for_routine_success() {
        let scorer = scorer();
        let mut event = event_at_hour(14);
        event.kind = "logout".to_string();
        let score = scorer.score(&event, &ScoreContext::default());
        assert!(scorer.findings(&event, score).is_empty());
    }

    #[test]
    fn test_suspicious_ip_set_shared_between_clones() {
        let ips = SuspiciousIpSet::new();
        let clone = ips.clone();
        clone.insert("10.0.0.1");
        assert!(ips.contains("10.0.0.1"));
        assert_eq!(ips.len(), 1);
        assert_eq!(ips.snapshot().len(), 1);
    }
}
