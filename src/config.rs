//! Typed configuration for the audit subsystem
//!
//! A single `AuditConfig` is assembled once at startup (from file,
//! environment, or defaults) and passed into each component's constructor.
//! Every numeric weight and threshold here is a tunable default, not a
//! hardcoded constant.

use crate::types::AlertSeverity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level configuration, one section per component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub filter: FilterConfig,
    pub signer: SignerConfig,
    pub risk: RiskConfig,
    pub anomaly: AnomalyConfig,
    pub alert: AlertConfig,
    pub backup: BackupConfig,
}

/// A value-shape pattern for sensitive-data detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuePattern {
    /// Pattern name (e.g., "credit_card")
    pub name: String,
    /// Regular expression matched against string values
    pub regex: String,
    /// If set, keep this many characters visible at each end instead of
    /// fully masking the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_visible: Option<usize>,
}

/// Sensitive data filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterConfig {
    /// Case-insensitive substrings; any property key containing one is masked
    pub key_patterns: Vec<String>,
    /// Value-shape regexes; any string value matching one is masked
    pub value_patterns: Vec<ValuePattern>,
    /// Replacement marker for masked values
    pub mask: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            key_patterns: [
                "password",
                "passwd",
                "token",
                "secret",
                "api_key",
                "apikey",
                "private_key",
                "credential",
                "authorization",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            value_patterns: vec![
                ValuePattern {
                    name: "credit_card".to_string(),
                    regex: r"\b(?:\d[ -]?){13,16}\b".to_string(),
                    keep_visible: Some(4),
                },
                ValuePattern {
                    name: "jwt".to_string(),
                    regex: r"\beyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\b".to_string(),
                    keep_visible: None,
                },
                ValuePattern {
                    name: "ssn".to_string(),
                    regex: r"\b\d{3}-\d{2}-\d{4}\b".to_string(),
                    keep_visible: None,
                },
            ],
            mask: "[FILTERED]".to_string(),
        }
    }
}

/// Integrity signer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SignerConfig {
    /// Signing secrets by scheme version; verification may use any
    /// registered version, signing always uses `active_version`
    pub secrets: HashMap<u32, String>,
    /// Version used for new signatures
    pub active_version: u32,
    /// Records per chunk during batch verification
    pub chunk_size: usize,
    /// Batch verification deadline in seconds (0 = unlimited)
    pub batch_timeout_secs: u64,
}

impl Default for SignerConfig {
    fn default() -> Self {
        let mut secrets = HashMap::new();
        secrets.insert(1, "change-me".to_string());
        Self {
            secrets,
            active_version: 1,
            chunk_size: 1_000,
            batch_timeout_secs: 600,
        }
    }
}

/// Business-hours window, hours in [0, 24).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl BusinessHours {
    /// Whether the given hour falls inside the window
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            // Window wraps midnight
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start_hour: 8,
            end_hour: 18,
        }
    }
}

/// Risk scorer weights and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RiskConfig {
    /// Base points per event kind
    pub base_weights: HashMap<String, u32>,
    /// Base points for kinds not present in `base_weights`
    pub default_base_weight: u32,
    /// Event kinds that undergo security scoring at all; kinds outside
    /// this set store risk level 0
    pub security_kinds: Vec<String>,
    /// Window in which activity is considered routine
    pub business_hours: BusinessHours,
    /// Multiplier applied to the running score outside business hours
    pub off_hours_multiplier: f64,
    /// Points added when the source IP is in the suspicious set
    pub suspicious_ip_points: u32,
    /// Points added when the source IP is outside the internal ranges
    pub external_ip_points: u32,
    /// IP prefixes considered internal (e.g., "10.", "192.168.")
    pub internal_ranges: Vec<String>,
    /// `batch_size` property value above which an operation counts as bulk
    pub bulk_threshold: u64,
    /// Points per item above the bulk threshold
    pub bulk_points_per_item: f64,
    /// Cap on total bulk points
    pub bulk_points_cap: u32,
    /// Points added when the event result is `failed`
    pub failure_points: u32,
    /// Extra points per recent consecutive failure by the same actor
    pub consecutive_failure_points: u32,
    /// Window for counting consecutive failures, seconds
    pub failure_window_secs: u64,
    /// Risk level (0-10) floors for classification buckets
    pub medium_floor: u8,
    pub high_floor: u8,
    pub critical_floor: u8,
}

impl Default for RiskConfig {
    fn default() -> Self {
        let mut base_weights = HashMap::new();
        base_weights.insert("login".to_string(), 20);
        base_weights.insert("users.delete".to_string(), 15);
        base_weights.insert("roles.assign".to_string(), 30);
        base_weights.insert("permissions.grant".to_string(), 30);
        Self {
            base_weights,
            default_base_weight: 5,
            security_kinds: [
                "login",
                "logout",
                "users.delete",
                "roles.assign",
                "permissions.grant",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            business_hours: BusinessHours::default(),
            off_hours_multiplier: 1.5,
            suspicious_ip_points: 40,
            external_ip_points: 10,
            internal_ranges: ["10.", "192.168.", "172.16.", "127."]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            bulk_threshold: 10,
            bulk_points_per_item: 0.5,
            bulk_points_cap: 20,
            failure_points: 15,
            consecutive_failure_points: 5,
            failure_window_secs: 300,
            medium_floor: 3,
            high_floor: 6,
            critical_floor: 9,
        }
    }
}

/// Anomaly and pattern detector thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnomalyConfig {
    /// Events per actor within the window before a frequency anomaly fires
    pub frequency_threshold: usize,
    /// Failed logins per IP within the window before the IP is flagged
    pub brute_force_threshold: usize,
    /// Rolling window in seconds for both checks
    pub window_secs: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            frequency_threshold: 100,
            brute_force_threshold: 5,
            window_secs: 3_600,
        }
    }
}

/// Alert generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AlertConfig {
    /// Findings below this severity never produce an alert
    pub severity_floor: AlertSeverity,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            severity_floor: AlertSeverity::Medium,
        }
    }
}

/// Backup/restore engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackupConfig {
    /// Artifact filename prefix
    pub prefix: String,
    /// Base64-encoded 256-bit encryption key
    pub key_base64: String,
    /// Compression algorithm identifier (currently only "gzip")
    pub compression: String,
    /// Artifacts older than this are removed by cleanup
    pub retention_days: u32,
    /// Records per chunk during export
    pub chunk_size: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            prefix: "audit".to_string(),
            key_base64: String::new(),
            compression: "gzip".to_string(),
            retention_days: 30,
            chunk_size: 1_000,
        }
    }
}
