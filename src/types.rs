//! Core record types for the audit subsystem
//!
//! All types use camelCase JSON serialization for wire compatibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the operation an event describes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventResult {
    #[default]
    Success,
    Failed,
    Warning,
}

/// Reference to an entity involved in an event (actor or affected subject)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    /// Entity kind (e.g., "user", "role")
    pub entity_type: String,
    /// Entity identifier
    pub id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Convenience constructor for user actors
    pub fn user(id: impl Into<String>) -> Self {
        Self::new("user", id)
    }
}

/// A single immutable audit record
///
/// Protected fields — `kind`, `description`, causer id, subject id,
/// `created_at`, and `properties` — are covered by the integrity signature
/// and must never change once the record is signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    /// Unique event identifier (evt-<uuid>)
    pub id: String,

    /// Store-assigned monotonic sequence number (0 until persisted)
    #[serde(default)]
    pub sequence: u64,

    /// Short category of the event (e.g., "login", "users.delete")
    pub kind: String,

    /// Human-readable summary
    pub description: String,

    /// Actor that caused the event; `None` means system-generated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causer: Option<EntityRef>,

    /// Entity affected by the event, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<EntityRef>,

    /// Functional area the event belongs to (e.g., "auth", "users")
    #[serde(default)]
    pub module: String,

    /// Ordered contextual attributes; sensitive keys are masked before storage
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,

    /// Source IP address, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    /// User agent string, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Operation outcome
    #[serde(default)]
    pub result: EventResult,

    /// Bucketed risk level in [0, 10], set at write time
    #[serde(default)]
    pub risk_level: u8,

    /// Integrity digest over the protected fields; `None` until signed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Version of the signing scheme that produced `signature`
    #[serde(default = "default_signature_version")]
    pub signature_version: u32,

    /// Creation timestamp, immutable
    pub created_at: DateTime<Utc>,

    /// Archive marker — the only field that may change after signing
    #[serde(default)]
    pub archived: bool,
}

fn default_signature_version() -> u32 {
    1
}

impl ActivityEvent {
    /// Whether this record carries an integrity signature
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Id of the causing actor, if any
    pub fn causer_id(&self) -> Option<&str> {
        self.causer.as_ref().map(|c| c.id.as_str())
    }

    /// Id of the affected subject, if any
    pub fn subject_id(&self) -> Option<&str> {
        self.subject.as_ref().map(|s| s.id.as_str())
    }
}

/// Pre-sign event payload submitted to the recorder
///
/// Carries everything the caller knows; the recorder fills in id,
/// timestamp, risk level, and signature.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub causer: Option<EntityRef>,
    #[serde(default)]
    pub subject: Option<EntityRef>,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub result: EventResult,
}

impl NewEvent {
    /// Create a new event payload with the required fields
    pub fn new(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_causer(mut self, causer: EntityRef) -> Self {
        self.causer = Some(causer);
        self
    }

    pub fn with_subject(mut self, subject: EntityRef) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn with_result(mut self, result: EventResult) -> Self {
        self.result = result;
        self
    }

    /// Add a contextual property
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Severity of a security alert, ordered lowest to highest
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// A detected security finding on a single event
///
/// Produced by the risk scorer and anomaly detector; consumed by the
/// alert generator, which keeps only the highest-severity finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    /// Finding kind (e.g., "login_failure", "brute_force")
    pub kind: String,
    /// Finding severity
    pub severity: AlertSeverity,
}

impl SecurityEvent {
    pub fn new(kind: impl Into<String>, severity: AlertSeverity) -> Self {
        Self {
            kind: kind.into(),
            severity,
        }
    }
}

/// A persisted alert derived from a qualifying security event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAlert {
    /// Unique alert identifier (alr-<uuid>)
    pub id: String,
    /// Id of the triggering activity event
    pub activity_id: String,
    /// Alert kind, taken from the selected finding
    pub kind: String,
    /// Alert severity
    pub severity: AlertSeverity,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl SecurityAlert {
    /// Create an alert for an activity from a selected finding
    pub fn for_activity(activity_id: impl Into<String>, finding: &SecurityEvent) -> Self {
        Self {
            id: format!("alr-{}", uuid::Uuid::new_v4()),
            activity_id: activity_id.into(),
            kind: finding.kind.clone(),
            severity: finding.severity,
            created_at: Utc::now(),
        }
    }
}

/// Cipher identification stored alongside a backup artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionMetadata {
    /// Cipher identifier (e.g., "aes-256-gcm")
    pub cipher: String,
    /// Encryption scheme version
    pub version: u32,
}

/// Metadata describing one backup artifact
///
/// Written as a plaintext header inside the artifact so integrity triage
/// never requires the decryption key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    /// Artifact file name (<prefix>_<timestamp>.encrypted)
    pub filename: String,
    /// Number of event records in the archive
    pub record_count: usize,
    /// Backup completion timestamp
    pub created_at: DateTime<Utc>,
    /// Hex SHA-256 checksum over nonce + ciphertext
    pub checksum: String,
    /// Compressed size / uncompressed size
    pub compression_ratio: f64,
    /// Cipher id and version used for the payload
    pub encryption: EncryptionMetadata,
}
