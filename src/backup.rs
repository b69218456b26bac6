//! Backup and restore engine
//!
//! A backup job walks a staged pipeline: collect events in chunks,
//! export them as a JSON archive, gzip-compress, encrypt with
//! AES-256-GCM, checksum, and write a single artifact file. A failure
//! at any stage aborts the job, names the stage in the error, and
//! removes the partial artifact. The artifact carries a plaintext
//! manifest header so integrity triage never needs the key:
//!
//! ```text
//! [4-byte big-endian header length][manifest JSON][12-byte nonce][ciphertext]
//! ```
//!
//! Restore reverses the pipeline and re-imports records under a
//! per-record conflict policy.

use crate::config::BackupConfig;
use crate::error::{AuditError, Result};
use crate::metrics::MetricRecorder;
use crate::signer::IntegritySigner;
use crate::store::{EventCriteria, EventStore, RestorePolicy};
use crate::types::{ActivityEvent, BackupManifest, EncryptionMetadata};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const CIPHER_ID: &str = "aes-256-gcm";
const ENCRYPTION_VERSION: u32 = 1;
const ARCHIVE_VERSION: u32 = 1;
const NONCE_LEN: usize = 12;

/// Pipeline stage names used in `BackupFailed` errors.
mod stage {
    pub const COLLECTING: &str = "collecting";
    pub const EXPORTING: &str = "exporting";
    pub const COMPRESSING: &str = "compressing";
    pub const ENCRYPTING: &str = "encrypting";
    pub const CHECKSUMMING: &str = "checksumming";
    pub const WRITING: &str = "writing";
}

/// The serialized payload inside an artifact, before compression.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupArchive {
    version: u32,
    exported_at: chrono::DateTime<chrono::Utc>,
    record_count: usize,
    records: Vec<ActivityEvent>,
}

/// Outcome of a restore run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    /// Records present in the archive
    pub total: usize,
    /// Records that changed the store (inserted or replaced)
    pub applied: usize,
    /// Records dropped by the conflict policy
    pub skipped: usize,
    /// Per-record validation failures, collected not fatal
    pub errors: Vec<String>,
}

impl RestoreReport {
    /// True when every archived record was either applied or skipped
    /// cleanly.
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Outcome of a retention cleanup run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupReport {
    pub removed: usize,
    pub reclaimed_bytes: u64,
}

/// Staged export → compress → encrypt → checksum pipeline over the
/// event store, plus the inverse restore path.
pub struct BackupEngine {
    config: BackupConfig,
    dir: PathBuf,
    store: Arc<dyn EventStore>,
    signer: IntegritySigner,
    metrics: Arc<MetricRecorder>,
    cipher: Aes256Gcm,
}

impl BackupEngine {
    /// Build an engine writing artifacts under `dir`.
    ///
    /// Fails with `Config` when the base64 key is missing or not
    /// 256 bits.
    pub fn new(
        config: BackupConfig,
        dir: impl Into<PathBuf>,
        store: Arc<dyn EventStore>,
        signer: IntegritySigner,
        metrics: Arc<MetricRecorder>,
    ) -> Result<Self> {
        if config.key_base64.is_empty() {
            return Err(AuditError::Config("backup encryption key is not set".into()));
        }
        let key = BASE64
            .decode(&config.key_base64)
            .map_err(|e| AuditError::Config(format!("backup key is not valid base64: {}", e)))?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| AuditError::Config("backup key must be 32 bytes".into()))?;
        Ok(Self {
            config,
            dir: dir.into(),
            store,
            signer,
            metrics,
            cipher,
        })
    }

    /// Run one backup job over the matching records.
    ///
    /// Returns the manifest of the written artifact. The empty record
    /// set is a valid backup.
    pub async fn run(&self, criteria: &EventCriteria) -> Result<BackupManifest> {
        let started = std::time::Instant::now();
        let records = self.collect(criteria).await?;
        let record_count = records.len();

        // Export
        let archive = BackupArchive {
            version: ARCHIVE_VERSION,
            exported_at: Utc::now(),
            record_count,
            records,
        };
        let plaintext = serde_json::to_vec(&archive).map_err(|e| AuditError::BackupFailed {
            stage: stage::EXPORTING.to_string(),
            reason: e.to_string(),
        })?;

        // Compress
        let compressed = gzip(&plaintext).map_err(|e| AuditError::BackupFailed {
            stage: stage::COMPRESSING.to_string(),
            reason: e.to_string(),
        })?;
        let compression_ratio = if plaintext.is_empty() {
            1.0
        } else {
            compressed.len() as f64 / plaintext.len() as f64
        };

        // Encrypt
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, compressed.as_slice())
            .map_err(|e| AuditError::BackupFailed {
                stage: stage::ENCRYPTING.to_string(),
                reason: format!("cipher failure: {}", e),
            })?;

        // Checksum covers exactly what lands on disk after the header
        let checksum = sha256_hex(&[nonce.as_slice(), &ciphertext]);

        let filename = format!(
            "{}_{}.encrypted",
            self.config.prefix,
            Utc::now().format("%Y%m%d%H%M%S")
        );
        let manifest = BackupManifest {
            filename: filename.clone(),
            record_count,
            created_at: Utc::now(),
            checksum,
            compression_ratio,
            encryption: EncryptionMetadata {
                cipher: CIPHER_ID.to_string(),
                version: ENCRYPTION_VERSION,
            },
        };

        let path = self.dir.join(&filename);
        if let Err(e) = self.write_artifact(&path, &manifest, &nonce, &ciphertext).await {
            // Never leave a partial artifact behind a failed job
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }

        self.metrics.incr_backups_completed();
        self.metrics
            .record_duration(
                "latency",
                "backup_run",
                started.elapsed().as_secs_f64() * 1000.0,
            )
            .await;
        tracing::info!(
            filename = %manifest.filename,
            records = record_count,
            "Backup completed"
        );
        Ok(manifest)
    }

    /// Stream matching records out of the store chunk by chunk,
    /// certifying signatures as they pass.
    async fn collect(&self, criteria: &EventCriteria) -> Result<Vec<ActivityEvent>> {
        let mut records = Vec::new();
        let mut offset = 0;
        loop {
            let chunk = self
                .store
                .fetch_chunk(criteria, offset, self.config.chunk_size)
                .await
                .map_err(|e| AuditError::BackupFailed {
                    stage: stage::COLLECTING.to_string(),
                    reason: e.to_string(),
                })?;
            if chunk.is_empty() {
                break;
            }
            offset += chunk.len();
            for event in chunk {
                if event.is_signed() && !self.signer.verify(&event) {
                    return Err(AuditError::IntegrityViolation {
                        record_id: event.id,
                        reason: "signature mismatch during backup export".to_string(),
                    });
                }
                records.push(event);
            }
        }
        Ok(records)
    }

    async fn write_artifact(
        &self,
        path: &Path,
        manifest: &BackupManifest,
        nonce: &[u8],
        ciphertext: &[u8],
    ) -> Result<()> {
        let header = serde_json::to_vec(manifest).map_err(|e| AuditError::BackupFailed {
            stage: stage::CHECKSUMMING.to_string(),
            reason: e.to_string(),
        })?;
        let mut artifact = Vec::with_capacity(4 + header.len() + nonce.len() + ciphertext.len());
        artifact.extend_from_slice(&(header.len() as u32).to_be_bytes());
        artifact.extend_from_slice(&header);
        artifact.extend_from_slice(nonce);
        artifact.extend_from_slice(ciphertext);
        tokio::fs::write(path, artifact)
            .await
            .map_err(|e| AuditError::BackupFailed {
                stage: stage::WRITING.to_string(),
                reason: e.to_string(),
            })
    }

    /// Read the plaintext manifest header without decrypting.
    pub async fn read_manifest(&self, path: &Path) -> Result<BackupManifest> {
        let (manifest, _payload) = read_artifact(path).await?;
        Ok(manifest)
    }

    /// Recompute the payload checksum and compare against the manifest.
    pub async fn verify_integrity(&self, path: &Path) -> Result<bool> {
        let (manifest, payload) = read_artifact(path).await?;
        Ok(sha256_hex(&[&payload]) == manifest.checksum)
    }

    /// Restore an artifact into the store under the given conflict
    /// policy.
    ///
    /// Per-record validation failures are collected in the report; the
    /// surviving records commit atomically, so a storage failure aborts
    /// the run with nothing imported.
    pub async fn restore(&self, path: &Path, policy: RestorePolicy) -> Result<RestoreReport> {
        let (manifest, payload) = read_artifact(path).await?;
        if sha256_hex(&[&payload]) != manifest.checksum {
            return Err(AuditError::BackupCorruption {
                path: path.display().to_string(),
                reason: "checksum mismatch".to_string(),
            });
        }
        if payload.len() < NONCE_LEN {
            return Err(AuditError::BackupCorruption {
                path: path.display().to_string(),
                reason: "payload shorter than nonce".to_string(),
            });
        }

        // Decrypt
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let compressed = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AuditError::Encryption("decryption failed, wrong key or corrupt data".into()))?;

        // Decompress and parse
        let plaintext = gunzip(&compressed).map_err(|e| AuditError::BackupCorruption {
            path: path.display().to_string(),
            reason: format!("decompression failed: {}", e),
        })?;
        let archive: BackupArchive = serde_json::from_slice(&plaintext)?;

        let mut report = RestoreReport {
            total: archive.records.len(),
            applied: 0,
            skipped: 0,
            errors: Vec::new(),
        };
        let mut valid = Vec::with_capacity(archive.records.len());
        for event in archive.records {
            if event.is_signed() && !self.signer.verify(&event) {
                report
                    .errors
                    .push(format!("record '{}': signature mismatch", event.id));
                continue;
            }
            valid.push(event);
        }

        // Every surviving record commits through one atomic store call:
        // a storage failure imports nothing
        let stats = self.store.restore_batch(valid, policy).await?;
        report.applied = stats.applied;
        report.skipped = stats.skipped;

        tracing::info!(
            path = %path.display(),
            applied = report.applied,
            skipped = report.skipped,
            errors = report.errors.len(),
            "Restore completed"
        );
        Ok(report)
    }

    /// Manifests of every artifact in the backup directory, newest
    /// first. Unreadable files are skipped with a warning.
    pub async fn list_backups(&self) -> Result<Vec<BackupManifest>> {
        let mut manifests = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("encrypted") {
                continue;
            }
            match read_artifact(&path).await {
                Ok((manifest, _)) => manifests.push(manifest),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable backup");
                }
            }
        }
        manifests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(manifests)
    }

    /// Remove artifacts older than the retention window.
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let cutoff = Utc::now() - Duration::days(self.config.retention_days as i64);
        let mut report = CleanupReport::default();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("encrypted") {
                continue;
            }
            let Ok((manifest, _)) = read_artifact(&path).await else {
                continue;
            };
            if manifest.created_at < cutoff {
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                tokio::fs::remove_file(&path).await?;
                report.removed += 1;
                report.reclaimed_bytes += size;
                tracing::info!(path = %path.display(), "Expired backup removed");
            }
        }
        Ok(report)
    }
}

/// Split an artifact into its manifest header and the nonce+ciphertext
/// payload.
async fn read_artifact(path: &Path) -> Result<(BackupManifest, Vec<u8>)> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AuditError::BackupCorruption {
                path: path.display().to_string(),
                reason: "artifact not found".to_string(),
            }
        } else {
            AuditError::Io(e)
        }
    })?;
    if bytes.len() < 4 {
        return Err(AuditError::BackupCorruption {
            path: path.display().to_string(),
            reason: "artifact truncated before header length".to_string(),
        });
    }
    let header_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if bytes.len() < 4 + header_len {
        return Err(AuditError::BackupCorruption {
            path: path.display().to_string(),
            reason: "artifact truncated inside manifest header".to_string(),
        });
    }
    let manifest: BackupManifest =
        serde_json::from_slice(&bytes[4..4 + header_len]).map_err(|e| {
            AuditError::BackupCorruption {
                path: path.display().to_string(),
                reason: format!("manifest unreadable: {}", e),
            }
        })?;
    Ok((manifest, bytes[4 + header_len..].to_vec()))
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}
