//! Event storage seam
//!
//! `EventStore` is the repository interface every component depends on —
//! components never reach for a global connection. `MemoryEventStore` is
//! the in-process implementation used by tests and single-process
//! deployments; production backends implement the same trait over a
//! relational store.

use crate::error::{AuditError, Result};
use crate::types::ActivityEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Record-selection criteria for queries, batch verification, and export.
#[derive(Debug, Clone, Default)]
pub struct EventCriteria {
    /// Inclusive lower bound on `created_at`
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`
    pub to: Option<DateTime<Utc>>,
    /// Restrict to a single event kind
    pub kind: Option<String>,
    /// Restrict to a single causing actor id
    pub causer_id: Option<String>,
    /// Restrict to a single source IP
    pub ip_address: Option<String>,
    /// Restrict to a functional module
    pub module: Option<String>,
    /// Include records marked archived (deleted-but-retained)
    pub include_archived: bool,
}

impl EventCriteria {
    /// Criteria matching every live record.
    pub fn all() -> Self {
        Self {
            include_archived: true,
            ..Default::default()
        }
    }

    /// Restrict to a date range.
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            include_archived: true,
            ..Default::default()
        }
    }

    /// Whether an event satisfies this criteria.
    pub fn matches(&self, event: &ActivityEvent) -> bool {
        if let Some(from) = self.from {
            if event.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.created_at > to {
                return false;
            }
        }
        if let Some(ref kind) = self.kind {
            if event.kind != *kind {
                return false;
            }
        }
        if let Some(ref causer_id) = self.causer_id {
            if event.causer_id() != Some(causer_id.as_str()) {
                return false;
            }
        }
        if let Some(ref ip) = self.ip_address {
            if event.ip_address.as_deref() != Some(ip.as_str()) {
                return false;
            }
        }
        if let Some(ref module) = self.module {
            if event.module != *module {
                return false;
            }
        }
        if event.archived && !self.include_archived {
            return false;
        }
        true
    }
}

/// Conflict policy applied per record during restore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestorePolicy {
    /// Keep the existing record, drop the incoming one
    #[default]
    Skip,
    /// Overwrite the existing record with the incoming one
    ReplaceExisting,
    /// Keep the existing record but merge missing unprotected fields
    /// (ip, user agent, archive marker) from the incoming one
    Merge,
}

/// Per-record outcome counts of an atomic restore batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreStats {
    /// Records that changed the store (inserted, replaced, or merged)
    pub applied: usize,
    /// Records left untouched by the conflict policy
    pub skipped: usize,
}

/// Append-mostly repository for activity events.
///
/// The store owns signed records: protected fields are append-only, and
/// any attempt to rewrite them through `update_unprotected` is rejected
/// with `TamperAttempt`. Restore-time replacement is an explicit separate
/// operation (`restore_batch`) governed by a `RestorePolicy`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a new event, assigning its monotonic sequence number.
    /// Returns the stored record.
    async fn append(&self, event: ActivityEvent) -> Result<ActivityEvent>;

    /// Persist a batch atomically: either every record is stored or none.
    async fn append_batch(&self, events: Vec<ActivityEvent>) -> Result<()>;

    /// Fetch one record by id.
    async fn get(&self, id: &str) -> Result<Option<ActivityEvent>>;

    /// Fetch a bounded chunk of matching records ordered by sequence.
    ///
    /// `offset`/`limit` implement the chunked-streaming contract: callers
    /// scan large ranges chunk by chunk without the store ever loading
    /// the full table.
    async fn fetch_chunk(
        &self,
        criteria: &EventCriteria,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ActivityEvent>>;

    /// Count matching records.
    async fn count(&self, criteria: &EventCriteria) -> Result<usize>;

    /// Update non-protected bookkeeping on an existing record.
    ///
    /// Rejects with `TamperAttempt` if the incoming record differs from
    /// the stored one in any protected field while the stored record is
    /// signed.
    async fn update_unprotected(&self, event: &ActivityEvent) -> Result<()>;

    /// Apply a batch of restored records under the given conflict policy.
    ///
    /// Atomic: either every record's policy decision is applied or the
    /// store is left unchanged. Records within the batch are applied in
    /// order, so a later record sees the effect of an earlier one.
    async fn restore_batch(
        &self,
        events: Vec<ActivityEvent>,
        policy: RestorePolicy,
    ) -> Result<RestoreStats>;
}

/// Returns the name of the first protected field that differs, if any.
fn protected_field_diff(stored: &ActivityEvent, incoming: &ActivityEvent) -> Option<&'static str> {
    if stored.kind != incoming.kind {
        return Some("kind");
    }
    if stored.description != incoming.description {
        return Some("description");
    }
    if stored.causer_id() != incoming.causer_id() {
        return Some("causer");
    }
    if stored.subject_id() != incoming.subject_id() {
        return Some("subject");
    }
    if stored.created_at != incoming.created_at {
        return Some("created_at");
    }
    if stored.properties != incoming.properties {
        return Some("properties");
    }
    None
}

/// In-memory event store backed by a `Vec` under an async lock.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: Arc<RwLock<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    events: Vec<ActivityEvent>,
    next_sequence: u64,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record, in sequence order. Test helper.
    pub async fn dump(&self) -> Vec<ActivityEvent> {
        self.inner.read().await.events.clone()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, mut event: ActivityEvent) -> Result<ActivityEvent> {
        let mut inner = self.inner.write().await;
        if inner.events.iter().any(|e| e.id == event.id) {
            return Err(AuditError::Storage(format!(
                "Duplicate event id: {}",
                event.id
            )));
        }
        inner.next_sequence += 1;
        event.sequence = inner.next_sequence;
        inner.events.push(event.clone());
        Ok(event)
    }

    async fn append_batch(&self, events: Vec<ActivityEvent>) -> Result<()> {
        let mut inner = self.inner.write().await;
        // Validate the whole batch before touching the table
        for event in &events {
            if inner.events.iter().any(|e| e.id == event.id) {
                return Err(AuditError::Storage(format!(
                    "Duplicate event id in batch: {}",
                    event.id
                )));
            }
        }
        for mut event in events {
            inner.next_sequence += 1;
            event.sequence = inner.next_sequence;
            inner.events.push(event);
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ActivityEvent>> {
        let inner = self.inner.read().await;
        Ok(inner.events.iter().find(|e| e.id == id).cloned())
    }

    async fn fetch_chunk(
        &self,
        criteria: &EventCriteria,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ActivityEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| criteria.matches(e))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self, criteria: &EventCriteria) -> Result<usize> {
        let inner = self.inner.read().await;
        Ok(inner.events.iter().filter(|e| criteria.matches(e)).count())
    }

    async fn update_unprotected(&self, event: &ActivityEvent) -> Result<()> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .events
            .iter_mut()
            .find(|e| e.id == event.id)
            .ok_or_else(|| AuditError::Storage(format!("Event not found: {}", event.id)))?;

        if stored.is_signed() {
            if let Some(field) = protected_field_diff(stored, event) {
                tracing::warn!(
                    record_id = %event.id,
                    field = %field,
                    "Rejected write to protected field on signed record"
                );
                return Err(AuditError::TamperAttempt {
                    record_id: event.id.clone(),
                    field: field.to_string(),
                });
            }
        }

        stored.archived = event.archived;
        stored.ip_address = event.ip_address.clone();
        stored.user_agent = event.user_agent.clone();
        Ok(())
    }

    async fn restore_batch(
        &self,
        events: Vec<ActivityEvent>,
        policy: RestorePolicy,
    ) -> Result<RestoreStats> {
        // One write lock across the whole batch: readers never observe a
        // half-applied restore, and no error path exists past this point
        let mut inner = self.inner.write().await;
        let mut stats = RestoreStats::default();

        for event in events {
            let existing = inner.events.iter_mut().find(|e| e.id == event.id);
            match (existing, policy) {
                (None, _) => {
                    let mut event = event;
                    inner.next_sequence += 1;
                    event.sequence = inner.next_sequence;
                    inner.events.push(event);
                    stats.applied += 1;
                }
                (Some(_), RestorePolicy::Skip) => stats.skipped += 1,
                (Some(stored), RestorePolicy::ReplaceExisting) => {
                    let sequence = stored.sequence;
                    *stored = event;
                    stored.sequence = sequence;
                    stats.applied += 1;
                }
                (Some(stored), RestorePolicy::Merge) => {
                    let mut changed = false;
                    if stored.ip_address.is_none() && event.ip_address.is_some() {
                        stored.ip_address = event.ip_address;
                        changed = true;
                    }
                    if stored.user_agent.is_none() && event.user_agent.is_some() {
                        stored.user_agent = event.user_agent;
                        changed = true;
                    }
                    if event.archived && !stored.archived {
                        stored.archived = true;
                        changed = true;
                    }
                    if changed {
                        stats.applied += 1;
                    } else {
                        stats.skipped += 1;
                    }
                }
            }
        }
        Ok(stats)
    }
}
