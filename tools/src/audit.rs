//! Audit logging: a bounded, hash-chained ring buffer of pipeline runs
//!
//! One event per call. The buffer keeps the most recent `capacity` events
//! and evicts the oldest first. Each entry carries the hash of its
//! predecessor, so any retained window can be checked for tampering.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{error, info};

use crate::registry::Operation;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_PREVIEW_LEN: usize = 128;
const GENESIS: &str = "genesis";

/// Completion record for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub request_id: String,
    pub user_id: String,
    pub operation: Operation,
    pub parameters: serde_json::Value,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Where completion events go. Must accept concurrent appends.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    #[serde(flatten)]
    pub event: AuditEvent,
    pub prev_hash: String,
    pub hash: String,
}

struct Ring {
    entries: VecDeque<AuditEntry>,
    last_hash: String,
}

pub struct AuditLog {
    ring: Mutex<Ring>,
    capacity: usize,
    preview_len: usize,
}

impl AuditLog {
    pub fn new(capacity: usize, preview_len: usize) -> Self {
        Self {
            ring: Mutex::new(Ring {
                entries: VecDeque::with_capacity(capacity.min(4096)),
                last_hash: GENESIS.to_string(),
            }),
            capacity: capacity.max(1),
            preview_len,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.with_ring(|r| r.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest first, at most `n`.
    pub fn recent(&self, n: usize) -> Vec<AuditEntry> {
        self.query(n, |_| true)
    }

    /// Newest first, at most `limit`.
    pub fn by_user(&self, user_id: &str, limit: usize) -> Vec<AuditEntry> {
        self.query(limit, |e| e.event.user_id == user_id)
    }

    /// Newest first, at most `limit`.
    pub fn by_operation(&self, operation: Operation, limit: usize) -> Vec<AuditEntry> {
        self.query(limit, |e| e.event.operation == operation)
    }

    /// Check that every retained entry hashes correctly and links to the one before it.
    pub fn verify_chain(&self) -> bool {
        self.with_ring(|r| {
            let mut expected_prev: Option<&str> = None;
            r.entries.iter().all(|entry| {
                let linked = expected_prev.map_or(true, |p| p == entry.prev_hash);
                let intact = chain_hash(&entry.prev_hash, &entry.event) == entry.hash;
                expected_prev = Some(entry.hash.as_str());
                linked && intact
            })
        })
    }

    fn query(&self, limit: usize, keep: impl Fn(&AuditEntry) -> bool) -> Vec<AuditEntry> {
        self.with_ring(|r| {
            r.entries
                .iter()
                .rev()
                .filter(|e| keep(e))
                .take(limit)
                .cloned()
                .collect()
        })
    }

    fn with_ring<T>(&self, f: impl FnOnce(&Ring) -> T) -> T {
        // A panic while holding the lock leaves the ring consistent: every
        // mutation is a single push or pop.
        let guard = self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }

    /// Shorten long string parameter values before they are stored.
    fn truncate_parameters(&self, value: &mut serde_json::Value) {
        match value {
            serde_json::Value::String(s) if s.chars().count() > self.preview_len => {
                let mut short: String = s.chars().take(self.preview_len).collect();
                short.push_str("...");
                *s = short;
            }
            serde_json::Value::Object(map) => {
                map.values_mut().for_each(|v| self.truncate_parameters(v));
            }
            serde_json::Value::Array(items) => {
                items.iter_mut().for_each(|v| self.truncate_parameters(v));
            }
            _ => {}
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_PREVIEW_LEN)
    }
}

impl AuditSink for AuditLog {
    fn record(&self, mut event: AuditEvent) {
        self.truncate_parameters(&mut event.parameters);

        let mut ring = match self.ring.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("audit log lock poisoned; recovering");
                poisoned.into_inner()
            }
        };
        let prev_hash = ring.last_hash.clone();
        let hash = chain_hash(&prev_hash, &event);

        info!(
            request_id = %event.request_id,
            user = %event.user_id,
            operation = %event.operation,
            success = event.success,
            duration_ms = event.duration_ms,
            "audit"
        );

        if ring.entries.len() >= self.capacity {
            ring.entries.pop_front();
        }
        ring.last_hash = hash.clone();
        ring.entries.push_back(AuditEntry {
            event,
            prev_hash,
            hash,
        });
    }
}

/// SHA-256 over the previous hash and the event's identifying fields.
fn chain_hash(prev_hash: &str, event: &AuditEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash);
    hasher.update(&event.request_id);
    hasher.update(event.operation.name());
    hasher.update(&event.user_id);
    hasher.update([u8::from(event.success)]);
    hasher.update(event.duration_ms.to_le_bytes());
    hasher.update(event.timestamp.to_rfc3339());
    format!("{:x}", hasher.finalize())
}
