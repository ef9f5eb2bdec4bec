//! Append-only audit log of control-plane decisions.
//!
//! Every mutating control-plane call produces exactly one entry, win or
//! lose, in the order the call was accepted. Entries are SHA-256
//! hash-chained for tamper evidence and can be mirrored to a JSONL sink for
//! an external audit consumer.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// The genesis seed for the first entry in the chain.
const GENESIS_SEED: &str = "warden-control-log-genesis-v1";

/// Default number of entries retained in memory.
const DEFAULT_RETENTION: usize = 10_000;

/// One audited control-plane decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlLogEntry {
    /// Monotonic sequence number.
    pub sequence: u64,
    /// The operation name, e.g. `set_world_state` or `approve_action`.
    pub action: String,
    /// Who asked for it (operator id, `"system"`, `"scheduler"`).
    pub actor: String,
    /// When the call was accepted.
    pub timestamp: DateTime<Utc>,
    /// Whether the call took effect (denials and validation failures log
    /// `false`).
    pub success: bool,
    /// Operation-specific detail.
    pub detail: serde_json::Value,
    /// Hash of the previous entry (genesis hash for the first).
    pub previous_hash: String,
    /// Hash of this entry.
    pub hash: String,
}

impl ControlLogEntry {
    /// Compute this entry's hash from every field except `hash` itself.
    #[must_use]
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sequence.to_le_bytes());
        hasher.update(self.action.as_bytes());
        hasher.update(self.actor.as_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update([u8::from(self.success)]);
        hasher.update(self.detail.to_string().as_bytes());
        hasher.update(self.previous_hash.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Verify this entry's stored hash.
    #[must_use]
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

/// Result of verifying the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    pub is_valid: bool,
    pub entries_verified: u64,
    pub first_invalid_sequence: Option<u64>,
}

/// Append-only control log with bounded in-memory retention.
///
/// Ordering reflects the order in which mutating calls were *accepted*:
/// callers append while still holding the lock of the aggregate they
/// mutated, so the log preserves causal order under concurrency.
#[derive(Debug)]
pub struct ControlLog {
    entries: Vec<ControlLogEntry>,
    next_sequence: u64,
    last_hash: String,
    retention: usize,
    /// Optional JSONL mirror consumed by an external audit sink.
    sink_path: Option<PathBuf>,
}

impl ControlLog {
    /// Create an in-memory log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_sequence: 0,
            last_hash: genesis_hash(),
            retention: DEFAULT_RETENTION,
            sink_path: None,
        }
    }

    /// Mirror every entry to a JSONL file at the given path.
    #[must_use]
    pub fn with_sink(mut self, path: impl Into<PathBuf>) -> Self {
        self.sink_path = Some(path.into());
        self
    }

    /// Override the in-memory retention bound.
    #[must_use]
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    /// Append one entry. Returns the recorded entry.
    ///
    /// # Errors
    ///
    /// Returns an error only if the JSONL mirror cannot be written; the
    /// in-memory append has already happened by then.
    pub fn record(
        &mut self,
        action: &str,
        actor: &str,
        success: bool,
        detail: serde_json::Value,
    ) -> Result<ControlLogEntry> {
        let mut entry = ControlLogEntry {
            sequence: self.next_sequence,
            action: action.to_string(),
            actor: actor.to_string(),
            timestamp: Utc::now(),
            success,
            detail,
            previous_hash: self.last_hash.clone(),
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();

        self.next_sequence += 1;
        self.last_hash = entry.hash.clone();
        self.entries.push(entry.clone());
        if self.entries.len() > self.retention {
            let excess = self.entries.len() - self.retention;
            self.entries.drain(..excess);
        }

        if let Some(ref path) = self.sink_path {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context("Failed to open control log sink")?;
            let json = serde_json::to_string(&entry)?;
            writeln!(file, "{}", json).context("Failed to write control log entry")?;
        }

        Ok(entry)
    }

    /// The most recent `limit` entries, oldest first.
    #[must_use]
    pub fn tail(&self, limit: usize) -> Vec<ControlLogEntry> {
        let start = self.entries.len().saturating_sub(limit);
        self.entries[start..].to_vec()
    }

    /// Total entries recorded since startup (including any rotated out of
    /// memory).
    #[must_use]
    pub fn total_recorded(&self) -> u64 {
        self.next_sequence
    }

    /// Verify hash chaining across the retained entries.
    #[must_use]
    pub fn verify(&self) -> ChainVerification {
        let mut previous: Option<&ControlLogEntry> = None;
        for entry in &self.entries {
            let chain_ok = match previous {
                Some(prev) => {
                    entry.previous_hash == prev.hash && entry.sequence == prev.sequence + 1
                }
                // The oldest retained entry may not be sequence 0 after
                // rotation; only its own hash is checkable.
                None => true,
            };
            if !chain_ok || !entry.verify_hash() {
                return ChainVerification {
                    is_valid: false,
                    entries_verified: entry.sequence,
                    first_invalid_sequence: Some(entry.sequence),
                };
            }
            previous = Some(entry);
        }
        ChainVerification {
            is_valid: true,
            entries_verified: self.entries.len() as u64,
            first_invalid_sequence: None,
        }
    }
}

impl Default for ControlLog {
    fn default() -> Self {
        Self::new()
    }
}

fn genesis_hash() -> String {
    let mut hasher = Sha256::new();
    hasher.update(GENESIS_SEED.as_bytes());
    hex::encode(hasher.finalize())
}
