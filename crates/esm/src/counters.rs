//! 📊 RunCounters: the scoreboard every worker scribbles on.
//!
//! Plain atomics for the numbers, a small mutex-guarded ledger for the failures.
//! Workers only ever add. The supervisor only ever reads.
//!
//! 📐 `written` counts documents that got a final per-item answer from the sink
//! (success, conflict, or rejection). Documents abandoned without an answer
//! (transport exhaustion, oversized) are fatal but not written.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::Document;

/// 🧾 One itemized failure for the summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDocument {
    pub document: String,
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Default)]
struct FailureLedger {
    by_kind: BTreeMap<String, u64>,
    itemized: Vec<FailedDocument>,
    overflow: u64,
}

/// 📊 Shared, atomically updated aggregate of the run.
#[derive(Debug)]
pub struct RunCounters {
    read: AtomicU64,
    written: AtomicU64,
    succeeded: AtomicU64,
    version_conflicts: AtomicU64,
    fatal_errors: AtomicU64,
    retried: AtomicU64,
    failed_slices: AtomicU64,
    max_itemized: usize,
    ledger: Mutex<FailureLedger>,
}

/// 📸 A frozen copy of the counters, safe to print and compare.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub read: u64,
    pub written: u64,
    pub succeeded: u64,
    pub version_conflicts: u64,
    pub fatal_errors: u64,
    pub retried: u64,
    pub failed_slices: u64,
    pub failures_by_kind: Vec<(String, u64)>,
    pub failed_documents: Vec<FailedDocument>,
    /// Itemized failures that didn't fit under `max_reported_failures`.
    pub unlisted_failures: u64,
}

impl RunCounters {
    pub fn new(max_itemized: usize) -> Self {
        Self {
            read: AtomicU64::new(0),
            written: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            version_conflicts: AtomicU64::new(0),
            fatal_errors: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            failed_slices: AtomicU64::new(0),
            max_itemized,
            ledger: Mutex::new(FailureLedger::default()),
        }
    }

    pub fn add_read(&self, n: u64) {
        self.read.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_succeeded(&self, n: u64) {
        self.succeeded.fetch_add(n, Ordering::Relaxed);
        self.written.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_version_conflict(&self) {
        self.version_conflicts.fetch_add(1, Ordering::Relaxed);
        self.written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_failed_slice(&self) {
        self.failed_slices.fetch_add(1, Ordering::Relaxed);
    }

    /// 💀 The sink answered, and the answer was no.
    pub fn add_rejected(&self, document: &Document, kind: &str, reason: &str) {
        self.written.fetch_add(1, Ordering::Relaxed);
        self.add_fatal(document, kind, reason);
    }

    /// 🪦 Never got an answer: gave up on the wire, or never sent at all.
    pub fn add_abandoned(&self, document: &Document, kind: &str, reason: &str) {
        self.add_fatal(document, kind, reason);
    }

    fn add_fatal(&self, document: &Document, kind: &str, reason: &str) {
        self.fatal_errors.fetch_add(1, Ordering::Relaxed);
        let mut ledger = self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *ledger.by_kind.entry(kind.to_string()).or_insert(0) += 1;
        if ledger.itemized.len() < self.max_itemized {
            ledger.itemized.push(FailedDocument {
                document: document.label(),
                kind: kind.to_string(),
                reason: reason.to_string(),
            });
        } else {
            ledger.overflow += 1;
        }
    }

    pub fn read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> RunSummary {
        let ledger = self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        RunSummary {
            read: self.read.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            version_conflicts: self.version_conflicts.load(Ordering::Relaxed),
            fatal_errors: self.fatal_errors.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed_slices: self.failed_slices.load(Ordering::Relaxed),
            failures_by_kind: ledger
                .by_kind
                .iter()
                .map(|(kind, count)| (kind.clone(), *count))
                .collect(),
            failed_documents: ledger.itemized.clone(),
            unlisted_failures: ledger.overflow,
        }
    }
}
