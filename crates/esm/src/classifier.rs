//! ⚖️ The response classifier: judge, jury, and retry desk for every bulk item.
//!
//! Four verdicts, no appeals:
//! - 2xx → delivered.
//! - 409 / version conflict → already there, counts as delivered, never retried.
//! - throttling (429, 503, rejected execution, circuit breaker) → back in the queue.
//! - anything else (mapping, illegal argument, parse failures) → fatal for that doc.

use crate::common::BulkItemResult;

/// 🏷️ What to do with one bulk item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded,
    VersionConflict,
    Rejected { kind: String, reason: String },
    Retryable { kind: String, reason: String },
}

const THROTTLE_KINDS: &[&str] = &[
    "es_rejected_execution_exception",
    "rejected_execution_exception",
    "circuit_breaking_exception",
    "unavailable_shards_exception",
];

/// ⚖️ Classify one item. Pure function, no side effects.
pub fn classify(item: &BulkItemResult) -> ItemOutcome {
    let (kind, reason) = match &item.error {
        Some(error) => (error.kind.clone(), error.reason.clone()),
        None => (String::new(), String::new()),
    };

    if (200..300).contains(&item.status) && item.error.is_none() {
        return ItemOutcome::Succeeded;
    }
    if item.status == 409 || kind == "version_conflict_engine_exception" {
        return ItemOutcome::VersionConflict;
    }
    if item.status == 429 || item.status == 503 || THROTTLE_KINDS.contains(&kind.as_str()) {
        return ItemOutcome::Retryable {
            kind: fallback_kind(kind, item.status),
            reason,
        };
    }
    ItemOutcome::Rejected {
        kind: fallback_kind(kind, item.status),
        reason,
    }
}

// -- 🏷️ an error without a type still deserves a label in the ledger
fn fallback_kind(kind: String, status: u16) -> String {
    if kind.is_empty() {
        format!("http_{status}")
    } else {
        kind
    }
}
