//! 💀 The error taxonomy: four flavors of "it didn't work", plus two bonus tracks.
//!
//! 🧠 Knowledge graph:
//! - `Config`    → bad knobs. Fails before a single packet leaves the building.
//! - `Transport` → the network blinked. Retried with backoff, then escalated.
//! - `Protocol`  → the cluster answered in a dialect we don't speak, or the scroll expired.
//! - `Document`  → one doc got bounced by the target. Never aborts the run.
//! - `Io`        → the file transport tripped over the filesystem.
//! - `Cancelled` → somebody pressed Ctrl+C. We respect that. 🦆
//!
//! `anyhow` still owns the outer edges (`run`, config loading, the CLI). Inside the
//! pipeline we want to match on *kinds*, so this enum is what flows around.

use thiserror::Error;

/// 🏷️ Every way a migration can go sideways, sorted into labeled bins.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// 🔧 Invalid or mutually exclusive configuration.
    #[error("🔧 configuration rejected: {0}")]
    Config(String),

    /// 📡 Connection refused, timed out, body cut off, or the server said 429/5xx.
    #[error("📡 transport failure: {0}")]
    Transport(String),

    /// 🧩 A response shape we can't decode, or a scroll context that has gone to a farm upstate.
    #[error("🧩 protocol failure: {0}")]
    Protocol(String),

    /// 📄 A single document refused by the target.
    #[error("📄 document {index}/{id} rejected ({kind}): {reason}")]
    Document {
        index: String,
        id: String,
        kind: String,
        reason: String,
    },

    /// 💾 File transport I/O.
    #[error("💾 file transport failure: {0}")]
    Io(#[from] std::io::Error),

    /// 🛑 The run-scoped cancellation token fired.
    #[error("🛑 run cancelled")]
    Cancelled,
}

impl MigrationError {
    /// 🔄 Only transport hiccups deserve a second chance. Everything else is a verdict.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MigrationError::Transport(_))
    }

    /// 📡 Turn a non-2xx HTTP status plus its body into the right bin.
    ///
    /// 429 and 5xx are the cluster catching its breath, so they're `Transport`.
    /// A 404 mentioning `search_context_missing_exception` means the scroll expired,
    /// which is `Protocol` and fatal for that slice. Anything else is also `Protocol`.
    pub(crate) fn from_status(status: u16, body: &str, what: &str) -> Self {
        if status == 429 || status >= 500 {
            return MigrationError::Transport(format!("{what} answered HTTP {status}: {body}"));
        }
        if status == 404 && body.contains("search_context_missing_exception") {
            return MigrationError::Protocol(format!(
                "{what}: scroll context expired before it was renewed: {body}"
            ));
        }
        MigrationError::Protocol(format!("{what} answered HTTP {status}: {body}"))
    }
}

impl From<reqwest::Error> for MigrationError {
    fn from(err: reqwest::Error) -> Self {
        // -- 🧩 decode errors mean bytes arrived but made no sense. Everything else is the wire.
        if err.is_decode() {
            MigrationError::Protocol(err.to_string())
        } else {
            MigrationError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> Self {
        MigrationError::Protocol(format!("undecodable JSON: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_only_the_wire_gets_a_second_chance() {
        assert!(MigrationError::Transport("reset".into()).is_retryable());
        assert!(!MigrationError::Protocol("huh".into()).is_retryable());
        assert!(!MigrationError::Config("nope".into()).is_retryable());
        assert!(!MigrationError::Cancelled.is_retryable());
    }

    #[test]
    fn the_one_where_status_codes_get_sorted_into_bins() {
        assert!(matches!(
            MigrationError::from_status(429, "slow down", "bulk"),
            MigrationError::Transport(_)
        ));
        assert!(matches!(
            MigrationError::from_status(503, "", "bulk"),
            MigrationError::Transport(_)
        ));
        assert!(matches!(
            MigrationError::from_status(404, r#"{"type":"search_context_missing_exception"}"#, "scroll"),
            MigrationError::Protocol(msg) if msg.contains("expired")
        ));
        assert!(matches!(
            MigrationError::from_status(400, "bad", "bulk"),
            MigrationError::Protocol(_)
        ));
    }
}
