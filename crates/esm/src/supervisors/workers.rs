//! 🧵 Workers: the ones who actually do the work while the Supervisor takes all the
//! credit in the sprint retro.
//!
//! - `SourceWorker`: one per slice (or one per file). Pulls pages, runs the field
//!   transformer, pushes into the queue, signs off when dry.
//! - `SinkWorker`: `workers` of them. Pulls documents, batches by count and bytes,
//!   submits, classifies, requeues the throttled, flushes its own leftovers at the end.
//!
//! ⚠️ "If you're reading this, the code review went poorly." 🦆

use tokio::task::JoinHandle;

use crate::error::MigrationError;

mod sink_worker;
mod source_worker;

pub(crate) use sink_worker::{SinkWorker, SinkWorkerContext};
pub(crate) use source_worker::SourceWorker;

/// 🏗️ A background worker, that does work. duh.
///
/// `Err` means the run itself is in trouble. Trouble the worker can absorb
/// (a failed slice, a rejected document) is recorded in the counters instead.
pub(crate) trait Worker {
    fn start(self) -> JoinHandle<Result<(), MigrationError>>;
}
