//! 🚚 esm: copy documents out of one search cluster (or a file) and into another
//! cluster (or a file, or a Logstash socket), exactly once, as fast as `_bulk` allows.
//!
//! ```text
//!  scroll slices ──▶ FieldTransformer ──▶ DocumentQueue ──▶ bulk workers ──▶ sink
//!        └───────────── RunCounters / MigrationProgress ─────────────┘
//! ```
//!
//! Build an [`AppConfig`] (see [`app_config::load_config`]), hand it to [`run`] with a
//! cancellation token, and read the [`MigrationReport`] that comes back. 🦆

pub mod app_config;
pub mod backends;
pub mod classifier;
pub mod common;
pub mod counters;
pub mod error;
pub mod progress;
pub(crate) mod queue;
pub mod retry;
pub mod supervisors;
pub mod transforms;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use app_config::{AppConfig, MigrationConfig, load_config};
pub use counters::RunSummary;
pub use error::MigrationError;
pub use progress::render_summary;
pub use supervisors::{MigrationReport, Phase, SinkEndpoint, SourceEndpoint, Supervisor};

/// 🚀 Validate, connect, migrate, report.
///
/// `Err` means the run never started: the config was refused or a client couldn't be
/// built. Everything after that, failures included, comes back as a report.
pub async fn run(
    app_config: AppConfig,
    cancel: CancellationToken,
) -> anyhow::Result<MigrationReport> {
    app_config
        .validate()
        .context("💀 the configuration was loaded but doesn't hold together")?;
    let supervisor = Supervisor::from_app_config(app_config, cancel)
        .context("💀 couldn't build the cluster clients")?;
    let report = supervisor.run().await;
    info!("🏁 run finished in {:?} as {:?}", report.elapsed, report.phase);
    Ok(report)
}
