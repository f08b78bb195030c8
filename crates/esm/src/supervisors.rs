//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where workers toil endlessly..."
//! 🎬 "One supervisor dared to manage them all."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor owns the run: `Idle → Probing → Running → Draining → Done | Failed`.
//!
//! - **Probing**: ask both clusters who they are (bounded by the probe timeout, no
//!   retries), optionally wait for green, resolve source indices, prepare targets.
//! - **Running**: one source worker per slice (or file), `workers` sink workers, one
//!   shared queue, one set of counters.
//! - **Draining**: every source is dry; sink workers flush what they hold and exit.
//! - **Done / Failed**: counters are always reported. `Failed` carries a cause.
//!
//! ⚠️ The workers stay private. Like Fight Club, but for async tasks.

mod indices;
mod workers;


use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app_config::{
    AppConfig, FileSinkConfig, FileSourceConfig, LogstashSinkConfig, MigrationConfig, SinkConfig,
    SourceConfig, parse_keep_alive,
};
use crate::backends::elasticsearch::build_query;
use crate::backends::{
    ClusterApi, ClusterBackend, ClusterSink, ElasticsearchCluster, FileSink, FileSource,
    LogstashSink, SinkBackend, SourceBackend,
};
use crate::backends::{ScrollCursor, Sink};
use crate::common::{ClusterVersionInfo, HealthStatus, ScrollRequest};
use crate::counters::{RunCounters, RunSummary};
use crate::error::MigrationError;
use crate::progress::MigrationProgress;
use crate::queue::DocumentQueue;
use crate::transforms::FieldTransformer;
use workers::{SinkWorker, SinkWorkerContext, SourceWorker, Worker};

const GREEN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// 🚦 Where the run is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Probing,
    Running,
    Draining,
    Done,
    Failed,
}

/// 🧾 The final word on a run. Always produced, even when things went sideways.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub phase: Phase,
    pub summary: RunSummary,
    pub elapsed: Duration,
    /// 💀 Why the run failed. `None` when it reached `Done`.
    pub cause: Option<String>,
}

impl MigrationReport {
    pub fn succeeded(&self) -> bool {
        self.phase == Phase::Done
    }
}

/// 🚰 Where documents come from, with clients already built.
#[derive(Debug)]
pub enum SourceEndpoint {
    Cluster {
        cluster: Arc<ClusterBackend>,
        /// 📦 Comma list or wildcard pattern.
        indices: String,
    },
    File(FileSourceConfig),
}

/// 🕳️ Where documents go, with clients already built.
#[derive(Debug)]
pub enum SinkEndpoint {
    Cluster {
        cluster: Arc<ClusterBackend>,
        /// 📦 Single target index override.
        index: Option<String>,
    },
    File(FileSinkConfig),
    Logstash(LogstashSinkConfig),
}

impl SourceEndpoint {
    fn cluster(&self) -> Option<&Arc<ClusterBackend>> {
        match self {
            SourceEndpoint::Cluster { cluster, .. } => Some(cluster),
            SourceEndpoint::File(_) => None,
        }
    }
}

impl SinkEndpoint {
    fn cluster(&self) -> Option<&Arc<ClusterBackend>> {
        match self {
            SinkEndpoint::Cluster { cluster, .. } => Some(cluster),
            _ => None,
        }
    }

    fn index_override(&self) -> Option<String> {
        match self {
            SinkEndpoint::Cluster { index, .. } => index.clone(),
            _ => None,
        }
    }
}

/// 📏 What the probe learned.
#[derive(Debug, Default)]
struct Probed {
    source: Option<ClusterVersionInfo>,
    target: Option<ClusterVersionInfo>,
    source_indices: Vec<String>,
}

/// 📦 The Supervisor: because even async tasks need someone hovering over them
/// asking "is it done yet?" every 5 milliseconds.
#[derive(Debug)]
pub struct Supervisor {
    config: Arc<MigrationConfig>,
    source: SourceEndpoint,
    sink: SinkEndpoint,
    cancel: CancellationToken,
    counters: Arc<RunCounters>,
    phase: Phase,
}

impl Supervisor {
    /// 🚀 Wire up a run. Nothing touches the network until [`Supervisor::run`].
    pub fn new(
        config: MigrationConfig,
        source: SourceEndpoint,
        sink: SinkEndpoint,
        cancel: CancellationToken,
    ) -> Self {
        let counters = Arc::new(RunCounters::new(config.max_reported_failures));
        Self {
            config: Arc::new(config),
            source,
            sink,
            cancel,
            counters,
            phase: Phase::Idle,
        }
    }

    /// 🏗️ Build HTTP clients for whatever the config points at. Validates first.
    pub fn from_app_config(
        app_config: AppConfig,
        cancel: CancellationToken,
    ) -> Result<Self, MigrationError> {
        app_config.validate()?;
        let timeout = Duration::from_secs(app_config.migration.bulk_timeout_secs);
        let source = match app_config.source_config {
            SourceConfig::Elasticsearch(es) => SourceEndpoint::Cluster {
                cluster: Arc::new(ClusterBackend::Elasticsearch(ElasticsearchCluster::new(
                    &es.endpoint,
                    false,
                    timeout,
                )?)),
                indices: es.indices,
            },
            SourceConfig::File(file) => SourceEndpoint::File(file),
        };
        let sink = match app_config.sink_config {
            SinkConfig::Elasticsearch(es) => SinkEndpoint::Cluster {
                cluster: Arc::new(ClusterBackend::Elasticsearch(ElasticsearchCluster::new(
                    &es.endpoint,
                    es.compress,
                    timeout,
                )?)),
                index: es.index,
            },
            SinkConfig::File(file) => SinkEndpoint::File(file),
            SinkConfig::Logstash(logstash) => SinkEndpoint::Logstash(logstash),
        };
        Ok(Self::new(app_config.migration, source, sink, cancel))
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        info!("🎬 {:?} → {:?}", self.phase, phase);
        self.phase = phase;
    }

    // -- ⏱️ race a step against its timeout and the cancellation token
    async fn bounded<T>(
        &self,
        what: &str,
        limit: Duration,
        step: impl Future<Output = Result<T, MigrationError>>,
    ) -> Result<T, MigrationError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(MigrationError::Cancelled),
            outcome = tokio::time::timeout(limit, step) => match outcome {
                Ok(result) => result,
                Err(_) => Err(MigrationError::Transport(format!(
                    "{what} didn't finish within {limit:?}"
                ))),
            },
        }
    }

    async fn wait_for_green(&self, label: &str, cluster: &ClusterBackend) -> Result<(), MigrationError> {
        let poll = async {
            loop {
                match cluster.cluster_health().await {
                    Ok(HealthStatus::Green) => return Ok(()),
                    Ok(status) => debug!("🚦 {label} cluster is {status:?}, waiting for green"),
                    Err(err) if err.is_retryable() => debug!("🚦 {label} health check hiccup: {err}"),
                    Err(err) => return Err(err),
                }
                tokio::time::sleep(GREEN_POLL_INTERVAL).await;
            }
        };
        let limit = Duration::from_secs(self.config.green_timeout_secs);
        self.bounded(&format!("waiting for the {label} cluster to turn green"), limit, poll)
            .await
    }

    async fn probe(&mut self) -> Result<Probed, MigrationError> {
        self.enter(Phase::Probing);
        let limit = Duration::from_secs(self.config.probe_timeout_secs);
        let mut probed = Probed::default();

        if let Some(cluster) = self.source.cluster() {
            let version = self
                .bounded("source version probe", limit, cluster.probe_version())
                .await?;
            info!("🔢 source cluster runs {version}");
            probed.source = Some(version);
        }
        if let Some(cluster) = self.sink.cluster() {
            let version = self
                .bounded("target version probe", limit, cluster.probe_version())
                .await?;
            info!("🔢 target cluster runs {version}");
            probed.target = Some(version);
        }

        if self.config.wait_for_green {
            if let Some(cluster) = self.source.cluster() {
                self.wait_for_green("source", cluster).await?;
            }
            if let Some(cluster) = self.sink.cluster() {
                self.wait_for_green("target", cluster).await?;
            }
        }

        if let Some(version) = &probed.source {
            if self.config.slices > 1 && !version.supports_slices() {
                return Err(MigrationError::Config(format!(
                    "sliced scrolls need 5.0 or newer; the source runs {version}"
                )));
            }
        }

        if let SourceEndpoint::Cluster { cluster, indices } = &self.source {
            let names = self
                .bounded(
                    "source index lookup",
                    limit,
                    indices::resolve_source_indices(cluster, indices, self.config.copy_all_indexes),
                )
                .await?;
            if names.is_empty() {
                return Err(MigrationError::Config(format!(
                    "no source index matches '{indices}'"
                )));
            }
            info!("📦 migrating {} source index(es): {}", names.len(), names.join(", "));
            probed.source_indices = names;
        }

        self.bounded("target index preparation", limit, self.prepare_targets(&probed))
            .await?;
        Ok(probed)
    }

    async fn prepare_targets(&self, probed: &Probed) -> Result<(), MigrationError> {
        let (Some(target), Some(target_version)) = (self.sink.cluster(), probed.target.as_ref())
        else {
            return Ok(());
        };
        let override_index = self.sink.index_override();
        let plans = match &self.source {
            SourceEndpoint::Cluster { .. } => {
                indices::plan_targets(&probed.source_indices, override_index.as_deref())
            }
            // -- 📂 a file source only knows its index up front when someone named it
            SourceEndpoint::File(file) => override_index
                .or_else(|| file.index.clone())
                .map(|target| indices::IndexPlan {
                    target,
                    template: None,
                })
                .into_iter()
                .collect(),
        };
        let source = self.source.cluster().map(Arc::as_ref).zip(probed.source.as_ref());
        for plan in &plans {
            indices::prepare_target(plan, source, target, target_version, &self.config).await?;
        }
        Ok(())
    }

    async fn build_sources(&self, probed: &Probed) -> Result<Vec<(String, SourceBackend)>, MigrationError> {
        match &self.source {
            SourceEndpoint::Cluster { cluster, .. } => {
                let query = self.config.query.as_deref().map(build_query).transpose()?;
                let slices = self.config.slices;
                Ok((0..slices)
                    .map(|slice| {
                        let request = ScrollRequest {
                            indices: probed.source_indices.join(","),
                            query: query.clone(),
                            keep_alive: self.config.scroll_time.clone(),
                            size: self.config.doc_buffer_count,
                            slice: (slices > 1).then_some((slice, slices)),
                        };
                        let cursor = ScrollCursor::new(
                            cluster.clone(),
                            request,
                            self.config.retry.to_retry_config(),
                        );
                        (format!("slice {slice}/{slices}"), SourceBackend::Scroll(cursor))
                    })
                    .collect())
            }
            SourceEndpoint::File(file) => {
                let source = FileSource::new(
                    file,
                    self.sink.index_override(),
                    self.config.doc_buffer_count,
                )
                .await?;
                Ok(vec![(format!("file {}", file.file_name), SourceBackend::File(source))])
            }
        }
    }

    async fn build_sink(&self, probed: &Probed) -> Result<SinkBackend, MigrationError> {
        Ok(match &self.sink {
            SinkEndpoint::Cluster { cluster, .. } => {
                let target = probed.target.clone().ok_or_else(|| {
                    MigrationError::Protocol("target cluster was never probed".to_string())
                })?;
                SinkBackend::Cluster(ClusterSink::new(cluster.clone(), target, self.config.write_mode))
            }
            SinkEndpoint::File(file) => SinkBackend::File(FileSink::new(file).await?),
            SinkEndpoint::Logstash(logstash) => SinkBackend::Logstash(LogstashSink::new(
                logstash,
                Duration::from_secs(self.config.probe_timeout_secs),
            )),
        })
    }

    /// 🧵 Unleash the workers and wait for them. Returns the touched target indices.
    async fn migrate(&mut self, probed: &Probed) -> Result<BTreeSet<String>, MigrationError> {
        let sources = self.build_sources(probed).await?;
        let sink = Arc::new(self.build_sink(probed).await?);
        self.enter(Phase::Running);

        let transformer = Arc::new(FieldTransformer::new(&self.config, self.sink.index_override()));
        let progress = MigrationProgress::new(self.config.show_progress, transformer.fan_out());
        let queue = Arc::new(DocumentQueue::new(self.config.queue_capacity(), sources.len()));
        let touched = Arc::new(Mutex::new(BTreeSet::new()));
        let source_count = sources.len();

        let source_handles: Vec<JoinHandle<Result<(), MigrationError>>> = sources
            .into_iter()
            .map(|(label, source)| {
                SourceWorker::new(
                    label,
                    source,
                    queue.clone(),
                    transformer.clone(),
                    self.counters.clone(),
                    progress.clone(),
                    self.cancel.clone(),
                )
                .start()
            })
            .collect();

        let ctx = SinkWorkerContext {
            queue: queue.clone(),
            sink: sink.clone(),
            counters: self.counters.clone(),
            progress: progress.clone(),
            flush_lock: Arc::new(tokio::sync::Mutex::new(())),
            touched: touched.clone(),
            retry: self.config.retry.to_retry_config(),
            bulk_timeout: Duration::from_secs(self.config.bulk_timeout_secs),
            max_docs: self.config.bulk_max_docs(),
            max_bytes: self.config.bulk_max_bytes(),
            max_document_retries: self.config.max_document_retries,
            cancel: self.cancel.clone(),
        };
        let sink_handles: Vec<JoinHandle<Result<(), MigrationError>>> = (0..self.config.workers)
            .map(|id| SinkWorker::new(id, ctx.clone()).start())
            .collect();

        let phase = &mut self.phase;
        let sources_done = async {
            let results = join_all(source_handles).await;
            info!("🎬 {:?} → {:?}", Phase::Running, Phase::Draining);
            *phase = Phase::Draining;
            results
        };
        let sinks_done = async {
            let results = join_all(sink_handles).await;
            // -- 🚪 if every sink worker is gone, nobody is popping; unblock the producers
            queue.close();
            results
        };
        let (source_results, sink_results) = tokio::join!(sources_done, sinks_done);
        progress.finish();

        let mut failure = None;
        for joined in source_results.into_iter().chain(sink_results) {
            let outcome = joined.map_err(|err| {
                MigrationError::Protocol(format!("a worker panicked: {err}"))
            });
            if let Err(err) | Ok(Err(err)) = outcome {
                error!("💀 {err}");
                failure.get_or_insert(err);
            }
        }
        if let Err(err) = sink.close().await {
            error!("💀 closing the sink failed: {err}");
            failure.get_or_insert(err);
        }

        if self.cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }
        if let Some(err) = failure {
            return Err(err);
        }
        // -- 🧩 a dead slice is the slice's problem; the summary says so, the run carries on
        let failed_slices = self.counters.snapshot().failed_slices;
        if failed_slices > 0 {
            warn!(
                "⚠️ {failed_slices} of {source_count} source slice(s) stopped before they were exhausted; their documents after that point were not copied"
            );
        }
        let touched = touched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        Ok(touched)
    }

    async fn refresh(&self, touched: &BTreeSet<String>) {
        let Some(cluster) = self.sink.cluster() else {
            return;
        };
        for index in touched {
            match cluster.refresh(index).await {
                Ok(()) => debug!("🔄 refreshed '{index}'"),
                Err(err) => warn!("⚠️ refreshing '{index}' failed, the data is there anyway: {err}"),
            }
        }
    }

    fn report(&mut self, started: Instant, cause: Option<MigrationError>) -> MigrationReport {
        let phase = if cause.is_some() { Phase::Failed } else { Phase::Done };
        self.enter(phase);
        let report = MigrationReport {
            phase,
            summary: self.counters.snapshot(),
            elapsed: started.elapsed(),
            cause: cause.map(|err| match err {
                MigrationError::Cancelled => "cancelled".to_string(),
                other => other.to_string(),
            }),
        };
        info!(
            "🧾 read {} / written {} / succeeded {} / conflicts {} / fatal {}",
            report.summary.read,
            report.summary.written,
            report.summary.succeeded,
            report.summary.version_conflicts,
            report.summary.fatal_errors
        );
        report
    }

    /// 🚀 Run the whole migration. Never panics, never returns early without a report.
    pub async fn run(mut self) -> MigrationReport {
        let started = Instant::now();
        if let Err(err) = parse_keep_alive(&self.config.scroll_time) {
            return self.report(started, Some(err));
        }

        let probed = match self.probe().await {
            Ok(probed) => probed,
            Err(err) => {
                error!("💀 probing failed: {err}");
                return self.report(started, Some(err));
            }
        };

        match self.migrate(&probed).await {
            Ok(touched) => {
                if self.config.refresh {
                    self.refresh(&touched).await;
                }
                self.report(started, None)
            }
            Err(err) => self.report(started, Some(err)),
        }
    }
}
