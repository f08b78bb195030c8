//! 🚰 SourceWorker: drains one source into the shared queue.
//!
//! A source failure (expired scroll, exhausted retries, unreadable file) ends this
//! worker only. It is logged, counted as a failed slice, and the other slices keep going.
//! Whatever happens, the worker signs off as a producer on the way out, or the queue
//! would wait for it forever.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::Worker;
use crate::backends::{Source, SourceBackend};
use crate::counters::RunCounters;
use crate::error::MigrationError;
use crate::progress::MigrationProgress;
use crate::queue::DocumentQueue;
use crate::transforms::FieldTransformer;

#[derive(Debug)]
pub(crate) struct SourceWorker {
    label: String,
    source: SourceBackend,
    queue: Arc<DocumentQueue>,
    transformer: Arc<FieldTransformer>,
    counters: Arc<RunCounters>,
    progress: MigrationProgress,
    cancel: CancellationToken,
    read: u64,
    expected: u64,
}

impl SourceWorker {
    pub(crate) fn new(
        label: String,
        source: SourceBackend,
        queue: Arc<DocumentQueue>,
        transformer: Arc<FieldTransformer>,
        counters: Arc<RunCounters>,
        progress: MigrationProgress,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            label,
            source,
            queue,
            transformer,
            counters,
            progress,
            cancel,
            read: 0,
            expected: 0,
        }
    }

    // -- 📏 scrolls know their total after one page; files only at EOF, so they grow as they go
    fn grow_expectation(&mut self) {
        let wanted = self.source.total_hits().unwrap_or(self.read).max(self.read);
        if wanted > self.expected {
            self.progress.add_expected(wanted - self.expected);
            self.expected = wanted;
        }
    }

    async fn pump(&mut self) -> Result<(), MigrationError> {
        loop {
            let page = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(MigrationError::Cancelled),
                page = self.source.next_page() => page?,
            };
            let Some(page) = page else {
                self.grow_expectation();
                return Ok(());
            };

            let count = page.len() as u64;
            self.read += count;
            self.counters.add_read(count);
            self.progress.scrolled(count);
            self.grow_expectation();

            for document in page {
                for transformed in self.transformer.apply(document) {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(MigrationError::Cancelled),
                        pushed = self.queue.push(transformed) => pushed?,
                    }
                }
            }
        }
    }
}

impl Worker for SourceWorker {
    fn start(mut self) -> JoinHandle<Result<(), MigrationError>> {
        tokio::spawn(async move {
            debug!("🚰 {} started", self.label);
            let outcome = self.pump().await;
            self.queue.producer_done();
            match outcome {
                Ok(()) => {
                    debug!("🏁 {} done after {} documents", self.label, self.read);
                }
                Err(MigrationError::Cancelled) => {
                    debug!("🛑 {} stopped by cancellation", self.label);
                }
                Err(err) => {
                    error!(
                        "💀 {} failed after {} documents, the rest of the run carries on: {err}",
                        self.label, self.read
                    );
                    self.counters.add_failed_slice();
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::MigrationConfig;
    use crate::backends::{ClusterBackend, InMemoryCluster, ScrollCursor};
    use crate::common::{Document, ScrollRequest};
    use crate::retry::RetryConfig;
    use serde_json::Map;

    fn worker_for(
        mem: InMemoryCluster,
        queue: Arc<DocumentQueue>,
        counters: Arc<RunCounters>,
        cancel: CancellationToken,
    ) -> SourceWorker {
        let cluster = Arc::new(ClusterBackend::InMemory(mem));
        let cursor = ScrollCursor::new(
            cluster,
            ScrollRequest {
                indices: "src".into(),
                query: None,
                keep_alive: "1m".into(),
                size: 4,
                slice: None,
            },
            RetryConfig::no_retry(),
        );
        SourceWorker::new(
            "slice 0".into(),
            SourceBackend::Scroll(cursor),
            queue,
            Arc::new(FieldTransformer::new(&MigrationConfig::default(), None)),
            counters,
            MigrationProgress::new(false, 1),
            cancel,
        )
    }

    fn seeded(count: usize) -> InMemoryCluster {
        let mem = InMemoryCluster::new("7.17.0");
        mem.seed(
            "src",
            (0..count).map(|n| Document::new("src", Map::new()).with_id(n.to_string())),
        );
        mem
    }

    #[tokio::test]
    async fn the_one_where_every_page_lands_in_the_queue() -> anyhow::Result<()> {
        let queue = Arc::new(DocumentQueue::new(100, 1));
        let counters = Arc::new(RunCounters::new(10));
        let worker = worker_for(seeded(10), queue.clone(), counters.clone(), CancellationToken::new());
        worker.start().await??;

        let mut popped = 0;
        while queue.pop().await.is_some() {
            popped += 1;
        }
        assert_eq!(popped, 10);
        assert_eq!(counters.read(), 10);
        assert!(queue.is_closed());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_expired_scroll_is_a_failed_slice_not_a_failed_run() -> anyhow::Result<()> {
        let mem = seeded(20);
        mem.expire_scrolls_after(1);
        let queue = Arc::new(DocumentQueue::new(100, 1));
        let counters = Arc::new(RunCounters::new(10));
        let worker = worker_for(mem, queue.clone(), counters.clone(), CancellationToken::new());
        worker.start().await??;

        assert_eq!(counters.read(), 8);
        assert_eq!(counters.snapshot().failed_slices, 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_cancellation_unblocks_a_full_queue() -> anyhow::Result<()> {
        let queue = Arc::new(DocumentQueue::new(2, 1));
        let counters = Arc::new(RunCounters::new(10));
        let cancel = CancellationToken::new();
        let handle = worker_for(seeded(50), queue.clone(), counters.clone(), cancel.clone()).start();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await??;
        assert_eq!(counters.snapshot().failed_slices, 0);
        assert!(counters.read() < 50);
        Ok(())
    }
}
