//! 🎬 *[a queue fills with documents. somewhere, a sink waits.]*
//! *[the clock on the wall reads 2:47am.]*
//!
//! 🗑️ The SinkWorker: pulls documents, packs them into a `BulkBatch` until the count or
//! the byte ceiling says stop, submits, and sorts every per-item answer into a bin.
//!
//! 🧠 Knowledge graph:
//! - a whole-batch transport failure retries the batch with backoff; exhausting the
//!   retries abandons that batch (fatal per document), except on the final flush,
//!   where it takes the run down with it
//! - a throttled document goes back into the queue after a backoff, up to
//!   `max_document_retries` times; if the queue is full or already closed the worker
//!   carries it in its own `carry` list instead, so nothing is dropped on the floor
//! - the queue counts a batch as in flight until its requeues are made, so the queue
//!   can't close while a throttled document is on its way back
//! - end-of-stream: take the flush lock and flush exactly our own partial batch, then
//!   whatever we're carrying, until both are empty
//!
//! 🦆 (the duck has no comment at this time)

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::Worker;
use crate::backends::{Sink, SinkBackend};
use crate::classifier::{ItemOutcome, classify};
use crate::common::{BulkBatch, BulkEntry, BulkItemResult, Document};
use crate::counters::RunCounters;
use crate::error::MigrationError;
use crate::progress::MigrationProgress;
use crate::queue::DocumentQueue;
use crate::retry::{RetryConfig, with_retry};

/// 🧰 Everything the sink workers share. Cloned once per worker.
#[derive(Debug, Clone)]
pub(crate) struct SinkWorkerContext {
    pub queue: Arc<DocumentQueue>,
    pub sink: Arc<SinkBackend>,
    pub counters: Arc<RunCounters>,
    pub progress: MigrationProgress,
    /// 🔒 held while a worker performs its end-of-stream flush
    pub flush_lock: Arc<tokio::sync::Mutex<()>>,
    /// 📇 indices that received at least one document, for the post-run refresh
    pub touched: Arc<Mutex<BTreeSet<String>>>,
    pub retry: RetryConfig,
    pub bulk_timeout: Duration,
    pub max_docs: usize,
    pub max_bytes: usize,
    pub max_document_retries: u32,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
pub(crate) struct SinkWorker {
    id: usize,
    ctx: SinkWorkerContext,
    carry: VecDeque<Document>,
}

/// 🔚 Is this the end-of-stream flush, or just a batch that filled up?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushKind {
    Full,
    Final,
}

impl SinkWorker {
    pub(crate) fn new(id: usize, ctx: SinkWorkerContext) -> Self {
        Self {
            id,
            ctx,
            carry: VecDeque::new(),
        }
    }

    fn fresh_batch(&self) -> BulkBatch {
        BulkBatch::new(self.ctx.max_docs, self.ctx.max_bytes)
    }

    // -- 🪦 a document that will never get an answer from the sink
    fn abandon(&self, document: &Document, kind: &str, reason: &str) {
        warn!("💀 worker {}: {} abandoned ({kind}): {reason}", self.id, document.label());
        self.ctx.counters.add_abandoned(document, kind, reason);
        self.ctx.progress.settled(1);
    }

    /// 📥 Encode one document and pack it, flushing first if it wouldn't fit.
    async fn admit(&mut self, batch: &mut BulkBatch, document: Document) -> Result<(), MigrationError> {
        let encoded = match self.ctx.sink.encode(&document) {
            Ok(encoded) => encoded,
            Err(err) => {
                self.abandon(&document, "encode_error", &err.to_string());
                return Ok(());
            }
        };
        if !batch.admits(encoded.len()) {
            let reason = format!(
                "encoded entry is {} bytes, the bulk ceiling is {}",
                encoded.len(),
                self.ctx.max_bytes
            );
            self.abandon(&document, "document_too_large", &reason);
            return Ok(());
        }
        if !batch.fits(encoded.len()) {
            self.flush(batch.take(), FlushKind::Full).await?;
        }
        batch.push(BulkEntry { document, encoded });
        if batch.is_full() {
            self.flush(batch.take(), FlushKind::Full).await?;
        }
        Ok(())
    }

    /// 📡 One submission: retried on transport trouble, bounded by the bulk timeout.
    async fn submit(&self, batch: &BulkBatch) -> Result<Vec<BulkItemResult>, MigrationError> {
        // -- 🛑 once cancelled, one honest attempt is all a batch gets
        let retry = if self.ctx.cancel.is_cancelled() {
            RetryConfig::no_retry()
        } else {
            self.ctx.retry.clone()
        };
        let sink = self.ctx.sink.as_ref();
        let timeout = self.ctx.bulk_timeout;
        with_retry(&retry, "bulk", move || async move {
            match tokio::time::timeout(timeout, sink.send(batch)).await {
                Ok(answer) => answer,
                Err(_) => Err(MigrationError::Transport(format!(
                    "bulk submission timed out after {timeout:?}"
                ))),
            }
        })
        .await
    }

    async fn flush(&mut self, batch: BulkBatch, kind: FlushKind) -> Result<(), MigrationError> {
        if batch.is_empty() {
            return Ok(());
        }
        let size = batch.len();
        trace!(
            "📦 worker {}: flushing {size} documents / {} bytes ({kind:?})",
            self.id,
            batch.bytes()
        );
        self.ctx.queue.begin_submit(size);
        let outcome = self.submit(&batch).await.and_then(|items| {
            if items.len() == size {
                Ok(items)
            } else {
                Err(MigrationError::Protocol(format!(
                    "sink answered {} items for {size} documents",
                    items.len()
                )))
            }
        });
        let result = match outcome {
            Ok(items) => {
                self.settle_items(batch, items).await;
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                for entry in batch.entries() {
                    self.abandon(&entry.document, "bulk_failed", &reason);
                }
                match kind {
                    FlushKind::Final if !self.ctx.cancel.is_cancelled() => Err(err),
                    _ => Ok(()),
                }
            }
        };
        self.ctx.queue.settle(size);
        result
    }

    /// 🏷️ Sort every per-item answer into its bin. Throttled documents go around again.
    async fn settle_items(&mut self, batch: BulkBatch, items: Vec<BulkItemResult>) {
        let mut settled = 0u64;
        let mut touched = BTreeSet::new();
        let mut again = Vec::new();

        for (entry, item) in batch.into_entries().into_iter().zip(items) {
            let mut document = entry.document;
            match classify(&item) {
                ItemOutcome::Succeeded => {
                    self.ctx.counters.add_succeeded(1);
                    touched.insert(document.index);
                    settled += 1;
                }
                ItemOutcome::VersionConflict => {
                    trace!("🔁 {} already on the target", document.label());
                    self.ctx.counters.add_version_conflict();
                    settled += 1;
                }
                ItemOutcome::Rejected { kind, reason } => {
                    let rejection = MigrationError::Document {
                        index: document.index.clone(),
                        id: document.id.clone().unwrap_or_else(|| "<auto>".to_string()),
                        kind: kind.clone(),
                        reason: reason.clone(),
                    };
                    warn!("{rejection}");
                    self.ctx.counters.add_rejected(&document, &kind, &reason);
                    settled += 1;
                }
                ItemOutcome::Retryable { kind, reason } => {
                    document.attempts += 1;
                    if document.attempts > self.ctx.max_document_retries {
                        let reason = format!(
                            "still {kind} after {} attempts: {reason}",
                            document.attempts
                        );
                        warn!("💀 {} gave up: {reason}", document.label());
                        self.ctx.counters.add_rejected(&document, &kind, &reason);
                        settled += 1;
                    } else {
                        self.ctx.counters.add_retried();
                        again.push(document);
                    }
                }
            }
        }

        self.ctx.progress.settled(settled);
        if !touched.is_empty() {
            let mut all = self.ctx.touched.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            all.extend(touched);
        }
        if again.is_empty() {
            return;
        }

        // -- 🐢 the cluster asked us to slow down; one backoff for the whole group
        let attempt = again.iter().map(|doc| doc.attempts).max().unwrap_or(1);
        let delay = self.ctx.retry.delay_for_attempt(attempt);
        debug!(
            "🐢 worker {}: {} throttled documents go around again in {delay:?}",
            self.id,
            again.len()
        );
        tokio::select! {
            _ = self.ctx.cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
        for document in again {
            if let Err(document) = self.ctx.queue.requeue(document) {
                self.carry.push_back(document);
            }
        }
    }

    /// 🔚 End-of-stream: flush our partial batch and anything we carry, exactly once each.
    async fn drain(&mut self, mut batch: BulkBatch) -> Result<(), MigrationError> {
        loop {
            if self.ctx.cancel.is_cancelled() {
                while let Some(document) = self.carry.pop_front() {
                    self.abandon(&document, "cancelled", "run cancelled before a retry");
                }
            }
            while let Some(document) = self.carry.pop_front() {
                self.admit(&mut batch, document).await?;
            }
            if batch.is_empty() {
                return Ok(());
            }
            let flush_lock = self.ctx.flush_lock.clone();
            let _guard = flush_lock.lock().await;
            debug!("🔚 worker {}: final flush of {} documents", self.id, batch.len());
            self.flush(batch.take(), FlushKind::Final).await?;
        }
    }

    async fn work(&mut self) -> Result<(), MigrationError> {
        let mut batch = self.fresh_batch();
        loop {
            let next = match self.carry.pop_front() {
                Some(document) => Some(document),
                None => tokio::select! {
                    biased;
                    _ = self.ctx.cancel.cancelled() => None,
                    document = self.ctx.queue.pop() => document,
                },
            };
            let Some(document) = next else { break };
            self.admit(&mut batch, document).await?;
        }
        if self.ctx.cancel.is_cancelled() {
            self.ctx.queue.close();
        }
        self.drain(batch).await
    }
}

impl Worker for SinkWorker {
    fn start(mut self) -> JoinHandle<Result<(), MigrationError>> {
        tokio::spawn(async move {
            debug!("📥 sink worker {} started", self.id);
            let result = self.work().await;
            match &result {
                Ok(()) => debug!("🏁 sink worker {} done", self.id),
                Err(err) => warn!("💀 sink worker {} failed its final flush: {err}", self.id),
            }
            result
        })
    }
}
