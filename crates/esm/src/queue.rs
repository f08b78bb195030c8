//! ✉️ The DocumentQueue: a bounded FIFO between scroll cursors and bulk workers.
//!
//! 🚦 Full queue → producers wait (backpressure). Empty queue → workers wait.
//! Closed and empty → workers get end-of-stream and go do their final flush.
//!
//! 🧠 When does it close? When every producer has signed off AND nothing is
//! "in flight". In flight = sitting in the channel, or part of a bulk submission whose
//! items might still bounce back for a retry. A worker's half-built batch is *not*
//! in flight: it belongs to that worker, who flushes it on end-of-stream.
//!
//! Requeues never block (`try_send`). If the queue is full or already closed,
//! the document is handed back and the worker carries it in its own batch.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_channel::{Receiver, Sender, TrySendError};
use tracing::debug;

use crate::common::Document;
use crate::error::MigrationError;

#[derive(Debug)]
pub(crate) struct DocumentQueue {
    tx: Sender<Document>,
    rx: Receiver<Document>,
    producers: AtomicUsize,
    in_flight: AtomicUsize,
}

impl DocumentQueue {
    pub(crate) fn new(capacity: usize, producers: usize) -> Self {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        Self {
            tx,
            rx,
            producers: AtomicUsize::new(producers),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// 📥 Enqueue, waiting while the queue is full. Fails only if the queue was closed.
    pub(crate) async fn push(&self, document: Document) -> Result<(), MigrationError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(document).await.is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(MigrationError::Cancelled);
        }
        Ok(())
    }

    /// 📤 Dequeue, waiting while the queue is empty. `None` means end-of-stream.
    pub(crate) async fn pop(&self) -> Option<Document> {
        match self.rx.recv().await {
            Ok(document) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.maybe_close();
                Some(document)
            }
            Err(_) => None,
        }
    }

    /// 🔁 Put one document back for another pass, without waiting.
    pub(crate) fn requeue(&self, document: Document) -> Result<(), Document> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(document) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(document)) | Err(TrySendError::Closed(document)) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Err(document)
            }
        }
    }

    /// 🏁 One producer is out of documents (or out of luck).
    pub(crate) fn producer_done(&self) {
        self.producers.fetch_sub(1, Ordering::SeqCst);
        self.maybe_close();
    }

    /// 📡 A batch of `n` documents is about to hit the wire; hold the door open.
    pub(crate) fn begin_submit(&self, n: usize) {
        self.in_flight.fetch_add(n, Ordering::SeqCst);
    }

    /// ✅ The submission of `n` documents is settled (requeues already made).
    pub(crate) fn settle(&self, n: usize) {
        self.in_flight.fetch_sub(n, Ordering::SeqCst);
        self.maybe_close();
    }

    /// 🛑 Close now, regardless of who is still busy.
    pub(crate) fn close(&self) {
        if self.tx.close() {
            debug!("🛑 document queue closed");
        }
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    fn maybe_close(&self) {
        if self.producers.load(Ordering::SeqCst) == 0 && self.in_flight.load(Ordering::SeqCst) == 0 {
            self.close();
        }
    }
}
