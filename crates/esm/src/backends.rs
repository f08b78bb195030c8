//! 🔌 Backends: where the real I/O happens.
//!
//! 🚰 Sources pour documents, 🕳️ sinks slurp them up, and 🏛️ clusters are the
//! version-tolerant HTTP capability both sides lean on.
//!
//! 🎭 Three traits, three enums, all dispatched by `match`:
//! - `ClusterApi` / `ClusterBackend` → a real Elasticsearch over HTTP, or an in-memory stand-in.
//! - `Source` / `SourceBackend`      → a scroll cursor on a cluster, or a file reader.
//! - `Sink` / `SinkBackend`          → a cluster `_bulk`, a dump file, or a Logstash socket.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use async_trait::async_trait;
use serde_json::Value;

use crate::common::{
    BulkBatch, BulkItemResult, ClusterVersionInfo, Document, HealthStatus, ScrollPage,
    ScrollRequest, WriteMode,
};
use crate::error::MigrationError;

pub(crate) mod elasticsearch;
pub(crate) mod file;
pub(crate) mod in_mem;
pub(crate) mod logstash;

pub use elasticsearch::ElasticsearchCluster;
pub use in_mem::InMemoryCluster;

pub(crate) use elasticsearch::{ClusterSink, ScrollCursor};
pub(crate) use file::{FileSink, FileSource};
pub(crate) use logstash::LogstashSink;

// ===== Cluster capability =====

/// 🏛️ What the pipeline needs from a search cluster, and nothing more.
///
/// # Errors
/// - `Transport` for connection problems, timeouts, 429 and 5xx.
/// - `Protocol` for bodies that don't decode against the known dialects,
///   expired scroll contexts, and other unexpected statuses.
#[async_trait]
pub trait ClusterApi: Send + Sync + std::fmt::Debug {
    /// 🔢 Ask the cluster who it is. Pins the wire dialect for later calls.
    async fn probe_version(&self) -> Result<ClusterVersionInfo, MigrationError>;
    async fn cluster_health(&self) -> Result<HealthStatus, MigrationError>;
    /// 🔍 Concrete index names matching a comma list or wildcard pattern.
    async fn resolve_indices(&self, pattern: &str) -> Result<Vec<String>, MigrationError>;
    /// 📃 Open a scroll and return its first page.
    async fn open_scroll(&self, request: &ScrollRequest) -> Result<ScrollPage, MigrationError>;
    /// 📃 Next page, renewing the keep-alive. Always pass the latest scroll id.
    async fn next_scroll(
        &self,
        scroll_id: &str,
        keep_alive: &str,
    ) -> Result<ScrollPage, MigrationError>;
    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), MigrationError>;
    /// 📦 Submit one batch. One result per entry, same order.
    async fn bulk_write(
        &self,
        batch: &BulkBatch,
        mode: WriteMode,
    ) -> Result<Vec<BulkItemResult>, MigrationError>;
    async fn index_exists(&self, index: &str) -> Result<bool, MigrationError>;
    /// 🏗️ Create an index from a `{"settings":…, "mappings":…}` body.
    async fn create_index(&self, index: &str, body: &Value) -> Result<(), MigrationError>;
    /// 🗑️ Delete an index. Deleting something that isn't there is fine.
    async fn delete_index(&self, index: &str) -> Result<(), MigrationError>;
    /// 🔧 The index's `settings` object.
    async fn get_settings(&self, index: &str) -> Result<Value, MigrationError>;
    /// 🗺️ The index's `mappings` object.
    async fn get_mappings(&self, index: &str) -> Result<Value, MigrationError>;
    async fn refresh(&self, index: &str) -> Result<(), MigrationError>;
}

/// 🎭 The many faces of a cluster.
#[derive(Debug)]
pub enum ClusterBackend {
    Elasticsearch(ElasticsearchCluster),
    InMemory(InMemoryCluster),
}

#[async_trait]
impl ClusterApi for ClusterBackend {
    async fn probe_version(&self) -> Result<ClusterVersionInfo, MigrationError> {
        match self {
            ClusterBackend::Elasticsearch(es) => es.probe_version().await,
            ClusterBackend::InMemory(mem) => mem.probe_version().await,
        }
    }

    async fn cluster_health(&self) -> Result<HealthStatus, MigrationError> {
        match self {
            ClusterBackend::Elasticsearch(es) => es.cluster_health().await,
            ClusterBackend::InMemory(mem) => mem.cluster_health().await,
        }
    }

    async fn resolve_indices(&self, pattern: &str) -> Result<Vec<String>, MigrationError> {
        match self {
            ClusterBackend::Elasticsearch(es) => es.resolve_indices(pattern).await,
            ClusterBackend::InMemory(mem) => mem.resolve_indices(pattern).await,
        }
    }

    async fn open_scroll(&self, request: &ScrollRequest) -> Result<ScrollPage, MigrationError> {
        match self {
            ClusterBackend::Elasticsearch(es) => es.open_scroll(request).await,
            ClusterBackend::InMemory(mem) => mem.open_scroll(request).await,
        }
    }

    async fn next_scroll(
        &self,
        scroll_id: &str,
        keep_alive: &str,
    ) -> Result<ScrollPage, MigrationError> {
        match self {
            ClusterBackend::Elasticsearch(es) => es.next_scroll(scroll_id, keep_alive).await,
            ClusterBackend::InMemory(mem) => mem.next_scroll(scroll_id, keep_alive).await,
        }
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), MigrationError> {
        match self {
            ClusterBackend::Elasticsearch(es) => es.clear_scroll(scroll_id).await,
            ClusterBackend::InMemory(mem) => mem.clear_scroll(scroll_id).await,
        }
    }

    async fn bulk_write(
        &self,
        batch: &BulkBatch,
        mode: WriteMode,
    ) -> Result<Vec<BulkItemResult>, MigrationError> {
        match self {
            ClusterBackend::Elasticsearch(es) => es.bulk_write(batch, mode).await,
            ClusterBackend::InMemory(mem) => mem.bulk_write(batch, mode).await,
        }
    }

    async fn index_exists(&self, index: &str) -> Result<bool, MigrationError> {
        match self {
            ClusterBackend::Elasticsearch(es) => es.index_exists(index).await,
            ClusterBackend::InMemory(mem) => mem.index_exists(index).await,
        }
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), MigrationError> {
        match self {
            ClusterBackend::Elasticsearch(es) => es.create_index(index, body).await,
            ClusterBackend::InMemory(mem) => mem.create_index(index, body).await,
        }
    }

    async fn delete_index(&self, index: &str) -> Result<(), MigrationError> {
        match self {
            ClusterBackend::Elasticsearch(es) => es.delete_index(index).await,
            ClusterBackend::InMemory(mem) => mem.delete_index(index).await,
        }
    }

    async fn get_settings(&self, index: &str) -> Result<Value, MigrationError> {
        match self {
            ClusterBackend::Elasticsearch(es) => es.get_settings(index).await,
            ClusterBackend::InMemory(mem) => mem.get_settings(index).await,
        }
    }

    async fn get_mappings(&self, index: &str) -> Result<Value, MigrationError> {
        match self {
            ClusterBackend::Elasticsearch(es) => es.get_mappings(index).await,
            ClusterBackend::InMemory(mem) => mem.get_mappings(index).await,
        }
    }

    async fn refresh(&self, index: &str) -> Result<(), MigrationError> {
        match self {
            ClusterBackend::Elasticsearch(es) => es.refresh(index).await,
            ClusterBackend::InMemory(mem) => mem.refresh(index).await,
        }
    }
}

// ===== Source Trait and Backend Enum =====

/// 🚰 A lazy, finite, non-restartable stream of document pages.
///
/// # Contract
/// - `next_page` returns `Some(page)` while there is data, `None` once exhausted.
/// - A returned page is never empty; emptiness is spelled `None`.
/// - After `None` or an `Err`, don't call it again.
#[async_trait]
pub(crate) trait Source: std::fmt::Debug + Send {
    async fn next_page(&mut self) -> Result<Option<Vec<Document>>, MigrationError>;
    /// 📏 Total documents this source expects to yield, once known.
    fn total_hits(&self) -> Option<u64>;
}

#[derive(Debug)]
pub(crate) enum SourceBackend {
    Scroll(ScrollCursor),
    File(FileSource),
}

#[async_trait]
impl Source for SourceBackend {
    async fn next_page(&mut self) -> Result<Option<Vec<Document>>, MigrationError> {
        match self {
            SourceBackend::Scroll(cursor) => cursor.next_page().await,
            SourceBackend::File(file) => file.next_page().await,
        }
    }

    fn total_hits(&self) -> Option<u64> {
        match self {
            SourceBackend::Scroll(cursor) => cursor.total_hits(),
            SourceBackend::File(file) => file.total_hits(),
        }
    }
}

// ===== Sink Trait and Backend Enum =====

/// 🕳️ Where batches go. Shared by every bulk worker, so everything is `&self`.
///
/// # Contract
/// - `encode` produces the exact bytes `send` will ship for one document.
/// - `send` returns one `BulkItemResult` per entry, in order. A whole-batch failure
///   is an `Err`, and nothing in the batch should be assumed written.
/// - `close` flushes whatever the sink buffers. Call it once, after the last `send`.
#[async_trait]
pub(crate) trait Sink: std::fmt::Debug + Send + Sync {
    fn encode(&self, document: &Document) -> Result<String, MigrationError>;
    async fn send(&self, batch: &BulkBatch) -> Result<Vec<BulkItemResult>, MigrationError>;
    async fn close(&self) -> Result<(), MigrationError>;
}

#[derive(Debug)]
pub(crate) enum SinkBackend {
    Cluster(ClusterSink),
    File(FileSink),
    Logstash(LogstashSink),
}

#[async_trait]
impl Sink for SinkBackend {
    fn encode(&self, document: &Document) -> Result<String, MigrationError> {
        match self {
            SinkBackend::Cluster(sink) => sink.encode(document),
            SinkBackend::File(sink) => sink.encode(document),
            SinkBackend::Logstash(sink) => sink.encode(document),
        }
    }

    async fn send(&self, batch: &BulkBatch) -> Result<Vec<BulkItemResult>, MigrationError> {
        match self {
            SinkBackend::Cluster(sink) => sink.send(batch).await,
            SinkBackend::File(sink) => sink.send(batch).await,
            SinkBackend::Logstash(sink) => sink.send(batch).await,
        }
    }

    async fn close(&self) -> Result<(), MigrationError> {
        match self {
            SinkBackend::Cluster(sink) => sink.close().await,
            SinkBackend::File(sink) => sink.close().await,
            SinkBackend::Logstash(sink) => sink.close().await,
        }
    }
}
