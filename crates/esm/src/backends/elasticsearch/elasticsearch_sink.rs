//! 🕳️ ClusterSink: encodes documents for `_bulk` and hands batches to a cluster.
//!
//! Pure I/O plus encoding. No buffering, no retries: the bulk worker owns batching,
//! backoff and classification. The encoder is built from the *target* version, so
//! the action metadata already speaks the target's dialect.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::backends::{ClusterApi, ClusterBackend, Sink};
use crate::common::{BulkBatch, BulkItemResult, ClusterVersionInfo, Document, WriteMode};
use crate::error::MigrationError;
use crate::transforms::{EgressTransform, ElasticsearchBulk};

#[derive(Debug)]
pub(crate) struct ClusterSink {
    cluster: Arc<ClusterBackend>,
    encoder: ElasticsearchBulk,
    mode: WriteMode,
}

impl ClusterSink {
    pub(crate) fn new(
        cluster: Arc<ClusterBackend>,
        target: ClusterVersionInfo,
        mode: WriteMode,
    ) -> Self {
        Self {
            cluster,
            encoder: ElasticsearchBulk::new(mode, target),
            mode,
        }
    }
}

#[async_trait]
impl Sink for ClusterSink {
    fn encode(&self, document: &Document) -> Result<String, MigrationError> {
        self.encoder.transform_document(document)
    }

    async fn send(&self, batch: &BulkBatch) -> Result<Vec<BulkItemResult>, MigrationError> {
        self.cluster.bulk_write(batch, self.mode).await
    }

    async fn close(&self) -> Result<(), MigrationError> {
        debug!("🗑️ cluster sink closing: no buffer to flush, just vibes to release");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryCluster;
    use crate::common::BulkEntry;
    use serde_json::Map;

    #[tokio::test]
    async fn the_one_where_the_sink_writes_what_it_encoded() -> anyhow::Result<()> {
        let mem = InMemoryCluster::new("6.8.0");
        let cluster = Arc::new(ClusterBackend::InMemory(mem.clone()));
        let target = cluster.probe_version().await?;
        let sink = ClusterSink::new(cluster, target, WriteMode::Create);

        let mut batch = BulkBatch::new(10, 1 << 20);
        for id in ["a", "b"] {
            let document = Document::new("dest", Map::new()).with_id(id);
            let encoded = sink.encode(&document)?;
            assert!(encoded.contains("\"_type\":\"_doc\""));
            batch.push(BulkEntry { document, encoded });
        }

        let items = sink.send(&batch).await?;
        assert_eq!(items.iter().map(|i| i.status).collect::<Vec<_>>(), vec![201, 201]);
        assert_eq!(mem.count("dest"), 2);

        let again = sink.send(&batch).await?;
        assert_eq!(again.iter().map(|i| i.status).collect::<Vec<_>>(), vec![409, 409]);
        assert_eq!(mem.count("dest"), 2);
        sink.close().await?;
        Ok(())
    }
}
