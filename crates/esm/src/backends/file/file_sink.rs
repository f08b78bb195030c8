use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::trace;

use super::FileSinkConfig;
use crate::backends::Sink;
use crate::common::{BulkBatch, BulkItemResult, Document};
use crate::error::MigrationError;
use crate::transforms::{DumpLine, EgressTransform};

/// 💾 FileSink: writes batches to a dump file, one search hit per line.
///
/// A BufWriter around a tokio `File`, behind a mutex so every bulk worker can share it.
/// A file has no per-item feedback, so every written document counts as accepted.
///
/// ⚠️ `File::create` truncates if the file exists. No warning. No backup. Just gone.
#[derive(Debug)]
pub(crate) struct FileSink {
    file_name: String,
    file_buf: Mutex<BufWriter<File>>,
}

impl FileSink {
    /// 🚀 Creates (or obliterates and recreates) the dump file.
    pub(crate) async fn new(config: &FileSinkConfig) -> Result<Self, MigrationError> {
        let file = File::create(&config.file_name).await.map_err(|err| {
            MigrationError::Config(format!(
                "💀 The sink file '{}' could not be conjured into existence: {err}",
                config.file_name
            ))
        })?;
        Ok(Self {
            file_name: config.file_name.clone(),
            file_buf: Mutex::new(BufWriter::new(file)),
        })
    }
}

#[async_trait]
impl Sink for FileSink {
    fn encode(&self, document: &Document) -> Result<String, MigrationError> {
        DumpLine.transform_document(document)
    }

    async fn send(&self, batch: &BulkBatch) -> Result<Vec<BulkItemResult>, MigrationError> {
        trace!(
            "📬 {} documents / {} bytes walked into '{}'",
            batch.len(),
            batch.bytes(),
            self.file_name
        );
        let mut file_buf = self.file_buf.lock().await;
        for entry in batch.entries() {
            file_buf.write_all(entry.encoded.as_bytes()).await?;
        }
        Ok(batch
            .entries()
            .iter()
            .map(|entry| BulkItemResult::accepted(&entry.document))
            .collect())
    }

    /// 🗑️ Flush explicitly: async Drop is not a thing, and a buffered tail is a lost tail.
    async fn close(&self) -> Result<(), MigrationError> {
        trace!("🎬 final flush of '{}'", self.file_name);
        let mut file_buf = self.file_buf.lock().await;
        file_buf.flush().await?;
        Ok(())
    }
}
