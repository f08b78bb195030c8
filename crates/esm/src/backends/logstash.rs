//! 📡 Logstash forwarder: one `_source` JSON object per line over plain TCP.
//!
//! The socket is opened lazily and dropped on any write error, so the next batch
//! reconnects. A failed write is a `Transport` error and the bulk worker retries
//! the batch like any other hiccup. There is no per-line acknowledgement, so a
//! batch that was written counts as accepted.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::Sink;
use crate::common::{BulkBatch, BulkItemResult, Document};
use crate::error::MigrationError;
use crate::transforms::{EgressTransform, SourceLine};

#[derive(Debug, Deserialize, Clone)]
pub struct LogstashSinkConfig {
    /// 📡 `host:port` of a Logstash `tcp` input.
    pub endpoint: String,
    /// 🔒 TLS to the forwarder. Refused at validation; kept so configs can say it out loud.
    #[serde(default)]
    pub secured: bool,
}

#[derive(Debug)]
pub(crate) struct LogstashSink {
    endpoint: String,
    connect_timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl LogstashSink {
    pub(crate) fn new(config: &LogstashSinkConfig, connect_timeout: Duration) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            connect_timeout,
            stream: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<TcpStream, MigrationError> {
        let attempt = TcpStream::connect(&self.endpoint);
        match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(Ok(stream)) => {
                debug!("📡 connected to logstash at {}", self.endpoint);
                Ok(stream)
            }
            Ok(Err(err)) => Err(MigrationError::Transport(format!(
                "logstash at {} refused the connection: {err}",
                self.endpoint
            ))),
            Err(_) => Err(MigrationError::Transport(format!(
                "logstash at {} didn't answer within {:?}",
                self.endpoint, self.connect_timeout
            ))),
        }
    }
}

#[async_trait]
impl Sink for LogstashSink {
    fn encode(&self, document: &Document) -> Result<String, MigrationError> {
        SourceLine.transform_document(document)
    }

    async fn send(&self, batch: &BulkBatch) -> Result<Vec<BulkItemResult>, MigrationError> {
        let mut guard = self.stream.lock().await;
        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };
        if let Err(err) = stream.write_all(batch.render().as_bytes()).await {
            // -- 🔌 broken pipe today, fresh socket tomorrow
            warn!("🔌 lost the logstash socket mid-batch: {err}");
            return Err(MigrationError::Transport(format!(
                "writing to logstash at {} failed: {err}",
                self.endpoint
            )));
        }
        *guard = Some(stream);
        Ok(batch
            .entries()
            .iter()
            .map(|entry| BulkItemResult::accepted(&entry.document))
            .collect())
    }

    async fn close(&self) -> Result<(), MigrationError> {
        if let Some(mut stream) = self.stream.lock().await.take() {
            stream.flush().await?;
            stream.shutdown().await?;
        }
        Ok(())
    }
}
