//! 📡 Elasticsearch Bulk Transform: formatting documents for the bulk API's peculiar tastes 🚀
//!
//! Rule 1: Two lines per document. Action metadata, then document source. Always.
//! Rule 2: Newline-delimited, with a newline after the last line too.
//! Rule 3: The metadata depends on who is listening.
//!
//! ## Version dialect 🧠
//! - `_type` only for targets older than 7 (defaulting to `_doc` when the document has none).
//! - `routing` for 6+, `_routing` for anything older.
//! - Action is `create` or `index`, per `WriteMode`.

use serde_json::{Map, Value};

use super::EgressTransform;
use crate::common::{ClusterVersionInfo, Document, WriteMode};
use crate::error::MigrationError;

/// 📡 Encodes documents for one target cluster's `_bulk` endpoint.
#[derive(Debug, Clone)]
pub struct ElasticsearchBulk {
    mode: WriteMode,
    target: ClusterVersionInfo,
}

impl ElasticsearchBulk {
    pub fn new(mode: WriteMode, target: ClusterVersionInfo) -> Self {
        Self { mode, target }
    }
}

impl EgressTransform for ElasticsearchBulk {
    fn transform_document(&self, document: &Document) -> Result<String, MigrationError> {
        let mut metadata = Map::new();
        metadata.insert("_index".to_string(), Value::String(document.index.clone()));
        if self.target.uses_types() {
            let doc_type = document.doc_type.as_deref().unwrap_or("_doc");
            metadata.insert("_type".to_string(), Value::String(doc_type.to_string()));
        }
        if let Some(id) = &document.id {
            metadata.insert("_id".to_string(), Value::String(id.clone()));
        }
        if let Some(routing) = &document.routing {
            metadata.insert(
                self.target.routing_key().to_string(),
                Value::String(routing.clone()),
            );
        }

        let mut action = Map::new();
        action.insert(self.mode.action().to_string(), Value::Object(metadata));

        let mut entry = serde_json::to_string(&action)?;
        entry.push('\n');
        entry.push_str(&serde_json::to_string(&document.source)?);
        entry.push('\n');
        Ok(entry)
    }
}
