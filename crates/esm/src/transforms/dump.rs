//! 💾 Dump lines: one search hit per line, the same shape a scroll page returns.
//!
//! `{"_index":"...","_type":"...","_id":"...","_routing":"...","_source":{...}}`
//!
//! Writing this and reading it back yields the same documents, which is the whole
//! point of a dump. `_type` and `_routing` are omitted when absent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{EgressTransform, IngestTransform};
use crate::common::Document;
use crate::error::MigrationError;

/// 🧾 A search hit as it appears on the wire (and in dump files).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct RawHit {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_type", default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_routing", default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,
    #[serde(rename = "_source", default)]
    pub source: Map<String, Value>,
}

impl From<RawHit> for Document {
    fn from(hit: RawHit) -> Self {
        let mut document = Document::new(hit.index, hit.source);
        document.doc_type = hit.doc_type;
        document.id = hit.id;
        document.routing = hit.routing;
        document
    }
}

impl RawHit {
    pub(crate) fn from_document(document: &Document) -> Self {
        Self {
            index: document.index.clone(),
            doc_type: document.doc_type.clone(),
            id: document.id.clone(),
            routing: document.routing.clone(),
            source: document.source.clone(),
        }
    }
}

/// 💾 Dump file dialect, both directions.
pub(crate) struct DumpLine;

impl IngestTransform for DumpLine {
    fn transform_line(&self, line: &str) -> Result<Option<Document>, MigrationError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let hit: RawHit = serde_json::from_str(line)?;
        Ok(Some(hit.into()))
    }
}

impl EgressTransform for DumpLine {
    fn transform_document(&self, document: &Document) -> Result<String, MigrationError> {
        let mut line = serde_json::to_string(&RawHit::from_document(document))?;
        line.push('\n');
        Ok(line)
    }
}
