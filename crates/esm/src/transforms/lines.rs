//! 📜 Plain line dialects: JSON objects per line, free-form log lines, and the
//! bare `_source` line the Logstash forwarder ships.
//!
//! These carry no metadata, so every document lands in the configured index
//! with no id and no routing. The target picks the ids.

use serde_json::{Map, Value};

use super::{EgressTransform, IngestTransform};
use crate::common::Document;
use crate::error::MigrationError;

/// 📄 One JSON object per line → one document in `index`.
pub(crate) struct JsonLine {
    pub index: String,
    pub doc_type: Option<String>,
}

impl JsonLine {
    /// 🧱 Wrap an already parsed value. Also used for JSON array files.
    pub(crate) fn document_from_value(&self, value: Value) -> Result<Document, MigrationError> {
        match value {
            Value::Object(source) => {
                let mut document = Document::new(self.index.clone(), source);
                document.doc_type = self.doc_type.clone();
                Ok(document)
            }
            other => Err(MigrationError::Protocol(format!(
                "expected a JSON object per document, found: {other}"
            ))),
        }
    }
}

impl IngestTransform for JsonLine {
    fn transform_line(&self, line: &str) -> Result<Option<Document>, MigrationError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let value: Value = serde_json::from_str(line)?;
        self.document_from_value(value).map(Some)
    }
}

/// 🪵 Any line of text → `{"message": line}`.
pub(crate) struct LogLine {
    pub index: String,
    pub doc_type: Option<String>,
}

impl IngestTransform for LogLine {
    fn transform_line(&self, line: &str) -> Result<Option<Document>, MigrationError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Ok(None);
        }
        let mut source = Map::new();
        source.insert("message".to_string(), Value::String(line.to_string()));
        let mut document = Document::new(self.index.clone(), source);
        document.doc_type = self.doc_type.clone();
        Ok(Some(document))
    }
}

/// 📤 Just the `_source`, newline-terminated. Metadata stays home.
pub(crate) struct SourceLine;

impl EgressTransform for SourceLine {
    fn transform_document(&self, document: &Document) -> Result<String, MigrationError> {
        let mut line = serde_json::to_string(&document.source)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_one_where_json_lines_land_in_the_configured_index() -> anyhow::Result<()> {
        let ingest = JsonLine {
            index: "events".into(),
            doc_type: Some("event".into()),
        };
        let document = ingest
            .transform_line(r#"{"a":1}"#)?
            .ok_or_else(|| anyhow::anyhow!("line vanished"))?;
        assert_eq!(document.index, "events");
        assert_eq!(document.doc_type.as_deref(), Some("event"));
        assert_eq!(document.id, None);
        assert_eq!(document.source.get("a"), Some(&json!(1)));
        assert!(ingest.transform_line("").is_ok_and(|d| d.is_none()));
        assert!(ingest.transform_line("[1,2]").is_err());
        Ok(())
    }

    #[test]
    fn the_one_where_a_log_line_becomes_a_message() -> anyhow::Result<()> {
        let ingest = LogLine {
            index: "logs".into(),
            doc_type: None,
        };
        let document = ingest
            .transform_line("GET /index.html 200\n")?
            .ok_or_else(|| anyhow::anyhow!("line vanished"))?;
        assert_eq!(document.source.get("message"), Some(&json!("GET /index.html 200")));
        assert!(ingest.transform_line("   ")?.is_none());
        Ok(())
    }

    #[test]
    fn the_one_where_logstash_only_gets_the_source() -> anyhow::Result<()> {
        let source = json!({"x": true}).as_object().cloned().unwrap_or_default();
        let document = Document::new("i", source).with_id("1");
        assert_eq!(SourceLine.transform_document(&document)?, "{\"x\":true}\n");
        Ok(())
    }
}
