//! 🔄 Transforms: the Rosetta Stone of data migration 🎭🚀
//!
//! ```text
//!   Ingest (files)          Intermediate           Egress (sinks)
//!  ┌──────────────┐       ┌──────────┐       ┌──────────────┐
//!  │ dump lines   │──┐    │          │    ┌──│ ES _bulk     │
//!  ├──────────────┤  ├───▶│ Document │───▶├──┼──────────────┤
//!  │ json lines   │──┤    │          │    ├──│ dump lines   │
//!  ├──────────────┤  │    └────┬─────┘    │  ├──────────────┤
//!  │ log lines    │──┘         │          └──│ source lines │
//!  └──────────────┘     FieldTransformer     └──────────────┘
//! ```
//!
//! Ingest transforms turn one line of a file into a `Document`. Egress transforms
//! turn a `Document` into the exact bytes a sink will ship, trailing newline included,
//! so a batch's byte count is the request body's byte count. Scroll pages skip ingest
//! entirely: the cluster adapter decodes them straight into documents.
//!
//! The `FieldTransformer` sits in the middle and applies the per-document policy:
//! allow-list, renames, type override, target index, routing, ids, duplication. 🦆

use crate::common::Document;
use crate::error::MigrationError;

pub(crate) mod dump;
pub(crate) mod elasticsearch;
pub(crate) mod fields;
pub(crate) mod lines;

pub(crate) use dump::DumpLine;
pub use elasticsearch::ElasticsearchBulk;
pub use fields::FieldTransformer;
pub(crate) use lines::{JsonLine, LogLine, SourceLine};

/// 📥 One line of input in, zero or one document out. Blank lines are `Ok(None)`.
pub(crate) trait IngestTransform {
    fn transform_line(&self, line: &str) -> Result<Option<Document>, MigrationError>;
}

/// 📤 One document in, the sink's exact wire bytes out (newline-terminated).
pub trait EgressTransform {
    fn transform_document(&self, document: &Document) -> Result<String, MigrationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ClusterVersionInfo, WriteMode};

    #[test]
    fn the_one_where_a_dump_line_travels_to_bulk_format() -> anyhow::Result<()> {
        let line = r#"{"_index":"old","_type":"tweet","_id":"7","_routing":"u1","_source":{"msg":"hi"}}"#;
        let document = DumpLine
            .transform_line(line)?
            .ok_or_else(|| anyhow::anyhow!("dump line vanished"))?;

        let target = ClusterVersionInfo::parse("6.8.0").ok_or_else(|| anyhow::anyhow!("version"))?;
        let bulk = ElasticsearchBulk::new(WriteMode::Create, target).transform_document(&document)?;
        let lines: Vec<&str> = bulk.trim_end().split('\n').collect();
        assert_eq!(lines.len(), 2);

        let action: serde_json::Value = serde_json::from_str(lines[0])?;
        assert_eq!(action["create"]["_index"], "old");
        assert_eq!(action["create"]["_type"], "tweet");
        assert_eq!(action["create"]["_id"], "7");
        assert_eq!(action["create"]["routing"], "u1");
        assert_eq!(lines[1], r#"{"msg":"hi"}"#);
        Ok(())
    }
}
