//! ✂️ FieldTransformer: per-document policy, applied once before a document is queued.
//!
//! Steps, in order:
//! 1. allow-list the `_source` fields
//! 2. rename fields (`_type:x` copies the mapping type into source field `x`)
//! 3. override the type
//! 4. override the target index
//! 5. keep or drop routing
//! 6. regenerate the id
//! 7. duplicate into `repeat_times` copies, each with its own fresh id
//!
//! Deterministic except for the uuids.

use std::collections::HashSet;

use serde_json::Value;
use uuid::Uuid;

use crate::app_config::MigrationConfig;
use crate::common::Document;

const TYPE_FIELD: &str = "_type";

#[derive(Debug, Clone, Default)]
pub struct FieldTransformer {
    allowed_fields: Option<HashSet<String>>,
    rename: Vec<(String, String)>,
    type_override: Option<String>,
    target_index: Option<String>,
    drop_routing: bool,
    regenerate_id: bool,
    repeat_times: usize,
}

impl FieldTransformer {
    /// 🏗️ Build from the run policy plus the sink's index override, if any.
    pub fn new(config: &MigrationConfig, target_index: Option<String>) -> Self {
        Self {
            allowed_fields: if config.fields.is_empty() {
                None
            } else {
                Some(config.fields.iter().cloned().collect())
            },
            rename: config.rename.clone(),
            type_override: config.type_override.clone(),
            target_index,
            drop_routing: config.drop_routing,
            regenerate_id: config.regenerate_id,
            repeat_times: config.repeat_times.max(1),
        }
    }

    /// 🪞 How many documents come out for every one that goes in.
    pub fn fan_out(&self) -> usize {
        self.repeat_times
    }

    /// 🔄 Transform one document into `fan_out()` documents.
    pub fn apply(&self, mut document: Document) -> Vec<Document> {
        if let Some(allowed) = &self.allowed_fields {
            document.source.retain(|field, _| allowed.contains(field));
        }

        for (old, new) in &self.rename {
            if old == TYPE_FIELD {
                if let Some(doc_type) = &document.doc_type {
                    document
                        .source
                        .insert(new.clone(), Value::String(doc_type.clone()));
                }
            } else if let Some(value) = document.source.remove(old) {
                document.source.insert(new.clone(), value);
            }
        }

        if let Some(doc_type) = &self.type_override {
            document.doc_type = Some(doc_type.clone());
        }
        if let Some(index) = &self.target_index {
            document.index = index.clone();
        }
        if self.drop_routing {
            document.routing = None;
        }

        if self.repeat_times == 1 {
            if self.regenerate_id {
                document.id = Some(fresh_id());
            }
            return vec![document];
        }

        (0..self.repeat_times)
            .map(|_| {
                let mut copy = document.clone();
                if self.regenerate_id {
                    copy.id = Some(fresh_id());
                }
                copy
            })
            .collect()
    }
}

fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}
