//! 🏗️ Index preparation: figure out what to read, and make sure there's somewhere to write.
//!
//! 🧠 Knowledge graph:
//! - source names come from a comma list or wildcard; `.hidden` and `_internal` indices
//!   stay home unless `copy_all_indexes` says otherwise
//! - a target is deleted first when `recreate_index`, created when missing, and left
//!   alone when it already exists
//! - copied settings lose the keys a cluster stamps on at birth (uuid, creation date,
//!   version, provided name), then pick up the shard override
//! - copied mappings are reshaped between typed (pre-7) and typeless (7+) layouts

use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::app_config::MigrationConfig;
use crate::backends::{ClusterApi, ClusterBackend};
use crate::common::ClusterVersionInfo;
use crate::error::MigrationError;

const BIRTH_CERTIFICATE_KEYS: [&str; 4] = ["uuid", "creation_date", "version", "provided_name"];

/// 🔍 Concrete source index names, hidden and internal ones filtered out unless asked for.
pub(crate) async fn resolve_source_indices(
    cluster: &ClusterBackend,
    pattern: &str,
    copy_all_indexes: bool,
) -> Result<Vec<String>, MigrationError> {
    let names = cluster.resolve_indices(pattern).await?;
    Ok(names
        .into_iter()
        .filter(|name| copy_all_indexes || !(name.starts_with('.') || name.starts_with('_')))
        .collect())
}

/// 🔧 Settings a fresh index can actually be created with.
///
/// Accepts both the nested (`{"index": {...}}`) and flat (`{"index.uuid": ...}`) shapes.
pub(crate) fn filter_settings(settings: &Value, shards: Option<u32>) -> Value {
    let mut index: Map<String, Value> = match settings.get("index") {
        Some(Value::Object(nested)) => nested.clone(),
        _ => Map::new(),
    };
    if let Some(flat) = settings.as_object() {
        for (key, value) in flat {
            if let Some(stripped) = key.strip_prefix("index.") {
                index.insert(stripped.to_string(), value.clone());
            }
        }
    }
    for key in BIRTH_CERTIFICATE_KEYS {
        index.remove(key);
    }
    if let Some(shards) = shards {
        index.insert("number_of_shards".to_string(), json!(shards));
    }
    json!({ "index": index })
}

/// 🗺️ Reshape a mappings object from the source's layout into the target's.
///
/// Typed → typeless keeps the first type's body (a 5.x index with several types
/// loses the others, with a warning). Typeless → typed wraps the body under
/// `type_name`, or `_doc`.
pub(crate) fn translate_mappings(
    mappings: &Value,
    source: &ClusterVersionInfo,
    target: &ClusterVersionInfo,
    type_name: Option<&str>,
) -> Value {
    let Some(body) = mappings.as_object() else {
        return json!({});
    };
    if body.is_empty() || source.uses_types() == target.uses_types() {
        return mappings.clone();
    }

    if source.uses_types() {
        // -- 🏷️ {"tweet": {"properties": ...}} → {"properties": ...}
        if body.len() > 1 {
            warn!(
                "🗺️ source mapping has {} types; a typeless target keeps only the first",
                body.len()
            );
        }
        return body.values().next().cloned().unwrap_or_else(|| json!({}));
    }

    let mut typed = Map::new();
    typed.insert(type_name.unwrap_or("_doc").to_string(), mappings.clone());
    Value::Object(typed)
}

/// 📦 One target index to get ready, and the source index to borrow settings from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexPlan {
    pub target: String,
    pub template: Option<String>,
}

/// 🗺️ Which target indices a cluster-to-cluster run writes to.
///
/// With an override, every source index funnels into it and the first source index
/// lends its settings. Without one, each source index maps onto its own name.
pub(crate) fn plan_targets(sources: &[String], target_override: Option<&str>) -> Vec<IndexPlan> {
    match target_override {
        Some(target) => vec![IndexPlan {
            target: target.to_string(),
            template: sources.first().cloned(),
        }],
        None => sources
            .iter()
            .map(|name| IndexPlan {
                target: name.clone(),
                template: Some(name.clone()),
            })
            .collect(),
    }
}

/// 🏗️ Delete / create one target index according to the run policy.
pub(crate) async fn prepare_target(
    plan: &IndexPlan,
    source: Option<(&ClusterBackend, &ClusterVersionInfo)>,
    target: &ClusterBackend,
    target_version: &ClusterVersionInfo,
    config: &MigrationConfig,
) -> Result<(), MigrationError> {
    if config.recreate_index {
        info!("🗑️ recreating target index '{}'", plan.target);
        target.delete_index(&plan.target).await?;
    } else if target.index_exists(&plan.target).await? {
        if config.copy_settings || config.copy_mappings || config.shards.is_some() {
            info!(
                "📦 target index '{}' already exists, leaving its settings and mappings alone",
                plan.target
            );
        }
        return Ok(());
    }

    let mut body = Map::new();
    let template = source.zip(plan.template.as_deref());

    let settings = match template {
        Some(((cluster, _), name)) if config.copy_settings => {
            Some(filter_settings(&cluster.get_settings(name).await?, config.shards))
        }
        _ => config
            .shards
            .map(|shards| json!({ "index": { "number_of_shards": shards } })),
    };
    if let Some(settings) = settings {
        body.insert("settings".to_string(), settings);
    }

    if let Some(((cluster, source_version), name)) = template {
        if config.copy_mappings {
            let mappings = cluster.get_mappings(name).await?;
            body.insert(
                "mappings".to_string(),
                translate_mappings(
                    &mappings,
                    source_version,
                    target_version,
                    config.type_override.as_deref(),
                ),
            );
        }
    }

    info!("🏗️ creating target index '{}'", plan.target);
    target.create_index(&plan.target, &Value::Object(body)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryCluster;

    fn version(number: &str) -> anyhow::Result<ClusterVersionInfo> {
        ClusterVersionInfo::parse(number).ok_or_else(|| anyhow::anyhow!("bad version {number}"))
    }

    #[tokio::test]
    async fn the_one_where_hidden_indices_stay_hidden() -> anyhow::Result<()> {
        let mem = InMemoryCluster::new("7.17.0");
        for name in [".kibana", "_internal", "logs"] {
            mem.seed_index(name, json!({}), json!({}));
        }
        let cluster = ClusterBackend::InMemory(mem);
        assert_eq!(resolve_source_indices(&cluster, "_all", false).await?, vec!["logs"]);
        assert_eq!(resolve_source_indices(&cluster, "_all", true).await?.len(), 3);
        Ok(())
    }

    #[test]
    fn the_one_where_settings_lose_their_birth_certificate() {
        let settings = json!({"index": {
            "uuid": "abc", "creation_date": "1", "provided_name": "src",
            "version": {"created": "6080099"},
            "number_of_shards": "5", "number_of_replicas": "1",
            "analysis": {"analyzer": {}}
        }});
        assert_eq!(
            filter_settings(&settings, Some(2)),
            json!({"index": {"number_of_shards": 2, "number_of_replicas": "1", "analysis": {"analyzer": {}}}})
        );
        let flat = json!({"index.uuid": "abc", "index.number_of_replicas": "0"});
        assert_eq!(
            filter_settings(&flat, None),
            json!({"index": {"number_of_replicas": "0"}})
        );
    }

    #[test]
    fn the_one_where_mappings_lose_and_regain_their_type() -> anyhow::Result<()> {
        let six = version("6.8.0")?;
        let seven = version("7.10.0")?;
        let typed = json!({"tweet": {"properties": {"user": {"type": "keyword"}}}});
        let typeless = json!({"properties": {"user": {"type": "keyword"}}});

        assert_eq!(translate_mappings(&typed, &six, &seven, None), typeless);
        assert_eq!(
            translate_mappings(&typeless, &seven, &six, Some("tweet")),
            typed
        );
        assert_eq!(
            translate_mappings(&typeless, &seven, &six, None),
            json!({"_doc": {"properties": {"user": {"type": "keyword"}}}})
        );
        assert_eq!(translate_mappings(&typed, &six, &six, None), typed);
        assert_eq!(translate_mappings(&json!({}), &six, &seven, None), json!({}));
        Ok(())
    }

    #[test]
    fn the_one_where_an_override_funnels_everything_into_one_index() {
        let sources = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            plan_targets(&sources, Some("all")),
            vec![IndexPlan {
                target: "all".into(),
                template: Some("a".into())
            }]
        );
        assert_eq!(plan_targets(&sources, None).len(), 2);
    }

    #[tokio::test]
    async fn the_one_where_the_target_is_built_from_the_source() -> anyhow::Result<()> {
        let source_mem = InMemoryCluster::new("6.8.0");
        source_mem.seed_index(
            "src",
            json!({"index": {"uuid": "x", "number_of_shards": "5"}}),
            json!({"tweet": {"properties": {"n": {"type": "long"}}}}),
        );
        let target_mem = InMemoryCluster::new("7.17.0");
        target_mem.seed_index("dest", json!({}), json!({}));

        let source = ClusterBackend::InMemory(source_mem);
        let target = ClusterBackend::InMemory(target_mem.clone());
        let config = MigrationConfig {
            recreate_index: true,
            copy_settings: true,
            copy_mappings: true,
            shards: Some(1),
            ..MigrationConfig::default()
        };
        let plan = IndexPlan {
            target: "dest".into(),
            template: Some("src".into()),
        };
        prepare_target(
            &plan,
            Some((&source, &version("6.8.0")?)),
            &target,
            &version("7.17.0")?,
            &config,
        )
        .await?;

        let (settings, mappings) = target_mem
            .index_body("dest")
            .ok_or_else(|| anyhow::anyhow!("dest was not created"))?;
        assert_eq!(settings, json!({"index": {"number_of_shards": 1}}));
        assert_eq!(mappings, json!({"properties": {"n": {"type": "long"}}}));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_existing_target_is_left_alone() -> anyhow::Result<()> {
        let target_mem = InMemoryCluster::new("7.17.0");
        target_mem.seed_index("dest", json!({"index": {"number_of_shards": 3}}), json!({}));
        let target = ClusterBackend::InMemory(target_mem.clone());
        let config = MigrationConfig {
            shards: Some(1),
            ..MigrationConfig::default()
        };
        let plan = IndexPlan {
            target: "dest".into(),
            template: None,
        };
        prepare_target(&plan, None, &target, &version("7.17.0")?, &config).await?;
        let (settings, _) = target_mem
            .index_body("dest")
            .ok_or_else(|| anyhow::anyhow!("dest vanished"))?;
        assert_eq!(settings, json!({"index": {"number_of_shards": 3}}));
        Ok(())
    }
}
