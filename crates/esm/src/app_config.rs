//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment: `ESM_*` environment variables (nested keys split on `__`)
//! merged with an optional TOML file. The file wins ties.
//!
//! 🧠 Knowledge graph:
//! - `SourceConfig` / `SinkConfig` are externally tagged enums; each variant's payload
//!   lives next to its backend (`backends::elasticsearch`, `backends::file`, `backends::logstash`).
//! - `MigrationConfig` is the run policy. Every field has a default. It is validated once,
//!   before any socket opens, and never mutated afterwards.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Deserializer};
use tracing::info;

use crate::common::WriteMode;
use crate::error::MigrationError;
use crate::retry::RetryConfig;

pub use crate::backends::elasticsearch::{
    ClusterEndpoint, ElasticsearchSinkConfig, ElasticsearchSourceConfig,
};
pub use crate::backends::file::{FileSinkConfig, FileSourceConfig, InputType};
pub use crate::backends::logstash::LogstashSinkConfig;

/// 📦 One struct to rule them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🚰 Where documents come from.
    pub source_config: SourceConfig,
    /// 🕳️ Where documents go.
    pub sink_config: SinkConfig,
    /// 🎛️ How the trip is run.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// 🚰 Source selection. Pick one.
#[derive(Debug, Deserialize, Clone)]
pub enum SourceConfig {
    Elasticsearch(ElasticsearchSourceConfig),
    File(FileSourceConfig),
}

/// 🕳️ Sink selection. Also pick one.
#[derive(Debug, Deserialize, Clone)]
pub enum SinkConfig {
    Elasticsearch(ElasticsearchSinkConfig),
    File(FileSinkConfig),
    Logstash(LogstashSinkConfig),
}

/// 🔄 Backoff knobs for transport retries, in config-friendly units.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            ..RetryConfig::default()
        }
    }
}

/// 🎛️ The run policy. Built once, validated once, read by everyone, written by nobody.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MigrationConfig {
    /// 🔍 `query_string` syntax, or raw query DSL when it starts with `{`.
    pub query: Option<String>,
    /// 📃 Documents per scroll page.
    pub doc_buffer_count: usize,
    /// 🧵 Bulk worker count.
    pub workers: usize,
    /// 📦 Bulk request byte ceiling, in MiB.
    pub bulk_size_mb: usize,
    /// 🔢 Bulk request doc ceiling. Defaults to `doc_buffer_count`.
    pub bulk_max_docs: Option<usize>,
    /// ⏳ Scroll keep-alive, renewed on every page.
    pub scroll_time: String,
    /// 🍕 Parallel scroll slices.
    pub slices: u32,
    /// 📐 Queue capacity = doc_buffer_count × slices × this.
    pub queue_capacity_factor: usize,
    /// ✂️ Field allow-list. Empty keeps everything.
    #[serde(deserialize_with = "list_or_csv")]
    pub fields: Vec<String>,
    /// 🏷️ Old name → new name. `_type` renames the mapping type itself.
    #[serde(deserialize_with = "map_or_pairs")]
    pub rename: Vec<(String, String)>,
    pub type_override: Option<String>,
    pub drop_routing: bool,
    pub regenerate_id: bool,
    /// 🪞 Emit each document this many times. Needs `regenerate_id` above 1.
    pub repeat_times: usize,
    pub write_mode: WriteMode,
    pub recreate_index: bool,
    /// 🙈 Also migrate indices starting with `.` or `_`.
    pub copy_all_indexes: bool,
    pub copy_settings: bool,
    pub copy_mappings: bool,
    /// 🧱 Primary shard override for created target indices.
    pub shards: Option<u32>,
    pub wait_for_green: bool,
    pub refresh: bool,
    /// 🔁 Per-document ceiling for transient (throttled) re-submissions.
    pub max_document_retries: u32,
    pub retry: RetrySettings,
    pub probe_timeout_secs: u64,
    pub green_timeout_secs: u64,
    pub bulk_timeout_secs: u64,
    pub show_progress: bool,
    /// 🧾 Cap on itemized failures kept for the summary.
    pub max_reported_failures: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            query: None,
            doc_buffer_count: 10_000,
            workers: 1,
            bulk_size_mb: 5,
            bulk_max_docs: None,
            scroll_time: "1m".to_string(),
            slices: 1,
            queue_capacity_factor: 2,
            fields: Vec::new(),
            rename: Vec::new(),
            type_override: None,
            drop_routing: false,
            regenerate_id: false,
            repeat_times: 1,
            write_mode: WriteMode::Create,
            recreate_index: false,
            copy_all_indexes: false,
            copy_settings: false,
            copy_mappings: false,
            shards: None,
            wait_for_green: false,
            refresh: false,
            max_document_retries: 3,
            retry: RetrySettings::default(),
            probe_timeout_secs: 30,
            green_timeout_secs: 300,
            bulk_timeout_secs: 120,
            show_progress: true,
            max_reported_failures: 1_000,
        }
    }
}

impl MigrationConfig {
    pub fn bulk_max_bytes(&self) -> usize {
        self.bulk_size_mb * 1024 * 1024
    }

    pub fn bulk_max_docs(&self) -> usize {
        self.bulk_max_docs.unwrap_or(self.doc_buffer_count)
    }

    pub fn queue_capacity(&self) -> usize {
        self.doc_buffer_count * self.slices as usize * self.queue_capacity_factor
    }

    /// 🚨 Reject nonsense before a single packet leaves the building.
    pub fn validate(
        &self,
        source: &SourceConfig,
        sink: &SinkConfig,
    ) -> Result<(), MigrationError> {
        let zeroes = [
            ("doc_buffer_count", self.doc_buffer_count),
            ("workers", self.workers),
            ("bulk_size_mb", self.bulk_size_mb),
            ("bulk_max_docs", self.bulk_max_docs()),
            ("slices", self.slices as usize),
            ("queue_capacity_factor", self.queue_capacity_factor),
            ("repeat_times", self.repeat_times),
        ];
        if let Some((name, _)) = zeroes.iter().find(|(_, value)| *value == 0) {
            return Err(MigrationError::Config(format!("{name} must be at least 1")));
        }
        if self.shards == Some(0) {
            return Err(MigrationError::Config("shards must be at least 1".into()));
        }
        if self.repeat_times > 1 && !self.regenerate_id {
            return Err(MigrationError::Config(format!(
                "repeat_times = {} would write {} copies under the same id; enable regenerate_id",
                self.repeat_times, self.repeat_times
            )));
        }
        parse_keep_alive(&self.scroll_time)?;
        if let Some(query) = &self.query {
            crate::backends::elasticsearch::build_query(query)?;
        }

        let cluster_source = matches!(source, SourceConfig::Elasticsearch(_));
        let cluster_sink = matches!(sink, SinkConfig::Elasticsearch(_));
        if (self.copy_settings || self.copy_mappings) && !(cluster_source && cluster_sink) {
            return Err(MigrationError::Config(
                "copy_settings / copy_mappings need a cluster on both ends".into(),
            ));
        }
        if self.recreate_index && !cluster_sink {
            return Err(MigrationError::Config(
                "recreate_index needs an Elasticsearch sink".into(),
            ));
        }
        if let SourceConfig::File(file) = source {
            let sink_index = match sink {
                SinkConfig::Elasticsearch(es) => es.index.as_ref(),
                _ => None,
            };
            if file.input_type != InputType::Dump && file.index.is_none() && sink_index.is_none() {
                return Err(MigrationError::Config(format!(
                    "input_type {:?} carries no index; set source_config.File.index or a sink index",
                    file.input_type
                )));
            }
        }
        if let SinkConfig::Logstash(logstash) = sink {
            if logstash.secured {
                return Err(MigrationError::Config(
                    "secured Logstash endpoints are not supported; use a plain TCP input".into(),
                ));
            }
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), MigrationError> {
        self.migration.validate(&self.source_config, &self.sink_config)
    }
}

/// ⏳ Parse the server-style duration notation: `500ms`, `30s`, `1m`, `2h`, `1d`.
pub fn parse_keep_alive(raw: &str) -> Result<Duration, MigrationError> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| MigrationError::Config(format!("keep-alive '{raw}' has no unit")))?;
    let (digits, unit) = raw.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| MigrationError::Config(format!("keep-alive '{raw}' has no amount")))?;
    let seconds_per_unit = match unit {
        "ms" => None,
        "s" => Some(1),
        "m" => Some(60),
        "h" => Some(3_600),
        "d" => Some(86_400),
        other => {
            return Err(MigrationError::Config(format!(
                "keep-alive '{raw}' has unknown unit '{other}'"
            )));
        }
    };
    let duration = match seconds_per_unit {
        None => Duration::from_millis(amount),
        Some(factor) => amount
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| MigrationError::Config(format!("keep-alive '{raw}' is too long")))?,
    };
    if duration.is_zero() {
        return Err(MigrationError::Config(format!("keep-alive '{raw}' is zero")));
    }
    Ok(duration)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrCsv {
    List(Vec<String>),
    Csv(String),
}

fn list_or_csv<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let raw = match ListOrCsv::deserialize(deserializer)? {
        ListOrCsv::List(items) => items,
        ListOrCsv::Csv(csv) => csv.split(',').map(str::to_string).collect(),
    };
    Ok(raw
        .into_iter()
        .map(|field| field.trim().to_string())
        .filter(|field| !field.is_empty())
        .collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MapOrPairs {
    Map(BTreeMap<String, String>),
    Pairs(String),
}

fn map_or_pairs<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<(String, String)>, D::Error> {
    match MapOrPairs::deserialize(deserializer)? {
        MapOrPairs::Map(map) => Ok(map.into_iter().collect()),
        MapOrPairs::Pairs(pairs) => pairs
            .split(',')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once(':') {
                Some((old, new)) if !old.trim().is_empty() && !new.trim().is_empty() => {
                    Ok((old.trim().to_string(), new.trim().to_string()))
                }
                _ => Err(serde::de::Error::custom(format!(
                    "rename entry '{pair}' is not old:new"
                ))),
            })
            .collect(),
    }
}

/// 🚀 Load the config: from a file, from env vars, or from the sheer power of hoping.
///
/// 📐 `None` → env vars only. `Some(path)` → env vars + TOML, TOML wins on conflicts.
/// Validation is a separate step so callers can decide when to fail.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("ESM_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (ESM_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (ESM_*). \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };

    config.extract().context(context_msg)
}
