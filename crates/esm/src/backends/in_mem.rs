//! # Previously, on the migration...
//!
//! 🎬 The data was trapped. Stranded between two clusters like a traveler stuck in a
//! connecting airport with no WiFi. Someone had to stand in for the clusters during
//! tests. Someone had to live entirely in RAM, gone the moment you blink.
//!
//! That someone is `InMemoryCluster`: a `ClusterApi` that keeps indices in a map,
//! hands out rotating scroll ids, answers `_bulk` item by item, and can be told to
//! misbehave on cue (flaky scrolls, expiring contexts, throttled or rejected docs,
//! bulk calls that write and then pretend they didn't).
//!
//! ⚠️ This is NOT for production. If you're deploying this to prod, please also
//! deploy a therapist.
//!
//! 🧠 Clones share state. Hand one clone to the pipeline, keep the other to assert on.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::trace;

use super::ClusterApi;
use crate::common::{
    BulkBatch, BulkItemError, BulkItemResult, ClusterVersionInfo, Document, HealthStatus,
    ScrollPage, ScrollRequest, WriteMode,
};
use crate::error::MigrationError;

/// 🧪 A pocket-sized cluster for tests and dry runs.
#[derive(Debug, Clone)]
pub struct InMemoryCluster {
    version: String,
    state: Arc<Mutex<ClusterState>>,
}

#[derive(Debug, Default)]
struct StoredIndex {
    // -- 🔑 (type, id). Typeless clusters file everything under "_doc".
    docs: BTreeMap<(String, String), Document>,
    settings: Value,
    mappings: Value,
}

#[derive(Debug)]
struct ScrollContext {
    snapshot: Vec<Document>,
    position: usize,
    size: usize,
    total: u64,
    next_calls_served: usize,
    slice: Option<u32>,
}

#[derive(Debug, Default)]
struct Faults {
    failing_scroll_calls: u32,
    failing_bulk_calls: u32,
    lost_bulk_responses: u32,
    expire_after: Option<usize>,
    expiring_slices: HashMap<u32, usize>,
    rejected_ids: HashSet<String>,
    throttled_ids: HashMap<String, u32>,
    stalled_index_admin: bool,
}

#[derive(Debug)]
struct ClusterState {
    indices: BTreeMap<String, StoredIndex>,
    scrolls: HashMap<String, ScrollContext>,
    scroll_counter: u64,
    health: HealthStatus,
    faults: Faults,
    bulk_calls: usize,
    largest_bulk_bytes: usize,
    refreshed: Vec<String>,
}

impl Default for ClusterState {
    fn default() -> Self {
        Self {
            indices: BTreeMap::new(),
            scrolls: HashMap::new(),
            scroll_counter: 0,
            health: HealthStatus::Green,
            faults: Faults::default(),
            bulk_calls: 0,
            largest_bulk_bytes: 0,
            refreshed: Vec::new(),
        }
    }
}

// -- 🃏 `*` is the only wildcard anyone actually uses
fn glob_matches(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,
        Some((prefix, rest)) => {
            if !name.starts_with(prefix) {
                return false;
            }
            let tail = &name[prefix.len()..];
            if rest.is_empty() {
                return true;
            }
            (0..=tail.len())
                .filter(|&at| tail.is_char_boundary(at))
                .any(|at| glob_matches(rest, &tail[at..]))
        }
    }
}

fn transport_hiccup(what: &str) -> MigrationError {
    MigrationError::Transport(format!("🧪 in-memory {what} was told to fail"))
}

fn missing_index(index: &str) -> MigrationError {
    MigrationError::from_status(404, &format!("index_not_found_exception [{index}]"), "index lookup")
}

impl InMemoryCluster {
    /// 🚀 An empty cluster that claims to run `version`.
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            state: Arc::new(Mutex::new(ClusterState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        // -- 🧯 a panicking test thread shouldn't take the whole fake cluster down with it
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn major(&self) -> u32 {
        ClusterVersionInfo::parse(&self.version)
            .map(|v| v.major)
            .unwrap_or(7)
    }

    fn key_for(&self, document: &Document, id: &str) -> (String, String) {
        let doc_type = if self.major() >= 7 {
            "_doc".to_string()
        } else {
            document.doc_type.clone().unwrap_or_else(|| "_doc".to_string())
        };
        (doc_type, id.to_string())
    }

    /// 🌱 Put documents straight into an index, no bulk ceremony. Same ids overwrite.
    pub fn seed(&self, index: &str, documents: impl IntoIterator<Item = Document>) {
        let keyed: Vec<_> = documents
            .into_iter()
            .map(|mut document| {
                document.index = index.to_string();
                let id = document
                    .id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                document.id = Some(id.clone());
                (self.key_for(&document, &id), document)
            })
            .collect();
        let mut state = self.state();
        let stored = state.indices.entry(index.to_string()).or_default();
        stored.docs.extend(keyed);
    }

    /// 🏗️ Create (or replace) an index's settings and mappings without documents.
    pub fn seed_index(&self, index: &str, settings: Value, mappings: Value) {
        let mut state = self.state();
        let stored = state.indices.entry(index.to_string()).or_default();
        stored.settings = settings;
        stored.mappings = mappings;
    }

    pub fn count(&self, index: &str) -> usize {
        self.state()
            .indices
            .get(index)
            .map(|stored| stored.docs.len())
            .unwrap_or(0)
    }

    pub fn documents(&self, index: &str) -> Vec<Document> {
        self.state()
            .indices
            .get(index)
            .map(|stored| stored.docs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.state().indices.keys().cloned().collect()
    }

    /// 🔧 The stored `(settings, mappings)` pair, if the index exists.
    pub fn index_body(&self, index: &str) -> Option<(Value, Value)> {
        self.state()
            .indices
            .get(index)
            .map(|stored| (stored.settings.clone(), stored.mappings.clone()))
    }

    pub fn set_health(&self, health: HealthStatus) {
        self.state().health = health;
    }

    /// 💥 The next `n` scroll open/next calls fail with a transport error.
    pub fn fail_next_scroll_calls(&self, n: u32) {
        self.state().faults.failing_scroll_calls = n;
    }

    /// 💥 The next `n` bulk calls fail before writing anything.
    pub fn fail_next_bulk_calls(&self, n: u32) {
        self.state().faults.failing_bulk_calls = n;
    }

    /// 👻 The next `n` bulk calls write everything and then lose the response.
    pub fn lose_next_bulk_responses(&self, n: u32) {
        self.state().faults.lost_bulk_responses = n;
    }

    /// ⏳ Each scroll context serves `n` follow-up pages, then reports itself expired.
    pub fn expire_scrolls_after(&self, n: usize) {
        self.state().faults.expire_after = Some(n);
    }

    /// 🔪 Like `expire_scrolls_after`, but only for scrolls opened on slice `slice_id`.
    pub fn expire_slice_after(&self, slice_id: u32, n: usize) {
        self.state().faults.expiring_slices.insert(slice_id, n);
    }

    /// 🚫 Documents with these ids are refused with a mapping error, every time.
    pub fn reject_ids<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state()
            .faults
            .rejected_ids
            .extend(ids.into_iter().map(Into::into));
    }

    /// 🐢 Documents with these ids are throttled `times` times before they're let in.
    pub fn throttle_ids<I, S>(&self, ids: I, times: u32)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state();
        for id in ids {
            state.faults.throttled_ids.insert(id.into(), times);
        }
    }

    /// 🧊 Index admin calls (exists, create, delete, settings, mappings) never answer.
    pub fn stall_index_admin(&self) {
        self.state().faults.stalled_index_admin = true;
    }

    async fn answer_index_admin(&self) {
        let stalled = self.state().faults.stalled_index_admin;
        if stalled {
            std::future::pending::<()>().await;
        }
    }

    pub fn open_scroll_contexts(&self) -> usize {
        self.state().scrolls.len()
    }

    pub fn bulk_calls(&self) -> usize {
        self.state().bulk_calls
    }

    pub fn largest_bulk_bytes(&self) -> usize {
        self.state().largest_bulk_bytes
    }

    pub fn refreshed(&self) -> Vec<String> {
        self.state().refreshed.clone()
    }

    fn matching_indices(state: &ClusterState, pattern: &str) -> Vec<String> {
        let mut names: Vec<String> = match pattern.trim() {
            "" | "_all" | "*" => state.indices.keys().cloned().collect(),
            pattern => pattern
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .flat_map(|part| {
                    state
                        .indices
                        .keys()
                        .filter(move |name| glob_matches(part, name))
                        .cloned()
                })
                .collect(),
        };
        names.sort();
        names.dedup();
        names
    }

    fn next_scroll_id(state: &mut ClusterState) -> String {
        state.scroll_counter += 1;
        format!("mem-scroll-{}", state.scroll_counter)
    }

    // -- 📃 serve one page from a context, then re-file it under a fresh id
    fn serve_page(state: &mut ClusterState, mut context: ScrollContext) -> ScrollPage {
        let end = (context.position + context.size).min(context.snapshot.len());
        let documents = context.snapshot[context.position..end].to_vec();
        context.position = end;
        let total_hits = context.total;
        let scroll_id = Self::next_scroll_id(state);
        state.scrolls.insert(scroll_id.clone(), context);
        ScrollPage {
            scroll_id: Some(scroll_id),
            total_hits,
            documents,
        }
    }

    fn write_one(
        &self,
        state: &mut ClusterState,
        document: &Document,
        mode: WriteMode,
    ) -> BulkItemResult {
        let id = document
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let key = self.key_for(document, &id);
        let mut result = BulkItemResult {
            index: document.index.clone(),
            doc_type: (self.major() < 7).then(|| key.0.clone()),
            id: Some(id.clone()),
            status: 201,
            error: None,
        };

        if state.faults.rejected_ids.contains(&id) {
            result.status = 400;
            result.error = Some(BulkItemError {
                kind: "mapper_parsing_exception".to_string(),
                reason: format!("failed to parse document [{id}]"),
            });
            return result;
        }
        if let Some(remaining) = state.faults.throttled_ids.get_mut(&id) {
            if *remaining > 0 {
                *remaining -= 1;
                result.status = 429;
                result.error = Some(BulkItemError {
                    kind: "es_rejected_execution_exception".to_string(),
                    reason: "rejected execution: bulk queue is full".to_string(),
                });
                return result;
            }
        }

        let stored = state.indices.entry(document.index.clone()).or_default();
        let exists = stored.docs.contains_key(&key);
        if exists && mode == WriteMode::Create {
            result.status = 409;
            result.error = Some(BulkItemError {
                kind: "version_conflict_engine_exception".to_string(),
                reason: format!("[{}][{id}]: version conflict, document already exists", key.0),
            });
            return result;
        }

        let mut stored_doc = document.clone();
        stored_doc.id = Some(id);
        stored_doc.doc_type = result.doc_type.clone();
        stored_doc.attempts = 0;
        stored.docs.insert(key, stored_doc);
        if exists {
            result.status = 200;
        }
        result
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn probe_version(&self) -> Result<ClusterVersionInfo, MigrationError> {
        ClusterVersionInfo::parse(&self.version).ok_or_else(|| {
            MigrationError::Protocol(format!(
                "version '{}' doesn't look like a version",
                self.version
            ))
        })
    }

    async fn cluster_health(&self) -> Result<HealthStatus, MigrationError> {
        Ok(self.state().health)
    }

    async fn resolve_indices(&self, pattern: &str) -> Result<Vec<String>, MigrationError> {
        Ok(Self::matching_indices(&self.state(), pattern))
    }

    async fn open_scroll(&self, request: &ScrollRequest) -> Result<ScrollPage, MigrationError> {
        let mut state = self.state();
        if state.faults.failing_scroll_calls > 0 {
            state.faults.failing_scroll_calls -= 1;
            return Err(transport_hiccup("scroll open"));
        }

        let names = Self::matching_indices(&state, &request.indices);
        // 🔍 queries are not evaluated here; every document matches
        let snapshot: Vec<Document> = names
            .iter()
            .filter_map(|name| state.indices.get(name))
            .flat_map(|stored| stored.docs.values().cloned())
            .enumerate()
            .filter(|(position, _)| match request.slice {
                Some((id, max)) => *position as u64 % u64::from(max) == u64::from(id),
                None => true,
            })
            .map(|(_, document)| document)
            .collect();

        let context = ScrollContext {
            total: snapshot.len() as u64,
            snapshot,
            position: 0,
            size: request.size.max(1),
            next_calls_served: 0,
            slice: request.slice.map(|(id, _)| id),
        };
        trace!("🧪 scroll opened over {} index(es)", names.len());
        Ok(Self::serve_page(&mut state, context))
    }

    async fn next_scroll(
        &self,
        scroll_id: &str,
        _keep_alive: &str,
    ) -> Result<ScrollPage, MigrationError> {
        let mut state = self.state();
        if state.faults.failing_scroll_calls > 0 {
            state.faults.failing_scroll_calls -= 1;
            return Err(transport_hiccup("scroll next"));
        }

        let expired = || {
            MigrationError::from_status(
                404,
                &format!("search_context_missing_exception: No search context found for id [{scroll_id}]"),
                "scroll next",
            )
        };
        let mut context = state.scrolls.remove(scroll_id).ok_or_else(expired)?;
        let slice_limit = context
            .slice
            .and_then(|id| state.faults.expiring_slices.get(&id).copied());
        if let Some(limit) = state.faults.expire_after.or(slice_limit) {
            if context.next_calls_served >= limit {
                return Err(expired());
            }
        }
        context.next_calls_served += 1;
        Ok(Self::serve_page(&mut state, context))
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), MigrationError> {
        self.state().scrolls.remove(scroll_id);
        Ok(())
    }

    async fn bulk_write(
        &self,
        batch: &BulkBatch,
        mode: WriteMode,
    ) -> Result<Vec<BulkItemResult>, MigrationError> {
        // -- 🎲 let the other workers get a word in, like a real network would
        tokio::task::yield_now().await;

        let mut state = self.state();
        state.bulk_calls += 1;
        state.largest_bulk_bytes = state.largest_bulk_bytes.max(batch.bytes());
        if state.faults.failing_bulk_calls > 0 {
            state.faults.failing_bulk_calls -= 1;
            return Err(transport_hiccup("bulk"));
        }

        let results: Vec<BulkItemResult> = batch
            .entries()
            .iter()
            .map(|entry| self.write_one(&mut state, &entry.document, mode))
            .collect();

        if state.faults.lost_bulk_responses > 0 {
            state.faults.lost_bulk_responses -= 1;
            return Err(transport_hiccup("bulk response"));
        }
        Ok(results)
    }

    async fn index_exists(&self, index: &str) -> Result<bool, MigrationError> {
        self.answer_index_admin().await;
        Ok(self.state().indices.contains_key(index))
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), MigrationError> {
        self.answer_index_admin().await;
        let mut state = self.state();
        if state.indices.contains_key(index) {
            return Err(MigrationError::from_status(
                400,
                &format!("resource_already_exists_exception: index [{index}] already exists"),
                "index create",
            ));
        }
        let section = |key: &str| {
            body.get(key)
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()))
        };
        state.indices.insert(
            index.to_string(),
            StoredIndex {
                docs: BTreeMap::new(),
                settings: section("settings"),
                mappings: section("mappings"),
            },
        );
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<(), MigrationError> {
        self.answer_index_admin().await;
        self.state().indices.remove(index);
        Ok(())
    }

    async fn get_settings(&self, index: &str) -> Result<Value, MigrationError> {
        self.answer_index_admin().await;
        let state = self.state();
        let stored = state.indices.get(index).ok_or_else(|| missing_index(index))?;
        Ok(match &stored.settings {
            Value::Null => json!({}),
            settings => settings.clone(),
        })
    }

    async fn get_mappings(&self, index: &str) -> Result<Value, MigrationError> {
        self.answer_index_admin().await;
        let state = self.state();
        let stored = state.indices.get(index).ok_or_else(|| missing_index(index))?;
        Ok(match &stored.mappings {
            Value::Null => json!({}),
            mappings => mappings.clone(),
        })
    }

    async fn refresh(&self, index: &str) -> Result<(), MigrationError> {
        self.state().refreshed.push(index.to_string());
        Ok(())
    }
}
