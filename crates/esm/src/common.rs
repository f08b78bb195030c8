//! 📦 Common data structures: the luggage that travels from cluster A to cluster B.
//!
//! 🎬 *[INT. BAGGAGE CLAIM: 3:47 AM]*
//! A `Document` rolls out onto the carousel. It knows its index. It might know its id.
//! It has a routing tag, maybe. It has a source map stuffed full of fields it swears
//! were all under the 50 lb limit. Nobody checks. Except the `BulkBatch`. The `BulkBatch`
//! always checks. 🦆
//!
//! Everything in here is plain data: no I/O, no async, no opinions about networks.

use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};

/// 📄 One document, in flight.
///
/// Identity on the target is `(index, doc_type, id)` after transformation.
/// Owned by exactly one stage at a time; the queue hands it off, never shares it.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// 📦 Index this document belongs to (source index on read, target index after transform).
    pub index: String,
    /// 🏷️ Mapping type. Only meaningful on clusters older than 7.
    pub doc_type: Option<String>,
    /// 🆔 `None` lets the target assign one. Regeneration fills this with a uuid.
    pub id: Option<String>,
    /// 🧭 Shard routing key, passed through unless explicitly dropped.
    pub routing: Option<String>,
    /// 🧾 The `_source` body.
    pub source: Map<String, Value>,
    // -- 🔄 how many times this exact document has been bounced back for a retry
    pub(crate) attempts: u32,
}

impl Document {
    pub fn new(index: impl Into<String>, source: Map<String, Value>) -> Self {
        Self {
            index: index.into(),
            doc_type: None,
            id: None,
            routing: None,
            source,
            attempts: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }

    /// 🏷️ `index/id` for logs and the failure ledger. Missing ids show as `<auto>`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.index, self.id.as_deref().unwrap_or("<auto>"))
    }
}

/// 🧭 Per-slice scroll bookkeeping. Owned by exactly one cursor.
///
/// `scroll_id` is replaced on every page; `total_hits` is pinned at the first page and
/// never goes down; an empty page ends the slice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrollState {
    pub scroll_id: Option<String>,
    pub slice_id: Option<u32>,
    pub slice_max: Option<u32>,
    pub total_hits: u64,
    pub returned_count: u64,
}

impl ScrollState {
    pub fn for_slice(slice: Option<(u32, u32)>) -> Self {
        Self {
            slice_id: slice.map(|(id, _)| id),
            slice_max: slice.map(|(_, max)| max),
            ..Self::default()
        }
    }

    /// 📏 Absorb a freshly decoded page. The first page pins `total_hits`.
    pub fn advance(&mut self, page: &ScrollPage) {
        if self.scroll_id.is_none() && self.returned_count == 0 {
            self.total_hits = page.total_hits;
        } else {
            self.total_hits = self.total_hits.max(page.total_hits);
        }
        if page.scroll_id.is_some() {
            self.scroll_id = page.scroll_id.clone();
        }
        self.returned_count += page.documents.len() as u64;
    }
}

/// 📡 Everything needed to open a scroll on one slice.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollRequest {
    /// 📦 Comma-separated index names or patterns.
    pub indices: String,
    /// 🔍 Query DSL body for the `query` key. `None` means match everything.
    pub query: Option<Value>,
    /// ⏳ Keep-alive in the server's own notation, e.g. `1m`.
    pub keep_alive: String,
    pub size: usize,
    /// 🍕 `(slice_id, slice_max)` when the read is partitioned.
    pub slice: Option<(u32, u32)>,
}

/// 📃 One decoded page of a scroll, already in the uniform shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrollPage {
    pub scroll_id: Option<String>,
    pub total_hits: u64,
    pub documents: Vec<Document>,
}

/// ✍️ Which bulk action to emit. `create` turns id collisions into version conflicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Create,
    Index,
}

impl WriteMode {
    pub fn action(self) -> &'static str {
        match self {
            WriteMode::Create => "create",
            WriteMode::Index => "index",
        }
    }
}

/// 🔢 What the version probe told us about a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterVersionInfo {
    pub number: String,
    pub major: u32,
}

impl ClusterVersionInfo {
    /// 🔍 Parse `"6.8.23"`, `"7.17.0"`, `"8.11.1-SNAPSHOT"` and friends.
    pub fn parse(number: &str) -> Option<Self> {
        let major = number.split('.').next()?.trim().parse().ok()?;
        Some(Self {
            number: number.to_string(),
            major,
        })
    }

    /// 🏷️ Pre-7 clusters still speak in mapping types.
    pub fn uses_types(&self) -> bool {
        self.major < 7
    }

    /// 🧭 The bulk metadata key for routing changed its name at 6.
    pub fn routing_key(&self) -> &'static str {
        if self.major >= 6 { "routing" } else { "_routing" }
    }

    /// 🍕 Sliced scroll arrived in 5.
    pub fn supports_slices(&self) -> bool {
        self.major >= 5
    }
}

impl fmt::Display for ClusterVersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number)
    }
}

/// 🚦 Cluster health colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Green,
    Yellow,
    Red,
}

impl HealthStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "green" => Some(HealthStatus::Green),
            "yellow" => Some(HealthStatus::Yellow),
            "red" => Some(HealthStatus::Red),
            _ => None,
        }
    }
}

/// 📦 A document plus its already-encoded wire form.
#[derive(Debug, Clone)]
pub struct BulkEntry {
    pub document: Document,
    pub encoded: String,
}

/// 🧺 The atomic unit submitted to a sink in one call.
///
/// Bounded by a count limit AND a cumulative byte limit on the encoded form.
/// `fits` is asked before every push, so `bytes <= max_bytes` always holds.
#[derive(Debug, Clone)]
pub struct BulkBatch {
    entries: Vec<BulkEntry>,
    bytes: usize,
    max_docs: usize,
    max_bytes: usize,
}

impl BulkBatch {
    pub fn new(max_docs: usize, max_bytes: usize) -> Self {
        Self {
            entries: Vec::new(),
            bytes: 0,
            max_docs: max_docs.max(1),
            max_bytes,
        }
    }

    /// 🚪 Would an entry of `encoded_len` bytes squeeze in without busting either limit?
    pub fn fits(&self, encoded_len: usize) -> bool {
        self.entries.len() < self.max_docs && self.bytes + encoded_len <= self.max_bytes
    }

    /// 📏 Could an entry of this size ever fit, even in an empty batch?
    pub fn admits(&self, encoded_len: usize) -> bool {
        encoded_len <= self.max_bytes
    }

    pub fn push(&mut self, entry: BulkEntry) {
        self.bytes += entry.encoded.len();
        self.entries.push(entry);
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_docs
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn entries(&self) -> &[BulkEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<BulkEntry> {
        self.entries
    }

    /// 🧵 The request body: every encoded entry, back to back.
    pub fn render(&self) -> String {
        let mut body = String::with_capacity(self.bytes);
        for entry in &self.entries {
            body.push_str(&entry.encoded);
        }
        body
    }

    /// 🫗 Empty the batch, keeping its limits. Hands back what was in it.
    pub fn take(&mut self) -> BulkBatch {
        let fresh = BulkBatch::new(self.max_docs, self.max_bytes);
        std::mem::replace(self, fresh)
    }
}

/// 🧾 Structured cause attached to a failed bulk item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemError {
    pub kind: String,
    pub reason: String,
}

/// 📬 One per document in a submitted batch, in the same order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemResult {
    pub index: String,
    pub doc_type: Option<String>,
    pub id: Option<String>,
    pub status: u16,
    pub error: Option<BulkItemError>,
}

impl BulkItemResult {
    /// ✅ Shorthand for sinks without per-item feedback (files, sockets).
    pub fn accepted(document: &Document) -> Self {
        Self {
            index: document.index.clone(),
            doc_type: document.doc_type.clone(),
            id: document.id.clone(),
            status: 201,
            error: None,
        }
    }
}
