//! 📡 The Elasticsearch backend: a version-tolerant HTTP client for clusters from 2.x to 8.x.
//!
//! 🧠 Knowledge graph:
//! - `ElasticsearchCluster` implements `ClusterApi` over `reqwest`.
//! - `dialect` decodes scroll pages; which decoder runs is pinned by the version probe.
//! - `ScrollCursor` (source side) and `ClusterSink` (sink side) drive any `ClusterBackend`.
//!
//! 🔒 Auth is basic auth or nothing. Proxies are honored per endpoint.
//! TLS is whatever reqwest's default stack gives us.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use flate2::{Compression, write::GzEncoder};
use reqwest::RequestBuilder;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, trace};

use super::ClusterApi;
use crate::common::{
    BulkBatch, BulkItemError, BulkItemResult, ClusterVersionInfo, HealthStatus, ScrollPage,
    ScrollRequest, WriteMode,
};
use crate::error::MigrationError;

mod dialect;
mod elasticsearch_sink;
mod elasticsearch_source;

pub(crate) use dialect::WireDialect;
pub(crate) use elasticsearch_sink::ClusterSink;
pub(crate) use elasticsearch_source::{ScrollCursor, build_query};

/// 📡 Where a cluster lives and how to get in.
#[derive(Debug, Deserialize, Clone)]
pub struct ClusterEndpoint {
    /// 📡 Scheme + host + port. Yes, all of it.
    pub url: String,
    /// 🔒 Basic auth user. Optional, like flossing.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 If this is in plaintext in your config file, I've already filed a complaint.
    #[serde(default)]
    pub password: Option<String>,
    /// 🕵️ HTTP proxy for this endpoint only.
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_indices() -> String {
    "_all".to_string()
}

/// 🚰 Read side: which cluster, which indices.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchSourceConfig {
    #[serde(flatten)]
    pub endpoint: ClusterEndpoint,
    /// 📦 Comma list or wildcard pattern. `_all` by default.
    #[serde(default = "default_indices")]
    pub indices: String,
}

/// 🕳️ Write side.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchSinkConfig {
    #[serde(flatten)]
    pub endpoint: ClusterEndpoint,
    /// 📦 Send every document to this one index instead of its source index.
    #[serde(default)]
    pub index: Option<String>,
    /// 🫁 gzip the `_bulk` bodies.
    #[serde(default)]
    pub compress: bool,
}

/// 🏛️ A live cluster over HTTP.
#[derive(Debug)]
pub struct ElasticsearchCluster {
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    compress: bool,
    version: OnceLock<ClusterVersionInfo>,
}

#[derive(Deserialize)]
struct RootInfo {
    version: RootVersion,
}

#[derive(Deserialize)]
struct RootVersion {
    number: String,
}

#[derive(Deserialize)]
struct HealthInfo {
    status: String,
}

#[derive(Deserialize)]
struct CatIndex {
    index: String,
}

#[derive(Deserialize)]
struct BulkResponse {
    items: Vec<std::collections::HashMap<String, RawBulkItem>>,
}

#[derive(Deserialize)]
struct RawBulkItem {
    #[serde(rename = "_index", default)]
    index: String,
    #[serde(rename = "_type", default)]
    doc_type: Option<String>,
    #[serde(rename = "_id", default)]
    id: Option<String>,
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

impl From<RawBulkItem> for BulkItemResult {
    fn from(raw: RawBulkItem) -> Self {
        Self {
            index: raw.index,
            doc_type: raw.doc_type,
            id: raw.id,
            status: raw.status,
            error: raw.error.map(item_error),
        }
    }
}

// -- 🧾 modern clusters send {type, reason}; ancient ones send a bare string
fn item_error(raw: Value) -> BulkItemError {
    match raw {
        Value::Object(fields) => BulkItemError {
            kind: fields
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            reason: fields
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        Value::String(reason) => {
            let kind = reason
                .split(['[', ':'])
                .next()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .unwrap_or("unknown")
                .to_string();
            BulkItemError { kind, reason }
        }
        other => BulkItemError {
            kind: "unknown".to_string(),
            reason: other.to_string(),
        },
    }
}

impl ElasticsearchCluster {
    /// 🚀 Build the HTTP client. No network traffic happens here.
    pub fn new(
        endpoint: &ClusterEndpoint,
        compress: bool,
        request_timeout: Duration,
    ) -> Result<Self, MigrationError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout);
        if let Some(proxy) = &endpoint.proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|err| {
                MigrationError::Config(format!("proxy '{proxy}' is not usable: {err}"))
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|err| {
            MigrationError::Config(format!(
                "💀 The HTTP client refused to be born. Probably the TLS stack: {err}"
            ))
        })?;
        Ok(Self {
            client,
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
            compress,
            version: OnceLock::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_ref()),
            None => request,
        }
    }

    fn with_json(request: RequestBuilder, body: &Value) -> Result<RequestBuilder, MigrationError> {
        Ok(request
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(body)?))
    }

    /// 📡 Send, read the whole body, and bin any non-2xx into the error taxonomy.
    async fn execute(&self, request: RequestBuilder, what: &str) -> Result<String, MigrationError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(MigrationError::from_status(status.as_u16(), &body, what));
        }
        trace!("📡 {what} → {status}, {} bytes", body.len());
        Ok(body)
    }

    async fn dialect(&self) -> Result<WireDialect, MigrationError> {
        let version = match self.version.get() {
            Some(version) => version.clone(),
            None => self.probe_version().await?,
        };
        Ok(WireDialect::for_version(&version))
    }

    fn gzip(body: &str) -> Result<Vec<u8>, MigrationError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(body.as_bytes())?;
        Ok(encoder.finish()?)
    }

    // -- 📦 `{"<index>": {"<key>": {...}}}` → the inner object
    fn unwrap_index_section(body: &str, index: &str, key: &str) -> Result<Value, MigrationError> {
        let parsed: Value = serde_json::from_str(body)?;
        parsed
            .get(index)
            .or_else(|| parsed.as_object().and_then(|all| all.values().next()))
            .and_then(|section| section.get(key))
            .cloned()
            .ok_or_else(|| {
                MigrationError::Protocol(format!("no '{key}' section for index '{index}'"))
            })
    }
}

#[async_trait]
impl ClusterApi for ElasticsearchCluster {
    async fn probe_version(&self) -> Result<ClusterVersionInfo, MigrationError> {
        let body = self.execute(self.client.get(self.url("/")), "version probe").await?;
        let root: RootInfo = serde_json::from_str(&body)?;
        let version = ClusterVersionInfo::parse(&root.version.number).ok_or_else(|| {
            MigrationError::Protocol(format!(
                "version '{}' doesn't look like a version",
                root.version.number
            ))
        })?;
        debug!("🔢 {} is running {}", self.base_url, version);
        let _ = self.version.set(version.clone());
        Ok(version)
    }

    async fn cluster_health(&self) -> Result<HealthStatus, MigrationError> {
        let body = self
            .execute(self.client.get(self.url("/_cluster/health")), "cluster health")
            .await?;
        let health: HealthInfo = serde_json::from_str(&body)?;
        HealthStatus::parse(&health.status).ok_or_else(|| {
            MigrationError::Protocol(format!("unknown health status '{}'", health.status))
        })
    }

    async fn resolve_indices(&self, pattern: &str) -> Result<Vec<String>, MigrationError> {
        let path = match pattern.trim() {
            "" | "_all" | "*" => "/_cat/indices?format=json&h=index".to_string(),
            pattern => format!("/_cat/indices/{pattern}?format=json&h=index"),
        };
        let body = self
            .execute(self.client.get(self.url(&path)), "index listing")
            .await?;
        let listed: Vec<CatIndex> = serde_json::from_str(&body)?;
        let mut names: Vec<String> = listed.into_iter().map(|entry| entry.index).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn open_scroll(&self, request: &ScrollRequest) -> Result<ScrollPage, MigrationError> {
        let dialect = self.dialect().await?;
        let mut body = json!({ "sort": ["_doc"] });
        if let Some(query) = &request.query {
            body["query"] = query.clone();
        }
        if let Some((id, max)) = request.slice {
            body["slice"] = json!({ "id": id, "max": max });
        }
        let path = format!(
            "/{}/_search?scroll={}&size={}",
            request.indices, request.keep_alive, request.size
        );
        let http = Self::with_json(self.client.post(self.url(&path)), &body)?;
        let raw = self.execute(http, "scroll open").await?;
        dialect.decode_page(&raw)
    }

    async fn next_scroll(
        &self,
        scroll_id: &str,
        keep_alive: &str,
    ) -> Result<ScrollPage, MigrationError> {
        let dialect = self.dialect().await?;
        let body = json!({ "scroll": keep_alive, "scroll_id": scroll_id });
        let http = Self::with_json(self.client.post(self.url("/_search/scroll")), &body)?;
        let raw = self.execute(http, "scroll next").await?;
        dialect.decode_page(&raw)
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), MigrationError> {
        let body = json!({ "scroll_id": [scroll_id] });
        let http = Self::with_json(self.client.delete(self.url("/_search/scroll")), &body)?;
        self.execute(http, "scroll clear").await.map(|_| ())
    }

    async fn bulk_write(
        &self,
        batch: &BulkBatch,
        _mode: WriteMode,
    ) -> Result<Vec<BulkItemResult>, MigrationError> {
        let payload = batch.render();
        debug!(
            "📡 Sending {} docs / {} bytes to /_bulk",
            batch.len(),
            payload.len()
        );
        // ⚠️ x-ndjson, not json. The x- prefix means "we made this up but we're committing to it."
        let mut http = self
            .client
            .post(self.url("/_bulk"))
            .header(CONTENT_TYPE, "application/x-ndjson");
        http = if self.compress {
            http.header(CONTENT_ENCODING, "gzip")
                .body(Self::gzip(&payload)?)
        } else {
            http.body(payload)
        };
        let raw = self.execute(http, "bulk").await?;
        let response: BulkResponse = serde_json::from_str(&raw)?;
        if response.items.len() != batch.len() {
            return Err(MigrationError::Protocol(format!(
                "bulk answered {} items for {} documents",
                response.items.len(),
                batch.len()
            )));
        }
        response
            .items
            .into_iter()
            .map(|mut item| {
                // -- 🏷️ each item is {"<action>": {...}}; the action name itself is noise
                let key = item.keys().next().cloned().unwrap_or_default();
                item.remove(&key)
                    .map(BulkItemResult::from)
                    .ok_or_else(|| MigrationError::Protocol("empty bulk item".to_string()))
            })
            .collect()
    }

    async fn index_exists(&self, index: &str) -> Result<bool, MigrationError> {
        let response = self
            .authorize(self.client.head(self.url(index)))
            .send()
            .await?;
        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            other => Err(MigrationError::from_status(other, "", "index exists")),
        }
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), MigrationError> {
        let http = Self::with_json(self.client.put(self.url(index)), body)?;
        self.execute(http, "index create").await.map(|_| ())
    }

    async fn delete_index(&self, index: &str) -> Result<(), MigrationError> {
        match self
            .execute(self.client.delete(self.url(index)), "index delete")
            .await
        {
            Ok(_) => Ok(()),
            Err(MigrationError::Protocol(msg)) if msg.contains("HTTP 404") => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn get_settings(&self, index: &str) -> Result<Value, MigrationError> {
        let path = format!("/{index}/_settings");
        let body = self
            .execute(self.client.get(self.url(&path)), "settings fetch")
            .await?;
        Self::unwrap_index_section(&body, index, "settings")
    }

    async fn get_mappings(&self, index: &str) -> Result<Value, MigrationError> {
        let path = format!("/{index}/_mapping");
        let body = self
            .execute(self.client.get(self.url(&path)), "mapping fetch")
            .await?;
        Self::unwrap_index_section(&body, index, "mappings")
    }

    async fn refresh(&self, index: &str) -> Result<(), MigrationError> {
        let path = format!("/{index}/_refresh");
        self.execute(self.client.post(self.url(&path)), "refresh")
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{BulkEntry, Document};
    use serde_json::Map;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cluster(server: &MockServer, compress: bool) -> anyhow::Result<ElasticsearchCluster> {
        let endpoint = ClusterEndpoint {
            url: server.uri(),
            username: Some("elastic".into()),
            password: Some("changeme".into()),
            proxy: None,
        };
        Ok(ElasticsearchCluster::new(&endpoint, compress, Duration::from_secs(5))?)
    }

    async fn mount_version(server: &MockServer, number: &str) {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"version": {"number": number}})),
            )
            .mount(server)
            .await;
    }

    fn batch_of(ids: &[&str]) -> BulkBatch {
        let mut batch = BulkBatch::new(100, 1 << 20);
        for id in ids {
            batch.push(BulkEntry {
                document: Document::new("idx", Map::new()).with_id(*id),
                encoded: format!("{{\"create\":{{\"_index\":\"idx\",\"_id\":\"{id}\"}}}}\n{{}}\n"),
            });
        }
        batch
    }

    #[tokio::test]
    async fn the_one_where_the_probe_learns_the_major_version() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_version(&server, "6.8.23").await;
        let version = cluster(&server, false)?.probe_version().await?;
        assert_eq!(version.major, 6);
        assert_eq!(version.number, "6.8.23");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_seven_scroll_speaks_in_objects() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_version(&server, "7.17.0").await;
        Mock::given(method("POST"))
            .and(path("/logs/_search"))
            .and(query_param("scroll", "1m"))
            .and(query_param("size", "2"))
            .and(body_partial_json(json!({"slice": {"id": 0, "max": 2}, "sort": ["_doc"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_scroll_id": "s-1",
                "hits": {
                    "total": {"value": 3, "relation": "eq"},
                    "hits": [
                        {"_index": "logs", "_type": "_doc", "_id": "1", "_source": {"a": 1}},
                        {"_index": "logs", "_id": "2", "_routing": "r", "_source": {"a": 2}}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let page = cluster(&server, false)?
            .open_scroll(&ScrollRequest {
                indices: "logs".into(),
                query: None,
                keep_alive: "1m".into(),
                size: 2,
                slice: Some((0, 2)),
            })
            .await?;
        assert_eq!(page.scroll_id.as_deref(), Some("s-1"));
        assert_eq!(page.total_hits, 3);
        assert_eq!(page.documents.len(), 2);
        assert_eq!(page.documents[1].routing.as_deref(), Some("r"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_expired_scroll_is_a_protocol_problem() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_version(&server, "5.6.0").await;
        Mock::given(method("POST"))
            .and(path("/_search/scroll"))
            .and(body_partial_json(json!({"scroll_id": "stale", "scroll": "1m"})))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"root_cause": [{"type": "search_context_missing_exception"}]},
                "status": 404
            })))
            .mount(&server)
            .await;

        let result = cluster(&server, false)?.next_scroll("stale", "1m").await;
        assert!(matches!(result, Err(MigrationError::Protocol(msg)) if msg.contains("expired")));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_bulk_items_come_back_in_order() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-type", "application/x-ndjson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "took": 3,
                "errors": true,
                "items": [
                    {"create": {"_index": "idx", "_type": "_doc", "_id": "1", "status": 201}},
                    {"create": {"_index": "idx", "_id": "2", "status": 409,
                        "error": {"type": "version_conflict_engine_exception", "reason": "exists"}}},
                    {"create": {"_index": "idx", "_id": "3", "status": 400,
                        "error": "MapperParsingException[failed to parse [age]]"}}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let items = cluster(&server, false)?
            .bulk_write(&batch_of(&["1", "2", "3"]), WriteMode::Create)
            .await?;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].status, 201);
        assert_eq!(items[0].error, None);
        assert_eq!(
            items[1].error.as_ref().map(|e| e.kind.as_str()),
            Some("version_conflict_engine_exception")
        );
        assert_eq!(
            items[2].error.as_ref().map(|e| e.kind.as_str()),
            Some("MapperParsingException")
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_compressed_bulk_announces_itself() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-encoding", "gzip"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": false,
                "items": [{"index": {"_index": "idx", "_id": "1", "status": 201}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let items = cluster(&server, true)?
            .bulk_write(&batch_of(&["1"]), WriteMode::Index)
            .await?;
        assert_eq!(items[0].status, 201);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_throttled_bulk_is_worth_retrying() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(429).set_body_string("too many requests"))
            .mount(&server)
            .await;

        let result = cluster(&server, false)?
            .bulk_write(&batch_of(&["1"]), WriteMode::Create)
            .await;
        assert!(matches!(result, Err(ref err) if err.is_retryable()));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_mismatched_item_count_is_not_trusted() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"errors": false, "items": []})),
            )
            .mount(&server)
            .await;

        let result = cluster(&server, false)?
            .bulk_write(&batch_of(&["1", "2"]), WriteMode::Create)
            .await;
        assert!(matches!(result, Err(MigrationError::Protocol(_))));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_index_plumbing_unwraps_the_envelopes() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/present"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/absent"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/present/_settings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "present": {"settings": {"index": {"number_of_shards": "3"}}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/present/_mapping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "present": {"mappings": {"properties": {"a": {"type": "keyword"}}}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/absent"))
            .respond_with(ResponseTemplate::new(404).set_body_string("index_not_found_exception"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_cat/indices/logs-*"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"index": "logs-b"}, {"index": "logs-a"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_cluster/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "yellow"})))
            .mount(&server)
            .await;

        let es = cluster(&server, false)?;
        assert!(es.index_exists("present").await?);
        assert!(!es.index_exists("absent").await?);
        assert_eq!(
            es.get_settings("present").await?,
            json!({"index": {"number_of_shards": "3"}})
        );
        assert_eq!(
            es.get_mappings("present").await?,
            json!({"properties": {"a": {"type": "keyword"}}})
        );
        es.delete_index("absent").await?;
        assert_eq!(es.resolve_indices("logs-*").await?, vec!["logs-a", "logs-b"]);
        assert_eq!(es.cluster_health().await?, HealthStatus::Yellow);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_nobody_is_home() -> anyhow::Result<()> {
        let endpoint = ClusterEndpoint {
            url: "http://127.0.0.1:1".into(),
            username: None,
            password: None,
            proxy: None,
        };
        let es = ElasticsearchCluster::new(&endpoint, false, Duration::from_secs(2))?;
        assert!(matches!(
            es.probe_version().await,
            Err(MigrationError::Transport(_))
        ));
        Ok(())
    }
}
