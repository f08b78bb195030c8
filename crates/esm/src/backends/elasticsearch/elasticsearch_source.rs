//! 🧭 ScrollCursor: one slice of a scroll, walked page by page until it runs dry.
//!
//! 🧠 Invariants this file lives by:
//! - the scroll id from the latest page is the one used for the next request
//! - the keep-alive is renewed on every request
//! - `total_hits` is pinned at the first page
//! - an empty page ends the slice, and the scroll context is cleared best-effort
//!
//! Transport hiccups retry the page with backoff. An expired context is a `Protocol`
//! error and ends this slice; sibling slices carry on with their own contexts.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::backends::{ClusterApi, ClusterBackend, Source};
use crate::common::{Document, ScrollRequest, ScrollState};
use crate::error::MigrationError;
use crate::retry::{RetryConfig, with_retry};

/// 🔍 A `query_string` query, or raw query DSL when it starts with `{`.
///
/// Raw DSL may be the bare query (`{"term": …}`) or wrapped (`{"query": {"term": …}}`).
pub(crate) fn build_query(raw: &str) -> Result<Value, MigrationError> {
    let raw = raw.trim();
    if raw.starts_with('{') {
        let parsed: Value = serde_json::from_str(raw)
            .map_err(|err| MigrationError::Config(format!("query is not valid JSON: {err}")))?;
        return Ok(match parsed.get("query") {
            Some(inner) => inner.clone(),
            None => parsed,
        });
    }
    Ok(json!({ "query_string": { "query": raw } }))
}

#[derive(Debug)]
pub(crate) struct ScrollCursor {
    cluster: Arc<ClusterBackend>,
    request: ScrollRequest,
    retry: RetryConfig,
    state: ScrollState,
    opened: bool,
    exhausted: bool,
}

impl ScrollCursor {
    pub(crate) fn new(cluster: Arc<ClusterBackend>, request: ScrollRequest, retry: RetryConfig) -> Self {
        let state = ScrollState::for_slice(request.slice);
        Self {
            cluster,
            request,
            retry,
            state,
            opened: false,
            exhausted: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &ScrollState {
        &self.state
    }

    fn label(&self) -> String {
        match (self.state.slice_id, self.state.slice_max) {
            (Some(id), Some(max)) => format!("slice {id}/{max}"),
            _ => "scroll".to_string(),
        }
    }

    async fn clear(&mut self) {
        if let Some(scroll_id) = self.state.scroll_id.take() {
            if let Err(err) = self.cluster.clear_scroll(&scroll_id).await {
                // -- 🧹 the context times out on its own anyway
                warn!("🧹 {}: could not clear scroll context: {err}", self.label());
            }
        }
    }
}

#[async_trait]
impl Source for ScrollCursor {
    async fn next_page(&mut self) -> Result<Option<Vec<Document>>, MigrationError> {
        if self.exhausted {
            return Ok(None);
        }

        let cluster = &self.cluster;
        let page = if !self.opened {
            let request = &self.request;
            with_retry(&self.retry, "scroll open", || cluster.open_scroll(request)).await?
        } else {
            let scroll_id = self.state.scroll_id.clone().ok_or_else(|| {
                MigrationError::Protocol("server never handed out a scroll id".to_string())
            })?;
            let keep_alive = &self.request.keep_alive;
            with_retry(&self.retry, "scroll next", || {
                cluster.next_scroll(&scroll_id, keep_alive)
            })
            .await?
        };

        if !self.opened {
            debug!(
                "🧭 {} opened: {} hits expected",
                self.label(),
                page.total_hits
            );
        }
        self.opened = true;
        self.state.advance(&page);

        if page.documents.is_empty() {
            debug!(
                "🏁 {} exhausted after {} documents",
                self.label(),
                self.state.returned_count
            );
            self.exhausted = true;
            self.clear().await;
            return Ok(None);
        }
        Ok(Some(page.documents))
    }

    fn total_hits(&self) -> Option<u64> {
        self.opened.then_some(self.state.total_hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryCluster;
    use serde_json::Map;
    use std::time::Duration;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            add_jitter: false,
            ..RetryConfig::default()
        }
    }

    fn seeded(count: usize) -> InMemoryCluster {
        let cluster = InMemoryCluster::new("7.10.2");
        cluster.seed(
            "src",
            (0..count).map(|n| Document::new("src", Map::new()).with_id(n.to_string())),
        );
        cluster
    }

    fn request(size: usize, slice: Option<(u32, u32)>) -> ScrollRequest {
        ScrollRequest {
            indices: "src".into(),
            query: None,
            keep_alive: "1m".into(),
            size,
            slice,
        }
    }

    async fn drain(cursor: &mut ScrollCursor) -> Result<Vec<Document>, MigrationError> {
        let mut all = Vec::new();
        while let Some(page) = cursor.next_page().await? {
            assert!(!page.is_empty());
            all.extend(page);
        }
        Ok(all)
    }

    #[test]
    fn the_one_where_queries_come_in_two_flavors() -> anyhow::Result<()> {
        assert_eq!(
            build_query("user:kimchy")?,
            json!({"query_string": {"query": "user:kimchy"}})
        );
        assert_eq!(
            build_query(r#"{"term": {"user": "kimchy"}}"#)?,
            json!({"term": {"user": "kimchy"}})
        );
        assert_eq!(
            build_query(r#"{"query": {"match_all": {}}}"#)?,
            json!({"match_all": {}})
        );
        assert!(matches!(build_query("{oops"), Err(MigrationError::Config(_))));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_pages_roll_until_the_empty_one() -> anyhow::Result<()> {
        let cluster = Arc::new(ClusterBackend::InMemory(seeded(25)));
        let mut cursor = ScrollCursor::new(cluster.clone(), request(10, None), fast_retry());
        assert_eq!(cursor.total_hits(), None);

        let docs = drain(&mut cursor).await?;
        assert_eq!(docs.len(), 25);
        assert_eq!(cursor.total_hits(), Some(25));
        assert_eq!(cursor.state().returned_count, 25);
        assert!(cursor.next_page().await?.is_none());
        if let ClusterBackend::InMemory(mem) = cluster.as_ref() {
            assert_eq!(mem.open_scroll_contexts(), 0);
        }
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_slices_split_the_work_without_overlap() -> anyhow::Result<()> {
        let cluster = Arc::new(ClusterBackend::InMemory(seeded(100)));
        let mut seen = std::collections::HashSet::new();
        let mut total = 0;
        for slice in 0..3 {
            let mut cursor =
                ScrollCursor::new(cluster.clone(), request(7, Some((slice, 3))), fast_retry());
            let docs = drain(&mut cursor).await?;
            total += docs.len();
            for doc in docs {
                assert!(seen.insert(doc.id), "💀 a document showed up in two slices");
            }
        }
        assert_eq!(total, 100);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_flaky_page_is_fetched_again() -> anyhow::Result<()> {
        let mem = seeded(12);
        mem.fail_next_scroll_calls(2);
        let cluster = Arc::new(ClusterBackend::InMemory(mem));
        let mut cursor = ScrollCursor::new(cluster, request(5, None), fast_retry());
        assert_eq!(drain(&mut cursor).await?.len(), 12);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_expired_context_ends_the_slice() -> anyhow::Result<()> {
        let mem = seeded(30);
        mem.expire_scrolls_after(1);
        let cluster = Arc::new(ClusterBackend::InMemory(mem));
        let mut cursor = ScrollCursor::new(cluster, request(10, None), fast_retry());

        assert_eq!(cursor.next_page().await?.map(|p| p.len()), Some(10));
        assert_eq!(cursor.next_page().await?.map(|p| p.len()), Some(10));
        assert!(matches!(
            cursor.next_page().await,
            Err(MigrationError::Protocol(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_empty_index_is_not_an_error() -> anyhow::Result<()> {
        let cluster = Arc::new(ClusterBackend::InMemory(seeded(0)));
        let mut cursor = ScrollCursor::new(cluster, request(10, None), fast_retry());
        assert!(cursor.next_page().await?.is_none());
        assert_eq!(cursor.total_hits(), Some(0));
        Ok(())
    }
}
