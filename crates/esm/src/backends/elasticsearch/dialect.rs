//! 🗣️ Wire dialects: the same scroll page, spoken two ways.
//!
//! - pre-7: `"hits": {"total": 25000, "hits": [...]}`
//! - 7+:    `"hits": {"total": {"value": 25000, "relation": "eq"}, "hits": [...]}`
//!
//! Picked once from the version probe. A body that doesn't match the chosen dialect
//! is a `Protocol` error, not a guess.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::common::{ClusterVersionInfo, Document, ScrollPage};
use crate::error::MigrationError;
use crate::transforms::dump::RawHit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WireDialect {
    PreSeven,
    SevenPlus,
}

#[derive(Deserialize)]
struct RawPage<Total> {
    #[serde(rename = "_scroll_id", default)]
    scroll_id: Option<String>,
    hits: RawHits<Total>,
}

#[derive(Deserialize)]
struct RawHits<Total> {
    total: Total,
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[derive(Deserialize)]
struct TotalObject {
    value: u64,
    relation: String,
}

impl TotalObject {
    // -- 📏 "gte" means the cluster stopped counting; the bar just grows past it later
    fn hits(self) -> u64 {
        if self.relation != "eq" {
            debug!("📏 hit count is a lower bound ({} {})", self.relation, self.value);
        }
        self.value
    }
}

impl WireDialect {
    pub(crate) fn for_version(version: &ClusterVersionInfo) -> Self {
        if version.major >= 7 {
            WireDialect::SevenPlus
        } else {
            WireDialect::PreSeven
        }
    }

    /// 📃 Decode a search or scroll response body into a uniform page.
    pub(crate) fn decode_page(self, body: &str) -> Result<ScrollPage, MigrationError> {
        match self {
            WireDialect::PreSeven => decode::<u64>(body, |total| total, self),
            WireDialect::SevenPlus => decode::<TotalObject>(body, TotalObject::hits, self),
        }
    }
}

fn decode<Total: DeserializeOwned>(
    body: &str,
    total_of: impl Fn(Total) -> u64,
    dialect: WireDialect,
) -> Result<ScrollPage, MigrationError> {
    let page: RawPage<Total> = serde_json::from_str(body).map_err(|err| {
        MigrationError::Protocol(format!(
            "scroll page doesn't match the {dialect:?} dialect: {err}"
        ))
    })?;
    Ok(ScrollPage {
        scroll_id: page.scroll_id,
        total_hits: total_of(page.hits.total),
        documents: page.hits.hits.into_iter().map(Document::from).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIX_PAGE: &str = r#"{
        "_scroll_id": "c2Nhbg",
        "took": 1,
        "hits": {"total": 2, "max_score": null, "hits": [
            {"_index": "twitter", "_type": "tweet", "_id": "1", "_source": {"user": "kimchy"}},
            {"_index": "twitter", "_type": "tweet", "_id": "2", "_routing": "x", "_source": {}}
        ]}
    }"#;

    const SEVEN_PAGE: &str = r#"{
        "_scroll_id": "FGluY2x1ZGU",
        "hits": {"total": {"value": 10000, "relation": "gte"}, "hits": []}
    }"#;

    #[test]
    fn the_one_where_the_old_dialect_counts_with_integers() -> anyhow::Result<()> {
        let page = WireDialect::PreSeven.decode_page(SIX_PAGE)?;
        assert_eq!(page.scroll_id.as_deref(), Some("c2Nhbg"));
        assert_eq!(page.total_hits, 2);
        assert_eq!(page.documents.len(), 2);
        assert_eq!(page.documents[0].doc_type.as_deref(), Some("tweet"));
        assert_eq!(page.documents[1].routing.as_deref(), Some("x"));
        Ok(())
    }

    #[test]
    fn the_one_where_the_new_dialect_counts_with_objects() -> anyhow::Result<()> {
        let page = WireDialect::SevenPlus.decode_page(SEVEN_PAGE)?;
        assert_eq!(page.total_hits, 10_000);
        assert!(page.documents.is_empty());
        Ok(())
    }

    #[test]
    fn the_one_where_the_wrong_dialect_is_a_protocol_error() {
        assert!(matches!(
            WireDialect::SevenPlus.decode_page(SIX_PAGE),
            Err(MigrationError::Protocol(_))
        ));
        assert!(matches!(
            WireDialect::PreSeven.decode_page(SEVEN_PAGE),
            Err(MigrationError::Protocol(_))
        ));
    }

    #[test]
    fn the_one_where_the_probe_picks_the_dialect() {
        let seven = ClusterVersionInfo::parse("7.0.0").map(|v| WireDialect::for_version(&v));
        let six = ClusterVersionInfo::parse("6.8.0").map(|v| WireDialect::for_version(&v));
        assert_eq!(seven, Some(WireDialect::SevenPlus));
        assert_eq!(six, Some(WireDialect::PreSeven));
    }
}
