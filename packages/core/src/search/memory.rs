//! MemoryIndex - in-process SearchIndex
//!
//! Evaluates [`SearchQuery`] directly against documents held in memory,
//! following the same clause semantics as the Elasticsearch body builder:
//! fuzzy-or-substring text fields, prefix schema match, `>=` date range,
//! exact status/primary URL, tag terms with `AND`/`OR` and edit-distance
//! fuzziness, and a great-circle geo-distance filter.
//!
//! Scores are coarse (exact hits outrank fuzzy ones) but ordering is total:
//! score descending, then `primary_url`, then id.

use crate::db::DatabaseError;
use crate::models::NodeStatus;
use crate::search::index::{
    DeleteFilter, ExportResults, MapPoint, MapResults, SearchIndex, SearchResults,
};
use crate::search::pagination;
use crate::search::query::{ExportQuery, SearchQuery, MAP_SOURCE_FIELDS};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// In-memory search index keyed by node id
pub struct MemoryIndex {
    documents: RwLock<BTreeMap<String, Value>>,
    tags_fuzziness: String,
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new("AUTO")
    }
}

impl MemoryIndex {
    pub fn new(tags_fuzziness: impl Into<String>) -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            tags_fuzziness: tags_fuzziness.into(),
        }
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Snapshot of every stored document, by id
    pub async fn documents(&self) -> Vec<(String, Value)> {
        self.documents
            .read()
            .await
            .iter()
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect()
    }

    /// Score `doc` against `query`, `None` when it does not match
    fn score(&self, doc: &Value, query: &SearchQuery, map: bool) -> Result<Option<f64>, DatabaseError> {
        let mut score = 0.0;

        for (field, value) in [
            ("name", &query.name),
            ("locality", &query.locality),
            ("region", &query.region),
            ("country", &query.country),
        ] {
            if let Some(value) = value {
                match text_score(doc.get(field), value) {
                    Some(s) => score += s,
                    None => return Ok(None),
                }
            }
        }

        if let Some(schema) = &query.schema {
            if !schema_matches(doc, schema) {
                return Ok(None);
            }
            score += 1.0;
        }

        if let Some(since) = query.last_updated {
            match doc.get("last_updated").and_then(Value::as_i64) {
                Some(ts) if ts >= since => score += 1.0,
                _ => return Ok(None),
            }
        }

        for (field, value) in [("status", &query.status), ("primary_url", &query.primary_url)] {
            if let Some(value) = value {
                if doc.get(field).and_then(Value::as_str) != Some(value.as_str()) {
                    return Ok(None);
                }
                score += 1.0;
            }
        }

        if let Some(tags) = &query.tags {
            let max_edits = fuzziness_edits(query.tags_fuzziness(&self.tags_fuzziness));
            match tags_score(doc, tags, query.tags_match_all(), max_edits) {
                Some(s) => score += s,
                None => return Ok(None),
            }
        }

        if let Some((lat, lon, range)) = query.geo() {
            let radius = parse_distance(range).ok_or_else(|| {
                DatabaseError::index_request(format!("invalid geo distance: {}", range))
            })?;
            match geo_point(doc) {
                Some((doc_lat, doc_lon)) if haversine(lat, lon, doc_lat, doc_lon) <= radius => {}
                _ => return Ok(None),
            }
        }

        if map && geo_point(doc).is_none() {
            return Ok(None);
        }

        Ok(Some(score))
    }

    /// Matching documents in relevance order, with the total count
    async fn ranked(&self, query: &SearchQuery, map: bool) -> Result<Vec<Value>, DatabaseError> {
        let documents = self.documents.read().await;
        let mut hits = Vec::new();
        for (id, doc) in documents.iter() {
            if let Some(score) = self.score(doc, query, map)? {
                hits.push((score, id.clone(), doc.clone()));
            }
        }
        hits.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| cmp_missing_last(a.2.get("primary_url"), b.2.get("primary_url")))
                .then_with(|| a.1.cmp(&b.1))
        });
        Ok(hits.into_iter().map(|(_, _, doc)| doc).collect())
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn index_by_id(&self, id: &str, document: &Value) -> Result<(), DatabaseError> {
        self.documents
            .write()
            .await
            .insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResults, DatabaseError> {
        let hits = self.ranked(query, false).await?;
        let total = hits.len() as i64;
        let size = query.search_size();
        let from = pagination::from(query.page, size) as usize;
        Ok(SearchResults {
            result: hits.into_iter().skip(from).take(size as usize).collect(),
            number_of_results: total,
            total_pages: pagination::total_pages(total, size),
        })
    }

    async fn get_nodes(&self, query: &SearchQuery) -> Result<MapResults, DatabaseError> {
        let hits = self.ranked(query, true).await?;
        let total = hits.len() as i64;
        let size = query.map_size();
        let from = pagination::from(query.page, size) as usize;
        Ok(MapResults {
            result: hits
                .iter()
                .skip(from)
                .take(size as usize)
                .map(source_filter)
                .filter_map(|doc| MapPoint::from_source(&doc))
                .collect(),
            number_of_results: total,
            total_pages: pagination::total_pages(total, size),
        })
    }

    async fn export(&self, query: &ExportQuery) -> Result<ExportResults, DatabaseError> {
        let documents = self.documents.read().await;
        let mut hits: Vec<(ExportKey, &Value)> = documents
            .values()
            .filter(|doc| query.schema.as_deref().map_or(true, |s| schema_matches(doc, s)))
            .map(|doc| (ExportKey::of(doc), doc))
            .collect();
        hits.sort_by(|a, b| a.0.cmp(&b.0));

        if let Some(cursor) = query.search_after.as_ref().filter(|c| !c.is_empty()) {
            let after = ExportKey::from_cursor(cursor).ok_or_else(|| {
                DatabaseError::index_request("search_after must be [last_updated, profile_url]")
            })?;
            hits.retain(|(key, _)| *key > after);
        }

        hits.truncate(query.size() as usize);
        let sort = hits.last().map(|(key, _)| key.to_cursor());
        Ok(ExportResults {
            result: hits.into_iter().map(|(_, doc)| doc.clone()).collect(),
            sort,
        })
    }

    async fn update(&self, id: &str, partial: &Value) -> Result<(), DatabaseError> {
        let mut documents = self.documents.write().await;
        if let (Some(Value::Object(doc)), Value::Object(fields)) = (documents.get_mut(id), partial) {
            for (key, value) in fields {
                doc.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), DatabaseError> {
        self.documents.write().await.remove(id);
        Ok(())
    }

    async fn delete_many(&self, filter: &DeleteFilter) -> Result<u64, DatabaseError> {
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|_, doc| {
            let status_matches = doc.get("status").and_then(Value::as_str) == Some(filter.status.as_str());
            let old_enough = doc
                .get("last_updated")
                .and_then(Value::as_i64)
                .is_some_and(|ts| ts <= filter.last_updated_before);
            !(status_matches && old_enough)
        });
        Ok((before - documents.len()) as u64)
    }

    async fn update_status_by_expiration(&self, now: i64) -> Result<u64, DatabaseError> {
        let mut documents = self.documents.write().await;
        let mut updated = 0;
        for doc in documents.values_mut() {
            let posted = doc.get("status").and_then(Value::as_str) == Some(NodeStatus::Posted.as_str());
            let expired = doc
                .get("expires")
                .and_then(Value::as_i64)
                .is_some_and(|expires| expires <= now);
            if !(posted && expired) {
                continue;
            }
            if let Value::Object(fields) = doc {
                fields.insert("status".to_string(), Value::from(NodeStatus::Deleted.as_str()));
                fields.insert("last_updated".to_string(), Value::from(now));
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Value>, DatabaseError> {
        Ok(self.documents.read().await.get(id).cloned())
    }
}

/// Export sort key: `last_updated` ascending (missing last), then `profile_url`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ExportKey {
    last_updated: i64,
    profile_url: String,
}

impl ExportKey {
    fn of(doc: &Value) -> Self {
        Self {
            last_updated: doc
                .get("last_updated")
                .and_then(Value::as_i64)
                .unwrap_or(i64::MAX),
            profile_url: doc
                .get("profile_url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }

    fn from_cursor(cursor: &[Value]) -> Option<Self> {
        match cursor {
            [ts, url] => Some(Self {
                last_updated: ts.as_i64()?,
                profile_url: url.as_str()?.to_string(),
            }),
            _ => None,
        }
    }

    fn to_cursor(&self) -> Vec<Value> {
        vec![
            Value::from(self.last_updated),
            Value::from(self.profile_url.clone()),
        ]
    }
}

fn source_filter(doc: &Value) -> Value {
    let mut out = Map::new();
    for field in MAP_SOURCE_FIELDS {
        if let Some(value) = doc.get(*field) {
            out.insert(field.to_string(), value.clone());
        }
    }
    Value::Object(out)
}

fn cmp_missing_last(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.and_then(Value::as_str), b.and_then(Value::as_str)) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Edit distance allowed by `AUTO` for a term of `len` characters
fn auto_edits(len: usize) -> usize {
    match len {
        0..=2 => 0,
        3..=5 => 1,
        _ => 2,
    }
}

/// `None` means `AUTO`
fn fuzziness_edits(fuzziness: &str) -> Option<usize> {
    if fuzziness.eq_ignore_ascii_case("auto") {
        None
    } else {
        Some(fuzziness.trim().parse().unwrap_or(0))
    }
}

fn term_matches(query_term: &str, doc_term: &str, max_edits: Option<usize>) -> bool {
    let allowed = max_edits.unwrap_or_else(|| auto_edits(query_term.chars().count()));
    if allowed == 0 {
        return query_term == doc_term;
    }
    levenshtein(query_term, doc_term) <= allowed
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Fuzzy term match or lowercase substring, as the `text` clause does
fn text_score(field: Option<&Value>, query: &str) -> Option<f64> {
    let field = field?.as_str()?;
    let lowered = field.to_lowercase();
    if lowered.contains(&query.to_lowercase()) {
        return Some(2.0);
    }
    let field_terms = tokens(field);
    let hit = tokens(query)
        .iter()
        .any(|q| field_terms.iter().any(|f| term_matches(q, f, None)));
    hit.then_some(1.0)
}

fn schema_matches(doc: &Value, prefix: &str) -> bool {
    let prefix = prefix.to_lowercase();
    doc.get("linked_schemas")
        .and_then(Value::as_array)
        .is_some_and(|schemas| {
            schemas
                .iter()
                .filter_map(Value::as_str)
                .any(|s| s.to_lowercase().starts_with(&prefix))
        })
}

fn tags_score(doc: &Value, tags: &str, match_all: bool, max_edits: Option<usize>) -> Option<f64> {
    let doc_terms: Vec<String> = doc
        .get("tags")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .flat_map(tokens)
        .collect();
    let query_terms = tokens(tags);
    if query_terms.is_empty() {
        return None;
    }

    let matched = query_terms
        .iter()
        .filter(|q| doc_terms.iter().any(|d| term_matches(q, d, max_edits)))
        .count();
    let ok = if match_all {
        matched == query_terms.len()
    } else {
        matched > 0
    };
    ok.then_some(matched as f64)
}

fn geo_point(doc: &Value) -> Option<(f64, f64)> {
    let geo = doc.get("geolocation")?;
    Some((geo.get("lat")?.as_f64()?, geo.get("lon")?.as_f64()?))
}

/// Parse an engine distance such as `10km`, `500m` or `3mi` into meters
pub fn parse_distance(input: &str) -> Option<f64> {
    let input = input.trim().to_lowercase();
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let value: f64 = number.parse().ok()?;
    let factor = match unit.trim() {
        "" | "m" | "meters" => 1.0,
        "km" | "kilometers" => 1_000.0,
        "mi" | "miles" => 1_609.344,
        "yd" | "yards" => 0.9144,
        "ft" | "feet" => 0.3048,
        _ => return None,
    };
    Some(value * factor)
}

fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> MemoryIndex {
        let index = MemoryIndex::default();
        let docs = [
            ("a", json!({
                "name": "Open Food Network", "primary_url": "openfoodnetwork.org",
                "profile_url": "https://a.test/p.json", "status": "posted", "last_updated": 300,
                "tags": ["food", "cooperative"], "linked_schemas": ["organizations_schema-v1.0.0"],
                "geolocation": { "lat": 48.8566, "lon": 2.3522 }
            })),
            ("b", json!({
                "name": "Garden Collective", "primary_url": "garden.test",
                "profile_url": "https://b.test/p.json", "status": "posted", "last_updated": 100,
                "tags": ["garden", "food"], "linked_schemas": ["people_schema-v0.1.0"],
                "geolocation": { "lat": 51.5074, "lon": -0.1278 }
            })),
            ("c", json!({
                "name": "Deleted Thing", "primary_url": "deleted.test",
                "profile_url": "https://c.test/p.json", "status": "deleted", "last_updated": 100,
                "linked_schemas": ["organizations_schema-v1.0.0"]
            })),
        ];
        for (id, doc) in docs {
            index.index_by_id(id, &doc).await.unwrap();
        }
        index
    }

    #[tokio::test]
    async fn test_text_match_is_fuzzy_and_substring() -> anyhow::Result<()> {
        let index = seeded().await;
        let query = SearchQuery {
            name: Some("netwrk".to_string()),
            ..Default::default()
        };
        let hits = index.search(&query).await?;
        assert_eq!(hits.number_of_results, 1);
        assert_eq!(hits.result[0]["primary_url"], "openfoodnetwork.org");

        let query = SearchQuery {
            name: Some("collect".to_string()),
            ..Default::default()
        };
        assert_eq!(index.search(&query).await?.number_of_results, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_tags_operator_and_exactness() -> anyhow::Result<()> {
        let index = seeded().await;
        let mut query = SearchQuery {
            tags: Some("food gardn".to_string()),
            ..Default::default()
        };
        assert_eq!(index.search(&query).await?.number_of_results, 2);

        query.tags_filter = Some("and".to_string());
        assert_eq!(index.search(&query).await?.number_of_results, 1);

        query.tags_exact = Some("true".to_string());
        assert_eq!(index.search(&query).await?.number_of_results, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_geo_filter() -> anyhow::Result<()> {
        let index = seeded().await;
        let query = SearchQuery {
            lat: Some(48.85),
            lon: Some(2.35),
            range: Some("50km".to_string()),
            ..Default::default()
        };
        let hits = index.search(&query).await?;
        assert_eq!(hits.number_of_results, 1);
        assert_eq!(hits.result[0]["profile_url"], "https://a.test/p.json");
        Ok(())
    }

    #[tokio::test]
    async fn test_ties_sort_by_primary_url() -> anyhow::Result<()> {
        let index = seeded().await;
        let hits = index.search(&SearchQuery::default()).await?;
        let urls: Vec<_> = hits.result.iter().map(|d| d["primary_url"].clone()).collect();
        assert_eq!(
            urls,
            vec![json!("deleted.test"), json!("garden.test"), json!("openfoodnetwork.org")]
        );
        assert_eq!(hits.total_pages, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_get_nodes_returns_lon_lat_url_tuples() -> anyhow::Result<()> {
        let index = seeded().await;
        let points = index.get_nodes(&SearchQuery::default()).await?;
        assert_eq!(points.number_of_results, 2);
        let encoded = serde_json::to_value(&points.result)?;
        assert!(encoded
            .as_array()
            .unwrap()
            .contains(&json!([2.3522, 48.8566, "https://a.test/p.json"])));
        Ok(())
    }

    #[tokio::test]
    async fn test_export_cursor_resumes() -> anyhow::Result<()> {
        let index = seeded().await;
        let first = index
            .export(&ExportQuery {
                page_size: 2,
                ..Default::default()
            })
            .await?;
        assert_eq!(first.result.len(), 2);
        assert_eq!(first.sort, Some(vec![json!(100), json!("https://c.test/p.json")]));

        let second = index
            .export(&ExportQuery {
                page_size: 2,
                search_after: first.sort.clone(),
                ..Default::default()
            })
            .await?;
        assert_eq!(second.result.len(), 1);
        assert_eq!(second.result[0]["profile_url"], "https://a.test/p.json");
        Ok(())
    }

    #[tokio::test]
    async fn test_update_and_delete_are_idempotent() -> anyhow::Result<()> {
        let index = seeded().await;
        index.update("missing", &json!({ "status": "deleted" })).await?;
        index.delete_by_id("missing").await?;

        index.update("a", &json!({ "status": "deleted", "last_updated": 50 })).await?;
        let removed = index
            .delete_many(&DeleteFilter {
                status: NodeStatus::Deleted,
                last_updated_before: 100,
            })
            .await?;
        assert_eq!(removed, 2);
        assert_eq!(index.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_expiration_only_touches_expired_posted_documents() -> anyhow::Result<()> {
        let index = seeded().await;
        index.update("a", &json!({ "expires": 400 })).await?;
        index.update("b", &json!({ "expires": 900 })).await?;
        index.update("c", &json!({ "expires": 400 })).await?;

        assert_eq!(index.update_status_by_expiration(500).await?, 1);
        let a = index.get_document("a").await?.expect("kept");
        assert_eq!(a["status"], "deleted");
        assert_eq!(a["last_updated"], 500);
        assert_eq!(index.get_document("b").await?.expect("kept")["status"], "posted");
        assert_eq!(index.get_document("c").await?.expect("kept")["last_updated"], 100);

        assert_eq!(index.update_status_by_expiration(500).await?, 0);
        Ok(())
    }

    #[test]
    fn test_parse_distance_units() {
        assert_eq!(parse_distance("500m"), Some(500.0));
        assert_eq!(parse_distance("2km"), Some(2_000.0));
        assert_eq!(parse_distance("1.5 km"), Some(1_500.0));
        assert!(parse_distance("far").is_none());
    }

    #[test]
    fn test_auto_fuzziness() {
        assert!(term_matches("food", "fod", None));
        assert!(!term_matches("ab", "ac", None));
        assert!(term_matches("garden", "gardn", Some(1)));
        assert!(!term_matches("garden", "gardn", Some(0)));
    }
}
