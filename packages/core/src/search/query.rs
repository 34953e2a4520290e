//! Search Query Builder
//!
//! Translates API query parameters into search engine request bodies.
//!
//! A query is a `bool` with two clause groups:
//!
//! - **must** (scoring): fuzzy text on `name`/`locality`/`region`/`country`,
//!   `linked_schemas` prefix wildcard, `last_updated >=` range, `status` and
//!   `primary_url` match, tag match with configurable operator and fuzziness
//! - **filter** (non-scoring): geo-distance around `lat`/`lon`
//!
//! Search results sort by score, then `primary_url`, so identical scores page
//! deterministically. Exports sort by `(last_updated, profile_url)` and resume
//! with `search_after` instead of an offset.

use crate::models::ValidationError;
use crate::search::pagination;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Query parameters accepted by search and map requests
pub const SEARCH_FIELDS: &[&str] = &[
    "name",
    "schema",
    "last_updated",
    "lat",
    "lon",
    "range",
    "locality",
    "region",
    "country",
    "status",
    "tags",
    "tags_filter",
    "tags_exact",
    "primary_url",
    "page",
    "page_size",
    "expires",
];

/// Body fields accepted by export requests
pub const EXPORT_FIELDS: &[&str] = &["schema", "page_size", "search_after"];

/// Fields returned by map queries
pub const MAP_SOURCE_FIELDS: &[&str] = &["geolocation", "profile_url"];

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    pagination::DEFAULT_PAGE_SIZE
}

fn default_export_size() -> i64 {
    pagination::DEFAULT_EXPORT_SIZE
}

/// Search and map query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub last_updated: Option<i64>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    /// Geo-distance radius, e.g. `25km`
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub locality: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    /// `and` requires every tag term to match
    #[serde(default)]
    pub tags_filter: Option<String>,
    /// `true` disables tag fuzziness
    #[serde(default)]
    pub tags_exact: Option<String>,
    #[serde(default)]
    pub primary_url: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            name: None,
            schema: None,
            last_updated: None,
            lat: None,
            lon: None,
            range: None,
            locality: None,
            region: None,
            country: None,
            status: None,
            tags: None,
            tags_filter: None,
            tags_exact: None,
            primary_url: None,
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl SearchQuery {
    /// Reject requests that would page past the result window
    pub fn check_window(&self) -> Result<(), ValidationError> {
        if pagination::exceeds_window(self.page, self.page_size) {
            return Err(ValidationError::MaxResultsExceeded {
                page: self.page,
                page_size: self.page_size,
            });
        }
        Ok(())
    }

    /// Effective page size of a search, clamped to `1..=500`
    pub fn search_size(&self) -> i64 {
        pagination::size(self.page_size)
    }

    /// Effective page size of a map query, clamped to `1..=10000`
    pub fn map_size(&self) -> i64 {
        pagination::maximum_size(self.page_size)
    }

    pub fn tags_match_all(&self) -> bool {
        self.tags_filter
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("and"))
    }

    pub fn tags_exact(&self) -> bool {
        self.tags_exact
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("true"))
    }

    /// Geo filter parameters, only when all three are present
    pub fn geo(&self) -> Option<(f64, f64, &str)> {
        match (self.lat, self.lon, self.range.as_deref()) {
            (Some(lat), Some(lon), Some(range)) => Some((lat, lon, range)),
            _ => None,
        }
    }

    /// Fuzziness used for tag matching
    pub fn tags_fuzziness<'a>(&self, configured: &'a str) -> &'a str {
        if self.tags_exact() {
            "0"
        } else {
            configured
        }
    }

    /// The `bool` query shared by search and map requests
    pub fn bool_query(&self, tags_fuzziness: &str, map: bool) -> Value {
        let mut builder = QueryBuilder::default();

        builder.text("name", self.name.as_deref());
        builder.wildcard("linked_schemas", self.schema.as_deref());
        builder.range_gte("last_updated", self.last_updated);
        builder.text("locality", self.locality.as_deref());
        builder.text("region", self.region.as_deref());
        builder.text("country", self.country.as_deref());
        builder.matches("status", self.status.as_deref());
        builder.matches("primary_url", self.primary_url.as_deref());
        if let Some((lat, lon, range)) = self.geo() {
            builder.geo_distance("geolocation", lat, lon, range);
        }

        if let Some(tags) = &self.tags {
            let operator = if self.tags_match_all() { "AND" } else { "OR" };
            builder.must(json!({
                "match": {
                    "tags": {
                        "query": tags,
                        "operator": operator,
                        "fuzziness": self.tags_fuzziness(tags_fuzziness),
                    }
                }
            }));
        }

        if map {
            builder.must(json!({ "exists": { "field": "geolocation" } }));
        }

        builder.build()
    }

    /// Request body for a paginated search
    pub fn search_body(&self, tags_fuzziness: &str) -> Value {
        json!({
            "query": self.bool_query(tags_fuzziness, false),
            "from": pagination::from(self.page, self.search_size()),
            "size": self.search_size(),
            "sort": relevance_sort(),
            "track_total_hits": true,
        })
    }

    /// Request body for a map query, limited to geolocation and profile URL
    pub fn map_body(&self, tags_fuzziness: &str) -> Value {
        json!({
            "query": self.bool_query(tags_fuzziness, true),
            "from": pagination::from(self.page, self.map_size()),
            "size": self.map_size(),
            "sort": relevance_sort(),
            "_source": MAP_SOURCE_FIELDS,
            "track_total_hits": true,
        })
    }
}

fn relevance_sort() -> Value {
    json!([
        { "_score": { "order": "desc" } },
        { "primary_url": { "order": "asc" } },
    ])
}

/// Cursor export request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default = "default_export_size")]
    pub page_size: i64,
    /// Sort key of the last hit of the previous page
    #[serde(default)]
    pub search_after: Option<Vec<Value>>,
}

impl Default for ExportQuery {
    fn default() -> Self {
        Self {
            schema: None,
            page_size: default_export_size(),
            search_after: None,
        }
    }
}

impl ExportQuery {
    pub fn size(&self) -> i64 {
        if self.page_size == 0 {
            pagination::DEFAULT_EXPORT_SIZE
        } else {
            pagination::maximum_size(self.page_size)
        }
    }

    pub fn body(&self) -> Value {
        let mut builder = QueryBuilder::default();
        builder.wildcard("linked_schemas", self.schema.as_deref());

        let mut body = json!({
            "query": builder.build(),
            "size": self.size(),
            "sort": [
                { "last_updated": { "order": "asc" } },
                { "profile_url": { "order": "asc" } },
            ],
            "track_total_hits": true,
        });
        if let Some(cursor) = self.search_after.as_ref().filter(|c| !c.is_empty()) {
            body["search_after"] = Value::Array(cursor.clone());
        }
        body
    }
}

/// Accumulates clauses for a `bool` query
#[derive(Debug, Default)]
pub struct QueryBuilder {
    must: Vec<Value>,
    filter: Vec<Value>,
}

impl QueryBuilder {
    pub fn must(&mut self, clause: Value) {
        self.must.push(clause);
    }

    pub fn filter(&mut self, clause: Value) {
        self.filter.push(clause);
    }

    /// Fuzzy match or case-insensitive substring
    pub fn text(&mut self, field: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.must(json!({
                "bool": {
                    "should": [
                        { "match": { field: { "query": value, "fuzziness": "AUTO" } } },
                        { "regexp": { field: format!(".*{}.*", escape_regexp(&value.to_lowercase())) } },
                    ]
                }
            }));
        }
    }

    /// Case-insensitive prefix match
    pub fn wildcard(&mut self, field: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.must(json!({
                "wildcard": {
                    field: { "value": format!("{}*", value), "case_insensitive": true }
                }
            }));
        }
    }

    pub fn range_gte(&mut self, field: &str, value: Option<i64>) {
        if let Some(value) = value {
            self.must(json!({ "range": { field: { "gte": value } } }));
        }
    }

    pub fn matches(&mut self, field: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.must(json!({ "match": { field: { "query": value } } }));
        }
    }

    pub fn geo_distance(&mut self, field: &str, lat: f64, lon: f64, distance: &str) {
        self.filter(json!({
            "geo_distance": {
                "distance": distance,
                field: { "lat": lat, "lon": lon },
            }
        }));
    }

    pub fn build(self) -> Value {
        json!({ "bool": { "must": self.must, "filter": self.filter } })
    }
}

/// Escape Lucene regular expression operators
fn escape_regexp(input: &str) -> String {
    const RESERVED: &[char] = &[
        '.', '?', '+', '*', '|', '{', '}', '[', ']', '(', ')', '"', '\\', '#', '@', '&', '<', '>',
        '~',
    ];
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if RESERVED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
