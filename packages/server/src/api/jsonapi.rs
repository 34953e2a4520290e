//! JSON:API response envelope and pagination links

use axum::http::{header, HeaderMap, Uri};
use serde::Serialize;
use serde_json::Value;

/// `{data, errors, links, meta}` with empty members omitted
#[derive(Debug, Default, Serialize)]
pub struct Document {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Document {
    pub fn data(data: impl Into<Value>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::default()
        }
    }

    pub fn meta(meta: Value) -> Self {
        Self {
            meta: Some(meta),
            ..Self::default()
        }
    }

    pub fn with_links(mut self, links: Links) -> Self {
        self.links = Some(links);
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct Links {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    #[serde(rename = "self")]
    pub current: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
}

impl Links {
    /// Links for `page` of `last_page`, built from the request URI
    pub fn paginate(uri: &Uri, headers: &HeaderMap, page: i64, last_page: i64) -> Self {
        let base = base_url(uri, headers);
        let pairs: Vec<(String, String)> = uri
            .query()
            .and_then(|q| serde_urlencoded::from_str(q).ok())
            .unwrap_or_default();
        let at = |p: i64| page_url(&base, &pairs, p);

        Links {
            first: (page > 1).then(|| at(1)),
            prev: (page > 1).then(|| at(page - 1)),
            current: at(page),
            next: (page < last_page).then(|| at(page + 1)),
            last: (page < last_page).then(|| at(last_page)),
        }
    }
}

fn base_url(uri: &Uri, headers: &HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.scheme_str())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .unwrap_or("localhost");
    format!("{}://{}{}", scheme, host, uri.path())
}

fn page_url(base: &str, pairs: &[(String, String)], page: i64) -> String {
    let mut params: Vec<(&str, String)> = pairs
        .iter()
        .filter(|(k, _)| k != "page")
        .map(|(k, v)| (k.as_str(), v.clone()))
        .collect();
    params.push(("page", page.to_string()));
    match serde_urlencoded::to_string(&params) {
        Ok(query) => format!("{}?{}", base, query),
        Err(_) => base.to_string(),
    }
}
