//! Profile enrichment
//!
//! Turns a validated profile into the document stored in the search index:
//! structured geolocation, ISO country code, capped tags, a normalised
//! `primary_url` and the bookkeeping fields the index filters on. Every
//! other profile field is left out of the indexed document.
//!
//! Enrichment never fails. A value it cannot interpret is dropped with a
//! warning and the rest of the document is still indexed.

use crate::config::EnrichmentConfig;
use crate::models::NodeStatus;
use crate::services::library::CountryLookup;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use url::Url;

/// Fields copied into the search index document
pub const INDEXED_FIELDS: &[&str] = &[
    "country",
    "geolocation",
    "last_updated",
    "linked_schemas",
    "locality",
    "name",
    "primary_url",
    "profile_url",
    "region",
    "status",
    "tags",
    "expires",
];

#[derive(Clone)]
pub struct Enricher {
    countries: Arc<dyn CountryLookup>,
    tags_array_size: usize,
    tags_string_length: usize,
}

impl Enricher {
    pub fn new(countries: Arc<dyn CountryLookup>, config: &EnrichmentConfig) -> Self {
        Self {
            countries,
            tags_array_size: config.tags_array_size,
            tags_string_length: config.tags_string_length,
        }
    }

    /// Build the index document for `profile`
    pub async fn enrich(&self, profile: &Value, profile_url: &str, last_updated: i64) -> Value {
        let mut doc = profile.as_object().cloned().unwrap_or_default();

        if let Some(geo) = geolocation_of(&doc) {
            doc.insert("geolocation".to_string(), geo);
        } else if doc.remove("geolocation").is_some() {
            tracing::warn!("Dropping unparseable geolocation of {}", profile_url);
        }

        self.enrich_country(&mut doc, profile_url).await;

        if let Some(tags) = doc.get("tags") {
            let tags = filter_tags(tags, self.tags_array_size, self.tags_string_length);
            doc.insert("tags".to_string(), Value::Array(tags));
        }

        if let Some(raw) = doc.get("primary_url").and_then(Value::as_str) {
            let normalized = normalize_primary_url(raw);
            doc.insert("primary_url".to_string(), Value::String(normalized));
        }

        if doc.get("expires").is_some() && expires_of(profile).is_none() {
            doc.remove("expires");
        }

        doc.insert("profile_url".to_string(), json!(profile_url));
        doc.insert("last_updated".to_string(), json!(last_updated));
        doc.insert("status".to_string(), json!(NodeStatus::Posted.as_str()));

        let indexed: Map<String, Value> = doc
            .into_iter()
            .filter(|(k, _)| INDEXED_FIELDS.contains(&k.as_str()))
            .collect();
        Value::Object(indexed)
    }

    async fn enrich_country(&self, doc: &mut Map<String, Value>, profile_url: &str) {
        if let Some(iso) = doc
            .get("country_iso_3166")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let iso = iso.to_uppercase();
            doc.insert("country".to_string(), Value::String(iso));
            return;
        }

        if doc.contains_key("country") {
            return;
        }

        let Some(name) = doc
            .get("country_name")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return;
        };

        match self.countries.find_alpha2(&name).await {
            Ok(Some(code)) => {
                doc.insert("country".to_string(), Value::String(code));
            }
            Ok(None) => {
                tracing::warn!("No country code for {:?} in {}", name, profile_url);
            }
            Err(e) => {
                tracing::warn!("Country lookup failed for {}: {:#}", profile_url, e);
            }
        }
    }
}

/// `expires` of a profile, if it is a whole number of epoch seconds
pub fn expires_of(profile: &Value) -> Option<i64> {
    let expires = profile.get("expires")?;
    expires
        .as_i64()
        .or_else(|| expires.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
}

/// Structured `{lat, lon}` from `geolocation` or `latitude`/`longitude`
fn geolocation_of(doc: &Map<String, Value>) -> Option<Value> {
    let (lat, lon) = match doc.get("geolocation") {
        Some(Value::String(s)) => {
            let (lat, lon) = s.split_once(',')?;
            (lat.trim().parse::<f64>().ok()?, lon.trim().parse::<f64>().ok()?)
        }
        Some(Value::Object(o)) => (number(o.get("lat")?)?, number(o.get("lon")?)?),
        Some(_) => return None,
        None => (number(doc.get("latitude")?)?, number(doc.get("longitude")?)?),
    };
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }
    Some(json!({ "lat": lat, "lon": lon }))
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Keep string tags only, at most `max_count`, each at most `max_len` chars
pub fn filter_tags(tags: &Value, max_count: usize, max_len: usize) -> Vec<Value> {
    let Some(tags) = tags.as_array() else {
        return Vec::new();
    };
    tags.iter()
        .filter_map(Value::as_str)
        .take(max_count)
        .map(|t| Value::String(t.chars().take(max_len).collect()))
        .collect()
}

/// Host and path of a URL without scheme, `www.` or trailing slash
///
/// `https://www.Example.org/about/?lang=en` becomes `example.org/about?lang=en`.
pub fn normalize_primary_url(raw: &str) -> String {
    let raw = raw.trim();
    let with_scheme = if raw.contains("http") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };

    match Url::parse(&with_scheme) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default();
            let host = host.strip_prefix("www.").unwrap_or(host);
            let mut out = match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            out.push_str(url.path().trim_end_matches('/'));
            if let Some(query) = url.query() {
                out.push('?');
                out.push_str(query);
            }
            out
        }
        Err(_) => {
            let rest = raw.split_once("://").map(|(_, r)| r).unwrap_or(raw);
            let rest = rest.strip_prefix("www.").unwrap_or(rest);
            rest.trim_end_matches('/').to_string()
        }
    }
}
