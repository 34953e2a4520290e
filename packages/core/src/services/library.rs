//! Library service client
//!
//! The library service publishes the schema catalogue and the country alias
//! map. Both are consumed best-effort: a lookup that fails is logged by the
//! caller and never blocks a lifecycle transition on its own.
//!
//! [`LibrarySchemaValidator`] checks a profile against fetched schemas. It
//! covers the top-level `required` list and primitive `type` declarations;
//! anything deeper belongs to a full JSON Schema engine.

use crate::config::{HttpConfig, LibraryConfig};
use crate::models::ErrorObject;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Schema every profile is validated against
pub const DEFAULT_SCHEMA: &str = "default-v2.1.0";

/// Schemas a profile is validated against: the default schema followed by
/// its `linked_schemas`
///
/// `None` when `linked_schemas` is missing or not an array.
pub fn schemas_for(profile: &Value) -> Option<Vec<String>> {
    let linked = profile.get("linked_schemas")?.as_array()?;
    let mut schemas = vec![DEFAULT_SCHEMA.to_string()];
    for name in linked.iter().filter_map(Value::as_str) {
        if !schemas.iter().any(|s| s == name) {
            schemas.push(name.to_string());
        }
    }
    Some(schemas)
}

/// Country name to ISO 3166-1 alpha-2 resolution
#[async_trait]
pub trait CountryLookup: Send + Sync {
    /// `Ok(None)` when no alias matches
    async fn find_alpha2(&self, name: &str) -> anyhow::Result<Option<String>>;
}

/// Validates a profile against named schemas
#[async_trait]
pub trait SchemaValidator: Send + Sync {
    /// Failure reasons; empty when the profile is valid
    async fn validate(&self, profile: &Value, schemas: &[String]) -> Vec<ErrorObject>;
}

/// HTTP client for the library service
///
/// The country map is fetched once per client and shared by its clones; a
/// failed fetch is not cached.
#[derive(Clone)]
pub struct LibraryClient {
    client: Client,
    base_url: String,
    countries: Arc<OnceCell<HashMap<String, Vec<String>>>>,
}

impl LibraryClient {
    pub fn new(library: &LibraryConfig, http: &HttpConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(http.timeout()).build()?,
            base_url: library.url.trim_end_matches('/').to_string(),
            countries: Arc::new(OnceCell::new()),
        })
    }

    /// ISO code to lowercase aliases
    pub async fn countries(&self) -> anyhow::Result<&HashMap<String, Vec<String>>> {
        self.countries.get_or_try_init(|| self.fetch_countries()).await
    }

    async fn fetch_countries(&self) -> anyhow::Result<HashMap<String, Vec<String>>> {
        let url = format!("{}/countries", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("countries lookup returned {}", status);
        }
        resp.json::<HashMap<String, Vec<String>>>()
            .await
            .context("countries map is not a JSON object of alias lists")
    }

    pub async fn schema(&self, name: &str) -> anyhow::Result<Value> {
        let url = format!("{}/schemas/{}", self.base_url, name);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("schema {} returned {}", name, status);
        }
        Ok(resp.json::<Value>().await?)
    }
}

#[async_trait]
impl CountryLookup for LibraryClient {
    async fn find_alpha2(&self, name: &str) -> anyhow::Result<Option<String>> {
        let wanted = name.trim().to_lowercase();
        let countries = self.countries().await?;
        Ok(countries.iter().find_map(|(code, aliases)| {
            aliases
                .iter()
                .any(|alias| alias.to_lowercase() == wanted)
                .then(|| code.clone())
        }))
    }
}

/// Schema validation against schemas served by the library
#[derive(Clone)]
pub struct LibrarySchemaValidator {
    library: LibraryClient,
}

impl LibrarySchemaValidator {
    pub fn new(library: LibraryClient) -> Self {
        Self { library }
    }
}

#[async_trait]
impl SchemaValidator for LibrarySchemaValidator {
    async fn validate(&self, profile: &Value, schemas: &[String]) -> Vec<ErrorObject> {
        let mut reasons = Vec::new();
        for name in schemas {
            match self.library.schema(name).await {
                Ok(schema) => reasons.extend(check_against_schema(profile, &schema, name)),
                Err(e) => {
                    tracing::warn!("Failed to load schema {}: {:#}", name, e);
                    reasons.push(
                        ErrorObject::new(
                            404,
                            "Error loading schema",
                            format!("Error loading schema ({}): {}", name, e),
                        )
                        .with_pointer("/linked_schemas"),
                    );
                }
            }
        }
        reasons
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_accepts(expected: &str, value: &Value) -> bool {
    let given = json_type(value);
    expected == given || (expected == "number" && given == "integer")
}

/// Top-level `required` and primitive `type` checks
pub fn check_against_schema(profile: &Value, schema: &Value, schema_name: &str) -> Vec<ErrorObject> {
    let mut reasons = Vec::new();

    let Some(object) = profile.as_object() else {
        reasons.push(ErrorObject::bad_request(
            "Invalid Type",
            format!(
                "Expected: object - Given: {} - Schema: {}",
                json_type(profile),
                schema_name
            ),
        ));
        return reasons;
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for property in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(property) {
                reasons.push(
                    ErrorObject::bad_request(
                        "Missing Required Property",
                        format!(
                            "The `{}` property is required - Schema: {}",
                            property, schema_name
                        ),
                    )
                    .with_pointer(format!("/{}", property)),
                );
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (property, definition) in properties {
            let Some(value) = object.get(property) else {
                continue;
            };
            let expected: Vec<&str> = match definition.get("type") {
                Some(Value::String(t)) => vec![t.as_str()],
                Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
                _ => continue,
            };
            if !expected.is_empty() && !expected.iter().any(|t| type_accepts(t, value)) {
                reasons.push(
                    ErrorObject::bad_request(
                        "Invalid Type",
                        format!(
                            "Expected: {} - Given: {} - Schema: {}",
                            expected.join(", "),
                            json_type(value),
                            schema_name
                        ),
                    )
                    .with_pointer(format!("/{}", property)),
                );
            }
        }
    }

    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> LibraryClient {
        LibraryClient::new(
            &LibraryConfig { url: server.uri() },
            &HttpConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_required_and_type_checks() {
        let schema = json!({
            "required": ["linked_schemas", "name"],
            "properties": {
                "name": { "type": "string" },
                "latitude": { "type": "number" },
                "tags": { "type": "array" }
            }
        });
        let profile = json!({ "linked_schemas": ["x"], "latitude": 12, "tags": "food" });

        let reasons = check_against_schema(&profile, &schema, "test-v1");
        assert_eq!(reasons.len(), 2);
        assert_eq!(reasons[0].title, "Missing Required Property");
        assert_eq!(
            reasons[0].source.as_ref().unwrap().pointer.as_deref(),
            Some("/name")
        );
        assert_eq!(reasons[1].title, "Invalid Type");
        assert!(reasons[1].detail.contains("Expected: array - Given: string"));
    }

    #[test]
    fn test_schemas_for_puts_default_first() {
        let profile = json!({ "linked_schemas": ["org-v1", "default-v2.1.0", 3] });
        assert_eq!(
            schemas_for(&profile),
            Some(vec!["default-v2.1.0".to_string(), "org-v1".to_string()])
        );
        assert_eq!(schemas_for(&json!({ "name": "x" })), None);
    }

    #[tokio::test]
    async fn test_country_lookup_is_case_insensitive() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/countries"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "FR": ["france", "french republic"],
                "DE": ["germany", "deutschland"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.find_alpha2("Deutschland").await?, Some("DE".to_string()));
        assert_eq!(client.find_alpha2("Atlantis").await?, None);
        assert_eq!(client.clone().find_alpha2("FRANCE").await?, Some("FR".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_country_fetch_is_retried() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/countries"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/countries"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "DE": ["germany"] })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.find_alpha2("Germany").await.is_err());
        assert_eq!(client.find_alpha2("Germany").await?, Some("DE".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_unloadable_schema_is_a_failure_reason() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/schemas/default-v2.1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "required": ["linked_schemas"]
            })))
            .mount(&server)
            .await;

        let validator = LibrarySchemaValidator::new(client_for(&server));
        let profile = json!({ "linked_schemas": ["missing_schema-v1"] });
        let reasons = validator
            .validate(
                &profile,
                &["missing_schema-v1".to_string(), DEFAULT_SCHEMA.to_string()],
            )
            .await;

        assert_eq!(reasons.len(), 1);
        assert_eq!(reasons[0].status, 404);
        assert_eq!(reasons[0].title, "Error loading schema");
        Ok(())
    }
}
