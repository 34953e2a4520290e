//! Profile URL shape check

use crate::models::ValidationError;
use url::Url;

/// Accept `http`/`https` URLs whose host contains a dot or is the internal
/// gateway alias
pub fn validate_profile_url(raw: &str, gateway_alias: &str) -> Result<Url, ValidationError> {
    let invalid = || ValidationError::invalid_profile_url(raw);

    let url = Url::parse(raw.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    let host = url.host_str().ok_or_else(invalid)?;
    if !host.contains('.') && host != gateway_alias {
        return Err(invalid());
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALIAS: &str = "data-proxy-app";

    #[test]
    fn test_accepts_public_and_gateway_hosts() {
        assert!(validate_profile_url("https://example.org/profile.json", ALIAS).is_ok());
        assert!(validate_profile_url("http://data-proxy-app:8080/p/1", ALIAS).is_ok());
    }

    #[test]
    fn test_rejects_bad_shapes() {
        for raw in [
            "",
            "example.org/profile.json",
            "ftp://example.org/profile.json",
            "http://localhost/profile.json",
            "mailto:someone@example.org",
        ] {
            assert!(
                matches!(
                    validate_profile_url(raw, ALIAS),
                    Err(ValidationError::InvalidProfileUrl { .. })
                ),
                "{raw} should be rejected"
            );
        }
    }
}
