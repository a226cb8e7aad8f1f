//! Upstream connection settings derived from the app instance settings.

use serde::Deserialize;

use crate::backend::AppInstanceSettings;

/// Secure JSON key holding the bearer token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Secure JSON key holding the API key.
pub const API_KEY_KEY: &str = "apiKey";

#[derive(Debug, Deserialize)]
struct JsonData {
    #[serde(rename = "backendUrl", default)]
    url: String,
}

/// Connection settings for the upstream API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(dead_code)]
pub struct Settings {
    /// Base URL, always ending with a single `/`.
    pub url: String,
    pub access_token: String,
    /// Loaded alongside the token but not sent upstream.
    pub api_key: String,
}

impl Settings {
    /// Load settings from the instance's JSON blob and decrypted secrets.
    pub fn load(instance: &AppInstanceSettings) -> Result<Self, serde_json::Error> {
        let jd: JsonData = serde_json::from_slice(&instance.json_data).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse app instance JSON data");
            e
        })?;

        let secret = |key: &str| {
            instance
                .decrypted_secure_json_data
                .get(key)
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };

        let mut url = jd.url;
        if !url.ends_with('/') {
            url.push('/');
        }

        Ok(Self {
            url,
            access_token: secret(ACCESS_TOKEN_KEY),
            api_key: secret(API_KEY_KEY),
        })
    }

    /// Join a request-relative URL onto the base URL.
    pub fn target_url(&self, relative: &str) -> String {
        format!("{}{}", self.url, relative)
    }
}
