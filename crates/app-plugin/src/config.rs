//! Configuration types and loading logic.

use std::collections::HashMap;

use bytes::Bytes;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use plugin_tracing::TracingConfig;
use serde::Deserialize;

use crate::backend::{AppInstanceSettings, User};
use crate::proxy::settings::{ACCESS_TOKEN_KEY, API_KEY_KEY};

/// Top-level configuration of the standalone plugin host.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub plugin: InstanceConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Largest inbound request body accepted, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// The app instance served by this process, as the host would provide it.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    #[serde(default = "default_plugin_id")]
    pub id: String,

    /// Instance JSON data (e.g. `backendUrl`). Left unset, the instance has
    /// no JSON data at all.
    #[serde(default)]
    pub json_data: Option<serde_json::Value>,

    /// Secret values, e.g. `accessToken` and `apiKey`.
    #[serde(default)]
    pub secure_json_data: HashMap<String, String>,

    /// Identity attached to every call.
    #[serde(default)]
    pub user: Option<User>,
}

fn default_listen_address() -> String {
    "127.0.0.1:3080".to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_plugin_id() -> String {
    "myorg-app-app".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            id: default_plugin_id(),
            json_data: None,
            secure_json_data: HashMap::new(),
            user: None,
        }
    }
}

impl InstanceConfig {
    /// Settings in the form the host hands them to an app instance.
    pub fn instance_settings(&self) -> anyhow::Result<AppInstanceSettings> {
        let json_data = match &self.json_data {
            Some(value) => Bytes::from(serde_json::to_vec(value)?),
            None => Bytes::new(),
        };
        Ok(AppInstanceSettings {
            json_data,
            decrypted_secure_json_data: self.secure_json_data.clone(),
        })
    }
}

impl PluginConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. `APP_PLUGIN_ACCESS_TOKEN` / `APP_PLUGIN_API_KEY`
    /// 2. Environment variables (APP_PLUGIN_ prefix, __ for nesting)
    /// 3. TOML config file
    /// 4. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("APP_PLUGIN_").split("__"));
        let mut config = Self::from_figment(figment)?;

        // Secrets keep their camelCase keys, which nested env vars cannot express.
        if let Ok(token) = std::env::var("APP_PLUGIN_ACCESS_TOKEN") {
            config
                .plugin
                .secure_json_data
                .insert(ACCESS_TOKEN_KEY.to_string(), token);
        }
        if let Ok(key) = std::env::var("APP_PLUGIN_API_KEY") {
            config
                .plugin
                .secure_json_data
                .insert(API_KEY_KEY.to_string(), key);
        }

        Ok(config)
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        Ok(figment.extract()?)
    }
}
