//! Tracing configuration types.

use serde::Deserialize;

/// The `[tracing]` section. Every key is optional; missing keys take the
/// values from [`TracingConfig::default`].
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TracingConfig {
    /// Service name attached to exported spans.
    pub service_name: String,

    /// OTLP collector endpoint, e.g. `http://localhost:4317`. Unset or blank
    /// means logs go to stderr only.
    pub otlp_endpoint: Option<String>,

    pub protocol: OtlpProtocol,

    /// `EnvFilter` directive, e.g. `app_plugin=debug,info`.
    pub log_level: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "app-plugin".to_string(),
            otlp_endpoint: None,
            protocol: OtlpProtocol::Grpc,
            log_level: "info".to_string(),
        }
    }
}

impl TracingConfig {
    /// Endpoint to export to, if export is enabled.
    ///
    /// An empty value lets `APP_PLUGIN_TRACING__OTLP_ENDPOINT=` switch export
    /// off over a file that sets it.
    pub fn export_endpoint(&self) -> Option<&str> {
        self.otlp_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

/// OTLP transport protocol.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    #[default]
    Grpc,
    /// HTTP with protobuf payloads. Also accepts the `http/protobuf` spelling
    /// used by `OTEL_EXPORTER_OTLP_PROTOCOL`.
    #[serde(alias = "http/protobuf")]
    Http,
}
