//! Subscriber installation and the OTLP exporter guard.

use anyhow::Result;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{OtlpProtocol, TracingConfig};

/// Keeps the tracer provider alive; flushes and shuts it down on drop.
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl TracingGuard {
    /// Whether spans are being exported over OTLP.
    pub fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(ref mut provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to shutdown tracer provider: {e}");
            }
        }
    }
}

fn env_filter(config: &TracingConfig) -> EnvFilter {
    EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_fmt_only(config: &TracingConfig) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .with(env_filter(config))
        .init();
}

/// Install the global subscriber.
///
/// Without an export endpoint only the stderr fmt layer is installed. When the
/// exporter cannot be built the plugin still starts with fmt-only logging.
///
/// The returned [`TracingGuard`] must be held until shutdown so buffered spans
/// are flushed.
pub fn init_tracing(config: &TracingConfig) -> TracingGuard {
    let Some(endpoint) = config.export_endpoint() else {
        init_fmt_only(config);
        return TracingGuard { provider: None };
    };

    match build_provider(config, endpoint) {
        Ok(provider) => {
            let tracer = provider.tracer(config.service_name.clone());
            tracing_subscriber::registry()
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(true)
                        .with_writer(std::io::stderr),
                )
                .with(env_filter(config))
                .init();

            tracing::info!(
                endpoint = %endpoint,
                service = %config.service_name,
                protocol = ?config.protocol,
                "OTLP span export enabled"
            );

            TracingGuard {
                provider: Some(provider),
            }
        }
        Err(e) => {
            init_fmt_only(config);
            tracing::warn!(
                error = %e,
                endpoint = %endpoint,
                "OTLP exporter failed to initialize, logging to stderr only"
            );
            TracingGuard { provider: None }
        }
    }
}

fn build_provider(config: &TracingConfig, endpoint: &str) -> Result<SdkTracerProvider> {
    let exporter = match config.protocol {
        OtlpProtocol::Grpc => SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?,
        OtlpProtocol::Http => SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()?,
    };

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder_empty()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build())
}
