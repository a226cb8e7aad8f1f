//! app-plugin: backend for a dashboard app plugin.
//!
//! Serves the built-in `ping` and `echo` resources and forwards `proxy/...`
//! resource calls to the configured upstream API with bearer auth and caller
//! identity headers.

mod app;
mod backend;
mod config;
mod proxy;
mod resources;
mod server;

use app::App;
use config::PluginConfig;
use server::AppState;

fn main() -> anyhow::Result<()> {
    // Determine config path
    let config_path = {
        let args: Vec<String> = std::env::args().collect();
        args.iter()
            .position(|a| a == "--config")
            .and_then(|i| args.get(i + 1).cloned())
            .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
            .or_else(|| std::env::var("APP_PLUGIN_CONFIG").ok())
            .unwrap_or_else(|| "app-plugin.toml".to_string())
    };

    let config = PluginConfig::load(&config_path)?;

    // The gRPC exporter needs a reactor, so build the runtime before tracing
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let tracing_guard = plugin_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            plugin_id = %config.plugin.id,
            otlp_export = tracing_guard.is_exporting(),
            "Starting app plugin backend"
        );

        run(config).await
    })
}

async fn run(config: PluginConfig) -> anyhow::Result<()> {
    // One client for the whole process so upstream connections are pooled
    let client = proxy::build_client()?;

    let instance_settings = config.plugin.instance_settings()?;
    let state = AppState::new(&config, instance_settings, App::new(client));

    server::run(state, &config.server.listen_address).await
}
