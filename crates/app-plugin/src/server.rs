//! Standalone host adapter: serves resource calls over HTTP with axum.
//!
//! Requests to `/api/plugins/{plugin_id}/resources/{*path}` become resource
//! calls carrying the configured plugin context; the sent response becomes the
//! HTTP response.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::app::App;
use crate::backend::{
    headers_from_map, AppInstanceSettings, CallResourceRequest, CallResourceResponse,
    PluginContext, ResponseRecorder, User,
};
use crate::config::PluginConfig;
use crate::resources;

/// Headers that belong to a single connection and are never relayed.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Shared application state.
pub struct AppState {
    pub plugin_id: String,
    pub instance_settings: AppInstanceSettings,
    pub user: Option<User>,
    pub max_body_bytes: usize,
    pub app: App,
}

impl AppState {
    pub fn new(config: &PluginConfig, instance_settings: AppInstanceSettings, app: App) -> Self {
        Self {
            plugin_id: config.plugin.id.clone(),
            instance_settings,
            user: config.plugin.user.clone(),
            max_body_bytes: config.server.max_body_bytes,
            app,
        }
    }

    fn plugin_context(&self) -> PluginContext {
        PluginContext {
            plugin_id: self.plugin_id.clone(),
            app_instance_settings: self.instance_settings.clone(),
            user: self.user.clone(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/plugins/{plugin_id}/resources", any(handle_resource_root))
        .route("/api/plugins/{plugin_id}/resources/{*path}", any(handle_resource))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Build and run the HTTP server.
pub async fn run(state: AppState, listen_addr: &str) -> anyhow::Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(address = %listen_addr, "Plugin backend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Plugin backend shut down gracefully");
    Ok(())
}

async fn handle_resource_root(
    State(state): State<Arc<AppState>>,
    Path(plugin_id): Path<String>,
    request: Request,
) -> Response {
    dispatch(&state, &plugin_id, request).await
}

async fn handle_resource(
    State(state): State<Arc<AppState>>,
    Path((plugin_id, _path)): Path<(String, String)>,
    request: Request,
) -> Response {
    dispatch(&state, &plugin_id, request).await
}

/// Turn the HTTP request into a resource call and answer with its response.
async fn dispatch(state: &AppState, plugin_id: &str, request: Request) -> Response {
    if plugin_id != state.plugin_id {
        tracing::debug!(plugin_id = %plugin_id, "Unknown plugin id");
        return into_http_response(resources::not_found());
    }

    // Use the raw path so percent-encoding survives into the proxied URL.
    let prefix = format!("/api/plugins/{plugin_id}/resources");
    let raw_path = request.uri().path();
    let path = raw_path
        .strip_prefix(prefix.as_str())
        .unwrap_or(raw_path)
        .trim_start_matches('/')
        .to_string();
    let url = match request.uri().query() {
        Some(q) => format!("{path}?{q}"),
        None => path.clone(),
    };

    let method = request.method().to_string();
    let mut headers = headers_from_map(request.headers());
    headers.retain(|name, _| !is_hop_by_hop(name));

    let body = match axum::body::to_bytes(request.into_body(), state.max_body_bytes).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "failed to read request body").into_response();
        }
    };

    let call = CallResourceRequest {
        plugin_context: state.plugin_context(),
        path,
        method,
        url,
        headers,
        body,
    };

    let mut recorder = ResponseRecorder::new();
    if let Err(e) = state.app.call_resource(&call, &mut recorder).await {
        tracing::error!(error = %e, "Failed to send resource response");
        return (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
    }

    match recorder.into_response() {
        Some(resp) => into_http_response(resp),
        None => {
            tracing::error!(path = %call.path, "Resource handler sent no response");
            (StatusCode::INTERNAL_SERVER_ERROR, "no response").into_response()
        }
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Build an axum response from a resource call response.
fn into_http_response(resp: CallResourceResponse) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR));

    for (name, values) in &resp.headers {
        // The body is fully buffered; hyper sets the length itself.
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::warn!(header = %name, "Dropping invalid response header name");
            continue;
        };
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(v) => builder = builder.header(&name, v),
                Err(e) => tracing::warn!(header = %name, error = %e, "Dropping invalid response header value"),
            }
        }
    }

    builder.body(Body::from(resp.body)).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to build response");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    })
}

/// Health check endpoint.
async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::build_client;
    use http_body_util::BodyExt;
    use httpmock::prelude::*;
    use std::collections::HashMap;
    use tower::ServiceExt;
    use figment::providers::Format;

    fn state(json_data: Option<serde_json::Value>, token: Option<&str>, user: Option<User>) -> AppState {
        let mut secrets = HashMap::new();
        if let Some(token) = token {
            secrets.insert("accessToken".to_string(), token.to_string());
        }
        AppState {
            plugin_id: "myorg-test-app".to_string(),
            instance_settings: AppInstanceSettings {
                json_data: json_data
                    .map(|v| bytes::Bytes::from(serde_json::to_vec(&v).unwrap()))
                    .unwrap_or_default(),
                decrypted_secure_json_data: secrets,
            },
            user,
            max_body_bytes: 1024 * 1024,
            app: App::new(build_client().unwrap()),
        }
    }

    async fn send(router: Router, method: &str, uri: &str, body: &'static str) -> (StatusCode, axum::http::HeaderMap, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[test]
    fn test_state_from_config_carries_instance_settings() {
        let config: PluginConfig = figment::Figment::new()
            .merge(figment::providers::Toml::string(
                r#"
                [server]
                max_body_bytes = 2048

                [plugin]
                id = "acme-inventory-app"

                [plugin.json_data]
                backendUrl = "https://inventory.example.com/api"

                [plugin.secure_json_data]
                accessToken = "tok"

                [plugin.user]
                login = "ops"
                role = "Viewer"
                "#,
            ))
            .extract()
            .unwrap();
        let settings = config.plugin.instance_settings().unwrap();
        let state = AppState::new(&config, settings, App::new(build_client().unwrap()));

        assert_eq!(state.max_body_bytes, 2048);
        let ctx = state.plugin_context();
        assert_eq!(ctx.plugin_id, "acme-inventory-app");
        assert_eq!(ctx.app_instance_settings.decrypted_secure_json_data["accessToken"], "tok");
        let json: serde_json::Value = serde_json::from_slice(&ctx.app_instance_settings.json_data).unwrap();
        assert_eq!(json["backendUrl"], "https://inventory.example.com/api");
        assert_eq!(ctx.user.map(|u| u.login), Some("ops".to_string()));
    }

    #[tokio::test]
    async fn test_ping_over_http() {
        let router = router(state(None, None, None));
        let (status, headers, body) = send(router, "GET", "/api/plugins/myorg-test-app/resources/ping", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(body, r#"{"message": "ok"}"#);
    }

    #[tokio::test]
    async fn test_echo_over_http() {
        let router = router(state(None, None, None));
        let (status, _, body) = send(
            router,
            "POST",
            "/api/plugins/myorg-test-app/resources/echo",
            r#"{"message":"hello"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{\"message\":\"hello\"}\n");
    }

    #[tokio::test]
    async fn test_unknown_resource_and_plugin_are_not_found() {
        let (status, _, body) = send(
            router(state(None, None, None)),
            "GET",
            "/api/plugins/myorg-test-app/resources/missing",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "404 page not found\n");

        let (status, _, _) = send(
            router(state(None, None, None)),
            "GET",
            "/api/plugins/other-app/resources/ping",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = send(
            router(state(None, None, None)),
            "GET",
            "/api/plugins/myorg-test-app/resources",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health() {
        let (status, _, body) = send(router(state(None, None, None)), "GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_proxy_over_http() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PUT)
                .path("/v2/items/9")
                .query_param("dry_run", "true")
                .header("authorization", "Bearer tok")
                .header("x-grafana-user", "grafana-login:ops")
                .header("x-grafana-role", "Editor")
                .body(r#"{"qty":3}"#);
            then.status(202)
                .header("content-type", "application/json")
                .body(r#"{"accepted":true}"#);
        });

        let user = User {
            login: "ops".to_string(),
            role: "Editor".to_string(),
            ..Default::default()
        };
        let backend = serde_json::json!({ "backendUrl": format!("{}/v2", server.base_url()) });
        let router = router(state(Some(backend), Some("tok"), Some(user)));

        let (status, headers, body) = send(
            router,
            "PUT",
            "/api/plugins/myorg-test-app/resources/proxy/items/9?dry_run=true",
            r#"{"qty":3}"#,
        )
        .await;

        mock.assert();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(body, r#"{"accepted":true}"#);
    }

    #[tokio::test]
    async fn test_proxy_without_token_over_http() {
        let backend = serde_json::json!({ "backendUrl": "http://127.0.0.1:1" });
        let (status, _, body) = send(
            router(state(Some(backend), None, None)),
            "GET",
            "/api/plugins/myorg-test-app/resources/proxy/items",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "accessToken not set");
    }
}
