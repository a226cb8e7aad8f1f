//! Authenticated forwarding of resource calls to the upstream API.
//!
//! One resource call produces at most one upstream request. The upstream
//! status, headers and body are relayed unchanged; local failures are turned
//! into a response with a plain-text body and sent like any other answer.

use std::time::{Duration, Instant};

use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use http::{HeaderMap, Method};
use tracing::Instrument;

use super::settings::Settings;
use crate::backend::{
    headers_from_map, CallResourceRequest, CallResourceResponse, CallResourceResponseSender,
    SendError, User,
};

/// Timeout applied to every upstream request.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

pub const USER_HEADER: &str = "x-grafana-user";
pub const ROLE_HEADER: &str = "x-grafana-role";

/// Inbound headers the HTTP client derives itself from the outbound request.
const TRANSPORT_HEADERS: &[&str] = &["host", "content-length", "transfer-encoding"];

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid settings")]
    InvalidSettings(#[source] serde_json::Error),

    #[error("accessToken not set")]
    AccessTokenNotSet,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Network(#[source] reqwest::Error),

    #[error("{0}")]
    ReadBody(#[source] reqwest::Error),
}

impl ProxyError {
    /// Status code sent back to the caller for this failure.
    pub fn status(&self) -> u16 {
        match self {
            ProxyError::InvalidSettings(_)
            | ProxyError::AccessTokenNotSet
            | ProxyError::InvalidRequest(_) => 400,
            ProxyError::Network(_) | ProxyError::ReadBody(_) => 503,
        }
    }

    fn into_response(self) -> CallResourceResponse {
        CallResourceResponse::new(self.status()).with_body(self.to_string())
    }
}

/// Build the HTTP client shared by all proxied calls.
pub fn build_client() -> reqwest::Result<reqwest::Client> {
    client_with_timeout(UPSTREAM_TIMEOUT)
}

fn client_with_timeout(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// Forwards resource calls to the upstream configured in the instance settings.
///
/// Cheap to clone; clones share the client's connection pool.
#[derive(Clone)]
pub struct ProxyForwarder {
    client: reqwest::Client,
}

impl ProxyForwarder {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Forward `req` to `<backendUrl><relative_url>` and send the outcome.
    ///
    /// Only a failing sender is reported as an error. Dropping the returned
    /// future aborts the upstream request.
    pub async fn handle(
        &self,
        req: &CallResourceRequest,
        relative_url: &str,
        sender: &mut dyn CallResourceResponseSender,
    ) -> Result<(), SendError> {
        let response = match self.forward(req, relative_url).await {
            Ok(resp) => resp,
            Err(e) => {
                match e.status() {
                    400 => tracing::warn!(error = %e, "Rejecting proxy request"),
                    _ => tracing::error!(error = %e, "Upstream request failed"),
                }
                e.into_response()
            }
        };
        sender.send(response)
    }

    async fn forward(
        &self,
        req: &CallResourceRequest,
        relative_url: &str,
    ) -> Result<CallResourceResponse, ProxyError> {
        let settings = Settings::load(&req.plugin_context.app_instance_settings)
            .map_err(ProxyError::InvalidSettings)?;

        // The upstream rejects unauthenticated calls; skip the round trip.
        if settings.access_token.is_empty() {
            return Err(ProxyError::AccessTokenNotSet);
        }

        let target = settings.target_url(relative_url);
        let url = reqwest::Url::parse(&target)
            .map_err(|e| ProxyError::InvalidRequest(format!("parse {target:?}: {e}")))?;
        let method = Method::from_bytes(req.method.as_bytes())
            .map_err(|e| ProxyError::InvalidRequest(format!("method {:?}: {e}", req.method)))?;
        let headers = outbound_headers(req, &settings)?;

        let span = plugin_tracing::upstream_forward_span!(method, url.as_str());
        let start = Instant::now();

        async {
            let mut builder = self.client.request(method, url).headers(headers);
            if !req.body.is_empty() {
                builder = builder.body(req.body.clone());
            }

            let upstream = builder.send().await.map_err(ProxyError::Network)?;

            let status = upstream.status().as_u16();
            let headers = headers_from_map(upstream.headers());
            let body = upstream.bytes().await.map_err(ProxyError::ReadBody)?;

            let latency = start.elapsed().as_millis() as u64;
            tracing::Span::current().record("status", status);
            tracing::Span::current().record("latency_ms", latency);
            tracing::debug!(status, latency_ms = latency, bytes = body.len(), "Forward complete");

            Ok(CallResourceResponse {
                status,
                headers,
                body,
            })
        }
        .instrument(span)
        .await
    }
}

/// Headers for the upstream request: the caller's headers, then auth and
/// identity headers on top.
fn outbound_headers(req: &CallResourceRequest, settings: &Settings) -> Result<HeaderMap, ProxyError> {
    let mut map = HeaderMap::new();

    for (key, values) in &req.headers {
        let name = match HeaderName::from_bytes(key.as_bytes()) {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(header = %key, error = %e, "Skipping invalid header name");
                continue;
            }
        };
        if TRANSPORT_HEADERS.contains(&name.as_str()) {
            continue;
        }

        // Replace, not merge, when the caller repeats a key.
        map.remove(&name);
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(v) => {
                    map.append(name.clone(), v);
                }
                Err(e) => {
                    tracing::warn!(header = %key, error = %e, "Skipping invalid header value");
                }
            }
        }
    }

    let mut auth = header_value(&format!("Bearer {}", settings.access_token))?;
    auth.set_sensitive(true);
    map.insert(AUTHORIZATION, auth);

    if let Some(user) = &req.plugin_context.user {
        map.insert(USER_HEADER, header_value(&user_header(user))?);
        map.insert(ROLE_HEADER, header_value(&user.role)?);
    }

    Ok(map)
}

/// Identify the caller by email when known, otherwise by login.
fn user_header(user: &User) -> String {
    if user.email.is_empty() {
        format!("grafana-login:{}", user.login)
    } else {
        format!("email:{}", user.email)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ProxyError> {
    HeaderValue::from_str(value).map_err(|e| ProxyError::InvalidRequest(e.to_string()))
}
