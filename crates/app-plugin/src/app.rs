//! The app instance: dispatches resource calls to the built-in handlers or the
//! upstream proxy.

use tracing::Instrument;
use uuid::Uuid;

use crate::backend::{
    CallResourceRequest, CallResourceResponse, CallResourceResponseSender, SendError,
};
use crate::proxy::ProxyForwarder;
use crate::resources;

/// Resource path under which calls are forwarded upstream.
pub const PROXY_ROUTE: &str = "proxy";

/// One app instance. Instance settings travel with each call in the plugin
/// context, so the instance only holds the shared upstream client.
#[derive(Clone)]
pub struct App {
    proxy: ProxyForwarder,
}

impl App {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            proxy: ProxyForwarder::new(client),
        }
    }

    /// Handle one resource call, sending exactly one response.
    pub async fn call_resource(
        &self,
        req: &CallResourceRequest,
        sender: &mut dyn CallResourceResponseSender,
    ) -> Result<(), SendError> {
        let call_id = Uuid::new_v4();
        let span = plugin_tracing::resource_call_span!(call_id, req.method, req.path);
        let mut sender = StatusRecorder { inner: sender };

        async {
            tracing::debug!(plugin_id = %req.plugin_context.plugin_id, url = %req.url, "Resource call");
            let url = if req.url.is_empty() { &req.path } else { &req.url };
            if let Some(relative) = proxy_relative_url(url) {
                return self.proxy.handle(req, relative, &mut sender).await;
            }

            let response = resources::route(req).unwrap_or_else(|| {
                tracing::debug!(path = %req.path, "No resource handler");
                resources::not_found()
            });
            sender.send(response)
        }
        .instrument(span)
        .await
    }
}

/// The part of `url` after the proxy route, or `None` if `url` is not
/// addressed to the proxy.
fn proxy_relative_url(url: &str) -> Option<&str> {
    let rest = url.trim_start_matches('/').strip_prefix(PROXY_ROUTE)?;
    match rest.as_bytes().first() {
        None | Some(b'?') => Some(rest),
        Some(b'/') => Some(&rest[1..]),
        Some(_) => None,
    }
}

/// Records the sent status on the current span before passing the response on.
struct StatusRecorder<'a> {
    inner: &'a mut dyn CallResourceResponseSender,
}

impl CallResourceResponseSender for StatusRecorder<'_> {
    fn send(&mut self, response: CallResourceResponse) -> Result<(), SendError> {
        tracing::Span::current().record("status", response.status);
        self.inner.send(response)
    }
}
