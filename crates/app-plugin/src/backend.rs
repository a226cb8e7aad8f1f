//! Resource call types exchanged with the host.
//!
//! The host delivers a [`CallResourceRequest`] together with a
//! [`CallResourceResponseSender`]; handlers answer by sending exactly one
//! [`CallResourceResponse`].

use std::collections::HashMap;

use bytes::Bytes;
use http::HeaderMap;
use serde::Deserialize;

/// Multi-valued header map keyed by canonical header name.
pub type Headers = HashMap<String, Vec<String>>;

/// Per-instance app settings as stored by the host.
#[derive(Debug, Clone, Default)]
pub struct AppInstanceSettings {
    /// Raw JSON configuration blob.
    pub json_data: Bytes,
    /// Secret values, already decrypted by the host.
    pub decrypted_secure_json_data: HashMap<String, String>,
}

/// Identity of the user on whose behalf the call is made.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct User {
    pub login: String,
    pub email: String,
    pub role: String,
}

/// Metadata attached by the host to every call.
#[derive(Debug, Clone, Default)]
pub struct PluginContext {
    pub plugin_id: String,
    pub app_instance_settings: AppInstanceSettings,
    pub user: Option<User>,
}

#[derive(Debug, Clone, Default)]
pub struct CallResourceRequest {
    pub plugin_context: PluginContext,
    /// Resource path relative to the plugin's resource root, without query.
    pub path: String,
    pub method: String,
    /// Relative path including the query string.
    pub url: String,
    pub headers: Headers,
    pub body: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallResourceResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl CallResourceResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    /// Append a header value under its canonical name.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .entry(canonical_header_key(name))
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

#[cfg(test)]
impl CallResourceResponse {
    /// First value of the given header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&canonical_header_key(name))
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// Error returned when a response cannot be handed back to the host.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("response already sent")]
    AlreadySent,
}

/// Sink for the response of a resource call.
pub trait CallResourceResponseSender: Send {
    fn send(&mut self, response: CallResourceResponse) -> Result<(), SendError>;
}

/// Sender that keeps the single response it receives.
#[derive(Debug, Default)]
pub struct ResponseRecorder {
    response: Option<CallResourceResponse>,
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_response(self) -> Option<CallResourceResponse> {
        self.response
    }
}

impl CallResourceResponseSender for ResponseRecorder {
    fn send(&mut self, response: CallResourceResponse) -> Result<(), SendError> {
        if self.response.is_some() {
            return Err(SendError::AlreadySent);
        }
        self.response = Some(response);
        Ok(())
    }
}

/// Canonical MIME form of a header name: `content-type` -> `Content-Type`.
pub fn canonical_header_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}

/// Collect an [`http::HeaderMap`] into canonical multi-valued form.
///
/// Bytes that are not valid UTF-8 are replaced with U+FFFD rather than
/// dropping the whole value.
pub fn headers_from_map(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map.iter() {
        headers
            .entry(canonical_header_key(name.as_str()))
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_canonical_header_key() {
        assert_eq!(canonical_header_key("content-type"), "Content-Type");
        assert_eq!(canonical_header_key("X-GRAFANA-USER"), "X-Grafana-User");
        assert_eq!(canonical_header_key("etag"), "Etag");
        assert_eq!(canonical_header_key("Authorization"), "Authorization");
    }

    #[test]
    fn test_headers_from_map_keeps_all_values() {
        let mut map = HeaderMap::new();
        map.append("set-cookie", HeaderValue::from_static("a=1"));
        map.append("set-cookie", HeaderValue::from_static("b=2"));
        map.insert("content-type", HeaderValue::from_static("text/plain"));

        let headers = headers_from_map(&map);
        assert_eq!(headers["Set-Cookie"], vec!["a=1", "b=2"]);
        assert_eq!(headers["Content-Type"], vec!["text/plain"]);
    }

    #[test]
    fn test_headers_from_map_keeps_non_utf8_values() {
        let mut map = HeaderMap::new();
        map.insert("x-city", HeaderValue::from_bytes(b"caf\xe9").unwrap());
        map.insert("accept", HeaderValue::from_static("*/*"));

        let headers = headers_from_map(&map);
        assert_eq!(headers["X-City"], vec!["caf\u{fffd}"]);
        assert_eq!(headers["Accept"], vec!["*/*"]);
    }

    #[test]
    fn test_response_header_lookup_is_case_insensitive() {
        let resp = CallResourceResponse::new(200).with_header("content-type", "application/json");
        assert_eq!(resp.header("Content-Type"), Some("application/json"));
        assert_eq!(resp.header("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(resp.header("accept"), None);
    }

    #[test]
    fn test_recorder_rejects_second_response() {
        let mut recorder = ResponseRecorder::new();
        recorder.send(CallResourceResponse::new(200)).unwrap();
        let err = recorder.send(CallResourceResponse::new(500)).unwrap_err();
        assert!(matches!(err, SendError::AlreadySent));
        assert_eq!(recorder.into_response().map(|r| r.status), Some(200));
    }
}
