//! Built-in resource handlers: `ping`, `echo`, and the not-found fallback.

use std::io;

use bytes::Bytes;
use serde::Serialize;
use serde_json::ser::Formatter;

use crate::backend::{CallResourceRequest, CallResourceResponse};

const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// Answer a resource call addressed to one of the built-in routes.
///
/// Returns `None` if `path` is not a built-in route.
pub fn route(req: &CallResourceRequest) -> Option<CallResourceResponse> {
    match req.path.trim_start_matches('/') {
        "ping" => Some(handle_ping()),
        "echo" => Some(handle_echo(&req.method, &req.body)),
        _ => None,
    }
}

/// Liveness check for the plugin backend; answers every method.
pub fn handle_ping() -> CallResourceResponse {
    CallResourceResponse::new(200)
        .with_header("content-type", CONTENT_TYPE_JSON)
        .with_body(Bytes::from_static(br#"{"message": "ok"}"#))
}

/// Decode the JSON body and send it back re-encoded.
pub fn handle_echo(method: &str, body: &[u8]) -> CallResourceResponse {
    if !method.eq_ignore_ascii_case("POST") {
        return CallResourceResponse::new(405);
    }

    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "Rejecting echo request with malformed JSON");
            return text_response(400, format!("invalid JSON body: {e}\n"));
        }
    };

    let mut encoded = match encode_json(&value) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode echo response");
            return text_response(500, format!("{e}\n"));
        }
    };
    encoded.push(b'\n');

    CallResourceResponse::new(200)
        .with_header("content-type", CONTENT_TYPE_JSON)
        .with_body(encoded)
}

/// Compact JSON with `<`, `>`, `&`, U+2028 and U+2029 escaped, so the output
/// is byte-identical to what the host's own JSON encoder produces.
fn encode_json(value: &serde_json::Value) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, HtmlSafeFormatter);
    value.serialize(&mut ser)?;
    Ok(out)
}

struct HtmlSafeFormatter;

impl Formatter for HtmlSafeFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            let escaped = match c {
                '<' => "\\u003c",
                '>' => "\\u003e",
                '&' => "\\u0026",
                '\u{2028}' => "\\u2028",
                '\u{2029}' => "\\u2029",
                _ => continue,
            };
            writer.write_all(fragment[start..i].as_bytes())?;
            writer.write_all(escaped.as_bytes())?;
            start = i + c.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

pub fn not_found() -> CallResourceResponse {
    text_response(404, "404 page not found\n".to_string())
        .with_header("x-content-type-options", "nosniff")
}

fn text_response(status: u16, body: String) -> CallResourceResponse {
    CallResourceResponse::new(status)
        .with_header("content-type", CONTENT_TYPE_TEXT)
        .with_body(body)
}
