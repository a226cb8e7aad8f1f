//! Span builder helpers for resource call instrumentation.

/// Create a tracing span for one inbound resource call.
///
/// Usage: `let span = resource_call_span!(call_id, method, path);`
///
/// `status` is recorded once a response has been sent.
#[macro_export]
macro_rules! resource_call_span {
    ($call_id:expr, $method:expr, $path:expr) => {
        tracing::info_span!(
            "resource_call",
            call_id = %$call_id,
            method = %$method,
            path = %$path,
            status = tracing::field::Empty,
        )
    };
}

/// Create a tracing span for the single upstream request made by the proxy.
///
/// `status` and `latency_ms` are recorded when the upstream call completes.
#[macro_export]
macro_rules! upstream_forward_span {
    ($method:expr, $target:expr) => {
        tracing::info_span!(
            "upstream_forward",
            method = %$method,
            target = %$target,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}
