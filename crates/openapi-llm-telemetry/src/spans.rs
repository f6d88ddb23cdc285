//! Span helpers for tool invocations

use crate::attributes::*;
use tracing::Span;

/// Span covering one HTTP call made for a tool invocation.
///
/// The URL must not carry credentials; callers pass it without the query
/// string. Status and error are recorded later with [`record_status`] and
/// [`record_error`].
pub fn invocation_span(operation_id: &str, method: &str, url: &str) -> Span {
    tracing::info_span!(
        "execute_tool",
        { GEN_AI_SYSTEM } = SYSTEM_NAME,
        { GEN_AI_OPERATION_NAME } = EXECUTE_TOOL,
        { GEN_AI_TOOL_NAME } = %operation_id,
        { HTTP_REQUEST_METHOD } = %method,
        { URL_FULL } = %url,
        { HTTP_RESPONSE_STATUS_CODE } = tracing::field::Empty,
        { ERROR_TYPE } = tracing::field::Empty,
    )
}

/// Record the HTTP response status on an invocation span.
pub fn record_status(span: &Span, status: u16) {
    span.record(HTTP_RESPONSE_STATUS_CODE, status);
}

/// Record a transport failure on an invocation span.
pub fn record_error(span: &Span, error: &dyn std::fmt::Display) {
    span.record(ERROR_TYPE, tracing::field::display(error));
}

/// Helper to safely serialize to JSON string
pub fn safe_serialize<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "<not serializable>".to_string())
}
