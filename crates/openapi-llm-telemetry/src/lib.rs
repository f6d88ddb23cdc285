//! # openapi-llm telemetry
//!
//! Tracing setup and span helpers for OpenAPI tool invocations.
//!
//! Spans carry OpenTelemetry semantic-convention attributes for HTTP clients
//! and generative-AI tool execution, so an exporter registered with
//! [`register_span_processor`] sees each invocation as one `execute_tool`
//! span with its method, URL and response status.

mod spans;
mod tracer;

pub use spans::{invocation_span, record_error, record_status, safe_serialize};
pub use tracer::{
    TelemetryConfig, flush_telemetry, init_logging, init_telemetry, init_with, register_span_processor,
    tracer_provider,
};

/// OpenTelemetry span attribute names.
pub mod attributes {
    // Generative AI attributes
    pub const GEN_AI_OPERATION_NAME: &str = "gen_ai.operation.name";
    pub const GEN_AI_SYSTEM: &str = "gen_ai.system";
    pub const GEN_AI_TOOL_NAME: &str = "gen_ai.tool.name";

    // HTTP client attributes
    pub const HTTP_REQUEST_METHOD: &str = "http.request.method";
    pub const HTTP_RESPONSE_STATUS_CODE: &str = "http.response.status_code";
    pub const URL_FULL: &str = "url.full";
    pub const ERROR_TYPE: &str = "error.type";

    pub const EXECUTE_TOOL: &str = "execute_tool";

    // System name constant
    pub const SYSTEM_NAME: &str = "openapi-llm";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_constants() {
        assert_eq!(attributes::GEN_AI_TOOL_NAME, "gen_ai.tool.name");
        assert_eq!(attributes::HTTP_REQUEST_METHOD, "http.request.method");
        assert_eq!(attributes::URL_FULL, "url.full");
        assert_eq!(attributes::SYSTEM_NAME, "openapi-llm");
    }
}
