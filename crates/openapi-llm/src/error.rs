//! Error types for tool generation and invocation.

use thiserror::Error;

/// Result type for OpenAPI operations.
pub type Result<T> = std::result::Result<T, OpenApiError>;

/// Errors raised while loading a document, building tool definitions, or
/// invoking an operation.
///
/// Structural defects of the document (see [`OpenApiError::is_spec_defect`])
/// are raised at load/index/build time, before any network call is made.
#[derive(Error, Debug)]
pub enum OpenApiError {
    /// The document is unreachable, unparseable, or not OpenAPI 3.0/3.1.
    #[error("Failed to load OpenAPI spec: {0}")]
    SpecLoad(String),

    /// A `$ref` does not resolve to anything inside the document.
    #[error("Invalid reference '{pointer}': {reason}")]
    InvalidReference { pointer: String, reason: String },

    /// Two operations resolve to the same identifier.
    #[error("Duplicate operationId '{operation_id}' ({first} and {second})")]
    DuplicateOperationId {
        operation_id: String,
        first: String,
        second: String,
    },

    /// Path template placeholders and path parameters disagree.
    #[error("Operation '{operation_id}': path parameter '{parameter}' {reason}")]
    PathParameterMismatch {
        operation_id: String,
        parameter: String,
        reason: String,
    },

    /// Two arguments of one operation share a name in the flattened tool schema.
    #[error(
        "Operation '{operation_id}': argument name '{name}' is used by both {first} and {second}"
    )]
    ParameterNameCollision {
        operation_id: String,
        name: String,
        first: String,
        second: String,
    },

    /// Name sanitisation made two operations indistinguishable.
    #[error(
        "Tool name '{tool_name}' for the {dialect} dialect is produced by both '{first}' and '{second}'"
    )]
    ToolNameCollision {
        dialect: String,
        tool_name: String,
        first: String,
        second: String,
    },

    /// A provider dialect name that is not one of `openai`, `anthropic`, `cohere`.
    #[error("Unknown provider dialect '{0}', expected openai, anthropic or cohere")]
    UnknownDialect(String),

    /// No operation (or tool) with the given name exists.
    #[error("Operation '{0}' not found in OpenAPI spec")]
    OperationNotFound(String),

    /// The tool-call envelope does not contain a usable name/arguments pair.
    #[error("Invalid tool call payload: {0}")]
    InvalidToolCall(String),

    /// A required parameter or body property was not supplied.
    #[error("Operation '{operation_id}': missing required {location} parameter '{parameter}'")]
    MissingRequiredParameter {
        operation_id: String,
        parameter: String,
        location: String,
    },

    /// An argument matched no parameter and the operation has no request body.
    #[error("Operation '{operation_id}': unexpected argument '{argument}'")]
    UnexpectedArgument {
        operation_id: String,
        argument: String,
    },

    /// A header or cookie argument cannot be put on the wire as given.
    #[error("Operation '{operation_id}': invalid header '{name}': {reason}")]
    InvalidHeader {
        operation_id: String,
        name: String,
        reason: String,
    },

    /// A placeholder in the path template had no value.
    #[error("Operation '{operation_id}': no value for path placeholder '{placeholder}' in '{path}'")]
    PathSubstitution {
        operation_id: String,
        placeholder: String,
        path: String,
    },

    /// None of the request-body media types declared by the operation is supported.
    #[error("Operation '{operation_id}': unsupported request body media types [{media_types}]")]
    UnsupportedMediaType {
        operation_id: String,
        media_types: String,
    },

    /// The server URL combined with the path does not form an absolute URL.
    #[error("Operation '{operation_id}': invalid request URL '{url}': {source}")]
    InvalidUrl {
        operation_id: String,
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// No security alternative could be satisfied with the supplied credentials.
    #[error("Operation '{operation_id}': authentication failed: {reason}")]
    Authentication {
        operation_id: String,
        reason: String,
    },

    /// The HTTP call itself failed (timeout, refused connection, DNS).
    #[error("Operation '{operation_id}': transport error: {source}")]
    Transport {
        operation_id: String,
        #[source]
        source: reqwest::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OpenApiError {
    pub(crate) fn spec_load(msg: impl Into<String>) -> Self {
        OpenApiError::SpecLoad(msg.into())
    }

    pub(crate) fn invalid_reference(pointer: impl Into<String>, reason: impl Into<String>) -> Self {
        OpenApiError::InvalidReference {
            pointer: pointer.into(),
            reason: reason.into(),
        }
    }

    /// True for defects of the document itself, detected before invocation.
    pub fn is_spec_defect(&self) -> bool {
        matches!(
            self,
            OpenApiError::SpecLoad(_)
                | OpenApiError::InvalidReference { .. }
                | OpenApiError::DuplicateOperationId { .. }
                | OpenApiError::PathParameterMismatch { .. }
                | OpenApiError::ParameterNameCollision { .. }
                | OpenApiError::ToolNameCollision { .. }
        )
    }

    /// True when the network call failed; callers may retry these.
    pub fn is_transport(&self) -> bool {
        matches!(self, OpenApiError::Transport { .. })
    }

    /// The operation the error belongs to, when it is tied to one.
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            OpenApiError::PathParameterMismatch { operation_id, .. }
            | OpenApiError::ParameterNameCollision { operation_id, .. }
            | OpenApiError::MissingRequiredParameter { operation_id, .. }
            | OpenApiError::UnexpectedArgument { operation_id, .. }
            | OpenApiError::InvalidHeader { operation_id, .. }
            | OpenApiError::PathSubstitution { operation_id, .. }
            | OpenApiError::UnsupportedMediaType { operation_id, .. }
            | OpenApiError::InvalidUrl { operation_id, .. }
            | OpenApiError::Authentication { operation_id, .. }
            | OpenApiError::Transport { operation_id, .. }
            | OpenApiError::DuplicateOperationId { operation_id, .. } => Some(operation_id),
            OpenApiError::OperationNotFound(id) => Some(id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = OpenApiError::DuplicateOperationId {
            operation_id: "search".to_string(),
            first: "GET /search".to_string(),
            second: "POST /search".to_string(),
        };
        assert!(err.is_spec_defect());
        assert!(!err.is_transport());
        assert_eq!(err.operation_id(), Some("search"));

        let err = OpenApiError::MissingRequiredParameter {
            operation_id: "createPet".to_string(),
            parameter: "name".to_string(),
            location: "body".to_string(),
        };
        assert!(!err.is_spec_defect());
        assert!(err.to_string().contains("'name'"));
        assert!(err.to_string().contains("createPet"));
    }
}
