//! Data structures shared by the operation index, the tool builder and the
//! invocation path.

use crate::schema::SchemaId;
use indexmap::IndexMap;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Location where a parameter appears in the request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    /// Path parameter (e.g., /users/{id})
    Path,
    /// Query parameter (e.g., ?search=value)
    Query,
    /// Header parameter (e.g., X-Custom-Header)
    Header,
    /// Cookie parameter
    Cookie,
}

impl ParameterLocation {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "path" => Some(ParameterLocation::Path),
            "query" => Some(ParameterLocation::Query),
            "header" => Some(ParameterLocation::Header),
            "cookie" => Some(ParameterLocation::Cookie),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParameterLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterLocation::Path => write!(f, "path"),
            ParameterLocation::Query => write!(f, "query"),
            ParameterLocation::Header => write!(f, "header"),
            ParameterLocation::Cookie => write!(f, "cookie"),
        }
    }
}

/// Serialisation style of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterStyle {
    Form,
    Simple,
    DeepObject,
    SpaceDelimited,
    PipeDelimited,
    Matrix,
    Label,
}

impl ParameterStyle {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "form" => Some(ParameterStyle::Form),
            "simple" => Some(ParameterStyle::Simple),
            "deepObject" => Some(ParameterStyle::DeepObject),
            "spaceDelimited" => Some(ParameterStyle::SpaceDelimited),
            "pipeDelimited" => Some(ParameterStyle::PipeDelimited),
            "matrix" => Some(ParameterStyle::Matrix),
            "label" => Some(ParameterStyle::Label),
            _ => None,
        }
    }

    /// Default style for a location.
    pub(crate) fn default_for(location: ParameterLocation) -> Self {
        match location {
            ParameterLocation::Query | ParameterLocation::Cookie => ParameterStyle::Form,
            ParameterLocation::Path | ParameterLocation::Header => ParameterStyle::Simple,
        }
    }
}

/// Represents a parameter in an API operation.
#[derive(Debug, Clone)]
pub struct Parameter {
    /// Name as declared in the document; also the argument name.
    pub name: String,
    /// Location of the parameter
    pub location: ParameterLocation,
    /// Whether the parameter is required
    pub required: bool,
    /// Resolved schema, if one was declared
    pub schema: Option<SchemaId>,
    /// Default value taken from the schema
    pub default: Option<Value>,
    /// Description of the parameter
    pub description: Option<String>,
    pub style: ParameterStyle,
    pub explode: bool,
    pub deprecated: bool,
}

/// A request body: the declared media types and their schemas.
#[derive(Debug, Clone)]
pub struct RequestBody {
    /// Media type -> schema, in declaration order.
    pub content: IndexMap<String, Option<SchemaId>>,
    pub required: bool,
    pub description: Option<String>,
}

impl RequestBody {
    /// The first declared media type the invocation path can encode.
    pub fn selected_media_type(&self) -> Option<&str> {
        self.content
            .keys()
            .map(String::as_str)
            .find(|media_type| BodyEncoding::for_media_type(media_type).is_some())
    }

    /// Schema of the selected media type, falling back to the first declared one.
    pub fn schema(&self) -> Option<SchemaId> {
        self.selected_media_type()
            .and_then(|media_type| self.content.get(media_type).copied().flatten())
            .or_else(|| self.content.values().next().copied().flatten())
    }
}

/// How a request body is encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Json,
    FormUrlEncoded,
    Multipart,
    Text,
}

impl BodyEncoding {
    pub fn for_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/json" | "*/*" | "application/*" => Some(BodyEncoding::Json),
            "application/x-www-form-urlencoded" => Some(BodyEncoding::FormUrlEncoded),
            "multipart/form-data" => Some(BodyEncoding::Multipart),
            "text/plain" => Some(BodyEncoding::Text),
            other if other.ends_with("+json") => Some(BodyEncoding::Json),
            _ => None,
        }
    }
}

/// One security alternative: every listed scheme must be satisfied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityRequirement {
    /// Scheme name (from components.securitySchemes) -> required scopes
    pub schemes: IndexMap<String, Vec<String>>,
}

impl SecurityRequirement {
    /// An empty requirement (`{}`) makes authentication optional.
    pub fn is_empty(&self) -> bool {
        self.schemes.is_empty()
    }
}

/// Location where an API key is provided.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthLocation {
    /// In HTTP header
    Header,
    /// In URL query parameter
    Query,
    /// In a cookie
    Cookie,
}

/// A security scheme declared in `components.securitySchemes`.
#[derive(Debug, Clone, PartialEq)]
pub enum SecurityScheme {
    ApiKey { name: String, location: AuthLocation },
    HttpBasic,
    HttpBearer,
    /// OAuth2 or OpenID Connect; a pre-obtained token is sent as a bearer token.
    OAuth2,
    Unsupported { kind: String },
}

/// Where an argument of the flattened tool schema ends up in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    Parameter(ParameterLocation),
    /// A top-level property of an object request body.
    BodyProperty,
    /// The whole request body, for non-object body schemas.
    Body,
}

impl std::fmt::Display for ArgumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgumentKind::Parameter(location) => write!(f, "{} parameter", location),
            ArgumentKind::BodyProperty => write!(f, "body property"),
            ArgumentKind::Body => write!(f, "request body"),
        }
    }
}

/// One entry of the flat argument namespace the model fills in.
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: String,
    pub kind: ArgumentKind,
    pub schema: Option<SchemaId>,
    /// Required and not nullable.
    pub required: bool,
    pub nullable: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

/// An indexed OpenAPI operation.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Declared or synthesized operation identifier, unique in the document.
    pub operation_id: String,
    pub method: Method,
    /// Path template (e.g., "/users/{id}")
    pub path: String,
    /// Human-readable description used for the tool definition
    pub description: String,
    /// Path-level and operation-level parameters, merged
    pub parameters: Vec<Parameter>,
    pub request_body: Option<RequestBody>,
    /// Security alternatives; an empty list means no authentication.
    pub security: Vec<SecurityRequirement>,
    /// Candidate server URLs, most specific first.
    pub servers: Vec<String>,
    pub deprecated: bool,
    /// Flattened argument namespace (parameters, then body properties).
    pub arguments: Vec<Argument>,
}

impl Operation {
    /// Parameters declared at the given location.
    pub fn parameters_in(&self, location: ParameterLocation) -> impl Iterator<Item = &Parameter> {
        self.parameters
            .iter()
            .filter(move |p| p.location == location)
    }

    /// `{name}` placeholders of the path template, in order.
    pub fn path_placeholders(&self) -> Vec<&str> {
        path_placeholders(&self.path)
    }

    /// Human-readable "METHOD /path" label.
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

pub(crate) fn path_placeholders(path: &str) -> Vec<&str> {
    let mut placeholders = Vec::new();
    let mut rest = path;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        placeholders.push(&rest[start + 1..start + len]);
        rest = &rest[start + len + 1..];
    }
    placeholders
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_placeholders() {
        assert_eq!(path_placeholders("/users/{id}/posts/{postId}"), vec!["id", "postId"]);
        assert!(path_placeholders("/users").is_empty());
        assert_eq!(path_placeholders("/files/{name}.{ext}"), vec!["name", "ext"]);
    }

    #[test]
    fn test_body_encoding_for_media_type() {
        assert_eq!(BodyEncoding::for_media_type("application/json"), Some(BodyEncoding::Json));
        assert_eq!(
            BodyEncoding::for_media_type("application/merge-patch+json"),
            Some(BodyEncoding::Json)
        );
        assert_eq!(
            BodyEncoding::for_media_type("application/x-www-form-urlencoded; charset=utf-8"),
            Some(BodyEncoding::FormUrlEncoded)
        );
        assert_eq!(BodyEncoding::for_media_type("multipart/form-data"), Some(BodyEncoding::Multipart));
        assert_eq!(BodyEncoding::for_media_type("application/octet-stream"), None);
    }

    #[test]
    fn test_selected_media_type_prefers_declaration_order() {
        let mut content = IndexMap::new();
        content.insert("application/octet-stream".to_string(), None);
        content.insert("application/x-www-form-urlencoded".to_string(), None);
        content.insert("application/json".to_string(), None);
        let body = RequestBody {
            content,
            required: true,
            description: None,
        };
        assert_eq!(body.selected_media_type(), Some("application/x-www-form-urlencoded"));
    }
}
