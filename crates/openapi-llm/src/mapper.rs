//! Payload mapping: from a flat argument object to a concrete HTTP request.
//!
//! Arguments are matched by name against the operation's parameters; what is
//! left belongs to the request body when the operation declares one. Path
//! values are percent-encoded into the template, query/header/cookie values
//! are serialised according to the parameter's `style` and `explode`, and the
//! body is encoded for the first supported media type the operation declares.

use crate::error::{OpenApiError, Result};
use crate::index::OperationIndex;
use crate::types::{ArgumentKind, BodyEncoding, Operation, Parameter, ParameterLocation, ParameterStyle};
use indexmap::IndexMap;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

/// Characters left unescaped in a path segment (RFC 3986 unreserved).
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Arguments partitioned by where they go in the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgumentBuckets {
    pub path: IndexMap<String, Value>,
    pub query: IndexMap<String, Value>,
    pub header: IndexMap<String, Value>,
    pub cookie: IndexMap<String, Value>,
    /// The request body, not yet encoded.
    pub body: Option<Value>,
}

/// An encoded request body.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedBody {
    /// Bytes sent as-is with the given `Content-Type`.
    Raw { media_type: String, bytes: Vec<u8> },
    /// `multipart/form-data` parts; the boundary is chosen when sending.
    Multipart { fields: Vec<MultipartField> },
}

impl EncodedBody {
    pub fn media_type(&self) -> &str {
        match self {
            EncodedBody::Raw { media_type, .. } => media_type,
            EncodedBody::Multipart { .. } => "multipart/form-data",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultipartField {
    pub name: String,
    pub value: String,
    /// Set for parts that carry JSON.
    pub media_type: Option<String>,
}

/// A fully assembled request, ready for authentication and dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    pub operation_id: String,
    pub method: Method,
    /// Server URL plus substituted path, without the query string.
    pub url: Url,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub body: Option<EncodedBody>,
}

impl InvocationRequest {
    /// The request URL including the query string.
    pub fn full_url(&self) -> Url {
        let mut url = self.url.clone();
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        url
    }

    /// All cookies joined into one `Cookie` header value.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// First header with the given name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Maps arguments for one operation.
pub struct PayloadMapper<'a> {
    operation: &'a Operation,
}

impl<'a> PayloadMapper<'a> {
    pub fn new(operation: &'a Operation) -> Self {
        Self { operation }
    }

    /// Mapper for the operation with the given id.
    pub fn for_operation(index: &'a OperationIndex, operation_id: &str) -> Result<Self> {
        Ok(Self::new(index.operation(operation_id)?))
    }

    pub fn operation(&self) -> &'a Operation {
        self.operation
    }

    /// Split arguments into path/query/header/cookie/body buckets.
    ///
    /// A `null` parameter value counts as absent. Missing required parameters
    /// fall back to their declared default.
    pub fn partition(&self, arguments: &Map<String, Value>) -> Result<ArgumentBuckets> {
        let operation = self.operation;
        let mut buckets = ArgumentBuckets::default();

        for parameter in &operation.parameters {
            // nullable parameters are optional unless they are needed for the path
            let required = parameter.required
                && (parameter.location == ParameterLocation::Path
                    || operation
                        .arguments
                        .iter()
                        .find(|argument| argument.name == parameter.name)
                        .is_none_or(|argument| argument.required));
            let value = match arguments.get(&parameter.name).filter(|v| !v.is_null()) {
                Some(value) => value.clone(),
                None => match (&parameter.default, required) {
                    (Some(default), true) => default.clone(),
                    (None, true) => {
                        return Err(self.missing(&parameter.name, &parameter.location.to_string()));
                    }
                    (_, false) => continue,
                },
            };
            let bucket = match parameter.location {
                ParameterLocation::Path => &mut buckets.path,
                ParameterLocation::Query => &mut buckets.query,
                ParameterLocation::Header => &mut buckets.header,
                ParameterLocation::Cookie => &mut buckets.cookie,
            };
            bucket.insert(parameter.name.clone(), value);
        }

        let mut remainder: Map<String, Value> = arguments
            .iter()
            .filter(|(name, _)| !operation.parameters.iter().any(|p| &p.name == *name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let Some(request_body) = &operation.request_body else {
            if let Some(argument) = remainder.keys().next() {
                return Err(OpenApiError::UnexpectedArgument {
                    operation_id: operation.operation_id.clone(),
                    argument: argument.clone(),
                });
            }
            return Ok(buckets);
        };

        let whole_body = operation
            .arguments
            .iter()
            .find(|argument| argument.kind == ArgumentKind::Body);
        if let Some(argument) = whole_body {
            let value = remainder.remove(&argument.name).filter(|v| !v.is_null());
            if let Some(extra) = remainder.keys().next() {
                return Err(OpenApiError::UnexpectedArgument {
                    operation_id: operation.operation_id.clone(),
                    argument: extra.clone(),
                });
            }
            buckets.body = match value {
                Some(value) => Some(value),
                None if argument.required => return Err(self.missing(&argument.name, "body")),
                None => None,
            };
            return Ok(buckets);
        }

        for argument in operation
            .arguments
            .iter()
            .filter(|argument| argument.kind == ArgumentKind::BodyProperty)
        {
            if !argument.nullable && remainder.get(&argument.name).is_some_and(Value::is_null) {
                remainder.remove(&argument.name);
            }
            if argument.required && !remainder.contains_key(&argument.name) {
                match &argument.default {
                    Some(default) => {
                        remainder.insert(argument.name.clone(), default.clone());
                    }
                    None => return Err(self.missing(&argument.name, "body")),
                }
            }
        }

        if !remainder.is_empty() || request_body.required {
            buckets.body = Some(Value::Object(remainder));
        }
        Ok(buckets)
    }

    /// Build the request for these arguments.
    ///
    /// `base_url` overrides the servers declared by the document.
    pub fn build_request(
        &self,
        arguments: &Map<String, Value>,
        base_url: Option<&str>,
    ) -> Result<InvocationRequest> {
        let operation = self.operation;
        let buckets = self.partition(arguments)?;

        let encoding = match (&operation.request_body, &buckets.body) {
            (Some(request_body), Some(_)) => Some(match request_body.selected_media_type() {
                Some(media_type) => (media_type.to_string(), BodyEncoding::for_media_type(media_type)),
                None if request_body.content.is_empty() => {
                    ("application/json".to_string(), Some(BodyEncoding::Json))
                }
                None => {
                    return Err(OpenApiError::UnsupportedMediaType {
                        operation_id: operation.operation_id.clone(),
                        media_types: request_body
                            .content
                            .keys()
                            .cloned()
                            .collect::<Vec<_>>()
                            .join(", "),
                    });
                }
            }),
            _ => None,
        };

        let path = self.substitute_path(&buckets.path)?;
        let url = self.resolve_url(base_url, &path)?;

        let mut query = Vec::new();
        for parameter in operation.parameters_in(ParameterLocation::Query) {
            if let Some(value) = buckets.query.get(&parameter.name) {
                query.extend(serialize_query(parameter, value));
            }
        }
        let mut headers = Vec::new();
        for parameter in operation.parameters_in(ParameterLocation::Header) {
            if let Some(value) = buckets.header.get(&parameter.name) {
                let value = serialize_simple(value, parameter.explode);
                check_header(&operation.operation_id, &parameter.name, &value)?;
                headers.push((parameter.name.clone(), value));
            }
        }
        let mut cookies = Vec::new();
        for (name, value) in &buckets.cookie {
            let value = serialize_simple(value, false);
            check_cookie(&operation.operation_id, name, &value)?;
            cookies.push((name.clone(), value));
        }

        let body = match (encoding, buckets.body) {
            (Some((media_type, Some(encoding))), Some(body)) => {
                Some(self.encode_body(&media_type, encoding, body)?)
            }
            _ => None,
        };

        let request = InvocationRequest {
            operation_id: operation.operation_id.clone(),
            method: operation.method.clone(),
            url,
            query,
            headers,
            cookies,
            body,
        };
        debug!(
            "Mapped {} to {} {}",
            operation.operation_id,
            request.method,
            request.url
        );
        Ok(request)
    }

    fn substitute_path(&self, values: &IndexMap<String, Value>) -> Result<String> {
        let operation = self.operation;
        let mut path = operation.path.clone();
        for placeholder in operation.path_placeholders() {
            let parameter = operation
                .parameters_in(ParameterLocation::Path)
                .find(|p| p.name == placeholder);
            let (Some(parameter), Some(value)) = (parameter, values.get(placeholder)) else {
                return Err(OpenApiError::PathSubstitution {
                    operation_id: operation.operation_id.clone(),
                    placeholder: placeholder.to_string(),
                    path: operation.path.clone(),
                });
            };
            let rendered = serialize_path(parameter, value);
            path = path.replace(&format!("{{{}}}", placeholder), &rendered);
        }
        Ok(path)
    }

    fn resolve_url(&self, base_url: Option<&str>, path: &str) -> Result<Url> {
        let operation = self.operation;
        let server = base_url
            .or_else(|| operation.servers.first().map(String::as_str))
            .unwrap_or_default();
        let raw = format!("{}{}", server.trim_end_matches('/'), path);
        Url::parse(&raw).map_err(|source| OpenApiError::InvalidUrl {
            operation_id: operation.operation_id.clone(),
            url: raw,
            source,
        })
    }

    fn encode_body(&self, media_type: &str, encoding: BodyEncoding, body: Value) -> Result<EncodedBody> {
        match encoding {
            BodyEncoding::Json => Ok(EncodedBody::Raw {
                media_type: media_type.to_string(),
                bytes: serde_json::to_vec(&body)?,
            }),
            BodyEncoding::Text => Ok(EncodedBody::Raw {
                media_type: media_type.to_string(),
                bytes: scalar(&body).into_bytes(),
            }),
            BodyEncoding::FormUrlEncoded => {
                let fields = self.body_fields(media_type, body)?;
                let mut form = url::form_urlencoded::Serializer::new(String::new());
                for (name, value) in &fields {
                    match value {
                        Value::Array(items) => {
                            for item in items {
                                form.append_pair(name, &scalar(item));
                            }
                        }
                        other => {
                            form.append_pair(name, &scalar(other));
                        }
                    }
                }
                Ok(EncodedBody::Raw {
                    media_type: media_type.to_string(),
                    bytes: form.finish().into_bytes(),
                })
            }
            BodyEncoding::Multipart => {
                let mut parts = Vec::new();
                for (name, value) in self.body_fields(media_type, body)? {
                    let items = match value {
                        Value::Array(items) => items,
                        other => vec![other],
                    };
                    for item in items {
                        let media_type = matches!(item, Value::Object(_) | Value::Array(_))
                            .then(|| "application/json".to_string());
                        parts.push(MultipartField {
                            name: name.clone(),
                            value: scalar(&item),
                            media_type,
                        });
                    }
                }
                Ok(EncodedBody::Multipart { fields: parts })
            }
        }
    }

    /// Form and multipart bodies must be objects.
    fn body_fields(&self, media_type: &str, body: Value) -> Result<Map<String, Value>> {
        match body {
            Value::Object(fields) => Ok(fields),
            _ => Err(OpenApiError::UnsupportedMediaType {
                operation_id: self.operation.operation_id.clone(),
                media_types: format!("{} with a non-object body", media_type),
            }),
        }
    }

    fn missing(&self, parameter: &str, location: &str) -> OpenApiError {
        OpenApiError::MissingRequiredParameter {
            operation_id: self.operation.operation_id.clone(),
            parameter: parameter.to_string(),
            location: location.to_string(),
        }
    }
}

/// Text form of a scalar; composite values are JSON-encoded.
fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// `simple` style, used for headers, cookies and by default for path values.
/// Reject header names and values reqwest would refuse when sending.
pub(crate) fn check_header(operation_id: &str, name: &str, value: &str) -> Result<()> {
    let invalid = |reason: String| OpenApiError::InvalidHeader {
        operation_id: operation_id.to_string(),
        name: name.to_string(),
        reason,
    };
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
    HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
    Ok(())
}

/// Cookie pairs end up joined in one `Cookie` header.
pub(crate) fn check_cookie(operation_id: &str, name: &str, value: &str) -> Result<()> {
    let invalid = |reason: &str| OpenApiError::InvalidHeader {
        operation_id: operation_id.to_string(),
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() || name.contains(['=', ';']) || value.contains(';') {
        return Err(invalid("cookie pair must not contain '=' in the name or ';'"));
    }
    HeaderValue::from_str(&format!("{}={}", name, value))
        .map_err(|_| invalid("cookie contains characters not allowed in a header"))?;
    Ok(())
}

fn serialize_simple(value: &Value, explode: bool) -> String {
    match value {
        Value::Array(items) => items.iter().map(scalar).collect::<Vec<_>>().join(","),
        Value::Object(fields) => fields
            .iter()
            .map(|(k, v)| {
                if explode {
                    format!("{}={}", k, scalar(v))
                } else {
                    format!("{},{}", k, scalar(v))
                }
            })
            .collect::<Vec<_>>()
            .join(","),
        other => scalar(other),
    }
}

fn serialize_path(parameter: &Parameter, value: &Value) -> String {
    let encode = |text: String| utf8_percent_encode(&text, PATH_SEGMENT).to_string();
    let items: Vec<String> = match value {
        Value::Array(items) => items.iter().map(|item| encode(scalar(item))).collect(),
        Value::Object(fields) => fields
            .iter()
            .map(|(k, v)| {
                let separator = if parameter.explode { "=" } else { "," };
                format!("{}{}{}", encode(k.clone()), separator, encode(scalar(v)))
            })
            .collect(),
        other => vec![encode(scalar(other))],
    };

    match parameter.style {
        ParameterStyle::Label => {
            let separator = if parameter.explode { "." } else { "," };
            format!(".{}", items.join(separator))
        }
        ParameterStyle::Matrix => {
            let name = encode(parameter.name.clone());
            if parameter.explode && value.is_array() {
                items.iter().map(|item| format!(";{}={}", name, item)).collect()
            } else if parameter.explode && value.is_object() {
                items.iter().map(|item| format!(";{}", item)).collect()
            } else {
                format!(";{}={}", name, items.join(","))
            }
        }
        _ => items.join(","),
    }
}

fn serialize_query(parameter: &Parameter, value: &Value) -> Vec<(String, String)> {
    let name = &parameter.name;
    match value {
        Value::Array(items) => {
            let values: Vec<String> = items.iter().map(scalar).collect();
            match parameter.style {
                ParameterStyle::SpaceDelimited if !parameter.explode => vec![(name.clone(), values.join(" "))],
                ParameterStyle::PipeDelimited if !parameter.explode => vec![(name.clone(), values.join("|"))],
                ParameterStyle::Form if !parameter.explode => vec![(name.clone(), values.join(","))],
                _ => values.into_iter().map(|v| (name.clone(), v)).collect(),
            }
        }
        Value::Object(fields) => match parameter.style {
            ParameterStyle::DeepObject => fields
                .iter()
                .map(|(k, v)| (format!("{}[{}]", name, k), scalar(v)))
                .collect(),
            _ if parameter.explode => fields.iter().map(|(k, v)| (k.clone(), scalar(v))).collect(),
            _ => vec![(name.clone(), serialize_simple(value, false))],
        },
        other => vec![(name.clone(), scalar(other))],
    }
}
