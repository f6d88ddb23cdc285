//! Operation index: one [`Operation`] per (path, method) pair.
//!
//! Everything an invocation needs is resolved here, once: parameters are
//! merged and their schemas resolved through the [`SchemaResolver`], the
//! request body's media types are recorded, security and servers are
//! inherited, and the flat argument namespace the model fills in is
//! computed. Structural defects of the document surface from
//! [`OperationIndex::build`], before any request is attempted.

use crate::error::{OpenApiError, Result};
use crate::schema::{SchemaGraph, SchemaId, SchemaResolver};
use crate::spec::Specification;
use crate::types::{
    Argument, ArgumentKind, Operation, Parameter, ParameterLocation, ParameterStyle, RequestBody,
    SecurityRequirement, path_placeholders,
};
use indexmap::IndexMap;
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

const METHODS: [&str; 8] = ["get", "put", "post", "delete", "options", "head", "patch", "trace"];

/// Header parameters the OpenAPI specification says to ignore.
const IGNORED_HEADERS: [&str; 3] = ["accept", "content-type", "authorization"];

/// Operations of a document keyed by operation identifier, in document order.
#[derive(Debug, Clone)]
pub struct OperationIndex {
    operations: IndexMap<String, Operation>,
    schemas: SchemaGraph,
}

impl OperationIndex {
    /// Index every operation of the document.
    pub fn build(spec: &Specification) -> Result<Self> {
        let mut builder = IndexBuilder {
            spec,
            resolver: SchemaResolver::new(spec),
            operations: IndexMap::new(),
            labels: HashMap::new(),
        };

        if let Some(paths) = spec.document().get("paths").and_then(Value::as_object) {
            for (path, item) in paths {
                builder.add_path(path, item)?;
            }
        }

        let IndexBuilder {
            resolver,
            operations,
            ..
        } = builder;
        let schemas = resolver.finish();
        info!(
            "Indexed {} operation(s), {} schema node(s)",
            operations.len(),
            schemas.len()
        );
        Ok(Self {
            operations,
            schemas,
        })
    }

    pub fn get(&self, operation_id: &str) -> Option<&Operation> {
        self.operations.get(operation_id)
    }

    /// Like [`get`](Self::get), failing with `OperationNotFound`.
    pub fn operation(&self, operation_id: &str) -> Result<&Operation> {
        self.get(operation_id)
            .ok_or_else(|| OpenApiError::OperationNotFound(operation_id.to_string()))
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }

    /// The schema graph all operations point into.
    pub fn schemas(&self) -> &SchemaGraph {
        &self.schemas
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

struct IndexBuilder<'a> {
    spec: &'a Specification,
    resolver: SchemaResolver<'a>,
    operations: IndexMap<String, Operation>,
    /// operation id -> "METHOD /path", for duplicate reporting
    labels: HashMap<String, String>,
}

impl<'a> IndexBuilder<'a> {
    fn add_path(&mut self, path: &str, item: &'a Value) -> Result<()> {
        let item = self.spec.deref(item)?;
        let shared_parameters = self.parameter_values(item.get("parameters"))?;
        let path_servers = self.spec.server_urls(item.get("servers"));

        for method in METHODS {
            let Some(raw) = item.get(method) else {
                continue;
            };
            let operation = self.build_operation(path, method, raw, &shared_parameters, &path_servers)?;
            let label = operation.label();
            if let Some(first) = self.labels.get(&operation.operation_id) {
                return Err(OpenApiError::DuplicateOperationId {
                    operation_id: operation.operation_id,
                    first: first.clone(),
                    second: label,
                });
            }
            debug!("Indexed operation {} ({})", operation.operation_id, label);
            self.labels.insert(operation.operation_id.clone(), label);
            self.operations.insert(operation.operation_id.clone(), operation);
        }
        Ok(())
    }

    fn build_operation(
        &mut self,
        path: &str,
        method: &str,
        raw: &'a Value,
        shared_parameters: &[&'a Value],
        path_servers: &[String],
    ) -> Result<Operation> {
        let operation_id = raw
            .get("operationId")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| synthesize_operation_id(method, path));

        // Operation-level entries replace path-level ones with the same name and location.
        let mut raw_parameters: Vec<&Value> = shared_parameters.to_vec();
        for parameter in self.parameter_values(raw.get("parameters"))? {
            let key = parameter_key(parameter);
            match raw_parameters.iter().position(|p| parameter_key(p) == key) {
                Some(pos) => raw_parameters[pos] = parameter,
                None => raw_parameters.push(parameter),
            }
        }

        let mut parameters = Vec::with_capacity(raw_parameters.len());
        for raw_parameter in raw_parameters {
            if let Some(parameter) = self.build_parameter(&operation_id, raw_parameter)? {
                parameters.push(parameter);
            }
        }
        check_path_parameters(&operation_id, path, &parameters)?;

        let request_body = match raw.get("requestBody") {
            Some(body) => Some(self.build_request_body(body)?),
            None => None,
        };

        let security = match raw.get("security") {
            Some(security) => parse_security(security),
            None => parse_security(self.spec.document().get("security").unwrap_or(&Value::Null)),
        };

        let operation_servers = self.spec.server_urls(raw.get("servers"));
        let servers = if !operation_servers.is_empty() {
            operation_servers
        } else if !path_servers.is_empty() {
            path_servers.to_vec()
        } else {
            self.spec.servers().to_vec()
        };

        let text = |key: &str| {
            raw.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };
        let method = parse_method(method);
        let description = text("description")
            .or_else(|| text("summary"))
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} {}", method, path));

        let arguments = flatten_arguments(
            &operation_id,
            &parameters,
            request_body.as_ref(),
            self.resolver.graph(),
        )?;

        Ok(Operation {
            operation_id,
            method,
            path: path.to_string(),
            description,
            parameters,
            request_body,
            security,
            servers,
            deprecated: raw.get("deprecated").and_then(Value::as_bool).unwrap_or(false),
            arguments,
        })
    }

    fn parameter_values(&self, parameters: Option<&'a Value>) -> Result<Vec<&'a Value>> {
        let Some(parameters) = parameters.and_then(Value::as_array) else {
            return Ok(Vec::new());
        };
        parameters
            .iter()
            .map(|parameter| self.spec.deref(parameter))
            .collect()
    }

    fn build_parameter(&mut self, operation_id: &str, raw: &Value) -> Result<Option<Parameter>> {
        let (Some(name), Some(location)) = (
            raw.get("name").and_then(Value::as_str),
            raw.get("in").and_then(Value::as_str),
        ) else {
            warn!("Operation {}: skipping parameter without name or location", operation_id);
            return Ok(None);
        };
        let Some(location) = ParameterLocation::parse(location) else {
            warn!(
                "Operation {}: skipping parameter '{}' with unknown location '{}'",
                operation_id, name, location
            );
            return Ok(None);
        };
        if location == ParameterLocation::Header
            && IGNORED_HEADERS.contains(&name.to_ascii_lowercase().as_str())
        {
            debug!("Operation {}: ignoring reserved header parameter '{}'", operation_id, name);
            return Ok(None);
        }

        // `content` maps are an alternative to `schema`; use the first media type.
        let schema_value = raw.get("schema").or_else(|| {
            raw.get("content")
                .and_then(Value::as_object)
                .and_then(|content| content.values().next())
                .and_then(|media| media.get("schema"))
        });
        let schema = match schema_value {
            Some(value) => Some(self.resolver.resolve(value)?),
            None => None,
        };
        let default = schema.and_then(|id| self.resolver.graph().node(id).default.clone());

        let style = raw
            .get("style")
            .and_then(Value::as_str)
            .and_then(ParameterStyle::parse)
            .unwrap_or_else(|| ParameterStyle::default_for(location));
        let explode = raw
            .get("explode")
            .and_then(Value::as_bool)
            .unwrap_or(style == ParameterStyle::Form);

        Ok(Some(Parameter {
            name: name.to_string(),
            location,
            required: location == ParameterLocation::Path
                || raw.get("required").and_then(Value::as_bool).unwrap_or(false),
            schema,
            default,
            description: raw.get("description").and_then(Value::as_str).map(str::to_string),
            style,
            explode,
            deprecated: raw.get("deprecated").and_then(Value::as_bool).unwrap_or(false),
        }))
    }

    fn build_request_body(&mut self, raw: &Value) -> Result<RequestBody> {
        let raw = self.spec.deref(raw)?;
        let mut content = IndexMap::new();
        if let Some(media_types) = raw.get("content").and_then(Value::as_object) {
            for (media_type, media) in media_types {
                let schema = match media.get("schema") {
                    Some(schema) => Some(self.resolver.resolve(schema)?),
                    None => None,
                };
                content.insert(media_type.clone(), schema);
            }
        }
        Ok(RequestBody {
            content,
            required: raw.get("required").and_then(Value::as_bool).unwrap_or(false),
            description: raw.get("description").and_then(Value::as_str).map(str::to_string),
        })
    }
}

fn parameter_key(parameter: &Value) -> (Option<&str>, Option<&str>) {
    (
        parameter.get("name").and_then(Value::as_str),
        parameter.get("in").and_then(Value::as_str),
    )
}

fn parse_method(method: &str) -> Method {
    match method {
        "get" => Method::GET,
        "put" => Method::PUT,
        "post" => Method::POST,
        "delete" => Method::DELETE,
        "options" => Method::OPTIONS,
        "head" => Method::HEAD,
        "patch" => Method::PATCH,
        _ => Method::TRACE,
    }
}

/// `{method}_{path}` with every run of non-alphanumeric characters collapsed
/// to `_`, e.g. `get_users_id` for `GET /users/{id}`.
pub(crate) fn synthesize_operation_id(method: &str, path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_ascii_alphanumeric() {
            normalized.push(c);
        } else if !normalized.ends_with('_') {
            normalized.push('_');
        }
    }
    let normalized = normalized.trim_matches('_');
    let normalized = if normalized.is_empty() { "root" } else { normalized };
    format!("{}_{}", method.to_ascii_lowercase(), normalized)
}

fn check_path_parameters(operation_id: &str, path: &str, parameters: &[Parameter]) -> Result<()> {
    let placeholders = path_placeholders(path);
    for placeholder in &placeholders {
        let declared = parameters
            .iter()
            .any(|p| p.location == ParameterLocation::Path && p.name == *placeholder);
        if !declared {
            return Err(OpenApiError::PathParameterMismatch {
                operation_id: operation_id.to_string(),
                parameter: placeholder.to_string(),
                reason: format!("appears in '{}' but is not declared", path),
            });
        }
    }
    for parameter in parameters.iter().filter(|p| p.location == ParameterLocation::Path) {
        if !placeholders.contains(&parameter.name.as_str()) {
            return Err(OpenApiError::PathParameterMismatch {
                operation_id: operation_id.to_string(),
                parameter: parameter.name.clone(),
                reason: format!("is declared but does not appear in '{}'", path),
            });
        }
    }
    Ok(())
}

fn parse_security(value: &Value) -> Vec<SecurityRequirement> {
    let Some(alternatives) = value.as_array() else {
        return Vec::new();
    };
    alternatives
        .iter()
        .filter_map(Value::as_object)
        .map(|alternative| SecurityRequirement {
            schemes: alternative
                .iter()
                .map(|(name, scopes)| {
                    let scopes = scopes
                        .as_array()
                        .map(|s| s.iter().filter_map(Value::as_str).map(str::to_string).collect())
                        .unwrap_or_default();
                    (name.clone(), scopes)
                })
                .collect(),
        })
        .collect()
}

/// Merge parameters and request-body properties into one namespace.
fn flatten_arguments(
    operation_id: &str,
    parameters: &[Parameter],
    body: Option<&RequestBody>,
    graph: &SchemaGraph,
) -> Result<Vec<Argument>> {
    let nullable = |schema: Option<SchemaId>| schema.is_some_and(|id| graph.node(id).nullable);
    let mut arguments: Vec<Argument> = Vec::new();

    let push = |arguments: &mut Vec<Argument>, argument: Argument| -> Result<()> {
        if let Some(existing) = arguments.iter().find(|a| a.name == argument.name) {
            return Err(OpenApiError::ParameterNameCollision {
                operation_id: operation_id.to_string(),
                name: argument.name,
                first: existing.kind.to_string(),
                second: argument.kind.to_string(),
            });
        }
        arguments.push(argument);
        Ok(())
    };

    for parameter in parameters {
        let is_nullable = nullable(parameter.schema);
        push(
            &mut arguments,
            Argument {
                name: parameter.name.clone(),
                kind: ArgumentKind::Parameter(parameter.location),
                schema: parameter.schema,
                // a path placeholder cannot be left empty
                required: parameter.required
                    && (parameter.location == ParameterLocation::Path || !is_nullable),
                nullable: is_nullable,
                default: parameter.default.clone(),
                description: parameter.description.clone(),
            },
        )?;
    }

    let Some(body) = body else {
        return Ok(arguments);
    };
    let schema = body.schema();
    match schema.and_then(|id| graph.object_shape(id)) {
        Some(shape) => {
            for (name, property) in &shape.properties {
                let node = graph.node(*property);
                push(
                    &mut arguments,
                    Argument {
                        name: name.clone(),
                        kind: ArgumentKind::BodyProperty,
                        schema: Some(*property),
                        required: shape.required.contains(name) && !node.nullable,
                        nullable: node.nullable,
                        default: node.default.clone(),
                        description: node.description.clone(),
                    },
                )?;
            }
        }
        None => {
            let is_nullable = nullable(schema);
            push(
                &mut arguments,
                Argument {
                    name: "body".to_string(),
                    kind: ArgumentKind::Body,
                    schema,
                    required: body.required && !is_nullable,
                    nullable: is_nullable,
                    default: None,
                    description: body.description.clone(),
                },
            )?;
        }
    }
    Ok(arguments)
}
