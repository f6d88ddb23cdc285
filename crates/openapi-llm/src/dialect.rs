//! Provider dialects for tool definitions.
//!
//! Every dialect renders an [`Operation`]'s flat argument namespace; they
//! differ in the envelope, the field holding the argument schema, the shape of
//! that schema (JSON Schema for OpenAI and Anthropic, a flat parameter listing
//! for Cohere) and the characters allowed in a tool name.
//!
//! Recursive schemas are cut where the walk reaches a node it is already
//! inside of, or after [`MAX_SCHEMA_DEPTH`] levels. Within one argument an
//! object or composition node is expanded at most once; later occurrences are
//! cut as well, which keeps densely connected component graphs linear in the
//! number of schemas. The cut is replaced by an accept-any schema (`{}`),
//! keeping only the node's description, so a model may send any value at that
//! position.

use crate::error::{OpenApiError, Result};
use crate::schema::{SchemaGraph, SchemaId, SchemaType};
use crate::types::{Argument, Operation};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::str::FromStr;

/// Maximum nesting rendered for a single argument schema.
pub const MAX_SCHEMA_DEPTH: usize = 16;

/// Maximum length of tool and parameter descriptions, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 1024;

/// Maximum length of a tool name.
pub const MAX_NAME_LEN: usize = 64;

/// LLM provider function-calling dialect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `{type: "function", function: {name, description, parameters}}`
    #[default]
    OpenAi,
    /// `{name, description, input_schema}`
    Anthropic,
    /// `{name, description, parameter_definitions}`
    Cohere,
}

impl Dialect {
    pub const ALL: [Dialect; 3] = [Dialect::OpenAi, Dialect::Anthropic, Dialect::Cohere];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::OpenAi => "openai",
            Dialect::Anthropic => "anthropic",
            Dialect::Cohere => "cohere",
        }
    }

    /// Field of a tool call that carries the arguments in this dialect.
    pub fn arguments_field(&self) -> &'static str {
        match self {
            Dialect::OpenAi => "arguments",
            Dialect::Anthropic => "input",
            Dialect::Cohere => "parameters",
        }
    }

    /// Make an operation identifier acceptable as a tool name.
    ///
    /// Runs of disallowed characters become a single `_`, leading and trailing
    /// underscores are trimmed and the result is cut to 64 characters.
    pub fn sanitize_name(&self, name: &str) -> String {
        let allow_hyphen = !matches!(self, Dialect::Cohere);
        let mut sanitized = String::with_capacity(name.len());
        for c in name.chars() {
            if c.is_ascii_alphanumeric() || c == '_' || (allow_hyphen && c == '-') {
                sanitized.push(c);
            } else if !sanitized.ends_with('_') {
                sanitized.push('_');
            }
        }
        let trimmed = sanitized.trim_matches('_');
        let truncated = &trimmed[..trimmed.len().min(MAX_NAME_LEN)];
        if truncated.is_empty() {
            "tool".to_string()
        } else {
            truncated.to_string()
        }
    }

    /// Render one operation as a tool definition in this dialect.
    pub fn render(&self, operation: &Operation, graph: &SchemaGraph) -> ToolDefinition {
        let parameters = match self {
            Dialect::OpenAi | Dialect::Anthropic => {
                JsonSchemaRenderer::new(graph).arguments(&operation.arguments)
            }
            Dialect::Cohere => CohereRenderer::new(graph).arguments(&operation.arguments),
        };
        ToolDefinition {
            dialect: *self,
            name: self.sanitize_name(&operation.operation_id),
            operation_id: operation.operation_id.clone(),
            description: truncate(&operation.description),
            parameters,
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = OpenApiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Dialect::OpenAi),
            "anthropic" => Ok(Dialect::Anthropic),
            "cohere" => Ok(Dialect::Cohere),
            _ => Err(OpenApiError::UnknownDialect(s.to_string())),
        }
    }
}

/// A provider-specific tool definition for one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub dialect: Dialect,
    /// Sanitised tool name the model calls.
    pub name: String,
    /// The operation the tool invokes.
    pub operation_id: String,
    pub description: String,
    /// JSON Schema (OpenAI, Anthropic) or parameter definitions (Cohere).
    pub parameters: Value,
}

impl ToolDefinition {
    /// The definition in the provider's wire format.
    pub fn to_json(&self) -> Value {
        match self.dialect {
            Dialect::OpenAi => json!({
                "type": "function",
                "function": {
                    "name": self.name,
                    "description": self.description,
                    "parameters": self.parameters,
                }
            }),
            Dialect::Anthropic => json!({
                "name": self.name,
                "description": self.description,
                "input_schema": self.parameters,
            }),
            Dialect::Cohere => json!({
                "name": self.name,
                "description": self.description,
                "parameter_definitions": self.parameters,
            }),
        }
    }
}

impl Serialize for ToolDefinition {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_DESCRIPTION_LEN) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

/// Cycle-guarded walk over the schema graph producing JSON Schema.
struct JsonSchemaRenderer<'g> {
    graph: &'g SchemaGraph,
    visiting: Vec<SchemaId>,
    expanded: HashSet<SchemaId>,
}

impl<'g> JsonSchemaRenderer<'g> {
    fn new(graph: &'g SchemaGraph) -> Self {
        Self {
            graph,
            visiting: Vec::new(),
            expanded: HashSet::new(),
        }
    }

    fn arguments(&mut self, arguments: &[Argument]) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for argument in arguments {
            self.expanded.clear();
            let mut schema = match argument.schema {
                Some(id) => self.schema(id),
                None => json!({}),
            };
            if let (Some(description), Some(object)) = (&argument.description, schema.as_object_mut()) {
                object.insert("description".to_string(), Value::String(truncate(description)));
            }
            if let (Some(default), Some(object)) = (&argument.default, schema.as_object_mut()) {
                object.entry("default").or_insert_with(|| default.clone());
            }
            properties.insert(argument.name.clone(), schema);
            if argument.required {
                required.push(Value::String(argument.name.clone()));
            }
        }

        let mut schema = Map::new();
        schema.insert("type".to_string(), json!("object"));
        schema.insert("properties".to_string(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".to_string(), Value::Array(required));
        }
        Value::Object(schema)
    }

    fn schema(&mut self, id: SchemaId) -> Value {
        let graph = self.graph;
        let node = graph.node(id);
        let shape = graph.object_shape(id);
        let composite = shape.is_some()
            || !node.all_of.is_empty()
            || !node.any_of.is_empty()
            || !node.one_of.is_empty();
        if self.visiting.contains(&id)
            || self.visiting.len() >= MAX_SCHEMA_DEPTH
            || (composite && !self.expanded.insert(id))
        {
            return match &node.description {
                Some(description) => json!({"description": truncate(description)}),
                None => json!({}),
            };
        }
        self.visiting.push(id);

        let mut out = Map::new();
        let types: Vec<&str> = match (node.types.as_slice(), &shape) {
            ([], Some(_)) => vec![SchemaType::Object.as_str()],
            ([], None) => node.primary_type().map(|t| t.as_str()).into_iter().collect(),
            (declared, _) => declared.iter().map(SchemaType::as_str).collect(),
        };
        match (types.as_slice(), node.nullable) {
            ([], _) => {}
            ([single], false) => {
                out.insert("type".to_string(), json!(single));
            }
            (many, nullable) => {
                let mut list: Vec<Value> = many.iter().map(|t| json!(t)).collect();
                if nullable {
                    list.push(json!("null"));
                }
                out.insert("type".to_string(), Value::Array(list));
            }
        }

        if let Some(description) = &node.description {
            out.insert("description".to_string(), json!(truncate(description)));
        }
        if let Some(format) = &node.format {
            out.insert("format".to_string(), json!(format));
        }
        if let Some(pattern) = &node.pattern {
            out.insert("pattern".to_string(), json!(pattern));
        }
        if !node.enum_values.is_empty() {
            let mut values = node.enum_values.clone();
            if node.nullable {
                values.push(Value::Null);
            }
            out.insert("enum".to_string(), Value::Array(values));
        }
        if let Some(default) = &node.default {
            out.insert("default".to_string(), default.clone());
        }

        if let Some(shape) = shape {
            let mut properties = Map::new();
            let mut required = Vec::new();
            for (name, property) in &shape.properties {
                properties.insert(name.clone(), self.schema(*property));
                if shape.required.contains(name) && !graph.node(*property).nullable {
                    required.push(json!(name));
                }
            }
            out.insert("properties".to_string(), Value::Object(properties));
            if !required.is_empty() {
                out.insert("required".to_string(), Value::Array(required));
            }
            if let Some(additional) = node.additional_properties {
                let additional = self.schema(additional);
                out.insert("additionalProperties".to_string(), additional);
            }
        } else if !node.all_of.is_empty() {
            let members = self.members(&node.all_of);
            out.insert("allOf".to_string(), members);
        }
        if let Some(items) = node.items {
            let items = self.schema(items);
            out.insert("items".to_string(), items);
        }
        if !node.any_of.is_empty() {
            let members = self.members(&node.any_of);
            out.insert("anyOf".to_string(), members);
        }
        if !node.one_of.is_empty() {
            let members = self.members(&node.one_of);
            out.insert("oneOf".to_string(), members);
        }

        self.visiting.pop();
        Value::Object(out)
    }

    fn members(&mut self, members: &[SchemaId]) -> Value {
        Value::Array(members.iter().map(|member| self.schema(*member)).collect())
    }
}

/// Renders Cohere `parameter_definitions`.
struct CohereRenderer<'g> {
    graph: &'g SchemaGraph,
    visiting: Vec<SchemaId>,
    expanded: HashSet<SchemaId>,
}

impl<'g> CohereRenderer<'g> {
    fn new(graph: &'g SchemaGraph) -> Self {
        Self {
            graph,
            visiting: Vec::new(),
            expanded: HashSet::new(),
        }
    }

    fn arguments(&mut self, arguments: &[Argument]) -> Value {
        let mut definitions = Map::new();
        for argument in arguments {
            self.expanded.clear();
            let description = argument
                .description
                .clone()
                .or_else(|| argument.schema.and_then(|id| self.graph.node(id).description.clone()))
                .unwrap_or_default();
            definitions.insert(
                argument.name.clone(),
                self.definition(argument.schema, argument.required, &description),
            );
        }
        Value::Object(definitions)
    }

    fn definition(&mut self, id: Option<SchemaId>, required: bool, description: &str) -> Value {
        let mut out = Map::new();
        out.insert("type".to_string(), json!(self.type_name(id)));
        out.insert("description".to_string(), json!(truncate(description)));

        if let Some(id) = id {
            let cut = self.visiting.contains(&id) || self.visiting.len() >= MAX_SCHEMA_DEPTH;
            let shape = self.graph.object_shape(id);
            if let (false, Some(shape)) = (cut, shape)
                && self.expanded.insert(id)
            {
                self.visiting.push(id);
                let mut properties = Map::new();
                for (name, property) in &shape.properties {
                    let node = self.graph.node(*property);
                    let description = node.description.clone().unwrap_or_default();
                    let required = shape.required.contains(name) && !node.nullable;
                    properties.insert(name.clone(), self.definition(Some(*property), required, &description));
                }
                self.visiting.pop();
                out.insert("properties".to_string(), Value::Object(properties));
            }
        }
        out.insert("required".to_string(), json!(required));
        Value::Object(out)
    }

    fn type_name(&self, id: Option<SchemaId>) -> String {
        let Some(id) = id else {
            return "object".to_string();
        };
        if self.graph.object_shape(id).is_some() {
            return "object".to_string();
        }
        let node = self.graph.node(id);
        match node.primary_type() {
            Some(SchemaType::String) => "str".to_string(),
            Some(SchemaType::Integer) => "int".to_string(),
            Some(SchemaType::Number) => "float".to_string(),
            Some(SchemaType::Boolean) => "bool".to_string(),
            Some(SchemaType::Array) => {
                let inner = match node.items {
                    Some(items) if items != id => self.scalar_name(items),
                    _ => "object",
                };
                format!("List[{}]", inner)
            }
            Some(SchemaType::Object) | None => "object".to_string(),
        }
    }

    fn scalar_name(&self, id: SchemaId) -> &'static str {
        match self.graph.node(id).primary_type() {
            Some(SchemaType::String) => "str",
            Some(SchemaType::Integer) => "int",
            Some(SchemaType::Number) => "float",
            Some(SchemaType::Boolean) => "bool",
            Some(SchemaType::Array) => "list",
            Some(SchemaType::Object) | None => "object",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::OperationIndex;
    use crate::spec::Specification;

    const SPEC: &str = r#"
openapi: 3.0.3
info:
  title: Dialects
  version: 1.0.0
paths:
  /search:
    get:
      operationId: search
      description: Search the web
      parameters:
        - name: q
          in: query
          required: true
          schema:
            type: string
  /tree.nodes/{id}:
    put:
      operationId: tree.update-node
      summary: Update a tree node
      parameters:
        - name: id
          in: path
          required: true
          description: Node identifier
          schema:
            type: integer
      requestBody:
        content:
          application/json:
            schema:
              $ref: '#/components/schemas/TreeNode'
components:
  schemas:
    TreeNode:
      type: object
      required: [label]
      properties:
        label:
          type: string
          enum: [a, b]
        note:
          type: string
          nullable: true
        children:
          type: array
          items:
            $ref: '#/components/schemas/TreeNode'
"#;

    fn fixture() -> OperationIndex {
        OperationIndex::build(&SPEC.parse::<Specification>().unwrap()).unwrap()
    }

    #[test]
    fn test_openai_search_definition() {
        let index = fixture();
        let op = index.operation("search").unwrap();
        let tool = Dialect::OpenAi.render(op, index.schemas()).to_json();
        assert_eq!(
            tool,
            json!({
                "type": "function",
                "function": {
                    "name": "search",
                    "description": "Search the web",
                    "parameters": {
                        "type": "object",
                        "properties": {"q": {"type": "string"}},
                        "required": ["q"]
                    }
                }
            })
        );
    }

    #[test]
    fn test_anthropic_envelope_and_recursion() {
        let index = fixture();
        let op = index.operation("tree.update-node").unwrap();
        let tool = Dialect::Anthropic.render(op, index.schemas());
        assert_eq!(tool.name, "tree_update-node");
        assert_eq!(tool.description, "Update a tree node");

        let json = tool.to_json();
        let schema = &json["input_schema"];
        assert_eq!(schema["required"], json!(["id", "label"]));
        assert_eq!(schema["properties"]["id"]["type"], "integer");
        assert_eq!(schema["properties"]["id"]["description"], "Node identifier");
        assert_eq!(schema["properties"]["label"]["enum"], json!(["a", "b"]));
        assert_eq!(schema["properties"]["note"]["type"], json!(["string", "null"]));

        // TreeNode.children is reached again inside its own items: cut with an accept-any schema
        let children = &schema["properties"]["children"];
        assert_eq!(children["type"], "array");
        let item = &children["items"];
        assert_eq!(item["type"], "object");
        assert_eq!(item["properties"]["label"]["type"], "string");
        assert_eq!(item["properties"]["children"], json!({}));
    }

    #[test]
    fn test_cohere_parameter_definitions() {
        let index = fixture();
        let op = index.operation("tree.update-node").unwrap();
        let tool = Dialect::Cohere.render(op, index.schemas());
        assert_eq!(tool.name, "tree_update_node");

        let json = tool.to_json();
        let params = &json["parameter_definitions"];
        assert_eq!(params["id"], json!({"type": "int", "description": "Node identifier", "required": true}));
        assert_eq!(params["label"]["type"], "str");
        assert_eq!(params["label"]["required"], true);
        assert_eq!(params["note"]["required"], false);
        assert_eq!(params["children"]["type"], "List[object]");
    }

    #[test]
    fn test_connected_schemas_expand_once_per_argument() {
        const SCHEMAS: usize = 9;
        let mut schemas = Map::new();
        for i in 0..SCHEMAS {
            let properties: Map<String, Value> = (0..SCHEMAS)
                .filter(|j| *j != i)
                .map(|j| (format!("s{j}"), json!({"$ref": format!("#/components/schemas/S{j}")})))
                .collect();
            schemas.insert(format!("S{i}"), json!({"type": "object", "properties": properties}));
        }
        let document = json!({
            "openapi": "3.1.0",
            "info": {"title": "Graph", "version": "1"},
            "paths": {"/graph": {"post": {
                "operationId": "saveGraph",
                "requestBody": {"content": {"application/json": {"schema": {"$ref": "#/components/schemas/S0"}}}}
            }}},
            "components": {"schemas": schemas}
        });
        let index = OperationIndex::build(&Specification::from_value(document).unwrap()).unwrap();
        let op = index.operation("saveGraph").unwrap();
        assert_eq!(op.arguments.len(), SCHEMAS - 1);

        for dialect in Dialect::ALL {
            let rendered = dialect.render(op, index.schemas()).to_json().to_string();
            assert!(rendered.len() < 32 * 1024, "{dialect}: {} bytes", rendered.len());
        }

        let tool = Dialect::OpenAi.render(op, index.schemas());
        for argument in &op.arguments {
            let text = tool.parameters["properties"][&argument.name].to_string();
            // each schema is expanded at most once inside an argument
            assert!(text.matches("\"properties\"").count() <= SCHEMAS);
        }
        // S2 is first reached through S0, so the direct reference is cut
        let s1 = &tool.parameters["properties"]["s1"];
        assert_eq!(s1["type"], "object");
        assert_eq!(s1["properties"]["s0"]["properties"]["s2"]["type"], "object");
        assert_eq!(s1["properties"]["s2"], json!({}));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(Dialect::OpenAi.sanitize_name("pets.list-all"), "pets_list-all");
        assert_eq!(Dialect::Cohere.sanitize_name("pets.list-all"), "pets_list_all");
        assert_eq!(Dialect::OpenAi.sanitize_name("__a  b__"), "a_b");
        assert_eq!(Dialect::OpenAi.sanitize_name(&"x".repeat(100)).len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_description_truncated() {
        let long = "é".repeat(MAX_DESCRIPTION_LEN + 10);
        assert_eq!(truncate(&long).chars().count(), MAX_DESCRIPTION_LEN);
        assert_eq!(truncate("short"), "short");
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("OpenAI".parse::<Dialect>().unwrap(), Dialect::OpenAi);
        assert_eq!("cohere".parse::<Dialect>().unwrap(), Dialect::Cohere);
        assert!(matches!(
            "gemini".parse::<Dialect>(),
            Err(OpenApiError::UnknownDialect(_))
        ));
        assert_eq!(serde_json::to_value(Dialect::Anthropic).unwrap(), json!("anthropic"));
    }
}
