//! Schema graph and `$ref` resolution.
//!
//! Schemas are stored in an arena ([`SchemaGraph`]) and addressed by
//! [`SchemaId`]. A `$ref` pointer is resolved to exactly one node no matter
//! how many times, or from where, it is reached, so self-referential and
//! mutually-referential schemas become cycles in the graph instead of being
//! unrolled. Consumers walking the graph detect cycles by node identity:
//! two distinct pointers with identical content are different nodes.

use crate::error::{OpenApiError, Result};
use crate::spec::{OpenApiVersion, Specification, ref_of};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Index of a node in a [`SchemaGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(usize);

/// Primitive JSON Schema types. `null` is expressed through [`SchemaNode::nullable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl SchemaType {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "string" => Some(SchemaType::String),
            "integer" => Some(SchemaType::Integer),
            "number" => Some(SchemaType::Number),
            "boolean" => Some(SchemaType::Boolean),
            "object" => Some(SchemaType::Object),
            "array" => Some(SchemaType::Array),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::String => "string",
            SchemaType::Integer => "integer",
            SchemaType::Number => "number",
            SchemaType::Boolean => "boolean",
            SchemaType::Object => "object",
            SchemaType::Array => "array",
        }
    }
}

/// A normalised schema. Both 3.0 `nullable: true` and 3.1 `type: [X, "null"]`
/// end up as `nullable = true` with `types = [X]`.
#[derive(Debug, Clone, Default)]
pub struct SchemaNode {
    /// The `$ref` pointer this node is the canonical target of.
    pub pointer: Option<String>,
    /// Declared non-null types; empty means unconstrained.
    pub types: Vec<SchemaType>,
    pub nullable: bool,
    pub format: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub pattern: Option<String>,
    pub enum_values: Vec<Value>,
    pub default: Option<Value>,
    pub properties: IndexMap<String, SchemaId>,
    pub required: Vec<String>,
    pub items: Option<SchemaId>,
    pub additional_properties: Option<SchemaId>,
    pub all_of: Vec<SchemaId>,
    pub any_of: Vec<SchemaId>,
    pub one_of: Vec<SchemaId>,
}

impl SchemaNode {
    /// The single effective type, inferring `object`/`array` from structure.
    pub fn primary_type(&self) -> Option<SchemaType> {
        match self.types.as_slice() {
            [single] => Some(*single),
            [] if !self.properties.is_empty() => Some(SchemaType::Object),
            [] if self.items.is_some() => Some(SchemaType::Array),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        self.primary_type() == Some(SchemaType::Object)
    }

    /// Short name for the node, e.g. `Pet` for `#/components/schemas/Pet`.
    pub fn name(&self) -> Option<&str> {
        self.pointer
            .as_deref()
            .and_then(|pointer| pointer.rsplit('/').next())
    }
}

/// Properties and required names of an object schema, `allOf` members merged.
#[derive(Debug, Clone, Default)]
pub struct ObjectShape {
    pub properties: IndexMap<String, SchemaId>,
    pub required: Vec<String>,
}

/// Arena of resolved schemas plus the pointer -> node table.
#[derive(Debug, Clone, Default)]
pub struct SchemaGraph {
    nodes: Vec<SchemaNode>,
    pointers: HashMap<String, SchemaId>,
}

impl SchemaGraph {
    pub fn node(&self, id: SchemaId) -> &SchemaNode {
        &self.nodes[id.0]
    }

    /// The node a `$ref` pointer resolved to, if it was reached.
    pub fn lookup(&self, pointer: &str) -> Option<SchemaId> {
        self.pointers.get(pointer).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether the node can reach itself.
    pub fn is_recursive(&self, id: SchemaId) -> bool {
        let mut visited = HashSet::new();
        let mut pending = self.children(id);
        while let Some(next) = pending.pop() {
            if next == id {
                return true;
            }
            if visited.insert(next) {
                pending.extend(self.children(next));
            }
        }
        false
    }

    fn children(&self, id: SchemaId) -> Vec<SchemaId> {
        let node = self.node(id);
        node.properties
            .values()
            .copied()
            .chain(node.items)
            .chain(node.additional_properties)
            .chain(node.all_of.iter().copied())
            .chain(node.any_of.iter().copied())
            .chain(node.one_of.iter().copied())
            .collect()
    }

    /// Merged object view of a schema. Returns `None` when the schema is not
    /// an object (after following `allOf`).
    pub fn object_shape(&self, id: SchemaId) -> Option<ObjectShape> {
        let mut shape = ObjectShape::default();
        let mut visiting = HashSet::new();
        if self.collect_shape(id, &mut shape, &mut visiting) {
            Some(shape)
        } else {
            None
        }
    }

    fn collect_shape(
        &self,
        id: SchemaId,
        shape: &mut ObjectShape,
        visiting: &mut HashSet<SchemaId>,
    ) -> bool {
        if !visiting.insert(id) {
            return true;
        }
        let node = self.node(id);
        let mut is_object = node.is_object();

        for member in &node.all_of {
            is_object |= self.collect_shape(*member, shape, visiting);
        }
        for (name, property) in &node.properties {
            shape.properties.insert(name.clone(), *property);
        }
        for name in &node.required {
            if !shape.required.contains(name) {
                shape.required.push(name.clone());
            }
        }

        visiting.remove(&id);
        is_object
    }
}

/// Builds a [`SchemaGraph`] from schema values of a [`Specification`].
pub struct SchemaResolver<'a> {
    spec: &'a Specification,
    graph: SchemaGraph,
}

impl<'a> SchemaResolver<'a> {
    pub fn new(spec: &'a Specification) -> Self {
        Self {
            spec,
            graph: SchemaGraph::default(),
        }
    }

    /// Resolve a `$ref` pointer to its canonical node.
    ///
    /// Repeated calls with the same pointer return the same [`SchemaId`].
    pub fn resolve_ref(&mut self, pointer: &str) -> Result<SchemaId> {
        if let Some(id) = self.graph.lookup(pointer) {
            return Ok(id);
        }

        // Alias chains (A -> B -> C) share C's node.
        let mut chain = vec![pointer.to_string()];
        let mut target = self.spec.resolve_pointer(pointer)?;
        while let Some(next) = ref_of(target) {
            if let Some(id) = self.graph.lookup(next) {
                return Ok(self.register(chain, id));
            }
            if chain.iter().any(|seen| seen == next) {
                return Err(OpenApiError::invalid_reference(pointer, "circular reference chain"));
            }
            chain.push(next.to_string());
            target = self.spec.resolve_pointer(next)?;
        }

        let canonical = chain.last().cloned();
        // Reserve the slot before descending so that cycles find this node.
        let id = self.push(SchemaNode::default());
        self.register(chain, id);
        let mut node = self.build_node(target)?;
        node.pointer = canonical;
        self.graph.nodes[id.0] = node;
        debug!("Resolved schema reference {} -> {:?}", pointer, id);
        Ok(id)
    }

    /// Resolve an inline schema value (which may itself be a `$ref`).
    pub fn resolve(&mut self, value: &Value) -> Result<SchemaId> {
        if let Some(pointer) = ref_of(value) {
            return self.resolve_ref(pointer);
        }
        let id = self.push(SchemaNode::default());
        let node = self.build_node(value)?;
        self.graph.nodes[id.0] = node;
        Ok(id)
    }

    /// Borrow the graph built so far.
    pub fn graph(&self) -> &SchemaGraph {
        &self.graph
    }

    /// Finish resolution and take the graph.
    pub fn finish(self) -> SchemaGraph {
        self.graph
    }

    fn push(&mut self, node: SchemaNode) -> SchemaId {
        let id = SchemaId(self.graph.nodes.len());
        self.graph.nodes.push(node);
        id
    }

    fn register(&mut self, pointers: Vec<String>, id: SchemaId) -> SchemaId {
        for pointer in pointers {
            self.graph.pointers.insert(pointer, id);
        }
        id
    }

    fn build_node(&mut self, value: &Value) -> Result<SchemaNode> {
        let mut node = SchemaNode::default();
        // Boolean schemas (3.1) and anything malformed accept any value.
        let Some(object) = value.as_object() else {
            return Ok(node);
        };

        match object.get("type") {
            Some(Value::String(name)) => self.add_type(&mut node, name),
            Some(Value::Array(names)) => {
                for name in names.iter().filter_map(Value::as_str) {
                    self.add_type(&mut node, name);
                }
            }
            _ => {}
        }
        if self.spec.version() == OpenApiVersion::V3_0
            && object.get("nullable").and_then(Value::as_bool) == Some(true)
        {
            node.nullable = true;
        }

        let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);
        node.format = text("format");
        node.title = text("title");
        node.description = text("description");
        node.pattern = text("pattern");
        node.default = object.get("default").cloned();

        if let Some(values) = object.get("enum").and_then(Value::as_array) {
            for value in values {
                if value.is_null() {
                    node.nullable = true;
                } else {
                    node.enum_values.push(value.clone());
                }
            }
        } else if let Some(constant) = object.get("const") {
            node.enum_values.push(constant.clone());
        }

        if let Some(properties) = object.get("properties").and_then(Value::as_object) {
            for (name, property) in properties {
                let id = self.resolve(property)?;
                node.properties.insert(name.clone(), id);
            }
        }
        if let Some(required) = object.get("required").and_then(Value::as_array) {
            node.required = required
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }

        node.items = match object.get("items") {
            Some(Value::Array(tuple)) => match tuple.first() {
                Some(first) => Some(self.resolve(first)?),
                None => None,
            },
            Some(items) => Some(self.resolve(items)?),
            None => None,
        };
        if let Some(additional) = object.get("additionalProperties") {
            if additional.is_object() {
                node.additional_properties = Some(self.resolve(additional)?);
            }
        }

        node.all_of = self.resolve_members(object.get("allOf"), &mut node.nullable)?;
        node.any_of = self.resolve_members(object.get("anyOf"), &mut node.nullable)?;
        node.one_of = self.resolve_members(object.get("oneOf"), &mut node.nullable)?;

        Ok(node)
    }

    fn add_type(&self, node: &mut SchemaNode, name: &str) {
        if name == "null" {
            node.nullable = true;
        } else if let Some(schema_type) = SchemaType::parse(name) {
            if !node.types.contains(&schema_type) {
                node.types.push(schema_type);
            }
        }
    }

    /// Resolve composition members; a bare `{type: "null"}` member marks the
    /// parent nullable instead of becoming a member.
    fn resolve_members(&mut self, members: Option<&Value>, nullable: &mut bool) -> Result<Vec<SchemaId>> {
        let Some(members) = members.and_then(Value::as_array) else {
            return Ok(Vec::new());
        };
        let mut ids = Vec::with_capacity(members.len());
        for member in members {
            if is_null_schema(member) {
                *nullable = true;
                continue;
            }
            ids.push(self.resolve(member)?);
        }
        Ok(ids)
    }
}

fn is_null_schema(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some("null")
        && value
            .as_object()
            .is_some_and(|o| o.keys().all(|k| k == "type" || k == "description"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(version: &str, schemas: Value) -> Specification {
        Specification::from_value(json!({
            "openapi": version,
            "paths": {},
            "components": {"schemas": schemas}
        }))
        .unwrap()
    }

    #[test]
    fn test_same_pointer_same_node() {
        let spec = spec("3.0.0", json!({"Pet": {"type": "object"}}));
        let mut resolver = SchemaResolver::new(&spec);
        let first = resolver.resolve_ref("#/components/schemas/Pet").unwrap();
        let second = resolver.resolve_ref("#/components/schemas/Pet").unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.graph().len(), 1);
    }

    #[test]
    fn test_self_reference_becomes_cycle() {
        let spec = spec(
            "3.0.0",
            json!({
                "Node": {
                    "type": "object",
                    "properties": {
                        "value": {"type": "string"},
                        "children": {"type": "array", "items": {"$ref": "#/components/schemas/Node"}}
                    }
                }
            }),
        );
        let mut resolver = SchemaResolver::new(&spec);
        let node = resolver.resolve_ref("#/components/schemas/Node").unwrap();
        let graph = resolver.finish();

        let children = graph.node(node).properties["children"];
        assert_eq!(graph.node(children).items, Some(node));
        assert!(graph.is_recursive(node));
        assert_eq!(graph.node(node).name(), Some("Node"));
    }

    #[test]
    fn test_identical_shapes_are_distinct_nodes() {
        let spec = spec(
            "3.0.0",
            json!({
                "Home": {"type": "object", "properties": {"street": {"type": "string"}}},
                "Work": {"type": "object", "properties": {"street": {"type": "string"}}}
            }),
        );
        let mut resolver = SchemaResolver::new(&spec);
        let home = resolver.resolve_ref("#/components/schemas/Home").unwrap();
        let work = resolver.resolve_ref("#/components/schemas/Work").unwrap();
        assert_ne!(home, work);
        assert!(!resolver.graph().is_recursive(home));
    }

    #[test]
    fn test_alias_chain_shares_node() {
        let spec = spec(
            "3.0.0",
            json!({
                "Alias": {"$ref": "#/components/schemas/Target"},
                "Target": {"type": "string"}
            }),
        );
        let mut resolver = SchemaResolver::new(&spec);
        let alias = resolver.resolve_ref("#/components/schemas/Alias").unwrap();
        let target = resolver.resolve_ref("#/components/schemas/Target").unwrap();
        assert_eq!(alias, target);
        assert_eq!(resolver.graph().node(target).name(), Some("Target"));
    }

    #[test]
    fn test_nullable_normalisation() {
        let v30 = spec("3.0.3", json!({"N": {"type": "string", "nullable": true}}));
        let mut resolver = SchemaResolver::new(&v30);
        let id = resolver.resolve_ref("#/components/schemas/N").unwrap();
        let node = resolver.graph().node(id);
        assert!(node.nullable);
        assert_eq!(node.types, vec![SchemaType::String]);

        let v31 = spec("3.1.0", json!({"N": {"type": ["string", "null"]}}));
        let mut resolver = SchemaResolver::new(&v31);
        let id = resolver.resolve_ref("#/components/schemas/N").unwrap();
        let node = resolver.graph().node(id);
        assert!(node.nullable);
        assert_eq!(node.types, vec![SchemaType::String]);

        // `nullable` is not a 3.1 keyword
        let ignored = spec("3.1.0", json!({"N": {"type": "string", "nullable": true}}));
        let mut resolver = SchemaResolver::new(&ignored);
        let id = resolver.resolve_ref("#/components/schemas/N").unwrap();
        assert!(!resolver.graph().node(id).nullable);
    }

    #[test]
    fn test_any_of_null_member() {
        let spec = spec(
            "3.1.0",
            json!({
                "Pet": {"type": "object"},
                "MaybePet": {"anyOf": [{"$ref": "#/components/schemas/Pet"}, {"type": "null"}]}
            }),
        );
        let mut resolver = SchemaResolver::new(&spec);
        let id = resolver.resolve_ref("#/components/schemas/MaybePet").unwrap();
        let node = resolver.graph().node(id);
        assert!(node.nullable);
        assert_eq!(node.any_of.len(), 1);
    }

    #[test]
    fn test_object_shape_merges_all_of() {
        let spec = spec(
            "3.0.0",
            json!({
                "Base": {
                    "type": "object",
                    "properties": {"id": {"type": "integer"}},
                    "required": ["id"]
                },
                "Pet": {
                    "allOf": [
                        {"$ref": "#/components/schemas/Base"},
                        {"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]}
                    ]
                }
            }),
        );
        let mut resolver = SchemaResolver::new(&spec);
        let pet = resolver.resolve_ref("#/components/schemas/Pet").unwrap();
        let graph = resolver.finish();
        let shape = graph.object_shape(pet).unwrap();
        assert_eq!(shape.properties.keys().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(shape.required, vec!["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn test_unresolvable_reference() {
        let spec = spec("3.0.0", json!({}));
        let mut resolver = SchemaResolver::new(&spec);
        let err = resolver.resolve_ref("#/components/schemas/Missing").unwrap_err();
        assert!(matches!(err, OpenApiError::InvalidReference { .. }));
    }
}
