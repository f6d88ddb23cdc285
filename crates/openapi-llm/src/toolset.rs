//! Tool definitions for a whole document.

use crate::dialect::{Dialect, ToolDefinition};
use crate::error::{OpenApiError, Result};
use crate::index::OperationIndex;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

/// Selects which operations are exposed as tools.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolFilter {
    /// Only these operation ids are exposed; ids not in the document are ignored.
    pub allowed_operations: Option<Vec<String>>,
    /// Upper bound on the number of tools, applied in document order.
    pub max_tools: Option<usize>,
}

impl ToolFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict tools to the given operation ids.
    pub fn allow<I, S>(mut self, operation_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_operations = Some(operation_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn max_tools(mut self, max: usize) -> Self {
        self.max_tools = Some(max);
        self
    }

    pub fn allows(&self, operation_id: &str) -> bool {
        self.allowed_operations
            .as_ref()
            .is_none_or(|allowed| allowed.iter().any(|id| id == operation_id))
    }
}

/// The tool definitions of one document in one dialect, plus the mapping from
/// tool names back to operation ids.
///
/// # Example
///
/// ```no_run
/// use openapi_llm::{Dialect, OperationIndex, Specification, ToolFilter, ToolSet};
///
/// let spec = Specification::from_file("./api/openapi.yaml")?;
/// let index = OperationIndex::build(&spec)?;
/// let tools = ToolSet::build(&index, Dialect::Anthropic, &ToolFilter::new().max_tools(10))?;
/// println!("{}", serde_json::to_string_pretty(&tools.to_json())?);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct ToolSet {
    dialect: Dialect,
    definitions: Vec<ToolDefinition>,
    /// Sanitised tool name -> operation id, for every operation of the document.
    names: HashMap<String, String>,
}

impl ToolSet {
    /// Render the operations of `index` selected by `filter`.
    ///
    /// Fails with `ToolNameCollision` when two operations of the document
    /// sanitise to the same tool name, whether or not the filter selects them.
    pub fn build(index: &OperationIndex, dialect: Dialect, filter: &ToolFilter) -> Result<Self> {
        let mut names: HashMap<String, String> = HashMap::with_capacity(index.len());
        for operation in index.operations() {
            let name = dialect.sanitize_name(&operation.operation_id);
            if let Some(first) = names.get(&name) {
                return Err(OpenApiError::ToolNameCollision {
                    dialect: dialect.to_string(),
                    tool_name: name,
                    first: first.clone(),
                    second: operation.operation_id.clone(),
                });
            }
            names.insert(name, operation.operation_id.clone());
        }

        let definitions: Vec<ToolDefinition> = index
            .operations()
            .filter(|operation| filter.allows(&operation.operation_id))
            .take(filter.max_tools.unwrap_or(usize::MAX))
            .map(|operation| dialect.render(operation, index.schemas()))
            .collect();

        for definition in &definitions {
            debug!("Built {} tool {} for {}", dialect, definition.name, definition.operation_id);
        }
        info!("Built {} {} tool definition(s)", definitions.len(), dialect);

        Ok(Self {
            dialect,
            definitions,
            names,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Definitions in the provider's wire format.
    pub fn to_json(&self) -> Vec<Value> {
        self.definitions.iter().map(ToolDefinition::to_json).collect()
    }

    /// Operation id a tool name refers to.
    ///
    /// Operation ids themselves are accepted too, so callers may pass either.
    pub fn operation_id(&self, tool_name: &str) -> Option<&str> {
        self.names.get(tool_name).map(String::as_str).or_else(|| {
            self.names
                .values()
                .find(|id| id.as_str() == tool_name)
                .map(String::as_str)
        })
    }

    pub fn get(&self, tool_name: &str) -> Option<&ToolDefinition> {
        self.definitions.iter().find(|d| d.name == tool_name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Specification;
    use serde_json::json;

    fn index(paths: Value) -> OperationIndex {
        let spec = Specification::from_value(json!({"openapi": "3.1.0", "paths": paths})).unwrap();
        OperationIndex::build(&spec).unwrap()
    }

    #[test]
    fn test_filter_and_limit() {
        let index = index(json!({
            "/a": {"get": {"operationId": "a"}},
            "/b": {"get": {"operationId": "b"}},
            "/c": {"get": {"operationId": "c"}}
        }));

        let all = ToolSet::build(&index, Dialect::OpenAi, &ToolFilter::new()).unwrap();
        assert_eq!(all.len(), 3);

        let filter = ToolFilter::new().allow(["c", "a", "unknown"]);
        let some = ToolSet::build(&index, Dialect::OpenAi, &filter).unwrap();
        let names: Vec<_> = some.definitions().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);

        let limited = ToolSet::build(&index, Dialect::OpenAi, &ToolFilter::new().max_tools(2)).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited.to_json()[1]["function"]["name"], "b");
    }

    #[test]
    fn test_tool_name_collision_per_dialect() {
        let index = index(json!({
            "/a": {"get": {"operationId": "pets-list"}},
            "/b": {"get": {"operationId": "pets_list"}}
        }));

        // hyphens survive for OpenAI, so both names stay distinct
        let tools = ToolSet::build(&index, Dialect::OpenAi, &ToolFilter::new()).unwrap();
        assert_eq!(tools.operation_id("pets-list"), Some("pets-list"));

        let err = ToolSet::build(&index, Dialect::Cohere, &ToolFilter::new()).unwrap_err();
        match err {
            OpenApiError::ToolNameCollision {
                dialect,
                tool_name,
                first,
                second,
            } => {
                assert_eq!(dialect, "cohere");
                assert_eq!(tool_name, "pets_list");
                assert_eq!(first, "pets-list");
                assert_eq!(second, "pets_list");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_reverse_name_lookup() {
        let index = index(json!({"/pets": {"get": {"operationId": "pets.list"}}}));
        let tools = ToolSet::build(&index, Dialect::Anthropic, &ToolFilter::new()).unwrap();
        assert_eq!(tools.operation_id("pets_list"), Some("pets.list"));
        assert_eq!(tools.operation_id("pets.list"), Some("pets.list"));
        assert_eq!(tools.operation_id("nope"), None);
        assert!(tools.get("pets_list").is_some());
    }
}
