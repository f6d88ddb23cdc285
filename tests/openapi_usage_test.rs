//! Integration tests for tool generation from OpenAPI documents.
//!
//! Run with:
//!   cargo test --test openapi_usage_test

use openapi_llm::{
    ClientConfig, Dialect, OpenApiClient, OpenApiError, OperationIndex, Specification, ToolFilter,
    ToolSet,
};
use serde_json::json;
use std::io::Write;
use tracing::info;

const EXAMPLE_API: &str = r#"
openapi: 3.0.0
info:
  title: Example API
  version: 1.0.0
servers:
  - url: https://api.example.com
paths:
  /search:
    get:
      operationId: search
      description: Search the catalogue
      parameters:
        - name: q
          in: query
          required: true
          schema:
            type: string
      responses:
        '200':
          description: Success
  /users:
    get:
      operationId: listUsers
      summary: List all users
      parameters:
        - $ref: '#/components/parameters/Limit'
      responses:
        '200':
          description: Success
    post:
      operationId: createUser
      requestBody:
        required: true
        content:
          application/json:
            schema:
              $ref: '#/components/schemas/User'
      responses:
        '201':
          description: Created
  /users/{id}:
    parameters:
      - name: id
        in: path
        required: true
        schema:
          type: string
    get:
      operationId: getUser
      summary: Get user by ID
      responses:
        '200':
          description: Success
    delete:
      responses:
        '204':
          description: Deleted
components:
  parameters:
    Limit:
      name: limit
      in: query
      schema:
        type: integer
        default: 20
  schemas:
    User:
      type: object
      required: [name]
      properties:
        name:
          type: string
        manager:
          $ref: '#/components/schemas/User'
        tags:
          type: array
          items:
            type: string
"#;

fn spec() -> Specification {
    EXAMPLE_API.parse().expect("example document parses")
}

#[test]
fn test_search_tool_for_every_dialect() {
    openapi_llm_telemetry::init_logging();
    let index = OperationIndex::build(&spec()).unwrap();

    let openai = ToolSet::build(&index, Dialect::OpenAi, &ToolFilter::new()).unwrap();
    assert_eq!(
        openai.to_json()[0],
        json!({
            "type": "function",
            "function": {
                "name": "search",
                "description": "Search the catalogue",
                "parameters": {
                    "type": "object",
                    "properties": {"q": {"type": "string"}},
                    "required": ["q"]
                }
            }
        })
    );

    let anthropic = ToolSet::build(&index, Dialect::Anthropic, &ToolFilter::new()).unwrap();
    assert_eq!(
        anthropic.to_json()[0],
        json!({
            "name": "search",
            "description": "Search the catalogue",
            "input_schema": {
                "type": "object",
                "properties": {"q": {"type": "string"}},
                "required": ["q"]
            }
        })
    );

    let cohere = ToolSet::build(&index, Dialect::Cohere, &ToolFilter::new()).unwrap();
    assert_eq!(
        cohere.to_json()[0],
        json!({
            "name": "search",
            "description": "Search the catalogue",
            "parameter_definitions": {"q": {"type": "str", "description": "", "required": true}}
        })
    );

    for tool in openai.definitions() {
        info!("{} -> {}", tool.name, tool.operation_id);
    }
}

#[test]
fn test_generated_operations() {
    let index = OperationIndex::build(&spec()).unwrap();
    let ids: Vec<_> = index.operations().map(|op| op.operation_id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["search", "listUsers", "createUser", "getUser", "delete_users_id"]
    );

    let list = index.operation("listUsers").unwrap();
    assert_eq!(list.description, "List all users");
    assert_eq!(list.parameters[0].default, Some(json!(20)));

    let delete = index.operation("delete_users_id").unwrap();
    assert_eq!(delete.description, "DELETE /users/{id}");
    assert_eq!(delete.path_placeholders(), vec!["id"]);
}

#[test]
fn test_recursive_body_schema_is_bounded() {
    let config = ClientConfig::builder(spec())
        .with_dialect(Dialect::OpenAi)
        .with_filter(ToolFilter::new().allow(["createUser"]))
        .build()
        .unwrap();
    let client = OpenApiClient::from_config(config).unwrap();

    let tools = client.tool_definitions();
    assert_eq!(tools.len(), 1);
    let parameters = &tools[0]["function"]["parameters"];
    assert_eq!(parameters["required"], json!(["name"]));
    assert_eq!(parameters["properties"]["tags"]["items"]["type"], "string");

    // walk down the manager chain until the cut
    let mut depth = 0;
    let mut current = &parameters["properties"]["manager"];
    while current.get("type").is_some() {
        assert_eq!(current["type"], "object");
        current = &current["properties"]["manager"];
        depth += 1;
        assert!(depth <= openapi_llm::MAX_SCHEMA_DEPTH);
    }
    assert_eq!(current, &json!({}));
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(EXAMPLE_API.as_bytes()).unwrap();

    let client = OpenApiClient::from_spec(file.path().to_path_buf()).unwrap();
    assert_eq!(client.tool_set().len(), 5);
    assert_eq!(client.config().spec.title(), Some("Example API"));
}

#[test]
fn test_structural_defects_fail_at_build_time() {
    let duplicate = r#"
openapi: 3.1.0
info: {title: Dup, version: "1"}
paths:
  /a:
    get: {operationId: fetch}
  /b:
    get: {operationId: fetch}
"#;
    let err = OperationIndex::build(&duplicate.parse().unwrap()).unwrap_err();
    assert!(err.is_spec_defect());
    assert!(matches!(
        err,
        OpenApiError::DuplicateOperationId { ref operation_id, .. } if operation_id == "fetch"
    ));

    let swagger = r#"{"swagger": "2.0", "info": {"title": "Old", "version": "1"}, "paths": {}}"#;
    assert!(matches!(
        swagger.parse::<Specification>(),
        Err(OpenApiError::SpecLoad(_))
    ));

    let collision = r#"
openapi: 3.1.0
info: {title: Tools, version: "1"}
paths:
  /a:
    get: {operationId: list-pets}
  /b:
    get: {operationId: list_pets}
"#;
    let spec: Specification = collision.parse().unwrap();
    assert!(OpenApiClient::from_config(ClientConfig::new(spec.clone()).unwrap()).is_ok());
    let cohere = ClientConfig::builder(spec)
        .with_dialect(Dialect::Cohere)
        .build()
        .unwrap();
    assert!(matches!(
        OpenApiClient::from_config(cohere),
        Err(OpenApiError::ToolNameCollision { .. })
    ));
}
