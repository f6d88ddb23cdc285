//! # OpenAPI LLM
//!
//! Turns an OpenAPI 3.0/3.1 document into tool definitions for LLM providers
//! and performs the tool calls the model makes.
//!
//! ## Features
//!
//! - Load documents from a file, an HTTP(S) URL or inline JSON/YAML
//! - `$ref` resolution with recursive schemas kept as cycles
//! - Tool definitions for OpenAI, Anthropic and Cohere
//! - Tool-call extraction from any of those providers' responses
//! - Request assembly for path, query, header, cookie and body arguments
//! - apiKey, HTTP basic, bearer and OAuth2 (pre-obtained token) authentication
//! - Blocking and async clients, with one attempt per call
//!
//! ## Example
//!
//! ```no_run
//! use openapi_llm::{AsyncOpenApiClient, ClientConfig, Credentials, Dialect, Specification};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let spec = Specification::load("https://petstore3.swagger.io/api/v3/openapi.json").await?;
//! let config = ClientConfig::builder(spec)
//!     .with_dialect(Dialect::Anthropic)
//!     .with_credentials(Credentials::single(std::env::var("PETSTORE_API_KEY")?))
//!     .build()?;
//! let client = AsyncOpenApiClient::from_config(config)?;
//!
//! let tools = client.tool_definitions();
//! println!("Generated {} tools", tools.len());
//!
//! // a tool_use block returned by the model
//! let message = json!({
//!     "content": [{"type": "tool_use", "name": "getPetById", "input": {"petId": 7}}]
//! });
//! let response = client.invoke(&message).await?;
//! println!("{} {:?}", response.status, response.json());
//! # Ok(())
//! # }
//! ```

mod auth;
mod client;
mod config;
mod dialect;
mod dispatch;
mod error;
mod index;
mod mapper;
mod schema;
mod spec;
mod tool_call;
mod toolset;
mod types;

pub use auth::{AuthMaterial, AuthSelector, Credential, Credentials};
pub use client::{AsyncOpenApiClient, ClientConfig, ClientConfigBuilder, OpenApiClient};
pub use config::{CONFIG_FILE_NAME, ClientSettings, CredentialSettings, SchemeCredential};
pub use dialect::{Dialect, MAX_DESCRIPTION_LEN, MAX_NAME_LEN, MAX_SCHEMA_DEPTH, ToolDefinition};
pub use dispatch::{
    ApiResponse, AsyncRequestSender, BlockingDispatcher, DispatchOptions, Dispatcher, RequestSender,
    ResponseBody,
};
pub use error::{OpenApiError, Result};
pub use index::OperationIndex;
pub use mapper::{ArgumentBuckets, EncodedBody, InvocationRequest, MultipartField, PayloadMapper};
pub use schema::{ObjectShape, SchemaGraph, SchemaId, SchemaNode, SchemaResolver, SchemaType};
pub use spec::{OpenApiVersion, SpecSource, Specification};
pub use tool_call::ToolCall;
pub use toolset::{ToolFilter, ToolSet};
pub use types::{
    Argument, ArgumentKind, AuthLocation, BodyEncoding, Operation, Parameter, ParameterLocation,
    ParameterStyle, RequestBody, SecurityRequirement, SecurityScheme,
};

pub use openapi_llm_telemetry as telemetry;
