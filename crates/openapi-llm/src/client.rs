//! Clients tying the pipeline together: load a document once, render its
//! tools, then turn tool calls into HTTP requests.

use crate::auth::{AuthSelector, Credentials};
use crate::dialect::Dialect;
use crate::dispatch::{
    ApiResponse, AsyncRequestSender, BlockingDispatcher, DispatchOptions, Dispatcher, RequestSender,
};
use crate::error::{OpenApiError, Result};
use crate::index::OperationIndex;
use crate::mapper::{InvocationRequest, PayloadMapper};
use crate::spec::{SpecSource, Specification};
use crate::tool_call::ToolCall;
use crate::toolset::{ToolFilter, ToolSet};
use openapi_llm_telemetry::safe_serialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Everything a client needs: the loaded document, its operation index and
/// the invocation settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub spec: Specification,
    pub index: OperationIndex,
    pub credentials: Credentials,
    pub dialect: Dialect,
    /// Overrides every server declared by the document.
    pub base_url: Option<String>,
    pub filter: ToolFilter,
    pub dispatch: DispatchOptions,
}

impl ClientConfig {
    /// Index `spec` with default settings.
    pub fn new(spec: Specification) -> Result<Self> {
        Self::builder(spec).build()
    }

    pub fn builder(spec: Specification) -> ClientConfigBuilder {
        ClientConfigBuilder {
            spec,
            credentials: Credentials::None,
            dialect: Dialect::default(),
            base_url: None,
            filter: ToolFilter::default(),
            dispatch: DispatchOptions::default(),
        }
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    spec: Specification,
    credentials: Credentials,
    dialect: Dialect,
    base_url: Option<String>,
    filter: ToolFilter,
    dispatch: DispatchOptions,
}

impl ClientConfigBuilder {
    pub fn with_credentials(mut self, credentials: impl Into<Credentials>) -> Self {
        self.credentials = credentials.into();
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_filter(mut self, filter: ToolFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch.timeout = Some(timeout);
        self
    }

    /// Build the operation index. Structural defects of the document surface here.
    pub fn build(self) -> Result<ClientConfig> {
        let index = OperationIndex::build(&self.spec)?;
        Ok(ClientConfig {
            spec: self.spec,
            index,
            credentials: self.credentials,
            dialect: self.dialect,
            base_url: self.base_url,
            filter: self.filter,
            dispatch: self.dispatch,
        })
    }
}

fn prepare_call(config: &ClientConfig, tools: &ToolSet, call: &ToolCall) -> Result<InvocationRequest> {
    let operation_id = tools
        .operation_id(&call.name)
        .ok_or_else(|| OpenApiError::OperationNotFound(call.name.clone()))?;
    let mapper = PayloadMapper::for_operation(&config.index, operation_id)?;
    debug!(
        "Invoking {} with arguments {}",
        operation_id,
        safe_serialize(&call.arguments)
    );

    let mut request = mapper.build_request(&call.arguments, config.base_url.as_deref())?;
    AuthSelector::new(config.spec.security_schemes(), &config.credentials)
        .apply(mapper.operation(), &mut request)?;
    Ok(request)
}

fn tool_set(config: &ClientConfig) -> Result<ToolSet> {
    let tools = ToolSet::build(&config.index, config.dialect, &config.filter)?;
    info!(
        "OpenAPI client ready: {} operation(s), {} {} tool(s)",
        config.index.len(),
        tools.len(),
        config.dialect
    );
    Ok(tools)
}

/// Blocking client.
///
/// Must not be used from inside an async runtime; use [`AsyncOpenApiClient`] there.
///
/// # Example
///
/// ```no_run
/// use openapi_llm::{ClientConfig, Credentials, Dialect, OpenApiClient, Specification};
/// use serde_json::json;
///
/// let spec = Specification::load_blocking("./api/openapi.yaml")?;
/// let config = ClientConfig::builder(spec)
///     .with_dialect(Dialect::OpenAi)
///     .with_credentials(Credentials::single(std::env::var("API_TOKEN")?))
///     .build()?;
/// let client = OpenApiClient::from_config(config)?;
///
/// let tools = client.tool_definitions();
/// // ... send `tools` to the model, get a message back ...
/// let message = json!({"function": {"name": "search", "arguments": "{\"q\": \"Tesla\"}"}});
/// let response = client.invoke(&message)?;
/// println!("{}", response.status);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct OpenApiClient {
    config: ClientConfig,
    tools: ToolSet,
    sender: Box<dyn RequestSender>,
}

impl std::fmt::Debug for OpenApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenApiClient")
            .field("config", &self.config)
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

impl OpenApiClient {
    /// Load a document and build a client with default settings.
    pub fn from_spec(source: impl Into<SpecSource>) -> Result<Self> {
        Self::from_spec_with(source, |source| {
            ClientConfig::new(Specification::load_blocking(source)?)
        })
    }

    /// Build a client with a custom load step, e.g. to validate the
    /// document before it is indexed.
    pub fn from_spec_with<F>(source: impl Into<SpecSource>, factory: F) -> Result<Self>
    where
        F: FnOnce(SpecSource) -> Result<ClientConfig>,
    {
        Self::from_config(factory(source.into())?)
    }

    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let tools = tool_set(&config)?;
        Ok(Self {
            config,
            tools,
            sender: Box::new(BlockingDispatcher::new()),
        })
    }

    /// Replace the HTTP sender.
    pub fn with_sender(mut self, sender: impl RequestSender + 'static) -> Self {
        self.sender = Box::new(sender);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Tool definitions in the configured provider's wire format.
    pub fn tool_definitions(&self) -> Vec<Value> {
        self.tools.to_json()
    }

    pub fn tool_set(&self) -> &ToolSet {
        &self.tools
    }

    /// Build the request for the tool call in `payload` without sending it.
    pub fn prepare(&self, payload: &Value) -> Result<InvocationRequest> {
        let call = ToolCall::extract(payload, self.config.dialect)?;
        self.prepare_call(&call)
    }

    pub fn prepare_call(&self, call: &ToolCall) -> Result<InvocationRequest> {
        prepare_call(&self.config, &self.tools, call)
    }

    /// Extract the tool call from a provider response and perform it.
    pub fn invoke(&self, payload: &Value) -> Result<ApiResponse> {
        let request = self.prepare(payload)?;
        self.sender.send(&request, &self.config.dispatch)
    }

    pub fn invoke_call(&self, call: &ToolCall) -> Result<ApiResponse> {
        let request = self.prepare_call(call)?;
        self.sender.send(&request, &self.config.dispatch)
    }
}

/// Async client sharing one pooled HTTP client across invocations.
///
/// Concurrent `invoke` calls are independent. Dropping an `invoke` future
/// abandons that request only.
pub struct AsyncOpenApiClient {
    config: ClientConfig,
    tools: ToolSet,
    sender: Box<dyn AsyncRequestSender>,
}

impl std::fmt::Debug for AsyncOpenApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncOpenApiClient")
            .field("config", &self.config)
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

impl AsyncOpenApiClient {
    pub async fn from_spec(source: impl Into<SpecSource>) -> Result<Self> {
        let spec = Specification::load(source).await?;
        Self::from_config(ClientConfig::new(spec)?)
    }

    /// Async counterpart of [`OpenApiClient::from_spec_with`].
    pub async fn from_spec_with<F, Fut>(source: impl Into<SpecSource>, factory: F) -> Result<Self>
    where
        F: FnOnce(SpecSource) -> Fut,
        Fut: Future<Output = Result<ClientConfig>>,
    {
        Self::from_config(factory(source.into()).await?)
    }

    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let tools = tool_set(&config)?;
        Ok(Self {
            config,
            tools,
            sender: Box::new(Dispatcher::new()),
        })
    }

    /// Use a caller-configured `reqwest::Client` (proxies, TLS, pool sizes).
    pub fn with_http_client(self, client: reqwest::Client) -> Self {
        self.with_sender(Dispatcher::with_client(client))
    }

    pub fn with_sender(mut self, sender: impl AsyncRequestSender + 'static) -> Self {
        self.sender = Box::new(sender);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn tool_definitions(&self) -> Vec<Value> {
        self.tools.to_json()
    }

    pub fn tool_set(&self) -> &ToolSet {
        &self.tools
    }

    pub fn prepare(&self, payload: &Value) -> Result<InvocationRequest> {
        let call = ToolCall::extract(payload, self.config.dialect)?;
        self.prepare_call(&call)
    }

    pub fn prepare_call(&self, call: &ToolCall) -> Result<InvocationRequest> {
        prepare_call(&self.config, &self.tools, call)
    }

    pub async fn invoke(&self, payload: &Value) -> Result<ApiResponse> {
        let request = self.prepare(payload)?;
        self.sender.send(&request, &self.config.dispatch).await
    }

    pub async fn invoke_call(&self, call: &ToolCall) -> Result<ApiResponse> {
        let request = self.prepare_call(call)?;
        self.sender.send(&request, &self.config.dispatch).await
    }
}
