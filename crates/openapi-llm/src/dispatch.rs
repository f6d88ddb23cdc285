//! HTTP dispatch of assembled requests.
//!
//! A non-2xx status is not an error here: it comes back as an [`ApiResponse`]
//! and the caller decides what it means. Only failures to complete the
//! exchange (refused connection, DNS, timeout, a body that cannot be read)
//! become `Transport` errors. Exactly one attempt is made per call.

use crate::error::{OpenApiError, Result};
use crate::mapper::{EncodedBody, InvocationRequest, MultipartField};
use async_trait::async_trait;
use openapi_llm_telemetry::{invocation_span, record_error, record_status};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderMap};
use serde_json::Value;
use std::time::Duration;
use tracing::{Instrument, Span, debug, warn};

/// Per-call dispatch settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Upper bound on the whole HTTP exchange. No limit when unset.
    pub timeout: Option<Duration>,
}

impl DispatchOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Empty,
    /// The response declared a JSON content type and parsed as JSON.
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

/// Response of an invoked operation, whatever its status.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.body {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The body as JSON: parsed JSON as-is, text as a string, nothing as `null`.
    pub fn into_value(self) -> Value {
        match self.body {
            ResponseBody::Empty => Value::Null,
            ResponseBody::Json(value) => value,
            ResponseBody::Text(text) => Value::String(text),
            ResponseBody::Bytes(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }

    fn decode(status: StatusCode, headers: HeaderMap, bytes: Vec<u8>) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase());

        let body = if bytes.is_empty() {
            ResponseBody::Empty
        } else {
            match content_type.as_deref() {
                Some(media) if media == "application/json" || media.ends_with("+json") => {
                    match serde_json::from_slice(&bytes) {
                        Ok(value) => ResponseBody::Json(value),
                        Err(e) => {
                            debug!("Response declared JSON but did not parse: {}", e);
                            text_or_bytes(bytes)
                        }
                    }
                }
                Some(media)
                    if media.starts_with("text/") || media.ends_with("+xml") || media == "application/xml" =>
                {
                    text_or_bytes(bytes)
                }
                None => text_or_bytes(bytes),
                Some(_) => ResponseBody::Bytes(bytes),
            }
        };

        Self {
            status,
            headers,
            body,
        }
    }
}

fn text_or_bytes(bytes: Vec<u8>) -> ResponseBody {
    match String::from_utf8(bytes) {
        Ok(text) => ResponseBody::Text(text),
        Err(e) => ResponseBody::Bytes(e.into_bytes()),
    }
}

/// Sends requests synchronously.
pub trait RequestSender: Send + Sync {
    fn send(&self, request: &InvocationRequest, options: &DispatchOptions) -> Result<ApiResponse>;
}

/// Sends requests asynchronously.
#[async_trait]
pub trait AsyncRequestSender: Send + Sync {
    async fn send(&self, request: &InvocationRequest, options: &DispatchOptions) -> Result<ApiResponse>;
}

fn span_for(request: &InvocationRequest) -> Span {
    // Without the query string: API keys may travel there.
    invocation_span(&request.operation_id, request.method.as_str(), request.url.as_str())
}

fn transport(request: &InvocationRequest, span: &Span, source: reqwest::Error) -> OpenApiError {
    record_error(span, &source);
    warn!("Request for {} failed: {}", request.operation_id, source);
    OpenApiError::Transport {
        operation_id: request.operation_id.clone(),
        source,
    }
}

fn log_status(request: &InvocationRequest, span: &Span, status: StatusCode) {
    record_status(span, status.as_u16());
    if status.is_success() {
        debug!("{} {} -> {}", request.method, request.url, status);
    } else {
        warn!("Operation {} returned HTTP {}", request.operation_id, status);
    }
}

/// Blocking dispatcher backed by `reqwest::blocking`.
///
/// Must not be used from inside an async runtime.
#[derive(Debug, Clone, Default)]
pub struct BlockingDispatcher {
    client: reqwest::blocking::Client,
}

impl BlockingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl RequestSender for BlockingDispatcher {
    fn send(&self, request: &InvocationRequest, options: &DispatchOptions) -> Result<ApiResponse> {
        let span = span_for(request);
        let _entered = span.enter();

        let mut builder = self.client.request(request.method.clone(), request.full_url());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(cookie) = request.cookie_header() {
            builder = builder.header(COOKIE, cookie);
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match &request.body {
            Some(EncodedBody::Raw { media_type, bytes }) => {
                builder.header(CONTENT_TYPE, media_type).body(bytes.clone())
            }
            Some(EncodedBody::Multipart { fields }) => {
                let mut form = reqwest::blocking::multipart::Form::new();
                for field in fields {
                    let part = reqwest::blocking::multipart::Part::text(field.value.clone());
                    let part = match &field.media_type {
                        Some(media_type) => part
                            .mime_str(media_type)
                            .map_err(|e| transport(request, &span, e))?,
                        None => part,
                    };
                    form = form.part(field.name.clone(), part);
                }
                builder.multipart(form)
            }
            None => builder,
        };

        let response = builder.send().map_err(|e| transport(request, &span, e))?;
        let status = response.status();
        log_status(request, &span, status);
        let headers = response.headers().clone();
        let bytes = response.bytes().map_err(|e| transport(request, &span, e))?;
        Ok(ApiResponse::decode(status, headers, bytes.to_vec()))
    }
}

/// Async dispatcher backed by one pooled `reqwest::Client`.
///
/// Connections are pooled for the lifetime of the dispatcher and released when
/// it is dropped. Dropping an in-flight `send` future abandons that request
/// only; the pool keeps serving later calls.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    client: reqwest::Client,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn async_form(request: &InvocationRequest, span: &Span, fields: &[MultipartField]) -> Result<reqwest::multipart::Form> {
    let mut form = reqwest::multipart::Form::new();
    for field in fields {
        let part = reqwest::multipart::Part::text(field.value.clone());
        let part = match &field.media_type {
            Some(media_type) => part.mime_str(media_type).map_err(|e| transport(request, span, e))?,
            None => part,
        };
        form = form.part(field.name.clone(), part);
    }
    Ok(form)
}

#[async_trait]
impl AsyncRequestSender for Dispatcher {
    async fn send(&self, request: &InvocationRequest, options: &DispatchOptions) -> Result<ApiResponse> {
        let span = span_for(request);

        let mut builder = self.client.request(request.method.clone(), request.full_url());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(cookie) = request.cookie_header() {
            builder = builder.header(COOKIE, cookie);
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match &request.body {
            Some(EncodedBody::Raw { media_type, bytes }) => {
                builder.header(CONTENT_TYPE, media_type).body(bytes.clone())
            }
            Some(EncodedBody::Multipart { fields }) => builder.multipart(async_form(request, &span, fields)?),
            None => builder,
        };

        let response = builder
            .send()
            .instrument(span.clone())
            .await
            .map_err(|e| transport(request, &span, e))?;
        let status = response.status();
        log_status(request, &span, status);
        let headers = response.headers().clone();
        let bytes = response
            .bytes()
            .instrument(span.clone())
            .await
            .map_err(|e| transport(request, &span, e))?;
        Ok(ApiResponse::decode(status, headers, bytes.to_vec()))
    }
}
