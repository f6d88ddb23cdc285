//! OpenAPI document loading.
//!
//! A [`Specification`] owns the parsed document, its OpenAPI version, the
//! document-level servers and the declared security schemes. It is created
//! once and never mutated afterwards; `$ref` pointers are resolved against it
//! by the [`SchemaResolver`](crate::schema::SchemaResolver) and the
//! [`OperationIndex`](crate::index::OperationIndex).

use crate::error::{OpenApiError, Result};
use crate::types::{AuthLocation, SecurityScheme};
use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use serde_json::{Map, Number, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};
use url::Url;

/// Where an OpenAPI document comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecSource {
    Path(PathBuf),
    Url(Url),
    /// The document text itself (JSON or YAML).
    Raw(String),
}

impl SpecSource {
    /// Classify a string as an existing file, an HTTP(S) URL, or raw document text.
    pub fn detect(input: &str) -> Self {
        let trimmed = input.trim();
        if !trimmed.contains('\n') {
            if Path::new(trimmed).is_file() {
                return SpecSource::Path(PathBuf::from(trimmed));
            }
            if let Ok(url) = Url::parse(trimmed) {
                if matches!(url.scheme(), "http" | "https") && url.has_host() {
                    return SpecSource::Url(url);
                }
            }
        }
        SpecSource::Raw(input.to_string())
    }
}

impl From<&str> for SpecSource {
    fn from(input: &str) -> Self {
        SpecSource::detect(input)
    }
}

impl From<String> for SpecSource {
    fn from(input: String) -> Self {
        SpecSource::detect(&input)
    }
}

impl From<PathBuf> for SpecSource {
    fn from(path: PathBuf) -> Self {
        SpecSource::Path(path)
    }
}

impl From<&Path> for SpecSource {
    fn from(path: &Path) -> Self {
        SpecSource::Path(path.to_path_buf())
    }
}

impl From<Url> for SpecSource {
    fn from(url: Url) -> Self {
        SpecSource::Url(url)
    }
}

/// Declared OpenAPI version family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenApiVersion {
    /// 3.0.x: nullability via `nullable: true`
    V3_0,
    /// 3.1.x: nullability via `type: [X, "null"]`
    V3_1,
}

/// A loaded OpenAPI document.
#[derive(Debug, Clone)]
pub struct Specification {
    document: Value,
    version: OpenApiVersion,
    origin: Option<Url>,
    servers: Vec<String>,
    security_schemes: IndexMap<String, SecurityScheme>,
}

impl Specification {
    /// Load a document from a path, URL or raw string.
    pub async fn load(source: impl Into<SpecSource>) -> Result<Self> {
        match source.into() {
            SpecSource::Path(path) => {
                info!("Loading OpenAPI spec from file: {}", path.display());
                let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                    OpenApiError::spec_load(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::parse(&content, None)
            }
            SpecSource::Url(url) => {
                info!("Loading OpenAPI spec from URL: {}", url);
                let response = reqwest::get(url.clone())
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| OpenApiError::spec_load(format!("cannot fetch {}: {}", url, e)))?;
                let content = response
                    .text()
                    .await
                    .map_err(|e| OpenApiError::spec_load(format!("cannot read {}: {}", url, e)))?;
                Self::parse(&content, Some(url))
            }
            SpecSource::Raw(content) => Self::parse(&content, None),
        }
    }

    /// Blocking variant of [`Specification::load`].
    ///
    /// Must not be called from within an async runtime when the source is a URL.
    pub fn load_blocking(source: impl Into<SpecSource>) -> Result<Self> {
        match source.into() {
            SpecSource::Path(path) => Self::from_file(&path),
            SpecSource::Url(url) => {
                info!("Loading OpenAPI spec from URL: {}", url);
                let content = reqwest::blocking::get(url.clone())
                    .and_then(|r| r.error_for_status())
                    .and_then(|r| r.text())
                    .map_err(|e| OpenApiError::spec_load(format!("cannot fetch {}: {}", url, e)))?;
                Self::parse(&content, Some(url))
            }
            SpecSource::Raw(content) => Self::parse(&content, None),
        }
    }

    /// Load a document from a file. JSON or YAML is detected from the content.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading OpenAPI spec from file: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            OpenApiError::spec_load(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content, None)
    }

    /// Build a specification from an already parsed document.
    pub fn from_value(document: Value) -> Result<Self> {
        Self::from_document(document, None)
    }

    fn parse(content: &str, origin: Option<Url>) -> Result<Self> {
        let document = parse_document(content)?;
        Self::from_document(document, origin)
    }

    fn from_document(document: Value, origin: Option<Url>) -> Result<Self> {
        if !document.is_object() {
            return Err(OpenApiError::spec_load("document root is not a mapping"));
        }
        let version = detect_version(&document)?;

        let mut spec = Self {
            document,
            version,
            origin,
            servers: Vec::new(),
            security_schemes: IndexMap::new(),
        };
        spec.servers = spec.server_urls(spec.document.get("servers"));
        spec.security_schemes = spec.parse_security_schemes()?;

        debug!(
            "Loaded OpenAPI {:?} document with {} server(s) and {} security scheme(s)",
            spec.version,
            spec.servers.len(),
            spec.security_schemes.len()
        );
        Ok(spec)
    }

    /// The parsed document.
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn version(&self) -> OpenApiVersion {
        self.version
    }

    /// The URL the document was fetched from, if any.
    pub fn origin(&self) -> Option<&Url> {
        self.origin.as_ref()
    }

    /// Document-level server URLs with variables substituted.
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn security_schemes(&self) -> &IndexMap<String, SecurityScheme> {
        &self.security_schemes
    }

    /// `info.title`, if declared.
    pub fn title(&self) -> Option<&str> {
        self.document.pointer("/info/title").and_then(Value::as_str)
    }

    /// Look up the value a local `$ref` (e.g. `#/components/schemas/Pet`) points to.
    pub fn resolve_pointer(&self, reference: &str) -> Result<&Value> {
        let fragment = reference.strip_prefix('#').ok_or_else(|| {
            OpenApiError::invalid_reference(reference, "only local references are supported")
        })?;
        let decoded = percent_decode_str(fragment)
            .decode_utf8()
            .map_err(|e| OpenApiError::invalid_reference(reference, e.to_string()))?;
        self.document
            .pointer(&decoded)
            .ok_or_else(|| OpenApiError::invalid_reference(reference, "target does not exist"))
    }

    /// Follow a chain of `$ref` objects to the first concrete value.
    pub fn deref<'a>(&'a self, value: &'a Value) -> Result<&'a Value> {
        let mut current = value;
        let mut seen = HashSet::new();
        while let Some(reference) = ref_of(current) {
            if !seen.insert(reference) {
                return Err(OpenApiError::invalid_reference(reference, "circular reference chain"));
            }
            current = self.resolve_pointer(reference)?;
        }
        Ok(current)
    }

    /// Server URLs declared by a `servers` array, variables substituted and
    /// relative URLs resolved against the document origin.
    pub(crate) fn server_urls(&self, servers: Option<&Value>) -> Vec<String> {
        let Some(servers) = servers else {
            return Vec::new();
        };
        let parsed: Vec<openapiv3::Server> = match serde_json::from_value(servers.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Ignoring malformed servers declaration: {}", e);
                return Vec::new();
            }
        };

        parsed
            .into_iter()
            .map(|server| {
                let mut url = server.url;
                if let Some(variables) = &server.variables {
                    for (name, variable) in variables {
                        url = url.replace(&format!("{{{}}}", name), &variable.default);
                    }
                }
                self.absolutize(url)
            })
            .collect()
    }

    fn absolutize(&self, url: String) -> String {
        if Url::parse(&url).is_ok() {
            return url;
        }
        match self.origin.as_ref().map(|origin| origin.join(&url)) {
            Some(Ok(joined)) => joined.to_string(),
            _ => url,
        }
    }

    fn parse_security_schemes(&self) -> Result<IndexMap<String, SecurityScheme>> {
        let mut schemes = IndexMap::new();
        let Some(declared) = self
            .document
            .pointer("/components/securitySchemes")
            .and_then(Value::as_object)
        else {
            return Ok(schemes);
        };

        for (name, value) in declared {
            let value = self.deref(value)?;
            let scheme = match serde_json::from_value::<openapiv3::SecurityScheme>(value.clone()) {
                Ok(raw) => convert_security_scheme(raw),
                Err(e) => {
                    let kind = value
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string();
                    warn!("Security scheme '{}' of type '{}' is not supported: {}", name, kind, e);
                    SecurityScheme::Unsupported { kind }
                }
            };
            schemes.insert(name.clone(), scheme);
        }
        Ok(schemes)
    }
}

impl FromStr for Specification {
    type Err = OpenApiError;

    /// Parse a JSON or YAML document.
    fn from_str(content: &str) -> Result<Self> {
        Self::parse(content, None)
    }
}

/// `$ref` target of a reference object.
pub(crate) fn ref_of(value: &Value) -> Option<&str> {
    value.get("$ref").and_then(Value::as_str)
}

fn convert_security_scheme(raw: openapiv3::SecurityScheme) -> SecurityScheme {
    match raw {
        openapiv3::SecurityScheme::APIKey { location, name, .. } => SecurityScheme::ApiKey {
            name,
            location: match location {
                openapiv3::APIKeyLocation::Query => AuthLocation::Query,
                openapiv3::APIKeyLocation::Header => AuthLocation::Header,
                openapiv3::APIKeyLocation::Cookie => AuthLocation::Cookie,
            },
        },
        openapiv3::SecurityScheme::HTTP { scheme, .. } => match scheme.to_ascii_lowercase().as_str()
        {
            "basic" => SecurityScheme::HttpBasic,
            "bearer" => SecurityScheme::HttpBearer,
            other => SecurityScheme::Unsupported {
                kind: format!("http/{}", other),
            },
        },
        openapiv3::SecurityScheme::OAuth2 { .. } | openapiv3::SecurityScheme::OpenIDConnect { .. } => {
            SecurityScheme::OAuth2
        }
    }
}

fn detect_version(document: &Value) -> Result<OpenApiVersion> {
    let declared = match document.get("openapi") {
        Some(Value::String(version)) => version.clone(),
        Some(Value::Number(version)) => version.to_string(),
        Some(other) => {
            return Err(OpenApiError::spec_load(format!(
                "'openapi' field must be a version string, found {}",
                other
            )));
        }
        None if document.get("swagger").is_some() => {
            return Err(OpenApiError::spec_load(
                "Swagger 2.0 documents are not supported, convert to OpenAPI 3",
            ));
        }
        None => return Err(OpenApiError::spec_load("missing 'openapi' version field")),
    };

    if declared == "3.0" || declared.starts_with("3.0.") {
        Ok(OpenApiVersion::V3_0)
    } else if declared == "3.1" || declared.starts_with("3.1.") {
        Ok(OpenApiVersion::V3_1)
    } else {
        Err(OpenApiError::spec_load(format!(
            "unsupported OpenAPI version {}, expected 3.0.x or 3.1.x",
            declared
        )))
    }
}

/// Parse document text, sniffing JSON vs. YAML from the content.
fn parse_document(content: &str) -> Result<Value> {
    let content = content.trim_start_matches('\u{feff}').trim_start();
    if content.is_empty() {
        return Err(OpenApiError::spec_load("document is empty"));
    }

    if content.starts_with('{') {
        match serde_json::from_str::<Value>(content) {
            Ok(document) => return Ok(document),
            // YAML flow mappings also start with '{'
            Err(json_error) => {
                return parse_yaml(content).map_err(|_| {
                    OpenApiError::spec_load(format!("invalid JSON: {}", json_error))
                });
            }
        }
    }
    parse_yaml(content)
}

fn parse_yaml(content: &str) -> Result<Value> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content)
        .map_err(|e| OpenApiError::spec_load(format!("content is neither JSON nor YAML: {}", e)))?;
    yaml_to_json(yaml)
}

/// Convert YAML to JSON, stringifying non-string mapping keys (e.g. `200:`).
fn yaml_to_json(yaml: serde_yaml::Value) -> Result<Value> {
    Ok(match yaml {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                Value::Number(u.into())
            } else {
                n.as_f64()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        serde_yaml::Value::Mapping(mapping) => {
            let mut object = Map::new();
            for (key, value) in mapping {
                let key = match key {
                    serde_yaml::Value::String(s) => s,
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    other => {
                        return Err(OpenApiError::spec_load(format!(
                            "unsupported mapping key {:?}",
                            other
                        )));
                    }
                };
                object.insert(key, yaml_to_json(value)?);
            }
            Value::Object(object)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}
