//! File-based client settings
//!
//! Loads `openapi-llm.toml` from the current directory or one of its parents.
//! String values written as `${VAR_NAME}` are replaced by the environment
//! variable of that name.
//!
//! ```toml
//! openapi_spec = "./petstore.yaml"
//! provider = "anthropic"
//! timeout_secs = 30
//! max_tools = 20
//!
//! [credentials.schemes.api_key]
//! token = "${PETSTORE_API_KEY}"
//!
//! [credentials.schemes.basic]
//! username = "admin"
//! password = "${PETSTORE_PASSWORD}"
//! ```

use crate::auth::{Credential, Credentials};
use crate::client::ClientConfig;
use crate::dialect::Dialect;
use crate::spec::{SpecSource, Specification};
use crate::toolset::ToolFilter;
use anyhow::{Context, Result, anyhow, bail};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "openapi-llm.toml";

/// Client settings read from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Path, URL or inline text of the OpenAPI document. Relative paths are
    /// taken relative to the settings file.
    pub openapi_spec: String,

    /// Dialect of the emitted tool definitions (openai, anthropic, cohere)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Overrides the servers declared by the document
    pub base_url: Option<String>,

    pub timeout_secs: Option<u64>,

    pub allowed_operations: Option<Vec<String>>,

    pub max_tools: Option<usize>,

    #[serde(default)]
    pub credentials: CredentialSettings,

    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

/// `[credentials]` table: either one `token` for every scheme, or one entry
/// per security scheme name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialSettings {
    pub token: Option<String>,

    #[serde(default)]
    pub schemes: IndexMap<String, SchemeCredential>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SchemeCredential {
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for SchemeCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemeCredential")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ClientSettings {
    /// Find and load `openapi-llm.toml` from the current directory or its parents.
    pub fn load() -> Result<Self> {
        let path = Self::find_config_file()?;
        Self::load_from(&path)
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!("Loading settings from: {:?}", path);

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;

        let mut settings = Self::parse(&contents)
            .with_context(|| format!("Failed to parse settings file: {:?}", path))?;
        settings.base_dir = path.parent().map(Path::to_path_buf);
        Ok(settings)
    }

    /// Parse settings from TOML text, resolving `${VAR}` references.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut settings: ClientSettings = toml::from_str(contents)?;
        settings.resolve_env_vars()?;
        Ok(settings)
    }

    fn find_config_file() -> Result<PathBuf> {
        let mut current = env::current_dir()?;

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Ok(config_path);
            }

            if !current.pop() {
                break;
            }
        }

        Err(anyhow!(
            "{} not found in the current directory or any parent",
            CONFIG_FILE_NAME
        ))
    }

    fn resolve_env_vars(&mut self) -> Result<()> {
        resolve_in_place(&mut self.openapi_spec)?;
        resolve_in_place(&mut self.provider)?;
        if let Some(url) = self.base_url.as_mut() {
            resolve_in_place(url)?;
        }
        if let Some(token) = self.credentials.token.as_mut() {
            resolve_in_place(token)?;
        }
        for scheme in self.credentials.schemes.values_mut() {
            for value in [&mut scheme.token, &mut scheme.username, &mut scheme.password]
                .into_iter()
                .flatten()
            {
                resolve_in_place(value)?;
            }
        }
        Ok(())
    }

    /// Resolve a single ${VAR_NAME} reference
    fn resolve_env_var(value: &str) -> Option<String> {
        if value.starts_with("${") && value.ends_with('}') {
            let var_name = &value[2..value.len() - 1];
            env::var(var_name).ok()
        } else {
            Some(value.to_string())
        }
    }

    pub fn dialect(&self) -> Result<Dialect> {
        Ok(self.provider.parse()?)
    }

    pub fn tool_filter(&self) -> ToolFilter {
        ToolFilter {
            allowed_operations: self.allowed_operations.clone(),
            max_tools: self.max_tools,
        }
    }

    pub fn credentials(&self) -> Result<Credentials> {
        let table = &self.credentials;
        if table.token.is_some() && !table.schemes.is_empty() {
            bail!("set either credentials.token or credentials.schemes, not both");
        }
        if let Some(token) = &table.token {
            return Ok(Credentials::single(token.as_str()));
        }
        if table.schemes.is_empty() {
            return Ok(Credentials::None);
        }

        let mut credentials = Vec::with_capacity(table.schemes.len());
        for (name, scheme) in &table.schemes {
            let credential = match scheme {
                SchemeCredential {
                    token: Some(token),
                    username: None,
                    password: None,
                } => Credential::token(token.as_str()),
                SchemeCredential {
                    token: None,
                    username: Some(username),
                    password: Some(password),
                } => Credential::basic(username.as_str(), password.as_str()),
                _ => bail!(
                    "credentials.schemes.{} needs either token or username and password",
                    name
                ),
            };
            credentials.push((name.clone(), credential));
        }
        Ok(Credentials::per_scheme(credentials))
    }

    /// Where to load the document from.
    pub fn spec_source(&self) -> SpecSource {
        if let Some(dir) = &self.base_dir {
            let candidate = Path::new(self.openapi_spec.trim());
            if candidate.is_relative() && !self.openapi_spec.contains('\n') {
                let joined = dir.join(candidate);
                if joined.is_file() {
                    return SpecSource::Path(joined);
                }
            }
        }
        SpecSource::detect(&self.openapi_spec)
    }

    /// Load the document (blocking) and build the client configuration.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let spec = Specification::load_blocking(self.spec_source())
            .with_context(|| format!("Failed to load OpenAPI document {}", self.openapi_spec))?;
        self.configure(spec)
    }

    /// Async counterpart of [`ClientSettings::client_config`].
    pub async fn client_config_async(&self) -> Result<ClientConfig> {
        let spec = Specification::load(self.spec_source())
            .await
            .with_context(|| format!("Failed to load OpenAPI document {}", self.openapi_spec))?;
        self.configure(spec)
    }

    fn configure(&self, spec: Specification) -> Result<ClientConfig> {
        let mut builder = ClientConfig::builder(spec)
            .with_dialect(self.dialect()?)
            .with_credentials(self.credentials()?)
            .with_filter(self.tool_filter());
        if let Some(url) = &self.base_url {
            builder = builder.with_base_url(url.clone());
        }
        if let Some(secs) = self.timeout_secs {
            builder = builder.with_timeout(Duration::from_secs(secs));
        }
        Ok(builder.build()?)
    }
}

fn resolve_in_place(value: &mut String) -> Result<()> {
    match ClientSettings::resolve_env_var(value) {
        Some(resolved) => {
            *value = resolved;
            Ok(())
        }
        None => Err(anyhow!("environment variable referenced by {} is not set", value)),
    }
}

fn default_provider() -> String {
    Dialect::default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const SPEC: &str = r#"
openapi: 3.1.0
info: {title: Notes, version: "1"}
servers: [{url: "https://notes.example.com"}]
components:
  securitySchemes:
    bearer: {type: http, scheme: bearer}
security: [{bearer: []}]
paths:
  /notes:
    get: {operationId: listNotes}
  /notes/{id}:
    delete:
      operationId: deleteNote
      parameters: [{name: id, in: path, required: true, schema: {type: string}}]
"#;

    #[test]
    fn test_resolve_env_var() {
        unsafe {
            env::set_var("OPENAPI_LLM_TEST_VAR", "test_value");
        }

        let resolved = ClientSettings::resolve_env_var("${OPENAPI_LLM_TEST_VAR}");
        assert_eq!(resolved, Some("test_value".to_string()));

        let not_var = ClientSettings::resolve_env_var("plain_value");
        assert_eq!(not_var, Some("plain_value".to_string()));

        assert_eq!(ClientSettings::resolve_env_var("${OPENAPI_LLM_UNSET_VAR}"), None);

        unsafe {
            env::remove_var("OPENAPI_LLM_TEST_VAR");
        }
    }

    #[test]
    fn test_load_from_file_relative_spec() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("notes.yaml"), SPEC).unwrap();
        unsafe {
            env::set_var("OPENAPI_LLM_NOTES_TOKEN", "tok-1");
        }

        let path = temp_dir.path().join(CONFIG_FILE_NAME);
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
openapi_spec = "notes.yaml"
provider = "cohere"
base_url = "http://127.0.0.1:9999"
timeout_secs = 5
allowed_operations = ["listNotes"]

[credentials.schemes.bearer]
token = "${{OPENAPI_LLM_NOTES_TOKEN}}"
"#
        )
        .unwrap();

        let settings = ClientSettings::load_from(&path).unwrap();
        assert_eq!(settings.spec_source(), SpecSource::Path(temp_dir.path().join("notes.yaml")));

        let config = settings.client_config().unwrap();
        assert_eq!(config.dialect, Dialect::Cohere);
        assert_eq!(config.dispatch.timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.base_url.as_deref(), Some("http://127.0.0.1:9999"));
        assert_eq!(config.index.len(), 2);
        assert!(config.filter.allows("listNotes"));
        assert!(!config.filter.allows("deleteNote"));
        assert!(matches!(
            config.credentials.for_scheme("bearer"),
            Some(Credential::Token(token)) if token == "tok-1"
        ));

        unsafe {
            env::remove_var("OPENAPI_LLM_NOTES_TOKEN");
        }
    }

    #[test]
    fn test_defaults_and_single_token() {
        let settings = ClientSettings::parse(
            r#"
openapi_spec = "https://example.com/openapi.json"

[credentials]
token = "abc"
"#,
        )
        .unwrap();
        assert_eq!(settings.dialect().unwrap(), Dialect::OpenAi);
        assert_eq!(settings.tool_filter(), ToolFilter::default());
        assert!(matches!(settings.spec_source(), SpecSource::Url(_)));
        assert_eq!(settings.credentials().unwrap(), Credentials::single("abc"));
    }

    #[test]
    fn test_invalid_settings() {
        let unset = ClientSettings::parse(r#"openapi_spec = "${OPENAPI_LLM_DEFINITELY_UNSET}""#);
        assert!(unset.is_err());

        let settings = ClientSettings::parse(
            r#"
openapi_spec = "x"
provider = "gemini"

[credentials.schemes.basic]
username = "admin"
"#,
        )
        .unwrap();
        assert!(settings.dialect().is_err());
        assert!(settings.credentials().is_err());
    }
}
