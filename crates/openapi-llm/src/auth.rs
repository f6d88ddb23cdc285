//! Authentication for OpenAPI operations.
//!
//! Credentials are supplied either as one opaque value used for whichever
//! scheme an operation asks for, or keyed by security scheme name. The
//! [`AuthSelector`] walks an operation's security alternatives in order and
//! applies the first one every scheme of which has a usable credential:
//! - API Key (in header, query parameter or cookie)
//! - Bearer Token (Authorization: Bearer <token>), also used for OAuth2 and
//!   OpenID Connect with a pre-obtained token
//! - Basic Auth (Authorization: Basic <base64>)

use crate::error::{OpenApiError, Result};
use crate::mapper::{InvocationRequest, check_cookie, check_header};
use crate::types::{AuthLocation, Operation, SecurityRequirement, SecurityScheme};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use indexmap::IndexMap;
use tracing::debug;

/// A secret for one security scheme.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// API key value or bearer token. Also accepted for HTTP basic when it
    /// has the form `user:password`.
    Token(String),
    /// HTTP basic username and password.
    Basic { username: String, password: String },
}

impl Credential {
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token(token.into())
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    fn as_token(&self) -> Option<&str> {
        match self {
            Credential::Token(token) => Some(token),
            Credential::Basic { .. } => None,
        }
    }

    fn as_basic(&self) -> Option<(&str, &str)> {
        match self {
            Credential::Basic { username, password } => Some((username, password)),
            Credential::Token(token) => token.split_once(':'),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
            Credential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Credential::Token(token.to_string())
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Credential::Token(token)
    }
}

/// Credentials available to a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    #[default]
    None,
    /// One credential, offered to every scheme.
    Single(Credential),
    /// Credentials keyed by security scheme name.
    PerScheme(IndexMap<String, Credential>),
}

impl Credentials {
    pub fn single(credential: impl Into<Credential>) -> Self {
        Credentials::Single(credential.into())
    }

    /// Credentials keyed by security scheme name.
    ///
    /// # Example
    ///
    /// ```
    /// use openapi_llm::{Credential, Credentials};
    ///
    /// let credentials = Credentials::per_scheme([
    ///     ("ApiKeyAuth", Credential::token("my-secret-key")),
    ///     ("BasicAuth", Credential::basic("user", "pass")),
    /// ]);
    /// assert!(credentials.for_scheme("BasicAuth").is_some());
    /// ```
    pub fn per_scheme<I, K>(credentials: I) -> Self
    where
        I: IntoIterator<Item = (K, Credential)>,
        K: Into<String>,
    {
        Credentials::PerScheme(
            credentials
                .into_iter()
                .map(|(name, credential)| (name.into(), credential))
                .collect(),
        )
    }

    /// The credential offered to the named scheme.
    pub fn for_scheme(&self, scheme: &str) -> Option<&Credential> {
        match self {
            Credentials::None => None,
            Credentials::Single(credential) => Some(credential),
            Credentials::PerScheme(credentials) => credentials.get(scheme),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Credentials::None)
    }
}

impl From<&str> for Credentials {
    fn from(token: &str) -> Self {
        Credentials::single(token)
    }
}

impl From<String> for Credentials {
    fn from(token: String) -> Self {
        Credentials::single(token)
    }
}

impl From<Credential> for Credentials {
    fn from(credential: Credential) -> Self {
        Credentials::Single(credential)
    }
}

/// One piece of authentication material placed into a request.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthMaterial {
    /// Security scheme the material satisfies.
    pub scheme: String,
    pub location: AuthLocation,
    /// Header, query parameter or cookie name.
    pub name: String,
    pub value: String,
}

impl std::fmt::Debug for AuthMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMaterial")
            .field("scheme", &self.scheme)
            .field("location", &self.location)
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Chooses a security alternative for an operation and applies it.
pub struct AuthSelector<'a> {
    schemes: &'a IndexMap<String, SecurityScheme>,
    credentials: &'a Credentials,
}

impl<'a> AuthSelector<'a> {
    pub fn new(schemes: &'a IndexMap<String, SecurityScheme>, credentials: &'a Credentials) -> Self {
        Self {
            schemes,
            credentials,
        }
    }

    /// Material for the first satisfiable alternative.
    ///
    /// Returns an empty list when the operation needs no authentication, or
    /// when only an empty (`{}`) alternative can be satisfied. Fails with
    /// `Authentication` when the operation requires credentials that are not
    /// available.
    pub fn select(&self, operation: &Operation) -> Result<Vec<AuthMaterial>> {
        if operation.security.is_empty() {
            return Ok(Vec::new());
        }

        let mut optional = false;
        for alternative in &operation.security {
            if alternative.is_empty() {
                optional = true;
                continue;
            }
            if let Some(material) = self.satisfy(alternative) {
                debug!(
                    "Operation {}: using security {:?}",
                    operation.operation_id,
                    alternative.schemes.keys().collect::<Vec<_>>()
                );
                return Ok(material);
            }
        }

        if optional {
            debug!("Operation {}: proceeding without authentication", operation.operation_id);
            return Ok(Vec::new());
        }
        let alternatives = operation
            .security
            .iter()
            .map(|alternative| {
                let names: Vec<&str> = alternative.schemes.keys().map(String::as_str).collect();
                format!("[{}]", names.join(" + "))
            })
            .collect::<Vec<_>>()
            .join(", ");
        Err(OpenApiError::Authentication {
            operation_id: operation.operation_id.clone(),
            reason: format!("no credentials satisfy any of {}", alternatives),
        })
    }

    /// Select and add authentication material to the request.
    pub fn apply(&self, operation: &Operation, request: &mut InvocationRequest) -> Result<()> {
        for material in self.select(operation)? {
            let operation_id = &operation.operation_id;
            match material.location {
                AuthLocation::Header => check_header(operation_id, &material.name, &material.value)?,
                AuthLocation::Cookie => check_cookie(operation_id, &material.name, &material.value)?,
                AuthLocation::Query => {}
            }
            let entry = (material.name, material.value);
            match material.location {
                AuthLocation::Header => request.headers.push(entry),
                AuthLocation::Query => request.query.push(entry),
                AuthLocation::Cookie => request.cookies.push(entry),
            }
        }
        Ok(())
    }

    fn satisfy(&self, alternative: &SecurityRequirement) -> Option<Vec<AuthMaterial>> {
        alternative
            .schemes
            .keys()
            .map(|name| self.material(name))
            .collect()
    }

    fn material(&self, scheme_name: &str) -> Option<AuthMaterial> {
        let scheme = self.schemes.get(scheme_name)?;
        let credential = self.credentials.for_scheme(scheme_name)?;
        let (location, name, value) = match scheme {
            SecurityScheme::ApiKey { name, location } => {
                (*location, name.clone(), credential.as_token()?.to_string())
            }
            SecurityScheme::HttpBearer | SecurityScheme::OAuth2 => (
                AuthLocation::Header,
                "Authorization".to_string(),
                format!("Bearer {}", credential.as_token()?),
            ),
            SecurityScheme::HttpBasic => {
                let (username, password) = credential.as_basic()?;
                let encoded = STANDARD.encode(format!("{}:{}", username, password));
                (AuthLocation::Header, "Authorization".to_string(), format!("Basic {}", encoded))
            }
            SecurityScheme::Unsupported { .. } => return None,
        };
        Some(AuthMaterial {
            scheme: scheme_name.to_string(),
            location,
            name,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::OperationIndex;
    use crate::mapper::PayloadMapper;
    use crate::spec::Specification;
    use serde_json::Map;

    const SPEC: &str = r#"
openapi: 3.0.3
info:
  title: Auth
  version: 1.0.0
servers:
  - url: https://api.example.com
security:
  - ApiKeyAuth: []
  - BearerAuth: []
paths:
  /items:
    get:
      operationId: listItems
  /admin:
    get:
      operationId: admin
      security:
        - BasicAuth: []
  /mixed:
    get:
      operationId: mixed
      security:
        - ApiKeyAuth: []
          SessionCookie: []
  /public:
    get:
      operationId: public
      security:
        - {}
        - BearerAuth: []
components:
  securitySchemes:
    ApiKeyAuth:
      type: apiKey
      in: query
      name: api_key
    SessionCookie:
      type: apiKey
      in: cookie
      name: sid
    BearerAuth:
      type: http
      scheme: bearer
    BasicAuth:
      type: http
      scheme: basic
"#;

    fn fixture() -> (Specification, OperationIndex) {
        let spec: Specification = SPEC.parse().unwrap();
        let index = OperationIndex::build(&spec).unwrap();
        (spec, index)
    }

    fn authorize(id: &str, credentials: &Credentials) -> Result<InvocationRequest> {
        let (spec, index) = fixture();
        let operation = index.operation(id)?;
        let mut request = PayloadMapper::new(operation).build_request(&Map::new(), None)?;
        AuthSelector::new(spec.security_schemes(), credentials).apply(operation, &mut request)?;
        Ok(request)
    }

    #[test]
    fn test_prefers_first_satisfiable_alternative() {
        let credentials = Credentials::per_scheme([("BearerAuth", Credential::token("tok"))]);
        let request = authorize("listItems", &credentials).unwrap();
        assert_eq!(request.header("Authorization"), Some("Bearer tok"));
        // the apiKey alternative was not attempted
        assert!(request.query.is_empty());
    }

    #[test]
    fn test_single_credential_uses_first_alternative() {
        let request = authorize("listItems", &Credentials::single("k-123")).unwrap();
        assert_eq!(request.query_value("api_key"), Some("k-123"));
        assert_eq!(request.header("Authorization"), None);
    }

    #[test]
    fn test_basic_auth() {
        let credentials = Credentials::per_scheme([("BasicAuth", Credential::basic("user", "pass"))]);
        let request = authorize("admin", &credentials).unwrap();
        assert_eq!(request.header("Authorization"), Some("Basic dXNlcjpwYXNz"));

        // a single token works for basic only in user:password form
        let request = authorize("admin", &Credentials::single("user:pass")).unwrap();
        assert_eq!(request.header("Authorization"), Some("Basic dXNlcjpwYXNz"));
        let err = authorize("admin", &Credentials::single("opaque")).unwrap_err();
        assert!(matches!(err, OpenApiError::Authentication { .. }));
    }

    #[test]
    fn test_all_schemes_of_an_alternative_are_applied() {
        let credentials = Credentials::per_scheme([
            ("ApiKeyAuth", Credential::token("k")),
            ("SessionCookie", Credential::token("s")),
        ]);
        let request = authorize("mixed", &credentials).unwrap();
        assert_eq!(request.query_value("api_key"), Some("k"));
        assert_eq!(request.cookie_header(), Some("sid=s".to_string()));

        let partial = Credentials::per_scheme([("ApiKeyAuth", Credential::token("k"))]);
        let err = authorize("mixed", &partial).unwrap_err();
        assert!(err.to_string().contains("ApiKeyAuth + SessionCookie"));
    }

    #[test]
    fn test_missing_credentials_fail_before_dispatch() {
        let err = authorize("listItems", &Credentials::None).unwrap_err();
        match err {
            OpenApiError::Authentication { operation_id, reason } => {
                assert_eq!(operation_id, "listItems");
                assert!(reason.contains("[ApiKeyAuth], [BearerAuth]"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_optional_security() {
        let request = authorize("public", &Credentials::None).unwrap();
        assert_eq!(request.header("Authorization"), None);

        let request = authorize("public", &Credentials::single("tok")).unwrap();
        assert_eq!(request.header("Authorization"), Some("Bearer tok"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let credentials = Credentials::per_scheme([
            ("a", Credential::token("super-secret")),
            ("b", Credential::basic("user", "hunter2")),
        ]);
        let printed = format!("{:?}", credentials);
        assert!(!printed.contains("super-secret"));
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("user"));
    }
}
