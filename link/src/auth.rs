//! Authentication provider for the backend connection.
//!
//! The backend accepts an opaque bearer token (typically a JWT issued by the
//! identity provider). HTTP calls carry it in the `Authorization` header; the
//! sync socket sends it in the first `authenticate` frame.

/// Authentication credentials for the backend.
///
/// # Examples
///
/// ```rust
/// use detector_link::AuthProvider;
///
/// let auth = AuthProvider::token("eyJhbGc...");
/// assert!(auth.is_authenticated());
///
/// let anonymous = AuthProvider::none();
/// assert!(!anonymous.is_authenticated());
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub enum AuthProvider {
    /// Bearer token authentication
    Token(String),

    /// Anonymous access
    #[default]
    None,
}

impl AuthProvider {
    /// Create bearer token authentication
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token(token.into())
    }

    /// Anonymous access
    pub fn none() -> Self {
        Self::None
    }

    /// Build from an optional token, treating blank values as anonymous.
    pub fn from_optional(token: Option<String>) -> Self {
        match token {
            Some(t) if !t.trim().is_empty() => Self::Token(t.trim().to_string()),
            _ => Self::None,
        }
    }

    /// Attach the `Authorization` header to an HTTP request builder.
    pub fn apply_to_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Token(token) => request.bearer_auth(token),
            Self::None => request,
        }
    }

    /// Token to send in the socket `authenticate` frame, if any.
    pub(crate) fn socket_token(&self) -> Option<&str> {
        match self {
            Self::Token(token) => Some(token.as_str()),
            Self::None => None,
        }
    }

    /// Check if authentication is configured
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::None)
    }
}

// Tokens must never end up in logs.
impl std::fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(<redacted>)"),
            Self::None => f.write_str("None"),
        }
    }
}
