//! Authentication provider for the quarry-link client.
//!
//! Handles JWT tokens and HTTP Basic Auth, producing the `Authorization`
//! header attached to every protocol request.

use base64::{engine::general_purpose, Engine as _};

/// Credentials sent with every request of a client.
///
/// ```rust
/// use quarry_link::AuthProvider;
///
/// let auth = AuthProvider::basic_auth("root".into(), "".into());
/// assert_eq!(auth.authorization_header().as_deref(), Some("Basic cm9vdDo="));
/// assert!(AuthProvider::none().authorization_header().is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub enum AuthProvider {
    /// Username and password.
    BasicAuth(String, String),

    /// Bearer token issued by an identity provider.
    JwtToken(String),

    /// No authentication
    #[default]
    None,
}

impl AuthProvider {
    /// Create HTTP Basic Auth, encoded as `Authorization: Basic` per RFC 7617.
    pub fn basic_auth(username: String, password: String) -> Self {
        Self::BasicAuth(username, password)
    }

    pub fn jwt_token(token: String) -> Self {
        Self::JwtToken(token)
    }

    pub fn none() -> Self {
        Self::None
    }

    /// Value of the `Authorization` header for this provider.
    ///
    /// - BasicAuth: `Basic <base64(username:password)>`
    /// - JwtToken: `Bearer <token>`
    /// - None: no header
    pub fn authorization_header(&self) -> Option<String> {
        match self {
            Self::BasicAuth(username, password) => {
                let pair = format!("{username}:{password}");
                Some(format!("Basic {}", general_purpose::STANDARD.encode(pair)))
            },
            Self::JwtToken(token) => Some(format!("Bearer {}", token)),
            Self::None => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_authenticated() {
        assert!(AuthProvider::basic_auth("alice".into(), "secret".into()).is_authenticated());
        assert!(AuthProvider::jwt_token("t".into()).is_authenticated());
        assert!(!AuthProvider::none().is_authenticated());
    }

    #[test]
    fn test_basic_header_is_base64_pair() {
        let auth = AuthProvider::basic_auth("alice".to_string(), "secret123".to_string());
        // base64 of "alice:secret123"
        assert_eq!(
            auth.authorization_header().as_deref(),
            Some("Basic YWxpY2U6c2VjcmV0MTIz")
        );
    }

    #[test]
    fn test_jwt_uses_bearer_scheme() {
        let auth = AuthProvider::jwt_token("abc".to_string());
        assert_eq!(auth.authorization_header().as_deref(), Some("Bearer abc"));
        assert!(AuthProvider::none().authorization_header().is_none());
    }
}
