//! Authorization seam: produces the `Authorization` header for a request.
//! Signature computation lives with the caller; this crate only invokes it.

use crate::request::Method;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Produces an `Authorization` header value for `method` + `url` + `params`.
pub trait Authorizer: Send + Sync {
    fn authorize(
        &self,
        method: Method,
        url: &str,
        params: &[(String, String)],
    ) -> Result<String, AuthError>;
}

/// App-only bearer token.
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(..)")
    }
}

impl Authorizer for BearerToken {
    fn authorize(&self, _: Method, _: &str, _: &[(String, String)]) -> Result<String, AuthError> {
        if self.0.trim().is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        Ok(format!("Bearer {}", self.0.trim()))
    }
}

/// Header value computed elsewhere (e.g. an externally signed OAuth header).
#[derive(Debug, Clone)]
pub struct StaticHeader(pub String);

impl Authorizer for StaticHeader {
    fn authorize(&self, _: Method, _: &str, _: &[(String, String)]) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

impl<F> Authorizer for F
where
    F: Fn(Method, &str, &[(String, String)]) -> Result<String, AuthError> + Send + Sync,
{
    fn authorize(
        &self,
        method: Method,
        url: &str,
        params: &[(String, String)],
    ) -> Result<String, AuthError> {
        self(method, url, params)
    }
}
