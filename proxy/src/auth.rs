use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("access token invalid or expired")]
    InvalidToken,
    #[error("authorization failed: {0}")]
    Failed(String),
}

/// Source of bearer tokens for outbound registration requests.
///
/// The client registration dance with the authorization server happens
/// elsewhere; the proxy only asks for a token per request and for a
/// refresh when the current one is rejected.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String, AuthError>;

    async fn refresh(&self) -> Result<(), AuthError>;
}
