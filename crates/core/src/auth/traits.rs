//! Authentication trait.

use async_trait::async_trait;

use super::{AuthError, AuthRequest, Identity};

/// Pluggable request authenticator.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate a request, returning the identity on success.
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError>;

    /// Name of this authentication method.
    fn method_name(&self) -> &'static str;
}
