//! No-op authentication for trusted deployments.

use async_trait::async_trait;
use std::collections::HashMap;

use super::{AuthError, AuthRequest, Authenticator, Identity};

/// Authenticator that accepts every request as an anonymous identity.
pub struct NoneAuthenticator;

#[async_trait]
impl Authenticator for NoneAuthenticator {
    async fn authenticate(&self, _request: &AuthRequest) -> Result<Identity, AuthError> {
        Ok(Identity {
            user_id: "anonymous".to_string(),
            method: "none".to_string(),
            claims: HashMap::new(),
        })
    }

    fn method_name(&self) -> &'static str {
        "none"
    }
}
