//! Authentication types.

use std::collections::HashMap;
use std::net::IpAddr;

use thiserror::Error;

/// Error type for authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credentials were presented.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Credentials were presented but rejected.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The authenticator is misconfigured.
    #[error("auth configuration error: {0}")]
    Configuration(String),
}

/// The relevant parts of an incoming request.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// Lower-cased header names mapped to their values.
    pub headers: HashMap<String, String>,
    /// Source address of the request.
    pub source_ip: IpAddr,
}

/// An authenticated identity.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Stable user identifier.
    pub user_id: String,
    /// Which method authenticated this request.
    pub method: String,
    /// Method-specific claims.
    pub claims: HashMap<String, String>,
}

impl Identity {
    /// The anonymous identity used when authentication is disabled.
    pub fn anonymous() -> Self {
        Self {
            user_id: "anonymous".to_string(),
            method: "none".to_string(),
            claims: HashMap::new(),
        }
    }
}
