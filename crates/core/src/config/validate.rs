use super::{types::AuthMethod, types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Auth section exists (enforced by serde) and api_key auth has a key
/// - Server port is not 0
/// - Lease duration and dispatch batch size are positive
/// - Orchestrator intervals are positive
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    // Auth validation
    if config.auth.method == AuthMethod::ApiKey
        && config.auth.api_key.as_deref().unwrap_or("").is_empty()
    {
        return Err(ConfigError::ValidationError(
            "auth.api_key is required when auth.method is \"api_key\"".to_string(),
        ));
    }

    // Component validation
    if config.lease.duration_secs == 0 {
        return Err(ConfigError::ValidationError(
            "lease.duration_secs cannot be 0".to_string(),
        ));
    }
    if config.dispatch.batch_size <= 0 {
        return Err(ConfigError::ValidationError(
            "dispatch.batch_size must be positive".to_string(),
        ));
    }
    if config.orchestrator.dispatch_interval_ms == 0 || config.orchestrator.reap_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator intervals cannot be 0".to_string(),
        ));
    }

    Ok(())
}
