//! Configuration commands.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Dump the current configuration to stdout.
///
/// The token is masked unless it is a secret reference.
pub fn dump(config: &ClientConfig) -> ClientResult<()> {
    let mut shown = config.clone();
    if let Some(ref token) = shown.auth.token
        && !token.starts_with("env::")
        && !token.starts_with("pass::")
    {
        shown.auth.token = Some("***".to_string());
    }

    let toml_str = toml::to_string_pretty(&shown)
        .map_err(|e| ClientError::Config(format!("failed to serialize config: {}", e)))?;
    println!("# config.toml ({})", ClientConfig::default_path().display());
    println!("{}", toml_str);

    Ok(())
}

/// Validate the configuration.
pub fn validate(config: &ClientConfig) -> ClientResult<()> {
    let session = config.to_session_config().map_err(ClientError::Config)?;
    println!("Endpoint: {} ({})", session.endpoint(), session.transport);

    if config.auth.token.is_some() {
        config
            .resolve_token()
            .map_err(|e| ClientError::Config(format!("invalid staff token: {}", e)))?;
        println!("Staff token resolves.");
    } else {
        println!("No staff token configured; pass --token or set EXAMFLOW_TOKEN.");
    }

    println!("Configuration is valid.");
    Ok(())
}

/// Show the configuration file path.
pub fn path() -> ClientResult<()> {
    let config_path = ClientConfig::default_path();
    println!("config: {}", config_path.display());
    Ok(())
}
