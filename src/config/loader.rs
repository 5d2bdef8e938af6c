//! Config loader: converts raw JSON/TOML text into [`CoordinatorConfig`].

use super::types::CoordinatorConfig;
use crate::error::ExecError;

/// Supported config input formats.
#[derive(Debug, Clone, Copy)]
pub enum ConfigFormat {
    /// JSON format (`.json`).
    Json,
    /// TOML format (`.toml`).
    Toml,
}

impl ConfigFormat {
    /// Guess the format from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(ConfigFormat::Json),
            "toml" => Some(ConfigFormat::Toml),
            _ => None,
        }
    }
}

/// Parse config content into a [`CoordinatorConfig`].
pub fn load_config(content: &str, format: ConfigFormat) -> Result<CoordinatorConfig, ExecError> {
    let config: CoordinatorConfig = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Toml => toml::from_str(content)?,
    };
    validate(&config)?;
    Ok(config)
}

fn validate(config: &CoordinatorConfig) -> Result<(), ExecError> {
    if config.command_buffer == 0 {
        return Err(ExecError::Config("command_buffer must be positive".into()));
    }
    for (name, ws) in &config.workspaces {
        if ws.step_limit == 0 {
            return Err(ExecError::Config(format!(
                "workspace '{}': step_limit must be positive",
                name
            )));
        }
        if ws.retry_token.trim().is_empty() {
            return Err(ExecError::Config(format!(
                "workspace '{}': retry_token must not be blank",
                name
            )));
        }
    }
    Ok(())
}
