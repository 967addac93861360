use std::path::{Path, PathBuf};

use crate::config::types::GradeboxConfig;
use crate::error::{Result, SandboxError};

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "gradebox", "gradebox") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        // Fallback to home directory
        dirs_fallback().join(".gradebox").join("config.toml")
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values.
///
/// An explicitly requested path must exist; the default path may be absent.
pub fn load_config(config_path: Option<&Path>) -> Result<GradeboxConfig> {
    let path = match config_path {
        Some(path) => {
            if !path.exists() {
                return Err(SandboxError::ConfigNotFound {
                    path: path.display().to_string(),
                });
            }
            path.to_path_buf()
        }
        None => {
            let path = get_config_path();
            if !path.exists() {
                return Ok(GradeboxConfig::default());
            }
            path
        }
    };

    let content = std::fs::read_to_string(&path)?;
    parse_config(&content)
}

/// Parse and validate a TOML configuration document.
pub fn parse_config(content: &str) -> Result<GradeboxConfig> {
    let config: GradeboxConfig =
        toml::from_str(content).map_err(|e| SandboxError::TomlParse(e.to_string()))?;

    if config.sandbox.default_timeout_seconds == 0 {
        return Err(SandboxError::Config(
            "sandbox.default_timeout_seconds must be greater than 0".to_string(),
        ));
    }
    if config.sandbox.max_timeout_seconds < config.sandbox.default_timeout_seconds {
        return Err(SandboxError::Config(format!(
            "sandbox.max_timeout_seconds ({}) is below default_timeout_seconds ({})",
            config.sandbox.max_timeout_seconds, config.sandbox.default_timeout_seconds
        )));
    }
    if config.docker.binary.trim().is_empty() {
        return Err(SandboxError::Config(
            "docker.binary must not be empty".to_string(),
        ));
    }

    Ok(config)
}

/// Render the default configuration as TOML, used by `gradebox init`.
pub fn default_config_toml() -> Result<String> {
    toml::to_string_pretty(&GradeboxConfig::default())
        .map_err(|e| SandboxError::Config(format!("Failed to serialize config: {}", e)))
}
