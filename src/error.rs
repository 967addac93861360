use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Sandbox errors
    #[error("Backend '{backend}' is not available: {reason}")]
    BackendNotAvailable { backend: String, reason: String },

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SandboxError {
    /// Failures of the isolated environment itself, as opposed to
    /// failures orchestrating it.
    pub fn is_container_error(&self) -> bool {
        matches!(
            self,
            Self::ContainerError(_) | Self::BackendNotAvailable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
