use std::path::PathBuf;

/// Errors for operations that require a compiled flow
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("step flow has not been compiled - call compile() first")]
    NotCompiled,
    #[error("step flow has no steps to run")]
    EmptyFlow,
    #[error("step flow is already running")]
    AlreadyRunning,
    #[error("step flow is not running - call begin() first")]
    NotRunning,
    #[error("unknown step id: {0}")]
    UnknownStep(String),
}

/// Failures while resolving or constructing a step helper
#[derive(Debug, thiserror::Error)]
pub enum HelperError {
    #[error("no helper registered under '{name}'")]
    Unknown { name: String },
    #[error("helper '{name}' failed to construct: {source:#}")]
    Construction {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("helper '{name}' failed to initialize: {message}")]
    Init { name: String, message: String },
}

/// Errors loading or saving the configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("could not determine a config directory")]
    NoConfigDir,
    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
