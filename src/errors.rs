use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Screen capture error: {0}")]
    Screen(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Application not found: {0}")]
    ApplicationNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Interrupted")]
    Interrupted,
}

impl AgentError {
    /// Whether a provider-side failure should be waited out and retried.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            AgentError::RateLimited(_) => true,
            AgentError::Model(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("rate limit") || msg.contains("429")
            }
            _ => false,
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
