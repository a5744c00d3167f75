use thiserror::Error;

#[derive(Error, Debug)]
pub enum Scout8Error {
    #[error("Target unreachable: {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("Trust policy violation: {0}")]
    PolicyViolation(String),

    #[error("Agent returned error {code}: {message}")]
    AgentError { code: i64, message: String },

    #[error("Kubernetes error: {0}")]
    KubernetesError(String),

    #[error("Key source error: {0}")]
    KeySourceError(String),

    #[error("Signing error: {0}")]
    SigningError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Scout8Error>;
