use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Form file not found: {}", path.display())]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid {name} header: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("No Tokio runtime available")]
    NoRuntime,

    #[error("Form manager is shutting down")]
    ShuttingDown,
}
