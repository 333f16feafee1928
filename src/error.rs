use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VideogenError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Missing required credential: {0} is not set")]
    MissingCredential(String),

    #[error("Input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Stage '{stage}' did not produce required artifact {}", .path.display())]
    MissingArtifact { stage: String, path: PathBuf },

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Invalid cost entry for {service}/{operation}: amount {amount} is not finite")]
    InvalidCost {
        service: String,
        operation: String,
        amount: f64,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, VideogenError>;
