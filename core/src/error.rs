use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TroveError>;

#[derive(Error, Debug)]
pub enum TroveError {
    /// A stage ran before the stage that produces its inputs.
    #[error("missing {}: run `{stage}` first", path.display())]
    MissingPrerequisite { path: PathBuf, stage: &'static str },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Cache files exist but disagree with each other or cannot be parsed.
    #[error("malformed cache {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TroveError {
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TroveError::Corrupt { path: path.into(), reason: reason.into() }
    }
}
