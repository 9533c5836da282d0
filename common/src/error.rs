use thiserror::Error;

/// Errors raised while loading data or talking to external collaborators.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Data format error in {path} on line {line}: {message}")]
    DataFormat {
        path: String,
        line: usize,
        message: String,
    },
    #[error("Empty input: {0}")]
    EmptyInput(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("NLI classifier error: {0}")]
    Nli(String),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    pub fn data_format(path: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::DataFormat {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}
