use hushtone_core::StegoError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Invalid config file {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Key is not valid base64: {0}")]
    KeyEncoding(#[from] base64::DecodeError),

    #[error("Unsupported WAV format: {0}")]
    UnsupportedFormat(String),

    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Stego(#[from] StegoError),
}

impl CliError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CliError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type CliResult<T> = std::result::Result<T, CliError>;
