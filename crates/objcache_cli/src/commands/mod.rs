//! CLI command implementations.

pub mod shape;
pub mod simulate;

use thiserror::Error;

/// Errors raised by CLI commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Input could not be parsed.
    #[error("invalid input: {0}")]
    Input(String),

    /// Unknown `--format` value.
    #[error("unknown output format: {0} (expected text or json)")]
    Format(String),

    /// A cache operation failed.
    #[error(transparent)]
    Cache(#[from] objcache_core::CacheError),

    /// Encoding or decoding failed.
    #[error(transparent)]
    Codec(#[from] objcache_codec::CodecError),

    /// JSON output could not be produced.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The async runtime could not start.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Output format selected with `--format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl Format {
    /// Parses a `--format` value.
    pub fn parse(format: &str) -> Result<Self, CommandError> {
        match format {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            other => Err(CommandError::Format(other.to_string())),
        }
    }
}
