//! Error types for the format codec.

use std::fmt::Display;

use thiserror::Error;

use crate::format::Format;

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors that can occur while parsing or rendering a record set.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The requested format is not implemented.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Content does not match the declared format.
    #[error("failed to parse {format} input: {message}")]
    Parse { format: Format, message: String },

    /// Encoder backend failure while producing output.
    #[error("failed to render {format} output: {message}")]
    Render { format: Format, message: String },
}

impl CodecError {
    pub(crate) fn parse(format: Format, err: impl Display) -> Self {
        Self::Parse {
            format,
            message: err.to_string(),
        }
    }

    pub(crate) fn render(format: Format, err: impl Display) -> Self {
        Self::Render {
            format,
            message: err.to_string(),
        }
    }
}
