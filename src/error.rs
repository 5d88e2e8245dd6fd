//! Errors returned by a macro run.

use std::path::PathBuf;
use thiserror::Error;

use crate::tree::TreeError;
use crate::variables::ResolveError;

/// Result type for macro execution.
pub type MacroResult<T> = Result<T, MacroError>;

/// Anything that aborts a macro run.
///
/// Every variant is fatal to the whole run: the first error unwinds all enclosing
/// loops and image searches. A missing icon or template during an image search is
/// not an error; that target is logged and simply produces no matches.
#[derive(Debug, Error)]
pub enum MacroError {
    #[error("malformed action tree: {0}")]
    Structural(#[from] TreeError),

    #[error("{0}")]
    Resolution(#[from] ResolveError),

    #[error("input injection failed: {0:#}")]
    InputInjection(anyhow::Error),

    #[error("screen capture failed: {0:#}")]
    Capture(anyhow::Error),

    #[error("text recognition failed: {0:#}")]
    Recognition(anyhow::Error),

    #[error("search area is empty ({width}x{height})")]
    EmptySearchArea { width: i64, height: i64 },

    #[error("pixel at ({x}, {y}) did not reach {color} within {seconds}s")]
    PixelTimeout {
        x: i32,
        y: i32,
        color: String,
        seconds: f64,
    },

    #[error("{action}: {reason}")]
    InvalidAction {
        action: &'static str,
        reason: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is required but was not configured")]
    MissingCollaborator(&'static str),

    #[error("macro run cancelled")]
    Cancelled,
}

impl MacroError {
    pub fn invalid(action: &'static str, reason: impl Into<String>) -> Self {
        MacroError::InvalidAction {
            action,
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MacroError::Io {
            path: path.into(),
            source,
        }
    }
}
