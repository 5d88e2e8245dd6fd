#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! macrotree: an action-tree macro engine driving mouse and keyboard input, with
//! image-search driven targeting.
//!
//! A macro is a tree of actions under an implicit root loop. The executor walks it
//! depth-first, resolving `${var}` references and arithmetic through the per-run
//! variable store, and re-enters the children of an image search once per match.
//! - `config`: macro document models, loader, and schema helpers.
//! - `error`: the error taxonomy of a macro run.
//! - `executor`: input-injection seam and the tree interpreter.
//! - `matcher`: concurrent multi-target template matching.
//! - `tree`: the action tree model.
//! - `utils`: colour and window helpers.
//! - `variables`: variable store and expression evaluator.
//!
//! Use `macrotree::prelude::*` to bring commonly used items into scope quickly.

/// Public module: macro documents (models, loader, schema helpers).
pub mod config;
/// Public module: run errors.
pub mod error;
/// Public module: execution engine (input driver and runtime).
pub mod executor;
/// Public module: image search.
pub mod matcher;
/// Public module: action tree.
pub mod tree;
/// Public module: utilities (colours, window lookup).
pub mod utils;
/// Public module: variables and expressions.
pub mod variables;

/// Crate-level constants for consumers that want to inspect package metadata at runtime.
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version (e.g., "0.1.0").
#[inline]
pub const fn version() -> &'static str {
    PKG_VERSION
}

/// Parse a log level name (trace|debug|info|warn|error), case-insensitively.
pub fn parse_level(name: &str) -> Option<tracing::Level> {
    use tracing::Level;
    match name.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize tracing (logging) with a reasonable default.
/// - Honors the `RUST_LOG` environment variable if set.
/// - Falls back to `info` level.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init_tracing() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| parse_level(&s))
        .unwrap_or(tracing::Level::INFO);
    init_tracing_with(level);
}

/// Initialize tracing at a fixed maximum level. Later calls are no-ops.
pub fn init_tracing_with(level: tracing::Level) {
    // Ignore the error if the global subscriber was already set.
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}

/// A convenient set of exports for most consumers.
///
/// Bring this into scope with:
/// `use macrotree::prelude::*;`
pub mod prelude {
    // Common result/error handling
    pub use crate::error::{MacroError, MacroResult};
    pub use anyhow::{Context, Result, anyhow, bail};

    // Tracing macros
    pub use tracing::{debug, error, info, trace, warn};

    // Core types
    pub use crate::config::{MacroDocument, NodeDef};
    pub use crate::executor::{EnigoDriver, InputDriver, Runtime};
    pub use crate::matcher::{DirectoryAssets, ImageMatcher, XcapCapture};
    pub use crate::tree::{Action, ActionTree, NodeId};
    pub use crate::variables::{Value, VariableStore};

    // External crates (namespaced) if callers want direct access
    pub use crate as macrotree;
    pub use tokio_util::sync::CancellationToken;

    // Frequently used internal modules
    pub use crate::{config, executor, matcher, tree, utils, variables};
}
