//! Macro documents.
//!
//! This module wires together the saved-macro data models and the loading/validation
//! helpers. The core engine never reads files itself; callers load a
//! [`MacroDocument`] here and turn it into an [`ActionTree`](crate::tree::ActionTree).
//!
//! Example:
//! use macrotree::config::load_from_path;
//! use macrotree::tree::ActionTree;
//!
//! let doc = load_from_path("macros/loot.json")?;
//! let tree = ActionTree::from_defs(&doc.actions)?;

pub mod loader;
pub mod models;

// Re-export core data models
pub use models::{MacroDocument, NodeDef, RunSettings, VariablesMap};

// Re-export loader utilities
pub use loader::{
    generate_schema, load_from_path, load_from_path_async, load_from_reader, load_from_str,
    validate_document, write_schema_to_writer,
};
