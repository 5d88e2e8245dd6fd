use anyhow::{Context, Result, bail};
use schemars::{Schema, schema_for};
use serde_valid::Validate;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

use super::models::{MacroDocument, NodeDef};
use crate::tree::Action;

/// Load a macro document from a string slice.
pub fn load_from_str(s: &str) -> Result<MacroDocument> {
    let doc: MacroDocument =
        serde_json::from_str(s).context("Failed to parse JSON macro string into MacroDocument")?;
    validate_document(&doc)?;
    Ok(doc)
}

/// Load a macro document from any reader (e.g., a file).
pub fn load_from_reader<R: Read>(reader: R) -> Result<MacroDocument> {
    let doc: MacroDocument =
        serde_json::from_reader(reader).context("Failed to parse JSON macro from reader")?;
    validate_document(&doc)?;
    Ok(doc)
}

/// Load a macro document from a file path synchronously.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<MacroDocument> {
    let path_ref = path.as_ref();
    let file = File::open(path_ref)
        .with_context(|| format!("Failed to open macro file {}", path_ref.display()))?;
    let doc = load_from_reader(file)?;
    debug!("Loaded macro from {}", path_ref.display());
    Ok(doc)
}

/// Load a macro document from a file path asynchronously (Tokio).
pub async fn load_from_path_async<P: AsRef<Path>>(path: P) -> Result<MacroDocument> {
    use tokio::fs;
    let path_ref = path.as_ref();
    let bytes = fs::read(path_ref)
        .await
        .with_context(|| format!("Failed to read macro file {}", path_ref.display()))?;
    let doc: MacroDocument = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse JSON macro from {}", path_ref.display()))?;
    validate_document(&doc)?;
    debug!("Loaded macro from {}", path_ref.display());
    Ok(doc)
}

/// Generate the JSON Schema for the macro document model.
pub fn generate_schema() -> Schema {
    schema_for!(MacroDocument)
}

/// Write the JSON Schema for the macro document model to any writer (pretty-printed).
pub fn write_schema_to_writer<W: Write>(mut writer: W) -> Result<()> {
    let schema = generate_schema();
    let json = serde_json::to_string_pretty(&schema).context("Failed to serialize schema")?;
    writer
        .write_all(json.as_bytes())
        .context("Failed to write schema to writer")?;
    Ok(())
}

/// Sanity checks that serde alone cannot express.
/// - Settings are within their documented ranges.
/// - Macro-level variable names are not blank.
/// - UIDs are unique across the whole document.
/// - Only container actions carry `sub_actions`.
/// - Image search parameters are valid.
pub fn validate_document(doc: &MacroDocument) -> Result<()> {
    doc.settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid settings: {e}"))?;

    for name in doc.variables.keys() {
        if name.trim().is_empty() {
            bail!("Macro variable names must not be empty");
        }
    }

    let mut uids = BTreeSet::new();
    for (idx, node) in doc.actions.iter().enumerate() {
        validate_node(node, &mut uids).with_context(|| format!("Invalid action at index {idx}"))?;
    }
    Ok(())
}

fn validate_node(node: &NodeDef, uids: &mut BTreeSet<String>) -> Result<()> {
    if let Some(uid) = &node.uid {
        if uid.is_empty() {
            bail!("UID must not be empty (the empty UID is reserved for the root)");
        }
        if !uids.insert(uid.clone()) {
            bail!("Duplicate UID '{uid}'");
        }
    }

    if !node.action.is_container() && !node.sub_actions.is_empty() {
        bail!(
            "{} actions cannot have sub_actions",
            node.action.action_type()
        );
    }

    match &node.action {
        Action::ImageSearch(spec) => {
            spec.validate()
                .map_err(|e| anyhow::anyhow!("Invalid image_search: {e}"))?;
        }
        Action::SetVariable { name, .. }
        | Action::SaveVariable { name, .. }
        | Action::Calibration { name, .. } => {
            if name.trim().is_empty() {
                bail!("{} requires a variable name", node.action.action_type());
            }
        }
        Action::Calculate { output_var, .. } | Action::DataList { output_var, .. } => {
            if output_var.trim().is_empty() {
                bail!("{} requires output_var", node.action.action_type());
            }
        }
        Action::Wait { .. }
        | Action::Move { .. }
        | Action::Click { .. }
        | Action::Key { .. }
        | Action::FocusWindow { .. }
        | Action::WaitForPixel { .. }
        | Action::Loop { .. }
        | Action::Ocr { .. } => {}
    }

    for (i, child) in node.sub_actions.iter().enumerate() {
        validate_node(child, uids).with_context(|| format!("Invalid sub-action at index {i}"))?;
    }
    Ok(())
}
