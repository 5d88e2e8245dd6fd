use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::tree::Action;
use crate::variables::Value;

/// A saved macro.
///
/// The document holds the children of the implicit root loop (`actions`), the
/// macro-level variables every run starts with, and run settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct MacroDocument {
    /// Display name of the macro.
    #[serde(default)]
    pub name: String,

    /// Macro-level variables, available as `${name}` from the first action on.
    #[serde(default)]
    pub variables: VariablesMap,

    /// Runtime settings.
    #[serde(default)]
    pub settings: RunSettings,

    /// Top-level actions, executed in order once per run.
    #[serde(default)]
    pub actions: Vec<NodeDef>,
}

/// Macro-level variables.
pub type VariablesMap = BTreeMap<String, Value>;

/// One node in its saved form.
///
/// Example:
/// ```json
/// { "uid": "a1", "type": "loop", "count": 3, "sub_actions": [
///     { "type": "click", "button": "left" }
/// ] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NodeDef {
    /// Stable identifier. Generated when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(flatten)]
    pub action: Action,

    /// Children; only allowed on `loop`, `image_search` and `ocr`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_actions: Vec<NodeDef>,
}

impl NodeDef {
    pub fn new(action: Action) -> Self {
        Self {
            uid: None,
            action,
            sub_actions: Vec::new(),
        }
    }

    pub fn with_children(action: Action, sub_actions: Vec<NodeDef>) -> Self {
        Self {
            uid: None,
            action,
            sub_actions,
        }
    }
}

/// Runtime settings of a macro.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct RunSettings {
    /// Poll interval of `wait_for_pixel`, in milliseconds.
    #[serde(default = "default_pixel_poll_ms")]
    #[validate(minimum = 10)]
    #[validate(maximum = 60_000)]
    pub pixel_poll_ms: u64,

    /// Root of the icon library used by `image_search`.
    #[serde(default)]
    pub assets_dir: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            pixel_poll_ms: default_pixel_poll_ms(),
            assets_dir: None,
        }
    }
}

fn default_pixel_poll_ms() -> u64 {
    100
}
