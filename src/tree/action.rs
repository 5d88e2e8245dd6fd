use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::fmt;
use std::str::FromStr;

use crate::variables::{ResolveError, Value, VariableStore, resolve_int};

/// Point name that makes a `move` inside an image search follow the current match.
pub const IMAGE_MATCH_POINT: &str = "image_search_match";

/// Every kind of step a macro can contain.
///
/// `loop`, `image_search` and `ocr` are containers; their children live in the
/// owning [`ActionTree`](super::ActionTree), not in the variant itself.
///
/// Resolvable fields are [`Value`]s: a literal number, or a string that may hold
/// `${var}` references and (for numeric fields) an arithmetic expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Sleep for `time` milliseconds plus a random `[0, jitter_ms]`.
    Wait {
        time: Value,
        #[serde(default)]
        jitter_ms: u64,
    },

    /// Move the cursor to an absolute screen position.
    Move { point: Point },

    /// Click a mouse button. A positive `hold` keeps it pressed for that many ms.
    Click {
        #[serde(default = "default_button")]
        button: Value,
        #[serde(default)]
        hold: Value,
    },

    /// Press or release a key.
    Key { key: Value, state: KeyState },

    SetVariable { name: String, value: Value },

    /// Write a variable's value to a file.
    SaveVariable {
        name: String,
        destination: Value,
        #[serde(default)]
        append: bool,
        #[serde(default)]
        append_newline: bool,
    },

    /// Evaluate an arithmetic expression into `output_var`.
    Calculate {
        expression: String,
        output_var: String,
    },

    /// Store the next line of `source` (text, or a file path when `is_file`).
    DataList {
        source: String,
        output_var: String,
        #[serde(default)]
        is_file: bool,
        #[serde(default)]
        skip_blank_lines: bool,
    },

    /// Bring the first window whose title contains `window_target` to the front.
    FocusWindow { window_target: Value },

    /// Poll a pixel until it matches `target_color` (`#rrggbb`).
    /// A `timeout_seconds` of 0 waits until the run is cancelled.
    WaitForPixel {
        point: Point,
        target_color: String,
        #[serde(default)]
        color_tolerance: u8,
        #[serde(default)]
        timeout_seconds: Value,
    },

    /// Sample the pixel at `point` into `<name>.x`, `<name>.y` and `<name>.color`.
    Calibration { name: String, point: Point },

    /// Repeat the children `count` times.
    Loop {
        count: Value,
        #[serde(default)]
        name: String,
    },

    /// Run the children once per on-screen match of `targets`.
    ImageSearch(ImageSearch),

    /// Read text from `search_area`; run the children when it contains `target`.
    Ocr {
        #[serde(default = "empty_text")]
        target: Value,
        search_area: SearchArea,
        #[serde(default)]
        output_variable: String,
    },
}

/// Closed set of action tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    Wait,
    Move,
    Click,
    Key,
    SetVariable,
    SaveVariable,
    Calculate,
    DataList,
    FocusWindow,
    WaitForPixel,
    Calibration,
    Loop,
    ImageSearch,
    Ocr,
}

impl ActionType {
    pub fn is_container(self) -> bool {
        matches!(
            self,
            ActionType::Loop | ActionType::ImageSearch | ActionType::Ocr
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Action {
    pub fn action_type(&self) -> ActionType {
        match self {
            Action::Wait { .. } => ActionType::Wait,
            Action::Move { .. } => ActionType::Move,
            Action::Click { .. } => ActionType::Click,
            Action::Key { .. } => ActionType::Key,
            Action::SetVariable { .. } => ActionType::SetVariable,
            Action::SaveVariable { .. } => ActionType::SaveVariable,
            Action::Calculate { .. } => ActionType::Calculate,
            Action::DataList { .. } => ActionType::DataList,
            Action::FocusWindow { .. } => ActionType::FocusWindow,
            Action::WaitForPixel { .. } => ActionType::WaitForPixel,
            Action::Calibration { .. } => ActionType::Calibration,
            Action::Loop { .. } => ActionType::Loop,
            Action::ImageSearch(_) => ActionType::ImageSearch,
            Action::Ocr { .. } => ActionType::Ocr,
        }
    }

    pub fn is_container(&self) -> bool {
        self.action_type().is_container()
    }

    pub fn wait(ms: i64) -> Self {
        Action::Wait {
            time: Value::Int(ms),
            jitter_ms: 0,
        }
    }

    pub fn move_to(x: impl Into<Value>, y: impl Into<Value>) -> Self {
        Action::Move {
            point: Point::new("", x, y),
        }
    }

    pub fn click(button: MouseButton) -> Self {
        Action::Click {
            button: Value::Str(button.as_str().to_string()),
            hold: Value::Int(0),
        }
    }

    pub fn key(key: &str, state: KeyState) -> Self {
        Action::Key {
            key: Value::Str(key.to_string()),
            state,
        }
    }

    pub fn set_variable(name: &str, value: impl Into<Value>) -> Self {
        Action::SetVariable {
            name: name.to_string(),
            value: value.into(),
        }
    }

    pub fn calculate(expression: &str, output_var: &str) -> Self {
        Action::Calculate {
            expression: expression.to_string(),
            output_var: output_var.to_string(),
        }
    }

    pub fn repeat(count: impl Into<Value>, name: &str) -> Self {
        Action::Loop {
            count: count.into(),
            name: name.to_string(),
        }
    }
}

fn default_button() -> Value {
    Value::Str(MouseButton::Left.as_str().to_string())
}

fn empty_text() -> Value {
    Value::Str(String::new())
}

/// Parameters of an image search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct ImageSearch {
    #[serde(default)]
    pub targets: Vec<IconTarget>,
    pub search_area: SearchArea,
    /// Grid partitioning of the search area. Stored and validated, not used by matching.
    #[serde(default = "one")]
    #[validate(minimum = 1)]
    pub row_split: u32,
    #[serde(default = "one")]
    #[validate(minimum = 1)]
    pub col_split: u32,
    /// Minimum match confidence in `[0, 1]`.
    #[serde(default = "default_tolerance")]
    pub tolerance: Value,
    /// Pre-blur region and templates with the fixed 5x5 Gaussian kernel.
    #[serde(default = "yes")]
    pub blur: bool,
    #[serde(default)]
    pub output_x_variable: String,
    #[serde(default)]
    pub output_y_variable: String,
}

impl ImageSearch {
    pub fn new(targets: Vec<IconTarget>, search_area: SearchArea) -> Self {
        Self {
            targets,
            search_area,
            row_split: 1,
            col_split: 1,
            tolerance: default_tolerance(),
            blur: true,
            output_x_variable: String::new(),
            output_y_variable: String::new(),
        }
    }
}

fn one() -> u32 {
    1
}

fn yes() -> bool {
    true
}

fn default_tolerance() -> Value {
    Value::Float(0.9)
}

/// An icon to look for: one item of one program in the icon library.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct IconTarget {
    pub program: String,
    pub item: String,
}

impl IconTarget {
    pub fn new(program: &str, item: &str) -> Self {
        Self {
            program: program.to_string(),
            item: item.to_string(),
        }
    }
}

impl fmt::Display for IconTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.program, self.item)
    }
}

/// A named screen position whose coordinates resolve at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Point {
    #[serde(default)]
    pub name: String,
    pub x: Value,
    pub y: Value,
}

impl Point {
    pub fn new(name: &str, x: impl Into<Value>, y: impl Into<Value>) -> Self {
        Self {
            name: name.to_string(),
            x: x.into(),
            y: y.into(),
        }
    }

    /// The image-search marker point.
    pub fn image_match() -> Self {
        Self::new(IMAGE_MATCH_POINT, 0, 0)
    }

    pub fn follows_image_match(&self) -> bool {
        self.name == IMAGE_MATCH_POINT
    }

    pub fn resolve(&self, vars: &VariableStore) -> Result<(i32, i32), ResolveError> {
        Ok((
            coordinate(&self.x, "point x", vars)?,
            coordinate(&self.y, "point y", vars)?,
        ))
    }
}

/// A named rectangle; each bound resolves independently at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchArea {
    #[serde(default)]
    pub name: String,
    pub left_x: Value,
    pub top_y: Value,
    pub right_x: Value,
    pub bottom_y: Value,
}

impl SearchArea {
    pub fn new(
        left_x: impl Into<Value>,
        top_y: impl Into<Value>,
        right_x: impl Into<Value>,
        bottom_y: impl Into<Value>,
    ) -> Self {
        Self {
            name: String::new(),
            left_x: left_x.into(),
            top_y: top_y.into(),
            right_x: right_x.into(),
            bottom_y: bottom_y.into(),
        }
    }

    pub fn resolve(&self, vars: &VariableStore) -> Result<Bounds, ResolveError> {
        Ok(Bounds {
            left: coordinate(&self.left_x, "search area left_x", vars)?,
            top: coordinate(&self.top_y, "search area top_y", vars)?,
            right: coordinate(&self.right_x, "search area right_x", vars)?,
            bottom: coordinate(&self.bottom_y, "search area bottom_y", vars)?,
        })
    }
}

/// Resolved search area edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn width(&self) -> i64 {
        i64::from(self.right) - i64::from(self.left)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.bottom) - i64::from(self.top)
    }
}

fn coordinate(value: &Value, field: &'static str, vars: &VariableStore) -> Result<i32, ResolveError> {
    let v = resolve_int(value, vars)?;
    i32::try_from(v).map_err(|_| ResolveError::InvalidValue {
        field,
        reason: format!("{v} is outside the screen coordinate range"),
    })
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    pub fn as_str(self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Middle => "middle",
            MouseButton::Right => "right",
        }
    }
}

impl FromStr for MouseButton {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "left" => Ok(MouseButton::Left),
            "middle" => Ok(MouseButton::Middle),
            "right" => Ok(MouseButton::Right),
            other => Err(ResolveError::InvalidValue {
                field: "mouse button",
                reason: format!("'{other}' is not one of left, middle, right"),
            }),
        }
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Down,
    Up,
}
