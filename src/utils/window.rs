use anyhow::{Context, Result};
use tracing::{debug, trace};
use xcap::Window;

/// Distance from a window's top edge to the middle of its title bar.
const TITLE_BAR_OFFSET: i32 = 10;

/// A top-level window as reported by the windowing system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub title: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub minimized: bool,
}

impl WindowInfo {
    /// A point on the title bar; clicking it brings the window to the foreground.
    pub fn title_bar_point(&self) -> (i32, i32) {
        let half = i32::try_from(self.width / 2).unwrap_or(i32::MAX);
        (self.x.saturating_add(half), self.y.saturating_add(TITLE_BAR_OFFSET))
    }
}

/// Case-insensitive substring match of a window title.
pub fn title_matches(title: &str, needle: &str) -> bool {
    title.to_lowercase().contains(&needle.to_lowercase())
}

/// Find the first window whose title contains `title_contains` (case-insensitive).
///
/// Returns `Ok(None)` when nothing matches. Windows whose properties cannot be read
/// are skipped.
pub fn find_window(title_contains: &str) -> Result<Option<WindowInfo>> {
    debug!(target: "macrotree::window", %title_contains, "looking up window");
    let windows = Window::all().context("Failed to enumerate windows")?;

    for window in windows {
        let Ok(title) = window.title() else {
            continue;
        };
        if !title_matches(&title, title_contains) {
            continue;
        }
        let info = WindowInfo {
            x: window.x().context("Failed to read window position")?,
            y: window.y().context("Failed to read window position")?,
            width: window.width().context("Failed to read window size")?,
            height: window.height().context("Failed to read window size")?,
            minimized: window.is_minimized().unwrap_or(false),
            title,
        };
        trace!(target: "macrotree::window", ?info, "window matched");
        return Ok(Some(info));
    }
    Ok(None)
}
