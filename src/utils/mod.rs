//! Utilities for macrotree.
//!
//! Submodules:
//! - `color`: `#rrggbb` parsing and per-channel tolerance checks.
//! - `window`: top-level window lookup by title (xcap).

pub mod color;
pub mod window;
