//! Multi-target image search.
//!
//! The matcher captures the search region once, then runs one worker per target
//! (rayon, fork-join). Each worker matches every variant template of its target in
//! turn and collects the accepted points into that target's bucket. The executor
//! flattens the buckets and orders them with [`sort_reading_order`].
//!
//! Coordinates of a [`MatchPoint`] are relative to the captured region and point at
//! the centre of the matched template.

pub mod assets;
pub mod capture;
pub mod ncc;

pub use assets::DirectoryAssets;
pub use capture::XcapCapture;

use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{MacroError, MacroResult};
use crate::tree::{Bounds, IconTarget};

/// Points whose Y differs by at most this much are on the same row.
pub const ROW_TOLERANCE: i32 = 5;

/// Provides screenshots of screen regions.
pub trait ScreenCapture: Send + Sync {
    fn capture_region(&self, region: ScreenRect) -> anyhow::Result<RgbaImage>;
}

/// The icon library: items of programs, each with ordered template variants.
pub trait IconAssets: Send + Sync {
    /// Metadata of an item, or `None` when the program or item is unknown.
    fn item(&self, program: &str, item: &str) -> Option<IconItem>;

    /// One variant template, or `None` when it is missing.
    fn template(&self, program: &str, item: &str, variant: usize) -> Option<RgbaImage>;
}

/// Reads text out of a captured region. Used by `ocr` actions.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &RgbaImage) -> anyhow::Result<String>;
}

/// How many inventory cells an item covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    pub width: u32,
    pub height: u32,
}

impl Default for GridSize {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconItem {
    pub grid: GridSize,
    pub variants: usize,
}

/// A screen rectangle with a non-zero area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ScreenRect {
    /// `EmptySearchArea` when the bounds have no positive width and height.
    pub fn from_bounds(bounds: Bounds) -> MacroResult<Self> {
        let (width, height) = (bounds.width(), bounds.height());
        if width <= 0 || height <= 0 {
            return Err(MacroError::EmptySearchArea { width, height });
        }
        Ok(Self {
            x: bounds.left,
            y: bounds.top,
            width: u32::try_from(width).unwrap_or(u32::MAX),
            height: u32::try_from(height).unwrap_or(u32::MAX),
        })
    }

    pub fn pixel(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            width: 1,
            height: 1,
        }
    }
}

/// One accepted match, relative to the search region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPoint {
    pub x: i32,
    pub y: i32,
    pub score: f32,
}

impl MatchPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y, score: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    /// Minimum normalized cross-correlation score, in `[0, 1]`.
    pub tolerance: f32,
    /// Apply the fixed 5x5 Gaussian blur to region and templates.
    pub blur: bool,
}

/// Matches of one target, across all of its variants.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetMatches {
    pub target: IconTarget,
    pub points: Vec<MatchPoint>,
}

pub struct ImageMatcher {
    capture: Arc<dyn ScreenCapture>,
    assets: Arc<dyn IconAssets>,
}

impl ImageMatcher {
    pub fn new(capture: Arc<dyn ScreenCapture>, assets: Arc<dyn IconAssets>) -> Self {
        Self { capture, assets }
    }

    /// Capture `region` once and match every target against it concurrently.
    ///
    /// Buckets are returned in the order of `targets`.
    pub fn search(
        &self,
        region: ScreenRect,
        targets: &[IconTarget],
        options: MatchOptions,
    ) -> MacroResult<Vec<TargetMatches>> {
        if region.width == 0 || region.height == 0 {
            return Err(MacroError::EmptySearchArea {
                width: i64::from(region.width),
                height: i64::from(region.height),
            });
        }

        let screenshot = self
            .capture
            .capture_region(region)
            .map_err(MacroError::Capture)?;
        let haystack = ncc::prepare(&screenshot, options.blur);
        debug!(
            target: "macrotree::matcher",
            ?region, targets = targets.len(), tolerance = options.tolerance,
            "starting image search"
        );

        let buckets: Vec<TargetMatches> = targets
            .par_iter()
            .map(|target| TargetMatches {
                target: target.clone(),
                points: self.match_target(&haystack, target, options),
            })
            .collect();

        info!(
            target: "macrotree::matcher",
            matches = buckets.iter().map(|b| b.points.len()).sum::<usize>(),
            "image search finished"
        );
        Ok(buckets)
    }

    fn match_target(
        &self,
        haystack: &image::GrayImage,
        target: &IconTarget,
        options: MatchOptions,
    ) -> Vec<MatchPoint> {
        let Some(item) = self.assets.item(&target.program, &target.item) else {
            warn!(
                target: "macrotree::matcher",
                %target,
                "icon not found in library; target yields no matches"
            );
            return Vec::new();
        };

        let mut points = Vec::new();
        for variant in 0..item.variants {
            let Some(template) = self.assets.template(&target.program, &target.item, variant)
            else {
                warn!(target: "macrotree::matcher", %target, variant, "template missing; skipped");
                continue;
            };
            let found = ncc::match_variant(haystack, &template, item.grid, options);
            debug!(target: "macrotree::matcher", %target, variant, found = found.len(), "variant matched");
            points.extend(found);
        }
        points
    }
}

/// Order points like text: rows top to bottom, left to right within a row.
///
/// A row starts at its top-most point and takes every following point whose Y is
/// within [`ROW_TOLERANCE`] of it.
pub fn sort_reading_order(mut points: Vec<MatchPoint>) -> Vec<MatchPoint> {
    points.sort_by_key(|p| (p.y, p.x));

    let mut rows: Vec<Vec<MatchPoint>> = Vec::new();
    for p in points {
        match rows.last_mut() {
            Some(row) if p.y - row[0].y <= ROW_TOLERANCE => row.push(p),
            _ => rows.push(vec![p]),
        }
    }

    rows.into_iter()
        .flat_map(|mut row| {
            row.sort_by_key(|p| p.x);
            row
        })
        .collect()
}
