//! Masked normalized cross-correlation of one template against a region.

use image::{GrayImage, Luma, RgbaImage};
use imageproc::filter::separable_filter_equal;
use imageproc::template_matching::{MatchTemplateMethod, match_template_with_mask};

use super::{GridSize, MatchOptions, MatchPoint};

/// Accepted matches closer than this (Euclidean, pixels) to an earlier one are dropped.
pub const SUPPRESSION_RADIUS: f32 = 10.0;

/// 1-D half of the 5x5 Gaussian kernel.
const BLUR_KERNEL: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// Template pixels below this alpha do not take part in the correlation.
const ALPHA_CUTOFF: u8 = 128;

const MASK_ON: Luma<u8> = Luma([255]);
const MASK_OFF: Luma<u8> = Luma([0]);

/// Grayscale and optionally blur an image.
pub fn prepare(image: &RgbaImage, blur: bool) -> GrayImage {
    let gray = image::imageops::grayscale(image);
    if blur {
        separable_filter_equal(&gray, &BLUR_KERNEL)
    } else {
        gray
    }
}

/// Mask selecting the pixels of a template that are compared.
///
/// Icons sit in inventory cells with rounded corners, so a square patch at each
/// template corner is excluded. The patch scales with the cell size implied by the
/// item's grid. Transparent template pixels are excluded too.
pub fn corner_mask(template: &RgbaImage, grid: GridSize) -> GrayImage {
    let (w, h) = template.dimensions();
    let cell = (w / grid.width.max(1)).min(h / grid.height.max(1));
    let corner = (cell / 6).max(1).min((w.min(h).saturating_sub(1)) / 2);

    GrayImage::from_fn(w, h, |x, y| {
        let near_x = x < corner || x >= w - corner;
        let near_y = y < corner || y >= h - corner;
        if (near_x && near_y) || template.get_pixel(x, y)[3] < ALPHA_CUTOFF {
            MASK_OFF
        } else {
            MASK_ON
        }
    })
}

/// Match one template against a prepared region.
///
/// Candidates are scanned row by row; a candidate is accepted when its score
/// reaches the tolerance and it is not within [`SUPPRESSION_RADIUS`] of an already
/// accepted point. Points are template centres, relative to the region.
pub fn match_variant(
    haystack: &GrayImage,
    template: &RgbaImage,
    grid: GridSize,
    options: MatchOptions,
) -> Vec<MatchPoint> {
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > haystack.width() || th > haystack.height() {
        return Vec::new();
    }

    let needle = prepare(template, options.blur);
    let mask = corner_mask(template, grid);
    let scores = match_template_with_mask(
        haystack,
        &needle,
        MatchTemplateMethod::CrossCorrelationNormalized,
        &mask,
    );

    let (cx, cy) = ((tw / 2) as i32, (th / 2) as i32);
    let candidates = scores
        .enumerate_pixels()
        .filter(|(_, _, score)| score[0] >= options.tolerance)
        .map(|(x, y, score)| MatchPoint {
            x: x as i32 + cx,
            y: y as i32 + cy,
            score: score[0],
        });
    suppress_near(candidates, SUPPRESSION_RADIUS)
}

/// Keep candidates in order, dropping any within `radius` of one already kept.
pub fn suppress_near(
    candidates: impl IntoIterator<Item = MatchPoint>,
    radius: f32,
) -> Vec<MatchPoint> {
    let limit = radius * radius;
    let mut accepted: Vec<MatchPoint> = Vec::new();
    for candidate in candidates {
        let close = accepted.iter().any(|p| {
            let dx = (p.x - candidate.x) as f32;
            let dy = (p.y - candidate.y) as f32;
            dx * dx + dy * dy <= limit
        });
        if !close {
            accepted.push(candidate);
        }
    }
    accepted
}
