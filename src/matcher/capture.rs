use anyhow::{Context, Result, anyhow, bail};
use image::RgbaImage;
use tracing::trace;
use xcap::Monitor;

use super::{ScreenCapture, ScreenRect};

/// Screenshots of the first monitor, via xcap.
///
/// Regions are given in desktop coordinates and translated by the monitor origin.
#[derive(Debug, Default, Clone, Copy)]
pub struct XcapCapture;

impl ScreenCapture for XcapCapture {
    fn capture_region(&self, region: ScreenRect) -> Result<RgbaImage> {
        let monitors = Monitor::all().context("Failed to enumerate monitors")?;
        let monitor = monitors
            .first()
            .ok_or_else(|| anyhow!("No monitor available for capture"))?;
        let origin_x = monitor.x().context("Failed to read monitor origin")?;
        let origin_y = monitor.y().context("Failed to read monitor origin")?;
        let screen = monitor
            .capture_image()
            .context("Failed to capture monitor image")?;
        trace!(
            target: "macrotree::capture",
            width = screen.width(), height = screen.height(), ?region,
            "captured monitor"
        );

        crop(
            &screen,
            ScreenRect {
                x: region.x - origin_x,
                y: region.y - origin_y,
                ..region
            },
        )
    }
}

/// Cut `region` out of a full screenshot.
///
/// The region must lie fully on the screenshot; nothing is clipped.
pub fn crop(screen: &RgbaImage, region: ScreenRect) -> Result<RgbaImage> {
    let (sw, sh) = (i64::from(screen.width()), i64::from(screen.height()));
    let (left, top) = (i64::from(region.x), i64::from(region.y));
    let right = left + i64::from(region.width);
    let bottom = top + i64::from(region.height);

    if left < 0 || top < 0 || right > sw || bottom > sh {
        bail!("Region {region:?} is not fully inside the {sw}x{sh} screen");
    }
    Ok(image::imageops::crop_imm(screen, left as u32, top as u32, region.width, region.height)
        .to_image())
}
