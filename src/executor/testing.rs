//! In-memory collaborators for executor tests.

use anyhow::Result;
use image::{Rgb, Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::executor::actions::InputDriver;
use crate::executor::progress::ProgressSink;
use crate::matcher::capture::crop;
use crate::matcher::{GridSize, IconAssets, IconItem, ScreenCapture, ScreenRect};
use crate::tree::MouseButton;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Move(i32, i32),
    Click(MouseButton),
    Down(MouseButton),
    Up(MouseButton),
    KeyDown(String),
    KeyUp(String),
    Sleep(Duration),
    Focus(String),
}

/// Records every call; sleeps return immediately.
#[derive(Clone, Default)]
pub struct RecordingDriver {
    events: Arc<Mutex<Vec<Event>>>,
    cancel_on_sleep: Option<CancellationToken>,
    cancel_on_click: Option<CancellationToken>,
}

impl RecordingDriver {
    /// Cancel `token` from inside the first sleep.
    pub fn cancel_on_sleep(mut self, token: CancellationToken) -> Self {
        self.cancel_on_sleep = Some(token);
        self
    }

    /// Cancel `token` from inside every click.
    pub fn cancel_on_click(mut self, token: CancellationToken) -> Self {
        self.cancel_on_click = Some(token);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: Event) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

impl InputDriver for RecordingDriver {
    fn move_to(&mut self, x: i32, y: i32) -> Result<()> {
        self.record(Event::Move(x, y))
    }

    fn click(&mut self, button: MouseButton) -> Result<()> {
        if let Some(token) = &self.cancel_on_click {
            token.cancel();
        }
        self.record(Event::Click(button))
    }

    fn button_down(&mut self, button: MouseButton) -> Result<()> {
        self.record(Event::Down(button))
    }

    fn button_up(&mut self, button: MouseButton) -> Result<()> {
        self.record(Event::Up(button))
    }

    fn key_down(&mut self, key: &str) -> Result<()> {
        self.record(Event::KeyDown(key.to_string()))
    }

    fn key_up(&mut self, key: &str) -> Result<()> {
        self.record(Event::KeyUp(key.to_string()))
    }

    fn sleep(&mut self, duration: Duration) -> Result<()> {
        if let Some(token) = &self.cancel_on_sleep {
            token.cancel();
        }
        self.record(Event::Sleep(duration))
    }

    fn focus_window(&mut self, title: &str) -> Result<bool> {
        self.record(Event::Focus(title.to_string()))?;
        Ok(false)
    }
}

enum Screen {
    Image(RgbaImage),
    /// One colour per capture; the last one repeats.
    Sequence(Vec<Rgb<u8>>),
}

pub struct FakeCapture {
    screen: Screen,
    calls: AtomicUsize,
}

impl FakeCapture {
    pub fn new(screen: RgbaImage) -> Self {
        Self {
            screen: Screen::Image(screen),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn sequence(colors: Vec<Rgb<u8>>) -> Self {
        Self {
            screen: Screen::Sequence(colors),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ScreenCapture for FakeCapture {
    fn capture_region(&self, region: ScreenRect) -> Result<RgbaImage> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.screen {
            Screen::Image(image) => crop(image, region),
            Screen::Sequence(colors) => {
                let [r, g, b] = colors[call.min(colors.len() - 1)].0;
                Ok(RgbaImage::from_pixel(
                    region.width,
                    region.height,
                    Rgba([r, g, b, 255]),
                ))
            }
        }
    }
}

/// Icon library keyed by `"program/item"`, one variant per item.
pub struct FakeAssets(HashMap<String, RgbaImage>);

impl FakeAssets {
    pub fn new(items: &[(&str, RgbaImage)]) -> Self {
        Self(
            items
                .iter()
                .map(|(key, image)| (key.to_string(), image.clone()))
                .collect(),
        )
    }
}

impl IconAssets for FakeAssets {
    fn item(&self, program: &str, item: &str) -> Option<IconItem> {
        self.0.get(&format!("{program}/{item}")).map(|_| IconItem {
            grid: GridSize::default(),
            variants: 1,
        })
    }

    fn template(&self, program: &str, item: &str, variant: usize) -> Option<RgbaImage> {
        if variant > 0 {
            return None;
        }
        self.0.get(&format!("{program}/{item}")).cloned()
    }
}

#[derive(Default)]
pub struct RecordingProgress {
    fractions: Mutex<Vec<f32>>,
    busy: Mutex<Vec<bool>>,
}

impl RecordingProgress {
    pub fn fractions(&self) -> Vec<f32> {
        self.fractions.lock().unwrap().clone()
    }

    pub fn busy_changes(&self) -> Vec<bool> {
        self.busy.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn progress(&self, fraction: f32) {
        self.fractions.lock().unwrap().push(fraction);
    }

    fn busy(&self, active: bool) {
        self.busy.lock().unwrap().push(active);
    }
}

/// 12x12 icon of random black and white pixels, distinct per seed.
pub fn icon(seed: u64) -> RgbaImage {
    let mut rng = StdRng::seed_from_u64(seed);
    RgbaImage::from_fn(12, 12, |_, _| {
        if rng.random_bool(0.5) {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    })
}

/// Gray screen with icons pasted at the given top-left corners.
pub fn screen_with(width: u32, height: u32, icons: &[(&RgbaImage, i64, i64)]) -> RgbaImage {
    let mut screen = RgbaImage::from_pixel(width, height, Rgba([128, 128, 128, 255]));
    for (image, x, y) in icons {
        image::imageops::replace(&mut screen, *image, *x, *y);
    }
    screen
}
