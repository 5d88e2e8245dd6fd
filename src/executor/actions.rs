use anyhow::{Context, Result, anyhow};
use enigo::Keyboard as _;
use enigo::Mouse as _;
use enigo::{Button as EButton, Coordinate, Direction, Enigo, Key, Settings};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::tree::MouseButton;
use crate::utils::window;

/// The input-injection collaborator of the executor.
///
/// Every call is blocking. Errors abort the macro run.
pub trait InputDriver {
    fn move_to(&mut self, x: i32, y: i32) -> Result<()>;
    fn click(&mut self, button: MouseButton) -> Result<()>;
    fn button_down(&mut self, button: MouseButton) -> Result<()>;
    fn button_up(&mut self, button: MouseButton) -> Result<()>;
    fn key_down(&mut self, key: &str) -> Result<()>;
    fn key_up(&mut self, key: &str) -> Result<()>;
    fn sleep(&mut self, duration: Duration) -> Result<()>;

    /// Bring a window whose title contains `title` to the foreground.
    /// Returns `Ok(false)` when no such window exists.
    fn focus_window(&mut self, title: &str) -> Result<bool>;
}

/// Real input through Enigo, with optional dry-run mode.
/// In dry-run mode, actions are only logged and no real input is simulated.
pub struct EnigoDriver {
    dry_run: bool,
    enigo: Option<Enigo>,
}

impl EnigoDriver {
    /// Create a new driver.
    /// - dry_run: when true, only logs instead of simulating real input.
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            enigo: None,
        }
    }

    /// Returns whether the driver is currently in dry-run mode.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn button(&mut self, button: MouseButton, direction: Direction) -> Result<()> {
        if self.dry_run {
            info!(target: "macrotree::actions", ?button, ?direction, "DRY-RUN mouse button");
            return Ok(());
        }
        let enigo = self.ensure_enigo()?;
        trace!(target: "macrotree::actions", ?button, ?direction, "mouse button");
        enigo.button(map_mouse_button(button), direction)?;
        Ok(())
    }

    fn key(&mut self, key: &str, direction: Direction) -> Result<()> {
        let mapped = string_to_key(key).ok_or_else(|| anyhow!("Unknown key '{key}'"))?;
        if self.dry_run {
            info!(target: "macrotree::actions", %key, ?direction, "DRY-RUN key");
            return Ok(());
        }
        let enigo = self.ensure_enigo()?;
        trace!(target: "macrotree::actions", %key, ?direction, "key");
        enigo.key(mapped, direction)?;
        Ok(())
    }

    fn ensure_enigo(&mut self) -> Result<&mut Enigo> {
        if self.enigo.is_none() {
            trace!(target: "macrotree::actions", "Initializing Enigo");
            self.enigo =
                Some(Enigo::new(&Settings::default()).context("Failed to initialize Enigo")?);
        }
        self.enigo
            .as_mut()
            .ok_or_else(|| anyhow!("Enigo is not initialized"))
    }
}

impl InputDriver for EnigoDriver {
    fn move_to(&mut self, x: i32, y: i32) -> Result<()> {
        if self.dry_run {
            info!(target: "macrotree::actions", x, y, "DRY-RUN mouse_move_to");
            return Ok(());
        }
        let enigo = self.ensure_enigo()?;
        trace!(target: "macrotree::actions", x, y, "mouse_move_to");
        enigo.move_mouse(x, y, Coordinate::Abs)?;
        Ok(())
    }

    fn click(&mut self, button: MouseButton) -> Result<()> {
        self.button(button, Direction::Click)
    }

    fn button_down(&mut self, button: MouseButton) -> Result<()> {
        self.button(button, Direction::Press)
    }

    fn button_up(&mut self, button: MouseButton) -> Result<()> {
        self.button(button, Direction::Release)
    }

    fn key_down(&mut self, key: &str) -> Result<()> {
        self.key(key, Direction::Press)
    }

    fn key_up(&mut self, key: &str) -> Result<()> {
        self.key(key, Direction::Release)
    }

    /// Sleeps even in dry-run mode so timing stays observable.
    fn sleep(&mut self, duration: Duration) -> Result<()> {
        trace!(target: "macrotree::actions", ms = duration.as_millis() as u64, "sleep");
        thread::sleep(duration);
        Ok(())
    }

    fn focus_window(&mut self, title: &str) -> Result<bool> {
        let Some(found) = window::find_window(title)
            .with_context(|| format!("focus_window({title}) failed"))?
        else {
            return Ok(false);
        };
        if found.minimized {
            warn!(target: "macrotree::actions", title = %found.title, "window is minimized; clicking its title bar anyway");
        }
        let (x, y) = found.title_bar_point();
        debug!(target: "macrotree::actions", title = %found.title, x, y, "focusing window");
        self.move_to(x, y)?;
        self.click(MouseButton::Left)?;
        Ok(true)
    }
}

fn map_mouse_button(btn: MouseButton) -> EButton {
    match btn {
        MouseButton::Left => EButton::Left,
        MouseButton::Middle => EButton::Middle,
        MouseButton::Right => EButton::Right,
    }
}

/// Map a key name (case-insensitive) or a single character to an Enigo key.
pub fn string_to_key(name: &str) -> Option<Key> {
    match name.to_lowercase().as_str() {
        "shift" | "lshift" => Some(Key::Shift),
        "control" | "ctrl" | "lcontrol" => Some(Key::Control),
        "alt" | "option" | "lalt" => Some(Key::Alt),
        "meta" | "command" | "cmd" | "win" | "super" => Some(Key::Meta),

        "f1" => Some(Key::F1),
        "f2" => Some(Key::F2),
        "f3" => Some(Key::F3),
        "f4" => Some(Key::F4),
        "f5" => Some(Key::F5),
        "f6" => Some(Key::F6),
        "f7" => Some(Key::F7),
        "f8" => Some(Key::F8),
        "f9" => Some(Key::F9),
        "f10" => Some(Key::F10),
        "f11" => Some(Key::F11),
        "f12" => Some(Key::F12),

        "up" => Some(Key::UpArrow),
        "down" => Some(Key::DownArrow),
        "left" => Some(Key::LeftArrow),
        "right" => Some(Key::RightArrow),
        "home" => Some(Key::Home),
        "end" => Some(Key::End),
        "pageup" | "pgup" => Some(Key::PageUp),
        "pagedown" | "pgdn" => Some(Key::PageDown),

        "return" | "enter" => Some(Key::Return),
        "escape" | "esc" => Some(Key::Escape),
        "tab" => Some(Key::Tab),
        "backspace" => Some(Key::Backspace),
        "delete" | "del" => Some(Key::Delete),
        "space" | " " => Some(Key::Space),
        "capslock" => Some(Key::CapsLock),

        _ => {
            let mut chars = name.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(Key::Unicode(c)),
                _ => None,
            }
        }
    }
}
