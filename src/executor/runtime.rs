use image::Rgb;
use rand::random_range;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::MacroDocument;
use crate::error::{MacroError, MacroResult};
use crate::executor::actions::InputDriver;
use crate::executor::progress::{ProgressSink, TracingProgress};
use crate::matcher::{
    IconAssets, ImageMatcher, MatchOptions, ScreenCapture, ScreenRect, TextRecognizer,
    sort_reading_order,
};
use crate::tree::{Action, ActionTree, ImageSearch, KeyState, MouseButton, NodeId, Point, SearchArea};
use crate::utils::color;
use crate::variables::{
    Value, VariableStore, evaluate, resolve_float, resolve_int, resolve_string, substitute,
};

/// Longest single sleep between two cancellation checks.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Default poll interval of `wait_for_pixel`.
pub const DEFAULT_PIXEL_POLL: Duration = Duration::from_millis(100);

/// Scratch state of one run, dropped when the run ends.
#[derive(Debug, Default)]
struct RunState {
    /// Absolute coordinates of the matches being iterated, innermost last.
    matches: Vec<(i32, i32)>,
    /// Lines and next index of every `data_list` node executed so far.
    data_lists: HashMap<NodeId, DataCursor>,
}

#[derive(Debug)]
struct DataCursor {
    lines: Vec<String>,
    next: usize,
}

/// Runtime executes an [`ActionTree`]:
/// - resolving fields through the run's [`VariableStore`]
/// - dispatching primitive actions to the [`InputDriver`]
/// - running image searches and re-entering their children once per match
///
/// A run is a depth-first walk from the root. The first error aborts the whole run.
pub struct Runtime {
    driver: Box<dyn InputDriver>,
    capture: Option<Arc<dyn ScreenCapture>>,
    assets: Option<Arc<dyn IconAssets>>,
    recognizer: Option<Arc<dyn TextRecognizer>>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    pixel_poll: Duration,
}

impl Runtime {
    /// Create a runtime with no vision collaborators, reporting progress through tracing.
    pub fn new(driver: Box<dyn InputDriver>) -> Self {
        Self {
            driver,
            capture: None,
            assets: None,
            recognizer: None,
            progress: Arc::new(TracingProgress),
            cancel: CancellationToken::new(),
            pixel_poll: DEFAULT_PIXEL_POLL,
        }
    }

    pub fn with_capture(mut self, capture: Arc<dyn ScreenCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_assets(mut self, assets: Arc<dyn IconAssets>) -> Self {
        self.assets = Some(assets);
        self
    }

    pub fn with_text_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_pixel_poll(mut self, interval: Duration) -> Self {
        self.pixel_poll = interval;
        self
    }

    /// Token that cancels the current and future runs of this runtime.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build the tree and variables of a document and run it once.
    ///
    /// Returns the final variable store.
    pub fn run_document(&mut self, doc: &MacroDocument) -> MacroResult<VariableStore> {
        let tree = ActionTree::from_defs(&doc.actions)?;
        let mut vars = VariableStore::new();
        for (name, value) in &doc.variables {
            vars.set(name, value.clone())?;
        }
        self.run(&tree, &mut vars)?;
        Ok(vars)
    }

    /// Execute the tree from its root.
    ///
    /// The progress sink is busy for the duration of the run, including when it fails.
    pub fn run(&mut self, tree: &ActionTree, vars: &mut VariableStore) -> MacroResult<()> {
        let mut state = RunState::default();
        info!(target: "macrotree::runtime", variables = vars.len(), "Starting macro run");

        self.progress.busy(true);
        let result = self.execute(tree, tree.root(), vars, &mut state);
        self.progress.busy(false);

        match &result {
            Ok(()) => info!(target: "macrotree::runtime", "Macro run completed"),
            Err(MacroError::Cancelled) => warn!(target: "macrotree::runtime", "Macro run cancelled"),
            Err(e) => error!(target: "macrotree::runtime", error = %e, "Macro run failed"),
        }
        result
    }

    fn execute(
        &mut self,
        tree: &ActionTree,
        id: NodeId,
        vars: &mut VariableStore,
        state: &mut RunState,
    ) -> MacroResult<()> {
        self.check_cancelled()?;
        let action = tree.action(id)?;
        trace!(
            target: "macrotree::runtime",
            uid = %tree.uid(id)?, action = %action.action_type(),
            "Executing action"
        );

        match action {
            Action::Wait { time, jitter_ms } => {
                let ms = non_negative(resolve_int(time, vars)?, "wait", "time")?;
                let jitter = if *jitter_ms > 0 {
                    random_range(0..=*jitter_ms)
                } else {
                    0
                };
                self.pause(Duration::from_millis(ms.saturating_add(jitter)))
            }

            Action::Move { point } => {
                let (x, y) = self.point_or_match(point, vars, state)?;
                self.driver.move_to(x, y).map_err(MacroError::InputInjection)
            }

            Action::Click { button, hold } => {
                let button: MouseButton = resolve_string(button, vars)?.parse()?;
                let hold = non_negative(resolve_int(hold, vars)?, "click", "hold")?;
                self.click(button, hold)
            }

            Action::Key { key, state: key_state } => {
                let key = resolve_string(key, vars)?;
                let pressed = match key_state {
                    KeyState::Down => self.driver.key_down(&key),
                    KeyState::Up => self.driver.key_up(&key),
                };
                pressed.map_err(MacroError::InputInjection)
            }

            Action::SetVariable { name, value } => {
                let value = match value {
                    Value::Str(s) => Value::parse_literal(&substitute(s, vars)?),
                    other => other.clone(),
                };
                debug!(target: "macrotree::runtime", %name, %value, "set_variable");
                vars.set(name, value)?;
                Ok(())
            }

            Action::SaveVariable {
                name,
                destination,
                append,
                append_newline,
            } => {
                let text = vars.require(name.trim())?.to_string();
                let path = PathBuf::from(resolve_string(destination, vars)?);
                save_text(&path, &text, *append, *append_newline)
            }

            Action::Calculate {
                expression,
                output_var,
            } => {
                let result = evaluate(expression, vars)?;
                debug!(target: "macrotree::runtime", %expression, result, "calculate");
                vars.set(output_var, Value::from_number(result))?;
                Ok(())
            }

            Action::DataList {
                source,
                output_var,
                is_file,
                skip_blank_lines,
            } => {
                let cursor = match state.data_lists.entry(id) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => entry.insert(DataCursor {
                        lines: load_lines(source, *is_file, *skip_blank_lines, vars)?,
                        next: 0,
                    }),
                };
                let line = cursor.lines[cursor.next % cursor.lines.len()].clone();
                cursor.next += 1;
                vars.set(output_var, Value::Str(line))?;
                Ok(())
            }

            Action::FocusWindow { window_target } => {
                let title = resolve_string(window_target, vars)?;
                let focused = self
                    .driver
                    .focus_window(&title)
                    .map_err(MacroError::InputInjection)?;
                if !focused {
                    warn!(target: "macrotree::runtime", %title, "No window matches; focus_window skipped");
                }
                Ok(())
            }

            Action::WaitForPixel {
                point,
                target_color,
                color_tolerance,
                timeout_seconds,
            } => {
                let target = color::parse_hex(target_color).ok_or_else(|| {
                    MacroError::invalid(
                        "wait_for_pixel",
                        format!("'{target_color}' is not a #rrggbb color"),
                    )
                })?;
                let timeout = resolve_float(timeout_seconds, vars)?;
                if timeout < 0.0 {
                    return Err(MacroError::invalid(
                        "wait_for_pixel",
                        "timeout_seconds must not be negative",
                    ));
                }
                let (x, y) = point.resolve(vars)?;
                self.wait_for_pixel(x, y, target, *color_tolerance, timeout)
            }

            Action::Calibration { name, point } => {
                let (x, y) = point.resolve(vars)?;
                let sampled = self.sample_pixel(x, y)?;
                let name = name.trim();
                vars.set(&format!("{name}.x"), x)?;
                vars.set(&format!("{name}.y"), y)?;
                vars.set(&format!("{name}.color"), color::to_hex(sampled))?;
                info!(target: "macrotree::runtime", %name, x, y, color = %color::to_hex(sampled), "calibrated");
                Ok(())
            }

            Action::Loop { count, name } => {
                let count = resolve_int(count, vars)?;
                let is_root = id == tree.root();
                let children = tree.sub_actions(id)?;
                trace!(target: "macrotree::runtime", %name, count, children = children.len(), "loop");

                for _ in 0..count.max(0) {
                    self.check_cancelled()?;
                    for (i, child) in children.iter().enumerate() {
                        if is_root {
                            self.progress.progress((i + 1) as f32 / children.len() as f32);
                        }
                        self.execute(tree, *child, vars, state)?;
                    }
                }
                Ok(())
            }

            Action::ImageSearch(search) => self.image_search(tree, id, search, vars, state),

            Action::Ocr {
                target,
                search_area,
                output_variable,
            } => {
                let Some(recognizer) = self.recognizer.clone() else {
                    warn!(target: "macrotree::runtime", "No text recognizer configured; ocr skipped");
                    return Ok(());
                };
                let region = resolve_region(search_area, vars)?;
                let capture = self.require_capture()?;
                let image = capture.capture_region(region).map_err(MacroError::Capture)?;
                let text = recognizer
                    .recognize(&image)
                    .map_err(MacroError::Recognition)?;
                debug!(target: "macrotree::runtime", %text, "ocr");

                if !output_variable.trim().is_empty() {
                    vars.set(output_variable, Value::Str(text.clone()))?;
                }
                let wanted = resolve_string(target, vars)?;
                if wanted.is_empty() || text.contains(&wanted) {
                    self.run_children(tree, id, vars, state)?;
                }
                Ok(())
            }
        }
    }

    fn run_children(
        &mut self,
        tree: &ActionTree,
        id: NodeId,
        vars: &mut VariableStore,
        state: &mut RunState,
    ) -> MacroResult<()> {
        for child in tree.sub_actions(id)? {
            self.execute(tree, *child, vars, state)?;
        }
        Ok(())
    }

    fn image_search(
        &mut self,
        tree: &ActionTree,
        id: NodeId,
        search: &ImageSearch,
        vars: &mut VariableStore,
        state: &mut RunState,
    ) -> MacroResult<()> {
        let region = resolve_region(&search.search_area, vars)?;
        let tolerance = resolve_float(&search.tolerance, vars)?;
        if !(0.0..=1.0).contains(&tolerance) {
            return Err(MacroError::invalid(
                "image_search",
                format!("tolerance {tolerance} is outside [0, 1]"),
            ));
        }
        let capture = self.require_capture()?;
        let assets = self
            .assets
            .clone()
            .ok_or(MacroError::MissingCollaborator("icon library"))?;

        let options = MatchOptions {
            tolerance: tolerance as f32,
            blur: search.blur,
        };
        let buckets = ImageMatcher::new(capture, assets).search(region, &search.targets, options)?;
        let points = sort_reading_order(buckets.into_iter().flat_map(|b| b.points).collect());
        debug!(target: "macrotree::runtime", matches = points.len(), "image_search");

        for point in points {
            self.check_cancelled()?;
            let x = region.x + point.x;
            let y = region.y + point.y;
            if !search.output_x_variable.trim().is_empty() {
                vars.set(&search.output_x_variable, x)?;
            }
            if !search.output_y_variable.trim().is_empty() {
                vars.set(&search.output_y_variable, y)?;
            }
            trace!(target: "macrotree::runtime", x, y, score = point.score, "entering match");

            state.matches.push((x, y));
            let result = self.run_children(tree, id, vars, state);
            state.matches.pop();
            result?;
        }
        Ok(())
    }

    fn point_or_match(
        &self,
        point: &Point,
        vars: &VariableStore,
        state: &RunState,
    ) -> MacroResult<(i32, i32)> {
        if point.follows_image_match() {
            if let Some(current) = state.matches.last() {
                return Ok(*current);
            }
            debug!(target: "macrotree::runtime", "image_search_match used outside an image search; using its own coordinates");
        }
        Ok(point.resolve(vars)?)
    }

    fn click(&mut self, button: MouseButton, hold_ms: u64) -> MacroResult<()> {
        if hold_ms == 0 {
            return self.driver.click(button).map_err(MacroError::InputInjection);
        }
        self.driver
            .button_down(button)
            .map_err(MacroError::InputInjection)?;
        let held = self.pause(Duration::from_millis(hold_ms));
        // Release even when the hold was cancelled.
        self.driver
            .button_up(button)
            .map_err(MacroError::InputInjection)?;
        held
    }

    fn wait_for_pixel(
        &mut self,
        x: i32,
        y: i32,
        target: Rgb<u8>,
        tolerance: u8,
        timeout_seconds: f64,
    ) -> MacroResult<()> {
        let started = Instant::now();
        loop {
            self.check_cancelled()?;
            let current = self.sample_pixel(x, y)?;
            if color::within_tolerance(current, target, tolerance) {
                debug!(target: "macrotree::runtime", x, y, waited_ms = started.elapsed().as_millis() as u64, "pixel matched");
                return Ok(());
            }
            if timeout_seconds > 0.0 && started.elapsed().as_secs_f64() >= timeout_seconds {
                return Err(MacroError::PixelTimeout {
                    x,
                    y,
                    color: color::to_hex(target),
                    seconds: timeout_seconds,
                });
            }
            self.pause(self.pixel_poll)?;
        }
    }

    fn sample_pixel(&self, x: i32, y: i32) -> MacroResult<Rgb<u8>> {
        let capture = self.require_capture()?;
        let image = capture
            .capture_region(ScreenRect::pixel(x, y))
            .map_err(MacroError::Capture)?;
        let [r, g, b, _] = image
            .get_pixel_checked(0, 0)
            .ok_or_else(|| MacroError::Capture(anyhow::anyhow!("empty capture at ({x}, {y})")))?
            .0;
        Ok(Rgb([r, g, b]))
    }

    /// Sleep through the driver in slices, checking for cancellation before each.
    fn pause(&mut self, duration: Duration) -> MacroResult<()> {
        let mut remaining = duration;
        while !remaining.is_zero() {
            self.check_cancelled()?;
            let step = remaining.min(SLEEP_SLICE);
            self.driver
                .sleep(step)
                .map_err(MacroError::InputInjection)?;
            remaining -= step;
        }
        Ok(())
    }

    fn require_capture(&self) -> MacroResult<Arc<dyn ScreenCapture>> {
        self.capture
            .clone()
            .ok_or(MacroError::MissingCollaborator("screen capture"))
    }

    fn check_cancelled(&self) -> MacroResult<()> {
        if self.cancel.is_cancelled() {
            return Err(MacroError::Cancelled);
        }
        Ok(())
    }
}

fn resolve_region(area: &SearchArea, vars: &VariableStore) -> MacroResult<ScreenRect> {
    ScreenRect::from_bounds(area.resolve(vars)?)
}

fn non_negative(value: i64, action: &'static str, field: &str) -> MacroResult<u64> {
    u64::try_from(value)
        .map_err(|_| MacroError::invalid(action, format!("{field} must not be negative (got {value})")))
}

fn save_text(path: &Path, text: &str, append: bool, newline: bool) -> MacroResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(|e| MacroError::io(path, e))?;
    file.write_all(text.as_bytes())
        .map_err(|e| MacroError::io(path, e))?;
    if newline {
        file.write_all(b"\n").map_err(|e| MacroError::io(path, e))?;
    }
    debug!(target: "macrotree::runtime", path = %path.display(), append, "saved variable");
    Ok(())
}

fn load_lines(
    source: &str,
    is_file: bool,
    skip_blank: bool,
    vars: &VariableStore,
) -> MacroResult<Vec<String>> {
    let source = substitute(source, vars)?;
    let text = if is_file {
        fs::read_to_string(&source).map_err(|e| MacroError::io(&source, e))?
    } else {
        source
    };
    let lines: Vec<String> = text
        .lines()
        .filter(|l| !skip_blank || !l.trim().is_empty())
        .map(str::to_string)
        .collect();
    if lines.is_empty() {
        return Err(MacroError::invalid("data_list", "source has no lines"));
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MacroDocument, NodeDef};
    use crate::executor::testing::{
        Event, FakeAssets, FakeCapture, RecordingDriver, RecordingProgress, icon, screen_with,
    };
    use crate::tree::{IconTarget, ImageSearch, SearchArea};
    use crate::variables::ResolveError;

    fn runtime(driver: &RecordingDriver) -> Runtime {
        Runtime::new(Box::new(driver.clone()))
    }

    fn tree_of(defs: Vec<NodeDef>) -> ActionTree {
        ActionTree::from_defs(&defs).unwrap()
    }

    fn leaf(action: Action) -> NodeDef {
        NodeDef::new(action)
    }

    #[test]
    fn root_wait_then_click() {
        let driver = RecordingDriver::default();
        let tree = tree_of(vec![leaf(Action::wait(100)), leaf(Action::click(MouseButton::Left))]);

        runtime(&driver).run(&tree, &mut VariableStore::new()).unwrap();

        assert_eq!(
            driver.events(),
            vec![
                Event::Sleep(Duration::from_millis(100)),
                Event::Click(MouseButton::Left)
            ]
        );
    }

    #[test]
    fn loops_are_iteration_major() {
        let driver = RecordingDriver::default();
        let tree = tree_of(vec![NodeDef::with_children(
            Action::repeat(3, "outer"),
            vec![
                leaf(Action::key("a", KeyState::Down)),
                leaf(Action::key("a", KeyState::Up)),
            ],
        )]);

        runtime(&driver).run(&tree, &mut VariableStore::new()).unwrap();

        let keys: Vec<_> = driver.events();
        assert_eq!(keys.len(), 6);
        for pair in keys.chunks(2) {
            assert_eq!(
                pair,
                [Event::KeyDown("a".into()), Event::KeyUp("a".into())]
            );
        }
    }

    #[test]
    fn loop_count_resolves_from_variables() {
        let driver = RecordingDriver::default();
        let tree = tree_of(vec![NodeDef::with_children(
            Action::repeat("${n}*2", ""),
            vec![leaf(Action::click(MouseButton::Right))],
        )]);
        let mut vars = VariableStore::new();
        vars.set("n", 2).unwrap();

        runtime(&driver).run(&tree, &mut vars).unwrap();
        assert_eq!(driver.events().len(), 4);
    }

    #[test]
    fn root_reports_progress_and_busy() {
        let driver = RecordingDriver::default();
        let progress = Arc::new(RecordingProgress::default());
        let tree = tree_of(vec![
            leaf(Action::move_to(1, 1)),
            leaf(Action::move_to(2, 2)),
            leaf(Action::move_to(3, 3)),
            leaf(Action::move_to(4, 4)),
        ]);

        runtime(&driver)
            .with_progress(progress.clone())
            .run(&tree, &mut VariableStore::new())
            .unwrap();

        assert_eq!(progress.fractions(), vec![0.25, 0.5, 0.75, 1.0]);
        assert_eq!(progress.busy_changes(), vec![true, false]);
    }

    fn search_node(area: SearchArea, children: Vec<NodeDef>) -> NodeDef {
        let mut search = ImageSearch::new(
            vec![IconTarget::new("game", "a"), IconTarget::new("game", "b")],
            area,
        );
        search.blur = false;
        search.tolerance = Value::Float(0.99);
        search.output_x_variable = "hit_x".into();
        search.output_y_variable = "hit_y".into();
        NodeDef::with_children(Action::ImageSearch(search), children)
    }

    #[test]
    fn image_search_runs_children_per_match_in_reading_order() {
        let a = icon(1);
        let b = icon(2);
        // Match centres at (10,10) and (10,50) for A, (10,30) for B, relative to the area.
        let screen = screen_with(200, 150, &[(&a, 104, 24), (&a, 104, 64), (&b, 104, 44)]);
        let driver = RecordingDriver::default();
        let tree = tree_of(vec![search_node(
            SearchArea::new(100, 20, 180, 140),
            vec![
                leaf(Action::Move {
                    point: Point::image_match(),
                }),
                leaf(Action::calculate("${hit_y}-20", "rel_y")),
                leaf(Action::click(MouseButton::Left)),
            ],
        )]);

        let mut vars = VariableStore::new();
        runtime(&driver)
            .with_capture(Arc::new(FakeCapture::new(screen)))
            .with_assets(Arc::new(FakeAssets::new(&[("game/a", a), ("game/b", b)])))
            .run(&tree, &mut vars)
            .unwrap();

        assert_eq!(
            driver.events(),
            vec![
                Event::Move(110, 30),
                Event::Click(MouseButton::Left),
                Event::Move(110, 50),
                Event::Click(MouseButton::Left),
                Event::Move(110, 70),
                Event::Click(MouseButton::Left),
            ]
        );
        assert_eq!(vars.get("hit_x"), Some(&Value::Int(110)));
        assert_eq!(vars.get("rel_y"), Some(&Value::Int(50)));
    }

    #[test]
    fn search_area_hanging_off_screen_is_a_capture_error() {
        let a = icon(1);
        let screen = screen_with(200, 150, &[(&a, 10, 10)]);
        let driver = RecordingDriver::default();
        let tree = tree_of(vec![search_node(
            SearchArea::new(-20, 0, 100, 100),
            vec![leaf(Action::Move {
                point: Point::image_match(),
            })],
        )]);

        let err = runtime(&driver)
            .with_capture(Arc::new(FakeCapture::new(screen)))
            .with_assets(Arc::new(FakeAssets::new(&[("game/a", a)])))
            .run(&tree, &mut VariableStore::new())
            .unwrap_err();

        assert!(matches!(err, MacroError::Capture(_)), "{err}");
        assert!(driver.events().is_empty());
    }

    #[test]
    fn nested_searches_restore_the_outer_match() {
        let a = icon(1);
        let b = icon(2);
        // A centres at (26,26) and (26,86); B centre at (156,106).
        let screen = screen_with(200, 150, &[(&a, 20, 20), (&a, 20, 80), (&b, 150, 100)]);
        let search_for = |item: &str, area: SearchArea, children: Vec<NodeDef>| {
            let mut search = ImageSearch::new(vec![IconTarget::new("game", item)], area);
            search.blur = false;
            search.tolerance = Value::Float(0.99);
            NodeDef::with_children(Action::ImageSearch(search), children)
        };
        let to_match = || {
            leaf(Action::Move {
                point: Point::image_match(),
            })
        };
        let tree = tree_of(vec![search_for(
            "a",
            SearchArea::new(0, 0, 100, 150),
            vec![
                search_for("b", SearchArea::new(120, 60, 200, 150), vec![to_match()]),
                to_match(),
            ],
        )]);

        let driver = RecordingDriver::default();
        runtime(&driver)
            .with_capture(Arc::new(FakeCapture::new(screen)))
            .with_assets(Arc::new(FakeAssets::new(&[("game/a", a), ("game/b", b)])))
            .run(&tree, &mut VariableStore::new())
            .unwrap();

        assert_eq!(
            driver.events(),
            vec![
                Event::Move(156, 106),
                Event::Move(26, 26),
                Event::Move(156, 106),
                Event::Move(26, 86),
            ]
        );
    }

    #[test]
    fn cancellation_between_matches_skips_the_rest() {
        let a = icon(1);
        let screen = screen_with(200, 150, &[(&a, 104, 24), (&a, 104, 64)]);
        let token = CancellationToken::new();
        let driver = RecordingDriver::default().cancel_on_click(token.clone());
        let tree = tree_of(vec![search_node(
            SearchArea::new(100, 20, 180, 140),
            vec![leaf(Action::click(MouseButton::Left))],
        )]);

        let err = runtime(&driver)
            .with_capture(Arc::new(FakeCapture::new(screen)))
            .with_assets(Arc::new(FakeAssets::new(&[("game/a", a)])))
            .with_cancellation(token)
            .run(&tree, &mut VariableStore::new())
            .unwrap_err();

        assert!(matches!(err, MacroError::Cancelled));
        assert_eq!(driver.events(), vec![Event::Click(MouseButton::Left)]);
    }

    #[test]
    fn image_search_without_matches_skips_children() {
        let driver = RecordingDriver::default();
        let tree = tree_of(vec![search_node(
            SearchArea::new(0, 0, 50, 50),
            vec![leaf(Action::click(MouseButton::Left))],
        )]);

        runtime(&driver)
            .with_capture(Arc::new(FakeCapture::new(screen_with(60, 60, &[]))))
            .with_assets(Arc::new(FakeAssets::new(&[])))
            .run(&tree, &mut VariableStore::new())
            .unwrap();
        assert!(driver.events().is_empty());
    }

    #[test]
    fn empty_search_area_fails_before_capture() {
        let driver = RecordingDriver::default();
        let progress = Arc::new(RecordingProgress::default());
        let tree = tree_of(vec![
            search_node(SearchArea::new(40, 0, 40, 100), vec![]),
            leaf(Action::click(MouseButton::Left)),
        ]);

        // No capture configured: the area check must come first.
        let err = runtime(&driver)
            .with_progress(progress.clone())
            .run(&tree, &mut VariableStore::new())
            .unwrap_err();

        assert!(matches!(
            err,
            MacroError::EmptySearchArea {
                width: 0,
                height: 100
            }
        ));
        assert!(driver.events().is_empty());
        assert_eq!(progress.busy_changes(), vec![true, false]);
    }

    #[test]
    fn first_error_aborts_remaining_iterations() {
        let driver = RecordingDriver::default();
        let tree = tree_of(vec![NodeDef::with_children(
            Action::repeat(5, ""),
            vec![
                leaf(Action::click(MouseButton::Left)),
                leaf(Action::move_to("${missing}", 0)),
            ],
        )]);

        let err = runtime(&driver)
            .run(&tree, &mut VariableStore::new())
            .unwrap_err();

        match err {
            MacroError::Resolution(ResolveError::UnresolvedVariable { name }) => {
                assert_eq!(name, "missing")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(driver.events(), vec![Event::Click(MouseButton::Left)]);
    }

    #[test]
    fn cancellation_stops_a_long_wait() {
        let token = CancellationToken::new();
        let driver = RecordingDriver::default().cancel_on_sleep(token.clone());
        let tree = tree_of(vec![
            leaf(Action::wait(10_000)),
            leaf(Action::click(MouseButton::Left)),
        ]);

        let err = runtime(&driver)
            .with_cancellation(token)
            .run(&tree, &mut VariableStore::new())
            .unwrap_err();

        assert!(matches!(err, MacroError::Cancelled));
        assert_eq!(driver.events(), vec![Event::Sleep(SLEEP_SLICE)]);
    }

    #[test]
    fn cancellation_stops_between_loop_iterations() {
        let token = CancellationToken::new();
        let driver = RecordingDriver::default().cancel_on_click(token.clone());
        let tree = tree_of(vec![NodeDef::with_children(
            Action::repeat(3, "clicks"),
            vec![leaf(Action::click(MouseButton::Left))],
        )]);

        let err = runtime(&driver)
            .with_cancellation(token)
            .run(&tree, &mut VariableStore::new())
            .unwrap_err();

        assert!(matches!(err, MacroError::Cancelled));
        assert_eq!(driver.events(), vec![Event::Click(MouseButton::Left)]);
    }

    #[test]
    fn held_click_releases_the_button() {
        let driver = RecordingDriver::default();
        let tree = tree_of(vec![leaf(Action::Click {
            button: Value::Str("right".into()),
            hold: Value::Int(300),
        })]);

        runtime(&driver).run(&tree, &mut VariableStore::new()).unwrap();
        assert_eq!(
            driver.events(),
            vec![
                Event::Down(MouseButton::Right),
                Event::Sleep(SLEEP_SLICE),
                Event::Sleep(Duration::from_millis(50)),
                Event::Up(MouseButton::Right),
            ]
        );
    }

    #[test]
    fn variables_flow_between_actions() {
        let driver = RecordingDriver::default();
        let tree = tree_of(vec![
            leaf(Action::set_variable("x", 5)),
            leaf(Action::set_variable("label", "slot ${x}")),
            leaf(Action::set_variable("half", "2.5")),
            leaf(Action::calculate("${x}+1", "y")),
            leaf(Action::calculate("${x}/2", "z")),
        ]);
        let mut vars = VariableStore::new();

        runtime(&driver).run(&tree, &mut vars).unwrap();

        assert_eq!(vars.get("label"), Some(&Value::Str("slot 5".into())));
        assert_eq!(vars.get("half"), Some(&Value::Float(2.5)));
        assert_eq!(vars.get("y"), Some(&Value::Int(6)));
        assert_eq!(vars.get("z"), Some(&Value::Float(2.5)));
    }

    #[test]
    fn data_list_cycles_through_lines() {
        let driver = RecordingDriver::default();
        let path = std::env::temp_dir().join(format!("macrotree-{}.txt", uuid::Uuid::new_v4()));
        let dest = path.to_string_lossy().to_string();

        let tree = tree_of(vec![NodeDef::with_children(
            Action::repeat(3, ""),
            vec![
                leaf(Action::DataList {
                    source: "alpha\n\nbeta".into(),
                    output_var: "word".into(),
                    is_file: false,
                    skip_blank_lines: true,
                }),
                leaf(Action::SaveVariable {
                    name: "word".into(),
                    destination: Value::Str(dest.clone()),
                    append: true,
                    append_newline: true,
                }),
            ],
        )]);

        runtime(&driver).run(&tree, &mut VariableStore::new()).unwrap();

        let saved = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(saved, "alpha\nbeta\nalpha\n");
    }

    #[test]
    fn data_list_reads_lines_from_a_file() {
        let path = std::env::temp_dir().join(format!("macrotree-{}.txt", uuid::Uuid::new_v4()));
        fs::write(&path, "first\n\nsecond\n").unwrap();
        let driver = RecordingDriver::default();
        let tree = tree_of(vec![NodeDef::with_children(
            Action::repeat(3, ""),
            vec![
                leaf(Action::DataList {
                    source: "${list}".into(),
                    output_var: "row".into(),
                    is_file: true,
                    skip_blank_lines: true,
                }),
                leaf(Action::key("${row}", KeyState::Down)),
            ],
        )]);
        let mut vars = VariableStore::new();
        vars.set("list", path.to_string_lossy().to_string()).unwrap();

        let result = runtime(&driver).run(&tree, &mut vars);
        fs::remove_file(&path).unwrap();
        result.unwrap();

        assert_eq!(
            driver.events(),
            vec![
                Event::KeyDown("first".into()),
                Event::KeyDown("second".into()),
                Event::KeyDown("first".into()),
            ]
        );

        // The file is gone now; a fresh run must report it.
        let err = runtime(&driver).run(&tree, &mut vars).unwrap_err();
        assert!(matches!(err, MacroError::Io { .. }), "{err}");
    }

    #[test]
    fn wait_for_pixel_polls_until_color_matches() {
        let driver = RecordingDriver::default();
        let capture = Arc::new(FakeCapture::sequence(vec![
            Rgb([0, 0, 0]),
            Rgb([0, 0, 0]),
            Rgb([250, 10, 10]),
        ]));
        let tree = tree_of(vec![leaf(Action::WaitForPixel {
            point: Point::new("", 5, 5),
            target_color: "#ff0000".into(),
            color_tolerance: 10,
            timeout_seconds: Value::Int(0),
        })]);

        runtime(&driver)
            .with_capture(capture.clone())
            .with_pixel_poll(Duration::from_millis(40))
            .run(&tree, &mut VariableStore::new())
            .unwrap();

        assert_eq!(capture.calls(), 3);
        assert_eq!(
            driver.events(),
            vec![
                Event::Sleep(Duration::from_millis(40)),
                Event::Sleep(Duration::from_millis(40))
            ]
        );
    }

    #[test]
    fn wait_for_pixel_times_out() {
        let driver = RecordingDriver::default();
        let tree = tree_of(vec![leaf(Action::WaitForPixel {
            point: Point::new("", 1, 2),
            target_color: "#ffffff".into(),
            color_tolerance: 0,
            timeout_seconds: Value::Float(0.05),
        })]);

        let err = runtime(&driver)
            .with_capture(Arc::new(FakeCapture::sequence(vec![Rgb([0, 0, 0])])))
            .with_pixel_poll(Duration::from_millis(10))
            .run(&tree, &mut VariableStore::new())
            .unwrap_err();
        assert!(matches!(err, MacroError::PixelTimeout { x: 1, y: 2, .. }));
    }

    #[test]
    fn calibration_records_position_and_color() {
        let driver = RecordingDriver::default();
        let tree = tree_of(vec![leaf(Action::Calibration {
            name: "bag".into(),
            point: Point::new("", 12, "${top}"),
        })]);
        let mut vars = VariableStore::new();
        vars.set("top", 30).unwrap();

        runtime(&driver)
            .with_capture(Arc::new(FakeCapture::sequence(vec![Rgb([0x12, 0xab, 0x00])])))
            .run(&tree, &mut vars)
            .unwrap();

        assert_eq!(vars.get("bag.x"), Some(&Value::Int(12)));
        assert_eq!(vars.get("bag.y"), Some(&Value::Int(30)));
        assert_eq!(vars.get("bag.color"), Some(&Value::Str("#12ab00".into())));
    }

    #[test]
    fn missing_capture_is_reported() {
        let driver = RecordingDriver::default();
        let tree = tree_of(vec![leaf(Action::Calibration {
            name: "c".into(),
            point: Point::new("", 0, 0),
        })]);
        let err = runtime(&driver)
            .run(&tree, &mut VariableStore::new())
            .unwrap_err();
        assert!(matches!(err, MacroError::MissingCollaborator("screen capture")));
    }

    #[test]
    fn focus_window_miss_is_not_an_error() {
        let driver = RecordingDriver::default();
        let tree = tree_of(vec![leaf(Action::FocusWindow {
            window_target: Value::Str("Nowhere".into()),
        })]);
        runtime(&driver).run(&tree, &mut VariableStore::new()).unwrap();
        assert_eq!(driver.events(), vec![Event::Focus("Nowhere".into())]);
    }

    #[test]
    fn ocr_without_recognizer_is_a_no_op() {
        let driver = RecordingDriver::default();
        let tree = tree_of(vec![NodeDef::with_children(
            Action::Ocr {
                target: Value::Str(String::new()),
                search_area: SearchArea::new(0, 0, 10, 10),
                output_variable: "text".into(),
            },
            vec![leaf(Action::click(MouseButton::Left))],
        )]);
        let mut vars = VariableStore::new();
        runtime(&driver).run(&tree, &mut vars).unwrap();
        assert!(driver.events().is_empty());
        assert!(!vars.contains("text"));
    }

    struct FixedText(&'static str);

    impl TextRecognizer for FixedText {
        fn recognize(&self, _image: &image::RgbaImage) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn ocr_runs_children_when_target_is_found() {
        let driver = RecordingDriver::default();
        let ocr = |target: &str| {
            NodeDef::with_children(
                Action::Ocr {
                    target: Value::Str(target.into()),
                    search_area: SearchArea::new(0, 0, 10, 10),
                    output_variable: "text".into(),
                },
                vec![leaf(Action::key(target, KeyState::Down))],
            )
        };
        let tree = tree_of(vec![ocr("Gold"), ocr("Silver")]);
        let mut vars = VariableStore::new();

        runtime(&driver)
            .with_capture(Arc::new(FakeCapture::new(screen_with(20, 20, &[]))))
            .with_text_recognizer(Arc::new(FixedText("Gold: 120")))
            .run(&tree, &mut vars)
            .unwrap();

        assert_eq!(driver.events(), vec![Event::KeyDown("Gold".into())]);
        assert_eq!(vars.get("text"), Some(&Value::Str("Gold: 120".into())));
    }

    #[test]
    fn run_document_seeds_macro_variables() {
        let driver = RecordingDriver::default();
        let mut doc = MacroDocument::default();
        doc.variables.insert("cx".into(), Value::Int(7));
        doc.actions = vec![leaf(Action::move_to("${cx}", "${cx}*2"))];

        let vars = runtime(&driver).run_document(&doc).unwrap();
        assert_eq!(driver.events(), vec![Event::Move(7, 14)]);
        assert_eq!(vars.get("cx"), Some(&Value::Int(7)));
    }
}
