//! Input controller: turns terminal keys and mouse gestures into viewer
//! commands, and tracks whether the controls overlay is showing.

pub mod chrome;
pub mod gestures;
pub mod keyboard;

pub use chrome::ChromeVisibility;
pub use gestures::{PREV_ZONE_FRACTION, SWIPE_MIN_DISTANCE, SwipeTracker, click_command};
pub use keyboard::{KeyAction, KeyFocus, map_key};

use std::time::Instant;

use crossterm::event::{Event, KeyEvent, MouseButton, MouseEvent, MouseEventKind};

use crate::config::ViewerConfig;
use crate::pdf::{Command, ViewerState};
use crate::store::ReadingMode;

/// Terminal cell size in pixels, used to measure gestures
pub const DEFAULT_CELL_SIZE: (f32, f32) = (8.0, 16.0);

#[derive(Clone, Debug, PartialEq)]
pub enum InputOutcome {
    Command(Command),
    /// Key for the focused annotation field
    Edit(KeyEvent),
    Quit,
    Nothing,
}

impl From<KeyAction> for InputOutcome {
    fn from(action: KeyAction) -> Self {
        match action {
            KeyAction::Command(cmd) => InputOutcome::Command(cmd),
            KeyAction::PassThrough(key) => InputOutcome::Edit(key),
            KeyAction::Quit => InputOutcome::Quit,
            KeyAction::Ignored => InputOutcome::Nothing,
        }
    }
}

pub struct InputController {
    focus: KeyFocus,
    swipe: SwipeTracker,
    pressed_cell: Option<(u16, u16)>,
    chrome: ChromeVisibility,
    cell_size: (f32, f32),
    surface_columns: u16,
}

impl InputController {
    pub fn new(config: &ViewerConfig, surface_columns: u16) -> Self {
        Self {
            focus: KeyFocus::Viewer,
            swipe: SwipeTracker::new(),
            pressed_cell: None,
            chrome: ChromeVisibility::new(config.chrome_hide_after(), config.chrome_leave_hide_after()),
            cell_size: DEFAULT_CELL_SIZE,
            surface_columns,
        }
    }

    pub fn with_cell_size(mut self, width: f32, height: f32) -> Self {
        self.cell_size = (width, height);
        self
    }

    pub fn focus(&self) -> KeyFocus {
        self.focus
    }

    pub fn set_focus(&mut self, focus: KeyFocus) {
        self.focus = focus;
    }

    /// The annotation field owns the keyboard while its panel is open
    pub fn sync_focus(&mut self, state: &ViewerState) {
        self.focus = if state.overlays.annotations {
            KeyFocus::AnnotationField
        } else {
            KeyFocus::Viewer
        };
    }

    pub fn chrome(&self) -> &ChromeVisibility {
        &self.chrome
    }

    pub fn chrome_mut(&mut self) -> &mut ChromeVisibility {
        &mut self.chrome
    }

    pub fn handle(&mut self, event: &Event, mode: ReadingMode, now: Instant) -> InputOutcome {
        match event {
            Event::Key(key) => map_key(key, self.focus).into(),
            Event::Mouse(mouse) => self.handle_mouse(mouse, mode, now),
            Event::Resize(columns, _) => {
                self.surface_columns = *columns;
                InputOutcome::Nothing
            }
            Event::FocusLost => {
                self.swipe.cancel();
                self.pressed_cell = None;
                self.chrome.pointer_left(now);
                InputOutcome::Nothing
            }
            Event::FocusGained => {
                self.chrome.pointer_moved(now);
                InputOutcome::Nothing
            }
            Event::Paste(_) => InputOutcome::Nothing,
        }
    }

    fn to_pixels(&self, column: u16, row: u16) -> (f32, f32) {
        (
            column as f32 * self.cell_size.0 + self.cell_size.0 / 2.0,
            row as f32 * self.cell_size.1 + self.cell_size.1 / 2.0,
        )
    }

    fn handle_mouse(&mut self, mouse: &MouseEvent, mode: ReadingMode, now: Instant) -> InputOutcome {
        self.chrome.pointer_moved(now);
        let (x, y) = self.to_pixels(mouse.column, mouse.row);

        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                self.swipe.begin(x, y);
                self.pressed_cell = Some((mouse.column, mouse.row));
                InputOutcome::Nothing
            }
            MouseEventKind::Up(MouseButton::Left) => {
                let pressed = self.pressed_cell.take();
                if let Some(cmd) = self.swipe.end(x, y) {
                    return InputOutcome::Command(cmd);
                }
                if pressed != Some((mouse.column, mouse.row)) {
                    return InputOutcome::Nothing;
                }
                let width = self.surface_columns as f32 * self.cell_size.0;
                click_command(x, width, mode).map_or(InputOutcome::Nothing, InputOutcome::Command)
            }
            _ => InputOutcome::Nothing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_source::SimulatedEventSource;
    use crossterm::event::{KeyCode, KeyModifiers};

    fn controller() -> InputController {
        InputController::new(&ViewerConfig::default(), 100)
    }

    fn feed(controller: &mut InputController, events: &[Event], mode: ReadingMode) -> Vec<InputOutcome> {
        let now = Instant::now();
        events
            .iter()
            .map(|e| controller.handle(e, mode, now))
            .filter(|o| *o != InputOutcome::Nothing)
            .collect()
    }

    #[test]
    fn click_left_third_goes_back() {
        let mut input = controller();
        let outcomes = feed(&mut input, &SimulatedEventSource::click(10, 5), ReadingMode::Paged);
        assert_eq!(outcomes, vec![InputOutcome::Command(Command::Prev)]);

        let outcomes = feed(&mut input, &SimulatedEventSource::click(30, 5), ReadingMode::Paged);
        assert_eq!(outcomes, vec![InputOutcome::Command(Command::Next)]);
    }

    #[test]
    fn drag_left_turns_forward() {
        let mut input = controller();
        let outcomes = feed(&mut input, &SimulatedEventSource::drag((50, 5), (40, 5)), ReadingMode::Paged);
        assert_eq!(outcomes, vec![InputOutcome::Command(Command::Next)]);
    }

    #[test]
    fn short_drag_is_neither_swipe_nor_click() {
        let mut input = controller();
        let outcomes = feed(&mut input, &SimulatedEventSource::drag((50, 5), (47, 5)), ReadingMode::Paged);
        assert!(outcomes.is_empty());
    }

    #[test]
    fn resize_moves_click_zone() {
        let mut input = controller();
        let now = Instant::now();
        input.handle(&Event::Resize(20, 10), ReadingMode::Paged, now);
        let outcomes = feed(&mut input, &SimulatedEventSource::click(10, 1), ReadingMode::Paged);
        assert_eq!(outcomes, vec![InputOutcome::Command(Command::Next)]);
    }

    #[test]
    fn focused_field_receives_keys() {
        let mut input = controller();
        input.set_focus(KeyFocus::AnnotationField);
        let key = KeyEvent::new(KeyCode::Char('n'), KeyModifiers::empty());
        let outcomes = feed(&mut input, &[Event::Key(key)], ReadingMode::Paged);
        assert_eq!(outcomes, vec![InputOutcome::Edit(key)]);
    }

    #[test]
    fn focus_follows_annotation_panel() {
        let mut input = controller();
        let mut state = ViewerState::new(1.0, ReadingMode::Paged, Default::default(), false);
        state.overlays.annotations = true;
        input.sync_focus(&state);
        assert_eq!(input.focus(), KeyFocus::AnnotationField);

        state.overlays.annotations = false;
        input.sync_focus(&state);
        assert_eq!(input.focus(), KeyFocus::Viewer);
    }

    #[test]
    fn mouse_movement_shows_chrome() {
        let mut input = controller();
        let start = Instant::now();
        input.chrome_mut().set_fullscreen(true, start);
        assert!(!input.chrome_mut().tick(start + std::time::Duration::from_secs(5)));

        input.handle(&SimulatedEventSource::mouse_move(1, 1), ReadingMode::Paged, start);
        assert!(input.chrome().is_visible());
    }

    #[test]
    fn losing_focus_hides_chrome_only_in_fullscreen() {
        let mut input = controller();
        let start = Instant::now();
        let later = start + std::time::Duration::from_secs(2);

        input.handle(&Event::FocusLost, ReadingMode::Paged, start);
        assert!(input.chrome_mut().tick(later));

        input.chrome_mut().set_fullscreen(true, start);
        input.handle(&Event::FocusLost, ReadingMode::Paged, start);
        assert!(!input.chrome_mut().tick(later));
    }
}
