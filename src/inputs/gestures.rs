use crate::pdf::Command;
use crate::store::ReadingMode;

/// Clicks left of this fraction of the surface width go back a page
pub const PREV_ZONE_FRACTION: f32 = 0.3;
/// Shortest horizontal drag, in pixels, that counts as a swipe
pub const SWIPE_MIN_DISTANCE: f32 = 50.0;

/// Page turn for a click at `x` on a surface `width` wide.
///
/// Only paged mode turns pages on click; continuous mode scrolls instead.
pub fn click_command(x: f32, width: f32, mode: ReadingMode) -> Option<Command> {
    if mode != ReadingMode::Paged || width <= 0.0 {
        return None;
    }
    if x < width * PREV_ZONE_FRACTION {
        Some(Command::Prev)
    } else {
        Some(Command::Next)
    }
}

/// Tracks one touch or drag from start to end
#[derive(Debug, Default)]
pub struct SwipeTracker {
    start: Option<(f32, f32)>,
}

impl SwipeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, x: f32, y: f32) {
        self.start = Some((x, y));
    }

    pub fn is_tracking(&self) -> bool {
        self.start.is_some()
    }

    /// Finish the gesture. Dragging right goes back, dragging left goes
    /// forward; mostly vertical or short drags yield nothing.
    pub fn end(&mut self, x: f32, y: f32) -> Option<Command> {
        let (start_x, start_y) = self.start.take()?;
        let dx = x - start_x;
        let dy = y - start_y;

        if dx.abs() <= dy.abs() || dx.abs() < SWIPE_MIN_DISTANCE {
            return None;
        }
        if dx > 0.0 {
            Some(Command::Prev)
        } else {
            Some(Command::Next)
        }
    }

    pub fn cancel(&mut self) {
        self.start = None;
    }
}
