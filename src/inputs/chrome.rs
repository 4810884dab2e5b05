use std::time::{Duration, Instant};

/// Visibility of the controls overlay.
///
/// Auto-hide only applies in fullscreen: the chrome hides after a stretch
/// without pointer activity, or sooner once the pointer leaves the
/// surface. Pointer movement always brings it back.
#[derive(Debug)]
pub struct ChromeVisibility {
    visible: bool,
    fullscreen: bool,
    hide_at: Option<Instant>,
    idle_timeout: Duration,
    leave_timeout: Duration,
}

impl Default for ChromeVisibility {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), Duration::from_millis(1000))
    }
}

impl ChromeVisibility {
    pub fn new(idle_timeout: Duration, leave_timeout: Duration) -> Self {
        Self {
            visible: true,
            fullscreen: false,
            hide_at: None,
            idle_timeout,
            leave_timeout,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool, now: Instant) {
        self.fullscreen = fullscreen;
        self.pointer_moved(now);
    }

    pub fn pointer_moved(&mut self, now: Instant) {
        self.visible = true;
        self.hide_at = self.fullscreen.then(|| now + self.idle_timeout);
    }

    pub fn pointer_left(&mut self, now: Instant) {
        if !self.fullscreen {
            return;
        }
        let deadline = now + self.leave_timeout;
        self.hide_at = Some(self.hide_at.map_or(deadline, |at| at.min(deadline)));
    }

    /// Apply any pending hide; returns whether the chrome is visible
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.hide_at.is_some_and(|at| now >= at) {
            self.visible = false;
            self.hide_at = None;
        }
        self.visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_visible_outside_fullscreen() {
        let start = Instant::now();
        let mut chrome = ChromeVisibility::default();
        chrome.pointer_moved(start);
        assert!(chrome.tick(start + Duration::from_secs(60)));
    }

    #[test]
    fn hides_after_idle_in_fullscreen() {
        let start = Instant::now();
        let mut chrome = ChromeVisibility::default();
        chrome.set_fullscreen(true, start);

        assert!(chrome.tick(start + Duration::from_millis(2999)));
        assert!(!chrome.tick(start + Duration::from_secs(3)));
    }

    #[test]
    fn movement_reshows_and_restarts_timer() {
        let start = Instant::now();
        let mut chrome = ChromeVisibility::default();
        chrome.set_fullscreen(true, start);
        assert!(!chrome.tick(start + Duration::from_secs(4)));

        let moved = start + Duration::from_secs(5);
        chrome.pointer_moved(moved);
        assert!(chrome.is_visible());
        assert!(chrome.tick(moved + Duration::from_secs(2)));
        assert!(!chrome.tick(moved + Duration::from_secs(3)));
    }

    #[test]
    fn leaving_hides_sooner_in_fullscreen() {
        let start = Instant::now();
        let mut chrome = ChromeVisibility::default();
        chrome.set_fullscreen(true, start);
        chrome.pointer_left(start);

        assert!(chrome.tick(start + Duration::from_millis(500)));
        assert!(!chrome.tick(start + Duration::from_millis(1000)));
    }

    #[test]
    fn leaving_outside_fullscreen_keeps_chrome() {
        let start = Instant::now();
        let mut chrome = ChromeVisibility::default();
        chrome.pointer_moved(start);
        chrome.pointer_left(start);

        assert!(chrome.tick(start + Duration::from_secs(2)));
    }

    #[test]
    fn exiting_fullscreen_cancels_idle_hide() {
        let start = Instant::now();
        let mut chrome = ChromeVisibility::default();
        chrome.set_fullscreen(true, start);
        chrome.set_fullscreen(false, start + Duration::from_secs(1));
        assert!(chrome.tick(start + Duration::from_secs(10)));
    }
}
