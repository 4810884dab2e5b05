//! Zoom level in percent, stepped and clamped

use serde::{Deserialize, Serialize};

/// Zoom level as a whole percentage (100 = actual size)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub struct ZoomLevel(u16);

impl ZoomLevel {
    /// Minimum allowed zoom percentage
    pub const MIN: u16 = 50;
    /// Maximum allowed zoom percentage
    pub const MAX: u16 = 200;
    /// Percentage change per zoom step
    pub const STEP: u16 = 10;
    pub const DEFAULT: u16 = 100;

    #[must_use]
    pub fn new(percent: u16) -> Self {
        Self(Self::clamp_percent(percent))
    }

    #[must_use]
    pub fn percent(self) -> u16 {
        self.0
    }

    /// Multiplier applied on top of the base render scale
    #[must_use]
    pub fn factor(self) -> f32 {
        f32::from(self.0) / 100.0
    }

    #[must_use]
    pub fn zoomed_in(self) -> Self {
        Self::new(self.0.saturating_add(Self::STEP))
    }

    #[must_use]
    pub fn zoomed_out(self) -> Self {
        Self::new(self.0.saturating_sub(Self::STEP))
    }

    fn clamp_percent(percent: u16) -> u16 {
        percent.clamp(Self::MIN, Self::MAX)
    }
}

impl From<u16> for ZoomLevel {
    fn from(percent: u16) -> Self {
        Self::new(percent)
    }
}

impl From<ZoomLevel> for u16 {
    fn from(zoom: ZoomLevel) -> Self {
        zoom.0
    }
}

impl Default for ZoomLevel {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}
