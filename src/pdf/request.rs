//! Render parameters, results and worker messages

use std::sync::Arc;
use std::time::Instant;

/// Clockwise page rotation in quarter turns
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Next quarter turn clockwise, wrapping at 360
    #[must_use]
    pub fn clockwise(self) -> Self {
        match self {
            Self::Deg0 => Self::Deg90,
            Self::Deg90 => Self::Deg180,
            Self::Deg180 => Self::Deg270,
            Self::Deg270 => Self::Deg0,
        }
    }

    #[must_use]
    pub fn degrees(self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Build from any multiple of 90, normalized mod 360
    #[must_use]
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    /// Whether width and height trade places
    #[must_use]
    pub fn is_sideways(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

/// Parameters for rendering a page; defines the cache validity scope
#[derive(Clone, Copy, Debug)]
pub struct RenderParams {
    /// Rasterization scale (render scale multiplied by zoom)
    pub scale: f32,
    pub rotation: Rotation,
}

impl RenderParams {
    #[must_use]
    pub fn new(scale: f32, rotation: Rotation) -> Self {
        Self { scale, rotation }
    }

    /// Scale in millionths, for stable comparison
    fn scale_millionths(&self) -> u32 {
        (self.scale * 1_000_000.0).round() as u32
    }
}

impl Default for RenderParams {
    fn default() -> Self {
        Self::new(1.0, Rotation::Deg0)
    }
}

impl PartialEq for RenderParams {
    fn eq(&self, other: &Self) -> bool {
        self.scale_millionths() == other.scale_millionths() && self.rotation == other.rotation
    }
}

impl Eq for RenderParams {}

/// A rasterized page, encoded as JPEG
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedPage {
    /// Page number (1-based)
    pub page: usize,
    pub bitmap: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Parameters the bitmap was produced under
    pub params: RenderParams,
}

/// Page-local render failures; both are recoverable by re-requesting
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("page {page} is outside 1..={total}")]
    InvalidPage { page: usize, total: usize },

    #[error("failed to render page {page}: {message}")]
    Render { page: usize, message: String },
}

impl RenderError {
    pub fn render(page: usize, message: impl Into<String>) -> Self {
        Self::Render {
            page,
            message: message.into(),
        }
    }
}

/// Outcome shared between single-flight waiters
pub type RenderOutcome = Result<Arc<RenderedPage>, RenderError>;

/// Request sent to preload workers
#[derive(Debug)]
pub enum RenderRequest {
    /// Speculative render; dropped if the cache was invalidated before it runs
    Preload {
        page: usize,
        params: RenderParams,
        generation: u64,
        not_before: Instant,
    },

    /// Shutdown the worker
    Shutdown,
}

/// Notifications from background threads, drained by the session
#[derive(Debug)]
pub enum WorkerEvent {
    Preloaded {
        page: usize,
        result: Result<(), RenderError>,
    },
    ContinuousPage {
        run: u64,
        page: usize,
        result: Result<(), RenderError>,
    },
    ContinuousDone {
        run: u64,
    },
    /// A worker could not open its own copy of the document
    WorkerFailed(String),
}
