//! PDF viewing engine: loading, rendering, caching and navigation state

mod cache;
mod loader;
mod preload;
mod renderer;
mod request;
mod session;
mod state;
mod zoom;

pub use cache::{ContinuousPageMap, PageCache};
pub use loader::{DocumentHandle, DocumentLoader, LoadError, Source, resolve_locator};
pub use preload::{ContinuousJob, ContinuousRun, PreloadScheduler, render_into_map, spawn_continuous};
#[cfg(feature = "pdf")]
pub use renderer::MupdfEngine;
pub use renderer::{
    DocumentEngine, DocumentInfo, EngineError, JPEG_QUALITY, Raster, Rasterizer, render_page,
    viewport_size,
};
pub use request::{RenderError, RenderOutcome, RenderParams, RenderedPage, Rotation, WorkerEvent};
pub use session::{SessionOptions, ViewerHost, ViewerSession};
pub use state::{Boundary, Command, Effect, Overlays, Remediation, Status, ViewerState};
pub use zoom::ZoomLevel;

/// Default number of rendered pages kept in the page cache
pub const DEFAULT_CACHE_SIZE: usize = 32;
