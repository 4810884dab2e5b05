// Export modules for use in tests
pub mod config;
pub mod event_source;
pub mod inputs;
pub mod panic_handler;
pub mod pdf;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{Labels, ViewerConfig};
pub use pdf::{
    DocumentEngine, DocumentHandle, DocumentLoader, LoadError, RenderError, RenderParams,
    RenderedPage, Rotation, ViewerHost, ViewerSession,
};
pub use store::{ReaderStore, ReadingMode};
