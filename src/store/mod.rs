//! Local persistence for bookmarks, annotations, settings and progress

mod model;
mod reader;
mod storage;

pub use model::{
    Annotation, Bookmark, BookmarkToggle, ReaderSettings, ReadingMode, SettingsUpdate,
};
pub use reader::{
    ANNOTATIONS_KEY, BOOKMARKS_KEY, PROGRESS_KEY_PREFIX, ReaderStore, SETTINGS_KEY, progress_key,
};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage};
