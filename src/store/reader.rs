use std::collections::HashMap;

use chrono::Utc;
use log::{debug, error, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::model::{Annotation, Bookmark, BookmarkToggle, ReaderSettings, SettingsUpdate};
use super::storage::KeyValueStorage;

pub const BOOKMARKS_KEY: &str = "pdf_reader_bookmarks";
pub const ANNOTATIONS_KEY: &str = "pdf_reader_annotations";
pub const SETTINGS_KEY: &str = "pdf_reader_settings";
pub const PROGRESS_KEY_PREFIX: &str = "pdf_reader_progress";

pub fn progress_key(document_id: &str) -> String {
    format!("{PROGRESS_KEY_PREFIX}_{document_id}")
}

/// Bookmarks, annotations, settings and reading progress.
///
/// Collections are read once when the store opens; every mutation updates
/// the in-memory copy first and then writes through. Storage failures are
/// logged and swallowed, so the in-memory state stays authoritative for
/// the rest of the session.
pub struct ReaderStore {
    storage: Box<dyn KeyValueStorage>,
    bookmarks: Vec<Bookmark>,
    annotations: Vec<Annotation>,
    settings: ReaderSettings,
    settings_saved: bool,
    progress: HashMap<String, usize>,
}

impl ReaderStore {
    pub fn open(storage: Box<dyn KeyValueStorage>) -> Self {
        let bookmarks = read_or_default(storage.as_ref(), BOOKMARKS_KEY);
        let annotations = read_or_default(storage.as_ref(), ANNOTATIONS_KEY);
        let settings = read_or_default(storage.as_ref(), SETTINGS_KEY);
        let settings_saved = matches!(storage.get(SETTINGS_KEY), Ok(Some(_)));
        Self {
            storage,
            bookmarks,
            annotations,
            settings,
            settings_saved,
            progress: HashMap::new(),
        }
    }

    /// Remove the bookmark on `page_number` if present, otherwise add one
    pub fn toggle_bookmark(&mut self, document_id: &str, page_number: usize) -> BookmarkToggle {
        let existing = self
            .bookmarks
            .iter()
            .position(|b| b.document_id == document_id && b.page_number == page_number);

        let outcome = match existing {
            Some(index) => {
                self.bookmarks.remove(index);
                BookmarkToggle::Removed {
                    document_id: document_id.to_string(),
                    page_number,
                }
            }
            None => {
                let bookmark = Bookmark {
                    document_id: document_id.to_string(),
                    page_number,
                    created_at: Utc::now(),
                    title: Bookmark::default_title(page_number),
                };
                self.bookmarks.push(bookmark.clone());
                BookmarkToggle::Added(bookmark)
            }
        };

        persist(self.storage.as_mut(), BOOKMARKS_KEY, &self.bookmarks);
        outcome
    }

    /// Bookmarks of one document, ordered by page
    pub fn get_bookmarks(&self, document_id: &str) -> Vec<Bookmark> {
        let mut bookmarks: Vec<Bookmark> = self
            .bookmarks
            .iter()
            .filter(|b| b.document_id == document_id)
            .cloned()
            .collect();
        bookmarks.sort_by_key(|b| b.page_number);
        bookmarks
    }

    pub fn is_bookmarked(&self, document_id: &str, page_number: usize) -> bool {
        self.bookmarks
            .iter()
            .any(|b| b.document_id == document_id && b.page_number == page_number)
    }

    pub fn add_annotation(&mut self, document_id: &str, page_number: usize, text: &str) -> Annotation {
        let annotation = Annotation {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            page_number,
            text: text.to_string(),
            created_at: Utc::now(),
            updated_at: None,
        };
        self.annotations.push(annotation.clone());

        persist(self.storage.as_mut(), ANNOTATIONS_KEY, &self.annotations);
        annotation
    }

    /// Replace the text of annotation `id`; id and creation time are kept
    pub fn update_annotation(&mut self, id: &str, text: &str) -> Option<Annotation> {
        let Some(annotation) = self.annotations.iter_mut().find(|a| a.id == id) else {
            warn!("Cannot update unknown annotation {id}");
            return None;
        };
        annotation.text = text.to_string();
        annotation.updated_at = Some(Utc::now());
        let updated = annotation.clone();

        persist(self.storage.as_mut(), ANNOTATIONS_KEY, &self.annotations);
        Some(updated)
    }

    pub fn remove_annotation(&mut self, id: &str) -> bool {
        let before = self.annotations.len();
        self.annotations.retain(|a| a.id != id);
        if self.annotations.len() == before {
            debug!("Annotation {id} already absent");
            return false;
        }

        persist(self.storage.as_mut(), ANNOTATIONS_KEY, &self.annotations);
        true
    }

    /// Annotations of one document, optionally narrowed to a page
    pub fn get_annotations(&self, document_id: &str, page_number: Option<usize>) -> Vec<Annotation> {
        self.annotations
            .iter()
            .filter(|a| a.document_id == document_id)
            .filter(|a| page_number.is_none_or(|p| a.page_number == p))
            .cloned()
            .collect()
    }

    /// Merge `update` over the stored settings and return the result
    pub fn save_settings(&mut self, update: &SettingsUpdate) -> ReaderSettings {
        self.settings = self.settings.merged(update);
        self.settings_saved = true;
        persist(self.storage.as_mut(), SETTINGS_KEY, &self.settings);
        self.settings.clone()
    }

    pub fn get_settings(&self) -> ReaderSettings {
        self.settings.clone()
    }

    /// Whether settings were ever saved, as opposed to pure defaults
    pub fn has_saved_settings(&self) -> bool {
        self.settings_saved
    }

    pub fn save_reading_progress(&mut self, document_id: &str, page_number: usize) {
        self.progress.insert(document_id.to_string(), page_number);
        persist(self.storage.as_mut(), &progress_key(document_id), &page_number);
    }

    /// Last page read; page 1 when nothing was saved
    pub fn get_reading_progress(&self, document_id: &str) -> usize {
        if let Some(page) = self.progress.get(document_id) {
            return *page;
        }
        let page: Option<usize> = read_or_default(self.storage.as_ref(), &progress_key(document_id));
        page.filter(|p| *p >= 1).unwrap_or(1)
    }
}

fn persist<T: Serialize + ?Sized>(storage: &mut dyn KeyValueStorage, key: &str, value: &T) {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize {key}: {e}");
            return;
        }
    };
    if let Err(e) = storage.set(key, &json) {
        error!("Failed to persist {key}, keeping in-memory copy: {e:#}");
    }
}

fn read_or_default<T: DeserializeOwned + Default>(storage: &dyn KeyValueStorage, key: &str) -> T {
    match storage.get(key) {
        Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
            error!("Discarding unreadable {key}: {e}");
            T::default()
        }),
        Ok(None) => T::default(),
        Err(e) => {
            error!("Failed to read {key}: {e:#}");
            T::default()
        }
    }
}
