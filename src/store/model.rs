use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pdf::ZoomLevel;

/// How pages are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadingMode {
    /// One page at a time
    #[default]
    Paged,
    /// All pages in a scrollable sequence
    Continuous,
}

impl ReadingMode {
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Paged => Self::Continuous,
            Self::Continuous => Self::Paged,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paged => "Paged",
            Self::Continuous => "Continuous",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub document_id: String,
    pub page_number: usize,
    pub created_at: DateTime<Utc>,
    pub title: String,
}

impl Bookmark {
    pub fn default_title(page_number: usize) -> String {
        format!("Page {page_number}")
    }
}

/// Result of toggling a bookmark
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookmarkToggle {
    Added(Bookmark),
    Removed { document_id: String, page_number: usize },
}

impl BookmarkToggle {
    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: String,
    pub document_id: String,
    pub page_number: usize,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Client-wide reader preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderSettings {
    #[serde(default)]
    pub reading_mode: ReadingMode,

    #[serde(default)]
    pub zoom_level: ZoomLevel,

    #[serde(default = "default_true")]
    pub show_annotations: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            reading_mode: ReadingMode::default(),
            zoom_level: ZoomLevel::default(),
            show_annotations: true,
        }
    }
}

/// Partial settings; `None` fields keep their stored value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub reading_mode: Option<ReadingMode>,
    pub zoom_level: Option<ZoomLevel>,
    pub show_annotations: Option<bool>,
}

impl ReaderSettings {
    #[must_use]
    pub fn merged(&self, update: &SettingsUpdate) -> Self {
        Self {
            reading_mode: update.reading_mode.unwrap_or(self.reading_mode),
            zoom_level: update.zoom_level.unwrap_or(self.zoom_level),
            show_annotations: update.show_annotations.unwrap_or(self.show_annotations),
        }
    }
}
