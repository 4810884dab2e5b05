//! Viewer configuration and accessibility labels
//!
//! Loaded from `config.yaml` under the platform config directory. Missing
//! or malformed files fall back to defaults; every field has a default so
//! partial files are accepted.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::pdf::DEFAULT_CACHE_SIZE;
use crate::store::ReadingMode;

const CONFIG_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "folio";
const API_URL_ENV: &str = "FOLIO_API_URL";

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Speculatively render neighbours of the visible page
    #[serde(default = "default_true")]
    pub preload: bool,

    /// Base rasterization scale; multiplied by the zoom factor
    #[serde(default = "default_render_scale")]
    pub render_scale: f32,

    /// Mode used when no reader settings have been stored yet
    #[serde(default)]
    pub reading_mode: ReadingMode,

    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,

    /// Prefix for relative document locators
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_preload_workers")]
    pub preload_workers: usize,

    #[serde(default = "default_preload_next_delay_ms")]
    pub preload_next_delay_ms: u64,

    #[serde(default = "default_preload_prev_delay_ms")]
    pub preload_prev_delay_ms: u64,

    /// Pages rendered eagerly when continuous mode starts
    #[serde(default = "default_continuous_eager_pages")]
    pub continuous_eager_pages: usize,

    #[serde(default = "default_continuous_start_delay_ms")]
    pub continuous_start_delay_ms: u64,

    /// Pause between background renders in continuous mode
    #[serde(default = "default_continuous_yield_ms")]
    pub continuous_yield_ms: u64,

    #[serde(default = "default_chrome_hide_secs")]
    pub chrome_hide_secs: u64,

    #[serde(default = "default_chrome_leave_hide_ms")]
    pub chrome_leave_hide_ms: u64,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_render_scale() -> f32 {
    1.5
}

fn default_load_timeout_secs() -> u64 {
    30
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_SIZE
}

fn default_preload_workers() -> usize {
    2
}

fn default_preload_next_delay_ms() -> u64 {
    100
}

fn default_preload_prev_delay_ms() -> u64 {
    200
}

fn default_continuous_eager_pages() -> usize {
    5
}

fn default_continuous_start_delay_ms() -> u64 {
    500
}

fn default_continuous_yield_ms() -> u64 {
    10
}

fn default_chrome_hide_secs() -> u64 {
    3
}

fn default_chrome_leave_hide_ms() -> u64 {
    1000
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            preload: true,
            render_scale: default_render_scale(),
            reading_mode: ReadingMode::default(),
            load_timeout_secs: default_load_timeout_secs(),
            api_base_url: default_api_base_url(),
            cache_capacity: default_cache_capacity(),
            preload_workers: default_preload_workers(),
            preload_next_delay_ms: default_preload_next_delay_ms(),
            preload_prev_delay_ms: default_preload_prev_delay_ms(),
            continuous_eager_pages: default_continuous_eager_pages(),
            continuous_start_delay_ms: default_continuous_start_delay_ms(),
            continuous_yield_ms: default_continuous_yield_ms(),
            chrome_hide_secs: default_chrome_hide_secs(),
            chrome_leave_hide_ms: default_chrome_leave_hide_ms(),
            labels: HashMap::new(),
        }
    }
}

impl ViewerConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    pub fn preload_next_delay(&self) -> Duration {
        Duration::from_millis(self.preload_next_delay_ms)
    }

    pub fn preload_prev_delay(&self) -> Duration {
        Duration::from_millis(self.preload_prev_delay_ms)
    }

    pub fn continuous_start_delay(&self) -> Duration {
        Duration::from_millis(self.continuous_start_delay_ms)
    }

    pub fn continuous_yield(&self) -> Duration {
        Duration::from_millis(self.continuous_yield_ms)
    }

    pub fn chrome_hide_after(&self) -> Duration {
        Duration::from_secs(self.chrome_hide_secs)
    }

    pub fn chrome_leave_hide_after(&self) -> Duration {
        Duration::from_millis(self.chrome_leave_hide_ms)
    }

    pub fn labels(&self) -> Labels {
        Labels::with_overrides(&self.labels)
    }

    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Self {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::load_from_path(&path),
            Some(path) => {
                info!("Config file not found at {path:?}, using defaults");
                Self::default()
            }
            None => {
                warn!("Could not determine config directory, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        config
    }

    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<Self>(&content) {
                Ok(config) => {
                    debug!("Loaded config from {path:?}");
                    config
                }
                Err(e) => {
                    error!("Failed to parse config file {path:?}: {e}");
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read config file {path:?}: {e}");
                Self::default()
            }
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                debug!("Using API base URL from {API_URL_ENV}: {url}");
                self.api_base_url = url;
            }
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(CONFIG_FILENAME))
}

/// Directory used by the file-backed reader store.
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|data| data.join(APP_NAME))
}

/// User-facing labels for viewer controls.
///
/// Host-supplied overrides win over the built-in defaults; unknown keys are
/// kept so hosts can carry their own labels through the same map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
    entries: HashMap<String, String>,
}

impl Labels {
    pub const NEXT_PAGE: &'static str = "nextPage";
    pub const PREV_PAGE: &'static str = "prevPage";
    pub const ZOOM_IN: &'static str = "zoomIn";
    pub const ZOOM_OUT: &'static str = "zoomOut";
    pub const ROTATE: &'static str = "rotate";
    pub const BOOKMARK: &'static str = "bookmark";
    pub const ANNOTATION: &'static str = "annotation";
    pub const SETTINGS: &'static str = "settings";
    pub const HELP: &'static str = "help";
    pub const PAGE_INDICATOR: &'static str = "pageIndicator";

    fn defaults() -> [(&'static str, &'static str); 10] {
        [
            (Self::NEXT_PAGE, "Next page"),
            (Self::PREV_PAGE, "Previous page"),
            (Self::ZOOM_IN, "Zoom in"),
            (Self::ZOOM_OUT, "Zoom out"),
            (Self::ROTATE, "Rotate"),
            (Self::BOOKMARK, "Bookmark"),
            (Self::ANNOTATION, "Annotations"),
            (Self::SETTINGS, "Settings"),
            (Self::HELP, "Help"),
            (Self::PAGE_INDICATOR, "Page {current} of {total}"),
        ]
    }

    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut entries: HashMap<String, String> = Self::defaults()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        entries.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { entries }
    }

    pub fn get<'a>(&'a self, key: &'a str) -> &'a str {
        self.entries.get(key).map(String::as_str).unwrap_or(key)
    }

    pub fn page_indicator(&self, current: usize, total: usize) -> String {
        self.get(Self::PAGE_INDICATOR)
            .replace("{current}", &current.to_string())
            .replace("{total}", &total.to_string())
    }
}

impl Default for Labels {
    fn default() -> Self {
        Self::with_overrides(&HashMap::new())
    }
}
