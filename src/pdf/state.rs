//! Viewer state machine
//!
//! `apply(command) -> effects` is the only way state changes. Effects are
//! requests for the session to render, persist or notify the host; the
//! machine itself performs no I/O.

use std::collections::BTreeSet;

use super::loader::LoadError;
use super::request::{RenderError, RenderParams, Rotation};
use super::zoom::ZoomLevel;
use crate::store::ReadingMode;

/// Lifecycle of the viewer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Status {
    #[default]
    Loading,
    Ready,
    /// Load failed; only a new load recovers
    Failed(LoadError),
}

/// Which end of the document navigation ran into
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Boundary {
    Start,
    End,
}

/// Actions offered in the load-failed state
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Remediation {
    Retry,
    /// Fetch the raw document directly
    Download(String),
    /// Hand the document to an external viewer
    OpenExternal(String),
}

/// Overlay panels shown above the page
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Overlays {
    pub annotations: bool,
    pub settings: bool,
    pub help: bool,
}

impl Overlays {
    pub fn any(&self) -> bool {
        self.annotations || self.settings || self.help
    }
}

/// Current viewer state for one document
#[derive(Clone, Debug)]
pub struct ViewerState {
    pub status: Status,

    /// Current page (1-based); 0 until loaded
    pub current_page: usize,

    /// Total page count
    pub total_pages: usize,

    pub mode: ReadingMode,
    pub zoom: ZoomLevel,
    pub rotation: Rotation,

    /// Base rasterization scale, multiplied by zoom
    pub render_scale: f32,

    /// Whether neighbours are rendered ahead of navigation
    pub preload: bool,

    pub bookmarked: BTreeSet<usize>,

    /// Annotation being edited; upserts update it instead of creating
    pub editing_annotation: Option<String>,

    pub overlays: Overlays,

    /// Non-fatal render failure for the current page
    pub page_error: Option<RenderError>,
}

impl ViewerState {
    #[must_use]
    pub fn new(render_scale: f32, mode: ReadingMode, zoom: ZoomLevel, preload: bool) -> Self {
        Self {
            status: Status::Loading,
            current_page: 0,
            total_pages: 0,
            mode,
            zoom,
            rotation: Rotation::Deg0,
            render_scale,
            preload,
            bookmarked: BTreeSet::new(),
            editing_annotation: None,
            overlays: Overlays::default(),
            page_error: None,
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == Status::Ready
    }

    #[must_use]
    pub fn is_current_bookmarked(&self) -> bool {
        self.bookmarked.contains(&self.current_page)
    }

    /// Get render parameters from current state
    #[must_use]
    pub fn render_params(&self) -> RenderParams {
        RenderParams::new(self.render_scale * self.zoom.factor(), self.rotation)
    }

    /// Actions to offer when loading failed
    #[must_use]
    pub fn remediation(&self) -> Vec<Remediation> {
        match &self.status {
            Status::Failed(err) => vec![
                Remediation::Retry,
                Remediation::Download(err.url().to_string()),
                Remediation::OpenExternal(err.url().to_string()),
            ],
            _ => Vec::new(),
        }
    }

    /// Replace the known bookmarked pages without emitting effects
    pub fn seed_bookmarks(&mut self, pages: impl IntoIterator<Item = usize>) {
        self.bookmarked = pages.into_iter().collect();
    }

    /// Apply a command and return resulting effects
    #[must_use]
    pub fn apply(&mut self, cmd: Command) -> Vec<Effect> {
        match cmd {
            Command::DocumentLoaded {
                total_pages,
                initial_page,
            } => {
                if self.status != Status::Loading {
                    return vec![];
                }
                self.status = Status::Ready;
                self.total_pages = total_pages;
                self.current_page = initial_page.clamp(1, total_pages.max(1));
                self.page_error = None;

                let mut effects = vec![
                    Effect::NotifyTotalPages(total_pages),
                    Effect::NotifyPageChange(self.current_page),
                ];
                effects.extend(self.show_effects());
                effects
            }

            Command::LoadFailed(err) => {
                if self.status != Status::Loading {
                    return vec![];
                }
                self.status = Status::Failed(err);
                vec![]
            }

            Command::RetryLoad => {
                if !matches!(self.status, Status::Failed(_)) {
                    return vec![];
                }
                self.status = Status::Loading;
                self.total_pages = 0;
                self.current_page = 0;
                vec![Effect::LoadDocument]
            }

            Command::GoToPage(page) => self.go_to(page, true),

            Command::Next => {
                if !self.is_ready() {
                    return vec![];
                }
                if self.current_page >= self.total_pages {
                    return vec![Effect::BoundaryReached(Boundary::End)];
                }
                self.go_to(self.current_page + 1, false)
            }

            Command::Prev => {
                if !self.is_ready() {
                    return vec![];
                }
                if self.current_page <= 1 {
                    return vec![Effect::BoundaryReached(Boundary::Start)];
                }
                self.go_to(self.current_page - 1, false)
            }

            Command::Home => self.go_to(1, false),

            Command::End => self.go_to(self.total_pages, false),

            Command::ZoomIn => self.set_zoom(self.zoom.zoomed_in()),

            Command::ZoomOut => self.set_zoom(self.zoom.zoomed_out()),

            Command::ResetZoom => self.set_zoom(ZoomLevel::default()),

            Command::Rotate => {
                if !self.is_ready() {
                    return vec![];
                }
                self.rotation = self.rotation.clockwise();
                let mut effects = vec![Effect::InvalidateCache];
                effects.extend(self.show_effects());
                effects
            }

            Command::ToggleReadingMode => {
                self.mode = self.mode.toggled();
                let mut effects = vec![Effect::SaveSettings];
                if self.is_ready() {
                    if self.mode == ReadingMode::Paged {
                        effects.push(Effect::StopContinuousLoad);
                    }
                    effects.extend(self.show_effects());
                }
                effects
            }

            Command::ToggleBookmark => {
                if !self.is_ready() {
                    return vec![];
                }
                let page = self.current_page;
                if !self.bookmarked.remove(&page) {
                    self.bookmarked.insert(page);
                }
                vec![Effect::ToggleBookmark(page)]
            }

            Command::UpsertAnnotation { page, text } => {
                let text = text.trim();
                if text.is_empty() {
                    return vec![];
                }
                self.overlays.annotations = false;
                match self.editing_annotation.take() {
                    Some(id) => vec![Effect::UpdateAnnotation {
                        id,
                        text: text.to_string(),
                    }],
                    None => vec![Effect::CreateAnnotation {
                        page,
                        text: text.to_string(),
                    }],
                }
            }

            Command::EditAnnotation(id) => {
                self.editing_annotation = Some(id);
                self.overlays.annotations = true;
                vec![]
            }

            Command::CancelEdit => {
                self.editing_annotation = None;
                vec![]
            }

            Command::DeleteAnnotation(id) => {
                if self.editing_annotation.as_deref() == Some(id.as_str()) {
                    self.editing_annotation = None;
                }
                vec![Effect::DeleteAnnotation(id)]
            }

            Command::PageRendered(page) => {
                if page != self.current_page {
                    return vec![];
                }
                self.page_error = None;
                if self.preload && self.mode == ReadingMode::Paged {
                    vec![Effect::SchedulePreload(page)]
                } else {
                    vec![]
                }
            }

            Command::PageFailed { page, error } => {
                if page == self.current_page {
                    self.page_error = Some(error);
                }
                vec![]
            }

            Command::ContinuousPageVisible(page) => {
                if !self.is_ready()
                    || self.mode != ReadingMode::Continuous
                    || page == self.current_page
                    || page == 0
                    || page > self.total_pages
                {
                    return vec![];
                }
                self.current_page = page;
                vec![Effect::NotifyPageChange(page), Effect::SaveProgress(page)]
            }

            Command::ToggleAnnotationPanel => {
                self.overlays.annotations = !self.overlays.annotations;
                if !self.overlays.annotations {
                    self.editing_annotation = None;
                }
                vec![]
            }

            Command::ToggleSettings => {
                self.overlays.settings = !self.overlays.settings;
                vec![]
            }

            Command::ToggleHelp => {
                self.overlays.help = !self.overlays.help;
                vec![]
            }

            Command::CloseOverlays => {
                self.overlays = Overlays::default();
                self.editing_annotation = None;
                vec![]
            }
        }
    }

    /// Navigate to `page`, clamped to 1..=total.
    ///
    /// An explicit request for the current page re-renders it, which is
    /// how a failed page is retried.
    fn go_to(&mut self, page: usize, explicit: bool) -> Vec<Effect> {
        if !self.is_ready() || self.total_pages == 0 {
            return vec![];
        }
        let target = page.clamp(1, self.total_pages);

        if target == self.current_page {
            if target != page {
                let boundary = if page < 1 { Boundary::Start } else { Boundary::End };
                return vec![Effect::BoundaryReached(boundary)];
            }
            return if explicit { self.show_current() } else { vec![] };
        }

        self.current_page = target;
        self.page_error = None;
        let mut effects = vec![
            Effect::NotifyPageChange(target),
            Effect::SaveProgress(target),
        ];
        effects.extend(self.show_current());
        effects
    }

    fn set_zoom(&mut self, zoom: ZoomLevel) -> Vec<Effect> {
        if zoom == self.zoom {
            return vec![];
        }
        self.zoom = zoom;
        let mut effects = vec![Effect::InvalidateCache, Effect::SaveSettings];
        if self.is_ready() {
            effects.extend(self.show_effects());
        }
        effects
    }

    /// Effects that put the current page on screen after navigation
    fn show_current(&self) -> Vec<Effect> {
        match self.mode {
            ReadingMode::Paged => vec![Effect::RenderPage(self.current_page)],
            ReadingMode::Continuous => vec![Effect::RevealPage(self.current_page)],
        }
    }

    /// Effects that (re)build what the current mode displays
    fn show_effects(&self) -> Vec<Effect> {
        match self.mode {
            ReadingMode::Paged => vec![Effect::RenderPage(self.current_page)],
            ReadingMode::Continuous => vec![Effect::StartContinuousLoad],
        }
    }
}

/// Commands that modify viewer state
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    DocumentLoaded { total_pages: usize, initial_page: usize },
    LoadFailed(LoadError),
    RetryLoad,

    GoToPage(usize),
    Next,
    Prev,
    Home,
    End,

    ZoomIn,
    ZoomOut,
    ResetZoom,
    Rotate,
    ToggleReadingMode,

    ToggleBookmark,
    UpsertAnnotation { page: usize, text: String },
    EditAnnotation(String),
    CancelEdit,
    DeleteAnnotation(String),

    /// Foreground render of a page finished
    PageRendered(usize),
    PageFailed { page: usize, error: RenderError },

    /// Continuous mode: this page is now the most visible one
    ContinuousPageVisible(usize),

    ToggleAnnotationPanel,
    ToggleSettings,
    ToggleHelp,
    CloseOverlays,
}

/// Side effects produced by state changes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    LoadDocument,
    RenderPage(usize),
    InvalidateCache,
    SchedulePreload(usize),
    StartContinuousLoad,
    StopContinuousLoad,
    /// Continuous mode: scroll `page` into view
    RevealPage(usize),

    NotifyPageChange(usize),
    NotifyTotalPages(usize),
    BoundaryReached(Boundary),

    SaveProgress(usize),
    SaveSettings,
    ToggleBookmark(usize),
    CreateAnnotation { page: usize, text: String },
    UpdateAnnotation { id: String, text: String },
    DeleteAnnotation(String),
}
