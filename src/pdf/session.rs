//! Viewer session - owns caches, workers and the state machine
//!
//! A session lives from viewer start to teardown. Commands go through
//! [`ViewerSession::apply`]; background results arrive through
//! [`ViewerSession::poll`]. Both deliver host callbacks on the caller's
//! thread. Once the session is closed, late results are discarded.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use flume::{Receiver, Sender};
use log::{debug, error, info, warn};

use super::cache::{ContinuousPageMap, PageCache};
use super::loader::{DocumentHandle, DocumentLoader, LoadError};
use super::preload::{
    ContinuousJob, ContinuousRun, PreloadScheduler, render_into_map, spawn_continuous,
};
use super::renderer::{DocumentEngine, Rasterizer, render_page};
use super::request::{RenderError, RenderedPage, WorkerEvent};
use super::state::{Boundary, Command, Effect, ViewerState};
use crate::config::ViewerConfig;
use crate::store::{ReaderStore, ReadingMode, SettingsUpdate};

/// Callbacks from the viewer to its host; every method defaults to a no-op
pub trait ViewerHost {
    fn on_page_change(&mut self, _page: usize) {}

    fn on_total_pages_change(&mut self, _total: usize) {}

    fn on_bookmark(&mut self, _page: usize) {}

    fn on_annotation_add(&mut self, _page: usize, _text: &str) {}

    fn on_annotation_update(&mut self, _id: &str, _text: &str) {}

    fn on_annotation_delete(&mut self, _id: &str) {}

    /// Navigation ran past the first or last page
    fn on_boundary(&mut self, _boundary: Boundary) {}

    fn on_load_progress(&mut self, _fraction: f32) {}

    fn on_load_failed(&mut self, _error: &LoadError) {}

    /// Foreground render of a paged-mode page finished
    fn on_page_rendered(&mut self, _page: &RenderedPage) {}

    fn on_page_error(&mut self, _page: usize, _error: &RenderError) {}

    /// A page was added to (or replaced in) the continuous view
    fn on_continuous_page(&mut self, _page: &RenderedPage) {}

    /// Continuous mode: scroll this page into view
    fn on_reveal_page(&mut self, _page: usize) {}
}

/// Inbound parameters from the host
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Stable identifier used as the persistence key
    pub document_id: String,
    /// URL or path of the document bytes
    pub locator: String,
    /// Overrides saved reading progress when set
    pub initial_page: Option<usize>,
}

pub struct ViewerSession<H: ViewerHost> {
    options: SessionOptions,
    config: ViewerConfig,
    loader: DocumentLoader,
    store: ReaderStore,
    host: H,
    state: ViewerState,
    handle: Option<DocumentHandle>,
    foreground: Option<Box<dyn Rasterizer>>,
    cache: Arc<PageCache>,
    continuous: Arc<ContinuousPageMap>,
    alive: Arc<AtomicBool>,
    scheduler: Option<PreloadScheduler>,
    continuous_run: Option<ContinuousRun>,
    next_run_id: u64,
    events_tx: Sender<WorkerEvent>,
    events_rx: Receiver<WorkerEvent>,
}

impl<H: ViewerHost> ViewerSession<H> {
    /// Create a session and load the document
    pub fn open(
        options: SessionOptions,
        config: ViewerConfig,
        engine: Arc<dyn DocumentEngine>,
        store: ReaderStore,
        host: H,
    ) -> Self {
        let settings = store.get_settings();
        let mode = if store.has_saved_settings() {
            settings.reading_mode
        } else {
            config.reading_mode
        };
        let state = ViewerState::new(config.render_scale, mode, settings.zoom_level, config.preload);
        let cache = Arc::new(PageCache::new(config.cache_capacity, state.render_params()));
        let loader = DocumentLoader::new(engine, config.api_base_url.clone(), config.load_timeout());
        let (events_tx, events_rx) = flume::unbounded();

        let mut session = Self {
            options,
            config,
            loader,
            store,
            host,
            state,
            handle: None,
            foreground: None,
            cache,
            continuous: Arc::new(ContinuousPageMap::new()),
            alive: Arc::new(AtomicBool::new(true)),
            scheduler: None,
            continuous_run: None,
            next_run_id: 1,
            events_tx,
            events_rx,
        };
        session.load();
        session
    }

    pub fn state(&self) -> &ViewerState {
        &self.state
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn store(&self) -> &ReaderStore {
        &self.store
    }

    pub fn document_id(&self) -> &str {
        &self.options.document_id
    }

    pub fn handle(&self) -> Option<&DocumentHandle> {
        self.handle.as_ref()
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Bitmap of the current page if it has been rendered
    pub fn current_page(&self) -> Option<Arc<RenderedPage>> {
        match self.state.mode {
            ReadingMode::Paged => self.cache.get(self.state.current_page),
            ReadingMode::Continuous => self.continuous.get(self.state.current_page),
        }
    }

    /// Pages loaded for continuous mode, ascending
    pub fn loaded_pages(&self) -> Vec<usize> {
        self.continuous.loaded_pages()
    }

    pub fn continuous_page(&self, page: usize) -> Option<Arc<RenderedPage>> {
        self.continuous.get(page)
    }

    /// Apply a command, executing its effects and any follow-up commands
    pub fn apply(&mut self, cmd: Command) {
        if !self.is_alive() {
            debug!("Ignoring {cmd:?} on closed session");
            return;
        }
        let mut queue = VecDeque::from([cmd]);
        while let Some(cmd) = queue.pop_front() {
            let effects = self.state.apply(cmd);
            for effect in effects {
                self.execute(effect, &mut queue);
            }
        }
    }

    fn execute(&mut self, effect: Effect, queue: &mut VecDeque<Command>) {
        match effect {
            Effect::LoadDocument => self.load(),

            Effect::RenderPage(page) => queue.push_back(self.render_foreground(page)),

            Effect::InvalidateCache => {
                let params = self.state.render_params();
                self.cache.invalidate_all(params);
                if let Some(scheduler) = &self.scheduler {
                    scheduler.clear_queued();
                }
            }

            Effect::SchedulePreload(page) => {
                if let Some(scheduler) = &self.scheduler {
                    let scheduled = scheduler.schedule_neighbors(
                        page,
                        self.state.total_pages,
                        self.state.render_params(),
                        self.config.preload_next_delay(),
                        self.config.preload_prev_delay(),
                    );
                    debug!("Preload around page {page}: {scheduled:?}");
                }
            }

            Effect::StartContinuousLoad => self.start_continuous(),

            Effect::StopContinuousLoad => self.stop_continuous(),

            Effect::RevealPage(page) => {
                self.ensure_continuous_page(page);
                self.host.on_reveal_page(page);
            }

            Effect::NotifyPageChange(page) => self.host.on_page_change(page),

            Effect::NotifyTotalPages(total) => self.host.on_total_pages_change(total),

            Effect::BoundaryReached(boundary) => {
                debug!("Navigation reached {boundary:?} boundary");
                self.host.on_boundary(boundary);
            }

            Effect::SaveProgress(page) => {
                self.store
                    .save_reading_progress(&self.options.document_id, page);
            }

            Effect::SaveSettings => {
                self.store.save_settings(&SettingsUpdate {
                    reading_mode: Some(self.state.mode),
                    zoom_level: Some(self.state.zoom),
                    show_annotations: None,
                });
            }

            Effect::ToggleBookmark(page) => {
                let outcome = self.store.toggle_bookmark(&self.options.document_id, page);
                debug!("Bookmark toggled on page {page}: added={}", outcome.is_added());
                self.host.on_bookmark(page);
            }

            Effect::CreateAnnotation { page, text } => {
                self.store
                    .add_annotation(&self.options.document_id, page, &text);
                self.host.on_annotation_add(page, &text);
            }

            Effect::UpdateAnnotation { id, text } => {
                if self.store.update_annotation(&id, &text).is_some() {
                    self.host.on_annotation_update(&id, &text);
                }
            }

            Effect::DeleteAnnotation(id) => {
                if self.store.remove_annotation(&id) {
                    self.host.on_annotation_delete(&id);
                }
            }
        }
    }

    fn load(&mut self) {
        self.teardown_document();

        let locator = self.options.locator.clone();
        let host = &mut self.host;
        let result = self
            .loader
            .load(&locator, |fraction| host.on_load_progress(fraction))
            .and_then(|handle| {
                let foreground = handle.open_rasterizer().map_err(|e| LoadError::Parse {
                    url: handle.url().to_string(),
                    message: e.to_string(),
                })?;
                Ok((handle, foreground))
            });

        match result {
            Ok((handle, foreground)) => {
                if self.config.preload {
                    self.scheduler = Some(PreloadScheduler::start(
                        &handle,
                        Arc::clone(&self.cache),
                        Arc::clone(&self.alive),
                        self.events_tx.clone(),
                        self.config.preload_workers,
                    ));
                }
                let total_pages = handle.page_count();
                self.handle = Some(handle);
                self.foreground = Some(foreground);

                let document_id = self.options.document_id.clone();
                let initial_page = self
                    .options
                    .initial_page
                    .unwrap_or_else(|| self.store.get_reading_progress(&document_id));
                self.state.seed_bookmarks(
                    self.store
                        .get_bookmarks(&document_id)
                        .into_iter()
                        .map(|b| b.page_number),
                );
                info!("Session {document_id} ready: {total_pages} pages, starting at {initial_page}");
                self.apply(Command::DocumentLoaded {
                    total_pages,
                    initial_page,
                });
            }
            Err(err) => {
                error!("Failed to load {locator}: {err}");
                self.host.on_load_failed(&err);
                self.apply(Command::LoadFailed(err));
            }
        }
    }

    fn teardown_document(&mut self) {
        self.stop_continuous();
        self.scheduler = None;
        self.foreground = None;
        self.handle = None;
    }

    fn render_foreground(&mut self, page: usize) -> Command {
        let Some(rasterizer) = self.foreground.as_deref() else {
            return Command::PageFailed {
                page,
                error: RenderError::render(page, "no document loaded"),
            };
        };
        let params = self.state.render_params();
        let outcome = self
            .cache
            .get_or_render(page, &params, || render_page(rasterizer, page, &params));

        match outcome {
            Ok(rendered) => {
                self.host.on_page_rendered(&rendered);
                Command::PageRendered(page)
            }
            Err(error) => {
                warn!("Render of page {page} failed: {error}");
                self.host.on_page_error(page, &error);
                Command::PageFailed { page, error }
            }
        }
    }

    /// Render the first pages eagerly, then hand the rest to a background run
    fn start_continuous(&mut self) {
        self.stop_continuous();
        let Some(handle) = self.handle.clone() else {
            return;
        };
        let params = self.state.render_params();
        if self.cache.params() != params {
            self.cache.invalidate_all(params);
        }

        let run = ContinuousRun::new(self.next_run_id);
        self.next_run_id += 1;
        let total = self.state.total_pages;
        let eager = self.config.continuous_eager_pages.min(total);

        if let Some(rasterizer) = self.foreground.as_deref() {
            for page in 1..=eager {
                if !self.alive.load(Ordering::Acquire) {
                    return;
                }
                if self.continuous.is_fresh(page, &params) {
                    continue;
                }
                match render_into_map(rasterizer, &self.cache, &self.continuous, page, &params, None) {
                    Ok(true) => {
                        if let Some(rendered) = self.continuous.get(page) {
                            self.host.on_continuous_page(&rendered);
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Continuous render of page {page} failed: {e}");
                        self.host.on_page_error(page, &e);
                    }
                }
            }
        }

        let pages: Vec<usize> = (eager + 1..=total)
            .filter(|page| !self.continuous.is_fresh(*page, &params))
            .collect();
        debug!(
            "Continuous run {}: {eager} eager, {} in background",
            run.id(),
            pages.len()
        );
        if !pages.is_empty() {
            spawn_continuous(ContinuousJob {
                handle,
                cache: Arc::clone(&self.cache),
                map: Arc::clone(&self.continuous),
                alive: Arc::clone(&self.alive),
                run: run.clone(),
                params,
                pages,
                start_delay: self.config.continuous_start_delay(),
                pause: self.config.continuous_yield(),
                events: self.events_tx.clone(),
            });
        }
        self.continuous_run = Some(run);
    }

    fn stop_continuous(&mut self) {
        if let Some(run) = self.continuous_run.take() {
            debug!("Stopping continuous run {}", run.id());
            run.cancel();
        }
    }

    /// Render a page into the continuous view on demand
    fn ensure_continuous_page(&mut self, page: usize) {
        let params = self.state.render_params();
        if self.continuous.is_fresh(page, &params) {
            return;
        }
        if self.cache.params() != params {
            self.cache.invalidate_all(params);
        }
        let Some(rasterizer) = self.foreground.as_deref() else {
            return;
        };
        match render_into_map(rasterizer, &self.cache, &self.continuous, page, &params, None) {
            Ok(true) => {
                if let Some(rendered) = self.continuous.get(page) {
                    self.host.on_continuous_page(&rendered);
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Render of revealed page {page} failed: {e}");
                self.host.on_page_error(page, &e);
            }
        }
    }

    /// Deliver background results; returns the number handled
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if self.handle_event(event) {
                handled += 1;
            }
        }
        handled
    }

    /// Wait up to `timeout` for a background result, then drain the rest
    pub fn poll_timeout(&mut self, timeout: Duration) -> usize {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => usize::from(self.handle_event(event)) + self.poll(),
            Err(_) => 0,
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) -> bool {
        if !self.is_alive() {
            debug!("Discarding {event:?} after teardown");
            return false;
        }
        match event {
            WorkerEvent::Preloaded { page, result } => match result {
                Ok(()) => debug!("Preloaded page {page}"),
                Err(e) => warn!("Preload of page {page} failed: {e}"),
            },

            WorkerEvent::ContinuousPage { run, page, result } => {
                let current = self.continuous_run.as_ref().map(ContinuousRun::id);
                if current != Some(run) {
                    debug!("Ignoring page {page} from finished run {run}");
                    return false;
                }
                match result {
                    Ok(()) => {
                        if let Some(rendered) = self.continuous.get(page) {
                            self.host.on_continuous_page(&rendered);
                        }
                    }
                    Err(e) => {
                        warn!("Continuous render of page {page} failed: {e}");
                        self.host.on_page_error(page, &e);
                    }
                }
            }

            WorkerEvent::ContinuousDone { run } => {
                debug!("Continuous run {run} finished");
            }

            WorkerEvent::WorkerFailed(message) => {
                error!("Render worker could not open document: {message}");
            }
        }
        true
    }

    /// Tear down: stop background work and discard anything still in flight
    pub fn close(&mut self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            info!("Closing session {}", self.options.document_id);
        }
        self.teardown_document();
    }
}

impl<H: ViewerHost> Drop for ViewerSession<H> {
    fn drop(&mut self) {
        self.close();
    }
}
