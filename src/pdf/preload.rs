//! Speculative rendering off the foreground thread
//!
//! Paged mode: [`PreloadScheduler`] keeps a pool of workers fed from one
//! flume queue. Each worker opens its own rasterizer and renders through
//! the shared [`PageCache`], so the single-flight guard also covers
//! foreground requests racing a preload.
//!
//! Continuous mode: [`spawn_continuous`] walks the remaining pages in
//! ascending order on a background thread, pausing between renders.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use log::{debug, warn};

use super::cache::{ContinuousPageMap, PageCache};
use super::loader::DocumentHandle;
use super::renderer::{Rasterizer, render_page};
use super::request::{RenderError, RenderParams, RenderRequest, WorkerEvent};

const LIVENESS_POLL: Duration = Duration::from_millis(10);

/// Sleep until `deadline`, waking early to honour cancellation.
/// Returns false if any flag dropped while waiting.
fn wait_until(deadline: Instant, flags: &[&AtomicBool]) -> bool {
    loop {
        if !flags.iter().all(|f| f.load(Ordering::Acquire)) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(LIVENESS_POLL));
    }
}

/// Pool of preload workers sharing one request queue
pub struct PreloadScheduler {
    request_tx: Sender<RenderRequest>,
    cache: Arc<PageCache>,
    queued: Arc<Mutex<HashSet<usize>>>,
    num_workers: usize,
}

impl PreloadScheduler {
    pub fn start(
        handle: &DocumentHandle,
        cache: Arc<PageCache>,
        alive: Arc<AtomicBool>,
        events: Sender<WorkerEvent>,
        num_workers: usize,
    ) -> Self {
        let (request_tx, request_rx) = flume::unbounded();
        let queued = Arc::new(Mutex::new(HashSet::new()));
        let num_workers = num_workers.max(1);

        for index in 0..num_workers {
            let handle = handle.clone();
            let rx = request_rx.clone();
            let cache = Arc::clone(&cache);
            let alive = Arc::clone(&alive);
            let events = events.clone();
            let queued = Arc::clone(&queued);

            let spawned = thread::Builder::new()
                .name(format!("folio-preload-{index}"))
                .spawn(move || preload_worker(&handle, &rx, &cache, &alive, &queued, &events));
            if let Err(e) = spawned {
                warn!("Failed to spawn preload worker {index}: {e}");
            }
        }

        Self {
            request_tx,
            cache,
            queued,
            num_workers,
        }
    }

    /// Queue a render of `page` after `delay`.
    ///
    /// No-op when the page is already cached, rendering or queued.
    pub fn schedule(&self, page: usize, params: RenderParams, delay: Duration) -> bool {
        if self.cache.contains_or_in_flight(page, &params) {
            return false;
        }
        if !self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page)
        {
            return false;
        }

        debug!("Scheduling preload of page {page} in {delay:?}");
        let request = RenderRequest::Preload {
            page,
            params,
            generation: self.cache.generation(),
            not_before: Instant::now() + delay,
        };
        if self.request_tx.send(request).is_err() {
            self.queued
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&page);
            return false;
        }
        true
    }

    /// Queue the neighbours of `page` within 1..=total; returns the pages queued
    pub fn schedule_neighbors(
        &self,
        page: usize,
        total: usize,
        params: RenderParams,
        next_delay: Duration,
        prev_delay: Duration,
    ) -> Vec<usize> {
        let mut scheduled = Vec::new();
        if page < total && self.schedule(page + 1, params, next_delay) {
            scheduled.push(page + 1);
        }
        if page > 1 && self.schedule(page - 1, params, prev_delay) {
            scheduled.push(page - 1);
        }
        scheduled
    }

    /// Forget queued pages after an invalidation; workers drop stale jobs
    pub fn clear_queued(&self) {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn shutdown(&self) {
        for _ in 0..self.num_workers {
            let _ = self.request_tx.send(RenderRequest::Shutdown);
        }
    }
}

impl Drop for PreloadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn preload_worker(
    handle: &DocumentHandle,
    requests: &Receiver<RenderRequest>,
    cache: &PageCache,
    alive: &AtomicBool,
    queued: &Mutex<HashSet<usize>>,
    events: &Sender<WorkerEvent>,
) {
    let rasterizer = match handle.open_rasterizer() {
        Ok(r) => r,
        Err(e) => {
            let _ = events.send(WorkerEvent::WorkerFailed(e.to_string()));
            return;
        }
    };

    for request in requests.iter() {
        match request {
            RenderRequest::Preload {
                page,
                params,
                generation,
                not_before,
            } => {
                if !wait_until(not_before, &[alive]) {
                    break;
                }
                // The queued set was cleared with the invalidation and may
                // already hold a fresh request for this page
                if generation != cache.generation() {
                    debug!("Dropping preload of page {page} from generation {generation}");
                    continue;
                }
                queued
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&page);

                if cache.contains_or_in_flight(page, &params) {
                    continue;
                }
                match cache.get_or_render_current(page, &params, || {
                    render_page(rasterizer.as_ref(), page, &params)
                }) {
                    Some(outcome) => {
                        let _ = events.send(WorkerEvent::Preloaded {
                            page,
                            result: outcome.map(|_| ()),
                        });
                    }
                    None => debug!("Dropping stale preload of page {page}"),
                }
            }

            RenderRequest::Shutdown => break,
        }
    }
}

/// Render one page for continuous mode, through the shared cache, into the map.
///
/// Returns `Ok(false)` without touching the map when `params` are no longer
/// current or `run` was cancelled while rendering.
pub fn render_into_map(
    rasterizer: &dyn Rasterizer,
    cache: &PageCache,
    map: &ContinuousPageMap,
    page: usize,
    params: &RenderParams,
    run: Option<&ContinuousRun>,
) -> Result<bool, RenderError> {
    let Some(outcome) =
        cache.get_or_render_current(page, params, || render_page(rasterizer, page, params))
    else {
        debug!("Dropping stale continuous render of page {page}");
        return Ok(false);
    };
    let rendered = outcome?;
    Ok(map.insert_if(rendered, || run.is_none_or(ContinuousRun::is_active)))
}

/// Cancellation handle for one continuous-mode load
#[derive(Clone, Debug)]
pub struct ContinuousRun {
    id: u64,
    active: Arc<AtomicBool>,
}

impl ContinuousRun {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Background half of a continuous-mode load
pub struct ContinuousJob {
    pub handle: DocumentHandle,
    pub cache: Arc<PageCache>,
    pub map: Arc<ContinuousPageMap>,
    pub alive: Arc<AtomicBool>,
    pub run: ContinuousRun,
    pub params: RenderParams,
    /// Ascending page numbers still to render
    pub pages: Vec<usize>,
    pub start_delay: Duration,
    pub pause: Duration,
    pub events: Sender<WorkerEvent>,
}

pub fn spawn_continuous(job: ContinuousJob) {
    let run_id = job.run.id();
    let spawned = thread::Builder::new()
        .name(format!("folio-continuous-{run_id}"))
        .spawn(move || continuous_worker(job));
    if let Err(e) = spawned {
        warn!("Failed to spawn continuous loader {run_id}: {e}");
    }
}

fn continuous_worker(job: ContinuousJob) {
    let flags = [job.alive.as_ref(), job.run.active.as_ref()];
    if !wait_until(Instant::now() + job.start_delay, &flags) {
        return;
    }

    let rasterizer = match job.handle.open_rasterizer() {
        Ok(r) => r,
        Err(e) => {
            let _ = job.events.send(WorkerEvent::WorkerFailed(e.to_string()));
            return;
        }
    };

    for page in &job.pages {
        if !flags.iter().all(|f| f.load(Ordering::Acquire)) {
            debug!("Continuous load {} stopped before page {page}", job.run.id());
            return;
        }
        let result = match render_into_map(
            rasterizer.as_ref(),
            &job.cache,
            &job.map,
            *page,
            &job.params,
            Some(&job.run),
        ) {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!("Continuous load {} superseded at page {page}", job.run.id());
                return;
            }
            Err(e) => Err(e),
        };
        let _ = job.events.send(WorkerEvent::ContinuousPage {
            run: job.run.id(),
            page: *page,
            result,
        });
        if !wait_until(Instant::now() + job.pause, &flags) {
            return;
        }
    }

    let _ = job.events.send(WorkerEvent::ContinuousDone { run: job.run.id() });
}
