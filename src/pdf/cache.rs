//! Rendered page caches
//!
//! [`PageCache`] is the paged-mode cache: an LRU of page number to bitmap,
//! scoped to one [`RenderParams`] at a time, with a single-flight guard so
//! that concurrent requests for the same page share one render.
//!
//! [`ContinuousPageMap`] backs continuous mode. It only grows; a params
//! change marks entries stale and re-renders replace them in place.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use log::debug;
use lru::LruCache;

use super::request::{RenderError, RenderOutcome, RenderParams, RenderedPage};

/// A render in progress; waiters block until `outcome` is filled
#[derive(Default)]
struct Flight {
    outcome: Mutex<Option<RenderOutcome>>,
    done: Condvar,
}

impl Flight {
    fn complete(&self, outcome: RenderOutcome) {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self) -> RenderOutcome {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self
                .done
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Releases the in-flight slot and completes the flight, even if the
/// render closure unwinds
struct FlightGuard<'a> {
    cache: &'a PageCache,
    flight: Arc<Flight>,
    page: usize,
    generation: u64,
    outcome: Option<RenderOutcome>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| Err(RenderError::render(self.page, "render aborted")));
        self.cache
            .finish(self.page, &self.flight, self.generation, &outcome);
        self.flight.complete(outcome);
    }
}

struct CacheInner {
    entries: LruCache<usize, Arc<RenderedPage>>,
    in_flight: HashMap<usize, Arc<Flight>>,
    params: RenderParams,
    generation: u64,
}

impl CacheInner {
    fn reset(&mut self, params: RenderParams) {
        debug!(
            "Page cache reset: {} entries dropped, params {:?} -> {:?}",
            self.entries.len(),
            self.params,
            params
        );
        self.entries.clear();
        self.in_flight.clear();
        self.params = params;
        self.generation += 1;
    }
}

enum Claim {
    Hit(Arc<RenderedPage>),
    Wait(Arc<Flight>),
    Render(Arc<Flight>, u64),
    Stale,
}

/// Paged-mode render cache with single-flight rendering
pub struct PageCache {
    inner: Mutex<CacheInner>,
}

impl PageCache {
    /// Create a new cache with the given capacity
    #[must_use]
    pub fn new(capacity: usize, params: RenderParams) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
                in_flight: HashMap::new(),
                params,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached page, or render it exactly once.
    ///
    /// Requests under params that differ from the current scope reset the
    /// whole cache first. Concurrent callers for the same page block on
    /// the first caller's render and receive its outcome.
    pub fn get_or_render<F>(&self, page: usize, params: &RenderParams, render: F) -> RenderOutcome
    where
        F: FnOnce() -> Result<RenderedPage, RenderError>,
    {
        match self.claim(page, params, true) {
            Claim::Hit(hit) => Ok(hit),
            Claim::Wait(flight) => flight.wait(),
            Claim::Render(flight, generation) => self.run(page, flight, generation, render),
            Claim::Stale => render().map(Arc::new),
        }
    }

    /// Like [`get_or_render`](Self::get_or_render), but never changes the
    /// cache scope: returns `None` when `params` are no longer current.
    pub fn get_or_render_current<F>(
        &self,
        page: usize,
        params: &RenderParams,
        render: F,
    ) -> Option<RenderOutcome>
    where
        F: FnOnce() -> Result<RenderedPage, RenderError>,
    {
        match self.claim(page, params, false) {
            Claim::Hit(hit) => Some(Ok(hit)),
            Claim::Wait(flight) => Some(flight.wait()),
            Claim::Render(flight, generation) => Some(self.run(page, flight, generation, render)),
            Claim::Stale => None,
        }
    }

    fn claim(&self, page: usize, params: &RenderParams, adopt: bool) -> Claim {
        let mut inner = self.lock();
        if inner.params != *params {
            if !adopt {
                return Claim::Stale;
            }
            inner.reset(*params);
        }
        if let Some(hit) = inner.entries.get(&page) {
            return Claim::Hit(Arc::clone(hit));
        }
        if let Some(flight) = inner.in_flight.get(&page) {
            return Claim::Wait(Arc::clone(flight));
        }
        let flight = Arc::new(Flight::default());
        inner.in_flight.insert(page, Arc::clone(&flight));
        Claim::Render(flight, inner.generation)
    }

    fn run<F>(&self, page: usize, flight: Arc<Flight>, generation: u64, render: F) -> RenderOutcome
    where
        F: FnOnce() -> Result<RenderedPage, RenderError>,
    {
        let mut guard = FlightGuard {
            cache: self,
            flight,
            page,
            generation,
            outcome: None,
        };
        let outcome = render().map(Arc::new);
        guard.outcome = Some(outcome.clone());
        outcome
    }

    fn finish(&self, page: usize, flight: &Arc<Flight>, generation: u64, outcome: &RenderOutcome) {
        let mut inner = self.lock();
        let ours = inner
            .in_flight
            .get(&page)
            .is_some_and(|current| Arc::ptr_eq(current, flight));
        if ours {
            inner.in_flight.remove(&page);
        }
        // Results from before a reset are returned but never stored
        if inner.generation == generation {
            if let Ok(rendered) = outcome {
                inner.entries.put(page, Arc::clone(rendered));
            }
        }
    }

    /// Cached page under the current params, without rendering
    #[must_use]
    pub fn get(&self, page: usize) -> Option<Arc<RenderedPage>> {
        self.lock().entries.get(&page).cloned()
    }

    /// Whether `page` is cached or rendering under `params`
    #[must_use]
    pub fn contains_or_in_flight(&self, page: usize, params: &RenderParams) -> bool {
        let inner = self.lock();
        inner.params == *params
            && (inner.entries.contains(&page) || inner.in_flight.contains_key(&page))
    }

    /// Drop every entry and move to `params`
    pub fn invalidate_all(&self, params: RenderParams) {
        self.lock().reset(params);
    }

    #[must_use]
    pub fn params(&self) -> RenderParams {
        self.lock().params
    }

    /// Incremented on every invalidation
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Number of cached pages
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Check if cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Cache capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().entries.cap().get()
    }
}

/// Continuous-mode page store; never shrinks during a session
#[derive(Default)]
pub struct ContinuousPageMap {
    pages: Mutex<BTreeMap<usize, Arc<RenderedPage>>>,
}

impl ContinuousPageMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<usize, Arc<RenderedPage>>> {
        self.pages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the bitmap for a page
    pub fn insert(&self, page: Arc<RenderedPage>) {
        self.lock().insert(page.page, page);
    }

    /// Insert only if `keep` still holds once the map is locked
    pub fn insert_if(&self, page: Arc<RenderedPage>, keep: impl FnOnce() -> bool) -> bool {
        let mut pages = self.lock();
        if !keep() {
            return false;
        }
        pages.insert(page.page, page);
        true
    }

    #[must_use]
    pub fn get(&self, page: usize) -> Option<Arc<RenderedPage>> {
        self.lock().get(&page).cloned()
    }

    /// Whether `page` holds a bitmap produced under `params`
    #[must_use]
    pub fn is_fresh(&self, page: usize, params: &RenderParams) -> bool {
        self.lock().get(&page).is_some_and(|p| p.params == *params)
    }

    /// Loaded page numbers, ascending and duplicate-free
    #[must_use]
    pub fn loaded_pages(&self) -> Vec<usize> {
        self.lock().keys().copied().collect()
    }

    /// Pages whose bitmap predates `params`
    #[must_use]
    pub fn stale_pages(&self, params: &RenderParams) -> Vec<usize> {
        self.lock()
            .values()
            .filter(|p| p.params != *params)
            .map(|p| p.page)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::pdf::request::Rotation;

    fn test_params() -> RenderParams {
        RenderParams::new(1.5, Rotation::Deg0)
    }

    fn rendered(page: usize, params: RenderParams) -> RenderedPage {
        RenderedPage {
            page,
            bitmap: vec![page as u8; 8],
            width: 10,
            height: 20,
            params,
        }
    }

    #[test]
    fn cache_second_request_is_a_hit() {
        let cache = PageCache::new(8, test_params());
        let renders = AtomicUsize::new(0);
        let render = || {
            renders.fetch_add(1, Ordering::SeqCst);
            Ok(rendered(3, test_params()))
        };

        let first = cache.get_or_render(3, &test_params(), render).unwrap();
        let second = cache
            .get_or_render(3, &test_params(), || unreachable!("must be cached"))
            .unwrap();

        assert_eq!(renders.load(Ordering::SeqCst), 1);
        assert_eq!(first.bitmap, second.bitmap);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn cache_params_change_clears_everything() {
        let cache = PageCache::new(8, test_params());
        for page in 1..=3 {
            cache
                .get_or_render(page, &test_params(), || Ok(rendered(page, test_params())))
                .unwrap();
        }
        assert_eq!(cache.len(), 3);

        let rotated = RenderParams::new(1.5, Rotation::Deg90);
        let renders = AtomicUsize::new(0);
        cache
            .get_or_render(2, &rotated, || {
                renders.fetch_add(1, Ordering::SeqCst);
                Ok(rendered(2, rotated))
            })
            .unwrap();

        assert_eq!(renders.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(1).is_none());
        assert_eq!(cache.params(), rotated);
    }

    #[test]
    fn cache_errors_are_not_stored() {
        let cache = PageCache::new(8, test_params());
        let err = cache
            .get_or_render(1, &test_params(), || Err(RenderError::render(1, "boom")))
            .unwrap_err();
        assert_eq!(err, RenderError::render(1, "boom"));
        assert!(!cache.contains_or_in_flight(1, &test_params()));

        // A retry renders again
        assert!(
            cache
                .get_or_render(1, &test_params(), || Ok(rendered(1, test_params())))
                .is_ok()
        );
    }

    #[test]
    fn cache_lru_eviction() {
        let cache = PageCache::new(2, test_params());
        for page in 1..=3 {
            cache
                .get_or_render(page, &test_params(), || Ok(rendered(page, test_params())))
                .unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(1).is_none());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn concurrent_requests_share_one_render() {
        let cache = Arc::new(PageCache::new(8, test_params()));
        let renders = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let renders = Arc::clone(&renders);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_render(5, &test_params(), || {
                            renders.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Ok(rendered(5, test_params()))
                        })
                        .unwrap()
                })
            })
            .collect();

        let pages: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(renders.load(Ordering::SeqCst), 1);
        assert!(pages.windows(2).all(|w| w[0].bitmap == w[1].bitmap));
    }

    #[test]
    fn stale_claims_do_not_reset_scope() {
        let cache = PageCache::new(8, test_params());
        let old = RenderParams::new(1.0, Rotation::Deg0);
        let outcome = cache.get_or_render_current(1, &old, || unreachable!());
        assert!(outcome.is_none());
        assert_eq!(cache.params(), test_params());
    }

    #[test]
    fn results_from_before_reset_are_not_stored() {
        let cache = Arc::new(PageCache::new(8, test_params()));
        let zoomed = RenderParams::new(3.0, Rotation::Deg0);

        let inner = Arc::clone(&cache);
        let outcome = cache.get_or_render(1, &test_params(), move || {
            inner.invalidate_all(zoomed);
            Ok(rendered(1, test_params()))
        });

        assert!(outcome.is_ok());
        assert!(cache.is_empty());
        assert_eq!(cache.generation(), 1);
    }

    #[test]
    fn panicking_render_frees_the_page_for_retry() {
        let cache = PageCache::new(8, test_params());
        let crashed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cache.get_or_render(1, &test_params(), || panic!("rasterizer crashed"))
        }));
        assert!(crashed.is_err());
        assert!(!cache.contains_or_in_flight(1, &test_params()));

        let renders = AtomicUsize::new(0);
        let retried = cache.get_or_render(1, &test_params(), || {
            renders.fetch_add(1, Ordering::SeqCst);
            Ok(rendered(1, test_params()))
        });
        assert!(retried.is_ok());
        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn continuous_map_replaces_in_place() {
        let map = ContinuousPageMap::new();
        for page in [3, 1, 2] {
            map.insert(Arc::new(rendered(page, test_params())));
        }
        assert_eq!(map.loaded_pages(), vec![1, 2, 3]);

        let zoomed = RenderParams::new(2.0, Rotation::Deg0);
        assert_eq!(map.stale_pages(&zoomed), vec![1, 2, 3]);

        map.insert(Arc::new(rendered(2, zoomed)));
        assert_eq!(map.len(), 3);
        assert!(map.is_fresh(2, &zoomed));
        assert!(!map.is_fresh(1, &zoomed));
        assert_eq!(map.stale_pages(&zoomed), vec![1, 3]);
    }
}
