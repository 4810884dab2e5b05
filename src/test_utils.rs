pub mod test_helpers {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    use anyhow::{Result, bail};

    use crate::event_source::{Event, KeyCode, KeyEvent, KeyModifiers, SimulatedEventSource};
    use crate::pdf::{
        Boundary, DocumentEngine, DocumentHandle, DocumentInfo, EngineError, LoadError, Raster,
        Rasterizer, RenderError, RenderParams, RenderedPage, ViewerHost, viewport_size,
    };
    use crate::store::KeyValueStorage;

    /// Intrinsic page size used by the fake engine (US Letter, points)
    pub const FAKE_PAGE_SIZE: (f32, f32) = (612.0, 792.0);

    /// Shared record of rasterize calls, by page
    #[derive(Clone, Debug, Default)]
    pub struct RenderCounter {
        calls: Arc<Mutex<Vec<usize>>>,
    }

    impl RenderCounter {
        fn record(&self, page: usize) {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(page);
        }

        /// Total rasterize calls
        pub fn count(&self) -> usize {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }

        pub fn calls_for(&self, page: usize) -> usize {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|p| **p == page)
                .count()
        }

        /// Pages in call order
        pub fn pages(&self) -> Vec<usize> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    /// Deterministic engine: accepts bytes starting with `%PDF-`
    #[derive(Clone, Debug)]
    pub struct FakeEngine {
        pub pages: usize,
        pub counter: RenderCounter,
        /// Pages whose rasterization fails
        pub failing_pages: HashSet<usize>,
        /// Simulated parse cost
        pub parse_delay: Duration,
        /// Simulated per-page render cost
        pub render_delay: Duration,
    }

    impl FakeEngine {
        pub fn new(pages: usize) -> Self {
            Self {
                pages,
                counter: RenderCounter::default(),
                failing_pages: HashSet::new(),
                parse_delay: Duration::ZERO,
                render_delay: Duration::ZERO,
            }
        }

        pub fn failing_on(mut self, page: usize) -> Self {
            self.failing_pages.insert(page);
            self
        }

        pub fn with_parse_delay(mut self, delay: Duration) -> Self {
            self.parse_delay = delay;
            self
        }

        pub fn with_render_delay(mut self, delay: Duration) -> Self {
            self.render_delay = delay;
            self
        }
    }

    impl DocumentEngine for FakeEngine {
        fn parse(&self, bytes: &[u8]) -> Result<DocumentInfo, EngineError> {
            std::thread::sleep(self.parse_delay);
            if !bytes.starts_with(b"%PDF-") {
                return Err(EngineError::generic("missing %PDF header"));
            }
            Ok(DocumentInfo {
                page_count: self.pages,
                page_sizes: vec![FAKE_PAGE_SIZE; self.pages],
            })
        }

        fn open(&self, _bytes: Arc<[u8]>) -> Result<Box<dyn Rasterizer>, EngineError> {
            Ok(Box::new(FakeRasterizer {
                engine: self.clone(),
            }))
        }
    }

    /// Rasterizer filling each page with a page-dependent grey
    pub struct FakeRasterizer {
        engine: FakeEngine,
    }

    impl Rasterizer for FakeRasterizer {
        fn page_count(&self) -> usize {
            self.engine.pages
        }

        fn rasterize(&self, page: usize, params: &RenderParams) -> Result<Raster, EngineError> {
            self.engine.counter.record(page);
            std::thread::sleep(self.engine.render_delay);
            if self.engine.failing_pages.contains(&page) {
                return Err(EngineError::generic(format!("cannot draw page {page}")));
            }
            // Keep test bitmaps small
            let small = RenderParams::new(params.scale / 20.0, params.rotation);
            let (width, height) = viewport_size(FAKE_PAGE_SIZE, &small);
            let shade = (page * 23 % 256) as u8;
            Ok(Raster {
                width,
                height,
                rgb: vec![shade; (width * height * 3) as usize],
            })
        }
    }

    /// A loaded handle over the fake engine
    pub fn fake_handle(pages: usize) -> (DocumentHandle, RenderCounter) {
        let engine = FakeEngine::new(pages);
        let counter = engine.counter.clone();
        let info = DocumentInfo {
            page_count: pages,
            page_sizes: vec![FAKE_PAGE_SIZE; pages],
        };
        let handle = DocumentHandle::new(
            "memory://fake.pdf",
            Arc::from(minimal_pdf(pages)),
            info,
            Arc::new(engine),
        );
        (handle, counter)
    }

    /// A small, well-formed PDF with `pages` blank US Letter pages
    pub fn minimal_pdf(pages: usize) -> Vec<u8> {
        let pages = pages.max(1);
        let mut objects = Vec::new();
        objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
        let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", i + 3)).collect();
        objects.push(format!(
            "<< /Type /Pages /Kids [{}] /Count {pages} >>",
            kids.join(" ")
        ));
        for _ in 0..pages {
            objects.push("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>".to_string());
        }

        let mut out = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::with_capacity(objects.len());
        for (index, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", index + 1).as_bytes());
        }
        let xref_at = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");
        for offset in offsets {
            out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
                objects.len() + 1
            )
            .as_bytes(),
        );
        out
    }

    /// Host callback, as recorded by [`RecordingHost`]
    #[derive(Clone, Debug, PartialEq)]
    pub enum HostEvent {
        PageChange(usize),
        TotalPages(usize),
        Bookmark(usize),
        AnnotationAdd(usize, String),
        AnnotationUpdate(String, String),
        AnnotationDelete(String),
        Boundary(Boundary),
        LoadFailed(LoadError),
        PageRendered(usize),
        PageError(usize, RenderError),
        ContinuousPage(usize),
        Reveal(usize),
    }

    /// Host that records every callback; progress is kept separately
    #[derive(Debug, Default)]
    pub struct RecordingHost {
        pub events: Vec<HostEvent>,
        pub progress: Vec<f32>,
    }

    impl RecordingHost {
        pub fn page_changes(&self) -> Vec<usize> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    HostEvent::PageChange(p) => Some(*p),
                    _ => None,
                })
                .collect()
        }

        pub fn rendered_pages(&self) -> Vec<usize> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    HostEvent::PageRendered(p) => Some(*p),
                    _ => None,
                })
                .collect()
        }

        pub fn boundaries(&self) -> Vec<Boundary> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    HostEvent::Boundary(b) => Some(*b),
                    _ => None,
                })
                .collect()
        }

        pub fn continuous_pages(&self) -> Vec<usize> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    HostEvent::ContinuousPage(p) => Some(*p),
                    _ => None,
                })
                .collect()
        }
    }

    impl ViewerHost for RecordingHost {
        fn on_page_change(&mut self, page: usize) {
            self.events.push(HostEvent::PageChange(page));
        }

        fn on_total_pages_change(&mut self, total: usize) {
            self.events.push(HostEvent::TotalPages(total));
        }

        fn on_bookmark(&mut self, page: usize) {
            self.events.push(HostEvent::Bookmark(page));
        }

        fn on_annotation_add(&mut self, page: usize, text: &str) {
            self.events
                .push(HostEvent::AnnotationAdd(page, text.to_string()));
        }

        fn on_annotation_update(&mut self, id: &str, text: &str) {
            self.events
                .push(HostEvent::AnnotationUpdate(id.to_string(), text.to_string()));
        }

        fn on_annotation_delete(&mut self, id: &str) {
            self.events.push(HostEvent::AnnotationDelete(id.to_string()));
        }

        fn on_boundary(&mut self, boundary: Boundary) {
            self.events.push(HostEvent::Boundary(boundary));
        }

        fn on_load_progress(&mut self, fraction: f32) {
            self.progress.push(fraction);
        }

        fn on_load_failed(&mut self, error: &LoadError) {
            self.events.push(HostEvent::LoadFailed(error.clone()));
        }

        fn on_page_rendered(&mut self, page: &RenderedPage) {
            self.events.push(HostEvent::PageRendered(page.page));
        }

        fn on_page_error(&mut self, page: usize, error: &RenderError) {
            self.events.push(HostEvent::PageError(page, error.clone()));
        }

        fn on_continuous_page(&mut self, page: &RenderedPage) {
            self.events.push(HostEvent::ContinuousPage(page.page));
        }

        fn on_reveal_page(&mut self, page: usize) {
            self.events.push(HostEvent::Reveal(page));
        }
    }

    /// Storage whose every operation fails, like a full or blocked disk
    pub struct UnavailableStorage;

    impl KeyValueStorage for UnavailableStorage {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            bail!("storage unavailable")
        }

        fn set(&mut self, _key: &str, _value: &str) -> Result<()> {
            bail!("quota exceeded")
        }
    }

    /// Builder for creating test scenarios with simulated user input
    #[derive(Default)]
    pub struct TestScenarioBuilder {
        events: Vec<Event>,
    }

    impl TestScenarioBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a character key press
        pub fn press_char(mut self, c: char) -> Self {
            self.events.push(SimulatedEventSource::char_key(c));
            self
        }

        pub fn press_key(mut self, code: KeyCode) -> Self {
            self.events.push(Event::Key(KeyEvent::new(code, KeyModifiers::empty())));
            self
        }

        /// Press arrow-right n times
        pub fn next_pages(mut self, times: usize) -> Self {
            for _ in 0..times {
                self = self.press_key(KeyCode::Right);
            }
            self
        }

        /// Press arrow-left n times
        pub fn prev_pages(mut self, times: usize) -> Self {
            for _ in 0..times {
                self = self.press_key(KeyCode::Left);
            }
            self
        }

        /// Type each character of `text`, then Enter
        pub fn type_line(mut self, text: &str) -> Self {
            for c in text.chars() {
                self = self.press_char(c);
            }
            self.press_key(KeyCode::Enter)
        }

        pub fn click(mut self, column: u16, row: u16) -> Self {
            self.events.extend(SimulatedEventSource::click(column, row));
            self
        }

        pub fn drag(mut self, from: (u16, u16), to: (u16, u16)) -> Self {
            self.events.extend(SimulatedEventSource::drag(from, to));
            self
        }

        pub fn press_escape(self) -> Self {
            self.press_key(KeyCode::Esc)
        }

        /// Quit the viewer (press 'q')
        pub fn quit(self) -> Self {
            self.press_char('q')
        }

        /// Build the simulated event source
        pub fn build(self) -> SimulatedEventSource {
            SimulatedEventSource::new(self.events)
        }
    }
}
