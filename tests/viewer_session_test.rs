use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use folio::pdf::{
    Boundary, Command, DocumentEngine, LoadError, Remediation, RenderError, Rotation,
    SessionOptions, Status, ViewerSession,
};
use folio::store::{KeyValueStorage, MemoryStorage, ReaderStore, ReadingMode, progress_key};
use folio::test_utils::test_helpers::{FakeEngine, HostEvent, RecordingHost, minimal_pdf};
use folio::ViewerConfig;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    locator: String,
}

fn document(pages: usize) -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.pdf");
    fs::write(&path, minimal_pdf(pages)).unwrap();
    Fixture {
        locator: path.to_string_lossy().into_owned(),
        _dir: dir,
    }
}

fn quiet_config() -> ViewerConfig {
    ViewerConfig {
        preload: false,
        continuous_start_delay_ms: 0,
        continuous_yield_ms: 0,
        ..ViewerConfig::default()
    }
}

fn open(
    fixture: &Fixture,
    engine: &FakeEngine,
    config: ViewerConfig,
    initial_page: Option<usize>,
) -> ViewerSession<RecordingHost> {
    let engine: Arc<dyn DocumentEngine> = Arc::new(engine.clone());
    ViewerSession::open(
        SessionOptions {
            document_id: "doc-1".to_string(),
            locator: fixture.locator.clone(),
            initial_page,
        },
        config,
        engine,
        ReaderStore::open(Box::new(MemoryStorage::new())),
        RecordingHost::default(),
    )
}

/// Poll until `done` holds or the deadline passes
fn wait_for(session: &mut ViewerSession<RecordingHost>, done: impl Fn(&ViewerSession<RecordingHost>) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(session) && Instant::now() < deadline {
        session.poll_timeout(Duration::from_millis(20));
    }
}

#[test]
fn ten_page_walkthrough_ends_at_boundary() {
    let fixture = document(10);
    let engine = FakeEngine::new(10);
    let mut session = open(&fixture, &engine, quiet_config(), Some(1));

    assert_eq!(session.host().events.first(), Some(&HostEvent::TotalPages(10)));
    assert_eq!(session.state().status, Status::Ready);

    session.apply(Command::GoToPage(1));
    let first = session.current_page().expect("page 1 rendered");
    assert_eq!(first.page, 1);

    session.host_mut().events.clear();
    for _ in 0..9 {
        session.apply(Command::Next);
    }
    assert_eq!(session.state().current_page, 10);
    assert_eq!(session.host().page_changes(), (2..=10).collect::<Vec<_>>());

    session.host_mut().events.clear();
    session.apply(Command::Next);

    assert_eq!(session.host().boundaries(), vec![Boundary::End]);
    assert!(session.host().rendered_pages().is_empty());
    assert_eq!(engine.counter.calls_for(11), 0);
    assert_eq!(session.state().current_page, 10);
}

#[test]
fn revisiting_a_page_hits_the_cache() {
    let fixture = document(4);
    let engine = FakeEngine::new(4);
    let mut session = open(&fixture, &engine, quiet_config(), Some(1));

    session.apply(Command::Next);
    session.apply(Command::Prev);
    session.apply(Command::Next);

    assert_eq!(engine.counter.calls_for(1), 1);
    assert_eq!(engine.counter.calls_for(2), 1);
}

#[test]
fn zoom_and_rotation_rerender_under_new_params() {
    let fixture = document(3);
    let engine = FakeEngine::new(3);
    let mut session = open(&fixture, &engine, quiet_config(), Some(2));
    let before = session.current_page().unwrap();

    session.apply(Command::ZoomIn);
    let zoomed = session.current_page().unwrap();
    assert!(zoomed.width > before.width);
    assert_eq!(session.state().zoom.percent(), 110);
    assert_eq!(session.store().get_settings().zoom_level.percent(), 110);

    session.apply(Command::Rotate);
    let rotated = session.current_page().unwrap();
    assert_eq!(rotated.params.rotation, Rotation::Deg90);
    assert_eq!(rotated.width, zoomed.height);
    assert_eq!(rotated.height, zoomed.width);
    assert_eq!(engine.counter.calls_for(2), 3);
    assert_eq!(session.cache().len(), 1);
}

#[test]
fn saved_progress_seeds_the_initial_page() {
    let fixture = document(8);
    let engine = FakeEngine::new(8);
    let mut storage = MemoryStorage::new();
    storage.set(&progress_key("doc-1"), "6").unwrap();

    let engine_arc: Arc<dyn DocumentEngine> = Arc::new(engine.clone());
    let session = ViewerSession::open(
        SessionOptions {
            document_id: "doc-1".to_string(),
            locator: fixture.locator.clone(),
            initial_page: None,
        },
        quiet_config(),
        engine_arc,
        ReaderStore::open(Box::new(storage)),
        RecordingHost::default(),
    );

    assert_eq!(session.state().current_page, 6);
    assert_eq!(session.host().rendered_pages(), vec![6]);
}

#[test]
fn navigation_saves_progress() {
    let fixture = document(5);
    let engine = FakeEngine::new(5);
    let mut session = open(&fixture, &engine, quiet_config(), Some(1));

    session.apply(Command::End);
    assert_eq!(session.store().get_reading_progress("doc-1"), 5);
}

#[test]
fn bookmarks_and_annotations_flow_to_host_and_store() {
    let fixture = document(5);
    let engine = FakeEngine::new(5);
    let mut session = open(&fixture, &engine, quiet_config(), Some(3));

    session.apply(Command::ToggleBookmark);
    assert!(session.state().is_current_bookmarked());
    assert!(session.store().is_bookmarked("doc-1", 3));

    session.apply(Command::UpsertAnnotation {
        page: 3,
        text: "note".to_string(),
    });
    let notes = session.store().get_annotations("doc-1", Some(3));
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].text, "note");
    assert!(notes[0].updated_at.is_none());

    let id = notes[0].id.clone();
    session.apply(Command::EditAnnotation(id.clone()));
    session.apply(Command::UpsertAnnotation {
        page: 3,
        text: "revised".to_string(),
    });
    session.apply(Command::DeleteAnnotation(id.clone()));

    assert!(session.store().get_annotations("doc-1", None).is_empty());
    let events = &session.host().events;
    assert!(events.contains(&HostEvent::Bookmark(3)));
    assert!(events.contains(&HostEvent::AnnotationAdd(3, "note".to_string())));
    assert!(events.contains(&HostEvent::AnnotationUpdate(id.clone(), "revised".to_string())));
    assert!(events.contains(&HostEvent::AnnotationDelete(id)));
}

#[test]
fn blank_annotation_is_ignored() {
    let fixture = document(2);
    let engine = FakeEngine::new(2);
    let mut session = open(&fixture, &engine, quiet_config(), Some(1));

    session.apply(Command::ToggleAnnotationPanel);
    session.apply(Command::UpsertAnnotation {
        page: 1,
        text: "   ".to_string(),
    });

    assert!(session.store().get_annotations("doc-1", None).is_empty());
    assert!(session.state().overlays.annotations);
}

#[test]
fn failed_page_is_local_and_retryable() {
    let fixture = document(3);
    let engine = FakeEngine::new(3).failing_on(2);
    let mut session = open(&fixture, &engine, quiet_config(), Some(1));

    session.apply(Command::Next);
    assert_eq!(session.state().status, Status::Ready);
    assert!(matches!(session.state().page_error, Some(RenderError::Render { page: 2, .. })));

    session.apply(Command::GoToPage(2));
    assert_eq!(engine.counter.calls_for(2), 2);

    session.apply(Command::Next);
    assert!(session.state().page_error.is_none());
    assert_eq!(session.current_page().unwrap().page, 3);
}

#[test]
fn missing_document_offers_remediation_and_retry() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("later.pdf");
    let fixture = Fixture {
        locator: format!("file://{}", path.display()),
        _dir: dir,
    };
    let engine = FakeEngine::new(2);
    let mut session = open(&fixture, &engine, quiet_config(), None);

    assert!(matches!(session.state().status, Status::Failed(LoadError::NotFound { .. })));
    let remediation = session.state().remediation();
    assert_eq!(remediation[0], Remediation::Retry);
    assert!(matches!(&remediation[1], Remediation::Download(url) if url.ends_with("later.pdf")));
    assert!(matches!(&remediation[2], Remediation::OpenExternal(_)));

    fs::write(&path, minimal_pdf(2)).unwrap();
    session.apply(Command::RetryLoad);

    assert_eq!(session.state().status, Status::Ready);
    assert_eq!(session.state().total_pages, 2);
    assert_eq!(session.host().rendered_pages(), vec![1]);
}

#[test]
fn preload_fills_neighbours_in_background() {
    let fixture = document(5);
    let engine = FakeEngine::new(5);
    let config = ViewerConfig {
        preload: true,
        preload_next_delay_ms: 0,
        preload_prev_delay_ms: 0,
        ..ViewerConfig::default()
    };
    let mut session = open(&fixture, &engine, config, Some(3));

    let deadline = Instant::now() + Duration::from_secs(5);
    while session.cache().len() < 3 && Instant::now() < deadline {
        session.poll_timeout(Duration::from_millis(20));
    }
    assert_eq!(session.cache().len(), 3);

    session.apply(Command::Next);
    // Page 4 was preloaded, so the foreground render is a cache hit
    assert_eq!(engine.counter.calls_for(4), 1);
    assert_eq!(session.host().rendered_pages(), vec![3, 4]);
}

#[test]
fn continuous_mode_loads_every_page_in_order() {
    let fixture = document(12);
    let engine = FakeEngine::new(12);
    let config = ViewerConfig {
        continuous_start_delay_ms: 300,
        ..quiet_config()
    };
    let mut session = open(&fixture, &engine, config, Some(1));

    session.apply(Command::ToggleReadingMode);
    assert_eq!(session.state().mode, ReadingMode::Continuous);

    let eager = session.loaded_pages();
    assert_eq!(eager, vec![1, 2, 3, 4, 5]);

    wait_for(&mut session, |s| s.loaded_pages().len() == 12);
    assert_eq!(session.loaded_pages(), (1..=12).collect::<Vec<_>>());

    let order = session.host().continuous_pages();
    assert_eq!(order, (1..=12).collect::<Vec<_>>());
    assert_eq!(session.store().get_settings().reading_mode, ReadingMode::Continuous);
}

#[test]
fn continuous_map_keeps_pages_across_zoom() {
    let fixture = document(6);
    let engine = FakeEngine::new(6);
    let mut session = open(&fixture, &engine, quiet_config(), Some(1));

    session.apply(Command::ToggleReadingMode);
    wait_for(&mut session, |s| s.loaded_pages().len() == 6);
    let small = session.continuous_page(6).unwrap().width;

    session.apply(Command::ZoomIn);
    assert_eq!(session.loaded_pages().len(), 6);
    wait_for(&mut session, |s| {
        s.continuous_page(6).is_some_and(|p| p.width > small)
    });
    assert!(session.continuous_page(6).unwrap().width > small);
}

#[test]
fn continuous_visibility_moves_current_page() {
    let fixture = document(6);
    let engine = FakeEngine::new(6);
    let mut session = open(&fixture, &engine, quiet_config(), Some(1));
    session.apply(Command::ToggleReadingMode);
    session.host_mut().events.clear();

    session.apply(Command::ContinuousPageVisible(4));

    assert_eq!(session.state().current_page, 4);
    assert_eq!(session.host().page_changes(), vec![4]);
    assert!(session.host().rendered_pages().is_empty());
}

#[test]
fn closed_session_ignores_commands_and_results() {
    let fixture = document(20);
    let engine = FakeEngine::new(20).with_render_delay(Duration::from_millis(5));
    let mut session = open(&fixture, &engine, quiet_config(), Some(1));
    session.apply(Command::ToggleReadingMode);

    session.close();
    assert!(!session.is_alive());
    let renders = engine.counter.count();

    session.apply(Command::Next);
    assert_eq!(session.state().current_page, 1);
    assert_eq!(session.poll_timeout(Duration::from_millis(200)), 0);

    std::thread::sleep(Duration::from_millis(100));
    let settled = engine.counter.count();
    assert!(settled <= renders + 1, "renders kept going after close");
}
