use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use folio::pdf::{DocumentEngine, DocumentLoader, LoadError};
use folio::test_utils::test_helpers::{FakeEngine, minimal_pdf};

/// Tiny HTTP/1.1 server answering every request from `respond(path)`
fn serve(respond: impl Fn(&str) -> (u16, Vec<u8>) + Send + Sync + 'static) -> String {
    serve_declaring(None, respond)
}

/// Like [`serve`], but announces `declared` as the content length when set
fn serve_declaring(
    declared: Option<u64>,
    respond: impl Fn(&str) -> (u16, Vec<u8>) + Send + Sync + 'static,
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let respond = Arc::new(respond);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let respond = Arc::clone(&respond);
            thread::spawn(move || handle(stream, declared, respond.as_ref()));
        }
    });

    format!("http://{addr}")
}

fn handle(mut stream: TcpStream, declared: Option<u64>, respond: &dyn Fn(&str) -> (u16, Vec<u8>)) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    loop {
        let mut header = String::new();
        match reader.read_line(&mut header) {
            Ok(0) | Err(_) => break,
            Ok(_) if header == "\r\n" => break,
            Ok(_) => {}
        }
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("GET");
    let path = parts.next().unwrap_or("/");
    let (status, body) = respond(path);
    let reason = if status == 200 { "OK" } else { "Not Found" };

    let head = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nContent-Type: application/pdf\r\nConnection: close\r\n\r\n",
        declared.unwrap_or(body.len() as u64)
    );
    let _ = stream.write_all(head.as_bytes());
    if method != "HEAD" {
        let _ = stream.write_all(&body);
    }
    let _ = stream.flush();
}

fn loader(engine: FakeEngine, base: &str, timeout: Duration) -> DocumentLoader {
    let engine: Arc<dyn DocumentEngine> = Arc::new(engine);
    DocumentLoader::new(engine, base, timeout)
}

#[test]
fn loads_document_and_reports_progress() {
    let base = serve(|path| match path {
        "/docs/manual.pdf" => (200, minimal_pdf(3)),
        _ => (404, Vec::new()),
    });
    let loader = loader(FakeEngine::new(3), &base, Duration::from_secs(5));

    let mut progress = Vec::new();
    let handle = loader
        .load(&format!("{base}/docs/manual.pdf"), |f| progress.push(f))
        .unwrap();

    assert_eq!(handle.page_count(), 3);
    assert_eq!(handle.bytes(), minimal_pdf(3).as_slice());
    assert_eq!(progress.last().copied(), Some(1.0));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn relative_locator_uses_base_url() {
    let base = serve(|path| match path {
        "/media/report.pdf" => (200, minimal_pdf(2)),
        _ => (404, Vec::new()),
    });
    let loader = loader(FakeEngine::new(2), &base, Duration::from_secs(5));

    let handle = loader.load("media/report.pdf", |_| {}).unwrap();
    assert_eq!(handle.url(), format!("{base}/media/report.pdf"));
}

#[test]
fn missing_resource_is_not_found() {
    let base = serve(|_| (404, Vec::new()));
    let loader = loader(FakeEngine::new(1), &base, Duration::from_secs(5));

    let err = loader.load(&format!("{base}/gone.pdf"), |_| {}).unwrap_err();
    assert!(
        matches!(err, LoadError::NotFound { status: Some(404), .. }),
        "unexpected {err:?}"
    );
}

#[test]
fn garbage_bytes_are_a_parse_error() {
    let base = serve(|_| (200, b"<html>not a document</html>".to_vec()));
    let loader = loader(FakeEngine::new(1), &base, Duration::from_secs(5));

    let err = loader.load(&format!("{base}/page.pdf"), |_| {}).unwrap_err();
    assert!(matches!(err, LoadError::Parse { .. }), "unexpected {err:?}");
}

#[test]
fn slow_parse_loses_the_timeout_race() {
    let base = serve(|_| (200, minimal_pdf(1)));
    let engine = FakeEngine::new(1).with_parse_delay(Duration::from_secs(3));
    let loader = loader(engine, &base, Duration::from_millis(300));

    let err = loader.load(&format!("{base}/slow.pdf"), |_| {}).unwrap_err();
    assert!(matches!(err, LoadError::Timeout { .. }), "unexpected {err:?}");
}

#[test]
fn absurd_content_length_is_a_network_error() {
    let base = serve_declaring(Some(900_000_000_000_000), |_| (200, minimal_pdf(1)));
    let loader = loader(FakeEngine::new(1), &base, Duration::from_secs(5));

    let err = loader.load(&format!("{base}/huge.pdf"), |_| {}).unwrap_err();
    assert!(matches!(err, LoadError::Network { .. }), "unexpected {err:?}");
}

#[test]
fn unreachable_host_is_a_network_error() {
    // Bind then drop to get a port nobody listens on
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let loader = loader(FakeEngine::new(1), "http://localhost", Duration::from_secs(2));

    let err = loader
        .load(&format!("http://127.0.0.1:{port}/doc.pdf"), |_| {})
        .unwrap_err();
    assert!(matches!(err, LoadError::Network { .. }), "unexpected {err:?}");
}
