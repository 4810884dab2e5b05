use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use simplelog::{Config, LevelFilter, WriteLogger};

use folio::config::{self, Labels, ViewerConfig};
use folio::event_source::{Event, EventSource, KeyCode, KeyEvent, TerminalEventSource};
use folio::inputs::{InputController, InputOutcome};
use folio::panic_handler::{TerminalGuard, initialize_panic_handler};
use folio::pdf::{
    Boundary, Command, DocumentEngine, DocumentLoader, LoadError, MupdfEngine, Remediation,
    RenderError, RenderParams, RenderedPage, Rotation, SessionOptions, Status, ViewerHost,
    ViewerSession, render_page,
};
use folio::store::{FileStorage, KeyValueStorage, MemoryStorage, ReaderStore};

const LOG_FILE: &str = "folio.log";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "folio", version, about = "Terminal PDF viewer")]
struct Cli {
    /// Log at trace level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print page count and page sizes
    Info { locator: String },

    /// Render one page to a JPEG file
    Render {
        locator: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Defaults to the configured render scale
        #[arg(long)]
        scale: Option<f32>,
        /// Clockwise rotation: 0, 90, 180 or 270
        #[arg(long, default_value_t = 0)]
        rotate: i32,
        #[arg(long)]
        out: PathBuf,
    },

    /// Interactive viewer
    View {
        locator: String,
        /// Persistence key; defaults to the locator
        #[arg(long)]
        doc_id: Option<String>,
        /// Start here instead of the saved reading position
        #[arg(long)]
        page: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    WriteLogger::init(level, Config::default(), File::create(LOG_FILE)?)?;
    initialize_panic_handler();
    info!("Starting folio");

    let config = match &cli.config {
        Some(path) => {
            let mut config = ViewerConfig::load_from_path(path);
            config.apply_env_overrides();
            config
        }
        None => ViewerConfig::load(),
    };
    let engine: Arc<dyn DocumentEngine> = Arc::new(MupdfEngine);

    let result = match cli.command {
        Commands::Info { locator } => run_info(&config, engine, &locator),
        Commands::Render {
            locator,
            page,
            scale,
            rotate,
            out,
        } => {
            let rotation = Rotation::from_degrees(rotate)
                .ok_or_else(|| anyhow!("rotation must be a multiple of 90, got {rotate}"))?;
            let params = RenderParams::new(scale.unwrap_or(config.render_scale), rotation);
            run_render(&config, engine, &locator, page, params, &out)
        }
        Commands::View {
            locator,
            doc_id,
            page,
        } => run_view(config, engine, locator, doc_id, page),
    };

    if let Err(e) = &result {
        error!("folio failed: {e:#}");
    }
    result
}

fn loader_for(config: &ViewerConfig, engine: Arc<dyn DocumentEngine>) -> DocumentLoader {
    DocumentLoader::new(engine, config.api_base_url.clone(), config.load_timeout())
}

fn print_progress(fraction: f32) {
    eprint!("\rLoading {:>3.0}%", fraction * 100.0);
    if fraction >= 1.0 {
        eprintln!();
    }
}

fn run_info(config: &ViewerConfig, engine: Arc<dyn DocumentEngine>, locator: &str) -> Result<()> {
    let handle = loader_for(config, engine).load(locator, print_progress)?;
    println!("{}", handle.url());
    println!("pages: {}", handle.page_count());
    for page in 1..=handle.page_count() {
        if let Some((width, height)) = handle.page_size(page) {
            println!("  {page:>4}: {width:.1} x {height:.1} pt");
        }
    }
    Ok(())
}

fn run_render(
    config: &ViewerConfig,
    engine: Arc<dyn DocumentEngine>,
    locator: &str,
    page: usize,
    params: RenderParams,
    out: &Path,
) -> Result<()> {
    let handle = loader_for(config, engine).load(locator, print_progress)?;
    let rasterizer = handle.open_rasterizer()?;
    let rendered = render_page(rasterizer.as_ref(), page, &params)?;
    fs::write(out, &rendered.bitmap).with_context(|| format!("Failed to write {}", out.display()))?;
    println!(
        "page {} -> {} ({}x{}, {} bytes)",
        rendered.page,
        out.display(),
        rendered.width,
        rendered.height,
        rendered.bitmap.len()
    );
    Ok(())
}

fn open_storage() -> Box<dyn KeyValueStorage> {
    match config::data_dir() {
        Some(dir) => Box::new(FileStorage::new(dir)),
        None => {
            warn!("No data directory; bookmarks and progress will not be kept");
            Box::new(MemoryStorage::new())
        }
    }
}

/// Prints viewer callbacks as status lines; the terminal is in raw mode
struct TerminalHost {
    labels: Labels,
    total_pages: usize,
}

impl TerminalHost {
    fn line(&self, text: &str) {
        let mut out = io::stdout();
        let _ = write!(out, "\r{text}\r\n");
        let _ = out.flush();
    }
}

impl ViewerHost for TerminalHost {
    fn on_page_change(&mut self, page: usize) {
        self.line(&self.labels.page_indicator(page, self.total_pages));
    }

    fn on_total_pages_change(&mut self, total: usize) {
        self.total_pages = total;
        self.line(&format!("{total} pages"));
    }

    fn on_bookmark(&mut self, page: usize) {
        self.line(&format!("{}: page {page}", self.labels.get(Labels::BOOKMARK)));
    }

    fn on_annotation_add(&mut self, page: usize, text: &str) {
        self.line(&format!("Note on page {page}: {text}"));
    }

    fn on_annotation_update(&mut self, id: &str, text: &str) {
        self.line(&format!("Note {id} updated: {text}"));
    }

    fn on_annotation_delete(&mut self, id: &str) {
        self.line(&format!("Note {id} deleted"));
    }

    fn on_boundary(&mut self, boundary: Boundary) {
        match boundary {
            Boundary::Start => self.line("Already at the first page"),
            Boundary::End => self.line("Already at the last page"),
        }
    }

    fn on_load_progress(&mut self, fraction: f32) {
        let mut out = io::stdout();
        let _ = write!(out, "\rLoading {:>3.0}%", fraction * 100.0);
        let _ = out.flush();
    }

    fn on_load_failed(&mut self, error: &LoadError) {
        self.line(&format!("Could not open document: {error}"));
    }

    fn on_page_rendered(&mut self, page: &RenderedPage) {
        self.line(&format!(
            "[page {} rendered {}x{}, {} KiB]",
            page.page,
            page.width,
            page.height,
            page.bitmap.len() / 1024
        ));
    }

    fn on_page_error(&mut self, page: usize, error: &RenderError) {
        self.line(&format!("Page {page} failed: {error} (navigate again to retry)"));
    }

    fn on_reveal_page(&mut self, page: usize) {
        self.line(&format!("[scrolled to page {page}]"));
    }
}

fn print_remediation(session: &ViewerSession<TerminalHost>) {
    for action in session.state().remediation() {
        let hint = match action {
            Remediation::Retry => "Enter: retry".to_string(),
            Remediation::Download(url) => format!("Download: {url}"),
            Remediation::OpenExternal(url) => format!("Open externally: {url}"),
        };
        session.host().line(&hint);
    }
}

/// Applies keys to the annotation draft; returns the text on Enter
fn edit_draft(draft: &mut String, key: &KeyEvent) -> Option<String> {
    match key.code {
        KeyCode::Char(c) => draft.push(c),
        KeyCode::Backspace => {
            draft.pop();
        }
        KeyCode::Enter => return Some(std::mem::take(draft)),
        _ => {}
    }
    None
}

fn run_view(
    config: ViewerConfig,
    engine: Arc<dyn DocumentEngine>,
    locator: String,
    doc_id: Option<String>,
    page: Option<usize>,
) -> Result<()> {
    let store = ReaderStore::open(open_storage());
    let host = TerminalHost {
        labels: config.labels(),
        total_pages: 0,
    };
    let options = SessionOptions {
        document_id: doc_id.unwrap_or_else(|| locator.clone()),
        locator,
        initial_page: page,
    };

    let (columns, _) = crossterm::terminal::size().unwrap_or((80, 24));
    let mut input = InputController::new(&config, columns);
    let _guard = TerminalGuard::enter()?;
    input.chrome_mut().set_fullscreen(true, Instant::now());

    let mut session = ViewerSession::open(options, config, engine, store, host);
    if matches!(session.state().status, Status::Failed(_)) {
        print_remediation(&session);
    }

    let mut events = TerminalEventSource;
    let mut draft = String::new();
    let mut chrome_shown = true;

    loop {
        session.poll();

        let now = Instant::now();
        let visible = input.chrome_mut().tick(now);
        if visible != chrome_shown {
            chrome_shown = visible;
            if visible {
                session.host().line("[controls] arrows/space page  +/-/0 zoom  r rotate  m mode  b bookmark  a notes  q quit");
            }
        }

        if !events.poll(POLL_INTERVAL)? {
            continue;
        }
        let event = events.read()?;

        let failed = matches!(session.state().status, Status::Failed(_));
        if failed && matches!(&event, Event::Key(key) if key.code == KeyCode::Enter) {
            session.apply(Command::RetryLoad);
            if matches!(session.state().status, Status::Failed(_)) {
                print_remediation(&session);
            }
            continue;
        }

        match input.handle(&event, session.state().mode, now) {
            InputOutcome::Quit => break,
            InputOutcome::Command(cmd) => session.apply(cmd),
            InputOutcome::Edit(key) => {
                if let Some(text) = edit_draft(&mut draft, &key) {
                    let page = session.state().current_page;
                    session.apply(Command::UpsertAnnotation { page, text });
                } else {
                    session.host().line(&format!("> {draft}"));
                }
            }
            InputOutcome::Nothing => {}
        }
        input.sync_focus(session.state());
        if !session.state().overlays.annotations {
            draft.clear();
        }
    }

    session.close();
    info!("Viewer closed");
    Ok(())
}
