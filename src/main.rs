use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture, Event, EventStream, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use ratatui::{Terminal, backend::CrosstermBackend};
use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod background;
mod command_log;
mod config;
mod context;
mod controllers;
mod error;
mod events;
mod git_commands;
mod gui;
mod inline_status;
mod locks;
mod model;
mod operations;
mod popup;
mod presentation;
mod pty;
mod refresh;
mod repo;
mod screen;
mod subprocess;
mod suggestions;
mod tasks;
mod ui;
mod view_buffer;
mod views;

use config::{AppStateStore, GuiConfig, GuiFlags};
use events::{KeyEventResult, handle_key_event, handle_mouse_event};
use gui::{Gui, GuiDeps};
use repo::GitRepoLoader;
use subprocess::CrosstermSuspender;
use view_buffer::HasViews;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LOG_FILE: &str = "lzgui.log";
const DEADLOCK_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Log to a file in the config dir, filtered by `LZGUI_LOG`. The terminal
/// belongs to the UI, so nothing is logged when the file can't be opened.
fn init_logging(dir: Option<&Path>) {
    let Some(dir) = dir else {
        return;
    };
    if fs::create_dir_all(dir).is_err() {
        return;
    }
    let file = match fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE))
    {
        Ok(f) => f,
        Err(_) => return,
    };
    let filter = EnvFilter::try_from_env("LZGUI_LOG").unwrap_or_else(|_| EnvFilter::new("lzgui=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_thread_names(true)
        .try_init();
}

fn restore_terminal() -> io::Result<()> {
    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Git runs this binary as its askpass helper for credentials entered in the UI.
    if env::var_os(git_commands::ASKPASS_ENV).is_some() {
        let prompt = env::args().nth(1).unwrap_or_default();
        println!("{}", git_commands::askpass_reply(&prompt));
        return Ok(());
    }

    let _ = dotenvy::dotenv();

    // Handle --version / -V
    if let Some(arg) = env::args().nth(1)
        && (arg == "--version" || arg == "-V")
    {
        println!("lzgui {}", VERSION);
        return Ok(());
    }

    let config_dir = config::config_dir();
    init_logging(config_dir.as_deref());
    tracing::info!(version = VERSION, "starting");

    let start_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("/"));
    let loader = GitRepoLoader::discover(&start_path)?;
    let repo_root = loader.repo_root().to_path_buf();

    let config = GuiConfig::load(config_dir.as_deref());
    let app_state = AppStateStore::load(config_dir.as_deref());
    let flags = GuiFlags::from_env();

    let watchdog = CancellationToken::new();
    locks::spawn_deadlock_watchdog(DEADLOCK_CHECK_INTERVAL, watchdog.clone());

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = restore_terminal();
        default_hook(info);
    }));

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let suspender = Arc::new(CrosstermSuspender::new());
    let (mut gui, mut rx) = Gui::new(GuiDeps {
        config,
        flags,
        repo_root,
        loader: Arc::new(loader),
        app_state,
        suspender: suspender.clone(),
    });

    let result = run(&mut terminal, &mut gui, &mut rx, &suspender).await;

    gui.shutdown();
    // Cancelled workers report back through the queue; let them finish.
    if !rx.settle(&mut gui, SHUTDOWN_GRACE) {
        tracing::warn!("workers still running at exit");
    }
    watchdog.cancel();
    restore_terminal()?;
    tracing::info!("exited");
    result
}

async fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    gui: &mut Gui,
    rx: &mut tasks::UiReceiver<Gui>,
    suspender: &CrosstermSuspender,
) -> anyhow::Result<()> {
    gui.start()?;

    let mut event_stream = EventStream::new();
    let mut spinner = IntervalStream::new(tokio::time::interval(gui.spinner_interval()));

    loop {
        // Force full terminal refresh after a subprocess had the screen
        if suspender.take_needs_clear() {
            terminal.clear()?;
            gui.views_mut().render();
        }
        if gui.views_mut().take_needs_draw() {
            terminal.draw(|f| ui::draw(f, gui))?;
            rx.run_after_layout(gui);
        }

        tokio::select! {
            // Handle terminal events
            Some(event_result) = event_stream.next() => {
                match event_result? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        if let KeyEventResult::Quit = handle_key_event(gui, key) {
                            break;
                        }
                    }
                    Event::Mouse(mouse) => {
                        handle_mouse_event(gui, mouse);
                    }
                    Event::Resize(_, _) => gui.views_mut().render(),
                    _ => {}
                }
            }
            // Handle work queued for the UI thread
            Some(msg) = rx.recv() => {
                rx.process(gui, msg);
                rx.drain(gui);
            }
            Some(_) = spinner.next() => {
                // Animations and expiring toasts need periodic redraws.
                if gui.waiting().current().is_some()
                    || !gui.registry().is_empty()
                    || !gui.toast_lines().is_empty()
                {
                    gui.views_mut().render();
                }
            }
        }

        if gui.should_quit() {
            break;
        }
    }
    Ok(())
}
