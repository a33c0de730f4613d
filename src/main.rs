use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod handler;
mod markdown;
mod state;
mod tui;
mod ui;
mod worker;

use app::App;
use config::Config;
use handler::Context;
use worker::CompletionClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Config problems are not fatal; fall back to the built-in values
    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    if let Err(e) = init_tracing(&config.log_level) {
        eprintln!("Logging disabled: {}", e);
    }
    if let Some(e) = config_error {
        warn!(error = %e, "using default config");
    }
    info!(endpoint = %config.endpoint, "starting streamchat");

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let result = run(&mut terminal, config).await;

    tui::restore()?;
    info!("exiting");
    result
}

async fn run(terminal: &mut tui::Tui, config: Config) -> Result<()> {
    let mut events = tui::EventHandler::new();
    let ctx = Context {
        client: CompletionClient::new(&config),
        stream_tx: events.stream_sender(),
    };
    let mut app = App::new(config);

    loop {
        terminal.draw(|frame| ui::render(&mut app, frame))?;

        let Some(event) = events.next().await else {
            break;
        };
        handler::handle_event(&mut app, &ctx, event);

        // `exit` quits right after sending, without waiting for the reply
        if app.should_quit {
            break;
        }
    }

    Ok(())
}

/// Sends tracing output to a log file; the terminal belongs to the UI.
fn init_tracing(default_level: &str) -> Result<()> {
    let log_dir = Config::log_dir()?;
    fs::create_dir_all(&log_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("streamchat.log"))?;

    let filter = EnvFilter::try_new(default_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(())
}
