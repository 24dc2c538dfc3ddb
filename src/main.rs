use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;

mod app;
mod config;
mod handler;
mod message;
mod operator;
mod store;
mod tui;
mod typewriter;
mod ui;

use app::App;
use config::Config;
use operator::HttpOperatorRuntime;
use store::SessionStore;
use tui::EventHandler;

const TICK_INTERVAL: Duration = Duration::from_millis(120);
const DEFAULT_TYPEWRITER_SPEED: usize = 3;

#[derive(Parser)]
#[command(name = "datachat")]
#[command(about = "Terminal chat panel for natural-language dataset queries")]
struct Cli {
    /// Operator server endpoint
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Dataset whose chat session to open
    #[arg(short, long)]
    dataset: Option<String>,

    /// Name of the ask operator to invoke
    #[arg(long)]
    ask_operator: Option<String>,

    /// Characters of incoming text revealed per tick
    #[arg(long)]
    typewriter_speed: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Log to file; the terminal owns stderr while the TUI is up
    if let Err(e) = init_logging() {
        eprintln!("warning: logging disabled: {}", e);
    }

    let config = Config::load().unwrap_or_else(|_| Config::new());

    let endpoint = cli
        .endpoint
        .unwrap_or_else(|| config.endpoint().to_string());
    let ask_operator = cli
        .ask_operator
        .unwrap_or_else(|| config.ask_operator().to_string());
    let dataset = cli
        .dataset
        .or_else(|| config.dataset.clone())
        .unwrap_or_else(|| "default".to_string());
    let typewriter_speed = cli
        .typewriter_speed
        .or(config.typewriter_speed)
        .unwrap_or(DEFAULT_TYPEWRITER_SPEED);

    let runtime = Arc::new(HttpOperatorRuntime::new(&endpoint, &ask_operator));
    let store = SessionStore::new(SessionStore::default_dir()?);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let mut events = EventHandler::new(TICK_INTERVAL);
    let mut app = App::new(dataset, typewriter_speed, runtime, store, events.sender());

    let result = run(&mut app, &mut terminal, &mut events).await;

    tui::restore()?;
    result
}

async fn run(app: &mut App, terminal: &mut tui::Tui, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event),
            None => break,
        }
    }
    Ok(())
}

fn init_logging() -> Result<()> {
    let dir = dirs::data_dir()
        .ok_or_else(|| anyhow!("Could not determine data directory"))?
        .join("datachat");
    std::fs::create_dir_all(&dir)?;

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("datachat.log"))?;

    tracing_subscriber::fmt()
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .init();

    Ok(())
}
