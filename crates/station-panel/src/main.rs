use clap::Parser;
use station_panel::cli::{parse_line, LineCommand, HELP};
use station_panel::{Dashboard, PanelEvent};
use station_proto::config::Config;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "station-panel")]
#[command(about = "Headless control panel for a station backend", long_about = None)]
struct Cli {
    /// Server id whose panel opens on start
    #[arg(short, long)]
    target: Option<String>,
    /// Overrides [backend].base_url
    #[arg(long)]
    base_url: Option<String>,
    /// Overrides [backend].token
    #[arg(long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = station_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = station_proto::platform::log_path("station-panel");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; keep HTTP and WebSocket client internals quiet.
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        "debug,hyper_util=warn,reqwest=warn,hyper=warn,tungstenite=warn".to_string()
    });
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("station-panel log: {}", log_path.display());
    info!("station-panel starting");

    // ── Load config ──────────────────────────────────────────────────────────
    let mut config = Config::load().unwrap_or_else(|e| {
        warn!("config unreadable, using defaults: {}", e);
        Config::default()
    });
    if let Some(base_url) = cli.base_url {
        config.backend.base_url = base_url;
    }
    if let Some(token) = cli.token {
        config.backend.token = token;
    }

    // ── Dashboard ────────────────────────────────────────────────────────────
    let mut dashboard = Dashboard::from_config(&config)?;
    let mut events = dashboard.subscribe();
    match cli.target {
        Some(target) => dashboard.open_panel(target).await,
        None => println!("no panel open; type `open <id>` or `help`"),
    }

    // ── stdin commands / broadcast printing ──────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_line(&line) {
                    Ok(None) => {}
                    Ok(Some(LineCommand::Quit)) => break,
                    Ok(Some(LineCommand::Help)) => println!("{}", HELP),
                    Ok(Some(LineCommand::Open(target))) => dashboard.open_panel(target).await,
                    Ok(Some(LineCommand::Back)) => dashboard.back().await,
                    Ok(Some(LineCommand::Bot(command))) => dashboard.control_bot(command).await,
                    Ok(Some(LineCommand::Intent(intent))) => {
                        if let Err(e) = dashboard.send(intent).await {
                            println!("! {}", e);
                        }
                    }
                    Err(e) => println!("! {}", e),
                }
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => warn!("display skipped {} events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    dashboard.shutdown().await;
    info!("station-panel exiting");
    Ok(())
}

fn print_event(event: &PanelEvent) {
    match event {
        PanelEvent::Frame(frame) => println!("{}", frame.summary_line()),
        PanelEvent::Notice { target, notice } => println!("{} {}", target, notice),
        PanelEvent::Bot(health) => println!("bot: {}", health.badge_label()),
        PanelEvent::System(notice) => println!("system {}", notice),
        PanelEvent::Closed { target } => println!("{} closed", target),
    }
}
