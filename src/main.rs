use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::io::AsyncBufReadExt as _;

use deskpilot::config::{self, SettingsStore};
use deskpilot::core::Core;
use deskpilot::executor::input::EnigoDriver;
use deskpilot::screen::XcapScreen;
use deskpilot::status::{StatusSink, StatusUpdate};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let settings = match config::load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "failed to load settings, starting with defaults");
            config::Settings::default()
        }
    };
    let store = SettingsStore::new(settings);

    // Status messages print asynchronously so a slow model round-trip never
    // blocks the console.
    let (status, mut status_rx) = StatusSink::channel();
    tokio::spawn(async move {
        while let Some(update) = status_rx.recv().await {
            let ts = chrono::Local::now().format("%H:%M:%S");
            match update {
                StatusUpdate::Message(message) => println!("[{ts}] {message}"),
                StatusUpdate::Artifact { label, path } => {
                    println!("[{ts}] {label} ({})", path.display())
                }
            }
        }
    });

    let shot_dir = config::settings_directory().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "falling back to temp dir for screenshots");
        std::env::temp_dir()
    });
    let screen = Arc::new(XcapScreen::new(shot_dir));
    let input = Arc::new(EnigoDriver);
    let mut core = Core::new(&store, screen, input, status).await;

    // Ctrl-C requests cooperative cancellation of the current run.
    let interrupt = core.interrupt_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("stop requested");
            interrupt.store(true, Ordering::SeqCst);
        }
    });

    println!(
        "deskpilot {} — type a request, Ctrl-C to stop a run, `exit` to quit.",
        env!("CARGO_PKG_VERSION")
    );

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        if request.eq_ignore_ascii_case("exit") || request.eq_ignore_ascii_case("quit") {
            break;
        }
        let outcome = core.execute_user_request(request).await;
        tracing::info!(?outcome, "request finished");
    }

    core.cleanup().await;
}
