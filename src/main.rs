mod auth;
mod backup;
mod config;
mod db;
mod geo;
mod grading;
mod identity;
mod ipc;
mod storage;

use std::io::{self, BufRead, Write};

use tracing_subscriber::EnvFilter;

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_env("EDUVISION_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let config = config::Config::load()?;
    init_tracing(&config.log.level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "eduvisiond starting");

    let mut state = ipc::AppState::new(config);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("stdin closed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => {
                tracing::debug!(id = %req.id, method = %req.method, "request");
                ipc::handle_request(&mut state, req)
            }
            // Can't reply with an id we failed to parse.
            Err(e) => ipc::bad_json(&e.to_string()),
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    tracing::info!("eduvisiond shutting down");
    Ok(())
}
