mod auth;
mod backup;
mod config;
mod credential;
mod error;
mod ipc;
mod locks;
mod model;
mod normalize;
mod roster;
mod rows;
mod store;

use std::io::{self, BufRead, Write};

use tracing::{error, info, warn};

fn main() {
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let config = match config::Config::from_env() {
        Ok(v) => v,
        Err(e) => {
            error!(error = %format!("{e:#}"), "invalid configuration");
            std::process::exit(2);
        }
    };

    let store = match store::open_backend(&config.backend) {
        Ok(backend) => Some(roster::RecordStore::new(backend)),
        Err(e) => {
            warn!(
                backend = config.backend.kind.as_str(),
                error = %format!("{e:#}"),
                "store not opened at startup"
            );
            None
        }
    };
    let mut state = ipc::AppState::new(config, store);
    info!(version = env!("CARGO_PKG_VERSION"), "rosterd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    info!("stdin closed, exiting");
}
