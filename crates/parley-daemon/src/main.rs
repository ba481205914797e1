//! parley-daemon - supervises one voice agent and streams its output over HTTP.
//!
//! ```text
//! parley-daemon --port 8000 --static-dir ./ui -- python3 -u agent.py console
//! ```

mod cli;

use clap::Parser;
use log::info;
use std::process::ExitCode;
use std::sync::Arc;

use cli::Args;
use parley_core::event_bus::EventBus;
use parley_core::supervisor::Supervisor;
use parley_http::SharedState;

fn setup_logging(default_level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

/// Resolve on Ctrl-C, or on SIGTERM where available.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run(args: Args) -> Result<(), String> {
    let settings = args.supervisor_settings()?;
    info!(
        "Agent command: {} {}",
        settings.command.program,
        settings.command.args.join(" ")
    );

    let event_bus = Arc::new(EventBus::with_capacity(
        args.logs_capacity,
        args.events_capacity,
    ));
    let supervisor = Supervisor::new(settings, Arc::clone(&event_bus));
    let state = Arc::new(SharedState::new(supervisor.clone()).with_keepalive(args.keepalive()));

    let mut server =
        parley_http::start(state, &args.host, args.port, args.static_dir.clone()).await?;

    shutdown_signal().await;
    info!("Shutting down");

    // Stop the agent first so its last lines still reach connected clients,
    // then end every stream so the server can drain.
    supervisor.shutdown().await;
    event_bus.close();
    server.stop().await;

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    setup_logging(&args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
