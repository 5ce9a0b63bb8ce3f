use anyhow::Result;
use axum::serve;
use clap::Parser;
use doc_mirror::api::{self, AppState};
use doc_mirror::config::{Cli, Commands};
use doc_mirror_core::events::EventBus;
use doc_mirror_core::Principal;
use std::future::IntoFuture;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { addr } => {
            let manager = cli.server.build_manager().await?;
            spawn_event_log(manager.events());
            let state = AppState {
                manager,
                verifier: cli.server.verifier(),
                header_auth: cli.server.header_auth,
            };
            let app = api::router(state);
            let listener = TcpListener::bind(addr).await?;
            info!(%addr, "listening");
            serve(listener, app.into_make_service())
                .with_graceful_shutdown(shutdown_signal())
                .into_future()
                .await?;
        }
        Commands::Audit => {
            cli.server.require_remote("audit")?;
            let manager = cli.server.build_manager().await?;
            let operator = Principal::admin("cli");
            let report = manager.audit(Some(&operator)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::ShowConfig => {
            let config = cli.server.load_mirror_config()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn spawn_event_log(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => debug!(?event, "mirror event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}
