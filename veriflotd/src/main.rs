/**
 * VERIFLOTD - Démon coordinateur de flotte
 *
 * RÔLE : Point d'entrée. Charge la configuration (.env puis variables
 * d'environnement puis drapeaux CLI), installe le tracing, ouvre le
 * listener TCP et lance les deux boucles : acceptation et healthchecker.
 *
 * FONCTIONNEMENT : l'arrêt propre passe par un canal watch unique armé
 * sur SIGINT/SIGTERM; les deux boucles et le pool le surveillent.
 */

mod checkers;
mod config;
mod healthchecker;
mod host;
mod operation;
mod pool;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use server::Server;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "veriflotd", about = "Fleet coordinator daemon", version)]
struct Cli {
    /// Environment tag; calls with another tag are rejected.
    #[arg(long)]
    env: Option<String>,

    /// TCP listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Worker count per pool.
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(env) = cli.env {
        config.env = env;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(workers) = cli.workers {
        config.num_workers = workers.max(1);
    }

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    info!(
        env = %config.env,
        port = config.port,
        workers = config.num_workers,
        "veriflotd listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
        // sender stays alive so receivers see the flag, not a closed channel
        std::future::pending::<()>().await;
    });

    let (server, force_rx) = Server::new(config, shutdown_rx);
    server.spawn_healthchecker(force_rx);
    server.serve(listener).await;

    info!("veriflotd stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
