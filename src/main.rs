//! CLI entry point: `forward` runs the dispatcher, `agents` runs a fleet of
//! mock agent endpoints to exercise it against (spec §6 "CLI surface";
//! grounded on `cmd/proxy/{main,forward,agents}.go`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use cmdproxy::{Peer, Scheduler};

#[derive(Parser)]
#[command(name = "cmdproxy", about = "A small command-dispatch proxy")]
struct Cli {
    /// Enable debug-level logging.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatcher's ingress API, fanning out to a fixed agent set.
    Forward {
        /// Listen address for the ingress API.
        #[arg(long, default_value = "127.0.0.1:7650")]
        api: SocketAddr,

        /// Agent address to fan out to (repeatable; order fixes peer indices).
        #[arg(long = "agent", required = true)]
        agents: Vec<SocketAddr>,
    },

    /// Run a fleet of in-process agent endpoints sharing one handler.
    Agents {
        /// Listen address for the first agent; subsequent agents bind
        /// successive ports on the same host.
        #[arg(long, default_value = "127.0.0.1:8080")]
        api: SocketAddr,

        /// Number of agent listeners to run.
        #[arg(long, default_value_t = 3)]
        count: u16,

        /// Artificial delay before each agent responds, in milliseconds.
        #[arg(long, default_value_t = 3000)]
        delay_ms: u64,
    },
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Command::Forward { api, agents } => run_forward(api, agents).await,
        Command::Agents { api, count, delay_ms } => {
            run_agents(api, count, Duration::from_millis(delay_ms)).await
        }
    }
}

async fn run_forward(api_addr: SocketAddr, agent_addrs: Vec<SocketAddr>) -> anyhow::Result<()> {
    let client = Arc::new(reqwest::Client::new());
    let peers: Vec<Peer> = agent_addrs
        .iter()
        .map(|addr| Peer::new("http", addr.to_string(), client.clone()))
        .collect();
    info!(peers = peers.len(), %api_addr, "starting forward");

    let scheduler = Arc::new(Scheduler::new(peers));
    let app = cmdproxy::api::router(scheduler.clone());

    let scheduler_loop = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    let listener = tokio::net::TcpListener::bind(api_addr).await?;
    info!(addr = %api_addr, "ingress API listening");

    tokio::select! {
        result = axum::serve(listener, app) => { result?; }
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
        }
    }

    scheduler.stop().await;
    scheduler_loop.await?;
    Ok(())
}

async fn run_agents(first_addr: SocketAddr, count: u16, delay: Duration) -> anyhow::Result<()> {
    let mut handles = Vec::with_capacity(count as usize);
    let mut addrs = Vec::with_capacity(count as usize);

    for i in 0..count {
        let addr = SocketAddr::new(first_addr.ip(), first_addr.port() + i);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;
        let app = cmdproxy::agent::router(delay);
        addrs.push(bound);
        handles.push(tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        }));
    }

    info!(addrs = ?addrs, delay_ms = delay.as_millis(), "agents listening");
    println!(
        "{}",
        addrs.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(" ")
    );

    tokio::signal::ctrl_c().await?;
    info!("received interrupt, shutting down");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}
