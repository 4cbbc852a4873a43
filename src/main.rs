use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use simple_logger::SimpleLogger;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

mod animation;
mod config;
mod control;
mod daemon;
mod engine;
mod error;
mod link;
mod service;

use config::Config;
use control::socket::{self, ChannelPublisher};
use daemon::Daemon;
use link::{Board, TcpConnector};

/// Number of inbound events buffered before operators are slowed down
const EVENT_BACKLOG: usize = 32;

/// Longest accepted gap between liveness probes, one day
const MAX_HEARTBEAT_SECS: u64 = 24 * 60 * 60;

/// LED animation daemon
///
/// Drives a set of on/off peripherals through animations on behalf of a
/// remote operator.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Maximum level of log messages
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    log_level: log::LevelFilter,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the animation daemon
    Run {
        /// Address of the peripheral service
        #[arg(long, default_value = "127.0.0.1:7701")]
        link: String,
        /// Address to accept operators on
        #[arg(long, default_value = "127.0.0.1:7700")]
        control: String,
        /// Seconds between liveness probes of the peripheral service, 0 disables them
        #[arg(
            long,
            default_value = "5",
            value_name = "SECS",
            value_parser = clap::value_parser!(u64).range(0..=MAX_HEARTBEAT_SECS)
        )]
        heartbeat_secs: u64,
    },
    /// Serve simulated peripherals for the daemon to drive
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:7701")]
        listen: String,
        /// Number of peripherals
        #[arg(long, default_value = "4")]
        count: usize,
        /// Display name of a peripheral, in order
        #[arg(long = "name", value_name = "NAME")]
        names: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    SimpleLogger::new()
        .with_level(cli.log_level)
        .init()
        .context("Failed to initialise logging")?;

    // One thread, so commands, ticks and timers never interleave
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    match cli.command {
        Command::Run {
            link,
            control,
            heartbeat_secs,
        } => {
            let config = Config {
                heartbeat_period: Some(Duration::from_secs(heartbeat_secs)).filter(|d| !d.is_zero()),
                ..Config::default()
            };

            rt.block_on(run(config, link, control))
        }
        Command::Serve { listen, count, mut names } => {
            names.resize(count, String::new());

            rt.block_on(async move {
                let listener = TcpListener::bind(&listen)
                    .await
                    .with_context(|| format!("Failed to listen on {}", listen))?;
                service::serve(listener, Board::new(names)).await
            })
        }
    }
}

async fn run(config: Config, link: String, control: String) -> Result<()> {
    let listener = TcpListener::bind(&control)
        .await
        .with_context(|| format!("Failed to listen on {}", control))?;

    let (events_tx, events_rx) = mpsc::channel(EVENT_BACKLOG);
    let publisher = ChannelPublisher::new();

    let operators = tokio::spawn(socket::serve(listener, events_tx, publisher.clone()));

    log::info!("Using peripheral service at {}", link);
    let daemon = Daemon::new(config, TcpConnector::new(link), publisher, events_rx);
    daemon.run(shutdown_signal()).await;

    operators.abort();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Unable to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
