//! Entry point for `rdt`.
//!
//! Parses CLI arguments and dispatches into **upload**, **download** or
//! **start-server**. All protocol work is delegated to library modules;
//! `main.rs` owns only process setup (logging, signal handling, argument
//! parsing).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use tokio::sync::watch;

use rdt_over_udp::{Client, Protocol, Server, TransferConfig, TransferError};

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Increase output verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only report errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a local file to a server.
    Upload {
        #[command(flatten)]
        endpoint: Endpoint,
        /// Source file path.
        #[arg(short, long)]
        src: PathBuf,
        /// Name to store the file under (defaults to the source file name).
        #[arg(short, long)]
        name: Option<String>,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Fetch a file from a server.
    Download {
        #[command(flatten)]
        endpoint: Endpoint,
        /// Destination file path.
        #[arg(short, long)]
        dst: PathBuf,
        /// Name of the file on the server.
        #[arg(short, long)]
        name: String,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Serve files from a storage directory.
    StartServer {
        #[command(flatten)]
        endpoint: Endpoint,
        /// Storage directory.
        #[arg(short, long)]
        storage: PathBuf,
        #[command(flatten)]
        tuning: Tuning,
    },
}

#[derive(Args)]
struct Endpoint {
    /// Server host.
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port.
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

impl Endpoint {
    async fn resolve(&self) -> Result<SocketAddr> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("cannot resolve {}", self.host))?
            .next()
            .with_context(|| format!("no address for {}", self.host))
    }
}

#[derive(Args)]
struct Tuning {
    /// Error recovery protocol: sw, sr or gbn.
    #[arg(short = 'a', long = "algorithm", default_value = "sw")]
    protocol: Protocol,
    /// Retransmission timeout in seconds.
    #[arg(short, long, default_value_t = 1.0)]
    timeout: f64,
    /// Window size for sr and gbn.
    #[arg(short, long, default_value_t = 4)]
    window: u32,
    /// Handshake and closing attempts.
    #[arg(short = 'r', long, default_value_t = 5)]
    max_retries: u32,
}

impl Tuning {
    fn config(&self) -> Result<TransferConfig> {
        let timeout = Duration::try_from_secs_f64(self.timeout)
            .with_context(|| format!("invalid timeout {}", self.timeout))?;
        let config = TransferConfig::default()
            .with_timeout(timeout)
            .with_window_size(self.window)
            .with_max_retries(self.max_retries);
        config.validate()?;
        Ok(config)
    }
}

/// Point out failures caused by loss or silence, which a rerun may fix.
fn explain(err: TransferError) -> anyhow::Error {
    if err.is_retryable() {
        anyhow::Error::new(err).context("transfer failed on a lossy or unreachable network; retrying may help")
    } else {
        err.into()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else if cli.quiet {
        LevelFilter::Error
    } else {
        LevelFilter::Info
    };
    // RUST_LOG, when set, overrides the flags.
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match cli.command {
        Command::Upload { endpoint, src, name, tuning } => {
            let name = match name {
                Some(name) => name,
                None => match src.file_name() {
                    Some(n) => n.to_string_lossy().into_owned(),
                    None => bail!("{} does not name a file", src.display()),
                },
            };
            let server = endpoint.resolve().await?;
            let client = Client::new(server, tuning.protocol, tuning.config()?);
            let report = client.upload(&src, &name).await.map_err(explain)?;
            log::info!("uploaded {} as {name:?}: {report}", src.display());
        }
        Command::Download { endpoint, dst, name, tuning } => {
            let server = endpoint.resolve().await?;
            let client = Client::new(server, tuning.protocol, tuning.config()?);
            let report = client.download(&name, &dst).await.map_err(explain)?;
            log::info!("downloaded {name:?} to {}: {report}", dst.display());
        }
        Command::StartServer { endpoint, storage, tuning } => {
            let addr = endpoint.resolve().await?;
            let server = Server::bind(addr, storage, tuning.protocol, tuning.config()?).await?;

            let (shutdown, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::info!("interrupt received, stopping");
                    let _ = shutdown.send(true);
                }
            });
            server.run(rx).await?;
        }
    }

    Ok(())
}
