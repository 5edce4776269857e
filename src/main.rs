//! Xcelerate Proxy CLI
//!
//! Entry point for the `xcelerate-proxy` command-line tool.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;
use xcelerate_proxy::codec::{self, ContentId};
use xcelerate_proxy::{keys, GrpcRemote, Proxy, ProxyConfig, ProxyServer};

#[derive(Parser)]
#[command(name = "xcelerate-proxy")]
#[command(about = "LLVM compilation cache proxy backed by a remote ByteStream store", version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the CAS, KeyValue and Session services on a UNIX socket
    Serve {
        /// Path to a TOML config file
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// UNIX socket path (default: $TMPDIR/xcelerate-proxy.sock)
        #[arg(long, env = "XCELERATE_SOCKET")]
        socket: Option<PathBuf>,

        /// Remote store URL, e.g. https://cache.example.com:443
        #[arg(long, env = "XCELERATE_ENDPOINT")]
        endpoint: Option<String>,

        /// Bearer token for the remote store
        #[arg(long, env = "XCELERATE_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Organisation id sent as x-org-id
        #[arg(long, env = "XCELERATE_ORG_ID")]
        org_id: Option<String>,
    },

    /// Print the content id and remote key the proxy would use for a file
    Digest {
        file: PathBuf,

        /// Hash as raw Save bytes instead of a reference-less CAS object
        #[arg(long)]
        raw: bool,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("xcelerate_proxy={level}")));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve {
            config,
            socket,
            endpoint,
            token,
            org_id,
        } => {
            let mut config = match config {
                Some(path) => ProxyConfig::load(&path)?,
                None => ProxyConfig::default(),
            };
            if let Some(socket) = socket {
                config.socket_path = socket;
            }
            if let Some(endpoint) = endpoint {
                config.endpoint = endpoint;
            }
            if let Some(token) = token {
                config.token = token;
            }
            if let Some(org_id) = org_id {
                config.org_id = org_id;
            }
            run_serve(config).await
        }
        Commands::Digest { file, raw } => run_digest(file, raw),
    }
}

async fn run_serve(config: ProxyConfig) -> Result<()> {
    config.validate()?;
    info!(endpoint = %config.endpoint, "starting proxy");

    let remote = GrpcRemote::connect_lazy(&config.endpoint, config.connect_timeout())
        .with_context(|| format!("invalid remote endpoint {}", config.endpoint))?;
    let proxy = Proxy::new(config.credentials(), Arc::new(remote));

    let server = ProxyServer::bind(&config.socket_path)?;
    server.serve_with_shutdown(&proxy, shutdown_signal()).await?;
    Ok(())
}

fn run_digest(file: PathBuf, raw: bool) -> Result<()> {
    let data = std::fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;

    let id = if raw {
        ContentId::of(&data)
    } else {
        ContentId::of(&codec::encode_object::<&[u8]>(&data, &[])?)
    };
    println!("{}  {}", id, keys::cas_key_for(&id));
    Ok(())
}

async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
    info!("shutdown requested");
}
