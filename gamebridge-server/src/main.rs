// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Context;
use clap::Parser;
use gamebridge_common::config::{BridgeConfig, TlsConfig};
use gamebridge_common::BridgeError;
use gamebridge_core::BridgeServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file; flags override its values
    #[arg(long, env = "GAMEBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind to
    #[arg(long, env = "GAMEBRIDGE_BIND")]
    bind: Option<SocketAddr>,

    /// Path to the CA bundle client certificates must chain to (PEM)
    #[arg(long, env = "GAMEBRIDGE_TLS_CA")]
    tls_ca: Option<PathBuf>,

    /// Path to the server TLS certificate (PEM)
    #[arg(long, env = "GAMEBRIDGE_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    /// Path to the server TLS private key (PEM)
    #[arg(long, env = "GAMEBRIDGE_TLS_KEY")]
    tls_key: Option<PathBuf>,

    /// Capabilities to advertise, wire spellings, comma separated
    #[arg(long, env = "GAMEBRIDGE_CAPABILITIES", value_delimiter = ',')]
    capabilities: Option<Vec<String>>,

    /// Serve plain TCP instead of mutual TLS (testing only)
    #[arg(long, env = "GAMEBRIDGE_INSECURE_TCP")]
    insecure_tcp: bool,

    /// Seconds between metrics log lines (0 disables)
    #[arg(long, default_value_t = 30, env = "GAMEBRIDGE_METRICS_INTERVAL")]
    metrics_interval_secs: u64,
}

/// Merge the config file (if any) with flag overrides and validate the
/// result.
fn effective_config(args: &Args) -> anyhow::Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path).context("loading configuration file")?,
        None => BridgeConfig::default(),
    };

    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(ca) = &args.tls_ca {
        config.tls.ca_path = Some(ca.clone());
    }
    if let Some(cert) = &args.tls_cert {
        config.tls.cert_path = Some(cert.clone());
    }
    if let Some(key) = &args.tls_key {
        config.tls.key_path = Some(key.clone());
    }
    if let Some(capabilities) = &args.capabilities {
        config.server.capabilities = capabilities.clone();
    }

    if args.insecure_tcp {
        config.tls = TlsConfig::default();
    } else if !config.tls.is_complete() {
        anyhow::bail!(
            "mutual TLS material is required: set tls.ca_path, tls.cert_path and \
             tls.key_path (or pass --insecure-tcp for testing)"
        );
    }

    Ok(config)
}

fn init_logging() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

// Exit codes: 0 clean shutdown, 1 bind failure, 2 TLS material load
// failure, 3 configuration error.
#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging();
    let code = run(args).await;
    std::process::exit(code);
}

async fn run(args: Args) -> i32 {
    let metrics_interval = args.metrics_interval_secs;
    let insecure = args.insecure_tcp;

    let config = match effective_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %format!("{e:#}"), "configuration error");
            return 3;
        }
    };

    let server = match BridgeServer::from_config(&config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "configuration error");
            return 3;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind_addr,
        capabilities = ?config.server.capabilities,
        "starting gamebridge server"
    );
    if insecure {
        warn!("serving plain TCP; peers are unauthenticated");
    }

    if metrics_interval > 0 {
        let metrics = server.metrics();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(metrics_interval));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snap = metrics.snapshot();
                info!(
                    sessions_open = snap.sessions_opened.saturating_sub(snap.sessions_closed),
                    telemetry_relayed = snap.telemetry_relayed,
                    telemetry_dropped = snap.telemetry_dropped,
                    actions_relayed = snap.actions_relayed,
                    actions_rejected = snap.actions_rejected,
                    actions_completed = snap.actions_completed,
                    actions_timed_out = snap.actions_timed_out,
                    emergency_stops = snap.emergency_stops,
                    transport_stalls = snap.transport_stalls,
                    "bridge metrics"
                );
            }
        });
    }

    tokio::select! {
        result = server.run() => match result {
            Ok(()) => 0,
            Err(BridgeError::Bind(e)) => {
                error!(error = %e, "bind failed");
                1
            }
            Err(BridgeError::Tls(e)) => {
                error!(error = %e, "TLS material load failed");
                2
            }
            Err(BridgeError::Config(e)) => {
                error!(error = %e, "configuration error");
                3
            }
            Err(e) => {
                error!(error = %e, "server error");
                1
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            0
        }
    }
}
