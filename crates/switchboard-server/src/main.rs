//! Entry point: flag parsing, logging, and signal-driven shutdown.

use std::process;

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use switchboard_server::config::ServerConfig;
use switchboard_server::server::Server;

fn parse_flags() -> ServerConfig {
    let defaults = ServerConfig::default();
    let mut config = defaults.clone();
    let mut args = std::env::args();
    let program = args
        .next()
        .unwrap_or_else(|| "switchboard-server".to_string());
    while let Some(flag) = args.next() {
        let value = match flag.as_str() {
            "-url" | "-ca" | "-cert" | "-key" => args.next(),
            _ => None,
        };
        match (flag.as_str(), value) {
            ("-url", Some(v)) => config.listen_url = v,
            ("-ca", Some(v)) => config.ca_path = v.into(),
            ("-cert", Some(v)) => config.cert_path = v.into(),
            ("-key", Some(v)) => config.key_path = v.into(),
            _ => {
                eprintln!("Usage: {program} OPTIONS");
                eprintln!(
                    "  -ca PATH  - Path to the CA file, default: '{}'",
                    defaults.ca_path.display()
                );
                eprintln!(
                    "  -cert PATH  - Path to the CERT file, default: '{}'",
                    defaults.cert_path.display()
                );
                eprintln!(
                    "  -key PATH  - Path to the KEY file, default: '{}'",
                    defaults.key_path.display()
                );
                eprintln!(
                    "  -url URL  - Listen on URL, default: '{}'",
                    defaults.listen_url
                );
                process::exit(1);
            }
        }
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = parse_flags();
    info!(
        url = %config.listen_url,
        "starting switchboard server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = Server::bind(&config, shutdown_rx).await?;
    let mut serving = tokio::spawn(server.run());

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        finished = &mut serving => return finished?,
    }

    let _ = shutdown_tx.send(true);
    serving.await??;
    info!("all connections drained, bye");
    Ok(())
}
