//! Listener setup and the accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::idle;
use crate::session;
use crate::state::ServerState;
use crate::tls;

/// A bound listener plus the shared state behind it. [`Server::run`] accepts
/// until the shutdown signal flips, then drains every connection task.
pub struct Server {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    state: Arc<ServerState>,
    shutdown: watch::Receiver<bool>,
}

impl Server {
    /// Bind the listener and, for a `wss://` URL, load the TLS material.
    pub async fn bind(config: &ServerConfig, shutdown: watch::Receiver<bool>) -> Result<Self> {
        let endpoint = config.endpoint()?;
        let listener = TcpListener::bind(&endpoint.addr)
            .await
            .with_context(|| format!("failed to bind {}", endpoint.addr))?;
        let tls = if endpoint.tls {
            Some(tls::acceptor(config)?)
        } else {
            None
        };
        Ok(Self {
            listener,
            tls,
            state: Arc::new(ServerState::new()),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }

    /// Accept connections until shutdown, then wait for every task to finish.
    pub async fn run(self) -> Result<()> {
        let Server {
            listener,
            tls,
            state,
            mut shutdown,
        } = self;
        let mut tasks = JoinSet::new();
        tasks.spawn(idle::run(state.clone(), shutdown.clone()));

        info!("listening on {}", listener.local_addr()?);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "accepted connection");
                            spawn_connection(
                                &mut tasks,
                                stream,
                                peer,
                                tls.clone(),
                                state.clone(),
                                shutdown.clone(),
                            );
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("draining {} task(s)", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                debug!(error = %e, "task ended abnormally");
            }
        }
        Ok(())
    }
}

fn spawn_connection(
    tasks: &mut JoinSet<()>,
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    state: Arc<ServerState>,
    shutdown: watch::Receiver<bool>,
) {
    tasks.spawn(async move {
        let served = match tls {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(stream) => session::serve_connection(stream, peer, state, shutdown).await,
                Err(e) => {
                    debug!(%peer, error = %e, "tls handshake failed");
                    Ok(())
                }
            },
            None => session::serve_connection(stream, peer, state, shutdown).await,
        };
        if let Err(e) = served {
            debug!(%peer, error = %e, "connection ended with error");
        }
    });
}
