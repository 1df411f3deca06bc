//! Per-connection lifecycle: handshake validation, the read loop, and the
//! outbound writer task.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as UpgradeRequest, Response as UpgradeResponse,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use switchboard_core::{Name, NameError, Request};

use crate::engine;
use crate::state::ServerState;

/// Send half of a connection's outbound channel; what the roster stores as
/// the user's send handle.
pub(crate) type OutboundTx = mpsc::UnboundedSender<Message>;

const BAD_QUERY: &str = "INVALID USERNAME QUERY FORMAT";
const EMPTY_USERNAME: &str = "USERNAME CANT BE EMPTY";
const USERNAME_TOO_LARGE: &str = "USERNAME TOO LARGE";
const BAD_USERNAME: &str = "INVALID USERNAME";

/// Drive one accepted socket for its whole life: upgrade, admission, read
/// loop, teardown.
pub(crate) async fn serve_connection<S>(
    stream: S,
    peer: SocketAddr,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut claimed = None;
    let callback = |req: &UpgradeRequest, resp: UpgradeResponse| {
        match validate_upgrade(req.uri().query(), &state) {
            Ok(name) => {
                claimed = Some(name);
                Ok(resp)
            }
            Err(reason) => {
                debug!(%peer, reason, "rejecting upgrade");
                Err(reject(reason))
            }
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%peer, error = %e, "websocket handshake failed");
            return Ok(());
        }
    };
    let Some(name) = claimed else {
        return Ok(());
    };

    let (sink, mut stream) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_outbound(sink, rx));

    if let Err(e) = engine::admit(&state, name.clone(), tx.clone()) {
        // Another connection claimed the name between validation and
        // insertion; it wins.
        warn!(%peer, user = %name, error = %e, "admission race lost");
        drop(tx);
        let _ = writer.await;
        return Ok(());
    }
    info!(%peer, user = %name, "user connected");

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        debug!(%peer, user = %name, error = %e, "websocket error");
                        break;
                    }
                    None => break,
                };
                match message {
                    Message::Binary(frame) => match Request::decode(&frame) {
                        Ok(request) => engine::handle_request(&state, &name, request),
                        Err(e) => {
                            warn!(%peer, user = %name, error = %e, "dropping malformed frame");
                        }
                    },
                    Message::Ping(payload) => {
                        let _ = tx.send(Message::Pong(payload));
                    }
                    Message::Close(_) => break,
                    _ => debug!(%peer, user = %name, "ignoring non-binary message"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    engine::disconnect(&state, &name);
    info!(%peer, user = %name, "user disconnected");
    drop(tx);
    let _ = writer.await;
    Ok(())
}

/// Drain the outbound channel into the socket. Runs until every sender is
/// dropped (the roster entry and the read loop) or the peer stops reading.
async fn write_outbound<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "outbound send failed");
            break;
        }
    }
    let _ = sink.close().await;
}

/// Check the upgrade query string and claim the name, mirroring the
/// transport-level diagnostics of the original deployment.
fn validate_upgrade(query: Option<&str>, state: &ServerState) -> Result<Name, &'static str> {
    let query = query.ok_or(BAD_QUERY)?;
    let mut params = query.split('&');
    let pair = params.next().unwrap_or_default();
    if params.next().is_some() {
        return Err(BAD_QUERY);
    }
    let value = pair.strip_prefix("name=").ok_or(BAD_QUERY)?;

    let raw = percent_decode(value.as_bytes());
    let name = Name::new(raw).map_err(|e| match e {
        NameError::Empty => EMPTY_USERNAME,
        NameError::TooLong(_) => USERNAME_TOO_LARGE,
    })?;
    if name.is_group_channel() {
        return Err(BAD_USERNAME);
    }
    if state.roster().get(&name).is_some() {
        return Err(BAD_USERNAME);
    }
    Ok(name)
}

fn reject(reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

/// Decode `%XX` escapes and `+` as space, the way the original transport
/// extracted query variables. Stray `%` sequences pass through unchanged.
fn percent_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < input.len() => match (hex_digit(input[i + 1]), hex_digit(input[i + 2]))
            {
                (Some(hi), Some(lo)) => {
                    out.push((hi << 4) | lo);
                    i += 3;
                }
                _ => {
                    out.push(input[i]);
                    i += 1;
                }
            },
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    out
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
