//! WebSocket transport for computer sessions.
//!
//! Binds one [`ComputerConnection`] to one upgraded socket: a writer task
//! drains the connection's outbound queue into the socket, and the reader
//! loop feeds every inbound text message through the [`MessageRouter`].
//! When either side stops, the session is released from the registry and
//! its pending jobs fail.

use crate::server::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use nerv_types::config::LOOPBACK_IPS;
use nerv_wire::message::encode_frame;
use nerv_wire::{ComputerConnection, Dispatch, MessageRouter, Outbound, OutboundFrame};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Error frame message for a peer outside the allow-list.
pub const BAD_IP: &str = "Bad IP";

/// Source addresses permitted to open a computer session.
///
/// Loopback addresses are always allowed. Entries that parse as IP addresses
/// are compared in canonical form, so `::ffff:10.0.0.2` and `10.0.0.2` match
/// each other. Other entries are compared case-insensitively as text.
#[derive(Debug, Clone)]
pub struct IpAllowList {
    entries: HashSet<String>,
}

impl IpAllowList {
    /// Allow `entries` plus the loopback addresses.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let loopbacks = LOOPBACK_IPS.iter().map(|ip| ip.to_string());
        Self::exact(entries.into_iter().map(|e| e.as_ref().to_string()).chain(loopbacks))
    }

    /// Allow exactly `entries`, without the implicit loopback addresses.
    pub fn exact<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|e| canonical_entry(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        Self { entries }
    }

    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        self.entries.contains(&ip.to_canonical().to_string().to_lowercase())
    }

    /// Allowed entries, sorted.
    pub fn entries(&self) -> Vec<&str> {
        let mut entries: Vec<&str> = self.entries.iter().map(String::as_str).collect();
        entries.sort_unstable();
        entries
    }
}

fn canonical_entry(entry: &str) -> String {
    let entry = entry.trim();
    match entry.parse::<IpAddr>() {
        Ok(ip) => ip.to_canonical().to_string().to_lowercase(),
        Err(_) => entry.to_lowercase(),
    }
}

/// `GET /ws`: upgrade and run a computer session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, remote_addr, state))
}

async fn handle_socket(mut socket: WebSocket, remote_addr: SocketAddr, state: AppState) {
    info!(remote_addr = %remote_addr, "Received computer connection");

    if !state.allow_list.is_allowed(remote_addr.ip()) {
        warn!(remote_addr = %remote_addr, "Connection from disallowed IP. Disconnecting.");
        reject(&mut socket, BAD_IP).await;
        return;
    }

    let (connection, outbound_rx) = ComputerConnection::new(remote_addr);
    let (sink, stream) = socket.split();

    let mut writer = tokio::spawn(write_loop(sink, outbound_rx));
    let keepalive = state.keepalive.spawn(Arc::clone(&connection));

    let reader_finished = tokio::select! {
        _ = &mut writer => false,
        _ = read_loop(stream, &connection, &state.router) => true,
    };
    if reader_finished {
        // Anything already queued (an error frame and close) still goes out.
        connection.terminate();
        let _ = writer.await;
    }

    keepalive.abort();
    connection.release(state.router.registry());
    info!(
        remote_addr = %remote_addr,
        label = connection.label().unwrap_or_default(),
        "Computer connection closed"
    );
}

/// Send an `error` frame and close, for sessions refused before they start.
async fn reject(socket: &mut WebSocket, message: &str) {
    let frame = OutboundFrame::Error {
        message: message.to_string(),
    };
    if let Ok(text) = encode_frame(&frame) {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        let sent = match item {
            Outbound::Text(text) => sink.send(Message::Text(text.into())).await,
            Outbound::Ping => sink.send(Message::Ping(Vec::new().into())).await,
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            Outbound::Terminate => break,
        };
        if let Err(e) = sent {
            debug!(error = %e, "Socket write failed");
            break;
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    connection: &Arc<ComputerConnection>,
    router: &MessageRouter,
) {
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!(remote_addr = %connection.remote_addr(), error = %e, "Socket read failed");
                break;
            }
        };
        let dispatch = match message {
            Message::Text(text) => router.dispatch(connection, text.as_str()),
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => router.dispatch(connection, text),
                Err(_) => {
                    error!(
                        remote_addr = %connection.remote_addr(),
                        "Binary message is not UTF-8. Disconnecting for safety."
                    );
                    connection.close();
                    Dispatch::Closed
                }
            },
            Message::Pong(_) => {
                connection.mark_alive();
                Dispatch::Continue
            }
            // axum answers pings itself.
            Message::Ping(_) => Dispatch::Continue,
            Message::Close(_) => break,
        };
        if dispatch == Dispatch::Closed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_always_allowed() {
        let list = IpAllowList::new(Vec::<String>::new());
        assert!(list.is_allowed("127.0.0.1".parse().unwrap()));
        assert!(list.is_allowed("::1".parse().unwrap()));
        assert!(!list.is_allowed("10.0.0.2".parse().unwrap()));
    }

    #[test]
    fn test_exact_list_omits_loopback() {
        let list = IpAllowList::exact(["10.0.0.2"]);
        assert!(list.is_allowed("10.0.0.2".parse().unwrap()));
        assert!(!list.is_allowed("127.0.0.1".parse().unwrap()));
        assert!(!list.is_allowed("::1".parse().unwrap()));
        assert_eq!(list.entries(), vec!["10.0.0.2"]);
    }

    #[test]
    fn test_mapped_ipv4_matches_plain_entry() {
        let list = IpAllowList::new(["10.0.0.2"]);
        assert!(list.is_allowed("::ffff:10.0.0.2".parse().unwrap()));
        assert!(list.is_allowed("10.0.0.2".parse().unwrap()));
        assert!(list.is_allowed("::ffff:127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_entries_are_normalised() {
        let list = IpAllowList::new([" FE80::1 ", "::ffff:192.168.1.4", ""]);
        assert!(list.is_allowed("fe80::1".parse().unwrap()));
        assert!(list.is_allowed("192.168.1.4".parse().unwrap()));
        assert_eq!(
            list.entries(),
            vec!["127.0.0.1", "192.168.1.4", "::1", "fe80::1"]
        );
    }
}
