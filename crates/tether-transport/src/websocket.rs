//! WebSocket transport over `tokio-tungstenite`.
//!
//! Each [`WsConnection`] owns a handler task that multiplexes outbound frames
//! and inbound messages on one socket. Inbound text frames are fanned out on a
//! broadcast channel. When the socket ends without a local close the
//! connection's [`CloseSignal`] fires.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tether_core::ConnectionId;
use tether_settings::TransportSettings;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use crate::connection::{CloseSignal, Connection, ConnectionRef, Transport};
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build the socket URL for a hostname.
///
/// A value that already carries a scheme (`ws://`, `wss://`) is used as-is.
/// Otherwise `wss://<hostname><path>` (or `ws://` when `secure` is off).
pub fn endpoint_url(hostname: &str, settings: &TransportSettings) -> Result<String, TransportError> {
    let host = hostname.trim();
    if host.is_empty() {
        return Err(TransportError::InvalidEndpoint {
            target: hostname.to_string(),
            reason: "empty hostname".into(),
        });
    }
    if host.contains("://") {
        return Ok(host.to_string());
    }
    let scheme = if settings.secure { "wss" } else { "ws" };
    let path = settings.path.trim_start_matches('/');
    Ok(format!("{scheme}://{}/{path}", host.trim_end_matches('/')))
}

/// Opens [`WsConnection`]s.
#[derive(Clone, Debug)]
pub struct WsTransport {
    settings: TransportSettings,
}

impl WsTransport {
    /// Create a transport with the given settings.
    pub fn new(settings: TransportSettings) -> Self {
        install_crypto_provider();
        Self { settings }
    }
}

impl Default for WsTransport {
    /// Transport configured from the global [`tether_settings::get_settings`].
    fn default() -> Self {
        Self::new(tether_settings::get_settings().transport.clone())
    }
}

/// Make sure rustls has a process-wide crypto provider before the first
/// `wss://` handshake.
#[cfg(feature = "tls")]
fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        // another thread may have won the race
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
}

#[cfg(not(feature = "tls"))]
fn install_crypto_provider() {}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, hostname: &str) -> Result<ConnectionRef, TransportError> {
        let url = endpoint_url(hostname, &self.settings)?;
        debug!(%url, "opening websocket");
        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect {
                target: url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Arc::new(WsConnection::spawn(ws, url, &self.settings)))
    }
}

enum Outbound {
    Text(String),
    Close,
}

/// A live WebSocket connection.
pub struct WsConnection {
    id: ConnectionId,
    url: String,
    outbound: mpsc::Sender<Outbound>,
    connected: Arc<AtomicBool>,
    close_signal: CloseSignal,
    inbound: broadcast::Sender<Arc<str>>,
    _handler: JoinHandle<()>,
}

impl WsConnection {
    fn spawn(ws: WsStream, url: String, settings: &TransportSettings) -> Self {
        let id = ConnectionId::new();
        let (outbound, outbound_rx) = mpsc::channel(settings.send_queue);
        let (inbound, _) = broadcast::channel(settings.inbound_buffer);
        let connected = Arc::new(AtomicBool::new(true));
        let close_signal = CloseSignal::new();

        let handler = tokio::spawn(handler_loop(
            ws,
            outbound_rx,
            HandlerState {
                id: id.clone(),
                connected: Arc::clone(&connected),
                close_signal: close_signal.clone(),
                inbound: inbound.clone(),
            },
        ));

        Self {
            id,
            url,
            outbound,
            connected,
            close_signal,
            inbound,
            _handler: handler,
        }
    }

    /// URL this connection was opened against.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(Outbound::Text(text))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        self.close_signal.mark_local();
        // the handler may already be gone
        let _ = self.outbound.send(Outbound::Close).await;
        self.connected.store(false, Ordering::Release);
    }

    fn on_unsolicited_close(&self) -> BoxFuture<'static, ()> {
        self.close_signal.wait()
    }

    fn inbound(&self) -> broadcast::Receiver<Arc<str>> {
        self.inbound.subscribe()
    }
}

struct HandlerState {
    id: ConnectionId,
    connected: Arc<AtomicBool>,
    close_signal: CloseSignal,
    inbound: broadcast::Sender<Arc<str>>,
}

async fn handler_loop(ws: WsStream, mut outbound_rx: mpsc::Receiver<Outbound>, state: HandlerState) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            cmd = outbound_rx.recv() => {
                match cmd {
                    Some(Outbound::Text(text)) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        let _ = ws_tx.close().await;
                        break;
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        // no receivers is fine
                        let _ = state.inbound.send(Arc::from(text.as_str()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(connection_id = %state.id, ?frame, "close frame received");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(connection_id = %state.id, error = %e, "websocket read failed");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.connected.store(false, Ordering::Release);
    if state.close_signal.link_dropped() {
        info!(connection_id = %state.id, "connection closed by remote");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn settings(secure: bool) -> TransportSettings {
        TransportSettings {
            secure,
            ..TransportSettings::default()
        }
    }

    #[test]
    fn bare_hostname_gets_secure_url() {
        let url = endpoint_url("chat.example.com", &settings(true)).unwrap();
        assert_eq!(url, "wss://chat.example.com/websocket");
    }

    #[test]
    fn insecure_setting_uses_ws() {
        let url = endpoint_url("127.0.0.1:3000", &settings(false)).unwrap();
        assert_eq!(url, "ws://127.0.0.1:3000/websocket");
    }

    #[test]
    fn full_url_passes_through() {
        let url = endpoint_url("ws://localhost:9000/custom", &settings(true)).unwrap();
        assert_eq!(url, "ws://localhost:9000/custom");
    }

    #[test]
    fn trailing_slash_and_whitespace_trimmed() {
        let url = endpoint_url("  chat.example.com/ ", &settings(true)).unwrap();
        assert_eq!(url, "wss://chat.example.com/websocket");
    }

    #[test]
    fn empty_hostname_rejected() {
        assert_matches!(
            endpoint_url("   ", &settings(true)),
            Err(TransportError::InvalidEndpoint { .. })
        );
    }

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        // bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = WsTransport::new(settings(false));
        let result = transport.open(&format!("127.0.0.1:{port}")).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
