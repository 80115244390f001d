//! Dialing side: sessions backed by a tokio-tungstenite socket.

use std::rc::Rc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use url::Url;

use rill_session::{CloseReason, Event, Session, SessionConfig};

use crate::runtime::{BridgeGone, BridgeRuntime};
use crate::transport::{WireCommand, WsTransport, spawn_event_loop};

/// Errors from [`connect`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The URL did not parse or is not a `ws`/`wss` target.
    #[error("invalid websocket url: {0}")]
    InvalidUrl(String),
    /// TCP or the WebSocket upgrade failed.
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Bridge(#[from] BridgeGone),
}

/// Dial `url` and run the connection's session on the bridge.
///
/// Resolves once the handshake finishes. `on_session` runs on the bridge
/// thread with the new session before any wire event is delivered: the
/// place to install hooks and start reading. The session itself never
/// leaves the bridge thread.
///
/// # Errors
///
/// Fails when the URL is not a `ws`/`wss` target, the handshake is
/// refused, or the bridge thread has stopped.
pub async fn connect<F>(
    bridge: &BridgeRuntime,
    url: &str,
    config: SessionConfig,
    on_session: F,
) -> Result<(), ConnectError>
where
    F: FnOnce(Session) + Send + 'static,
{
    let target = Url::parse(url).map_err(|error| ConnectError::InvalidUrl(error.to_string()))?;
    if !matches!(target.scheme(), "ws" | "wss") {
        return Err(ConnectError::InvalidUrl(format!(
            "unsupported scheme {}",
            target.scheme()
        )));
    }

    let (ready_tx, ready_rx) = oneshot::channel();
    let request = target.to_string();
    bridge.run(move || {
        tokio::task::spawn_local(async move {
            let socket = match connect_async(&request).await {
                Ok((socket, _response)) => socket,
                Err(error) => {
                    let _ = ready_tx.send(Err(ConnectError::Handshake(error.to_string())));
                    return;
                }
            };
            debug!(url = request, "websocket connected");

            let binary = config.binary;
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            let session = Session::new(Rc::new(WsTransport::new(command_tx)), config);
            on_session(session.clone());
            spawn_event_loop(session, event_rx);
            let _ = event_tx.send(Event::Connected);
            let _ = ready_tx.send(Ok(()));

            pump_socket(socket, event_tx, command_rx, binary).await;
        });
    })?;

    ready_rx.await.map_err(|_| BridgeGone)?
}

/// Client twin of the server-side pump, speaking tungstenite's message
/// type instead of axum's.
async fn pump_socket(
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    events: mpsc::UnboundedSender<Event>,
    mut commands: mpsc::UnboundedReceiver<WireCommand>,
    binary: bool,
) {
    let (mut sink, mut stream) = socket.split();
    let mut paused = false;
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(WireCommand::Write(data)) => {
                    let message = if binary {
                        Message::Binary(data.into())
                    } else {
                        Message::Text(String::from_utf8_lossy(&data).into_owned().into())
                    };
                    if let Err(error) = sink.send(message).await {
                        let _ = events.send(Event::Failed(error.to_string()));
                        break;
                    }
                }
                Some(WireCommand::RequestWritable) => {
                    let _ = events.send(Event::Writable);
                }
                Some(WireCommand::Pause(value)) => paused = value,
                Some(WireCommand::Close(reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(reason.code),
                        reason: reason.reason.clone().into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    let _ = events.send(Event::Closed(reason));
                    break;
                }
                None => break,
            },
            message = stream.next(), if !paused => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(Event::Receive(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send(Event::Receive(data.to_vec()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map_or_else(CloseReason::no_status, |frame| {
                        CloseReason::new(frame.code.into(), frame.reason.to_string())
                    });
                    let _ = events.send(Event::Closed(reason));
                    break;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(error)) => {
                    let _ = events.send(Event::Failed(error.to_string()));
                    break;
                }
                None => {
                    let _ = events.send(Event::Closed(CloseReason::abnormal()));
                    break;
                }
            },
        }
    }
    debug!("websocket pump finished");
}
