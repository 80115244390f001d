//! Axum WebSocket listener feeding sessions to the bridge thread.

use std::net::SocketAddr;
use std::rc::Rc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use rill_session::{CloseReason, Event, Session, SessionConfig};

use crate::runtime::{BridgeGone, BridgeRuntime};
use crate::transport::{SocketLink, WireCommand, WsTransport, spawn_event_loop};

/// Where and how a server listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Bind address, `host:port`. Port 0 picks a free one.
    #[serde(default = "default_addr")]
    pub addr: String,
    /// URL path answering WebSocket upgrades. Must start with `/`.
    #[serde(default = "default_path")]
    pub path: String,
    /// Options applied to every accepted session.
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_addr() -> String {
    "127.0.0.1:0".into()
}

fn default_path() -> String {
    "/ws".into()
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            path: default_path(),
            session: SessionConfig::default(),
        }
    }
}

/// Errors from [`WsServer::serve`].
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Bridge(#[from] BridgeGone),
}

/// A WebSocket listener whose sessions live on the bridge thread.
pub struct WsServer {
    config: ListenerConfig,
}

impl WsServer {
    pub fn new(config: ListenerConfig) -> Self {
        Self { config }
    }

    /// Bind the listener and start serving on `bridge`.
    ///
    /// `on_session` runs on the bridge thread once per accepted connection,
    /// before any wire event is delivered: the place to install hooks and
    /// start consuming the incoming stream.
    ///
    /// # Errors
    ///
    /// Fails when the address cannot be bound or the bridge thread has
    /// stopped.
    pub async fn serve<F>(
        self,
        bridge: &BridgeRuntime,
        on_session: F,
    ) -> Result<WsServerHandle, ServeError>
    where
        F: FnMut(Session) + Send + 'static,
    {
        let ListenerConfig {
            addr,
            path,
            session,
        } = self.config;
        let binary = session.binary;
        let endpoint = path.clone();
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        bridge.run(move || {
            tokio::task::spawn_local(accept_loop(intake_rx, session, on_session));
            tokio::task::spawn_local(serve_on(
                addr,
                path,
                binary,
                intake_tx,
                ready_tx,
                shutdown_rx,
            ));
        })?;

        let local_addr = ready_rx.await.map_err(|_| BridgeGone)??;
        Ok(WsServerHandle {
            local_addr,
            path: endpoint,
            shutdown: Some(shutdown_tx),
        })
    }
}

/// A running server: its resolved address plus the shutdown trigger.
///
/// Dropping the handle also stops the server.
#[derive(Debug)]
pub struct WsServerHandle {
    local_addr: SocketAddr,
    path: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl WsServerHandle {
    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws://` URL of the upgrade endpoint.
    pub fn url(&self) -> String {
        format!("ws://{}{}", self.local_addr, self.path)
    }

    /// Stop accepting connections; in-flight upgrades finish on their own.
    pub fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Turn every handed-over socket into a session and start its event loop.
async fn accept_loop<F>(
    mut intake: mpsc::UnboundedReceiver<SocketLink>,
    config: SessionConfig,
    mut on_session: F,
) where
    F: FnMut(Session),
{
    while let Some(link) = intake.recv().await {
        let transport = Rc::new(WsTransport::new(link.commands));
        let session = Session::new(transport, config.clone());
        debug!(session = %session.id(), "accepted websocket session");
        on_session(session.clone());
        spawn_event_loop(session, link.events);
    }
}

async fn serve_on(
    addr: String,
    path: String,
    binary: bool,
    intake: mpsc::UnboundedSender<SocketLink>,
    ready: oneshot::Sender<Result<SocketAddr, ServeError>>,
    shutdown: oneshot::Receiver<()>,
) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(source) => {
            let _ = ready.send(Err(ServeError::Bind { addr, source }));
            return;
        }
    };
    let local_addr = match listener.local_addr() {
        Ok(local_addr) => local_addr,
        Err(source) => {
            let _ = ready.send(Err(ServeError::Bind { addr, source }));
            return;
        }
    };

    let state = ServerState { intake, binary };
    let app = Router::new()
        .route(&path, get(ws_endpoint))
        .with_state(state);
    info!(%local_addr, path, "websocket server listening");
    let _ = ready.send(Ok(local_addr));

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = shutdown.await;
    });
    if let Err(error) = server.await {
        error!(%error, "websocket server stopped");
    }
}

#[derive(Clone)]
struct ServerState {
    intake: mpsc::UnboundedSender<SocketLink>,
    binary: bool,
}

async fn ws_endpoint(State(state): State<ServerState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_connection(socket, state))
}

async fn run_connection(socket: WebSocket, state: ServerState) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let link = SocketLink {
        events: event_rx,
        commands: command_tx,
    };
    if state.intake.send(link).is_err() {
        warn!("bridge is gone, refusing websocket connection");
        return;
    }
    let _ = event_tx.send(Event::Connected);
    pump_socket(socket, event_tx, command_rx, state.binary).await;
}

/// Drive one socket: commands out of the session, events back in.
///
/// `RequestWritable` grants come straight back as [`Event::Writable`]:
/// commands run one at a time and every `Write` awaits the sink flush
/// before the next command, so a grant means the sink really is free.
async fn pump_socket(
    socket: WebSocket,
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
                        code: reason.code,
                        reason: reason.reason.clone().into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    let _ = events.send(Event::Closed(reason));
                    break;
                }
                // Session side is gone; tear the socket down with it.
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
                        CloseReason::new(frame.code, frame.reason.to_string())
                    });
                    let _ = events.send(Event::Closed(reason));
                    break;
                }
                // Axum answers pings on its own.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
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
