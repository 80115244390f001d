//! Command channel between sessions on the bridge thread and socket tasks.
//!
//! A session calls its [`Transport`] synchronously, but the socket it
//! ultimately drives lives in another task and usually another thread.
//! [`WsTransport`] bridges the gap by forwarding each call as a
//! [`WireCommand`] over an unbounded channel; events flow back the other
//! way, and [`spawn_event_loop`] feeds them into the session in wire
//! order.

use tokio::sync::mpsc;
use tracing::trace;

use rill_session::{CloseReason, Event, Session, SessionError, Transport};

/// One session-to-socket instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireCommand {
    /// Send one frame holding these bytes.
    Write(Vec<u8>),
    /// Answer with [`Event::Writable`] once the sink is free.
    RequestWritable,
    /// Stop (true) or resume (false) reading frames off the socket.
    Pause(bool),
    /// Start the close handshake.
    Close(CloseReason),
}

/// The [`Transport`] half living on the bridge thread.
pub struct WsTransport {
    commands: mpsc::UnboundedSender<WireCommand>,
}

impl WsTransport {
    pub fn new(commands: mpsc::UnboundedSender<WireCommand>) -> Self {
        Self { commands }
    }

    fn forward(&self, command: WireCommand) {
        if self.commands.send(command).is_err() {
            // Socket task already exited; nothing left to instruct.
            trace!("wire command dropped, socket task is gone");
        }
    }
}

impl Transport for WsTransport {
    fn write(&self, data: &[u8]) -> rill_session::Result<usize> {
        self.commands
            .send(WireCommand::Write(data.to_vec()))
            .map_err(|_| SessionError::Transport("socket task is gone".into()))?;
        Ok(data.len())
    }

    fn request_writable(&self) {
        self.forward(WireCommand::RequestWritable);
    }

    fn pause_receiving(&self, paused: bool) {
        self.forward(WireCommand::Pause(paused));
    }

    fn close(&self, reason: CloseReason) {
        self.forward(WireCommand::Close(reason));
    }
}

/// Bridge-side ends of one connection's channel pair, handed over by the
/// socket task that created them.
pub(crate) struct SocketLink {
    pub(crate) events: mpsc::UnboundedReceiver<Event>,
    pub(crate) commands: mpsc::UnboundedSender<WireCommand>,
}

/// Spawn the local task that feeds wire events into `session`.
///
/// The loop ends at the first terminal event; events sent after it are
/// dropped with the channel.
pub(crate) fn spawn_event_loop(session: Session, mut events: mpsc::UnboundedReceiver<Event>) {
    tokio::task::spawn_local(async move {
        while let Some(event) = events.recv().await {
            let terminal = matches!(event, Event::Closed(_) | Event::Failed(_));
            session.handle_event(event);
            if terminal {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use rill_core::ScriptValue;
    use rill_session::SessionConfig;

    #[test]
    fn transport_calls_become_commands() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = WsTransport::new(tx);

        assert_eq!(transport.write(b"abc").unwrap(), 3);
        transport.request_writable();
        transport.pause_receiving(true);
        transport.close(CloseReason::normal());

        assert_eq!(rx.try_recv().unwrap(), WireCommand::Write(b"abc".to_vec()));
        assert_eq!(rx.try_recv().unwrap(), WireCommand::RequestWritable);
        assert_eq!(rx.try_recv().unwrap(), WireCommand::Pause(true));
        assert_eq!(
            rx.try_recv().unwrap(),
            WireCommand::Close(CloseReason::normal())
        );
    }

    #[test]
    fn writes_fail_once_the_socket_task_is_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let transport = WsTransport::new(tx);
        assert!(transport.write(b"abc").is_err());
        // The fire-and-forget calls just drop.
        transport.request_writable();
        transport.close(CloseReason::normal());
    }

    #[tokio::test]
    async fn event_loop_feeds_the_session() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (command_tx, _command_rx) = mpsc::unbounded_channel();
                let session = Session::new(
                    Rc::new(WsTransport::new(command_tx)),
                    SessionConfig::default(),
                );
                let (event_tx, event_rx) = mpsc::unbounded_channel();
                spawn_event_loop(session.clone(), event_rx);

                event_tx.send(Event::Connected).unwrap();
                event_tx.send(Event::Receive(b"ping".to_vec())).unwrap();

                let step = session.incoming().next(None).await.unwrap();
                assert_eq!(step.value, Some(ScriptValue::text("ping")));
                assert!(session.is_open());

                event_tx.send(Event::Closed(CloseReason::normal())).unwrap();
                assert!(session.incoming().next(None).await.unwrap().done);
                // Terminal event ended the loop and dropped its receiver.
                assert!(event_tx.send(Event::Writable).is_err());
            })
            .await;
    }
}
