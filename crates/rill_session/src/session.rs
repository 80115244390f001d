//! One live connection: paired byte streams bound to a transport.
//!
//! [`Session`] is the hinge between the wire and the script. Socket tasks
//! report [`Event`]s in wire order; the session routes inbound bytes into a
//! generator the script iterates, drains script sends back out one writable
//! grant at a time, and pushes back on fast peers by pausing the receive
//! side between the configured watermarks.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use rill_core::{ByteStream, Deferred, Error, Generator, PromiseHandle, ScriptValue, promise};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::{SessionConfig, SessionHooks};
use crate::event::{CloseReason, Event};
use crate::transport::Transport;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport not yet established.
    Connecting,
    /// Open for traffic both ways.
    Open,
    /// Close requested locally; outbound chunks still flushing.
    Closing,
    /// Terminal. Nothing moves in either direction.
    Closed,
}

/// A live connection backed by a [`Transport`].
///
/// Cheap to clone; clones share one underlying session. Inbound bytes
/// surface on [`incoming`](Session::incoming); outbound chunks go through
/// [`send`](Session::send) and leave the buffer one [`Event::Writable`]
/// grant at a time.
#[derive(Clone)]
pub struct Session {
    inner: Rc<Inner>,
}

struct Inner {
    id: Uuid,
    config: SessionConfig,
    transport: Rc<dyn Transport>,
    /// Wire to script. Codec follows `config.binary`.
    inbound: Generator,
    /// Script to wire. Always binary; frames leave as raw chunks.
    outbound: Generator,
    flow: Rc<FlowControl>,
    /// Shared with send acks living in the outbound queue (a plain cell, so
    /// no reference cycle through the queue).
    state: Rc<Cell<SessionState>>,
    hooks: RefCell<SessionHooks>,
    /// Close reason waiting for the outbound buffer to flush.
    pending_close: RefCell<Option<CloseReason>>,
}

impl Session {
    pub fn new(transport: Rc<dyn Transport>, config: SessionConfig) -> Self {
        let flow = Rc::new(FlowControl::new(Rc::clone(&transport), &config));
        let inbound = Generator::with_codec(config.codec());
        Self {
            inner: Rc::new(Inner {
                id: Uuid::new_v4(),
                config,
                transport,
                inbound,
                outbound: Generator::new(),
                flow,
                state: Rc::new(Cell::new(SessionState::Connecting)),
                hooks: RefCell::new(SessionHooks::default()),
                pending_close: RefCell::new(None),
            }),
        }
    }

    /// Install lifecycle hooks, replacing any previous set.
    pub fn set_hooks(&self, hooks: SessionHooks) {
        *self.inner.hooks.borrow_mut() = hooks;
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.get()
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.get() == SessionState::Open
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// The wire-to-script stream. Every call returns a handle onto the same
    /// underlying generator, so concurrent reads queue in FIFO order.
    pub fn incoming(&self) -> ByteStream {
        ByteStream::new(self.inner.inbound.clone())
    }

    /// Queue one chunk for the wire.
    ///
    /// The returned promise resolves with the sent value once the chunk has
    /// left the outbound buffer; awaiting it paces a producer to the wire's
    /// drain rate. It rejects with [`Error::Closed`] when a close is already
    /// under way, or when the connection goes down before the chunk ever got
    /// a writable grant.
    pub fn send(&self, value: ScriptValue) -> PromiseHandle<Option<ScriptValue>> {
        if !matches!(
            self.inner.state.get(),
            SessionState::Connecting | SessionState::Open
        ) {
            return PromiseHandle::rejected(Error::Closed);
        }
        let (resolver, handle) = promise();
        let state = Rc::clone(&self.inner.state);
        let block = value.to_block();
        let ack = Deferred::new(move |_| {
            if state.get() == SessionState::Closed {
                let _ = resolver.reject(Error::Closed);
            } else {
                let _ = resolver.resolve(Some(value));
            }
        });
        match self.inner.outbound.write(block.as_bytes(), Some(ack)) {
            Ok(queued) => {
                trace!(session = %self.inner.id, bytes = queued, "outbound chunk queued");
                self.inner.transport.request_writable();
                handle
            }
            Err(error) => PromiseHandle::rejected(error),
        }
    }

    /// Ask the transport to close once queued sends have flushed.
    ///
    /// Returns false when a close is already under way. The session stays
    /// in [`SessionState::Closing`] until the transport reports
    /// [`Event::Closed`] back.
    pub fn close(&self, reason: CloseReason) -> bool {
        if matches!(
            self.inner.state.get(),
            SessionState::Closing | SessionState::Closed
        ) {
            return false;
        }
        self.inner.state.set(SessionState::Closing);
        info!(session = %self.inner.id, %reason, "close requested");
        self.inner.outbound.close();
        if self.inner.outbound.buffered_chunks() == 0 {
            self.inner.transport.close(reason);
        } else {
            *self.inner.pending_close.borrow_mut() = Some(reason);
            self.inner.transport.request_writable();
        }
        true
    }

    /// Feed one wire-side event into the session.
    ///
    /// The single entry point for transports: call it in wire order, from
    /// the bridge thread.
    pub fn handle_event(&self, event: Event) {
        match event {
            Event::Connected => self.on_connected(),
            Event::Receive(bytes) => self.on_receive(&bytes),
            Event::Writable => self.on_writable(),
            Event::Closed(reason) => self.on_closed(&reason),
            Event::Failed(message) => self.on_failed(&message),
        }
    }

    fn on_connected(&self) {
        if self.inner.state.get() != SessionState::Connecting {
            debug!(session = %self.inner.id, "ignoring duplicate connect");
            return;
        }
        self.inner.state.set(SessionState::Open);
        info!(session = %self.inner.id, "connected");
        if self.inner.outbound.buffered_chunks() > 0 {
            // Sends queued before the handshake finished.
            self.inner.transport.request_writable();
        }
        let hook = self.inner.hooks.borrow().connect.clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn on_receive(&self, bytes: &[u8]) {
        if self.inner.state.get() == SessionState::Closed {
            warn!(session = %self.inner.id, len = bytes.len(), "dropping bytes after close");
            return;
        }
        let len = bytes.len();
        self.inner.flow.received(len);
        let flow = Rc::clone(&self.inner.flow);
        // The ack fires inside `write` when a read is already waiting.
        let ack = Deferred::new(move |_| flow.consumed(len));
        match self.inner.inbound.write(bytes, Some(ack)) {
            Ok(_) => self.inner.flow.maybe_pause(),
            Err(error) => {
                self.inner.flow.consumed(len);
                warn!(
                    session = %self.inner.id,
                    %error,
                    len,
                    "dropping bytes after end of stream"
                );
            }
        }
    }

    fn on_writable(&self) {
        match self.inner.outbound.dequeue() {
            Some((value, drained)) => {
                match self.inner.transport.write(value.as_bytes()) {
                    Ok(sent) => {
                        trace!(session = %self.inner.id, bytes = sent, "flushed outbound chunk");
                    }
                    Err(error) => {
                        warn!(session = %self.inner.id, %error, "transport write failed");
                        self.on_failed(&error.to_string());
                        return;
                    }
                }
                if self.inner.outbound.buffered_chunks() > 0 {
                    self.inner.transport.request_writable();
                } else if drained {
                    self.finish_close();
                }
            }
            None => self.finish_close(),
        }
    }

    fn finish_close(&self) {
        if let Some(reason) = self.inner.pending_close.borrow_mut().take() {
            debug!(session = %self.inner.id, %reason, "outbound flushed, closing transport");
            self.inner.transport.close(reason);
        }
    }

    fn on_closed(&self, reason: &CloseReason) {
        if self.inner.state.get() == SessionState::Closed {
            debug!(session = %self.inner.id, "duplicate close event");
            return;
        }
        self.inner.state.set(SessionState::Closed);
        info!(session = %self.inner.id, %reason, "closed");
        self.inner.pending_close.borrow_mut().take();
        // Buffered inbound chunks stay readable; the stream ends after them.
        self.inner.inbound.close();
        self.inner.outbound.stop(None);
        self.discard_unsent();
        let hook = self.inner.hooks.borrow().close.clone();
        if let Some(hook) = hook {
            hook(reason);
        }
    }

    fn on_failed(&self, message: &str) {
        if self.inner.state.get() == SessionState::Closed {
            return;
        }
        self.inner.state.set(SessionState::Closed);
        warn!(session = %self.inner.id, message, "transport failed");
        self.inner.pending_close.borrow_mut().take();
        let error = Error::Upstream(message.to_string());
        self.inner.inbound.cancel(error.clone());
        self.inner.outbound.cancel(error);
        self.discard_unsent();
        let hook = self.inner.hooks.borrow().error.clone();
        if let Some(hook) = hook {
            hook(message);
        }
    }

    /// Pop outbound chunks that never got a grant, so their send promises
    /// reject now instead of hanging until the session is dropped.
    fn discard_unsent(&self) {
        while self.inner.outbound.dequeue().is_some() {}
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state.get())
            .field("inbound_buffered", &self.inner.inbound.buffered_bytes())
            .field("outbound_buffered", &self.inner.outbound.buffered_bytes())
            .finish()
    }
}

/// Receive-side backpressure between the configured watermarks.
///
/// Counts bytes the wire delivered but the script has not yet consumed.
/// Shared with the consumption acks living in the inbound queue, which is
/// why it sits behind its own `Rc` rather than on the session: an ack that
/// held the session (and through it the queue holding that ack) would keep
/// the whole session alive forever.
struct FlowControl {
    transport: Rc<dyn Transport>,
    high: usize,
    low: usize,
    unconsumed: Cell<usize>,
    paused: Cell<bool>,
}

impl FlowControl {
    fn new(transport: Rc<dyn Transport>, config: &SessionConfig) -> Self {
        Self {
            transport,
            high: config.high_watermark,
            low: config.low_watermark.min(config.high_watermark),
            unconsumed: Cell::new(0),
            paused: Cell::new(false),
        }
    }

    fn received(&self, len: usize) {
        self.unconsumed.set(self.unconsumed.get() + len);
    }

    fn maybe_pause(&self) {
        if !self.paused.get() && self.unconsumed.get() >= self.high {
            self.paused.set(true);
            trace!(buffered = self.unconsumed.get(), "pausing receive side");
            self.transport.pause_receiving(true);
        }
    }

    fn consumed(&self, len: usize) {
        self.unconsumed.set(self.unconsumed.get().saturating_sub(len));
        if self.paused.get() && self.unconsumed.get() <= self.low {
            self.paused.set(false);
            trace!(buffered = self.unconsumed.get(), "resuming receive side");
            self.transport.pause_receiving(false);
        }
    }
}
