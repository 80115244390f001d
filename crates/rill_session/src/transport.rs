//! The wire side of a session.

use std::cell::{Cell, RefCell};

use crate::{CloseReason, Result, SessionError};

/// Callback surface a session drives in response to script activity.
///
/// Implementations forward these calls to whatever owns the socket: the
/// WebSocket tasks in `rill_ws`, an embedder's own I/O loop, or the
/// [`MockTransport`] below. Methods take `&self` because the session holds
/// its transport behind an `Rc`.
pub trait Transport {
    /// Hand one outbound chunk to the wire. The transport either accepts
    /// the whole chunk or fails; partial delivery is its own business.
    ///
    /// # Errors
    ///
    /// Fails when the wire rejects the chunk; the session treats the
    /// first failure as fatal.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Ask to be told, via [`Event::Writable`](crate::Event::Writable),
    /// when another chunk can go out.
    fn request_writable(&self);

    /// Stop or resume pulling frames off the wire. Frames already in
    /// flight may still be delivered.
    fn pause_receiving(&self, paused: bool);

    /// Start the close handshake.
    fn close(&self, reason: CloseReason);
}

/// In-memory [`Transport`] that records everything the session asks of it.
///
/// Used by this crate's own tests and by embedders that drive sessions
/// without a socket: feed events in with `Session::handle_event`, read the
/// session's reactions back out of here.
#[derive(Debug, Default)]
pub struct MockTransport {
    written: RefCell<Vec<Vec<u8>>>,
    writable_requests: Cell<usize>,
    pause_calls: RefCell<Vec<bool>>,
    closed: RefCell<Option<CloseReason>>,
    fail_writes: Cell<bool>,
}

impl MockTransport {
    /// Make every subsequent `write` fail.
    pub fn fail_writes(&self) {
        self.fail_writes.set(true);
    }

    /// Chunks written so far, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.borrow().clone()
    }

    /// How many times the session asked for a writable notification.
    pub fn writable_requests(&self) -> usize {
        self.writable_requests.get()
    }

    /// Every `pause_receiving` argument, in call order.
    pub fn pause_calls(&self) -> Vec<bool> {
        self.pause_calls.borrow().clone()
    }

    /// Whether the receive side is currently paused.
    pub fn is_paused(&self) -> bool {
        self.pause_calls.borrow().last().copied().unwrap_or(false)
    }

    /// The reason passed to `close`, if the session closed the transport.
    pub fn closed_with(&self) -> Option<CloseReason> {
        self.closed.borrow().clone()
    }
}

impl Transport for MockTransport {
    fn write(&self, data: &[u8]) -> Result<usize> {
        if self.fail_writes.get() {
            return Err(SessionError::Transport("mock write failure".into()));
        }
        self.written.borrow_mut().push(data.to_vec());
        Ok(data.len())
    }

    fn request_writable(&self) {
        self.writable_requests.set(self.writable_requests.get() + 1);
    }

    fn pause_receiving(&self, paused: bool) {
        self.pause_calls.borrow_mut().push(paused);
    }

    fn close(&self, reason: CloseReason) {
        *self.closed.borrow_mut() = Some(reason);
    }
}
