//! The pull side: pending read requests matched against pushed values.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::Error;
use crate::promise::{PromiseHandle, Resolver, promise};
use crate::value::{IterResult, ScriptValue};

/// Lifecycle of the read side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IterState {
    /// No pending reads.
    Idle,
    /// At least one read waiting for a value.
    Reading,
    /// Terminal; every further read settles immediately.
    Stopped,
}

enum Terminal {
    Done(Option<ScriptValue>),
    Failed(Error),
}

struct AsyncRead {
    id: u64,
    resolver: Resolver<IterResult>,
}

/// Ordered list of pending `next()` calls.
///
/// Strictly FIFO: the Nth registered read is matched to the Nth available
/// value, no matter how reads and values interleave. Once stopped or
/// cancelled the outcome is sticky and re-delivered to every late reader.
#[derive(Default)]
pub struct AsyncIterator {
    reads: VecDeque<AsyncRead>,
    terminal: Option<Terminal>,
    next_id: u64,
}

impl AsyncIterator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> IterState {
        if self.terminal.is_some() {
            IterState::Stopped
        } else if self.reads.is_empty() {
            IterState::Idle
        } else {
            IterState::Reading
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.reads.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.reads.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    /// Register one read.
    ///
    /// If the iterator already ended the promise settles immediately with
    /// the sticky terminal outcome and nothing is enqueued, so speculative
    /// reads after the end are harmless.
    pub fn next(&mut self) -> PromiseHandle<IterResult> {
        match &self.terminal {
            Some(Terminal::Done(final_value)) => {
                PromiseHandle::resolved(IterResult::end(final_value.clone()))
            }
            Some(Terminal::Failed(error)) => PromiseHandle::rejected(error.clone()),
            None => {
                let (resolver, handle) = promise();
                let id = self.next_id;
                self.next_id += 1;
                trace!(id, pending = self.reads.len() + 1, "read registered");
                self.reads.push_back(AsyncRead { id, resolver });
                handle
            }
        }
    }

    /// Hand `value` to the oldest pending read.
    ///
    /// Returns false when nothing is pending (the caller must buffer the
    /// value itself) or the iterator already ended.
    pub fn yield_value(&mut self, value: ScriptValue) -> bool {
        if self.terminal.is_some() {
            return false;
        }
        match self.reads.pop_front() {
            Some(read) => {
                trace!(id = read.id, "read satisfied");
                read.resolver.resolve(IterResult::value(value));
                true
            }
            None => false,
        }
    }

    /// End the stream, resolving every pending read, oldest first, with
    /// `{final_value, done: true}`.
    ///
    /// Returns true only on the transition.
    pub fn stop(&mut self, final_value: Option<ScriptValue>) -> bool {
        if self.terminal.is_some() {
            return false;
        }
        debug!(pending = self.reads.len(), "iterator stopping");
        for read in self.reads.drain(..) {
            read.resolver.resolve(IterResult::end(final_value.clone()));
        }
        self.terminal = Some(Terminal::Done(final_value));
        true
    }

    /// Fail the stream, rejecting every pending read with `error`.
    ///
    /// Reads registered afterwards reject immediately with the same error.
    /// Returns true only on the transition.
    pub fn cancel(&mut self, error: Error) -> bool {
        if self.terminal.is_some() {
            return false;
        }
        debug!(pending = self.reads.len(), %error, "iterator cancelled");
        for read in self.reads.drain(..) {
            read.resolver.reject(error.clone());
        }
        self.terminal = Some(Terminal::Failed(error));
        true
    }

    /// Teardown: discard every pending read.
    ///
    /// Dropping a read's resolver rejects its promise as destroyed, so no
    /// consumer is left hanging.
    pub fn clear(&mut self) {
        self.reads.clear();
    }
}
