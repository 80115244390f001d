//! FIFO byte-chunk buffering with completion and latest-value modes.

use std::collections::VecDeque;

use tracing::trace;

use crate::block::Block;
use crate::deferred::Deferred;
use crate::value::ScriptValue;
use crate::{Error, Result};

/// One buffered chunk plus its consumption acknowledgment.
#[derive(Debug)]
pub struct QueueItem {
    block: Block,
    unref: Option<Deferred>,
}

impl QueueItem {
    fn new(block: Block, unref: Option<Deferred>) -> Self {
        Self { block, unref }
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Attach (or replace) the consumption acknowledgment.
    pub fn set_unref(&mut self, unref: Option<Deferred>) {
        self.unref = unref;
    }

    /// Detach the acknowledgment, leaving the item inert.
    pub fn take_unref(&mut self) -> Option<Deferred> {
        self.unref.take()
    }

    /// Split into the chunk and its acknowledgment.
    pub fn into_parts(self) -> (Block, Option<Deferred>) {
        (self.block, self.unref)
    }

    /// Fire the acknowledgment with this item's own bytes.
    fn acknowledge(self) {
        let (block, unref) = self.into_parts();
        if let Some(unref) = unref {
            unref.invoke(ScriptValue::Binary(block));
        }
    }
}

/// FIFO of byte chunks with `complete` and `continuous` flags.
///
/// `complete` means no further item will ever be appended; it never clears.
/// `continuous` is latest-value mode: a new item supersedes the previous
/// unconsumed one, which still gets acknowledged (with its own value) as it
/// is evicted. The flag only transitions false to true.
#[derive(Debug, Default)]
pub struct Queue {
    items: VecDeque<QueueItem>,
    bytes: usize,
    complete: bool,
    continuous: bool,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk, attaching `unref` as its consumption acknowledgment.
    ///
    /// In continuous mode the returned item is the superseded predecessor;
    /// the caller must fire its acknowledgment once its own state mutation
    /// is finished (acknowledgments run arbitrary code and may re-enter).
    ///
    /// # Errors
    ///
    /// Rejects with [`Error::Closed`] once the queue is closed.
    pub fn put(&mut self, block: Block, unref: Option<Deferred>) -> Result<Option<QueueItem>> {
        if self.complete {
            return Err(Error::Closed);
        }

        let superseded = if self.continuous {
            let evicted = self.items.pop_back();
            if let Some(item) = &evicted {
                self.bytes -= item.block.len();
                trace!(evicted = item.block.len(), "superseding buffered chunk");
            }
            evicted
        } else {
            None
        };

        self.bytes += block.len();
        self.items.push_back(QueueItem::new(block, unref));
        Ok(superseded)
    }

    /// Pop the oldest chunk.
    ///
    /// The flag is true when this pop drained a complete queue, meaning the
    /// stream just delivered its final chunk. `None` alone does not signal
    /// end-of-stream; callers distinguish "exhausted and complete" from
    /// "more coming" via [`Queue::is_complete`].
    pub fn next(&mut self) -> Option<(QueueItem, bool)> {
        let item = self.items.pop_front()?;
        self.bytes -= item.block.len();
        let drained = self.items.is_empty() && self.complete;
        Some((item, drained))
    }

    /// Mark the queue complete.
    ///
    /// Returns the final still-resident item, if any, for continuous-mode
    /// finalization. The item is not removed.
    pub fn close(&mut self) -> Option<&mut QueueItem> {
        self.complete = true;
        self.items.back_mut()
    }

    /// Switch to latest-value mode (one-way).
    ///
    /// Returns the current last item so a sink acknowledgment can be
    /// attached to it.
    pub fn set_continuous(&mut self) -> Option<&mut QueueItem> {
        self.continuous = true;
        self.items.back_mut()
    }

    pub fn last_mut(&mut self) -> Option<&mut QueueItem> {
        self.items.back_mut()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_continuous(&self) -> bool {
        self.continuous
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Total buffered payload, the quantity watermark flow control tracks.
    pub fn byte_len(&self) -> usize {
        self.bytes
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        // Unconsumed acknowledgments still fire on teardown so producers are
        // not left paused waiting for a consumption that will never happen.
        for item in self.items.drain(..) {
            item.acknowledge();
        }
    }
}
