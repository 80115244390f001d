//! The byte-stream bridge: a push-fed, pull-consumed chunk generator.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::block::Block;
use crate::deferred::{Deferred, Sink};
use crate::iterator::AsyncIterator;
use crate::promise::{PromiseHandle, Resolver, promise};
use crate::queue::{Queue, QueueItem};
use crate::value::{IterResult, ScriptValue, ValueCodec};
use crate::{Error, Result};

/// One-shot startup action, run lazily when the first pull arrives.
///
/// The action may return a promise of the stream's startup outcome (for
/// example "the connection opened"); [`Generator::throw`] routes errors
/// raised before consumption began through that promise.
type Executor = Box<dyn FnOnce() -> Option<PromiseHandle<IterResult>>>;

/// Flow accounting, monotonically non-decreasing. Diagnostics only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeneratorCounters {
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub chunks_written: u64,
    pub chunks_read: u64,
}

#[derive(Default)]
struct Inner {
    /// Created on first buffering need, not at construction.
    queue: Option<Queue>,
    iterator: AsyncIterator,
    executor: Option<Executor>,
    /// In-flight startup promise, present once the executor ran and handed
    /// one back.
    startup: Option<PromiseHandle<IterResult>>,
    /// Continuous-mode sink, armed via [`Generator::continuous`].
    sink: Option<Sink>,
    /// Drain signal of the most recent `push`; resolved by the next pull.
    push_ack: Option<Resolver<Option<ScriptValue>>>,
    codec: ValueCodec,
    counters: GeneratorCounters,
}

/// Reconciles a push producer (transport bytes, arbitrary size and timing)
/// with a pull consumer (`next()` calls, each expecting one chunk or an end
/// signal).
///
/// A write that finds a read already pending hands the chunk over directly;
/// a write that finds none buffers it in the queue; a read that finds the
/// queue non-empty drains it; a read that finds it empty waits. Cloning the
/// generator shares one underlying bridge — the script-visible wrapper and
/// the transport-side closure typically each hold a handle, with independent
/// lifetimes. When the last handle drops, buffered acknowledgments fire and
/// still-pending reads reject as destroyed.
///
/// All callbacks supplied from outside (executor, sinks, deferred
/// acknowledgments) run only after the bridge's own state mutation has
/// completed, so re-entrant calls from inside a callback observe a
/// consistent bridge.
#[derive(Clone, Default)]
pub struct Generator {
    inner: Rc<RefCell<Inner>>,
}

impl Generator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codec(codec: ValueCodec) -> Self {
        let generator = Self::new();
        generator.inner.borrow_mut().codec = codec;
        generator
    }

    pub fn codec(&self) -> ValueCodec {
        self.inner.borrow().codec
    }

    pub fn set_codec(&self, codec: ValueCodec) {
        self.inner.borrow_mut().codec = codec;
    }

    /// Install the startup action run exactly once, on the first pull.
    ///
    /// Replaces any executor that has not run yet.
    pub fn set_executor<F>(&self, executor: F)
    where
        F: FnOnce() -> Option<PromiseHandle<IterResult>> + 'static,
    {
        self.inner.borrow_mut().executor = Some(Box::new(executor));
    }

    /// True once the stream reached its terminal state (stop or cancel).
    pub fn is_stopped(&self) -> bool {
        self.inner.borrow().iterator.is_terminal()
    }

    /// Bytes currently buffered and not yet delivered.
    pub fn buffered_bytes(&self) -> usize {
        self.inner.borrow().queue.as_ref().map_or(0, Queue::byte_len)
    }

    pub fn buffered_chunks(&self) -> usize {
        self.inner.borrow().queue.as_ref().map_or(0, Queue::len)
    }

    pub fn pending_reads(&self) -> usize {
        self.inner.borrow().iterator.pending()
    }

    pub fn counters(&self) -> GeneratorCounters {
        self.inner.borrow().counters
    }

    /// Push bytes from the transport side.
    ///
    /// The buffer is copied before anything else happens — transport buffers
    /// are only valid for the duration of the callback. If a read is pending
    /// and the queue is not continuous, the chunk bypasses the queue and
    /// resolves that read directly; `on_consumed` then fires immediately,
    /// because consumption has already happened. Otherwise the chunk is
    /// buffered with `on_consumed` attached, to fire once this exact chunk
    /// is dequeued.
    ///
    /// # Errors
    ///
    /// Bytes arriving after the stream ended are rejected with
    /// [`Error::Closed`]; the caller logs and drops them.
    pub fn write(&self, data: &[u8], on_consumed: Option<Deferred>) -> Result<usize> {
        let (size, direct_ack, superseded) = {
            let inner = &mut *self.inner.borrow_mut();
            if !accepting(inner) {
                return Err(Error::Closed);
            }

            let block = Block::copy_from(data);
            let size = block.len();

            if direct_path(inner) {
                let value = inner.codec.decode(block);
                inner.iterator.yield_value(value.clone());
                inner.counters.bytes_written += size as u64;
                inner.counters.chunks_written += 1;
                inner.counters.bytes_read += size as u64;
                inner.counters.chunks_read += 1;
                trace!(bytes = size, "write satisfied a pending read");
                (size, on_consumed.map(|ack| (ack, value)), None)
            } else {
                let queue = inner.queue.get_or_insert_with(Queue::new);
                let superseded = queue.put(block, on_consumed)?;
                inner.counters.bytes_written += size as u64;
                inner.counters.chunks_written += 1;
                trace!(bytes = size, buffered = queue.byte_len(), "write buffered");
                (size, None, superseded)
            }
        };

        if let Some((ack, value)) = direct_ack {
            ack.invoke(value);
        }
        self.ack_superseded(superseded);
        Ok(size)
    }

    /// Register one pull.
    ///
    /// The first pull runs the startup executor; later pulls hand `arg` (the
    /// consumer's acknowledgment) to an armed continuous sink — consuming the
    /// sink, the delivery is one-shot — and resolve the drain promise of an
    /// outstanding `push`. Buffered chunks are then drained into pending
    /// reads. After the stream ended this settles immediately with the
    /// terminal outcome, so speculative reads are always safe.
    pub fn next(&self, arg: Option<ScriptValue>) -> PromiseHandle<IterResult> {
        let (handle, executor, sink, push_ack) = {
            let inner = &mut *self.inner.borrow_mut();
            let handle = inner.iterator.next();
            if inner.iterator.is_terminal() {
                return handle;
            }
            let executor = inner.executor.take();
            let sink = if executor.is_none() && arg.is_some() {
                inner.sink.take()
            } else {
                None
            };
            (handle, executor, sink, inner.push_ack.take())
        };

        if let Some(run) = executor {
            debug!("first pull, running startup executor");
            let startup = run();
            self.inner.borrow_mut().startup = startup;
        } else if let (Some(sink), Some(value)) = (sink, arg.clone()) {
            sink(value);
        }
        if let Some(ack) = push_ack {
            ack.resolve(arg);
        }

        self.drain();
        handle
    }

    /// Script-initiated write.
    ///
    /// Applies the same direct-yield vs buffer logic as [`Generator::write`].
    /// The returned promise is the drain signal: it resolves with the
    /// argument of the next `next(arg)` call (or with no value when the
    /// chunk is consumed without one). A newer push supersedes the previous
    /// drain promise, which then rejects as destroyed. Rejected with
    /// [`Error::Closed`] once the stream ended.
    pub fn push(&self, value: ScriptValue) -> PromiseHandle<Option<ScriptValue>> {
        match self.accept_value(value) {
            Ok(_) => {
                let (resolver, handle) = promise();
                self.inner.borrow_mut().push_ack = Some(resolver);
                handle
            }
            Err(error) => PromiseHandle::rejected(error),
        }
    }

    /// Fire-and-forget [`Generator::push`]: no drain signal.
    ///
    /// # Errors
    ///
    /// Rejects with [`Error::Closed`] once the stream has ended.
    pub fn enqueue(&self, value: ScriptValue) -> Result<usize> {
        self.accept_value(value)
    }

    /// Pop one buffered chunk from the owning driver's side.
    ///
    /// This is the transport-facing pull: the writable-path owner drains the
    /// queue synchronously to produce bytes to send. The popped chunk's
    /// acknowledgment fires, an outstanding push drain promise resolves
    /// (with no value — there is no consumer argument on this path), and
    /// read counters update. The flag is true when this pop drained a
    /// complete queue.
    pub fn dequeue(&self) -> Option<(ScriptValue, bool)> {
        let (value, drained, ack, push_ack) = {
            let inner = &mut *self.inner.borrow_mut();
            let queue = inner.queue.as_mut()?;
            let (item, drained) = queue.next()?;
            let (block, unref) = item.into_parts();
            inner.counters.bytes_read += block.len() as u64;
            inner.counters.chunks_read += 1;
            let value = inner.codec.decode(block);
            (value, drained, unref, inner.push_ack.take())
        };

        if let Some(ack) = ack {
            ack.invoke(value.clone());
        }
        if let Some(push_ack) = push_ack {
            push_ack.resolve(None);
        }
        Some((value, drained))
    }

    /// Mark the queue complete without ending the iteration early.
    ///
    /// Writes fail from here on; the consumer still drains whatever is
    /// buffered and then sees the end signal. This is the graceful EOF used
    /// for fixed bodies, as opposed to [`Generator::stop`], which ends the
    /// iteration immediately. Returns true only on the transition.
    pub fn close(&self) -> bool {
        let inner = &mut *self.inner.borrow_mut();
        let queue = inner.queue.get_or_insert_with(Queue::new);
        if queue.is_complete() {
            return false;
        }
        queue.close();
        if queue.is_empty() {
            inner.iterator.stop(None);
        }
        true
    }

    /// Inject a stream-wide error.
    ///
    /// If a startup promise is in flight the error is observed through it —
    /// a caller awaiting "did streaming start" sees the failure there.
    /// Otherwise the returned promise is already rejected with `error`.
    /// Either way every pending read rejects, an outstanding push drain
    /// promise rejects, and the terminal error re-delivers to late readers.
    pub fn throw(&self, error: Error) -> PromiseHandle<IterResult> {
        let handle = self
            .inner
            .borrow_mut()
            .startup
            .take()
            .unwrap_or_else(|| PromiseHandle::rejected(error.clone()));
        self.cancel(error);
        handle
    }

    /// Fail the stream, rejecting all pending and future reads with `error`.
    ///
    /// Terminal. Returns true only on the transition.
    pub fn cancel(&self, error: Error) -> bool {
        let (transition, push_ack) = {
            let inner = &mut *self.inner.borrow_mut();
            (inner.iterator.cancel(error.clone()), inner.push_ack.take())
        };
        if let Some(ack) = push_ack {
            ack.reject(error);
        }
        transition
    }

    /// End the stream gracefully.
    ///
    /// Closes the queue; in continuous mode the final resident chunk is
    /// delivered to its acknowledgment and to the armed sink (which is then
    /// disarmed), with an empty value standing in when nothing is buffered
    /// so sink-driven consumers settle rather than hang. Pending reads
    /// resolve with `{arg, done: true}`; an outstanding push drain promise
    /// rejects as destroyed. Returns true only on the transition.
    pub fn stop(&self, arg: Option<ScriptValue>) -> bool {
        let (transition, finale) = {
            let inner = &mut *self.inner.borrow_mut();
            let codec = inner.codec;
            let sink = inner.sink.take();
            let mut finale = None;

            if let Some(queue) = inner.queue.as_mut() {
                if !queue.is_complete() {
                    queue.close();
                }
                if queue.is_continuous() {
                    let (value, unref) = match queue.last_mut() {
                        Some(item) => {
                            let value = codec.decode(item.block().clone());
                            (value, item.take_unref())
                        }
                        None => (ScriptValue::Binary(Block::empty()), None),
                    };
                    finale = Some((value, unref, sink));
                }
            }

            inner.push_ack = None;
            (inner.iterator.stop(arg), finale)
        };

        if let Some((value, unref, sink)) = finale {
            debug!(bytes = value.byte_len(), "delivering continuous finale");
            if let Some(unref) = unref {
                unref.invoke(value.clone());
            }
            if let Some(sink) = sink {
                sink(value);
            }
        }
        transition
    }

    /// Opt into latest-value mode, streaming to `sink` instead of building
    /// a backlog.
    ///
    /// The sink stays armed until a pull acknowledgment consumes it or the
    /// stop finale fires it; it is also attached as the acknowledgment of
    /// the chunk currently last in the queue. An acknowledgment already
    /// attached there keeps firing: the new one chains after it rather than
    /// replacing it. Returns false when the stream already ended.
    pub fn continuous(&self, sink: Sink) -> bool {
        let inner = &mut *self.inner.borrow_mut();
        if inner.iterator.is_terminal() {
            return false;
        }

        let queue = inner.queue.get_or_insert_with(Queue::new);
        queue.set_continuous();
        if let Some(item) = queue.last_mut() {
            let attached = match item.take_unref() {
                Some(prev) => {
                    let tail = Rc::clone(&sink);
                    Deferred::new(move |value: ScriptValue| {
                        prev.invoke(value.clone());
                        tail(value);
                    })
                }
                None => Deferred::from_sink(&sink),
            };
            item.set_unref(Some(attached));
        }
        inner.sink = Some(sink);
        true
    }

    /// Shared accept path of `push`/`enqueue`.
    fn accept_value(&self, value: ScriptValue) -> Result<usize> {
        let (size, superseded) = {
            let inner = &mut *self.inner.borrow_mut();
            if !accepting(inner) {
                return Err(Error::Closed);
            }

            let size = value.byte_len();
            let superseded = if direct_path(inner) {
                inner.iterator.yield_value(value);
                inner.counters.bytes_read += size as u64;
                inner.counters.chunks_read += 1;
                None
            } else {
                let queue = inner.queue.get_or_insert_with(Queue::new);
                queue.put(value.to_block(), None)?
            };
            inner.counters.bytes_written += size as u64;
            inner.counters.chunks_written += 1;
            (size, superseded)
        };

        self.ack_superseded(superseded);
        Ok(size)
    }

    /// Move buffered chunks to pending reads, oldest to oldest.
    ///
    /// Runs until either side is exhausted. Popping the final chunk of a
    /// complete queue delivers it normally and then ends the iteration, so
    /// the consumer never loses the last chunk to the end signal.
    fn drain(&self) {
        loop {
            let fired = {
                let inner = &mut *self.inner.borrow_mut();
                let Some(queue) = inner.queue.as_mut() else {
                    break;
                };
                if queue.is_empty() {
                    if queue.is_complete() && !inner.iterator.is_terminal() {
                        inner.iterator.stop(None);
                    }
                    break;
                }
                if !inner.iterator.has_pending() {
                    break;
                }

                let Some((item, drained)) = queue.next() else {
                    break;
                };
                let (block, unref) = item.into_parts();
                inner.counters.bytes_read += block.len() as u64;
                inner.counters.chunks_read += 1;
                let value = inner.codec.decode(block);
                inner.iterator.yield_value(value.clone());
                if drained {
                    inner.iterator.stop(None);
                }
                unref.map(|ack| (ack, value))
            };

            if let Some((ack, value)) = fired {
                ack.invoke(value);
            }
        }
    }

    /// Acknowledge a chunk evicted by continuous supersession, with its own
    /// (old) value.
    fn ack_superseded(&self, superseded: Option<QueueItem>) {
        let Some(item) = superseded else { return };
        let codec = self.inner.borrow().codec;
        let (block, unref) = item.into_parts();
        if let Some(unref) = unref {
            trace!(bytes = block.len(), "acking superseded chunk");
            unref.invoke(codec.decode(block));
        }
    }
}

/// Writes are accepted until the iteration ends or the queue completes.
fn accepting(inner: &Inner) -> bool {
    !inner.iterator.is_terminal() && !inner.queue.as_ref().is_some_and(Queue::is_complete)
}

/// A chunk may bypass the queue when a read is already waiting, except in
/// continuous mode, where the queue itself is the delivery contract.
fn direct_path(inner: &Inner) -> bool {
    inner.iterator.has_pending() && !inner.queue.as_ref().is_some_and(Queue::is_continuous)
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Generator")
            .field("state", &inner.iterator.state())
            .field("pending_reads", &inner.iterator.pending())
            .field("buffered", &inner.queue.as_ref().map_or(0, Queue::byte_len))
            .field("counters", &inner.counters)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio_test::{assert_pending, assert_ready, assert_ready_eq, task};

    fn recording_ack(log: &Rc<RefCell<Vec<Vec<u8>>>>) -> Deferred {
        let log = Rc::clone(log);
        Deferred::new(move |value| log.borrow_mut().push(value.as_bytes().to_vec()))
    }

    fn bytes_of(step: &IterResult) -> Vec<u8> {
        step.value
            .as_ref()
            .map(|v| v.as_bytes().to_vec())
            .unwrap_or_default()
    }

    #[test]
    fn writes_then_reads_deliver_in_fifo_order() {
        let generator = Generator::new();
        generator.write(b"one", None).unwrap();
        generator.write(b"two", None).unwrap();
        generator.write(b"three", None).unwrap();

        for expected in [b"one".as_slice(), b"two", b"three"] {
            let mut read = task::spawn(generator.next(None));
            let step = assert_ready!(read.poll()).unwrap();
            assert!(!step.done);
            assert_eq!(bytes_of(&step), expected);
        }
    }

    #[test]
    fn reads_then_writes_deliver_in_fifo_order() {
        let generator = Generator::new();
        let mut first = task::spawn(generator.next(None));
        let mut second = task::spawn(generator.next(None));
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        generator.write(b"alpha", None).unwrap();
        generator.write(b"beta", None).unwrap();

        assert_eq!(bytes_of(&assert_ready!(first.poll()).unwrap()), b"alpha");
        assert_eq!(bytes_of(&assert_ready!(second.poll()).unwrap()), b"beta");
    }

    #[test]
    fn fast_path_and_buffered_path_deliver_identical_bytes() {
        // Buffered: write first, read later.
        let buffered = Generator::new();
        buffered.write(b"payload", None).unwrap();
        let mut read = task::spawn(buffered.next(None));
        let via_queue = bytes_of(&assert_ready!(read.poll()).unwrap());

        // Direct: read first, write later.
        let direct = Generator::new();
        let mut read = task::spawn(direct.next(None));
        assert_pending!(read.poll());
        direct.write(b"payload", None).unwrap();
        let via_yield = bytes_of(&assert_ready!(read.poll()).unwrap());

        assert_eq!(via_queue, via_yield);
        assert_eq!(via_queue, b"payload");
    }

    #[test]
    fn consumption_ack_fires_exactly_once_after_dequeue() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let generator = Generator::new();

        generator.write(b"abc", Some(recording_ack(&log))).unwrap();
        assert!(log.borrow().is_empty(), "ack must wait for consumption");

        let mut read = task::spawn(generator.next(None));
        assert_ready!(read.poll()).unwrap();
        assert_eq!(log.borrow().as_slice(), &[b"abc".to_vec()]);
    }

    #[test]
    fn direct_yield_acks_immediately() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let generator = Generator::new();

        let mut read = task::spawn(generator.next(None));
        assert_pending!(read.poll());
        generator.write(b"xyz", Some(recording_ack(&log))).unwrap();

        // Consumption already happened, the producer must not stay paused.
        assert_eq!(log.borrow().as_slice(), &[b"xyz".to_vec()]);
        assert_ready!(read.poll()).unwrap();
    }

    #[test]
    fn scenario_two_writes_three_reads() {
        let generator = Generator::new();
        generator.write(&[1, 2, 3], None).unwrap();
        generator.write(&[4, 5, 6, 7, 8], None).unwrap();

        let mut first = task::spawn(generator.next(None));
        assert_eq!(bytes_of(&assert_ready!(first.poll()).unwrap()), &[1, 2, 3]);

        let mut second = task::spawn(generator.next(None));
        assert_eq!(
            bytes_of(&assert_ready!(second.poll()).unwrap()),
            &[4, 5, 6, 7, 8]
        );

        let mut third = task::spawn(generator.next(None));
        assert_pending!(third.poll());

        assert!(generator.stop(None));
        let step = assert_ready!(third.poll()).unwrap();
        assert!(step.done);
    }

    #[test]
    fn stop_is_idempotent_and_post_stop_reads_resolve_done() {
        let generator = Generator::new();
        assert!(generator.stop(None));
        assert!(!generator.stop(None));

        for _ in 0..3 {
            let mut read = task::spawn(generator.next(None));
            let step = assert_ready!(read.poll()).unwrap();
            assert!(step.done);
        }
        assert_eq!(generator.pending_reads(), 0);
    }

    #[test]
    fn write_after_stop_is_rejected() {
        let generator = Generator::new();
        generator.stop(None);
        assert_eq!(generator.write(b"late", None).unwrap_err(), Error::Closed);
        assert_eq!(
            generator.enqueue(ScriptValue::text("late")).unwrap_err(),
            Error::Closed
        );

        let mut pushed = task::spawn(generator.push(ScriptValue::text("late")));
        assert_ready_eq!(pushed.poll(), Err(Error::Closed));
    }

    #[test]
    fn cancel_fans_out_to_all_pending_and_late_reads() {
        let generator = Generator::new();
        let mut reads = [
            task::spawn(generator.next(None)),
            task::spawn(generator.next(None)),
            task::spawn(generator.next(None)),
        ];

        let error = Error::Upstream("connection reset".into());
        assert!(generator.cancel(error.clone()));
        for read in &mut reads {
            assert_ready_eq!(read.poll(), Err(error.clone()));
        }

        let mut late = task::spawn(generator.next(None));
        assert_ready_eq!(late.poll(), Err(error));
        assert!(!generator.cancel(Error::Closed));
    }

    #[test]
    fn continuous_supersession_acks_old_value_and_keeps_latest() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let generator = Generator::new();
        let sink_log = Rc::new(RefCell::new(Vec::new()));
        let sink_seen = Rc::clone(&sink_log);
        let sink: Sink = Rc::new(move |value: ScriptValue| {
            sink_seen.borrow_mut().push(value.as_bytes().to_vec());
        });
        assert!(generator.continuous(sink));

        generator.write(b"A", Some(recording_ack(&log))).unwrap();
        assert!(log.borrow().is_empty());

        // B supersedes A before anything was consumed: A's ack fires with
        // A's own bytes, and only B remains retrievable.
        generator.write(b"B", Some(recording_ack(&log))).unwrap();
        assert_eq!(log.borrow().as_slice(), &[b"A".to_vec()]);
        assert_eq!(generator.buffered_chunks(), 1);

        let (latest, _) = generator.dequeue().unwrap();
        assert_eq!(latest.as_bytes(), b"B");
    }

    #[test]
    fn continuous_write_does_not_bypass_the_queue() {
        let generator = Generator::new();
        let sink: Sink = Rc::new(|_| {});
        generator.continuous(sink);

        let mut read = task::spawn(generator.next(None));
        assert_pending!(read.poll());

        // A pending read normally triggers the direct path; continuous mode
        // forces the queue so supersession stays observable.
        generator.write(b"first", None).unwrap();
        assert_eq!(generator.buffered_chunks(), 1);
        assert_pending!(read.poll());

        // The next pull drains the buffered chunk to the waiting read.
        let mut second = task::spawn(generator.next(None));
        assert_eq!(bytes_of(&assert_ready!(read.poll()).unwrap()), b"first");
        assert_pending!(second.poll());
    }

    #[test]
    fn stop_delivers_continuous_finale_to_ack_and_sink_once() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink_log = Rc::new(RefCell::new(Vec::new()));
        let generator = Generator::new();

        let sink_seen = Rc::clone(&sink_log);
        let sink: Sink = Rc::new(move |value: ScriptValue| {
            sink_seen.borrow_mut().push(value.as_bytes().to_vec());
        });
        generator.continuous(sink);

        generator.write(b"frame", Some(recording_ack(&log))).unwrap();
        assert!(generator.stop(None));

        assert_eq!(log.borrow().as_slice(), &[b"frame".to_vec()]);
        assert_eq!(sink_log.borrow().as_slice(), &[b"frame".to_vec()]);

        // A second stop neither transitions nor re-fires the finale.
        assert!(!generator.stop(None));
        assert_eq!(sink_log.borrow().len(), 1);
    }

    #[test]
    fn stop_on_empty_continuous_queue_still_feeds_the_sink() {
        let sink_log = Rc::new(RefCell::new(Vec::new()));
        let generator = Generator::new();

        let sink_seen = Rc::clone(&sink_log);
        let sink: Sink = Rc::new(move |value: ScriptValue| {
            sink_seen.borrow_mut().push(value.byte_len());
        });
        generator.continuous(sink);
        generator.stop(None);

        // Empty finale rather than a sink left waiting forever.
        assert_eq!(sink_log.borrow().as_slice(), &[0]);
    }

    #[test]
    fn continuous_chains_an_existing_ack_instead_of_replacing_it() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink_log = Rc::new(RefCell::new(Vec::new()));
        let generator = Generator::new();

        generator.write(b"held", Some(recording_ack(&log))).unwrap();

        let sink_seen = Rc::clone(&sink_log);
        let sink: Sink = Rc::new(move |value: ScriptValue| {
            sink_seen.borrow_mut().push(value.as_bytes().to_vec());
        });
        generator.continuous(sink);

        // Supersede the held chunk: both its original ack and the sink see it.
        generator.write(b"next", None).unwrap();
        assert_eq!(log.borrow().as_slice(), &[b"held".to_vec()]);
        assert_eq!(sink_log.borrow().as_slice(), &[b"held".to_vec()]);
    }

    #[test]
    fn pull_acknowledgment_consumes_the_sink() {
        let sink_log = Rc::new(RefCell::new(Vec::new()));
        let generator = Generator::new();

        let sink_seen = Rc::clone(&sink_log);
        let sink: Sink = Rc::new(move |value: ScriptValue| {
            sink_seen.borrow_mut().push(value.as_bytes().to_vec());
        });
        generator.continuous(sink);

        // A bare pull leaves the sink armed; an acknowledging pull feeds and
        // consumes it.
        drop(generator.next(None));
        assert!(sink_log.borrow().is_empty());
        drop(generator.next(Some(ScriptValue::text("ok"))));
        assert_eq!(sink_log.borrow().as_slice(), &[b"ok".to_vec()]);

        drop(generator.next(Some(ScriptValue::text("again"))));
        assert_eq!(sink_log.borrow().len(), 1);

        // The stop finale no longer has a sink to feed.
        generator.stop(None);
        assert_eq!(sink_log.borrow().len(), 1);
    }

    #[test]
    fn executor_runs_once_on_first_pull() {
        let runs = Rc::new(Cell::new(0u32));
        let generator = Generator::new();

        let counted = Rc::clone(&runs);
        let producer = generator.clone();
        generator.set_executor(move || {
            counted.set(counted.get() + 1);
            // A producer typically starts writing as soon as it is pulled.
            producer.write(b"started", None).unwrap();
            None
        });

        assert_eq!(runs.get(), 0);
        let mut first = task::spawn(generator.next(None));
        assert_eq!(runs.get(), 1);
        assert_eq!(bytes_of(&assert_ready!(first.poll()).unwrap()), b"started");

        let mut second = task::spawn(generator.next(None));
        assert_pending!(second.poll());
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn throw_routes_through_the_inflight_startup_promise() {
        let generator = Generator::new();
        let (startup_resolver, startup_handle) = promise();
        generator.set_executor(move || Some(startup_handle));

        let mut read = task::spawn(generator.next(None));
        assert_pending!(read.poll());

        let error = Error::Upstream("tls failure".into());
        let mut thrown = task::spawn(generator.throw(error.clone()));
        // The pending read rejects right away; the returned promise settles
        // through the startup action.
        assert_ready_eq!(read.poll(), Err(error.clone()));
        assert_pending!(thrown.poll());

        startup_resolver.reject(error.clone());
        assert_ready_eq!(thrown.poll(), Err(error));
    }

    #[test]
    fn throw_without_startup_rejects_directly() {
        let generator = Generator::new();
        let error = Error::Upstream("boom".into());
        let mut thrown = task::spawn(generator.throw(error.clone()));
        assert_ready_eq!(thrown.poll(), Err(error.clone()));

        let mut late = task::spawn(generator.next(None));
        assert_ready_eq!(late.poll(), Err(error));
    }

    #[test]
    fn push_ack_resolves_with_the_next_pull_argument() {
        let generator = Generator::new();
        let mut pushed = task::spawn(generator.push(ScriptValue::text("data")));
        assert_pending!(pushed.poll());

        let mut read = task::spawn(generator.next(Some(ScriptValue::text("thanks"))));
        assert_eq!(bytes_of(&assert_ready!(read.poll()).unwrap()), b"data");
        assert_ready_eq!(pushed.poll(), Ok(Some(ScriptValue::text("thanks"))));
    }

    #[test]
    fn newer_push_supersedes_the_previous_drain_promise() {
        let generator = Generator::new();
        let mut first = task::spawn(generator.push(ScriptValue::text("a")));
        let mut second = task::spawn(generator.push(ScriptValue::text("b")));

        assert_ready_eq!(first.poll(), Err(Error::Destroyed));
        assert_pending!(second.poll());

        let mut read = task::spawn(generator.next(None));
        assert_eq!(bytes_of(&assert_ready!(read.poll()).unwrap()), b"a");
        assert_ready_eq!(second.poll(), Ok(None));
    }

    #[test]
    fn throw_rejects_the_outstanding_push_promise() {
        let generator = Generator::new();
        let mut pushed = task::spawn(generator.push(ScriptValue::text("data")));
        assert_pending!(pushed.poll());

        let error = Error::Upstream("gone".into());
        drop(generator.throw(error.clone()));
        assert_ready_eq!(pushed.poll(), Err(error));
    }

    #[test]
    fn dequeue_acks_resolves_push_and_reports_drained() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let generator = Generator::new();

        generator.write(b"out", Some(recording_ack(&log))).unwrap();
        let mut pushed = task::spawn(generator.push(ScriptValue::text("more")));
        assert_pending!(pushed.poll());

        let (first, drained) = generator.dequeue().unwrap();
        assert_eq!(first.as_bytes(), b"out");
        assert!(!drained);
        assert_eq!(log.borrow().as_slice(), &[b"out".to_vec()]);
        assert_ready_eq!(pushed.poll(), Ok(None));

        generator.close();
        let (second, drained) = generator.dequeue().unwrap();
        assert_eq!(second.as_bytes(), b"more");
        assert!(drained);
        assert!(generator.dequeue().is_none());
    }

    #[test]
    fn close_lets_the_consumer_drain_then_end() {
        let generator = Generator::new();
        generator.enqueue(ScriptValue::text("entire body")).unwrap();
        assert!(generator.close());
        assert!(!generator.close());

        let mut read = task::spawn(generator.next(None));
        let step = assert_ready!(read.poll()).unwrap();
        assert!(!step.done);
        assert_eq!(bytes_of(&step), b"entire body");

        let mut end = task::spawn(generator.next(None));
        assert!(assert_ready!(end.poll()).unwrap().done);

        // The drain already ended the iteration; stop reports no transition.
        assert!(!generator.stop(None));
    }

    #[test]
    fn close_on_empty_queue_ends_pending_reads() {
        let generator = Generator::new();
        let mut read = task::spawn(generator.next(None));
        assert_pending!(read.poll());

        generator.close();
        assert!(assert_ready!(read.poll()).unwrap().done);
        assert_eq!(generator.write(b"late", None).unwrap_err(), Error::Closed);
    }

    #[test]
    fn text_codec_decodes_chunks_for_the_consumer() {
        let generator = Generator::with_codec(ValueCodec::Text);
        generator.write(b"bonjour", None).unwrap();

        let mut read = task::spawn(generator.next(None));
        let step = assert_ready!(read.poll()).unwrap();
        assert_eq!(step.value.unwrap().as_text(), Some("bonjour"));
    }

    #[test]
    fn dropping_the_last_handle_rejects_reads_and_fires_acks() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let generator = Generator::new();
        let clone = generator.clone();

        // Continuous mode keeps the chunk buffered even while a read is
        // pending, so both outlive the handles.
        let sink: Sink = Rc::new(|_| {});
        generator.continuous(sink);
        let mut pending = task::spawn(generator.next(None));
        assert_pending!(pending.poll());
        clone.write(b"never read", Some(recording_ack(&log))).unwrap();
        assert!(log.borrow().is_empty());

        drop(generator);
        drop(clone);

        // Teardown: the buffered ack fired, the pending read rejected.
        assert_eq!(log.borrow().as_slice(), &[b"never read".to_vec()]);
        assert_ready_eq!(pending.poll(), Err(Error::Destroyed));
    }

    #[test]
    fn counters_track_both_sides() {
        let generator = Generator::new();
        generator.write(b"12345", None).unwrap();
        let mut read = task::spawn(generator.next(None));
        assert_ready!(read.poll()).unwrap();
        generator.write(b"678", None).unwrap();

        let counters = generator.counters();
        assert_eq!(counters.bytes_written, 8);
        assert_eq!(counters.chunks_written, 2);
        // The second write went to the queue and is still unread.
        assert_eq!(counters.bytes_read, 5);
        assert_eq!(counters.chunks_read, 1);
        assert_eq!(generator.buffered_bytes(), 3);
    }
}
