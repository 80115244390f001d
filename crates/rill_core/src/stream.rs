//! Consumer-side stream surfaces over a generator.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;

use crate::deferred::Sink;
use crate::generator::Generator;
use crate::promise::PromiseHandle;
use crate::value::{IterResult, ScriptValue};
use crate::{Error, Result};

/// The pull handle a consumer iterates, shaped like the async-iteration
/// protocol: each [`ByteStream::next`] resolves to one `{value, done}` step.
///
/// Cloning shares the underlying generator; two clones pulling concurrently
/// split the stream between them in registration order.
#[derive(Clone, Debug)]
pub struct ByteStream {
    generator: Generator,
}

impl ByteStream {
    pub fn new(generator: Generator) -> Self {
        Self { generator }
    }

    /// Pull the next chunk. `arg` is the consumer's acknowledgment, routed
    /// to continuous sinks and outstanding push promises.
    pub fn next(&self, arg: Option<ScriptValue>) -> PromiseHandle<IterResult> {
        self.generator.next(arg)
    }

    /// End the stream early from the consumer side.
    pub fn stop(&self, final_value: Option<ScriptValue>) -> bool {
        self.generator.stop(final_value)
    }

    /// Inject an error into the stream.
    pub fn throw(&self, error: Error) -> PromiseHandle<IterResult> {
        self.generator.throw(error)
    }

    /// Switch to latest-value delivery through `sink`.
    pub fn subscribe(&self, sink: Sink) -> bool {
        self.generator.continuous(sink)
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    /// Adapt to a [`futures_util::Stream`] of chunks.
    pub fn into_stream(self) -> ValueStream {
        ValueStream {
            generator: self.generator,
            pending: None,
            finished: false,
        }
    }
}

impl From<Generator> for ByteStream {
    fn from(generator: Generator) -> Self {
        Self::new(generator)
    }
}

/// [`Stream`] adapter pulling one chunk per item.
///
/// The end signal maps to stream exhaustion; a stream error is emitted once
/// and the stream then ends. Lazy like any stream: nothing is pulled until
/// polled, so the generator's startup executor runs on first poll.
#[derive(Debug)]
pub struct ValueStream {
    generator: Generator,
    pending: Option<PromiseHandle<IterResult>>,
    finished: bool,
}

impl Stream for ValueStream {
    type Item = Result<ScriptValue>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        loop {
            let mut handle = match this.pending.take() {
                Some(handle) => handle,
                None => this.generator.next(None),
            };
            match Pin::new(&mut handle).poll(cx) {
                Poll::Pending => {
                    this.pending = Some(handle);
                    return Poll::Pending;
                }
                Poll::Ready(Ok(step)) => {
                    if step.done {
                        this.finished = true;
                        return Poll::Ready(None);
                    }
                    if let Some(value) = step.value {
                        return Poll::Ready(Some(Ok(value)));
                    }
                }
                Poll::Ready(Err(error)) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(error)));
                }
            }
        }
    }
}
