//! Single-shot resolver/promise pairs.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::trace;

use crate::{Error, Result};

/// Create a connected resolver/promise pair for one pending operation.
pub fn promise<T>() -> (Resolver<T>, PromiseHandle<T>) {
    let (tx, rx) = oneshot::channel();
    (Resolver { tx: Some(tx) }, PromiseHandle { rx })
}

/// The settling half of a pending operation.
///
/// Settling consumes the resolver, so at most one of resolve/reject ever
/// runs for a given pair. Dropping an unsettled resolver rejects the promise
/// with [`Error::Destroyed`]; no promise is ever left dangling.
pub struct Resolver<T> {
    tx: Option<oneshot::Sender<Result<T>>>,
}

impl<T> Resolver<T> {
    /// Resolve the promise. Returns false when the consumer is already gone.
    pub fn resolve(mut self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Reject the promise. Returns false when the consumer is already gone.
    pub fn reject(mut self, error: Error) -> bool {
        self.settle(Err(error))
    }

    fn settle(&mut self, outcome: Result<T>) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

impl<T> Drop for Resolver<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            trace!("resolver dropped unsettled");
            let _ = tx.send(Err(Error::Destroyed));
        }
    }
}

impl<T> std::fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("settled", &self.tx.is_none())
            .finish()
    }
}

/// The consuming half: a future of the settled outcome.
#[derive(Debug)]
pub struct PromiseHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> PromiseHandle<T> {
    /// A promise already settled with `outcome`.
    pub fn settled(outcome: Result<T>) -> Self {
        let (resolver, handle) = promise();
        let _ = match outcome {
            Ok(value) => resolver.resolve(value),
            Err(error) => resolver.reject(error),
        };
        handle
    }

    pub fn resolved(value: T) -> Self {
        Self::settled(Ok(value))
    }

    pub fn rejected(error: Error) -> Self {
        Self::settled(Err(error))
    }
}

impl<T> Future for PromiseHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Sender dropped without settling; Resolver::drop normally beats
            // us to it, this covers a pair torn down mid-send.
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Destroyed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
