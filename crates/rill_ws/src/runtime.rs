//! The dedicated thread hosting every `!Send` piece of the bridge.
//!
//! Generators, sessions, and their hooks all live on one thread inside a
//! [`tokio::task::LocalSet`]. The rest of the process talks to them by
//! sending plain closures here; inside a closure, code is free to spawn
//! `!Send` futures with [`tokio::task::spawn_local`].

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

type BridgeTask = Box<dyn FnOnce() + Send>;

/// The bridge thread stopped; no more tasks can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("bridge thread is gone")]
pub struct BridgeGone;

/// Handle to the bridge thread.
///
/// Dropping the handle closes the task queue and lets the thread wind
/// down on its own; [`shutdown`](BridgeRuntime::shutdown) additionally
/// waits for it to exit.
pub struct BridgeRuntime {
    tasks: mpsc::UnboundedSender<BridgeTask>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl BridgeRuntime {
    /// Spawn the bridge thread with its own single-threaded runtime.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to spawn the thread.
    pub fn start() -> Self {
        let (tasks, mut queue) = mpsc::unbounded_channel::<BridgeTask>();
        let thread = std::thread::Builder::new()
            .name("rill-bridge".into())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build bridge runtime");
                let local = tokio::task::LocalSet::new();
                local.block_on(&rt, async move {
                    while let Some(task) = queue.recv().await {
                        task();
                    }
                    debug!("bridge task queue closed");
                });
            })
            .expect("failed to spawn bridge thread");
        Self {
            tasks,
            thread: Some(thread),
        }
    }

    /// Queue `task` to run on the bridge thread.
    ///
    /// Tasks run in submission order. Anything `task` spawns locally keeps
    /// running after the closure returns, for as long as the bridge lives.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeGone`] once the bridge thread has stopped.
    pub fn run<F>(&self, task: F) -> Result<(), BridgeGone>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tasks.send(Box::new(task)).map_err(|_| BridgeGone)
    }

    /// Run `task` on the bridge thread and await its return value.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeGone`] if the bridge thread stops before the task
    /// runs to completion.
    pub async fn call<F, T>(&self, task: F) -> Result<T, BridgeGone>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.run(move || {
            let _ = tx.send(task());
        })?;
        rx.await.map_err(|_| BridgeGone)
    }

    /// Stop accepting tasks, run the ones already queued, and wait for the
    /// thread to exit. Futures still spawned on the bridge are dropped.
    pub fn shutdown(mut self) {
        let thread = self.thread.take();
        drop(self);
        if let Some(thread) = thread {
            let _ = thread.join();
        }
    }
}
