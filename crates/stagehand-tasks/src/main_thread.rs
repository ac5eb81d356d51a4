//! Handing work to a host-owned thread
//!
//! Stages run on runtime worker threads. Anything that must happen on the
//! host's own thread (UI, non-`Send` host state) is submitted as a closure
//! through a [`MainThreadHandle`]; the host drains the paired
//! [`MainThreadQueue`] whenever it is convenient.

use tokio::sync::{mpsc, oneshot};

use crate::error::MainThreadError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Constructor for the handle/queue pair
pub struct MainThread;

impl MainThread {
    /// Create a connected handle and queue
    pub fn channel() -> (MainThreadHandle, MainThreadQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MainThreadHandle { tx }, MainThreadQueue { rx })
    }
}

/// Submits closures to the host thread
#[derive(Debug, Clone)]
pub struct MainThreadHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl MainThreadHandle {
    /// Run `f` on the host thread and wait for its result
    pub async fn run<F, R>(&self, f: F) -> Result<R, MainThreadError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit(f)?.await.map_err(|_| MainThreadError::Closed)
    }

    /// Blocking variant of [`run`](Self::run) for synchronous code.
    ///
    /// Must not be called from the host thread itself (it would wait on its
    /// own queue) nor from inside an async context.
    pub fn run_blocking<F, R>(&self, f: F) -> Result<R, MainThreadError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit(f)?
            .blocking_recv()
            .map_err(|_| MainThreadError::Closed)
    }

    /// Whether the host queue still exists
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn submit<F, R>(&self, f: F) -> Result<oneshot::Receiver<R>, MainThreadError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            // The caller may have stopped waiting
            let _ = reply.send(f());
        });
        self.tx.send(job).map_err(|_| MainThreadError::Closed)?;
        Ok(rx)
    }
}

/// Host side of the handoff
pub struct MainThreadQueue {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl MainThreadQueue {
    /// Run every job submitted so far without blocking; returns how many ran
    pub fn pump(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Run jobs as they arrive until every handle has been dropped.
    ///
    /// Blocks the calling thread; must not be called inside an async context.
    pub fn run_until_closed(&mut self) {
        while let Some(job) = self.rx.blocking_recv() {
            job();
        }
    }

    /// Async variant of [`run_until_closed`](Self::run_until_closed) for hosts
    /// that drive their own single-threaded runtime
    pub async fn run_until_closed_async(&mut self) {
        while let Some(job) = self.rx.recv().await {
            job();
        }
    }
}

impl std::fmt::Debug for MainThreadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainThreadQueue").finish_non_exhaustive()
    }
}
