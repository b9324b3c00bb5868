//! Error types for the spool job crate.
//!
//! Contract violations (double initialize, wrong thread, dropping a pending
//! job) are assertions, not variants here. `SpoolError` only covers failures
//! a caller can reasonably react to: missing infrastructure, closed channels,
//! thread spawn errors and configuration loading.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpoolError {
    /// The calling thread has no installed `MessageLoop`.
    #[error("no message loop is installed on the current thread")]
    NoMessageLoop,

    /// `MessageLoop::new` was called on a thread that already has one.
    #[error("a message loop is already installed on this thread")]
    LoopAlreadyInstalled,

    /// The target loop was dropped; the task was not queued.
    #[error("message loop is gone")]
    LoopGone,

    /// The worker thread has exited and no longer accepts tasks.
    #[error("worker thread '{name}' is not accepting tasks")]
    WorkerGone { name: String },

    /// The owner no longer holds a worker to hand over.
    #[error("worker was already detached from its owner")]
    WorkerDetached,

    /// The background pool was shut down.
    #[error("background pool '{name}' is closed")]
    PoolClosed { name: String },

    /// The background pool's queue is at capacity.
    #[error("background pool '{name}' queue is full")]
    PoolFull { name: String },

    #[error("failed to spawn thread '{name}': {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure reported by a [`PrintBackend`](crate::backend::PrintBackend).
///
/// Backend failures never reach the caller of `PrintJob::start`; the worker
/// turns them into a `Failed` job event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("device rejected document '{document}': {reason}")]
    DocumentRejected { document: String, reason: String },

    #[error("failed to render page {page}: {reason}")]
    RenderFailed { page: u32, reason: String },

    #[error("printing was canceled")]
    Canceled,
}

pub type Result<T> = std::result::Result<T, SpoolError>;
