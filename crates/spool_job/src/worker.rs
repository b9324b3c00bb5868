//! Worker seam and worker ownership.
//!
//! A [`JobWorker`] owns the dedicated thread that talks to the device. Before
//! a job exists the worker belongs to a [`PrintJobWorkerOwner`] (normally a
//! [`PrinterQuery`] that gathered the settings); `PrintJob::initialize`
//! detaches it exactly once and from then on the job owns it.

use crate::document::PrintedDocument;
use crate::error::{Result, SpoolError};
use crate::message_loop::Task;
use crate::print_job::JobEventSink;
use crate::settings::PrintSettings;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A print worker thread as seen by the job coordinator.
///
/// `start_printing` and `on_document_changed` run on the worker thread (the
/// job posts them through [`post_task`](Self::post_task)). Everything else is
/// called from the coordinator thread, except `stop`, which the job runs on
/// its background pool.
pub trait JobWorker: Send + Sync {
    /// Route this worker's events to the job behind `sink`.
    fn attach(&self, sink: JobEventSink);

    /// Queue `task` on the worker thread.
    fn post_task(&self, task: Task) -> Result<()>;

    fn is_thread_alive(&self) -> bool;

    fn start_printing(&self, document: Arc<PrintedDocument>);

    fn on_document_changed(&self, document: Option<Arc<PrintedDocument>>);

    /// Abort the current print context. Takes effect immediately, without
    /// queuing behind worker tasks.
    fn cancel(&self);

    /// Ask the worker thread to exit once its current task finishes.
    fn stop_soon(&self);

    /// Make the worker thread exit and wait for it. Blocks.
    fn stop(&self);
}

/// Holds a worker until a job claims it.
pub trait PrintJobWorkerOwner {
    /// Hand the worker over, re-targeting its events at `sink`.
    ///
    /// Fails with [`SpoolError::WorkerDetached`] if it was already handed over.
    fn detach_worker(&self, sink: JobEventSink) -> Result<Box<dyn JobWorker>>;

    fn settings(&self) -> PrintSettings;

    fn cookie(&self) -> i32;
}

/// The settings-gathering phase of a print: settings, a cookie, and the
/// worker that will print with them.
pub struct PrinterQuery {
    cookie: i32,
    settings: PrintSettings,
    worker: Mutex<Option<Box<dyn JobWorker>>>,
}

impl PrinterQuery {
    pub fn new(cookie: i32, settings: PrintSettings, worker: Box<dyn JobWorker>) -> Self {
        Self {
            cookie,
            settings,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn has_worker(&self) -> bool {
        self.worker.lock().expect("query worker lock poisoned").is_some()
    }
}

impl PrintJobWorkerOwner for PrinterQuery {
    fn detach_worker(&self, sink: JobEventSink) -> Result<Box<dyn JobWorker>> {
        let worker = self
            .worker
            .lock()
            .expect("query worker lock poisoned")
            .take()
            .ok_or(SpoolError::WorkerDetached)?;
        debug!("Printer query {} handing its worker to {}", self.cookie, sink.job_id());
        worker.attach(sink);
        Ok(worker)
    }

    fn settings(&self) -> PrintSettings {
        self.settings.clone()
    }

    fn cookie(&self) -> i32 {
        self.cookie
    }
}

impl std::fmt::Debug for PrinterQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrinterQuery")
            .field("cookie", &self.cookie)
            .field("settings", &self.settings)
            .field("has_worker", &self.has_worker())
            .finish()
    }
}
