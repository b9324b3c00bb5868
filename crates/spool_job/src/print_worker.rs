//! Thread-backed [`JobWorker`] driving a [`PrintBackend`].
//!
//! # Design
//!
//! - One named OS thread per worker, fed by an mpsc queue of
//!   [`WorkerMessage`]s. Job tasks, page steps and the quit request all go
//!   through the same queue, so a quit lands after whatever was queued first.
//! - Pages are printed one step at a time: each step re-posts the next one,
//!   which keeps the queue responsive to quit requests between pages.
//! - Cancellation bypasses the queue. [`JobWorker::cancel`] trips a shared
//!   token and invalidates the backend context; the next step sees it.
//! - Events go out through the attached [`JobEventSink`], which posts them
//!   to the job's message loop. A worker with no sink prints silently.
//!
//! Event sequence for a successful document of N pages:
//! `NewPage`/`PageDone` per page, then `AllPagesRequested`, then `DocDone`.
//! A backend failure produces a single `Failed`. A canceled worker emits
//! nothing further.

use crate::backend::PrintBackend;
use crate::cancel::CancellationToken;
use crate::document::{PrintedDocument, PrintedPage};
use crate::error::{BackendError, Result, SpoolError};
use crate::events::JobEventType;
use crate::message_loop::Task;
use crate::print_job::JobEventSink;
use crate::worker::JobWorker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

enum WorkerMessage {
    Task(Task),
    PrintNextPage,
    Quit,
}

struct PrintRun {
    document: Arc<PrintedDocument>,
    next_page: u32,
}

struct WorkerShared {
    name: String,
    sender: Sender<WorkerMessage>,
    backend: Arc<dyn PrintBackend>,
    cancel: CancellationToken,
    alive: AtomicBool,
    sink: Mutex<Option<JobEventSink>>,
    document: Mutex<Option<Arc<PrintedDocument>>>,
    run: Mutex<Option<PrintRun>>,
}

/// Clears the alive flag when the worker thread exits, panics included.
struct AliveGuard<'a>(&'a AtomicBool);

impl Drop for AliveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct PrintJobWorker {
    shared: Arc<WorkerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PrintJobWorker {
    /// Spawn the worker thread.
    pub fn spawn(name: impl Into<String>, backend: Arc<dyn PrintBackend>) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel();
        let shared = Arc::new(WorkerShared {
            name: name.clone(),
            sender,
            backend,
            cancel: CancellationToken::new(),
            alive: AtomicBool::new(true),
            sink: Mutex::new(None),
            document: Mutex::new(None),
            run: Mutex::new(None),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker_thread(thread_shared, receiver))
            .map_err(|source| SpoolError::ThreadSpawn { name, source })?;

        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_canceled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// The document most recently handed over through `on_document_changed`.
    pub fn document(&self) -> Option<Arc<PrintedDocument>> {
        self.shared.lock(&self.shared.document).clone()
    }
}

impl JobWorker for PrintJobWorker {
    fn attach(&self, sink: JobEventSink) {
        *self.shared.lock(&self.shared.sink) = Some(sink);
    }

    fn post_task(&self, task: Task) -> Result<()> {
        self.shared
            .sender
            .send(WorkerMessage::Task(task))
            .map_err(|_| SpoolError::WorkerGone {
                name: self.shared.name.clone(),
            })
    }

    fn is_thread_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    fn start_printing(&self, document: Arc<PrintedDocument>) {
        self.shared.start_printing(document);
    }

    fn on_document_changed(&self, document: Option<Arc<PrintedDocument>>) {
        if self.shared.lock(&self.shared.run).is_some() {
            warn!("Worker '{}' document replaced mid-print", self.shared.name);
        }
        *self.shared.lock(&self.shared.document) = document;
    }

    fn cancel(&self) {
        if self.shared.cancel.cancel() {
            info!("Worker '{}' canceled", self.shared.name);
            self.shared.backend.cancel();
        }
    }

    fn stop_soon(&self) {
        // A dead thread needs no quit request.
        let _ = self.shared.sender.send(WorkerMessage::Quit);
    }

    fn stop(&self) {
        self.stop_soon();
        let handle = self.thread.lock().expect("worker thread lock poisoned").take();
        let Some(handle) = handle else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            debug!("Worker '{}' stopped from its own thread; not joining", self.shared.name);
            return;
        }
        if handle.join().is_err() {
            error!("Worker '{}' thread panicked", self.shared.name);
        }
    }
}

impl Drop for PrintJobWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PrintJobWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrintJobWorker")
            .field("name", &self.shared.name)
            .field("alive", &self.is_thread_alive())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

fn run_worker_thread(shared: Arc<WorkerShared>, receiver: Receiver<WorkerMessage>) {
    let _alive = AliveGuard(&shared.alive);
    debug!("Worker '{}' thread started", shared.name);

    while let Ok(message) = receiver.recv() {
        match message {
            WorkerMessage::Task(task) => task(),
            WorkerMessage::PrintNextPage => shared.print_next_page(),
            WorkerMessage::Quit => break,
        }
    }

    if shared.lock(&shared.run).take().is_some() {
        debug!("Worker '{}' exiting with a document in flight", shared.name);
    }
    debug!("Worker '{}' thread exiting", shared.name);
}

impl WorkerShared {
    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().expect("worker state lock poisoned")
    }

    fn start_printing(&self, document: Arc<PrintedDocument>) {
        if self.cancel.is_cancelled() {
            debug!("Worker '{}' ignoring start: canceled", self.name);
            return;
        }
        if self.lock(&self.run).is_some() {
            warn!("Worker '{}' is already printing", self.name);
            return;
        }

        info!(
            "Worker '{}' printing '{}' ({} page(s))",
            self.name,
            document.name(),
            document.expected_page_count()
        );
        if let Err(err) = self.backend.start_document(&document) {
            self.fail(err, Some(document));
            return;
        }
        *self.lock(&self.run) = Some(PrintRun {
            document,
            next_page: 1,
        });
        self.schedule_next_page();
    }

    fn schedule_next_page(&self) {
        if self.sender.send(WorkerMessage::PrintNextPage).is_err() {
            debug!("Worker '{}' queue closed; dropping page step", self.name);
        }
    }

    fn print_next_page(&self) {
        if self.cancel.is_cancelled() {
            self.lock(&self.run).take();
            return;
        }

        let (document, page_number) = {
            let mut run = self.lock(&self.run);
            match run.as_mut() {
                Some(run) => {
                    let page_number = run.next_page;
                    run.next_page += 1;
                    (Arc::clone(&run.document), page_number)
                }
                None => return,
            }
        };

        if page_number > document.expected_page_count() {
            self.finish(document);
            return;
        }

        match self.backend.render_page(&document, page_number) {
            Ok(page) => {
                let page = Arc::new(page);
                self.emit(JobEventType::NewPage, Some(Arc::clone(&document)), Some(Arc::clone(&page)));
                document.set_page(Arc::clone(&page));
                self.emit(JobEventType::PageDone, Some(document), Some(page));
                self.schedule_next_page();
            }
            Err(BackendError::Canceled) => {
                debug!("Worker '{}' stopped at page {}: canceled", self.name, page_number);
                self.lock(&self.run).take();
            }
            Err(err) => self.fail(err, Some(document)),
        }
    }

    fn finish(&self, document: Arc<PrintedDocument>) {
        self.lock(&self.run).take();
        self.emit(JobEventType::AllPagesRequested, Some(Arc::clone(&document)), None);
        match self.backend.finish_document(&document) {
            Ok(()) => {
                info!("Worker '{}' finished '{}'", self.name, document.name());
                self.emit(JobEventType::DocDone, Some(document), None);
            }
            Err(BackendError::Canceled) => {
                debug!("Worker '{}' canceled before the document was finished", self.name);
            }
            Err(err) => self.fail(err, Some(document)),
        }
    }

    /// Invalidate this worker and report the failure. The job does not
    /// cancel a worker that failed on its own.
    fn fail(&self, err: BackendError, document: Option<Arc<PrintedDocument>>) {
        error!("Worker '{}' failed: {}", self.name, err);
        self.cancel.cancel();
        self.backend.cancel();
        self.lock(&self.run).take();
        self.emit(JobEventType::Failed, document, None);
    }

    fn emit(
        &self,
        event_type: JobEventType,
        document: Option<Arc<PrintedDocument>>,
        page: Option<Arc<PrintedPage>>,
    ) {
        let sink = self.lock(&self.sink).clone();
        match sink {
            Some(sink) => {
                sink.post_event(event_type, document, page);
            }
            None => debug!("Worker '{}' has no job attached; dropping {}", self.name, event_type),
        }
    }
}
