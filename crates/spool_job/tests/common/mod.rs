//! Shared fixtures for print job integration tests.

#![allow(dead_code)]

use spool_job::{
    BlockingPool, EventBus, JobContext, JobEventSink, JobEventType, JobWorker, MessageLoop, NotificationType,
    PrintJob, PrintJobWorker, PrintSettings, PrintedDocument, PrinterQuery, Result,
    SimulatedBackend, SourceFilter, Task, WorkerPool,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(5);

/// How often each worker entry point was called.
#[derive(Debug, Default)]
pub struct WorkerCalls {
    pub start_printing: AtomicUsize,
    pub document_changed: AtomicUsize,
    pub cancel: AtomicUsize,
    pub stop_soon: AtomicUsize,
    pub stop: AtomicUsize,
    /// Thread the worker was dropped on.
    pub dropped_on: Mutex<Option<ThreadId>>,
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// A real print worker that counts the calls it receives.
pub struct RecordingWorker {
    inner: PrintJobWorker,
    calls: Arc<WorkerCalls>,
}

impl RecordingWorker {
    pub fn spawn(backend: Arc<SimulatedBackend>, calls: Arc<WorkerCalls>) -> Self {
        let inner = PrintJobWorker::spawn("test-print-worker", backend).unwrap();
        Self { inner, calls }
    }
}

impl Drop for RecordingWorker {
    fn drop(&mut self) {
        *self.calls.dropped_on.lock().unwrap() = Some(thread::current().id());
    }
}

impl JobWorker for RecordingWorker {
    fn attach(&self, sink: JobEventSink) {
        self.inner.attach(sink);
    }

    fn post_task(&self, task: Task) -> Result<()> {
        self.inner.post_task(task)
    }

    fn is_thread_alive(&self) -> bool {
        self.inner.is_thread_alive()
    }

    fn start_printing(&self, document: Arc<PrintedDocument>) {
        self.calls.start_printing.fetch_add(1, Ordering::SeqCst);
        self.inner.start_printing(document);
    }

    fn on_document_changed(&self, document: Option<Arc<PrintedDocument>>) {
        self.calls.document_changed.fetch_add(1, Ordering::SeqCst);
        self.inner.on_document_changed(document);
    }

    fn cancel(&self) {
        self.calls.cancel.fetch_add(1, Ordering::SeqCst);
        self.inner.cancel();
    }

    fn stop_soon(&self) {
        self.calls.stop_soon.fetch_add(1, Ordering::SeqCst);
        self.inner.stop_soon();
    }

    fn stop(&self) {
        self.calls.stop.fetch_add(1, Ordering::SeqCst);
        self.inner.stop();
    }
}

/// Event types one job published on the bus, in order.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<JobEventType>>>,
}

impl EventLog {
    pub fn attach(bus: &EventBus, job: &PrintJob) -> Self {
        let log = Self::default();
        let events = Arc::clone(&log.events);
        bus.subscribe(
            NotificationType::PrintJobEvent,
            SourceFilter::Job(job.id()),
            move |notification| {
                events
                    .lock()
                    .unwrap()
                    .push(notification.details.event_type());
            },
        );
        log
    }

    pub fn types(&self) -> Vec<JobEventType> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event_type: JobEventType) -> usize {
        self.types().iter().filter(|t| **t == event_type).count()
    }
}

/// One coordinator thread's worth of infrastructure.
///
/// Jobs created by a test must be dropped before the harness.
pub struct Harness {
    pub message_loop: MessageLoop,
    pub bus: Arc<EventBus>,
    pub pool: Arc<WorkerPool>,
    pub backend: Arc<SimulatedBackend>,
    pub calls: Arc<WorkerCalls>,
}

impl Harness {
    pub fn new(backend: SimulatedBackend) -> Self {
        spool_logging::init_test_logging();
        Self {
            message_loop: MessageLoop::new().unwrap(),
            bus: Arc::new(EventBus::new()),
            pool: Arc::new(WorkerPool::new("test-pool", 1, 16).unwrap()),
            backend: Arc::new(backend),
            calls: Arc::new(WorkerCalls::default()),
        }
    }

    pub fn context(&self) -> JobContext {
        let pool: Arc<dyn BlockingPool> = self.pool.clone();
        JobContext::new(Arc::clone(&self.bus), pool)
    }

    pub fn query(&self) -> PrinterQuery {
        let worker = RecordingWorker::spawn(Arc::clone(&self.backend), Arc::clone(&self.calls));
        PrinterQuery::new(
            42,
            PrintSettings::for_device("test-printer").with_title("report"),
            Box::new(worker),
        )
    }

    /// An initialized job with `pages` pages and a log of its events.
    pub fn job(&self, pages: u32) -> (Arc<PrintJob>, EventLog) {
        self.job_with_context(self.context(), pages)
    }

    pub fn job_with_context(&self, context: JobContext, pages: u32) -> (Arc<PrintJob>, EventLog) {
        let job = PrintJob::new(context).unwrap();
        job.initialize(&self.query(), None, pages).unwrap();
        let log = EventLog::attach(&self.bus, &job);
        (job, log)
    }

    pub fn run_until(&self, condition: impl FnMut() -> bool) -> bool {
        self.message_loop.run_until(condition, WAIT)
    }
}
