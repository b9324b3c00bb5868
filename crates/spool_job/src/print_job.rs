//! Print job coordinator.
//!
//! A [`PrintJob`] lives on the thread that created it (its coordinator
//! thread, which must have a [`MessageLoop`](crate::message_loop::MessageLoop)
//! installed) and drives one document through a [`JobWorker`] on another
//! thread. Callers hold it as `Arc<PrintJob>`.
//!
//! # Design
//!
//! - Worker events arrive as tasks posted to the coordinator loop through a
//!   [`JobEventSink`], which holds only a `Weak` reference to the job. Once
//!   the last external `Arc` is gone, late worker events are dropped.
//! - Every event is dispatched to the job's own reaction first, then
//!   published on the [`EventBus`]. Handlers may call back into the job.
//! - Stopping never blocks the coordinator thread on the worker. The
//!   blocking `stop()` runs on a [`BlockingPool`] and its reply marks the
//!   job stopped. On hosts with a [`HostEventPump`], native events are
//!   pumped until the worker thread exits first.
//! - Any call that can run user handlers or the worker reply holds a strong
//!   self-reference for its duration, so a handler that releases the last
//!   external `Arc` cannot free the job mid-call.
//! - State lives behind a mutex that is never held across a call into the
//!   worker, the bus, or a nested message loop run.
//! - The job is only released on its coordinator thread. Tasks posted to the
//!   worker hold it weakly and hand any upgraded reference back to the loop.
//! - Flushes run as nested loop levels, each ending on its own timer. A
//!   shared guard lets `stop()` end all of them at once.

use crate::bus::{EventBus, NotificationType};
use crate::document::{PrintedDocument, PrintedPage, PrintedPagesSource};
use crate::error::{Result, SpoolError};
use crate::events::{JobEventDetails, JobEventType, JobId};
use crate::message_loop::{self, LoopHandle, Task};
use crate::platform::{self, HostEventPump};
use crate::pool::BlockingPool;
use crate::settings::PrintSettings;
use crate::worker::{JobWorker, PrintJobWorkerOwner};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long one host pump round waits for native input during shutdown.
pub const DEFAULT_DRAIN_POLL: Duration = Duration::from_millis(10);

/// Shared infrastructure a job runs against.
#[derive(Clone)]
pub struct JobContext {
    pub bus: Arc<EventBus>,
    pub pool: Arc<dyn BlockingPool>,
    pub host_pump: Option<Arc<dyn HostEventPump>>,
    pub drain_poll: Duration,
}

impl JobContext {
    pub fn new(bus: Arc<EventBus>, pool: Arc<dyn BlockingPool>) -> Self {
        Self {
            bus,
            pool,
            host_pump: None,
            drain_poll: DEFAULT_DRAIN_POLL,
        }
    }

    pub fn with_host_pump(mut self, pump: Arc<dyn HostEventPump>) -> Self {
        self.host_pump = Some(pump);
        self
    }

    pub fn with_drain_poll(mut self, poll: Duration) -> Self {
        self.drain_poll = poll;
        self
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("bus", &self.bus)
            .field("host_pump", &self.host_pump.is_some())
            .field("drain_poll", &self.drain_poll)
            .finish()
    }
}

/// Where a worker sends its events.
///
/// Each event becomes a task on the job's coordinator loop. Cloneable and
/// safe to use from any thread.
#[derive(Clone)]
pub struct JobEventSink {
    job: Weak<PrintJob>,
    job_id: JobId,
    ui_loop: LoopHandle,
}

impl JobEventSink {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Queue an event for the job. Returns `false` if the job has been
    /// released or its loop is gone.
    pub fn post_event(
        &self,
        event_type: JobEventType,
        document: Option<Arc<PrintedDocument>>,
        page: Option<Arc<PrintedPage>>,
    ) -> bool {
        let Some(job) = self.job.upgrade() else {
            debug!("Dropping {} for {}: job released", event_type, self.job_id);
            return false;
        };
        let details = JobEventDetails::new(event_type, document, page);
        match self.ui_loop.post_task(move || job.notify(details)) {
            Ok(()) => true,
            Err(err) => {
                warn!("Dropping {} for {}: {}", event_type, self.job_id, err);
                false
            }
        }
    }
}

impl std::fmt::Debug for JobEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEventSink")
            .field("job_id", &self.job_id)
            .field("job_alive", &(self.job.strong_count() > 0))
            .finish()
    }
}

#[derive(Default)]
struct JobState {
    document: Option<Arc<PrintedDocument>>,
    settings: PrintSettings,
    source: Option<Weak<dyn PrintedPagesSource>>,
    is_job_pending: bool,
    is_canceling: bool,
    is_stopping: bool,
    is_stopped: bool,
    /// Set between `initialize` and the end of `stop`.
    observing_own_events: bool,
}

/// Shared by every flush level running on the job. Each level waits on a
/// `Weak` to it; `stop()` drops it, which ends them all.
struct FlushGuard;

#[derive(Default)]
struct FlushState {
    guard: Option<Arc<FlushGuard>>,
    active: usize,
}

pub struct PrintJob {
    id: JobId,
    ui_loop: LoopHandle,
    context: JobContext,
    worker: OnceLock<Box<dyn JobWorker>>,
    state: Mutex<JobState>,
    flush: Mutex<FlushState>,
    weak_self: Weak<PrintJob>,
}

impl PrintJob {
    /// Create an idle job bound to the calling thread's message loop.
    pub fn new(context: JobContext) -> Result<Arc<Self>> {
        let ui_loop = message_loop::current().ok_or(SpoolError::NoMessageLoop)?;
        let id = JobId::next();
        debug!("Created print job {}", id);
        Ok(Arc::new_cyclic(|weak_self| Self {
            id,
            ui_loop,
            context,
            worker: OnceLock::new(),
            state: Mutex::new(JobState::default()),
            flush: Mutex::new(FlushState::default()),
            weak_self: weak_self.clone(),
        }))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Strong reference to `self`, held across calls that may run handlers.
    fn handle(&self) -> Arc<PrintJob> {
        self.weak_self
            .upgrade()
            .expect("print job methods are only reachable through a live Arc")
    }

    fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().expect("print job state lock poisoned")
    }

    fn flush_state(&self) -> MutexGuard<'_, FlushState> {
        self.flush.lock().expect("flush state lock poisoned")
    }

    /// Worker tasks hold the job weakly and upgrade only while they run. The
    /// upgraded reference goes back to the coordinator loop so the last one is
    /// never released on the worker thread.
    fn release_on_coordinator(job: Arc<PrintJob>) {
        let ui_loop = job.ui_loop.clone();
        if ui_loop.post_task(move || drop(job)).is_err() {
            debug!("Coordinator loop gone; releasing print job reference in place");
        }
    }

    fn assert_on_coordinator_thread(&self) {
        assert!(
            self.ui_loop.runs_tasks_on_current_thread(),
            "print job {} used off its coordinator thread",
            self.id
        );
    }

    fn live_worker(&self) -> Option<&dyn JobWorker> {
        self.worker
            .get()
            .map(|worker| &**worker)
            .filter(|worker| worker.is_thread_alive())
    }

    fn post_to_worker(&self, worker: &dyn JobWorker, what: &str, task: Task) {
        if let Err(err) = worker.post_task(task) {
            debug!("Print job {}: {} not delivered: {}", self.id, what, err);
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Take the worker from `owner` and create the document to print.
    ///
    /// # Panics
    ///
    /// If called twice, off the coordinator thread, or on a job that already
    /// has a source or a pending print.
    pub fn initialize(
        &self,
        owner: &dyn PrintJobWorkerOwner,
        source: Option<Weak<dyn PrintedPagesSource>>,
        page_count: u32,
    ) -> Result<()> {
        self.assert_on_coordinator_thread();
        {
            let state = self.state();
            assert!(
                state.source.is_none()
                    && state.document.is_none()
                    && !state.is_job_pending
                    && !state.is_canceling,
                "print job {} initialized while in use",
                self.id
            );
        }
        assert!(self.worker.get().is_none(), "print job {} initialized twice", self.id);

        let sink = JobEventSink {
            job: self.weak_self.clone(),
            job_id: self.id,
            ui_loop: self.ui_loop.clone(),
        };
        let worker = owner.detach_worker(sink)?;
        assert!(
            self.worker.set(worker).is_ok(),
            "print job {} initialized twice",
            self.id
        );

        let settings = owner.settings();
        let cookie = owner.cookie();
        let document = Arc::new(PrintedDocument::new(settings.clone(), source.clone(), cookie));
        document.set_page_count(page_count);
        {
            let mut state = self.state();
            state.source = source;
            state.settings = settings;
        }
        self.update_printed_document(Some(document));
        self.state().observing_own_events = true;

        info!(
            "Print job {} initialized: cookie {}, {} page(s)",
            self.id, cookie, page_count
        );
        Ok(())
    }

    /// Hand the document to the worker and publish `NewDoc`.
    ///
    /// No-op if already pending, stopping or stopped, or if the worker
    /// thread is not running.
    pub fn start(&self) {
        self.assert_on_coordinator_thread();
        let Some(worker) = self.worker.get() else {
            warn!("Print job {} started before initialize", self.id);
            return;
        };
        let document = {
            let state = self.state();
            if state.is_job_pending || state.is_stopping || state.is_stopped {
                debug!("Print job {} already started", self.id);
                return;
            }
            state.document.clone()
        };
        let Some(document) = document else {
            warn!("Print job {} has no document to print", self.id);
            return;
        };
        if !worker.is_thread_alive() {
            warn!("Print job {}: worker thread is not running", self.id);
            return;
        }

        let job = self.weak_self.clone();
        let to_print = Arc::clone(&document);
        let posted = worker.post_task(Box::new(move || {
            let Some(job) = job.upgrade() else {
                return;
            };
            if let Some(worker) = job.worker.get() {
                worker.start_printing(to_print);
            }
            Self::release_on_coordinator(job);
        }));
        if let Err(err) = posted {
            warn!("Print job {} could not reach its worker: {}", self.id, err);
            return;
        }

        self.state().is_job_pending = true;
        info!("Print job {} started '{}'", self.id, document.name());
        self.notify(JobEventDetails::new(JobEventType::NewDoc, Some(document), None));
    }

    /// Abort the job: cancel the worker, publish `Failed`, then stop.
    ///
    /// Re-entrant calls while a cancel is in progress are ignored.
    pub fn cancel(&self) {
        self.assert_on_coordinator_thread();
        {
            let mut state = self.state();
            if state.is_canceling {
                debug!("Print job {} cancel already in progress", self.id);
                return;
            }
            state.is_canceling = true;
        }
        let _keep_alive = self.handle();
        info!("Print job {} canceling", self.id);

        if let Some(worker) = self.live_worker() {
            worker.cancel();
        }
        self.notify(JobEventDetails::new(JobEventType::Failed, None, None));
        self.stop();

        self.state().is_canceling = false;
    }

    /// End the job without waiting for the worker thread.
    ///
    /// Also ends a flush in progress right away.
    pub fn stop(&self) {
        self.assert_on_coordinator_thread();
        {
            let mut flush = self.flush_state();
            if flush.guard.take().is_some() {
                debug!("Print job {} ending {} flush level(s)", self.id, flush.active);
            }
        }

        let _keep_alive = self.handle();
        if let Some(worker) = self.live_worker() {
            self.controlled_worker_shutdown(worker);
            let mut state = self.state();
            state.is_job_pending = false;
            state.observing_own_events = false;
        }
        self.update_printed_document(None);
    }

    fn controlled_worker_shutdown(&self, worker: &dyn JobWorker) {
        {
            let state = self.state();
            if state.is_stopping || state.is_stopped {
                debug!("Print job {} worker shutdown already under way", self.id);
                return;
            }
        }

        if let Some(pump) = &self.context.host_pump {
            let rounds =
                platform::drain_until_worker_exits(pump.as_ref(), worker, self.context.drain_poll);
            debug!("Print job {} worker exited after {} pump round(s)", self.id, rounds);
        }

        self.state().is_stopping = true;

        let stopping = self.handle();
        let replying = self.handle();
        let stop_worker: Task = Box::new(move || {
            if let Some(worker) = stopping.worker.get() {
                worker.stop();
            }
        });
        let mark_stopped: Task = Box::new(move || replying.hold_until_stop_is_called());

        if let Err(err) = self
            .context
            .pool
            .post_and_reply(stop_worker, &self.ui_loop, mark_stopped)
        {
            error!(
                "Print job {}: {}; stopping the worker on the coordinator thread",
                self.id, err
            );
            worker.stop();
            let job = self.handle();
            if let Err(err) = self.ui_loop.post_task(move || job.hold_until_stop_is_called()) {
                error!("Print job {} cannot finish stopping: {}", self.id, err);
            }
        }
    }

    /// Reply of the background worker stop.
    fn hold_until_stop_is_called(&self) {
        self.assert_on_coordinator_thread();
        {
            let mut state = self.state();
            state.is_stopped = true;
            state.is_stopping = false;
        }
        info!("Print job {} worker stopped", self.id);
    }

    /// Spin the coordinator loop until the job stops or `timeout` passes.
    ///
    /// Always returns `true`; check [`is_job_pending`](Self::is_job_pending)
    /// afterwards to tell the two apart.
    ///
    /// Flushes may nest (a handler can flush while an outer flush waits).
    /// Each level ends on its own timeout without disturbing the others, and
    /// `stop()` ends every level.
    pub fn flush_with_timeout(&self, timeout: Duration) -> bool {
        self.assert_on_coordinator_thread();
        let _keep_alive = self.handle();

        let guard = {
            let mut flush = self.flush_state();
            flush.active += 1;
            Arc::downgrade(flush.guard.get_or_insert_with(|| Arc::new(FlushGuard)))
        };
        let expired = Arc::new(AtomicBool::new(false));
        let timer = Arc::downgrade(&expired);

        let posted = self.ui_loop.post_delayed_task(
            move || {
                if let Some(expired) = timer.upgrade() {
                    expired.store(true, Ordering::SeqCst);
                }
            },
            timeout,
        );
        match posted {
            Ok(()) => {
                debug!("Print job {} flushing for up to {:?}", self.id, timeout);
                message_loop::run_nested_until(|| {
                    expired.load(Ordering::SeqCst) || guard.upgrade().is_none()
                });
            }
            Err(err) => warn!("Print job {} cannot flush: {}", self.id, err),
        }

        let mut flush = self.flush_state();
        flush.active -= 1;
        if flush.active == 0 {
            flush.guard = None;
        }
        true
    }

    /// Forget the originating source, here and in the document.
    pub fn disconnect_source(&self) {
        let document = {
            let mut state = self.state();
            state.source = None;
            state.document.clone()
        };
        if let Some(document) = document {
            document.disconnect_source();
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Swap the current document and tell the worker about it.
    ///
    /// Setting the same document again does nothing.
    pub(crate) fn update_printed_document(&self, new_document: Option<Arc<PrintedDocument>>) {
        let is_job_pending = {
            let mut state = self.state();
            let unchanged = match (&state.document, &new_document) {
                (Some(current), Some(new)) => Arc::ptr_eq(current, new),
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                return;
            }
            state.document = new_document.clone();
            if let Some(document) = &new_document {
                state.settings = document.settings().clone();
            }
            state.is_job_pending
        };

        if let Some(worker) = self.live_worker() {
            assert!(
                !is_job_pending,
                "print job {} swapped its document while pending",
                self.id
            );
            let job = self.weak_self.clone();
            self.post_to_worker(
                worker,
                "document change",
                Box::new(move || {
                    let Some(job) = job.upgrade() else {
                        return;
                    };
                    if let Some(worker) = job.worker.get() {
                        worker.on_document_changed(new_document);
                    }
                    Self::release_on_coordinator(job);
                }),
            );
        }
    }

    /// Dispatch an event: the job's own reaction first, then the bus.
    pub(crate) fn notify(&self, details: JobEventDetails) {
        self.assert_on_coordinator_thread();
        let _keep_alive = self.handle();
        let details = Arc::new(details);

        let observing = self.state().observing_own_events;
        if observing {
            self.on_print_job_event(&details);
        }
        self.context
            .bus
            .publish(NotificationType::PrintJobEvent, self.id, details);
    }

    fn on_print_job_event(&self, details: &JobEventDetails) {
        match details.event_type() {
            JobEventType::Failed => {
                self.state().settings.clear();
                // The worker has already invalidated itself.
                self.stop();
            }
            JobEventType::UserInitDone
            | JobEventType::DefaultInitDone
            | JobEventType::UserInitCanceled => {
                let matches = details.is_for_document(self.state().document.as_ref());
                assert!(
                    matches,
                    "print job {} got {} for another document",
                    self.id,
                    details.event_type()
                );
            }
            JobEventType::NewDoc
            | JobEventType::NewPage
            | JobEventType::PageDone
            | JobEventType::JobDone
            | JobEventType::AllPagesRequested => {}
            JobEventType::DocDone => {
                // Finish later: handlers of this very event still see a pending job.
                let job = self.handle();
                if let Err(err) = self.ui_loop.post_task(move || job.on_document_done()) {
                    error!("Print job {} cannot complete: {}", self.id, err);
                }
            }
        }
    }

    fn on_document_done(&self) {
        self.stop();
        let document = self.document();
        info!("Print job {} done", self.id);
        self.notify(JobEventDetails::new(JobEventType::JobDone, document, None));
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn is_job_pending(&self) -> bool {
        self.state().is_job_pending
    }

    pub fn is_canceling(&self) -> bool {
        self.state().is_canceling
    }

    pub fn is_stopping(&self) -> bool {
        self.state().is_stopping
    }

    pub fn is_stopped(&self) -> bool {
        self.state().is_stopped
    }

    pub fn document(&self) -> Option<Arc<PrintedDocument>> {
        self.state().document.clone()
    }

    pub fn settings(&self) -> PrintSettings {
        self.state().settings.clone()
    }

    /// Cookie of the current document, 0 when there is none.
    pub fn cookie(&self) -> i32 {
        self.state().document.as_ref().map_or(0, |document| document.cookie())
    }

    /// Whether a source is still connected and alive.
    pub fn has_source(&self) -> bool {
        self.state()
            .source
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some()
    }
}

impl Drop for PrintJob {
    fn drop(&mut self) {
        if thread::panicking() {
            return;
        }
        debug_assert!(
            self.ui_loop.runs_tasks_on_current_thread(),
            "print job {} released off its coordinator thread",
            self.id
        );
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        assert!(!state.is_job_pending, "print job {} dropped while pending", self.id);
        assert!(!state.is_canceling, "print job {} dropped while canceling", self.id);
        debug!("Print job {} released", self.id);
    }
}

impl std::fmt::Debug for PrintJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("PrintJob")
            .field("id", &self.id)
            .field("document", &state.document.as_ref().map(|d| d.name().to_string()))
            .field("is_job_pending", &state.is_job_pending)
            .field("is_stopping", &state.is_stopping)
            .field("is_stopped", &state.is_stopped)
            .finish()
    }
}
