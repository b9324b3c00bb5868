//! `spool run`: drive one print job on a simulated device and summarize it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use spool_job::{
    EventBus, JobContext, JobControl, JobEventType, JobId, MessageLoop, NotificationType,
    NullPrintJob, PrintJob, PrintJobWorker, PrintSettings, PrinterQuery, SimulatedBackend,
    SourceFilter, SpoolConfig, SubscriptionId, WorkerPool,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// How long to wait for the worker to finish stopping after the flush.
const STOP_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub pages: u32,
    pub page_delay: Duration,
    pub flush_timeout: Duration,
    pub cancel_after_pages: Option<u32>,
    pub fail_at_page: Option<u32>,
    pub device: String,
    pub title: String,
    pub copies: u32,
    pub cookie: i32,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Failed,
    Canceled,
    TimedOut,
    DryRun,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Completed | Self::DryRun)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub event: JobEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub job_id: Option<JobId>,
    pub cookie: i32,
    pub document: String,
    pub device: String,
    pub pages_requested: u32,
    pub pages_printed: u32,
    pub outcome: Outcome,
    pub stopped: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub events: Vec<EventRecord>,
}

/// Records a job's events and cancels it after a number of pages if asked.
struct EventRecorder {
    subscription: SubscriptionId,
    records: Arc<Mutex<Vec<EventRecord>>>,
    cancel_requested: Arc<AtomicBool>,
}

impl EventRecorder {
    fn attach(bus: &EventBus, job: &Arc<PrintJob>, cancel_after_pages: Option<u32>) -> Self {
        let records = Arc::new(Mutex::new(Vec::new()));
        let cancel_requested = Arc::new(AtomicBool::new(false));
        let pages_done = AtomicU32::new(0);

        let weak_job = Arc::downgrade(job);
        let sink = Arc::clone(&records);
        let requested = Arc::clone(&cancel_requested);
        let subscription = bus.subscribe(
            NotificationType::PrintJobEvent,
            SourceFilter::Job(job.id()),
            move |notification| {
                let details = &notification.details;
                sink.lock().expect("event records lock poisoned").push(EventRecord {
                    event: details.event_type(),
                    page: details.page().map(|page| page.page_number()),
                    at: Utc::now(),
                });

                if details.event_type() != JobEventType::PageDone {
                    return;
                }
                let done = pages_done.fetch_add(1, Ordering::SeqCst) + 1;
                if cancel_after_pages == Some(done) {
                    if let Some(job) = weak_job.upgrade() {
                        info!("Canceling {} after {} page(s)", job.id(), done);
                        requested.store(true, Ordering::SeqCst);
                        job.cancel();
                    }
                }
            },
        );

        Self {
            subscription,
            records,
            cancel_requested,
        }
    }

    fn records(&self) -> Vec<EventRecord> {
        self.records.lock().expect("event records lock poisoned").clone()
    }

    fn saw(&self, event_type: JobEventType) -> bool {
        self.records
            .lock()
            .expect("event records lock poisoned")
            .iter()
            .any(|record| record.event == event_type)
    }
}

pub fn run_print_job(options: &RunOptions, config: &SpoolConfig) -> Result<RunSummary> {
    let started_at = Utc::now();
    if options.dry_run {
        return Ok(dry_run(options, started_at));
    }

    let message_loop = MessageLoop::new().context("Failed to install message loop")?;
    let pool = Arc::new(
        WorkerPool::new("spool-pool", config.pool_threads, config.pool_queue)
            .context("Failed to start background pool")?,
    );
    let bus = Arc::new(EventBus::new());
    let context = JobContext::new(Arc::clone(&bus), pool.clone()).with_drain_poll(config.drain_poll());

    let mut backend = SimulatedBackend::new(options.page_delay);
    if let Some(page) = options.fail_at_page {
        backend = backend.failing_at(page);
    }
    let worker = PrintJobWorker::spawn(config.worker_thread_name.clone(), Arc::new(backend))
        .context("Failed to start print worker")?;
    let settings = PrintSettings::for_device(options.device.as_str())
        .with_title(options.title.as_str())
        .with_copies(options.copies);
    let query = PrinterQuery::new(options.cookie, settings, Box::new(worker));

    let job = PrintJob::new(context)?;
    job.initialize(&query, None, options.pages)?;
    let document = job.document().context("Initialized job has no document")?;
    let recorder = EventRecorder::attach(&bus, &job, options.cancel_after_pages);

    let control: Arc<dyn JobControl> = job.clone();
    control.start();
    control.flush_with_timeout(options.flush_timeout);

    let timed_out = control.is_job_pending();
    if timed_out {
        warn!(
            "{} still printing after {:?}; canceling",
            job.id(),
            options.flush_timeout
        );
        control.cancel();
    }

    let stopped = message_loop.run_until(|| control.is_stopped(), STOP_WAIT);
    if !stopped {
        warn!("{} worker did not stop within {:?}", job.id(), STOP_WAIT);
    }

    let outcome = if recorder.saw(JobEventType::JobDone) {
        Outcome::Completed
    } else if recorder.cancel_requested.load(Ordering::SeqCst) {
        Outcome::Canceled
    } else if timed_out {
        Outcome::TimedOut
    } else {
        Outcome::Failed
    };
    info!("{} finished: {:?}", job.id(), outcome);
    bus.unsubscribe(recorder.subscription);

    Ok(RunSummary {
        job_id: Some(job.id()),
        cookie: document.cookie(),
        document: document.name().to_string(),
        device: document.settings().device_name.clone(),
        pages_requested: options.pages,
        pages_printed: document.pages_received(),
        outcome,
        stopped,
        started_at,
        finished_at: Utc::now(),
        events: recorder.records(),
    })
}

fn dry_run(options: &RunOptions, started_at: DateTime<Utc>) -> RunSummary {
    let control: Arc<dyn JobControl> = Arc::new(NullPrintJob::new(options.cookie));
    control.start();
    control.flush_with_timeout(options.flush_timeout);
    info!("Dry run for cookie {}: nothing printed", options.cookie);

    RunSummary {
        job_id: None,
        cookie: control.cookie(),
        document: options.title.clone(),
        device: options.device.clone(),
        pages_requested: options.pages,
        pages_printed: 0,
        outcome: Outcome::DryRun,
        stopped: control.is_stopped(),
        started_at,
        finished_at: Utc::now(),
        events: Vec::new(),
    }
}
