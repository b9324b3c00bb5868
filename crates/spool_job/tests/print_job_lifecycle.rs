//! End-to-end lifecycle of a print job against a real worker thread.

mod common;

use common::{count, Harness, WAIT};
use spool_job::{
    message_loop, BlockingPool, HostEventPump, JobContext, JobEventType, NotificationType,
    PrintJob, PrintedPagesSource, SimulatedBackend, SourceFilter, WorkerPool,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

fn subscribe_with_job<F>(harness: &Harness, job: &Arc<PrintJob>, handler: F)
where
    F: Fn(JobEventType, &PrintJob) + Send + Sync + 'static,
{
    let weak: Weak<PrintJob> = Arc::downgrade(job);
    harness.bus.subscribe(
        NotificationType::PrintJobEvent,
        SourceFilter::Job(job.id()),
        move |notification| {
            if let Some(job) = weak.upgrade() {
                handler(notification.details.event_type(), &job);
            }
        },
    );
}

#[test]
fn test_successful_job_event_sequence() {
    let harness = Harness::new(SimulatedBackend::default());
    let (job, log) = harness.job(3);
    let document = job.document().unwrap();

    job.start();
    assert!(job.is_job_pending());
    assert!(harness.run_until(|| job.is_stopped()));

    assert_eq!(
        log.types(),
        vec![
            JobEventType::NewDoc,
            JobEventType::NewPage,
            JobEventType::PageDone,
            JobEventType::NewPage,
            JobEventType::PageDone,
            JobEventType::NewPage,
            JobEventType::PageDone,
            JobEventType::AllPagesRequested,
            JobEventType::DocDone,
            JobEventType::JobDone,
        ]
    );
    assert!(document.is_complete());
    assert!(!job.is_job_pending());
    assert!(!job.is_stopping());
    assert!(job.document().is_none());
    assert_eq!(count(&harness.calls.start_printing), 1);
    assert_eq!(count(&harness.calls.stop), 1);
    assert_eq!(count(&harness.calls.cancel), 0);
}

#[test]
fn test_doc_done_handlers_still_see_a_pending_job() {
    let harness = Harness::new(SimulatedBackend::default());
    let (job, _log) = harness.job(1);
    let pending_at_doc_done = Arc::new(Mutex::new(None));

    let slot = Arc::clone(&pending_at_doc_done);
    subscribe_with_job(&harness, &job, move |event_type, job| {
        if event_type == JobEventType::DocDone {
            *slot.lock().unwrap() = Some(job.is_job_pending());
        }
    });

    job.start();
    assert!(harness.run_until(|| job.is_stopped()));
    assert_eq!(*pending_at_doc_done.lock().unwrap(), Some(true));
}

#[test]
fn test_reentrant_cancel_publishes_one_failed() {
    let harness = Harness::new(SimulatedBackend::new(Duration::from_millis(20)));
    let (job, log) = harness.job(50);

    subscribe_with_job(&harness, &job, |event_type, job| {
        if event_type == JobEventType::Failed {
            job.cancel();
        }
    });

    job.start();
    assert!(harness.run_until(|| log.count(JobEventType::PageDone) >= 1));

    job.cancel();

    assert_eq!(log.count(JobEventType::Failed), 1);
    assert_eq!(count(&harness.calls.cancel), 1);
    assert!(!job.is_job_pending());
    assert!(!job.is_canceling());
    assert!(harness.run_until(|| job.is_stopped()));
    assert_eq!(log.count(JobEventType::DocDone), 0);
    assert_eq!(log.count(JobEventType::JobDone), 0);
}

#[test]
fn test_pending_and_stopped_never_overlap() {
    let harness = Harness::new(SimulatedBackend::default());
    let (job, _log) = harness.job(4);
    let overlaps = Arc::new(AtomicUsize::new(0));
    let observed = Arc::new(AtomicUsize::new(0));

    let (seen_overlap, seen) = (Arc::clone(&overlaps), Arc::clone(&observed));
    subscribe_with_job(&harness, &job, move |_, job| {
        seen.fetch_add(1, Ordering::SeqCst);
        if job.is_job_pending() && job.is_stopped() {
            seen_overlap.fetch_add(1, Ordering::SeqCst);
        }
    });

    job.start();
    assert!(harness.run_until(|| {
        assert!(!(job.is_job_pending() && job.is_stopped()));
        job.is_stopped()
    }));
    assert!(observed.load(Ordering::SeqCst) > 0);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn test_worker_failure_stops_job_without_cancel() {
    let harness = Harness::new(SimulatedBackend::default().failing_at(2));
    let (job, log) = harness.job(3);
    let pending_at_failed = Arc::new(Mutex::new(None));

    let slot = Arc::clone(&pending_at_failed);
    subscribe_with_job(&harness, &job, move |event_type, job| {
        if event_type == JobEventType::Failed {
            *slot.lock().unwrap() = Some(job.is_job_pending());
        }
    });

    job.start();
    assert!(harness.run_until(|| job.is_stopped()));

    assert_eq!(
        log.types(),
        vec![
            JobEventType::NewDoc,
            JobEventType::NewPage,
            JobEventType::PageDone,
            JobEventType::Failed,
        ]
    );
    // The job reacts before bus subscribers see the event.
    assert_eq!(*pending_at_failed.lock().unwrap(), Some(false));
    assert_eq!(count(&harness.calls.cancel), 0);
    assert!(job.settings().is_empty());
}

#[test]
fn test_flush_returns_when_job_finishes() {
    let harness = Harness::new(SimulatedBackend::new(Duration::from_millis(5)));
    let (job, _log) = harness.job(3);

    job.start();
    let started = Instant::now();
    assert!(job.flush_with_timeout(WAIT));

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!job.is_job_pending());
    assert!(harness.run_until(|| job.is_stopped()));
}

#[test]
fn test_flush_times_out_while_pending() {
    let harness = Harness::new(SimulatedBackend::new(Duration::from_millis(50)));
    let (job, log) = harness.job(100);

    job.start();
    let started = Instant::now();
    assert!(job.flush_with_timeout(Duration::from_millis(100)));
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2));
    assert!(job.is_job_pending());
    assert_eq!(log.count(JobEventType::JobDone), 0);

    job.cancel();
    assert!(harness.run_until(|| job.is_stopped()));
}

#[test]
fn test_nested_flush_keeps_outer_timeout() {
    let harness = Harness::new(SimulatedBackend::new(Duration::from_millis(50)));
    let (job, _log) = harness.job(100);
    let nested = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&nested);
    subscribe_with_job(&harness, &job, move |event, job| {
        if event == JobEventType::PageDone {
            counter.fetch_add(1, Ordering::SeqCst);
            assert!(job.flush_with_timeout(Duration::from_millis(10)));
        }
    });

    job.start();
    let started = Instant::now();
    assert!(job.flush_with_timeout(Duration::from_millis(300)));
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(2), "outer flush took {:?}", elapsed);
    assert!(count(&nested) >= 1);
    assert!(job.is_job_pending());

    job.cancel();
    assert!(harness.run_until(|| job.is_stopped()));
}

#[test]
fn test_stop_ends_every_flush_level() {
    let harness = Harness::new(SimulatedBackend::new(Duration::from_millis(5)));
    let (job, log) = harness.job(4);
    let inner_returned = Arc::new(AtomicBool::new(false));
    let entered = Arc::new(AtomicBool::new(false));

    let returned = Arc::clone(&inner_returned);
    let once = Arc::clone(&entered);
    subscribe_with_job(&harness, &job, move |event, job| {
        if event == JobEventType::PageDone && !once.swap(true, Ordering::SeqCst) {
            job.flush_with_timeout(Duration::MAX);
            returned.store(true, Ordering::SeqCst);
        }
    });

    job.start();
    let started = Instant::now();
    assert!(job.flush_with_timeout(Duration::MAX));

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(inner_returned.load(Ordering::SeqCst));
    assert_eq!(log.count(JobEventType::JobDone), 1);
    assert!(!job.is_job_pending());
    assert!(harness.run_until(|| job.is_stopped()));
}

#[test]
fn test_unbounded_flush_waits_for_the_job() {
    let harness = Harness::new(SimulatedBackend::new(Duration::from_millis(5)));
    let (job, log) = harness.job(3);

    job.start();
    assert!(job.flush_with_timeout(Duration::MAX));

    assert!(!job.is_job_pending());
    assert_eq!(log.count(JobEventType::PageDone), 3);
    assert!(harness.run_until(|| job.is_stopped()));
}

#[test]
fn test_stale_flush_timeout_does_not_quit_outer_run() {
    let harness = Harness::new(SimulatedBackend::default());
    let (job, _log) = harness.job(2);

    job.start();
    let started = Instant::now();
    job.flush_with_timeout(Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_millis(300));
    drop(job);

    harness
        .message_loop
        .handle()
        .post_delayed_task(
            || {
                message_loop::quit_current();
            },
            Duration::from_millis(600),
        )
        .unwrap();
    harness.message_loop.run();

    assert!(started.elapsed() >= Duration::from_millis(600));
}

#[test]
fn test_stop_shuts_worker_down_once() {
    let harness = Harness::new(SimulatedBackend::new(Duration::from_millis(20)));
    let (job, _log) = harness.job(50);

    job.start();
    job.stop();
    assert!(job.is_stopping() || job.is_stopped());
    job.stop();

    assert!(harness.run_until(|| job.is_stopped()));
    job.stop();
    harness.message_loop.run_until_idle();

    assert_eq!(count(&harness.calls.stop), 1);
    assert!(!job.is_job_pending());
    assert!(!job.is_stopping());
}

#[test]
fn test_start_after_stop_is_ignored() {
    let harness = Harness::new(SimulatedBackend::default());
    let (job, log) = harness.job(2);

    job.stop();
    assert!(harness.run_until(|| job.is_stopped()));
    job.start();

    assert!(!job.is_job_pending());
    assert_eq!(log.count(JobEventType::NewDoc), 0);
    assert_eq!(count(&harness.calls.start_printing), 0);
}

#[test]
fn test_closed_pool_still_stops_the_job() {
    let harness = Harness::new(SimulatedBackend::new(Duration::from_millis(5)));
    let (job, _log) = harness.job(20);

    job.start();
    harness.pool.shutdown();
    job.stop();

    assert!(!job.is_job_pending());
    assert_eq!(count(&harness.calls.stop), 1);
    assert!(harness.run_until(|| job.is_stopped()));
}

#[test]
fn test_full_pool_stops_the_job_without_blocking() {
    let harness = Harness::new(SimulatedBackend::new(Duration::from_millis(5)));
    let busy = Arc::new(WorkerPool::new("busy-pool", 1, 1).unwrap());
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    // Occupy the only pool thread, then fill the one queue slot.
    busy.post_and_reply(
        Box::new(move || {
            entered_tx.send(()).unwrap();
            let _ = release_rx.recv();
        }),
        &harness.message_loop.handle(),
        Box::new(|| {}),
    )
    .unwrap();
    entered_rx.recv_timeout(WAIT).unwrap();
    busy.post_and_reply(Box::new(|| {}), &harness.message_loop.handle(), Box::new(|| {}))
        .unwrap();

    let pool: Arc<dyn BlockingPool> = busy.clone();
    let (job, _log) = harness.job_with_context(JobContext::new(Arc::clone(&harness.bus), pool), 20);

    job.start();
    let started = Instant::now();
    job.stop();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(count(&harness.calls.stop), 1);
    assert!(harness.run_until(|| job.is_stopped()));
    release_tx.send(()).unwrap();
}

#[test]
fn test_job_is_released_on_its_coordinator_thread() {
    let harness = Harness::new(SimulatedBackend::default());
    let (job, _log) = harness.job(1);
    let released: Weak<PrintJob> = Arc::downgrade(&job);

    // Stopping hands a document change to the worker thread, which holds the
    // job until the change is delivered.
    job.stop();
    drop(job);

    assert!(harness.run_until(|| released.upgrade().is_none()));
    assert_eq!(
        *harness.calls.dropped_on.lock().unwrap(),
        Some(thread::current().id())
    );
}

#[derive(Default)]
struct CountingPump {
    rounds: AtomicUsize,
}

impl HostEventPump for CountingPump {
    fn pump_pending(&self) {
        self.rounds.fetch_add(1, Ordering::SeqCst);
    }

    fn wait_for_input(&self, timeout: Duration) {
        thread::sleep(timeout);
    }
}

#[test]
fn test_host_pump_drains_until_worker_exits() {
    let harness = Harness::new(SimulatedBackend::new(Duration::from_millis(5)));
    let pump = Arc::new(CountingPump::default());
    let context = harness
        .context()
        .with_host_pump(pump.clone())
        .with_drain_poll(Duration::from_millis(1));
    let (job, _log) = harness.job_with_context(context, 20);

    job.start();
    job.stop();

    // The drain finished before stop() returned.
    assert_eq!(count(&harness.calls.stop_soon), 1);
    assert!(harness.run_until(|| job.is_stopped()));
    assert_eq!(count(&harness.calls.stop), 1);
}

struct Tab {
    title: String,
}

impl PrintedPagesSource for Tab {
    fn source_name(&self) -> String {
        self.title.clone()
    }
}

#[test]
fn test_disconnect_source() {
    let harness = Harness::new(SimulatedBackend::default());
    let tab: Arc<dyn PrintedPagesSource> = Arc::new(Tab {
        title: "Invoice 7".to_string(),
    });
    let job = PrintJob::new(harness.context()).unwrap();
    job.initialize(&harness.query(), Some(Arc::downgrade(&tab)), 1)
        .unwrap();

    let document = job.document().unwrap();
    assert_eq!(document.name(), "Invoice 7");
    assert!(job.has_source());

    job.disconnect_source();

    assert!(!job.has_source());
    assert!(!document.has_source());
    assert_eq!(Arc::strong_count(&tab), 1);
}

#[test]
fn test_all_sources_subscriber_sees_job_done() {
    let harness = Harness::new(SimulatedBackend::default());
    let done = Arc::new(AtomicBool::new(false));
    let (job, _log) = harness.job(1);

    let flag = Arc::clone(&done);
    harness.bus.subscribe(
        NotificationType::PrintJobEvent,
        SourceFilter::AllSources,
        move |notification| {
            if notification.details.event_type() == JobEventType::JobDone {
                flag.store(true, Ordering::SeqCst);
            }
        },
    );

    assert_eq!(job.cookie(), 42);
    job.start();
    assert!(harness.run_until(|| done.load(Ordering::SeqCst)));
    assert!(harness.run_until(|| job.is_stopped()));
    // The document is released on stop.
    assert_eq!(job.cookie(), 0);
}
