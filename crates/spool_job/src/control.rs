//! Object-safe view of a print job's controls.
//!
//! Embedders that may or may not have a real job to drive (a dry run, a
//! preview without a printer) hold an `Arc<dyn JobControl>` and swap in
//! [`NullPrintJob`] when there is nothing to print.

use crate::print_job::PrintJob;
use std::time::Duration;
use tracing::debug;

pub trait JobControl: Send + Sync {
    fn start(&self);
    fn cancel(&self);
    fn stop(&self);
    fn flush_with_timeout(&self, timeout: Duration) -> bool;
    fn disconnect_source(&self);
    fn is_job_pending(&self) -> bool;
    fn is_stopping(&self) -> bool;
    fn is_stopped(&self) -> bool;
    fn cookie(&self) -> i32;
}

impl JobControl for PrintJob {
    fn start(&self) {
        PrintJob::start(self);
    }

    fn cancel(&self) {
        PrintJob::cancel(self);
    }

    fn stop(&self) {
        PrintJob::stop(self);
    }

    fn flush_with_timeout(&self, timeout: Duration) -> bool {
        PrintJob::flush_with_timeout(self, timeout)
    }

    fn disconnect_source(&self) {
        PrintJob::disconnect_source(self);
    }

    fn is_job_pending(&self) -> bool {
        PrintJob::is_job_pending(self)
    }

    fn is_stopping(&self) -> bool {
        PrintJob::is_stopping(self)
    }

    fn is_stopped(&self) -> bool {
        PrintJob::is_stopped(self)
    }

    fn cookie(&self) -> i32 {
        PrintJob::cookie(self)
    }
}

/// A job with nothing to print. Never pending, always stopped.
#[derive(Debug, Default)]
pub struct NullPrintJob {
    cookie: i32,
}

impl NullPrintJob {
    pub fn new(cookie: i32) -> Self {
        Self { cookie }
    }
}

impl JobControl for NullPrintJob {
    fn start(&self) {
        debug!("Null print job {}: nothing to start", self.cookie);
    }

    fn cancel(&self) {}

    fn stop(&self) {}

    fn flush_with_timeout(&self, _timeout: Duration) -> bool {
        true
    }

    fn disconnect_source(&self) {}

    fn is_job_pending(&self) -> bool {
        false
    }

    fn is_stopping(&self) -> bool {
        false
    }

    fn is_stopped(&self) -> bool {
        true
    }

    fn cookie(&self) -> i32 {
        self.cookie
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_null_job_is_inert() {
        let job: Arc<dyn JobControl> = Arc::new(NullPrintJob::new(12));
        job.start();
        job.cancel();

        let started = Instant::now();
        assert!(job.flush_with_timeout(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(1));

        assert!(!job.is_job_pending());
        assert!(!job.is_stopping());
        assert!(job.is_stopped());
        assert_eq!(job.cookie(), 12);
    }
}
