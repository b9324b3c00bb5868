//! Print job coordination.
//!
//! A [`PrintJob`] takes a worker thread from a [`PrinterQuery`], hands it a
//! [`PrintedDocument`], relays the worker's progress as job events on an
//! [`EventBus`], and shuts the worker down without ever blocking its own
//! thread on it.
//!
//! ```no_run
//! use spool_job::{
//!     EventBus, JobContext, MessageLoop, PrintJob, PrintJobWorker, PrinterQuery,
//!     PrintSettings, SimulatedBackend, WorkerPool,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> spool_job::Result<()> {
//! let message_loop = MessageLoop::new()?;
//! let pool = Arc::new(WorkerPool::new("spool-pool", 2, 16)?);
//! let context = JobContext::new(Arc::new(EventBus::new()), pool);
//!
//! let worker = PrintJobWorker::spawn("print-worker", Arc::new(SimulatedBackend::default()))?;
//! let query = PrinterQuery::new(1, PrintSettings::for_device("laser"), Box::new(worker));
//!
//! let job = PrintJob::new(context)?;
//! job.initialize(&query, None, 3)?;
//! job.start();
//! job.flush_with_timeout(Duration::from_secs(5));
//! message_loop.run_until(|| job.is_stopped(), Duration::from_secs(5));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod bus;
pub mod cancel;
pub mod config;
pub mod control;
pub mod document;
pub mod error;
pub mod events;
pub mod message_loop;
pub mod platform;
pub mod pool;
pub mod print_job;
pub mod print_worker;
pub mod settings;
pub mod worker;

pub use backend::{PrintBackend, SimulatedBackend};
pub use bus::{EventBus, Notification, NotificationType, SourceFilter, SubscriptionId};
pub use cancel::CancellationToken;
pub use config::SpoolConfig;
pub use control::{JobControl, NullPrintJob};
pub use document::{PrintedDocument, PrintedPage, PrintedPagesSource};
pub use error::{BackendError, Result, SpoolError};
pub use events::{JobEventDetails, JobEventType, JobId};
pub use message_loop::{LoopHandle, MessageLoop, Task};
pub use platform::HostEventPump;
pub use pool::{BlockingPool, WorkerPool};
pub use print_job::{JobContext, JobEventSink, PrintJob};
pub use print_worker::PrintJobWorker;
pub use settings::PrintSettings;
pub use worker::{JobWorker, PrintJobWorkerOwner, PrinterQuery};
