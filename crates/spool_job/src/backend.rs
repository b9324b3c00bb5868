//! Device side of printing.
//!
//! The worker thread drives a [`PrintBackend`] one page at a time. Real
//! backends rasterize and talk to a device; [`SimulatedBackend`] stands in
//! for one with a fixed per-page delay and optional injected failure.

use crate::cancel::CancellationToken;
use crate::document::{PrintedDocument, PrintedPage};
use crate::error::BackendError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Called from the worker thread, except [`cancel`](Self::cancel), which the
/// job may call from its own thread while a page is in flight.
pub trait PrintBackend: Send + Sync {
    fn start_document(&self, document: &PrintedDocument) -> Result<(), BackendError>;

    /// Render and spool one 1-based page.
    fn render_page(
        &self,
        document: &PrintedDocument,
        page_number: u32,
    ) -> Result<PrintedPage, BackendError>;

    fn finish_document(&self, document: &PrintedDocument) -> Result<(), BackendError>;

    /// Invalidate the current print context.
    fn cancel(&self);
}

#[derive(Debug, Default)]
pub struct SimulatedBackend {
    page_delay: Duration,
    fail_at_page: Option<u32>,
    canceled: CancellationToken,
    pages_rendered: AtomicU32,
}

impl SimulatedBackend {
    pub fn new(page_delay: Duration) -> Self {
        Self {
            page_delay,
            ..Self::default()
        }
    }

    /// Make `render_page` fail for `page_number`.
    pub fn failing_at(mut self, page_number: u32) -> Self {
        self.fail_at_page = Some(page_number);
        self
    }

    pub fn pages_rendered(&self) -> u32 {
        self.pages_rendered.load(Ordering::SeqCst)
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.is_cancelled()
    }
}

impl PrintBackend for SimulatedBackend {
    fn start_document(&self, document: &PrintedDocument) -> Result<(), BackendError> {
        if self.canceled.is_cancelled() {
            return Err(BackendError::Canceled);
        }
        debug!("Simulated device accepted '{}'", document.name());
        Ok(())
    }

    fn render_page(
        &self,
        document: &PrintedDocument,
        page_number: u32,
    ) -> Result<PrintedPage, BackendError> {
        if self.canceled.is_cancelled() {
            return Err(BackendError::Canceled);
        }
        if !self.page_delay.is_zero() {
            thread::sleep(self.page_delay);
        }
        if self.fail_at_page == Some(page_number) {
            return Err(BackendError::RenderFailed {
                page: page_number,
                reason: "simulated device error".to_string(),
            });
        }
        // Cancellation that landed while the page was in flight wins.
        if self.canceled.is_cancelled() {
            return Err(BackendError::Canceled);
        }
        self.pages_rendered.fetch_add(1, Ordering::SeqCst);
        let content = format!("{}#{}", document.name(), page_number).into_bytes();
        Ok(PrintedPage::new(page_number, content))
    }

    fn finish_document(&self, document: &PrintedDocument) -> Result<(), BackendError> {
        if self.canceled.is_cancelled() {
            return Err(BackendError::Canceled);
        }
        debug!(
            "Simulated device finished '{}' ({} page(s))",
            document.name(),
            document.pages_received()
        );
        Ok(())
    }

    fn cancel(&self) {
        self.canceled.cancel();
    }
}
