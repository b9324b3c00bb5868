//! Job event payloads.
//!
//! A [`JobEventDetails`] is published once per state change of a print job.
//! It is wrapped in an `Arc` before delivery so every handler (and every task
//! a handler queues) shares the same payload; it is released with the last
//! holder.

use crate::document::{PrintedDocument, PrintedPage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-unique identity of a print job, used as the bus source key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Closed set of print job event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventType {
    /// The print job failed or was canceled.
    Failed,
    /// Settings were obtained from the user.
    UserInitDone,
    /// Default settings were obtained.
    DefaultInitDone,
    /// The user canceled the settings dialog.
    UserInitCanceled,
    /// A document started printing.
    NewDoc,
    /// A page started printing.
    NewPage,
    /// A page finished printing.
    PageDone,
    /// The worker finished the document.
    DocDone,
    /// The job is complete and its worker is stopped.
    JobDone,
    /// Every page of the document has been requested from the source.
    AllPagesRequested,
}

impl JobEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::UserInitDone => "user_init_done",
            Self::DefaultInitDone => "default_init_done",
            Self::UserInitCanceled => "user_init_canceled",
            Self::NewDoc => "new_doc",
            Self::NewPage => "new_page",
            Self::PageDone => "page_done",
            Self::DocDone => "doc_done",
            Self::JobDone => "job_done",
            Self::AllPagesRequested => "all_pages_requested",
        }
    }
}

impl fmt::Display for JobEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable payload of a job event.
#[derive(Debug, Clone)]
pub struct JobEventDetails {
    event_type: JobEventType,
    document: Option<Arc<PrintedDocument>>,
    page: Option<Arc<PrintedPage>>,
}

impl JobEventDetails {
    pub fn new(
        event_type: JobEventType,
        document: Option<Arc<PrintedDocument>>,
        page: Option<Arc<PrintedPage>>,
    ) -> Self {
        Self {
            event_type,
            document,
            page,
        }
    }

    pub fn event_type(&self) -> JobEventType {
        self.event_type
    }

    pub fn document(&self) -> Option<&Arc<PrintedDocument>> {
        self.document.as_ref()
    }

    pub fn page(&self) -> Option<&Arc<PrintedPage>> {
        self.page.as_ref()
    }

    /// Whether this event refers to exactly `document` (pointer identity).
    pub fn is_for_document(&self, document: Option<&Arc<PrintedDocument>>) -> bool {
        match (self.document.as_ref(), document) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::PrintSettings;

    #[test]
    fn test_job_ids_are_unique() {
        let a = JobId::next();
        let b = JobId::next();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(format!("{}", a), format!("job-{}", a.as_u64()));
    }

    #[test]
    fn test_event_type_serializes_snake_case() {
        let json = serde_json::to_string(&JobEventType::AllPagesRequested).unwrap();
        assert_eq!(json, "\"all_pages_requested\"");
        assert_eq!(JobEventType::DocDone.as_str(), "doc_done");
    }

    #[test]
    fn test_is_for_document_uses_identity() {
        let doc = Arc::new(PrintedDocument::new(PrintSettings::default(), None, 7));
        let twin = Arc::new(PrintedDocument::new(PrintSettings::default(), None, 7));
        let details = JobEventDetails::new(JobEventType::UserInitDone, Some(Arc::clone(&doc)), None);

        assert!(details.is_for_document(Some(&doc)));
        assert!(!details.is_for_document(Some(&twin)));
        assert!(!details.is_for_document(None));
        assert!(JobEventDetails::new(JobEventType::Failed, None, None).is_for_document(None));
    }
}
