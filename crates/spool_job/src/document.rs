//! The document being printed and its pages.
//!
//! A [`PrintedDocument`] is shared as `Arc` between the job coordinator, the
//! worker thread and event payloads. Its settings and cookie are fixed at
//! construction; pages arrive from the worker thread, so the mutable part
//! sits behind a mutex.

use crate::settings::PrintSettings;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Whoever originated a print job (a tab, a renderer, a file).
///
/// Jobs and documents only keep a `Weak` reference to it.
pub trait PrintedPagesSource: Send + Sync {
    fn source_name(&self) -> String;
}

/// One rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintedPage {
    page_number: u32,
    content: Vec<u8>,
}

impl PrintedPage {
    pub fn new(page_number: u32, content: Vec<u8>) -> Self {
        Self {
            page_number,
            content,
        }
    }

    /// 1-based page number.
    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

struct DocumentState {
    source: Option<Weak<dyn PrintedPagesSource>>,
    expected_page_count: u32,
    pages: BTreeMap<u32, Arc<PrintedPage>>,
}

pub struct PrintedDocument {
    settings: PrintSettings,
    cookie: i32,
    name: String,
    state: Mutex<DocumentState>,
}

impl PrintedDocument {
    pub fn new(
        settings: PrintSettings,
        source: Option<Weak<dyn PrintedPagesSource>>,
        cookie: i32,
    ) -> Self {
        let name = source
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|s| s.source_name())
            .unwrap_or_else(|| settings.title.clone());
        Self {
            settings,
            cookie,
            name,
            state: Mutex::new(DocumentState {
                source,
                expected_page_count: 0,
                pages: BTreeMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, DocumentState> {
        self.state.lock().expect("document state lock poisoned")
    }

    pub fn settings(&self) -> &PrintSettings {
        &self.settings
    }

    pub fn cookie(&self) -> i32 {
        self.cookie
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_page_count(&self, page_count: u32) {
        self.state().expected_page_count = page_count;
    }

    pub fn expected_page_count(&self) -> u32 {
        self.state().expected_page_count
    }

    /// Store a rendered page, replacing any earlier rendering of it.
    pub fn set_page(&self, page: Arc<PrintedPage>) {
        self.state().pages.insert(page.page_number(), page);
    }

    pub fn page(&self, page_number: u32) -> Option<Arc<PrintedPage>> {
        self.state().pages.get(&page_number).cloned()
    }

    pub fn pages_received(&self) -> u32 {
        self.state().pages.len() as u32
    }

    /// Every expected page has been rendered.
    pub fn is_complete(&self) -> bool {
        let state = self.state();
        state.expected_page_count > 0
            && (1..=state.expected_page_count).all(|n| state.pages.contains_key(&n))
    }

    /// Drop the back-reference to the originating source.
    pub fn disconnect_source(&self) {
        self.state().source = None;
    }

    /// Whether the source is still connected and alive.
    pub fn has_source(&self) -> bool {
        self.state()
            .source
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some()
    }
}

impl std::fmt::Debug for PrintedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("PrintedDocument")
            .field("name", &self.name)
            .field("cookie", &self.cookie)
            .field("expected_page_count", &state.expected_page_count)
            .field("pages_received", &state.pages.len())
            .finish()
    }
}
