//! In-process notification bus.
//!
//! [`EventBus`] is the process-wide publish/subscribe hub for job events.
//! Subscriptions are keyed by [`NotificationType`] and filtered by source
//! job. Handlers run synchronously on the publishing thread, in
//! subscription order.
//!
//! # Re-entrancy
//!
//! The subscriber list is snapshotted before delivery and no lock is held
//! while handlers run, so a handler may publish, subscribe or unsubscribe.
//! A subscription removed during a publish may still see that one event.

use crate::events::{JobEventDetails, JobId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use tracing::trace;

/// Notification channel a subscription listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationType {
    PrintJobEvent,
}

/// Which sources a subscription accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFilter {
    AllSources,
    Job(JobId),
}

impl SourceFilter {
    fn accepts(&self, source: JobId) -> bool {
        match self {
            Self::AllSources => true,
            Self::Job(id) => *id == source,
        }
    }
}

/// A delivered notification.
#[derive(Debug, Clone)]
pub struct Notification {
    pub notification_type: NotificationType,
    pub source: JobId,
    pub details: Arc<JobEventDetails>,
}

pub type NotificationHandler = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    notification_type: NotificationType,
    filter: SourceFilter,
    handler: NotificationHandler,
}

pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The single process-wide bus.
    pub fn global() -> Arc<EventBus> {
        static GLOBAL: OnceLock<Arc<EventBus>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(EventBus::new())))
    }

    pub fn subscribe<F>(
        &self,
        notification_type: NotificationType,
        filter: SourceFilter,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .expect("event bus lock poisoned")
            .push(Subscription {
                id,
                notification_type,
                filter,
                handler: Arc::new(handler),
            });
        id
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write().expect("event bus lock poisoned");
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Deliver `details` to every matching subscriber.
    ///
    /// Returns how many handlers were invoked.
    pub fn publish(
        &self,
        notification_type: NotificationType,
        source: JobId,
        details: Arc<JobEventDetails>,
    ) -> usize {
        let handlers: Vec<NotificationHandler> = self
            .subscriptions
            .read()
            .expect("event bus lock poisoned")
            .iter()
            .filter(|s| s.notification_type == notification_type && s.filter.accepts(source))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        trace!(
            "Publishing {} from {} to {} subscriber(s)",
            details.event_type(),
            source,
            handlers.len()
        );

        let notification = Notification {
            notification_type,
            source,
            details,
        };
        for handler in &handlers {
            handler(&notification);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().expect("event bus lock poisoned").len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
