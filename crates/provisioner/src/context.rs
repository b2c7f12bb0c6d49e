//! Process-wide state shared by the supervisor and the pipeline.

use std::sync::Arc;

use notify::{Notifier, NotifyEvent};

use crate::config::Settings;
use crate::remote::MasterDirectory;

/// Where provisioning events go.
pub trait EventSink: Send + Sync {
    /// Deliver an event. Must not block and must not fail.
    fn publish(&self, event: NotifyEvent);
}

impl EventSink for Notifier {
    fn publish(&self, event: NotifyEvent) {
        self.notify(event);
    }
}

/// Settings and collaborator handles, built once at startup.
pub struct ProvisionContext {
    pub settings: Settings,
    pub masters: Arc<dyn MasterDirectory>,
    pub events: Arc<dyn EventSink>,
}

impl ProvisionContext {
    #[must_use]
    pub fn new(
        settings: Settings,
        masters: Arc<dyn MasterDirectory>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            settings,
            masters,
            events,
        }
    }
}
