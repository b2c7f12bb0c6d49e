//! Notification delivery for provisioning events.
//!
//! This crate provides a fire-and-forget notification system for telling
//! operators when a node has been brought under configuration management.
//!
//! # Usage
//!
//! ```no_run
//! use notify::{Notifier, NotifyEvent};
//!
//! # async fn example() {
//! // Create notifier from environment variables
//! let notifier = Notifier::from_env();
//!
//! // Send a notification (fire-and-forget)
//! notifier.notify(NotifyEvent::node_provisioned("web1.example.net", "puppet1.example.net"));
//! # }
//! ```
//!
//! # Configuration
//!
//! - `SLACK_WEBHOOK_URL`: Slack webhook URL (enables the Slack channel)
//! - `NOTIFY_DISABLED`: Set to "true" to disable all notifications
//!
//! A webhook URL supplied by the caller through [`Notifier::with_slack_webhook`]
//! takes precedence over the environment.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;

pub use channels::slack::SlackChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use events::{NotifyEvent, Severity};

use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Environment variable to disable all notifications.
const ENV_NOTIFY_DISABLED: &str = "NOTIFY_DISABLED";

/// Central notification dispatcher.
///
/// The `Notifier` manages multiple notification channels and dispatches
/// events to all enabled channels in a fire-and-forget manner. Deliveries
/// still in flight can be awaited with [`Notifier::flush`].
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
    disabled: bool,
    in_flight: TaskTracker,
}

impl Notifier {
    /// Create a new notifier from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::with_slack_webhook(None)
    }

    /// Create a notifier, preferring an explicit Slack webhook URL over
    /// `SLACK_WEBHOOK_URL`.
    #[must_use]
    pub fn with_slack_webhook(webhook_url: Option<String>) -> Self {
        if env_disabled() {
            info!("Notifications disabled via NOTIFY_DISABLED");
            return Self::disabled();
        }

        let mut channels: Vec<Arc<dyn NotifyChannel>> = vec![];

        let slack = match webhook_url {
            Some(url) => SlackChannel::new(url),
            None => SlackChannel::from_env(),
        };
        if slack.enabled() {
            info!("Slack notifications enabled");
            channels.push(Arc::new(slack));
        }

        if channels.is_empty() {
            warn!("No notification channels configured");
        } else {
            info!(
                channel_count = channels.len(),
                "Notification system initialized"
            );
        }

        Self::with_channels(channels)
    }

    /// Create a notifier with specific channels.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self {
            channels,
            disabled: false,
            in_flight: TaskTracker::new(),
        }
    }

    /// Create a disabled notifier (for testing or when notifications are off).
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            channels: vec![],
            disabled: true,
            in_flight: TaskTracker::new(),
        }
    }

    /// Send a notification to all enabled channels (fire-and-forget).
    ///
    /// This method spawns async tasks for each channel and returns immediately.
    /// Errors are logged but not propagated to the caller. Must be called from
    /// within a tokio runtime.
    pub fn notify(&self, event: NotifyEvent) {
        if self.disabled {
            debug!("Notifications disabled, skipping event");
            return;
        }

        if self.channels.is_empty() {
            debug!("No channels configured, skipping event");
            return;
        }

        let event = Arc::new(event);

        for channel in &self.channels {
            let channel = Arc::clone(channel);
            let event = Arc::clone(&event);

            self.in_flight.spawn(async move {
                let channel_name = channel.name();

                if !channel.enabled() {
                    debug!(channel = channel_name, "Channel disabled, skipping");
                    return;
                }

                match channel.send(&event).await {
                    Ok(()) => {
                        debug!(channel = channel_name, "Notification sent");
                    }
                    Err(e) => {
                        error!(
                            channel = channel_name,
                            error = %e,
                            "Failed to send notification"
                        );
                    }
                }
            });
        }
    }

    /// Wait until every notification sent so far has been delivered or has
    /// failed. The runtime cancels unfinished deliveries when it shuts down,
    /// so short-lived callers must flush before returning.
    pub async fn flush(&self) {
        if self.in_flight.is_empty() {
            return;
        }
        debug!(pending = self.in_flight.len(), "Waiting for notifications");
        self.in_flight.close();
        self.in_flight.wait().await;
        self.in_flight.reopen();
    }
}

fn env_disabled() -> bool {
    std::env::var(ENV_NOTIFY_DISABLED)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}
