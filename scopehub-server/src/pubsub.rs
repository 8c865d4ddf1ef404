//! Notification transport.
//!
//! [`TopicPublisher`] is the port the notifier publishes through. The
//! in-process [`BroadcastHub`] implements it with one tokio broadcast channel
//! per scope and backs the server-sent-events endpoint.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use scopehub_core::{CommitRange, ScopeId};

use crate::error::ServerError;

/// Buffered notifications per scope before slow subscribers start lagging.
pub const CHANNEL_CAPACITY: usize = 256;

/// Topic for a changed directory: `<scope_id>:policy:<directory>`.
pub fn policy_topic(scope_id: &ScopeId, directory: &str) -> String {
    format!("{scope_id}:policy:{directory}")
}

/// One changed directory of one scope. Carries paths only, never content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub topic: String,
    pub scope_id: ScopeId,
    pub directory: String,
    pub old_commit: Option<String>,
    pub new_commit: String,
}

impl Notification {
    pub fn policy_change(scope_id: &ScopeId, directory: &str, range: &CommitRange) -> Self {
        Self {
            topic: policy_topic(scope_id, directory),
            scope_id: scope_id.clone(),
            directory: directory.to_owned(),
            old_commit: range.old.as_ref().map(|c| c.0.clone()),
            new_commit: range.new.0.clone(),
        }
    }
}

#[async_trait]
pub trait TopicPublisher: Send + Sync {
    async fn publish(&self, notification: Notification) -> Result<(), ServerError>;
}

// ---------------------------------------------------------------------------
// In-process hub
// ---------------------------------------------------------------------------

/// Per-scope broadcast channels, keyed by topic prefix.
#[derive(Debug, Default)]
pub struct BroadcastHub {
    channels: Mutex<HashMap<ScopeId, broadcast::Sender<Notification>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every notification published for `scope_id` from now on.
    pub fn subscribe(&self, scope_id: &ScopeId) -> broadcast::Receiver<Notification> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(scope_id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, scope_id: &ScopeId) -> usize {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .get(scope_id)
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }

    /// Drop every channel so open subscriber streams end.
    pub fn close_all(&self) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.clear();
    }
}

#[async_trait]
impl TopicPublisher for BroadcastHub {
    async fn publish(&self, notification: Notification) -> Result<(), ServerError> {
        let sender = {
            let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
            channels.get(&notification.scope_id).cloned()
        };
        let Some(sender) = sender else {
            tracing::debug!(topic = %notification.topic, "no subscribers for topic");
            return Ok(());
        };

        let topic = notification.topic.clone();
        match sender.send(notification) {
            Ok(receivers) => tracing::debug!(topic = %topic, receivers, "published notification"),
            // All subscribers dropped since the lookup.
            Err(_) => tracing::debug!(topic = %topic, "no subscribers for topic"),
        }
        Ok(())
    }
}
