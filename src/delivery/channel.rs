use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::models::{AttemptOutcome, DeliveryChannel, Notification};
use crate::sources::BoxFuture;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAvailability {
    Available,
    Unavailable(String),
    PermissionDenied,
}

impl ChannelAvailability {
    pub fn is_available(&self) -> bool {
        matches!(self, ChannelAvailability::Available)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("channel unavailable: {0}")]
    Unavailable(String),
    #[error("transient failure: {0}")]
    Transient(String),
}

impl ChannelError {
    /// Only transient hiccups are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChannelError::Transient(_))
    }

    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            ChannelError::PermissionDenied => AttemptOutcome::PermissionDenied,
            ChannelError::Unavailable(_) => AttemptOutcome::Unavailable,
            other => AttemptOutcome::Failure(other.to_string()),
        }
    }
}

/// One way of getting a notification in front of the user.
pub trait ChannelDispatcher: Send + Sync + 'static {
    fn channel(&self) -> DeliveryChannel;

    /// Permission and hardware check. Results are cached by the caller.
    fn check_availability(&self) -> BoxFuture<'_, ChannelAvailability>;

    fn deliver<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> BoxFuture<'a, Result<(), ChannelError>>;
}

/// Dispatchers keyed by the channel they serve.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    dispatchers: HashMap<DeliveryChannel, Arc<dyn ChannelDispatcher>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, dispatcher: Arc<dyn ChannelDispatcher>) -> Self {
        self.register(dispatcher);
        self
    }

    /// Replaces any dispatcher already registered for the same channel.
    pub fn register(&mut self, dispatcher: Arc<dyn ChannelDispatcher>) {
        self.dispatchers.insert(dispatcher.channel(), dispatcher);
    }

    pub fn get(&self, channel: DeliveryChannel) -> Option<Arc<dyn ChannelDispatcher>> {
        self.dispatchers.get(&channel).cloned()
    }

    pub fn channels(&self) -> Vec<DeliveryChannel> {
        let mut channels: Vec<DeliveryChannel> = self.dispatchers.keys().copied().collect();
        channels.sort();
        channels
    }
}
