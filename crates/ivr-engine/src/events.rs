//! Publish lifecycle events
//!
//! The [`EventBus`] is an explicitly constructed handle passed to whoever
//! publishes or observes flow lifecycle events (WebSocket bridge, audit log,
//! tests). Delivery is in-process only: attached sinks are called
//! synchronously and broadcast subscribers see events sent after they
//! subscribed. Nothing is persisted or replayed.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Topic carried by every publish lifecycle event
pub const TOPIC_PUBLISHED: &str = "ivr:published";

/// Default capacity of the broadcast channel
const DEFAULT_CAPACITY: usize = 64;

/// Trait for receiving lifecycle events synchronously
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered
    fn send(&self, event: &PublishEvent) -> Result<(), EventError>;
}

/// Error when delivering an event fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outcome reported by a publish event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Success,
    Error,
}

/// Pipeline stage a publish failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStage {
    Lookup,
    Validation,
    Compilation,
    Deploy,
    Connection,
    Authentication,
    Reload,
    Storage,
}

impl std::fmt::Display for PublishStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PublishStage::Lookup => "lookup",
            PublishStage::Validation => "validation",
            PublishStage::Compilation => "compilation",
            PublishStage::Deploy => "deploy",
            PublishStage::Connection => "connection",
            PublishStage::Authentication => "authentication",
            PublishStage::Reload => "reload",
            PublishStage::Storage => "storage",
        };
        f.write_str(name)
    }
}

/// Payload of the `ivr:published` topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishEvent {
    pub topic: String,
    pub flow_id: String,
    pub status: PublishStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<PublishStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Non-fatal problem, e.g. the reload action failed after deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl PublishEvent {
    /// Create a success event
    pub fn success(flow_id: &str, warning: Option<String>) -> Self {
        Self {
            topic: TOPIC_PUBLISHED.to_string(),
            flow_id: flow_id.to_string(),
            status: PublishStatus::Success,
            stage: None,
            error: None,
            warning,
        }
    }

    /// Create a failure event
    pub fn failure(flow_id: &str, stage: PublishStage, error: impl Into<String>) -> Self {
        Self {
            topic: TOPIC_PUBLISHED.to_string(),
            flow_id: flow_id.to_string(),
            status: PublishStatus::Error,
            stage: Some(stage),
            error: Some(error.into()),
            warning: None,
        }
    }
}

/// Many-subscriber, in-process event fan-out
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PublishEvent>,
    sinks: Arc<RwLock<Vec<Arc<dyn EventSink>>>>,
}

impl EventBus {
    /// Create a bus with the default channel capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus whose broadcast channel buffers `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sinks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PublishEvent> {
        self.sender.subscribe()
    }

    /// Attach a sink that is called synchronously for every event
    pub fn attach(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// Number of broadcast subscribers currently listening
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Deliver an event to every sink and subscriber
    pub fn publish(&self, event: PublishEvent) {
        log::debug!(
            "{} flow={} status={:?}",
            event.topic,
            event.flow_id,
            event.status
        );
        for sink in self.sinks.read().iter() {
            if let Err(e) = sink.send(&event) {
                log::warn!("Event sink rejected {} event: {}", event.topic, e);
            }
        }
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: &PublishEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: parking_lot::Mutex<Vec<PublishEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<PublishEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: &PublishEvent) -> Result<(), EventError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
