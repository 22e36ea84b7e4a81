//! Fire-and-forget queue collaborator.
//!
//! Consumers (tile recomputation, score recomputation) assume at-least-once
//! delivery. Enqueue failures are logged by the caller and never fail a
//! command.

use crate::error::{Result, StoreError};
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::mpsc;

pub const TILES_TOPIC: &str = "markers.tiles";
pub const CREDIBILITY_TOPIC: &str = "markers.credibility";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

pub trait Queue: Send + Sync {
    fn enqueue(&self, topic: &str, payload: serde_json::Value) -> Result<()>;
}

/// Keeps every message in memory for inspection
#[derive(Debug, Default)]
pub struct RecordingQueue {
    messages: Mutex<Vec<QueuedMessage>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<QueuedMessage> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<serde_json::Value> {
        self.messages()
            .into_iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload)
            .collect()
    }
}

impl Queue for RecordingQueue {
    fn enqueue(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
        self.messages
            .lock()
            .map_err(|_| StoreError::Queue("recording queue poisoned".to_string()))?
            .push(QueuedMessage {
                topic: topic.to_string(),
                payload,
            });
        Ok(())
    }
}

/// Forwards messages to a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    sender: mpsc::UnboundedSender<QueuedMessage>,
}

impl ChannelQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<QueuedMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Queue for ChannelQueue {
    fn enqueue(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
        self.sender
            .send(QueuedMessage {
                topic: topic.to_string(),
                payload,
            })
            .map_err(|_| StoreError::Queue(format!("receiver for {} dropped", topic)))
    }
}
