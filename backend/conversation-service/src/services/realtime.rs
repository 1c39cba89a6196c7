//! Real-time transport client
//!
//! The service only publishes; fan-out to sockets is done by the external
//! socket tier, which subscribes to the same Redis channels and verifies
//! subscriptions with the signatures produced by the channel auth gateway.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

pub mod events {
    pub const CONVERSATION_CREATED: &str = "conversation.created";
    pub const CONVERSATION_READ: &str = "conversation.read";
    pub const MESSAGE_CREATED: &str = "message.created";
    pub const MESSAGE_UPDATED: &str = "message.updated";
    pub const MESSAGE_DELETED: &str = "message.deleted";
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Public key and shared secret of the transport, configured out-of-band
#[derive(Clone)]
pub struct TransportCredentials {
    pub app_key: String,
    pub app_secret: String,
}

impl TransportCredentials {
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
        }
    }
}

impl fmt::Debug for TransportCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCredentials")
            .field("app_key", &self.app_key)
            .field("app_secret", &"[REDACTED]")
            .finish()
    }
}

/// Wire envelope published for every event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub channel: String,
    pub event: String,
    pub data: Value,
}

#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn publish(&self, channel: &str, event: &str, data: Value) -> Result<(), TransportError>;
}

/// Publishes envelopes to the Redis channel named after the real-time channel
#[derive(Clone)]
pub struct RedisTransport {
    conn: ConnectionManager,
}

impl RedisTransport {
    pub async fn connect(redis_url: &str) -> Result<Self, TransportError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl RealtimeTransport for RedisTransport {
    async fn publish(&self, channel: &str, event: &str, data: Value) -> Result<(), TransportError> {
        let envelope = PublishedEvent {
            channel: channel.to_string(),
            event: event.to_string(),
            data,
        };
        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }
}

/// Drops every event; for deployments without a socket tier
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransport;

#[async_trait]
impl RealtimeTransport for NoopTransport {
    async fn publish(&self, channel: &str, event: &str, _data: Value) -> Result<(), TransportError> {
        tracing::trace!(%channel, %event, "realtime transport disabled, event dropped");
        Ok(())
    }
}

/// Keeps published events in memory
#[derive(Debug, Default)]
pub struct RecordingTransport {
    events: Mutex<Vec<PublishedEvent>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn events_on(&self, channel: &str) -> Vec<PublishedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.channel == channel)
            .collect()
    }
}

#[async_trait]
impl RealtimeTransport for RecordingTransport {
    async fn publish(&self, channel: &str, event: &str, data: Value) -> Result<(), TransportError> {
        if let Ok(mut events) = self.events.lock() {
            events.push(PublishedEvent {
                channel: channel.to_string(),
                event: event.to_string(),
                data,
            });
        }
        Ok(())
    }
}
