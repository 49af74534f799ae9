//! Session events and the sinks that receive them.
//!
//! A sink gets one `RoundCompleted` per committed debate round and one
//! terminal `SessionCompleted` carrying the full record. Sink failures are
//! logged by the controller and never fail a session.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::debug;

use crate::debate::DebateRound;
use crate::session::DeliberationSession;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Error type for sink operations
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write event: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel closed")]
    ChannelClosed,
}

/// Something that happened in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    RoundCompleted {
        session_id: String,
        round: DebateRound,
        timestamp: DateTime<Utc>,
    },
    SessionCompleted {
        session: Box<DeliberationSession>,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn round_completed(session_id: &str, round: DebateRound) -> Self {
        Self::RoundCompleted {
            session_id: session_id.to_string(),
            round,
            timestamp: Utc::now(),
        }
    }

    pub fn session_completed(session: DeliberationSession) -> Self {
        Self::SessionCompleted {
            session: Box::new(session),
            timestamp: Utc::now(),
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::RoundCompleted { session_id, .. } => session_id,
            Self::SessionCompleted { session, .. } => &session.id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RoundCompleted { .. } => "round_completed",
            Self::SessionCompleted { .. } => "session_completed",
        }
    }
}

/// Receives session events.
#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn emit(&self, event: SessionEvent) -> Result<(), SinkError>;
}

/// Shared reference to a sink
pub type SharedSink = Arc<dyn SessionSink>;

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl SessionSink for NullSink {
    async fn emit(&self, _event: SessionEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<SessionEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionSink for MemorySink {
    async fn emit(&self, event: SessionEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        Ok(())
    }
}

/// Fans events out to broadcast subscribers.
pub struct BroadcastSink {
    sender: broadcast::Sender<SessionEvent>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionSink for BroadcastSink {
    async fn emit(&self, event: SessionEvent) -> Result<(), SinkError> {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            // No receivers is OK
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
        Ok(())
    }
}

/// Appends each event as one JSON line.
pub struct JsonlSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonlSink {
    /// Open `path` for appending, creating it if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionSink for JsonlSink {
    async fn emit(&self, event: SessionEvent) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Read every event back from a JSONL file.
pub async fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<SessionEvent>, SinkError> {
    let content = tokio::fs::read_to_string(path).await?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(SinkError::from))
        .collect()
}
