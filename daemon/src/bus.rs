/// Named-channel event bus between the process monitor and its observers.
///
/// Each channel is a lazily created `tokio::sync::broadcast` sender carrying
/// JSON payloads.  Publishers call [`EventBus::emit`]; observers call
/// [`EventBus::listen`] and drain the returned receiver.  Once the bus is
/// closed no new listeners can register.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Ordered sequence of booleans, one per configured entry.
pub const RUNNING_STATES: &str = "running_states";
/// An entry crossed between running and not running.
pub const ENTRY_TOGGLED: &str = "entry_toggled";
/// Names of every running OS process, sorted case-insensitively.
pub const RUNNING_PROCESSES: &str = "processes";
/// Inbound edits to the entry list (`add`, `update`, `remove`).
pub const ENTRY_COMMANDS: &str = "entry_commands";
/// The entry list as indexed records, re-sent after every edit or reload.
pub const PROCESS_ENTRIES: &str = "process_entries";
/// `true` while the MQTT client holds a broker connection.  Sent once a second.
pub const MQTT_CONNECTION_STATE: &str = "mqtt_connection_state";

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("event bus is unavailable")]
    Unavailable,
    #[error("failed to serialize event payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub struct EventBus {
    channels: Mutex<HashMap<String, broadcast::Sender<serde_json::Value>>>,
    closed: AtomicBool,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a bus whose channels each buffer up to `capacity` undelivered events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            capacity: capacity.max(1),
        }
    }

    /// Registers a new receiver on `channel`.
    ///
    /// Fails with [`BusError::Unavailable`] after [`close`](Self::close).
    pub fn listen(&self, channel: &str) -> Result<broadcast::Receiver<serde_json::Value>, BusError> {
        if self.is_closed() {
            return Err(BusError::Unavailable);
        }
        trace!(channel, "Registering listener");
        let mut channels = self.channels.lock().map_err(|_| BusError::Unavailable)?;
        let rx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        Ok(rx)
    }

    /// Serializes `payload` and broadcasts it on `channel`.
    ///
    /// Returns how many receivers the event reached; zero is not an error.
    pub fn emit<T: Serialize + ?Sized>(&self, channel: &str, payload: &T) -> Result<usize, BusError> {
        if self.is_closed() {
            return Err(BusError::Unavailable);
        }
        let value = serde_json::to_value(payload)?;
        let channels = self.channels.lock().map_err(|_| BusError::Unavailable)?;
        let delivered = match channels.get(channel) {
            // A send error only means nobody is listening right now.
            Some(sender) => sender.send(value).unwrap_or(0),
            None => 0,
        };
        trace!(channel, delivered, "Emitted event");
        Ok(delivered)
    }

    /// Number of live receivers on `channel`.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .ok()
            .and_then(|channels| channels.get(channel).map(|s| s.receiver_count()))
            .unwrap_or(0)
    }

    /// Marks the bus unavailable and drops every channel sender, so existing
    /// receivers see `RecvError::Closed` after draining what is buffered.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut channels) = self.channels.lock() {
            channels.clear();
        }
        debug!("Event bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
