/// Publishes entry toggles to an MQTT broker.
///
/// The bridge listens on `entry_toggled` and publishes each toggle's payload,
/// retained, on the entry's topic.  A second task drives the client's event
/// loop, which reconnects on its own after a failure, and a third reports the
/// connection state on `mqtt_connection_state` once a second.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::bus::{BusError, EventBus, ENTRY_TOGGLED, MQTT_CONNECTION_STATE};
use crate::config::MqttConfig;
use crate::entry_list::Toggle;

const KEEP_ALIVE: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const REPORT_PERIOD: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("failed to queue publish: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// One retained message for the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

impl From<Toggle> for Publication {
    fn from(toggle: Toggle) -> Self {
        Self {
            topic: toggle.topic,
            payload: toggle.payload,
            qos: QoS::AtLeastOnce,
            retain: true,
        }
    }
}

/// Where publications go.  Implemented by the MQTT client.
pub trait MessageSink: Send + Sync {
    fn publish(&self, message: Publication) -> Result<(), MqttError>;
}

impl MessageSink for AsyncClient {
    fn publish(&self, message: Publication) -> Result<(), MqttError> {
        self.try_publish(message.topic, message.qos, message.retain, message.payload)?;
        Ok(())
    }
}

/// Running bridge tasks.  Dropping or stopping it disconnects.
pub struct MqttBridge {
    connected: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MqttBridge {
    /// Connects to the broker in `settings` and starts forwarding toggles from `bus`.
    pub fn start(settings: &MqttConfig, bus: Arc<EventBus>) -> Result<Self, BusError> {
        let toggles = bus.listen(ENTRY_TOGGLED)?;

        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(KEEP_ALIVE);
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let connected = Arc::new(AtomicBool::new(false));
        let tasks = vec![
            tokio::spawn(drive(eventloop, Arc::clone(&connected))),
            tokio::spawn(forward_toggles(toggles, client)),
            tokio::spawn(report_connection(bus, Arc::clone(&connected), REPORT_PERIOD)),
        ];
        info!(host = %settings.host, port = settings.port, "MQTT bridge started");
        Ok(Self { connected, tasks })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for MqttBridge {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Polls the client's event loop forever, tracking whether a connection is up.
/// After an error the next poll reconnects.
async fn drive(mut eventloop: EventLoop, connected: Arc<AtomicBool>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::SeqCst);
                info!("Connected to MQTT broker");
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                warn!("MQTT broker closed the connection");
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::SeqCst) {
                    warn!("MQTT connection lost: {e}");
                } else {
                    debug!("MQTT connect failed: {e}");
                }
                sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Publishes every toggle received on `rx` until the channel closes.
pub async fn forward_toggles<S: MessageSink>(mut rx: broadcast::Receiver<serde_json::Value>, sink: S) {
    loop {
        match rx.recv().await {
            Ok(payload) => match serde_json::from_value::<Toggle>(payload) {
                Ok(toggle) => {
                    if toggle.topic.is_empty() {
                        debug!("Skipping toggle without a topic");
                        continue;
                    }
                    let message = Publication::from(toggle);
                    let topic = message.topic.clone();
                    if let Err(e) = sink.publish(message) {
                        warn!(topic = %topic, "MQTT publish failed: {e}");
                    }
                }
                Err(e) => warn!("Ignoring malformed entry_toggled payload: {e}"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "MQTT bridge lagged behind entry_toggled");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("entry_toggled channel closed; MQTT forwarding stopped");
                break;
            }
        }
    }
}

/// Emits the connection flag on `mqtt_connection_state` every `period` until
/// the bus closes.
pub async fn report_connection(bus: Arc<EventBus>, connected: Arc<AtomicBool>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match bus.emit(MQTT_CONNECTION_STATE, &connected.load(Ordering::SeqCst)) {
            Ok(_) => {}
            Err(BusError::Unavailable) => break,
            Err(e) => warn!("Failed to report MQTT connection state: {e}"),
        }
    }
}
