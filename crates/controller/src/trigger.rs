use crate::errors::ControllerError;
use crate::tap::TapEvent;
use chrono::Utc;
use rosc::{OscMessage, OscPacket, OscType, encoder};
use rumqttc::{Client, ConnectionError, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub const DEFAULT_OSC_TARGET: &str = "127.0.0.1:11111";
pub const DEFAULT_OSC_ADDRESS: &str = "/trigger";

/// Where a detected tap is announced.
///
/// Delivery is best effort: the consumer logs a failed `fire` and moves on.
pub trait TriggerSink: Send {
    fn fire(&mut self, event: &TapEvent) -> Result<(), ControllerError>;

    fn name(&self) -> &str;
}

impl<T: TriggerSink + ?Sized> TriggerSink for Box<T> {
    fn fire(&mut self, event: &TapEvent) -> Result<(), ControllerError> {
        (**self).fire(event)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Sends `<address> 1` as a single OSC message over UDP.
pub struct OscTrigger {
    socket: UdpSocket,
    target: SocketAddr,
    packet: Vec<u8>,
}

impl OscTrigger {
    pub fn new(target: &str, address: &str) -> Result<Self, ControllerError> {
        let target = target
            .to_socket_addrs()
            .map_err(|e| ControllerError::Configuration(format!("OSC target {:?}: {}", target, e)))?
            .next()
            .ok_or_else(|| {
                ControllerError::Configuration(format!("OSC target {:?} did not resolve", target))
            })?;

        let bind = if target.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind)?;

        let message = OscMessage {
            addr: address.to_string(),
            args: vec![OscType::Int(1)],
        };
        let packet = encoder::encode(&OscPacket::Message(message))
            .map_err(|e| ControllerError::Configuration(format!("OSC address {:?}: {}", address, e)))?;

        tracing::info!(target = %target, address, "OSC trigger ready");
        Ok(Self {
            socket,
            target,
            packet,
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl TriggerSink for OscTrigger {
    fn fire(&mut self, _event: &TapEvent) -> Result<(), ControllerError> {
        self.socket.send_to(&self.packet, self.target)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "osc"
    }
}

#[derive(Debug, Serialize)]
pub struct TapNotification<'a> {
    pub device_id: &'a str,
    pub timestamp: String,
    pub event_type: &'static str,
    pub tap_number: u64,
}

/// Publishes a JSON tap notification at QoS 0.
///
/// A background thread drives the rumqttc event loop and reconnects with
/// jittered exponential backoff.
pub struct MqttTrigger {
    client: Client,
    topic: String,
    device_id: String,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl MqttTrigger {
    pub fn new(
        broker_host: &str,
        broker_port: u16,
        topic: String,
        device_id: String,
    ) -> Result<Self, ControllerError> {
        let mut mqtt_options = MqttOptions::new(
            format!("tapsync-controller-{}", device_id),
            broker_host,
            broker_port,
        );
        mqtt_options.set_keep_alive(Duration::from_secs(30));
        mqtt_options.set_clean_session(true);

        let (client, mut connection) = Client::new(mqtt_options, 10);
        let connected = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let connected_flag = Arc::clone(&connected);
        let shutdown_flag = Arc::clone(&shutdown);
        let running_flag = Arc::clone(&running);

        std::thread::Builder::new()
            .name("mqtt-trigger".to_string())
            .spawn(move || {
                let mut reconnect_attempts = 0u32;

                while !shutdown_flag.load(Ordering::Acquire) {
                    for notification in connection.iter() {
                        if shutdown_flag.load(Ordering::Acquire) {
                            break;
                        }
                        match notification {
                            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                                connected_flag.store(true, Ordering::Release);
                                reconnect_attempts = 0;
                                tracing::info!("MQTT connected to broker");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                connected_flag.store(false, Ordering::Release);
                                if matches!(
                                    e,
                                    ConnectionError::Io(_) | ConnectionError::NetworkTimeout
                                ) {
                                    reconnect_attempts = reconnect_attempts.saturating_add(1);
                                    let backoff = calculate_backoff(reconnect_attempts);
                                    tracing::warn!(
                                        error = %e,
                                        attempt = reconnect_attempts,
                                        backoff_ms = backoff.as_millis(),
                                        "MQTT connection lost, reconnecting"
                                    );
                                    sleep_unless_shutdown(&shutdown_flag, backoff);
                                } else {
                                    tracing::error!(error = %e, "MQTT error");
                                }
                            }
                        }
                    }

                    connected_flag.store(false, Ordering::Release);
                    if shutdown_flag.load(Ordering::Acquire) {
                        break;
                    }
                    reconnect_attempts = reconnect_attempts.saturating_add(1);
                    sleep_unless_shutdown(&shutdown_flag, calculate_backoff(reconnect_attempts));
                }
                running_flag.store(false, Ordering::Release);
                tracing::debug!("MQTT event loop exited");
            })?;

        tracing::info!(
            broker = %format!("{}:{}", broker_host, broker_port),
            topic = %topic,
            device_id = %device_id,
            "MQTT trigger initialized"
        );

        Ok(Self {
            client,
            topic,
            device_id,
            connected,
            shutdown,
            running,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl TriggerSink for MqttTrigger {
    fn fire(&mut self, event: &TapEvent) -> Result<(), ControllerError> {
        let notification = TapNotification {
            device_id: &self.device_id,
            timestamp: Utc::now().to_rfc3339(),
            event_type: "tap",
            tap_number: event.count,
        };
        let payload = serde_json::to_vec(&notification)
            .map_err(|e| ControllerError::Trigger(e.to_string()))?;

        // try_publish never blocks the consumer on a full request queue.
        self.client
            .try_publish(&self.topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| ControllerError::Trigger(e.to_string()))
    }

    fn name(&self) -> &str {
        "mqtt"
    }
}

impl Drop for MqttTrigger {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        // The event loop ends once it handles the disconnect, or once every
        // client handle is gone and the request channel closes.
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!(error = %e, "MQTT request queue full, waiting to disconnect");
            if let Err(e) = self.client.disconnect() {
                tracing::debug!(error = %e, "MQTT disconnect request dropped");
            }
        }
    }
}

/// Sleep for `duration` in short steps, returning early once `shutdown` is set.
fn sleep_unless_shutdown(shutdown: &AtomicBool, duration: Duration) {
    const STEP: Duration = Duration::from_millis(50);
    let deadline = Instant::now() + duration;
    while !shutdown.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(STEP.min(deadline - now));
    }
}

/// Records the tap in the log only.
#[derive(Debug, Default)]
pub struct LogTrigger;

impl TriggerSink for LogTrigger {
    fn fire(&mut self, event: &TapEvent) -> Result<(), ControllerError> {
        tracing::info!(tap = event.count, "Trigger");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Exponential backoff with jitter, capped at 30 seconds
fn calculate_backoff(attempt: u32) -> Duration {
    const BASE_MS: u64 = 100;
    const MAX_MS: u64 = 30_000;

    let exp_backoff = BASE_MS.saturating_mul(2u64.saturating_pow(attempt.min(10)));
    let capped = exp_backoff.min(MAX_MS);

    let jitter = (capped / 10).max(1);
    Duration::from_millis(capped.saturating_add(fastrand::u64(0..jitter)))
}
