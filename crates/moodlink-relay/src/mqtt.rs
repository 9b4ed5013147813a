//! MQTT implementation of [`Bus`] on the `rumqttc` synchronous client.

use crate::bus::{Bus, BusError, BusEvent};
use rumqttc::{Client, ConnectReturnCode, Connection, Event, MqttOptions, Packet, QoS, RecvTimeoutError};
use std::time::Duration;

/// Requests the client buffers before `try_publish` starts rejecting.
const REQUEST_CAPACITY: usize = 16;

/// Broker endpoint and session settings.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub qos: QoS,
}

impl MqttSettings {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        if let Some(user) = &self.username {
            options.set_credentials(user, self.password.clone().unwrap_or_default());
        }
        options
    }
}

/// Owned MQTT client and its event loop.
///
/// Nothing touches the network until [`Bus::service`] is called; the first
/// call performs the connect.
pub struct MqttBus {
    client: Client,
    connection: Connection,
    qos: QoS,
}

impl MqttBus {
    pub fn new(settings: &MqttSettings) -> Self {
        let (client, connection) = Client::new(settings.options(), REQUEST_CAPACITY);
        tracing::info!(
            host = %settings.host,
            port = settings.port,
            client_id = %settings.client_id,
            authenticated = settings.username.is_some(),
            "MQTT client created"
        );
        Self {
            client,
            connection,
            qos: settings.qos,
        }
    }
}

impl Bus for MqttBus {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), BusError> {
        self.client
            .try_publish(topic, self.qos, false, payload.as_bytes().to_vec())
            .map_err(|e| BusError::Rejected(e.to_string()))
    }

    fn service(&mut self, wait: Duration) -> Result<Option<BusEvent>, BusError> {
        match self.connection.recv_timeout(wait) {
            Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                if ack.code == ConnectReturnCode::Success {
                    Ok(Some(BusEvent::Connected))
                } else {
                    Err(BusError::Refused(format!("{:?}", ack.code)))
                }
            }
            Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                Err(BusError::Connection("broker sent disconnect".into()))
            }
            Ok(Ok(event)) => {
                tracing::trace!(?event, "MQTT event");
                Ok(Some(BusEvent::Activity))
            }
            Ok(Err(e)) => Err(BusError::Connection(e.to_string())),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BusError::Connection("MQTT request channel closed".into())),
        }
    }
}

/// Map a numeric QoS level.
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}
