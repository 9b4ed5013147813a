use crate::mqtt::{qos_from_level, MqttSettings};
use crate::publisher::PublisherOptions;
use crate::relay::RelayOptions;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("MOODLINK_MQTT_QOS must be 0, 1 or 2 (got {0:?})")]
    InvalidQos(String),
    #[error("MOODLINK_MQTT_PASSWORD is set but MOODLINK_MQTT_USERNAME is not")]
    PasswordWithoutUsername,
    #[error("MOODLINK_MQTT_TOPIC must not be empty")]
    EmptyTopic,
}

/// Relay configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Serial port to read; `None` auto-detects the first USB serial port.
    pub serial_port: Option<String>,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub idle_delay: Duration,
    pub retry_delay: Duration,
    /// Ticks between relay summary logs; 0 disables them.
    pub stats_interval: u64,
    pub mqtt: MqttSettings,
    pub topic: String,
    pub pending_capacity: usize,
    pub connect_timeout: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

impl Config {
    /// Load configuration from `MOODLINK_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let qos = match non_empty("MOODLINK_MQTT_QOS") {
            None => rumqttc::QoS::AtMostOnce,
            Some(raw) => raw
                .trim()
                .parse()
                .ok()
                .and_then(qos_from_level)
                .ok_or(ConfigError::InvalidQos(raw))?,
        };

        let username = non_empty("MOODLINK_MQTT_USERNAME");
        let password = lookup("MOODLINK_MQTT_PASSWORD");
        if password.is_some() && username.is_none() {
            return Err(ConfigError::PasswordWithoutUsername);
        }

        let topic = lookup("MOODLINK_MQTT_TOPIC").unwrap_or_else(|| "moodlink/emotion".to_string());
        if topic.is_empty() {
            return Err(ConfigError::EmptyTopic);
        }

        Ok(Self {
            serial_port: non_empty("MOODLINK_SERIAL_PORT"),
            baud_rate: parse_or(&lookup, "MOODLINK_BAUD_RATE", 115_200),
            read_timeout: millis_or(&lookup, "MOODLINK_READ_TIMEOUT_MS", 100),
            idle_delay: millis_or(&lookup, "MOODLINK_IDLE_DELAY_MS", 100),
            retry_delay: millis_or(&lookup, "MOODLINK_RETRY_DELAY_MS", 1000),
            stats_interval: parse_or(&lookup, "MOODLINK_STATS_INTERVAL", 600),
            mqtt: MqttSettings {
                host: non_empty("MOODLINK_MQTT_HOST").unwrap_or_else(|| "localhost".to_string()),
                port: parse_or(&lookup, "MOODLINK_MQTT_PORT", 1883),
                client_id: non_empty("MOODLINK_MQTT_CLIENT_ID").unwrap_or_else(|| "moodlink-relay".to_string()),
                username,
                password,
                keep_alive: Duration::from_secs(parse_or(&lookup, "MOODLINK_MQTT_KEEP_ALIVE_SECS", 60)),
                qos,
            },
            topic,
            pending_capacity: parse_or(&lookup, "MOODLINK_PENDING_CAPACITY", 64),
            connect_timeout: millis_or(&lookup, "MOODLINK_MQTT_CONNECT_TIMEOUT_MS", 3000),
            reconnect_min: millis_or(&lookup, "MOODLINK_RECONNECT_MIN_MS", 1000),
            reconnect_max: millis_or(&lookup, "MOODLINK_RECONNECT_MAX_MS", 30_000),
        })
    }

    pub fn publisher_options(&self) -> PublisherOptions {
        PublisherOptions {
            topic: self.topic.clone(),
            pending_capacity: self.pending_capacity,
            connect_wait: self.connect_timeout,
            reconnect_min: self.reconnect_min,
            reconnect_max: self.reconnect_max,
            ..PublisherOptions::default()
        }
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            idle_delay: self.idle_delay,
            retry_delay: self.retry_delay,
            stats_interval: self.stats_interval,
        }
    }
}

fn parse_or<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "invalid value; using default");
            default
        }),
    }
}

fn millis_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Duration {
    Duration::from_millis(parse_or(lookup, key, default))
}
