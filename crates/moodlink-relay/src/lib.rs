//! moodlink-relay — Host side of moodlink.
//!
//! Reads newline-framed emotion labels from the camera's serial link and
//! republishes each one to a fixed MQTT topic. Everything runs on one thread:
//! [`Relay::tick`] performs a bounded-wait read, hands complete labels to the
//! [`Publisher`], then services the bus client.

pub mod bus;
pub mod config;
pub mod mqtt;
pub mod publisher;
pub mod reader;
pub mod relay;

pub use bus::{Backoff, Bus, BusError, BusEvent};
pub use config::{Config, ConfigError};
pub use mqtt::{MqttBus, MqttSettings};
pub use publisher::{PublishOutcome, Publisher, PublisherOptions};
pub use reader::{ReadOutcome, RelayReader};
pub use relay::{Relay, RelayOptions, Tick};
