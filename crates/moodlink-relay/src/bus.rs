//! Publish/subscribe bus seam used by the [`Publisher`](crate::Publisher).

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusError {
    #[error("broker connection failed: {0}")]
    Connection(String),
    #[error("broker refused connection: {0}")]
    Refused(String),
    #[error("publish request rejected: {0}")]
    Rejected(String),
}

impl BusError {
    /// Whether the connection must be re-established before publishing again.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, BusError::Connection(_) | BusError::Refused(_))
    }
}

/// Something the bus client did while being serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// The broker acknowledged a (re)connect.
    Connected,
    /// Any other traffic: acks, pings, outgoing packets.
    Activity,
}

/// A bus client connection, driven from the relay thread.
pub trait Bus {
    /// Hand `payload` to the client for delivery on `topic`. Best effort.
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), BusError>;

    /// Run the client's event processing for at most `wait`.
    ///
    /// `Ok(None)` means nothing happened within `wait`. An error means the
    /// connection is down; the next call starts a reconnect.
    fn service(&mut self, wait: Duration) -> Result<Option<BusEvent>, BusError>;
}

/// Exponential backoff between reconnect attempts, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self { min, max, current: min }
    }

    /// Delay before the next attempt; doubles the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}
