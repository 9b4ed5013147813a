//! Forwards labels to the fixed bus topic, riding out connection loss.

use crate::bus::{Backoff, Bus, BusError, BusEvent};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Upper bound on bus events handled by one [`Publisher::service`] call.
const MAX_EVENTS_PER_SERVICE: usize = 32;

/// What happened to one label handed to [`Publisher::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the bus client.
    Sent,
    /// Held until the connection comes back.
    Deferred,
    /// Not kept anywhere (pending queue disabled).
    Dropped,
}

#[derive(Debug, Clone)]
pub struct PublisherOptions {
    pub topic: String,
    /// Labels held while disconnected; 0 drops them instead.
    pub pending_capacity: usize,
    /// Bounded wait when servicing an established connection.
    pub service_wait: Duration,
    /// Bounded wait for a connect attempt to be acknowledged.
    pub connect_wait: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            topic: "moodlink/emotion".to_string(),
            pending_capacity: 64,
            service_wait: Duration::from_millis(10),
            connect_wait: Duration::from_secs(3),
            reconnect_min: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub published: u64,
    pub deferred: u64,
    pub dropped: u64,
    pub connects: u64,
}

/// Owns the bus connection and publishes each label to one topic.
///
/// While disconnected, labels wait in a bounded queue (oldest dropped first)
/// and are flushed in order once the broker acknowledges a connect.
/// Reconnect attempts are spaced by exponential backoff.
pub struct Publisher<B> {
    bus: B,
    options: PublisherOptions,
    connected: bool,
    retry_at: Option<Instant>,
    backoff: Backoff,
    pending: VecDeque<String>,
    stats: PublisherStats,
}

impl<B: Bus> Publisher<B> {
    pub fn new(bus: B, options: PublisherOptions) -> Self {
        Self {
            bus,
            backoff: Backoff::new(options.reconnect_min, options.reconnect_max),
            pending: VecDeque::with_capacity(options.pending_capacity),
            options,
            connected: false,
            retry_at: None,
            stats: PublisherStats::default(),
        }
    }

    /// Publish `label`. Never fails; see [`PublishOutcome`].
    ///
    /// Queues behind earlier deferred labels so delivery order is kept.
    pub fn publish(&mut self, label: &str) -> PublishOutcome {
        if !self.connected || !self.pending.is_empty() {
            return self.defer(label.to_string());
        }
        match self.bus.publish(&self.options.topic, label) {
            Ok(()) => {
                self.stats.published += 1;
                tracing::debug!(topic = %self.options.topic, label, "published label");
                PublishOutcome::Sent
            }
            Err(e) => {
                tracing::warn!(topic = %self.options.topic, label, error = %e, "publish failed; deferring label");
                if e.is_connection_lost() {
                    self.disconnected(e);
                }
                self.defer(label.to_string())
            }
        }
    }

    /// Drive the bus client: keep-alive, acknowledgments, reconnects.
    ///
    /// Does nothing while a reconnect is backing off. Flushes deferred
    /// labels once connected.
    pub fn service(&mut self) {
        if let Some(at) = self.retry_at {
            if Instant::now() < at {
                return;
            }
            self.retry_at = None;
        }

        for _ in 0..MAX_EVENTS_PER_SERVICE {
            let wait = if self.connected {
                self.options.service_wait
            } else {
                self.options.connect_wait
            };
            match self.bus.service(wait) {
                Ok(Some(BusEvent::Connected)) => {
                    self.connected = true;
                    self.backoff.reset();
                    self.stats.connects += 1;
                    tracing::info!(
                        topic = %self.options.topic,
                        pending = self.pending.len(),
                        "connected to broker"
                    );
                }
                Ok(Some(BusEvent::Activity)) => {}
                Ok(None) if self.connected => break,
                Ok(None) => {
                    self.disconnected(BusError::Connection("no acknowledgment from broker".into()));
                    break;
                }
                Err(e) => {
                    self.disconnected(e);
                    break;
                }
            }
        }
        self.flush();
    }

    fn disconnected(&mut self, error: BusError) {
        let delay = self.backoff.next_delay();
        self.retry_at = Some(Instant::now() + delay);
        if self.connected {
            tracing::warn!(error = %error, retry_in_ms = delay.as_millis() as u64, "broker connection lost");
        } else {
            tracing::warn!(error = %error, retry_in_ms = delay.as_millis() as u64, "broker connection attempt failed");
        }
        self.connected = false;
    }

    fn flush(&mut self) {
        while self.connected {
            let Some(label) = self.pending.pop_front() else {
                break;
            };
            match self.bus.publish(&self.options.topic, &label) {
                Ok(()) => {
                    self.stats.published += 1;
                    tracing::debug!(topic = %self.options.topic, label = %label, "published deferred label");
                }
                Err(e) => {
                    tracing::warn!(error = %e, remaining = self.pending.len() + 1, "flushing deferred labels failed");
                    self.pending.push_front(label);
                    if e.is_connection_lost() {
                        self.disconnected(e);
                    }
                    break;
                }
            }
        }
    }

    fn defer(&mut self, label: String) -> PublishOutcome {
        let capacity = self.options.pending_capacity;
        if capacity == 0 {
            self.stats.dropped += 1;
            tracing::warn!(label = %label, "broker not connected; dropping label");
            return PublishOutcome::Dropped;
        }
        if self.pending.len() >= capacity {
            if let Some(oldest) = self.pending.pop_front() {
                self.stats.dropped += 1;
                tracing::warn!(dropped = %oldest, capacity, "pending queue full; dropping oldest label");
            }
        }
        self.pending.push_back(label);
        self.stats.deferred += 1;
        PublishOutcome::Deferred
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &PublisherStats {
        &self.stats
    }

    pub fn topic(&self) -> &str {
        &self.options.topic
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }
}
