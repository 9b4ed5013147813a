//! The host polling loop: drain the transport, service the bus, sleep.

use crate::bus::Bus;
use crate::publisher::Publisher;
use crate::reader::{ReadOutcome, RelayReader};
use std::io::Read;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RelayOptions {
    /// Sleep when a read returned no data.
    pub idle_delay: Duration,
    /// Sleep after a transport read failure.
    pub retry_delay: Duration,
    /// Log a forwarding summary every this many ticks (0 disables it).
    pub stats_interval: u64,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            idle_delay: Duration::from_millis(100),
            retry_delay: Duration::from_secs(1),
            stats_interval: 600,
        }
    }
}

/// What one [`Relay::tick`] did, and how long the loop should pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Bytes arrived; this many labels were handed to the publisher.
    Forwarded(usize),
    Idle,
    ReadFailed,
}

/// Reader and publisher driven from one thread.
pub struct Relay<R, B> {
    reader: RelayReader<R>,
    publisher: Publisher<B>,
    options: RelayOptions,
    ticks: u64,
    forwarded: u64,
}

impl<R: Read, B: Bus> Relay<R, B> {
    pub fn new(reader: RelayReader<R>, publisher: Publisher<B>, options: RelayOptions) -> Self {
        Self {
            reader,
            publisher,
            options,
            ticks: 0,
            forwarded: 0,
        }
    }

    /// One read attempt, forwarding every complete label, then one bus service pass.
    pub fn tick(&mut self) -> Tick {
        let tick = match self.reader.poll() {
            ReadOutcome::Labels(labels) => {
                for label in &labels {
                    self.publisher.publish(label);
                }
                self.forwarded += labels.len() as u64;
                Tick::Forwarded(labels.len())
            }
            ReadOutcome::Idle => Tick::Idle,
            ReadOutcome::Failed => Tick::ReadFailed,
        };
        self.publisher.service();
        self.ticks += 1;
        self.log_summary();
        tick
    }

    /// Returns whether a summary was logged on this tick.
    fn log_summary(&self) -> bool {
        let interval = self.options.stats_interval;
        if interval == 0 || self.ticks % interval != 0 {
            return false;
        }
        let stats = self.publisher.stats();
        tracing::info!(
            ticks = self.ticks,
            forwarded = self.forwarded,
            published = stats.published,
            deferred = stats.deferred,
            dropped = stats.dropped,
            connects = stats.connects,
            pending = self.publisher.pending(),
            connected = self.publisher.is_connected(),
            read_failures = self.reader.consecutive_failures(),
            malformed = self.reader.decode_failures(),
            "relay summary"
        );
        true
    }

    /// Pause that should follow `tick`.
    pub fn delay_after(&self, tick: Tick) -> Option<Duration> {
        match tick {
            Tick::Forwarded(_) => None,
            Tick::Idle => Some(self.options.idle_delay),
            Tick::ReadFailed => Some(self.options.retry_delay),
        }
    }

    /// Run forever.
    pub fn run(&mut self) -> ! {
        tracing::info!(
            topic = %self.publisher.topic(),
            idle_ms = self.options.idle_delay.as_millis() as u64,
            retry_ms = self.options.retry_delay.as_millis() as u64,
            stats_interval = self.options.stats_interval,
            "relay running"
        );
        loop {
            let tick = self.tick();
            if let Some(delay) = self.delay_after(tick) {
                std::thread::sleep(delay);
            }
        }
    }

    pub fn publisher(&self) -> &Publisher<B> {
        &self.publisher
    }

    pub fn publisher_mut(&mut self) -> &mut Publisher<B> {
        &mut self.publisher
    }
}
