use anyhow::{Context, Result};
use moodlink_hw::link::detect_usb_port;
use moodlink_hw::{LinkSettings, SerialLink};
use moodlink_relay::{Config, MqttBus, Publisher, Relay, RelayReader};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "moodlink-relay starting");

    if let Err(e) = run() {
        tracing::error!("moodlink-relay stopped: {e:#}");
        return Err(e);
    }
    Ok(())
}

fn run() -> Result<()> {
    let config = Config::from_env().context("invalid configuration")?;

    let path = match &config.serial_port {
        Some(path) => path.clone(),
        None => {
            let path = detect_usb_port().context("detecting camera serial port")?;
            tracing::info!(path = %path, "detected USB serial port");
            path
        }
    };

    let link = SerialLink::open(LinkSettings {
        path,
        baud_rate: config.baud_rate,
        timeout: config.read_timeout,
    })
    .context("opening label transport")?;

    let bus = MqttBus::new(&config.mqtt);
    let mut relay = Relay::new(
        RelayReader::new(link),
        Publisher::new(bus, config.publisher_options()),
        config.relay_options(),
    );
    relay.run()
}
