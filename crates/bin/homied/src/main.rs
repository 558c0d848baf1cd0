//! # homied
//!
//! Composition root — the only crate that knows about every layer.
//!
//! ## Responsibilities
//! - Load configuration (`homie.toml` + environment overrides)
//! - Install the tracing subscriber
//! - Build the device tree on top of the MQTT adapter
//! - Log incoming commands and acknowledge them by publishing the new value
//! - Announce `disconnected` on Ctrl-C before closing the connection
//!
//! ## Dependency rule
//! Depends on **all** crates: `domain`, `app`, and the MQTT adapter.

mod config;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use homie_adapter_mqtt::MqttTransport;
use homie_app::ports::Transport;
use homie_app::{Command, CommandSubscription, Device, RootDevice};
use homie_domain::error::HomieError;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.logging.filter).context("invalid logging filter")?,
        )
        .init();

    // -- Adapter & device tree --
    let transport = Arc::new(MqttTransport::new(config.mqtt.clone()));
    let root = RootDevice::builder(Arc::clone(&transport))
        .id(config.device.id.clone())
        .prefix(config.device.prefix.clone())
        .config(config.device.config.clone())
        .build()
        .context("invalid root device")?;

    transport
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", config.mqtt.broker_host))?;

    let mut devices = vec![Device::clone(&root)];
    for (id, child) in &config.device.children {
        let device = root
            .create_device(id, child.clone())
            .await
            .with_context(|| format!("failed to create device {id}"))?;
        devices.push(device);
    }

    // -- Commands --
    let (acknowledgements, mut commands) = mpsc::unbounded_channel();
    let _subscriptions = devices
        .iter()
        .map(|device| watch_commands(device, config.device.echo_commands, &acknowledgements))
        .collect::<Result<Vec<_>, _>>()?;
    drop(devices);

    root.start().await.context("failed to start device tree")?;
    tracing::info!(
        device = %root.id(),
        children = config.device.children.len(),
        broker = %config.mqtt.broker_host,
        port = config.mqtt.broker_port,
        "homied started"
    );

    // -- Main loop --
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for shutdown signal")?;
                break;
            }
            Some(command) = commands.recv() => acknowledge(&root, &command).await,
        }
    }

    tracing::info!("shutting down");
    root.disconnect().await.context("failed to disconnect")?;
    Ok(())
}

/// Log every command received by `device`, and queue it for acknowledgement
/// when `echo` is set.
fn watch_commands<T: Transport>(
    device: &Device<T>,
    echo: bool,
    acknowledgements: &mpsc::UnboundedSender<Command>,
) -> Result<CommandSubscription, HomieError> {
    let acknowledgements = acknowledgements.clone();
    device.on_command(move |command| {
        tracing::info!(
            device = %command.device_id,
            node = %command.node_id,
            property = %command.property_id,
            value = %command.raw,
            "command received"
        );
        if echo && acknowledgements.send(command.clone()).is_err() {
            tracing::debug!("acknowledgement queue closed");
        }
    })
}

/// Publish the commanded value as the property's current value.
async fn acknowledge<T: Transport + 'static>(root: &RootDevice<T>, command: &Command) {
    let Some(device) = root.device(command.device_id.as_str()) else {
        tracing::debug!(device = %command.device_id, "device removed before acknowledgement");
        return;
    };
    if let Err(err) = device
        .set_value(
            command.node_id.as_str(),
            command.property_id.as_str(),
            &command.raw,
        )
        .await
    {
        tracing::warn!(error = %err, device = %command.device_id, "failed to acknowledge command");
    }
}
