//! Command-line interface for HubCtrl, the MQTT to GPIO bridge.

mod shutdown;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hubctrl_core::config::{defaults, env_vars};
use hubctrl_core::{BridgeError, DispatchOptions, GpioBridge, StopReason};
use hubctrl_devices::{GpioBackend, MqttBus, MqttConfig, Qos, create_backend};

/// HubCtrl - drive GPIO pins from MQTT messages.
#[derive(Parser, Debug)]
#[command(name = "hubctrl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// MQTT broker address, e.g. 192.168.1.1:1883.
    #[arg(long = "mqtt-broker", visible_alias = "mqttBroker")]
    mqtt_broker: String,

    /// Topic where control messages are received.
    #[arg(long)]
    topic: String,

    /// MQTT username.
    #[arg(long)]
    user: Option<String>,

    /// MQTT password.
    #[arg(long)]
    password: Option<String>,

    /// MQTT client ID (generated if not set).
    #[arg(long)]
    client_id: Option<String>,

    /// Subscription QoS.
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
    qos: u8,

    /// MQTT keep-alive interval in seconds.
    #[arg(long, default_value_t = defaults::KEEP_ALIVE_SECS)]
    keep_alive_secs: u64,

    /// Time allowed for connecting and subscribing, in seconds.
    #[arg(long, default_value_t = defaults::CONNECT_TIMEOUT_SECS)]
    connect_timeout_secs: u64,

    /// Consecutive connection errors tolerated before exiting (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    max_reconnects: u32,

    /// GPIO backend.
    #[arg(long, value_enum, default_value_t = BackendArg::Sysfs)]
    backend: BackendArg,

    /// Sysfs GPIO root directory.
    #[arg(long)]
    sysfs_root: Option<PathBuf>,

    /// Upper bound for a single pin operation, in milliseconds.
    #[arg(long)]
    pin_timeout_ms: Option<u64>,

    /// Reject GPIOSetMode messages with an unrecognized mode.
    #[arg(long)]
    strict_mode: bool,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    /// Linux /sys/class/gpio.
    Sysfs,
    /// Accept commands without driving any pin.
    Noop,
}

impl From<BackendArg> for GpioBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Sysfs => GpioBackend::Sysfs,
            BackendArg::Noop => GpioBackend::Noop,
        }
    }
}

impl Args {
    fn mqtt_config(&self) -> Result<MqttConfig> {
        let mut config = MqttConfig::from_address(&self.mqtt_broker)?
            .with_qos(Qos::try_from(self.qos)?)
            .with_keep_alive(self.keep_alive_secs)
            .with_connection_timeout(self.connect_timeout_secs)
            .with_max_reconnects(self.max_reconnects);
        if let (Some(user), Some(password)) = (&self.user, &self.password) {
            config = config.with_auth(user, password);
        }
        if let Some(client_id) = &self.client_id {
            config = config.with_client_id(client_id);
        }
        config.validate()?;
        Ok(config)
    }

    fn dispatch_options(&self) -> Result<DispatchOptions> {
        let timeout_ms = self.pin_timeout_ms.unwrap_or_else(env_vars::pin_timeout_ms);
        let options = DispatchOptions::default()
            .with_op_timeout(Duration::from_millis(timeout_ms))
            .with_strict_mode(self.strict_mode);
        options.validate()?;
        Ok(options)
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "hubctrl={level},hubctrl_core={level},hubctrl_devices={level},warn",
            level = default_level
        ))
    });

    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .compact()
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mqtt_config = args.mqtt_config()?;
    let options = args.dispatch_options()?;

    let control = create_backend(args.backend.into(), args.sysfs_root.clone());
    let bridge = GpioBridge::open(control, options)
        .await
        .context("Couldn't open GPIO")?;

    let mut bus = match connect_bus(mqtt_config, &args.topic).await {
        Ok(bus) => bus,
        Err(e) => {
            tracing::error!("{}", e);
            shutdown::release_pins(bridge).await;
            return Err(e.into());
        }
    };

    let reason = match bus.payloads() {
        Ok(payloads) => bridge.run(payloads, shutdown::shutdown_signal()).await,
        Err(e) => {
            tracing::error!("Failed to start message stream: {}", e);
            StopReason::StreamEnded
        }
    };

    if let Err(e) = bus.disconnect().await {
        tracing::warn!("MQTT disconnect error: {}", e);
    }
    shutdown::release_pins(bridge).await;

    match reason {
        StopReason::Shutdown => Ok(()),
        StopReason::StreamEnded => {
            Err(BridgeError::BusConnection("message stream ended".to_string()).into())
        }
    }
}

async fn connect_bus(
    config: MqttConfig,
    topic: &str,
) -> std::result::Result<MqttBus, BridgeError> {
    let broker = config.broker_addr();
    let mut bus = MqttBus::connect(config).await.map_err(|e| {
        BridgeError::BusConnection(format!("Error connecting to MQTT broker {}: {}", broker, e))
    })?;

    if let Err(e) = bus.subscribe(topic).await {
        let _ = bus.disconnect().await;
        return Err(BridgeError::BusConnection(format!(
            "Error subscribing to topic {}: {}",
            topic, e
        )));
    }
    Ok(bus)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["hubctrl", "--mqtt-broker", "10.0.0.2:1884", "--topic", "hub/ctrl"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.backend, BackendArg::Sysfs);
        assert_eq!(args.qos, 0);
        assert!(!args.strict_mode);

        let config = args.mqtt_config().unwrap();
        assert_eq!(config.broker_addr(), "10.0.0.2:1884");
        assert_eq!(config.credentials(), None);
    }

    #[test]
    fn test_credentials_and_options() {
        let args = parse(&[
            "--user",
            "hub",
            "--password",
            "secret",
            "--qos",
            "1",
            "--backend",
            "noop",
            "--pin-timeout-ms",
            "250",
            "--strict-mode",
        ]);
        let config = args.mqtt_config().unwrap();
        assert_eq!(config.credentials(), Some(("hub", "secret")));
        assert_eq!(config.qos, Qos::AtLeastOnce);

        let options = args.dispatch_options().unwrap();
        assert_eq!(options.op_timeout, Duration::from_millis(250));
        assert!(options.reject_unspecified_mode);
        assert_eq!(args.backend, BackendArg::Noop);
    }

    #[test]
    fn test_legacy_broker_flag() {
        let args =
            Args::try_parse_from(["hubctrl", "--mqttBroker", "broker", "--topic", "t"]).unwrap();
        assert_eq!(args.mqtt_config().unwrap().broker_addr(), "broker:1883");
    }

    #[test]
    fn test_missing_mandatory_arguments() {
        assert!(Args::try_parse_from(["hubctrl", "--topic", "t"]).is_err());
        assert!(Args::try_parse_from(["hubctrl", "--mqtt-broker", "b"]).is_err());
    }

    #[test]
    fn test_qos_out_of_range_rejected() {
        assert!(
            Args::try_parse_from(["hubctrl", "--mqtt-broker", "b", "--topic", "t", "--qos", "3"])
                .is_err()
        );
    }

    #[test]
    fn test_zero_pin_timeout_rejected() {
        let args = parse(&["--pin-timeout-ms", "0"]);
        assert!(args.dispatch_options().is_err());
    }
}
