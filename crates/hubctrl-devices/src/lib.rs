//! HubCtrl device collaborators
//!
//! Concrete implementations of the capabilities the core consumes.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `mqtt` | ✅ | MQTT message bus client |
//!
//! ## Modules
//!
//! - **gpio**: pin-control backends (`sysfs`, `noop`)
//! - **mqtt**: message bus client delivering payloads as a stream

pub mod gpio;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use gpio::{GpioBackend, NoopGpio, SysfsGpio, create_backend};

#[cfg(feature = "mqtt")]
pub use mqtt::{BusError, BusResult, MqttBus, MqttConfig, PayloadStream, Qos};
