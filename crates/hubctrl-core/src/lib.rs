//! HubCtrl core
//!
//! Turns JSON command envelopes received from a message bus into GPIO
//! direction and level changes.
//!
//! ## Architecture
//!
//! - **Command** (`command`): decodes a payload into a typed command
//! - **PinRegistry** (`registry`): pins configured so far, with their handles
//! - **Dispatcher** (`dispatcher`): applies commands to the registry and pins
//! - **GpioBridge** (`bridge`): receive loop, counters and shutdown
//! - **PinControl** (`pin`): capability the dispatcher drives pins through
//!
//! A level change is only accepted for a pin whose direction was set earlier;
//! otherwise it fails with [`BridgeError::PinNotConfigured`].

pub mod bridge;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod pin;
pub mod registry;

pub use bridge::{BridgeStats, GpioBridge, StatsSnapshot, StopReason};
pub use command::{Command, CommandKind, DecodeError};
pub use config::{ConfigError, DispatchOptions};
pub use dispatcher::{Dispatcher, Outcome};
pub use error::{BridgeError, Result};
pub use pin::{PinControl, PinControlError, PinHandle, PinLevel, PinMode, PinResult};
pub use registry::{PinEntry, PinRegistry, PinState};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
