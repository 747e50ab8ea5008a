//! Error taxonomy for the bridge.

use crate::command::DecodeError;
use crate::pin::PinControlError;

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors raised while handling commands or running the bridge.
///
/// Everything except [`BusConnection`](Self::BusConnection) and
/// [`Backend`](Self::Backend) is scoped to a single message: it is reported
/// and the message is dropped.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Payload is not a valid command envelope.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Envelope decoded but `Type` is not recognized.
    #[error("Unknown command type: {0:?}")]
    UnknownCommandKind(String),

    /// Level change for a pin whose direction was never set.
    #[error("GPIO {0} is not configured, send GPIOSetMode first")]
    PinNotConfigured(u32),

    /// Mode string not recognized and strict mode is on.
    #[error("GPIO {0}: unrecognized mode")]
    UnspecifiedMode(u32),

    /// The pin-control backend failed for one pin.
    #[error("Pin control failed on GPIO {pin}: {source}")]
    PinControl {
        pin: u32,
        #[source]
        source: PinControlError,
    },

    /// The pin-control backend failed as a whole (open/close).
    #[error("GPIO backend error: {0}")]
    Backend(#[source] PinControlError),

    /// The message bus could not be reached or subscribed.
    #[error("Message bus connection failed: {0}")]
    BusConnection(String),
}

impl BridgeError {
    /// Whether the process should stop on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BusConnection(_) | Self::Backend(_))
    }

    /// Pin the error refers to, if any.
    pub fn pin(&self) -> Option<u32> {
        match self {
            Self::PinNotConfigured(pin)
            | Self::UnspecifiedMode(pin)
            | Self::PinControl { pin, .. } => Some(*pin),
            _ => None,
        }
    }
}
