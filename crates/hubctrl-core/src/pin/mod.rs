//! Pin-control capability.
//!
//! The dispatcher never talks to hardware directly. It goes through two
//! traits:
//!
//! - [`PinControl`]: the process-wide controller, bracketed by
//!   [`open`](PinControl::open) / [`close`](PinControl::close), which hands out
//!   one [`PinHandle`] per pin number.
//! - [`PinHandle`]: an exclusively owned capability bound to one pin, used to
//!   switch direction and drive the logic level.
//!
//! Concrete backends (sysfs, no-op) live in `hubctrl-devices`; the
//! [`recording`] backend here is an in-memory implementation for tests and
//! dry runs.

pub mod recording;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for pin-control operations.
pub type PinResult<T> = std::result::Result<T, PinControlError>;

/// Direction of a GPIO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinMode {
    Input,
    Output,
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "Input"),
            Self::Output => write!(f, "Output"),
        }
    }
}

/// Logic level of a GPIO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinLevel {
    High,
    Low,
}

impl fmt::Display for PinLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "High"),
            Self::Low => write!(f, "Low"),
        }
    }
}

/// Errors reported by a pin-control backend.
#[derive(Debug, thiserror::Error)]
pub enum PinControlError {
    /// Platform I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend did not answer in time.
    #[error("{op} timed out after {after_ms}ms")]
    Timeout { op: &'static str, after_ms: u64 },

    /// The backend has been closed.
    #[error("Pin control is closed")]
    Closed,

    /// The backend cannot be used on this host.
    #[error("Pin control unavailable: {0}")]
    Unavailable(String),
}

/// Process-wide pin controller.
#[async_trait]
pub trait PinControl: Send + Sync {
    /// Backend name, for logging.
    fn name(&self) -> &str;

    /// Prepare the controller. Called once before any pin is acquired.
    async fn open(&self) -> PinResult<()>;

    /// Acquire the handle for `pin`.
    ///
    /// The caller owns the returned handle exclusively and must hand it back
    /// through [`PinHandle::release`].
    async fn acquire(&self, pin: u32) -> PinResult<Box<dyn PinHandle>>;

    /// Tear the controller down. Called once after every handle is released.
    async fn close(&self) -> PinResult<()>;
}

/// Capability bound to one physical pin.
#[async_trait]
pub trait PinHandle: Send + Sync {
    /// Pin number this handle is bound to.
    fn pin(&self) -> u32;

    /// Switch direction.
    async fn set_mode(&mut self, mode: PinMode) -> PinResult<()>;

    /// Drive the logic level.
    async fn set_level(&mut self, level: PinLevel) -> PinResult<()>;

    /// Give the pin back to the platform.
    async fn release(&mut self) -> PinResult<()>;
}
