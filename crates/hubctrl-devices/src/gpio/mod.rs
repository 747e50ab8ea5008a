//! Pin-control backends.

pub mod noop;
pub mod sysfs;

pub use noop::NoopGpio;
pub use sysfs::SysfsGpio;

use hubctrl_core::PinControl;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Available backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpioBackend {
    Sysfs,
    Noop,
}

/// Build the pin control for `backend`.
///
/// `sysfs_root` is only used by the sysfs backend.
pub fn create_backend(backend: GpioBackend, sysfs_root: Option<PathBuf>) -> Arc<dyn PinControl> {
    match backend {
        GpioBackend::Sysfs => Arc::new(
            sysfs_root
                .map(SysfsGpio::new)
                .unwrap_or_else(|| SysfsGpio::new(hubctrl_core::config::env_vars::sysfs_root())),
        ),
        GpioBackend::Noop => Arc::new(NoopGpio::new()),
    }
}
