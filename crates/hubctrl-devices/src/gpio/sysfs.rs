//! Linux sysfs GPIO backend.
//!
//! Uses the `/sys/class/gpio` ABI:
//!
//! | operation | file | value |
//! |---|---|---|
//! | acquire | `export` | pin number |
//! | set mode | `gpio<N>/direction` | `in` / `out` |
//! | set level | `gpio<N>/value` | `1` / `0` |
//! | release | `unexport` | pin number |
//!
//! The root directory is configurable so the backend can be pointed at a
//! fake tree.

use async_trait::async_trait;
use hubctrl_core::{PinControl, PinControlError, PinHandle, PinLevel, PinMode, PinResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// GPIO access through sysfs.
pub struct SysfsGpio {
    root: PathBuf,
    closed: Arc<AtomicBool>,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{}", pin))
    }
}

async fn write_attr(path: &Path, value: &str) -> PinResult<()> {
    tokio::fs::write(path, value).await.map_err(|e| {
        PinControlError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })
}

#[async_trait]
impl PinControl for SysfsGpio {
    fn name(&self) -> &str {
        "sysfs"
    }

    async fn open(&self) -> PinResult<()> {
        let metadata = tokio::fs::metadata(&self.root).await.map_err(|e| {
            PinControlError::Unavailable(format!("{}: {}", self.root.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(PinControlError::Unavailable(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        self.closed.store(false, Ordering::SeqCst);
        info!(root = %self.root.display(), "Sysfs GPIO opened");
        Ok(())
    }

    async fn acquire(&self, pin: u32) -> PinResult<Box<dyn PinHandle>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PinControlError::Closed);
        }

        let dir = self.pin_dir(pin);
        let exported = if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            debug!(pin, "GPIO already exported, leaving it exported on release");
            false
        } else {
            write_attr(&self.root.join("export"), &pin.to_string()).await?;
            debug!(pin, "GPIO exported");
            true
        };

        Ok(Box::new(SysfsPin {
            pin,
            root: self.root.clone(),
            dir,
            exported,
            closed: self.closed.clone(),
        }))
    }

    async fn close(&self) -> PinResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        info!(root = %self.root.display(), "Sysfs GPIO closed");
        Ok(())
    }
}

/// One exported sysfs pin.
struct SysfsPin {
    pin: u32,
    root: PathBuf,
    dir: PathBuf,
    /// Whether `acquire` wrote `export` for this pin.
    exported: bool,
    closed: Arc<AtomicBool>,
}

impl SysfsPin {
    fn check_open(&self) -> PinResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(PinControlError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PinHandle for SysfsPin {
    fn pin(&self) -> u32 {
        self.pin
    }

    async fn set_mode(&mut self, mode: PinMode) -> PinResult<()> {
        self.check_open()?;
        let value = match mode {
            PinMode::Input => "in",
            PinMode::Output => "out",
        };
        write_attr(&self.dir.join("direction"), value).await
    }

    async fn set_level(&mut self, level: PinLevel) -> PinResult<()> {
        self.check_open()?;
        let value = match level {
            PinLevel::High => "1",
            PinLevel::Low => "0",
        };
        write_attr(&self.dir.join("value"), value).await
    }

    async fn release(&mut self) -> PinResult<()> {
        if !self.exported {
            return Ok(());
        }
        write_attr(&self.root.join("unexport"), &self.pin.to_string()).await?;
        self.exported = false;
        debug!(pin = self.pin, "GPIO unexported");
        Ok(())
    }
}
