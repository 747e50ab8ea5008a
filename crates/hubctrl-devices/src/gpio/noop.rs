//! Pin control that drives nothing.
//!
//! Selected when the host has no GPIO (or for dry runs): every call succeeds
//! and is logged at debug level.

use async_trait::async_trait;
use hubctrl_core::{PinControl, PinHandle, PinLevel, PinMode, PinResult};
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGpio;

impl NoopGpio {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PinControl for NoopGpio {
    fn name(&self) -> &str {
        "noop"
    }

    async fn open(&self) -> PinResult<()> {
        debug!("noop GPIO open");
        Ok(())
    }

    async fn acquire(&self, pin: u32) -> PinResult<Box<dyn PinHandle>> {
        debug!(pin, "noop GPIO acquire");
        Ok(Box::new(NoopPin { pin }))
    }

    async fn close(&self) -> PinResult<()> {
        debug!("noop GPIO close");
        Ok(())
    }
}

struct NoopPin {
    pin: u32,
}

#[async_trait]
impl PinHandle for NoopPin {
    fn pin(&self) -> u32 {
        self.pin
    }

    async fn set_mode(&mut self, mode: PinMode) -> PinResult<()> {
        debug!(pin = self.pin, %mode, "noop GPIO set mode");
        Ok(())
    }

    async fn set_level(&mut self, level: PinLevel) -> PinResult<()> {
        debug!(pin = self.pin, %level, "noop GPIO set level");
        Ok(())
    }

    async fn release(&mut self) -> PinResult<()> {
        Ok(())
    }
}
