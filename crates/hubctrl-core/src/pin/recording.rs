//! In-memory pin control that records every call.
//!
//! Nothing is driven; each call is appended to a shared log that can be
//! inspected afterwards. Individual pins can be made to fail and every call
//! can be delayed, which is how timeouts and backend faults are exercised.

use super::{PinControl, PinControlError, PinHandle, PinLevel, PinMode, PinResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A single recorded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinCall {
    Open,
    Acquire(u32),
    ConfigureOutput(u32),
    ConfigureInput(u32),
    DriveHigh(u32),
    DriveLow(u32),
    Release(u32),
    Close,
}

impl PinCall {
    /// Whether this call changes the physical pin (direction or level).
    pub fn is_physical(&self) -> bool {
        matches!(
            self,
            Self::ConfigureOutput(_) | Self::ConfigureInput(_) | Self::DriveHigh(_) | Self::DriveLow(_)
        )
    }
}

#[derive(Default)]
struct Shared {
    calls: Mutex<Vec<PinCall>>,
    failing: Mutex<HashSet<u32>>,
    delay: Mutex<Option<Duration>>,
    closed: AtomicBool,
}

impl Shared {
    async fn enter(&self, pin: u32) -> PinResult<()> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(PinControlError::Closed);
        }
        if self.failing.lock().contains(&pin) {
            return Err(PinControlError::Io(std::io::Error::other(format!(
                "injected fault on pin {}",
                pin
            ))));
        }
        Ok(())
    }

    fn record(&self, call: PinCall) {
        self.calls.lock().push(call);
    }
}

/// Pin control backed by a call log.
///
/// Cloning shares the log, so tests keep a clone and hand the other to the
/// dispatcher.
#[derive(Clone, Default)]
pub struct RecordingPinControl {
    shared: Arc<Shared>,
}

impl RecordingPinControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call touching `pin` fail with an I/O error.
    pub fn fail_pin(&self, pin: u32) {
        self.shared.failing.lock().insert(pin);
    }

    /// Undo [`fail_pin`](Self::fail_pin).
    pub fn heal_pin(&self, pin: u32) {
        self.shared.failing.lock().remove(&pin);
    }

    /// Delay every pin call by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.shared.delay.lock() = delay;
    }

    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<PinCall> {
        self.shared.calls.lock().clone()
    }

    /// Only the calls that change a physical pin.
    pub fn physical_calls(&self) -> Vec<PinCall> {
        self.calls().into_iter().filter(PinCall::is_physical).collect()
    }

    /// Number of times `call` was recorded.
    pub fn count(&self, call: PinCall) -> usize {
        self.shared.calls.lock().iter().filter(|c| **c == call).count()
    }

    pub fn clear(&self) {
        self.shared.calls.lock().clear();
    }
}

#[async_trait]
impl PinControl for RecordingPinControl {
    fn name(&self) -> &str {
        "recording"
    }

    async fn open(&self) -> PinResult<()> {
        self.shared.closed.store(false, Ordering::SeqCst);
        self.shared.record(PinCall::Open);
        Ok(())
    }

    async fn acquire(&self, pin: u32) -> PinResult<Box<dyn PinHandle>> {
        self.shared.enter(pin).await?;
        self.shared.record(PinCall::Acquire(pin));
        Ok(Box::new(RecordingPin {
            pin,
            shared: self.shared.clone(),
        }))
    }

    async fn close(&self) -> PinResult<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.record(PinCall::Close);
        Ok(())
    }
}

struct RecordingPin {
    pin: u32,
    shared: Arc<Shared>,
}

#[async_trait]
impl PinHandle for RecordingPin {
    fn pin(&self) -> u32 {
        self.pin
    }

    async fn set_mode(&mut self, mode: PinMode) -> PinResult<()> {
        self.shared.enter(self.pin).await?;
        self.shared.record(match mode {
            PinMode::Output => PinCall::ConfigureOutput(self.pin),
            PinMode::Input => PinCall::ConfigureInput(self.pin),
        });
        Ok(())
    }

    async fn set_level(&mut self, level: PinLevel) -> PinResult<()> {
        self.shared.enter(self.pin).await?;
        self.shared.record(match level {
            PinLevel::High => PinCall::DriveHigh(self.pin),
            PinLevel::Low => PinCall::DriveLow(self.pin),
        });
        Ok(())
    }

    async fn release(&mut self) -> PinResult<()> {
        self.shared.record(PinCall::Release(self.pin));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let control = RecordingPinControl::new();
        control.open().await.unwrap();

        let mut pin = control.acquire(4).await.unwrap();
        pin.set_mode(PinMode::Output).await.unwrap();
        pin.set_level(PinLevel::High).await.unwrap();
        pin.release().await.unwrap();
        control.close().await.unwrap();

        assert_eq!(
            control.calls(),
            vec![
                PinCall::Open,
                PinCall::Acquire(4),
                PinCall::ConfigureOutput(4),
                PinCall::DriveHigh(4),
                PinCall::Release(4),
                PinCall::Close,
            ]
        );
        assert_eq!(control.physical_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_injected_fault() {
        let control = RecordingPinControl::new();
        control.fail_pin(9);

        assert!(matches!(
            control.acquire(9).await,
            Err(PinControlError::Io(_))
        ));
        assert!(control.calls().is_empty());

        control.heal_pin(9);
        assert!(control.acquire(9).await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_rejects_acquire() {
        let control = RecordingPinControl::new();
        control.close().await.unwrap();
        assert!(matches!(control.acquire(1).await, Err(PinControlError::Closed)));
    }
}
