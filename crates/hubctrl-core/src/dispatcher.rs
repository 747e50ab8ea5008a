//! Command dispatch.
//!
//! Applies decoded [`Command`]s to the [`PinRegistry`] and issues the matching
//! pin-control calls. The registry lock is held for the whole dispatch of one
//! command, so commands are applied strictly in arrival order even when the
//! bus client delivers from several tasks.

use crate::command::Command;
use crate::config::DispatchOptions;
use crate::error::{BridgeError, Result};
use crate::pin::{PinControl, PinControlError, PinLevel, PinMode, PinResult};
use crate::registry::{PinEntry, PinRegistry, PinState};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Effect of a successfully dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Direction switched.
    ModeSet { pin: u32, mode: PinMode },
    /// SetMode with an unrecognized mode: entry stored, nothing driven.
    ModeUnspecified { pin: u32 },
    /// Level driven.
    LevelSet { pin: u32, level: PinLevel },
    /// SetLevel with an unrecognized level: nothing changed.
    LevelUnspecified { pin: u32 },
}

impl Outcome {
    pub fn pin(&self) -> u32 {
        match self {
            Self::ModeSet { pin, .. }
            | Self::ModeUnspecified { pin }
            | Self::LevelSet { pin, .. }
            | Self::LevelUnspecified { pin } => *pin,
        }
    }

    /// Whether a physical call was issued.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::ModeSet { .. } | Self::LevelSet { .. })
    }
}

/// Owns the pin registry and applies commands to it.
pub struct Dispatcher {
    control: Arc<dyn PinControl>,
    registry: Mutex<PinRegistry>,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(control: Arc<dyn PinControl>, options: DispatchOptions) -> Self {
        Self {
            control,
            registry: Mutex::new(PinRegistry::new()),
            options,
        }
    }

    /// Decode `payload` and dispatch it.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<Outcome> {
        let command = Command::decode(payload)?;
        self.dispatch(&command).await
    }

    /// Apply one command.
    pub async fn dispatch(&self, command: &Command) -> Result<Outcome> {
        debug!(kind = %command.kind(), pin = ?command.pin(), "Dispatching command");
        match command {
            Command::SetMode { pin, mode } => self.set_mode(*pin, *mode).await,
            Command::SetLevel { pin, level } => self.set_level(*pin, *level).await,
            Command::Unknown { kind } => Err(BridgeError::UnknownCommandKind(kind.clone())),
        }
    }

    async fn set_mode(&self, pin: u32, mode: Option<PinMode>) -> Result<Outcome> {
        match mode {
            Some(mode) => info!(pin, %mode, "GPIO setting mode"),
            None => {
                if self.options.reject_unspecified_mode {
                    return Err(BridgeError::UnspecifiedMode(pin));
                }
                warn!(pin, "GPIOSetMode with unrecognized mode, storing pin without direction");
            }
        }

        let mut registry = self.registry.lock().await;

        if let Some(entry) = registry.get_mut(pin) {
            if let Some(mode) = mode {
                self.guarded(pin, "set_mode", entry.handle_mut().set_mode(mode))
                    .await?;
            }
            entry.mode = mode;
            entry.level = None;
        } else {
            let handle = self
                .guarded(pin, "acquire", self.control.acquire(pin))
                .await?;
            let mut entry = PinEntry::new(handle);
            let configured = match mode {
                Some(mode) => {
                    self.guarded(pin, "set_mode", entry.handle_mut().set_mode(mode))
                        .await
                }
                None => Ok(()),
            };
            if let Err(e) = configured {
                self.release_entry(pin, entry).await;
                return Err(e);
            }
            entry.mode = mode;
            registry.insert(pin, entry);
        }

        Ok(match mode {
            Some(mode) => Outcome::ModeSet { pin, mode },
            None => Outcome::ModeUnspecified { pin },
        })
    }

    async fn set_level(&self, pin: u32, level: Option<PinLevel>) -> Result<Outcome> {
        let mut registry = self.registry.lock().await;

        let entry = registry
            .get_mut(pin)
            .ok_or(BridgeError::PinNotConfigured(pin))?;

        let Some(level) = level else {
            warn!(pin, "GPIOLevel with unrecognized level, ignoring");
            return Ok(Outcome::LevelUnspecified { pin });
        };

        info!(pin, %level, "GPIO setting level");
        self.guarded(pin, "set_level", entry.handle_mut().set_level(level))
            .await?;
        entry.level = Some(level);

        Ok(Outcome::LevelSet { pin, level })
    }

    /// Run a pin-control call under the configured timeout.
    async fn guarded<T, F>(&self, pin: u32, op: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = PinResult<T>>,
    {
        match tokio::time::timeout(self.options.op_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(BridgeError::PinControl { pin, source }),
            Err(_) => Err(BridgeError::PinControl {
                pin,
                source: PinControlError::Timeout {
                    op,
                    after_ms: self.options.op_timeout.as_millis() as u64,
                },
            }),
        }
    }

    async fn release_entry(&self, pin: u32, entry: PinEntry) -> bool {
        let mut handle = entry.into_handle();
        match self.guarded(pin, "release", handle.release()).await {
            Ok(()) => {
                debug!(pin, "GPIO released");
                true
            }
            Err(e) => {
                warn!(pin, "Failed to release GPIO: {}", e);
                false
            }
        }
    }

    /// Current state of `pin`, if it has been configured.
    pub async fn pin_state(&self, pin: u32) -> Option<PinState> {
        self.registry.lock().await.state(pin)
    }

    /// States of every configured pin, ordered by pin number.
    pub async fn snapshot(&self) -> Vec<PinState> {
        self.registry.lock().await.states()
    }

    /// Number of configured pins.
    pub async fn configured_pins(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Release every handle and empty the registry.
    ///
    /// Returns the number of handles released cleanly.
    pub async fn release_all(&self) -> usize {
        let entries = self.registry.lock().await.drain();
        let mut released = 0;
        for (pin, entry) in entries {
            if self.release_entry(pin, entry).await {
                released += 1;
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::recording::{PinCall, RecordingPinControl};
    use std::time::Duration;

    fn dispatcher(control: &RecordingPinControl) -> Dispatcher {
        Dispatcher::new(Arc::new(control.clone()), DispatchOptions::default())
    }

    #[tokio::test]
    async fn test_set_mode_acquires_once_and_reuses_handle() {
        let control = RecordingPinControl::new();
        let d = dispatcher(&control);

        d.dispatch(&Command::SetMode {
            pin: 5,
            mode: Some(PinMode::Output),
        })
        .await
        .unwrap();
        d.dispatch(&Command::SetMode {
            pin: 5,
            mode: Some(PinMode::Input),
        })
        .await
        .unwrap();

        assert_eq!(control.count(PinCall::Acquire(5)), 1);
        assert_eq!(
            control.physical_calls(),
            vec![PinCall::ConfigureOutput(5), PinCall::ConfigureInput(5)]
        );
        assert_eq!(d.pin_state(5).await.unwrap().mode, Some(PinMode::Input));
    }

    #[tokio::test]
    async fn test_set_mode_resets_recorded_level() {
        let control = RecordingPinControl::new();
        let d = dispatcher(&control);

        d.dispatch(&Command::SetMode {
            pin: 6,
            mode: Some(PinMode::Output),
        })
        .await
        .unwrap();
        d.dispatch(&Command::SetLevel {
            pin: 6,
            level: Some(PinLevel::High),
        })
        .await
        .unwrap();
        assert_eq!(d.pin_state(6).await.unwrap().level, Some(PinLevel::High));

        d.dispatch(&Command::SetMode {
            pin: 6,
            mode: Some(PinMode::Output),
        })
        .await
        .unwrap();
        assert_eq!(d.pin_state(6).await.unwrap().level, None);
    }

    #[tokio::test]
    async fn test_unspecified_level_keeps_state() {
        let control = RecordingPinControl::new();
        let d = dispatcher(&control);

        d.handle_payload(br#"{"Type":"GPIOSetMode","GPIO":2,"Mode":"Output"}"#)
            .await
            .unwrap();
        d.handle_payload(br#"{"Type":"GPIOLevel","GPIO":2,"Level":"Low"}"#)
            .await
            .unwrap();
        control.clear();

        let outcome = d
            .handle_payload(br#"{"Type":"GPIOLevel","GPIO":2,"Level":"Medium"}"#)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::LevelUnspecified { pin: 2 });
        assert_eq!(outcome.pin(), 2);
        assert!(!outcome.is_applied());
        assert!(control.calls().is_empty());
        assert_eq!(d.pin_state(2).await.unwrap().level, Some(PinLevel::Low));
    }

    #[tokio::test]
    async fn test_backend_failure_on_new_pin_leaves_no_entry() {
        let control = RecordingPinControl::new();
        let d = dispatcher(&control);

        control.fail_pin(8);
        let err = d
            .dispatch(&Command::SetMode {
                pin: 8,
                mode: Some(PinMode::Output),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::PinControl { pin: 8, .. }));
        assert_eq!(d.configured_pins().await, 0);
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_pin_control_error() {
        let control = RecordingPinControl::new();
        let d = Dispatcher::new(
            Arc::new(control.clone()),
            DispatchOptions::default().with_op_timeout(Duration::from_millis(20)),
        );
        control.set_delay(Some(Duration::from_millis(200)));

        let err = d
            .dispatch(&Command::SetMode {
                pin: 3,
                mode: Some(PinMode::Output),
            })
            .await
            .unwrap_err();
        match err {
            BridgeError::PinControl {
                pin: 3,
                source: PinControlError::Timeout { op, after_ms },
            } => {
                assert_eq!(op, "acquire");
                assert_eq!(after_ms, 20);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(d.configured_pins().await, 0);
    }

    #[tokio::test]
    async fn test_release_all_empties_registry() {
        let control = RecordingPinControl::new();
        let d = dispatcher(&control);
        for pin in [1, 2, 3] {
            d.dispatch(&Command::SetMode {
                pin,
                mode: Some(PinMode::Output),
            })
            .await
            .unwrap();
        }

        assert_eq!(d.release_all().await, 3);
        assert_eq!(d.configured_pins().await, 0);
        assert_eq!(control.count(PinCall::Release(2)), 1);
    }
}
