//! Receive loop tying the bus payload stream to the dispatcher.
//!
//! ```text
//! bus client ──payload──▶ GpioBridge::process ──Command──▶ Dispatcher ──▶ PinControl
//! ```
//!
//! Every payload is handled independently: per-message errors are logged and
//! counted, never propagated.

use crate::config::DispatchOptions;
use crate::dispatcher::{Dispatcher, Outcome};
use crate::error::{BridgeError, Result};
use crate::pin::PinControl;
use crate::registry::PinState;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// Why [`GpioBridge::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown future completed.
    Shutdown,
    /// The payload stream ended.
    StreamEnded,
}

/// Message counters.
#[derive(Debug, Default)]
pub struct BridgeStats {
    received: AtomicU64,
    applied: AtomicU64,
    ignored: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    last_activity: AtomicI64,
}

/// Point-in-time copy of [`BridgeStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Payloads received.
    pub received: u64,
    /// Commands that issued a physical call.
    pub applied: u64,
    /// Commands accepted without a physical call (unrecognized mode or level).
    pub ignored: u64,
    /// Payloads dropped before reaching the pins (decode, unknown type,
    /// unconfigured pin, strict-mode rejection).
    pub rejected: u64,
    /// Commands dropped because the backend failed.
    pub failed: u64,
    /// Unix timestamp of the last payload, 0 if none.
    pub last_activity: i64,
}

impl BridgeStats {
    fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.last_activity
            .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    }

    fn record(&self, result: &Result<Outcome>) {
        let counter = match result {
            Ok(outcome) if outcome.is_applied() => &self.applied,
            Ok(_) => &self.ignored,
            Err(BridgeError::PinControl { .. } | BridgeError::Backend(_)) => &self.failed,
            Err(_) => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            last_activity: self.last_activity.load(Ordering::Relaxed),
        }
    }
}

/// Bridge between a payload stream and the pins.
pub struct GpioBridge {
    control: Arc<dyn PinControl>,
    dispatcher: Dispatcher,
    stats: BridgeStats,
}

impl GpioBridge {
    /// Open the pin-control capability and build the bridge.
    pub async fn open(control: Arc<dyn PinControl>, options: DispatchOptions) -> Result<Self> {
        control.open().await.map_err(BridgeError::Backend)?;
        info!(backend = control.name(), "GPIO backend opened");

        Ok(Self {
            dispatcher: Dispatcher::new(control.clone(), options),
            control,
            stats: BridgeStats::default(),
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn pin_states(&self) -> Vec<PinState> {
        self.dispatcher.snapshot().await
    }

    /// Handle one payload: decode, dispatch, log, count.
    pub async fn process(&self, payload: &[u8]) -> Result<Outcome> {
        self.stats.record_received();
        info!("Message received: {}", String::from_utf8_lossy(payload));

        let result = self.dispatcher.handle_payload(payload).await;
        self.stats.record(&result);

        match &result {
            Ok(outcome) => debug!(pin = outcome.pin(), ?outcome, "Command handled"),
            Err(BridgeError::UnknownCommandKind(kind)) => {
                warn!(kind = %kind, "Ignoring message with unknown type")
            }
            Err(e) if matches!(e, BridgeError::PinControl { .. }) => error!("{}", e),
            Err(e) => warn!("Dropping message: {}", e),
        }
        result
    }

    /// Consume payloads until the stream ends or `shutdown` completes.
    pub async fn run<S, F>(&self, payloads: S, shutdown: F) -> StopReason
    where
        S: Stream<Item = Vec<u8>>,
        F: Future<Output = ()>,
    {
        futures::pin_mut!(payloads);
        futures::pin_mut!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, leaving receive loop");
                    return StopReason::Shutdown;
                }
                next = payloads.next() => match next {
                    Some(payload) => {
                        let _ = self.process(&payload).await;
                    }
                    None => {
                        warn!("Message stream ended");
                        return StopReason::StreamEnded;
                    }
                },
            }
        }
    }

    /// Release every pin handle, then close the capability.
    pub async fn shutdown(self) -> Result<()> {
        let configured = self.dispatcher.configured_pins().await;
        let released = self.dispatcher.release_all().await;
        if released < configured {
            warn!(released, configured, "Some GPIO handles failed to release");
        }

        self.control.close().await.map_err(BridgeError::Backend)?;

        let stats = self.stats.snapshot();
        info!(
            released,
            received = stats.received,
            applied = stats.applied,
            rejected = stats.rejected,
            failed = stats.failed,
            "GPIO backend closed"
        );
        Ok(())
    }
}
