//! Pin registry.
//!
//! Maps pin numbers to the handle acquired for that pin plus the last mode and
//! level set through it. Entries are created on the first SetMode for a pin and
//! are only removed when the whole registry is torn down.

use crate::pin::{PinHandle, PinLevel, PinMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Registry record for one pin.
pub struct PinEntry {
    handle: Box<dyn PinHandle>,
    /// Last mode set; `None` if the last SetMode carried an unrecognized mode.
    pub mode: Option<PinMode>,
    /// Last level set; `None` until a SetLevel has been applied.
    pub level: Option<PinLevel>,
}

impl PinEntry {
    pub fn new(handle: Box<dyn PinHandle>) -> Self {
        Self {
            handle,
            mode: None,
            level: None,
        }
    }

    pub fn handle_mut(&mut self) -> &mut dyn PinHandle {
        self.handle.as_mut()
    }

    pub fn into_handle(self) -> Box<dyn PinHandle> {
        self.handle
    }
}

impl std::fmt::Debug for PinEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinEntry")
            .field("pin", &self.handle.pin())
            .field("mode", &self.mode)
            .field("level", &self.level)
            .finish()
    }
}

/// Read-only view of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinState {
    pub pin: u32,
    pub mode: Option<PinMode>,
    pub level: Option<PinLevel>,
}

/// Pin number to entry mapping.
#[derive(Debug, Default)]
pub struct PinRegistry {
    entries: HashMap<u32, PinEntry>,
}

impl PinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_mut(&mut self, pin: u32) -> Option<&mut PinEntry> {
        self.entries.get_mut(&pin)
    }

    /// Store an entry, returning the previous one for the same pin.
    pub fn insert(&mut self, pin: u32, entry: PinEntry) -> Option<PinEntry> {
        self.entries.insert(pin, entry)
    }

    pub fn state(&self, pin: u32) -> Option<PinState> {
        self.entries.get(&pin).map(|entry| PinState {
            pin,
            mode: entry.mode,
            level: entry.level,
        })
    }

    /// States of every entry, ordered by pin number.
    pub fn states(&self) -> Vec<PinState> {
        let mut states: Vec<PinState> = self
            .entries
            .iter()
            .map(|(pin, entry)| PinState {
                pin: *pin,
                mode: entry.mode,
                level: entry.level,
            })
            .collect();
        states.sort_by_key(|s| s.pin);
        states
    }

    /// Remove every entry, handing back the handles for release.
    pub fn drain(&mut self) -> Vec<(u32, PinEntry)> {
        let mut entries: Vec<(u32, PinEntry)> = self.entries.drain().collect();
        entries.sort_by_key(|(pin, _)| *pin);
        entries
    }
}
