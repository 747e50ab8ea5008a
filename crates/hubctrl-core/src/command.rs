//! Command decoding.
//!
//! Inbound payloads are small JSON envelopes:
//!
//! ```json
//! {"Type": "GPIOSetMode", "GPIO": 17, "Mode": "Output"}
//! {"Type": "GPIOLevel",   "GPIO": 17, "Level": "Low"}
//! ```
//!
//! String fields are mapped onto closed enums here, at the boundary, so the
//! dispatcher never compares raw strings. Unknown extra fields are ignored and
//! missing fields take their zero value (empty string, pin 0).

use crate::pin::{PinLevel, PinMode};
use serde::de::{Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire value of `Type` for a direction change.
pub const TYPE_SET_MODE: &str = "GPIOSetMode";
/// Wire value of `Type` for a level change.
pub const TYPE_SET_LEVEL: &str = "GPIOLevel";

/// Payload could not be decoded into a command.
#[derive(Debug, thiserror::Error)]
#[error("Invalid command payload: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Command kinds carried in the `Type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    SetMode,
    SetLevel,
    Unknown,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetMode => write!(f, "{}", TYPE_SET_MODE),
            Self::SetLevel => write!(f, "{}", TYPE_SET_LEVEL),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A decoded command.
///
/// `None` for `mode`/`level` means the wire value was not one of the
/// recognized strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetMode { pin: u32, mode: Option<PinMode> },
    SetLevel { pin: u32, level: Option<PinLevel> },
    Unknown { kind: String },
}

/// Raw wire shape.
///
/// Field names match case-insensitively and a repeated field keeps its last
/// value. A `null` value leaves the field at its zero value.
#[derive(Debug, Default)]
struct Envelope {
    kind: String,
    gpio: u32,
    mode: String,
    level: String,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Type,
    Gpio,
    Mode,
    Level,
}

impl Field {
    const NAMES: [(&'static str, Field); 4] = [
        ("Type", Field::Type),
        ("GPIO", Field::Gpio),
        ("Mode", Field::Mode),
        ("Level", Field::Level),
    ];

    fn from_key(key: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, field)| *field)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(EnvelopeVisitor)
    }
}

struct EnvelopeVisitor;

impl<'de> Visitor<'de> for EnvelopeVisitor {
    type Value = Envelope;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a command object")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Envelope, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut envelope = Envelope::default();
        while let Some(key) = map.next_key::<String>()? {
            match Field::from_key(&key) {
                Some(Field::Type) => {
                    if let Some(kind) = map.next_value::<Option<String>>()? {
                        envelope.kind = kind;
                    }
                }
                Some(Field::Gpio) => {
                    if let Some(gpio) = map.next_value::<Option<u32>>()? {
                        envelope.gpio = gpio;
                    }
                }
                Some(Field::Mode) => {
                    if let Some(mode) = map.next_value::<Option<String>>()? {
                        envelope.mode = mode;
                    }
                }
                Some(Field::Level) => {
                    if let Some(level) = map.next_value::<Option<String>>()? {
                        envelope.level = level;
                    }
                }
                None => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(envelope)
    }
}

fn parse_mode(raw: &str) -> Option<PinMode> {
    match raw {
        "Output" => Some(PinMode::Output),
        "Input" => Some(PinMode::Input),
        _ => None,
    }
}

fn parse_level(raw: &str) -> Option<PinLevel> {
    match raw {
        "High" => Some(PinLevel::High),
        "Low" => Some(PinLevel::Low),
        _ => None,
    }
}

impl Command {
    /// Decode a raw payload.
    ///
    /// Pure: never touches pin state.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_slice(payload)?;
        Ok(match envelope.kind.as_str() {
            TYPE_SET_MODE => Self::SetMode {
                pin: envelope.gpio,
                mode: parse_mode(&envelope.mode),
            },
            TYPE_SET_LEVEL => Self::SetLevel {
                pin: envelope.gpio,
                level: parse_level(&envelope.level),
            },
            _ => Self::Unknown {
                kind: envelope.kind,
            },
        })
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::SetMode { .. } => CommandKind::SetMode,
            Self::SetLevel { .. } => CommandKind::SetLevel,
            Self::Unknown { .. } => CommandKind::Unknown,
        }
    }

    /// Target pin, if the command addresses one.
    pub fn pin(&self) -> Option<u32> {
        match self {
            Self::SetMode { pin, .. } | Self::SetLevel { pin, .. } => Some(*pin),
            Self::Unknown { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_set_mode() {
        let cmd = Command::decode(br#"{"Type":"GPIOSetMode","GPIO":17,"Mode":"Output"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::SetMode {
                pin: 17,
                mode: Some(PinMode::Output)
            }
        );
        assert_eq!(cmd.kind(), CommandKind::SetMode);
        assert_eq!(cmd.pin(), Some(17));
    }

    #[test]
    fn test_decode_set_level() {
        let cmd = Command::decode(br#"{"Type":"GPIOLevel","GPIO":17,"Level":"Low"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::SetLevel {
                pin: 17,
                level: Some(PinLevel::Low)
            }
        );
    }

    #[test]
    fn test_unrecognized_values_are_unspecified() {
        let cmd = Command::decode(br#"{"Type":"GPIOSetMode","GPIO":3,"Mode":"output"}"#).unwrap();
        assert_eq!(cmd, Command::SetMode { pin: 3, mode: None });

        let cmd = Command::decode(br#"{"Type":"GPIOLevel","GPIO":3,"Level":"1"}"#).unwrap();
        assert_eq!(cmd, Command::SetLevel { pin: 3, level: None });
    }

    #[test]
    fn test_missing_fields_take_zero_values() {
        let cmd = Command::decode(br#"{"Type":"GPIOLevel"}"#).unwrap();
        assert_eq!(cmd, Command::SetLevel { pin: 0, level: None });

        let cmd = Command::decode(b"{}").unwrap();
        assert_eq!(
            cmd,
            Command::Unknown {
                kind: String::new()
            }
        );
        assert_eq!(cmd.pin(), None);
    }

    #[test]
    fn test_unknown_type_and_extra_fields() {
        let cmd =
            Command::decode(br#"{"Type":"GPIOToggle","GPIO":5,"Extra":[1,2,3]}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Unknown {
                kind: "GPIOToggle".to_string()
            }
        );
        assert_eq!(cmd.kind(), CommandKind::Unknown);
    }

    #[test]
    fn test_lowercase_field_names() {
        let cmd = Command::decode(br#"{"type":"GPIOSetMode","gpio":22,"mode":"Input"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::SetMode {
                pin: 22,
                mode: Some(PinMode::Input)
            }
        );
    }

    #[test]
    fn test_field_names_ignore_case() {
        let cmd = Command::decode(br#"{"TYPE":"GPIOSetMode","gPiO":17,"MODE":"Output"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::SetMode {
                pin: 17,
                mode: Some(PinMode::Output)
            }
        );

        let cmd = Command::decode(br#"{"tYpE":"GPIOLevel","Gpio":17,"LEVEL":"High"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::SetLevel {
                pin: 17,
                level: Some(PinLevel::High)
            }
        );
    }

    #[test]
    fn test_repeated_field_keeps_last_value() {
        let cmd = Command::decode(
            br#"{"Type":"GPIOLevel","type":"GPIOSetMode","GPIO":1,"gpio":2,"Mode":"Input"}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::SetMode {
                pin: 2,
                mode: Some(PinMode::Input)
            }
        );
    }

    #[test]
    fn test_null_field_keeps_zero_value() {
        let cmd = Command::decode(br#"{"Type":"GPIOLevel","GPIO":null,"Level":null}"#).unwrap();
        assert_eq!(cmd, Command::SetLevel { pin: 0, level: None });
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(Command::decode(b"not json").is_err());
        assert!(Command::decode(b"").is_err());
        assert!(Command::decode(b"[1,2]").is_err());
        assert!(Command::decode(br#"{"Type":"GPIOLevel","GPIO":-1}"#).is_err());
        assert!(Command::decode(br#"{"Type":"GPIOLevel","GPIO":"17"}"#).is_err());
        assert!(Command::decode(br#"{"Type":42}"#).is_err());
    }

    #[test]
    fn test_decode_is_repeatable() {
        let payload = br#"{"Type":"GPIOLevel","GPIO":4,"Level":"High"}"#;
        assert_eq!(
            Command::decode(payload).unwrap(),
            Command::decode(payload).unwrap()
        );
    }
}
