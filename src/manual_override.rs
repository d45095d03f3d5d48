//! Manual override of a single device.
//!
//! Two channels, consulted per tick:
//!
//! 1. An override file whose first line (whitespace trimmed) is one of:
//!
//!    | word          | meaning                                            |
//!    |---------------|----------------------------------------------------|
//!    | `on` / `off`  | hold the device on / off                           |
//!    | `auto`        | normal automatic control                           |
//!    | `remote/off`  | follow the device's arbitrated request, else `off` |
//!    | `remote/auto` | follow the device's arbitrated request, else `auto`|
//!
//!    No file means `auto`.  An unreadable file or an unknown word means
//!    `off`.
//!
//! 2. The device's requested value in its lock record.  `"None"` means no
//!    override; `ON`/`OFF`/`AUTO` (any case) are honoured; anything else is
//!    warned about and ignored.
//!
//! An override suspends automatic control of that one device only.

use core::fmt;
use core::str::FromStr;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use log::{debug, error, warn};

use crate::app::ports::PersistencePort;
use crate::arbitrator::{Arbitrator, DeviceKey, DeviceLockRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideMode {
    On,
    Off,
    Auto,
}

impl OverrideMode {
    /// Case-insensitive parse of `on`, `off` or `auto`.
    pub fn parse_word(word: &str) -> Option<Self> {
        let w = word.trim();
        if w.eq_ignore_ascii_case("on") {
            Some(Self::On)
        } else if w.eq_ignore_ascii_case("off") {
            Some(Self::Off)
        } else if w.eq_ignore_ascii_case("auto") {
            Some(Self::Auto)
        } else {
            None
        }
    }
}

impl fmt::Display for OverrideMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Auto => "auto",
        })
    }
}

/// Parsed content of an override file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideSetting {
    Fixed(OverrideMode),
    /// Take the device's arbitrated request, falling back to `fallback`.
    Remote { fallback: OverrideMode },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOverride(pub String);

impl FromStr for OverrideSetting {
    type Err = UnknownOverride;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Self::Fixed(OverrideMode::On)),
            "off" => Ok(Self::Fixed(OverrideMode::Off)),
            "auto" => Ok(Self::Fixed(OverrideMode::Auto)),
            "remote/off" => Ok(Self::Remote {
                fallback: OverrideMode::Off,
            }),
            "remote/auto" => Ok(Self::Remote {
                fallback: OverrideMode::Auto,
            }),
            other => Err(UnknownOverride(other.to_owned())),
        }
    }
}

/// Read the override file at `path`.
pub fn read_override_file(path: &Path) -> OverrideSetting {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return OverrideSetting::Fixed(OverrideMode::Auto);
        }
        Err(e) => {
            error!(
                "Found manual override file {} but could not read its value ({}). Defaulting to 'off'.",
                path.display(),
                e
            );
            return OverrideSetting::Fixed(OverrideMode::Off);
        }
    };

    let first = text.lines().next().unwrap_or("").trim();
    debug!("Found manual override file {}: {:?}", path.display(), first);
    first.parse().unwrap_or_else(|UnknownOverride(word)| {
        error!(
            "Override file {} holds unrecognised value {:?}. Defaulting to 'off'.",
            path.display(),
            word
        );
        OverrideSetting::Fixed(OverrideMode::Off)
    })
}

/// Override carried by a lock record's requested value.
///
/// `None` when there is no usable override and the device stays under
/// automatic control.
pub fn device_override(key: &DeviceKey, record: &DeviceLockRecord) -> Option<OverrideMode> {
    let requested = record.request()?;
    let mode = OverrideMode::parse_word(requested);
    if mode.is_none() {
        warn!(
            "{}: unrecognised override request {:?}, treating as automatic",
            key, requested
        );
    }
    mode
}

/// Settle an override setting to a concrete mode and announce holds.
///
/// `label` names the device in log lines.
pub fn resolve<P: PersistencePort>(
    setting: OverrideSetting,
    arbiter: &mut Arbitrator<P>,
    key: &DeviceKey,
    label: &str,
) -> OverrideMode {
    let mode = match setting {
        OverrideSetting::Fixed(mode) => mode,
        OverrideSetting::Remote { fallback } => match arbiter.device_state(key) {
            Ok(record) => device_override(key, &record).unwrap_or(fallback),
            Err(e) => {
                warn!("{}: remote override unavailable ({}), using '{}'", key, e, fallback);
                fallback
            }
        },
    };

    if mode != OverrideMode::Auto {
        warn!("{} is in manual override and will be held '{}'.", label, mode);
    }
    mode
}
