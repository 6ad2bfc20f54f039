//! Logging configuration and its compile-time defaults

use serde::{Deserialize, Serialize};

use crate::error::LogError;

/// Default interval between logged samples, in seconds.
#[cfg(feature = "profile-debug")]
pub const DEFAULT_INTERVAL_S: u16 = 1;
/// Default interval between logged samples, in seconds.
#[cfg(all(feature = "profile-longlife", not(feature = "profile-debug")))]
pub const DEFAULT_INTERVAL_S: u16 = 15 * 60;
/// Default interval between logged samples, in seconds.
#[cfg(not(any(feature = "profile-longlife", feature = "profile-debug")))]
pub const DEFAULT_INTERVAL_S: u16 = 5 * 60;

/// Overwrite the oldest block when every slot is in use.
pub const DEFAULT_OVERFLOW: bool = true;

/// Bytes reserved for the encoded configuration record.
pub const CONFIG_RECORD_LEN: usize = 8;

/// Set of sample fields written into the log.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogFields(u8);

impl LogFields {
    pub const NONE: Self = Self(0);
    pub const TEMPERATURE: Self = Self(1 << 0);
    pub const HUMIDITY: Self = Self(1 << 1);
    pub const PRESSURE: Self = Self(1 << 2);
    pub const ALL: Self = Self(Self::TEMPERATURE.0 | Self::HUMIDITY.0 | Self::PRESSURE.0);

    /// Build a set from raw bits, ignoring unknown ones.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

/// Logging configuration, persisted in its own flash record.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogConfig {
    /// Minimum time between two logged samples, in seconds.
    pub interval_s: u16,
    /// `true` drops the oldest block when the log is full,
    /// `false` keeps it and rejects new blocks with [`LogError::NoMemory`].
    pub overflow: bool,
    /// Fields to log.
    pub fields: LogFields,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            interval_s: DEFAULT_INTERVAL_S,
            overflow: DEFAULT_OVERFLOW,
            fields: LogFields::ALL,
        }
    }
}

impl LogConfig {
    pub fn interval_ms(&self) -> u64 {
        u64::from(self.interval_s) * 1000
    }

    pub(crate) fn encode(&self, buf: &mut [u8; CONFIG_RECORD_LEN]) -> Result<usize, LogError> {
        postcard::to_slice(self, buf)
            .map(|used| used.len())
            .map_err(|_| LogError::DataSize)
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, LogError> {
        let config: LogConfig = postcard::from_bytes(bytes).map_err(|_| LogError::DataSize)?;
        // Unknown field bits come from a newer layout; treat it as unreadable.
        if LogFields::from_bits_truncate(config.fields.bits()) != config.fields {
            return Err(LogError::DataSize);
        }
        Ok(config)
    }
}
