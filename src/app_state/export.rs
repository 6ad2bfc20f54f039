//! Sending logged history to a remote.
//!
//! The remote asks for everything logged since some wall-clock time and tells
//! the beacon the current wall-clock time. The beacon only has its monotonic
//! system clock, so the request is mapped onto it and every sample sent back is
//! shifted into wall-clock time.

use crate::error::LogError;
use crate::sensors::SensorSample;

/// A remote's history request, mapped onto the system clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportWindow {
    /// First system time to send, in ms since boot
    pub oldest_element_ms: u64,
    /// Wall-clock ms minus system ms
    pub offset_ms: i64,
}

impl ExportWindow {
    /// Map a request for everything since `start_time_s` onto the system clock.
    ///
    /// `current_time_s` and `start_time_s` are wall-clock seconds from the
    /// remote, `system_time_ms` is the beacon's clock when the request came in.
    /// A window reaching back before boot starts at the first logged sample.
    pub fn from_remote(
        current_time_s: u64,
        start_time_s: u64,
        system_time_ms: u64,
    ) -> Result<Self, LogError> {
        if start_time_s >= current_time_s {
            return Err(LogError::InvalidParam);
        }

        let window_ms = (current_time_s - start_time_s).saturating_mul(1000);
        let system_time_s = system_time_ms / 1000;
        let offset_s = i64::try_from(current_time_s)
            .ok()
            .zip(i64::try_from(system_time_s).ok())
            .map(|(current, system)| current - system)
            .ok_or(LogError::InvalidParam)?;

        Ok(Self {
            oldest_element_ms: system_time_ms.saturating_sub(window_ms),
            offset_ms: offset_s.saturating_mul(1000),
        })
    }

    /// Convert a system timestamp into wall-clock ms, clamped at the epoch.
    pub fn to_real_time_ms(&self, system_ms: u64) -> u64 {
        let system_ms = i64::try_from(system_ms).unwrap_or(i64::MAX);
        u64::try_from(system_ms.saturating_add(self.offset_ms)).unwrap_or(0)
    }
}

/// Destination of an export, typically the wireless link.
pub trait ExportSink {
    /// Send one sample. Its timestamp is already in wall-clock ms.
    fn send(&mut self, sample: &SensorSample) -> impl Future<Output = Result<(), LogError>>;

    /// Every requested sample has been sent.
    fn finish(&mut self, sent: usize) -> impl Future<Output = Result<(), LogError>>;
}
