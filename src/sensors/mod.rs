//! Sensor-facing types consumed by the history log
//!
//! The drivers themselves live with the board support code. This module only
//! defines the reading handed to [`crate::LogEngine::process`] and the trait
//! the sampling task polls.

use core::fmt::Display;

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor}: {operation} failed")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
    },
    #[error("sensor not initialized")]
    NotInitialized,
}

/// One environmental reading, timestamped on the monotonic system clock.
///
/// A field is `None` when the sensor did not produce it, or when it was read
/// back from the log with that field disabled.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorSample {
    /// Milliseconds since boot
    pub timestamp_ms: u64,
    pub temperature_c: Option<f32>,
    pub humidity_rh: Option<f32>,
    pub pressure_pa: Option<f32>,
}

impl SensorSample {
    pub const fn new(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            temperature_c: None,
            humidity_rh: None,
            pressure_pa: None,
        }
    }

    pub const fn with_temperature(mut self, celsius: f32) -> Self {
        self.temperature_c = Some(celsius);
        self
    }

    pub const fn with_humidity(mut self, percent_rh: f32) -> Self {
        self.humidity_rh = Some(percent_rh);
        self
    }

    pub const fn with_pressure(mut self, pascal: f32) -> Self {
        self.pressure_pa = Some(pascal);
        self
    }
}

impl Display for SensorSample {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[SensorSample] timestamp_ms: {}", self.timestamp_ms)?;
        if let Some(t) = self.temperature_c {
            write!(f, ", temperature: {:.2}°C", t)?;
        }
        if let Some(h) = self.humidity_rh {
            write!(f, ", humidity: {:.2}%", h)?;
        }
        if let Some(p) = self.pressure_pa {
            write!(f, ", pressure: {:.0} Pa", p)?;
        }
        Ok(())
    }
}

/// A sensor (or group of sensors) that can produce a full environmental reading.
pub trait EnvironmentalSensor {
    /// Take a reading stamped with the current system time.
    fn sample(&mut self) -> impl Future<Output = Result<SensorSample, SensorError>>;
}
