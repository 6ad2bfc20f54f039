//! Persistent sensor history for battery-powered beacons
//!
//! Samples are buffered in a RAM block, sealed blocks are written into a fixed
//! rotation of flash records, and a caller-held cursor reads the whole history
//! (flash blocks plus the live RAM block) back out one sample at a time.
//!
//! The crate is `#![no_std]` with `extern crate alloc` so it compiles on the
//! beacon itself and on desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod app_state;
pub mod config;
pub mod error;
pub mod history;
pub mod sensors;
pub mod storage;

pub use config::{LogConfig, LogFields};
pub use error::LogError;
pub use history::{LogEngine, ReadState};
pub use sensors::SensorSample;
