//! Interface to the flash record store the log is written into.
//!
//! The store is asynchronous at the hardware level: an operation returns as
//! soon as it has been queued and completion is only observable through
//! [`RecordStore::is_busy`]. The log sequences its operations by yielding
//! until the store is idle again.

use embassy_futures::yield_now;

use crate::error::LogError;

/// Record-oriented flash storage with wear-leveling handled underneath.
pub trait RecordStore {
    /// Write `data` as record `record` of `file`, replacing any previous copy.
    ///
    /// Fails with `Busy`, `NoMemory` or `DataSize`.
    fn store(&mut self, file: u8, record: u16, data: &[u8]) -> Result<(), LogError>;

    /// Copy record `record` of `file` into `buf`, returning its length.
    ///
    /// Fails with `NotFound` or `DataSize` when `buf` is too small.
    fn load(&mut self, file: u8, record: u16, buf: &mut [u8]) -> Result<usize, LogError>;

    /// Mark a record as deleted. Its space comes back on the next [`RecordStore::gc_run`].
    ///
    /// Fails with `NotFound`.
    fn free(&mut self, file: u8, record: u16) -> Result<(), LogError>;

    /// Compact flash, reclaiming the space of deleted records.
    fn gc_run(&mut self) -> Result<(), LogError>;

    /// `true` while a queued operation is still running.
    fn is_busy(&self) -> bool;
}

/// Yield to the executor until the store has finished its current operation.
///
/// There is no timeout: a store that never goes idle stalls the caller.
pub async fn wait_idle<F: RecordStore>(flash: &F) {
    while flash.is_busy() {
        yield_now().await;
    }
}
