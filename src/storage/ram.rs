//! RAM-backed [`RecordStore`] used by the simulator and the tests.
//!
//! Behaves like the flash record store on the beacon: deleted records keep
//! occupying space until garbage collection runs, every write leaves the store
//! busy for a configurable number of polls, and faults can be injected per
//! record. Every operation is appended to an operation log.

use core::cell::Cell;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use super::flash::RecordStore;
use crate::error::LogError;

/// One call made into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    Store { file: u8, record: u16 },
    Load { file: u8, record: u16 },
    Free { file: u8, record: u16 },
    Gc,
}

#[derive(Debug, Clone, Copy)]
enum FaultTarget {
    Store(u16),
    Load(u16),
    Gc,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    target: FaultTarget,
    error: LogError,
    /// `None` keeps failing until cleared.
    remaining: Option<u32>,
}

pub struct RamRecordStore {
    records: BTreeMap<(u8, u16), Vec<u8>>,
    capacity: usize,
    dead_bytes: usize,
    max_record_len: usize,
    busy_polls: u32,
    busy_left: Cell<u32>,
    polls_while_busy: Cell<u32>,
    initialized: bool,
    faults: Vec<Fault>,
    ops: Vec<FlashOp>,
}

impl RamRecordStore {
    /// A store of `capacity` bytes accepting records up to `max_record_len` bytes.
    pub fn new(capacity: usize, max_record_len: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            capacity,
            dead_bytes: 0,
            max_record_len,
            busy_polls: 0,
            busy_left: Cell::new(0),
            polls_while_busy: Cell::new(0),
            initialized: true,
            faults: Vec::new(),
            ops: Vec::new(),
        }
    }

    /// A store whose peripheral was never brought up: every call fails with `InvalidState`.
    pub fn uninitialized() -> Self {
        let mut store = Self::new(0, 0);
        store.initialized = false;
        store
    }

    /// Stay busy for `polls` calls to [`RecordStore::is_busy`] after each write, free or GC.
    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    /// Fail the next `times` stores to `record`, or every store when `times` is `None`.
    pub fn fail_store(&mut self, record: u16, error: LogError, times: Option<u32>) {
        self.faults.push(Fault {
            target: FaultTarget::Store(record),
            error,
            remaining: times,
        });
    }

    /// Fail loads of `record` until cleared.
    pub fn fail_load(&mut self, record: u16, error: LogError) {
        self.faults.push(Fault {
            target: FaultTarget::Load(record),
            error,
            remaining: None,
        });
    }

    /// Fail the next `times` garbage collections, or every one when `times` is `None`.
    pub fn fail_gc(&mut self, error: LogError, times: Option<u32>) {
        self.faults.push(Fault {
            target: FaultTarget::Gc,
            error,
            remaining: times,
        });
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    pub fn ops(&self) -> &[FlashOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Number of `is_busy` polls that found the store busy.
    pub fn busy_polls_observed(&self) -> u32 {
        self.polls_while_busy.get()
    }

    pub fn contains(&self, file: u8, record: u16) -> bool {
        self.records.contains_key(&(file, record))
    }

    pub fn record(&self, file: u8, record: u16) -> Option<&[u8]> {
        self.records.get(&(file, record)).map(Vec::as_slice)
    }

    /// Bytes taken by live and deleted-but-not-collected records.
    pub fn used_bytes(&self) -> usize {
        self.live_bytes() + self.dead_bytes
    }

    fn live_bytes(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    fn check_ready(&self) -> Result<(), LogError> {
        if !self.initialized {
            return Err(LogError::InvalidState);
        }
        if self.busy_left.get() > 0 {
            return Err(LogError::Busy);
        }
        Ok(())
    }

    fn take_fault(&mut self, matches: impl Fn(FaultTarget) -> bool) -> Result<(), LogError> {
        let Some(pos) = self.faults.iter().position(|f| matches(f.target)) else {
            return Ok(());
        };

        let fault = &mut self.faults[pos];
        let error = fault.error;
        let exhausted = match &mut fault.remaining {
            Some(n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
            None => false,
        };
        if exhausted {
            self.faults.remove(pos);
        }
        Err(error)
    }

    fn start_operation(&self) {
        self.busy_left.set(self.busy_polls);
    }
}

impl RecordStore for RamRecordStore {
    fn store(&mut self, file: u8, record: u16, data: &[u8]) -> Result<(), LogError> {
        self.ops.push(FlashOp::Store { file, record });
        self.check_ready()?;
        self.take_fault(|t| matches!(t, FaultTarget::Store(r) if r == record))?;

        if data.len() > self.max_record_len {
            return Err(LogError::DataSize);
        }

        let replaced = self.records.get(&(file, record)).map_or(0, Vec::len);
        if self.used_bytes() + data.len() > self.capacity {
            return Err(LogError::NoMemory);
        }

        self.dead_bytes += replaced;
        self.records.insert((file, record), data.to_vec());
        self.start_operation();
        Ok(())
    }

    fn load(&mut self, file: u8, record: u16, buf: &mut [u8]) -> Result<usize, LogError> {
        self.ops.push(FlashOp::Load { file, record });
        self.check_ready()?;
        self.take_fault(|t| matches!(t, FaultTarget::Load(r) if r == record))?;

        let data = self.records.get(&(file, record)).ok_or(LogError::NotFound)?;
        if data.len() > buf.len() {
            return Err(LogError::DataSize);
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn free(&mut self, file: u8, record: u16) -> Result<(), LogError> {
        self.ops.push(FlashOp::Free { file, record });
        self.check_ready()?;

        let data = self.records.remove(&(file, record)).ok_or(LogError::NotFound)?;
        self.dead_bytes += data.len();
        self.start_operation();
        Ok(())
    }

    fn gc_run(&mut self) -> Result<(), LogError> {
        self.ops.push(FlashOp::Gc);
        self.check_ready()?;
        self.take_fault(|t| matches!(t, FaultTarget::Gc))?;

        self.dead_bytes = 0;
        self.start_operation();
        Ok(())
    }

    fn is_busy(&self) -> bool {
        let left = self.busy_left.get();
        if left == 0 {
            return false;
        }
        self.busy_left.set(left - 1);
        self.polls_while_busy.set(self.polls_while_busy.get() + 1);
        true
    }
}
