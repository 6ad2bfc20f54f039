//! Writing sealed blocks into the slot rotation, purging it, and finding where
//! the rotation left off after a reset.

use log::{error, info, warn};

use super::LogEngine;
use crate::error::LogError;
use crate::storage::flash::wait_idle;
use crate::storage::{LOG_FILE, LogBlock, RecordStore, data_record};

impl<F, const SLOTS: usize, const MAX_SAMPLES: usize> LogEngine<F, SLOTS, MAX_SAMPLES>
where
    F: RecordStore,
{
    /// Store the sealed input block into the next slot that accepts it and
    /// return that slot.
    ///
    /// Starting at the rotation cursor every slot is tried once. The cursor
    /// then points just past the slot actually written. When no slot accepts
    /// the block the error of the last attempt is returned and the cursor does
    /// not move. A `Fatal` flash error stops the search immediately.
    ///
    /// Each attempt blocks for a free, a garbage collection and a store.
    pub(super) async fn store_block(&mut self) -> Result<u8, LogError> {
        let len = self.input.encode_into(&mut self.record_buf)?;
        let mut last_error = LogError::NoMemory;

        for attempt in 0..SLOTS {
            let slot = (usize::from(self.rotation) + attempt) % SLOTS;

            match self.store_to_slot(slot, len).await {
                Ok(()) => {
                    self.rotation = ((slot + 1) % SLOTS) as u8;
                    info!(
                        "Log: block {}..{} s ({} samples) stored to slot {}",
                        self.input.start_timestamp_s,
                        self.input.end_timestamp_s,
                        self.input.len(),
                        slot
                    );
                    return Ok(slot as u8);
                }
                Err(LogError::Fatal) => {
                    error!("Log: flash failed fatally while storing to slot {}", slot);
                    return Err(LogError::Fatal);
                }
                Err(e) => {
                    warn!("Log: storing to slot {} failed: {:?}", slot, e);
                    last_error = e;
                }
            }
        }

        error!(
            "Log: no slot accepted the block after {} attempts, last error {:?}",
            SLOTS, last_error
        );
        Err(last_error)
    }

    /// Free `slot`, compact flash and write the encoded block into it.
    ///
    /// Errors from freeing or compacting are accumulated but only decide the
    /// attempt when they are `Fatal`; the store result decides otherwise.
    async fn store_to_slot(&mut self, slot: usize, len: usize) -> Result<(), LogError> {
        if !self.config.overflow && self.slot_used[slot] {
            return Err(LogError::NoMemory);
        }

        let record = data_record(slot);
        self.forget_slot_page(slot);

        let freed = LogError::mask_not_found(self.flash.free(LOG_FILE, record));
        if freed.is_ok() {
            self.slot_used[slot] = false;
        }
        wait_idle(&self.flash).await;

        let prepared = LogError::merge(freed, self.flash.gc_run());
        wait_idle(&self.flash).await;

        let stored = self.flash.store(LOG_FILE, record, &self.record_buf[..len]);
        wait_idle(&self.flash).await;
        if stored.is_ok() {
            self.slot_used[slot] = true;
        }

        match (prepared, stored) {
            (Err(LogError::Fatal), _) => Err(LogError::Fatal),
            (_, Err(e)) => Err(e),
            (Err(e), Ok(())) => {
                warn!("Log: slot {} written despite {:?} while preparing it", slot, e);
                Ok(())
            }
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    /// Erase every history slot and compact flash.
    ///
    /// Failures are logged and skipped; a slot that could not be freed keeps
    /// its block. The RAM input block is left alone.
    pub async fn purge(&mut self) {
        for slot in 0..SLOTS {
            match self.flash.free(LOG_FILE, data_record(slot)) {
                Ok(()) | Err(LogError::NotFound) => self.slot_used[slot] = false,
                Err(e) => warn!("Log: purging slot {} failed: {:?}", slot, e),
            }
            wait_idle(&self.flash).await;
        }

        if let Err(e) = self.flash.gc_run() {
            warn!("Log: garbage collection after purge failed: {:?}", e);
        }
        wait_idle(&self.flash).await;

        self.rotation = 0;
        self.output.clear();
        self.output_page = None;
        info!("Log: purged {} slots", SLOTS);
    }

    /// Rebuild slot occupancy and point the rotation cursor at the slot to
    /// overwrite next: the first empty one, else the one sealed earliest.
    ///
    /// Seal times restart with every boot, so blocks are ordered by the boot
    /// they were sealed in first and by their end timestamp second.
    pub(super) async fn recover_rotation(&mut self) -> Result<(), LogError> {
        let mut first_free = None;
        let mut oldest: Option<(usize, (u16, u32))> = None;

        for slot in 0..SLOTS {
            wait_idle(&self.flash).await;
            let sealed = match self.flash.load(LOG_FILE, data_record(slot), &mut self.record_buf) {
                Ok(len) => LogBlock::<MAX_SAMPLES>::peek_seal(&self.record_buf[..len])
                    .unwrap_or((0, 0)),
                // Written with another block geometry; overwrite it first.
                Err(LogError::DataSize) => (0, 0),
                Err(LogError::NotFound) => {
                    self.slot_used[slot] = false;
                    if first_free.is_none() {
                        first_free = Some(slot);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.slot_used[slot] = true;
            if oldest.is_none_or(|(_, oldest_seal)| sealed < oldest_seal) {
                oldest = Some((slot, sealed));
            }
        }

        let slot = first_free.or(oldest.map(|(slot, _)| slot)).unwrap_or(0);
        self.rotation = slot as u8;
        Ok(())
    }
}
