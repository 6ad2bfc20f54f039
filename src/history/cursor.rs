//! Resumable read cursor over the flash slots and the live block.
//!
//! Pages are numbered from the caller's point of view:
//!
//! | `page_idx`      | page                          |
//! |-----------------|-------------------------------|
//! | `0`             | nothing loaded yet            |
//! | `1..=SLOTS`     | flash slot `page_idx - 1`     |
//! | `SLOTS + 1`     | copy of the live input block  |
//! | above that      | scan finished                 |
//!
//! Slots are scanned in address order, not rotation order, so after a
//! wraparound samples come back grouped per slot rather than strictly sorted.
//! Elements older than [`ReadState::oldest_element_ms`] are skipped.
//!
//! A cursor parked on the live page remembers which live block it was
//! reading. If that block is flushed before the cursor is resumed, the cursor
//! follows it into the slot it was stored in, then through every later flush,
//! and ends up back on the live page. Only when more than `SLOTS` blocks were
//! flushed in between are samples lost; the cursor then skips ahead to the
//! oldest flush still on flash.

use log::{debug, warn};

use super::LogEngine;
use crate::error::LogError;
use crate::sensors::SensorSample;
use crate::storage::flash::wait_idle;
use crate::storage::{LOG_FILE, RecordStore, data_record};

/// Caller-held position of one traversal of the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadState {
    /// Elements logged before this system time are skipped
    pub oldest_element_ms: u64,
    /// Next element of the current page
    pub element_idx: u16,
    /// Current page, see the module docs
    pub page_idx: u8,
    /// Live block being read, counted in flushes since init
    pub live_generation: u32,
    /// Reading flushed live blocks back from their slots
    pub following: bool,
}

impl ReadState {
    pub const fn new(oldest_element_ms: u64) -> Self {
        Self {
            oldest_element_ms,
            element_idx: 0,
            page_idx: 0,
            live_generation: 0,
            following: false,
        }
    }
}

impl<F, const SLOTS: usize, const MAX_SAMPLES: usize> LogEngine<F, SLOTS, MAX_SAMPLES>
where
    F: RecordStore,
{
    const LIVE_PAGE: u8 = (SLOTS + 1) as u8;

    /// Copy the next element at or after `state.oldest_element_ms` into `sample`.
    ///
    /// Call repeatedly with the same `state`; `NotFound` means the scan is
    /// finished and every further call returns `NotFound` too. Any other
    /// error leaves `state` as it was, so the call can simply be retried.
    pub async fn read(
        &mut self,
        sample: &mut SensorSample,
        state: &mut ReadState,
    ) -> Result<(), LogError> {
        self.ensure_initialized()?;

        let mut cursor = *state;
        if self.is_exhausted(&cursor) {
            return Err(LogError::NotFound);
        }

        if cursor.page_idx == 0 {
            cursor.page_idx = 1;
            cursor.element_idx = 0;
        }
        self.catch_up(&mut cursor);
        self.load_page(cursor.page_idx).await?;

        loop {
            if self.fast_forward(&mut cursor) {
                self.populate(sample, &mut cursor);
                *state = cursor;
                return Ok(());
            }

            self.next_page(&mut cursor);
            if self.is_exhausted(&cursor) {
                debug!("Log: read cursor exhausted");
                *state = cursor;
                return Err(LogError::NotFound);
            }
            self.load_page(cursor.page_idx).await?;
        }
    }

    /// `true` once `state` has visited every page.
    pub fn is_exhausted(&self, state: &ReadState) -> bool {
        state.page_idx > Self::LIVE_PAGE
    }

    fn next_page(&self, cursor: &mut ReadState) {
        cursor.element_idx = 0;
        if cursor.following {
            cursor.live_generation = cursor.live_generation.wrapping_add(1);
            self.follow(cursor);
            return;
        }

        cursor.page_idx += 1;
        if cursor.page_idx == Self::LIVE_PAGE {
            cursor.live_generation = self.live_generation;
        }
    }

    /// Re-aim a cursor whose live block was flushed since it last read.
    fn catch_up(&self, cursor: &mut ReadState) {
        let flushed =
            cursor.page_idx == Self::LIVE_PAGE && cursor.live_generation != self.live_generation;
        if flushed || cursor.following {
            self.follow(cursor);
        }
    }

    /// Point `cursor` at the page holding live block `cursor.live_generation`:
    /// the slot it was flushed to, or the live page if it is the current one.
    fn follow(&self, cursor: &mut ReadState) {
        let behind = self.live_generation.wrapping_sub(cursor.live_generation);
        if behind == 0 {
            cursor.page_idx = Self::LIVE_PAGE;
            cursor.following = false;
            return;
        }

        if behind > SLOTS as u32 {
            warn!(
                "Log: read cursor fell {} blocks behind, skipping to the oldest kept one",
                behind
            );
            cursor.live_generation = self.live_generation.wrapping_sub(SLOTS as u32);
            cursor.element_idx = 0;
        }

        let slot = self.flushed_slots[cursor.live_generation as usize % SLOTS];
        cursor.page_idx = slot + 1;
        cursor.following = true;
    }

    /// Make sure the output block holds `page`, loading it if another page
    /// (or an outdated copy) is cached.
    async fn load_page(&mut self, page: u8) -> Result<(), LogError> {
        if self.output_page == Some(page) {
            return Ok(());
        }

        if page == Self::LIVE_PAGE {
            self.output.clone_from(&self.input);
            debug!("Log: read cursor on live block, {} samples", self.output.len());
        } else {
            self.load_slot(usize::from(page) - 1).await?;
        }
        self.output_page = Some(page);
        Ok(())
    }

    /// Decode a flash slot into the output block. An empty or unreadable slot
    /// reads as an empty page.
    async fn load_slot(&mut self, slot: usize) -> Result<(), LogError> {
        wait_idle(&self.flash).await;
        let loaded = self
            .flash
            .load(LOG_FILE, data_record(slot), &mut self.record_buf)
            .and_then(|len| self.output.decode_from(&self.record_buf[..len]));

        match loaded {
            Ok(()) => debug!(
                "Log: read cursor on slot {}, {} samples",
                slot,
                self.output.len()
            ),
            Err(LogError::NotFound) => self.output.clear(),
            Err(LogError::DataSize) => {
                warn!("Log: slot {} unreadable, skipping it", slot);
                self.output.clear();
            }
            Err(e) => {
                // The output block was not touched; whatever it held is still valid.
                return Err(e);
            }
        }
        Ok(())
    }

    /// Skip elements older than the cursor's window. `false` when the page
    /// ran out first.
    fn fast_forward(&self, cursor: &mut ReadState) -> bool {
        let elements = self.output.elements();
        while let Some(element) = elements.get(usize::from(cursor.element_idx)) {
            if element.timestamp_ms() >= cursor.oldest_element_ms {
                return true;
            }
            cursor.element_idx += 1;
        }
        false
    }

    fn populate(&self, sample: &mut SensorSample, cursor: &mut ReadState) {
        if let Some(element) = self.output.get(usize::from(cursor.element_idx)) {
            element.fill_sample(sample);
            cursor.element_idx += 1;
        }
    }

    /// The live block changed; a cached copy of it is stale.
    pub(super) fn forget_live_page(&mut self) {
        if self.output_page == Some(Self::LIVE_PAGE) {
            self.output_page = None;
        }
    }

    /// `slot` is about to be rewritten; a cached copy of it is stale.
    pub(super) fn forget_slot_page(&mut self, slot: usize) {
        if self.output_page.map(usize::from) == Some(slot + 1) {
            self.output_page = None;
        }
    }
}
