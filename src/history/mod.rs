//! Persistent sample history.
//!
//! [`LogEngine`] owns every piece of mutable log state: the configuration, the
//! live input block being filled, the output block the read cursor pages
//! through, and the rotation cursor over the flash slots. It is not re-entrant;
//! callers running in interrupt context go through [`crate::app_state`] to
//! defer into task context first.
//!
//! ## Flash layout
//!
//! - [`LOG_FILE`]/[`CONFIG_RECORD`]: the [`LogConfig`] in use
//! - [`LOG_FILE`]/[`crate::storage::BOOT_COUNT_RECORD`]: boot counter, `u32` LE
//! - [`LOG_FILE`]/[`crate::storage::data_record`]`(slot)`: one sealed block per slot

mod block_store;
mod boot;
mod cursor;

pub use cursor::ReadState;

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use log::{debug, error, info};

use crate::config::{CONFIG_RECORD_LEN, LogConfig};
use crate::error::LogError;
use crate::sensors::SensorSample;
use crate::storage::flash::wait_idle;
use crate::storage::{
    BLOCK_SAMPLES, CONFIG_RECORD, DATA_RECORDS, LOG_FILE, LogBlock, LogElement, RecordStore,
};

/// Block-rotating sample log over `SLOTS` flash records of `MAX_SAMPLES` samples each.
pub struct LogEngine<F, const SLOTS: usize = DATA_RECORDS, const MAX_SAMPLES: usize = BLOCK_SAMPLES>
{
    flash: F,
    config: LogConfig,
    /// Live block receiving samples
    input: Box<LogBlock<MAX_SAMPLES>>,
    /// The input block has its end timestamp set and is waiting to be stored
    input_sealed: bool,
    /// Page most recently loaded for reading
    output: Box<LogBlock<MAX_SAMPLES>>,
    /// `ReadState::page_idx` value of the page held by `output`
    output_page: Option<u8>,
    /// Encode/decode buffer for one data record
    record_buf: Vec<u8>,
    /// Which slots hold a block
    slot_used: Vec<bool>,
    /// Next slot to write
    rotation: u8,
    /// Number of input blocks flushed since init
    live_generation: u32,
    /// Slot each recent flush went to, indexed by generation modulo `SLOTS`
    flushed_slots: Vec<u8>,
    last_sample_ms: u64,
    boot_count: u32,
    initialized: bool,
}

impl<F, const SLOTS: usize, const MAX_SAMPLES: usize> LogEngine<F, SLOTS, MAX_SAMPLES>
where
    F: RecordStore,
{
    // Page numbers must fit a `u8` with room for the live page and the exhausted marker.
    const GEOMETRY_OK: () = assert!(
        SLOTS > 0 && SLOTS <= 253 && MAX_SAMPLES > 0 && MAX_SAMPLES <= u16::MAX as usize
    );

    /// Allocate the input and output blocks. Nothing touches flash until [`Self::init`].
    pub fn new(flash: F) -> Self {
        let () = Self::GEOMETRY_OK;
        let config = LogConfig::default();

        Self {
            flash,
            config,
            input: Box::new(LogBlock::new(config)),
            input_sealed: false,
            output: Box::new(LogBlock::new(config)),
            output_page: None,
            record_buf: vec![0u8; LogBlock::<MAX_SAMPLES>::ENCODED_LEN],
            slot_used: vec![false; SLOTS],
            rotation: 0,
            live_generation: 0,
            flushed_slots: vec![0; SLOTS],
            last_sample_ms: 0,
            boot_count: 0,
            initialized: false,
        }
    }

    /// Bring the log up.
    ///
    /// Loads the stored configuration. When there is none (first boot, or a
    /// record from an incompatible layout) every history slot is purged and
    /// the defaults are stored. Then the boot counter is incremented and the
    /// rotation cursor is recovered from the slots that survived.
    pub async fn init(&mut self) -> Result<(), LogError> {
        let config = match self.load_config().await {
            Ok(config) => {
                info!("Log: using stored configuration {:?}", config);
                self.recover_rotation().await?;
                config
            }
            Err(LogError::NotFound | LogError::DataSize) => {
                info!("Log: no usable stored configuration, purging history");
                self.purge().await;
                let config = LogConfig::default();
                self.store_config(&config).await?;
                config
            }
            Err(e) => {
                error!("Log: cannot read configuration: {:?}", e);
                return Err(e);
            }
        };

        self.config = config;
        self.boot_count = self.increment_boot_count().await?;
        self.input.reset(0, config);
        self.input_sealed = false;
        self.output.clear();
        self.output_page = None;
        self.live_generation = 0;
        self.last_sample_ms = 0;
        self.initialized = true;

        info!(
            "Log: initialized, boot {}, next slot {}, {} of {} slots in use",
            self.boot_count,
            self.rotation,
            self.stored_blocks(),
            SLOTS
        );
        Ok(())
    }

    /// Log a sample if at least one interval has passed since the last logged one.
    ///
    /// The very first sample after boot is always logged. When the input block
    /// fills up it is sealed and stored; if storing fails the full block stays
    /// in RAM and is retried on the next logged sample.
    pub async fn process(&mut self, sample: &SensorSample) -> Result<(), LogError> {
        self.ensure_initialized()?;

        let next_sample_ms = if self.last_sample_ms == 0 {
            0
        } else {
            self.last_sample_ms.saturating_add(self.config.interval_ms())
        };

        if sample.timestamp_ms < next_sample_ms {
            debug!(
                "Log: sample at {} ms skipped, next due at {} ms",
                sample.timestamp_ms, next_sample_ms
            );
            return Ok(());
        }

        self.last_sample_ms = sample.timestamp_ms;
        let now_s = seconds(sample.timestamp_ms);

        // Still holding a block that failed to store.
        if self.input.is_full() {
            self.flush_input(now_s).await?;
        }

        if self.input.is_empty() && self.input.start_timestamp_s == 0 {
            self.input.start_timestamp_s = now_s;
        }
        self.input
            .push(LogElement::from_sample(sample, self.config.fields))?;
        self.forget_live_page();
        debug!(
            "Log: sample {} of {} buffered at {} s",
            self.input.len(),
            MAX_SAMPLES,
            now_s
        );

        if self.input.is_full() {
            self.flush_input(now_s).await?;
        }

        Ok(())
    }

    pub fn config_get(&self) -> LogConfig {
        self.config
    }

    /// Adopt a new configuration.
    ///
    /// The current input block is stored first so no block ever mixes samples
    /// taken under two configurations. Nothing changes if that fails.
    pub async fn config_set(&mut self, config: LogConfig) -> Result<(), LogError> {
        self.ensure_initialized()?;

        if !self.input.is_empty() {
            self.flush_input(seconds(self.last_sample_ms)).await?;
        }

        self.store_config(&config).await?;
        self.config = config;
        self.input.config = config;
        self.forget_live_page();
        info!("Log: configuration set to {:?}", config);
        Ok(())
    }

    /// Erase the flash history and drop the samples buffered in RAM.
    ///
    /// The configuration and boot counter are kept. The next sample is logged
    /// unconditionally, as after a boot.
    pub async fn factory_reset(&mut self) -> Result<(), LogError> {
        self.ensure_initialized()?;
        self.purge().await;
        self.input.reset(0, self.config);
        self.input_sealed = false;
        self.last_sample_ms = 0;
        info!("Log: factory reset");
        Ok(())
    }

    pub fn boot_count(&self) -> u32 {
        self.boot_count
    }

    pub fn last_sample_ms(&self) -> u64 {
        self.last_sample_ms
    }

    /// The live block samples are currently buffered in.
    pub fn input_block(&self) -> &LogBlock<MAX_SAMPLES> {
        &self.input
    }

    /// Slot the next sealed block goes to.
    pub fn rotation_cursor(&self) -> u8 {
        self.rotation
    }

    /// Number of slots currently holding a block.
    pub fn stored_blocks(&self) -> usize {
        self.slot_used.iter().filter(|&&used| used).count()
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Tear the log down, handing back the record store.
    pub fn into_flash(self) -> F {
        self.flash
    }

    fn ensure_initialized(&self) -> Result<(), LogError> {
        if self.initialized {
            Ok(())
        } else {
            Err(LogError::InvalidState)
        }
    }

    /// Seal the input block (once) at `end_s`, store it and start a new one
    /// where it ended.
    async fn flush_input(&mut self, end_s: u32) -> Result<(), LogError> {
        if !self.input_sealed {
            self.input.end_timestamp_s = end_s;
            self.input.boot = self.boot_count as u16;
            self.input_sealed = true;
        }

        let slot = self.store_block().await?;
        self.flushed_slots[self.live_generation as usize % SLOTS] = slot;
        self.live_generation = self.live_generation.wrapping_add(1);

        let start = self.input.end_timestamp_s;
        self.input.reset(start, self.config);
        self.input_sealed = false;
        self.forget_live_page();
        Ok(())
    }

    async fn load_config(&mut self) -> Result<LogConfig, LogError> {
        let mut buf = [0u8; CONFIG_RECORD_LEN];
        wait_idle(&self.flash).await;
        let len = self.flash.load(LOG_FILE, CONFIG_RECORD, &mut buf)?;
        LogConfig::decode(&buf[..len])
    }

    async fn store_config(&mut self, config: &LogConfig) -> Result<(), LogError> {
        let mut buf = [0u8; CONFIG_RECORD_LEN];
        let len = config.encode(&mut buf)?;
        let result = self.flash.store(LOG_FILE, CONFIG_RECORD, &buf[..len]);
        wait_idle(&self.flash).await;
        result
    }
}

fn seconds(ms: u64) -> u32 {
    u32::try_from(ms / 1000).unwrap_or(u32::MAX)
}
