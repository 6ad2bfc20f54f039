use log::{info, warn};

use super::LogEngine;
use crate::error::LogError;
use crate::storage::flash::wait_idle;
use crate::storage::{BOOT_COUNT_RECORD, LOG_FILE, RecordStore};

impl<F, const SLOTS: usize, const MAX_SAMPLES: usize> LogEngine<F, SLOTS, MAX_SAMPLES>
where
    F: RecordStore,
{
    /// Load the boot counter, add one and store it back.
    ///
    /// A missing or malformed counter counts as zero.
    pub(super) async fn increment_boot_count(&mut self) -> Result<u32, LogError> {
        let mut buf = [0u8; 4];
        wait_idle(&self.flash).await;

        let count = match self.flash.load(LOG_FILE, BOOT_COUNT_RECORD, &mut buf) {
            Ok(4) => u32::from_le_bytes(buf),
            Ok(_) | Err(LogError::DataSize) => {
                warn!("Log: boot counter record malformed, restarting count");
                0
            }
            Err(LogError::NotFound) => 0,
            Err(e) => return Err(e),
        };

        let count = count.wrapping_add(1);
        let result = self
            .flash
            .store(LOG_FILE, BOOT_COUNT_RECORD, &count.to_le_bytes());
        wait_idle(&self.flash).await;
        result?;

        info!("Log: boot count {}", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::flash_for;
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn test_malformed_counter_restarts_at_one() {
        let mut flash = flash_for::<4>();
        flash.store(LOG_FILE, BOOT_COUNT_RECORD, &[7, 0]).unwrap();
        block_on(wait_idle(&flash));

        let mut engine: LogEngine<_, 2, 4> = LogEngine::new(flash);
        assert_eq!(block_on(engine.increment_boot_count()), Ok(1));
        assert_eq!(block_on(engine.increment_boot_count()), Ok(2));
    }

    #[test]
    fn test_counter_store_failure_is_reported() {
        let mut flash = flash_for::<4>();
        flash.fail_store(BOOT_COUNT_RECORD, LogError::NoMemory, None);

        let mut engine: LogEngine<_, 2, 4> = LogEngine::new(flash);
        assert_eq!(
            block_on(engine.increment_boot_count()),
            Err(LogError::NoMemory)
        );
    }
}
