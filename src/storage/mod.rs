//! Flash-facing storage: record layout, the record store interface and the
//! block format written into each log slot.

pub mod block;
pub mod flash;
pub mod ram;

pub use block::{LogBlock, LogElement};
pub use flash::RecordStore;
pub use ram::{FlashOp, RamRecordStore};

/// Flash page size on the target. One log block fills one page.
pub const FLASH_PAGE_SIZE: usize = 4096;

/// Bytes of a page reserved for the flash store's own record header.
pub const RECORD_HEADER_RESERVE: usize = 96;

/// Samples held by one block with the default geometry.
pub const BLOCK_SAMPLES: usize =
    (FLASH_PAGE_SIZE - RECORD_HEADER_RESERVE - block::BLOCK_HEADER_LEN) / block::ELEMENT_LEN;

/// Number of flash slots in the log rotation with the default geometry.
pub const DATA_RECORDS: usize = 8;

/// Flash file holding every log record.
pub const LOG_FILE: u8 = 0xF0;

/// Record holding the persisted [`crate::LogConfig`].
pub const CONFIG_RECORD: u16 = 0x0001;

/// Record holding the boot counter.
pub const BOOT_COUNT_RECORD: u16 = 0x0002;

/// High byte of every data record id. The low byte is the slot index.
pub const DATA_RECORD_PREFIX: u16 = 0x10;

/// Record id of a data slot.
pub const fn data_record(slot: usize) -> u16 {
    (DATA_RECORD_PREFIX << 8) + slot as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_block_fits_one_page() {
        let encoded = block::BLOCK_HEADER_LEN + BLOCK_SAMPLES * block::ELEMENT_LEN;
        assert!(encoded <= FLASH_PAGE_SIZE - RECORD_HEADER_RESERVE);
        assert_eq!(BLOCK_SAMPLES, 249);
    }

    #[test]
    fn test_data_records_do_not_collide_with_fixed_records() {
        for slot in 0..DATA_RECORDS {
            let id = data_record(slot);
            assert_ne!(id, CONFIG_RECORD);
            assert_ne!(id, BOOT_COUNT_RECORD);
        }
        assert_eq!(data_record(0), 0x1000);
        assert_eq!(data_record(7), 0x1007);
    }
}
