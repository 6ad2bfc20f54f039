//! Log block format.
//!
//! A block is the unit persisted into one flash slot: a small header followed
//! by a fixed number of element cells. Unused cells are written as zeros so
//! every record of a given capacity has the same size.
//!
//! Binary format (little-endian):
//! - start_timestamp_s: 4 bytes (u32)
//! - end_timestamp_s: 4 bytes (u32)
//! - num_samples: 2 bytes (u16)
//! - config.interval_s: 2 bytes (u16)
//! - config.overflow: 1 byte
//! - config.fields: 1 byte
//! - boot: 2 bytes (u16, low half of the boot counter at seal time)
//! - elements: capacity × 16 bytes

use heapless::Vec;

use crate::config::{LogConfig, LogFields};
use crate::error::LogError;
use crate::sensors::SensorSample;

/// Encoded size of one [`LogElement`].
pub const ELEMENT_LEN: usize = 16;

/// Encoded size of the block header.
pub const BLOCK_HEADER_LEN: usize = 16;

/// One logged sample.
///
/// Fields that were disabled or missing when the sample was logged hold NaN.
///
/// Binary format (little-endian):
/// - timestamp_s: 4 bytes (u32)
/// - temperature_c: 4 bytes (f32)
/// - humidity_rh: 4 bytes (f32)
/// - pressure_pa: 4 bytes (f32)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogElement {
    /// Seconds since boot
    pub timestamp_s: u32,
    pub temperature_c: f32,
    pub humidity_rh: f32,
    pub pressure_pa: f32,
}

impl LogElement {
    /// Keep the enabled fields of a sample; everything else becomes NaN.
    pub fn from_sample(sample: &SensorSample, fields: LogFields) -> Self {
        let pick = |field: LogFields, value: Option<f32>| match value {
            Some(v) if fields.contains(field) => v,
            _ => f32::NAN,
        };

        Self {
            timestamp_s: u32::try_from(sample.timestamp_ms / 1000).unwrap_or(u32::MAX),
            temperature_c: pick(LogFields::TEMPERATURE, sample.temperature_c),
            humidity_rh: pick(LogFields::HUMIDITY, sample.humidity_rh),
            pressure_pa: pick(LogFields::PRESSURE, sample.pressure_pa),
        }
    }

    pub fn timestamp_ms(&self) -> u64 {
        u64::from(self.timestamp_s) * 1000
    }

    /// Write the logged fields and absolute timestamp into a caller's sample.
    pub fn fill_sample(&self, sample: &mut SensorSample) {
        let field = |value: f32| (!value.is_nan()).then_some(value);

        sample.timestamp_ms = self.timestamp_ms();
        sample.temperature_c = field(self.temperature_c);
        sample.humidity_rh = field(self.humidity_rh);
        sample.pressure_pa = field(self.pressure_pa);
    }

    fn write_to(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.timestamp_s.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.temperature_c.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.humidity_rh.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.pressure_pa.to_le_bytes());
    }

    fn read_from(bytes: &[u8]) -> Self {
        Self {
            timestamp_s: u32::from_le_bytes(le_word(&bytes[0..4])),
            temperature_c: f32::from_le_bytes(le_word(&bytes[4..8])),
            humidity_rh: f32::from_le_bytes(le_word(&bytes[8..12])),
            pressure_pa: f32::from_le_bytes(le_word(&bytes[12..16])),
        }
    }
}

fn le_word(bytes: &[u8]) -> [u8; 4] {
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    word
}

fn le_half(bytes: &[u8]) -> [u8; 2] {
    let mut half = [0u8; 2];
    half.copy_from_slice(bytes);
    half
}

/// A block of up to `M` samples logged under a single configuration.
#[derive(Debug, Clone)]
pub struct LogBlock<const M: usize> {
    /// Timestamp of the block start, in seconds since boot
    pub start_timestamp_s: u32,
    /// Timestamp at which the block was sealed, 0 while it is still filling
    pub end_timestamp_s: u32,
    /// Boot the block was sealed in. Timestamps restart at every boot, so
    /// blocks are ordered by `(boot, end_timestamp_s)`.
    pub boot: u16,
    /// Configuration every sample in this block was taken under
    pub config: LogConfig,
    storage: Vec<LogElement, M>,
}

impl<const M: usize> LogBlock<M> {
    /// Size of the flash record holding a block of this capacity.
    pub const ENCODED_LEN: usize = BLOCK_HEADER_LEN + M * ELEMENT_LEN;

    pub fn new(config: LogConfig) -> Self {
        Self {
            start_timestamp_s: 0,
            end_timestamp_s: 0,
            boot: 0,
            config,
            storage: Vec::new(),
        }
    }

    /// Empty the block and start it again at `start_timestamp_s`.
    pub fn reset(&mut self, start_timestamp_s: u32, config: LogConfig) {
        self.start_timestamp_s = start_timestamp_s;
        self.end_timestamp_s = 0;
        self.boot = 0;
        self.config = config;
        self.storage.clear();
    }

    /// Drop every element and zero the timestamps, keeping the configuration.
    pub fn clear(&mut self) {
        self.reset(0, self.config);
    }

    pub fn push(&mut self, element: LogElement) -> Result<(), LogError> {
        self.storage.push(element).map_err(|_| LogError::DataSize)
    }

    pub fn num_samples(&self) -> u16 {
        self.storage.len() as u16
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.storage.is_full()
    }

    pub fn get(&self, idx: usize) -> Option<&LogElement> {
        self.storage.get(idx)
    }

    pub fn elements(&self) -> &[LogElement] {
        &self.storage
    }

    /// Serialize into `buf`, returning the number of bytes written.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, LogError> {
        if buf.len() < Self::ENCODED_LEN {
            return Err(LogError::DataSize);
        }

        let out = &mut buf[..Self::ENCODED_LEN];
        out[0..4].copy_from_slice(&self.start_timestamp_s.to_le_bytes());
        out[4..8].copy_from_slice(&self.end_timestamp_s.to_le_bytes());
        out[8..10].copy_from_slice(&self.num_samples().to_le_bytes());
        out[10..12].copy_from_slice(&self.config.interval_s.to_le_bytes());
        out[12] = u8::from(self.config.overflow);
        out[13] = self.config.fields.bits();
        out[14..16].copy_from_slice(&self.boot.to_le_bytes());

        let cells = &mut out[BLOCK_HEADER_LEN..];
        for (element, cell) in self.storage.iter().zip(cells.chunks_exact_mut(ELEMENT_LEN)) {
            element.write_to(cell);
        }
        cells[self.storage.len() * ELEMENT_LEN..].fill(0);

        Ok(Self::ENCODED_LEN)
    }

    /// Overwrite this block with one decoded from `bytes`.
    ///
    /// On error the block is left untouched.
    pub fn decode_from(&mut self, bytes: &[u8]) -> Result<(), LogError> {
        if bytes.len() < BLOCK_HEADER_LEN {
            return Err(LogError::DataSize);
        }

        let num_samples = usize::from(u16::from_le_bytes(le_half(&bytes[8..10])));
        if num_samples > M || bytes.len() < BLOCK_HEADER_LEN + num_samples * ELEMENT_LEN {
            return Err(LogError::DataSize);
        }

        self.start_timestamp_s = u32::from_le_bytes(le_word(&bytes[0..4]));
        (self.boot, self.end_timestamp_s) = Self::peek_seal(bytes)?;
        self.config = LogConfig {
            interval_s: u16::from_le_bytes(le_half(&bytes[10..12])),
            overflow: bytes[12] != 0,
            fields: LogFields::from_bits_truncate(bytes[13]),
        };

        self.storage.clear();
        let cells = &bytes[BLOCK_HEADER_LEN..BLOCK_HEADER_LEN + num_samples * ELEMENT_LEN];
        for cell in cells.chunks_exact(ELEMENT_LEN) {
            // Capacity was checked against num_samples above.
            let _ = self.storage.push(LogElement::read_from(cell));
        }

        Ok(())
    }

    /// Read `(boot, end_timestamp_s)` from an encoded block without decoding it.
    pub fn peek_seal(bytes: &[u8]) -> Result<(u16, u32), LogError> {
        if bytes.len() < BLOCK_HEADER_LEN {
            return Err(LogError::DataSize);
        }
        Ok((
            u16::from_le_bytes(le_half(&bytes[14..16])),
            u32::from_le_bytes(le_word(&bytes[4..8])),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn element(timestamp_s: u32) -> LogElement {
        LogElement {
            timestamp_s,
            temperature_c: 21.5,
            humidity_rh: 40.25,
            pressure_pa: 101_325.0,
        }
    }

    #[test]
    fn test_encoded_sizes() {
        assert_eq!(LogBlock::<1>::ENCODED_LEN, 32);
        assert_eq!(LogBlock::<249>::ENCODED_LEN, 4000);
    }

    #[test]
    fn test_block_serialization() {
        let config = LogConfig {
            interval_s: 60,
            overflow: false,
            fields: LogFields::TEMPERATURE,
        };
        let mut block = LogBlock::<4>::new(config);
        block.start_timestamp_s = 100;
        block.push(element(100)).unwrap();
        block.push(element(160)).unwrap();
        block.end_timestamp_s = 160;
        block.boot = 7;

        let mut bytes = vec![0xAAu8; LogBlock::<4>::ENCODED_LEN];
        assert_eq!(block.encode_into(&mut bytes), Ok(LogBlock::<4>::ENCODED_LEN));
        // Unused cells are zeroed, not left with stale bytes
        assert!(bytes[BLOCK_HEADER_LEN + 2 * ELEMENT_LEN..].iter().all(|&b| b == 0));

        let mut decoded = LogBlock::<4>::new(LogConfig::default());
        decoded.decode_from(&bytes).unwrap();
        assert_eq!(decoded.start_timestamp_s, 100);
        assert_eq!(decoded.end_timestamp_s, 160);
        assert_eq!(decoded.config, config);
        assert_eq!(decoded.elements(), block.elements());
        assert_eq!(decoded.boot, 7);
        assert_eq!(LogBlock::<4>::peek_seal(&bytes), Ok((7, 160)));
    }

    #[test]
    fn test_push_is_bounded() {
        let mut block = LogBlock::<2>::new(LogConfig::default());
        block.push(element(1)).unwrap();
        block.push(element(2)).unwrap();
        assert!(block.is_full());
        assert_eq!(block.push(element(3)), Err(LogError::DataSize));
        assert_eq!(block.num_samples(), 2);
    }

    #[test]
    fn test_decode_rejects_bad_records() {
        let mut block = LogBlock::<2>::new(LogConfig::default());
        assert_eq!(block.decode_from(&[0u8; 4]), Err(LogError::DataSize));

        // A record claiming more samples than this capacity holds
        let mut bytes = vec![0u8; LogBlock::<4>::ENCODED_LEN];
        bytes[8..10].copy_from_slice(&3u16.to_le_bytes());
        assert_eq!(block.decode_from(&bytes), Err(LogError::DataSize));
        assert!(block.is_empty());
    }

    #[test]
    fn test_element_keeps_enabled_fields_only() {
        let sample = SensorSample::new(12_345)
            .with_temperature(22.0)
            .with_humidity(55.0);
        let logged = LogElement::from_sample(&sample, LogFields::TEMPERATURE.union(LogFields::PRESSURE));
        assert_eq!(logged.timestamp_s, 12);
        assert_eq!(logged.temperature_c, 22.0);
        assert!(logged.humidity_rh.is_nan());
        assert!(logged.pressure_pa.is_nan());

        let mut out = SensorSample::default();
        logged.fill_sample(&mut out);
        assert_eq!(out.timestamp_ms, 12_000);
        assert_eq!(out.temperature_c, Some(22.0));
        assert_eq!(out.humidity_rh, None);
        assert_eq!(out.pressure_pa, None);
    }
}
