//! Task-level plumbing around the history log
//!
//! The log engine is not re-entrant and must not be entered from interrupt
//! context. Timer interrupts push readings into a [`SampleQueue`] with
//! [`defer_sample`]; the sampling task drains the queue through a
//! [`LogService`], which serializes every caller behind one async mutex.

mod export;

pub use export::{ExportSink, ExportWindow};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex as AsyncMutex;
use heapless::Vec;
use log::{info, warn};
use thiserror_no_std::Error;

use crate::config::LogConfig;
use crate::error::LogError;
use crate::history::{LogEngine, ReadState};
use crate::sensors::{EnvironmentalSensor, SensorError, SensorSample};
use crate::storage::{BLOCK_SAMPLES, DATA_RECORDS, RecordStore};

/// Samples waiting to be logged
pub const SAMPLE_QUEUE_DEPTH: usize = 8;

/// Hand-over from interrupt context to the logging task
pub type SampleQueue = Channel<CriticalSectionRawMutex, SensorSample, SAMPLE_QUEUE_DEPTH>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppError {
    #[error("Log error: {0}")]
    Log(LogError),
    #[error("Sensor error: {0}")]
    Sensor(SensorError),
}

impl From<LogError> for AppError {
    fn from(e: LogError) -> Self {
        AppError::Log(e)
    }
}

impl From<SensorError> for AppError {
    fn from(e: SensorError) -> Self {
        AppError::Sensor(e)
    }
}

/// Queue a sample without blocking. Safe to call from an interrupt handler.
///
/// Fails with `Busy` when the logging task has fallen behind and the queue
/// is full; the sample is dropped.
pub fn defer_sample(queue: &SampleQueue, sample: SensorSample) -> Result<(), LogError> {
    queue.try_send(sample).map_err(|_| {
        warn!("Log: sample queue full, dropping sample at {} ms", sample.timestamp_ms);
        LogError::Busy
    })
}

/// Take a reading from `sensor` and queue it for logging.
pub async fn sample_into_queue<S: EnvironmentalSensor>(
    sensor: &mut S,
    queue: &SampleQueue,
) -> Result<SensorSample, AppError> {
    let sample = sensor.sample().await?;
    defer_sample(queue, sample)?;
    Ok(sample)
}

/// Shared handle to the log engine.
pub struct LogService<F, const SLOTS: usize = DATA_RECORDS, const MAX_SAMPLES: usize = BLOCK_SAMPLES>
{
    engine: AsyncMutex<CriticalSectionRawMutex, LogEngine<F, SLOTS, MAX_SAMPLES>>,
}

impl<F, const SLOTS: usize, const MAX_SAMPLES: usize> LogService<F, SLOTS, MAX_SAMPLES>
where
    F: RecordStore,
{
    pub fn new(engine: LogEngine<F, SLOTS, MAX_SAMPLES>) -> Self {
        Self {
            engine: AsyncMutex::new(engine),
        }
    }

    pub async fn init(&self) -> Result<(), LogError> {
        self.engine.lock().await.init().await
    }

    pub async fn process(&self, sample: &SensorSample) -> Result<(), LogError> {
        self.engine.lock().await.process(sample).await
    }

    /// Log every queued sample, returning how many were taken off the queue.
    ///
    /// A failing sample does not stop the drain; the first error is reported
    /// once the queue is empty.
    pub async fn drain(&self, queue: &SampleQueue) -> Result<usize, LogError> {
        let mut engine = self.engine.lock().await;
        let mut result = Ok(());
        let mut drained = 0;

        while let Ok(sample) = queue.try_receive() {
            result = LogError::merge(result, engine.process(&sample).await);
            drained += 1;
        }

        result.map(|()| drained)
    }

    pub async fn read(
        &self,
        sample: &mut SensorSample,
        state: &mut ReadState,
    ) -> Result<(), LogError> {
        self.engine.lock().await.read(sample, state).await
    }

    /// Read up to `K` samples in one lock.
    ///
    /// An empty batch means the cursor is finished. A flash error after some
    /// samples were read ends the batch early; `state` still points at the
    /// first unread sample so nothing is lost.
    pub async fn read_batch<const K: usize>(
        &self,
        state: &mut ReadState,
    ) -> Result<Vec<SensorSample, K>, LogError> {
        let mut engine = self.engine.lock().await;
        let mut batch = Vec::new();

        while !batch.is_full() {
            let mut sample = SensorSample::default();
            match engine.read(&mut sample, state).await {
                Ok(()) => {
                    // Capacity checked by the loop condition.
                    let _ = batch.push(sample);
                }
                Err(LogError::NotFound) => break,
                Err(e) if batch.is_empty() => return Err(e),
                Err(e) => {
                    warn!("Log: batch cut short after {} samples: {:?}", batch.len(), e);
                    break;
                }
            }
        }

        Ok(batch)
    }

    pub async fn config(&self) -> LogConfig {
        self.engine.lock().await.config_get()
    }

    pub async fn set_config(&self, config: LogConfig) -> Result<(), LogError> {
        self.engine.lock().await.config_set(config).await
    }

    pub async fn factory_reset(&self) -> Result<(), LogError> {
        self.engine.lock().await.factory_reset().await
    }

    /// Send every sample in `window` to `sink`, then tell it the export is done.
    ///
    /// Holds the log for the whole export, so sampling stalls until it ends.
    pub async fn export<S: ExportSink>(
        &self,
        window: &ExportWindow,
        sink: &mut S,
    ) -> Result<usize, LogError> {
        let mut engine = self.engine.lock().await;
        let mut state = ReadState::new(window.oldest_element_ms);
        let mut sample = SensorSample::default();
        let mut sent = 0;

        loop {
            match engine.read(&mut sample, &mut state).await {
                Ok(()) => {
                    sample.timestamp_ms = window.to_real_time_ms(sample.timestamp_ms);
                    sink.send(&sample).await?;
                    sent += 1;
                }
                Err(LogError::NotFound) => break,
                Err(e) => return Err(e),
            }
        }

        sink.finish(sent).await?;
        info!("Log: exported {} samples", sent);
        Ok(sent)
    }

    /// Tear the service down, handing back the engine.
    pub fn into_inner(self) -> LogEngine<F, SLOTS, MAX_SAMPLES> {
        self.engine.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::testing::{flash_for, interval, sample};
    use crate::storage::RamRecordStore;
    use alloc::vec::Vec as StdVec;
    use embassy_futures::block_on;

    fn service<const S: usize, const M: usize>(config: LogConfig) -> LogService<RamRecordStore, S, M> {
        let service = LogService::new(LogEngine::new(flash_for::<M>()));
        block_on(service.init()).unwrap();
        block_on(service.set_config(config)).unwrap();
        service
    }

    #[derive(Default)]
    struct RecordingSink {
        samples: StdVec<SensorSample>,
        finished: Option<usize>,
        fail_after: Option<usize>,
    }

    impl ExportSink for RecordingSink {
        async fn send(&mut self, sample: &SensorSample) -> Result<(), LogError> {
            if self.fail_after == Some(self.samples.len()) {
                return Err(LogError::Busy);
            }
            self.samples.push(*sample);
            Ok(())
        }

        async fn finish(&mut self, sent: usize) -> Result<(), LogError> {
            self.finished = Some(sent);
            Ok(())
        }
    }

    struct StepSensor {
        now_ms: u64,
        broken: bool,
    }

    impl EnvironmentalSensor for StepSensor {
        async fn sample(&mut self) -> Result<SensorSample, SensorError> {
            if self.broken {
                return Err(SensorError::ReadFailed {
                    sensor: "step",
                    operation: "measure",
                });
            }
            self.now_ms += 1_000;
            Ok(sample(self.now_ms))
        }
    }

    #[test]
    fn test_queue_rejects_when_full() {
        let queue = SampleQueue::new();
        for i in 0..SAMPLE_QUEUE_DEPTH as u64 {
            defer_sample(&queue, sample(i * 1_000)).unwrap();
        }
        assert_eq!(defer_sample(&queue, sample(99_000)), Err(LogError::Busy));
    }

    #[test]
    fn test_drain_logs_queued_samples() {
        let service = service::<2, 4>(interval(1));
        let queue = SampleQueue::new();
        let mut sensor = StepSensor {
            now_ms: 0,
            broken: false,
        };
        for _ in 0..5 {
            block_on(sample_into_queue(&mut sensor, &queue)).unwrap();
        }

        assert_eq!(block_on(service.drain(&queue)), Ok(5));
        assert_eq!(block_on(service.drain(&queue)), Ok(0));

        let engine = service.into_inner();
        assert_eq!(engine.stored_blocks(), 1);
        assert_eq!(engine.input_block().len(), 1);
    }

    #[test]
    fn test_sensor_failure_queues_nothing() {
        let queue = SampleQueue::new();
        let mut sensor = StepSensor {
            now_ms: 0,
            broken: true,
        };
        assert!(matches!(
            block_on(sample_into_queue(&mut sensor, &queue)),
            Err(AppError::Sensor(SensorError::ReadFailed { .. }))
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_reports_first_error_and_empties_queue() {
        let service = service::<1, 1>(interval(1));
        block_on(async {
            service
                .engine
                .lock()
                .await
                .flash_mut()
                .fail_store(crate::storage::data_record(0), LogError::NoMemory, None);
        });

        let queue = SampleQueue::new();
        defer_sample(&queue, sample(1_000)).unwrap();
        defer_sample(&queue, sample(2_000)).unwrap();

        assert_eq!(block_on(service.drain(&queue)), Err(LogError::NoMemory));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_read_batch() {
        let service = service::<2, 2>(interval(1));
        for s in 1..=5u64 {
            block_on(service.process(&sample(s * 1_000))).unwrap();
        }

        let mut state = ReadState::new(0);
        let first: Vec<SensorSample, 3> = block_on(service.read_batch(&mut state)).unwrap();
        let second: Vec<SensorSample, 3> = block_on(service.read_batch(&mut state)).unwrap();
        let third: Vec<SensorSample, 3> = block_on(service.read_batch(&mut state)).unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 2);
        assert_eq!(second[1].timestamp_ms, 5_000);
        assert!(third.is_empty());
    }

    #[test]
    fn test_batch_reader_keeps_up_with_flushes() {
        let service = service::<2, 2>(interval(1));
        block_on(service.process(&sample(1_000))).unwrap();

        let mut state = ReadState::new(0);
        let mut seen = StdVec::new();
        let first: Vec<SensorSample, 1> = block_on(service.read_batch(&mut state)).unwrap();
        seen.extend(first.iter().map(|s| s.timestamp_ms));

        // The live block the reader stopped in is flushed meanwhile.
        block_on(service.process(&sample(2_000))).unwrap();
        block_on(service.process(&sample(3_000))).unwrap();

        loop {
            let batch: Vec<SensorSample, 1> = block_on(service.read_batch(&mut state)).unwrap();
            if batch.is_empty() {
                break;
            }
            seen.extend(batch.iter().map(|s| s.timestamp_ms));
        }
        assert_eq!(seen, [1_000, 2_000, 3_000]);
    }

    #[test]
    fn test_export_shifts_to_real_time() {
        let service = service::<2, 2>(interval(1));
        for s in 1..=3u64 {
            block_on(service.process(&sample(s * 1_000))).unwrap();
        }

        // Beacon up for 4 s, remote asks for the last 2 s.
        let window = ExportWindow::from_remote(1_000_004, 1_000_002, 4_000).unwrap();
        let mut sink = RecordingSink::default();
        assert_eq!(block_on(service.export(&window, &mut sink)), Ok(2));

        let sent: StdVec<u64> = sink.samples.iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(sent, [1_000_002_000, 1_000_003_000]);
        assert_eq!(sink.finished, Some(2));
    }

    #[test]
    fn test_export_stops_on_sink_error() {
        let service = service::<2, 2>(interval(1));
        for s in 1..=3u64 {
            block_on(service.process(&sample(s * 1_000))).unwrap();
        }

        let window = ExportWindow::from_remote(100, 1, 4_000).unwrap();
        let mut sink = RecordingSink {
            fail_after: Some(1),
            ..Default::default()
        };
        assert_eq!(
            block_on(service.export(&window, &mut sink)),
            Err(LogError::Busy)
        );
        assert_eq!(sink.samples.len(), 1);
        assert_eq!(sink.finished, None);
    }

    #[test]
    fn test_factory_reset_clears_history() {
        let service = service::<2, 2>(interval(1));
        for s in 1..=3u64 {
            block_on(service.process(&sample(s * 1_000))).unwrap();
        }
        block_on(service.factory_reset()).unwrap();

        let mut state = ReadState::new(0);
        let batch: Vec<SensorSample, 4> = block_on(service.read_batch(&mut state)).unwrap();
        assert!(batch.is_empty());
        assert_eq!(block_on(service.config()), interval(1));
    }
}
