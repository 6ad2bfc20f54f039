//! Desktop simulator for the beacon sensor history.
//!
//! Runs the sampling pipeline against an in-RAM flash record store with a
//! small log geometry so block rotation and wraparound happen within a few
//! simulated minutes:
//!
//! 1. First boot: the log purges flash and stores its defaults, then the
//!    configuration below is applied.
//! 2. A synthetic sensor is sampled every few simulated seconds. Samples go
//!    through the interrupt-side queue and are drained into the log.
//! 3. Reboot: a fresh engine is brought up on the same flash, recovering the
//!    configuration, boot counter and rotation cursor.
//! 4. A remote requests the last few minutes of history, which is exported
//!    with wall-clock timestamps.
//!
//! Set `RUST_LOG=debug` to see every gating decision and cursor move.

use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

use embassy_futures::block_on;
use log::{error, info};

use beacon_log::app_state::{
    AppError, ExportSink, ExportWindow, LogService, SAMPLE_QUEUE_DEPTH, SampleQueue,
    sample_into_queue,
};
use beacon_log::sensors::{EnvironmentalSensor, SensorError, SensorSample};
use beacon_log::storage::{LogBlock, RamRecordStore};
use beacon_log::{LogConfig, LogEngine, LogError, LogFields};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// Flash slots in the log rotation.
const SLOTS: usize = 4;

/// Samples per log block.
const BLOCK_SAMPLES: usize = 16;

/// Size of the simulated flash.
const FLASH_CAPACITY: usize = 16 * 1024;

/// `is_busy` polls each simulated flash operation takes.
const FLASH_BUSY_POLLS: u32 = 3;

/// Simulated time between sensor readings.
const SENSOR_PERIOD_MS: u64 = 5_000;

/// Readings taken before and after the reboot.
const READINGS_FIRST_BOOT: usize = 180;
const READINGS_SECOND_BOOT: usize = 40;

/// How far back the simulated remote asks for history.
const EXPORT_WINDOW_S: u64 = 5 * 60;

const SIM_CONFIG: LogConfig = LogConfig {
    interval_s: 10,
    overflow: true,
    fields: LogFields::ALL,
};

type SimService = LogService<RamRecordStore, SLOTS, BLOCK_SAMPLES>;

// ---------------------------------------------------------------------------
// Mock sensor
// ---------------------------------------------------------------------------

/// Generates synthetic environmental readings that vary over time.
struct MockSensor {
    /// Simulated milliseconds since boot.
    now_ms: u64,
}

impl MockSensor {
    /// A sensor whose clock starts at boot.
    fn boot() -> Self {
        Self { now_ms: 0 }
    }

    fn advance(&mut self, dt_ms: u64) {
        self.now_ms += dt_ms;
    }
}

impl EnvironmentalSensor for MockSensor {
    async fn sample(&mut self) -> Result<SensorSample, SensorError> {
        let t = self.now_ms as f64 / 1000.0;

        // Temperature: 20–26 °C sinusoidal with slow drift
        let temperature = 23.0 + 3.0 * (t / 120.0).sin() + 0.5 * (t / 37.0).cos();

        // Humidity: 40–60 % with a different period
        let humidity = 50.0 + 10.0 * (t / 180.0).sin() + 2.0 * (t / 23.0).cos();

        // Pressure: around 1013 hPa with a long cycle
        let pressure = 101_300.0 + 150.0 * (t / 600.0).sin();

        Ok(SensorSample::new(self.now_ms)
            .with_temperature(temperature as f32)
            .with_humidity(humidity as f32)
            .with_pressure(pressure as f32))
    }
}

// ---------------------------------------------------------------------------
// Export sink
// ---------------------------------------------------------------------------

/// Prints exported samples instead of sending them over the air.
struct ConsoleSink;

impl ExportSink for ConsoleSink {
    async fn send(&mut self, sample: &SensorSample) -> Result<(), LogError> {
        println!("{}", sample);
        Ok(())
    }

    async fn finish(&mut self, sent: usize) -> Result<(), LogError> {
        println!("-- end of log, {} samples --", sent);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Simulation steps
// ---------------------------------------------------------------------------

/// Bring the log up on `flash`, as the firmware does on every reset.
fn boot(flash: RamRecordStore) -> Result<SimService, LogError> {
    let service = LogService::new(LogEngine::new(flash));
    block_on(service.init())?;
    Ok(service)
}

/// Take `readings` sensor readings, deferring each through the sample queue
/// the way the timer interrupt does and draining whenever the queue fills up.
fn run_sampling(
    service: &SimService,
    sensor: &mut MockSensor,
    queue: &SampleQueue,
    readings: usize,
) -> Result<(), AppError> {
    for reading in 1..=readings {
        sensor.advance(SENSOR_PERIOD_MS);
        block_on(sample_into_queue(sensor, queue))?;

        if reading % SAMPLE_QUEUE_DEPTH == 0 {
            block_on(service.drain(queue))?;
        }
    }
    block_on(service.drain(queue))?;
    Ok(())
}

fn wall_clock_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn run() -> Result<(), AppError> {
    let queue = SampleQueue::new();
    let flash = RamRecordStore::new(FLASH_CAPACITY, LogBlock::<BLOCK_SAMPLES>::ENCODED_LEN)
        .with_busy_polls(FLASH_BUSY_POLLS);

    info!("First boot");
    let service = boot(flash)?;
    block_on(service.set_config(SIM_CONFIG))?;

    let mut sensor = MockSensor::boot();
    run_sampling(&service, &mut sensor, &queue, READINGS_FIRST_BOOT)?;

    let engine = service.into_inner();
    info!(
        "Before reboot: {} of {} slots in use, next slot {}, {} samples in RAM (lost on reset), {} bytes of flash used",
        engine.stored_blocks(),
        SLOTS,
        engine.rotation_cursor(),
        engine.input_block().len(),
        engine.flash().used_bytes()
    );

    info!("Rebooting");
    let service = boot(engine.into_flash())?;
    let mut sensor = MockSensor::boot();
    run_sampling(&service, &mut sensor, &queue, READINGS_SECOND_BOOT)?;

    let now_s = wall_clock_s();
    let window = ExportWindow::from_remote(now_s, now_s - EXPORT_WINDOW_S, sensor.now_ms)?;
    info!(
        "Remote requests the last {} s: oldest system time {} ms",
        EXPORT_WINDOW_S, window.oldest_element_ms
    );

    let sent = block_on(service.export(&window, &mut ConsoleSink))?;
    info!("Exported {} samples", sent);
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    env_logger::init();
    info!("Starting beacon-log simulator");
    info!(
        "Geometry: {} slots × {} samples, logging every {} s",
        SLOTS, BLOCK_SAMPLES, SIM_CONFIG.interval_s
    );

    match run() {
        Ok(()) => {
            info!("Simulator exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Simulation failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
