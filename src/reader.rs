//! See [`P1Reader`] for more details.

use std::time::{Duration, Instant};

use crate::ascii::AsciiDecoder;
use crate::binary::BinaryDecoder;
use crate::budget::{Budget, Clock, MonotonicClock, Progress};
use crate::crc;
use crate::frame::{FrameReader, DEFAULT_BUFFER_SIZE};
use crate::registry::Registry;
use crate::types::{Encoding, MinimumPeriod};
use crate::Error;

/// The hardware the reader is attached to.
///
/// None of the methods may block.
pub trait Interface {
    /// Read the bytes the meter link has available right now into `buf`,
    /// returning how many were read. Returns 0 if nothing is pending.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Forward raw telegram bytes to the secondary port.
    fn write_secondary(&mut self, data: &[u8]);

    /// Drive the flow control line. The meter only sends while it is active.
    fn set_ready_to_receive(&mut self, active: bool);

    /// Drive the optional busy indicator, active while a telegram is being read.
    fn set_busy(&mut self, _active: bool) {}

    /// True if the device on the secondary port wants a copy of the telegrams.
    fn secondary_requested(&self) -> bool {
        false
    }
}

/// Reader configuration.
///
/// # Example
/// ```
/// use p1_proto::Config;
/// use std::time::Duration;
///
/// let config = Config::default()
///     .with_minimum_period(Duration::from_secs(10))
///     .with_time_budget(Duration::from_millis(10));
/// assert_eq!(config.minimum_period.as_duration(), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Shortest time from the start of one read to the start of the next.
    pub minimum_period: MinimumPeriod,
    /// Time allowed for decoding in one tick.
    pub time_budget: Duration,
    /// Quiet time required on the link before recovering from an error.
    pub settle_time: Duration,
    /// Bytes read from the link per tick.
    pub read_batch: usize,
    /// Bytes forwarded to the secondary port per tick.
    pub resend_batch: usize,
    /// Bytes discarded per tick while recovering from an error.
    pub drain_batch: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            minimum_period: MinimumPeriod::default(),
            time_budget: Duration::from_millis(25),
            settle_time: Duration::from_millis(500),
            read_batch: 256,
            resend_batch: 200,
            drain_batch: 256,
        }
    }
}

impl Config {
    pub fn with_minimum_period(mut self, period: Duration) -> Self {
        self.minimum_period = MinimumPeriod::clamped(period);
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = budget;
        self
    }

    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    pub fn with_read_batch(mut self, bytes: usize) -> Self {
        self.read_batch = bytes.max(1);
        self
    }

    pub fn with_resend_batch(mut self, bytes: usize) -> Self {
        self.resend_batch = bytes.max(1);
        self
    }

    pub fn with_drain_batch(mut self, bytes: usize) -> Self {
        self.drain_batch = bytes.max(1);
        self
    }
}

/// The acquisition states.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    /// Flow control is active and telegram bytes are being collected.
    ReadingMessage,
    VerifyingCrc,
    ProcessingAscii,
    ProcessingBinary,
    /// Forwarding the telegram to the secondary port.
    Resending,
    /// Waiting for the minimum period to pass.
    Waiting,
    /// Discarding input until the link has been quiet for the settle time.
    ErrorRecovery,
}

// State with the progress data belonging to it.
#[derive(Debug)]
enum Phase {
    ReadingMessage,
    VerifyingCrc,
    ProcessingAscii(AsciiDecoder),
    ProcessingBinary(BinaryDecoder),
    Resending { sent: usize },
    Waiting,
    ErrorRecovery { quiet_since: Instant },
}

impl Phase {
    fn state(&self) -> State {
        match self {
            Self::ReadingMessage => State::ReadingMessage,
            Self::VerifyingCrc => State::VerifyingCrc,
            Self::ProcessingAscii(_) => State::ProcessingAscii,
            Self::ProcessingBinary(_) => State::ProcessingBinary,
            Self::Resending { .. } => State::Resending,
            Self::Waiting => State::Waiting,
            Self::ErrorRecovery { .. } => State::ErrorRecovery,
        }
    }
}

/// Timing of one completed telegram cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CycleStats {
    pub encoding: Encoding,
    /// Telegram length in bytes, trailer included.
    pub length: usize,
    /// From flow control activation to the last telegram byte.
    pub reading: Duration,
    /// CRC check and decoding.
    pub processing: Duration,
    pub resending: Duration,
}

impl CycleStats {
    pub fn total(&self) -> Duration {
        self.reading + self.processing + self.resending
    }
}

/// Counters over the lifetime of the reader.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ReaderStats {
    /// Telegrams verified and decoded.
    pub telegrams: u32,
    /// Values published to the registry.
    pub values: u32,
    /// Telegrams discarded because of an error, CRC errors included.
    pub errors: u32,
    pub crc_errors: u32,
}

#[derive(Debug, Copy, Clone)]
struct CycleTiming {
    reading_started: Instant,
    frame_received: Option<Instant>,
    processed: Option<Instant>,
}

impl CycleTiming {
    fn new(now: Instant) -> Self {
        Self {
            reading_started: now,
            frame_received: None,
            processed: None,
        }
    }
}

/// P1 telegram reader.
///
/// The reader owns the hardware [`Interface`] and is driven by calling
/// [`tick()`](Self::tick()) repeatedly from the application's main loop. Every
/// call does a bounded amount of work and returns.
///
/// # Example
///
/// ```
/// use p1_proto::{obis, Config, Interface, P1Reader, Registry, State};
/// # struct Uart;
/// # impl Interface for Uart {
/// #     fn read(&mut self, _buf: &mut [u8]) -> usize { 0 }
/// #     fn write_secondary(&mut self, _data: &[u8]) {}
/// #     fn set_ready_to_receive(&mut self, _active: bool) {}
/// # }
/// # fn other_work() {}
///
/// let mut registry = Registry::new();
/// let energy = registry.register(obis(1, 8, 0));
/// let power = registry.register(obis(1, 7, 0));
///
/// let mut reader: P1Reader<Uart> = P1Reader::new(Uart, registry, Config::default());
/// for _ in 0..10 {
///     reader.tick();
///     other_work();
///     if let Some(kwh) = energy.state() {
///         println!("Energy: {} kWh, power: {:?} kW", kwh, power.state());
///     }
/// }
/// assert_eq!(reader.state(), State::ReadingMessage);
/// ```
pub struct P1Reader<IO, C = MonotonicClock, const N: usize = DEFAULT_BUFFER_SIZE> {
    io: IO,
    clock: C,
    registry: Registry,
    config: Config,
    frame: Box<FrameReader<N>>,
    phase: Phase,
    timing: CycleTiming,
    last_cycle: Option<CycleStats>,
    last_error: Option<Error>,
    stats: ReaderStats,
}

impl<IO: Interface, const N: usize> P1Reader<IO, MonotonicClock, N> {
    /// Create a reader using the system clock, and start reading.
    pub fn new(io: IO, registry: Registry, config: Config) -> Self {
        Self::with_clock(io, MonotonicClock, registry, config)
    }
}

impl<IO: Interface, C: Clock, const N: usize> P1Reader<IO, C, N> {
    /// Create a reader with the given clock, and start reading.
    pub fn with_clock(io: IO, clock: C, registry: Registry, config: Config) -> Self {
        let now = clock.now();
        let mut reader = Self {
            io,
            clock,
            registry,
            config,
            frame: Box::new(FrameReader::new()),
            phase: Phase::Waiting,
            timing: CycleTiming::new(now),
            last_cycle: None,
            last_error: None,
            stats: ReaderStats::default(),
        };
        reader.change_phase(Phase::ReadingMessage);
        reader
    }

    /// Advance the state machine by one step.
    pub fn tick(&mut self) {
        let next = match &mut self.phase {
            Phase::ReadingMessage => self.read_message(),
            Phase::VerifyingCrc => self.verify_crc(),
            Phase::ProcessingAscii(decoder) => {
                let boundary = self.frame.crc_boundary().unwrap_or_default();
                let budget = Budget::new(&self.clock, self.config.time_budget);
                match decoder.decode(self.frame.buffer(), boundary, &self.registry, &budget) {
                    Progress::Pending => Ok(None),
                    Progress::Done => {
                        self.stats.values = self.stats.values.saturating_add(decoder.published());
                        Ok(Some(Phase::Resending { sent: 0 }))
                    }
                }
            }
            Phase::ProcessingBinary(decoder) => {
                let boundary = self.frame.crc_boundary().unwrap_or_default();
                let budget = Budget::new(&self.clock, self.config.time_budget);
                match decoder.decode(self.frame.buffer(), boundary, &self.registry, &budget) {
                    Ok(Progress::Pending) => Ok(None),
                    Ok(Progress::Done) => {
                        self.stats.values = self.stats.values.saturating_add(decoder.published());
                        Ok(Some(Phase::Resending { sent: 0 }))
                    }
                    Err(error) => Err(error),
                }
            }
            Phase::Resending { sent } => {
                let telegram = &self.frame.buffer()[*sent..];
                let batch = telegram.len().min(self.config.resend_batch.max(1));
                self.io.write_secondary(&telegram[..batch]);
                *sent += batch;
                Ok((*sent >= self.frame.len()).then_some(Phase::Waiting))
            }
            Phase::Waiting => {
                let elapsed = self.clock.now() - self.timing.reading_started;
                Ok((elapsed > self.config.minimum_period.as_duration())
                    .then_some(Phase::ReadingMessage))
            }
            Phase::ErrorRecovery { quiet_since } => {
                let mut scratch = [0; 64];
                let mut drained = 0;
                let limit = self.config.drain_batch.max(1);
                while drained < limit {
                    let len = scratch.len().min(limit - drained);
                    match self.io.read(&mut scratch[..len]) {
                        0 => break,
                        read => drained += read,
                    }
                }
                let now = self.clock.now();
                if drained > 0 {
                    log::trace!("Discarded {} bytes", drained);
                    *quiet_since = now;
                    Ok(None)
                } else {
                    Ok((now - *quiet_since >= self.config.settle_time).then_some(Phase::Waiting))
                }
            }
        };

        match next {
            Ok(Some(phase)) => self.change_phase(phase),
            Ok(None) => {}
            Err(error) => self.fail(error),
        }
    }

    fn read_message(&mut self) -> Result<Option<Phase>, Error> {
        let mut byte = [0];
        for _ in 0..self.config.read_batch.max(1) {
            if self.io.read(&mut byte) == 0 {
                break;
            }
            if self.frame.push(byte[0])? {
                return Ok(Some(Phase::VerifyingCrc));
            }
        }
        Ok(None)
    }

    fn verify_crc(&mut self) -> Result<Option<Phase>, Error> {
        let (encoding, boundary) = match (self.frame.encoding(), self.frame.crc_boundary()) {
            (Some(encoding), Some(boundary)) => (encoding, boundary),
            _ => {
                return Err(Error::MalformedFrame {
                    offset: self.frame.len(),
                })
            }
        };
        if let Err(error) = crc::verify(encoding, self.frame.buffer(), boundary) {
            match encoding {
                Encoding::Ascii => log::debug!(
                    "Buffer:\n{}",
                    String::from_utf8_lossy(self.frame.buffer())
                ),
                Encoding::Binary => log::debug!("Buffer: {:02X?}", &self.frame.buffer()[..]),
            }
            return Err(error);
        }
        Ok(Some(match encoding {
            Encoding::Ascii => Phase::ProcessingAscii(AsciiDecoder::new()),
            Encoding::Binary => Phase::ProcessingBinary(BinaryDecoder::new()),
        }))
    }

    fn fail(&mut self, error: Error) {
        log::warn!("{}, telegram discarded", error);
        self.stats.errors = self.stats.errors.saturating_add(1);
        if let Error::CrcMismatch { .. } = error {
            self.stats.crc_errors = self.stats.crc_errors.saturating_add(1);
        }
        self.last_error = Some(error);
        let quiet_since = self.clock.now();
        self.change_phase(Phase::ErrorRecovery { quiet_since });
    }

    fn change_phase(&mut self, mut phase: Phase) {
        let now = self.clock.now();
        if let Phase::Resending { .. } = phase {
            self.stats.telegrams = self.stats.telegrams.saturating_add(1);
            self.timing.processed = Some(now);
            if !self.io.secondary_requested() {
                phase = Phase::Waiting;
            }
        }
        log::debug!("State {:?} -> {:?}", self.phase.state(), phase.state());

        match phase {
            Phase::ReadingMessage => {
                self.frame.reset();
                self.timing = CycleTiming::new(now);
                self.io.set_ready_to_receive(true);
                self.io.set_busy(true);
            }
            Phase::VerifyingCrc => {
                self.io.set_ready_to_receive(false);
                self.timing.frame_received = Some(now);
            }
            Phase::Waiting => {
                self.io.set_busy(false);
                self.record_cycle(now);
            }
            Phase::ErrorRecovery { .. } => {
                self.io.set_ready_to_receive(false);
            }
            Phase::ProcessingAscii(_) | Phase::ProcessingBinary(_) | Phase::Resending { .. } => {}
        }
        self.phase = phase;
    }

    // Only cycles that got through decoding have a processed time.
    fn record_cycle(&mut self, now: Instant) {
        let timing = self.timing;
        let (Some(received), Some(processed), Some(encoding)) =
            (timing.frame_received, timing.processed, self.frame.encoding())
        else {
            return;
        };
        let cycle = CycleStats {
            encoding,
            length: self.frame.len(),
            reading: received - timing.reading_started,
            processing: processed - received,
            resending: now - processed,
        };
        log::debug!(
            "Cycle time {} ms: {} ms reading, {} ms processing, {} ms resending ({} bytes)",
            cycle.total().as_millis(),
            cycle.reading.as_millis(),
            cycle.processing.as_millis(),
            cycle.resending.as_millis(),
            cycle.length
        );
        self.last_cycle = Some(cycle);
    }

    /// The current state.
    pub fn state(&self) -> State {
        self.phase.state()
    }

    /// Change the minimum period between telegrams, taking effect from the next tick.
    pub fn set_minimum_period(&mut self, period: Duration) {
        self.config.minimum_period = MinimumPeriod::clamped(period);
    }

    pub fn minimum_period(&self) -> Duration {
        self.config.minimum_period.as_duration()
    }

    /// The raw bytes of the current (or last) telegram.
    pub fn telegram(&self) -> &[u8] {
        self.frame.buffer()
    }

    /// The error that caused the most recent telegram to be discarded.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Timing of the most recently completed cycle.
    pub fn last_cycle(&self) -> Option<&CycleStats> {
        self.last_cycle.as_ref()
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn io(&self) -> &IO {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut IO {
        &mut self.io
    }

    pub fn into_inner(self) -> IO {
        self.io
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_batches_at_least_one() {
        let config = Config::default()
            .with_read_batch(0)
            .with_resend_batch(0)
            .with_drain_batch(0);
        assert_eq!(config.read_batch, 1);
        assert_eq!(config.resend_batch, 1);
        assert_eq!(config.drain_batch, 1);
    }

    #[test]
    fn test_config_clamps_period() {
        let config = Config::default().with_minimum_period(Duration::from_secs(121));
        assert_eq!(config.minimum_period.as_duration(), MinimumPeriod::MAX);
    }

    #[test]
    fn test_cycle_total() {
        let cycle = CycleStats {
            encoding: Encoding::Ascii,
            length: 100,
            reading: Duration::from_millis(300),
            processing: Duration::from_millis(20),
            resending: Duration::from_millis(5),
        };
        assert_eq!(cycle.total(), Duration::from_millis(325));
    }

    struct Idle;

    impl Interface for Idle {
        fn read(&mut self, _buf: &mut [u8]) -> usize {
            0
        }
        fn write_secondary(&mut self, _data: &[u8]) {}
        fn set_ready_to_receive(&mut self, _active: bool) {}
    }

    #[test]
    fn test_counters_saturate() {
        let mut reader: P1Reader<Idle> = P1Reader::new(Idle, Registry::new(), Config::default());
        reader.stats.errors = u32::MAX;
        reader.stats.crc_errors = u32::MAX;
        reader.fail(Error::CrcMismatch {
            expected: 1,
            computed: 2,
        });
        assert_eq!(reader.stats().errors, u32::MAX);
        assert_eq!(reader.stats().crc_errors, u32::MAX);
        assert_eq!(reader.state(), State::ErrorRecovery);

        reader.stats.telegrams = u32::MAX;
        reader.change_phase(Phase::Resending { sent: 0 });
        assert_eq!(reader.stats().telegrams, u32::MAX);
    }
}
