//! Decoder for verified ASCII telegrams.
//!
//! Each data line of the form `1-0:<major>.<minor>.<micro>(<value>...` is
//! published to the sink registered for its field. All other lines, like the
//! identification header or `0-0:` metadata, are skipped.

use nom::bytes::complete::tag;
use nom::character::complete::{char, u32};
use nom::number::complete::double;
use nom::sequence::{preceded, tuple};
use nom::IResult;

use crate::budget::{Budget, Clock, Progress};
use crate::registry::Registry;
use crate::types::FieldId;

type Buf = [u8];

fn is_eol(c: u8) -> bool {
    c == b'\r' || c == b'\n'
}

/// Parse one data line into its field parts and value.
fn data_line(buf: &Buf) -> IResult<&Buf, (u32, u32, u32, f64)> {
    tuple((
        preceded(tag("1-0:"), u32),
        preceded(char('.'), u32),
        preceded(char('.'), u32),
        preceded(char('('), double),
    ))(buf)
}

/// Resumable line by line decoder.
#[derive(Debug, Clone)]
pub struct AsciiDecoder {
    cursor: usize,
    published: u32,
}

impl Default for AsciiDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AsciiDecoder {
    pub fn new() -> Self {
        // Skip the leading '/'
        Self {
            cursor: 1,
            published: 0,
        }
    }

    /// Decode lines of `telegram` until the `!` at `crc_boundary - 1` is reached
    /// or the budget runs out. At least one line is handled per call.
    pub fn decode<C: Clock + ?Sized>(
        &mut self,
        telegram: &[u8],
        crc_boundary: usize,
        registry: &Registry,
        budget: &Budget<'_, C>,
    ) -> Progress {
        let end = crc_boundary.saturating_sub(1).min(telegram.len());
        loop {
            while self.cursor < end && is_eol(telegram[self.cursor]) {
                self.cursor += 1;
            }
            if self.cursor >= end {
                return Progress::Done;
            }

            let line_end = telegram[self.cursor..end]
                .iter()
                .position(|c| is_eol(*c))
                .map_or(end, |len| self.cursor + len);
            let line = &telegram[self.cursor..line_end];
            self.cursor = line_end;

            if self.decode_line(line, registry) {
                self.published += 1;
            }

            if budget.exhausted() {
                return Progress::Pending;
            }
        }
    }

    fn decode_line(&self, line: &[u8], registry: &Registry) -> bool {
        let (major, minor, micro, value) = match data_line(line) {
            Ok((_, parts)) => parts,
            Err(_) => {
                log::debug!(
                    "Could not parse value from line '{}'",
                    String::from_utf8_lossy(line)
                );
                return false;
            }
        };
        match FieldId::new(major, minor, micro) {
            Ok(id) => registry.publish(id, value),
            Err(_) => {
                log::debug!("Field {}.{}.{} out of range", major, minor, micro);
                false
            }
        }
    }

    /// Number of values published to the registry so far.
    pub fn published(&self) -> u32 {
        self.published
    }

    /// Offset of the next byte to decode.
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::MonotonicClock;
    use crate::types::obis;
    use core::cell::Cell;
    use std::time::{Duration, Instant};

    const TELEGRAM: &[u8] = b"/ISK5\\2M550T-1003\r\n\
        \r\n\
        1-3:0.2.8(50)\r\n\
        0-0:1.0.0(220101120000W)\r\n\
        1-0:1.8.0(00123.456*kWh)\r\n\
        1-0:2.8.0(00000.000*kWh)\r\n\
        1-0:1.7.0(01.234*kW)\r\n\
        1-0:32.7.0(229.8*V)\r\n\
        1-0:31.7.0(002*A)\r\n\
        1-0:99.97.0()\r\n\
        !";

    fn decode_all(registry: &Registry) -> AsciiDecoder {
        let mut decoder = AsciiDecoder::new();
        let budget = Budget::new(&MonotonicClock, Duration::from_secs(60));
        assert_eq!(
            decoder.decode(TELEGRAM, TELEGRAM.len(), registry, &budget),
            Progress::Done
        );
        decoder
    }

    #[test]
    fn test_data_line() {
        assert_eq!(
            data_line(b"1-0:1.8.0(00123.456*kWh)"),
            Ok((&b"*kWh)"[..], (1, 8, 0, 123.456)))
        );
        assert_eq!(
            data_line(b"1-0:32.7.0(229.8*V)"),
            Ok((&b"*V)"[..], (32, 7, 0, 229.8)))
        );
        assert!(data_line(b"0-0:1.0.0(220101120000W)").is_err());
        assert!(data_line(b"1-0:99.97.0()").is_err());
        assert!(data_line(b"/ISK5\\2M550T-1003").is_err());
    }

    #[test]
    fn test_decode_publishes_registered() {
        let mut registry = Registry::new();
        let energy = registry.register(obis(1, 8, 0));
        let power = registry.register(obis(1, 7, 0));
        let voltage = registry.register(obis(32, 7, 0));
        let current = registry.register(obis(31, 7, 0));
        let unused = registry.register(obis(3, 8, 0));

        let decoder = decode_all(&registry);
        assert_eq!(decoder.published(), 4);
        assert_eq!(energy.state(), Some(123.456));
        assert_eq!(power.state(), Some(1.234));
        assert_eq!(voltage.state(), Some(229.8));
        assert_eq!(current.state(), Some(2.0));
        assert_eq!(unused.state(), None);
    }

    #[test]
    fn test_decode_stops_at_terminator() {
        let telegram = b"/X\r\n1-0:1.8.0(1.5*kWh)\r\n!1-0:2.8.0(9.0*kWh)\r\n";
        let boundary = telegram.iter().position(|c| *c == b'!').unwrap() + 1;
        let mut registry = Registry::new();
        let import = registry.register(obis(1, 8, 0));
        let export = registry.register(obis(2, 8, 0));

        let mut decoder = AsciiDecoder::new();
        let budget = Budget::new(&MonotonicClock, Duration::from_secs(60));
        assert_eq!(
            decoder.decode(telegram, boundary, &registry, &budget),
            Progress::Done
        );
        assert_eq!(import.state(), Some(1.5));
        assert_eq!(export.state(), None);
    }

    struct Stepping(Cell<Instant>);

    impl Clock for Stepping {
        fn now(&self) -> Instant {
            let now = self.0.get();
            self.0.set(now + Duration::from_millis(10));
            now
        }
    }

    #[test]
    fn test_decode_resumes() {
        let mut registry = Registry::new();
        let energy = registry.register(obis(1, 8, 0));
        let current = registry.register(obis(31, 7, 0));

        let clock = Stepping(Cell::new(Instant::now()));
        let mut decoder = AsciiDecoder::new();
        let mut calls = 0;
        loop {
            // Every budget runs out after one line
            let budget = Budget::new(&clock, Duration::from_millis(5));
            calls += 1;
            let cursor = decoder.cursor();
            match decoder.decode(TELEGRAM, TELEGRAM.len(), &registry, &budget) {
                Progress::Done => break,
                Progress::Pending => assert!(decoder.cursor() > cursor),
            }
        }
        // Nine lines after the '/', one per call, plus the call finding the end
        assert_eq!(calls, 10);
        assert_eq!(energy.state(), Some(123.456));
        assert_eq!(current.state(), Some(2.0));
    }
}
