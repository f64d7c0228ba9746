//! Sans-io reader for the P1 customer interface of electricity meters.
//!
//! The meter sends telegrams either as self-delimited ASCII text closed by a
//! hex CRC line, or as HDLC-framed binary data with an X.25 CRC trailer.
//! [`P1Reader`] assembles telegrams from whatever bytes the serial link has
//! available, verifies them, publishes the decoded readings into the sinks of
//! a [`Registry`], and optionally forwards the raw telegram to a secondary port.
//!
//! All work is done in [`P1Reader::tick()`], which never blocks and keeps its
//! work per call bounded, so it can share a cooperative scheduler with other tasks.
//!
//! # Example
//!
//! ```
//! use p1_proto::{obis, Config, Interface, P1Reader, Registry};
//!
//! struct Link(Vec<u8>);
//!
//! impl Interface for Link {
//!     fn read(&mut self, buf: &mut [u8]) -> usize {
//!         let len = buf.len().min(self.0.len());
//!         buf[..len].copy_from_slice(&self.0[..len]);
//!         self.0.drain(..len);
//!         len
//!     }
//!     fn write_secondary(&mut self, _data: &[u8]) {}
//!     fn set_ready_to_receive(&mut self, _active: bool) {}
//! }
//!
//! let mut registry = Registry::new();
//! let energy = registry.register(obis(1, 8, 0));
//!
//! let mut reader: P1Reader<Link> = P1Reader::new(Link(Vec::new()), registry, Config::default());
//! reader.tick();
//! assert_eq!(energy.state(), None);
//! ```

use snafu::Snafu;

pub mod ascii;
pub mod binary;
pub mod budget;
pub mod crc;
pub mod frame;
pub mod reader;
pub mod registry;
pub mod types;

pub use budget::{Clock, MonotonicClock};
pub use reader::{Config, CycleStats, Interface, P1Reader, ReaderStats, State};
pub use registry::{Registry, Sensor, Sink};
pub use types::{obis, Encoding, FieldId, MinimumPeriod};

/// Errors detected while acquiring and decoding a telegram.
///
/// None of these are fatal, the reader discards the telegram and recovers.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// The first byte of a telegram is neither `/` nor `0x7E`.
    #[snafu(display("Unrecognized telegram start byte {byte:#04x}"))]
    UnrecognizedEncoding { byte: u8 },

    /// The frame format byte of a binary telegram doesn't have type `0b101`.
    #[snafu(display("Malformed binary frame header byte {byte:#04x}"))]
    MalformedBinaryHeader { byte: u8 },

    /// Something other than the expected end of frame followed the CRC.
    #[snafu(display("Unexpected byte {byte:#04x} in telegram trailer"))]
    UnexpectedTrailer { byte: u8 },

    /// The telegram doesn't fit in the message buffer.
    #[snafu(display("Message buffer overrun, capacity is {capacity} bytes"))]
    BufferOverrun { capacity: usize },

    /// The CRC in the telegram doesn't match the content.
    #[snafu(display("CRC mismatch, telegram says {expected:04X} but calculated {computed:04X}"))]
    CrcMismatch { expected: u32, computed: u32 },

    /// The binary decoder found a data type it doesn't know the size of.
    #[snafu(display("Unsupported data tag {tag:#04x} at offset {offset}"))]
    UnsupportedTag { tag: u8, offset: usize },

    /// A data unit runs past the end of the telegram data.
    #[snafu(display("Malformed frame, data unit at offset {offset} runs past the end"))]
    MalformedFrame { offset: usize },
}
