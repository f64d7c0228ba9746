//! Decoder for verified binary telegrams.
//!
//! The payload is a flat sequence of tagged data units. An octet string of
//! length 6 carries the field identifier (the logical name) of the numeric
//! unit following it. Nested arrays and structures are not walked, their
//! headers are skipped like any other fixed size unit.

use snafu::OptionExt;

use crate::budget::{Budget, Clock, Progress};
use crate::registry::Registry;
use crate::types::{obis, FieldId};
use crate::{Error, MalformedFrameSnafu, UnsupportedTagSnafu};

// Offset of the first byte after the frame format and length.
const HEADER_LEN: usize = 3;
// Control field ending the HDLC address part.
const CONTROL: u8 = 0x13;
// From the control field to the first data unit: control, HCS and LLC header.
const CONTROL_TO_DATA: usize = 6;

mod tags {
    pub const NULL: u8 = 0x00;
    pub const ARRAY: u8 = 0x01;
    pub const STRUCTURE: u8 = 0x02;
    pub const UNSIGNED_32: u8 = 0x06;
    pub const OCTET_STRING: u8 = 0x09;
    pub const STRING: u8 = 0x0A;
    pub const DATE_TIME: u8 = 0x0C;
    pub const SCALAR: u8 = 0x0F;
    pub const UNSIGNED_16: u8 = 0x10;
    pub const SIGNED_16: u8 = 0x12;
    pub const ENUM: u8 = 0x16;
}

/// Resumable data unit decoder.
#[derive(Debug, Clone, Default)]
pub struct BinaryDecoder {
    cursor: Option<usize>,
    current: Option<FieldId>,
    published: u32,
}

impl BinaryDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode data units of `telegram` up to `crc_boundary`, or until the budget
    /// runs out. At least one unit is handled per call.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedTag`] for a data type of unknown size and
    /// [`Error::MalformedFrame`] if a unit doesn't fit before the CRC.
    pub fn decode<C: Clock + ?Sized>(
        &mut self,
        telegram: &[u8],
        crc_boundary: usize,
        registry: &Registry,
        budget: &Budget<'_, C>,
    ) -> Result<Progress, Error> {
        let data = &telegram[..crc_boundary.min(telegram.len())];
        let mut cursor = match self.cursor {
            Some(cursor) => cursor,
            None => Self::start_of_data(data)?,
        };

        while cursor < data.len() {
            cursor += self.decode_unit(data, cursor, registry)?;
            self.cursor = Some(cursor);
            if budget.exhausted() {
                return Ok(Progress::Pending);
            }
        }
        self.cursor = Some(cursor);
        Ok(Progress::Done)
    }

    fn start_of_data(data: &[u8]) -> Result<usize, Error> {
        let control = data
            .iter()
            .skip(HEADER_LEN)
            .position(|b| *b == CONTROL)
            .context(MalformedFrameSnafu {
                offset: HEADER_LEN,
            })?;
        Ok(HEADER_LEN + control + CONTROL_TO_DATA)
    }

    /// Decode the unit at `offset`, returning its length.
    fn decode_unit(
        &mut self,
        data: &[u8],
        offset: usize,
        registry: &Registry,
    ) -> Result<usize, Error> {
        let tag = data[offset];
        let len = match tag {
            tags::NULL => 1,
            tags::ARRAY | tags::STRUCTURE | tags::SCALAR | tags::ENUM => 2,
            tags::UNSIGNED_16 | tags::SIGNED_16 => 3,
            tags::UNSIGNED_32 => 5,
            tags::DATE_TIME => 13,
            tags::OCTET_STRING | tags::STRING => {
                let len = data.get(offset + 1).context(MalformedFrameSnafu { offset })?;
                2 + usize::from(*len)
            }
            _ => return UnsupportedTagSnafu { tag, offset }.fail(),
        };
        let unit = data
            .get(offset..offset + len)
            .context(MalformedFrameSnafu { offset })?;

        match tag {
            tags::OCTET_STRING if unit[1] == 6 => {
                self.current = Some(obis(
                    u32::from(unit[4]),
                    u32::from(unit[5]),
                    u32::from(unit[6]),
                ));
            }
            tags::UNSIGNED_32 => {
                let raw = u32::from_be_bytes([unit[1], unit[2], unit[3], unit[4]]);
                self.publish(f64::from(raw) / 1000.0, registry);
            }
            tags::UNSIGNED_16 => {
                let raw = u16::from_be_bytes([unit[1], unit[2]]);
                self.publish(f64::from(raw) / 10.0, registry);
            }
            tags::SIGNED_16 => {
                let raw = i16::from_be_bytes([unit[1], unit[2]]);
                self.publish(f64::from(raw) / 10.0, registry);
            }
            _ => {}
        }
        Ok(len)
    }

    fn publish(&mut self, value: f64, registry: &Registry) {
        match self.current.take() {
            Some(id) => {
                if registry.publish(id, value) {
                    self.published += 1;
                }
            }
            None => log::debug!("Value {} without field identifier", value),
        }
    }

    /// Number of values published to the registry so far.
    pub fn published(&self) -> u32 {
        self.published
    }
}
