//! Checksums for the two telegram encodings.
//!
//! ASCII telegrams use CRC-16/ARC (polynomial 0x8005 reflected, initial value 0),
//! binary telegrams use the HDLC frame check sequence, CRC-16/X-25.

use crc::{Crc, CRC_16_ARC, CRC_16_IBM_SDLC};
use snafu::ensure;

use crate::types::Encoding;
use crate::{CrcMismatchSnafu, Error};

const ASCII_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);
const BINARY_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// CRC of an ASCII telegram, computed from the `/` up to and including the `!`.
pub fn ascii_crc(data: &[u8]) -> u16 {
    ASCII_CRC.checksum(data)
}

/// CRC of a binary telegram, computed over the frame without the opening flag.
pub fn binary_crc(data: &[u8]) -> u16 {
    BINARY_CRC.checksum(data)
}

/// Parses the hex text of an ASCII CRC line.
///
/// Leading whitespace and an optional `0x` or `0X` prefix are skipped, and parsing
/// stops at the first non hex digit. A line without digits yields 0, and a value
/// too large for a CRC saturates so that it never matches. Signs are not accepted.
pub fn parse_ascii_trailer(trailer: &[u8]) -> u32 {
    let start = trailer
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(trailer.len());
    let digits = match &trailer[start..] {
        [b'0', b'x' | b'X', rest @ ..] => rest,
        digits => digits,
    };
    digits
        .iter()
        .map_while(|b| (*b as char).to_digit(16))
        .fold(0u32, |acc, digit| acc.saturating_mul(16).saturating_add(digit))
}

/// Verifies the CRC of a complete frame.
///
/// `crc_boundary` is the offset of the first trailer byte. For ASCII frames the
/// trailer is the hex CRC line, for binary frames it's the little endian CRC.
///
/// # Errors
/// Returns [`Error::CrcMismatch`] if the calculated CRC differs from the one in the frame,
/// or [`Error::MalformedFrame`] if the binary trailer is cut short.
pub fn verify(encoding: Encoding, frame: &[u8], crc_boundary: usize) -> Result<(), Error> {
    let (expected, computed) = match encoding {
        Encoding::Ascii => (
            parse_ascii_trailer(&frame[crc_boundary..]),
            ascii_crc(&frame[..crc_boundary]),
        ),
        Encoding::Binary => {
            let trailer = frame
                .get(crc_boundary..crc_boundary + 2)
                .filter(|_| crc_boundary >= 1)
                .ok_or(Error::MalformedFrame {
                    offset: crc_boundary,
                })?;
            (
                u32::from(u16::from_le_bytes([trailer[0], trailer[1]])),
                binary_crc(&frame[1..crc_boundary]),
            )
        }
    };
    let computed = u32::from(computed);
    ensure!(expected == computed, CrcMismatchSnafu { expected, computed });
    Ok(())
}
