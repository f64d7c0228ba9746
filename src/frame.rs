//! Incremental telegram framing.
//!
//! [`FrameReader`] is fed one byte at a time and keeps all its progress between
//! calls, so a telegram can arrive spread over any number of reads.

use arrayvec::ArrayVec;
use core::ops::Deref;
use snafu::ensure;

use crate::types::Encoding;
use crate::{
    BufferOverrunSnafu, Error, MalformedBinaryHeaderSnafu, UnexpectedTrailerSnafu,
    UnrecognizedEncodingSnafu,
};

/// Capacity of the message buffer, large enough for the telegrams of common meters.
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

pub(crate) const ASCII_START: u8 = b'/';
pub(crate) const ASCII_END: u8 = b'!';
pub(crate) const HDLC_FLAG: u8 = 0x7E;

// Frame format type 3 in the top bits of the first HDLC header byte.
const HDLC_FORMAT_TYPE: u8 = 0b101;
// Longest CRC line accepted after the `!`, including the CR.
const ASCII_TRAILER_MAX: usize = 8;

/// Fixed capacity store for the raw telegram.
#[derive(Debug, Clone)]
pub struct MessageBuffer<const N: usize = DEFAULT_BUFFER_SIZE> {
    data: ArrayVec<u8, N>,
}

impl<const N: usize> MessageBuffer<N> {
    pub fn new() -> Self {
        Self {
            data: ArrayVec::new(),
        }
    }

    /// Append a byte.
    /// # Errors
    /// Returns [`Error::BufferOverrun`] if the buffer is full.
    pub fn push(&mut self, byte: u8) -> Result<(), Error> {
        self.data
            .try_push(byte)
            .map_err(|_| BufferOverrunSnafu { capacity: N }.build())
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for MessageBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Deref for MessageBuffer<N> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl<const N: usize> AsRef<[u8]> for MessageBuffer<N> {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Assembles one telegram at a time from a byte stream.
#[derive(Debug, Clone, Default)]
pub struct FrameReader<const N: usize = DEFAULT_BUFFER_SIZE> {
    buffer: MessageBuffer<N>,
    encoding: Option<Encoding>,
    crc_boundary: Option<usize>,
    complete: bool,
}

impl<const N: usize> FrameReader<N> {
    pub fn new() -> Self {
        Self {
            buffer: MessageBuffer::new(),
            encoding: None,
            crc_boundary: None,
            complete: false,
        }
    }

    /// Forget the current telegram and prepare for a new one.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.encoding = None;
        self.crc_boundary = None;
        self.complete = false;
    }

    /// Feed one byte. Returns true when the byte completed the frame.
    ///
    /// Bytes pushed after completion are ignored until [`reset()`](Self::reset()).
    ///
    /// # Errors
    /// Returns an error if the byte can't be part of a valid telegram. The frame
    /// should be reset before it's fed again.
    pub fn push(&mut self, byte: u8) -> Result<bool, Error> {
        if self.complete {
            return Ok(true);
        }
        let encoding = match self.encoding {
            Some(encoding) => encoding,
            None => {
                let encoding = match byte {
                    ASCII_START => Encoding::Ascii,
                    HDLC_FLAG => Encoding::Binary,
                    _ => return UnrecognizedEncodingSnafu { byte }.fail(),
                };
                log::debug!("Receiving {:?} telegram", encoding);
                self.encoding = Some(encoding);
                encoding
            }
        };

        self.buffer.push(byte)?;
        self.complete = match encoding {
            Encoding::Ascii => self.push_ascii(byte)?,
            Encoding::Binary => self.push_binary(byte)?,
        };
        Ok(self.complete)
    }

    fn push_ascii(&mut self, byte: u8) -> Result<bool, Error> {
        let len = self.buffer.len();
        match self.crc_boundary {
            None => {
                if byte == ASCII_END {
                    self.crc_boundary = Some(len);
                }
                Ok(false)
            }
            Some(_) if byte == b'\n' => Ok(true),
            Some(boundary) => {
                ensure!(len - boundary <= ASCII_TRAILER_MAX, UnexpectedTrailerSnafu { byte });
                Ok(false)
            }
        }
    }

    fn push_binary(&mut self, byte: u8) -> Result<bool, Error> {
        let index = self.buffer.len() - 1;
        match (index, self.crc_boundary) {
            (1, _) => {
                ensure!(
                    byte >> 5 == HDLC_FORMAT_TYPE,
                    MalformedBinaryHeaderSnafu { byte }
                );
                Ok(false)
            }
            (2, _) => {
                let frame_length = usize::from(self.buffer[1] & 0x1F) << 8 | usize::from(byte);
                // The length covers at least the header and the CRC.
                ensure!(frame_length > 3, MalformedBinaryHeaderSnafu { byte });
                self.crc_boundary = Some(frame_length - 1);
                Ok(false)
            }
            (index, Some(boundary)) if index == boundary + 2 => {
                ensure!(byte == HDLC_FLAG, UnexpectedTrailerSnafu { byte });
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The encoding of the current telegram, `None` until the first byte is seen.
    pub fn encoding(&self) -> Option<Encoding> {
        self.encoding
    }

    /// Offset of the first CRC trailer byte, once it is known.
    pub fn crc_boundary(&self) -> Option<usize> {
        self.crc_boundary
    }

    /// The bytes received so far.
    pub fn buffer(&self) -> &MessageBuffer<N> {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
