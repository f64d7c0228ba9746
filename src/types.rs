//! This module defines range-checked types for field identifiers and the
//! inter-telegram period, meant to simplify correct usage of the API.

use snafu::{ensure, OptionExt, Snafu};

use core::convert::{TryFrom, TryInto};
use core::fmt;
use core::str::FromStr;
use core::time::Duration;

/// Error type for this module
#[derive(Debug, Snafu, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// One of the parts doesn't fit the packed field identifier.
    #[snafu(display("Invalid field identifier"))]
    InvalidFieldId,
}

const fn invalid_field_id() -> InvalidFieldIdSnafu {
    InvalidFieldIdSnafu
}

const MAJOR_MAX: u32 = 0xfff;
const MINOR_MAX: u32 = 0xff;
const MICRO_MAX: u32 = 0xff;

/// `FieldId` identifies one metered quantity by its (major, minor, micro) triple,
/// e.g. `1.8.0` for total imported energy.
///
/// The triple is packed into a single `u32` as `major << 16 | minor << 8 | micro`,
/// so major is limited to \[0, 4095\] and minor/micro to \[0, 255\].
///
/// ## Example
/// ```
/// use p1_proto::{obis, FieldId};
/// let id = FieldId::new(1, 8, 0).unwrap();
/// assert_eq!(id, obis(1, 8, 0));
/// assert_eq!(id.to_string(), "1.8.0");
/// ```
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct FieldId(u32);

/// Create a new [`FieldId`], panics if any part is out of range.
pub const fn obis(major: u32, minor: u32, micro: u32) -> FieldId {
    if major <= MAJOR_MAX && minor <= MINOR_MAX && micro <= MICRO_MAX {
        return FieldId(major << 16 | minor << 8 | micro);
    }
    panic!("Invalid field identifier.")
}

impl FieldId {
    /// Create a new field identifier, checking that every part fits the packed form.
    /// # Errors
    /// Returns [`Error::InvalidFieldId`] if a part is out of range.
    pub fn new(
        major: impl TryInto<u32>,
        minor: impl TryInto<u32>,
        micro: impl TryInto<u32>,
    ) -> Result<Self, Error> {
        let major = major.try_into().ok().with_context(invalid_field_id)?;
        let minor = minor.try_into().ok().with_context(invalid_field_id)?;
        let micro = micro.try_into().ok().with_context(invalid_field_id)?;
        ensure!(
            major <= MAJOR_MAX && minor <= MINOR_MAX && micro <= MICRO_MAX,
            invalid_field_id()
        );
        Ok(Self(major << 16 | minor << 8 | micro))
    }

    pub const fn major(self) -> u32 {
        self.0 >> 16
    }

    pub const fn minor(self) -> u32 {
        (self.0 >> 8) & MINOR_MAX
    }

    pub const fn micro(self) -> u32 {
        self.0 & MICRO_MAX
    }

    /// The packed representation.
    pub const fn packed(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.micro())
    }
}

impl fmt::Debug for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldId({} = {:#x})", self, self.0)
    }
}

impl FromStr for FieldId {
    type Err = Error;

    /// Parses the dotted `major.minor.micro` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.').map(|p| p.parse::<u32>().ok());
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Some(major)), Some(Some(minor)), Some(Some(micro)), None) => {
                Self::new(major, minor, micro)
            }
            _ => invalid_field_id().fail(),
        }
    }
}

impl TryFrom<(u32, u32, u32)> for FieldId {
    type Error = Error;

    fn try_from((major, minor, micro): (u32, u32, u32)) -> Result<Self, Self::Error> {
        Self::new(major, minor, micro)
    }
}


/// `MinimumPeriod` is the shortest time between the start of two consecutive
/// telegram reads, clamped to \[0, 120\] seconds.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Default, Hash)]
#[repr(transparent)]
pub struct MinimumPeriod(Duration);

impl MinimumPeriod {
    pub const MAX: Duration = Duration::from_secs(120);

    /// Create a new period, clamping it to the supported range.
    pub fn clamped(period: Duration) -> Self {
        if period > Self::MAX {
            log::warn!(
                "Minimum period {} ms is above the limit, using {} ms",
                period.as_millis(),
                Self::MAX.as_millis()
            );
            Self(Self::MAX)
        } else {
            Self(period)
        }
    }

    pub const fn as_duration(self) -> Duration {
        self.0
    }
}

impl From<Duration> for MinimumPeriod {
    fn from(period: Duration) -> Self {
        Self::clamped(period)
    }
}


/// Wire encoding of a telegram, detected from its first byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// Text telegram, starts with `/` and ends with `!` followed by a hex CRC line.
    Ascii,
    /// HDLC-framed binary telegram, starts and ends with the `0x7E` flag.
    Binary,
}
