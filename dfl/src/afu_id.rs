//! AFU identity values and their canonical textual form

use crate::Error;
use nom::{
    bytes::complete::{
        tag,
        take_while_m_n,
    },
    combinator::{
        all_consuming,
        map_res,
    },
    IResult,
};
use std::{
    fmt::Display,
    str::FromStr,
};

/// The 128 bit identity of an accelerator function, stored as the two 64 bit
/// words the hardware serves it up as.
///
/// The textual form is the usual 8-4-4-4-12 lowercase hex, with the first
/// three groups making up the high word and the last two the low word.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AfuId {
    hi: u64,
    lo: u64,
}

impl AfuId {
    /// Builds an [`AfuId`] from the two identity register words
    #[must_use]
    pub const fn from_words(hi: u64, lo: u64) -> Self {
        Self { hi, lo }
    }

    /// The word the low identity register holds
    #[must_use]
    pub const fn lo(&self) -> u64 {
        self.lo
    }

    /// The word the high identity register holds
    #[must_use]
    pub const fn hi(&self) -> u64 {
        self.hi
    }
}

impl Display for AfuId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            self.hi >> 32,
            (self.hi >> 16) & 0xFFFF,
            self.hi & 0xFFFF,
            self.lo >> 48,
            self.lo & 0xFFFF_FFFF_FFFF
        )
    }
}

fn from_hex(input: &str) -> Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(input, 16)
}

/// Parses exactly `n` hex digits into their value
fn hex_chunk(input: &str, n: usize) -> IResult<&str, u64> {
    map_res(
        take_while_m_n(n, n, |c: char| c.is_ascii_hexdigit()),
        from_hex,
    )(input)
}

fn afu_id(input: &str) -> IResult<&str, AfuId> {
    let (remaining, a) = hex_chunk(input, 8)?;
    let (remaining, _) = tag("-")(remaining)?;
    let (remaining, b) = hex_chunk(remaining, 4)?;
    let (remaining, _) = tag("-")(remaining)?;
    let (remaining, c) = hex_chunk(remaining, 4)?;
    let (remaining, _) = tag("-")(remaining)?;
    let (remaining, d) = hex_chunk(remaining, 4)?;
    let (remaining, _) = tag("-")(remaining)?;
    let (remaining, e) = hex_chunk(remaining, 12)?;
    let hi = (a << 32) | (b << 16) | c;
    let lo = (d << 48) | e;
    Ok((remaining, AfuId::from_words(hi, lo)))
}

impl FromStr for AfuId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (_, id) = all_consuming(afu_id)(s).map_err(|_| Error::BadAfuId(s.to_owned()))?;
        Ok(id)
    }
}
