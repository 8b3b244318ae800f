//! The Device Feature Header that introduces every feature in a DFL chain

use crate::Error;
use num_derive::{
    FromPrimitive,
    ToPrimitive,
};
use num_traits::{
    FromPrimitive as _,
    ToPrimitive as _,
};
use packed_struct::prelude::*;
use std::fmt::Display;

/// Byte offset of the first DFH in a register window
pub const BASE: u64 = 0x00;
/// Byte offset of the low AFU identity word, relative to the feature's DFH
pub const AFU_ID_L: u64 = 0x08;
/// Byte offset of the high AFU identity word, relative to the feature's DFH
pub const AFU_ID_H: u64 = 0x10;
/// Headers to walk before declaring the chain broken
pub const MAX_FEATURES: usize = 64;

/// The kind of feature a header introduces
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum FeatureType {
    /// An accelerator function unit
    Afu = 1,
    /// A basic building block
    Bbb = 2,
    /// A private feature
    Private = 3,
    /// The FPGA interface unit itself
    Fiu = 4,
}

impl Display for FeatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FeatureType::Afu => "AFU",
            FeatureType::Bbb => "BBB",
            FeatureType::Private => "private",
            FeatureType::Fiu => "FIU",
        };
        write!(f, "{s}")
    }
}

/// A 64 bit Device Feature Header
///
/// Each feature in the window starts with one of these. The next offset is
/// relative to the header itself, and a set EOL bit (or a zero next offset)
/// ends the chain.
#[derive(PackedStruct, Debug, Clone, Copy)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "8", endian = "msb")]
pub struct Dfh {
    #[packed_field(bits = "60..=63")]
    feature_type: Integer<u8, packed_bits::Bits<4>>,
    #[packed_field(bits = "52..=59")]
    version: Integer<u8, packed_bits::Bits<8>>,
    #[packed_field(bits = "40")]
    eol: bool,
    #[packed_field(bits = "16..=39")]
    next_offset: Integer<u32, packed_bits::Bits<24>>,
    #[packed_field(bits = "12..=15")]
    revision: Integer<u8, packed_bits::Bits<4>>,
    #[packed_field(bits = "0..=11")]
    feature_id: Integer<u16, packed_bits::Bits<12>>,
}

impl Dfh {
    /// Builds a header for a feature, leaving the version at zero
    #[must_use]
    pub fn new(
        feature_type: FeatureType,
        feature_id: u16,
        revision: u8,
        next_offset: u32,
        eol: bool,
    ) -> Self {
        Self {
            feature_type: feature_type
                .to_u8()
                .expect("Feature types always fit in a nibble")
                .into(),
            version: 0.into(),
            eol,
            next_offset: next_offset.into(),
            revision: revision.into(),
            feature_id: feature_id.into(),
        }
    }

    /// Interprets a register word as a header, rejecting unknown feature types
    ///
    /// # Errors
    /// Returns an error if the feature type nibble isn't one we know about
    pub fn from_word(word: u64) -> Result<Self, Error> {
        let dfh = Self::unpack(&word.to_be_bytes())?;
        dfh.feature_type()?;
        Ok(dfh)
    }

    /// Packs this header back into its register word form
    ///
    /// # Errors
    /// Returns an error if the fields fail to pack
    pub fn to_word(&self) -> Result<u64, Error> {
        Ok(u64::from_be_bytes(self.pack()?))
    }

    /// The kind of feature this header introduces
    ///
    /// # Errors
    /// Returns an error if the feature type nibble isn't one we know about
    pub fn feature_type(&self) -> Result<FeatureType, Error> {
        let raw: u8 = self.feature_type.into();
        FeatureType::from_u8(raw).ok_or(Error::BadFeatureType(raw))
    }

    /// The feature's id within its type
    #[must_use]
    pub fn feature_id(&self) -> u16 {
        self.feature_id.into()
    }

    /// The feature's revision
    #[must_use]
    pub fn revision(&self) -> u8 {
        self.revision.into()
    }

    /// The DFH layout version
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version.into()
    }

    /// Byte offset of the next header, relative to this one
    #[must_use]
    pub fn next_offset(&self) -> u64 {
        let next: u32 = self.next_offset.into();
        u64::from(next)
    }

    /// Whether this header ends the chain
    #[must_use]
    pub fn eol(&self) -> bool {
        self.eol
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_roundtrip() {
        let dfh = Dfh::new(FeatureType::Bbb, 0x123, 2, 0x5678, false);
        let word = dfh.to_word().unwrap();
        let back = Dfh::from_word(word).unwrap();
        assert_eq!(back.feature_type().unwrap(), FeatureType::Bbb);
        assert_eq!(back.feature_id(), 0x123);
        assert_eq!(back.revision(), 2);
        assert_eq!(back.version(), 0);
        assert_eq!(back.next_offset(), 0x5678);
        assert!(!back.eol());
    }

    #[test]
    fn test_known_word_unpacks() {
        // An AFU header with EOL set and everything else zero
        let word = (1u64 << 60) | (1u64 << 40);
        let dfh = Dfh::from_word(word).unwrap();
        assert_eq!(dfh.feature_type().unwrap(), FeatureType::Afu);
        assert!(dfh.eol());
        assert_eq!(dfh.feature_id(), 0);
        assert_eq!(dfh.next_offset(), 0);
    }

    #[test]
    fn test_bad_feature_type() {
        assert!(matches!(Dfh::from_word(0), Err(Error::BadFeatureType(0))));
        assert!(matches!(
            Dfh::from_word(5u64 << 60),
            Err(Error::BadFeatureType(5))
        ));
    }

    #[test]
    fn test_field_packing_positions() {
        let word = Dfh::new(FeatureType::Private, 0xABC, 0xF, 0x1234, true)
            .to_word()
            .unwrap();
        assert_eq!(word >> 60, 3);
        assert_eq!((word >> 52) & 0xFF, 0);
        assert_eq!((word >> 40) & 1, 1);
        assert_eq!((word >> 16) & 0xFF_FFFF, 0x1234);
        assert_eq!((word >> 12) & 0xF, 0xF);
        assert_eq!(word & 0xFFF, 0xABC);
        // The whole word, to pin the byte order of the multi-byte fields
        assert_eq!(
            word,
            (3u64 << 60) | (1u64 << 40) | (0x1234u64 << 16) | (0xFu64 << 12) | 0xABC
        );
    }
}
