//! Types for the Device Feature List structures that DFL FPGA devices expose.
//! A DFL device lays its register window out as a chain of features, each
//! introduced by a 64 bit Device Feature Header, and an accelerator function
//! additionally advertises a 128 bit identity just after its header. This
//! crate owns those bit layouts and the textual identity form; it never
//! touches hardware itself.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod afu_id;
pub mod dfh;

pub use afu_id::AfuId;
pub use dfh::{
    Dfh,
    FeatureType,
};

use thiserror::Error;

/// Errors that can be thrown while interpreting DFL structures
#[derive(Error, Debug)]
pub enum Error {
    #[error("We expected an AFU ID in 8-4-4-4-12 hex form, but got back something invalid: {0}")]
    BadAfuId(String),
    #[error("The feature type nibble wasn't one we know about - {0:#x}")]
    BadFeatureType(u8),
    #[error("The feature chain didn't terminate after {0} headers")]
    ChainTooLong(usize),
    #[error(transparent)]
    Packing(#[from] packed_struct::PackingError),
}
