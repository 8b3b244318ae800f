//! The core types and functions for interacting with AFU register windows
use crate::mmio::{
    Mmio,
    MmioResult,
};
use dfl::{
    dfh,
    AfuId,
    Dfh,
};
use kstring::KString;
use std::collections::HashMap;
use thiserror::Error;

/// Byte offset of the user scratch register inside the AFU's window
///
/// This has to match the address the RTL decodes. Nothing at runtime can
/// check that for us, so a device that decodes a different address just
/// fails its self-test.
pub const USER_REG_ADDR: u64 = 0x0020;

/// The representation of an internal register
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Register {
    /// The offset in the register window of this register
    pub addr: u64,
    /// The number of bytes stored at this location
    pub length: usize,
}

/// The mapping from register names and their data (address and size)
pub type RegisterMap = HashMap<KString, Register>;

/// The registers every scratch-register AFU exposes
#[must_use]
pub fn afu_registers() -> RegisterMap {
    HashMap::from([
        (
            KString::from_static("dfh"),
            Register {
                addr: dfh::BASE,
                length: 8,
            },
        ),
        (
            KString::from_static("afu_id_l"),
            Register {
                addr: dfh::AFU_ID_L,
                length: 8,
            },
        ),
        (
            KString::from_static("afu_id_h"),
            Register {
                addr: dfh::AFU_ID_H,
                length: 8,
            },
        ),
        (
            KString::from_static("user_reg"),
            Register {
                addr: USER_REG_ADDR,
                length: 8,
            },
        ),
    ])
}

/// Ways acquiring an accelerator can fail
///
/// The display strings are the exact lines operators grep for in logs, so
/// change them with care.
#[derive(Error, Debug)]
pub enum AcquireError {
    /// Every device carrying the requested function is already claimed
    #[error("All FPGAs busy.")]
    Busy,
    /// No device carries the requested function
    #[error("FPGA with accelerator {0} not found.")]
    NotFound(AfuId),
    /// The platform has no FPGA driver to enumerate devices with
    #[error("No FPGA driver found.")]
    NoDriver,
    /// Anything else the platform threw at us
    #[error("{0}")]
    Other(String),
}

/// Reads the accelerator's 128 bit identity from its identity registers
/// # Errors
/// Returns an error on a bad register window
pub fn read_afu_id<M>(mmio: &mut M) -> MmioResult<AfuId>
where
    M: Mmio,
{
    let lo = mmio.read64(dfh::AFU_ID_L)?;
    let hi = mmio.read64(dfh::AFU_ID_H)?;
    Ok(AfuId::from_words(hi, lo))
}

/// Walks the device feature chain, returning each feature's offset and header
/// # Errors
/// Returns an error on a bad register window, a header we can't interpret,
/// or a chain that never terminates
pub fn walk_features<M>(mmio: &mut M) -> MmioResult<Vec<(u64, Dfh)>>
where
    M: Mmio,
{
    let mut features = Vec::new();
    let mut offset = dfh::BASE;
    loop {
        if features.len() >= dfh::MAX_FEATURES {
            return Err(dfl::Error::ChainTooLong(dfh::MAX_FEATURES).into());
        }
        let header = Dfh::from_word(mmio.read64(offset)?)?;
        let kind = header.feature_type()?;
        tracing::debug!(
            "Feature {} at {offset:#x}: {kind} id {:#x} rev {}",
            features.len(),
            header.feature_id(),
            header.revision()
        );
        let last = header.eol() || header.next_offset() == 0;
        let next = offset + header.next_offset();
        features.push((offset, header));
        if last {
            break;
        }
        offset = next;
    }
    Ok(features)
}
