//! Defines the register window access that all AFU backends must implement

pub mod sim;
pub mod uio;

use thiserror::Error;

/// Errors that can be thrown while accessing a register window
#[derive(Error, Debug)]
pub enum Error {
    #[error("Offset {offset:#x} is past the end of the {size:#x} byte register window")]
    OutOfBounds { offset: u64, size: u64 },
    #[error("Offset {offset:#x} isn't aligned for a {width} byte access")]
    Unaligned { offset: u64, width: u64 },
    #[error(transparent)]
    Dfl(#[from] dfl::Error),
}

pub type MmioResult<T> = Result<T, Error>;

/// The trait that is implemented for AFU register window backends.
/// Offsets are in bytes from the start of the window and accesses must be
/// naturally aligned.
///
/// ```
/// # use afu::mmio::{sim::SimAfu, Mmio};
/// # let mut window = SimAfu::new("d8a5f9b4-2f6c-4a18-9e3b-7c41b06e55d1".parse().unwrap());
/// window.write64(0x40, 0xdead_beef).unwrap();
/// assert_eq!(window.read64(0x40).unwrap(), 0xdead_beef);
/// ```
pub trait Mmio {
    /// The size of the register window in bytes
    fn window_size(&self) -> u64;

    /// Read the 32 bit register at byte offset `offset`
    /// # Errors
    /// Returns an error on an unaligned or out of bounds access
    fn read32(&mut self, offset: u64) -> MmioResult<u32>;

    /// Write `value` to the 32 bit register at byte offset `offset`
    /// # Errors
    /// Returns an error on an unaligned or out of bounds access
    fn write32(&mut self, offset: u64, value: u32) -> MmioResult<()>;

    /// Read the 64 bit register at byte offset `offset`
    /// # Errors
    /// Returns an error on an unaligned or out of bounds access
    fn read64(&mut self, offset: u64) -> MmioResult<u64>;

    /// Write `value` to the 64 bit register at byte offset `offset`
    /// # Errors
    /// Returns an error on an unaligned or out of bounds access
    fn write64(&mut self, offset: u64, value: u64) -> MmioResult<()>;
}

/// Rejects accesses that fall outside a `size` byte window or off alignment
pub(crate) fn check_access(offset: u64, width: u64, size: u64) -> MmioResult<()> {
    if offset % width != 0 {
        return Err(Error::Unaligned { offset, width });
    }
    match offset.checked_add(width) {
        Some(end) if end <= size => Ok(()),
        _ => Err(Error::OutOfBounds { offset, size }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_access() {
        assert!(check_access(0x20, 8, 0x1000).is_ok());
        assert!(check_access(0xFF8, 8, 0x1000).is_ok());
        assert!(matches!(
            check_access(0x24, 8, 0x1000),
            Err(Error::Unaligned { offset: 0x24, .. })
        ));
        assert!(matches!(
            check_access(0x1000, 4, 0x1000),
            Err(Error::OutOfBounds { .. })
        ));
        // Offsets near the top of the address space can't wrap back in
        assert!(matches!(
            check_access(u64::MAX - 7, 8, 0x1000),
            Err(Error::OutOfBounds { .. })
        ));
    }
}
