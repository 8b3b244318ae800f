//! UIO transport where we have access to a DFL port's register window
//! through its `/dev/uioN` node

// Register offsets are window-relative and far below 2^32, so usize casts are lossless
#![allow(clippy::cast_possible_truncation)]

use super::{
    check_access,
    Mmio,
    MmioResult,
};
use crate::core::AcquireError;
use dfl::{
    dfh,
    AfuId,
    Dfh,
    FeatureType,
};
use memmap2::{
    MmapMut,
    MmapOptions,
};
use nix::{
    errno::Errno,
    fcntl::{
        Flock,
        FlockArg,
    },
};
use std::{
    fs::{
        self,
        File,
    },
    io::ErrorKind,
    path::{
        Path,
        PathBuf,
    },
};

/// Where the kernel publishes UIO devices
pub const SYSFS_UIO: &str = "/sys/class/uio";
/// Where the device nodes themselves live
pub const DEVFS: &str = "/dev";

/// The smallest window that can span the header, identity, and user register
const MIN_WINDOW: u64 = 0x28;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("File IO error - {0}")]
    IO(#[from] std::io::Error),
    #[error("We expected a hex map size, but got back something invalid: {0}")]
    BadMapSize(String),
}

impl From<Error> for AcquireError {
    fn from(e: Error) -> Self {
        AcquireError::Other(e.to_string())
    }
}

/// A UIO device that might be one of ours
#[derive(Debug)]
struct Candidate {
    name: String,
    dev: PathBuf,
    size: u64,
}

/// What claiming a candidate turned up
enum Claim {
    Acquired(UioAfu),
    Mismatch,
    Busy,
}

/// An exclusive hold on an AFU's register window via `/dev/uioN`
///
/// The hold is an advisory `flock` on the device node, so everything else
/// that wants the accelerator has to play the same game. Dropping this
/// releases the window and the lock.
#[derive(Debug)]
pub struct UioAfu {
    mem: MmapMut,
    size: u64,
    path: PathBuf,
    _lock: Flock<File>,
}

impl UioAfu {
    /// Scan `sysfs` for UIO devices and claim the first free one carrying the
    /// function `id`.
    ///
    /// Note: This may require some udev permission bologna on the device
    /// nodes.
    /// # Errors
    /// Returns [`AcquireError::NoDriver`] when `sysfs` doesn't exist,
    /// [`AcquireError::Busy`] when every carrier of `id` is already held, and
    /// [`AcquireError::NotFound`] when nothing carries `id` at all
    pub fn acquire(id: &AfuId, sysfs: &Path, devfs: &Path) -> Result<Self, AcquireError> {
        let entries = match fs::read_dir(sysfs) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(AcquireError::NoDriver),
            Err(e) => return Err(Error::IO(e).into()),
        };
        let mut entries: Vec<_> = entries.flatten().collect();
        entries.sort_by_key(std::fs::DirEntry::file_name);

        let mut matched_busy = 0usize;
        for entry in &entries {
            let candidate = match probe(entry, devfs) {
                Ok(candidate) => candidate,
                Err(e) => {
                    tracing::debug!(
                        "Skipping {}: {e}",
                        entry.file_name().to_string_lossy()
                    );
                    continue;
                }
            };
            tracing::debug!(
                "Probing {} ({}, {:#x} byte window)",
                candidate.dev.display(),
                candidate.name,
                candidate.size
            );
            match claim(&candidate, id) {
                Ok(Claim::Acquired(afu)) => {
                    tracing::debug!("Acquired {}", afu.path.display());
                    return Ok(afu);
                }
                Ok(Claim::Busy) => matched_busy += 1,
                Ok(Claim::Mismatch) => {}
                Err(e) => tracing::warn!("Skipping {}: {e}", candidate.dev.display()),
            }
        }
        if matched_busy > 0 {
            Err(AcquireError::Busy)
        } else {
            Err(AcquireError::NotFound(*id))
        }
    }

    /// The device node this window came from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UioAfu {
    fn drop(&mut self) {
        tracing::debug!("Releasing {}", self.path.display());
    }
}

/// Reads a UIO sysfs entry's name and first map size
fn probe(entry: &fs::DirEntry, devfs: &Path) -> Result<Candidate, Error> {
    let sysfs_path = entry.path();
    let name = fs::read_to_string(sysfs_path.join("name"))?.trim().to_owned();
    let size = parse_map_size(&fs::read_to_string(sysfs_path.join("maps/map0/size"))?)?;
    Ok(Candidate {
        name,
        dev: devfs.join(entry.file_name()),
        size,
    })
}

fn parse_map_size(raw: &str) -> Result<u64, Error> {
    let trimmed = raw.trim();
    u64::from_str_radix(trimmed.trim_start_matches("0x"), 16)
        .map_err(|_| Error::BadMapSize(trimmed.to_owned()))
}

/// Maps a candidate's window, checks its identity, and takes the lock
fn claim(candidate: &Candidate, id: &AfuId) -> Result<Claim, Error> {
    if candidate.size < MIN_WINDOW {
        return Ok(Claim::Mismatch);
    }
    let file = File::options()
        .read(true)
        .write(true)
        .open(&candidate.dev)?;
    let mem = unsafe {
        MmapOptions::new()
            .len(candidate.size as usize)
            .map(&file)?
            .make_mut()?
    };
    // Safety: the window is at least MIN_WINDOW bytes and the header and
    // identity offsets are 8 byte aligned
    let word = unsafe {
        std::ptr::read_volatile(mem.as_ptr().add(dfh::BASE as usize).cast::<u64>())
    };
    // A window that doesn't open with an AFU feature header isn't ours
    let Ok(header) = Dfh::from_word(word) else {
        return Ok(Claim::Mismatch);
    };
    if !matches!(header.feature_type(), Ok(FeatureType::Afu)) {
        return Ok(Claim::Mismatch);
    }
    let lo = unsafe {
        std::ptr::read_volatile(mem.as_ptr().add(dfh::AFU_ID_L as usize).cast::<u64>())
    };
    let hi = unsafe {
        std::ptr::read_volatile(mem.as_ptr().add(dfh::AFU_ID_H as usize).cast::<u64>())
    };
    if AfuId::from_words(hi, lo) != *id {
        return Ok(Claim::Mismatch);
    }
    let lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(lock) => lock,
        Err((_, e)) if e == Errno::EWOULDBLOCK => return Ok(Claim::Busy),
        Err((_, e)) => return Err(Error::IO(std::io::Error::from(e))),
    };
    Ok(Claim::Acquired(UioAfu {
        mem,
        size: candidate.size,
        path: candidate.dev.clone(),
        _lock: lock,
    }))
}

impl Mmio for UioAfu {
    fn window_size(&self) -> u64 {
        self.size
    }

    fn read32(&mut self, offset: u64) -> MmioResult<u32> {
        check_access(offset, 4, self.size)?;
        // Safety: check_access kept the offset aligned and inside the mapping
        Ok(unsafe { std::ptr::read_volatile(self.mem.as_ptr().add(offset as usize).cast::<u32>()) })
    }

    fn write32(&mut self, offset: u64, value: u32) -> MmioResult<()> {
        check_access(offset, 4, self.size)?;
        // Safety: check_access kept the offset aligned and inside the mapping
        unsafe {
            std::ptr::write_volatile(self.mem.as_mut_ptr().add(offset as usize).cast::<u32>(), value);
        }
        Ok(())
    }

    fn read64(&mut self, offset: u64) -> MmioResult<u64> {
        check_access(offset, 8, self.size)?;
        // Safety: check_access kept the offset aligned and inside the mapping
        Ok(unsafe { std::ptr::read_volatile(self.mem.as_ptr().add(offset as usize).cast::<u64>()) })
    }

    fn write64(&mut self, offset: u64, value: u64) -> MmioResult<()> {
        check_access(offset, 8, self.size)?;
        // Safety: check_access kept the offset aligned and inside the mapping
        unsafe {
            std::ptr::write_volatile(self.mem.as_mut_ptr().add(offset as usize).cast::<u64>(), value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selftest::SelfTest;
    use tempfile::TempDir;

    fn test_id() -> AfuId {
        "d8a5f9b4-2f6c-4a18-9e3b-7c41b06e55d1".parse().unwrap()
    }

    /// A uio-shaped tree backed by plain files instead of device nodes
    struct Fixture {
        _root: TempDir,
        sysfs: PathBuf,
        devfs: PathBuf,
    }

    impl Fixture {
        fn empty() -> Self {
            let root = TempDir::new().unwrap();
            let sysfs = root.path().join("sys/class/uio");
            let devfs = root.path().join("dev");
            fs::create_dir_all(&sysfs).unwrap();
            fs::create_dir_all(&devfs).unwrap();
            Self {
                _root: root,
                sysfs,
                devfs,
            }
        }

        fn with_device(node: &str, id: &AfuId, size: usize) -> Self {
            let fixture = Self::empty();
            fixture.add_device(node, id, size);
            fixture
        }

        fn add_device(&self, node: &str, id: &AfuId, size: usize) {
            let dfh = Dfh::new(FeatureType::Afu, 0, 0, 0, true)
                .to_word()
                .unwrap();
            self.add_device_with_header(node, dfh, id, size);
        }

        fn add_device_with_header(&self, node: &str, dfh: u64, id: &AfuId, size: usize) {
            let maps = self.sysfs.join(node).join("maps/map0");
            fs::create_dir_all(&maps).unwrap();
            fs::write(self.sysfs.join(node).join("name"), "dfl-port\n").unwrap();
            fs::write(maps.join("size"), format!("{size:#x}\n")).unwrap();

            let mut window = vec![0u8; size];
            if size >= 0x18 {
                window[0x00..0x08].copy_from_slice(&dfh.to_le_bytes());
                window[0x08..0x10].copy_from_slice(&id.lo().to_le_bytes());
                window[0x10..0x18].copy_from_slice(&id.hi().to_le_bytes());
            }
            fs::write(self.devfs.join(node), &window).unwrap();
        }
    }

    #[test]
    fn test_acquire_and_release() {
        let fixture = Fixture::with_device("uio0", &test_id(), 0x1000);
        let afu = UioAfu::acquire(&test_id(), &fixture.sysfs, &fixture.devfs).unwrap();
        assert_eq!(afu.window_size(), 0x1000);
        assert!(afu.path().ends_with("uio0"));
        drop(afu);
        // Dropping released the lock, so we can take it again
        UioAfu::acquire(&test_id(), &fixture.sysfs, &fixture.devfs).unwrap();
    }

    #[test]
    fn test_busy() {
        let fixture = Fixture::with_device("uio0", &test_id(), 0x1000);
        let _held = UioAfu::acquire(&test_id(), &fixture.sysfs, &fixture.devfs).unwrap();
        let err = UioAfu::acquire(&test_id(), &fixture.sysfs, &fixture.devfs).unwrap_err();
        assert!(matches!(err, AcquireError::Busy));
        assert_eq!(err.to_string(), "All FPGAs busy.");
    }

    #[test]
    fn test_not_found() {
        let other: AfuId = "00000000-1111-2222-3333-444444444444".parse().unwrap();
        let fixture = Fixture::with_device("uio0", &other, 0x1000);
        let err = UioAfu::acquire(&test_id(), &fixture.sysfs, &fixture.devfs).unwrap_err();
        assert!(matches!(err, AcquireError::NotFound(_)));
        assert_eq!(
            err.to_string(),
            "FPGA with accelerator d8a5f9b4-2f6c-4a18-9e3b-7c41b06e55d1 not found."
        );
    }

    #[test]
    fn test_no_driver() {
        let fixture = Fixture::empty();
        let missing = fixture.sysfs.join("nope");
        let err = UioAfu::acquire(&test_id(), &missing, &fixture.devfs).unwrap_err();
        assert!(matches!(err, AcquireError::NoDriver));
        assert_eq!(err.to_string(), "No FPGA driver found.");
    }

    #[test]
    fn test_skips_windowless_entry() {
        let fixture = Fixture::with_device("uio1", &test_id(), 0x1000);
        // An entry with no maps at all, sorted ahead of the real one
        fs::create_dir_all(fixture.sysfs.join("uio0")).unwrap();
        fs::write(fixture.sysfs.join("uio0/name"), "other-driver\n").unwrap();
        let afu = UioAfu::acquire(&test_id(), &fixture.sysfs, &fixture.devfs).unwrap();
        assert!(afu.path().ends_with("uio1"));
    }

    #[test]
    fn test_window_too_small_is_not_ours() {
        let fixture = Fixture::with_device("uio0", &test_id(), 0x10);
        let err = UioAfu::acquire(&test_id(), &fixture.sysfs, &fixture.devfs).unwrap_err();
        assert!(matches!(err, AcquireError::NotFound(_)));
    }

    #[test]
    fn test_non_afu_window_is_not_ours() {
        let fixture = Fixture::empty();
        // Right identity words, but the feature header says FIU
        let fiu = Dfh::new(FeatureType::Fiu, 0, 0, 0, true).to_word().unwrap();
        fixture.add_device_with_header("uio0", fiu, &test_id(), 0x1000);
        let err = UioAfu::acquire(&test_id(), &fixture.sysfs, &fixture.devfs).unwrap_err();
        assert!(matches!(err, AcquireError::NotFound(_)));
    }

    #[test]
    fn test_rw_through_window() {
        let fixture = Fixture::with_device("uio0", &test_id(), 0x1000);
        let mut afu = UioAfu::acquire(&test_id(), &fixture.sysfs, &fixture.devfs).unwrap();
        afu.write64(0x40, 0xDEAD_BEEF_B0BA_CAFE).unwrap();
        assert_eq!(afu.read64(0x40).unwrap(), 0xDEAD_BEEF_B0BA_CAFE);
        assert_eq!(afu.read32(0x40).unwrap(), 0xB0BA_CAFE);
        assert!(matches!(
            afu.read64(0x1000),
            Err(crate::mmio::Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_selftest_against_plain_memory() {
        let fixture = Fixture::with_device("uio0", &test_id(), 0x1000);
        let mut afu = UioAfu::acquire(&test_id(), &fixture.sysfs, &fixture.devfs).unwrap();
        // Plain memory has no write pipeline, so only iteration 0 reads back
        // the expected value
        let report = SelfTest::default().run(&mut afu).unwrap();
        assert_eq!(report.errors(), 99);
    }

    #[test]
    fn test_parse_map_size() {
        assert_eq!(parse_map_size("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_map_size("0x0000000000001000\n").unwrap(), 0x1000);
        assert_eq!(parse_map_size("1000").unwrap(), 0x1000);
        assert!(matches!(
            parse_map_size("zebra"),
            Err(Error::BadMapSize(_))
        ));
    }
}
