//! A software model of a scratch-register AFU, used to exercise everything
//! above the register window without hardware

use super::{
    check_access,
    Mmio,
    MmioResult,
};
use crate::core::USER_REG_ADDR;
use dfl::{
    dfh,
    AfuId,
    Dfh,
    FeatureType,
};
use std::{
    collections::HashMap,
    fmt::Display,
    str::FromStr,
};
use thiserror::Error;

/// Writes it takes before the user register's pipeline is full
pub const WARMUP_WRITES: usize = 8;
/// How many writes back a steady-state read reaches
pub const READ_LATENCY: usize = 7;
/// Size of the modeled register window in bytes
pub const WINDOW_SIZE: u64 = 0x1000;
/// What an unreset pipeline register holds
pub const RESIDUE: u64 = 0xB0BA_CAFE;

/// Hardware defects the model can reproduce on demand
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum FaultMode {
    /// A healthy device
    #[default]
    None,
    /// The user register reads zero no matter what was written
    StuckAtZero,
    /// The pipeline skips its reset, so reads during fill see stale residue
    NoResetMask,
}

#[derive(Error, Debug)]
#[error("We expected a fault mode string, but got back something invalid: {0}")]
pub struct BadFaultMode(String);

impl Display for FaultMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                FaultMode::None => "none",
                FaultMode::StuckAtZero => "stuck-at-zero",
                FaultMode::NoResetMask => "no-reset-mask",
            }
        )
    }
}

impl FromStr for FaultMode {
    type Err = BadFaultMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "none" => FaultMode::None,
            "stuck-at-zero" => FaultMode::StuckAtZero,
            "no-reset-mask" => FaultMode::NoResetMask,
            _ => return Err(BadFaultMode(s.to_owned())),
        })
    }
}

/// A modeled AFU window: one feature header, the identity words, and the
/// write-pipelined user register, with plain scratch memory everywhere else
///
/// The user register models the RTL: writes feed an eight deep pipeline that
/// reads as zero while it fills and afterwards returns the value written
/// seven writes ago. A fresh [`SimAfu`] is a freshly reset device.
#[derive(Debug)]
pub struct SimAfu {
    id: AfuId,
    fault: FaultMode,
    writes: Vec<u64>,
    memory: HashMap<u64, u32>,
}

impl SimAfu {
    /// Construct a new model of a reset device carrying the function `id`
    #[must_use]
    pub fn new(id: AfuId) -> Self {
        Self {
            id,
            fault: FaultMode::None,
            writes: Vec::new(),
            memory: HashMap::default(),
        }
    }

    /// Sets the defect this model should reproduce
    #[must_use]
    pub fn with_fault(mut self, fault: FaultMode) -> Self {
        self.fault = fault;
        self
    }

    fn dfh_word() -> MmioResult<u64> {
        // A single AFU feature that ends the chain
        Ok(Dfh::new(FeatureType::Afu, 0, 0, 0, true).to_word()?)
    }

    fn user_read(&self) -> u64 {
        if self.fault == FaultMode::StuckAtZero {
            return 0;
        }
        let nwrites = self.writes.len();
        if nwrites <= WARMUP_WRITES {
            match self.fault {
                FaultMode::NoResetMask => RESIDUE,
                _ => 0,
            }
        } else {
            self.writes[nwrites - 1 - READ_LATENCY]
        }
    }

    fn lane(&self, offset: u64) -> u32 {
        self.memory.get(&offset).copied().unwrap_or(0)
    }

    fn word64(&self, offset: u64) -> MmioResult<u64> {
        Ok(match offset {
            dfh::BASE => Self::dfh_word()?,
            dfh::AFU_ID_L => self.id.lo(),
            dfh::AFU_ID_H => self.id.hi(),
            USER_REG_ADDR => self.user_read(),
            _ => (u64::from(self.lane(offset + 4)) << 32) | u64::from(self.lane(offset)),
        })
    }
}

impl Mmio for SimAfu {
    fn window_size(&self) -> u64 {
        WINDOW_SIZE
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read32(&mut self, offset: u64) -> MmioResult<u32> {
        check_access(offset, 4, WINDOW_SIZE)?;
        let word = self.word64(offset & !7)?;
        if offset % 8 == 0 {
            Ok(word as u32)
        } else {
            Ok((word >> 32) as u32)
        }
    }

    fn write32(&mut self, offset: u64, value: u32) -> MmioResult<()> {
        check_access(offset, 4, WINDOW_SIZE)?;
        match offset {
            USER_REG_ADDR => self.writes.push(u64::from(value)),
            o if o < USER_REG_ADDR + 8 => {
                tracing::debug!("Dropping write to read only offset {o:#x}");
            }
            _ => {
                self.memory.insert(offset, value);
            }
        }
        Ok(())
    }

    fn read64(&mut self, offset: u64) -> MmioResult<u64> {
        check_access(offset, 8, WINDOW_SIZE)?;
        self.word64(offset)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write64(&mut self, offset: u64, value: u64) -> MmioResult<()> {
        check_access(offset, 8, WINDOW_SIZE)?;
        match offset {
            USER_REG_ADDR => self.writes.push(value),
            o if o < USER_REG_ADDR => {
                tracing::debug!("Dropping write to read only offset {o:#x}");
            }
            _ => {
                self.memory.insert(offset, value as u32);
                self.memory.insert(offset + 4, (value >> 32) as u32);
            }
        }
        Ok(())
    }
}
