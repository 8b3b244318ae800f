//! The write/readback sweep that proves a scratch-register AFU out

use crate::core::USER_REG_ADDR;
use crate::mmio::{
    Mmio,
    MmioResult,
};

/// Which part of the sweep an iteration lands in
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    /// The pipeline is still filling and readback is masked to zero
    Warmup,
    /// The pipeline is full and readback trails the writes
    Steady,
}

/// One readback that didn't match
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Which iteration (and so which written value) went wrong
    pub iteration: u64,
    /// What the register actually read back
    pub observed: u64,
    /// What a healthy device would have read back
    pub expected: u64,
    /// Where in the sweep this happened
    pub phase: Phase,
}

/// Everything a completed sweep turned up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// How many write/readback iterations ran
    pub iterations: u64,
    /// Every readback that didn't match, in iteration order
    pub mismatches: Vec<Mismatch>,
}

impl Report {
    /// Whether every readback matched
    #[must_use]
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// How many readbacks didn't match
    #[must_use]
    pub fn errors(&self) -> usize {
        self.mismatches.len()
    }
}

/// A write/readback sweep of the user register
///
/// Each iteration writes its index and reads straight back. The RTL pipelines
/// writes eight deep, so a healthy device reads zero for the first eight
/// iterations and afterwards the value written seven writes ago. Every
/// readback is checked against that rule; mismatches are recorded and the
/// sweep carries on, so one bad readback doesn't hide the rest.
#[derive(Debug, Copy, Clone)]
pub struct SelfTest {
    /// Byte offset of the register to sweep
    pub register: u64,
    /// How many write/readback iterations to run
    pub iterations: u64,
    /// Writes it takes before readback leaves the masked window
    pub warmup: u64,
    /// How many writes back a steady readback trails
    pub latency: u64,
}

impl Default for SelfTest {
    fn default() -> Self {
        Self {
            register: USER_REG_ADDR,
            iterations: 100,
            warmup: 8,
            latency: 7,
        }
    }
}

impl SelfTest {
    fn phase(&self, i: u64) -> Phase {
        if i < self.warmup {
            Phase::Warmup
        } else {
            Phase::Steady
        }
    }

    fn expected(&self, i: u64) -> u64 {
        if i < self.warmup {
            0
        } else {
            i.saturating_sub(self.latency)
        }
    }

    /// Runs the sweep against a freshly reset device
    /// # Errors
    /// Returns an error on a bad register window; readbacks that merely
    /// mismatch land in the [`Report`] instead
    pub fn run<M>(&self, afu: &mut M) -> MmioResult<Report>
    where
        M: Mmio,
    {
        let mut mismatches = Vec::new();
        for i in 0..self.iterations {
            afu.write64(self.register, i)?;
            let observed = afu.read64(self.register)?;
            let expected = self.expected(i);
            tracing::trace!("Iteration {i}: read {observed}, expected {expected}");
            if observed != expected {
                tracing::debug!("Iteration {i}: read {observed} instead of {expected}");
                mismatches.push(Mismatch {
                    iteration: i,
                    observed,
                    expected,
                    phase: self.phase(i),
                });
            }
        }
        tracing::debug!(
            "Swept {} iterations with {} mismatches",
            self.iterations,
            mismatches.len()
        );
        Ok(Report {
            iterations: self.iterations,
            mismatches,
        })
    }
}
