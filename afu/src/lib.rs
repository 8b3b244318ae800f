//! # AFU
//!
//! This library discovers, exercises, and self-tests the accelerator
//! functions that DFL FPGA devices expose through UIO register windows.
//! The [`mmio::Mmio`] trait abstracts over the register window itself, with
//! one implementation backed by real hardware ([`mmio::uio::UioAfu`]) and one
//! backed by a software model ([`mmio::sim::SimAfu`]) so everything above the
//! window can run without an FPGA plugged in.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod core;
pub mod mmio;
pub mod prelude;
pub mod selftest;
