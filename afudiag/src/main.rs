//! `afudiag` — diagnostics for scratch-register AFUs on DFL FPGA devices.
//!
//! ```text
//! USAGE:
//!   afudiag test [--passes N] [--sim [--fault MODE]]  Sweep the user register
//!   afudiag info                                      Show identity and features
//!   afudiag peek <register>                           Read a 32 bit register
//!   afudiag poke <register> <value>                   Write a 32 bit register
//! ```
//!
//! Every command acquires the accelerator exclusively, so a busy device
//! reports `All FPGAs busy.` instead of interleaving with whoever holds it.

use afu::{
    core::{
        afu_registers,
        read_afu_id,
        walk_features,
    },
    mmio::{
        sim::{
            FaultMode,
            SimAfu,
        },
        uio::{
            self,
            UioAfu,
        },
        Mmio,
    },
    selftest::{
        Mismatch,
        Phase,
        Report,
        SelfTest,
    },
};
use anyhow::Context;
use clap::{
    Parser,
    Subcommand,
};
use dfl::AfuId;
use indicatif::ProgressBar;
use std::{
    path::PathBuf,
    process::ExitCode,
};
use tracing_subscriber::EnvFilter;

/// The identity our scratch-register RTL advertises
const DEFAULT_AFU_ID: &str = "d8a5f9b4-2f6c-4a18-9e3b-7c41b06e55d1";

#[derive(Parser)]
#[command(name = "afudiag", about = "Diagnostics for scratch-register AFUs", version)]
struct Cli {
    /// The accelerator function to operate on
    #[arg(long, global = true, default_value = DEFAULT_AFU_ID)]
    afu_id: AfuId,
    /// Where the kernel publishes UIO devices
    #[arg(long, global = true, default_value = uio::SYSFS_UIO)]
    sysfs: PathBuf,
    /// Where the UIO device nodes live
    #[arg(long, global = true, default_value = uio::DEVFS)]
    devfs: PathBuf,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Sweep the user register with write/readback checks.
    Test(TestArgs),
    /// Print the device's identity and feature chain.
    Info,
    /// Read a 32 bit register and print it.
    Peek {
        /// Register name or byte offset (e.g. user_reg or 0x20).
        register: String,
    },
    /// Write a 32 bit register.
    Poke {
        /// Register name or byte offset (e.g. user_reg or 0x20).
        register: String,
        /// Value to write, decimal or 0x hex.
        #[arg(value_parser = parse_number32)]
        value: u32,
    },
}

#[derive(clap::Args)]
struct TestArgs {
    /// Complete sweeps to run, each against a freshly acquired device.
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
    passes: u64,
    /// Register to sweep, as a name or byte offset.
    #[arg(long, default_value = "user_reg")]
    register: String,
    /// Write/readback iterations per sweep.
    #[arg(long, default_value = "100", value_parser = clap::value_parser!(u64).range(1..))]
    iterations: u64,
    /// Iterations before readback leaves the masked warm-up window.
    #[arg(long, default_value = "8")]
    warmup: u64,
    /// How many writes back a steady readback trails.
    #[arg(long, default_value = "7")]
    latency: u64,
    /// Run against the software model instead of hardware.
    #[arg(long)]
    sim: bool,
    /// Defect for the software model to reproduce.
    #[arg(long, default_value = "none", requires = "sim")]
    fault: FaultMode,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ERROR: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Cmd::Test(args) => cmd_test(cli, args),
        Cmd::Info => cmd_info(cli).map(|()| ExitCode::SUCCESS),
        Cmd::Peek { register } => cmd_peek(cli, register).map(|()| ExitCode::SUCCESS),
        Cmd::Poke { register, value } => {
            cmd_poke(cli, register, *value).map(|()| ExitCode::SUCCESS)
        }
    }
}

fn cmd_test(cli: &Cli, args: &TestArgs) -> anyhow::Result<ExitCode> {
    let sweep = SelfTest {
        register: resolve_register(&args.register)?,
        iterations: args.iterations,
        warmup: args.warmup,
        latency: args.latency,
    };

    let bar = (args.passes > 1).then(|| ProgressBar::new(args.passes));
    if let Some(bar) = &bar {
        bar.set_message("Running test passes");
    }

    let mut all_passed = true;
    for _ in 0..args.passes {
        // A pass models one full run against freshly acquired hardware, so
        // the warm-up window starts over each time
        let report = if args.sim {
            let mut afu = SimAfu::new(cli.afu_id).with_fault(args.fault);
            sweep.run(&mut afu)?
        } else {
            let mut afu = UioAfu::acquire(&cli.afu_id, &cli.sysfs, &cli.devfs)?;
            sweep.run(&mut afu)?
        };
        print_report(&report);
        all_passed &= report.passed();
        if let Some(bar) = &bar {
            bar.inc(1);
        }
    }
    if let Some(bar) = &bar {
        bar.finish();
    }

    Ok(if all_passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// The exact per-mismatch diagnostic line operators grep for
fn mismatch_line(m: &Mismatch) -> String {
    match m.phase {
        Phase::Warmup => format!(
            "ERROR: Not reset properly. Read from MMIO register has incorrect value {} instead of 0",
            m.observed
        ),
        Phase::Steady => format!(
            "ERROR: Read from MMIO register has incorrect value {} instead of {}",
            m.observed, m.expected
        ),
    }
}

/// The exact summary line a sweep ends with
fn verdict_line(report: &Report) -> &'static str {
    if report.passed() {
        "All MMIO tests succeeded."
    } else {
        "MMIO tests failed."
    }
}

/// Prints a sweep's mismatches to stderr and its verdict to stdout
fn print_report(report: &Report) {
    for m in &report.mismatches {
        eprintln!("{}", mismatch_line(m));
    }
    println!("{}", verdict_line(report));
}

fn cmd_info(cli: &Cli) -> anyhow::Result<()> {
    let mut afu = UioAfu::acquire(&cli.afu_id, &cli.sysfs, &cli.devfs)?;
    println!("Device: {}", afu.path().display());
    println!("Window: {:#x} bytes", afu.window_size());
    println!("AFU ID: {}", read_afu_id(&mut afu)?);
    println!("Features:");
    for (offset, dfh) in walk_features(&mut afu)? {
        println!(
            "  {offset:#06x}: {} id {:#x} rev {}{}",
            dfh.feature_type()?,
            dfh.feature_id(),
            dfh.revision(),
            if dfh.eol() { " (eol)" } else { "" }
        );
    }
    Ok(())
}

fn cmd_peek(cli: &Cli, register: &str) -> anyhow::Result<()> {
    let offset = resolve_register(register)?;
    let mut afu = UioAfu::acquire(&cli.afu_id, &cli.sysfs, &cli.devfs)?;
    println!("{:#010x}", afu.read32(offset)?);
    Ok(())
}

fn cmd_poke(cli: &Cli, register: &str, value: u32) -> anyhow::Result<()> {
    let offset = resolve_register(register)?;
    let mut afu = UioAfu::acquire(&cli.afu_id, &cli.sysfs, &cli.devfs)?;
    afu.write32(offset, value)?;
    Ok(())
}

/// Turns a register name from the map, or a bare offset, into a byte offset
fn resolve_register(register: &str) -> anyhow::Result<u64> {
    if let Some(reg) = afu_registers().get(register) {
        return Ok(reg.addr);
    }
    parse_number(register)
        .with_context(|| format!("`{register}` isn't a known register name or an offset"))
}

fn parse_number(s: &str) -> Result<u64, std::num::ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
}

fn parse_number32(s: &str) -> Result<u32, std::num::ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0x20").unwrap(), 0x20);
        assert_eq!(parse_number("0X20").unwrap(), 0x20);
        assert_eq!(parse_number("100").unwrap(), 100);
        assert!(parse_number("zebra").is_err());
        assert_eq!(parse_number32("0xdeadbeef").unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_resolve_register() {
        assert_eq!(resolve_register("user_reg").unwrap(), 0x20);
        assert_eq!(resolve_register("dfh").unwrap(), 0);
        assert_eq!(resolve_register("0x40").unwrap(), 0x40);
        assert!(resolve_register("not_a_register").is_err());
    }

    #[test]
    fn test_default_id_parses() {
        let id: AfuId = DEFAULT_AFU_ID.parse().unwrap();
        assert_eq!(id.to_string(), DEFAULT_AFU_ID);
    }

    #[test]
    fn test_mismatch_lines() {
        let warm = Mismatch {
            iteration: 3,
            observed: 2_998_004_478,
            expected: 0,
            phase: Phase::Warmup,
        };
        assert_eq!(
            mismatch_line(&warm),
            "ERROR: Not reset properly. Read from MMIO register has incorrect value 2998004478 instead of 0"
        );
        let steady = Mismatch {
            iteration: 8,
            observed: 0,
            expected: 1,
            phase: Phase::Steady,
        };
        assert_eq!(
            mismatch_line(&steady),
            "ERROR: Read from MMIO register has incorrect value 0 instead of 1"
        );
    }

    #[test]
    fn test_verdict_lines() {
        let clean = Report {
            iterations: 100,
            mismatches: Vec::new(),
        };
        assert_eq!(verdict_line(&clean), "All MMIO tests succeeded.");
        let broken = Report {
            iterations: 100,
            mismatches: vec![Mismatch {
                iteration: 8,
                observed: 0,
                expected: 1,
                phase: Phase::Steady,
            }],
        };
        assert_eq!(verdict_line(&broken), "MMIO tests failed.");
    }

    #[test]
    fn test_first_stuck_at_zero_line() {
        let mut afu =
            SimAfu::new(DEFAULT_AFU_ID.parse().unwrap()).with_fault(FaultMode::StuckAtZero);
        let report = SelfTest::default().run(&mut afu).unwrap();
        assert_eq!(
            mismatch_line(&report.mismatches[0]),
            "ERROR: Read from MMIO register has incorrect value 0 instead of 1"
        );
    }
}
