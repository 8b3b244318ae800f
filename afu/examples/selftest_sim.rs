//! In this example, we run the register sweep against the software model,
//! optionally with an injected fault (try `stuck-at-zero` or `no-reset-mask`).

use afu::{
    mmio::sim::{
        FaultMode,
        SimAfu,
    },
    selftest::SelfTest,
};

fn main() -> anyhow::Result<()> {
    // Inject a fault if one was asked for
    let fault = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<FaultMode>()?,
        None => FaultMode::None,
    };

    let mut afu = SimAfu::new("d8a5f9b4-2f6c-4a18-9e3b-7c41b06e55d1".parse()?).with_fault(fault);

    let report = SelfTest::default().run(&mut afu)?;
    for mismatch in &report.mismatches {
        println!(
            "Iteration {}: read {} instead of {}",
            mismatch.iteration, mismatch.observed, mismatch.expected
        );
    }
    println!(
        "{} of {} readbacks matched",
        report.iterations - report.errors() as u64,
        report.iterations
    );
    Ok(())
}
