//! Stress driver
//!
//! Runs one stressor in N parallel worker processes and prints the
//! aggregated results.
//!
//! ```text
//! stress <name> [instances] [timeout-secs] [max-ops]
//! stress list
//! ```
//!
//! Positional arguments override the `STRESS_*` environment variables.

use std::time::Duration;

use stressor_core::{kerror, ExitStatus, Stressor};
use stressor_runtime::{RunReport, StressConfig, Supervisor};

fn usage() {
    eprintln!("usage: stress <name> [instances] [timeout-secs] [max-ops]");
    eprintln!("       stress list");
}

fn list() {
    println!("=== Stressors ===\n");
    for stressor in stressors::all() {
        let classes: Vec<String> = stressor
            .classes()
            .iter()
            .map(|c| format!("{:?}", c).to_lowercase())
            .collect();
        println!("{} ({})", stressor.name(), classes.join(", "));
        for entry in stressor.help() {
            println!("  --{:<20} {}", entry.option, entry.description);
        }
    }
}

fn parse_arg<T: std::str::FromStr>(args: &[String], idx: usize, what: &str) -> Result<Option<T>, String> {
    match args.get(idx) {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| format!("invalid {}: {}", what, s)),
    }
}

fn build_config(args: &[String]) -> Result<StressConfig, String> {
    let mut config = StressConfig::from_env();
    if let Some(n) = parse_arg::<usize>(args, 2, "instances")? {
        config = config.instances(n);
    }
    if let Some(secs) = parse_arg::<u64>(args, 3, "timeout")? {
        config = config.timeout(Duration::from_secs(secs));
    }
    if let Some(ops) = parse_arg::<u64>(args, 4, "max-ops")? {
        config = config.max_ops(ops);
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn print_report(report: &RunReport) {
    println!("\n=== Results ===");
    println!("Stressor:     {}", report.stressor);
    println!("Elapsed:      {:?}", report.elapsed);
    println!("Bogo ops:     {}", report.bogo_ops());
    println!("Ops/sec:      {:.2}", report.ops_per_sec());

    println!("\nInstances:");
    for inst in &report.instances {
        println!(
            "  [{}] pid {:>7}  {:>10} ops  {}",
            inst.instance,
            inst.pid,
            inst.bogo_ops,
            inst.status.as_str()
        );
    }

    if !report.metrics.is_empty() {
        println!("\nMetrics:");
        for metric in &report.metrics {
            println!(
                "  {:>14.2} {} ({})",
                metric.value,
                metric.label,
                metric.kind.as_str()
            );
        }
    }

    println!("\nStatus: {}", report.status().as_str());
}

fn run(stressor: &dyn Stressor, config: StressConfig) -> ExitStatus {
    println!("=== {} Stress Test ===\n", stressor.name());
    config.print();

    match Supervisor::new(config).run(stressor) {
        Ok(report) => {
            print_report(&report);
            report.status()
        }
        Err(e) => {
            kerror!("{}: {}", stressor.name(), e);
            ExitStatus::Failure
        }
    }
}

fn main() {
    stressor_runtime::init();

    let args: Vec<String> = std::env::args().collect();
    let Some(name) = args.get(1) else {
        usage();
        std::process::exit(ExitStatus::Failure.code());
    };

    if name == "list" {
        list();
        return;
    }

    let Some(stressor) = stressors::find(name) else {
        eprintln!("unknown stressor: {}", name);
        eprintln!("available: {}", stressors::NAMES.join(", "));
        std::process::exit(ExitStatus::Failure.code());
    };

    let config = match build_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            usage();
            std::process::exit(ExitStatus::Failure.code());
        }
    };

    let status = run(&*stressor, config);
    std::process::exit(status.code());
}
