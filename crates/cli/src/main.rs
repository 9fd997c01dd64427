// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

mod size_limited_writer;
mod vcd_trace;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use pinsim_config::{RunAssertion, RunLimits, RunScript, StopReason};
use pinsim_core::event_log::{compare_events, read_event_log};
use pinsim_core::metrics::PerformanceMetrics;
use pinsim_core::peripherals::UartMonitor;
use pinsim_core::system::{load_testbench, BuildOptions, Testbench};
use pinsim_core::PinModel;

use size_limited_writer::SizeLimitedWriter;
use vcd_trace::VcdObserver;

const EXIT_PASS: u8 = 0;
const EXIT_ASSERT_FAIL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const RESULT_SCHEMA_VERSION: &str = "1.0";

const DEFAULT_MAX_CYCLES: u64 = 10_000_000;
// Guard against accidentally huge runs from CI misconfiguration.
const MAX_ALLOWED_CYCLES: u64 = 500_000_000;
const CONSOLE_LOG_LIMIT: u64 = 16 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Pin-level flash, UART and GPIO models for SoC co-simulation",
    long_about = None
)]
struct Cli {
    /// Enable debug-level logging (flash commands, transactions)
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a testbench from a manifest and run it to completion.
    Run(RunArgs),

    /// Compare two event logs, ignoring timestamps.
    Compare(CompareArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the testbench manifest (YAML)
    #[arg(short = 'b', long)]
    bench: Option<PathBuf>,

    /// Flash image to load (overrides the manifest)
    #[arg(short = 'i', long)]
    image: Option<PathBuf>,

    /// Path to a run script (YAML) with limits and assertions
    #[arg(short = 'c', long)]
    script: Option<PathBuf>,

    /// Write the event log to this path (overrides the manifest)
    #[arg(short = 'e', long)]
    events: Option<PathBuf>,

    /// Override max cycles limit
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Stop once the console UART has received this many bytes
    #[arg(long)]
    max_uart_bytes: Option<u64>,

    /// Stop once the console output contains this text
    #[arg(long)]
    stop_on_uart: Option<String>,

    /// Dump every pin to a VCD trace
    #[arg(long)]
    vcd: Option<PathBuf>,

    /// Write console bytes to this file instead of stderr
    #[arg(long)]
    console_log: Option<PathBuf>,

    /// Disable console echo (still captured for assertions/artifacts)
    #[arg(long)]
    no_console: bool,

    /// Directory to write run artifacts (result.json, uart.log)
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct CompareArgs {
    /// Reference event log
    reference: PathBuf,

    /// Event log under test
    actual: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct RunResult {
    result_schema_version: String,
    status: String,
    cycles: u64,
    events: u64,
    stop_reason: StopReason,
    stop_reason_details: StopReasonDetails,
    limits: RunLimits,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    assertions: Vec<AssertionResult>,
    image_hash: String,
    config: RunConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct StopReasonDetails {
    triggered_stop_condition: StopReason,
    triggered_limit: Option<NamedU64>,
    observed: Option<NamedU64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct NamedU64 {
    name: String,
    value: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct AssertionResult {
    assertion: RunAssertion,
    passed: bool,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct RunConfig {
    bench: Option<PathBuf>,
    image: Option<PathBuf>,
    script: Option<PathBuf>,
    event_log: Option<PathBuf>,
}

/// Everything the run needs after the manifest and script are merged.
struct ResolvedRun {
    bench: PathBuf,
    image: Option<PathBuf>,
    limits: RunLimits,
    assertions: Vec<RunAssertion>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing with appropriate level based on --trace flag
    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Compare(args) => compare(args),
    }
}

fn compare(args: CompareArgs) -> ExitCode {
    let reference = match read_event_log(&args.reference) {
        Ok(events) => events,
        Err(e) => {
            error!("Failed to read {:?}: {}", args.reference, e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let actual = match read_event_log(&args.actual) {
        Ok(events) => events,
        Err(e) => {
            error!("Failed to read {:?}: {}", args.actual, e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match compare_events(&reference, &actual) {
        Ok(()) => {
            println!("Event logs are identical");
            ExitCode::from(EXIT_PASS)
        }
        Err(mismatch) => {
            println!("{}", mismatch);
            ExitCode::from(EXIT_ASSERT_FAIL)
        }
    }
}

fn resolve(args: &RunArgs) -> Result<ResolvedRun, (String, Option<RunLimits>)> {
    let script = match &args.script {
        Some(path) => Some(RunScript::from_file(path).map_err(|e| (format!("{:#}", e), None))?),
        None => None,
    };

    let limits = RunLimits {
        max_cycles: args
            .max_cycles
            .or(script.as_ref().map(|s| s.limits.max_cycles))
            .unwrap_or(DEFAULT_MAX_CYCLES),
        max_uart_bytes: args
            .max_uart_bytes
            .or(script.as_ref().and_then(|s| s.limits.max_uart_bytes)),
        stop_on_uart: args
            .stop_on_uart
            .clone()
            .or(script.as_ref().and_then(|s| s.limits.stop_on_uart.clone())),
    };

    if limits.max_cycles > MAX_ALLOWED_CYCLES {
        let msg = format!(
            "max_cycles {} exceeds MAX_ALLOWED_CYCLES {}",
            limits.max_cycles, MAX_ALLOWED_CYCLES
        );
        return Err((msg, Some(limits)));
    }

    let script_path = args.script.as_deref();
    let bench = match (&args.bench, &script, script_path) {
        (Some(p), _, _) => p.clone(),
        (None, Some(s), Some(sp)) => resolve_script_path(sp, &s.inputs.bench),
        _ => {
            let msg =
                "Missing bench path (provide --bench or set inputs.bench in script)".to_string();
            return Err((msg, Some(limits)));
        }
    };

    let image = args.image.clone().or_else(|| {
        let s = script.as_ref()?;
        let sp = script_path?;
        s.inputs
            .image
            .as_deref()
            .filter(|i| !i.trim().is_empty())
            .map(|i| resolve_script_path(sp, i))
    });

    let assertions = match (&script, script_path) {
        (Some(s), Some(sp)) => s
            .assertions
            .iter()
            .map(|a| match a {
                RunAssertion::EventsMatch(m) => {
                    let mut m = m.clone();
                    m.events_match = resolve_script_path(sp, &m.events_match)
                        .to_string_lossy()
                        .into_owned();
                    RunAssertion::EventsMatch(m)
                }
                other => other.clone(),
            })
            .collect(),
        _ => Vec::new(),
    };

    Ok(ResolvedRun {
        bench,
        image,
        limits,
        assertions,
    })
}

fn run(args: RunArgs) -> ExitCode {
    let resolved = match resolve(&args) {
        Ok(r) => r,
        Err((msg, limits)) => {
            error!("{}", msg);
            write_config_error_outputs(&args, None, limits, msg);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let options = BuildOptions {
        image: resolved.image.clone(),
        event_log: args.events.clone(),
    };
    let mut tb = match load_testbench(&resolved.bench, &options) {
        Ok(tb) => tb,
        Err(e) => {
            let msg = format!("{:#}", e);
            error!("{}", msg);
            write_config_error_outputs(&args, Some(&resolved), Some(resolved.limits.clone()), msg);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let image_hash = match &tb.image {
        Some(path) => match std::fs::read(path) {
            Ok(bytes) => {
                let mut hasher = Sha256::new();
                hasher.update(&bytes);
                format!("{:x}", hasher.finalize())
            }
            Err(e) => {
                error!("Failed to read image {:?} for hashing: {}", path, e);
                String::new()
            }
        },
        None => String::new(),
    };

    let metrics = Arc::new(PerformanceMetrics::new());
    tb.sim.add_observer(metrics.clone());

    if let Some(vcd_path) = &args.vcd {
        let clock_hz = tb.sim.config().clock_hz;
        match VcdObserver::new(vcd_path, tb.sim.pins(), clock_hz) {
            Ok(observer) => {
                info!("Writing VCD trace to {:?}", vcd_path);
                tb.sim.add_observer(Arc::new(observer));
            }
            Err(e) => {
                let msg = format!("Failed to create VCD trace {:?}: {:#}", vcd_path, e);
                error!("{}", msg);
                write_config_error_outputs(
                    &args,
                    Some(&resolved),
                    Some(resolved.limits.clone()),
                    msg,
                );
                return ExitCode::from(EXIT_CONFIG_ERROR);
            }
        }
    }

    let uart_tx = Arc::new(Mutex::new(Vec::new()));
    if let Err(msg) = attach_console(&mut tb, &args, &uart_tx) {
        error!("{}", msg);
        write_config_error_outputs(&args, Some(&resolved), Some(resolved.limits.clone()), msg);
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    execute_run(&args, &resolved, tb, &image_hash, &uart_tx, &metrics)
}

/// Routes console bytes into the capture buffer and, optionally, a log file.
fn attach_console(
    tb: &mut Testbench,
    args: &RunArgs,
    uart_tx: &Arc<Mutex<Vec<u8>>>,
) -> Result<(), String> {
    let console_name = tb.console_uart.clone();
    let uart = tb
        .sim
        .find_model_mut::<UartMonitor>(&console_name)
        .ok_or_else(|| format!("Console UART '{}' not found", console_name))?;
    uart.set_capture(Some(uart_tx.clone()));
    if args.no_console {
        uart.set_console(false);
    }

    if let Some(log_path) = &args.console_log {
        let file = std::fs::File::create(log_path)
            .map_err(|e| format!("Failed to create console log {:?}: {}", log_path, e))?;
        if !uart.is_console() {
            warn!(
                "UART '{}' is not a console channel; {:?} stays empty",
                console_name, log_path
            );
        }
        uart.set_console_writer(Some(Box::new(SizeLimitedWriter::new(
            file,
            CONSOLE_LOG_LIMIT,
        ))));
    }
    Ok(())
}

fn execute_run(
    args: &RunArgs,
    resolved: &ResolvedRun,
    mut tb: Testbench,
    image_hash: &str,
    uart_tx: &Arc<Mutex<Vec<u8>>>,
    metrics: &Arc<PerformanceMetrics>,
) -> ExitCode {
    let limits = &resolved.limits;
    let start = std::time::Instant::now();
    let mut sim_error: Option<String> = None;

    if let Err(e) = tb.sim.reset(tb.reset_cycles) {
        sim_error = Some(format!("Reset failed: {}", e));
    }

    let mut triggered: Option<StopReason> = None;
    let mut stop_reason = StopReason::ProtocolError;
    if sim_error.is_none() {
        let capture = uart_tx.clone();
        let max_uart_bytes = limits.max_uart_bytes;
        let stop_on_uart = limits.stop_on_uart.clone();
        let mut seen_len = 0usize;
        let result = tb.sim.run_until(Some(limits.max_cycles), |_| {
            let Ok(bytes) = capture.lock() else {
                return false;
            };
            if bytes.len() == seen_len {
                return false;
            }
            seen_len = bytes.len();
            if max_uart_bytes.is_some_and(|limit| bytes.len() as u64 >= limit) {
                triggered = Some(StopReason::MaxUartBytes);
                return true;
            }
            if let Some(pattern) = &stop_on_uart {
                if String::from_utf8_lossy(&bytes).contains(pattern.as_str()) {
                    triggered = Some(StopReason::UartMatch);
                    return true;
                }
            }
            false
        });
        match result {
            Ok(pinsim_core::StopReason::MaxCycles) => stop_reason = StopReason::MaxCycles,
            Ok(pinsim_core::StopReason::Halted) => stop_reason = StopReason::Halt,
            Ok(pinsim_core::StopReason::Condition) => {
                stop_reason = triggered.clone().unwrap_or(StopReason::UartMatch)
            }
            Err(e) => {
                error!("Simulation error at cycle {}: {}", tb.sim.cycles(), e);
                sim_error = Some(e.to_string());
            }
        }
    }

    if let Err(e) = tb.sim.close_event_sink() {
        error!("Failed to finish event log: {}", e);
        if sim_error.is_none() {
            sim_error = Some(e.to_string());
        }
    }

    let uart_text = {
        let bytes = uart_tx.lock().map(|g| g.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).to_string()
    };

    let mut assertion_results = Vec::new();
    let mut all_passed = true;
    let mut expected_stop_reason_matched = false;

    for assertion in &resolved.assertions {
        let passed = match assertion {
            RunAssertion::UartContains(a) => uart_text.contains(&a.uart_contains),
            RunAssertion::ExpectedStopReason(a) => a.expected_stop_reason == stop_reason,
            RunAssertion::EventsMatch(a) => events_match(&a.events_match, tb.event_log.as_deref()),
        };

        if matches!(assertion, RunAssertion::ExpectedStopReason(_)) && passed {
            expected_stop_reason_matched = true;
        }

        if !passed {
            all_passed = false;
            error!(
                "Assertion failed: {:?} (captured len={})",
                assertion,
                uart_text.len()
            );
        }

        assertion_results.push(AssertionResult {
            assertion: assertion.clone(),
            passed,
        });
    }

    let (status, code) = if !all_passed {
        ("fail", EXIT_ASSERT_FAIL)
    } else if sim_error.is_some() && !expected_stop_reason_matched {
        ("error", EXIT_RUNTIME_ERROR)
    } else {
        ("pass", EXIT_PASS)
    };

    let cycles = tb.sim.cycles();
    let uart_bytes = uart_tx.lock().map(|g| g.len() as u64).unwrap_or(0);
    let stop_reason_details =
        build_stop_reason_details(&stop_reason, limits, cycles, uart_bytes);
    let result = RunResult {
        result_schema_version: RESULT_SCHEMA_VERSION.to_string(),
        status: status.to_string(),
        cycles,
        events: metrics.get_events(),
        stop_reason,
        stop_reason_details,
        limits: limits.clone(),
        message: sim_error,
        assertions: assertion_results,
        image_hash: image_hash.to_string(),
        config: RunConfig {
            bench: Some(resolved.bench.clone()),
            image: tb.image.clone(),
            script: args.script.clone(),
            event_log: tb.event_log.clone(),
        },
    };
    write_outputs(args, &result, uart_text.as_bytes());
    let peripherals: Vec<String> = tb.sim.models().iter().map(|m| m.name().to_string()).collect();
    report_metrics(metrics, &peripherals, start.elapsed());

    ExitCode::from(code)
}

fn events_match(reference: &str, actual: Option<&Path>) -> bool {
    let Some(actual) = actual else {
        error!("events_match needs an event log (set event_log or pass --events)");
        return false;
    };
    let reference_events = match read_event_log(reference) {
        Ok(events) => events,
        Err(e) => {
            error!("Failed to read reference event log {:?}: {}", reference, e);
            return false;
        }
    };
    let actual_events = match read_event_log(actual) {
        Ok(events) => events,
        Err(e) => {
            error!("Failed to read event log {:?}: {}", actual, e);
            return false;
        }
    };
    match compare_events(&reference_events, &actual_events) {
        Ok(()) => true,
        Err(mismatch) => {
            error!("{}", mismatch);
            false
        }
    }
}

fn report_metrics(
    metrics: &PerformanceMetrics,
    peripherals: &[String],
    elapsed: std::time::Duration,
) {
    info!("Simulation Metrics:");
    info!("  Cycles: {}", metrics.get_cycles());
    info!("  Events: {}", metrics.get_events());
    for peripheral in peripherals {
        let count = metrics.get_events_for(peripheral);
        if count > 0 {
            info!("    {}: {}", peripheral, count);
        }
    }
    info!("  Wall time: {:.3}s", elapsed.as_secs_f64());
    info!("  Speed: {:.0} cycles/s", metrics.get_cycles_per_sec());
}

fn build_stop_reason_details(
    stop_reason: &StopReason,
    limits: &RunLimits,
    cycles: u64,
    uart_bytes: u64,
) -> StopReasonDetails {
    let named = |name: &str, value: u64| {
        Some(NamedU64 {
            name: name.to_string(),
            value,
        })
    };
    let (triggered_limit, observed) = match stop_reason {
        StopReason::MaxCycles => (
            named("max_cycles", limits.max_cycles),
            named("cycles", cycles),
        ),
        StopReason::MaxUartBytes => (
            limits
                .max_uart_bytes
                .and_then(|limit| named("max_uart_bytes", limit)),
            named("uart_bytes", uart_bytes),
        ),
        StopReason::UartMatch => (None, named("uart_bytes", uart_bytes)),
        StopReason::Halt | StopReason::ProtocolError => (None, named("cycles", cycles)),
        StopReason::ConfigError => (None, None),
    };

    StopReasonDetails {
        triggered_stop_condition: stop_reason.clone(),
        triggered_limit,
        observed,
    }
}

fn write_outputs(args: &RunArgs, result: &RunResult, uart_bytes: &[u8]) {
    let Some(output_dir) = &args.output_dir else {
        return;
    };
    if let Err(e) = std::fs::create_dir_all(output_dir) {
        error!("Failed to create output directory {:?}: {}", output_dir, e);
        return;
    }

    let result_path = output_dir.join("result.json");
    match std::fs::File::create(&result_path) {
        Ok(f) => {
            if let Err(e) = serde_json::to_writer_pretty(f, result) {
                error!("Failed to write result.json: {}", e);
            }
        }
        Err(e) => error!("Failed to create result.json: {}", e),
    }

    let uart_path = output_dir.join("uart.log");
    if let Err(e) = std::fs::write(&uart_path, uart_bytes) {
        error!("Failed to write uart.log: {}", e);
    }
}

fn write_config_error_outputs(
    args: &RunArgs,
    resolved: Option<&ResolvedRun>,
    limits: Option<RunLimits>,
    message: String,
) {
    if args.output_dir.is_none() {
        return;
    }
    let limits = limits.unwrap_or(RunLimits {
        max_cycles: 0,
        max_uart_bytes: None,
        stop_on_uart: None,
    });
    let stop_reason = StopReason::ConfigError;
    let stop_reason_details = build_stop_reason_details(&stop_reason, &limits, 0, 0);

    let result = RunResult {
        result_schema_version: RESULT_SCHEMA_VERSION.to_string(),
        status: "error".to_string(),
        cycles: 0,
        events: 0,
        stop_reason,
        stop_reason_details,
        limits,
        message: Some(message),
        assertions: vec![],
        image_hash: String::new(),
        config: RunConfig {
            bench: resolved.map(|r| r.bench.clone()).or(args.bench.clone()),
            image: resolved.and_then(|r| r.image.clone()),
            script: args.script.clone(),
            event_log: args.events.clone(),
        },
    };
    write_outputs(args, &result, b"");
}

fn resolve_script_path(script_path: &Path, value: &str) -> PathBuf {
    let p = PathBuf::from(value);
    if p.is_absolute() {
        return p;
    }
    script_path
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."))
        .join(p)
}
