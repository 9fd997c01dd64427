use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

const CONSOLE: &[u8] = b"Initialised!\r\n";

fn temp_dir(prefix: &str) -> PathBuf {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir()
        .join("pinsim-cli-tests")
        .join(format!("{}-{}", prefix, nonce));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn pinsim() -> Command {
    Command::new(env!("CARGO_BIN_EXE_pinsim"))
}

fn write_bench(dir: &Path) -> PathBuf {
    let mut image = CONSOLE.to_vec();
    image.push(0);
    std::fs::write(dir.join("software.bin"), image).unwrap();

    let bench = r#"
schema_version: "1.0"
name: "cli-boot"
event_log: "events.json"
flash:
  pins: "flash"
  image: "software.bin"
  offset: "1 MiB"
uarts:
  - name: "uart_0"
    pins: "uart_0"
gpios:
  - name: "gpio_0"
    pins: "gpio_0"
design:
  console_boot:
    console_offset: "1 MiB"
    read_mode: quad
    gpio_output: 0x50
    gpio_enable: 0xF0
"#;
    let path = dir.join("bench.yaml");
    std::fs::write(&path, bench).unwrap();
    path
}

fn write_script(dir: &Path, assertions: &str) -> PathBuf {
    let script = format!(
        r#"
schema_version: "1.0"
inputs:
  bench: "bench.yaml"
limits:
  max_cycles: 2000000
assertions:
{}
"#,
        assertions
    );
    let path = dir.join("script.yaml");
    std::fs::write(&path, script).unwrap();
    path
}

fn read_result(out: &Path) -> serde_json::Value {
    let text = std::fs::read_to_string(out.join("result.json")).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[test]
fn test_run_script_passes() {
    let dir = temp_dir("pass");
    write_bench(&dir);
    let script = write_script(
        &dir,
        "  - uart_contains: \"Initialised!\"\n  - expected_stop_reason: halt",
    );
    let out = dir.join("out");

    let output = pinsim()
        .args(["run", "--no-console", "--script"])
        .arg(&script)
        .arg("--output-dir")
        .arg(&out)
        .output()
        .expect("Failed to execute pinsim");
    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let result = read_result(&out);
    assert_eq!(result["status"], "pass");
    assert_eq!(result["stop_reason"], "halt");
    assert_eq!(result["image_hash"].as_str().unwrap().len(), 64);
    assert!(result["cycles"].as_u64().unwrap() > 0);
    assert_eq!(result["assertions"].as_array().unwrap().len(), 2);

    let uart_log = std::fs::read(out.join("uart.log")).unwrap();
    assert_eq!(uart_log, CONSOLE);
    assert!(dir.join("events.json").exists());
}

#[test]
fn test_failing_assertion_exit_code() {
    let dir = temp_dir("fail");
    write_bench(&dir);
    let script = write_script(&dir, "  - uart_contains: \"Goodbye\"");
    let out = dir.join("out");

    let output = pinsim()
        .args(["run", "--no-console", "--script"])
        .arg(&script)
        .arg("--output-dir")
        .arg(&out)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(read_result(&out)["status"], "fail");
}

#[test]
fn test_missing_bench_is_config_error() {
    let dir = temp_dir("config");
    let out = dir.join("out");

    let output = pinsim()
        .args(["run", "--bench"])
        .arg(dir.join("nope.yaml"))
        .arg("--output-dir")
        .arg(&out)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));

    let result = read_result(&out);
    assert_eq!(result["status"], "error");
    assert_eq!(result["stop_reason"], "config_error");
    assert!(result["message"].as_str().unwrap().contains("nope.yaml"));
}

#[test]
fn test_stop_on_uart_with_vcd_and_console_log() {
    let dir = temp_dir("stop");
    let bench = write_bench(&dir);
    let out = dir.join("out");
    let vcd = dir.join("trace.vcd");
    let console_log = dir.join("console.log");

    let output = pinsim()
        .args(["run", "--stop-on-uart", "Init", "--bench"])
        .arg(&bench)
        .arg("--vcd")
        .arg(&vcd)
        .arg("--console-log")
        .arg(&console_log)
        .arg("--output-dir")
        .arg(&out)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));

    let result = read_result(&out);
    assert_eq!(result["stop_reason"], "uart_match");
    assert_eq!(std::fs::read(&console_log).unwrap(), b"Init");

    let content = std::fs::read_to_string(&vcd).unwrap();
    assert!(content.contains("$timescale"), "VCD header missing");
    assert!(content.contains("flash_csn_o"), "VCD signal definitions missing");
}

#[test]
fn test_events_match_reference_run() {
    let dir = temp_dir("events");
    let bench = write_bench(&dir);
    let reference = dir.join("reference.json");

    let output = pinsim()
        .args(["run", "--no-console", "--bench"])
        .arg(&bench)
        .arg("--events")
        .arg(&reference)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));

    let script = write_script(&dir, "  - events_match: \"reference.json\"");
    let output = pinsim()
        .args(["run", "--no-console", "--script"])
        .arg(&script)
        .output()
        .unwrap();
    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_console_setting_respected() {
    let dir = temp_dir("quiet");
    let bench = write_bench(&dir);
    let yaml = std::fs::read_to_string(&bench)
        .unwrap()
        .replace("pins: \"uart_0\"", "pins: \"uart_0\"\n    console: false");
    std::fs::write(&bench, yaml).unwrap();
    let out = dir.join("out");

    let output = pinsim()
        .args(["run", "--bench"])
        .arg(&bench)
        .arg("--output-dir")
        .arg(&out)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(!String::from_utf8_lossy(&output.stderr).contains("Initialised!"));
    assert!(!String::from_utf8_lossy(&output.stdout).contains("Initialised!"));

    // still captured for artifacts
    assert_eq!(std::fs::read(out.join("uart.log")).unwrap(), CONSOLE);
}

#[test]
fn test_compare_ignores_timestamps() {
    let dir = temp_dir("compare");
    let reference = dir.join("reference.json");
    let actual = dir.join("actual.json");
    let other = dir.join("other.json");
    std::fs::write(
        &reference,
        r#"{"events": [{"timestamp": 10, "peripheral": "uart_0", "event": "tx", "payload": 73}]}"#,
    )
    .unwrap();
    std::fs::write(
        &actual,
        r#"{"events": [{"timestamp": 99, "peripheral": "uart_0", "event": "tx", "payload": 73}]}"#,
    )
    .unwrap();
    std::fs::write(
        &other,
        r#"{"events": [{"timestamp": 10, "peripheral": "uart_0", "event": "tx", "payload": 74}]}"#,
    )
    .unwrap();

    let output = pinsim()
        .arg("compare")
        .arg(&reference)
        .arg(&actual)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Event logs are identical"));

    let output = pinsim()
        .arg("compare")
        .arg(&reference)
        .arg(&other)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));

    let output = pinsim()
        .arg("compare")
        .arg(&reference)
        .arg(dir.join("missing.json"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}
