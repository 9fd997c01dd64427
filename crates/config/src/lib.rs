// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

fn default_clock_hz() -> u64 {
    25_000_000
}

fn default_reset_cycles() -> u32 {
    1
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_gpio_width() -> u32 {
    8
}

fn default_flash_name() -> String {
    "flash".to_string()
}

fn default_max_console_len() -> usize {
    256
}

/// A byte count or offset, written either as an integer (`0x100000`) or as a
/// human-readable size (`"1 MiB"`).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ByteSize {
    Bytes(u64),
    Human(String),
}

impl ByteSize {
    pub fn bytes(&self) -> Result<u64> {
        match self {
            ByteSize::Bytes(n) => Ok(*n),
            ByteSize::Human(s) => parse_size(s),
        }
    }
}

impl Default for ByteSize {
    fn default() -> Self {
        ByteSize::Bytes(0)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct FlashBinding {
    #[serde(default = "default_flash_name")]
    pub name: String,
    /// Signal name prefix; ports are `<pins>_clk_o`, `<pins>_csn_o`, `<pins>_d_o`,
    /// `<pins>_d_oe` and `<pins>_d_i`.
    pub pins: String,
    /// Binary image loaded into the array, relative to the manifest.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub offset: ByteSize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct UartBinding {
    pub name: String,
    /// Signal name prefix; ports are `<pins>_tx_o` and `<pins>_rx_i`.
    pub pins: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Forward received bytes to the diagnostic stream. Defaults to true for `uart_0` only.
    #[serde(default)]
    pub console: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct GpioBinding {
    pub name: String,
    /// Signal name prefix; ports are `<pins>_o`, `<pins>_oe` and `<pins>_i`.
    pub pins: String,
    #[serde(default = "default_gpio_width")]
    pub width: u32,
    /// Value driven onto the bank's input bus.
    #[serde(default)]
    pub input: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    Single,
    #[default]
    Quad,
}

/// Parameters of the behavioural boot design.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ConsoleBootConfig {
    /// Flash address of the NUL-terminated console string.
    pub console_offset: ByteSize,
    #[serde(default = "default_max_console_len")]
    pub max_console_len: usize,
    #[serde(default)]
    pub read_mode: ReadMode,
    /// GPIO output value driven once the string has been sent.
    #[serde(default)]
    pub gpio_output: u64,
    #[serde(default)]
    pub gpio_enable: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub enum DesignConfig {
    ConsoleBoot(ConsoleBootConfig),
}

/// Describes one co-simulation testbench: the design and the peripheral
/// models wired to its pins.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct BenchManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    #[serde(default = "default_clock_hz")]
    pub clock_hz: u64,
    #[serde(default = "default_reset_cycles")]
    pub reset_cycles: u32,
    /// Event log written during the run, relative to the manifest.
    #[serde(default)]
    pub event_log: Option<String>,
    #[serde(default)]
    pub flash: Option<FlashBinding>,
    #[serde(default)]
    pub uarts: Vec<UartBinding>,
    #[serde(default)]
    pub gpios: Vec<GpioBinding>,
    /// Written as a single-key map, e.g. `design: { console_boot: {...} }`.
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub design: DesignConfig,
}

impl BenchManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open bench manifest at {:?}", path.as_ref()))?;
        let manifest: Self =
            serde_yaml::from_reader(f).context("Failed to parse Bench Manifest YAML")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let manifest: Self =
            serde_yaml::from_str(yaml).context("Failed to parse Bench Manifest YAML")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }
        if self.clock_hz == 0 {
            anyhow::bail!("'clock_hz' must be greater than zero");
        }

        let mut names = std::collections::HashSet::new();
        let model_names = self
            .flash
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.uarts.iter().map(|u| u.name.as_str()))
            .chain(self.gpios.iter().map(|g| g.name.as_str()));
        for name in model_names {
            if !names.insert(name) {
                anyhow::bail!("Duplicate peripheral name '{}'", name);
            }
        }

        for uart in &self.uarts {
            if uart.baud_rate == 0 || self.clock_hz / (uart.baud_rate as u64) < 2 {
                anyhow::bail!(
                    "UART '{}': baud rate {} is too high for a {} Hz clock",
                    uart.name,
                    uart.baud_rate,
                    self.clock_hz
                );
            }
            // The UART model counts in half cycles, so its divisor is twice the cycle count.
            let steps_per_bit = (self.clock_hz / uart.baud_rate as u64).saturating_mul(2);
            if steps_per_bit > u32::MAX as u64 {
                anyhow::bail!(
                    "UART '{}': baud rate {} is too low for a {} Hz clock",
                    uart.name,
                    uart.baud_rate,
                    self.clock_hz
                );
            }
        }

        for gpio in &self.gpios {
            if gpio.width == 0 || gpio.width > 64 {
                anyhow::bail!(
                    "GPIO '{}': width must be between 1 and 64, got {}",
                    gpio.name,
                    gpio.width
                );
            }
        }

        if let Some(flash) = &self.flash {
            flash
                .offset
                .bytes()
                .with_context(|| format!("Flash '{}': invalid offset", flash.name))?;
        }

        match &self.design {
            DesignConfig::ConsoleBoot(boot) => {
                if self.flash.is_none() || self.uarts.is_empty() || self.gpios.is_empty() {
                    anyhow::bail!(
                        "Design 'console_boot' needs a flash, at least one UART and at least one GPIO bank"
                    );
                }
                boot.console_offset
                    .bytes()
                    .context("console_boot: invalid console_offset")?;
                if boot.max_console_len == 0 {
                    anyhow::bail!("console_boot: 'max_console_len' must be greater than zero");
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RunInputs {
    pub bench: String,
    /// Overrides the flash image named in the manifest.
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RunLimits {
    pub max_cycles: u64,
    #[serde(default)]
    pub max_uart_bytes: Option<u64>,
    /// Stop as soon as the console output contains this text.
    #[serde(default)]
    pub stop_on_uart: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Runner failed before simulation started (e.g. manifest parse/validation error).
    ConfigError,
    MaxCycles,
    MaxUartBytes,
    UartMatch,
    Halt,
    ProtocolError,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct UartContainsAssertion {
    pub uart_contains: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StopReasonAssertion {
    pub expected_stop_reason: StopReason,
}

/// Compare the run's event log against a reference log, ignoring timestamps.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct EventsMatchAssertion {
    pub events_match: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum RunAssertion {
    UartContains(UartContainsAssertion),
    ExpectedStopReason(StopReasonAssertion),
    EventsMatch(EventsMatchAssertion),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RunScript {
    pub schema_version: String,
    pub inputs: RunInputs,
    pub limits: RunLimits,
    #[serde(default)]
    pub assertions: Vec<RunAssertion>,
}

impl RunScript {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read run script at {:?}", path.as_ref()))?;
        let script: Self =
            serde_yaml::from_str(&contents).context("Failed to parse Run Script YAML")?;
        script.validate()?;
        Ok(script)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }

        if self.inputs.bench.trim().is_empty() {
            anyhow::bail!("Input 'bench' path cannot be empty");
        }

        if self.limits.max_cycles == 0 {
            anyhow::bail!("Limit 'max_cycles' must be greater than zero");
        }

        Ok(())
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
