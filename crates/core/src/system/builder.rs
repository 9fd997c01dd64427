// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::config::SimulationConfig;
use crate::design::{ConsoleBoot, ConsoleBootParams};
use crate::driver::Simulation;
use crate::event_log::EventLog;
use crate::peripherals::flash::{FlashPinNames, SpiFlash, ADDR_MASK};
use crate::peripherals::gpio::{GpioBank, GpioPinNames};
use crate::peripherals::uart::{UartMonitor, UartPinNames, CONSOLE_CHANNEL};
use anyhow::Context;
use pinsim_config::{BenchManifest, DesignConfig};
use std::path::{Path, PathBuf};
use tracing::info;

/// Inputs that override what the manifest names. Paths are used as given.
#[derive(Debug, Default, Clone)]
pub struct BuildOptions {
    pub image: Option<PathBuf>,
    pub event_log: Option<PathBuf>,
}

#[derive(Debug)]
pub struct Testbench {
    pub sim: Simulation,
    pub reset_cycles: u32,
    /// Flash image actually loaded, if any.
    pub image: Option<PathBuf>,
    pub event_log: Option<PathBuf>,
    /// Name of the UART the design prints on.
    pub console_uart: String,
}

/// Loads a bench manifest and builds its testbench. Relative paths in the
/// manifest are resolved against the manifest's directory.
pub fn load_testbench(manifest_path: &Path, options: &BuildOptions) -> anyhow::Result<Testbench> {
    info!("Loading bench manifest: {:?}", manifest_path);
    let manifest = BenchManifest::from_file(manifest_path)?;
    let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    build_testbench(&manifest, base_dir, options)
}

pub fn build_testbench(
    manifest: &BenchManifest,
    base_dir: &Path,
    options: &BuildOptions,
) -> anyhow::Result<Testbench> {
    manifest.validate()?;
    let config = SimulationConfig {
        clock_hz: manifest.clock_hz,
        reset_cycles: manifest.reset_cycles,
    };
    let mut sim = Simulation::new(config.clone())?;

    let DesignConfig::ConsoleBoot(boot) = &manifest.design;
    let flash = manifest
        .flash
        .as_ref()
        .context("console_boot needs a flash binding")?;
    let console = manifest
        .uarts
        .first()
        .context("console_boot needs a UART binding")?;
    let gpio = manifest
        .gpios
        .first()
        .context("console_boot needs a GPIO binding")?;

    let console_offset = boot.console_offset.bytes()?;
    if console_offset > ADDR_MASK as u64 {
        anyhow::bail!(
            "console_boot: console_offset {:#x} is beyond the 24-bit flash address space",
            console_offset
        );
    }
    let params = ConsoleBootParams {
        cycles_per_bit: config.cycles_per_bit(console.baud_rate)?,
        console_offset: console_offset as u32,
        max_console_len: boot.max_console_len,
        read_mode: boot.read_mode,
        gpio_output: boot.gpio_output,
        gpio_enable: boot.gpio_enable,
    };
    let flash_names = FlashPinNames::with_prefix(&flash.pins);
    let design = ConsoleBoot::new(
        params,
        &flash_names,
        &UartPinNames::with_prefix(&console.pins),
        &GpioPinNames::with_prefix(&gpio.pins),
        gpio.width,
        sim.pins_mut(),
    )
    .context("Failed to wire console_boot design")?;
    sim.set_design(Box::new(design));

    // Ports the design does not drive still need their signals.
    for uart in manifest.uarts.iter().skip(1) {
        UartPinNames::with_prefix(&uart.pins).declare(sim.pins_mut())?;
    }
    for bank in manifest.gpios.iter().skip(1) {
        GpioPinNames::with_prefix(&bank.pins).declare(sim.pins_mut(), bank.width)?;
    }

    let mut spiflash = SpiFlash::new(&flash.name, &flash_names, sim.pins_mut())?;
    let image = match (&options.image, &flash.image) {
        (Some(path), _) => Some(path.clone()),
        (None, Some(path)) => Some(base_dir.join(path)),
        (None, None) => None,
    };
    if let Some(path) = &image {
        let offset = flash.offset.bytes()? as usize;
        spiflash
            .load_data(path, offset)
            .with_context(|| format!("Failed to load flash image {:?}", path))?;
    }
    sim.add_model(Box::new(spiflash));

    for binding in &manifest.uarts {
        let baud_div = config
            .steps_per_bit(binding.baud_rate)
            .with_context(|| format!("UART '{}'", binding.name))?;
        let mut uart = UartMonitor::new(
            &binding.name,
            &UartPinNames::with_prefix(&binding.pins),
            baud_div,
            sim.pins_mut(),
        )?;
        uart.set_console(binding.console.unwrap_or(binding.name == CONSOLE_CHANNEL));
        sim.add_model(Box::new(uart));
    }

    for binding in &manifest.gpios {
        let mut bank = GpioBank::new(
            &binding.name,
            &GpioPinNames::with_prefix(&binding.pins),
            binding.width,
            sim.pins_mut(),
        )?;
        bank.set_input(binding.input);
        sim.add_model(Box::new(bank));
    }

    let event_log = match (&options.event_log, &manifest.event_log) {
        (Some(path), _) => Some(path.clone()),
        (None, Some(path)) => Some(base_dir.join(path)),
        (None, None) => None,
    };
    if let Some(path) = &event_log {
        let log = EventLog::create(path)
            .with_context(|| format!("Failed to open event log {:?} for writing", path))?;
        sim.set_event_sink(Box::new(log));
    }

    info!(
        "Testbench '{}': {} signals, {} models",
        manifest.name,
        sim.pins().len(),
        sim.models().len()
    );

    Ok(Testbench {
        sim,
        reset_cycles: manifest.reset_cycles,
        image,
        event_log,
        console_uart: console.name.clone(),
    })
}
