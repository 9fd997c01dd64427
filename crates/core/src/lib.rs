// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Pin-level peripheral models for SoC co-simulation.
//!
//! Each simulated half clock cycle the [`driver::Simulation`] steps every
//! [`PinModel`] against the shared [`signals::PinFabric`], then toggles the
//! system clock and lets the [`design::Design`] re-evaluate.

pub mod config;
pub mod design;
pub mod driver;
pub mod event_log;
pub mod metrics;
pub mod peripherals;
pub mod signals;
pub mod system;

use std::any::Any;
use std::path::PathBuf;

pub use driver::{Simulation, StopReason};
pub use event_log::{Event, EventLog, EventSink};
pub use signals::{InputPin, LogicLevel, OutputPin, PinFabric, SignalError};

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("flash: unknown command {0:02x}")]
    UnknownFlashCommand(u8),
    #[error("flash: address {0:#08x} outside backing array")]
    FlashAddressOutOfRange(u32),
    #[error("flash: offset {offset:#x} beyond end of {size:#x}-byte array")]
    FlashOffsetOutOfRange { offset: usize, size: usize },
    #[error(
        "flash: image of {len} bytes does not fit at offset {offset:#x} ({available} bytes available)"
    )]
    FlashImageTooLarge {
        len: usize,
        offset: usize,
        available: usize,
    },
    #[error("flash: failed to read input file {}: {source}", .path.display())]
    FlashImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("uart: baud rate {baud_rate} gives no usable divisor for a {clock_hz} Hz clock")]
    InvalidBaudRate { clock_hz: u64, baud_rate: u32 },
    #[error("uart: baud divisor must be at least 2, got {0}")]
    InvalidBaudDivisor(u32),
    #[error(transparent)]
    Signal(#[from] SignalError),
    #[error("event log: {0}")]
    EventLogIo(#[from] std::io::Error),
    #[error("event log: {0}")]
    EventLogFormat(#[from] serde_json::Error),
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Trait for observing simulation progress without touching model state.
pub trait SimulationObserver: std::fmt::Debug + Send + Sync {
    fn on_simulation_start(&self) {}
    fn on_simulation_stop(&self) {}
    /// Called after the design has settled for the half cycle stamped `timestamp`.
    fn on_half_cycle(&self, _timestamp: u64, _pins: &PinFabric) {}
    fn on_event(&self, _event: &Event) {}
}

/// A peripheral model bound to pins of the simulated design.
///
/// `step` is called once per half cycle, before the clock toggles. It may read
/// any signal, drive only the pins it claimed, and report events to `events`.
pub trait PinModel: std::fmt::Debug + Send {
    fn name(&self) -> &str;
    fn step(
        &mut self,
        pins: &mut PinFabric,
        timestamp: u64,
        events: &mut dyn EventSink,
    ) -> SimResult<()>;
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}
