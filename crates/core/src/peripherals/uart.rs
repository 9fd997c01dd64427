// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::config::{DEFAULT_BAUD_RATE, DEFAULT_CLOCK_HZ, STEPS_PER_CYCLE};
use crate::event_log::{Event, EventSink};
use crate::signals::{InputPin, OutputPin, PinFabric};
use crate::{PinModel, SimResult, SimulationError};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Steps per bit at the default baud rate and clock, with models stepped every half cycle.
pub const DEFAULT_BAUD_DIV: u32 =
    (DEFAULT_CLOCK_HZ / DEFAULT_BAUD_RATE as u64 * STEPS_PER_CYCLE) as u32;

/// Channel whose bytes are echoed to the diagnostic stream unless configured otherwise.
pub const CONSOLE_CHANNEL: &str = "uart_0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UartPinNames {
    pub tx: String,
    pub rx: String,
}

impl UartPinNames {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            tx: format!("{}_tx_o", prefix),
            rx: format!("{}_rx_i", prefix),
        }
    }

    pub fn declare(&self, pins: &mut PinFabric) -> SimResult<()> {
        pins.declare(&self.tx, 1)?;
        pins.declare(&self.rx, 1)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
struct RxState {
    tx_last: bool,
    counter: u32,
    sr: u8,
}

/// Receives 8N1 frames from the design's transmit line.
#[derive(serde::Serialize)]
pub struct UartMonitor {
    name: String,
    baud_div: u32,
    state: RxState,
    received: u64,
    console: bool,
    #[serde(skip)]
    tx: InputPin,
    #[serde(skip)]
    rx: OutputPin,
    #[serde(skip)]
    sink: Option<Arc<Mutex<Vec<u8>>>>,
    #[serde(skip)]
    console_writer: Option<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for UartMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UartMonitor")
            .field("name", &self.name)
            .field("baud_div", &self.baud_div)
            .field("state", &self.state)
            .field("received", &self.received)
            .field("console", &self.console)
            .finish()
    }
}

impl UartMonitor {
    pub fn new(
        name: &str,
        names: &UartPinNames,
        baud_div: u32,
        pins: &mut PinFabric,
    ) -> SimResult<Self> {
        if baud_div < 2 {
            return Err(SimulationError::InvalidBaudDivisor(baud_div));
        }
        Ok(Self {
            name: name.to_string(),
            baud_div,
            state: RxState::default(),
            received: 0,
            console: name == CONSOLE_CHANNEL,
            tx: pins.input(&names.tx, 1)?,
            rx: pins.claim(&names.rx, 1, name)?,
            sink: None,
            console_writer: None,
        })
    }

    pub fn baud_div(&self) -> u32 {
        self.baud_div
    }

    pub fn is_console(&self) -> bool {
        self.console
    }

    pub fn set_console(&mut self, console: bool) {
        self.console = console;
    }

    /// Replaces stderr as the destination of console bytes.
    pub fn set_console_writer(&mut self, writer: Option<Box<dyn Write + Send>>) {
        self.console_writer = writer;
    }

    /// Captures every received byte into `sink`. Console forwarding is left as configured.
    pub fn set_capture(&mut self, sink: Option<Arc<Mutex<Vec<u8>>>>) {
        self.sink = sink;
    }

    /// Captures every received byte into `sink`; `echo` controls console forwarding.
    pub fn set_sink(&mut self, sink: Option<Arc<Mutex<Vec<u8>>>>, echo: bool) {
        self.set_capture(sink);
        self.console = echo;
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn is_idle(&self) -> bool {
        self.state.counter == 0
    }

    fn push_rx(&mut self, value: u8) {
        self.received += 1;
        if let Some(sink) = &self.sink {
            if let Ok(mut guard) = sink.lock() {
                guard.push(value);
            }
        }

        if self.console {
            let result = match self.console_writer.as_mut() {
                Some(w) => w.write_all(&[value]).and_then(|_| w.flush()),
                None => {
                    let mut err = io::stderr();
                    err.write_all(&[value]).and_then(|_| err.flush())
                }
            };
            if let Err(e) = result {
                tracing::warn!("{}: console write failed: {}", self.name, e);
            }
        }
    }
}

impl PinModel for UartMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(
        &mut self,
        pins: &mut PinFabric,
        timestamp: u64,
        events: &mut dyn EventSink,
    ) -> SimResult<()> {
        let tx = pins.is_high(self.tx);
        let half = self.baud_div / 2;

        if self.state.counter == 0 {
            if self.state.tx_last && !tx {
                self.state.counter = 1;
            }
        } else {
            self.state.counter += 1;
            let counter = self.state.counter;
            if counter > half && (counter - half) % self.baud_div == 0 {
                let bit = (counter - half) / self.baud_div;
                if (1..=8).contains(&bit) {
                    self.state.sr = (if tx { 0x80 } else { 0x00 }) | (self.state.sr >> 1);
                }
                if bit == 8 {
                    let value = self.state.sr;
                    tracing::trace!("{}: received {:02x}", self.name, value);
                    events.record(Event::new(timestamp, &self.name, "tx", value))?;
                    self.push_rx(value);
                }
                if bit == 9 {
                    if !tx {
                        tracing::warn!("{}: framing error, stop bit low", self.name);
                    }
                    self.state.counter = 0;
                }
            }
        }

        self.state.tx_last = tx;
        pins.set_bool(&self.rx, true);
        Ok(())
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
