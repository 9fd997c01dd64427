// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use pinsim_core::signals::SignalId;
use pinsim_core::{PinFabric, SimulationObserver};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Mutex;
use vcd::{IdCode, TimescaleUnit, Value, Writer};

/// Dumps every declared signal to a VCD file, one timestamp per half cycle.
pub struct VcdObserver {
    state: Mutex<VcdState>,
    wires: Vec<Wire>,
    half_period_ns: u64,
}

struct Wire {
    signal: SignalId,
    id: IdCode,
    width: u32,
}

struct VcdState {
    writer: Writer<BufWriter<File>>,
    last: Vec<Option<u64>>,
}

impl VcdObserver {
    pub fn new(path: &Path, pins: &PinFabric, clock_hz: u64) -> anyhow::Result<Self> {
        let file = File::create(path)?;
        let buf = BufWriter::new(file);
        let mut writer = Writer::new(buf);

        writer.timescale(1, TimescaleUnit::NS)?;
        writer.add_module("top")?;
        let mut wires = Vec::with_capacity(pins.len());
        for (signal, name, width, _) in pins.iter() {
            let id = writer.add_wire(width, name)?;
            wires.push(Wire { signal, id, width });
        }
        writer.upscope()?;
        writer.enddefinitions()?;

        Ok(Self {
            state: Mutex::new(VcdState {
                writer,
                last: vec![None; wires.len()],
            }),
            wires,
            half_period_ns: (500_000_000 / clock_hz.max(1)).max(1),
        })
    }
}

// Helper to convert u64 to Vec<Value> (MSB first)
fn u64_to_vec(val: u64, width: u32) -> Vec<Value> {
    let mut bits = Vec::with_capacity(width as usize);
    for i in (0..width).rev() {
        let bit = (val >> i) & 1;
        bits.push(if bit == 1 { Value::V1 } else { Value::V0 });
    }
    bits
}

impl core::fmt::Debug for VcdObserver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "VcdObserver({} wires)", self.wires.len())
    }
}

impl SimulationObserver for VcdObserver {
    fn on_half_cycle(&self, timestamp: u64, pins: &PinFabric) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let mut stamped = false;
        for (i, wire) in self.wires.iter().enumerate() {
            let value = pins.value(wire.signal);
            if state.last[i] == Some(value) {
                continue;
            }
            if !stamped {
                let _ = state.writer.timestamp(timestamp * self.half_period_ns);
                stamped = true;
            }
            let _ = if wire.width == 1 {
                let level = if value & 1 == 1 { Value::V1 } else { Value::V0 };
                state.writer.change_scalar(wire.id, level)
            } else {
                state.writer.change_vector(wire.id, u64_to_vec(value, wire.width))
            };
            state.last[i] = Some(value);
        }
    }
}
