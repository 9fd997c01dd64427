// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! SPI/QSPI NOR flash, reconstructed from serial clock edges.

use crate::event_log::EventSink;
use crate::signals::{InputPin, OutputPin, PinFabric};
use crate::{PinModel, SimResult, SimulationError};
use std::path::Path;

pub const FLASH_SIZE: usize = 16 * 1024 * 1024;
pub const ADDR_MASK: u32 = 0x00FF_FFFF;
pub const FLASH_ID: [u8; 4] = [0xCA, 0x7C, 0xA7, 0xFF];

/// Width of the flash data buses.
pub const DATA_WIDTH: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashCommand {
    PowerUp,
    Read,
    QuadRead,
    ReadId,
    /// Accepted but has no effect (write enable, status/config registers, reset).
    Passthrough(u8),
}

impl FlashCommand {
    pub fn decode(opcode: u8) -> SimResult<Self> {
        match opcode {
            0xAB => Ok(FlashCommand::PowerUp),
            0x03 => Ok(FlashCommand::Read),
            0xEB => Ok(FlashCommand::QuadRead),
            0x9F => Ok(FlashCommand::ReadId),
            0xFF | 0x35 | 0x31 | 0x50 | 0x05 | 0x01 | 0x06 => Ok(FlashCommand::Passthrough(opcode)),
            _ => Err(SimulationError::UnknownFlashCommand(opcode)),
        }
    }

    pub fn opcode(self) -> u8 {
        match self {
            FlashCommand::PowerUp => 0xAB,
            FlashCommand::Read => 0x03,
            FlashCommand::QuadRead => 0xEB,
            FlashCommand::ReadId => 0x9F,
            FlashCommand::Passthrough(op) => op,
        }
    }

    /// Bits transferred per serial clock once the opcode has been received.
    pub fn data_width(self) -> u32 {
        match self {
            FlashCommand::QuadRead => 4,
            _ => 1,
        }
    }

    /// Index of the first byte after which array data is returned.
    fn data_start(self) -> Option<u32> {
        match self {
            FlashCommand::Read => Some(3),
            // address, one mode byte, two dummy clocks
            FlashCommand::QuadRead => Some(6),
            _ => None,
        }
    }
}

/// Signal names of one flash port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashPinNames {
    pub clk: String,
    pub csn: String,
    pub d_o: String,
    pub d_oe: String,
    pub d_i: String,
}

impl FlashPinNames {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            clk: format!("{}_clk_o", prefix),
            csn: format!("{}_csn_o", prefix),
            d_o: format!("{}_d_o", prefix),
            d_oe: format!("{}_d_oe", prefix),
            d_i: format!("{}_d_i", prefix),
        }
    }

    /// Declares every signal of the port without claiming any.
    pub fn declare(&self, pins: &mut PinFabric) -> SimResult<()> {
        pins.declare(&self.clk, 1)?;
        pins.declare(&self.csn, 1)?;
        pins.declare(&self.d_o, DATA_WIDTH)?;
        pins.declare(&self.d_oe, DATA_WIDTH)?;
        pins.declare(&self.d_i, DATA_WIDTH)?;
        Ok(())
    }
}

#[derive(Debug)]
struct FlashPins {
    clk: InputPin,
    csn: InputPin,
    d_o: InputPin,
    d_oe: InputPin,
    d_i: OutputPin,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
struct ProtocolState {
    last_clk: bool,
    last_csn: bool,
    bit_count: u32,
    byte_count: u32,
    data_width: u32,
    addr: u32,
    curr_byte: u8,
    out_buffer: u8,
    #[serde(skip)]
    command: Option<FlashCommand>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct FlashStats {
    pub steps: u64,
    pub posedges: u64,
    pub negedges: u64,
    pub transactions: u64,
}

pub struct SpiFlash {
    name: String,
    data: Vec<u8>,
    pins: FlashPins,
    state: ProtocolState,
    stats: FlashStats,
}

impl std::fmt::Debug for SpiFlash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpiFlash")
            .field("name", &self.name)
            .field("size", &self.data.len())
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}

impl SpiFlash {
    /// Binds a flash to an already declared port and claims its data input bus.
    pub fn new(name: &str, names: &FlashPinNames, pins: &mut PinFabric) -> SimResult<Self> {
        let pins = FlashPins {
            clk: pins.input(&names.clk, 1)?,
            csn: pins.input(&names.csn, 1)?,
            d_o: pins.input(&names.d_o, DATA_WIDTH)?,
            d_oe: pins.input(&names.d_oe, DATA_WIDTH)?,
            d_i: pins.claim(&names.d_i, DATA_WIDTH, name)?,
        };
        Ok(Self {
            name: name.to_string(),
            data: vec![0xFF; FLASH_SIZE],
            pins,
            state: ProtocolState {
                data_width: 1,
                ..Default::default()
            },
            stats: FlashStats::default(),
        })
    }

    /// Copies a binary image into the array at `offset`, returning its length.
    pub fn load_data<P: AsRef<Path>>(&mut self, path: P, offset: usize) -> SimResult<usize> {
        let path = path.as_ref();
        if offset >= self.data.len() {
            return Err(SimulationError::FlashOffsetOutOfRange {
                offset,
                size: self.data.len(),
            });
        }
        let image = std::fs::read(path).map_err(|source| SimulationError::FlashImage {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_bytes(&image, offset)?;
        tracing::info!(
            "{}: loaded {} bytes from {:?} at {:#x}",
            self.name,
            image.len(),
            path,
            offset
        );
        Ok(image.len())
    }

    pub fn load_bytes(&mut self, image: &[u8], offset: usize) -> SimResult<()> {
        let size = self.data.len();
        if offset >= size {
            return Err(SimulationError::FlashOffsetOutOfRange { offset, size });
        }
        let available = size - offset;
        if image.len() > available {
            return Err(SimulationError::FlashImageTooLarge {
                len: image.len(),
                offset,
                available,
            });
        }
        self.data[offset..offset + image.len()].copy_from_slice(image);
        Ok(())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn current_command(&self) -> Option<FlashCommand> {
        self.state.command
    }

    pub fn byte_count(&self) -> u32 {
        self.state.byte_count
    }

    pub fn address(&self) -> u32 {
        self.state.addr
    }

    pub fn stats(&self) -> FlashStats {
        self.stats
    }

    fn read_storage(&self, addr: u32) -> SimResult<u8> {
        self.data
            .get(addr as usize)
            .copied()
            .ok_or(SimulationError::FlashAddressOutOfRange(addr))
    }

    fn process_byte(&mut self) -> SimResult<()> {
        let s = &mut self.state;
        s.out_buffer = 0;
        if s.byte_count == 0 {
            s.addr = 0;
            let command = FlashCommand::decode(s.curr_byte)?;
            s.command = Some(command);
            s.data_width = command.data_width();
            self.stats.transactions += 1;
            tracing::debug!("{}: command {:02x} ({:?})", self.name, s.curr_byte, command);
        } else {
            self.advance()?;
        }

        let s = &mut self.state;
        if s.command == Some(FlashCommand::ReadId) {
            s.out_buffer = FLASH_ID[s.byte_count as usize % FLASH_ID.len()];
        }
        Ok(())
    }

    /// Per-byte transition of the addressed read commands.
    fn advance(&mut self) -> SimResult<()> {
        let Some(command) = self.state.command else {
            return Ok(());
        };
        let Some(data_start) = command.data_start() else {
            return Ok(());
        };
        let s = &mut self.state;
        if s.byte_count <= 3 {
            s.addr |= (s.curr_byte as u32) << ((3 - s.byte_count) * 8);
        }
        if s.byte_count == 3 {
            tracing::debug!("{}: {:?} from {:#08x}", self.name, command, s.addr);
        }
        if s.byte_count >= data_start {
            let addr = s.addr;
            let value = self.read_storage(addr)?;
            let s = &mut self.state;
            s.out_buffer = value;
            s.addr = (addr + 1) & ADDR_MASK;
        }
        Ok(())
    }

    fn on_rising_clk(&mut self, pins: &PinFabric) -> SimResult<()> {
        self.stats.posedges += 1;
        let d_o = pins.get(self.pins.d_o);
        let s = &mut self.state;
        if s.byte_count < 4 && s.data_width == 4 && pins.get(self.pins.d_oe) != 0xF {
            tracing::trace!(
                "{}: quad input with d_oe={:#x}",
                self.name,
                pins.get(self.pins.d_oe)
            );
        }
        if s.data_width == 4 {
            s.curr_byte = (s.curr_byte << 4) | (d_o & 0xF) as u8;
        } else {
            s.curr_byte = (s.curr_byte << 1) | (d_o & 0x1) as u8;
        }
        s.out_buffer <<= s.data_width;
        s.bit_count += s.data_width;
        if s.bit_count == 8 {
            self.process_byte()?;
            let s = &mut self.state;
            s.byte_count += 1;
            s.bit_count = 0;
        }
        Ok(())
    }

    fn on_falling_clk(&mut self, pins: &mut PinFabric) {
        self.stats.negedges += 1;
        let s = &self.state;
        let value = if s.data_width == 4 {
            (s.out_buffer >> 4) & 0xF
        } else {
            ((s.out_buffer >> 7) & 0x1) << 1
        };
        pins.set(&self.pins.d_i, value as u64);
    }
}

impl PinModel for SpiFlash {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(
        &mut self,
        pins: &mut PinFabric,
        _timestamp: u64,
        _events: &mut dyn EventSink,
    ) -> SimResult<()> {
        self.stats.steps += 1;
        let clk = pins.is_high(self.pins.clk);
        let csn = pins.is_high(self.pins.csn);

        if csn && !self.state.last_csn {
            let s = &mut self.state;
            if s.bit_count != 0 {
                tracing::debug!(
                    "{}: deselected with {} bits of a partial byte",
                    self.name,
                    s.bit_count
                );
            }
            s.bit_count = 0;
            s.byte_count = 0;
            s.data_width = 1;
        } else if clk && !self.state.last_clk && !csn {
            self.on_rising_clk(pins)?;
        } else if !clk && self.state.last_clk && !csn {
            self.on_falling_clk(pins);
        }

        self.state.last_clk = clk;
        self.state.last_csn = csn;
        Ok(())
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "state": self.state,
            "command": self.state.command.map(|c| c.opcode()),
            "stats": self.stats,
        })
    }
}
