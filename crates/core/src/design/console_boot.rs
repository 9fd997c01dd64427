// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Behavioural SoC that boots like the reference firmware: wake the flash,
//! identify it, fetch a console string, print it on the UART and set the GPIOs.

use super::Design;
use crate::config::{DEFAULT_BAUD_RATE, DEFAULT_CLOCK_HZ};
use crate::driver::{CLK_SIGNAL, RST_SIGNAL};
use crate::peripherals::flash::{FlashPinNames, DATA_WIDTH, FLASH_ID};
use crate::peripherals::gpio::GpioPinNames;
use crate::peripherals::uart::UartPinNames;
use crate::signals::{InputPin, OutputPin, PinFabric};
use crate::SimResult;
use pinsim_config::ReadMode;

/// System clock cycles with chip select high between two transactions.
const DESELECT_CYCLES: u32 = 2;

#[derive(Debug, Clone)]
pub struct ConsoleBootParams {
    pub cycles_per_bit: u32,
    pub console_offset: u32,
    pub max_console_len: usize,
    pub read_mode: ReadMode,
    pub gpio_output: u64,
    pub gpio_enable: u64,
}

impl Default for ConsoleBootParams {
    fn default() -> Self {
        Self {
            cycles_per_bit: (DEFAULT_CLOCK_HZ / DEFAULT_BAUD_RATE as u64) as u32,
            console_offset: 0x10_0000,
            max_console_len: 256,
            read_mode: ReadMode::Quad,
            gpio_output: 0,
            gpio_enable: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SpiByte {
    mosi: u8,
    width: u32,
    oe: u64,
    capture: bool,
}

impl SpiByte {
    fn send(mosi: u8) -> Self {
        Self {
            mosi,
            width: 1,
            oe: 0x1,
            capture: false,
        }
    }

    fn send_quad(mosi: u8) -> Self {
        Self {
            mosi,
            width: 4,
            oe: 0xF,
            capture: false,
        }
    }

    fn dummy() -> Self {
        Self {
            mosi: 0,
            width: 4,
            oe: 0,
            capture: false,
        }
    }

    fn recv(width: u32) -> Self {
        Self {
            mosi: 0,
            width,
            oe: 0,
            capture: true,
        }
    }
}

#[derive(Debug)]
struct FlashPort {
    clk: OutputPin,
    csn: OutputPin,
    d_o: OutputPin,
    d_oe: OutputPin,
    d_i: InputPin,
}

/// One chip-select framed transfer, clocked at half the system clock.
#[derive(Debug)]
struct SpiTransfer {
    bytes: Vec<SpiByte>,
    stop_at_nul: bool,
    selected: bool,
    sck: bool,
    index: usize,
    bit: u32,
    rx: u8,
    captured: Vec<u8>,
}

impl SpiTransfer {
    fn new(bytes: Vec<SpiByte>) -> Self {
        Self {
            bytes,
            stop_at_nul: false,
            selected: false,
            sck: false,
            index: 0,
            bit: 0,
            rx: 0,
            captured: Vec::new(),
        }
    }

    /// Advances one system clock cycle; true once chip select has been released.
    fn clock(&mut self, port: &FlashPort, pins: &mut PinFabric) -> bool {
        if !self.selected {
            pins.set_bool(&port.clk, false);
            pins.set_bool(&port.csn, false);
            self.selected = true;
            return false;
        }

        if self.sck {
            self.sck = false;
            pins.set_bool(&port.clk, false);
            return false;
        }

        let Some(byte) = self.bytes.get(self.index).copied() else {
            pins.set_bool(&port.csn, true);
            pins.set(&port.d_oe, 0);
            return true;
        };

        if byte.capture {
            let d_i = pins.get(port.d_i);
            self.rx = if byte.width == 4 {
                (self.rx << 4) | (d_i & 0xF) as u8
            } else {
                (self.rx << 1) | ((d_i >> 1) & 0x1) as u8
            };
        }
        let shift = 8 - byte.width - self.bit;
        let mask = (1u8 << byte.width) - 1;
        pins.set(&port.d_o, ((byte.mosi >> shift) & mask) as u64);
        pins.set(&port.d_oe, byte.oe);
        pins.set_bool(&port.clk, true);
        self.sck = true;

        self.bit += byte.width;
        if self.bit == 8 {
            self.bit = 0;
            self.index += 1;
            if byte.capture {
                self.captured.push(self.rx);
                if self.stop_at_nul && self.rx == 0 {
                    self.index = self.bytes.len();
                }
            }
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    PowerUp,
    ReadId,
    ReadConsole,
    Transmit,
    Gpio,
    Halted,
}

#[derive(Debug)]
pub struct ConsoleBoot {
    params: ConsoleBootParams,
    clk: InputPin,
    rst: InputPin,
    flash: FlashPort,
    tx: OutputPin,
    gpio_o: OutputPin,
    gpio_oe: OutputPin,
    last_clk: bool,
    phase: Phase,
    transfer: Option<SpiTransfer>,
    gap: u32,
    flash_id: Option<[u8; 4]>,
    console: Vec<u8>,
    tx_index: usize,
    tx_slot: u32,
    tx_cycles: u32,
}

impl ConsoleBoot {
    /// Declares the signals of every port the design is wired to and claims its outputs.
    pub fn new(
        params: ConsoleBootParams,
        flash: &FlashPinNames,
        uart: &UartPinNames,
        gpio: &GpioPinNames,
        gpio_width: u32,
        pins: &mut PinFabric,
    ) -> SimResult<Self> {
        const OWNER: &str = "console_boot";
        flash.declare(pins)?;
        uart.declare(pins)?;
        gpio.declare(pins, gpio_width)?;

        Ok(Self {
            clk: pins.input(CLK_SIGNAL, 1)?,
            rst: pins.input(RST_SIGNAL, 1)?,
            flash: FlashPort {
                clk: pins.claim(&flash.clk, 1, OWNER)?,
                csn: pins.claim(&flash.csn, 1, OWNER)?,
                d_o: pins.claim(&flash.d_o, DATA_WIDTH, OWNER)?,
                d_oe: pins.claim(&flash.d_oe, DATA_WIDTH, OWNER)?,
                d_i: pins.input(&flash.d_i, DATA_WIDTH)?,
            },
            tx: pins.claim(&uart.tx, 1, OWNER)?,
            gpio_o: pins.claim(&gpio.o, gpio_width, OWNER)?,
            gpio_oe: pins.claim(&gpio.oe, gpio_width, OWNER)?,
            params,
            last_clk: false,
            phase: Phase::PowerUp,
            transfer: None,
            gap: 0,
            flash_id: None,
            console: Vec::new(),
            tx_index: 0,
            tx_slot: 0,
            tx_cycles: 0,
        })
    }

    /// Identification bytes read back from the flash, once known.
    pub fn flash_id(&self) -> Option<[u8; 4]> {
        self.flash_id
    }

    /// The console string fetched from flash, without its terminator.
    pub fn console(&self) -> &[u8] {
        &self.console
    }

    fn reset(&mut self, pins: &mut PinFabric) {
        pins.set_bool(&self.flash.csn, true);
        pins.set_bool(&self.flash.clk, false);
        pins.set(&self.flash.d_o, 0);
        pins.set(&self.flash.d_oe, 0);
        pins.set_bool(&self.tx, true);
        pins.set(&self.gpio_o, 0);
        pins.set(&self.gpio_oe, 0);
        self.phase = Phase::PowerUp;
        self.transfer = None;
        self.gap = DESELECT_CYCLES;
        self.flash_id = None;
        self.console.clear();
        self.tx_index = 0;
        self.tx_slot = 0;
        self.tx_cycles = 0;
    }

    fn transfer_for(&self, phase: Phase) -> SpiTransfer {
        match phase {
            Phase::PowerUp => SpiTransfer::new(vec![SpiByte::send(0xAB)]),
            Phase::ReadId => {
                let mut bytes = vec![SpiByte::send(0x9F)];
                bytes.extend(std::iter::repeat(SpiByte::recv(1)).take(FLASH_ID.len()));
                SpiTransfer::new(bytes)
            }
            _ => {
                let [_, a2, a1, a0] = self.params.console_offset.to_be_bytes();
                let mut bytes = match self.params.read_mode {
                    ReadMode::Single => vec![
                        SpiByte::send(0x03),
                        SpiByte::send(a2),
                        SpiByte::send(a1),
                        SpiByte::send(a0),
                    ],
                    ReadMode::Quad => vec![
                        SpiByte::send(0xEB),
                        SpiByte::send_quad(a2),
                        SpiByte::send_quad(a1),
                        SpiByte::send_quad(a0),
                        // mode
                        SpiByte::send_quad(0x00),
                        SpiByte::dummy(),
                        SpiByte::dummy(),
                    ],
                };
                let width = match self.params.read_mode {
                    ReadMode::Single => 1,
                    ReadMode::Quad => 4,
                };
                bytes.extend(
                    std::iter::repeat(SpiByte::recv(width)).take(self.params.max_console_len),
                );
                let mut transfer = SpiTransfer::new(bytes);
                transfer.stop_at_nul = true;
                transfer
            }
        }
    }

    fn finish_transfer(&mut self, phase: Phase, captured: Vec<u8>) {
        match phase {
            Phase::PowerUp => {
                tracing::debug!("console_boot: flash powered up");
                self.phase = Phase::ReadId;
            }
            Phase::ReadId => {
                let mut id = [0u8; 4];
                id.copy_from_slice(&captured[..FLASH_ID.len()]);
                if id != FLASH_ID {
                    tracing::warn!("console_boot: unexpected flash id {:02x?}", id);
                } else {
                    tracing::info!("console_boot: flash id {:02x?}", id);
                }
                self.flash_id = Some(id);
                self.phase = Phase::ReadConsole;
            }
            _ => {
                let mut console = captured;
                if let Some(end) = console.iter().position(|&b| b == 0) {
                    console.truncate(end);
                }
                tracing::debug!(
                    "console_boot: fetched {} console bytes from {:#x}",
                    console.len(),
                    self.params.console_offset
                );
                self.console = console;
                self.phase = Phase::Transmit;
            }
        }
    }

    fn spi_cycle(&mut self, pins: &mut PinFabric) {
        if self.gap > 0 {
            self.gap -= 1;
            return;
        }
        let phase = self.phase;
        let mut transfer = match self.transfer.take() {
            Some(t) => t,
            None => self.transfer_for(phase),
        };
        if transfer.clock(&self.flash, pins) {
            self.gap = DESELECT_CYCLES;
            self.finish_transfer(phase, transfer.captured);
        } else {
            self.transfer = Some(transfer);
        }
    }

    fn transmit_cycle(&mut self, pins: &mut PinFabric) {
        let Some(&byte) = self.console.get(self.tx_index) else {
            self.phase = Phase::Gpio;
            return;
        };
        if self.tx_cycles == 0 {
            let level = match self.tx_slot {
                0 => false,
                1..=8 => (byte >> (self.tx_slot - 1)) & 1 != 0,
                _ => true,
            };
            pins.set_bool(&self.tx, level);
        }
        self.tx_cycles += 1;
        if self.tx_cycles == self.params.cycles_per_bit {
            self.tx_cycles = 0;
            self.tx_slot += 1;
            if self.tx_slot == 10 {
                self.tx_slot = 0;
                self.tx_index += 1;
            }
        }
    }
}

impl Design for ConsoleBoot {
    fn name(&self) -> &str {
        "console_boot"
    }

    fn eval(&mut self, pins: &mut PinFabric) -> SimResult<()> {
        let clk = pins.is_high(self.clk);
        let rising = clk && !self.last_clk;
        self.last_clk = clk;
        if !rising {
            return Ok(());
        }
        if pins.is_high(self.rst) {
            self.reset(pins);
            return Ok(());
        }

        match self.phase {
            Phase::PowerUp | Phase::ReadId | Phase::ReadConsole => self.spi_cycle(pins),
            Phase::Transmit => self.transmit_cycle(pins),
            Phase::Gpio => {
                pins.set(&self.gpio_o, self.params.gpio_output);
                pins.set(&self.gpio_oe, self.params.gpio_enable);
                tracing::info!("console_boot: boot complete");
                self.phase = Phase::Halted;
            }
            Phase::Halted => {}
        }
        Ok(())
    }

    fn halted(&self) -> bool {
        self.phase == Phase::Halted
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_transfer_layout() {
        let mut pins = PinFabric::new();
        pins.declare(CLK_SIGNAL, 1).unwrap();
        pins.declare(RST_SIGNAL, 1).unwrap();
        let params = ConsoleBootParams {
            console_offset: 0x12_3456,
            max_console_len: 8,
            ..Default::default()
        };
        let boot = ConsoleBoot::new(
            params,
            &FlashPinNames::with_prefix("flash"),
            &UartPinNames::with_prefix("uart_0"),
            &GpioPinNames::with_prefix("gpio_0"),
            8,
            &mut pins,
        )
        .unwrap();

        let transfer = boot.transfer_for(Phase::ReadConsole);
        let header: Vec<u8> = transfer.bytes[..5].iter().map(|b| b.mosi).collect();
        assert_eq!(header, vec![0xEB, 0x12, 0x34, 0x56, 0x00]);
        assert_eq!(transfer.bytes.len(), 7 + 8);
        assert!(transfer.bytes[1..5].iter().all(|b| b.width == 4));
        assert!(transfer.bytes[5..7].iter().all(|b| !b.capture && b.oe == 0));
        assert!(transfer.bytes[7..].iter().all(|b| b.capture));
    }

    #[test]
    fn test_outputs_claimed() {
        let mut pins = PinFabric::new();
        pins.declare(CLK_SIGNAL, 1).unwrap();
        pins.declare(RST_SIGNAL, 1).unwrap();
        ConsoleBoot::new(
            ConsoleBootParams::default(),
            &FlashPinNames::with_prefix("flash"),
            &UartPinNames::with_prefix("uart_0"),
            &GpioPinNames::with_prefix("gpio_0"),
            8,
            &mut pins,
        )
        .unwrap();

        assert!(pins.claim("flash_csn_o", 1, "other").is_err());
        assert!(pins.claim("uart_0_tx_o", 1, "other").is_err());
        assert!(pins.claim("flash_d_i", DATA_WIDTH, "flash").is_ok());
    }
}
