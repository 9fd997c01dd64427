// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod flash;
pub mod gpio;
pub mod uart;

pub use flash::{FlashCommand, FlashPinNames, SpiFlash};
pub use gpio::{GpioBank, GpioPinNames};
pub use uart::{UartMonitor, UartPinNames};
