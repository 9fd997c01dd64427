// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{SimResult, SimulationError};
use serde::{Deserialize, Serialize};

/// Model steps per system clock cycle: one before the falling edge, one before the rising edge.
pub const STEPS_PER_CYCLE: u64 = 2;

pub const DEFAULT_CLOCK_HZ: u64 = 25_000_000;
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// System clock frequency of the design, used to derive UART divisors.
    pub clock_hz: u64,
    /// Full clock cycles spent with reset asserted before the run starts.
    pub reset_cycles: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            clock_hz: DEFAULT_CLOCK_HZ,
            reset_cycles: 1,
        }
    }
}

impl SimulationConfig {
    /// System clock cycles per UART bit at `baud_rate`.
    pub fn cycles_per_bit(&self, baud_rate: u32) -> SimResult<u32> {
        self.divide(baud_rate, 1)
    }

    /// Model steps per UART bit, i.e. the UART model's baud divisor.
    pub fn steps_per_bit(&self, baud_rate: u32) -> SimResult<u32> {
        self.divide(baud_rate, STEPS_PER_CYCLE)
    }

    fn divide(&self, baud_rate: u32, scale: u64) -> SimResult<u32> {
        let invalid = || SimulationError::InvalidBaudRate {
            clock_hz: self.clock_hz,
            baud_rate,
        };
        let cycles = self
            .clock_hz
            .checked_div(baud_rate as u64)
            .ok_or_else(invalid)?;
        let scaled = cycles.checked_mul(scale).ok_or_else(invalid)?;
        u32::try_from(scaled).map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_divisors() {
        let config = SimulationConfig::default();
        assert_eq!(config.cycles_per_bit(115_200).unwrap(), 217);
        assert_eq!(config.steps_per_bit(115_200).unwrap(), 434);
        assert_eq!(
            crate::peripherals::uart::DEFAULT_BAUD_DIV,
            config.steps_per_bit(DEFAULT_BAUD_RATE).unwrap()
        );
        assert_eq!(
            crate::design::ConsoleBootParams::default().cycles_per_bit,
            config.cycles_per_bit(DEFAULT_BAUD_RATE).unwrap()
        );
    }

    #[test]
    fn test_divisor_out_of_range() {
        let config = SimulationConfig {
            clock_hz: 3_000_000_000,
            reset_cycles: 1,
        };
        assert_eq!(config.cycles_per_bit(1).unwrap(), 3_000_000_000);
        assert!(matches!(
            config.steps_per_bit(1),
            Err(SimulationError::InvalidBaudRate {
                clock_hz: 3_000_000_000,
                baud_rate: 1
            })
        ));
        assert!(config.steps_per_bit(0).is_err());
    }
}
