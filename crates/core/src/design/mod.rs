// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The device under test, seen only through the signals it reads and drives.

pub mod console_boot;

pub use console_boot::{ConsoleBoot, ConsoleBootParams};

use crate::signals::PinFabric;
use crate::SimResult;

pub trait Design: std::fmt::Debug + Send {
    fn name(&self) -> &str;

    /// Re-evaluates the design after the system clock has been set for the half cycle.
    fn eval(&mut self, pins: &mut PinFabric) -> SimResult<()>;

    /// Whether the design has nothing more to do.
    fn halted(&self) -> bool {
        false
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        None
    }
}
