// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::event_log::{Event, EventSink};
use crate::signals::{InputPin, LogicLevel, OutputPin, PinFabric, MAX_WIDTH};
use crate::{PinModel, SimResult, SignalError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioPinNames {
    pub o: String,
    pub oe: String,
    pub i: String,
}

impl GpioPinNames {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            o: format!("{}_o", prefix),
            oe: format!("{}_oe", prefix),
            i: format!("{}_i", prefix),
        }
    }

    pub fn declare(&self, pins: &mut PinFabric, width: u32) -> SimResult<()> {
        pins.declare(&self.o, width)?;
        pins.declare(&self.oe, width)?;
        pins.declare(&self.i, width)?;
        Ok(())
    }
}

/// Renders a tri-stated bus most-significant pin first.
pub fn render(o: u64, oe: u64, width: u32) -> String {
    (0..width)
        .rev()
        .map(|i| LogicLevel::driven((o >> i) & 1 != 0, (oe >> i) & 1 != 0).as_char())
        .collect()
}

/// GPIO bank that reports every change of its effective pin levels.
#[derive(Debug, serde::Serialize)]
pub struct GpioBank {
    name: String,
    width: u32,
    o_last: u64,
    oe_last: u64,
    input: u64,
    #[serde(skip)]
    o: InputPin,
    #[serde(skip)]
    oe: InputPin,
    #[serde(skip)]
    i: OutputPin,
}

impl GpioBank {
    pub fn new(name: &str, names: &GpioPinNames, width: u32, pins: &mut PinFabric) -> SimResult<Self> {
        if width == 0 || width > MAX_WIDTH {
            return Err(SignalError::InvalidWidth {
                name: names.o.clone(),
                width,
            }
            .into());
        }
        Ok(Self {
            name: name.to_string(),
            width,
            o_last: 0,
            oe_last: 0,
            input: 0,
            o: pins.input(&names.o, width)?,
            oe: pins.input(&names.oe, width)?,
            i: pins.claim(&names.i, width, name)?,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Value driven onto the input bus from the next step on.
    pub fn set_input(&mut self, value: u64) {
        self.input = value;
    }

    /// Effective levels as of the last step.
    pub fn levels(&self) -> String {
        render(self.o_last, self.oe_last, self.width)
    }

    pub fn level(&self, index: u32) -> LogicLevel {
        if index >= self.width {
            return LogicLevel::HighZ;
        }
        LogicLevel::driven(
            (self.o_last >> index) & 1 != 0,
            (self.oe_last >> index) & 1 != 0,
        )
    }
}

impl PinModel for GpioBank {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(
        &mut self,
        pins: &mut PinFabric,
        timestamp: u64,
        events: &mut dyn EventSink,
    ) -> SimResult<()> {
        let o = pins.get(self.o);
        let oe = pins.get(self.oe);
        if o != self.o_last || oe != self.oe_last {
            let levels = render(o, oe, self.width);
            tracing::debug!("{}: {}", self.name, levels);
            events.record(Event::new(timestamp, &self.name, "change", levels))?;
        }
        self.o_last = o;
        self.oe_last = oe;
        pins.set(&self.i, self.input);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        assert_eq!(render(0x50, 0xF0, 8), "0101ZZZZ");
        assert_eq!(render(0x0, 0x0, 4), "ZZZZ");
        assert_eq!(render(0x3, 0x3, 2), "11");
    }

    #[test]
    fn test_input_bus_driven() {
        let mut pins = PinFabric::new();
        let names = GpioPinNames::with_prefix("gpio_0");
        names.declare(&mut pins, 8).unwrap();
        let mut gpio = GpioBank::new("gpio_0", &names, 8, &mut pins).unwrap();
        let i = pins.input("gpio_0_i", 8).unwrap();

        gpio.set_input(0x1A5);
        let mut events = Vec::new();
        gpio.step(&mut pins, 0, &mut events).unwrap();
        assert_eq!(pins.get(i), 0xA5);
        assert!(events.is_empty());
        assert_eq!(gpio.level(0), LogicLevel::HighZ);
    }
}
