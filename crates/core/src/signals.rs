// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Named bit-vector signals shared between the design and the peripheral models.
//!
//! Every signal has a fixed width and at most one writer. Writers obtain an
//! [`OutputPin`] by claiming the signal; the handle is not `Clone`, so only the
//! claimant can ever drive it. Anyone may read through an [`InputPin`].

use std::collections::HashMap;
use std::fmt;

/// Widest signal the fabric can carry.
pub const MAX_WIDTH: u32 = 64;

/// Logic value of a single pin as seen from outside the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogicLevel {
    #[default]
    Low,
    High,
    HighZ,
}

impl LogicLevel {
    /// Resolves a driven value against its output-enable bit.
    pub fn driven(value: bool, enable: bool) -> Self {
        match (enable, value) {
            (false, _) => LogicLevel::HighZ,
            (true, true) => LogicLevel::High,
            (true, false) => LogicLevel::Low,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            LogicLevel::Low => '0',
            LogicLevel::High => '1',
            LogicLevel::HighZ => 'Z',
        }
    }
}

impl From<bool> for LogicLevel {
    fn from(b: bool) -> Self {
        if b {
            LogicLevel::High
        } else {
            LogicLevel::Low
        }
    }
}

impl fmt::Display for LogicLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignalError {
    #[error("signal '{0}' is not declared")]
    Unknown(String),
    #[error("signal '{0}' is already declared")]
    AlreadyDeclared(String),
    #[error("signal '{name}' is {actual} bits wide, expected {expected}")]
    WidthMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },
    #[error("signal '{name}' has unsupported width {width} (1..={max})", max = MAX_WIDTH)]
    InvalidWidth { name: String, width: u32 },
    #[error("signal '{name}' is already driven by '{owner}', cannot be claimed by '{claimant}'")]
    AlreadyDriven {
        name: String,
        owner: String,
        claimant: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(usize);

/// Read handle to a declared signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputPin {
    id: SignalId,
    width: u32,
}

impl InputPin {
    pub fn id(&self) -> SignalId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }
}

/// Exclusive write handle to a declared signal.
#[derive(Debug, PartialEq, Eq)]
pub struct OutputPin {
    id: SignalId,
    width: u32,
}

impl OutputPin {
    pub fn id(&self) -> SignalId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// A read handle to the same signal, for owners that also sample what they drive.
    pub fn as_input(&self) -> InputPin {
        InputPin {
            id: self.id,
            width: self.width,
        }
    }
}

#[derive(Debug, Clone)]
struct SignalSlot {
    name: String,
    width: u32,
    value: u64,
    owner: Option<String>,
}

fn width_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Registry of all signals in one simulation run.
#[derive(Debug, Default)]
pub struct PinFabric {
    slots: Vec<SignalSlot>,
    by_name: HashMap<String, SignalId>,
}

impl PinFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a new signal, initialised to zero.
    pub fn declare(&mut self, name: &str, width: u32) -> Result<SignalId, SignalError> {
        if width == 0 || width > MAX_WIDTH {
            return Err(SignalError::InvalidWidth {
                name: name.to_string(),
                width,
            });
        }
        if self.by_name.contains_key(name) {
            return Err(SignalError::AlreadyDeclared(name.to_string()));
        }
        let id = SignalId(self.slots.len());
        self.slots.push(SignalSlot {
            name: name.to_string(),
            width,
            value: 0,
            owner: None,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    fn lookup(&self, name: &str, width: u32) -> Result<SignalId, SignalError> {
        let id = *self
            .by_name
            .get(name)
            .ok_or_else(|| SignalError::Unknown(name.to_string()))?;
        let actual = self.slots[id.0].width;
        if actual != width {
            return Err(SignalError::WidthMismatch {
                name: name.to_string(),
                expected: width,
                actual,
            });
        }
        Ok(id)
    }

    pub fn input(&self, name: &str, width: u32) -> Result<InputPin, SignalError> {
        let id = self.lookup(name, width)?;
        Ok(InputPin { id, width })
    }

    /// Claims exclusive write access to a signal on behalf of `owner`.
    pub fn claim(&mut self, name: &str, width: u32, owner: &str) -> Result<OutputPin, SignalError> {
        let id = self.lookup(name, width)?;
        let slot = &mut self.slots[id.0];
        if let Some(existing) = &slot.owner {
            return Err(SignalError::AlreadyDriven {
                name: name.to_string(),
                owner: existing.clone(),
                claimant: owner.to_string(),
            });
        }
        slot.owner = Some(owner.to_string());
        tracing::trace!("{} now drives {}", owner, name);
        Ok(OutputPin { id, width })
    }

    /// Declares a signal and immediately claims it.
    pub fn declare_output(
        &mut self,
        name: &str,
        width: u32,
        owner: &str,
    ) -> Result<OutputPin, SignalError> {
        self.declare(name, width)?;
        self.claim(name, width, owner)
    }

    pub fn get(&self, pin: InputPin) -> u64 {
        self.slots[pin.id.0].value
    }

    pub fn bit(&self, pin: InputPin, index: u32) -> bool {
        index < pin.width && (self.get(pin) >> index) & 1 != 0
    }

    /// Whether bit 0 is set; the natural reading for 1-bit signals.
    pub fn is_high(&self, pin: InputPin) -> bool {
        self.bit(pin, 0)
    }

    /// Effective level of pin `index` of a tri-stated bus.
    pub fn level(&self, value: InputPin, enable: InputPin, index: u32) -> LogicLevel {
        LogicLevel::driven(self.bit(value, index), self.bit(enable, index))
    }

    pub fn set(&mut self, pin: &OutputPin, value: u64) {
        self.slots[pin.id.0].value = value & width_mask(pin.width);
    }

    pub fn set_bool(&mut self, pin: &OutputPin, value: bool) {
        self.set(pin, value as u64);
    }

    /// Current value of a signal by id, for tracing.
    pub fn value(&self, id: SignalId) -> u64 {
        self.slots[id.0].value
    }

    pub fn name(&self, id: SignalId) -> &str {
        &self.slots[id.0].name
    }

    pub fn owner(&self, id: SignalId) -> Option<&str> {
        self.slots[id.0].owner.as_deref()
    }

    /// All signals as `(id, name, width, value)`, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (SignalId, &str, u32, u64)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, s)| (SignalId(i), s.name.as_str(), s.width, s.value))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
