// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::config::STEPS_PER_CYCLE;
use crate::event_log::Event;
use crate::signals::PinFabric;
use crate::SimulationObserver;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug)]
pub struct PerformanceMetrics {
    half_cycle_count: AtomicU64,
    event_count: AtomicU64,
    events_by_peripheral: Mutex<HashMap<String, u64>>,
    start_time: Mutex<Instant>,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self {
            half_cycle_count: AtomicU64::new(0),
            event_count: AtomicU64::new(0),
            events_by_peripheral: Mutex::new(HashMap::new()),
            start_time: Mutex::new(Instant::now()),
        }
    }

    pub fn reset(&self) {
        self.half_cycle_count.store(0, Ordering::SeqCst);
        self.event_count.store(0, Ordering::SeqCst);
        if let Ok(mut m) = self.events_by_peripheral.lock() {
            m.clear();
        }
        if let Ok(mut t) = self.start_time.lock() {
            *t = Instant::now();
        }
    }

    pub fn get_cycles(&self) -> u64 {
        self.half_cycle_count.load(Ordering::SeqCst) / STEPS_PER_CYCLE
    }

    pub fn get_events(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst)
    }

    pub fn get_events_for(&self, peripheral: &str) -> u64 {
        self.events_by_peripheral
            .lock()
            .ok()
            .and_then(|m| m.get(peripheral).copied())
            .unwrap_or(0)
    }

    /// Simulated system clock cycles per wall-clock second.
    pub fn get_cycles_per_sec(&self) -> f64 {
        let elapsed = self
            .start_time
            .lock()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        if elapsed > 0.0 {
            self.get_cycles() as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl SimulationObserver for PerformanceMetrics {
    fn on_half_cycle(&self, _timestamp: u64, _pins: &PinFabric) {
        self.half_cycle_count.fetch_add(1, Ordering::SeqCst);
    }

    fn on_event(&self, event: &Event) {
        self.event_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut m) = self.events_by_peripheral.lock() {
            *m.entry(event.peripheral.clone()).or_insert(0) += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let metrics = PerformanceMetrics::new();
        let pins = PinFabric::new();
        for t in 0..6 {
            metrics.on_half_cycle(t, &pins);
        }
        metrics.on_event(&Event::new(1, "uart_0", "tx", 65));
        metrics.on_event(&Event::new(2, "uart_0", "tx", 66));
        metrics.on_event(&Event::new(3, "gpio_0", "change", "ZZ"));

        assert_eq!(metrics.get_cycles(), 3);
        assert_eq!(metrics.get_events(), 3);
        assert_eq!(metrics.get_events_for("uart_0"), 2);
        assert_eq!(metrics.get_events_for("flash"), 0);

        metrics.reset();
        assert_eq!(metrics.get_events(), 0);
    }
}
