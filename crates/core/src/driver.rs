// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::config::SimulationConfig;
use crate::design::Design;
use crate::event_log::{Event, EventSink, NullSink};
use crate::signals::{OutputPin, PinFabric};
use crate::{PinModel, SimResult, SimulationObserver};
use std::sync::Arc;

pub const CLK_SIGNAL: &str = "clk";
pub const RST_SIGNAL: &str = "rst";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxCycles,
    Condition,
    Halted,
}

/// Forwards model events to the sink and to every observer.
struct ObservedSink<'a> {
    inner: &'a mut (dyn EventSink + Send),
    observers: &'a [Arc<dyn SimulationObserver>],
}

impl EventSink for ObservedSink<'_> {
    fn record(&mut self, event: Event) -> SimResult<()> {
        for observer in self.observers {
            observer.on_event(&event);
        }
        self.inner.record(event)
    }
}

/// Drives simulated time: models, then clock, then design, once per half cycle.
pub struct Simulation {
    config: SimulationConfig,
    pins: PinFabric,
    clk: OutputPin,
    rst: OutputPin,
    design: Option<Box<dyn Design>>,
    models: Vec<Box<dyn PinModel>>,
    events: Box<dyn EventSink + Send>,
    observers: Vec<Arc<dyn SimulationObserver>>,
    timestamp: u64,
    cycles: u64,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("config", &self.config)
            .field("signals", &self.pins.len())
            .field("design", &self.design)
            .field("models", &self.models)
            .field("timestamp", &self.timestamp)
            .field("cycles", &self.cycles)
            .finish()
    }
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> SimResult<Self> {
        let mut pins = PinFabric::new();
        let clk = pins.declare_output(CLK_SIGNAL, 1, "simulation")?;
        let rst = pins.declare_output(RST_SIGNAL, 1, "simulation")?;
        Ok(Self {
            config,
            pins,
            clk,
            rst,
            design: None,
            models: Vec::new(),
            events: Box::new(NullSink),
            observers: Vec::new(),
            timestamp: 0,
            cycles: 0,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn pins(&self) -> &PinFabric {
        &self.pins
    }

    pub fn pins_mut(&mut self) -> &mut PinFabric {
        &mut self.pins
    }

    pub fn set_design(&mut self, design: Box<dyn Design>) {
        tracing::debug!("Design: {}", design.name());
        self.design = Some(design);
    }

    pub fn design(&self) -> Option<&dyn Design> {
        self.design.as_deref()
    }

    pub fn design_as<T: 'static>(&self) -> Option<&T> {
        self.design.as_ref()?.as_any()?.downcast_ref::<T>()
    }

    /// Appends a model; models are stepped in the order they were added.
    pub fn add_model(&mut self, model: Box<dyn PinModel>) {
        tracing::debug!("Model {} registered", model.name());
        self.models.push(model);
    }

    pub fn models(&self) -> &[Box<dyn PinModel>] {
        &self.models
    }

    pub fn find_model<T: 'static>(&self, name: &str) -> Option<&T> {
        self.models
            .iter()
            .find(|m| m.name() == name)?
            .as_any()?
            .downcast_ref::<T>()
    }

    pub fn find_model_mut<T: 'static>(&mut self, name: &str) -> Option<&mut T> {
        self.models
            .iter_mut()
            .find(|m| m.name() == name)?
            .as_any_mut()?
            .downcast_mut::<T>()
    }

    pub fn set_event_sink(&mut self, sink: Box<dyn EventSink + Send>) {
        self.events = sink;
    }

    /// Closes the event sink; further events are discarded.
    pub fn close_event_sink(&mut self) -> SimResult<()> {
        let mut sink: Box<dyn EventSink + Send> = Box::new(NullSink);
        std::mem::swap(&mut sink, &mut self.events);
        sink.close()
    }

    pub fn add_observer(&mut self, observer: Arc<dyn SimulationObserver>) {
        self.observers.push(observer);
    }

    /// Half cycles elapsed; the timestamp of the next model step.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn half_cycle(&mut self, clk: bool) -> SimResult<()> {
        let timestamp = self.timestamp;
        let mut sink = ObservedSink {
            inner: self.events.as_mut(),
            observers: &self.observers,
        };
        for model in self.models.iter_mut() {
            model.step(&mut self.pins, timestamp, &mut sink)?;
        }

        self.pins.set_bool(&self.clk, clk);
        if let Some(design) = self.design.as_mut() {
            design.eval(&mut self.pins)?;
        }
        for observer in &self.observers {
            observer.on_half_cycle(timestamp, &self.pins);
        }
        self.timestamp += 1;
        Ok(())
    }

    /// One full system clock cycle: falling half, then rising half.
    pub fn tick(&mut self) -> SimResult<()> {
        self.half_cycle(false)?;
        self.half_cycle(true)?;
        self.cycles += 1;
        Ok(())
    }

    /// Holds reset asserted for `cycles` full cycles, then releases it.
    pub fn reset(&mut self, cycles: u32) -> SimResult<()> {
        tracing::debug!("Reset asserted for {} cycles", cycles);
        self.pins.set_bool(&self.rst, true);
        for _ in 0..cycles {
            self.tick()?;
        }
        self.pins.set_bool(&self.rst, false);
        Ok(())
    }

    /// Ticks until `stop` holds, the design halts or `max_cycles` more cycles have run.
    ///
    /// A halted design gets one more cycle so the models observe its final outputs.
    pub fn run_until<F>(&mut self, max_cycles: Option<u64>, mut stop: F) -> SimResult<StopReason>
    where
        F: FnMut(&Simulation) -> bool,
    {
        for observer in &self.observers {
            observer.on_simulation_start();
        }

        let mut ran = 0u64;
        let reason = loop {
            if max_cycles.is_some_and(|max| ran >= max) {
                break StopReason::MaxCycles;
            }
            self.tick()?;
            ran += 1;
            if stop(self) {
                break StopReason::Condition;
            }
            if self.design.as_ref().is_some_and(|d| d.halted()) {
                self.tick()?;
                break StopReason::Halted;
            }
        };

        tracing::info!("Stopped after {} cycles: {:?}", ran, reason);
        for observer in &self.observers {
            observer.on_simulation_stop();
        }
        Ok(reason)
    }

    pub fn run(&mut self, max_cycles: u64) -> SimResult<StopReason> {
        self.run_until(Some(max_cycles), |_| false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::InputPin;
    use std::sync::Mutex;

    /// Records the clock level it saw at each step.
    #[derive(Debug)]
    struct ClockWatcher {
        clk: InputPin,
        seen: Vec<(u64, bool)>,
    }

    impl PinModel for ClockWatcher {
        fn name(&self) -> &str {
            "watcher"
        }

        fn step(
            &mut self,
            pins: &mut PinFabric,
            timestamp: u64,
            events: &mut dyn EventSink,
        ) -> SimResult<()> {
            let level = pins.is_high(self.clk);
            self.seen.push((timestamp, level));
            events.record(Event::new(timestamp, "watcher", "clk", level))
        }

        fn as_any(&self) -> Option<&dyn std::any::Any> {
            Some(self)
        }
    }

    fn sim_with_watcher() -> Simulation {
        let mut sim = Simulation::new(SimulationConfig::default()).unwrap();
        let clk = sim.pins().input(CLK_SIGNAL, 1).unwrap();
        sim.add_model(Box::new(ClockWatcher {
            clk,
            seen: Vec::new(),
        }));
        sim
    }

    #[test]
    fn test_models_step_before_clock_toggles() {
        let mut sim = sim_with_watcher();
        sim.tick().unwrap();
        sim.tick().unwrap();

        let watcher = sim.find_model::<ClockWatcher>("watcher").unwrap();
        assert_eq!(
            watcher.seen,
            vec![(0, false), (1, false), (2, true), (3, false)]
        );
        assert_eq!(sim.cycles(), 2);
        assert_eq!(sim.timestamp(), 4);
    }

    #[test]
    fn test_run_limits_and_condition() {
        let mut sim = sim_with_watcher();
        assert_eq!(sim.run(5).unwrap(), StopReason::MaxCycles);
        assert_eq!(sim.cycles(), 5);

        let reason = sim.run_until(Some(100), |s| s.cycles() == 8).unwrap();
        assert_eq!(reason, StopReason::Condition);
        assert_eq!(sim.cycles(), 8);
    }

    #[test]
    fn test_events_reach_sink() {
        let mut sim = sim_with_watcher();
        let events = Arc::new(Mutex::new(Vec::<Event>::new()));
        sim.set_event_sink(Box::new(events.clone()));
        sim.tick().unwrap();
        assert_eq!(events.lock().unwrap().len(), 2);

        sim.close_event_sink().unwrap();
        sim.tick().unwrap();
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_clock_is_single_writer() {
        let mut sim = Simulation::new(SimulationConfig::default()).unwrap();
        assert!(sim.pins_mut().claim(CLK_SIGNAL, 1, "design").is_err());
    }
}
