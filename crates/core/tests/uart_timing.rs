use pinsim_core::config::SimulationConfig;
use pinsim_core::peripherals::uart::{UartMonitor, UartPinNames};
use pinsim_core::{Event, OutputPin, PinFabric, PinModel};
use std::sync::{Arc, Mutex};

fn setup(baud_div: u32) -> (PinFabric, UartMonitor, OutputPin) {
    let mut pins = PinFabric::new();
    let names = UartPinNames::with_prefix("uart_0");
    names.declare(&mut pins).unwrap();
    let tx = pins.claim(&names.tx, 1, "soc").unwrap();
    let mut uart = UartMonitor::new("uart_0", &names, baud_div, &mut pins).unwrap();
    uart.set_sink(None, false);
    (pins, uart, tx)
}

/// One idle step, then an 8N1 frame, then a stop-length idle.
fn line_for(byte: u8, baud_div: u32) -> Vec<bool> {
    let mut bits = vec![false];
    bits.extend((0..8).map(|i| (byte >> i) & 1 != 0));
    bits.push(true);
    let mut line = vec![true];
    for b in bits {
        line.extend(std::iter::repeat(b).take(baud_div as usize));
    }
    line.extend(std::iter::repeat(true).take(baud_div as usize));
    line
}

fn run(pins: &mut PinFabric, uart: &mut UartMonitor, tx: &OutputPin, line: &[bool]) -> Vec<Event> {
    let mut events = Vec::new();
    for (t, &level) in line.iter().enumerate() {
        pins.set_bool(tx, level);
        uart.step(pins, t as u64, &mut events).unwrap();
    }
    events
}

#[test]
fn test_single_event_at_eighth_data_bit() {
    let baud_div = SimulationConfig::default().steps_per_bit(115_200).unwrap();
    let (mut pins, mut uart, tx) = setup(baud_div);
    let events = run(&mut pins, &mut uart, &tx, &line_for(0x41, baud_div));

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].peripheral, "uart_0");
    assert_eq!(events[0].event, "tx");
    assert_eq!(events[0].payload, serde_json::json!(65));

    // start edge seen at step 1
    let expected = 1 + (baud_div / 2 + 8 * baud_div - 1) as u64;
    assert_eq!(events[0].timestamp, expected);
    assert!(uart.is_idle());
}

#[test]
fn test_odd_divisor() {
    let (mut pins, mut uart, tx) = setup(7);
    let events = run(&mut pins, &mut uart, &tx, &line_for(0xA5, 7));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload, serde_json::json!(0xA5));
}

#[test]
fn test_line_low_from_start_is_not_a_frame() {
    let (mut pins, mut uart, tx) = setup(8);
    // tx_last starts low, so a line that is low from reset never starts a frame
    let line = vec![false; 200];
    let events = run(&mut pins, &mut uart, &tx, &line);
    assert!(events.is_empty());
    assert!(uart.is_idle());
}

#[test]
fn test_back_to_back_frames_captured() {
    let (mut pins, mut uart, tx) = setup(16);
    let sink = Arc::new(Mutex::new(Vec::new()));
    uart.set_sink(Some(sink.clone()), false);

    let mut line = line_for(b'H', 16);
    line.extend(line_for(b'i', 16).into_iter().skip(1));
    let events = run(&mut pins, &mut uart, &tx, &line);

    assert_eq!(events.len(), 2);
    assert_eq!(*sink.lock().unwrap(), b"Hi".to_vec());
    assert_eq!(uart.received(), 2);
}
