use pinsim_core::peripherals::gpio::{GpioBank, GpioPinNames};
use pinsim_core::{Event, OutputPin, PinFabric, PinModel};

fn setup(width: u32) -> (PinFabric, GpioBank, OutputPin, OutputPin) {
    let mut pins = PinFabric::new();
    let names = GpioPinNames::with_prefix("gpio_0");
    names.declare(&mut pins, width).unwrap();
    let o = pins.claim(&names.o, width, "soc").unwrap();
    let oe = pins.claim(&names.oe, width, "soc").unwrap();
    let bank = GpioBank::new("gpio_0", &names, width, &mut pins).unwrap();
    (pins, bank, o, oe)
}

#[test]
fn test_enable_change_reported_once() {
    let (mut pins, mut bank, o, oe) = setup(8);
    let mut events: Vec<Event> = Vec::new();

    bank.step(&mut pins, 0, &mut events).unwrap();
    assert!(events.is_empty());

    pins.set(&o, 0x50);
    pins.set(&oe, 0xF0);
    bank.step(&mut pins, 1, &mut events).unwrap();
    bank.step(&mut pins, 2, &mut events).unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].timestamp, 1);
    assert_eq!(events[0].event, "change");
    assert_eq!(events[0].payload, serde_json::json!("0101ZZZZ"));
    assert_eq!(bank.levels(), "0101ZZZZ");
}

#[test]
fn test_undriven_value_change_still_reported() {
    let (mut pins, mut bank, o, _oe) = setup(4);
    let mut events: Vec<Event> = Vec::new();

    pins.set(&o, 0x3);
    bank.step(&mut pins, 0, &mut events).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload, serde_json::json!("ZZZZ"));
}

#[test]
fn test_wide_bank() {
    let (mut pins, mut bank, o, oe) = setup(64);
    let mut events: Vec<Event> = Vec::new();

    pins.set(&o, 1u64 << 63);
    pins.set(&oe, u64::MAX);
    bank.step(&mut pins, 0, &mut events).unwrap();

    let levels = events[0].payload.as_str().unwrap().to_string();
    assert_eq!(levels.len(), 64);
    assert!(levels.starts_with("10"));
    assert!(levels.ends_with('0'));
}
