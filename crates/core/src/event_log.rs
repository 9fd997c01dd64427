// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Structured peripheral event records.
//!
//! The on-disk format is a single JSON object, `{"events": [...]}`, with one
//! record per line so logs diff cleanly. [`EventLog`] writes the opening
//! brackets when created and the closing ones in [`EventLog::finish`] (or, as a
//! last resort, on drop).

use crate::SimResult;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: u64,
    pub peripheral: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(
        timestamp: u64,
        peripheral: &str,
        event: &str,
        payload: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            timestamp,
            peripheral: peripheral.to_string(),
            event: event.to_string(),
            payload: payload.into(),
        }
    }
}

/// Destination for events emitted by the models.
pub trait EventSink {
    fn record(&mut self, event: Event) -> SimResult<()>;

    /// Flushes and terminates the underlying output. Later records are dropped.
    fn close(&mut self) -> SimResult<()> {
        Ok(())
    }
}

impl EventSink for Vec<Event> {
    fn record(&mut self, event: Event) -> SimResult<()> {
        self.push(event);
        Ok(())
    }
}

impl EventSink for Arc<Mutex<Vec<Event>>> {
    fn record(&mut self, event: Event) -> SimResult<()> {
        if let Ok(mut guard) = self.lock() {
            guard.push(event);
        }
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&mut self, _event: Event) -> SimResult<()> {
        Ok(())
    }
}

/// Streaming JSON event log.
pub struct EventLog<W: Write> {
    writer: Option<W>,
    had_event: bool,
    count: u64,
}

impl EventLog<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        let file = File::create(path.as_ref())?;
        tracing::info!("Writing event log to {:?}", path.as_ref());
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> EventLog<W> {
    pub fn new(mut writer: W) -> SimResult<Self> {
        writer.write_all(b"{\n\"events\": [\n")?;
        Ok(Self {
            writer: Some(writer),
            had_event: false,
            count: 0,
        })
    }

    pub fn log_event(&mut self, event: &Event) -> SimResult<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        if self.had_event {
            writer.write_all(b",\n")?;
        }
        write!(
            writer,
            "{{ \"timestamp\": {}, \"peripheral\": {}, \"event\": {}, \"payload\": {} }}",
            event.timestamp,
            serde_json::to_string(&event.peripheral)?,
            serde_json::to_string(&event.event)?,
            serde_json::to_string(&event.payload)?,
        )?;
        self.had_event = true;
        self.count += 1;
        Ok(())
    }

    /// Number of records written so far.
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Writes the closing brackets and hands back the writer.
    ///
    /// Returns `None` if the log was already closed through [`EventSink::close`].
    pub fn finish(mut self) -> SimResult<Option<W>> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(None);
        };
        Self::write_footer(&mut writer)?;
        writer.flush()?;
        Ok(Some(writer))
    }

    fn write_footer(writer: &mut W) -> std::io::Result<()> {
        writer.write_all(b"\n]\n}\n")
    }
}

impl<W: Write> EventSink for EventLog<W> {
    fn record(&mut self, event: Event) -> SimResult<()> {
        self.log_event(&event)
    }

    fn close(&mut self) -> SimResult<()> {
        if let Some(mut writer) = self.writer.take() {
            Self::write_footer(&mut writer)?;
            writer.flush()?;
        }
        Ok(())
    }
}

impl<W: Write> Drop for EventLog<W> {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            tracing::warn!("Event log dropped without finish(); closing it");
            let _ = Self::write_footer(&mut writer);
            let _ = writer.flush();
        }
    }
}

impl<W: Write> std::fmt::Debug for EventLog<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("open", &self.writer.is_some())
            .field("count", &self.count)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct EventFile {
    events: Vec<Event>,
}

pub fn parse_event_log(contents: &str) -> SimResult<Vec<Event>> {
    let file: EventFile = serde_json::from_str(contents)?;
    Ok(file.events)
}

pub fn read_event_log<P: AsRef<Path>>(path: P) -> SimResult<Vec<Event>> {
    let contents = std::fs::read_to_string(path)?;
    parse_event_log(&contents)
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EventMismatch {
    #[error("mismatch: {reference} events in reference, {actual} in test output")]
    Count { reference: usize, actual: usize },
    #[error("reference event #{index} {reference:?} mismatches test event {actual:?} beyond timestamp")]
    Event {
        index: usize,
        reference: Box<Event>,
        actual: Box<Event>,
    },
}

/// Checks two logs for the same sequence of events, ignoring timestamps.
pub fn compare_events(reference: &[Event], actual: &[Event]) -> Result<(), EventMismatch> {
    if reference.len() != actual.len() {
        return Err(EventMismatch::Count {
            reference: reference.len(),
            actual: actual.len(),
        });
    }
    for (index, (r, a)) in reference.iter().zip(actual).enumerate() {
        if r.peripheral != a.peripheral || r.event != a.event || r.payload != a.payload {
            return Err(EventMismatch::Event {
                index,
                reference: Box::new(r.clone()),
                actual: Box::new(a.clone()),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(events: &[Event]) -> String {
        let mut log = EventLog::new(Vec::new()).unwrap();
        for e in events {
            log.log_event(e).unwrap();
        }
        String::from_utf8(log.finish().unwrap().unwrap()).unwrap()
    }

    #[test]
    fn test_finish_after_close() {
        let mut log = EventLog::new(Vec::new()).unwrap();
        log.log_event(&Event::new(3, "flash", "command", 0x9F)).unwrap();
        log.close().unwrap();
        log.close().unwrap();
        assert!(log.finish().unwrap().is_none());
    }

    #[test]
    fn test_empty_log_is_valid_json() {
        let text = finished(&[]);
        assert_eq!(text, "{\n\"events\": [\n\n]\n}\n");
        assert!(parse_event_log(&text).unwrap().is_empty());
    }

    #[test]
    fn test_record_layout() {
        let text = finished(&[
            Event::new(12, "uart_0", "tx", 65),
            Event::new(20, "gpio_0", "change", "0101ZZZZ"),
        ]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[2],
            "{ \"timestamp\": 12, \"peripheral\": \"uart_0\", \"event\": \"tx\", \"payload\": 65 },"
        );
        assert_eq!(
            lines[3],
            "{ \"timestamp\": 20, \"peripheral\": \"gpio_0\", \"event\": \"change\", \"payload\": \"0101ZZZZ\" }"
        );

        let events = parse_event_log(&text).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].payload, serde_json::json!("0101ZZZZ"));
    }

    #[test]
    fn test_independent_logs() {
        let mut a = EventLog::new(Vec::new()).unwrap();
        let mut b = EventLog::new(Vec::new()).unwrap();
        a.log_event(&Event::new(1, "uart_0", "tx", 1)).unwrap();
        b.log_event(&Event::new(2, "uart_1", "tx", 2)).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);

        let b_text = String::from_utf8(b.finish().unwrap().unwrap()).unwrap();
        assert!(!b_text.contains("uart_0"));
        assert!(!b_text.contains(",\n"));

        a.close().unwrap();
        a.log_event(&Event::new(3, "uart_0", "tx", 3)).unwrap();
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn test_compare_ignores_timestamps() {
        let reference = vec![Event::new(10, "uart_0", "tx", 73)];
        let same = vec![Event::new(99, "uart_0", "tx", 73)];
        assert!(compare_events(&reference, &same).is_ok());

        let other = vec![Event::new(10, "uart_0", "tx", 74)];
        assert!(matches!(
            compare_events(&reference, &other),
            Err(EventMismatch::Event { index: 0, .. })
        ));
        assert_eq!(
            compare_events(&reference, &[]),
            Err(EventMismatch::Count {
                reference: 1,
                actual: 0
            })
        );
    }
}
