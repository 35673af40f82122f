//! Wire records from the counter frontend.
//!
//! The capture hardware streams one 4-byte record per event over its serial
//! link: a tag byte (`'W'` counter wrap, `'E'` reference edge), a flags
//! byte, and the big-endian latched counter value (zero for wraps).
//!
//! Flag bit 0 on an edge record mirrors the capture unit's overflow flag: a
//! wrap was pending at the capture instant. Its effect is already inside
//! the capture arithmetic, so the wrap record that follows such an edge is
//! dropped instead of replayed into the accumulator.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use byteorder::{BigEndian, ByteOrder};
use log::{debug, warn};

use crate::accumulator::Timebase;

pub const RECORD_LEN: usize = 4;

const TAG_WRAP: u8 = b'W';
const TAG_EDGE: u8 = b'E';
const FLAG_CAPTURE_OVERFLOW: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterEvent {
    Wrap,
    Edge { latched: u16, overflow_pending: bool },
}

/// Decodes one frontend record; `None` on an unknown tag (framing slip).
pub fn parse_record(rec: &[u8; RECORD_LEN]) -> Option<CounterEvent> {
    let value = BigEndian::read_u16(&rec[2..4]);
    match rec[0] {
        TAG_WRAP => Some(CounterEvent::Wrap),
        TAG_EDGE => Some(CounterEvent::Edge {
            latched: value,
            overflow_pending: rec[1] & FLAG_CAPTURE_OVERFLOW != 0,
        }),
        _ => None,
    }
}

/// Reads frontend records and applies them to the shared timebase. Runs on
/// its own thread, standing in for the two interrupt contexts: events are
/// applied strictly in arrival order and never concurrently with each other.
pub struct FrontendPump<R: Read> {
    port: R,
    timebase: Arc<Timebase>,
    /// Set while the last edge carried the capture-overflow flag; the next
    /// wrap record is stale and gets dropped.
    absorb_wrap: bool,
}

impl<R: Read> FrontendPump<R> {
    pub fn new(port: R, timebase: Arc<Timebase>) -> Self {
        FrontendPump {
            port,
            timebase,
            absorb_wrap: false,
        }
    }

    /// Pumps records until the port fails or `running` clears. On a framing
    /// slip the stream is resynchronized one byte at a time.
    pub fn run(mut self, running: &AtomicBool) -> Result<()> {
        let mut rec = [0u8; RECORD_LEN];
        while running.load(Ordering::SeqCst) {
            self.port
                .read_exact(&mut rec)
                .context("counter frontend read failed")?;
            loop {
                match parse_record(&rec) {
                    Some(event) => {
                        self.apply(event);
                        break;
                    }
                    None => {
                        debug!("frontend framing slip, tag {:#04x}", rec[0]);
                        rec.rotate_left(1);
                        self.port
                            .read_exact(&mut rec[RECORD_LEN - 1..])
                            .context("counter frontend read failed")?;
                    }
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, event: CounterEvent) {
        match event {
            CounterEvent::Wrap => {
                if self.absorb_wrap {
                    self.absorb_wrap = false;
                    return;
                }
                self.timebase.on_counter_wrap();
            }
            CounterEvent::Edge {
                latched,
                overflow_pending,
            } => {
                if self.absorb_wrap {
                    // Two edges with no wrap in between; the pending absorb
                    // is stale.
                    warn!("absorbed wrap never arrived before next edge");
                    self.absorb_wrap = false;
                }
                self.timebase.on_reference_edge(latched);
                self.absorb_wrap = overflow_pending;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn edge(latched: u16, overflow: bool) -> [u8; RECORD_LEN] {
        let mut rec = [TAG_EDGE, if overflow { 1 } else { 0 }, 0, 0];
        BigEndian::write_u16(&mut rec[2..4], latched);
        rec
    }

    fn wrap() -> [u8; RECORD_LEN] {
        [TAG_WRAP, 0, 0, 0]
    }

    fn pump(stream: Vec<u8>) -> Arc<Timebase> {
        let tb = Arc::new(Timebase::new());
        let pump = FrontendPump::new(Cursor::new(stream), tb.clone());
        let running = AtomicBool::new(true);
        // The cursor runs dry eventually; that's the expected exit.
        assert!(pump.run(&running).is_err());
        tb
    }

    #[test]
    fn test_parse_wrap() {
        assert_eq!(parse_record(&wrap()), Some(CounterEvent::Wrap));
    }

    #[test]
    fn test_parse_edge_with_flags() {
        assert_eq!(
            parse_record(&edge(0xC8F3, false)),
            Some(CounterEvent::Edge {
                latched: 0xC8F3,
                overflow_pending: false
            })
        );
        assert_eq!(
            parse_record(&edge(7, true)),
            Some(CounterEvent::Edge {
                latched: 7,
                overflow_pending: true
            })
        );
    }

    #[test]
    fn test_parse_rejects_unknown_tag() {
        assert_eq!(parse_record(&[0x00, 0, 0, 0]), None);
        assert_eq!(parse_record(&[b'X', 0, 0, 0]), None);
    }

    #[test]
    fn test_pump_accumulates_wraps_and_edges() {
        let mut stream = Vec::new();
        // Two full wraps then an edge latching 100: 2 * 65536 + 100 ticks.
        stream.extend_from_slice(&wrap());
        stream.extend_from_slice(&wrap());
        stream.extend_from_slice(&edge(100, false));
        let tb = pump(stream);
        assert_eq!(tb.take_sample(), Some(2 * 0x1_0000 + 100));
    }

    #[test]
    fn test_pump_drops_absorbed_wrap() {
        let mut stream = Vec::new();
        // An edge at counter 5 with the overflow flag set: the wrap that
        // follows belongs to the capture and must not count again.
        stream.extend_from_slice(&edge(5, true));
        stream.extend_from_slice(&wrap());
        // A normal second afterwards: one real wrap, edge at 200.
        stream.extend_from_slice(&wrap());
        stream.extend_from_slice(&edge(200, false));
        let tb = pump(stream);
        // count_add after the flagged edge is 65536 - 5; the absorbed wrap
        // added nothing, the real wrap added the remainder. The second
        // edge's sample is the one left pending.
        assert_eq!(tb.take_sample(), Some(0x1_0000 - 5 + 200));
    }

    #[test]
    fn test_pump_resynchronizes_after_garbage() {
        let mut stream = vec![0xFFu8, 0x12]; // two junk bytes
        stream.extend_from_slice(&edge(42, false));
        let tb = pump(stream);
        assert_eq!(tb.take_sample(), Some(42));
    }

    #[test]
    fn test_pump_stops_when_flag_clears() {
        let tb = Arc::new(Timebase::new());
        let pump = FrontendPump::new(Cursor::new(vec![0u8; 64]), tb.clone());
        let running = AtomicBool::new(false);
        assert!(pump.run(&running).is_ok());
        assert_eq!(tb.take_sample(), None);
    }
}
