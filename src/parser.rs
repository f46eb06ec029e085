// src/parser.rs
use crate::event::MboEvent;
use bytes::{Bytes, BytesMut};
use smallvec::SmallVec;

// Upstream record layout (comma-separated, 15 fields):
// ts_recv,ts_event,rtype,publisher_id,instrument_id,action,side,price,size,channel_id,order_id,flags,ts_in_delta,sequence,symbol

/// Accumulates raw feed bytes and yields complete lines. The trailing
/// `\n` is consumed and an optional `\r` before it stripped. The buffer
/// is dropped wholesale on reconnect via `reset`.
pub struct LineFramer {
    buf: BytesMut,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1 << 20),
        }
    }

    #[inline]
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<Bytes> {
        let nl = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line = self.buf.split_to(nl + 1);
        line.truncate(nl);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Some(line.freeze())
    }

    /// Unterminated tail at end-of-stream, if any.
    pub fn take_remainder(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            return None;
        }
        let mut line = self.buf.split();
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Some(line.freeze())
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// The upstream may prepend a header row; any line led by one of these
/// column labels is skipped before parsing.
#[inline]
pub fn is_header_line(s: &str) -> bool {
    s.starts_with("ts_event") || s.starts_with("publisher_id") || s.starts_with("instrument_id")
}

/// Parse one framed CSV line into an `MboEvent`. Returns `None` when the
/// line is structurally bad (field count, integer fields, price); no
/// partial event is ever produced. Unknown action/side characters are
/// preserved as-is for the book to ignore.
pub fn parse_mbo_line(line: &str, tick_scale: f64) -> Option<MboEvent> {
    let s = line.strip_suffix('\r').unwrap_or(line);
    if s.is_empty() || s.starts_with("ts_recv,") {
        return None;
    }

    let mut f: SmallVec<[&str; 16]> = SmallVec::new();
    f.extend(s.split(','));
    if f.len() < 15 {
        return None;
    }

    let mut ev = MboEvent {
        ts_recv: f[0].to_string(),
        ts_event: f[1].to_string(),
        symbol: f[14].to_string(),
        ..MboEvent::default()
    };

    ev.publisher_id = f[3].parse().ok()?;
    ev.instrument_id = f[4].parse().ok()?;

    // Prices arrive as decimal strings; the book wants integer ticks.
    let px: f64 = f[7].parse().ok()?;
    ev.price = (px * tick_scale).round() as i64;

    ev.size = f[8].parse().ok()?;
    ev.order_id = f[10].parse().ok()?;
    ev.flags = f[11].parse().ok()?;

    ev.action = f[5].chars().next().unwrap_or('N');
    ev.side = f[6].chars().next().unwrap_or('N');
    ev.ts_event_us = ts_event_to_us(&ev.ts_event);

    Some(ev)
}

/// ISO-8601 event time to microseconds since the Unix epoch. Fractional
/// seconds are tolerated up to nanosecond resolution and truncated to
/// microseconds. Returns 0 when the string does not parse.
pub fn ts_event_to_us(ts: &str) -> i64 {
    if ts.is_empty() {
        return 0;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(ts) {
        return dt.timestamp_micros();
    }
    // No zone designator: assume UTC.
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.and_utc().timestamp_micros();
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PRICE_SCALE;

    const LINE: &str = "2024-03-01T14:30:00.000000001Z,2024-03-01T14:30:00.123456789Z,160,2,42,A,B,64.83,5,0,1001,130,0,7,CLX5";

    #[test]
    fn framer_splits_lines_across_chunks() {
        let mut fr = LineFramer::new();
        fr.push(b"abc");
        assert!(fr.next_line().is_none());
        fr.push(b"def\r\nsecond\nthi");
        assert_eq!(fr.next_line().unwrap().as_ref(), b"abcdef");
        assert_eq!(fr.next_line().unwrap().as_ref(), b"second");
        assert!(fr.next_line().is_none());
        fr.push(b"rd");
        assert_eq!(fr.take_remainder().unwrap().as_ref(), b"third");
        assert!(fr.take_remainder().is_none());
    }

    #[test]
    fn framer_reset_drops_partial_buffer() {
        let mut fr = LineFramer::new();
        fr.push(b"partial line without terminator");
        fr.reset();
        assert!(fr.next_line().is_none());
        assert!(fr.take_remainder().is_none());
    }

    #[test]
    fn header_lines_are_recognized() {
        assert!(is_header_line("ts_event,publisher_id,..."));
        assert!(is_header_line("publisher_id,instrument_id"));
        assert!(is_header_line("instrument_id,action"));
        assert!(!is_header_line(LINE));
    }

    #[test]
    fn parses_full_line() {
        let ev = parse_mbo_line(LINE, PRICE_SCALE).unwrap();
        assert_eq!(ev.publisher_id, 2);
        assert_eq!(ev.instrument_id, 42);
        assert_eq!(ev.action, 'A');
        assert_eq!(ev.side, 'B');
        assert_eq!(ev.price, 648_300);
        assert_eq!(ev.size, 5);
        assert_eq!(ev.order_id, 1001);
        assert_eq!(ev.flags, 130);
        assert_eq!(ev.symbol, "CLX5");
        assert_eq!(ev.ts_recv, "2024-03-01T14:30:00.000000001Z");
    }

    #[test]
    fn price_rounds_to_nearest_tick() {
        let mk = |px: &str| LINE.replace("64.83", px);
        assert_eq!(parse_mbo_line(&mk("0.00005"), PRICE_SCALE).unwrap().price, 1);
        assert_eq!(parse_mbo_line(&mk("0.00004"), PRICE_SCALE).unwrap().price, 0);
        assert_eq!(parse_mbo_line(&mk("100"), PRICE_SCALE).unwrap().price, 1_000_000);
    }

    #[test]
    fn bad_fields_fail_the_line() {
        assert!(parse_mbo_line("", PRICE_SCALE).is_none());
        assert!(parse_mbo_line("a,b,c", PRICE_SCALE).is_none());
        assert!(parse_mbo_line(&LINE.replace(",42,", ",nope,"), PRICE_SCALE).is_none());
        assert!(parse_mbo_line(&LINE.replace("64.83", "abc"), PRICE_SCALE).is_none());
        assert!(parse_mbo_line(&LINE.replace(",1001,", ",x,"), PRICE_SCALE).is_none());
        // header row rejected even if it reaches the parser
        assert!(parse_mbo_line("ts_recv,ts_event,rtype", PRICE_SCALE).is_none());
    }

    #[test]
    fn empty_action_and_side_default_to_none() {
        let line = LINE.replace(",A,B,", ",,,");
        let ev = parse_mbo_line(&line, PRICE_SCALE).unwrap();
        assert_eq!(ev.action, 'N');
        assert_eq!(ev.side, 'N');
    }

    #[test]
    fn unknown_action_chars_are_preserved() {
        let line = LINE.replace(",A,B,", ",Q,B,");
        assert_eq!(parse_mbo_line(&line, PRICE_SCALE).unwrap().action, 'Q');
    }

    #[test]
    fn event_time_normalizes_to_micros() {
        // 2024-03-01T14:30:00 UTC = 1709303400 s
        let base = 1_709_303_400_000_000i64;
        assert_eq!(ts_event_to_us("2024-03-01T14:30:00Z"), base);
        // nanosecond fraction truncates to micros
        assert_eq!(ts_event_to_us("2024-03-01T14:30:00.123456789Z"), base + 123_456);
        // no zone: treated as UTC
        assert_eq!(ts_event_to_us("2024-03-01T14:30:00.5"), base + 500_000);
        assert_eq!(ts_event_to_us(""), 0);
        assert_eq!(ts_event_to_us("not-a-time"), 0);
    }

    #[test]
    fn parsed_event_carries_normalized_time() {
        let ev = parse_mbo_line(LINE, PRICE_SCALE).unwrap();
        assert_eq!(ev.ts_event_us, 1_709_303_400_000_000 + 123_456);
    }

    #[test]
    fn price_roundtrips_through_ticks_to_four_places() {
        // parse -> ticks -> px_f rendering preserves <=4 fractional digits
        let cases = [
            ("64.83", "64.8300"),
            ("0.0001", "0.0001"),
            ("123.4567", "123.4567"),
            ("1", "1.0000"),
            ("99999.9999", "99999.9999"),
        ];
        for (input, expected) in cases {
            let line = LINE.replace("64.83", input);
            let ev = parse_mbo_line(&line, PRICE_SCALE).unwrap();
            let rendered = format!("{:.4}", ev.price as f64 / PRICE_SCALE);
            assert_eq!(rendered, expected, "price {input:?}");
        }
    }
}
