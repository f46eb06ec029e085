// src/event.rs

/// Default tick scale: integer prices throughout the book are in units
/// of 1/10_000 of the quote currency.
pub const PRICE_SCALE: f64 = 10_000.0;

/// One ingress MBO record. Action and side are kept as the raw feed
/// characters; anything the book does not recognize is ignored there.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct MboEvent {
    pub ts_recv: String,
    pub ts_event: String,
    /// Event time normalized to microseconds since the Unix epoch
    /// (0 when `ts_event` did not parse).
    pub ts_event_us: i64,
    pub publisher_id: i32,
    pub instrument_id: i32,
    pub action: char,
    pub side: char,
    /// Fixed-point price in ticks.
    pub price: i64,
    pub size: i32,
    pub order_id: u64,
    pub flags: u32,
    pub symbol: String,
}

impl Default for MboEvent {
    fn default() -> Self {
        Self {
            ts_recv: String::new(),
            ts_event: String::new(),
            ts_event_us: 0,
            publisher_id: 0,
            instrument_id: 0,
            action: 'N',
            side: 'N',
            price: 0,
            size: 0,
            order_id: 0,
            flags: 0,
            symbol: String::new(),
        }
    }
}

#[inline]
pub fn is_buy_side(side: char) -> bool {
    side == 'B'
}
