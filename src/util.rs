// src/util.rs
use std::time::{SystemTime, UNIX_EPOCH};

#[inline]
pub fn now_wall_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
