#![allow(dead_code)]

use std::time::Instant;

// Pull the book directly into this bench to avoid compiling the full binary graph
#[path = "../event.rs"]
mod event;
#[path = "../book.rs"]
mod book;
#[path = "../hist.rs"]
mod hist;

use crate::book::Book;
use crate::event::MboEvent;
use crate::hist::Pow2Histogram;

fn parse_arg_usize(args: &[String], idx: usize, default: usize) -> usize {
    args.get(idx)
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(default)
}

fn ev(action: char, side: char, price: i64, size: i32, order_id: u64) -> MboEvent {
    MboEvent {
        action,
        side,
        price,
        size,
        order_id,
        ..MboEvent::default()
    }
}

fn main() {
    // Args: [order_count] [price_levels] [mod_ratio_pct]
    let args: Vec<String> = std::env::args().collect();
    let order_count = parse_arg_usize(&args, 1, 200_000);
    let price_levels = parse_arg_usize(&args, 2, 200).max(1) as i64;
    let mod_ratio_pct = parse_arg_usize(&args, 3, 50).min(100);

    let mut book = Book::new("BENCH");
    let mut hist = Pow2Histogram::new();
    let mut total_events: usize = 0;

    let start_total = Instant::now();

    // Phase 1: Adds
    let t0 = Instant::now();
    for i in 0..order_count {
        let oid = 1 + i as u64;
        let price = 1_000_000 + (i as i64 % price_levels);
        let qty = 100 + (i as i32 % 50);
        let side = if i & 1 == 0 { 'B' } else { 'A' };
        let e = ev('A', side, price, qty, oid);
        let t = Instant::now();
        book.apply(&e);
        hist.add(t.elapsed().as_nanos() as u64);
        total_events += 1;
    }
    let adds_dur = t0.elapsed();

    // Phase 2: Mods over a random subset (price moves lose priority)
    let t1 = Instant::now();
    let mut x: u64 = 0x9E3779B97F4A7C15; // xorshift64* state
    let mods = order_count * mod_ratio_pct / 100;
    for _ in 0..mods {
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        let r = x.wrapping_mul(0x2545F4914F6CDD1D);
        let i = (r as usize) % order_count;
        let oid = 1 + i as u64;
        let side = if i & 1 == 0 { 'B' } else { 'A' };
        let price = 1_000_000 + (r as i64 % price_levels).abs();
        let qty = 1 + (r % 200) as i32;
        let e = ev('M', side, price, qty, oid);
        let t = Instant::now();
        book.apply(&e);
        hist.add(t.elapsed().as_nanos() as u64);
        total_events += 1;
    }
    let mods_dur = t1.elapsed();

    // Phase 3: Cancel every 3rd order
    let t2 = Instant::now();
    for i in (0..order_count).step_by(3) {
        let oid = 1 + i as u64;
        let side = if i & 1 == 0 { 'B' } else { 'A' };
        let e = ev('C', side, 0, i32::MAX, oid);
        let t = Instant::now();
        book.apply(&e);
        hist.add(t.elapsed().as_nanos() as u64);
        total_events += 1;
    }
    let dels_dur = t2.elapsed();

    // Touch the projections so the hot path cannot be optimized away
    let tob = book.top_of_book(event::PRICE_SCALE);
    let total_dur = start_total.elapsed();

    println!(
        "bench_book: orders={} levels={} mods={} total_events={} live_orders={} has_bid={} total_time_ms={:.3} adds_ms={:.3} mods_ms={:.3} dels_ms={:.3} throughput_meps={:.3}",
        order_count,
        price_levels,
        mods,
        total_events,
        book.order_count(),
        tob.has_bid,
        total_dur.as_secs_f64() * 1000.0,
        adds_dur.as_secs_f64() * 1000.0,
        mods_dur.as_secs_f64() * 1000.0,
        dels_dur.as_secs_f64() * 1000.0,
        (total_events as f64) / 1_000_000.0 / total_dur.as_secs_f64(),
    );
    println!(
        "apply_latency_est: p50={}ns p95={}ns p99={}ns (n={})",
        hist.percentile(0.50),
        hist.percentile(0.95),
        hist.percentile(0.99),
        hist.count(),
    );
}
