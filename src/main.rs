// src/main.rs
mod book;
mod config;
mod event;
mod hist;
mod jsonl;
mod metrics;
mod output;
mod parser;
mod pg;
mod snapshot;
mod util;
mod ws_server;

use crate::book::Book;
use crate::config::AppConfig;
use crate::hist::Pow2Histogram;
use crate::jsonl::{BenchLine, FeedLine, JsonlWriter};
use crate::parser::{is_header_line, parse_mbo_line, LineFramer};
use crate::pg::{PgWriter, SnapQueue, SnapshotWrite};
use crate::util::now_wall_us;
use anyhow::Context;
use log::{debug, error, info, warn};
use std::io::Read;
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Bounded handoff toward the DB worker; oldest rows are shed beyond this.
const PG_QUEUE_CAP: usize = 20_000;
/// Depth cap for the end-of-session full-depth dump.
const FULL_DEPTH: usize = 1_000_000;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cfg = match AppConfig::from_args_env(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    // conninfo stays out of the logs
    info!(
        "feed={}:{} push_port={} depth={} snapshot_every={} max_msgs={} push_ms={} feed_log={} pg={} metrics={}",
        cfg.host,
        cfg.port,
        cfg.push_port,
        cfg.depth,
        cfg.snapshot_every,
        cfg.max_msgs,
        cfg.push_ms,
        cfg.feed_enabled,
        !cfg.pg_conninfo.is_empty(),
        !cfg.metrics_bind.is_empty(),
    );

    let _metrics_handle = if cfg.metrics_bind.is_empty() {
        None
    } else {
        Some(metrics::spawn_http(cfg.metrics_bind.clone()))
    };

    // Push server first; a port we cannot bind is fatal.
    let _ws_handle = ws_server::start(cfg.push_port, cfg.push_ms)?;

    // Optional persistent sink: one worker thread draining a bounded queue.
    let pg_queue: Option<Arc<SnapQueue>> = if cfg.pg_conninfo.is_empty() {
        info!("pg sink disabled (set PG_CONNINFO)");
        None
    } else {
        match PgWriter::connect(&cfg.pg_conninfo) {
            Ok(writer) => {
                let q = Arc::new(SnapQueue::new(PG_QUEUE_CAP));
                pg::spawn_writer(writer, q.clone());
                info!("pg sink enabled");
                Some(q)
            }
            Err(e) => {
                error!("pg sink disabled: {e:#}");
                None
            }
        }
    };

    let mut bench_writer = match JsonlWriter::open_append(&cfg.bench_log_path) {
        Ok(w) => {
            info!("bench log: {}", w.path().display());
            Some(w)
        }
        Err(e) => {
            warn!("bench log disabled: {e:#}");
            None
        }
    };

    // Wait for the replay source forever; every connection is one session.
    let mut framer = LineFramer::new();
    loop {
        match run_session(&cfg, &mut framer, pg_queue.as_deref(), bench_writer.as_mut()) {
            Ok(()) => info!("session done, back to waiting"),
            Err(e) => {
                warn!("connect/session failed: {e:#} (retry in {RECONNECT_DELAY:?})");
                thread::sleep(RECONNECT_DELAY);
            }
        }
    }
}

/// Per-session ingest state: the book, its histograms, and the fan-out
/// destinations. Owned exclusively by the ingest thread.
struct IngestSession<'a> {
    cfg: &'a AppConfig,
    pg_queue: Option<&'a SnapQueue>,
    feed: Option<JsonlWriter>,
    book: Book,
    has_symbol: bool,
    apply_hist: Pow2Histogram,
    snap_hist: Pow2Histogram,
    processed: i64,
    parsed_ok: i64,
    lines_total: u64,
    bytes_total: u64,
    last_ts_us: i64,
    logged_first_line: bool,
}

impl<'a> IngestSession<'a> {
    fn new(cfg: &'a AppConfig, pg_queue: Option<&'a SnapQueue>, feed: Option<JsonlWriter>) -> Self {
        Self {
            cfg,
            pg_queue,
            feed,
            book: Book::new(""),
            has_symbol: false,
            apply_hist: Pow2Histogram::new(),
            snap_hist: Pow2Histogram::new(),
            processed: 0,
            parsed_ok: 0,
            lines_total: 0,
            bytes_total: 0,
            last_ts_us: 0,
            logged_first_line: false,
        }
    }

    fn handle_line(&mut self, raw: &[u8]) {
        let line = match std::str::from_utf8(raw) {
            Ok(l) => l,
            Err(_) => {
                metrics::inc_parse_errors();
                return;
            }
        };
        if line.is_empty() {
            return;
        }
        if !self.logged_first_line {
            debug!("first line: {line}");
            self.logged_first_line = true;
        }
        if is_header_line(line) {
            return;
        }
        self.lines_total += 1;
        metrics::inc_lines();

        // Past the cap, lines are still counted but not applied.
        if self.cfg.max_msgs >= 0 && self.processed >= self.cfg.max_msgs {
            return;
        }

        let ev = match parse_mbo_line(line, self.cfg.tick_scale) {
            Some(ev) => ev,
            None => {
                metrics::inc_parse_errors();
                return;
            }
        };
        self.parsed_ok += 1;

        // A present-but-malformed event time overwrites with 0, gating
        // the PG/feed sinks until a valid timestamp arrives.
        if !ev.ts_event.is_empty() {
            self.last_ts_us = ev.ts_event_us;
        }
        if !self.has_symbol && !ev.symbol.is_empty() {
            self.book.set_symbol(ev.symbol.as_str());
            self.has_symbol = true;
            info!("symbol locked: {}", ev.symbol);
        }

        let t = Instant::now();
        self.book.apply(&ev);
        self.apply_hist.add(t.elapsed().as_nanos() as u64);
        metrics::inc_events_applied();
        self.processed += 1;

        if self.cfg.snapshot_every > 0 && self.processed % self.cfg.snapshot_every == 0 {
            self.fan_out();
            debug!("{}", self.book.to_bbo_pretty(self.cfg.tick_scale));
        }
    }

    /// One serialization, three destinations, timed as a single unit:
    /// broadcast slot, top-of-book row toward Postgres, feed line.
    fn fan_out(&mut self) {
        let t = Instant::now();

        let json = self.book.to_json(self.cfg.depth, self.cfg.tick_scale);
        let sym_known = self.has_symbol && !self.book.symbol().is_empty();

        if let Some(q) = self.pg_queue {
            if sym_known && self.last_ts_us > 0 {
                q.push(SnapshotWrite {
                    ts_us: self.last_ts_us,
                    symbol: self.book.symbol().to_string(),
                    tob: self.book.top_of_book(self.cfg.tick_scale),
                });
                metrics::inc_pg_enqueued();
            }
        }

        if let Some(feed) = self.feed.as_mut() {
            if sym_known && self.last_ts_us > 0 {
                feed.write_feed(&FeedLine {
                    ts_us: self.last_ts_us,
                    symbol: self.book.symbol(),
                    processed: self.processed,
                    depth: self.cfg.depth,
                    book_json: &json,
                });
            }
        }

        // The push sessions only ever see this immutable handle.
        if sym_known {
            let symbol = self.book.symbol().to_string();
            snapshot::publish_for(&symbol, json);
        } else {
            snapshot::publish(json);
        }

        metrics::inc_snapshots_published();
        metrics::set_live_orders(self.book.order_count());
        self.snap_hist.add(t.elapsed().as_nanos() as u64);
    }
}

fn run_session(
    cfg: &AppConfig,
    framer: &mut LineFramer,
    pg_queue: Option<&SnapQueue>,
    bench: Option<&mut JsonlWriter>,
) -> anyhow::Result<()> {
    info!("waiting for feed {}:{} ...", cfg.host, cfg.port);
    let mut stream = TcpStream::connect((cfg.host.as_str(), cfg.port))
        .with_context(|| format!("connect {}:{}", cfg.host, cfg.port))?;
    stream.set_nodelay(true).ok();
    info!("connected to {}:{}", cfg.host, cfg.port);
    metrics::inc_sessions();

    // Anything carried over from a broken previous connection is stale.
    framer.reset();

    // Per-session feed log (append).
    let feed = if cfg.feed_enabled {
        match JsonlWriter::open_append(&cfg.feed_path) {
            Ok(w) => {
                info!("feed log: {}", w.path().display());
                Some(w)
            }
            Err(e) => {
                warn!("feed log disabled: {e:#}");
                None
            }
        }
    } else {
        None
    };

    let mut sess = IngestSession::new(cfg, pg_queue, feed);
    let mut buf = vec![0u8; 1 << 20];
    let t0 = Instant::now();

    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break, // clean end-of-stream
            Ok(n) => n,
            Err(e) => {
                warn!("read error: {e}");
                break;
            }
        };
        sess.bytes_total += n as u64;
        framer.push(&buf[..n]);
        while let Some(line) = framer.next_line() {
            sess.handle_line(&line);
        }
    }

    // A final unterminated line still counts.
    if let Some(line) = framer.take_remainder() {
        sess.handle_line(&line);
    }

    // Forced fan-out when the last batch missed a snapshot boundary.
    if sess.processed > 0
        && (cfg.snapshot_every <= 0 || sess.processed % cfg.snapshot_every != 0)
    {
        sess.fan_out();
        info!("forced snapshot flush (remainder)");
    }

    info!("{}", sess.book.to_bbo_pretty(cfg.tick_scale));

    // Full-depth dump for offline consumers.
    let full = sess.book.to_json(FULL_DEPTH, cfg.tick_scale);
    output::write_final_books(Path::new(&cfg.out_dir), &full, sess.book.symbol());

    if let Some(feed) = sess.feed.as_mut() {
        feed.flush();
        info!("feed flushed");
    }

    let secs = t0.elapsed().as_secs_f64();
    let mps = if secs > 0.0 {
        sess.processed as f64 / secs
    } else {
        0.0
    };
    let ns_to_us = |ns: u64| ns as f64 / 1e3;
    let ns_to_ms = |ns: u64| ns as f64 / 1e6;

    let apply_p50 = sess.apply_hist.percentile(0.50);
    let apply_p95 = sess.apply_hist.percentile(0.95);
    let apply_p99 = sess.apply_hist.percentile(0.99);
    let snap_p50 = sess.snap_hist.percentile(0.50);
    let snap_p95 = sess.snap_hist.percentile(0.95);
    let snap_p99 = sess.snap_hist.percentile(0.99);

    info!("=== session stats ===");
    info!("bytes_total: {}", sess.bytes_total);
    info!("lines_total: {}", sess.lines_total);
    info!(
        "processed: {} (parsed_ok={})",
        sess.processed, sess.parsed_ok
    );
    info!("elapsed_s: {secs:.3}");
    info!("throughput_msgs_per_s: {mps:.0}");
    info!(
        "apply_latency_est: p50={:.3}us p95={:.3}us p99={:.3}us (n={})",
        ns_to_us(apply_p50),
        ns_to_us(apply_p95),
        ns_to_us(apply_p99),
        sess.apply_hist.count()
    );
    if cfg.snapshot_every > 0 {
        info!(
            "snapshot_latency_est: p50={:.3}ms p95={:.3}ms p99={:.3}ms (n={})",
            ns_to_ms(snap_p50),
            ns_to_ms(snap_p95),
            ns_to_ms(snap_p99),
            sess.snap_hist.count()
        );
    }

    if let Some(bw) = bench {
        bw.write_bench(&BenchLine {
            ts_wall_us: now_wall_us(),
            host: cfg.host.clone(),
            port: cfg.port,
            depth: cfg.depth,
            snapshot_every: cfg.snapshot_every,
            feed_enabled: cfg.feed_enabled,
            pg_enabled: pg_queue.is_some(),
            processed: sess.processed,
            elapsed_s: secs,
            throughput_msgs_per_s: mps,
            apply_p50_us: ns_to_us(apply_p50),
            apply_p95_us: ns_to_us(apply_p95),
            apply_p99_us: ns_to_us(apply_p99),
            snap_p50_ms: ns_to_ms(snap_p50),
            snap_p95_ms: ns_to_ms(snap_p95),
            snap_p99_ms: ns_to_ms(snap_p99),
        });
        bw.flush();
    }

    Ok(())
}
