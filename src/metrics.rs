// src/metrics.rs
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::net::ToSocketAddrs;
use std::thread;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static LINES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("feed_lines_total", "Non-header lines seen on the ingress stream")
        .expect("feed_lines_total");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static PARSE_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("feed_parse_errors_total", "Lines dropped by the parser")
        .expect("feed_parse_errors_total");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static EVENTS_APPLIED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("book_events_applied_total", "Events applied to the book")
        .expect("book_events_applied_total");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static BOOK_LIVE_ORDERS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("book_live_orders", "Resting orders currently in the book")
        .expect("book_live_orders");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

static SNAPSHOTS_PUBLISHED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("snapshots_published_total", "Snapshot fan-outs performed")
        .expect("snapshots_published_total");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static INGEST_SESSIONS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("ingest_sessions_total", "Replay sessions started")
        .expect("ingest_sessions_total");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static WS_CLIENTS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("ws_clients", "Number of connected push subscribers")
        .expect("ws_clients");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

static OUT_FRAMES: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("out_frames_total", "Snapshot frames sent to subscribers")
        .expect("out_frames_total");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static OUT_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("out_bytes_total", "Snapshot bytes sent to subscribers")
        .expect("out_bytes_total");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static DROPPED_CLIENTS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "dropped_clients_total",
        "Push sessions terminated by a socket or write failure",
    )
    .expect("dropped_clients_total");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static PG_ENQUEUED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("pg_enqueued_total", "Top-of-book rows handed to the writer queue")
        .expect("pg_enqueued_total");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static PG_EVICTIONS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "pg_evictions_total",
        "Oldest-item evictions from the full writer queue",
    )
    .expect("pg_evictions_total");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static PG_INSERT_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("pg_insert_errors_total", "Failed snapshot upserts")
        .expect("pg_insert_errors_total");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn inc_lines() {
    LINES_TOTAL.inc();
}
pub fn inc_parse_errors() {
    PARSE_ERRORS.inc();
}
pub fn inc_events_applied() {
    EVENTS_APPLIED.inc();
}
pub fn set_live_orders(n: usize) {
    BOOK_LIVE_ORDERS.set(n as i64);
}
pub fn inc_snapshots_published() {
    SNAPSHOTS_PUBLISHED.inc();
}
pub fn inc_sessions() {
    INGEST_SESSIONS.inc();
}

pub fn inc_ws_clients(delta: i64) {
    WS_CLIENTS.add(delta);
}
pub fn inc_out_frames() {
    OUT_FRAMES.inc();
}
pub fn inc_out_bytes(n: usize) {
    OUT_BYTES.inc_by(n as u64);
}
pub fn inc_dropped_clients() {
    DROPPED_CLIENTS.inc();
}

pub fn inc_pg_enqueued() {
    PG_ENQUEUED.inc();
}
pub fn inc_pg_evictions() {
    PG_EVICTIONS.inc();
}
pub fn inc_pg_insert_errors() {
    PG_INSERT_ERRORS.inc();
}

pub fn spawn_http<A: ToSocketAddrs + Send + 'static>(addr: A) -> thread::JoinHandle<()> {
    let addr_string = addr
        .to_socket_addrs()
        .ok()
        .and_then(|mut it| it.next())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "0.0.0.0:9100".to_string());

    thread::spawn(move || {
        let server = match tiny_http::Server::http(&addr_string) {
            Ok(s) => s,
            Err(e) => {
                log::error!("metrics exporter failed to start on {addr_string}: {e}");
                return;
            }
        };
        log::info!("prometheus metrics listening on http://{addr_string}/metrics");
        let encoder = TextEncoder::new();
        loop {
            if let Ok(req) = server.recv() {
                let url = req.url().to_string();
                if url == "/metrics" {
                    let metric_families = REGISTRY.gather();
                    let mut buf = Vec::with_capacity(16 * 1024);
                    encoder.encode(&metric_families, &mut buf).ok();
                    let resp = tiny_http::Response::from_data(buf)
                        .with_status_code(200)
                        .with_header(
                            tiny_http::Header::from_bytes(
                                &b"Content-Type"[..],
                                &b"text/plain; version=0.0.4"[..],
                            )
                            .unwrap(),
                        );
                    let _ = req.respond(resp);
                } else if url == "/live" || url == "/healthz" {
                    let _ = req.respond(tiny_http::Response::from_string("OK").with_status_code(200));
                } else if url == "/ready" {
                    let _ =
                        req.respond(tiny_http::Response::from_string("READY").with_status_code(200));
                } else {
                    let _ = req.respond(tiny_http::Response::empty(404));
                }
            }
        }
    })
}
