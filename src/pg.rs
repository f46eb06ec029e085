// src/pg.rs
use crate::book::TopOfBook;
use crate::metrics;
use anyhow::Context;
use postgres::types::ToSql;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

/// One queued top-of-book row.
pub struct SnapshotWrite {
    pub ts_us: i64,
    pub symbol: String,
    pub tob: TopOfBook,
}

/// Bounded handoff queue between the ingest thread and the DB worker.
/// Enqueue never blocks: when full, the oldest item is evicted so the
/// sink stays current under load. Only the consumer waits.
pub struct SnapQueue {
    inner: Mutex<VecDeque<SnapshotWrite>>,
    cv: Condvar,
    cap: usize,
}

impl SnapQueue {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap)),
            cv: Condvar::new(),
            cap,
        }
    }

    pub fn push(&self, item: SnapshotWrite) {
        {
            let mut q = self.inner.lock().unwrap();
            while q.len() >= self.cap {
                q.pop_front();
                metrics::inc_pg_evictions();
            }
            q.push_back(item);
        }
        self.cv.notify_one();
    }

    /// Blocks until an item is available.
    fn pop_blocking(&self) -> SnapshotWrite {
        let mut q = self.inner.lock().unwrap();
        loop {
            if let Some(item) = q.pop_front() {
                return item;
            }
            q = self.cv.wait(q).unwrap();
        }
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

const SCHEMA_SQL: &str = "\
    CREATE TABLE IF NOT EXISTS snapshots (\
        ts TIMESTAMPTZ NOT NULL,\
        symbol TEXT NOT NULL,\
        best_bid_px DOUBLE PRECISION,\
        best_bid_sz BIGINT,\
        best_ask_px DOUBLE PRECISION,\
        best_ask_sz BIGINT,\
        mid DOUBLE PRECISION,\
        spread DOUBLE PRECISION,\
        PRIMARY KEY (symbol, ts)\
    );\
    CREATE INDEX IF NOT EXISTS snapshots_symbol_ts_idx ON snapshots (symbol, ts DESC)";

const INSERT_SQL: &str = "\
    INSERT INTO snapshots \
    (ts, symbol, best_bid_px, best_bid_sz, best_ask_px, best_ask_sz, mid, spread) \
    VALUES (to_timestamp($1::bigint / 1e6), $2, $3, $4, $5, $6, $7, $8) \
    ON CONFLICT (symbol, ts) DO NOTHING";

/// Thin writer around one Postgres connection: idempotent upsert keyed
/// on (symbol, ts), schema bootstrapped on connect.
pub struct PgWriter {
    client: postgres::Client,
    insert: postgres::Statement,
}

impl PgWriter {
    pub fn connect(conninfo: &str) -> anyhow::Result<Self> {
        let mut client =
            postgres::Client::connect(conninfo, postgres::NoTls).context("pg connect")?;
        client
            .batch_execute(SCHEMA_SQL)
            .context("pg schema bootstrap")?;
        let insert = client.prepare(INSERT_SQL).context("pg prepare insert")?;
        Ok(Self { client, insert })
    }

    /// Absent sides persist as NULL columns.
    pub fn write_snapshot(&mut self, w: &SnapshotWrite) -> Result<(), postgres::Error> {
        let bid_px = w.tob.has_bid.then_some(w.tob.bid_px);
        let bid_sz = w.tob.has_bid.then_some(w.tob.bid_sz);
        let ask_px = w.tob.has_ask.then_some(w.tob.ask_px);
        let ask_sz = w.tob.has_ask.then_some(w.tob.ask_sz);
        let params: [&(dyn ToSql + Sync); 8] = [
            &w.ts_us,
            &w.symbol,
            &bid_px,
            &bid_sz,
            &ask_px,
            &ask_sz,
            &w.tob.mid,
            &w.tob.spread,
        ];
        self.client.execute(&self.insert, &params)?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

/// Single worker draining the queue serially. A failed upsert is logged
/// and skipped; a lost connection ends this worker only, the engine and
/// push server keep running.
pub fn spawn_writer(mut pg: PgWriter, queue: Arc<SnapQueue>) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("pg-writer".into())
        .spawn(move || loop {
            let item = queue.pop_blocking();
            if let Err(e) = pg.write_snapshot(&item) {
                metrics::inc_pg_insert_errors();
                log::warn!("insert failed for {} @ {}: {}", item.symbol, item.ts_us, e);
                if pg.is_closed() {
                    log::error!("pg connection lost, writer exiting");
                    break;
                }
            }
        })
        .expect("spawn pg writer")
}
