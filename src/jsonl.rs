// src/jsonl.rs
use anyhow::Context;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// One line per published snapshot. `book_json` is the already-rendered
/// book object and is embedded verbatim.
pub struct FeedLine<'a> {
    pub ts_us: i64,
    pub symbol: &'a str,
    pub processed: i64,
    pub depth: usize,
    pub book_json: &'a str,
}

/// One line per ingest session, appended at session end.
#[derive(Debug, Clone, Serialize)]
pub struct BenchLine {
    pub ts_wall_us: i64,
    pub host: String,
    pub port: u16,
    pub depth: usize,
    pub snapshot_every: i64,
    pub feed_enabled: bool,
    pub pg_enabled: bool,
    pub processed: i64,
    pub elapsed_s: f64,
    pub throughput_msgs_per_s: f64,
    pub apply_p50_us: f64,
    pub apply_p95_us: f64,
    pub apply_p99_us: f64,
    pub snap_p50_ms: f64,
    pub snap_p95_ms: f64,
    pub snap_p99_ms: f64,
}

/// Append-only newline-delimited record writer. Flushes on request, not
/// per record; never fsyncs.
pub struct JsonlWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl JsonlWriter {
    pub fn open_append(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).with_context(|| format!("create log dir {dir:?}"))?;
            }
        }
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open log {path:?}"))?;
        Ok(Self {
            path,
            out: BufWriter::new(f),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records that would produce an invalid line are skipped.
    pub fn write_feed(&mut self, line: &FeedLine) {
        if line.ts_us <= 0 || line.symbol.is_empty() || line.book_json.is_empty() {
            return;
        }
        let _ = writeln!(
            self.out,
            "{{\"ts_us\":{},\"symbol\":\"{}\",\"processed\":{},\"depth\":{},\"book\":{}}}",
            line.ts_us, line.symbol, line.processed, line.depth, line.book_json
        );
    }

    pub fn write_bench(&mut self, line: &BenchLine) {
        match serde_json::to_string(line) {
            Ok(s) => {
                let _ = writeln!(self.out, "{s}");
            }
            Err(e) => log::warn!("bench line dropped: {e}"),
        }
    }

    pub fn flush(&mut self) {
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process;

    fn tmp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("jsonl_{}_{}.jsonl", tag, process::id()))
    }

    #[test]
    fn feed_lines_append_and_skip_invalid() {
        let path = tmp_path("feed");
        let _ = fs::remove_file(&path);

        let mut w = JsonlWriter::open_append(&path).unwrap();
        w.write_feed(&FeedLine {
            ts_us: 1_700_000_000_000_000,
            symbol: "CLX5",
            processed: 200,
            depth: 5,
            book_json: "{\"bids\":[],\"asks\":[]}",
        });
        // skipped: no symbol
        w.write_feed(&FeedLine {
            ts_us: 1,
            symbol: "",
            processed: 1,
            depth: 5,
            book_json: "{}",
        });
        // skipped: non-positive timestamp
        w.write_feed(&FeedLine {
            ts_us: 0,
            symbol: "CLX5",
            processed: 1,
            depth: 5,
            book_json: "{}",
        });
        w.flush();

        let body = fs::read_to_string(&path).unwrap();
        assert_eq!(
            body,
            "{\"ts_us\":1700000000000000,\"symbol\":\"CLX5\",\"processed\":200,\"depth\":5,\"book\":{\"bids\":[],\"asks\":[]}}\n"
        );
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn bench_line_is_valid_json() {
        let path = tmp_path("bench");
        let _ = fs::remove_file(&path);

        let mut w = JsonlWriter::open_append(&path).unwrap();
        w.write_bench(&BenchLine {
            ts_wall_us: 1_700_000_000_000_000,
            host: "127.0.0.1".to_string(),
            port: 9000,
            depth: 5,
            snapshot_every: 200,
            feed_enabled: true,
            pg_enabled: false,
            processed: 123_456,
            elapsed_s: 1.5,
            throughput_msgs_per_s: 82_304.0,
            apply_p50_us: 0.512,
            apply_p95_us: 2.048,
            apply_p99_us: 4.096,
            snap_p50_ms: 0.016,
            snap_p95_ms: 0.065,
            snap_p99_ms: 0.131,
        });
        w.flush();

        let body = fs::read_to_string(&path).unwrap();
        let v: serde_json::Value = serde_json::from_str(body.trim_end()).unwrap();
        assert_eq!(v["host"], "127.0.0.1");
        assert_eq!(v["processed"], 123_456);
        assert_eq!(v["pg_enabled"], false);
        assert_eq!(v["snapshot_every"], 200);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_mode_keeps_earlier_lines() {
        let path = tmp_path("append");
        let _ = fs::remove_file(&path);

        for i in 1..=2 {
            let mut w = JsonlWriter::open_append(&path).unwrap();
            w.write_feed(&FeedLine {
                ts_us: i,
                symbol: "S",
                processed: i,
                depth: 1,
                book_json: "{}",
            });
            w.flush();
        }
        let body = fs::read_to_string(&path).unwrap();
        assert_eq!(body.lines().count(), 2);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn open_creates_parent_dirs() {
        let dir = std::env::temp_dir().join(format!("jsonl_dirs_{}", process::id()));
        let _ = fs::remove_dir_all(&dir);
        let path = dir.join("nested/deep.jsonl");
        let w = JsonlWriter::open_append(&path).unwrap();
        assert_eq!(w.path(), path.as_path());
        assert!(path.parent().unwrap().is_dir());
        let _ = fs::remove_dir_all(&dir);
    }
}
