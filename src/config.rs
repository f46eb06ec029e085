// src/config.rs
use crate::event::PRICE_SCALE;
use anyhow::{bail, Context};

/// Where final dumps and default log files land.
pub const DATA_DIR: &str = "data";

#[derive(Debug, Clone)]
pub struct AppConfig {
    // CLI
    pub host: String,
    pub port: u16,
    pub push_port: u16,
    pub depth: usize,
    pub snapshot_every: i64,
    /// Negative means unbounded.
    pub max_msgs: i64,
    pub push_ms: u64,
    pub tick_scale: f64,

    // env
    pub feed_enabled: bool,
    pub feed_path: String,
    pub bench_log_path: String,
    /// Empty disables the Postgres sink.
    pub pg_conninfo: String,
    /// Empty disables the Prometheus exporter.
    pub metrics_bind: String,
    pub out_dir: String,
}

pub fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} <feed_host> <feed_port> <push_port> [depth=5] [snapshot_every=200] [max_msgs=-1] [push_ms=50]\n\
         Example: {prog} 127.0.0.1 9000 8080 50 200 -1 50\n\
         Env: PG_CONNINFO=\"host=127.0.0.1 port=5432 dbname=mbo user=postgres password=postgres\"\n\
         Env: FEED_ENABLED=1 (optional)\n\
         Env: FEED_PATH={DATA_DIR}/snapshots_feed.jsonl (optional)\n\
         Env: BENCH_LOG_PATH={DATA_DIR}/benchmarks.jsonl (optional)\n\
         Env: METRICS_BIND=0.0.0.0:9100 (optional)"
    )
}

fn truthy(v: Option<String>) -> bool {
    match v {
        Some(s) => matches!(
            s.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        None => false,
    }
}

fn opt_arg<T: std::str::FromStr>(args: &[String], idx: usize, default: T, name: &str) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match args.get(idx) {
        Some(s) => s.parse::<T>().with_context(|| format!("bad {name}: {s:?}")),
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_args_env(args: &[String]) -> anyhow::Result<Self> {
        Self::build(args, |k| std::env::var(k).ok())
    }

    fn build(args: &[String], env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let prog = args.first().map(String::as_str).unwrap_or("mbo-stream");
        if args.len() < 4 {
            bail!("{}", usage(prog));
        }

        let host = args[1].clone();
        let port: u16 = args[2]
            .parse()
            .with_context(|| format!("bad feed_port: {:?}", args[2]))?;
        let push_port: u16 = args[3]
            .parse()
            .with_context(|| format!("bad push_port: {:?}", args[3]))?;
        let depth: usize = opt_arg(args, 4, 5, "depth")?;
        let snapshot_every: i64 = opt_arg(args, 5, 200, "snapshot_every")?;
        let max_msgs: i64 = opt_arg(args, 6, -1, "max_msgs")?;
        let push_ms: u64 = opt_arg(args, 7, 50, "push_ms")?;

        let nonempty = |k: &str| env(k).filter(|s| !s.is_empty());

        let cfg = Self {
            host,
            port,
            push_port,
            depth,
            snapshot_every,
            max_msgs,
            push_ms: push_ms.clamp(10, 5000),
            tick_scale: PRICE_SCALE,
            feed_enabled: truthy(env("FEED_ENABLED")),
            feed_path: nonempty("FEED_PATH")
                .unwrap_or_else(|| format!("{DATA_DIR}/snapshots_feed.jsonl")),
            bench_log_path: nonempty("BENCH_LOG_PATH")
                .unwrap_or_else(|| format!("{DATA_DIR}/benchmarks.jsonl")),
            pg_conninfo: nonempty("PG_CONNINFO").unwrap_or_default(),
            metrics_bind: nonempty("METRICS_BIND").unwrap_or_default(),
            out_dir: DATA_DIR.to_string(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            bail!("feed_host must not be empty");
        }
        if self.depth == 0 {
            bail!("depth must be >= 1");
        }
        if self.tick_scale <= 0.0 {
            bail!("tick_scale must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashMap;

    fn strs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn minimal_args_use_defaults() {
        let cfg = AppConfig::build(&strs(&["prog", "127.0.0.1", "9000", "8080"]), no_env).unwrap();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.push_port, 8080);
        assert_eq!(cfg.depth, 5);
        assert_eq!(cfg.snapshot_every, 200);
        assert_eq!(cfg.max_msgs, -1);
        assert_eq!(cfg.push_ms, 50);
        assert!(!cfg.feed_enabled);
        assert!(cfg.pg_conninfo.is_empty());
        assert!(cfg.metrics_bind.is_empty());
        assert_eq!(cfg.feed_path, "data/snapshots_feed.jsonl");
        assert_eq!(cfg.bench_log_path, "data/benchmarks.jsonl");
    }

    #[test]
    fn all_positionals_parse() {
        let cfg = AppConfig::build(
            &strs(&["prog", "feed.host", "9000", "8080", "50", "100", "500000", "25"]),
            no_env,
        )
        .unwrap();
        assert_eq!(cfg.depth, 50);
        assert_eq!(cfg.snapshot_every, 100);
        assert_eq!(cfg.max_msgs, 500_000);
        assert_eq!(cfg.push_ms, 25);
    }

    #[test]
    fn too_few_args_print_usage() {
        let err = AppConfig::build(&strs(&["prog", "host", "9000"]), no_env).unwrap_err();
        assert!(err.to_string().contains("Usage:"));
    }

    #[test]
    fn malformed_numbers_fail() {
        assert!(AppConfig::build(&strs(&["prog", "h", "notaport", "8080"]), no_env).is_err());
        assert!(
            AppConfig::build(&strs(&["prog", "h", "9000", "8080", "zero"]), no_env).is_err()
        );
    }

    #[test]
    fn env_toggles_and_paths() {
        let mut env = HashMap::new();
        env.insert("FEED_ENABLED", "YES");
        env.insert("FEED_PATH", "/tmp/feed.jsonl");
        env.insert("PG_CONNINFO", "host=db port=5432");
        env.insert("METRICS_BIND", "0.0.0.0:9100");
        let cfg = AppConfig::build(&strs(&["prog", "h", "9000", "8080"]), |k| {
            env.get(k).map(|s| s.to_string())
        })
        .unwrap();
        assert!(cfg.feed_enabled);
        assert_eq!(cfg.feed_path, "/tmp/feed.jsonl");
        assert_eq!(cfg.pg_conninfo, "host=db port=5432");
        assert_eq!(cfg.metrics_bind, "0.0.0.0:9100");
    }

    #[test]
    fn falsy_feed_values_stay_disabled() {
        for v in ["0", "no", "off", "maybe", ""] {
            let cfg = AppConfig::build(&strs(&["prog", "h", "9000", "8080"]), |k| {
                (k == "FEED_ENABLED").then(|| v.to_string())
            })
            .unwrap();
            assert!(!cfg.feed_enabled, "value {v:?} should not enable the feed");
        }
    }

    #[test]
    fn push_ms_is_clamped_to_session_bounds() {
        let cfg = AppConfig::build(&strs(&["prog", "h", "9000", "8080", "5", "200", "-1", "1"]), no_env)
            .unwrap();
        assert_eq!(cfg.push_ms, 10);
        let cfg =
            AppConfig::build(&strs(&["prog", "h", "9000", "8080", "5", "200", "-1", "60000"]), no_env)
                .unwrap();
        assert_eq!(cfg.push_ms, 5000);
    }

    #[test]
    fn zero_depth_is_rejected() {
        assert!(
            AppConfig::build(&strs(&["prog", "h", "9000", "8080", "0"]), no_env).is_err()
        );
    }
}
