// src/ws_server.rs
use crate::metrics;
use crate::snapshot;
use anyhow::Context;
use serde::Deserialize;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tungstenite::Message;

const DEPTH_DEFAULT: usize = 10;
const DEPTH_MAX: i64 = 200;
const PUSH_MS_MIN: i64 = 10;
const PUSH_MS_MAX: i64 = 5000;

/// Read-poll granularity inside a session; bounds how late a due push
/// can fire while the socket is idle.
const POLL_MS: u64 = 10;

/// Client control frame. Anything that does not parse, or whose type is
/// not recognized, is dropped without a reply.
#[derive(Debug, Deserialize)]
struct ControlMsg {
    #[serde(rename = "type")]
    kind: String,
    symbol: Option<String>,
    depth: Option<i64>,
    push_ms: Option<i64>,
}

struct Session {
    symbol: String,
    depth: usize,
    push_ms: u64,
    last_sent: Option<snapshot::Snapshot>,
}

impl Session {
    fn new(default_push_ms: u64) -> Self {
        Self {
            symbol: String::new(),
            depth: DEPTH_DEFAULT,
            push_ms: default_push_ms,
            last_sent: None,
        }
    }

    /// Apply a control message and return the ack frame, or `None` when
    /// the message is not an accepted control message.
    fn handle_control(&mut self, raw: &str) -> Option<String> {
        let msg: ControlMsg = serde_json::from_str(raw).ok()?;
        if msg.kind != "subscribe" && msg.kind != "update" {
            return None;
        }
        if let Some(sym) = msg.symbol {
            if !sym.is_empty() {
                self.symbol = sym;
            }
        }
        if let Some(d) = msg.depth {
            if d > 0 && d <= DEPTH_MAX {
                self.depth = d as usize;
            }
        }
        if let Some(pm) = msg.push_ms {
            self.push_ms = pm.clamp(PUSH_MS_MIN, PUSH_MS_MAX) as u64;
        }
        Some(format!(
            "{{\"type\":\"ack\",\"symbol\":\"{}\",\"depth\":{},\"push_ms\":{}}}",
            self.symbol, self.depth, self.push_ms
        ))
    }

    /// Current snapshot for the session's symbol, unless it is the very
    /// handle already dispatched (duplicate suppression by identity).
    fn next_push(&mut self) -> Option<snapshot::Snapshot> {
        let cur = snapshot::load_for(&self.symbol);
        if let Some(prev) = &self.last_sent {
            if Arc::ptr_eq(prev, &cur) {
                return None;
            }
        }
        self.last_sent = Some(cur.clone());
        Some(cur)
    }
}

/// Bind the push port and spawn the accept loop. A port that cannot be
/// bound is fatal to the caller.
pub fn start(port: u16, default_push_ms: u64) -> anyhow::Result<thread::JoinHandle<()>> {
    let listener =
        TcpListener::bind(("0.0.0.0", port)).with_context(|| format!("bind push port {port}"))?;
    log::info!("push server listening on :{port} (default push every {default_push_ms} ms)");

    let handle = thread::Builder::new()
        .name("ws-accept".into())
        .spawn(move || {
            for stream in listener.incoming().flatten() {
                let spawned = thread::Builder::new().name("ws-session".into()).spawn(
                    move || {
                        metrics::inc_ws_clients(1);
                        if let Err(e) = run_session(stream, default_push_ms) {
                            metrics::inc_dropped_clients();
                            log::debug!("session ended: {e:#}");
                        }
                        metrics::inc_ws_clients(-1);
                    },
                );
                if spawned.is_err() {
                    log::warn!("failed to spawn session thread");
                }
            }
        })?;
    Ok(handle)
}

/// One subscriber: control reads and paced pushes interleave on this
/// thread via a short socket read timeout, so at most one write is ever
/// in flight and reads can never starve the pacing loop for long.
fn run_session(stream: TcpStream, default_push_ms: u64) -> anyhow::Result<()> {
    stream.set_nodelay(true).ok();
    let mut ws =
        tungstenite::accept(stream).map_err(|e| anyhow::anyhow!("ws handshake: {e}"))?;
    ws.get_ref()
        .set_read_timeout(Some(Duration::from_millis(POLL_MS)))
        .context("set read timeout")?;

    let mut sess = Session::new(default_push_ms);
    let mut next_tick = Instant::now();

    loop {
        match ws.read() {
            Ok(Message::Text(txt)) => {
                if let Some(ack) = sess.handle_control(&txt) {
                    // Fire-and-forget relative to pacing; a dead socket
                    // ends the session either way.
                    ws.send(Message::Text(ack))?;
                }
            }
            Ok(Message::Close(_)) => return Ok(()),
            Ok(_) => {} // binary/ping/pong: nothing to do
            Err(tungstenite::Error::Io(e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        if Instant::now() >= next_tick {
            if let Some(snap) = sess.next_push() {
                ws.send(Message::Text((*snap).clone()))?;
                metrics::inc_out_frames();
                metrics::inc_out_bytes(snap.len());
            }
            next_tick = Instant::now() + Duration::from_millis(sess.push_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_updates_state_and_acks() {
        let mut s = Session::new(50);
        let ack = s
            .handle_control("{\"type\":\"subscribe\",\"symbol\":\"CLX5\",\"depth\":20,\"push_ms\":100}")
            .unwrap();
        assert_eq!(s.symbol, "CLX5");
        assert_eq!(s.depth, 20);
        assert_eq!(s.push_ms, 100);
        assert_eq!(
            ack,
            "{\"type\":\"ack\",\"symbol\":\"CLX5\",\"depth\":20,\"push_ms\":100}"
        );
    }

    #[test]
    fn update_changes_only_named_fields() {
        let mut s = Session::new(50);
        s.handle_control("{\"type\":\"subscribe\",\"symbol\":\"CLX5\"}")
            .unwrap();
        s.handle_control("{\"type\":\"update\",\"depth\":3}").unwrap();
        assert_eq!(s.symbol, "CLX5");
        assert_eq!(s.depth, 3);
        assert_eq!(s.push_ms, 50);
    }

    #[test]
    fn unknown_types_and_garbage_are_dropped() {
        let mut s = Session::new(50);
        assert!(s.handle_control("{\"type\":\"noise\"}").is_none());
        assert!(s.handle_control("{\"symbol\":\"CLX5\"}").is_none());
        assert!(s.handle_control("not json at all").is_none());
        assert_eq!(s.symbol, "");
        assert_eq!(s.depth, DEPTH_DEFAULT);
    }

    #[test]
    fn depth_out_of_bounds_is_ignored() {
        let mut s = Session::new(50);
        s.handle_control("{\"type\":\"update\",\"depth\":0}").unwrap();
        assert_eq!(s.depth, DEPTH_DEFAULT);
        s.handle_control("{\"type\":\"update\",\"depth\":1000}")
            .unwrap();
        assert_eq!(s.depth, DEPTH_DEFAULT);
        s.handle_control("{\"type\":\"update\",\"depth\":200}").unwrap();
        assert_eq!(s.depth, 200);
    }

    #[test]
    fn push_ms_is_clamped() {
        let mut s = Session::new(50);
        s.handle_control("{\"type\":\"update\",\"push_ms\":1}").unwrap();
        assert_eq!(s.push_ms, 10);
        s.handle_control("{\"type\":\"update\",\"push_ms\":99999}")
            .unwrap();
        assert_eq!(s.push_ms, 5000);
    }

    #[test]
    fn empty_symbol_field_keeps_previous_symbol() {
        let mut s = Session::new(50);
        s.handle_control("{\"type\":\"subscribe\",\"symbol\":\"CLX5\"}")
            .unwrap();
        s.handle_control("{\"type\":\"update\",\"symbol\":\"\"}").unwrap();
        assert_eq!(s.symbol, "CLX5");
    }

    #[test]
    fn duplicate_snapshots_are_suppressed_by_identity() {
        let _g = snapshot::TEST_STORE_LOCK.lock().unwrap();
        let mut s = Session::new(50);
        s.handle_control("{\"type\":\"subscribe\",\"symbol\":\"WS_T1\"}")
            .unwrap();

        snapshot::publish_for("WS_T1", "{\"v\":1}".to_string());
        assert!(s.next_push().is_some());
        // same published handle: nothing to send
        assert!(s.next_push().is_none());

        snapshot::publish_for("WS_T1", "{\"v\":2}".to_string());
        let again = s.next_push().unwrap();
        assert_eq!(again.as_str(), "{\"v\":2}");
        assert!(s.next_push().is_none());
    }
}
