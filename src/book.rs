// src/book.rs
use crate::event::{is_buy_side, MboEvent};
use hashbrown::HashMap;
use slab::Slab;
use std::collections::BTreeMap;
use std::fmt::Write as _;

type Handle = usize;

/// A resting order, stored in the slab arena and linked into its level's
/// FIFO. `prev`/`next` are sibling handles within the same price level.
#[derive(Clone, Debug)]
struct Node {
    order_id: u64,
    price: i64,
    qty: i64,
    is_buy: bool,
    prev: Option<Handle>,
    next: Option<Handle>,
}

/// One price level: a doubly-linked FIFO of order nodes plus running
/// aggregates. Empty levels never survive an apply.
#[derive(Clone, Debug, Default)]
struct Level {
    head: Option<Handle>,
    tail: Option<Handle>,
    total_qty: i64,
    count: usize,
}

/// Aggregated best-level view. Prices are already divided by the tick
/// scale; `mid`/`spread` are meaningful only when both flags are set.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TopOfBook {
    pub has_bid: bool,
    pub has_ask: bool,
    pub bid_px: f64,
    pub bid_sz: i64,
    pub ask_px: f64,
    pub ask_sz: i64,
    pub mid: f64,
    pub spread: f64,
}

/// Price-time-priority book for a single symbol, rebuilt from an MBO
/// stream. Sides are price-keyed ordered maps (bids iterated in reverse
/// for best-first); the order index gives O(1) cancel/modify by id.
pub struct Book {
    symbol: String,
    bids: BTreeMap<i64, Level>,
    asks: BTreeMap<i64, Level>,
    orders: Slab<Node>,
    index: HashMap<u64, Handle>,
}

impl Book {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            orders: Slab::with_capacity(1 << 16),
            index: HashMap::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn set_symbol(&mut self, symbol: impl Into<String>) {
        self.symbol = symbol.into();
    }

    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    /// Apply exactly one event. Trades/fills never change resting state;
    /// the feed follows up with explicit C/M for affected orders.
    pub fn apply(&mut self, e: &MboEvent) {
        if e.action == 'T' || e.action == 'F' || e.action == 'N' {
            return;
        }
        if e.action == 'R' {
            self.clear();
            return;
        }
        // A/C/M require a real side
        if e.side != 'A' && e.side != 'B' {
            return;
        }
        match e.action {
            'A' => self.add(e),
            'C' => self.cancel(e),
            'M' => self.modify(e),
            _ => {} // unknown action
        }
    }

    /// Clear both sides and the index; the symbol survives.
    fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.orders.clear();
        self.index.clear();
    }

    #[inline]
    fn levels_mut(&mut self, is_buy: bool) -> &mut BTreeMap<i64, Level> {
        if is_buy {
            &mut self.bids
        } else {
            &mut self.asks
        }
    }

    /// Link a slab node to the tail of the FIFO at its (price, side)
    /// level, creating the level if needed.
    fn link_tail(&mut self, h: Handle) {
        let (price, is_buy, qty) = {
            let n = &self.orders[h];
            (n.price, n.is_buy, n.qty)
        };
        let prev_tail = {
            let lvl = self.levels_mut(is_buy).entry(price).or_default();
            lvl.tail
        };
        if let Some(t) = prev_tail {
            self.orders[t].next = Some(h);
        }
        {
            let n = &mut self.orders[h];
            n.prev = prev_tail;
            n.next = None;
        }
        let lvl = self.levels_mut(is_buy).entry(price).or_default();
        if prev_tail.is_none() {
            lvl.head = Some(h);
        }
        lvl.tail = Some(h);
        lvl.count += 1;
        lvl.total_qty += qty;
    }

    /// Unlink a node from its level, deleting the level the instant it
    /// empties. The slab entry survives so the node can be relocated.
    fn unlink(&mut self, h: Handle) {
        let (price, is_buy, prev, next, qty) = {
            let n = &self.orders[h];
            (n.price, n.is_buy, n.prev, n.next, n.qty)
        };
        if let Some(p) = prev {
            self.orders[p].next = next;
        }
        if let Some(nx) = next {
            self.orders[nx].prev = prev;
        }
        let mut now_empty = false;
        if let Some(lvl) = self.levels_mut(is_buy).get_mut(&price) {
            if prev.is_none() {
                lvl.head = next;
            }
            if next.is_none() {
                lvl.tail = prev;
            }
            lvl.count = lvl.count.saturating_sub(1);
            lvl.total_qty -= qty;
            now_empty = lvl.count == 0;
        }
        if now_empty {
            self.levels_mut(is_buy).remove(&price);
        }
    }

    fn add(&mut self, e: &MboEvent) {
        // A duplicate order id replaces the stale resting order.
        if let Some(old) = self.index.remove(&e.order_id) {
            self.unlink(old);
            self.orders.remove(old);
        }
        let h = self.orders.insert(Node {
            order_id: e.order_id,
            price: e.price,
            qty: e.size as i64,
            is_buy: is_buy_side(e.side),
            prev: None,
            next: None,
        });
        self.link_tail(h);
        self.index.insert(e.order_id, h);
    }

    fn cancel(&mut self, e: &MboEvent) {
        let h = match self.index.get(&e.order_id) {
            Some(&h) => h,
            None => return, // unknown order id
        };
        let cut = e.size as i64;
        let remaining = self.orders[h].qty;
        if cut >= remaining {
            // Oversized cancels clamp to a full cancel.
            self.unlink(h);
            self.orders.remove(h);
            self.index.remove(&e.order_id);
        } else {
            self.orders[h].qty = remaining - cut;
            let (price, is_buy) = {
                let n = &self.orders[h];
                (n.price, n.is_buy)
            };
            // Position within the level is untouched: priority preserved.
            if let Some(lvl) = self.levels_mut(is_buy).get_mut(&price) {
                lvl.total_qty -= cut;
            }
        }
    }

    fn modify(&mut self, e: &MboEvent) {
        let h = match self.index.get(&e.order_id) {
            Some(&h) => h,
            // The feed compresses add-after-replace into a bare modify.
            None => {
                self.add(e);
                return;
            }
        };
        if is_buy_side(e.side) != self.orders[h].is_buy {
            return; // side mismatch
        }
        let old_px = self.orders[h].price;
        let old_qty = self.orders[h].qty;
        let new_qty = e.size as i64;

        if e.price != old_px {
            // Relocation always costs time priority.
            self.unlink(h);
            {
                let n = &mut self.orders[h];
                n.price = e.price;
                n.qty = new_qty;
            }
            self.link_tail(h);
        } else if new_qty > old_qty {
            // Size increase re-queues at the tail of the same level.
            self.unlink(h);
            self.orders[h].qty = new_qty;
            self.link_tail(h);
        } else {
            self.orders[h].qty = new_qty;
            let is_buy = self.orders[h].is_buy;
            if let Some(lvl) = self.levels_mut(is_buy).get_mut(&old_px) {
                lvl.total_qty += new_qty - old_qty;
            }
        }
    }

    // ---------- Views ----------

    /// Depth-capped serialization, best level first on each side. Built
    /// by hand so `px_f` always renders with exactly four decimals.
    pub fn to_json(&self, depth: usize, price_scale: f64) -> String {
        let mut out = String::with_capacity(64 + 96 * depth.min(256));
        out.push('{');
        if !self.symbol.is_empty() {
            let _ = write!(out, "\"symbol\":\"{}\",", self.symbol);
        }
        out.push_str("\"bids\":[");
        let mut first = true;
        for (px, lvl) in self.bids.iter().rev().take(depth) {
            if !first {
                out.push(',');
            }
            first = false;
            let _ = write!(
                out,
                "{{\"px\":{},\"px_f\":{:.4},\"sz\":{},\"ct\":{}}}",
                px,
                *px as f64 / price_scale,
                lvl.total_qty,
                lvl.count
            );
        }
        out.push_str("],\"asks\":[");
        let mut first = true;
        for (px, lvl) in self.asks.iter().take(depth) {
            if !first {
                out.push(',');
            }
            first = false;
            let _ = write!(
                out,
                "{{\"px\":{},\"px_f\":{:.4},\"sz\":{},\"ct\":{}}}",
                px,
                *px as f64 / price_scale,
                lvl.total_qty,
                lvl.count
            );
        }
        out.push_str("]}");
        out
    }

    /// Two human-readable lines for logging: best ask above best bid.
    pub fn to_bbo_pretty(&self, price_scale: f64) -> String {
        let mut out = String::with_capacity(96);
        let _ = writeln!(out, "{} Aggregated BBO", self.symbol);
        match self.asks.iter().next() {
            Some((px, lvl)) => {
                let _ = writeln!(
                    out,
                    "     {} @ {:.2} |  {} order(s)",
                    lvl.total_qty,
                    *px as f64 / price_scale,
                    lvl.count
                );
            }
            None => {
                let _ = writeln!(out, "     None");
            }
        }
        match self.bids.iter().next_back() {
            Some((px, lvl)) => {
                let _ = writeln!(
                    out,
                    "     {} @ {:.2} |  {} order(s)",
                    lvl.total_qty,
                    *px as f64 / price_scale,
                    lvl.count
                );
            }
            None => {
                let _ = writeln!(out, "     None");
            }
        }
        out
    }

    /// Best-level aggregates with derived mid/spread.
    pub fn top_of_book(&self, price_scale: f64) -> TopOfBook {
        let mut t = TopOfBook::default();
        if let Some((px, lvl)) = self.bids.iter().next_back() {
            t.has_bid = true;
            t.bid_px = *px as f64 / price_scale;
            t.bid_sz = lvl.total_qty;
        }
        if let Some((px, lvl)) = self.asks.iter().next() {
            t.has_ask = true;
            t.ask_px = *px as f64 / price_scale;
            t.ask_sz = lvl.total_qty;
        }
        if t.has_bid && t.has_ask {
            t.mid = 0.5 * (t.bid_px + t.ask_px);
            t.spread = t.ask_px - t.bid_px;
        }
        t
    }
}
