// src/snapshot.rs
use hashbrown::HashMap;
use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};

/// An immutable published snapshot. Subscribers suppress duplicates by
/// handle identity (`Arc::ptr_eq`), never by content comparison.
pub type Snapshot = Arc<String>;

struct Store {
    by_symbol: RwLock<HashMap<String, Snapshot>>,
    /// Default slot: tracks the latest publish regardless of symbol, and
    /// is the only slot written before the engine knows its symbol.
    fallback: RwLock<Snapshot>,
}

static STORE: Lazy<Store> = Lazy::new(|| Store {
    by_symbol: RwLock::new(HashMap::new()),
    fallback: RwLock::new(Arc::new(String::from("{}"))),
});

/// Publish into the default slot only (no symbol known yet).
pub fn publish(s: String) {
    let p = Arc::new(s);
    *STORE.fallback.write().unwrap() = p;
}

/// Publish for one symbol. The same handle is installed in the default
/// slot, so symbol-less subscribers track the engine's (single) symbol.
pub fn publish_for(symbol: &str, s: String) {
    let p = Arc::new(s);
    {
        let mut map = STORE.by_symbol.write().unwrap();
        map.insert(symbol.to_string(), p.clone());
    }
    *STORE.fallback.write().unwrap() = p;
}

/// Latest default-slot snapshot.
pub fn load() -> Snapshot {
    STORE.fallback.read().unwrap().clone()
}

/// Latest snapshot for `symbol`, falling back to the default slot when
/// the symbol has never been published.
pub fn load_for(symbol: &str) -> Snapshot {
    if !symbol.is_empty() {
        let map = STORE.by_symbol.read().unwrap();
        if let Some(p) = map.get(symbol) {
            return p.clone();
        }
    }
    load()
}

/// The store is process-wide; tests that publish serialize on this so
/// assertions about the default slot stay deterministic.
#[cfg(test)]
pub(crate) static TEST_STORE_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
