//! Per-symbol serializer: gives every lifecycle entry point exclusive
//! access to one symbol at a time without serializing unrelated symbols
//! against each other.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Keyed mutex registry. `acquire` returns a guard tied to the held lock;
/// dropping the guard releases it, so every call site releases on every
/// exit path (including early returns and panics) for free.
#[derive(Debug, Default)]
pub struct PerSymbolSerializer {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

/// Holds the per-symbol lock for as long as it is alive. Releases on drop,
/// which covers every exit path (early return, `?`, or panic) for free.
pub struct SymbolGuard {
    _guard: OwnedMutexGuard<()>,
}

impl PerSymbolSerializer {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn lock_for(&self, symbol: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(symbol) {
            return Arc::clone(lock);
        }
        let mut guard = self.locks.write().await;
        Arc::clone(
            guard
                .entry(symbol.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Acquires exclusive access to `symbol`. Every lifecycle entry point
    /// must hold this guard for the duration of its mutation.
    pub async fn acquire(&self, symbol: &str) -> SymbolGuard {
        let lock = self.lock_for(symbol).await;
        let guard = lock.lock_owned().await;
        SymbolGuard { _guard: guard }
    }
}
