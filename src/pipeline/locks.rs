use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

type Key = (String, i32);

/// One mutex per `(user_id, tax_year)`.
///
/// Clones share the same table, so pipelines on different threads (each
/// with its own database connection) serialize recomputes of the same key.
/// A slot is removed again once no caller holds or waits on it.
#[derive(Clone, Default)]
pub struct RecomputeLocks {
    table: Arc<Mutex<HashMap<Key, Arc<Mutex<()>>>>>,
}

impl RecomputeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, user_id: &str, tax_year: i32) -> Arc<Mutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table
            .entry((user_id.to_string(), tax_year))
            .or_default()
            .clone()
    }

    /// Run `f` while holding the lock for `(user_id, tax_year)`
    pub fn with_key<R>(&self, user_id: &str, tax_year: i32, f: impl FnOnce() -> R) -> R {
        let slot = self.slot(user_id, tax_year);
        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        self.release(user_id, tax_year, slot);
        result
    }

    fn release(&self, user_id: &str, tax_year: i32, slot: Arc<Mutex<()>>) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        drop(slot);
        let key = (user_id.to_string(), tax_year);
        // Only the table's own reference left: nobody holds or waits on it
        if table.get(&key).is_some_and(|s| Arc::strong_count(s) == 1) {
            table.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
