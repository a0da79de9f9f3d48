//! Per-target result storage

use std::collections::BTreeMap;

use parking_lot::RwLock;
use procbatch_core::{BatchError, Result};

/// Results of one command, keyed by target ordinal.
///
/// Every ordinal is written at most once. Readers should only look at an
/// ordinal after the execution that owns it has completed.
#[derive(Debug)]
pub struct BatchResultSlot<T> {
    values: RwLock<BTreeMap<usize, T>>,
}

impl<T> BatchResultSlot<T> {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(BTreeMap::new()),
        }
    }

    /// Store the result for `ordinal`
    pub fn set(&self, ordinal: usize, value: T) -> Result<()> {
        let mut values = self.values.write();
        if values.contains_key(&ordinal) {
            return Err(BatchError::SlotAlreadySet { ordinal });
        }
        values.insert(ordinal, value);
        Ok(())
    }

    /// Whether a result was stored for `ordinal`
    pub fn contains(&self, ordinal: usize) -> bool {
        self.values.read().contains_key(&ordinal)
    }

    /// Remove and return the result for `ordinal`
    pub fn take(&self, ordinal: usize) -> Option<T> {
        self.values.write().remove(&ordinal)
    }

    /// Target ordinals with a stored result, ascending
    pub fn ordinals(&self) -> Vec<usize> {
        self.values.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl<T: Clone> BatchResultSlot<T> {
    /// The result stored for `ordinal`, if any
    pub fn get(&self, ordinal: usize) -> Option<T> {
        self.values.read().get(&ordinal).cloned()
    }
}

impl<T> Default for BatchResultSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
