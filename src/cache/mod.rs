use std::{num::NonZeroUsize, sync::Arc};

use lru::LruCache;
use parking_lot::Mutex;

use crate::model::ReviewAnalysis;

/// Exact-text memo of finished analyses.
///
/// The first value stored for a text is the one every later caller sees.
/// With a bound, the least recently used entry is evicted; `0` keeps
/// everything for the life of the process.
pub struct ResultCache {
    entries: Mutex<LruCache<String, Arc<ReviewAnalysis>>>,
    capacity: Option<NonZeroUsize>,
}

impl ResultCache {
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries);
        let entries = match capacity {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            entries: Mutex::new(entries),
            capacity,
        }
    }

    pub fn get(&self, text: &str) -> Option<Arc<ReviewAnalysis>> {
        self.entries.lock().get(text).cloned()
    }

    /// Stores `analysis` unless `text` already has a value; returns the value
    /// now held for `text`.
    pub fn put(&self, text: &str, analysis: Arc<ReviewAnalysis>) -> Arc<ReviewAnalysis> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(text) {
            return existing.clone();
        }
        entries.put(text.to_string(), analysis.clone());
        analysis
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity.map(NonZeroUsize::get)
    }
}
