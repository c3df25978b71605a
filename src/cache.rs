//! Bounded cache of recently loaded 2D slices
//!
//! One cache instance is owned per cube handle; it is not safe for
//! concurrent mutation and is not shared between handles. Eviction is
//! least-recently-used by entry count.

use crate::types::Axis;
use ndarray::Array2;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Default number of slices kept per handle
pub const DEFAULT_CACHE_CAPACITY: usize = 128;

/// Cache key: location along an axis plus the sort mode used for loading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SliceKey {
    pub loc: usize,
    pub axis: Axis,
    /// Whether traces were loaded in file order (`stable`) or line order
    pub stable: bool,
}

/// LRU cache of loaded slices
#[derive(Debug)]
pub struct SliceCache {
    capacity: usize,
    entries: HashMap<SliceKey, Arc<Array2<f32>>>,
    order: VecDeque<SliceKey>,
}

impl SliceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Change the entry-count bound. Shrinking below the current size
    /// evicts the oldest entries immediately.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fetch a slice and mark it most recently used
    pub fn get(&mut self, key: &SliceKey) -> Option<Arc<Array2<f32>>> {
        let slice = self.entries.get(key)?.clone();
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(*key);
        Some(slice)
    }

    /// Insert a slice, evicting the least recently used entry when full
    pub fn insert(&mut self, key: SliceKey, slice: Arc<Array2<f32>>) {
        if self.entries.insert(key, slice).is_none() {
            self.order.push_back(key);
        } else if let Some(pos) = self.order.iter().position(|k| *k == key) {
            self.order.remove(pos);
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    /// Drop every cached slice. Used after bulk consumption to bound
    /// memory during long scans.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total size of cached slices in bytes
    pub fn nbytes(&self) -> usize {
        self.entries
            .values()
            .map(|slice| slice.len() * std::mem::size_of::<f32>())
            .sum()
    }
}

impl Default for SliceCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
