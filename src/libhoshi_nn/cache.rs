// Copyright 2024 The Hoshi Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::network::NetworkError;
use crate::output::NetworkResult;

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};

/// The extra bytes we charge every entry for the map and list overhead.
const ENTRY_OVERHEAD: usize = 64;

struct LruEntry {
    value: NetworkResult,
    bytes: usize,

    prev: Option<u64>,
    next: Option<u64>
}

/// A `fingerprint -> NetworkResult` map that keeps the most recently added
/// or accessed entries, evicting from the tail until the estimated memory
/// use fits the configured budget.
///
/// The recency list is a doubly linked list threaded through the map by
/// fingerprint, new and accessed entries move to the head.
struct LruCache {
    entries: HashMap<u64, LruEntry>,
    capacity_bytes: usize,
    used_bytes: usize,
    head: Option<u64>,
    tail: Option<u64>
}

impl LruCache {
    fn with_capacity(capacity_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity_bytes,
            used_bytes: 0,
            head: None,
            tail: None
        }
    }

    fn detach(&mut self, key: u64) {
        let (prev, next) = {
            let entry = &self.entries[&key];

            (entry.prev, entry.next)
        };

        match prev {
            Some(p) => { self.entries.get_mut(&p).unwrap().next = next; },
            None => { self.head = next; }
        }
        match next {
            Some(n) => { self.entries.get_mut(&n).unwrap().prev = prev; },
            None => { self.tail = prev; }
        }
    }

    fn attach(&mut self, key: u64) {
        let old_head = self.head;

        {
            let entry = self.entries.get_mut(&key).unwrap();
            entry.prev = None;
            entry.next = old_head;
        }

        if let Some(h) = old_head {
            self.entries.get_mut(&h).unwrap().prev = Some(key);
        }

        self.head = Some(key);
        if self.tail.is_none() {
            self.tail = Some(key);
        }
    }

    fn get(&mut self, key: u64) -> Option<&NetworkResult> {
        if self.entries.contains_key(&key) {
            self.detach(key);
            self.attach(key);

            Some(&self.entries[&key].value)
        } else {
            None
        }
    }

    fn insert(&mut self, key: u64, value: NetworkResult) {
        if self.entries.contains_key(&key) {
            return;
        }

        let bytes = value.estimated_bytes() + ENTRY_OVERHEAD;

        self.entries.insert(key, LruEntry { value, bytes, prev: None, next: None });
        self.attach(key);
        self.used_bytes += bytes;

        while self.used_bytes > self.capacity_bytes {
            let tail = match self.tail {
                Some(t) => t,
                None => break
            };

            self.detach(tail);
            let dropped = self.entries.remove(&tail).unwrap();
            self.used_bytes -= dropped.bytes;

            if tail == key {
                tracing::warn!(bytes, "evaluation result is larger than the entire cache, not caching it");
            }
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.used_bytes = 0;
        self.head = None;
        self.tail = None;
    }
}

/// A bounded cache in front of the network together with an in-flight set
/// that guarantees at most one concurrent computation per fingerprint.
pub struct EvaluationCache {
    table: Mutex<LruCache>,
    in_flight: Mutex<HashSet<u64>>,
    is_done: Condvar
}

impl EvaluationCache {
    /// Returns an empty cache with the given capacity in MiB.
    pub fn new(capacity_mib: usize) -> Self {
        Self {
            table: Mutex::new(LruCache::with_capacity(capacity_mib * 1024 * 1024)),
            in_flight: Mutex::new(HashSet::new()),
            is_done: Condvar::new()
        }
    }

    /// Returns the cached result for the given fingerprint, marking it as
    /// recently used.
    pub fn probe(&self, fingerprint: u64) -> Option<NetworkResult> {
        self.table.lock().unwrap().get(fingerprint).cloned()
    }

    /// Adds the given result to the cache, evicting the least recently used
    /// entries until the memory budget is respected.
    pub fn insert(&self, fingerprint: u64, result: NetworkResult) {
        self.table.lock().unwrap().insert(fingerprint, result)
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.table.lock().unwrap().clear()
    }

    /// Changes the capacity of the cache to the given number of MiB,
    /// evicting entries if the new budget is smaller.
    pub fn resize(&self, capacity_mib: usize) {
        let mut table = self.table.lock().unwrap();

        table.capacity_bytes = capacity_mib * 1024 * 1024;

        while table.used_bytes > table.capacity_bytes {
            let tail = match table.tail {
                Some(t) => t,
                None => break
            };

            table.detach(tail);
            let dropped = table.entries.remove(&tail).unwrap();
            table.used_bytes -= dropped.bytes;
        }
    }

    /// Returns the estimated number of bytes currently used.
    pub fn used_bytes(&self) -> usize {
        self.table.lock().unwrap().used_bytes
    }

    /// Returns the number of entries currently cached.
    pub fn len(&self) -> usize {
        self.table.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached result for the given fingerprint, or computes it
    /// with `supplier`. Concurrent callers for the same fingerprint block
    /// until the first one completes, so the supplier runs at most once at
    /// a time per fingerprint.
    ///
    /// If the supplier fails its error is propagated to the caller that ran
    /// it, and one of the waiters becomes the next builder.
    pub fn get_or_compute<F>(&self, fingerprint: u64, mut supplier: F) -> Result<NetworkResult, NetworkError>
        where F: FnMut() -> Result<NetworkResult, NetworkError>
    {
        loop {
            if let Some(hit) = self.probe(fingerprint) {
                return Ok(hit);
            }

            // register as the builder for this fingerprint, or wait for the
            // current builder to finish and re-probe
            {
                let mut in_flight = self.in_flight.lock().unwrap();

                if in_flight.contains(&fingerprint) {
                    let mut guard = in_flight;

                    while guard.contains(&fingerprint) {
                        guard = self.is_done.wait(guard).unwrap();
                    }

                    continue;
                }

                in_flight.insert(fingerprint);
            }

            let result = supplier();

            if let Ok(ref value) = result {
                self.insert(fingerprint, value.clone());
            }

            {
                let mut in_flight = self.in_flight.lock().unwrap();

                in_flight.remove(&fingerprint);
            }
            self.is_done.notify_all();

            return result;
        }
    }
}
