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

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// An `f64` accumulator that can be added to from several threads at once.
///
/// The host atomics lack a floating point fetch-add, so it is implemented as
/// a compare-and-swap loop over the bit pattern. All operations use relaxed
/// ordering, which is sufficient for commutative monotone sums whose readers
/// tolerate slightly stale values.
#[derive(Debug, Default)]
pub struct AtomicF64 {
    bits: AtomicU64
}

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self { bits: AtomicU64::new(value.to_bits()) }
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed)
    }

    /// Adds `delta` to this accumulator, returning the previous value.
    #[inline]
    pub fn fetch_add(&self, delta: f64) -> f64 {
        let mut current = self.bits.load(Ordering::Relaxed);

        loop {
            let next = (f64::from_bits(current) + delta).to_bits();

            match self.bits.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return f64::from_bits(current),
                Err(actual) => { current = actual; }
            }
        }
    }
}

/// An `f32` cell with atomic load / store semantics. There is no fetch-add,
/// values written here are published once and then only read.
#[derive(Debug, Default)]
pub struct AtomicF32 {
    bits: AtomicU32
}

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self { bits: AtomicU32::new(value.to_bits()) }
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fetch_add_is_exact_for_integers() {
        let acc = AtomicF64::new(0.0);

        for _ in 0..1000 {
            acc.fetch_add(1.0);
        }

        assert_eq!(acc.load(), 1000.0);
    }

    #[test]
    fn fetch_add_from_many_threads() {
        let acc = Arc::new(AtomicF64::new(0.0));
        let handles = (0..4).map(|_| {
            let acc = acc.clone();

            thread::spawn(move || {
                for _ in 0..10_000 {
                    acc.fetch_add(0.5);
                }
            })
        }).collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(acc.load(), 20_000.0);
    }

    #[test]
    fn store_then_load() {
        let cell = AtomicF32::new(0.0);

        cell.store(0.25);
        assert_eq!(cell.load(), 0.25);
    }
}
