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

use crossbeam_utils::Backoff;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// A lock that provides mutual access using a spinlock algorithm, this makes
/// it suitable for locks that will only be held for *very brief* periods of
/// time.
pub struct Mutex<T> {
    is_available: AtomicBool,
    value: UnsafeCell<T>
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>
}

impl<'a, T> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.is_available.store(true, Ordering::Release);
    }
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.value.get() }
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T> Mutex<T> {
    /// Returns an unlocked mutex around the given value.
    pub fn new(value: T) -> Mutex<T> {
        Mutex {
            is_available: AtomicBool::new(true),
            value: UnsafeCell::new(value)
        }
    }

    #[inline]
    pub fn lock(&self) -> MutexGuard<T> {
        let backoff = Backoff::new();

        loop {
            match self.is_available.compare_exchange_weak(true, false, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => break,
                _ => { backoff.snooze(); }
            }
        }

        MutexGuard { mutex: self }
    }
}
