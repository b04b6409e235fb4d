//! Mutex-guarded value container
//!
//! Every read and write of the wrapped value happens with the lock held.
// Copyright 2025 Francisco F. Pinochet
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


use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A value shared across threads behind a lock.
///
/// The lock is not reentrant: calling [`AtomicCell::modify`] (or any other
/// accessor) on the same cell from inside the closure deadlocks.
pub struct AtomicCell<V> {
    value: Mutex<V>,
}

impl<V> AtomicCell<V> {
    /// Create a cell holding `value`
    pub fn new(value: V) -> Self {
        AtomicCell {
            value: Mutex::new(value),
        }
    }

    /// Run `action` with mutable access to the value and return its result.
    ///
    /// The lock is released when `action` returns or unwinds; a panic inside
    /// `action` does not leave the cell unusable.
    pub fn modify<R>(&self, action: impl FnOnce(&mut V) -> R) -> R {
        let mut guard = self.lock();
        action(&mut guard)
    }

    /// Run `action` with shared access to the value and return its result.
    pub fn with_value<R>(&self, action: impl FnOnce(&V) -> R) -> R {
        let guard = self.lock();
        action(&guard)
    }

    /// Replace the value, returning the previous one.
    pub fn swap(&self, new_value: V) -> V {
        self.modify(|value| std::mem::replace(value, new_value))
    }

    /// Replace the value.
    pub fn set(&self, new_value: V) {
        self.swap(new_value);
    }

    /// Consume the cell and return the value
    pub fn into_inner(self) -> V {
        self.value.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> MutexGuard<'_, V> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: Clone> AtomicCell<V> {
    /// Snapshot of the current value
    pub fn get(&self) -> V {
        self.with_value(V::clone)
    }
}

impl<V: Default> Default for AtomicCell<V> {
    fn default() -> Self {
        Self::new(V::default())
    }
}

impl<V: fmt::Debug> fmt::Debug for AtomicCell<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with_value(|value| f.debug_tuple("AtomicCell").field(value).finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_swap_returns_previous() {
        let cell = AtomicCell::new(1);
        assert_eq!(cell.swap(2), 1);
        assert_eq!(cell.get(), 2);
    }

    #[test]
    fn test_modify_returns_result() {
        let cell = AtomicCell::new(vec![1, 2]);
        let len = cell.modify(|v| {
            v.push(3);
            v.len()
        });
        assert_eq!(len, 3);
        assert_eq!(cell.with_value(|v| v.iter().sum::<i32>()), 6);
    }

    #[test]
    fn test_concurrent_increments() {
        let cell = Arc::new(AtomicCell::new(0u64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cell = cell.clone();
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        cell.modify(|v| *v += 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cell.get(), 8_000);
    }

    #[test]
    fn test_lock_released_after_panic() {
        let cell = Arc::new(AtomicCell::new(5));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cell.modify(|v| {
                *v = 6;
                panic!("action failed");
            })
        }));
        assert!(result.is_err());

        // Still usable, and the partial write is visible
        assert_eq!(cell.swap(7), 6);
        assert_eq!(cell.get(), 7);
    }
}
