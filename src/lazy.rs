// This file is part of the rtbprobe library.
// Copyright (C) 2017-2018 Niklas Fiekas <niklas.fiekas@backscattering.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <http://www.gnu.org/licenses/>.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// A cell that is initialized at most once and then safely shared between
/// threads.
///
/// The initializer runs at most once, even when it produces `None`: a
/// failed initialization is published like a value, so that every later
/// access short-circuits instead of retrying the expensive work.
pub struct Lazy<T> {
    ready: AtomicBool,
    lock: Mutex<()>,
    value: UnsafeCell<Option<T>>,
}

// The mutex serializes writers and the ready flag publishes the value with
// release/acquire ordering before any shared read.
unsafe impl<T: Send + Sync> Sync for Lazy<T> {}

impl<T> Lazy<T> {
    pub fn new() -> Lazy<T> {
        Lazy {
            ready: AtomicBool::new(false),
            lock: Mutex::new(()),
            value: UnsafeCell::new(None),
        }
    }

    pub fn get_or_init<F>(&self, init: F) -> Option<&T>
    where
        F: FnOnce() -> Option<T>,
    {
        // Double-checked locking:
        // https://stackoverflow.com/a/45692413/722291
        if !self.ready.load(Ordering::Acquire) {
            let _guard = self.lock.lock().expect("lazy lock");

            if !self.ready.load(Ordering::Relaxed) {
                unsafe {
                    *self.value.get() = init();
                }
                self.ready.store(true, Ordering::Release);
            }
        }

        unsafe { &*self.value.get() }.as_ref()
    }
}

impl<T> Default for Lazy<T> {
    fn default() -> Lazy<T> {
        Lazy::new()
    }
}

impl<T> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("ready", &self.ready.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_init_runs_once() {
        let lazy = Arc::new(Lazy::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lazy = Arc::clone(&lazy);
                let runs = Arc::clone(&runs);
                thread::spawn(move || {
                    *lazy
                        .get_or_init(|| {
                            runs.fetch_add(1, Ordering::SeqCst);
                            Some(42)
                        })
                        .expect("initialized")
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().expect("join"), 42);
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_is_latched() {
        let lazy: Lazy<u32> = Lazy::new();
        assert_eq!(lazy.get_or_init(|| None), None);

        // The failed initialization is published. Later initializers do
        // not run.
        assert_eq!(lazy.get_or_init(|| Some(1)), None);
    }
}
