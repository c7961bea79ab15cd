// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Durable pulse counter.
//!
//! The counter lives in a plain text file holding one decimal integer,
//! rewritten in full on every increment. The in-memory value is loaded once
//! (lazily, on first use) and stays authoritative afterwards: when a write
//! fails the increment is kept in memory and the next successful write
//! catches the file up.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::StoreError;

/// Result of one increment.
#[derive(Debug)]
pub struct Increment {
    /// Value before the increment.
    pub previous: u64,
    /// Value after the increment; always `previous + 1`.
    pub value: u64,
    /// Outcome of flushing `value` to the file.
    pub persisted: Result<(), StoreError>,
}

/// A single non-negative counter persisted to a file.
///
/// All access goes through one lock, so concurrent increments are applied
/// one at a time and each is flushed before the next starts.
#[derive(Debug)]
pub struct CounterStore {
    path: PathBuf,
    value: Mutex<Option<u64>>,
}

impl CounterStore {
    /// Creates a store backed by `path`. Nothing is read until first use.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            value: Mutex::new(None),
        }
    }

    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current counter value.
    ///
    /// The first call reads the file; a missing or corrupt file counts as 0
    /// and is logged.
    pub fn read(&self) -> u64 {
        let mut value = self.value.lock();
        *value.get_or_insert_with(|| self.load())
    }

    /// Overwrites the counter with `new_value` and flushes it to the file.
    ///
    /// The in-memory value is updated even if the write fails.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] if the file cannot be written.
    pub fn write(&self, new_value: u64) -> Result<(), StoreError> {
        let mut value = self.value.lock();
        *value = Some(new_value);
        self.flush(new_value)
    }

    /// Adds one to the counter and flushes the new value.
    ///
    /// The read-modify-write and the flush happen under the store lock.
    pub fn increment(&self) -> Increment {
        let mut value = self.value.lock();
        let previous = *value.get_or_insert_with(|| self.load());
        let next = previous.saturating_add(1);
        *value = Some(next);
        let persisted = self.flush(next);
        Increment {
            previous,
            value: next,
            persisted,
        }
    }

    fn load(&self) -> u64 {
        match read_counter_file(&self.path) {
            Ok(value) => {
                tracing::debug!(path = %self.path.display(), value, "Loaded meter counter");
                value
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not read meter counter, starting at 0");
                0
            }
        }
    }

    fn flush(&self, value: u64) -> Result<(), StoreError> {
        fs::write(&self.path, value.to_string()).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Reads a counter file without touching any in-memory state.
///
/// # Errors
///
/// Returns [`StoreError::Read`] if the file cannot be read and
/// [`StoreError::Corrupt`] if it does not hold a non-negative integer.
pub fn read_counter_file(path: &Path) -> Result<u64, StoreError> {
    let contents = fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let trimmed = contents.trim();
    trimmed.parse::<u64>().map_err(|_| StoreError::Corrupt {
        path: path.to_path_buf(),
        content: trimmed.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn missing_file_reads_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::new(dir.path().join("meterstand.txt"));
        assert_eq!(store.read(), 0);
    }

    #[test]
    fn corrupt_file_reads_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meterstand.txt");
        fs::write(&path, "twelve").unwrap();
        assert!(matches!(
            read_counter_file(&path),
            Err(StoreError::Corrupt { .. })
        ));
        assert_eq!(CounterStore::new(&path).read(), 0);
    }

    #[test]
    fn negative_value_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meterstand.txt");
        fs::write(&path, "-4").unwrap();
        assert_eq!(CounterStore::new(&path).read(), 0);
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meterstand.txt");
        fs::write(&path, " 1234\n").unwrap();
        assert_eq!(CounterStore::new(&path).read(), 1234);
    }

    #[test]
    fn write_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meterstand.txt");
        for value in [0, 1, 987_654, u64::MAX] {
            CounterStore::new(&path).write(value).unwrap();
            assert_eq!(CounterStore::new(&path).read(), value);
        }
    }

    #[test]
    fn file_holds_plain_decimal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meterstand.txt");
        let store = CounterStore::new(&path);
        store.write(41).unwrap();
        store.increment();
        assert_eq!(fs::read_to_string(&path).unwrap(), "42");
    }

    #[test]
    fn increment_counts_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meterstand.txt");
        fs::write(&path, "100").unwrap();

        let store = CounterStore::new(&path);
        let first = store.increment();
        assert_eq!(first.previous, 100);
        assert_eq!(first.value, 101);
        assert!(first.persisted.is_ok());
        assert_eq!(store.increment().value, 102);
        assert_eq!(read_counter_file(&path).unwrap(), 102);
    }

    #[test]
    fn failed_write_keeps_memory_authoritative() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be written as a file.
        let store = CounterStore::new(dir.path());

        let first = store.increment();
        assert_eq!(first.value, 1);
        assert!(matches!(first.persisted, Err(StoreError::Write { .. })));

        let second = store.increment();
        assert_eq!(second.previous, 1);
        assert_eq!(second.value, 2);
        assert_eq!(store.read(), 2);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meterstand.txt");
        let store = Arc::new(CounterStore::new(&path));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        store.increment();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.read(), 200);
        assert_eq!(read_counter_file(&path).unwrap(), 200);
    }
}
