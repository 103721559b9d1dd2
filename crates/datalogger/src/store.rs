// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Record store abstraction
//!
//! Defines the trait for reading stores and the immutable [`Batch`] handed to
//! sinks.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A logged sensor reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Store-assigned id, monotonic by insertion
    pub id: i64,

    /// ISO-8601 timestamp
    pub timestamp: String,

    /// Serialized payload (JSON object)
    pub payload: String,

    /// Whether every configured sink has accepted this reading
    pub published: bool,
}

/// An ordered, immutable set of readings fetched together.
///
/// Cloning is cheap; every sink receives the same underlying readings.
#[derive(Debug, Clone)]
pub struct Batch {
    readings: Arc<[Reading]>,
}

impl Batch {
    /// Wrap readings in fetch order.
    pub fn new(readings: Vec<Reading>) -> Self {
        Self {
            readings: readings.into(),
        }
    }

    /// Readings in fetch order.
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// Ids identifying this batch, in fetch order.
    pub fn ids(&self) -> Vec<i64> {
        self.readings.iter().map(|r| r.id).collect()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

impl From<Vec<Reading>> for Batch {
    fn from(readings: Vec<Reading>) -> Self {
        Self::new(readings)
    }
}

/// Total and unpublished counts taken together
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub total: usize,
    pub unpublished: usize,
}

impl StoreCounts {
    /// Readings already published
    pub fn published(&self) -> usize {
        self.total.saturating_sub(self.unpublished)
    }
}

/// Reading store trait
///
/// Backend-agnostic interface for the append-only readings table.
///
/// # Implementations
///
/// - `SqliteStore` -- Default
pub trait ReadingStore {
    /// Append a reading; returns the assigned id.
    fn insert_reading(&self, timestamp: &str, payload: &str) -> Result<i64, StoreError>;

    /// Fetch up to `limit` unpublished readings, oldest timestamp first.
    ///
    /// Has no side effects: with no intervening writes, repeated calls return
    /// the same readings in the same order.
    fn fetch_unpublished(&self, limit: usize) -> Result<Vec<Reading>, StoreError>;

    /// Mark every listed id as published, atomically.
    ///
    /// Either all ids are flipped or none are. An unknown id aborts the whole
    /// transaction.
    fn mark_published(&self, ids: &[i64]) -> Result<(), StoreError>;

    /// Total number of stored readings
    fn count(&self) -> Result<usize, StoreError>;

    /// Number of readings not yet published
    fn count_unpublished(&self) -> Result<usize, StoreError>;

    /// Both counts. Backends should read them from one snapshot.
    fn counts(&self) -> Result<StoreCounts, StoreError> {
        Ok(StoreCounts {
            total: self.count()?,
            unpublished: self.count_unpublished()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(id: i64) -> Reading {
        Reading {
            id,
            timestamp: format!("2025-01-01T00:00:0{}", id),
            payload: format!("{{\"reading\":{}}}", id),
            published: false,
        }
    }

    #[test]
    fn test_batch_preserves_order() {
        let batch = Batch::new(vec![reading(3), reading(1), reading(2)]);
        assert_eq!(batch.ids(), vec![3, 1, 2]);
        assert_eq!(batch.len(), 3);
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_batch_clone_shares_readings() {
        let batch = Batch::new(vec![reading(1)]);
        let copy = batch.clone();
        assert!(std::ptr::eq(batch.readings(), copy.readings()));
    }

    #[test]
    fn test_published_count_never_underflows() {
        let counts = StoreCounts {
            total: 3,
            unpublished: 4,
        };
        assert_eq!(counts.published(), 0);

        let counts = StoreCounts {
            total: 10,
            unpublished: 4,
        };
        assert_eq!(counts.published(), 6);
    }

    #[test]
    fn test_reading_serialization() {
        let r = reading(4);
        let json = serde_json::to_string(&r).unwrap();
        let back: Reading = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }
}
