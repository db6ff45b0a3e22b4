//! Pivot projection of readings.
//!
//! Turns a flat window of readings into a table with one row per capture
//! timestamp and one column per register address. Since every reading of a
//! poll cycle shares one timestamp, each row is one cycle.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::storage::Reading;

/// Which reading wins when a `(captured_at, register_address)` pair repeats.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CollisionPolicy {
    /// First reading in input order. With newest-first input this is the
    /// most recent insertion.
    #[default]
    KeepFirst,
    /// Last reading in input order.
    KeepLast,
}

/// One capture timestamp and the register values seen at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotRow {
    pub captured_at: DateTime<Utc>,
    /// Register address to value. Absent addresses have no reading.
    pub values: BTreeMap<u16, u16>,
}

/// Readings pivoted by timestamp and register address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotTable {
    /// Distinct register addresses, ascending.
    pub columns: Vec<u16>,
    /// Distinct timestamps, ascending.
    pub rows: Vec<PivotRow>,
    /// Number of readings discarded by the collision policy.
    pub collisions: usize,
}

impl PivotTable {
    /// Cell value at `captured_at` for `register_address`, if any.
    pub fn get(&self, captured_at: DateTime<Utc>, register_address: u16) -> Option<u16> {
        let idx = self
            .rows
            .binary_search_by(|row| row.captured_at.cmp(&captured_at))
            .ok()?;
        self.rows[idx].values.get(&register_address).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Pivot readings as returned by `ReadingStore::query_recent`.
///
/// Duplicated pairs keep the first reading seen, which for newest-first input
/// is the newest insertion.
pub fn project(readings: &[Reading]) -> PivotTable {
    project_with(readings, CollisionPolicy::KeepFirst)
}

/// Pivot readings with an explicit collision policy.
pub fn project_with(readings: &[Reading], policy: CollisionPolicy) -> PivotTable {
    let mut columns = BTreeSet::new();
    let mut rows: BTreeMap<DateTime<Utc>, BTreeMap<u16, u16>> = BTreeMap::new();
    let mut collisions = 0;

    for reading in readings {
        columns.insert(reading.register_address);
        match rows
            .entry(reading.captured_at)
            .or_default()
            .entry(reading.register_address)
        {
            Entry::Vacant(cell) => {
                cell.insert(reading.value);
            }
            Entry::Occupied(mut cell) => {
                collisions += 1;
                if policy == CollisionPolicy::KeepLast {
                    cell.insert(reading.value);
                }
            }
        }
    }

    if collisions > 0 {
        tracing::debug!(collisions, policy = %policy, "Duplicate readings discarded");
    }

    PivotTable {
        columns: columns.into_iter().collect(),
        rows: rows
            .into_iter()
            .map(|(captured_at, values)| PivotRow {
                captured_at,
                values,
            })
            .collect(),
        collisions,
    }
}
