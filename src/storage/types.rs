//! Core data types for the storage layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One holding-register value captured from a device.
///
/// Readings are append-only; nothing in this crate updates or deletes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Register address the value was read from.
    pub register_address: u16,
    /// Raw 16-bit register value.
    pub value: u16,
    /// Capture time (UTC, microsecond precision once stored).
    pub captured_at: DateTime<Utc>,
}

impl Reading {
    /// Create a reading.
    pub fn new(register_address: u16, value: u16, captured_at: DateTime<Utc>) -> Self {
        Self {
            register_address,
            value,
            captured_at,
        }
    }
}

/// Build the readings of one poll cycle.
///
/// Every value is paired with `base_address + offset` and all readings share
/// `captured_at`, so a cycle lands on a single pivot row. Values that would
/// address past `u16::MAX` are dropped.
pub fn poll_cycle(base_address: u16, values: &[u16], captured_at: DateTime<Utc>) -> Vec<Reading> {
    values
        .iter()
        .enumerate()
        .map_while(|(offset, &value)| {
            let offset = u16::try_from(offset).ok()?;
            let address = base_address.checked_add(offset)?;
            Some(Reading::new(address, value, captured_at))
        })
        .collect()
}

/// Convert a timestamp to the integer microseconds stored in SQLite.
pub(crate) fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

/// Convert stored microseconds back into a timestamp.
pub(crate) fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_cycle_addresses_from_base() {
        let ts = Utc::now();
        let cycle = poll_cycle(0, &[7, 8, 9], ts);
        assert_eq!(cycle.len(), 3);
        assert_eq!(cycle[0], Reading::new(0, 7, ts));
        assert_eq!(cycle[2], Reading::new(2, 9, ts));

        let shifted = poll_cycle(100, &[1, 2], ts);
        assert_eq!(shifted[0].register_address, 100);
        assert_eq!(shifted[1].register_address, 101);
    }

    #[test]
    fn test_poll_cycle_shares_timestamp() {
        let ts = Utc::now();
        let cycle = poll_cycle(0, &[0; 10], ts);
        assert!(cycle.iter().all(|r| r.captured_at == ts));
    }

    #[test]
    fn test_poll_cycle_stops_at_address_space_end() {
        let cycle = poll_cycle(u16::MAX - 1, &[1, 2, 3], Utc::now());
        assert_eq!(cycle.len(), 2);
        assert_eq!(cycle[1].register_address, u16::MAX);
    }

    #[test]
    fn test_micros_roundtrip() {
        let ts = DateTime::from_timestamp_micros(1_700_000_000_123_456).unwrap();
        assert_eq!(from_micros(to_micros(ts)), ts);
    }
}
