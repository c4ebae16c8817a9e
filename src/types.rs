use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Raw key bytes. Ordered lexicographically (unsigned byte comparison).
pub type Key = Vec<u8>;

/// Distinguishes live values from deletions on disk and in the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// A normal put operation.
    Put = 0x01,
    /// A delete (tombstone marker).
    Delete = 0x02,
}

impl ValueType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(ValueType::Put),
            0x02 => Some(ValueType::Delete),
            _ => None,
        }
    }
}

/// A timestamped value or tombstone.
///
/// A delete doesn't remove the key: it writes a tombstone carrying its own
/// timestamp, so it can shadow older values in other tables and on other
/// replicas.
///
/// Ordering: newest first. `a < b` means `a` is the newer version.
/// Timestamp ties are broken deterministically: a tombstone counts as newer
/// than a value, and between two values the larger payload wins. Every
/// replica applies the same rule, so they converge on the same winner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionedValue {
    timestamp: u64,
    payload: Option<Vec<u8>>,
}

impl VersionedValue {
    pub fn value(timestamp: u64, payload: Vec<u8>) -> Self {
        VersionedValue {
            timestamp,
            payload: Some(payload),
        }
    }

    pub fn tombstone(timestamp: u64) -> Self {
        VersionedValue {
            timestamp,
            payload: None,
        }
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn is_tombstone(&self) -> bool {
        self.payload.is_none()
    }

    /// Payload bytes, `None` for a tombstone.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn into_payload(self) -> Option<Vec<u8>> {
        self.payload
    }

    pub fn value_type(&self) -> ValueType {
        if self.is_tombstone() {
            ValueType::Delete
        } else {
            ValueType::Put
        }
    }

    /// True if `self` should win over `other` when both describe the same key.
    pub fn supersedes(&self, other: &VersionedValue) -> bool {
        self < other
    }

    /// Approximate in-memory footprint, used for flush accounting.
    pub fn size_bytes(&self) -> usize {
        std::mem::size_of::<u64>() + self.payload.as_ref().map_or(0, Vec::len)
    }
}

impl Ord for VersionedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| match (&self.payload, &other.payload) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => b.cmp(a),
            })
    }
}

impl PartialOrd for VersionedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A key together with one of its versions.
///
/// Ordering: (key ASC, version newest-first). When several sorted sources
/// are merged, the first cell seen for a key is its newest version, so
/// collapsing duplicates means keeping the first cell of every run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cell {
    pub key: Key,
    pub value: VersionedValue,
}

impl Cell {
    pub fn new(key: Key, value: VersionedValue) -> Self {
        Cell { key, value }
    }

    /// The smallest possible cell for `key`: sorts before every real version
    /// of it. Used to seek sorted structures to the start of a key.
    pub fn seek_marker(key: &[u8]) -> Self {
        Cell {
            key: key.to_vec(),
            value: VersionedValue::tombstone(u64::MAX),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_tombstone()
    }

    pub fn size_bytes(&self) -> usize {
        self.key.len() + self.value.size_bytes()
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.value.cmp(&other.value))
    }
}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Whether `timestamp` may be stored. Zero means "unset" and `u64::MAX` is
/// reserved for seek markers.
pub fn is_valid_timestamp(timestamp: u64) -> bool {
    timestamp != 0 && timestamp != u64::MAX
}

/// Hands out strictly increasing timestamps (microseconds since the epoch).
///
/// Wall-clock time is the base, but two calls never return the same value,
/// even within one microsecond or if the clock steps backwards. It stops
/// at `u64::MAX - 1`, the largest storable timestamp.
#[derive(Debug, Default)]
pub struct TimestampSource {
    last: AtomicU64,
}

impl TimestampSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        let wall = wall_clock_micros();
        let mut last = self.last.load(AtomicOrdering::Relaxed);
        loop {
            let next = wall.max(last.saturating_add(1)).min(u64::MAX - 1);
            match self.last.compare_exchange_weak(
                last,
                next,
                AtomicOrdering::AcqRel,
                AtomicOrdering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    /// Make sure future timestamps are greater than `seen`.
    ///
    /// The clock never moves past the largest storable timestamp.
    pub fn observe(&self, seen: u64) {
        self.last.fetch_max(seen.min(u64::MAX - 2), AtomicOrdering::AcqRel);
    }
}

fn wall_clock_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
