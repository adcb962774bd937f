use std::{collections::HashSet, ops::Sub};

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{entry::Entry, timestamp::systime_format};

/// The aggregator's view of all live publishers at one moment.
///
/// Invariant: at most one entry per (addr, port). [`Snapshot::add_entry`]
/// enforces it: an incoming entry replaces the current holder of its key
/// only if it updates it (same location, not older); stale duplicates are
/// dropped. Entry order is the order of first appearance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SnapshotWire", into = "SnapshotWire")]
pub struct Snapshot {
    pub systime: DateTime<Utc>,
    /// Name of the log the aggregator is appending to, if any.
    pub log: Option<String>,
    entries: IndexMap<(String, u16), Entry>,
}

#[derive(Clone, Serialize, Deserialize)]
struct SnapshotWire {
    #[serde(with = "systime_format")]
    systime: DateTime<Utc>,
    log: Option<String>,
    entries: Vec<Entry>,
}

impl From<SnapshotWire> for Snapshot {
    fn from(wire: SnapshotWire) -> Self {
        let mut snapshot = Snapshot::new(wire.systime);
        snapshot.log = wire.log;
        for entry in wire.entries {
            snapshot.add_entry(entry);
        }
        snapshot
    }
}

impl From<Snapshot> for SnapshotWire {
    fn from(snapshot: Snapshot) -> Self {
        SnapshotWire {
            systime: snapshot.systime,
            log: snapshot.log,
            entries: snapshot.entries.into_values().collect(),
        }
    }
}

impl Snapshot {
    pub fn new(systime: DateTime<Utc>) -> Self {
        Self { systime, log: None, entries: IndexMap::new() }
    }

    /// Insert `entry` unless a fresher record already holds its (addr, port).
    /// Returns whether the snapshot changed.
    pub fn add_entry(&mut self, entry: Entry) -> bool {
        match self.entries.get(&entry.location()) {
            Some(existing) if !entry.updates(existing) => false,
            _ => {
                self.entries.insert(entry.location(), entry);
                true
            }
        }
    }

    /// Remove `entry` if the snapshot holds exactly this value.
    pub fn remove_entry(&mut self, entry: &Entry) -> bool {
        if self.entries.get(&entry.location()) == Some(entry) {
            self.entries.shift_remove(&entry.location());
            true
        } else {
            false
        }
    }

    /// Drop every entry whose last pulse is older than `max_age` at `now`.
    /// Returns the number of entries purged.
    pub fn remove_stale(&mut self, max_age: TimeDelta, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.systime <= max_age);
        before - self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// The (addr, port) pairs a subscriber should hold connections to.
    pub fn locations(&self) -> impl Iterator<Item = &(String, u16)> {
        self.entries.keys()
    }

    pub fn contains_location(&self, location: &(String, u16)) -> bool {
        self.entries.contains_key(location)
    }

    pub fn get(&self, location: &(String, u16)) -> Option<&Entry> {
        self.entries.get(location)
    }

    pub fn by_name(&self, name: &str) -> Option<&Entry> {
        self.entries.values().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set-apply a diff: removals first, then additions.
    pub fn apply(&mut self, diff: &SnapshotDiff) {
        for entry in &diff.remove {
            self.remove_entry(entry);
        }
        for entry in &diff.add {
            self.add_entry(entry.clone());
        }
    }
}

/// What changed between two snapshots, as owned entry values. Order within
/// `add` and `remove` is unspecified.
#[derive(Debug, Clone, Default)]
pub struct SnapshotDiff {
    pub add: Vec<Entry>,
    pub remove: Vec<Entry>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

impl Sub<&Snapshot> for &Snapshot {
    type Output = SnapshotDiff;

    /// `new − old`: entries only in `new` are `add`, entries only in `old`
    /// are `remove`. Comparison is full Entry equality.
    fn sub(self, old: &Snapshot) -> SnapshotDiff {
        let new_set: HashSet<&Entry> = self.entries.values().collect();
        let old_set: HashSet<&Entry> = old.entries.values().collect();
        SnapshotDiff {
            add: new_set.difference(&old_set).map(|e| (*e).clone()).collect(),
            remove: old_set.difference(&new_set).map(|e| (*e).clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::entry::StatusColor;

    fn entry(name: &str, addr: &str, port: u16, secs: u32) -> Entry {
        Entry {
            name: name.into(),
            pid: "1".into(),
            addr: addr.into(),
            port,
            systime: Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, secs).unwrap(),
            status: "ok".into(),
            status_color: StatusColor::White,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap()
    }

    #[test]
    fn one_entry_per_location() {
        let mut s = Snapshot::new(t0());
        assert!(s.add_entry(entry("daq0", "10.0.0.7", 9000, 1)));
        assert!(s.add_entry(entry("daq0", "10.0.0.7", 9000, 2)));
        assert_eq!(s.len(), 1);
        assert_eq!(s.get(&("10.0.0.7".into(), 9000)).unwrap().systime.timestamp() % 60, 2);

        // A stale pulse for a held location does not regress the record.
        assert!(!s.add_entry(entry("daq0", "10.0.0.7", 9000, 0)));
        assert_eq!(s.get(&("10.0.0.7".into(), 9000)).unwrap().systime.timestamp() % 60, 2);
    }

    #[test]
    fn remove_stale_purges_by_age() {
        let mut s = Snapshot::new(t0());
        s.add_entry(entry("old", "10.0.0.1", 9000, 0));
        s.add_entry(entry("new", "10.0.0.2", 9000, 50));
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 3, 30).unwrap();
        assert_eq!(s.remove_stale(TimeDelta::minutes(3), now), 1);
        assert!(s.by_name("old").is_none());
        assert!(s.by_name("new").is_some());
    }

    #[test]
    fn diff_law() {
        let mut s0 = Snapshot::new(t0());
        s0.add_entry(entry("a", "10.0.0.1", 9000, 1));
        s0.add_entry(entry("b", "10.0.0.2", 9000, 1));

        let mut s1 = Snapshot::new(t0());
        s1.add_entry(entry("a", "10.0.0.1", 9000, 1));
        s1.add_entry(entry("c", "10.0.0.3", 9000, 1));

        let diff = &s1 - &s0;
        assert_eq!(diff.add.len(), 1);
        assert_eq!(diff.add[0].name, "c");
        assert_eq!(diff.remove.len(), 1);
        assert_eq!(diff.remove[0].name, "b");

        let mut applied = s0.clone();
        applied.apply(&diff);
        let entries: HashSet<&Entry> = applied.entries().collect();
        let expected: HashSet<&Entry> = s1.entries().collect();
        assert_eq!(entries, expected);
    }

    #[test]
    fn serde_roundtrip_dedups_on_load() {
        let mut s = Snapshot::new(t0());
        s.log = Some("agg/incremental.log".into());
        s.add_entry(entry("daq0", "10.0.0.7", 9000, 1));

        let mut text = serde_json::to_string(&s).unwrap();
        // Splice a stale duplicate for the same location into the wire form.
        let dup = serde_json::to_string(&entry("daq0", "10.0.0.7", 9000, 0)).unwrap();
        text = text.replace("\"entries\":[", &format!("\"entries\":[{dup},"));

        let parsed: Snapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.log.as_deref(), Some("agg/incremental.log"));
        assert_eq!(parsed.get(&("10.0.0.7".into(), 9000)).unwrap().systime.timestamp() % 60, 1);
    }
}
