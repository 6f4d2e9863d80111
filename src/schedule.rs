//! Schedule recorder: accumulates `(tid, cpu, timestamp, instr_ordinal)`
//! tuples emitted by every shard's kept CPU_ID markers, and exposes
//! serial-ordered and per-CPU-grouped views on finalize.
//!
//! Tuples are merged across shards and re-sorted on finalize — there is no
//! in-order draining requirement since nothing downstream consumes the
//! schedule until every shard exits.

use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScheduleEntry {
    pub tid: u64,
    pub cpu: u64,
    pub timestamp: u64,
    pub instr_ordinal: u64,
}

#[derive(Default)]
pub struct ScheduleRecorder {
    entries: Mutex<Vec<ScheduleEntry>>,
}

impl ScheduleRecorder {
    pub fn new() -> Self {
        ScheduleRecorder::default()
    }

    pub fn record(&self, entry: ScheduleEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    /// Serial-ordered view: every recorded tuple sorted by timestamp (ties
    /// broken by tid, then cpu, for determinism).
    pub fn serial_order(&self) -> Vec<ScheduleEntry> {
        let mut v = self.entries.lock().unwrap().clone();
        v.sort_by_key(|e| (e.timestamp, e.tid, e.cpu));
        v
    }

    /// Per-CPU-grouped view: tuples bucketed by `cpu`, each bucket sorted by
    /// timestamp.
    pub fn per_cpu(&self) -> BTreeMap<u64, Vec<ScheduleEntry>> {
        let mut out: BTreeMap<u64, Vec<ScheduleEntry>> = BTreeMap::new();
        for e in self.entries.lock().unwrap().iter() {
            out.entry(e.cpu).or_default().push(*e);
        }
        for bucket in out.values_mut() {
            bucket.sort_by_key(|e| (e.timestamp, e.tid));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_order_sorts_by_timestamp() {
        let r = ScheduleRecorder::new();
        r.record(ScheduleEntry { tid: 1, cpu: 0, timestamp: 30, instr_ordinal: 3 });
        r.record(ScheduleEntry { tid: 1, cpu: 0, timestamp: 10, instr_ordinal: 1 });
        r.record(ScheduleEntry { tid: 2, cpu: 1, timestamp: 20, instr_ordinal: 2 });
        let serial = r.serial_order();
        let timestamps: Vec<u64> = serial.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![10, 20, 30]);
    }

    #[test]
    fn per_cpu_groups_and_sorts_within_group() {
        let r = ScheduleRecorder::new();
        r.record(ScheduleEntry { tid: 1, cpu: 0, timestamp: 5, instr_ordinal: 0 });
        r.record(ScheduleEntry { tid: 2, cpu: 1, timestamp: 2, instr_ordinal: 0 });
        r.record(ScheduleEntry { tid: 1, cpu: 0, timestamp: 1, instr_ordinal: 0 });
        let per_cpu = r.per_cpu();
        assert_eq!(per_cpu.len(), 2);
        let cpu0 = &per_cpu[&0];
        assert_eq!(cpu0.iter().map(|e| e.timestamp).collect::<Vec<_>>(), vec![1, 5]);
    }

    #[test]
    fn is_empty_reflects_no_records() {
        let r = ScheduleRecorder::new();
        assert!(r.is_empty());
        r.record(ScheduleEntry { tid: 0, cpu: 0, timestamp: 0, instr_ordinal: 0 });
        assert!(!r.is_empty());
    }
}
