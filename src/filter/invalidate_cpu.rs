//! Invalidate-cpu-id filter (§9b, C12): the simplest possible `FilterFunc`
//! implementor — a single-marker-type, single-condition rewrite with no
//! shard-exit bookkeeping. On every CPU_ID marker belonging to a configured
//! target thread, overwrites it with the producer's own "not yet scheduled"
//! sentinel rather than an arbitrary caller value (modify-marker-value
//! already generalizes the arbitrary-value case).

use crate::entry::{Entry, MarkerKind};
use crate::error::FilterResult;
use crate::filter::{FilterFunc, FilterInfo, Keep, KEEP};

/// Sentinel matching the producer's own "not yet scheduled" CPU value.
pub const INVALID_CORE_NUMBER: u64 = u64::MAX;

pub struct InvalidateCpuIdFilter {
    target_tid: u64,
    current_tid: u64,
}

impl InvalidateCpuIdFilter {
    pub fn new(target_tid: u64) -> Self {
        InvalidateCpuIdFilter { target_tid, current_tid: 0 }
    }
}

impl FilterFunc for InvalidateCpuIdFilter {
    fn filter(&mut self, entry: &mut Entry, _info: &mut FilterInfo) -> FilterResult<Keep> {
        use crate::entry::EntryKind;
        if entry.kind == EntryKind::Thread {
            self.current_tid = entry.addr;
        }
        if entry.marker_kind() == Some(MarkerKind::CpuId) && self.current_tid == self.target_tid {
            entry.addr = INVALID_CORE_NUMBER;
        }
        Ok(KEEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use crate::filter::regdeps::NullDecoder;

    fn info<'a>(buf: &'a mut Vec<Entry>, d: &'a NullDecoder) -> FilterInfo<'a> {
        FilterInfo { last_encoding: buf, decoder: d }
    }

    #[test]
    fn invalidates_only_the_target_thread() {
        let mut f = InvalidateCpuIdFilter::new(42);
        let mut buf = Vec::new();
        let d = NullDecoder;
        let mut i = info(&mut buf, &d);

        let mut thread = Entry::new(EntryKind::Thread, 0, 42);
        f.filter(&mut thread, &mut i).unwrap();
        let mut cpu = Entry::marker(MarkerKind::CpuId, 3);
        f.filter(&mut cpu, &mut i).unwrap();
        assert_eq!(cpu.addr, INVALID_CORE_NUMBER);

        let mut other_thread = Entry::new(EntryKind::Thread, 0, 99);
        f.filter(&mut other_thread, &mut i).unwrap();
        let mut cpu2 = Entry::marker(MarkerKind::CpuId, 3);
        f.filter(&mut cpu2, &mut i).unwrap();
        assert_eq!(cpu2.addr, 3, "non-target thread's CPU_ID is untouched");
    }
}
