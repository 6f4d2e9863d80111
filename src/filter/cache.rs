//! Cache filter (§4.3.1): models an M-way set-associative LRU cache and
//! drops memory accesses and/or instruction fetches that hit in it.

use crate::entry::{filetype, is_instr, is_memory_access, Entry};
use crate::error::{FilterError, FilterResult};
use crate::filter::{FilterFunc, FilterInfo, Keep, DROP, KEEP};

pub struct CacheFilter {
    line_size_log2: u32,
    associativity: usize,
    set_count: usize,
    filter_data: bool,
    filter_instrs: bool,
    /// One LRU list per set; `sets[i][0]` is the most-recently-used tag.
    sets: Vec<Vec<u64>>,
}

impl CacheFilter {
    /// `size`/`line_size`/`associativity` are all in bytes/ways; `line_size`
    /// must be a power of two and `size` must be an exact multiple of
    /// `line_size * associativity`.
    pub fn new(
        size: usize,
        line_size: usize,
        associativity: usize,
        filter_data: bool,
        filter_instrs: bool,
    ) -> FilterResult<Self> {
        if size == 0 || line_size == 0 || associativity == 0 {
            return Err(FilterError::configuration(
                "cache filter size, line_size and associativity must all be positive",
            ));
        }
        if !line_size.is_power_of_two() {
            return Err(FilterError::configuration("cache line_size must be a power of two"));
        }
        let set_count = size / (line_size * associativity);
        if set_count == 0 {
            return Err(FilterError::configuration(
                "cache filter size too small for the given line_size/associativity",
            ));
        }
        Ok(CacheFilter {
            line_size_log2: line_size.trailing_zeros(),
            associativity,
            set_count,
            filter_data,
            filter_instrs,
            sets: vec![Vec::with_capacity(associativity); set_count],
        })
    }

    /// Default 1-way, 64-byte-line, data-filtering cache enabled by
    /// `cache_filter_size > 0` in the configuration surface (§6).
    pub fn default_data_filter(size: usize) -> FilterResult<Self> {
        Self::new(size, 64, 1, true, false)
    }

    /// Probes the cache for `addr`, updating LRU state. Returns `true` on
    /// hit.
    fn probe(&mut self, addr: u64) -> bool {
        let tag = addr >> self.line_size_log2;
        let idx = (tag as usize) % self.set_count;
        let set = &mut self.sets[idx];
        if let Some(pos) = set.iter().position(|&t| t == tag) {
            let t = set.remove(pos);
            set.insert(0, t);
            true
        } else {
            if set.len() >= self.associativity {
                set.pop();
            }
            set.insert(0, tag);
            false
        }
    }
}

impl FilterFunc for CacheFilter {
    fn filter(&mut self, entry: &mut Entry, _info: &mut FilterInfo) -> FilterResult<Keep> {
        let probe_data = self.filter_data && is_memory_access(entry.kind);
        let probe_instr = self.filter_instrs && is_instr(entry.kind) && entry.size > 0;
        if probe_data || probe_instr {
            return Ok(if self.probe(entry.addr) { DROP } else { KEEP });
        }
        Ok(KEEP)
    }

    fn update_filetype(&self, filetype: u64) -> u64 {
        let mut ft = filetype;
        if self.filter_data {
            ft |= filetype::DFILTERED;
        }
        if self.filter_instrs {
            ft |= filetype::IFILTERED;
        }
        ft
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;

    fn info<'a>(buf: &'a mut Vec<Entry>, d: &'a crate::filter::regdeps::NullDecoder) -> FilterInfo<'a> {
        FilterInfo { last_encoding: buf, decoder: d }
    }

    #[test]
    fn rejects_non_power_of_two_line_size() {
        assert!(CacheFilter::new(1024, 63, 1, true, false).is_err());
    }

    #[test]
    fn rejects_size_too_small_for_geometry() {
        assert!(CacheFilter::new(10, 64, 4, true, false).is_err());
    }

    #[test]
    fn repeated_access_to_same_line_is_a_hit() {
        let mut f = CacheFilter::new(1024, 64, 2, true, false).unwrap();
        let mut buf = Vec::new();
        let d = crate::filter::regdeps::NullDecoder;
        let mut i = info(&mut buf, &d);
        let mut e1 = Entry::new(EntryKind::Read, 8, 0x1000);
        assert_eq!(f.filter(&mut e1, &mut i).unwrap(), KEEP, "first access is a miss");
        let mut e2 = Entry::new(EntryKind::Read, 8, 0x1000);
        assert_eq!(f.filter(&mut e2, &mut i).unwrap(), DROP, "second access to same line is a hit");
    }

    #[test]
    fn lru_eviction_causes_reaccess_miss() {
        let mut f = CacheFilter::new(128, 64, 1, true, false).unwrap();
        let mut buf = Vec::new();
        let d = crate::filter::regdeps::NullDecoder;
        let mut i = info(&mut buf, &d);
        // 1-way, 2 sets (128/64). Two different tags mapping to the same set
        // evict each other.
        let mut a = Entry::new(EntryKind::Read, 8, 0);
        let mut b = Entry::new(EntryKind::Read, 8, 128);
        f.filter(&mut a, &mut i).unwrap();
        f.filter(&mut b, &mut i).unwrap();
        let mut a_again = Entry::new(EntryKind::Read, 8, 0);
        assert_eq!(f.filter(&mut a_again, &mut i).unwrap(), KEEP);
    }

    #[test]
    fn instruction_fetch_only_filtered_when_enabled() {
        let mut f = CacheFilter::new(1024, 64, 2, false, true).unwrap();
        let mut buf = Vec::new();
        let d = crate::filter::regdeps::NullDecoder;
        let mut i = info(&mut buf, &d);
        let mut instr1 = Entry::new(EntryKind::Instr, 4, 0x4000);
        assert_eq!(f.filter(&mut instr1, &mut i).unwrap(), KEEP);
        let mut instr2 = Entry::new(EntryKind::Instr, 4, 0x4000);
        assert_eq!(f.filter(&mut instr2, &mut i).unwrap(), DROP);
        let mut read = Entry::new(EntryKind::Read, 8, 0x4000);
        assert_eq!(f.filter(&mut read, &mut i).unwrap(), KEEP, "data filtering is disabled");
    }

    #[test]
    fn update_filetype_sets_bits_for_enabled_streams() {
        let f = CacheFilter::new(1024, 64, 1, true, true).unwrap();
        let ft = f.update_filetype(0);
        assert_eq!(ft, filetype::DFILTERED | filetype::IFILTERED);
    }
}
