//! Type filter (§4.3.2): drops entries by trace-type code or marker sub-type
//! code, and keeps the FILETYPE marker's bits consistent with what was
//! removed.

use std::collections::HashSet;

use crate::entry::{filetype, Entry, EntryKind, MarkerKind};
use crate::error::FilterResult;
use crate::filter::{FilterFunc, FilterInfo, Keep, DROP, KEEP};

pub struct TypeFilter {
    remove_trace_types: HashSet<u16>,
    remove_marker_types: HashSet<u16>,
    /// True iff a `stop_timestamp` is configured; a partial filter never
    /// clears the ENCODINGS bit, since the warm-up prefix still carries
    /// unfiltered encodings.
    partial: bool,
}

impl TypeFilter {
    pub fn new(remove_trace_types: HashSet<u16>, remove_marker_types: HashSet<u16>) -> Self {
        TypeFilter { remove_trace_types, remove_marker_types, partial: false }
    }

    fn removes_encoding(&self) -> bool {
        self.remove_trace_types.contains(&(EntryKind::Encoding as u16))
    }

    fn removes_any_instr(&self) -> bool {
        [
            EntryKind::Instr,
            EntryKind::InstrBundle,
            EntryKind::InstrDirectCall,
            EntryKind::InstrIndirectCall,
            EntryKind::InstrDirectJump,
            EntryKind::InstrIndirectJump,
            EntryKind::InstrReturn,
            EntryKind::InstrSyscall,
        ]
        .iter()
        .any(|k| self.remove_trace_types.contains(&(*k as u16)))
    }

    fn removes_memory(&self) -> bool {
        self.remove_trace_types.contains(&(EntryKind::Read as u16))
            || self.remove_trace_types.contains(&(EntryKind::Write as u16))
    }

    fn rewrite_filetype(&self, ft: u64) -> u64 {
        let mut ft = ft;
        if self.removes_encoding() && !self.partial {
            ft &= !filetype::ENCODINGS;
        }
        if self.removes_any_instr() {
            ft |= filetype::IFILTERED;
        }
        if self.removes_memory() {
            ft |= filetype::DFILTERED;
        }
        ft
    }
}

impl FilterFunc for TypeFilter {
    fn init(&mut self, partial: bool) {
        self.partial = partial;
    }

    fn filter(&mut self, entry: &mut Entry, _info: &mut FilterInfo) -> FilterResult<Keep> {
        if let Some(mk) = entry.marker_kind() {
            if mk == MarkerKind::Filetype {
                entry.addr = self.rewrite_filetype(entry.addr);
                return Ok(KEEP);
            }
            if self.remove_marker_types.contains(&entry.size) {
                return Ok(DROP);
            }
            return Ok(KEEP);
        }
        if self.remove_trace_types.contains(&(entry.kind as u16)) {
            return Ok(DROP);
        }
        Ok(KEEP)
    }

    fn update_filetype(&self, filetype: u64) -> u64 {
        self.rewrite_filetype(filetype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::regdeps::NullDecoder;

    fn info<'a>(buf: &'a mut Vec<Entry>, d: &'a NullDecoder) -> FilterInfo<'a> {
        FilterInfo { last_encoding: buf, decoder: d }
    }

    #[test]
    fn drops_configured_trace_type() {
        let mut types = HashSet::new();
        types.insert(EntryKind::Read as u16);
        let mut f = TypeFilter::new(types, HashSet::new());
        let mut buf = Vec::new();
        let d = NullDecoder;
        let mut i = info(&mut buf, &d);
        let mut e = Entry::new(EntryKind::Read, 8, 0x10);
        assert_eq!(f.filter(&mut e, &mut i).unwrap(), DROP);
        let mut e2 = Entry::new(EntryKind::Write, 8, 0x10);
        assert_eq!(f.filter(&mut e2, &mut i).unwrap(), KEEP);
    }

    #[test]
    fn drops_configured_marker_type() {
        let mut markers = HashSet::new();
        markers.insert(MarkerKind::PageSize as u16);
        let mut f = TypeFilter::new(HashSet::new(), markers);
        let mut buf = Vec::new();
        let d = NullDecoder;
        let mut i = info(&mut buf, &d);
        let mut e = Entry::marker(MarkerKind::PageSize, 4096);
        assert_eq!(f.filter(&mut e, &mut i).unwrap(), DROP);
    }

    #[test]
    fn non_partial_removal_of_encoding_clears_bit() {
        let mut types = HashSet::new();
        types.insert(EntryKind::Encoding as u16);
        let mut f = TypeFilter::new(types, HashSet::new());
        f.init(false);
        let mut buf = Vec::new();
        let d = NullDecoder;
        let mut i = info(&mut buf, &d);
        let mut ft = Entry::marker(MarkerKind::Filetype, filetype::ENCODINGS | filetype::ARCH_X86_64);
        f.filter(&mut ft, &mut i).unwrap();
        assert_eq!(ft.addr & filetype::ENCODINGS, 0);
    }

    #[test]
    fn partial_removal_of_encoding_keeps_bit() {
        let mut types = HashSet::new();
        types.insert(EntryKind::Encoding as u16);
        let mut f = TypeFilter::new(types, HashSet::new());
        f.init(true);
        let mut buf = Vec::new();
        let d = NullDecoder;
        let mut i = info(&mut buf, &d);
        let mut ft = Entry::marker(MarkerKind::Filetype, filetype::ENCODINGS);
        f.filter(&mut ft, &mut i).unwrap();
        assert_eq!(ft.addr & filetype::ENCODINGS, filetype::ENCODINGS);
    }

    #[test]
    fn removing_instr_or_memory_sets_filtered_bits() {
        let mut types = HashSet::new();
        types.insert(EntryKind::InstrSyscall as u16);
        types.insert(EntryKind::Write as u16);
        let f = TypeFilter::new(types, HashSet::new());
        let ft = f.update_filetype(0);
        assert_eq!(ft, filetype::IFILTERED | filetype::DFILTERED);
    }
}
