//! Modify-marker-value filter (§4.3.6): overwrites a MARKER's `addr` when
//! its sub-type appears in a configured rewrite table.

use std::collections::HashMap;

use crate::entry::Entry;
use crate::error::{FilterError, FilterResult};
use crate::filter::{FilterFunc, FilterInfo, Keep, KEEP};

pub struct ModifyMarkerValueFilter {
    rewrites: HashMap<u16, u64>,
}

impl ModifyMarkerValueFilter {
    /// `pairs` is the flat `(marker_type, new_value)*` list; must be
    /// non-empty and even in length.
    pub fn new(pairs: &[(u16, u64)]) -> FilterResult<Self> {
        if pairs.is_empty() {
            return Err(FilterError::configuration(
                "modify_marker_value requires at least one (marker_type, value) pair",
            ));
        }
        Ok(ModifyMarkerValueFilter { rewrites: pairs.iter().copied().collect() })
    }
}

impl FilterFunc for ModifyMarkerValueFilter {
    fn filter(&mut self, entry: &mut Entry, _info: &mut FilterInfo) -> FilterResult<Keep> {
        if entry.marker_kind().is_some() {
            if let Some(&new_value) = self.rewrites.get(&entry.size) {
                entry.addr = new_value;
            }
        }
        Ok(KEEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryKind, MarkerKind};
    use crate::filter::regdeps::NullDecoder;

    fn info<'a>(buf: &'a mut Vec<Entry>, d: &'a NullDecoder) -> FilterInfo<'a> {
        FilterInfo { last_encoding: buf, decoder: d }
    }

    #[test]
    fn rewrites_configured_marker_values() {
        let mut f = ModifyMarkerValueFilter::new(&[
            (MarkerKind::CpuId as u16, u64::MAX),
            (MarkerKind::PageSize as u16, 0x800),
        ])
        .unwrap();
        let mut buf = Vec::new();
        let d = NullDecoder;
        let mut i = info(&mut buf, &d);

        let mut cpu = Entry::marker(MarkerKind::CpuId, 3);
        f.filter(&mut cpu, &mut i).unwrap();
        assert_eq!(cpu.addr, u64::MAX);

        let mut page = Entry::marker(MarkerKind::PageSize, 4096);
        f.filter(&mut page, &mut i).unwrap();
        assert_eq!(page.addr, 0x800);

        let mut other = Entry::marker(MarkerKind::Timestamp, 99);
        f.filter(&mut other, &mut i).unwrap();
        assert_eq!(other.addr, 99, "unconfigured marker types are untouched");
    }

    #[test]
    fn non_markers_pass_through_unchanged() {
        let mut f = ModifyMarkerValueFilter::new(&[(MarkerKind::CpuId as u16, 1)]).unwrap();
        let mut buf = Vec::new();
        let d = NullDecoder;
        let mut i = info(&mut buf, &d);
        let mut e = Entry::new(EntryKind::Read, 8, 0x999);
        f.filter(&mut e, &mut i).unwrap();
        assert_eq!(e.addr, 0x999);
    }

    #[test]
    fn rejects_empty_list() {
        assert!(ModifyMarkerValueFilter::new(&[]).is_err());
    }
}
