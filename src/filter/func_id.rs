//! Func-id filter (§4.3.5): keeps only function-call marker groups whose
//! opening FUNC_ID value is in a configured keep set.

use std::collections::HashSet;

use crate::entry::{Entry, MarkerKind};
use crate::error::FilterResult;
use crate::filter::{FilterFunc, FilterInfo, Keep, DROP, KEEP};

pub struct FuncIdFilter {
    keep: HashSet<u64>,
    output_func_markers: bool,
}

impl FuncIdFilter {
    pub fn new(keep: HashSet<u64>) -> Self {
        FuncIdFilter { keep, output_func_markers: false }
    }
}

fn is_func_marker(mk: MarkerKind) -> bool {
    matches!(mk, MarkerKind::FuncId | MarkerKind::FuncArg | MarkerKind::FuncRetval | MarkerKind::FuncRetaddr)
}

impl FilterFunc for FuncIdFilter {
    fn filter(&mut self, entry: &mut Entry, _info: &mut FilterInfo) -> FilterResult<Keep> {
        let Some(mk) = entry.marker_kind() else { return Ok(KEEP) };
        if !is_func_marker(mk) {
            return Ok(KEEP);
        }
        if mk == MarkerKind::FuncId {
            self.output_func_markers = self.keep.contains(&entry.addr);
            return Ok(if self.output_func_markers { KEEP } else { DROP });
        }
        Ok(if self.output_func_markers { KEEP } else { DROP })
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
    fn keeps_group_in_keep_set_and_drops_others() {
        let mut keep = HashSet::new();
        keep.insert(7u64);
        let mut f = FuncIdFilter::new(keep);
        let mut buf = Vec::new();
        let d = NullDecoder;
        let mut i = info(&mut buf, &d);

        let mut fid_keep = Entry::marker(MarkerKind::FuncId, 7);
        assert_eq!(f.filter(&mut fid_keep, &mut i).unwrap(), KEEP);
        let mut arg = Entry::marker(MarkerKind::FuncArg, 1);
        assert_eq!(f.filter(&mut arg, &mut i).unwrap(), KEEP);
        let mut retval = Entry::marker(MarkerKind::FuncRetval, 0);
        assert_eq!(f.filter(&mut retval, &mut i).unwrap(), KEEP);

        let mut fid_drop = Entry::marker(MarkerKind::FuncId, 8);
        assert_eq!(f.filter(&mut fid_drop, &mut i).unwrap(), DROP);
        let mut arg2 = Entry::marker(MarkerKind::FuncArg, 2);
        assert_eq!(f.filter(&mut arg2, &mut i).unwrap(), DROP);
    }

    #[test]
    fn non_func_markers_pass_through() {
        let mut f = FuncIdFilter::new(HashSet::new());
        let mut buf = Vec::new();
        let d = NullDecoder;
        let mut i = info(&mut buf, &d);
        let mut ts = Entry::marker(MarkerKind::Timestamp, 1);
        assert_eq!(f.filter(&mut ts, &mut i).unwrap(), KEEP);
    }
}
