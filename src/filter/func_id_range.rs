//! Func-id-marker-range filter (§9b, C12): like `func_id` but keeps a range
//! of function IDs (`low..=high`) instead of an explicit set — useful for
//! tracing call-graph windows without enumerating every ID. Shares its
//! state machine (the `output_func_markers` flag) almost exactly with
//! `func_id::FuncIdFilter`.

use crate::entry::{Entry, MarkerKind};
use crate::error::FilterResult;
use crate::filter::{FilterFunc, FilterInfo, Keep, DROP, KEEP};

pub struct FuncIdRangeFilter {
    low: u64,
    high: u64,
    output_func_markers: bool,
}

impl FuncIdRangeFilter {
    pub fn new(low: u64, high: u64) -> Self {
        FuncIdRangeFilter { low, high, output_func_markers: false }
    }

    fn in_range(&self, id: u64) -> bool {
        id >= self.low && id <= self.high
    }
}

fn is_func_marker(mk: MarkerKind) -> bool {
    matches!(mk, MarkerKind::FuncId | MarkerKind::FuncArg | MarkerKind::FuncRetval | MarkerKind::FuncRetaddr)
}

impl FilterFunc for FuncIdRangeFilter {
    fn filter(&mut self, entry: &mut Entry, _info: &mut FilterInfo) -> FilterResult<Keep> {
        let Some(mk) = entry.marker_kind() else { return Ok(KEEP) };
        if !is_func_marker(mk) {
            return Ok(KEEP);
        }
        if mk == MarkerKind::FuncId {
            self.output_func_markers = self.in_range(entry.addr);
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
    fn keeps_function_groups_within_range() {
        let mut f = FuncIdRangeFilter::new(10, 20);
        let mut buf = Vec::new();
        let d = NullDecoder;
        let mut i = info(&mut buf, &d);

        let mut in_range = Entry::marker(MarkerKind::FuncId, 15);
        assert_eq!(f.filter(&mut in_range, &mut i).unwrap(), KEEP);
        let mut arg = Entry::marker(MarkerKind::FuncArg, 1);
        assert_eq!(f.filter(&mut arg, &mut i).unwrap(), KEEP);

        let mut out_of_range = Entry::marker(MarkerKind::FuncId, 99);
        assert_eq!(f.filter(&mut out_of_range, &mut i).unwrap(), DROP);
        let mut arg2 = Entry::marker(MarkerKind::FuncArg, 2);
        assert_eq!(f.filter(&mut arg2, &mut i).unwrap(), DROP);
    }
}
