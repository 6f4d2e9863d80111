//! Trim filter (§4.3.3): removes a shard's entries outside a configured
//! timestamp range (mode A) or instruction-ordinal range (mode B).

use crate::entry::{is_instr, Entry, EntryKind, MarkerKind};
use crate::error::{FilterError, FilterResult};
use crate::filter::{FilterFunc, FilterInfo, Keep, DROP, KEEP};

pub enum TrimFilter {
    Timestamp {
        before: u64,
        after: u64,
        in_removed: bool,
        window_id: Option<u64>,
    },
    Instr {
        before: u64,
        after: u64,
        ordinal: u64,
    },
}

impl TrimFilter {
    pub fn new_timestamp(before: u64, after: u64) -> FilterResult<Self> {
        if after <= before {
            return Err(FilterError::configuration(
                "trim_after_timestamp must be greater than trim_before_timestamp",
            ));
        }
        Ok(TrimFilter::Timestamp { before, after, in_removed: false, window_id: None })
    }

    pub fn new_instr(before: u64, after: u64) -> FilterResult<Self> {
        if after <= before {
            return Err(FilterError::configuration(
                "trim_after_instr must be greater than trim_before_instr",
            ));
        }
        Ok(TrimFilter::Instr { before, after, ordinal: 0 })
    }
}

fn always_kept(kind: EntryKind) -> bool {
    matches!(kind, EntryKind::ThreadExit | EntryKind::Footer)
}

impl FilterFunc for TrimFilter {
    fn filter(&mut self, entry: &mut Entry, _info: &mut FilterInfo) -> FilterResult<Keep> {
        if always_kept(entry.kind) {
            return Ok(KEEP);
        }
        match self {
            TrimFilter::Timestamp { before, after, in_removed, window_id } => {
                if entry.marker_kind() == Some(MarkerKind::Timestamp) {
                    *in_removed = entry.addr < *before || entry.addr > *after;
                }
                if entry.marker_kind() == Some(MarkerKind::WindowId) {
                    match window_id {
                        None => {
                            *window_id = Some(entry.addr);
                            return Ok(KEEP);
                        }
                        Some(prev) if *prev != entry.addr => {
                            return Err(FilterError::grammar(format!(
                                "Trimming a trace with multiple windows is not supported. Previous window_id = {prev}, current window_id = {}",
                                entry.addr
                            )));
                        }
                        Some(_) => {}
                    }
                }
                Ok(!*in_removed)
            }
            TrimFilter::Instr { before, after, ordinal } => {
                let keep = *ordinal >= *before && *ordinal < *after;
                if is_instr(entry.kind) {
                    *ordinal += 1;
                }
                Ok(keep)
            }
        }
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
    fn rejects_inverted_range() {
        assert!(TrimFilter::new_timestamp(100, 100).is_err());
        assert!(TrimFilter::new_timestamp(100, 50).is_err());
        assert!(TrimFilter::new_instr(10, 10).is_err());
    }

    #[test]
    fn timestamp_mode_keeps_inside_window_only() {
        let mut f = TrimFilter::new_timestamp(50, 150).unwrap();
        let mut buf = Vec::new();
        let d = NullDecoder;
        let mut i = info(&mut buf, &d);
        let mut before = Entry::marker(MarkerKind::Timestamp, 10);
        assert_eq!(f.filter(&mut before, &mut i).unwrap(), DROP);
        let mut in_range = Entry::marker(MarkerKind::Timestamp, 100);
        assert_eq!(f.filter(&mut in_range, &mut i).unwrap(), KEEP);
        let mut read = Entry::new(EntryKind::Read, 8, 0x10);
        assert_eq!(f.filter(&mut read, &mut i).unwrap(), KEEP);
        let mut after = Entry::marker(MarkerKind::Timestamp, 200);
        assert_eq!(f.filter(&mut after, &mut i).unwrap(), DROP);
        let mut dropped_read = Entry::new(EntryKind::Read, 8, 0x10);
        assert_eq!(f.filter(&mut dropped_read, &mut i).unwrap(), DROP);
    }

    #[test]
    fn first_window_id_always_kept_even_if_removed() {
        let mut f = TrimFilter::new_timestamp(50, 150).unwrap();
        let mut buf = Vec::new();
        let d = NullDecoder;
        let mut i = info(&mut buf, &d);
        let mut ts = Entry::marker(MarkerKind::Timestamp, 10);
        f.filter(&mut ts, &mut i).unwrap();
        let mut window = Entry::marker(MarkerKind::WindowId, 0);
        assert_eq!(f.filter(&mut window, &mut i).unwrap(), KEEP);
    }

    #[test]
    fn second_distinct_window_id_is_an_error() {
        let mut f = TrimFilter::new_timestamp(50, 150).unwrap();
        let mut buf = Vec::new();
        let d = NullDecoder;
        let mut i = info(&mut buf, &d);
        let mut w0 = Entry::marker(MarkerKind::WindowId, 0);
        f.filter(&mut w0, &mut i).unwrap();
        let mut w1 = Entry::marker(MarkerKind::WindowId, 1);
        let err = f.filter(&mut w1, &mut i).unwrap_err();
        assert_eq!(
            err.to_string(),
            "grammar: Trimming a trace with multiple windows is not supported. Previous window_id = 0, current window_id = 1"
        );
    }

    #[test]
    fn instr_mode_tracks_ordinal() {
        let mut f = TrimFilter::new_instr(1, 3).unwrap();
        let mut buf = Vec::new();
        let d = NullDecoder;
        let mut i = info(&mut buf, &d);
        let mut i0 = Entry::new(EntryKind::Instr, 4, 0x100);
        assert_eq!(f.filter(&mut i0, &mut i).unwrap(), DROP); // ordinal 0
        let mut i1 = Entry::new(EntryKind::Instr, 4, 0x104);
        assert_eq!(f.filter(&mut i1, &mut i).unwrap(), KEEP); // ordinal 1
        let mut i2 = Entry::new(EntryKind::Instr, 4, 0x108);
        assert_eq!(f.filter(&mut i2, &mut i).unwrap(), KEEP); // ordinal 2
        let mut i3 = Entry::new(EntryKind::Instr, 4, 0x10c);
        assert_eq!(f.filter(&mut i3, &mut i).unwrap(), DROP); // ordinal 3, >= after
    }

    #[test]
    fn thread_exit_and_footer_always_kept() {
        let mut f = TrimFilter::new_instr(5, 10).unwrap();
        let mut buf = Vec::new();
        let d = NullDecoder;
        let mut i = info(&mut buf, &d);
        let mut exit = Entry::new(EntryKind::ThreadExit, 0, 0);
        assert_eq!(f.filter(&mut exit, &mut i).unwrap(), KEEP);
        let mut footer = Entry::new(EntryKind::Footer, 0, 0);
        assert_eq!(f.filter(&mut footer, &mut i).unwrap(), KEEP);
    }
}
