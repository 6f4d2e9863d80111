//! Toggle filter (§9b, C12): drops every entry while "disabled", flipping
//! enabled/disabled whenever a configured marker sub-type/value pair is
//! seen. The trim filter's simpler cousin — its drop decision depends on a
//! running boolean rather than a static keep-set or timestamp range.

use crate::entry::Entry;
use crate::error::FilterResult;
use crate::filter::{FilterFunc, FilterInfo, Keep, DROP, KEEP};

pub struct ToggleFilter {
    toggle_marker: u16,
    toggle_value: u64,
    enabled: bool,
}

impl ToggleFilter {
    /// Starts enabled; flips on every occurrence of `(toggle_marker,
    /// toggle_value)`.
    pub fn new(toggle_marker: u16, toggle_value: u64) -> Self {
        ToggleFilter { toggle_marker, toggle_value, enabled: true }
    }
}

impl FilterFunc for ToggleFilter {
    fn filter(&mut self, entry: &mut Entry, _info: &mut FilterInfo) -> FilterResult<Keep> {
        if let Some(_mk) = entry.marker_kind() {
            if entry.size == self.toggle_marker && entry.addr == self.toggle_value {
                self.enabled = !self.enabled;
                return Ok(KEEP);
            }
        }
        Ok(if self.enabled { KEEP } else { DROP })
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
    fn toggles_on_configured_marker_transition() {
        let mut f = ToggleFilter::new(MarkerKind::WindowId as u16, 1);
        let mut buf = Vec::new();
        let d = NullDecoder;
        let mut i = info(&mut buf, &d);

        let mut before = Entry::new(EntryKind::Read, 8, 0x10);
        assert_eq!(f.filter(&mut before, &mut i).unwrap(), KEEP);

        let mut toggle = Entry::marker(MarkerKind::WindowId, 1);
        assert_eq!(f.filter(&mut toggle, &mut i).unwrap(), KEEP);

        let mut after = Entry::new(EntryKind::Read, 8, 0x10);
        assert_eq!(f.filter(&mut after, &mut i).unwrap(), DROP, "disabled after the toggle marker");

        f.filter(&mut toggle, &mut i).unwrap();
        let mut again = Entry::new(EntryKind::Read, 8, 0x10);
        assert_eq!(f.filter(&mut again, &mut i).unwrap(), KEEP, "re-enabled after second toggle");
    }
}
