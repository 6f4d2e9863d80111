//! The filter function interface (C2): the abstract contract every concrete
//! filter implements, plus the collaborator bundle passed to `filter()`.
//!
//! A trait object, not a tagged enum: filters are added over time and
//! compose through dynamic dispatch rather than a closed, exhaustively
//! matched set.

use crate::entry::Entry;
use crate::error::FilterResult;
use crate::filter::regdeps::DecoderContext;

pub mod cache;
pub mod func_id;
pub mod func_id_range;
pub mod invalidate_cpu;
pub mod modify_marker;
pub mod regdeps;
pub mod toggle;
pub mod trim;
pub mod type_filter;

/// Collaborator handles passed to every `filter()` call: the driver's
/// `last_encoding` buffer (shared so a filter can rewrite the encoding
/// sequence that precedes the instruction it is currently looking at) and
/// the decoder context used by the encodings-to-regdeps filter.
pub struct FilterInfo<'a> {
    pub last_encoding: &'a mut Vec<Entry>,
    pub decoder: &'a dyn DecoderContext,
}

/// Outcome of a single filter's `filter()` call.
pub type Keep = bool;
pub const KEEP: Keep = true;
pub const DROP: Keep = false;

/// Per-shard filter contract (C2). Implementors carry their own per-shard
/// state as `&mut self` fields; the driver constructs one instance of each
/// configured filter per shard (filters are not shared across shards).
pub trait FilterFunc: Send {
    /// Called once per shard before any entry is seen. `partial` is true iff
    /// a `stop_timestamp` is configured, so filters can tag FILETYPE as
    /// bimodal without needing to inspect the marker themselves.
    fn init(&mut self, partial: bool) {
        let _ = partial;
    }

    /// Called for every enabled input entry; may mutate `entry` in place.
    /// Returns `KEEP` to let the entry continue through the pipeline, `DROP`
    /// to remove it.
    fn filter(&mut self, entry: &mut Entry, info: &mut FilterInfo) -> FilterResult<Keep>;

    /// Called once at shard-input end.
    fn exit(&mut self) -> FilterResult<()> {
        Ok(())
    }

    /// Called by the driver when rewriting the FILETYPE marker, so filters
    /// that add file-type flags take effect even on shards where they never
    /// see the marker entry itself (e.g. core-sharded shards that start
    /// idle and get a synthesized header).
    fn update_filetype(&self, filetype: u64) -> u64 {
        filetype
    }
}

/// Runs `entry` through the pipeline in order. Multi-filter composition is
/// strict AND: the entry survives iff every filter keeps it. Mutations by
/// one filter are observable to later filters, matching the in-place
/// `inout Entry` contract of §4.2.
pub fn run_pipeline(
    pipeline: &mut [Box<dyn FilterFunc>],
    entry: &mut Entry,
    info: &mut FilterInfo,
) -> FilterResult<Keep> {
    let mut keep = true;
    for f in pipeline.iter_mut() {
        if !f.filter(entry, info)? {
            keep = false;
            // Continue running remaining filters: a dropped entry may still
            // need its mutations observed (e.g. type filter's FILETYPE
            // rewrite must happen whether or not a later filter also wants
            // to touch the same entry). The entry is just not emitted.
        }
    }
    Ok(keep)
}
