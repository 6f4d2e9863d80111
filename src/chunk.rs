//! Chunk manager (§4.5, C5): closes and opens archive components at
//! instruction-count boundaries, synthesizing the CHUNK_FOOTER /
//! RECORD_ORDINAL / TIMESTAMP / CPU_ID bookkeeping entries the shard driver
//! would otherwise have to inline.

use std::collections::HashSet;

use crate::entry::{Entry, EntryKind, MarkerKind};
use crate::error::FilterResult;
use crate::sink::OutputSink;

/// Component name prefix; components are `<prefix><4-digit zero-padded ordinal>`.
pub const TRACE_CHUNK_PREFIX: &str = "chunk.";

/// Returns true if `kind` may legally start a new chunk without splitting an
/// instruction's ENCODING records or a memory access off from its owner.
pub fn is_chunk_boundary(kind: EntryKind) -> bool {
    use crate::entry::is_instr;
    is_instr(kind) || kind == EntryKind::ThreadExit || kind == EntryKind::Footer
}

pub struct ChunkManager {
    chunk_size: u64,
    pub chunk_ordinal: u64,
    pub cur_chunk_instrs: u64,
    pub cur_chunk_pcs: HashSet<u64>,
}

impl ChunkManager {
    pub fn new() -> Self {
        ChunkManager { chunk_size: 0, chunk_ordinal: 0, cur_chunk_instrs: 0, cur_chunk_pcs: HashSet::new() }
    }

    /// Declared once by the first CHUNK_INSTR_COUNT marker seen in a shard's
    /// header; 0 means chunking is disabled (non-archive mode).
    pub fn set_chunk_size(&mut self, size: u64) {
        self.chunk_size = size;
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Whether the shard driver should call `open_new_chunk` before writing
    /// `next_kind`'s entry.
    pub fn should_close(&self, next_kind: EntryKind, next_is_timestamp_marker: bool) -> bool {
        self.chunk_size > 0
            && self.cur_chunk_instrs >= self.chunk_size
            && (is_chunk_boundary(next_kind) || next_is_timestamp_marker)
    }

    /// Closes the current component (if any) with a CHUNK_FOOTER, opens the
    /// next named component, and re-seeds it with RECORD_ORDINAL/TIMESTAMP/
    /// CPU_ID so a reader starting mid-archive still has full context.
    ///
    /// `cur_refs` is the shard's running visible-record count; every entry
    /// written here (the reseed TIMESTAMP carries a ref count of 1) is folded
    /// into it, the same as any other entry the shard driver writes.
    pub fn open_new_chunk(
        &mut self,
        sink: &mut dyn OutputSink,
        cur_refs: &mut u64,
        last_timestamp: u64,
        last_cpu_id: u64,
    ) -> FilterResult<()> {
        if self.chunk_ordinal > 0 {
            let footer = Entry::marker(MarkerKind::ChunkFooter, self.chunk_ordinal - 1);
            write_counted(sink, cur_refs, &footer)?;
        }

        let name = format!("{TRACE_CHUNK_PREFIX}{:04}", self.chunk_ordinal);
        sink.open_new_component(&name)?;

        if self.chunk_ordinal > 0 {
            for e in [
                Entry::marker(MarkerKind::RecordOrdinal, *cur_refs),
                Entry::marker(MarkerKind::Timestamp, last_timestamp),
                Entry::marker(MarkerKind::CpuId, last_cpu_id),
            ] {
                write_counted(sink, cur_refs, &e)?;
            }
            self.cur_chunk_pcs.clear();
        }

        self.chunk_ordinal += 1;
        self.cur_chunk_instrs = 0;
        Ok(())
    }
}

fn write_counted(sink: &mut dyn OutputSink, cur_refs: &mut u64, entry: &Entry) -> FilterResult<()> {
    sink.write_entry(&entry.encode())?;
    *cur_refs += entry.ref_count();
    Ok(())
}

impl Default for ChunkManager {
    fn default() -> Self {
        ChunkManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ArchiveSink;
    use tempfile::tempdir;

    #[test]
    fn first_chunk_has_no_footer_or_reseed() {
        let dir = tempdir().unwrap();
        let mut sink = ArchiveSink::create(&dir.path().join("a.zip")).unwrap();
        let mut mgr = ChunkManager::new();
        let mut cur_refs = 0u64;
        mgr.open_new_chunk(&mut sink, &mut cur_refs, 0, 0).unwrap();
        assert_eq!(mgr.chunk_ordinal, 1);
        assert_eq!(mgr.cur_chunk_instrs, 0);
        assert_eq!(cur_refs, 0, "the first chunk has no footer or reseed markers to count");
    }

    #[test]
    fn second_chunk_emits_footer_and_reseed_markers() {
        let dir = tempdir().unwrap();
        let mut sink = ArchiveSink::create(&dir.path().join("a.zip")).unwrap();
        let mut mgr = ChunkManager::new();
        let mut cur_refs = 0u64;
        mgr.open_new_chunk(&mut sink, &mut cur_refs, 0, 0).unwrap();
        mgr.cur_chunk_pcs.insert(0x10);
        cur_refs = 5;
        mgr.open_new_chunk(&mut sink, &mut cur_refs, 100, 2).unwrap();
        assert_eq!(mgr.chunk_ordinal, 2);
        assert!(mgr.cur_chunk_pcs.is_empty(), "cur_chunk_pcs is cleared on reseed");
        assert_eq!(cur_refs, 6, "the reseed TIMESTAMP carries a ref count of 1");
    }

    #[test]
    fn should_close_requires_boundary_kind() {
        let mut mgr = ChunkManager::new();
        mgr.set_chunk_size(10);
        mgr.cur_chunk_instrs = 10;
        assert!(mgr.should_close(EntryKind::Instr, false));
        assert!(!mgr.should_close(EntryKind::Read, false));
        assert!(mgr.should_close(EntryKind::Footer, false));
    }

    #[test]
    fn should_close_respects_instr_count_threshold() {
        let mut mgr = ChunkManager::new();
        mgr.set_chunk_size(10);
        mgr.cur_chunk_instrs = 9;
        assert!(!mgr.should_close(EntryKind::Instr, false));
    }

    #[test]
    fn chunking_disabled_when_size_is_zero() {
        let mgr = ChunkManager::new();
        assert!(!mgr.should_close(EntryKind::Instr, false));
    }
}
