//! Shard driver (§4.4, C4): the per-entry algorithm a single shard's worker
//! runs from its input stream to its output sink, plus the synthetic-header,
//! missing-footer, and empty-shard bookkeeping that bracket it.

use std::collections::HashMap;
use std::io;

use crate::chunk::ChunkManager;
use crate::coordinator::{Coordinator, Negotiated, WorkloadGuard};
use crate::entry::{filetype, Entry, EntryKind, MarkerKind};
use crate::error::{FilterError, FilterResult};
use crate::filter::regdeps::DecoderContext;
use crate::filter::{run_pipeline, FilterFunc, FilterInfo};
use crate::schedule::{ScheduleEntry, ScheduleRecorder};
use crate::sink::OutputSink;

/// IDLE_THREAD_ID / INVALID_PID sentinels used by the synthetic header on a
/// shard that starts with no real content yet (core-sharded only).
pub const IDLE_THREAD_ID: u64 = 0;
pub const INVALID_PID: u64 = u64::MAX;
const INVALID_TIMESTAMP: u64 = u64::MAX;
const INVALID_CPU: u64 = u64::MAX;

/// A shard's input stream. Real shards read a file; idle core-sharded
/// shards and tests use the in-memory variants below.
pub trait ShardInput: Send {
    fn name(&self) -> &str;
    /// -1 if this shard has no real input of its own (an idle core-sharded
    /// shard waiting for work that never arrived).
    fn input_id(&self) -> i64;
    /// -1 if the input carries no workload grouping.
    fn workload_id(&self) -> i64;
    fn next(&mut self) -> io::Result<Option<Entry>>;
}

/// An input stream backed by an in-memory entry list — used by the
/// synthetic-trace test generator and by small unit/integration tests.
pub struct VecShardInput {
    name: String,
    input_id: i64,
    workload_id: i64,
    entries: std::vec::IntoIter<Entry>,
}

impl VecShardInput {
    pub fn new(name: impl Into<String>, input_id: i64, workload_id: i64, entries: Vec<Entry>) -> Self {
        VecShardInput { name: name.into(), input_id, workload_id, entries: entries.into_iter() }
    }
}

impl ShardInput for VecShardInput {
    fn name(&self) -> &str {
        &self.name
    }
    fn input_id(&self) -> i64 {
        self.input_id
    }
    fn workload_id(&self) -> i64 {
        self.workload_id
    }
    fn next(&mut self) -> io::Result<Option<Entry>> {
        Ok(self.entries.next())
    }
}

/// An input-less shard: a core-sharded worker assigned a core that never ran
/// anything. Immediately reports end of stream.
pub struct NoInput;

impl ShardInput for NoInput {
    fn name(&self) -> &str {
        ""
    }
    fn input_id(&self) -> i64 {
        -1
    }
    fn workload_id(&self) -> i64 {
        -1
    }
    fn next(&mut self) -> io::Result<Option<Entry>> {
        Ok(None)
    }
}

/// Mode- and configuration-level knobs the driver needs per shard that are
/// not part of the filter pipeline itself.
pub struct ShardOptions {
    pub archive_mode: bool,
    pub core_sharded: bool,
    pub stop_timestamp: u64,
}

pub struct ShardResult {
    /// True when the shard produced no ENCODINGS and no instructions and is
    /// not core-sharded — its output file should be deleted on finalize.
    pub now_empty: bool,
}

fn extension_of(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) => &name[i + 1..],
        None => "",
    }
}

struct ShardState {
    enabled: bool,
    last_encoding: Vec<Entry>,
    delayed_encodings: HashMap<u64, Vec<Entry>>,
    chunk: ChunkManager,
    filetype: u64,
    last_timestamp: u64,
    last_cpu_id: u64,
    current_tid: u64,
    cur_refs: u64,
    prev_was_output: bool,
    last_written_kind: Option<EntryKind>,
    saw_instr: bool,
    saw_encodings: bool,
    total_instrs: u64,
    after_record_ordinal: u8,
    version_seen: Option<u64>,
}

impl ShardState {
    fn new() -> Self {
        ShardState {
            enabled: true,
            last_encoding: Vec::new(),
            delayed_encodings: HashMap::new(),
            chunk: ChunkManager::new(),
            filetype: 0,
            last_timestamp: 0,
            last_cpu_id: 0,
            current_tid: 0,
            cur_refs: 0,
            prev_was_output: false,
            last_written_kind: None,
            saw_instr: false,
            saw_encodings: false,
            total_instrs: 0,
            after_record_ordinal: 0,
            version_seen: None,
        }
    }
}

fn add_to_filetype(base: u64, pipeline: &[Box<dyn FilterFunc>], partial: bool, core_sharded: bool) -> u64 {
    let mut ft = base;
    if partial {
        ft |= filetype::BIMODAL_FILTERED_WARMUP;
    }
    if core_sharded {
        ft |= filetype::CORE_SHARDED;
    }
    for f in pipeline {
        ft = f.update_filetype(ft);
    }
    ft
}

/// Runs one shard to completion: reads `input` to exhaustion, pushes every
/// surviving/mutated entry through `sink`, and returns whether the shard
/// ended up empty.
#[allow(clippy::too_many_arguments)]
pub fn run_shard(
    input: &mut dyn ShardInput,
    pipeline: &mut [Box<dyn FilterFunc>],
    decoder: &dyn DecoderContext,
    coordinator: &Coordinator,
    schedule: &ScheduleRecorder,
    sink: &mut dyn OutputSink,
    opts: &ShardOptions,
) -> FilterResult<ShardResult> {
    let partial = opts.stop_timestamp != 0;
    for f in pipeline.iter_mut() {
        f.init(partial);
    }

    let mut st = ShardState::new();
    let mut workload_guard = WorkloadGuard::new();
    let mut negotiated: Option<Negotiated> = None;

    if opts.archive_mode {
        // Opens the first archive component so the sink is writable before
        // the synthetic header or any real entry lands on it. Owned here
        // (not by the caller) so `st.chunk`'s ordinal stays in lockstep with
        // every later mid-shard open_new_chunk call at a real chunk
        // boundary (§4.5).
        st.chunk.open_new_chunk(sink, &mut st.cur_refs, 0, 0)?;
    }

    if input.input_id() < 0 {
        // Idle shard: nothing to read, but it must still produce a
        // synthetic header using whatever another shard negotiates.
        negotiated = Some(coordinator.wait_for_negotiation());
    }

    let mut input_state =
        if input.input_id() >= 0 { Some(coordinator.input_state(input.input_id())) } else { None };
    let mut prev_input_id = input.input_id();

    let mut emitted_first = false;

    loop {
        let mut entry = match input.next().map_err(|e| FilterError::stream(e.to_string()))? {
            Some(e) => e,
            None => break,
        };

        // Step 2: core-sharded input switches re-point the cached per-input
        // state (§4.4, §4.6). Must land on an instruction boundary — a
        // pending `last_encoding` means an ENCODING run was cut off mid-way.
        if opts.core_sharded {
            let id = input.input_id();
            if id != prev_input_id {
                if !st.last_encoding.is_empty() {
                    return Err(FilterError::grammar(
                        "input switch mid-shard occurred between an ENCODING run and its instruction",
                    ));
                }
                input_state = if id >= 0 { Some(coordinator.input_state(id)) } else { None };
                prev_input_id = id;
            }
        }

        workload_guard.observe(input.workload_id())?;

        // Step 3: bimodal warmup stop-timestamp check, using the shard's
        // own last-observed timestamp (state prior to this entry).
        if st.enabled && opts.stop_timestamp != 0 && st.last_timestamp >= opts.stop_timestamp {
            let mut endpoint = Entry::marker(MarkerKind::FilterEndpoint, 0);
            write_out(sink, &mut st, &mut endpoint, schedule)?;
            st.enabled = false;
        }

        // Step 4: run the pipeline (skipped once disabled for the rest of
        // the shard).
        let mut output = if st.enabled {
            let mut info = FilterInfo { last_encoding: &mut st.last_encoding, decoder };
            run_pipeline(pipeline, &mut entry, &mut info)?
        } else {
            true
        };

        // Step 5: archive-mode chunk boundary.
        if opts.archive_mode {
            let is_timestamp_marker = entry.marker_kind() == Some(MarkerKind::Timestamp);
            if st.chunk.should_close(entry.kind, is_timestamp_marker) {
                st.chunk.open_new_chunk(sink, &mut st.cur_refs, st.last_timestamp, st.last_cpu_id)?;
            }
        }

        // Step 6: process_markers.
        process_markers(&mut st, &mut entry, &mut output, coordinator, pipeline, input.name(), partial, opts.core_sharded, &mut negotiated)?;

        // Step 7: process_chunk_encodings (archive mode only).
        if opts.archive_mode {
            process_chunk_encodings(&mut st, &entry, output, input_state.as_deref(), sink, schedule)?;
        }

        // Step 8.
        if output && crate::entry::is_instr(entry.kind) && entry.size > 0 {
            st.chunk.cur_chunk_instrs += 1;
            st.total_instrs += 1;
            st.saw_instr = true;
        }

        // Step 9: process_delayed_encodings (instruction entries only).
        if crate::entry::is_instr(entry.kind) {
            process_delayed_encodings(&mut st, &entry, output, sink, schedule)?;
        }

        // Step 10.
        let this_was_output = output;

        // Step 11.
        if entry.kind == EntryKind::Encoding {
            st.last_encoding.push(entry);
            output = false;
        } else if crate::entry::is_instr(entry.kind) {
            st.last_encoding.clear();
        }

        st.prev_was_output = this_was_output;

        if output {
            if !emitted_first {
                if entry.kind != EntryKind::Header {
                    synthesize_header(sink, &mut st, schedule, &negotiated)?;
                }
                emitted_first = true;
            }
            write_out(sink, &mut st, &mut entry, schedule)?;
        }
    }

    if !emitted_first {
        synthesize_header(sink, &mut st, schedule, &negotiated)?;
    }

    if st.last_written_kind != Some(EntryKind::Footer) {
        let mut footer = Entry::new(EntryKind::Footer, 0, 0);
        write_out(sink, &mut st, &mut footer, schedule)?;
    }

    for f in pipeline.iter_mut() {
        f.exit()?;
    }
    sink.finish()?;

    let now_empty = !opts.core_sharded && !st.saw_encodings && !st.saw_instr;
    Ok(ShardResult { now_empty })
}

/// Writes `entry` to `sink` and folds it into every bit of bookkeeping a
/// written record affects: the shard's visible-record count (`cur_refs`,
/// mirroring the upstream `write_trace_entry`'s `cur_refs += ref_count`), the
/// current tid/cpu schedule, and `last_written_kind`. Every call site that
/// hands an entry to `sink` goes through here so `cur_refs` never drifts from
/// what actually landed in the output.
fn write_out(
    sink: &mut dyn OutputSink,
    st: &mut ShardState,
    entry: &mut Entry,
    schedule: &ScheduleRecorder,
) -> FilterResult<()> {
    if entry.kind == EntryKind::Thread {
        st.current_tid = entry.addr;
    }
    if entry.marker_kind() == Some(MarkerKind::CpuId) {
        schedule.record(ScheduleEntry {
            tid: st.current_tid,
            cpu: entry.addr,
            timestamp: st.last_timestamp,
            instr_ordinal: st.total_instrs,
        });
    }
    sink.write_entry(&entry.encode())?;
    st.cur_refs += entry.ref_count();
    st.last_written_kind = Some(entry.kind);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn process_markers(
    st: &mut ShardState,
    e: &mut Entry,
    output: &mut bool,
    coordinator: &Coordinator,
    pipeline: &[Box<dyn FilterFunc>],
    stream_name: &str,
    partial: bool,
    core_sharded: bool,
    negotiated: &mut Option<Negotiated>,
) -> FilterResult<()> {
    let Some(mk) = e.marker_kind() else { return Ok(()) };
    match mk {
        MarkerKind::ChunkInstrCount => {
            st.chunk.set_chunk_size(e.addr);
        }
        MarkerKind::Filetype => {
            let rewritten = add_to_filetype(e.addr, pipeline, partial, core_sharded);
            e.addr = rewritten;
            st.filetype = rewritten;
            if e.addr & filetype::ENCODINGS != 0 {
                st.saw_encodings = true;
            }
            let version = st.version_seen.unwrap_or(1);
            let got = coordinator.negotiate(extension_of(stream_name), version, rewritten)?;
            *negotiated = Some(got);
        }
        MarkerKind::Version => {
            st.version_seen = Some(e.addr);
        }
        MarkerKind::ChunkFooter => {
            *output = false;
        }
        MarkerKind::RecordOrdinal => {
            *output = false;
            st.after_record_ordinal = 2;
        }
        MarkerKind::Timestamp => {
            if *output {
                st.last_timestamp = e.addr;
            }
            if st.after_record_ordinal == 2 {
                *output = false;
                st.after_record_ordinal = 1;
            } else if st.after_record_ordinal == 1 {
                st.after_record_ordinal = 0;
            }
        }
        MarkerKind::CpuId => {
            if *output {
                st.last_cpu_id = e.addr;
            }
            if st.after_record_ordinal == 1 {
                *output = false;
                st.after_record_ordinal = 0;
            }
        }
        MarkerKind::PhysicalAddress | MarkerKind::PhysicalAddressNotAvailable => {
            if !*output {
                return Err(FilterError::grammar("dropping physical-address markers is not yet supported"));
            }
        }
        MarkerKind::CoreWait => {
            *output = false;
        }
        _ => {}
    }
    Ok(())
}

fn process_chunk_encodings(
    st: &mut ShardState,
    e: &Entry,
    output: bool,
    input_state: Option<&crate::coordinator::InputState>,
    sink: &mut dyn OutputSink,
    schedule: &ScheduleRecorder,
) -> FilterResult<()> {
    if !crate::entry::is_instr(e.kind) {
        return Ok(());
    }
    let Some(istate) = input_state else { return Ok(()) };

    if !st.last_encoding.is_empty() {
        let mut map = istate.pc2encoding.lock().unwrap();
        map.insert(e.addr, st.last_encoding.clone());
        drop(map);
        if st.chunk.cur_chunk_pcs.contains(&e.addr) {
            st.last_encoding.clear();
        }
    } else if output && !st.chunk.cur_chunk_pcs.contains(&e.addr) && st.filetype & filetype::ENCODINGS != 0 {
        let map = istate.pc2encoding.lock().unwrap();
        let stored = map.get(&e.addr).cloned();
        drop(map);
        let stored = stored
            .ok_or_else(|| FilterError::grammar(format!("no cached encoding for pc 0x{:x} at chunk boundary", e.addr)))?;
        let total: usize = stored.iter().map(|r| r.encoding_payload().len()).sum();
        if st.filetype & filetype::ARCH_REGDEPS == 0 && total != e.size as usize {
            return Err(FilterError::grammar(format!(
                "cached encoding size {total} does not match instruction size {}",
                e.size
            )));
        }
        for mut enc in stored {
            write_out(sink, st, &mut enc, schedule)?;
        }
        st.delayed_encodings.remove(&e.addr);
    }

    if output {
        st.chunk.cur_chunk_pcs.insert(e.addr);
    }
    Ok(())
}

fn process_delayed_encodings(
    st: &mut ShardState,
    e: &Entry,
    output: bool,
    sink: &mut dyn OutputSink,
    schedule: &ScheduleRecorder,
) -> FilterResult<()> {
    if !output {
        if !st.last_encoding.is_empty() {
            st.delayed_encodings.insert(e.addr, st.last_encoding.clone());
        }
        return Ok(());
    }

    if st.filetype & filetype::ENCODINGS != 0 && !st.last_encoding.is_empty() && st.prev_was_output {
        for mut enc in st.last_encoding.clone() {
            write_out(sink, st, &mut enc, schedule)?;
        }
        st.delayed_encodings.remove(&e.addr);
    } else if st.filetype & filetype::ENCODINGS != 0 {
        if let Some(delayed) = st.delayed_encodings.remove(&e.addr) {
            for mut enc in delayed {
                write_out(sink, st, &mut enc, schedule)?;
            }
        }
    }
    Ok(())
}

fn synthesize_header(
    sink: &mut dyn OutputSink,
    st: &mut ShardState,
    schedule: &ScheduleRecorder,
    negotiated: &Option<Negotiated>,
) -> FilterResult<()> {
    let neg = negotiated.clone().unwrap_or(Negotiated { extension: String::new(), version: 1, filetype: 0 });

    let mut entries = vec![
        Entry::new(EntryKind::Header, 0, 0),
        Entry::marker(MarkerKind::Version, neg.version),
        Entry::marker(MarkerKind::Filetype, neg.filetype),
        Entry::new(EntryKind::Thread, 0, IDLE_THREAD_ID),
        Entry::new(EntryKind::Pid, 0, INVALID_PID),
        Entry::marker(MarkerKind::Timestamp, INVALID_TIMESTAMP),
        Entry::marker(MarkerKind::CpuId, INVALID_CPU),
    ];
    for e in entries.iter_mut() {
        write_out(sink, st, e, schedule)?;
    }
    Ok(())
}
