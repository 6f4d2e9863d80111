//! Shard orchestration (C4/C5/C6/C7 wired together, §5b): discovers one
//! shard per input file, runs each through [`crate::shard::run_shard`] on a
//! bounded worker pool, and finalizes (empty-shard deletion, schedule-file
//! emission).
//!
//! Discovers inputs, builds one job per input, submits to a `TPool`, blocks
//! on `jobs_completed()`, then runs a single-threaded finalize pass.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::{FilterConfig, ShardBy};
use crate::coordinator::Coordinator;
use crate::entry::Entry;
use crate::error::{FilterError, FilterResult};
use crate::filter::cache::CacheFilter;
use crate::filter::func_id::FuncIdFilter;
use crate::filter::modify_marker::ModifyMarkerValueFilter;
use crate::filter::regdeps::{NullDecoder, RegdepsFilter};
use crate::filter::trim::TrimFilter;
use crate::filter::type_filter::TypeFilter;
use crate::filter::FilterFunc;
use crate::schedule::ScheduleRecorder;
use crate::shard::{run_shard, ShardInput, ShardOptions};
use crate::sink::{self, OutputSink};
use crate::threadpool::TPool;
use crate::util::file_list::create_file_list;

/// Serial schedule file name (§4.7): one line per recorded
/// (tid, cpu, timestamp, instr_ordinal) tuple in timestamp order.
pub const SERIAL_FILENAME: &str = "drmemtrace.schedule.serial";
/// Per-CPU schedule archive, one component per CPU; only written for
/// core-sharded (archive-mode) runs.
pub const CPU_FILENAME: &str = "drmemtrace.schedule.cpu.zip";

/// One shard's input: a sequential reader over an on-disk trace file.
/// `input_id` is the file's position in discovery order; `workload_id` is
/// always -1 since this crate has no notion of workload grouping among
/// on-disk files (§1's "multiple concurrent workloads" is out of scope).
pub struct FileShardInput {
    name: String,
    input_id: i64,
    reader: BufReader<File>,
}

impl FileShardInput {
    pub fn open(path: &Path, input_id: i64) -> FilterResult<Self> {
        let file = File::open(path).map_err(|e| FilterError::stream(format!("{}: {e}", path.display())))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(FileShardInput { name, input_id, reader: BufReader::new(file) })
    }
}

impl ShardInput for FileShardInput {
    fn name(&self) -> &str {
        &self.name
    }
    fn input_id(&self) -> i64 {
        self.input_id
    }
    fn workload_id(&self) -> i64 {
        -1
    }
    fn next(&mut self) -> std::io::Result<Option<Entry>> {
        Entry::read_from(&mut self.reader)
    }
}

/// Builds the filter pipeline from a validated [`FilterConfig`], in the
/// fixed order of §4.3: cache, type, trim, encodings-to-regdeps, func-id,
/// modify-marker-value. A filter is included only when its config knob is
/// set; an all-default config produces an empty (pass-through) pipeline.
pub fn build_pipeline(cfg: &FilterConfig) -> FilterResult<Vec<Box<dyn FilterFunc>>> {
    let mut pipeline: Vec<Box<dyn FilterFunc>> = Vec::new();

    if cfg.cache_filter_size > 0 {
        pipeline.push(Box::new(CacheFilter::new(cfg.cache_filter_size, 64, 1, true, false)?));
    }
    if !cfg.remove_trace_types.is_empty() || !cfg.remove_marker_types.is_empty() {
        let trace_types: HashSet<u16> = cfg.remove_trace_types.iter().copied().collect();
        let marker_types: HashSet<u16> = cfg.remove_marker_types.iter().copied().collect();
        pipeline.push(Box::new(TypeFilter::new(trace_types, marker_types)));
    }
    if let Some(t) = cfg.trim_timestamp() {
        pipeline.push(Box::new(TrimFilter::new_timestamp(t.before, t.after)?));
    }
    if let Some(t) = cfg.trim_instr() {
        pipeline.push(Box::new(TrimFilter::new_instr(t.before, t.after)?));
    }
    if cfg.encodings2regdeps {
        pipeline.push(Box::new(RegdepsFilter::new()));
    }
    if !cfg.keep_func_ids.is_empty() {
        let keep: HashSet<u64> = cfg.keep_func_ids.iter().copied().collect();
        pipeline.push(Box::new(FuncIdFilter::new(keep)));
    }
    if !cfg.modify_marker_value.is_empty() {
        pipeline.push(Box::new(ModifyMarkerValueFilter::new(&cfg.modify_marker_value)?));
    }

    Ok(pipeline)
}

fn extension_of(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) => &name[i + 1..],
        None => "",
    }
}

/// Output path for shard `index` reading `stream_name`, per §4.7.
fn output_path_for(cfg: &FilterConfig, index: usize, stream_name: &str, ext: &str) -> PathBuf {
    match cfg.shard_by {
        ShardBy::Thread => cfg.output_dir.join(stream_name),
        ShardBy::Core => {
            let suffix = if ext.is_empty() { String::new() } else { format!(".{ext}") };
            cfg.output_dir.join(format!("drmemtrace.core.{index:06}.trace{suffix}"))
        }
    }
}

struct ShardOutcome {
    path: PathBuf,
    now_empty: bool,
}

/// Discovers one input file per shard under `trace_dir`, runs every shard's
/// filter pipeline on a bounded worker pool, and finalizes: deletes
/// now-empty shard outputs and emits the serial/per-CPU schedule files.
/// `cfg` must already have passed [`FilterConfig::validate`].
pub fn run(cfg: &FilterConfig, trace_dir: &Path) -> FilterResult<()> {
    cfg.validate()?;
    fs::create_dir_all(&cfg.output_dir).map_err(|e| FilterError::stream(e.to_string()))?;

    let inputs = create_file_list(&[trace_dir]).map_err(|e| FilterError::stream(e.to_string()))?;
    if inputs.is_empty() {
        return Err(FilterError::configuration(format!("no trace files found under {}", trace_dir.display())));
    }
    crate::displaylevel!(2, "discovered {} shard input(s) under {}", inputs.len(), trace_dir.display());

    let jobs = if cfg.jobs > 0 { cfg.jobs } else { crate::util::workers::default_worker_count() };
    let pool = TPool::new(jobs, inputs.len().max(1)).ok_or_else(|| {
        FilterError::configuration(format!("could not start a worker pool with {jobs} threads"))
    })?;

    let coordinator = Coordinator::new();
    let schedule = ScheduleRecorder::new();
    let archive_mode = cfg.shard_by == ShardBy::Core;
    let core_sharded = cfg.shard_by == ShardBy::Core;
    let stop_timestamp = cfg.stop_timestamp;

    let outcomes: Mutex<Vec<FilterResult<ShardOutcome>>> = Mutex::new(Vec::with_capacity(inputs.len()));

    for (index, path) in inputs.into_iter().enumerate() {
        let coordinator = &coordinator;
        let schedule = &schedule;
        let outcomes = &outcomes;
        let cfg_cache_size = cfg.cache_filter_size;
        let cfg_remove_trace = cfg.remove_trace_types.clone();
        let cfg_remove_marker = cfg.remove_marker_types.clone();
        let cfg_trim_ts = cfg.trim_timestamp();
        let cfg_trim_instr = cfg.trim_instr();
        let cfg_enc2regdeps = cfg.encodings2regdeps;
        let cfg_keep_func_ids = cfg.keep_func_ids.clone();
        let cfg_modify_marker = cfg.modify_marker_value.clone();
        let output_dir = cfg.output_dir.clone();
        let shard_by = cfg.shard_by;

        pool.submit_job(Box::new(move || {
            let result = (|| -> FilterResult<ShardOutcome> {
                let shard_cfg = FilterConfig {
                    output_dir,
                    stop_timestamp,
                    cache_filter_size: cfg_cache_size,
                    remove_trace_types: cfg_remove_trace,
                    remove_marker_types: cfg_remove_marker,
                    encodings2regdeps: cfg_enc2regdeps,
                    keep_func_ids: cfg_keep_func_ids,
                    modify_marker_value: cfg_modify_marker,
                    shard_by,
                    jobs,
                    ..FilterConfig::default()
                };
                let mut shard_cfg = shard_cfg;
                if let Some(t) = cfg_trim_ts {
                    shard_cfg.set_trim_timestamp(t.before, t.after)?;
                }
                if let Some(t) = cfg_trim_instr {
                    shard_cfg.set_trim_instr(t.before, t.after)?;
                }

                let mut pipeline = build_pipeline(&shard_cfg)?;
                let mut input = FileShardInput::open(&path, index as i64)?;
                let decoder = NullDecoder;
                let opts = ShardOptions { archive_mode, core_sharded, stop_timestamp };

                let stream_name = input.name().to_string();
                // The extension picked here mirrors whatever the coordinator
                // ultimately negotiates (every shard proposes the same
                // archive/plain choice from its own config, so the first
                // negotiation always matches what this shard expected).
                let proposed_ext = if archive_mode { "zip" } else { extension_of(&stream_name) };
                let out_path = output_path_for(&shard_cfg, index, &stream_name, proposed_ext);
                let mut sink = sink::open_sink(&out_path)?;

                let shard_result =
                    run_shard(&mut input, &mut pipeline, &decoder, coordinator, schedule, sink.as_mut(), &opts)?;
                Ok(ShardOutcome { path: out_path, now_empty: shard_result.now_empty })
            })();
            outcomes.lock().unwrap().push(result);
        }));
    }

    pool.jobs_completed();

    let results = outcomes.into_inner().unwrap();
    let mut shard_paths = Vec::with_capacity(results.len());
    for r in results {
        let outcome = r?;
        shard_paths.push(outcome);
    }

    finalize(cfg, &schedule, &shard_paths)
}

/// Deletes now-empty shard outputs and emits the serial/per-CPU schedule
/// files (§4.7's last paragraph). The schedule files' own format tracks
/// `shard_by` rather than any individual shard's input suffix: core-sharded
/// runs always produce a chunked zip archive (their shard outputs do too),
/// thread-sharded runs get a plain serial file.
fn finalize(cfg: &FilterConfig, schedule: &ScheduleRecorder, shards: &[ShardOutcome]) -> FilterResult<()> {
    for shard in shards {
        if shard.now_empty {
            crate::displaylevel!(3, "removing empty shard output {}", shard.path.display());
            let _ = fs::remove_file(&shard.path);
        }
    }

    if schedule.is_empty() {
        return Ok(());
    }

    let archive_mode = cfg.shard_by == ShardBy::Core;

    let serial_path = cfg.output_dir.join(SERIAL_FILENAME);
    let mut serial_sink = sink::open_sink(&serial_path)?;
    for e in schedule.serial_order() {
        let line = format!("{},{},{},{}\n", e.tid, e.cpu, e.timestamp, e.instr_ordinal);
        serial_sink.write_entry(line.as_bytes())?;
    }
    serial_sink.finish()?;

    if archive_mode {
        let cpu_path = cfg.output_dir.join(CPU_FILENAME);
        let mut cpu_sink = sink::open_sink(&cpu_path)?;
        for (cpu, entries) in schedule.per_cpu() {
            cpu_sink.open_new_component(&format!("cpu.{cpu:04}"))?;
            for e in entries {
                let line = format!("{},{},{}\n", e.tid, e.timestamp, e.instr_ordinal);
                cpu_sink.write_entry(line.as_bytes())?;
            }
        }
        cpu_sink.finish()?;
    } else {
        crate::displaylevel!(3, "skipping per-CPU schedule file: archive mode not active");
    }

    Ok(())
}
