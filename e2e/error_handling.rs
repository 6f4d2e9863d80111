// End-to-end coverage of §7's error taxonomy: configuration, stream,
// grammar. Each case drives `driver::run`/`FilterConfig` the way a real
// caller would and asserts on the resulting `FilterError` variant, matching
// §7's "each filter stores an error string ... driver captures and aborts"
// propagation policy all the way out to the top-level result.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use drfilter::entry::{filetype, Entry, MarkerKind};
use drfilter::error::FilterError;
use drfilter::synth::SynthTrace;
use drfilter::{driver, FilterConfig, ShardBy};
use tempfile::TempDir;

fn write_trace_file(path: &Path, entries: &[Entry]) {
    let mut f = File::create(path).unwrap();
    for e in entries {
        f.write_all(&e.encode()).unwrap();
    }
}

// Configuration: no trace files under the input directory.
#[test]
fn empty_trace_dir_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    let cfg = FilterConfig::new(out_dir);
    let err = driver::run(&cfg, &trace_dir).unwrap_err();
    assert!(matches!(err, FilterError::Configuration(_)));
}

// Configuration: removing PHYSICAL_ADDRESS markers is rejected up front for
// core-sharded (archive) output, before any shard even runs.
#[test]
fn physical_address_removal_in_archive_mode_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");
    write_trace_file(
        &trace_dir.join("t.1.trace"),
        &SynthTrace::new(filetype::ENCODINGS, 1, 10).unit(1, 0).instr(0x1000, 1).build(),
    );

    let mut cfg = FilterConfig::new(out_dir);
    cfg.shard_by = ShardBy::Core;
    cfg.remove_marker_types = vec![MarkerKind::PhysicalAddress as u16];
    let err = driver::run(&cfg, &trace_dir).unwrap_err();
    assert!(matches!(err, FilterError::Configuration(_)));
}

// Configuration: trim-mode setters reject an inverted range and reject
// configuring both trim modes at once, without ever touching a shard.
#[test]
fn trim_config_setters_reject_invalid_combinations() {
    let mut cfg = FilterConfig::new(std::path::PathBuf::from("/tmp/out"));
    assert!(matches!(cfg.set_trim_timestamp(100, 50), Err(FilterError::Configuration(_))));
    cfg.set_trim_timestamp(10, 20).unwrap();
    assert!(matches!(cfg.set_trim_instr(0, 5), Err(FilterError::Configuration(_))));
}

// Configuration: an odd-length modify-marker-value list is rejected.
#[test]
fn odd_length_modify_marker_value_list_is_a_configuration_error() {
    let mut cfg = FilterConfig::new(std::path::PathBuf::from("/tmp/out"));
    let err = cfg.set_modify_marker_value(vec![MarkerKind::CpuId as u64]).unwrap_err();
    assert!(matches!(err, FilterError::Configuration(_)));
}

// Stream: a misaligned trace file (byte count not a multiple of the entry
// stride, §4.1) surfaces as a stream error through the full driver run —
// the fatal "short/misaligned read" case.
#[test]
fn misaligned_trace_file_is_a_stream_error() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    let mut entries_bytes = Vec::new();
    for e in SynthTrace::new(filetype::ENCODINGS, 1, 10).unit(1, 0).instr(0x1000, 1).build() {
        entries_bytes.extend_from_slice(&e.encode());
    }
    // Truncate mid-record so the final read is short of a full entry.
    entries_bytes.truncate(entries_bytes.len() - 5);
    fs::write(trace_dir.join("t.1.trace"), &entries_bytes).unwrap();

    let cfg = FilterConfig::new(out_dir);
    let err = driver::run(&cfg, &trace_dir).unwrap_err();
    assert!(matches!(err, FilterError::Stream(_)));
}

// Grammar: trimming a trace whose window id changes mid-shard is rejected
// with the exact diagnostic §8/S4 specifies.
#[test]
fn trimming_a_multi_window_trace_is_a_grammar_error() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    let entries = SynthTrace::new(filetype::ENCODINGS | filetype::ARCH_X86_64, 1, 10)
        .unit(10, 0)
        .marker(MarkerKind::WindowId, 0)
        .instr_with_encoding(0x1000, &[0x90])
        .unit(100, 0)
        .marker(MarkerKind::WindowId, 1)
        .instr(0x1004, 1)
        .build();
    write_trace_file(&trace_dir.join("t.1.trace"), &entries);

    let mut cfg = FilterConfig::new(out_dir);
    cfg.set_trim_timestamp(50, 150).unwrap();
    let err = driver::run(&cfg, &trace_dir).unwrap_err();
    assert!(matches!(err, FilterError::Grammar(_)));
    assert_eq!(
        err.to_string(),
        "grammar: Trimming a trace with multiple windows is not supported. Previous window_id = 0, current window_id = 1"
    );
}

// Grammar: an archive-mode chunk boundary that needs a PC's encoding which
// was never cached (a malformed input, not a filtered-out one) fails with a
// grammar error naming the missing PC.
#[test]
fn missing_cached_encoding_at_chunk_boundary_is_a_grammar_error() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    // Chunk of size 1: the first instruction carries its own encoding and
    // closes chunk 0. The second instruction is a bare INSTR at a PC that
    // was never preceded by any ENCODING anywhere in the shard, so when
    // chunk 1 opens there is nothing cached for it.
    let entries = SynthTrace::new(filetype::ENCODINGS | filetype::ARCH_X86_64, 1, 10)
        .chunked(1)
        .unit(1, 0)
        .instr_with_encoding(0x1000, &[0x90])
        .instr(0x2000, 1)
        .build();
    write_trace_file(&trace_dir.join("core.1.trace"), &entries);

    let mut cfg = FilterConfig::new(out_dir);
    cfg.shard_by = ShardBy::Core;
    let err = driver::run(&cfg, &trace_dir).unwrap_err();
    assert!(matches!(err, FilterError::Grammar(_)));
    assert!(err.to_string().contains("0x2000"));
}
