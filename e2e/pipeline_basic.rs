// End-to-end tests driving `drfilter::driver::run` over a whole trace
// directory, exercising the seed scenarios and universally-quantified
// properties of spec.md §8 against real on-disk shard files.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use drfilter::entry::{filetype, Entry, EntryKind, MarkerKind};
use drfilter::synth::{random_valid_trace, SynthTrace};
use drfilter::{driver, FilterConfig};
use tempfile::TempDir;

fn write_shard(dir: &Path, name: &str, entries: &[Entry]) -> PathBuf {
    let path = dir.join(name);
    let mut f = File::create(&path).unwrap();
    for e in entries {
        f.write_all(&e.encode()).unwrap();
    }
    path
}

fn read_shard(path: &Path) -> Vec<Entry> {
    let mut bytes = Vec::new();
    File::open(path).unwrap().read_to_end(&mut bytes).unwrap();
    Entry::decode_all(&bytes).unwrap()
}

fn count_instrs(entries: &[Entry]) -> usize {
    entries.iter().filter(|e| drfilter::entry::is_instr(e.kind)).count()
}

fn count_memrefs(entries: &[Entry]) -> usize {
    entries.iter().filter(|e| drfilter::entry::is_memory_access(e.kind)).count()
}

fn count_markers(entries: &[Entry]) -> usize {
    entries.iter().filter(|e| e.kind == EntryKind::Marker).count()
}

// P1: the null filter (no config knobs set) preserves instruction, memory
// access, and marker counts exactly.
#[test]
fn p1_null_filter_preserves_basic_counts() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    let input = random_valid_trace(7, 30);
    write_shard(&trace_dir, "t.1.trace", &input);

    let cfg = FilterConfig::new(out_dir.clone());
    driver::run(&cfg, &trace_dir).unwrap();

    let output = read_shard(&out_dir.join("t.1.trace"));
    assert_eq!(count_instrs(&input), count_instrs(&output));
    assert_eq!(count_memrefs(&input), count_memrefs(&output));
    assert_eq!(count_markers(&input), count_markers(&output));
}

// P4: applying the null pipeline twice is idempotent.
#[test]
fn p4_null_filter_is_idempotent_under_repetition() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir1 = dir.path().join("out1");
    let out_dir2 = dir.path().join("out2");

    let input = random_valid_trace(11, 15);
    write_shard(&trace_dir, "t.1.trace", &input);

    let cfg1 = FilterConfig::new(out_dir1.clone());
    driver::run(&cfg1, &trace_dir).unwrap();
    let once = read_shard(&out_dir1.join("t.1.trace"));

    let trace_dir2 = dir.path().join("trace2");
    fs::create_dir(&trace_dir2).unwrap();
    write_shard(&trace_dir2, "t.1.trace", &once);
    let cfg2 = FilterConfig::new(out_dir2.clone());
    driver::run(&cfg2, &trace_dir2).unwrap();
    let twice = read_shard(&out_dir2.join("t.1.trace"));

    assert_eq!(once, twice);
}

// S2: func-id filter keeps exactly the groups whose FUNC_ID is in the keep
// set, including their FUNC_ARG/FUNC_RETADDR/FUNC_RETVAL siblings.
#[test]
fn s2_func_id_filter_keeps_only_configured_groups() {
    const SYS_FUTEX: u64 = 202;
    const SYS_FSYNC: u64 = 74;

    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    let entries = SynthTrace::new(filetype::ENCODINGS | filetype::ARCH_X86_64, 1, 10)
        .unit(10, 0)
        .marker(MarkerKind::FuncId, SYS_FUTEX)
        .marker(MarkerKind::FuncArg, 1)
        .marker(MarkerKind::FuncRetaddr, 0x4000)
        .marker(MarkerKind::FuncRetval, 0)
        .marker(MarkerKind::FuncId, SYS_FSYNC)
        .marker(MarkerKind::FuncArg, 3)
        .marker(MarkerKind::FuncId, 8)
        .marker(MarkerKind::FuncArg, 9)
        .instr_with_encoding(0x1000, &[0x90])
        .build();
    write_shard(&trace_dir, "t.1.trace", &entries);

    let mut cfg = FilterConfig::new(out_dir.clone());
    cfg.keep_func_ids = vec![SYS_FUTEX, 7];
    driver::run(&cfg, &trace_dir).unwrap();

    let output = read_shard(&out_dir.join("t.1.trace"));
    let func_values: Vec<u64> = output
        .iter()
        .filter(|e| e.marker_kind() == Some(MarkerKind::FuncId))
        .map(|e| e.addr)
        .collect();
    assert_eq!(func_values, vec![SYS_FUTEX]);
    // FUNC_ARG/RETADDR/RETVAL belonging to the kept group survive.
    assert!(output.iter().any(|e| e.marker_kind() == Some(MarkerKind::FuncArg) && e.addr == 1));
    assert!(output.iter().any(|e| e.marker_kind() == Some(MarkerKind::FuncRetaddr)));
    assert!(output.iter().any(|e| e.marker_kind() == Some(MarkerKind::FuncRetval)));
    // FUNC_ARG belonging to the dropped SYS_FSYNC/8 groups does not.
    assert!(!output.iter().any(|e| e.marker_kind() == Some(MarkerKind::FuncArg) && e.addr == 3));
    assert!(!output.iter().any(|e| e.marker_kind() == Some(MarkerKind::FuncArg) && e.addr == 9));
}

// S3: modify-marker-value rewrites exactly the configured marker addrs.
#[test]
fn s3_modify_marker_value_rewrites_only_configured_markers() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    let entries = SynthTrace::new(filetype::ENCODINGS | filetype::ARCH_X86_64, 1, 10)
        .unit(10, 5)
        .marker(MarkerKind::PageSize, 0x1000)
        .instr_with_encoding(0x1000, &[0x90])
        .build();
    write_shard(&trace_dir, "t.1.trace", &entries);

    let mut cfg = FilterConfig::new(out_dir.clone());
    cfg.set_modify_marker_value(vec![MarkerKind::CpuId as u64, u64::MAX, MarkerKind::PageSize as u64, 0x800])
        .unwrap();
    driver::run(&cfg, &trace_dir).unwrap();

    let output = read_shard(&out_dir.join("t.1.trace"));
    let cpu = output.iter().find(|e| e.marker_kind() == Some(MarkerKind::CpuId)).unwrap();
    assert_eq!(cpu.addr, u64::MAX);
    let page = output.iter().find(|e| e.marker_kind() == Some(MarkerKind::PageSize)).unwrap();
    assert_eq!(page.addr, 0x800);
    // Timestamp marker's value, untouched, still reads 10.
    let ts = output.iter().find(|e| e.marker_kind() == Some(MarkerKind::Timestamp)).unwrap();
    assert_eq!(ts.addr, 10);
}

// S4: a trim-by-timestamp filter keeps the first WINDOW_ID of the shard even
// though it falls inside the trimmed-out region, and fails on a second
// window id anywhere in the same shard.
#[test]
fn s4_trim_by_timestamp_keeps_first_window_id_and_rejects_second() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    let entries = SynthTrace::new(filetype::ENCODINGS | filetype::ARCH_X86_64, 1, 10)
        .unit(10, 0)
        .marker(MarkerKind::WindowId, 0)
        .instr_with_encoding(0x1000, &[0x90])
        .unit(100, 0)
        .instr_with_encoding(0x1004, &[0x91])
        .marker(MarkerKind::WindowId, 1)
        .build();
    write_shard(&trace_dir, "t.1.trace", &entries);

    let mut cfg = FilterConfig::new(out_dir.clone());
    cfg.set_trim_timestamp(50, 150).unwrap();
    let err = driver::run(&cfg, &trace_dir).unwrap_err();
    assert!(err.to_string().contains("multiple windows"));
}

#[test]
fn s4_trim_by_timestamp_preserves_first_window_id_when_only_one_present() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    let entries = SynthTrace::new(filetype::ENCODINGS | filetype::ARCH_X86_64, 1, 10)
        .unit(10, 0)
        .marker(MarkerKind::WindowId, 0)
        .instr_with_encoding(0x1000, &[0x90])
        .unit(100, 0)
        .instr_with_encoding(0x1004, &[0x91])
        .build();
    write_shard(&trace_dir, "t.1.trace", &entries);

    let mut cfg = FilterConfig::new(out_dir.clone());
    cfg.set_trim_timestamp(50, 150).unwrap();
    driver::run(&cfg, &trace_dir).unwrap();

    let output = read_shard(&out_dir.join("t.1.trace"));
    assert!(output.iter().any(|e| e.marker_kind() == Some(MarkerKind::WindowId)));
    // The instruction in the first (dropped) unit is gone; the second
    // unit's timestamp (100) is within range and survives.
    assert!(!output.iter().any(|e| e.kind == EntryKind::Instr && e.addr == 0x1000));
    assert!(output.iter().any(|e| e.kind == EntryKind::Instr && e.addr == 0x1004));
}

// P5: no emitted TIMESTAMP marker lies outside the keep range, except the
// shard's THREAD_EXIT/FOOTER trailer (which carry no TIMESTAMP anyway).
#[test]
fn p5_trim_never_emits_out_of_range_timestamps() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    let entries = SynthTrace::new(filetype::ENCODINGS | filetype::ARCH_X86_64, 1, 10)
        .unit(10, 0)
        .instr_with_encoding(0x1000, &[0x90])
        .unit(75, 0)
        .instr_with_encoding(0x1004, &[0x91])
        .unit(200, 0)
        .instr_with_encoding(0x1008, &[0x92])
        .build();
    write_shard(&trace_dir, "t.1.trace", &entries);

    let mut cfg = FilterConfig::new(out_dir.clone());
    cfg.set_trim_timestamp(50, 150).unwrap();
    driver::run(&cfg, &trace_dir).unwrap();

    let output = read_shard(&out_dir.join("t.1.trace"));
    for e in &output {
        if e.marker_kind() == Some(MarkerKind::Timestamp) {
            assert!(e.addr >= 50 && e.addr <= 150, "timestamp {} escaped the keep range", e.addr);
        }
    }
}

// S1-style: chunked archive output re-chunks at the configured instruction
// count and re-emits encodings at each new chunk boundary for a
// still-unseen-this-chunk PC.
#[test]
fn archive_output_rechunks_at_configured_instr_count() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    let entries = SynthTrace::new(filetype::ENCODINGS | filetype::ARCH_X86_64, 1, 10)
        .chunked(3)
        .unit(7, 8)
        .instr_with_encoding(0x1000, &[0xe7, 0x89, 0x48])
        .instr(0x1000, 3)
        .instr(0x1000, 3)
        .instr_with_encoding(0x1010, &[0x90])
        .instr(0x1010, 1)
        .instr(0x1010, 1)
        .build();
    write_shard(&trace_dir, "core.1.trace", &entries);

    let mut cfg = FilterConfig::new(out_dir.clone());
    cfg.shard_by = drfilter::ShardBy::Core;
    driver::run(&cfg, &trace_dir).unwrap();

    let out_path = out_dir.join("drmemtrace.core.000000.trace.zip");
    assert!(out_path.exists());

    let file = File::open(&out_path).unwrap();
    let mut zip = zip::ZipArchive::new(file).unwrap();
    assert!(zip.len() >= 2, "expected at least 2 chunk components, got {}", zip.len());

    let mut chunk0 = Vec::new();
    zip.by_index(0).unwrap().read_to_end(&mut chunk0).unwrap();
    let chunk0_entries = Entry::decode_all(&chunk0).unwrap();
    // Chunk 0 closes with a CHUNK_FOOTER whose value is 0.
    let footer = chunk0_entries.last().unwrap();
    assert_eq!(footer.marker_kind(), Some(MarkerKind::ChunkFooter));
    assert_eq!(footer.addr, 0);

    let mut chunk1 = Vec::new();
    zip.by_index(1).unwrap().read_to_end(&mut chunk1).unwrap();
    let chunk1_entries = Entry::decode_all(&chunk1).unwrap();
    // Chunk 1 opens with RECORD_ORDINAL, TIMESTAMP, CPU_ID.
    assert_eq!(chunk1_entries[0].marker_kind(), Some(MarkerKind::RecordOrdinal));
    assert_eq!(chunk1_entries[1].marker_kind(), Some(MarkerKind::Timestamp));
    assert_eq!(chunk1_entries[2].marker_kind(), Some(MarkerKind::CpuId));
    // The second instance of PC 0x1010 falls in chunk 1, and since it
    // hasn't been seen in this chunk yet its encoding must be re-emitted.
    let has_encoding_before_0x1010 = chunk1_entries
        .windows(2)
        .any(|w| w[0].kind == EntryKind::Encoding && drfilter::entry::is_instr(w[1].kind) && w[1].addr == 0x1010);
    assert!(has_encoding_before_0x1010, "expected a re-emitted encoding ahead of PC 0x1010 in chunk 1");
}

// A chunk-boundary encoding reload must be emitted even when the entry
// immediately preceding the boundary instruction in the raw stream was
// itself dropped by a filter. Regression test for a bug where the reload
// was deferred through `last_encoding`/`delayed_encodings` and gated on
// `prev_was_output`, silently losing the re-emitted ENCODING whenever that
// immediately-preceding entry didn't survive filtering.
#[test]
fn chunk_boundary_encoding_reload_survives_a_dropped_preceding_entry() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    let entries = SynthTrace::new(filetype::ENCODINGS | filetype::ARCH_X86_64, 1, 10)
        .chunked(1)
        .unit(5, 0)
        .instr_with_encoding(0x1000, &[0x90])
        .memory(EntryKind::Read, 0x2000, 8)
        .instr(0x1000, 1)
        .build();
    write_shard(&trace_dir, "core.1.trace", &entries);

    let mut cfg = FilterConfig::new(out_dir.clone());
    cfg.shard_by = drfilter::ShardBy::Core;
    cfg.remove_trace_types = vec![EntryKind::Read as u16];
    driver::run(&cfg, &trace_dir).unwrap();

    let out_path = out_dir.join("drmemtrace.core.000000.trace.zip");
    let file = File::open(&out_path).unwrap();
    let mut zip = zip::ZipArchive::new(file).unwrap();
    assert!(zip.len() >= 2, "expected at least 2 chunk components, got {}", zip.len());

    let mut chunk1 = Vec::new();
    zip.by_index(1).unwrap().read_to_end(&mut chunk1).unwrap();
    let chunk1_entries = Entry::decode_all(&chunk1).unwrap();
    let has_encoding_before_0x1000 = chunk1_entries
        .windows(2)
        .any(|w| w[0].kind == EntryKind::Encoding && drfilter::entry::is_instr(w[1].kind) && w[1].addr == 0x1000);
    assert!(
        has_encoding_before_0x1000,
        "expected the reloaded encoding ahead of PC 0x1000 in chunk 1 despite the dropped READ between chunks"
    );
}

// The CLI-level cache filter config knob (§6) enables a data-filtering
// cache (1-way, 64-byte lines); repeated accesses to the same line are
// dropped and FILETYPE gains DFILTERED.
#[test]
fn cache_filter_drops_repeated_same_line_data_accesses_and_marks_filetype() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    let entries = SynthTrace::new(filetype::ENCODINGS | filetype::ARCH_X86_64, 1, 10)
        .unit(1, 0)
        .instr_with_encoding(0x1000, &[0x90])
        .memory(EntryKind::Read, 0x2000, 8)
        .memory(EntryKind::Read, 0x2000, 8)
        .memory(EntryKind::Read, 0x2004, 8)
        .build();
    write_shard(&trace_dir, "t.1.trace", &entries);

    let mut cfg = FilterConfig::new(out_dir.clone());
    cfg.set_cache_filter_size(64 * 1024).unwrap();
    driver::run(&cfg, &trace_dir).unwrap();

    let output = read_shard(&out_dir.join("t.1.trace"));
    assert!(count_memrefs(&output) < count_memrefs(&entries));
    let ft = output.iter().find(|e| e.marker_kind() == Some(MarkerKind::Filetype)).unwrap();
    assert_ne!(ft.addr & filetype::DFILTERED, 0);
}
