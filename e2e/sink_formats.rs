// End-to-end coverage of §4.7's suffix-based sink selection: plain file,
// streaming gzip, and chunked zip archive, each driven through the full
// `driver::run` orchestration rather than unit-testing `sink::open_sink`
// directly.

use std::fs::{self, File};
use std::io::Read;

use drfilter::entry::{filetype, Entry, EntryKind};
use drfilter::synth::SynthTrace;
use drfilter::{driver, FilterConfig, ShardBy};
use tempfile::TempDir;

fn sample_entries() -> Vec<Entry> {
    SynthTrace::new(filetype::ENCODINGS | filetype::ARCH_X86_64, 1, 10)
        .unit(1, 0)
        .instr_with_encoding(0x1000, &[0x90])
        .build()
}

fn write_trace_file(path: &std::path::Path, entries: &[Entry]) {
    use std::io::Write;
    let mut f = File::create(path).unwrap();
    for e in entries {
        f.write_all(&e.encode()).unwrap();
    }
}

// Thread-sharded output mirrors the input stream name verbatim, so a `.gz`
// suffix on the input file routes the shard's output through the gzip sink.
#[test]
fn thread_sharded_gz_suffix_input_produces_gzip_output() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    write_trace_file(&trace_dir.join("t.1.trace.gz"), &sample_entries());

    let cfg = FilterConfig::new(out_dir.clone());
    driver::run(&cfg, &trace_dir).unwrap();

    let out_path = out_dir.join("t.1.trace.gz");
    assert!(out_path.exists());
    let mut magic = [0u8; 2];
    File::open(&out_path).unwrap().read_exact(&mut magic).unwrap();
    assert_eq!(magic, [0x1f, 0x8b]);

    // Decompressing yields a well-formed entry stream.
    let mut decoder = flate2::read::GzDecoder::new(File::open(&out_path).unwrap());
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed).unwrap();
    let entries = Entry::decode_all(&decompressed).unwrap();
    assert_eq!(entries.first().unwrap().kind, EntryKind::Header);
    assert_eq!(entries.last().unwrap().kind, EntryKind::Footer);
}

// Plain (no recognized suffix) input produces an uncompressed output file
// with the exact same stream name.
#[test]
fn thread_sharded_plain_suffix_produces_uncompressed_output() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    write_trace_file(&trace_dir.join("t.1.trace"), &sample_entries());

    let cfg = FilterConfig::new(out_dir.clone());
    driver::run(&cfg, &trace_dir).unwrap();

    let out_path = out_dir.join("t.1.trace");
    let mut bytes = Vec::new();
    File::open(&out_path).unwrap().read_to_end(&mut bytes).unwrap();
    // A valid plain entry stream, not gzip-magic-prefixed.
    assert_ne!(&bytes[..2], &[0x1f, 0x8b]);
    assert!(Entry::decode_all(&bytes).is_some());
}

// Core-sharded mode always produces a chunked zip archive regardless of the
// input file's own suffix, per §4.7's core-sharded naming rule.
#[test]
fn core_sharded_always_produces_zip_archive_regardless_of_input_suffix() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    write_trace_file(&trace_dir.join("whatever-name.bin"), &sample_entries());

    let mut cfg = FilterConfig::new(out_dir.clone());
    cfg.shard_by = ShardBy::Core;
    driver::run(&cfg, &trace_dir).unwrap();

    let out_path = out_dir.join("drmemtrace.core.000000.trace.zip");
    assert!(out_path.exists());
    let mut zip = zip::ZipArchive::new(File::open(&out_path).unwrap()).unwrap();
    assert!(zip.len() >= 1);
    let mut contents = Vec::new();
    zip.by_index(0).unwrap().read_to_end(&mut contents).unwrap();
    assert!(Entry::decode_all(&contents).is_some());
}

// The serial schedule file is emitted alongside shard output whenever any
// CPU_ID marker was recorded; for thread-sharded runs it's a plain file.
#[test]
fn finalize_emits_serial_schedule_file() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    write_trace_file(&trace_dir.join("t.1.trace"), &sample_entries());

    let cfg = FilterConfig::new(out_dir.clone());
    driver::run(&cfg, &trace_dir).unwrap();

    let schedule_path = out_dir.join(driver::SERIAL_FILENAME);
    assert!(schedule_path.exists());
    let contents = fs::read_to_string(&schedule_path).unwrap();
    assert!(contents.lines().count() >= 1);
}

// Core-sharded finalize additionally emits a per-CPU zip schedule archive.
#[test]
fn finalize_emits_per_cpu_schedule_archive_for_core_sharded_runs() {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");

    write_trace_file(&trace_dir.join("t.1.trace"), &sample_entries());

    let mut cfg = FilterConfig::new(out_dir.clone());
    cfg.shard_by = ShardBy::Core;
    driver::run(&cfg, &trace_dir).unwrap();

    let cpu_schedule_path = out_dir.join(driver::CPU_FILENAME);
    assert!(cpu_schedule_path.exists());
    zip::ZipArchive::new(File::open(&cpu_schedule_path).unwrap()).expect("valid zip archive");
}
