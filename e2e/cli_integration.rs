// Integration tests for `src/main.rs` / `src/cli`: drives the compiled
// `drfilter` binary end-to-end via `std::process::Command` (library
// integration tests cannot call a binary crate's private `main`/`run`).

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::Command;

use drfilter::entry::{filetype, Entry, EntryKind, MarkerKind};
use drfilter::synth::SynthTrace;
use tempfile::TempDir;

fn drfilter_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_drfilter"))
}

fn setup_trace_dir(entries: &[Entry]) -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().unwrap();
    let trace_dir = dir.path().join("trace");
    fs::create_dir(&trace_dir).unwrap();
    let out_dir = dir.path().join("out");
    let mut f = File::create(trace_dir.join("t.1.trace")).unwrap();
    for e in entries {
        f.write_all(&e.encode()).unwrap();
    }
    (dir, trace_dir, out_dir)
}

fn sample_entries() -> Vec<Entry> {
    SynthTrace::new(filetype::ENCODINGS | filetype::ARCH_X86_64, 1, 10)
        .unit(5, 0)
        .instr_with_encoding(0x1000, &[0x90])
        .build()
}

#[test]
fn help_flag_exits_successfully_and_prints_usage() {
    let output = Command::new(drfilter_bin()).arg("--help").output().expect("spawn drfilter");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage"));
}

#[test]
fn version_flag_exits_successfully() {
    let output = Command::new(drfilter_bin()).arg("--version").output().expect("spawn drfilter");
    assert!(output.status.success());
}

#[test]
fn minimal_invocation_filters_a_trace_directory() {
    let (_dir, trace_dir, out_dir) = setup_trace_dir(&sample_entries());

    let status = Command::new(drfilter_bin())
        .args(["-o", out_dir.to_str().unwrap(), trace_dir.to_str().unwrap()])
        .status()
        .expect("spawn drfilter");
    assert!(status.success());

    let out_file = out_dir.join("t.1.trace");
    assert!(out_file.exists());
    let mut bytes = Vec::new();
    File::open(&out_file).unwrap().read_to_end(&mut bytes).unwrap();
    let entries = Entry::decode_all(&bytes).unwrap();
    assert_eq!(entries.first().unwrap().kind, EntryKind::Header);
    assert_eq!(entries.last().unwrap().kind, EntryKind::Footer);
}

#[test]
fn missing_trace_dir_returns_nonzero_and_names_the_problem() {
    let dir = TempDir::new().unwrap();
    let out_dir = dir.path().join("out");
    let missing = dir.path().join("does-not-exist");

    let output = Command::new(drfilter_bin())
        .args(["-o", out_dir.to_str().unwrap(), missing.to_str().unwrap()])
        .output()
        .expect("spawn drfilter");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("drfilter"));
}

#[test]
fn remove_marker_type_flag_drops_configured_markers() {
    let (_dir, trace_dir, out_dir) = setup_trace_dir(&sample_entries());

    let status = Command::new(drfilter_bin())
        .args([
            "-o",
            out_dir.to_str().unwrap(),
            "--remove-marker-type",
            &(MarkerKind::CacheLineSize as u16).to_string(),
            trace_dir.to_str().unwrap(),
        ])
        .status()
        .expect("spawn drfilter");
    assert!(status.success());

    let mut bytes = Vec::new();
    File::open(out_dir.join("t.1.trace")).unwrap().read_to_end(&mut bytes).unwrap();
    let entries = Entry::decode_all(&bytes).unwrap();
    assert!(!entries.iter().any(|e| e.marker_kind() == Some(MarkerKind::CacheLineSize)));
}

#[test]
fn modify_marker_value_flag_accepts_type_equals_value_syntax() {
    let (_dir, trace_dir, out_dir) = setup_trace_dir(&sample_entries());

    let status = Command::new(drfilter_bin())
        .args([
            "-o",
            out_dir.to_str().unwrap(),
            "--modify-marker-value",
            &format!("{}=0x2a", MarkerKind::CpuId as u16),
            trace_dir.to_str().unwrap(),
        ])
        .status()
        .expect("spawn drfilter");
    assert!(status.success());

    let mut bytes = Vec::new();
    File::open(out_dir.join("t.1.trace")).unwrap().read_to_end(&mut bytes).unwrap();
    let entries = Entry::decode_all(&bytes).unwrap();
    let cpu = entries.iter().find(|e| e.marker_kind() == Some(MarkerKind::CpuId)).unwrap();
    assert_eq!(cpu.addr, 0x2a);
}

#[test]
fn trim_requires_both_bounds_and_reports_a_configuration_error() {
    let (_dir, trace_dir, out_dir) = setup_trace_dir(&sample_entries());

    let output = Command::new(drfilter_bin())
        .args([
            "-o",
            out_dir.to_str().unwrap(),
            "--trim-before-timestamp",
            "10",
            trace_dir.to_str().unwrap(),
        ])
        .output()
        .expect("spawn drfilter");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("configuration"));
}

#[test]
fn shard_by_core_produces_a_zip_archive_output() {
    let (_dir, trace_dir, out_dir) = setup_trace_dir(&sample_entries());

    let status = Command::new(drfilter_bin())
        .args(["-o", out_dir.to_str().unwrap(), "--shard-by", "core", trace_dir.to_str().unwrap()])
        .status()
        .expect("spawn drfilter");
    assert!(status.success());

    let out_file = out_dir.join("drmemtrace.core.000000.trace.zip");
    assert!(out_file.exists());
    zip::ZipArchive::new(File::open(&out_file).unwrap()).expect("valid zip archive");
}
