//! `clap`-derive command line surface, converting into a [`FilterConfig`]:
//! parse first, validate named fields as they're set, then hand the
//! finished value to the driver.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{parse_u64, FilterConfig, ShardBy};
use crate::error::{FilterError, FilterResult};
use crate::util::display::set_display_level;

/// Parallel, shard-oriented filter for drmemtrace offline trace directories.
#[derive(Parser, Debug)]
#[command(name = "drfilter", version, about, long_about = None)]
pub struct Cli {
    /// Directory of drmemtrace shard files to filter.
    pub trace_dir: PathBuf,

    /// Destination directory for filtered shard output.
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Worker thread count; 0 auto-detects from physical core count.
    #[arg(short = 'j', long, default_value_t = 0)]
    pub jobs: usize,

    /// Decimal or 0x-hex timestamp; entries are dropped once reached in
    /// bimodal (stop-at-timestamp) mode. 0 disables.
    #[arg(long, default_value = "0", value_parser = parse_u64_arg)]
    pub stop_timestamp: u64,

    /// Total simulated cache size in bytes; 0 disables the cache filter.
    #[arg(long, default_value_t = 0)]
    pub cache_filter_size: usize,

    /// Trace entry type code to drop. Repeatable.
    #[arg(long = "remove-trace-type", value_name = "CODE", value_parser = parse_u16_arg)]
    pub remove_trace_types: Vec<u16>,

    /// Marker type code to drop. Repeatable.
    #[arg(long = "remove-marker-type", value_name = "CODE", value_parser = parse_u16_arg)]
    pub remove_marker_types: Vec<u16>,

    /// Mode-A trim: drop entries before this timestamp.
    #[arg(long, value_parser = parse_u64_arg)]
    pub trim_before_timestamp: Option<u64>,

    /// Mode-A trim: drop entries after this timestamp.
    #[arg(long, value_parser = parse_u64_arg)]
    pub trim_after_timestamp: Option<u64>,

    /// Mode-B trim: drop entries before this instruction ordinal.
    #[arg(long, value_parser = parse_u64_arg)]
    pub trim_before_instr: Option<u64>,

    /// Mode-B trim: drop entries after this instruction ordinal.
    #[arg(long, value_parser = parse_u64_arg)]
    pub trim_after_instr: Option<u64>,

    /// Rewrite ENCODING payloads to their REGDEPS-architecture equivalent.
    #[arg(long)]
    pub encodings2regdeps: bool,

    /// Keep only calls to this function id. Repeatable; empty means keep all.
    #[arg(long = "keep-func-id", value_name = "U64", value_parser = parse_u64_arg)]
    pub keep_func_ids: Vec<u64>,

    /// `marker_type=new_value` pair to rewrite in place. Repeatable.
    #[arg(long = "modify-marker-value", value_name = "TYPE=VALUE", value_parser = parse_marker_value_pair)]
    pub modify_marker_value: Vec<(u64, u64)>,

    /// Shard discovery/output-naming strategy.
    #[arg(long, value_enum, default_value_t = ShardByArg::Thread)]
    pub shard_by: ShardByArg,

    /// Raise the display level by one (repeatable).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Silence all non-error output.
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShardByArg {
    Thread,
    Core,
}

impl From<ShardByArg> for ShardBy {
    fn from(value: ShardByArg) -> Self {
        match value {
            ShardByArg::Thread => ShardBy::Thread,
            ShardByArg::Core => ShardBy::Core,
        }
    }
}

fn parse_u64_arg(s: &str) -> Result<u64, String> {
    parse_u64(s).ok_or_else(|| format!("invalid decimal or 0x-hex value: {s}"))
}

fn parse_u16_arg(s: &str) -> Result<u16, String> {
    let v = parse_u64_arg(s)?;
    u16::try_from(v).map_err(|_| format!("value {v} does not fit in a 16-bit type code"))
}

fn parse_marker_value_pair(s: &str) -> Result<(u64, u64), String> {
    let (ty, val) = s
        .split_once('=')
        .ok_or_else(|| format!("expected TYPE=VALUE, got {s}"))?;
    Ok((parse_u64_arg(ty)?, parse_u64_arg(val)?))
}

/// Applies `-v`/`-q` to the process-wide display level, as the very first
/// effect of argument parsing.
fn apply_display_level(cli: &Cli) {
    if cli.quiet {
        set_display_level(0);
    } else if cli.verbose > 0 {
        set_display_level(2 + cli.verbose as u32);
    }
}

/// Parses `argv`-style arguments (including the program name) and builds a
/// validated [`FilterConfig`] plus the resolved trace directory.
/// `--help`/`--version` print and exit the process directly, per clap's
/// derive behavior.
pub fn parse_args<I, T>(args: I) -> FilterResult<(Cli, FilterConfig)>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    apply_display_level(&cli);
    let cfg = build_config(&cli)?;
    Ok((cli, cfg))
}

/// Same as [`parse_args`] but returns a `clap` parse error instead of
/// exiting, for tests that need to assert on malformed invocations.
pub fn try_parse_args<I, T>(args: I) -> FilterResult<(Cli, FilterConfig)>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = Cli::try_parse_from(args).map_err(|e| FilterError::configuration(e.to_string()))?;
    apply_display_level(&cli);
    let cfg = build_config(&cli)?;
    Ok((cli, cfg))
}

/// Converts a parsed [`Cli`] into a validated [`FilterConfig`], applying the
/// same setter-based validation the driver would otherwise have to repeat.
pub fn build_config(cli: &Cli) -> FilterResult<FilterConfig> {
    let mut cfg = FilterConfig::new(cli.output_dir.clone());
    cfg.jobs = cli.jobs;
    cfg.stop_timestamp = cli.stop_timestamp;
    cfg.remove_trace_types = cli.remove_trace_types.clone();
    cfg.remove_marker_types = cli.remove_marker_types.clone();
    cfg.encodings2regdeps = cli.encodings2regdeps;
    cfg.keep_func_ids = cli.keep_func_ids.clone();
    cfg.shard_by = cli.shard_by.into();

    if cli.cache_filter_size > 0 {
        cfg.set_cache_filter_size(cli.cache_filter_size)?;
    }

    match (cli.trim_before_timestamp, cli.trim_after_timestamp) {
        (Some(before), Some(after)) => cfg.set_trim_timestamp(before, after)?,
        (None, None) => {}
        _ => {
            return Err(FilterError::configuration(
                "--trim-before-timestamp and --trim-after-timestamp must both be given",
            ))
        }
    }

    match (cli.trim_before_instr, cli.trim_after_instr) {
        (Some(before), Some(after)) => cfg.set_trim_instr(before, after)?,
        (None, None) => {}
        _ => {
            return Err(FilterError::configuration(
                "--trim-before-instr and --trim-after-instr must both be given",
            ))
        }
    }

    if !cli.modify_marker_value.is_empty() {
        let flat: Vec<u64> = cli
            .modify_marker_value
            .iter()
            .flat_map(|&(ty, val)| [ty, val])
            .collect();
        cfg.set_modify_marker_value(flat)?;
    }

    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> FilterResult<(Cli, FilterConfig)> {
        let mut full = vec!["drfilter"];
        full.extend_from_slice(args);
        try_parse_args(full)
    }

    #[test]
    fn minimal_invocation_parses() {
        let (_cli, cfg) = parse(&["-o", "/tmp/out", "/tmp/trace"]).unwrap();
        assert_eq!(cfg.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(cfg.jobs, 0);
    }

    #[test]
    fn repeatable_flags_accumulate() {
        let (_cli, cfg) = parse(&[
            "-o",
            "/tmp/out",
            "--remove-trace-type",
            "10",
            "--remove-trace-type",
            "0x0b",
            "/tmp/trace",
        ])
        .unwrap();
        assert_eq!(cfg.remove_trace_types, vec![10, 11]);
    }

    #[test]
    fn modify_marker_value_pairs_parse_key_equals_value() {
        let (_cli, cfg) = parse(&["-o", "/tmp/out", "--modify-marker-value", "5=0xff", "/tmp/trace"]).unwrap();
        assert_eq!(cfg.modify_marker_value, vec![(5, 0xff)]);
    }

    #[test]
    fn trim_flags_require_both_bounds() {
        assert!(parse(&["-o", "/tmp/out", "--trim-before-timestamp", "10", "/tmp/trace"]).is_err());
    }

    #[test]
    fn shard_by_core_selects_core_variant() {
        let (_cli, cfg) = parse(&["-o", "/tmp/out", "--shard-by", "core", "/tmp/trace"]).unwrap();
        assert_eq!(cfg.shard_by, ShardBy::Core);
    }

    #[test]
    fn quiet_and_verbose_are_mutually_sensible() {
        assert!(parse(&["-o", "/tmp/out", "-q", "/tmp/trace"]).is_ok());
        assert!(parse(&["-o", "/tmp/out", "-v", "-v", "/tmp/trace"]).is_ok());
    }
}
