//! `FilterConfig`: the concrete type behind the configuration surface.
//!
//! Plain public fields paired with named `set_*` setters for the fields
//! that carry nontrivial validation. These setters return
//! `Result<(), FilterError>` — invalid trim ranges, trim-mode conflicts, and
//! odd-length modify-marker lists are hard configuration errors here, not
//! values to silently coerce into range.

use std::path::PathBuf;

use crate::entry::MarkerKind;
use crate::error::{FilterError, FilterResult};

/// How input is partitioned into shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardBy {
    Thread,
    Core,
}

impl Default for ShardBy {
    fn default() -> Self {
        ShardBy::Thread
    }
}

/// Timestamp-range trim parameters (mode A of the trim filter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampTrim {
    pub before: u64,
    pub after: u64,
}

/// Instruction-ordinal-range trim parameters (mode B of the trim filter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrTrim {
    pub before: u64,
    pub after: u64,
}

#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    pub output_dir: PathBuf,
    /// 0 disables; non-zero enables bimodal warmup semantics.
    pub stop_timestamp: u64,
    /// 0 disables the cache filter; >0 is the total cache size in bytes.
    pub cache_filter_size: usize,
    pub remove_trace_types: Vec<u16>,
    pub remove_marker_types: Vec<u16>,
    trim_timestamp: Option<TimestampTrim>,
    trim_instr: Option<InstrTrim>,
    pub encodings2regdeps: bool,
    pub keep_func_ids: Vec<u64>,
    pub modify_marker_value: Vec<(u16, u64)>,
    pub shard_by: ShardBy,
    /// 0 = auto-detect from physical core count.
    pub jobs: usize,
}

impl FilterConfig {
    pub fn new(output_dir: PathBuf) -> Self {
        FilterConfig {
            output_dir,
            ..Default::default()
        }
    }

    pub fn trim_timestamp(&self) -> Option<TimestampTrim> {
        self.trim_timestamp
    }

    pub fn trim_instr(&self) -> Option<InstrTrim> {
        self.trim_instr
    }

    /// Configures mode-A (timestamp-range) trimming. Rejects an inverted
    /// range and rejects configuring both trim modes at once.
    pub fn set_trim_timestamp(&mut self, before: u64, after: u64) -> FilterResult<()> {
        if self.trim_instr.is_some() {
            return Err(FilterError::configuration(
                "trim_before_timestamp/trim_after_timestamp cannot be combined with trim_before_instr/trim_after_instr",
            ));
        }
        if after <= before {
            return Err(FilterError::configuration(format!(
                "trim_after_timestamp ({after}) must be greater than trim_before_timestamp ({before})"
            )));
        }
        self.trim_timestamp = Some(TimestampTrim { before, after });
        Ok(())
    }

    /// Configures mode-B (instruction-ordinal-range) trimming. Same
    /// exclusivity and ordering rules as `set_trim_timestamp`.
    pub fn set_trim_instr(&mut self, before: u64, after: u64) -> FilterResult<()> {
        if self.trim_timestamp.is_some() {
            return Err(FilterError::configuration(
                "trim_before_instr/trim_after_instr cannot be combined with trim_before_timestamp/trim_after_timestamp",
            ));
        }
        if after <= before {
            return Err(FilterError::configuration(format!(
                "trim_after_instr ({after}) must be greater than trim_before_instr ({before})"
            )));
        }
        self.trim_instr = Some(InstrTrim { before, after });
        Ok(())
    }

    /// `cache_filter_size` must be positive to enable the cache filter.
    pub fn set_cache_filter_size(&mut self, size: usize) -> FilterResult<()> {
        if size == 0 {
            return Err(FilterError::configuration(
                "cache_filter_size must be positive to enable the cache filter",
            ));
        }
        self.cache_filter_size = size;
        Ok(())
    }

    /// Cross-field check run once at driver startup, after all setters have
    /// run. Catches the one configuration combination no single setter can
    /// reject in isolation: removing PHYSICAL_ADDRESS(_NOT_AVAILABLE)
    /// markers is unsupported in archive mode (§9's open question, left
    /// unresolved in behavior per the source's "do not guess" note), and
    /// core-sharded traces are the ones that end up archived in practice —
    /// see DESIGN.md for the full rationale.
    pub fn validate(&self) -> FilterResult<()> {
        if self.shard_by == ShardBy::Core {
            let removes_physical_address = self
                .remove_marker_types
                .iter()
                .any(|&m| m == MarkerKind::PhysicalAddress as u16 || m == MarkerKind::PhysicalAddressNotAvailable as u16);
            if removes_physical_address {
                return Err(FilterError::configuration(
                    "removing PHYSICAL_ADDRESS/PHYSICAL_ADDRESS_NOT_AVAILABLE markers is not supported for core-sharded (archive) output",
                ));
            }
        }
        Ok(())
    }

    /// Flat `(marker_type, new_value)*` list; must be non-empty and even in
    /// length.
    pub fn set_modify_marker_value(&mut self, flat: Vec<u64>) -> FilterResult<()> {
        if flat.is_empty() || flat.len() % 2 != 0 {
            return Err(FilterError::configuration(
                "modify_marker_value must be a non-empty, even-length list of (marker_type, value) pairs",
            ));
        }
        let mut pairs = Vec::with_capacity(flat.len() / 2);
        for chunk in flat.chunks_exact(2) {
            let marker_type = chunk[0] as u16;
            if MarkerKind::from_u16(marker_type).is_none() {
                return Err(FilterError::configuration(format!(
                    "unrecognized marker type code {marker_type} in modify_marker_value"
                )));
            }
            pairs.push((marker_type, chunk[1]));
        }
        self.modify_marker_value = pairs;
        Ok(())
    }
}

/// Parses a decimal or `0x`-prefixed hex u64.
pub fn parse_u64(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u64>().ok()
    }
}

/// Parses a comma-separated list of decimal-or-hex u64 values.
pub fn parse_u64_list(s: &str) -> Option<Vec<u64>> {
    if s.trim().is_empty() {
        return Some(Vec::new());
    }
    s.split(',').map(|part| parse_u64(part.trim())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_u64_accepts_decimal_and_hex() {
        assert_eq!(parse_u64("42"), Some(42));
        assert_eq!(parse_u64("0x2a"), Some(42));
        assert_eq!(parse_u64("0X2A"), Some(42));
        assert_eq!(parse_u64("nope"), None);
    }

    #[test]
    fn parse_u64_list_splits_on_comma() {
        assert_eq!(parse_u64_list("1,0x2,3"), Some(vec![1, 2, 3]));
        assert_eq!(parse_u64_list(""), Some(vec![]));
        assert_eq!(parse_u64_list("1,,3"), None);
    }

    #[test]
    fn trim_modes_are_mutually_exclusive() {
        let mut cfg = FilterConfig::new(PathBuf::from("/tmp"));
        cfg.set_trim_timestamp(10, 20).unwrap();
        assert!(cfg.set_trim_instr(1, 2).is_err());
    }

    #[test]
    fn trim_rejects_inverted_range() {
        let mut cfg = FilterConfig::new(PathBuf::from("/tmp"));
        assert!(cfg.set_trim_timestamp(20, 10).is_err());
        assert!(cfg.set_trim_timestamp(20, 20).is_err());
    }

    #[test]
    fn modify_marker_value_requires_even_nonempty_list() {
        let mut cfg = FilterConfig::new(PathBuf::from("/tmp"));
        assert!(cfg.set_modify_marker_value(vec![]).is_err());
        assert!(cfg.set_modify_marker_value(vec![1]).is_err());
        assert!(cfg
            .set_modify_marker_value(vec![MarkerKind::CpuId as u64, 0xffff])
            .is_ok());
    }

    #[test]
    fn cache_filter_size_must_be_positive() {
        let mut cfg = FilterConfig::new(PathBuf::from("/tmp"));
        assert!(cfg.set_cache_filter_size(0).is_err());
        assert!(cfg.set_cache_filter_size(64 * 1024).is_ok());
    }

    #[test]
    fn validate_rejects_physical_address_removal_on_core_sharded() {
        let mut cfg = FilterConfig::new(PathBuf::from("/tmp"));
        cfg.shard_by = ShardBy::Core;
        cfg.remove_marker_types = vec![MarkerKind::PhysicalAddress as u16];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_allows_physical_address_removal_on_thread_sharded() {
        let mut cfg = FilterConfig::new(PathBuf::from("/tmp"));
        cfg.remove_marker_types = vec![MarkerKind::PhysicalAddress as u16];
        assert!(cfg.validate().is_ok());
    }
}
