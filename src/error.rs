//! Library-facing error type.
//!
//! A plain enum, one variant per error *category* rather than per condition,
//! manual `Display` + `std::error::Error`, no `thiserror`. The four
//! categories: configuration problems caught at filter/config construction
//! time, stream I/O failures, trace-grammar violations discovered mid-shard,
//! and filter-internal (decoder/encoder) failures.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    Configuration(String),
    Stream(String),
    Grammar(String),
    FilterInternal(String),
}

impl FilterError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        FilterError::Configuration(msg.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        FilterError::Stream(msg.into())
    }

    pub fn grammar(msg: impl Into<String>) -> Self {
        FilterError::Grammar(msg.into())
    }

    pub fn filter_internal(msg: impl Into<String>) -> Self {
        FilterError::FilterInternal(msg.into())
    }

    /// Short category name, used in diagnostics naming the shard/entry index.
    pub fn kind(&self) -> &'static str {
        match self {
            FilterError::Configuration(_) => "configuration",
            FilterError::Stream(_) => "stream",
            FilterError::Grammar(_) => "grammar",
            FilterError::FilterInternal(_) => "filter-internal",
        }
    }

    fn message(&self) -> &str {
        match self {
            FilterError::Configuration(m)
            | FilterError::Stream(m)
            | FilterError::Grammar(m)
            | FilterError::FilterInternal(m) => m,
        }
    }
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}

impl std::error::Error for FilterError {}

pub type FilterResult<T> = Result<T, FilterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let e = FilterError::grammar("missing encoding for pc 0x1000");
        assert_eq!(e.to_string(), "grammar: missing encoding for pc 0x1000");
    }

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(FilterError::configuration("x").kind(), "configuration");
        assert_eq!(FilterError::stream("x").kind(), "stream");
        assert_eq!(FilterError::grammar("x").kind(), "grammar");
        assert_eq!(FilterError::filter_internal("x").kind(), "filter-internal");
    }
}
