//! drfilter — a parallel, shard-oriented trace record filter for the
//! drmemtrace offline memory-trace format.
//!
//! Module map: [`entry`] is the on-disk record and the shared grammar
//! vocabulary; [`filter`] holds the `FilterFunc` trait and the six concrete
//! filters; [`shard`] drives one input stream through a filter pipeline;
//! [`chunk`] manages archive chunk boundaries; [`coordinator`] negotiates
//! cross-shard state (extension/version/filetype, per-input encodings);
//! [`schedule`] records the serial/per-CPU thread schedule; [`sink`] picks
//! and wraps the output writer; [`driver`] is the top-level orchestrator the
//! CLI calls into; [`config`] is the configuration surface; [`cli`] is the
//! `clap`-derived argument parser; [`synth`] builds synthetic traces for
//! tests; [`threadpool`] is the bounded worker pool shards run on.

pub mod chunk;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod entry;
pub mod error;
pub mod filter;
pub mod schedule;
pub mod shard;
pub mod sink;
pub mod synth;
pub mod threadpool;
pub mod util;

pub use config::{FilterConfig, ShardBy};
pub use error::{FilterError, FilterResult};
