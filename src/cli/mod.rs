//! Command line front end (§6b, C8): a single `clap`-derive argument module.

pub mod args;

pub use args::{build_config, parse_args, try_parse_args, Cli, ShardByArg};
