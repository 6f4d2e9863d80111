//! Cross-cutting utility functions.
//!
//! Submodules:
//! - [`cores`]   — CPU core counting via [`std::thread::available_parallelism`]
//! - [`file_list`] — recursive directory expansion into a flat `Vec<PathBuf>`,
//!                   used to discover per-shard trace input files
//! - [`display`] — process-wide display-level atomic + `displaylevel!` macro
//! - [`workers`] — default shard-worker-count detection

pub mod cores;
pub mod display;
pub mod file_list;
pub mod workers;

pub use cores::count_cores;
pub use file_list::create_file_list;
