//! Binary entry point: parses the command line, builds and validates a
//! [`drfilter::FilterConfig`], and runs the shard pipeline over a trace
//! directory.
//!
//! Parse, validate, dispatch, map the result to a process exit code —
//! here the single "operation" is always "filter".

use std::process::ExitCode;

use drfilter::cli::parse_args;
use drfilter::driver;

fn main() -> ExitCode {
    let args: Vec<_> = std::env::args_os().collect();
    let (cli, cfg) = match parse_args(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("drfilter: {e}");
            return ExitCode::FAILURE;
        }
    };

    match driver::run(&cfg, &cli.trace_dir) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("drfilter: {e}");
            ExitCode::FAILURE
        }
    }
}
