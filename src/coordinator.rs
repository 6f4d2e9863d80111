//! Cross-shard coordinator (§4.6, C6): one-shot extension/version/file-type
//! negotiation plus per-input encoding maps shared across shards.
//!
//! One shared cell, written once by whichever shard has real input first,
//! every other shard blocking on a `Condvar` predicate until it is
//! populated — the same `Arc<(Mutex<...>, Condvar)>` shape as the thread
//! pool's completion signal, reused here at a finer grain.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use crate::entry::Entry;
use crate::error::{FilterError, FilterResult};

/// Extension/version/file-type agreed by the first shard with real input.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub extension: String,
    pub version: u64,
    pub filetype: u64,
}

/// Per-input encoding state: a `pc -> encoding records` map, so a chunk
/// boundary that needs an already-seen PC's bytes can recover them even
/// when that PC's instruction last appeared on a different shard.
#[derive(Default)]
pub struct InputState {
    pub pc2encoding: Mutex<HashMap<u64, Vec<Entry>>>,
}

pub struct Coordinator {
    cell: Mutex<Option<Negotiated>>,
    cvar: Condvar,
    inputs: Mutex<HashMap<i64, Arc<InputState>>>,
}

impl Coordinator {
    pub fn new() -> Self {
        Coordinator { cell: Mutex::new(None), cvar: Condvar::new(), inputs: Mutex::new(HashMap::new()) }
    }

    /// Called by a shard that owns a real input stream. The first caller's
    /// values win and are broadcast; later callers get back the already
    /// negotiated values regardless of what they pass (matching the
    /// producer's "first shard ready decides" rule).
    pub fn negotiate(&self, extension: &str, version: u64, filetype: u64) -> FilterResult<Negotiated> {
        if version == 0 {
            return Err(FilterError::configuration("trace version 0 is invalid"));
        }
        let mut guard = self.cell.lock().unwrap();
        if guard.is_none() {
            *guard = Some(Negotiated { extension: extension.to_string(), version, filetype });
            self.cvar.notify_all();
        }
        Ok(guard.clone().unwrap())
    }

    /// Called by a shard with no input of its own (e.g. an idle core-sharded
    /// shard). Blocks until another shard negotiates.
    pub fn wait_for_negotiation(&self) -> Negotiated {
        let mut guard = self.cell.lock().unwrap();
        while guard.is_none() {
            guard = self.cvar.wait(guard).unwrap();
        }
        guard.clone().unwrap()
    }

    /// Looks up (creating if absent) the shared encoding-state record for
    /// `input_id`. Each record has its own lock, so two shards on different
    /// inputs never contend beyond this lookup.
    pub fn input_state(&self, input_id: i64) -> Arc<InputState> {
        let mut inputs = self.inputs.lock().unwrap();
        inputs.entry(input_id).or_insert_with(|| Arc::new(InputState::default())).clone()
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Coordinator::new()
    }
}

/// Tracks a shard's current input/workload and rejects a workload change
/// mid-shard (§4.6's "multi-workload inputs are rejected" rule).
#[derive(Default)]
pub struct WorkloadGuard {
    current_workload: Option<i64>,
}

impl WorkloadGuard {
    pub fn new() -> Self {
        WorkloadGuard::default()
    }

    pub fn observe(&mut self, workload_id: i64) -> FilterResult<()> {
        if workload_id < 0 {
            return Ok(());
        }
        match self.current_workload {
            None => {
                self.current_workload = Some(workload_id);
                Ok(())
            }
            Some(prev) if prev == workload_id => Ok(()),
            Some(prev) => Err(FilterError::configuration(format!(
                "multi-workload inputs are not supported: previous workload_id = {prev}, current workload_id = {workload_id}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::thread;

    #[test]
    fn negotiate_rejects_version_zero() {
        let c = Coordinator::new();
        assert!(c.negotiate("trace", 0, 0).is_err());
    }

    #[test]
    fn first_negotiation_wins() {
        let c = Coordinator::new();
        let first = c.negotiate("trace", 4, 0b11).unwrap();
        let second = c.negotiate("other", 9, 0).unwrap();
        assert_eq!(first.extension, second.extension);
        assert_eq!(second.version, 4);
    }

    #[test]
    fn waiting_shard_observes_negotiation() {
        let c = StdArc::new(Coordinator::new());
        let c2 = c.clone();
        let handle = thread::spawn(move || c2.wait_for_negotiation());
        // Give the waiter a moment to block, then negotiate.
        thread::sleep(std::time::Duration::from_millis(20));
        c.negotiate("trace", 4, 7).unwrap();
        let got = handle.join().unwrap();
        assert_eq!(got.version, 4);
    }

    #[test]
    fn input_state_is_shared_by_id() {
        let c = Coordinator::new();
        let a = c.input_state(0);
        a.pc2encoding.lock().unwrap().insert(0x10, vec![]);
        let b = c.input_state(0);
        assert!(b.pc2encoding.lock().unwrap().contains_key(&0x10));
        let other = c.input_state(1);
        assert!(other.pc2encoding.lock().unwrap().is_empty());
    }

    #[test]
    fn workload_guard_rejects_mid_shard_change() {
        let mut g = WorkloadGuard::new();
        g.observe(0).unwrap();
        g.observe(0).unwrap();
        assert!(g.observe(1).is_err());
    }

    #[test]
    fn workload_guard_ignores_negative_ids() {
        let mut g = WorkloadGuard::new();
        g.observe(-1).unwrap();
        g.observe(-1).unwrap();
        g.observe(3).unwrap();
    }
}
