//! Default worker-count detection for the shard pool.
//!
//! Prefers `num_cpus::get_physical()`, falling back to
//! `util::cores::count_cores` when physical-core detection is unavailable.

/// Returns a sensible default shard-worker count: the number of physical
/// cores, falling back to the logical-core count, never less than 1.
pub fn default_worker_count() -> usize {
    let physical = num_cpus::get_physical();
    if physical > 0 {
        physical
    } else {
        super::cores::count_cores()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_worker_count_is_at_least_one() {
        assert!(default_worker_count() >= 1);
    }
}
