//! Synthetic trace-entry generator honoring the recorded-trace grammar.
//!
//! On-demand generation of well-formed test input, used by seed-scenario
//! fixtures, property-style tests, and the integration tests under `e2e/`.

use crate::entry::{filetype, Entry, EntryKind, MarkerKind};

/// Builds a single well-formed shard body: HEADER preamble through FOOTER,
/// honoring rule 1 of the trace grammar. Callers add unit bodies via
/// [`SynthTrace::unit`] between the preamble and the trailer.
pub struct SynthTrace {
    entries: Vec<Entry>,
    chunked: bool,
}

impl SynthTrace {
    /// `filetype` is the bitmask written into the FILETYPE marker; `tid`/`pid`
    /// populate the THREAD/PID entries.
    pub fn new(filetype: u64, tid: u64, pid: u64) -> Self {
        let entries = vec![
            Entry::new(EntryKind::Header, 0, 0),
            Entry::marker(MarkerKind::Version, 4),
            Entry::marker(MarkerKind::Filetype, filetype),
            Entry::new(EntryKind::Thread, 0, tid),
            Entry::new(EntryKind::Pid, 0, pid),
            Entry::marker(MarkerKind::CacheLineSize, 64),
        ];
        SynthTrace { entries, chunked: false }
    }

    /// Declares the output as an archive with `count`-instruction chunks
    /// (rule 1's "optionally a CHUNK_INSTR_COUNT marker").
    pub fn chunked(mut self, count: u64) -> Self {
        self.entries.push(Entry::marker(MarkerKind::ChunkInstrCount, count));
        self.chunked = true;
        self
    }

    /// Opens a unit: a TIMESTAMP marker followed by a CPU_ID marker (rule 2).
    pub fn unit(mut self, timestamp: u64, cpu_id: u64) -> Self {
        self.entries.push(Entry::marker(MarkerKind::Timestamp, timestamp));
        self.entries.push(Entry::marker(MarkerKind::CpuId, cpu_id));
        self
    }

    /// Appends one or more ENCODING entries (8 bytes max each) immediately
    /// followed by the INSTR they describe (rule 3).
    pub fn instr_with_encoding(mut self, pc: u64, bytes: &[u8]) -> Self {
        for chunk in bytes.chunks(8) {
            self.entries.push(Entry::from_encoding_bytes(chunk));
        }
        self.entries.push(Entry::new(EntryKind::Instr, bytes.len() as u16, pc));
        self
    }

    /// A bare instruction entry with no preceding encoding (legal when the
    /// file-type lacks ENCODINGS, or when the PC already appeared earlier
    /// in the chunk).
    pub fn instr(mut self, pc: u64, size: u16) -> Self {
        self.entries.push(Entry::new(EntryKind::Instr, size, pc));
        self
    }

    pub fn memory(mut self, kind: EntryKind, addr: u64, size: u16) -> Self {
        debug_assert!(crate::entry::is_memory_access(kind));
        self.entries.push(Entry::new(kind, size, addr));
        self
    }

    pub fn marker(mut self, kind: MarkerKind, value: u64) -> Self {
        self.entries.push(Entry::marker(kind, value));
        self
    }

    /// Appends THREAD_EXIT and FOOTER and returns the finished entry list.
    pub fn build(mut self) -> Vec<Entry> {
        self.entries.push(Entry::new(EntryKind::ThreadExit, 0, 0));
        self.entries.push(Entry::new(EntryKind::Footer, 0, 0));
        self.entries
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }
}

/// Minimal deterministic PRNG (xorshift64*) for bounded-random property
/// tests — no external `rand` dependency; std suffices here.
pub struct Xorshift64(u64);

impl Xorshift64 {
    pub fn new(seed: u64) -> Self {
        Xorshift64(seed | 1)
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    pub fn next_below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            0
        } else {
            self.next_u64() % bound
        }
    }
}

/// Builds a bounded-random, grammar-valid single-unit shard with
/// `num_instrs` instructions (each with its own one-word encoding), honoring
/// the trace grammar of §3 — used by property tests P1/P3/P4 that need
/// varied-but-valid input rather than one fixed fixture.
pub fn random_valid_trace(seed: u64, num_instrs: usize) -> Vec<Entry> {
    let mut rng = Xorshift64::new(seed);
    let ft = filetype::ENCODINGS | filetype::ARCH_X86_64;
    let mut trace = SynthTrace::new(ft, 1, 100).unit(1000, 0);
    for i in 0..num_instrs {
        let pc = 0x1000 + (i as u64) * 4;
        let byte = (rng.next_below(256)) as u8;
        trace = trace.instr_with_encoding(pc, &[byte, byte.wrapping_add(1), byte.wrapping_add(2)]);
        if rng.next_below(2) == 0 {
            let addr = 0x7000_0000 + rng.next_below(4096);
            trace = trace.memory(EntryKind::Read, addr, 8);
        }
    }
    trace.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_header_before_footer() {
        let entries = SynthTrace::new(filetype::ENCODINGS, 1, 2)
            .unit(10, 0)
            .instr_with_encoding(0x1000, &[0x90])
            .build();
        assert_eq!(entries.first().unwrap().kind, EntryKind::Header);
        assert_eq!(entries.last().unwrap().kind, EntryKind::Footer);
        assert_eq!(entries[entries.len() - 2].kind, EntryKind::ThreadExit);
    }

    #[test]
    fn instr_with_encoding_splits_into_8_byte_records() {
        let entries = SynthTrace::new(0, 1, 2)
            .unit(1, 0)
            .instr_with_encoding(0x2000, &[0u8; 10])
            .build();
        let encodings: Vec<_> = entries.iter().filter(|e| e.kind == EntryKind::Encoding).collect();
        assert_eq!(encodings.len(), 2);
        assert_eq!(encodings[0].size, 8);
        assert_eq!(encodings[1].size, 2);
    }

    #[test]
    fn random_valid_trace_is_deterministic_per_seed() {
        let a = random_valid_trace(42, 20);
        let b = random_valid_trace(42, 20);
        assert_eq!(a, b);
        let c = random_valid_trace(43, 20);
        assert_ne!(a, c);
    }
}
