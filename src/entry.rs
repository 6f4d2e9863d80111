//! Fixed-layout trace record ("entry") model and the stream contract every
//! filter and the shard driver build on.
//!
//! Each entry is a fixed 12-byte record: a 16-bit `kind`, a 16-bit `size`,
//! and a 64-bit `addr`. `size` and `addr` are reinterpreted depending on
//! `kind` — see the field docs below. ENCODING entries alias their payload
//! bytes over `addr`, mirroring the producer's C layout where `addr` and a
//! byte array share storage.

use std::io::{self, Read, Write};

/// Width, in bytes, of one entry on the wire: 2 (kind) + 2 (size) + 8 (addr).
pub const ENTRY_STRIDE: usize = 12;

/// Record/entry kind tag. Instruction subkinds are distinct variants so a
/// caller can tell a syscall boundary from a plain instruction without a
/// second field, matching the producer's encoding of "kind" as itself
/// carrying the instruction flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EntryKind {
    Header = 0,
    Footer = 1,
    Thread = 2,
    Pid = 3,
    ThreadExit = 4,
    Instr = 5,
    InstrBundle = 6,
    InstrDirectCall = 7,
    InstrIndirectCall = 8,
    InstrDirectJump = 9,
    InstrIndirectJump = 10,
    InstrReturn = 11,
    InstrSyscall = 12,
    Read = 13,
    Write = 14,
    Prefetch = 15,
    Encoding = 16,
    Marker = 17,
}

impl EntryKind {
    fn from_u16(v: u16) -> Option<Self> {
        use EntryKind::*;
        Some(match v {
            0 => Header,
            1 => Footer,
            2 => Thread,
            3 => Pid,
            4 => ThreadExit,
            5 => Instr,
            6 => InstrBundle,
            7 => InstrDirectCall,
            8 => InstrIndirectCall,
            9 => InstrDirectJump,
            10 => InstrIndirectJump,
            11 => InstrReturn,
            12 => InstrSyscall,
            13 => Read,
            14 => Write,
            15 => Prefetch,
            16 => Encoding,
            17 => Marker,
            _ => return None,
        })
    }
}

/// Returns true if `kind` denotes any instruction-fetch subkind.
pub fn is_instr(kind: EntryKind) -> bool {
    matches!(
        kind,
        EntryKind::Instr
            | EntryKind::InstrBundle
            | EntryKind::InstrDirectCall
            | EntryKind::InstrIndirectCall
            | EntryKind::InstrDirectJump
            | EntryKind::InstrIndirectJump
            | EntryKind::InstrReturn
            | EntryKind::InstrSyscall
    )
}

/// Returns true if `kind` denotes a data memory access (read, write, or
/// prefetch).
pub fn is_memory_access(kind: EntryKind) -> bool {
    matches!(kind, EntryKind::Read | EntryKind::Write | EntryKind::Prefetch)
}

/// Marker sub-type, stored in `Entry::size` when `kind == Marker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MarkerKind {
    Timestamp = 0,
    CpuId = 1,
    Version = 2,
    Filetype = 3,
    FuncId = 4,
    FuncArg = 5,
    FuncRetval = 6,
    FuncRetaddr = 7,
    ChunkInstrCount = 8,
    ChunkFooter = 9,
    RecordOrdinal = 10,
    PageSize = 11,
    CacheLineSize = 12,
    WindowId = 13,
    CoreWait = 14,
    CoreIdle = 15,
    PhysicalAddress = 16,
    PhysicalAddressNotAvailable = 17,
    FilterEndpoint = 18,
    BranchTarget = 19,
}

impl MarkerKind {
    pub fn from_u16(v: u16) -> Option<Self> {
        use MarkerKind::*;
        Some(match v {
            0 => Timestamp,
            1 => CpuId,
            2 => Version,
            3 => Filetype,
            4 => FuncId,
            5 => FuncArg,
            6 => FuncRetval,
            7 => FuncRetaddr,
            8 => ChunkInstrCount,
            9 => ChunkFooter,
            10 => RecordOrdinal,
            11 => PageSize,
            12 => CacheLineSize,
            13 => WindowId,
            14 => CoreWait,
            15 => CoreIdle,
            16 => PhysicalAddress,
            17 => PhysicalAddressNotAvailable,
            18 => FilterEndpoint,
            19 => BranchTarget,
            _ => return None,
        })
    }
}

/// File-type bit flags, as carried in a FILETYPE marker's `addr`.
/// Hand-rolled constants rather than a bitflags dependency, in the
/// plain-integer-as-flags style used elsewhere in this crate.
pub mod filetype {
    pub const ENCODINGS: u64 = 1 << 0;
    pub const ARCH_X86_64: u64 = 1 << 1;
    pub const ARCH_AARCH64: u64 = 1 << 2;
    pub const ARCH_REGDEPS: u64 = 1 << 3;
    pub const DFILTERED: u64 = 1 << 4;
    pub const IFILTERED: u64 = 1 << 5;
    pub const BIMODAL_FILTERED_WARMUP: u64 = 1 << 6;
    pub const CORE_SHARDED: u64 = 1 << 7;
    pub const SYSCALL: u64 = 1 << 8;
    pub const BLOCKING: u64 = 1 << 9;

    pub const ARCH_MASK: u64 = ARCH_X86_64 | ARCH_AARCH64 | ARCH_REGDEPS;
}

/// One fixed-size trace record.
///
/// `encoding` is not a separate field in the wire layout: when
/// `kind == Encoding`, the instruction bytes are the low `size` bytes of
/// `addr` (little-endian), matching the producer's overlay of the byte
/// payload onto the pointer-sized `addr` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub kind: EntryKind,
    pub size: u16,
    pub addr: u64,
}

impl Entry {
    pub fn new(kind: EntryKind, size: u16, addr: u64) -> Self {
        Entry { kind, size, addr }
    }

    pub fn marker(kind: MarkerKind, value: u64) -> Self {
        Entry { kind: EntryKind::Marker, size: kind as u16, addr: value }
    }

    pub fn marker_kind(&self) -> Option<MarkerKind> {
        if self.kind == EntryKind::Marker {
            MarkerKind::from_u16(self.size)
        } else {
            None
        }
    }

    /// Bytes carried by an ENCODING entry: the low `size` bytes of `addr`.
    pub fn encoding_payload(&self) -> Vec<u8> {
        debug_assert_eq!(self.kind, EntryKind::Encoding);
        let n = (self.size as usize).min(8);
        self.addr.to_le_bytes()[..n].to_vec()
    }

    pub fn from_encoding_bytes(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() <= 8);
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        Entry { kind: EntryKind::Encoding, size: bytes.len() as u16, addr: u64::from_le_bytes(buf) }
    }

    /// Visible-record reference count contributed by this entry (0 or 1),
    /// per the trace grammar's "refs" rule.
    pub fn ref_count(&self) -> u64 {
        if let Some(mk) = self.marker_kind() {
            use MarkerKind::*;
            match mk {
                CpuId | BranchTarget | WindowId | ChunkInstrCount | ChunkFooter | RecordOrdinal
                | CoreWait => 0,
                _ => 1,
            }
        } else {
            1
        }
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Option<Entry>> {
        let mut buf = [0u8; ENTRY_STRIDE];
        let mut read = 0usize;
        while read < ENTRY_STRIDE {
            let n = r.read(&mut buf[read..])?;
            if n == 0 {
                if read == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("short entry read: got {read} of {ENTRY_STRIDE} bytes"),
                ));
            }
            read += n;
        }
        Entry::decode(&buf).map(Some).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "unrecognized entry kind tag")
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.encode())
    }

    pub fn encode(&self) -> [u8; ENTRY_STRIDE] {
        let mut buf = [0u8; ENTRY_STRIDE];
        buf[0..2].copy_from_slice(&(self.kind as u16).to_le_bytes());
        buf[2..4].copy_from_slice(&self.size.to_le_bytes());
        buf[4..12].copy_from_slice(&self.addr.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; ENTRY_STRIDE]) -> Option<Entry> {
        let kind = EntryKind::from_u16(u16::from_le_bytes([buf[0], buf[1]]))?;
        let size = u16::from_le_bytes([buf[2], buf[3]]);
        let addr = u64::from_le_bytes(buf[4..12].try_into().unwrap());
        Some(Entry { kind, size, addr })
    }

    /// Decodes a full buffer of entries, failing if its length is not a
    /// multiple of `ENTRY_STRIDE` (the fatal "misaligned stream" case).
    pub fn decode_all(bytes: &[u8]) -> Option<Vec<Entry>> {
        if bytes.len() % ENTRY_STRIDE != 0 {
            return None;
        }
        bytes
            .chunks_exact(ENTRY_STRIDE)
            .map(|c| Entry::decode(c.try_into().unwrap()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_plain_entry() {
        let e = Entry::new(EntryKind::Instr, 4, 0x1000);
        let buf = e.encode();
        assert_eq!(Entry::decode(&buf), Some(e));
    }

    #[test]
    fn round_trip_marker() {
        let e = Entry::marker(MarkerKind::Timestamp, 12345);
        assert_eq!(e.marker_kind(), Some(MarkerKind::Timestamp));
        let buf = e.encode();
        assert_eq!(Entry::decode(&buf), Some(e));
    }

    #[test]
    fn encoding_round_trip() {
        let bytes = [0x48, 0x89, 0xe7];
        let e = Entry::from_encoding_bytes(&bytes);
        assert_eq!(e.encoding_payload(), bytes);
    }

    #[test]
    fn ref_count_rules() {
        assert_eq!(Entry::new(EntryKind::Instr, 4, 0).ref_count(), 1);
        assert_eq!(Entry::marker(MarkerKind::CpuId, 0).ref_count(), 0);
        assert_eq!(Entry::marker(MarkerKind::BranchTarget, 0).ref_count(), 0);
        assert_eq!(Entry::marker(MarkerKind::WindowId, 0).ref_count(), 0);
        assert_eq!(Entry::marker(MarkerKind::ChunkInstrCount, 0).ref_count(), 0);
        assert_eq!(Entry::marker(MarkerKind::ChunkFooter, 0).ref_count(), 0);
        assert_eq!(Entry::marker(MarkerKind::RecordOrdinal, 0).ref_count(), 0);
        assert_eq!(Entry::marker(MarkerKind::CoreWait, 0).ref_count(), 0);
        assert_eq!(Entry::marker(MarkerKind::Version, 0).ref_count(), 1);
    }

    #[test]
    fn is_instr_covers_all_instr_subkinds() {
        assert!(is_instr(EntryKind::Instr));
        assert!(is_instr(EntryKind::InstrSyscall));
        assert!(!is_instr(EntryKind::Read));
        assert!(!is_instr(EntryKind::Marker));
    }

    #[test]
    fn is_memory_access_covers_read_write_prefetch() {
        assert!(is_memory_access(EntryKind::Read));
        assert!(is_memory_access(EntryKind::Write));
        assert!(is_memory_access(EntryKind::Prefetch));
        assert!(!is_memory_access(EntryKind::Instr));
    }

    #[test]
    fn decode_all_rejects_misaligned_stream() {
        let bytes = vec![0u8; ENTRY_STRIDE + 1];
        assert!(Entry::decode_all(&bytes).is_none());
    }

    #[test]
    fn decode_all_round_trips_a_stream() {
        let entries = vec![
            Entry::new(EntryKind::Header, 0, 1),
            Entry::marker(MarkerKind::Version, 2),
            Entry::new(EntryKind::Footer, 0, 0),
        ];
        let mut bytes = Vec::new();
        for e in &entries {
            bytes.extend_from_slice(&e.encode());
        }
        assert_eq!(Entry::decode_all(&bytes), Some(entries));
    }

    #[test]
    fn read_from_reports_clean_eof_at_boundary() {
        let data: Vec<u8> = Vec::new();
        let mut cursor = std::io::Cursor::new(data);
        assert_eq!(Entry::read_from(&mut cursor).unwrap(), None);
    }

    #[test]
    fn read_from_reports_error_on_short_trailing_read() {
        let mut cursor = std::io::Cursor::new(vec![0u8; 5]);
        assert!(Entry::read_from(&mut cursor).is_err());
    }
}
