//! System-exclusive message storage and pattern matching.
//!
//! Grounded on `examples/original_source/sysex.h`'s `struct chunk { next;
//! used; data[CHUNK_SIZE]; }` / `struct sysex { next; unit; first; last; }`
//! — a sysex message is a chain of fixed-size byte chunks rather than one
//! growable buffer, presumably so the original's bounded chunk pool
//! (`chunk_pool`, `DEFAULT_MAXNCHUNKS = 4000`) could cap total sysex
//! memory independent of any single message's length. This crate keeps
//! that chunking (each [`SysEx`] owns a `Vec<Chunk>`) for the same reason:
//! a pathological multi-megabyte dump shouldn't let one track's sysex data
//! balloon past what the caller sized the arena for.

use crate::event::EV_UNDEF;

/// Matches `examples/original_source/sysex.h`'s `CHUNK_SIZE` (`0x100`).
pub const CHUNK_SIZE: usize = 0x100;

#[derive(Debug, Clone)]
struct Chunk {
    data: Vec<u8>,
}

impl Chunk {
    fn new() -> Self {
        Chunk {
            data: Vec::with_capacity(CHUNK_SIZE),
        }
    }
}

/// One complete system-exclusive message, `0xF0 ... 0xF7`, addressed to a
/// particular device unit.
#[derive(Debug, Clone)]
pub struct SysEx {
    pub unit: u16,
    chunks: Vec<Chunk>,
}

impl SysEx {
    pub fn new(unit: u16) -> Self {
        SysEx {
            unit,
            chunks: vec![Chunk::new()],
        }
    }

    /// Appends one byte, starting a new chunk once the current one is full
    /// (`sysex_add` in the original).
    pub fn push(&mut self, byte: u8) {
        let last = self.chunks.last_mut().expect("SysEx always has >=1 chunk");
        if last.data.len() == CHUNK_SIZE {
            self.chunks.push(Chunk::new());
        }
        self.chunks.last_mut().unwrap().data.push(byte);
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(|c| c.data.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The message as one contiguous buffer. Sysex messages are bounded in
    /// practice (a handful of kilobytes at most), so flattening on demand
    /// is simpler than threading chunk boundaries through every caller.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for c in &self.chunks {
            out.extend_from_slice(&c.data);
        }
        out
    }

    /// Checks well-formedness: starts with `0xF0`, ends with `0xF7`, and
    /// carries no stray status byte in between (`sysex_check`).
    pub fn is_well_formed(&self) -> bool {
        let b = self.bytes();
        if b.len() < 2 || b[0] != 0xF0 || b[b.len() - 1] != 0xF7 {
            return false;
        }
        b[1..b.len() - 1].iter().all(|byte| *byte < 0x80)
    }
}

/// A collection of sysex messages in arrival order (`struct sysexlist`).
#[derive(Debug, Clone, Default)]
pub struct SysExList {
    items: Vec<SysEx>,
}

impl SysExList {
    pub fn new() -> Self {
        SysExList::default()
    }

    pub fn put(&mut self, sx: SysEx) {
        self.items.push(sx);
    }

    pub fn get(&self, index: usize) -> Option<&SysEx> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SysEx> {
        self.items.iter()
    }
}

/// One position in a sysex match pattern: either a fixed byte the incoming
/// message must match exactly, or a wildcard that captures whatever byte
/// appears there (used to pull a bank/patch number embedded inside a
/// vendor dump, e.g. a GS/XG device-ID or checksum field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternByte {
    Fixed(u8),
    Wild,
}

/// A template for recognizing a family of sysex messages and extracting
/// the bytes that vary between instances — the "pattern" mechanism spec
/// §3.1 names as the `Pattern(u8)` event kind's source data, and spec
/// §4.6's "SysEx matching" operation.
#[derive(Debug, Clone)]
pub struct Pattern {
    bytes: Vec<PatternByte>,
}

impl Pattern {
    pub fn new(bytes: Vec<PatternByte>) -> Self {
        Pattern { bytes }
    }

    /// Matches `msg` against this pattern. On success, returns the bytes
    /// captured at each [`PatternByte::Wild`] position, in pattern order.
    pub fn matches(&self, msg: &[u8]) -> Option<Vec<u8>> {
        if msg.len() != self.bytes.len() {
            return None;
        }
        let mut captured = Vec::new();
        for (pat, byte) in self.bytes.iter().zip(msg.iter()) {
            match pat {
                PatternByte::Fixed(expected) => {
                    if expected != byte {
                        return None;
                    }
                }
                PatternByte::Wild => captured.push(*byte),
            }
        }
        Some(captured)
    }

    /// Rebuilds a concrete message from this pattern and a set of captured
    /// bytes, in the same order [`Self::matches`] would have produced
    /// them — the inverse operation, used when the engine re-emits a
    /// `Pattern` event as wire sysex bytes.
    pub fn instantiate(&self, captured: &[u8]) -> Vec<u8> {
        let mut captured = captured.iter().copied();
        self.bytes
            .iter()
            .map(|pat| match pat {
                PatternByte::Fixed(b) => *b,
                PatternByte::Wild => captured.next().unwrap_or(0),
            })
            .collect()
    }
}

/// A named bank of patterns, scanned in order; the first match wins
/// (the `PAT0..PATn` pattern table, one per [`Pattern`]).
#[derive(Debug, Clone, Default)]
pub struct PatternBank {
    patterns: Vec<Pattern>,
}

impl PatternBank {
    pub fn new() -> Self {
        PatternBank::default()
    }

    pub fn push(&mut self, pattern: Pattern) {
        self.patterns.push(pattern);
    }

    /// Returns `(pattern_index, captured_bytes)` for the first pattern
    /// that matches `msg`, or `None`.
    pub fn recognize(&self, msg: &[u8]) -> Option<(u8, Vec<u8>)> {
        for (i, pat) in self.patterns.iter().enumerate() {
            if let Some(captured) = pat.matches(msg) {
                return Some((i as u8, captured));
            }
        }
        None
    }

    /// `EV_UNDEF`-free accessor used by the command dispatcher to report a
    /// pattern's index back as a plain event parameter.
    pub fn index_of(&self, pattern: &Pattern) -> u16 {
        self.patterns
            .iter()
            .position(|p| std::ptr::eq(p, pattern))
            .map(|i| i as u16)
            .unwrap_or(EV_UNDEF)
    }
}

/// A named collection of sysex messages plus the bulk-scan operations the
/// command layer exposes over it (`blt_xrm`/`blt_xsetd` in
/// `examples/original_source/builtin.c`, both of which walk every message in
/// a `songsx` and act on the ones whose bytes match a caller-supplied
/// pattern). Distinct from [`PatternBank`], which recognizes *incoming*
/// wire messages against registered templates; a `SysExBank` holds messages
/// already stored in the song and is scanned by literal byte prefix.
#[derive(Debug, Clone, Default)]
pub struct SysExBank {
    pub messages: SysExList,
}

impl SysExBank {
    pub fn new() -> Self {
        SysExBank::default()
    }

    /// Indices of every stored message whose bytes start with `prefix`
    /// (`blt_xrm`'s match step, generalized from its full-list compare to a
    /// leading-bytes one so callers can scan by manufacturer ID / device ID
    /// without specifying an entire dump).
    pub fn find_matching_prefix(&self, prefix: &[u8]) -> Vec<usize> {
        self.messages
            .iter()
            .enumerate()
            .filter(|(_, sx)| sx.bytes().starts_with(prefix))
            .map(|(i, _)| i)
            .collect()
    }

    /// Removes every message matching `prefix`, returning how many were
    /// removed (`blt_xrm`).
    pub fn remove_matching_prefix(&mut self, prefix: &[u8]) -> usize {
        let before = self.messages.len();
        self.messages.items.retain(|sx| !sx.bytes().starts_with(prefix));
        before - self.messages.len()
    }

    /// Reassigns the destination unit of every message matching `prefix`
    /// (`blt_xsetd`).
    pub fn reassign_unit_matching_prefix(&mut self, prefix: &[u8], unit: u16) -> usize {
        let mut n = 0;
        for sx in self.messages.items.iter_mut() {
            if sx.bytes().starts_with(prefix) {
                sx.unit = unit;
                n += 1;
            }
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_splits_into_chunks_at_chunk_size() {
        let mut sx = SysEx::new(0);
        for _ in 0..(CHUNK_SIZE + 10) {
            sx.push(0x41);
        }
        assert_eq!(sx.len(), CHUNK_SIZE + 10);
        assert_eq!(sx.bytes().len(), CHUNK_SIZE + 10);
    }

    #[test]
    fn well_formed_requires_f0_prefix_and_f7_suffix() {
        let mut sx = SysEx::new(0);
        for b in [0xF0, 0x41, 0x10, 0xF7] {
            sx.push(b);
        }
        assert!(sx.is_well_formed());

        let mut bad = SysEx::new(0);
        bad.push(0x41);
        assert!(!bad.is_well_formed());
    }

    #[test]
    fn pattern_captures_wildcard_bytes() {
        let pattern = Pattern::new(vec![
            PatternByte::Fixed(0xF0),
            PatternByte::Fixed(0x43),
            PatternByte::Wild,
            PatternByte::Fixed(0xF7),
        ]);
        let captured = pattern.matches(&[0xF0, 0x43, 0x7F, 0xF7]).unwrap();
        assert_eq!(captured, vec![0x7F]);
        assert!(pattern.matches(&[0xF0, 0x44, 0x7F, 0xF7]).is_none());

        let rebuilt = pattern.instantiate(&captured);
        assert_eq!(rebuilt, vec![0xF0, 0x43, 0x7F, 0xF7]);
    }

    #[test]
    fn pattern_bank_returns_first_match() {
        let mut bank = PatternBank::new();
        bank.push(Pattern::new(vec![PatternByte::Fixed(0xF0), PatternByte::Fixed(0x41)]));
        bank.push(Pattern::new(vec![PatternByte::Fixed(0xF0), PatternByte::Fixed(0x43)]));
        let (idx, captured) = bank.recognize(&[0xF0, 0x43]).unwrap();
        assert_eq!(idx, 1);
        assert!(captured.is_empty());
    }

    fn sx(unit: u16, bytes: &[u8]) -> SysEx {
        let mut s = SysEx::new(unit);
        for b in bytes {
            s.push(*b);
        }
        s
    }

    #[test]
    fn find_matching_prefix_scans_by_leading_bytes() {
        let mut bank = SysExBank::new();
        bank.messages.put(sx(0, &[0xF0, 0x43, 0x10, 0xF7]));
        bank.messages.put(sx(0, &[0xF0, 0x41, 0x10, 0xF7]));
        let hits = bank.find_matching_prefix(&[0xF0, 0x43]);
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn remove_matching_prefix_drops_only_matches() {
        let mut bank = SysExBank::new();
        bank.messages.put(sx(0, &[0xF0, 0x43, 0xF7]));
        bank.messages.put(sx(0, &[0xF0, 0x41, 0xF7]));
        let removed = bank.remove_matching_prefix(&[0xF0, 0x43]);
        assert_eq!(removed, 1);
        assert_eq!(bank.messages.len(), 1);
    }

    #[test]
    fn reassign_unit_matching_prefix_updates_only_matches() {
        let mut bank = SysExBank::new();
        bank.messages.put(sx(0, &[0xF0, 0x43, 0xF7]));
        bank.messages.put(sx(0, &[0xF0, 0x41, 0xF7]));
        let n = bank.reassign_unit_matching_prefix(&[0xF0, 0x43], 2);
        assert_eq!(n, 1);
        assert_eq!(bank.messages.get(0).unwrap().unit, 2);
        assert_eq!(bank.messages.get(1).unwrap().unit, 0);
    }
}
