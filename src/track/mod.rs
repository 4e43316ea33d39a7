//! [`Track`]: an ordered, delta-timed event list with a stateful cursor.
//!
//! Grounded on `examples/original_source/track.h`'s `struct seqev`/`struct
//! track` (an intrusive doubly-linked list terminated by an embedded `eot`
//! sentinel). Intrusive linked lists keyed by embedded struct name don't
//! translate directly, so nodes live in a private [`Arena`] and are
//! addressed by [`Handle`] instead of raw pointers, so a stale cursor can
//! never dangle or alias a freed node.

pub mod frame;
pub mod seqptr;
pub mod state;

use crate::event::Event;
use crate::pool::{Arena, Handle};

/// One `(delta, ev)` record plus its intrusive list links.
///
/// `delta` is ticks elapsed since the previous record; the first node's
/// `delta` is ticks since the start of the track.
#[derive(Debug, Clone)]
pub(crate) struct SeqEvNode {
    pub delta: u32,
    pub ev: Event,
    pub next: Option<Handle<SeqEvNode>>,
    pub prev: Option<Handle<SeqEvNode>>,
}

/// Default arena capacity for a single track's event pool. Unlike the
/// original's single process-wide `seqev_pool` (`DEFAULT_MAXNSEQEVS =
/// 100000` shared by every track), each [`Track`] gets its own arena so
/// tracks can be created and dropped independently; this constant only
/// bounds a single track's own event count.
pub const DEFAULT_TRACK_CAPACITY: usize = 100_000;

/// An ordered sequence of timed events, terminated by an implicit
/// end-of-track sentinel.
///
/// Invariants (checked by [`Track::check_invariants`] in tests, and by
/// construction in every mutating method):
/// - deltas are non-negative (they're `u32`, so this is definitional);
/// - the sentinel has no successor;
/// - `sum(deltas) == duration_ticks()`.
pub struct Track {
    arena: Arena<SeqEvNode>,
    head: Option<Handle<SeqEvNode>>,
    tail: Option<Handle<SeqEvNode>>,
    /// Ticks from the last real event (or from the start, if empty) to the
    /// end-of-track sentinel. Mirrors the original's `eot.delta`.
    eot_delta: u32,
}

impl Track {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TRACK_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Track {
            arena: Arena::with_capacity(capacity),
            head: None,
            tail: None,
            eot_delta: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn num_events(&self) -> usize {
        self.arena.len()
    }

    /// Total duration in ticks: sum of every stored delta, including the
    /// trailing blank space before the end-of-track sentinel.
    pub fn duration_ticks(&self) -> u64 {
        let mut total = self.eot_delta as u64;
        let mut cur = self.head;
        while let Some(h) = cur {
            let node = self.node(h);
            total += node.delta as u64;
            cur = node.next;
        }
        total
    }

    pub fn clear(&mut self) {
        self.arena = Arena::with_capacity(self.arena.capacity());
        self.head = None;
        self.tail = None;
        self.eot_delta = 0;
    }

    /// Appends `(delta, ev)` at the end of the track, consuming ticks from
    /// the trailing blank space first (mirrors `track_chomp`/append
    /// behavior in the original: appending never changes total duration
    /// unless the append needs more room than `eot_delta` provides).
    pub fn push_back(&mut self, delta: u32, ev: Event) {
        let room = self.eot_delta.min(delta);
        self.eot_delta -= room;
        let remaining = delta - room;
        let handle = self.arena.alloc(SeqEvNode {
            delta: remaining,
            ev,
            next: None,
            prev: self.tail,
        });
        match self.tail {
            Some(t) => self.node_mut(t).next = Some(handle),
            None => self.head = Some(handle),
        }
        self.tail = Some(handle);
    }

    /// Appends `n` ticks of blank space at the end of the track.
    pub fn push_blank(&mut self, n: u32) {
        self.eot_delta += n;
    }

    pub(crate) fn node(&self, h: Handle<SeqEvNode>) -> &SeqEvNode {
        self.arena
            .get(h)
            .expect("seqcore: stale SeqEvNode handle")
    }

    pub(crate) fn node_mut(&mut self, h: Handle<SeqEvNode>) -> &mut SeqEvNode {
        self.arena
            .get_mut(h)
            .expect("seqcore: stale SeqEvNode handle")
    }

    pub(crate) fn head(&self) -> Option<Handle<SeqEvNode>> {
        self.head
    }

    pub(crate) fn eot_delta(&self) -> u32 {
        self.eot_delta
    }

    pub(crate) fn set_eot_delta(&mut self, v: u32) {
        self.eot_delta = v;
    }

    /// Inserts a new node holding `(delta, ev)` immediately before `before`
    /// (or at the tail, if `before` is `None`), splitting `before`'s delta
    /// isn't performed here — callers are responsible for tick bookkeeping
    /// (see [`seqptr::SeqPtr`] operations, which are the only sanctioned
    /// way to mutate a track mid-stream).
    pub(crate) fn insert_before(
        &mut self,
        before: Option<Handle<SeqEvNode>>,
        delta: u32,
        ev: Event,
    ) -> Handle<SeqEvNode> {
        let prev = match before {
            Some(b) => self.node(b).prev,
            None => self.tail,
        };
        let handle = self.arena.alloc(SeqEvNode {
            delta,
            ev,
            next: before,
            prev,
        });
        match prev {
            Some(p) => self.node_mut(p).next = Some(handle),
            None => self.head = Some(handle),
        }
        match before {
            Some(b) => self.node_mut(b).prev = Some(handle),
            None => self.tail = Some(handle),
        }
        handle
    }

    /// Removes `handle` from the list, folding its delta into the
    /// following node (or into `eot_delta`, if it was the tail), and
    /// returns the event that was stored there.
    pub(crate) fn remove(&mut self, handle: Handle<SeqEvNode>) -> Event {
        let node = self.node(handle);
        let (prev, next, delta, ev) = (node.prev, node.next, node.delta, node.ev);
        match next {
            Some(n) => self.node_mut(n).delta += delta,
            None => self.eot_delta += delta,
        }
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        self.arena.free(handle);
        ev
    }

    /// Iterates `(absolute_tick, &Event)` pairs in order. Useful for tests
    /// and for the SMF/save-load contracts this crate exposes but doesn't
    /// implement.
    pub fn iter(&self) -> TrackIter<'_> {
        TrackIter {
            track: self,
            cur: self.head,
            tic: 0,
        }
    }

    /// Counts events matching `spec` (the original's `track_evcnt`, used by
    /// the command layer for `?`-style queries).
    pub fn count_matching(&self, spec: &crate::event::spec::EvSpec) -> usize {
        self.iter().filter(|(_, ev)| spec.matches(ev)).count()
    }

    /// Remaps every voice event's (dev, ch) pair to `(dev, ch)`, leaving
    /// non-voice events untouched (the original's `track_chanmap` /
    /// `track_opsetchan`, folded into one operation here since the
    /// original's byte-map variant served only the text command layer).
    pub fn remap_channel(&mut self, dev: u16, ch: u16) {
        let mut cur = self.head;
        while let Some(h) = cur {
            let node = self.node_mut(h);
            if node.ev.is_voice() {
                node.ev.dev = dev;
                node.ev.ch = ch;
            }
            cur = self.node(h).next;
        }
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let mut cur = self.head;
        let mut sum: u64 = 0;
        while let Some(h) = cur {
            let node = self.node(h);
            sum += node.delta as u64;
            if let Some(p) = node.prev {
                assert_eq!(self.node(p).next, Some(h));
            } else {
                assert_eq!(self.head, Some(h));
            }
            cur = node.next;
        }
        sum += self.eot_delta as u64;
        assert_eq!(sum, self.duration_ticks());
    }
}

impl Default for Track {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward iterator produced by [`Track::iter`].
pub struct TrackIter<'a> {
    track: &'a Track,
    cur: Option<Handle<SeqEvNode>>,
    tic: u64,
}

impl<'a> Iterator for TrackIter<'a> {
    type Item = (u64, &'a Event);

    fn next(&mut self) -> Option<Self::Item> {
        let h = self.cur?;
        let node = self.track.node(h);
        self.tic += node.delta as u64;
        self.cur = node.next;
        Some((self.tic, &node.ev))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Cmd;

    fn ev(cmd: Cmd, v0: u16, v1: u16) -> Event {
        Event::new(cmd, 0, 0, v0, v1)
    }

    #[test]
    fn push_back_and_iterate() {
        let mut t = Track::new();
        t.push_back(10, ev(Cmd::Non, 60, 100));
        t.push_back(5, ev(Cmd::Noff, 60, 64));
        t.check_invariants();

        let evs: Vec<_> = t.iter().map(|(tic, e)| (tic, e.cmd)).collect();
        assert_eq!(evs, vec![(10, Cmd::Non), (15, Cmd::Noff)]);
        assert_eq!(t.duration_ticks(), 15);
    }

    #[test]
    fn push_blank_extends_duration_without_events() {
        let mut t = Track::new();
        t.push_back(10, ev(Cmd::Non, 60, 100));
        t.push_blank(20);
        assert_eq!(t.duration_ticks(), 30);
        assert_eq!(t.num_events(), 1);
    }

    #[test]
    fn remove_folds_delta_into_successor() {
        let mut t = Track::new();
        t.push_back(10, ev(Cmd::Non, 60, 100));
        t.push_back(5, ev(Cmd::Noff, 60, 64));
        let h = t.head().unwrap();
        t.remove(h);
        t.check_invariants();
        assert_eq!(t.duration_ticks(), 15);
        assert_eq!(t.num_events(), 1);
    }
}
