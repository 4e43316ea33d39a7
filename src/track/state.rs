//! [`State`]/[`StateList`]: per-cursor memory of the last value seen for
//! each "running context".
//!
//! Grounded on `frame.h`'s `struct seqptr { statelist; pos; delta; tic; }`:
//! every cursor over a track carries its own state list, not the track
//! itself, because two cursors walking the same track (e.g. the live
//! multiplexer's read cursor and an editor's preview cursor) can disagree
//! about which notes are currently sounding. The identity of a "running
//! context" is [`crate::event::ClassKey`] — same kind, same (dev, ch), same
//! identifying parameter.

use crate::event::{ClassKey, Event};

/// The lifecycle stage of a tracked class, used by merge and restore logic
/// to decide whether a new event for the same class is a fresh onset, an
/// update, or the final value before the cursor's traversal ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No prior event has been seen for this class at this cursor.
    First,
    /// A later event replacing an earlier one for the same class (e.g. a
    /// second `CTL` for the same controller number, or a bend update).
    Next,
    /// The terminal value recorded for this class: a note-off, or the
    /// last update seen before the cursor stopped advancing. This is what
    /// [`StateList::restore_events`] replays to return a device to a
    /// neutral state.
    Last,
}

/// The remembered value for one running context.
#[derive(Debug, Clone, Copy)]
pub struct State {
    pub key: ClassKey,
    pub ev: Event,
    pub phase: Phase,
}

/// The set of running contexts a cursor has observed so far.
///
/// Kept as an insertion-ordered list rather than a hash map: these lists
/// stay small (bounded by the number of simultaneously-sounding notes and
/// active controllers, typically under a few hundred even on dense
/// tracks), and restore order must follow observation order, which a `Vec`
/// gives for free.
#[derive(Debug, Clone, Default)]
pub struct StateList {
    entries: Vec<State>,
}

impl StateList {
    pub fn new() -> Self {
        StateList::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: ClassKey) -> Option<&State> {
        self.entries.iter().find(|s| s.key == key)
    }

    /// Records `ev`, updating the existing entry for its class if one
    /// exists (moving it to `Phase::Next`) or inserting a new one at
    /// `Phase::First`. Returns the previous state for the class, if any —
    /// callers use this to suppress redundant output: identical repeated
    /// controller values are not re-sent.
    pub fn update(&mut self, ev: Event) -> Option<State> {
        let key = ev.class_key();
        if let Some(slot) = self.entries.iter_mut().find(|s| s.key == key) {
            let prev = *slot;
            slot.ev = ev;
            slot.phase = Phase::Next;
            Some(prev)
        } else {
            self.entries.push(State {
                key,
                ev,
                phase: Phase::First,
            });
            None
        }
    }

    /// Marks the class as terminated (e.g. a note-off arrived) by removing
    /// its entry, returning the last recorded state if one existed.
    pub fn terminate(&mut self, key: ClassKey) -> Option<State> {
        let idx = self.entries.iter().position(|s| s.key == key)?;
        let mut removed = self.entries.remove(idx);
        removed.phase = Phase::Last;
        Some(removed)
    }

    /// Every still-open class, in observation order. Used by
    /// [`Self::restore_events`] and by invariant checks.
    pub fn iter(&self) -> impl Iterator<Item = &State> {
        self.entries.iter()
    }

    /// Builds the set of events that would return every tracked device/
    /// channel to a neutral state: a `NOFF` for every sounding note, and
    /// nothing for controllers/bends (the original leaves the last
    /// controller value in place on stop — only notes need an explicit
    /// cancel so they don't hang). Used when playback stops mid-phrase
    /// ("panic" handling) and by undo's restore path.
    pub fn restore_events(&self) -> Vec<Event> {
        use crate::event::{Cmd, CmdTag};
        self.entries
            .iter()
            .filter(|s| s.key.cmd_tag == CmdTag::Non)
            .map(|s| Event::new(Cmd::Noff, s.key.dev, s.key.ch, s.key.ident, 64))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Cmd;

    #[test]
    fn update_then_terminate_round_trips() {
        let mut states = StateList::new();
        let on = Event::new(Cmd::Non, 0, 0, 60, 100);
        assert!(states.update(on).is_none());
        assert_eq!(states.iter().count(), 1);

        let key = on.class_key();
        let removed = states.terminate(key).unwrap();
        assert_eq!(removed.phase, Phase::Last);
        assert!(states.is_empty());
    }

    #[test]
    fn repeated_controller_value_is_visible_to_caller_as_prior_state() {
        let mut states = StateList::new();
        let first = Event::new(Cmd::Ctl, 0, 0, 7, 100);
        let second = Event::new(Cmd::Ctl, 0, 0, 7, 100);
        assert!(states.update(first).is_none());
        let prev = states.update(second).unwrap();
        assert_eq!(prev.ev.v1, 100);
    }

    #[test]
    fn restore_events_emits_note_off_for_open_notes_only() {
        let mut states = StateList::new();
        states.update(Event::new(Cmd::Non, 0, 0, 60, 100));
        states.update(Event::new(Cmd::Ctl, 0, 0, 7, 100));
        let restore = states.restore_events();
        assert_eq!(restore.len(), 1);
        assert_eq!(restore[0].cmd, Cmd::Noff);
        assert_eq!(restore[0].v0, 60);
    }
}
