//! The undo journal: an append-only stack of typed records, grouped by
//! the operation that produced them.
//!
//! Grounded on `examples/original_source/undo.h`'s `struct undo { type;
//! func; name; size; union { ... }; }` — the original tags every record
//! with both a `type` enum (`UNDO_TRACK`, `UNDO_TDEL`, `UNDO_TREN`,
//! `UNDO_FILT`, `UNDO_FDEL`, `UNDO_FREN`, `UNDO_CDEL`, `UNDO_CREN`,
//! `UNDO_SYSEX`, `UNDO_XDEL`, ...) and a `func`/`name` pair identifying the
//! command that pushed it, so a single user-visible "undo" can pop several
//! records that all belong to one logical edit. That grouping survives
//! here as [`UndoJournal::begin_group`]/[`end_group`] bracketing a run of
//! [`UndoRecord`] pushes.

use crate::event::Event;
use crate::track::Track;

/// One reversible change, tagged with enough data to reconstruct the
/// pre-edit state. Mirrors the original's `union` of per-kind undo
/// payloads, collapsed into an enum since Rust sum types don't need the
/// C union's manual tag-matches-payload discipline.
#[derive(Debug, Clone)]
pub enum UndoRecord {
    /// A full snapshot of a track taken before an edit, paired with its
    /// name, for `track_undosave`/`track_undorestore`-style whole-track
    /// restores (the cheapest-to-implement option for an arbitrary frame
    /// operation, matching the original's `track_data` blob capture).
    TrackSnapshot { track_name: String, events: Vec<(u64, Event)>, duration: u64 },
    /// A track was deleted; undoing re-creates it (`UNDO_TDEL`).
    TrackDelete { track_name: String, events: Vec<(u64, Event)>, duration: u64 },
    /// A track was created; undoing removes it (`UNDO_TNEW`, the
    /// original's `tnew_do`, which the header only mentions via its
    /// `undo_tdel`-shaped counterpart).
    TrackCreate { track_name: String },
    /// A track, channel, filter or sysex bank was renamed
    /// (`UNDO_TREN`/`UNDO_FREN`/`UNDO_CREN`).
    Rename { old_name: String, new_name: String },
    /// A channel binding (name -> (dev, ch)) was removed (`UNDO_CDEL`).
    ChannelDelete { name: String, dev: u16, ch: u16 },
    /// A channel binding was created (`UNDO_CNEW`).
    ChannelCreate { name: String },
    /// A sysex bank's contents changed (`UNDO_SYSEX`).
    SysexSnapshot { bank_name: String, messages: Vec<Vec<u8>> },
    /// A named pattern/filter bank entry was deleted (`UNDO_XDEL`).
    PatternDelete { name: String, index: u8 },
}

/// One undo journal entry: the record plus the name of the command that
/// produced it (the original's `func`/`name` fields, used to render
/// "undo: <func>" in a front-end's status line — a concern outside this
/// crate's scope, but the data needed to support it is kept here).
#[derive(Debug, Clone)]
pub struct UndoEntry {
    pub func: &'static str,
    pub record: UndoRecord,
}

/// An append-only stack of [`UndoEntry`] values, with group bracketing so
/// one user-facing undo can revert several records pushed by the same
/// command.
///
/// `group_bounds` holds the start index of every closed group (or of every
/// ungrouped single push, which is treated as its own one-entry group) so
/// [`Self::pop_group`] knows exactly how many trailing entries belong to
/// the last command, however many records it pushed — a single user
/// command's effects pop as a unit.
#[derive(Debug, Default)]
pub struct UndoJournal {
    entries: Vec<UndoEntry>,
    /// Index of the first entry in the currently-open group, if any.
    group_start: Option<usize>,
    group_bounds: Vec<usize>,
}

impl UndoJournal {
    pub fn new() -> Self {
        UndoJournal::default()
    }

    /// Opens a new group under `func`'s name. Panics if a group is already
    /// open — groups don't nest, matching the original's single active
    /// `undo_pending` slot.
    pub fn begin_group(&mut self) {
        assert!(self.group_start.is_none(), "seqcore: undo group already open");
        self.group_start = Some(self.entries.len());
    }

    /// Closes the currently-open group, recording its bounds so
    /// [`Self::pop_group`] can undo every record it pushed — including
    /// zero of them: records that become no-ops stay in the log as empty
    /// markers, and an empty group simply pops nothing.
    pub fn end_group(&mut self) {
        let start = self.group_start.take().expect("seqcore: no undo group open");
        self.group_bounds.push(start);
    }

    /// Pushes one record under `func`'s name (`undo_push`). Outside an
    /// open group, each push is its own one-entry group so single-record
    /// commands still pop as a unit.
    pub fn push(&mut self, func: &'static str, record: UndoRecord) {
        self.entries.push(UndoEntry { func, record });
        if self.group_start.is_none() {
            self.group_bounds.push(self.entries.len() - 1);
        }
    }

    /// Takes a full snapshot of `track` for a pending restore
    /// (`track_undosave`).
    pub fn snapshot_track(track_name: impl Into<String>, track: &Track) -> UndoRecord {
        UndoRecord::TrackSnapshot {
            track_name: track_name.into(),
            events: track.iter().map(|(tic, ev)| (tic, *ev)).collect(),
            duration: track.duration_ticks(),
        }
    }

    /// Pops the most recently closed group and returns its records in push
    /// order, ready for the caller to apply in reverse (`undo_pop`).
    /// Returns an empty vec if the journal is empty.
    pub fn pop_group(&mut self) -> Vec<UndoEntry> {
        match self.group_bounds.pop() {
            Some(start) => self.entries.split_off(start),
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.group_start = None;
        self.group_bounds.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Cmd;

    #[test]
    fn push_and_pop_round_trips_in_lifo_order() {
        let mut log = UndoJournal::new();
        log.push("tdel", UndoRecord::TrackCreate { track_name: "lead".into() });
        log.push("tren", UndoRecord::Rename { old_name: "a".into(), new_name: "b".into() });
        let popped = log.pop_group();
        assert_eq!(popped.len(), 1);
        assert!(matches!(popped[0].record, UndoRecord::Rename { .. }));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn grouped_pushes_pop_together_as_one_command() {
        let mut log = UndoJournal::new();
        log.begin_group();
        log.push("trename_swap", UndoRecord::Rename { old_name: "a".into(), new_name: "b".into() });
        log.push("trename_swap", UndoRecord::Rename { old_name: "c".into(), new_name: "d".into() });
        log.end_group();
        log.push("tdel", UndoRecord::TrackCreate { track_name: "lead".into() });

        let popped = log.pop_group();
        assert_eq!(popped.len(), 1);
        assert!(matches!(popped[0].record, UndoRecord::TrackCreate { .. }));

        let popped = log.pop_group();
        assert_eq!(popped.len(), 2);
        assert!(log.is_empty());
    }

    #[test]
    fn empty_group_pops_nothing_but_still_consumes_a_unit() {
        let mut log = UndoJournal::new();
        log.begin_group();
        log.end_group();
        assert!(log.pop_group().is_empty());
    }

    #[test]
    fn snapshot_track_captures_events_and_duration() {
        let mut t = Track::new();
        t.push_back(10, Event::new(Cmd::Non, 0, 0, 60, 100));
        t.push_blank(5);
        let record = UndoJournal::snapshot_track("lead", &t);
        match record {
            UndoRecord::TrackSnapshot { events, duration, .. } => {
                assert_eq!(events.len(), 1);
                assert_eq!(duration, 15);
            }
            _ => panic!("expected TrackSnapshot"),
        }
    }

    #[test]
    #[should_panic(expected = "undo group already open")]
    fn nested_groups_panic() {
        let mut log = UndoJournal::new();
        log.begin_group();
        log.begin_group();
    }
}
