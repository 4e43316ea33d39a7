//! Cross-module scenarios that don't belong in any single unit under
//! `src/`: a recording/filter/undo round trip through [`seqcore::Song`],
//! and the literal `tnew`/`undo` scenario from spec.md's testable
//! properties section.

use seqcore::event::spec::{EvSpec, Range};
use seqcore::event::{Cmd, CmdTag, Event};
use seqcore::song::Song;

fn non(dev: u16, ch: u16, note: u16, vel: u16) -> Event {
    Event::new(Cmd::Non, dev, ch, note, vel)
}

/// S6 — creating a track pushes one undo group; popping it removes the
/// track and leaves the song's named-track set exactly as it was before.
#[test]
fn undo_group_reverses_a_track_creation() {
    let mut song = Song::new();
    assert!(song.track_lookup("foo").is_none());

    let handle = song.track_new("foo").unwrap();
    assert_eq!(song.track_lookup("foo"), Some(handle));

    song.undo().unwrap();

    assert!(song.track_lookup("foo").is_none());
    assert!(song.track(handle).is_none());
}

/// A filter's channel remap is applied to a live recording before it lands
/// in the track, and undoing the record then restores the track to empty
/// — filter, track and undo journal all participating in one scenario.
#[test]
fn record_through_a_channel_remap_filter_then_undo() {
    let mut song = Song::new();
    let trk = song.track_new("lead").unwrap();
    song.set_curtrk(Some(trk));

    let filt_handle = song.filt_new("remap").unwrap();
    {
        let filt = &mut song.filt_mut(filt_handle).unwrap().filt;
        let from = EvSpec::new(CmdTag::Non, Range::new(0, 0), Range::new(0, 0), Range::new(0, 127), Range::new(0, 127));
        let to = EvSpec::new(CmdTag::Non, Range::new(0, 0), Range::new(1, 1), Range::new(0, 127), Range::new(0, 127));
        filt.map_new_in(from, to).unwrap();
    }
    song.track_mut(trk).unwrap().filt = Some(filt_handle);

    song.record().unwrap();
    song.record_event(non(0, 0, 60, 100)).unwrap();
    let panic = song.stop();
    assert!(panic.is_empty());

    let events: Vec<_> = song.track(trk).unwrap().track.iter().collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].1.ch, 1, "filter's channel remap should land in the recorded track");

    song.undo().unwrap();
    assert!(song.track(trk).unwrap().track.is_empty());
}

/// Mode gating: a track cannot be deleted while the song is in `Rec`.
#[test]
fn track_delete_is_rejected_during_recording() {
    let mut song = Song::new();
    let trk = song.track_new("lead").unwrap();
    song.set_curtrk(Some(trk));
    song.record().unwrap();

    let err = song.track_delete(trk).unwrap_err();
    assert_eq!(err.kind(), seqcore::ErrorKind::Mode);

    song.stop();
}

/// Renaming then deleting a track pushes two separate one-entry undo
/// groups (`tren` and `tdel` are independent commands); popping both in
/// order restores the track under its original name.
#[test]
fn two_undos_reverse_a_rename_then_a_delete() {
    let mut song = Song::new();
    let trk = song.track_new("lead").unwrap();

    song.track_rename(trk, "solo").unwrap();
    song.track_delete(trk).unwrap();
    assert!(song.track_lookup("solo").is_none());
    assert!(song.track_lookup("lead").is_none());

    song.undo().unwrap(); // reverses the delete: "solo" reappears
    assert!(song.track_lookup("solo").is_some());

    song.undo().unwrap(); // reverses the rename: back to "lead"
    assert!(song.track_lookup("lead").is_some());
    assert!(song.track_lookup("solo").is_none());
}

/// `playtic` advances the meta cursor's tick and routes a track's output
/// through its filter every call, regardless of track mute state.
#[test]
fn muted_track_produces_no_output_on_playtic() {
    let mut song = Song::new();
    let trk = song.track_new("lead").unwrap();
    song.track_mut(trk).unwrap().track.push_back(0, non(0, 0, 60, 100));
    song.track_mut(trk).unwrap().mute = true;
    song.set_curtrk(Some(trk));

    song.play().unwrap();
    let out = song.playtic();
    assert!(out.is_empty(), "a muted track must not emit events");
    song.stop();
}
