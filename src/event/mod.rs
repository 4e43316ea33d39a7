//! The tagged-union MIDI event (`ev`) and its static descriptor table.
//!
//! Grounded on `examples/original_source/track.h` (`struct seqev { delta;
//! struct ev ev; ... }`) and `default.h`'s `COARSE_MAX`/`FINE_MAX`/
//! `TIMESIG_*`/`TEMPO_*` constants, which fix the exact ranges below. The
//! original `ev.c`/`ev.h` were not part of the retrieved source set, so the
//! per-kind parameter semantics are cross-checked against every call site
//! that builds or reads a `struct ev` in `trackop.c`, `builtin.c` and
//! `frame.h`.

pub mod spec;

/// Maximum number of MIDI devices the engine can address (`DEFAULT_MAXNDEVS`
/// in the original `default.h`).
pub const MAXDEV: u16 = 16;

/// Highest valid MIDI channel index (channels are 0..=15).
pub const MAXCH: u16 = 15;

/// Largest value of a 7-bit (coarse) parameter.
pub const COARSE_MAX: u16 = 0x7f;

/// Largest value of a 14-bit (fine) parameter.
pub const FINE_MAX: u16 = 0x3fff;

/// Sentinel meaning "this parameter is unspecified" — e.g. the bank half of
/// an `Xpc` that only ever set the program. Chosen outside every valid
/// range (all real ranges top out at `FINE_MAX`).
pub const EV_UNDEF: u16 = 0xffff;

/// Tightest/loosest allowed time signature, per `default.h`.
pub const TIMESIG_BEATS_MAX: u16 = 16;
pub const TIMESIG_TICS_MAX: u16 = 240;

pub(crate) const fn tempo_to_usec24(bpm: u32, tics_per_beat: u32) -> u32 {
    60 * 24_000_000 / (bpm * tics_per_beat)
}

/// Slowest tempo the engine accepts, in 24ths of a microsecond per tick.
pub const TEMPO_MIN: u32 = tempo_to_usec24(240, TIMESIG_TICS_MAX as u32);
/// Fastest tempo the engine accepts.
pub const TEMPO_MAX: u32 = tempo_to_usec24(20, 24);

/// The kind tag of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cmd {
    // voice
    Noff,
    Non,
    Kat,
    Ctl,
    Pc,
    Cat,
    Bend,
    Xctl,
    Xpc,
    Rpn,
    Nrpn,
    // meta
    Tempo,
    Timesig,
    // system
    Tic,
    Start,
    Stop,
    Sysex,
    /// A user-defined sysex pattern. The `u8` is the pattern's index in the
    /// song's pattern table (`PAT0..PATn`).
    Pattern(u8),
    /// End-of-track sentinel.
    Null,
}

/// Static facts about a [`Cmd`] that every module needs: how many of
/// `v0`/`v1` are meaningful, their ranges, and whether `dev`/`ch` mean
/// anything for this kind.
///
/// There is no single such table in the original C sources (the logic was
/// spread across `ev.c`, which wasn't retrieved), so this is reconstructed
/// from the field usage visible in `trackop.c`/`builtin.c`.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    /// Number of `v0`/`v1` fields that carry real data (0, 1, or 2).
    pub nparams: u8,
    pub v0_max: u16,
    pub v1_max: u16,
    /// True if `dev`/`ch` identify a real MIDI channel (voice events,
    /// sysex's `unit`-as-dev).
    pub has_dev_ch: bool,
    /// True if this is a channel-scoped "voice" message that the mixout
    /// arbiter and converter treat as the subject of note/controller
    /// state tracking.
    pub is_voice: bool,
    /// True if this is a sysex-derived pattern event.
    pub is_pattern: bool,
}

impl Cmd {
    /// Looks up the static descriptor for this kind.
    pub fn descriptor(self) -> Descriptor {
        use Cmd::*;
        match self {
            Noff | Non | Kat => Descriptor {
                nparams: 2,
                v0_max: COARSE_MAX,
                v1_max: COARSE_MAX,
                has_dev_ch: true,
                is_voice: true,
                is_pattern: false,
            },
            Ctl => Descriptor {
                nparams: 2,
                v0_max: COARSE_MAX,
                v1_max: COARSE_MAX,
                has_dev_ch: true,
                is_voice: true,
                is_pattern: false,
            },
            Pc | Cat => Descriptor {
                nparams: 1,
                v0_max: COARSE_MAX,
                v1_max: 0,
                has_dev_ch: true,
                is_voice: true,
                is_pattern: false,
            },
            Bend => Descriptor {
                nparams: 1,
                v0_max: FINE_MAX,
                v1_max: 0,
                has_dev_ch: true,
                is_voice: true,
                is_pattern: false,
            },
            Xctl => Descriptor {
                nparams: 2,
                v0_max: COARSE_MAX,
                v1_max: FINE_MAX,
                has_dev_ch: true,
                is_voice: true,
                is_pattern: false,
            },
            Xpc => Descriptor {
                nparams: 2,
                v0_max: FINE_MAX, // bank (or EV_UNDEF)
                v1_max: COARSE_MAX,
                has_dev_ch: true,
                is_voice: true,
                is_pattern: false,
            },
            Rpn | Nrpn => Descriptor {
                nparams: 2,
                v0_max: FINE_MAX,
                v1_max: FINE_MAX,
                has_dev_ch: true,
                is_voice: true,
                is_pattern: false,
            },
            Tempo => Descriptor {
                nparams: 1,
                v0_max: 0, // tempo doesn't fit 14 bits; stored out-of-band (see Event::usec24)
                v1_max: 0,
                has_dev_ch: false,
                is_voice: false,
                is_pattern: false,
            },
            Timesig => Descriptor {
                nparams: 2,
                v0_max: TIMESIG_BEATS_MAX,
                v1_max: TIMESIG_TICS_MAX,
                has_dev_ch: false,
                is_voice: false,
                is_pattern: false,
            },
            Tic | Start | Stop => Descriptor {
                nparams: 0,
                v0_max: 0,
                v1_max: 0,
                has_dev_ch: false,
                is_voice: false,
                is_pattern: false,
            },
            Sysex => Descriptor {
                nparams: 0,
                v0_max: 0,
                v1_max: 0,
                has_dev_ch: true,
                is_voice: false,
                is_pattern: false,
            },
            Pattern(_) => Descriptor {
                nparams: 2,
                v0_max: FINE_MAX,
                v1_max: FINE_MAX,
                has_dev_ch: true,
                is_voice: false,
                is_pattern: true,
            },
            Null => Descriptor {
                nparams: 0,
                v0_max: 0,
                v1_max: 0,
                has_dev_ch: false,
                is_voice: false,
                is_pattern: false,
            },
        }
    }
}

/// One logical MIDI event: a kind tag plus the (dev, ch, v0, v1) payload.
///
/// `Tempo` is the one kind whose real payload (microseconds-per-24-tick,
/// up to `TEMPO_MAX` which is far larger than 14 bits) doesn't fit in
/// `v0`/`v1`; it is carried in the dedicated `usec24` field instead, and
/// `v0`/`v1` are left at `EV_UNDEF` for that kind. Every other kind uses
/// only `v0`/`v1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub cmd: Cmd,
    pub dev: u16,
    pub ch: u16,
    pub v0: u16,
    pub v1: u16,
    /// Valid only when `cmd == Cmd::Tempo`: microseconds-per-24-tick.
    pub usec24: u32,
}

impl Event {
    /// Builds an event, clamping nothing: out-of-range values are a logic
    /// error in the caller and will fail [`Event::validate`].
    pub fn new(cmd: Cmd, dev: u16, ch: u16, v0: u16, v1: u16) -> Self {
        Event {
            cmd,
            dev,
            ch,
            v0,
            v1,
            usec24: 0,
        }
    }

    pub fn tempo(dev: u16, usec24: u32) -> Self {
        Event {
            cmd: Cmd::Tempo,
            dev,
            ch: 0,
            v0: EV_UNDEF,
            v1: EV_UNDEF,
            usec24,
        }
    }

    pub fn timesig(dev: u16, beats: u16, tics_per_beat: u16) -> Self {
        Event {
            cmd: Cmd::Timesig,
            dev,
            ch: 0,
            v0: beats,
            v1: tics_per_beat,
            usec24: 0,
        }
    }

    pub fn null() -> Self {
        Event {
            cmd: Cmd::Null,
            dev: 0,
            ch: 0,
            v0: EV_UNDEF,
            v1: EV_UNDEF,
            usec24: 0,
        }
    }

    pub fn is_voice(&self) -> bool {
        self.cmd.descriptor().is_voice
    }

    pub fn is_note_on(&self) -> bool {
        matches!(self.cmd, Cmd::Non) && self.v1 != 0
    }

    pub fn is_note_off(&self) -> bool {
        matches!(self.cmd, Cmd::Noff) || (matches!(self.cmd, Cmd::Non) && self.v1 == 0)
    }

    /// Normalizes `NON vel=0` into a real `NOFF` with velocity 64, the
    /// device codec's decode rule. A no-op for every other kind.
    pub fn normalize_note_on_zero_velocity(&mut self) {
        if matches!(self.cmd, Cmd::Non) && self.v1 == 0 {
            self.cmd = Cmd::Noff;
            self.v1 = 64;
        }
    }

    /// Validates `dev`/`ch`/`v0`/`v1` against the static descriptor and the
    /// global device/channel ceilings.
    pub fn validate(&self) -> bool {
        let d = self.cmd.descriptor();
        if d.has_dev_ch && self.dev >= MAXDEV {
            return false;
        }
        if d.is_voice && self.ch > MAXCH {
            return false;
        }
        if matches!(self.cmd, Cmd::Tempo) {
            return self.usec24 >= TEMPO_MIN && self.usec24 <= TEMPO_MAX;
        }
        let v0_ok = self.v0 == EV_UNDEF || self.v0 <= d.v0_max;
        let v1_ok = d.nparams < 2 || self.v1 == EV_UNDEF || self.v1 <= d.v1_max;
        v0_ok && v1_ok
    }

    /// Returns the "class" identity used by [`crate::track::state::State`]
    /// to decide whether two events belong to the same running context:
    /// same kind, same (dev, ch), and (for parametrized kinds) the same
    /// identifying parameter.
    pub fn class_key(&self) -> ClassKey {
        use Cmd::*;
        let ident = match self.cmd {
            Noff | Non | Kat => self.v0, // note number
            Ctl | Xctl => self.v0,       // controller number
            Rpn | Nrpn => self.v0,       // parameter number
            Pattern(_) => self.v0,
            _ => 0,
        };
        ClassKey {
            cmd_tag: CmdTag::from(self.cmd),
            dev: self.dev,
            ch: self.ch,
            ident,
        }
    }
}

/// A [`Cmd`] with its payload stripped, used as half of a [`ClassKey`].
/// `Pattern` keeps its pattern index since different patterns are
/// different classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmdTag {
    Noff,
    Non,
    Kat,
    Ctl,
    Pc,
    Cat,
    Bend,
    Xctl,
    Xpc,
    Rpn,
    Nrpn,
    Tempo,
    Timesig,
    Tic,
    Start,
    Stop,
    Sysex,
    Pattern(u8),
    Null,
}

impl CmdTag {
    /// The inverse of `From<Cmd> for CmdTag`, used by
    /// `crate::convert::remap_event` to rebuild a concrete [`Cmd`] after
    /// retargeting an event at a different [`crate::event::spec::EvSpec`].
    pub fn to_cmd(self) -> Cmd {
        match self {
            CmdTag::Noff => Cmd::Noff,
            CmdTag::Non => Cmd::Non,
            CmdTag::Kat => Cmd::Kat,
            CmdTag::Ctl => Cmd::Ctl,
            CmdTag::Pc => Cmd::Pc,
            CmdTag::Cat => Cmd::Cat,
            CmdTag::Bend => Cmd::Bend,
            CmdTag::Xctl => Cmd::Xctl,
            CmdTag::Xpc => Cmd::Xpc,
            CmdTag::Rpn => Cmd::Rpn,
            CmdTag::Nrpn => Cmd::Nrpn,
            CmdTag::Tempo => Cmd::Tempo,
            CmdTag::Timesig => Cmd::Timesig,
            CmdTag::Tic => Cmd::Tic,
            CmdTag::Start => Cmd::Start,
            CmdTag::Stop => Cmd::Stop,
            CmdTag::Sysex => Cmd::Sysex,
            CmdTag::Pattern(p) => Cmd::Pattern(p),
            CmdTag::Null => Cmd::Null,
        }
    }
}

impl From<Cmd> for CmdTag {
    fn from(cmd: Cmd) -> Self {
        match cmd {
            Cmd::Noff => CmdTag::Noff,
            Cmd::Non => CmdTag::Non,
            Cmd::Kat => CmdTag::Kat,
            Cmd::Ctl => CmdTag::Ctl,
            Cmd::Pc => CmdTag::Pc,
            Cmd::Cat => CmdTag::Cat,
            Cmd::Bend => CmdTag::Bend,
            Cmd::Xctl => CmdTag::Xctl,
            Cmd::Xpc => CmdTag::Xpc,
            Cmd::Rpn => CmdTag::Rpn,
            Cmd::Nrpn => CmdTag::Nrpn,
            Cmd::Tempo => CmdTag::Tempo,
            Cmd::Timesig => CmdTag::Timesig,
            Cmd::Tic => CmdTag::Tic,
            Cmd::Start => CmdTag::Start,
            Cmd::Stop => CmdTag::Stop,
            Cmd::Sysex => CmdTag::Sysex,
            Cmd::Pattern(p) => CmdTag::Pattern(p),
            Cmd::Null => CmdTag::Null,
        }
    }
}

/// Identifies the "running context" an event belongs to — see
/// [`Event::class_key`]. Two events with equal `ClassKey`s are the same
/// note, the same controller, the same RPN parameter, etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassKey {
    pub cmd_tag: CmdTag,
    pub dev: u16,
    pub ch: u16,
    pub ident: u16,
}

/// A note treats NON and a same-pitch NOFF as one class for state-tracking
/// purposes even though their `Cmd`s differ; `note_class_key` folds `Noff`
/// into the `Non` tag so the merge/state code can look both up uniformly.
pub fn note_class_key(dev: u16, ch: u16, note: u16) -> ClassKey {
    ClassKey {
        cmd_tag: CmdTag::Non,
        dev,
        ch,
        ident: note,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_velocity_note_on_becomes_note_off() {
        let mut ev = Event::new(Cmd::Non, 0, 0, 60, 0);
        ev.normalize_note_on_zero_velocity();
        assert_eq!(ev.cmd, Cmd::Noff);
        assert_eq!(ev.v1, 64);
    }

    #[test]
    fn validate_rejects_out_of_range_channel() {
        let ev = Event::new(Cmd::Ctl, 0, 16, 7, 64);
        assert!(!ev.validate());
    }

    #[test]
    fn validate_rejects_bad_tempo() {
        let ev = Event::tempo(0, 1);
        assert!(!ev.validate());
        let ev = Event::tempo(0, TEMPO_MIN);
        assert!(ev.validate());
    }

    #[test]
    fn note_on_and_note_off_share_a_class() {
        let on = Event::new(Cmd::Non, 0, 0, 60, 100);
        let off = Event::new(Cmd::Noff, 0, 0, 60, 64);
        assert_eq!(
            note_class_key(on.dev, on.ch, on.v0),
            note_class_key(off.dev, off.ch, off.v0)
        );
    }
}
