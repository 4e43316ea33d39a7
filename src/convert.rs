//! Event conversions between 7-bit MIDI wire pairs and the engine's 14-bit
//! logical events: 14-bit controller packing, bank-select + program-change
//! fusion, RPN/NRPN packing, and the generic event-spec remap used by
//! [`crate::track::frame::evmap`].
//!
//! Grounded on `examples/original_source/default.h`'s controller-number
//! constants (`BANK_HI/BANK_LO`, `DATAENT_HI/DATAENT_LO`, `NRPN_HI/
//! NRPN_LO`, `RPN_HI/RPN_LO`) and on how a pair of 7-bit `CTL` messages
//! (coarse at controller N, fine at N+32) collapse into one `XCTL` event,
//! and how bank-select followed by program-change collapses into one
//! `XPC`.

use crate::event::{Cmd, Event, COARSE_MAX, EV_UNDEF, FINE_MAX};
use crate::event::spec::EvSpec;

/// Controller numbers with a defined 14-bit fine pair, per `default.h`.
pub const BANK_HI: u16 = 0;
pub const BANK_LO: u16 = 32;
pub const DATAENT_HI: u16 = 6;
pub const DATAENT_LO: u16 = 38;
pub const NRPN_HI: u16 = 99;
pub const NRPN_LO: u16 = 98;
pub const RPN_HI: u16 = 101;
pub const RPN_LO: u16 = 100;

/// Folds a coarse `CTL` at `ctl_num` and a fine `CTL` at `ctl_num + 32`
/// into one 14-bit value (`coarse << 7 | fine`). Returns `None` if
/// `ctl_num` has no defined fine pairing (`ctl_num >= 32`).
pub fn pack_14bit(ctl_num: u16, coarse: u16, fine: u16) -> Option<u16> {
    if ctl_num >= 32 {
        return None;
    }
    Some(((coarse & COARSE_MAX) << 7) | (fine & COARSE_MAX))
}

/// Splits a 14-bit value back into its coarse/fine 7-bit halves, the
/// inverse of [`pack_14bit`]: `(coarse, fine)`.
pub fn unpack_14bit(value: u16) -> (u16, u16) {
    ((value >> 7) & COARSE_MAX, value & COARSE_MAX)
}

/// State needed to fuse a bank-select pair (`CTL BANK_HI`, optionally
/// `CTL BANK_LO`) with the program change that follows them into one
/// `XPC` event, and to fuse an RPN/NRPN controller quadruple
/// (`CTL {RPN,NRPN}_{HI,LO}` then `CTL DATAENT_{HI,LO}`) into one `RPN`/
/// `NRPN` event.
///
/// One instance tracks exactly one `(dev, ch)` pair; the device codec
/// keeps one per channel it has seen controller traffic on.
#[derive(Debug, Clone, Copy)]
pub struct XctlAssembler {
    bank_hi: Option<u16>,
    bank_lo: Option<u16>,
    param_hi: Option<u16>,
    param_lo: Option<u16>,
    is_nrpn: bool,
    data_hi: Option<u16>,
    /// Latched fine half of a generic 14-bit controller pair, indexed by
    /// controller number 1..32 (0 is bank-select, handled separately; slot 0
    /// is unused). The coarse half is never latched: its arrival emits
    /// immediately, using whatever fine value was last seen (or 0).
    generic_fine: [Option<u16>; 32],
}

impl Default for XctlAssembler {
    fn default() -> Self {
        XctlAssembler {
            bank_hi: None,
            bank_lo: None,
            param_hi: None,
            param_lo: None,
            is_nrpn: false,
            data_hi: None,
            generic_fine: [None; 32],
        }
    }
}

/// What [`XctlAssembler::feed`] produced for one incoming event.
pub enum Fused {
    /// Nothing fuses yet; pass `ev` through unchanged (or, for a bank-
    /// select half, buffer it and emit nothing until the program change
    /// arrives).
    Pending,
    /// A complete fused event to emit instead of the raw controller pair.
    Event(Event),
}

impl XctlAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one raw event through the assembler. Non-`Ctl`/`Pc` events,
    /// and controller numbers the assembler doesn't recognize, pass
    /// through untouched.
    pub fn feed(&mut self, ev: Event) -> Fused {
        match ev.cmd {
            Cmd::Ctl if ev.v0 == BANK_HI => {
                self.bank_hi = Some(ev.v1);
                Fused::Pending
            }
            Cmd::Ctl if ev.v0 == BANK_LO => {
                self.bank_lo = Some(ev.v1);
                Fused::Pending
            }
            Cmd::Pc => {
                let bank = match (self.bank_hi.take(), self.bank_lo.take()) {
                    (Some(hi), Some(lo)) => pack_14bit(BANK_HI, hi, lo).unwrap_or(EV_UNDEF),
                    (Some(hi), None) => hi,
                    _ => EV_UNDEF,
                };
                Fused::Event(Event::new(Cmd::Xpc, ev.dev, ev.ch, bank, ev.v0))
            }
            Cmd::Ctl if ev.v0 == RPN_HI || ev.v0 == RPN_LO => {
                self.is_nrpn = false;
                self.feed_param_half(ev.v0 == RPN_HI, ev.v1)
            }
            Cmd::Ctl if ev.v0 == NRPN_HI || ev.v0 == NRPN_LO => {
                self.is_nrpn = true;
                self.feed_param_half(ev.v0 == NRPN_HI, ev.v1)
            }
            Cmd::Ctl if ev.v0 == DATAENT_HI => {
                self.data_hi = Some(ev.v1);
                Fused::Pending
            }
            Cmd::Ctl if ev.v0 == DATAENT_LO => {
                let hi = self.data_hi.take().unwrap_or(0);
                match (self.param_hi, self.param_lo) {
                    (Some(phi), Some(plo)) => {
                        let param = pack_14bit(0, phi, plo).unwrap_or(EV_UNDEF);
                        let value = pack_14bit(0, hi, ev.v1).unwrap_or(EV_UNDEF);
                        let cmd = if self.is_nrpn { Cmd::Nrpn } else { Cmd::Rpn };
                        Fused::Event(Event::new(cmd, ev.dev, ev.ch, param, value))
                    }
                    _ => Fused::Pending,
                }
            }
            // Coarse MSB of a generic 14-bit pair: emit immediately, using
            // whatever fine value was last seen on the paired controller
            // (or 0 if none has arrived yet).
            Cmd::Ctl if (1..32).contains(&ev.v0) => {
                let fine = self.generic_fine[ev.v0 as usize].unwrap_or(0);
                let value = pack_14bit(ev.v0, ev.v1, fine).unwrap_or(EV_UNDEF);
                Fused::Event(Event::new(Cmd::Xctl, ev.dev, ev.ch, ev.v0, value))
            }
            // Fine LSB: latched for the next coarse arrival, nothing emitted.
            Cmd::Ctl if (33..64).contains(&ev.v0) => {
                let ctl_num = ev.v0 - 32;
                self.generic_fine[ctl_num as usize] = Some(ev.v1);
                Fused::Pending
            }
            _ => Fused::Event(ev),
        }
    }

    fn feed_param_half(&mut self, is_hi: bool, value: u16) -> Fused {
        if is_hi {
            self.param_hi = Some(value);
        } else {
            self.param_lo = Some(value);
        }
        Fused::Pending
    }
}

/// Splits an `Xpc` event back into the wire sequence that produces it:
/// bank-select high, bank-select low (if the bank is `EV_UNDEF`, neither
/// is emitted), then program change. Used by the output side of the
/// device codec.
pub fn unpack_xpc(ev: &Event) -> Vec<Event> {
    let mut out = Vec::with_capacity(3);
    if ev.v0 != EV_UNDEF {
        let (hi, lo) = unpack_14bit(ev.v0);
        out.push(Event::new(Cmd::Ctl, ev.dev, ev.ch, BANK_HI, hi));
        out.push(Event::new(Cmd::Ctl, ev.dev, ev.ch, BANK_LO, lo));
    }
    out.push(Event::new(Cmd::Pc, ev.dev, ev.ch, ev.v1, 0));
    out
}

/// Splits an `Rpn`/`Nrpn` event back into its four-controller wire
/// sequence.
pub fn unpack_rpn(ev: &Event) -> Vec<Event> {
    let (hi_sel, lo_sel) = if matches!(ev.cmd, Cmd::Nrpn) {
        (NRPN_HI, NRPN_LO)
    } else {
        (RPN_HI, RPN_LO)
    };
    let (param_hi, param_lo) = unpack_14bit(ev.v0);
    let (data_hi, data_lo) = unpack_14bit(ev.v1);
    vec![
        Event::new(Cmd::Ctl, ev.dev, ev.ch, hi_sel, param_hi),
        Event::new(Cmd::Ctl, ev.dev, ev.ch, lo_sel, param_lo),
        Event::new(Cmd::Ctl, ev.dev, ev.ch, DATAENT_HI, data_hi),
        Event::new(Cmd::Ctl, ev.dev, ev.ch, DATAENT_LO, data_lo),
    ]
}

/// Splits an `Xctl` event back into its coarse/fine controller pair
/// (`ev.v0` is the controller number, `ev.v1` the fused 14-bit value).
pub fn unpack_xctl(ev: &Event) -> Vec<Event> {
    let (hi, lo) = unpack_14bit(ev.v1);
    vec![
        Event::new(Cmd::Ctl, ev.dev, ev.ch, ev.v0, hi),
        Event::new(Cmd::Ctl, ev.dev, ev.ch, ev.v0 + 32, lo),
    ]
}

/// Remaps a MIDI velocity (or any 0..127 value) through a piecewise-linear
/// curve pivoting on the input's midpoint (the `vcurve` filter rule and
/// `track_vcurve`). `weight` is clamped to the original's
/// documented -63..63 range (`blt_tvcurve`/`blt_fvcurve` in
/// `examples/original_source/builtin.c`); 0 is the identity curve. Positive
/// weight lifts low/mid velocities (more sensitive low end, compressed
/// high end); negative weight does the opposite.
///
/// The exact curve shape isn't in the retrieved original source, so this
/// is a from-scratch two-segment line through `(0, 0)`, `(64, mid_y)`,
/// `(127, 127)`, where `mid_y = 64 + weight` — chosen so `weight == 0`
/// reduces exactly to the identity on both segments.
pub fn vcurve(v: u16, weight: i8) -> u16 {
    let x = v.min(127) as i32;
    let weight = weight.clamp(-63, 63) as i32;
    let mid_y = (64 + weight).clamp(1, 126);
    let y = if x <= 64 {
        x * mid_y / 64
    } else {
        mid_y + (x - 64) * (127 - mid_y) / 63
    };
    y.clamp(0, 127) as u16
}

/// Linearly rescales `v` from `from`'s span into `to`'s span, clamping at
/// both ends. Used by [`remap_event`] when a frame-level `evmap` changes
/// an event's kind (and therefore its valid range) rather than just
/// relabeling it.
fn rescale(v: u16, from: crate::event::spec::Range, to: crate::event::spec::Range) -> u16 {
    if v == EV_UNDEF {
        return v;
    }
    let from_span = (from.hi - from.lo) as u32;
    let to_span = (to.hi - to.lo) as u32;
    if from_span == 0 {
        return to.lo;
    }
    let offset = (v.saturating_sub(from.lo)) as u32;
    let scaled = offset * to_span / from_span;
    (to.lo as u32 + scaled).min(to.hi as u32) as u16
}

/// Reinterprets `ev` (known to match `from`) as an event of `to`'s kind,
/// rescaling `v0`/`v1`/`dev`/`ch` proportionally across the two specs'
/// ranges. The frame-level counterpart of a single [`crate::filter::Filter`]
/// map rule, usable as a one-shot edit outside the live filter chain.
pub fn remap_event(ev: &Event, from: &EvSpec, to: &EvSpec) -> Event {
    let cmd = to.kind().map(|k| k.to_cmd()).unwrap_or(ev.cmd);
    Event {
        cmd,
        dev: rescale(ev.dev, from.dev, to.dev).min(FINE_MAX),
        ch: rescale(ev.ch, from.ch, to.ch),
        v0: rescale(ev.v0, from.v0, to.v0),
        v1: rescale(ev.v1, from.v1, to.v1),
        usec24: ev.usec24,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_and_unpack_14bit_round_trip() {
        let packed = pack_14bit(7, 0x7f, 0x01).unwrap();
        assert_eq!(packed, FINE_MAX - 0x7e);
        assert_eq!(unpack_14bit(packed), (0x7f, 0x01));
    }

    #[test]
    fn pack_14bit_rejects_unpairable_controller() {
        assert!(pack_14bit(64, 1, 2).is_none());
    }

    #[test]
    fn xctl_assembler_fuses_bank_select_and_program_change() {
        let mut asm = XctlAssembler::new();
        assert!(matches!(
            asm.feed(Event::new(Cmd::Ctl, 0, 0, BANK_HI, 1)),
            Fused::Pending
        ));
        assert!(matches!(
            asm.feed(Event::new(Cmd::Ctl, 0, 0, BANK_LO, 2)),
            Fused::Pending
        ));
        match asm.feed(Event::new(Cmd::Pc, 0, 0, 42, 0)) {
            Fused::Event(ev) => {
                assert_eq!(ev.cmd, Cmd::Xpc);
                assert_eq!(ev.v1, 42);
                assert_eq!(unpack_14bit(ev.v0), (1, 2));
            }
            _ => panic!("expected fused Xpc"),
        }
    }

    #[test]
    fn unpack_xpc_is_inverse_of_assembler_fusion() {
        let xpc = Event::new(Cmd::Xpc, 0, 0, pack_14bit(0, 1, 2).unwrap(), 42);
        let wire = unpack_xpc(&xpc);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[2].cmd, Cmd::Pc);
        assert_eq!(wire[2].v0, 42);
    }

    #[test]
    fn rpn_round_trips_through_pack_and_unpack() {
        let rpn = Event::new(Cmd::Rpn, 0, 0, pack_14bit(0, 0, 2).unwrap(), pack_14bit(0, 1, 0).unwrap());
        let wire = unpack_rpn(&rpn);
        assert_eq!(wire[0].v0, RPN_HI);
        assert_eq!(wire[2].v0, DATAENT_HI);
    }

    #[test]
    fn xctl_assembler_fuses_a_fine_byte_then_its_coarse() {
        let mut asm = XctlAssembler::new();
        assert!(matches!(
            asm.feed(Event::new(Cmd::Ctl, 0, 0, 39, 5)),
            Fused::Pending
        ));
        match asm.feed(Event::new(Cmd::Ctl, 0, 0, 7, 100)) {
            Fused::Event(ev) => {
                assert_eq!(ev.cmd, Cmd::Xctl);
                assert_eq!(ev.v0, 7);
                assert_eq!(unpack_14bit(ev.v1), (100, 5));
            }
            _ => panic!("expected fused Xctl"),
        }
    }

    #[test]
    fn xctl_assembler_emits_on_bare_coarse_with_zero_fine_default() {
        let mut asm = XctlAssembler::new();
        match asm.feed(Event::new(Cmd::Ctl, 0, 0, 7, 100)) {
            Fused::Event(ev) => {
                assert_eq!(ev.cmd, Cmd::Xctl);
                assert_eq!(unpack_14bit(ev.v1), (100, 0));
            }
            _ => panic!("expected fused Xctl"),
        }
    }

    #[test]
    fn xctl_assembler_passes_non_controller_events_through() {
        let mut asm = XctlAssembler::new();
        let ev = Event::new(Cmd::Non, 0, 0, 60, 100);
        match asm.feed(ev) {
            Fused::Event(out) => assert_eq!(out.cmd, Cmd::Non),
            _ => panic!("expected note-on to pass through"),
        }
    }

    #[test]
    fn unpack_xctl_is_inverse_of_generic_fusion() {
        let ev = Event::new(Cmd::Xctl, 0, 0, 7, pack_14bit(7, 100, 5).unwrap());
        let wire = unpack_xctl(&ev);
        assert_eq!(wire[0].v0, 7);
        assert_eq!(wire[1].v0, 39);
        assert_eq!(wire[0].v1, 100);
        assert_eq!(wire[1].v1, 5);
    }

    #[test]
    fn vcurve_zero_weight_is_identity() {
        for v in 0..=127u16 {
            assert_eq!(vcurve(v, 0), v, "v={v}");
        }
    }

    #[test]
    fn vcurve_positive_weight_lifts_midrange() {
        assert!(vcurve(32, 63) > 32);
        assert_eq!(vcurve(0, 63), 0);
        assert_eq!(vcurve(127, 63), 127);
    }

    #[test]
    fn vcurve_negative_weight_lowers_midrange() {
        assert!(vcurve(32, -63) < 32);
        assert_eq!(vcurve(0, -63), 0);
        assert_eq!(vcurve(127, -63), 127);
    }
}
