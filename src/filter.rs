//! [`Filter`]: the live input→output event router.
//!
//! A filter is an ordered list of map rules (`source EvSpec -> dest
//! EvSpec`, each independently invertible) plus two boolean membership
//! sets (`chgin`/`chgout`, `swapin`/`swapout` in the original vocabulary)
//! used to decide whether an event is allowed through at all before any
//! remapping is applied. `examples/original_source` doesn't carry
//! `filt.c`/`filt.h` in the retrieved set, so the node shape here is
//! reconstructed directly, cross-checked against `default.h`'s
//! controller constants (used in tests) and the no-overlap invariant
//! already enforced by [`crate::event::spec::EvSpec::overlaps`].

use crate::convert::remap_event;
use crate::error::{Error, Result};
use crate::event::spec::EvSpec;
use crate::event::Event;

/// One directional remap rule: events matching `from` are rewritten as
/// `to`-shaped events (a "map node"). `from` and `to` need not
/// have the same kind — rescaling is handled by
/// [`crate::convert::remap_event`].
#[derive(Debug, Clone, Copy)]
pub struct FiltNode {
    pub from: EvSpec,
    pub to: EvSpec,
}

/// A pitch-shift rule (a `transp` node): every event matching `spec` has
/// `halftones` added to its note number, clamped to 0..127.
#[derive(Debug, Clone, Copy)]
pub struct TranspNode {
    pub spec: EvSpec,
    pub halftones: i8,
}

/// A velocity-curve rule (a `vcurve` node): every event matching `spec`
/// has its velocity passed through [`crate::convert::vcurve`].
#[derive(Debug, Clone, Copy)]
pub struct VcurveNode {
    pub spec: EvSpec,
    pub weight: i8,
}

/// An ordered filter chain: membership gates plus an ordered list of map
/// rules, applied to every event flowing from a device's input into the
/// song (`filt_do`'s input side) or from the song out to a device
/// (`filt_do`'s output side, with `chgout`/`swapout`/the output map list).
///
/// The no-overlap invariant — no two map nodes may have overlapping
/// source EvSpecs — is checked at insertion time by [`Filter::map_new`]
/// rather than only in tests, since a filter is built incrementally at
/// run time from command-dispatcher calls that must themselves fail
/// cleanly on a conflicting rule.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    /// Events outside this set never reach the map/output stage at all
    /// (`chgin`: the "change input" gate — only bend/controller style
    /// continuous events are eligible here in the original vocabulary,
    /// but this crate places no kind restriction on it beyond what the
    /// caller configures).
    allow_in: Vec<EvSpec>,
    /// Mirror of `allow_in` for the output side (`chgout`).
    allow_out: Vec<EvSpec>,
    map_in: Vec<FiltNode>,
    map_out: Vec<FiltNode>,
    transp_in: Vec<TranspNode>,
    transp_out: Vec<TranspNode>,
    vcurve_in: Vec<VcurveNode>,
    vcurve_out: Vec<VcurveNode>,
}

impl Filter {
    pub fn new() -> Self {
        Filter::default()
    }

    /// Adds `spec` to the input admission set (`filt_chgin`). An empty
    /// admission set means "admit everything", matching the original's
    /// default-open behavior before any `chgin` rule is configured.
    pub fn chgin(&mut self, spec: EvSpec) {
        self.allow_in.push(spec);
    }

    pub fn chgout(&mut self, spec: EvSpec) {
        self.allow_out.push(spec);
    }

    /// Registers an input-side map rule `from -> to` (`filt_mapnew`
    /// applied to the input map list). Fails with [`crate::error::ErrorKind::BadArg`]
    /// if `from` overlaps an existing input rule's source, preserving the
    /// no-overlap invariant.
    pub fn map_new_in(&mut self, from: EvSpec, to: EvSpec) -> Result<()> {
        Self::check_no_overlap(&self.map_in, &from)?;
        self.map_in.push(FiltNode { from, to });
        Ok(())
    }

    pub fn map_new_out(&mut self, from: EvSpec, to: EvSpec) -> Result<()> {
        Self::check_no_overlap(&self.map_out, &from)?;
        self.map_out.push(FiltNode { from, to });
        Ok(())
    }

    fn check_no_overlap(nodes: &[FiltNode], from: &EvSpec) -> Result<()> {
        if nodes.iter().any(|n| n.from.overlaps(from)) {
            return Err(Error::bad_arg(
                "filt_mapnew",
                "source EvSpec overlaps an existing map rule",
            ));
        }
        Ok(())
    }

    /// Removes every map rule whose source is exactly `from` (`filt_mapdel`).
    /// Returns the number of rules removed.
    pub fn map_del_in(&mut self, from: &EvSpec) -> usize {
        Self::map_del(&mut self.map_in, from)
    }

    pub fn map_del_out(&mut self, from: &EvSpec) -> usize {
        Self::map_del(&mut self.map_out, from)
    }

    fn map_del(nodes: &mut Vec<FiltNode>, from: &EvSpec) -> usize {
        let before = nodes.len();
        nodes.retain(|n| &n.from != from);
        before - nodes.len()
    }

    /// Swaps an input map rule's direction in place (`filt_swapin`): a
    /// rule that used to turn `A` events into `B` events now turns `B`
    /// events into `A` events. Used by the command layer's `"unmap"`-style
    /// undo affordance backing the per-filter undo records.
    pub fn swapin(&mut self, from: &EvSpec) -> bool {
        Self::swap(&mut self.map_in, from)
    }

    pub fn swapout(&mut self, from: &EvSpec) -> bool {
        Self::swap(&mut self.map_out, from)
    }

    fn swap(nodes: &mut [FiltNode], from: &EvSpec) -> bool {
        if let Some(node) = nodes.iter_mut().find(|n| &n.from == from) {
            std::mem::swap(&mut node.from, &mut node.to);
            true
        } else {
            false
        }
    }

    /// Registers an input-side pitch-shift rule (`filt_transp`). Rejects an
    /// overlapping `spec`, mirroring the map list's no-overlap invariant.
    pub fn transp_new_in(&mut self, spec: EvSpec, halftones: i8) -> Result<()> {
        Self::check_no_overlap_spec(&self.transp_in, |n: &TranspNode| n.spec, &spec)?;
        self.transp_in.push(TranspNode { spec, halftones });
        Ok(())
    }

    pub fn transp_new_out(&mut self, spec: EvSpec, halftones: i8) -> Result<()> {
        Self::check_no_overlap_spec(&self.transp_out, |n: &TranspNode| n.spec, &spec)?;
        self.transp_out.push(TranspNode { spec, halftones });
        Ok(())
    }

    /// Registers an input-side velocity-curve rule (`filt_vcurve`).
    pub fn vcurve_new_in(&mut self, spec: EvSpec, weight: i8) -> Result<()> {
        Self::check_no_overlap_spec(&self.vcurve_in, |n: &VcurveNode| n.spec, &spec)?;
        self.vcurve_in.push(VcurveNode { spec, weight });
        Ok(())
    }

    pub fn vcurve_new_out(&mut self, spec: EvSpec, weight: i8) -> Result<()> {
        Self::check_no_overlap_spec(&self.vcurve_out, |n: &VcurveNode| n.spec, &spec)?;
        self.vcurve_out.push(VcurveNode { spec, weight });
        Ok(())
    }

    fn check_no_overlap_spec<N>(nodes: &[N], spec_of: impl Fn(&N) -> EvSpec, spec: &EvSpec) -> Result<()> {
        if nodes.iter().any(|n| spec_of(n).overlaps(spec)) {
            return Err(Error::bad_arg(
                "filt_mapnew",
                "source EvSpec overlaps an existing rule",
            ));
        }
        Ok(())
    }

    /// Runs one event through the input-side admission gate, map chain,
    /// transpose chain and velocity-curve chain in that order, returning
    /// every resulting event (a single map node can only ever produce one
    /// event per input, but an event rejected by the gate produces none)
    /// — `filt_do` applied to input.
    pub fn process_in(&self, ev: Event) -> Vec<Event> {
        Self::process(&self.allow_in, &self.map_in, &self.transp_in, &self.vcurve_in, ev)
    }

    pub fn process_out(&self, ev: Event) -> Vec<Event> {
        Self::process(&self.allow_out, &self.map_out, &self.transp_out, &self.vcurve_out, ev)
    }

    fn process(
        allow: &[EvSpec],
        map: &[FiltNode],
        transp: &[TranspNode],
        vcurve: &[VcurveNode],
        ev: Event,
    ) -> Vec<Event> {
        if !allow.is_empty() && !allow.iter().any(|s| s.matches(&ev)) {
            return Vec::new();
        }
        let mut out = match map.iter().find(|n| n.from.matches(&ev)) {
            Some(node) => remap_event(&ev, &node.from, &node.to),
            None => ev,
        };
        if let Some(node) = transp.iter().find(|n| n.spec.matches(&out)) {
            out.v0 = (out.v0 as i32 + node.halftones as i32).clamp(0, 127) as u16;
        }
        if let Some(node) = vcurve.iter().find(|n| n.spec.matches(&out)) {
            out.v1 = crate::convert::vcurve(out.v1, node.weight);
        }
        vec![out]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::spec::Range;
    use crate::event::{Cmd, CmdTag};

    fn ctl(num: u16, val: u16) -> Event {
        Event::new(Cmd::Ctl, 0, 0, num, val)
    }

    #[test]
    fn unmapped_event_passes_through_unchanged() {
        let f = Filter::new();
        let out = f.process_in(ctl(7, 100));
        assert_eq!(out, vec![ctl(7, 100)]);
    }

    #[test]
    fn map_rule_remaps_matching_events() {
        let mut f = Filter::new();
        let from = EvSpec::new(
            CmdTag::Ctl,
            Range::single(0),
            Range::single(0),
            Range::single(7),
            Range::new(0, 127),
        );
        let to = EvSpec::new(
            CmdTag::Ctl,
            Range::single(0),
            Range::single(0),
            Range::single(10),
            Range::new(0, 127),
        );
        f.map_new_in(from, to).unwrap();
        let out = f.process_in(ctl(7, 64));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].v0, 10);
    }

    #[test]
    fn overlapping_map_rule_is_rejected() {
        let mut f = Filter::new();
        let a = EvSpec::new(
            CmdTag::Ctl,
            Range::single(0),
            Range::single(0),
            Range::new(0, 63),
            Range::new(0, 127),
        );
        let b = EvSpec::new(
            CmdTag::Ctl,
            Range::single(0),
            Range::single(0),
            Range::new(32, 95),
            Range::new(0, 127),
        );
        f.map_new_in(a, a).unwrap();
        assert!(f.map_new_in(b, b).is_err());
    }

    #[test]
    fn transp_rule_shifts_note_number() {
        let mut f = Filter::new();
        let spec = EvSpec::new(
            CmdTag::Non,
            Range::single(0),
            Range::single(0),
            Range::new(0, 127),
            Range::new(0, 127),
        );
        f.transp_new_in(spec, 12).unwrap();
        let out = f.process_in(Event::new(Cmd::Non, 0, 0, 60, 100));
        assert_eq!(out[0].v0, 72);
    }

    #[test]
    fn transp_clamps_at_the_top_of_the_note_range() {
        let mut f = Filter::new();
        let spec = EvSpec::new(
            CmdTag::Non,
            Range::single(0),
            Range::single(0),
            Range::new(0, 127),
            Range::new(0, 127),
        );
        f.transp_new_in(spec, 100).unwrap();
        let out = f.process_in(Event::new(Cmd::Non, 0, 0, 60, 100));
        assert_eq!(out[0].v0, 127);
    }

    #[test]
    fn vcurve_rule_remaps_velocity() {
        let mut f = Filter::new();
        let spec = EvSpec::new(
            CmdTag::Non,
            Range::single(0),
            Range::single(0),
            Range::new(0, 127),
            Range::new(0, 127),
        );
        f.vcurve_new_in(spec, 0).unwrap();
        let out = f.process_in(Event::new(Cmd::Non, 0, 0, 60, 80));
        assert_eq!(out[0].v1, 80);
    }

    #[test]
    fn map_transp_and_vcurve_compose_in_sequence() {
        let mut f = Filter::new();
        let map_from = EvSpec::new(
            CmdTag::Non,
            Range::single(0),
            Range::single(0),
            Range::new(0, 127),
            Range::new(0, 127),
        );
        let map_to = EvSpec::new(
            CmdTag::Non,
            Range::single(0),
            Range::single(1),
            Range::new(0, 127),
            Range::new(0, 127),
        );
        f.map_new_in(map_from, map_to).unwrap();
        let transp_spec = EvSpec::new(
            CmdTag::Non,
            Range::single(0),
            Range::single(1),
            Range::new(0, 127),
            Range::new(0, 127),
        );
        f.transp_new_in(transp_spec, 12).unwrap();
        let out = f.process_in(Event::new(Cmd::Non, 0, 0, 60, 100));
        assert_eq!(out[0].ch, 1);
        assert_eq!(out[0].v0, 72);
    }

    #[test]
    fn admission_gate_blocks_events_outside_allow_set() {
        let mut f = Filter::new();
        f.chgin(EvSpec::new(
            CmdTag::Ctl,
            Range::single(0),
            Range::single(0),
            Range::single(7),
            Range::new(0, 127),
        ));
        assert!(f.process_in(ctl(7, 1)).len() == 1);
        assert!(f.process_in(ctl(8, 1)).is_empty());
    }
}
