//! The mixout arbiter and real-time multiplexer: the single-threaded
//! scheduler that ties tracks, filters and device backends together into
//! a running sequencer.
//!
//! Grounded on `examples/original_source/song.h`'s `song_playtic`/
//! `song_nexttic`/`song_idle`/`song_rt_setup`/`song_rt_seek` function
//! surface and its metronome/`realtimecb` fields — the original multiplexes
//! everything (track playback, metronome clicks, live input passthrough)
//! through one tick-driven loop with no locks, which is exactly the shape
//! kept here. The original ties that loop to a real `poll(2)` over device
//! file descriptors (`mididev.pfd`); that poll/select mechanism itself is
//! an external collaborator this crate only specifies the shape of — see
//! [`crate::device::PortBackend::poll`] and [`MonotonicClock`] below, both
//! of which a real front-end supplies.

use crate::device::Device;
use crate::event::{Cmd, Event};
use crate::track::state::StateList;

/// The wall-clock contract the multiplexer needs when it is the clock
/// master: a monotonically increasing microsecond counter. A real
/// front-end backs this with `std::time::Instant`; this crate only
/// specifies the "monotonic wall-clock" contract and ships a
/// deterministic fake for tests.
pub trait MonotonicClock {
    fn now_us(&self) -> u64;
}

/// A fake clock for tests: advances only when told to, never via real
/// wall-clock time.
#[derive(Debug, Default)]
pub struct SimulatedClock {
    now: std::cell::Cell<u64>,
}

impl SimulatedClock {
    pub fn new() -> Self {
        SimulatedClock::default()
    }

    pub fn advance(&self, us: u64) {
        self.now.set(self.now.get() + us);
    }
}

impl MonotonicClock for SimulatedClock {
    fn now_us(&self) -> u64 {
        self.now.get()
    }
}

/// Whether the multiplexer derives ticks from its own wall clock, or from
/// clock bytes/MTC quarter-frames arriving on a device, slaved to
/// external MIDI clock/MTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockRole {
    Master,
    /// Slaved to `Cmd::Tic` realtime bytes from the named device index.
    SlaveToClock(usize),
    /// Slaved to MTC quarter-frame messages from the named device index.
    /// Quarter-frame interpolation (assembling 8 quarter-frames into one
    /// timecode, then converting SMPTE time to ticks) is a supplemented
    /// feature beyond the distilled spec's explicit scope, grounded in
    /// `song.h`'s `realtimecb` hook, which existed precisely to let a
    /// front-end splice in alternate timing sources.
    SlaveToMtc(usize),
}

/// Tracks the 8 quarter-frame messages (spec §1, MTC slaving) needed to
/// assemble one complete SMPTE timecode, and converts the result to an
/// elapsed tick count once all 8 have arrived.
#[derive(Debug, Default)]
pub struct MtcAssembler {
    pieces: [Option<u8>; 8],
}

impl MtcAssembler {
    pub fn new() -> Self {
        MtcAssembler::default()
    }

    /// Feeds one quarter-frame message (`piece` 0..=7, `value` its 4-bit
    /// payload). Returns the assembled frame count once piece 7 (the
    /// final nibble of the hours field) arrives, resetting afterward.
    pub fn feed(&mut self, piece: u8, value: u8) -> Option<u32> {
        if piece > 7 {
            return None;
        }
        self.pieces[piece as usize] = Some(value & 0x0F);
        if piece == 7 {
            let frames = self.assemble();
            self.pieces = [None; 8];
            return frames;
        }
        None
    }

    fn assemble(&self) -> Option<u32> {
        let mut nibbles = [0u8; 8];
        for (i, p) in self.pieces.iter().enumerate() {
            nibbles[i] = (*p)?;
        }
        let frames = (nibbles[0] as u32) | ((nibbles[1] as u32) << 4);
        let seconds = (nibbles[2] as u32) | ((nibbles[3] as u32) << 4);
        let minutes = (nibbles[4] as u32) | ((nibbles[5] as u32) << 4);
        let hours = (nibbles[6] as u32) | ((nibbles[7] as u32 & 0x1) << 4);
        Some(((hours * 3600 + minutes * 60 + seconds) * 30) + frames)
    }
}

/// Per-device output-conflict bookkeeping layered on top of a
/// [`StateList`]: which source currently "owns" each live class, and
/// which sources are locked out of a class they previously lost
/// ownership of. Kept as a side table rather than fields on [`State`]
/// itself, per §9's translation note ("use an explicit per-pass marker
/// side-table; do not carry persistent mutable flags on the state
/// itself across operations").
#[derive(Debug, Default)]
struct DeviceMixState {
    states: StateList,
    owner: std::collections::HashMap<crate::event::ClassKey, u32>,
    suppressed: std::collections::HashMap<crate::event::ClassKey, u32>,
}

/// Per-device arbitrator for the mixed output stream (spec §4.7):
/// de-duplicates repeated controller/RPN/bend values exactly like
/// [`crate::track::seqptr::SeqPtr`]'s `evput` dedup rule, and resolves
/// ownership contention when two different producers (tracks, direct
/// user events, the metronome) drive the same class — the newer writer
/// takes ownership and the one it displaced is locked out of that class
/// until it explicitly releases (spec: "the older source's future
/// writes on that class are suppressed until it releases").
#[derive(Debug, Default)]
pub struct Mixout {
    per_device: Vec<DeviceMixState>,
}

impl Mixout {
    pub fn new(ndevices: usize) -> Self {
        Mixout {
            per_device: (0..ndevices).map(|_| DeviceMixState::default()).collect(),
        }
    }

    /// Arbitrates `ev`, produced by `source`, for output: returns
    /// `Some(ev)` if it should be written to the wire, `None` if it's a
    /// redundant repeat or a write from a source currently locked out of
    /// `ev`'s class.
    ///
    /// `source` is an opaque per-producer identifier the caller assigns
    /// (one id per track, a reserved id for direct user input, one for
    /// the metronome) — this module never interprets it beyond equality.
    pub fn arbitrate(&mut self, source: u32, ev: Event) -> Option<Event> {
        let dev = ev.dev as usize;
        if dev >= self.per_device.len() {
            return Some(ev);
        }
        let mix = &mut self.per_device[dev];
        if ev.is_note_off() {
            let key = crate::event::note_class_key(ev.dev, ev.ch, ev.v0);
            mix.states.terminate(key);
            mix.owner.remove(&key);
            mix.suppressed.remove(&key);
            return Some(ev);
        }
        let key = ev.class_key();
        if let Some(&blocked_by) = mix.suppressed.get(&key) {
            if blocked_by == source {
                return None;
            }
        }
        if let Some(&current) = mix.owner.get(&key) {
            if current != source {
                log::info!(
                    "mixout: source {source} takes ownership of {key:?} from source {current}"
                );
                mix.suppressed.insert(key, current);
                mix.owner.insert(key, source);
                mix.states.update(ev);
                return Some(ev);
            }
        } else {
            mix.owner.insert(key, source);
        }
        if ev.is_note_on() {
            mix.states.update(ev);
            return Some(ev);
        }
        if let Some(prev) = mix.states.get(key) {
            if prev.ev.v0 == ev.v0 && prev.ev.v1 == ev.v1 {
                return None;
            }
        }
        mix.states.update(ev);
        Some(ev)
    }

    /// Releases every class `source` currently owns or is locked out of,
    /// across every device — called when a producer stops contributing
    /// (a track is stopped or muted) so a later producer isn't left
    /// permanently locked out of a class its rival abandoned.
    pub fn release_source(&mut self, source: u32) {
        for mix in &mut self.per_device {
            mix.owner.retain(|_, owner| *owner != source);
            mix.suppressed.retain(|_, blocked| *blocked != source);
        }
    }

    /// Every note this arbiter believes is currently sounding, across all
    /// devices — used to build the panic/cancel event set when playback
    /// stops (spec §4.8's panic protocol).
    pub fn open_notes(&self) -> Vec<Event> {
        self.per_device.iter().flat_map(|s| s.states.restore_events()).collect()
    }

    /// Every note this arbiter believes is currently sounding on one
    /// device — used by the active-sensing watchdog (spec §4.1), which
    /// only needs to cancel the notes of the device that went silent, not
    /// every device.
    pub fn open_notes_for_device(&self, dev_index: usize) -> Vec<Event> {
        match self.per_device.get(dev_index) {
            Some(mix) => mix.states.restore_events(),
            None => Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        for mix in &mut self.per_device {
            mix.states.clear();
            mix.owner.clear();
            mix.suppressed.clear();
        }
    }

    /// Clears mixout state for one device only (active-sensing watchdog).
    pub fn reset_device(&mut self, dev_index: usize) {
        if let Some(mix) = self.per_device.get_mut(dev_index) {
            mix.states.clear();
            mix.owner.clear();
            mix.suppressed.clear();
        }
    }
}

/// The tick-synchronous scheduler tying devices, the mixout arbiter and a
/// clock source together (spec §4.8). Playback source tracks are driven
/// externally (by [`crate::song::Song`], which reads `self.tick()` each
/// cycle and pushes the resulting events through [`Multiplexer::emit`]);
/// this type owns only the timing and device I/O, not track ownership,
/// the same separation of concerns [`crate::track::seqptr::SeqPtr`]
/// maintains between cursor and track.
pub struct Multiplexer {
    devices: Vec<Device>,
    mixout: Mixout,
    tick: u64,
    /// Microseconds per tick at the current tempo (spec §3.1's `usec24`
    /// scaled down by 24, since the engine's internal unit is
    /// microseconds-per-24-ticks per `default.h`'s `TEMPO_TO_USEC24`).
    usec24_per_tick: u32,
    role: ClockRole,
    mtc: MtcAssembler,
    last_tick_at_us: u64,
    /// The song's own tick resolution (`song.tics_per_unit`, default 96),
    /// independent of any one device's `ticrate` (SPEC_FULL.md B.3).
    tics_per_unit: u32,
    /// Per-device fractional remainder carried across calls to
    /// [`Self::convert_ticks`] when converting outgoing song ticks to a
    /// device's native `ticrate`.
    tx_accum: Vec<i64>,
    /// Same, for incoming `Cmd::Tic` bytes from a slaved device converted
    /// back to song ticks.
    rx_accum: Vec<i64>,
    /// Wall-clock time of the last bytes seen from each device, for the
    /// active-sensing watchdog (spec §4.1). `None` until a device has
    /// produced at least one byte, so a device that never sends anything
    /// is never treated as "timed out" rather than simply unused.
    last_input_us: Vec<Option<u64>>,
}

impl Multiplexer {
    pub fn new(devices: Vec<Device>, role: ClockRole) -> Self {
        let n = devices.len();
        Multiplexer {
            mixout: Mixout::new(n.max(crate::event::MAXDEV as usize)),
            tick: 0,
            usec24_per_tick: crate::event::tempo_to_usec24(120, 24) / 24,
            role,
            mtc: MtcAssembler::new(),
            last_tick_at_us: 0,
            tics_per_unit: 96,
            tx_accum: vec![0; n],
            rx_accum: vec![0; n],
            last_input_us: vec![None; n],
            devices,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn set_tempo_usec24_per_beat(&mut self, usec24: u32, tics_per_beat: u32) {
        self.usec24_per_tick = usec24 / tics_per_beat.max(1);
    }

    /// Sets the song's tick resolution used to convert against each
    /// device's own `ticrate` (defaults to 96, matching `Song`'s default
    /// `tics_per_unit` and `Device::ticrate`, i.e. a 1:1 conversion until
    /// a caller says otherwise).
    pub fn set_tics_per_unit(&mut self, tics_per_unit: u32) {
        self.tics_per_unit = tics_per_unit;
    }

    pub fn device_mut(&mut self, index: usize) -> Option<&mut Device> {
        self.devices.get_mut(index)
    }

    /// Fixed-point tick-rate conversion: converts `in_ticks` at
    /// `from_rate` ticks/unit into however many ticks at `to_rate`
    /// ticks/unit are due, carrying the fractional remainder in `accum`
    /// across calls so the long-run ratio stays exact instead of drifting
    /// (no floats, matching the rest of this crate's tick arithmetic).
    fn convert_ticks(accum: &mut i64, from_rate: u32, to_rate: u32, in_ticks: u32) -> u32 {
        if from_rate == 0 || to_rate == 0 {
            return 0;
        }
        *accum += in_ticks as i64 * to_rate as i64;
        let out = *accum / from_rate as i64;
        *accum -= out * from_rate as i64;
        out as u32
    }

    /// Polls every device once, decoding whatever bytes arrived. Clock
    /// realtime bytes from the slaved device (if any) advance `self.tick`;
    /// every other decoded event is returned to the caller (typically
    /// [`crate::song::Song`]) for routing through its input filter.
    pub fn poll_devices(&mut self, clock: &dyn MonotonicClock) -> crate::error::Result<Vec<(usize, Event)>> {
        let now = clock.now_us();
        let mut out = Vec::new();
        for (i, dev) in self.devices.iter_mut().enumerate() {
            let readiness = dev.poll();
            if !readiness.readable {
                continue;
            }
            self.last_input_us[i] = Some(now);
            for ev in dev.pull_events()? {
                if matches!(self.role, ClockRole::SlaveToClock(idx) if idx == i) && ev.cmd == Cmd::Tic {
                    let ticks = Self::convert_ticks(&mut self.rx_accum[i], dev.ticrate, self.tics_per_unit, 1);
                    self.tick += ticks as u64;
                    continue;
                }
                out.push((i, ev));
            }
        }
        if matches!(self.role, ClockRole::Master) {
            self.advance_from_wall_clock(clock)?;
        }
        self.check_active_sensing(now)?;
        Ok(out)
    }

    /// When acting as clock master, advances `tick` by however many whole
    /// ticks have elapsed on `clock` since the last call — this is the
    /// free-running path used when no external clock/MTC source is
    /// configured — and broadcasts the equivalent TIC pulses to every
    /// device (spec §4.8 step 3).
    fn advance_from_wall_clock(&mut self, clock: &dyn MonotonicClock) -> crate::error::Result<()> {
        let now = clock.now_us();
        if self.usec24_per_tick == 0 {
            return Ok(());
        }
        let elapsed = now.saturating_sub(self.last_tick_at_us);
        let ticks = elapsed / self.usec24_per_tick as u64;
        if ticks > 0 {
            self.tick += ticks;
            self.last_tick_at_us += ticks * self.usec24_per_tick as u64;
            self.broadcast_tics(ticks as u32)?;
        }
        Ok(())
    }

    /// Emits however many native clock pulses `song_ticks` song ticks are
    /// worth to every device, converting between `self.tics_per_unit` and
    /// each device's own `ticrate` (SPEC_FULL.md B.3). Devices that
    /// haven't opted into real-time bytes (`send_realtime == false`) are
    /// still fed through [`Device::push_event`], which drops them there —
    /// this is the only place that decides and enforces that gate.
    fn broadcast_tics(&mut self, song_ticks: u32) -> crate::error::Result<()> {
        for i in 0..self.devices.len() {
            let ticrate = self.devices[i].ticrate;
            let pulses = Self::convert_ticks(&mut self.tx_accum[i], self.tics_per_unit, ticrate, song_ticks);
            for _ in 0..pulses {
                self.devices[i].push_event(&Event::new(Cmd::Tic, 0, 0, 0, 0))?;
            }
        }
        Ok(())
    }

    /// Emits a transport START to every device and resets each device's
    /// tick-conversion remainder, so pulses after the restart land on the
    /// same phase a fresh run would. Callers invoke this alongside
    /// [`crate::song::Song::play`]/[`crate::song::Song::record`].
    pub fn broadcast_start(&mut self) -> crate::error::Result<()> {
        for accum in &mut self.tx_accum {
            *accum = 0;
        }
        for dev in self.devices.iter_mut() {
            dev.push_event(&Event::new(Cmd::Start, 0, 0, 0, 0))?;
        }
        Ok(())
    }

    /// Emits a transport STOP to every device. Callers invoke this
    /// alongside [`crate::song::Song::stop`].
    pub fn broadcast_stop(&mut self) -> crate::error::Result<()> {
        for dev in self.devices.iter_mut() {
            dev.push_event(&Event::new(Cmd::Stop, 0, 0, 0, 0))?;
        }
        Ok(())
    }

    /// Active-sensing watchdog (spec §4.1): an opted-in device
    /// (`send_realtime`) that has sent at least one byte but has gone
    /// silent for longer than its `isensto` is treated as disconnected —
    /// every note the mixout arbiter believes is still open on that
    /// device gets a synthetic note-off, and the device is disarmed until
    /// it produces another byte.
    fn check_active_sensing(&mut self, now_us: u64) -> crate::error::Result<()> {
        for i in 0..self.devices.len() {
            if !self.devices[i].send_realtime {
                continue;
            }
            let last = match self.last_input_us[i] {
                Some(t) => t,
                None => continue,
            };
            let isensto = self.devices[i].isensto as u64;
            if now_us.saturating_sub(last) <= isensto {
                continue;
            }
            log::warn!("mux: device {i} silent past its active-sensing timeout, treating as disconnected");
            let cancels = self.mixout.open_notes_for_device(i);
            for ev in cancels {
                self.devices[i].push_event(&ev)?;
            }
            self.mixout.reset_device(i);
            self.last_input_us[i] = None;
        }
        Ok(())
    }

    /// Feeds an MTC quarter-frame payload to the assembler; when a full
    /// timecode completes, re-bases `self.tick` to match it (MTC-slaved
    /// role only).
    pub fn feed_mtc_quarter_frame(&mut self, piece: u8, value: u8, frames_per_tick: u32) {
        if let Some(frames) = self.mtc.feed(piece, value) {
            if frames_per_tick > 0 {
                self.tick = frames as u64 * frames_per_tick as u64;
            }
        }
    }

    /// Routes `ev`, produced by `source`, to device `dev_index` through
    /// the mixout arbiter, dropping it if the arbiter judges it redundant
    /// or if `source` is currently locked out of `ev`'s class by a rival
    /// producer (spec §4.7). `source` is an opaque id the caller assigns
    /// consistently per producer (see [`Mixout::arbitrate`]).
    pub fn emit(&mut self, source: u32, dev_index: usize, ev: Event) -> crate::error::Result<()> {
        if let Some(arbitrated) = self.mixout.arbitrate(source, ev) {
            if let Some(dev) = self.devices.get_mut(dev_index) {
                dev.push_event(&arbitrated)?;
            }
        }
        Ok(())
    }

    /// Releases every mixout class `source` holds, on every device —
    /// call when a producer (a track, typically) stops or is muted so a
    /// rival it previously locked out can compete for that class again.
    pub fn release_source(&mut self, source: u32) {
        self.mixout.release_source(source);
    }

    /// Emits a note-off for every note the mixout arbiter believes is
    /// still sounding, to every device, then clears its state (spec §4.8's
    /// panic protocol, invoked on stop/abort).
    pub fn panic(&mut self) -> crate::error::Result<()> {
        let cancels = self.mixout.open_notes();
        for ev in cancels {
            let dev_index = ev.dev as usize;
            if let Some(dev) = self.devices.get_mut(dev_index) {
                dev.push_event(&ev)?;
            }
        }
        self.mixout.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NullBackend;
    use crate::event::Cmd;

    #[test]
    fn mixout_suppresses_repeated_controller_value() {
        let mut mx = Mixout::new(2);
        let ctl = Event::new(Cmd::Ctl, 0, 0, 7, 100);
        assert!(mx.arbitrate(0, ctl).is_some());
        assert!(mx.arbitrate(0, ctl).is_none());
    }

    #[test]
    fn mixout_tracks_open_notes_for_panic() {
        let mut mx = Mixout::new(1);
        mx.arbitrate(0, Event::new(Cmd::Non, 0, 0, 60, 100));
        let open = mx.open_notes();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].cmd, Cmd::Noff);
    }

    #[test]
    fn second_source_takes_ownership_and_first_is_locked_out() {
        let mut mx = Mixout::new(1);
        let a = Event::new(Cmd::Ctl, 0, 0, 7, 10);
        let b = Event::new(Cmd::Ctl, 0, 0, 7, 20);
        assert!(mx.arbitrate(1, a).is_some());
        assert!(mx.arbitrate(2, b).is_some());
        let a_again = Event::new(Cmd::Ctl, 0, 0, 7, 30);
        assert!(mx.arbitrate(1, a_again).is_none());
        mx.release_source(1);
        assert!(mx.arbitrate(1, a_again).is_some());
    }

    #[test]
    fn master_clock_advances_tick_from_wall_clock() {
        let mut dev = Device::new("loop0", Box::new(NullBackend::new()));
        dev.open().unwrap();
        let mut mux = Multiplexer::new(vec![dev], ClockRole::Master);
        mux.set_tempo_usec24_per_beat(crate::event::tempo_to_usec24(120, 24), 24);
        let clock = SimulatedClock::new();
        clock.advance(mux.usec24_per_tick as u64 * 3);
        mux.poll_devices(&clock).unwrap();
        assert_eq!(mux.tick(), 3);
    }

    #[test]
    fn master_broadcasts_tic_to_every_realtime_device() {
        let mut dev = Device::new("loop0", Box::new(NullBackend::new()));
        dev.open().unwrap();
        let mut mux = Multiplexer::new(vec![dev], ClockRole::Master);
        mux.set_tempo_usec24_per_beat(crate::event::tempo_to_usec24(120, 24), 24);
        let clock = SimulatedClock::new();
        clock.advance(mux.usec24_per_tick as u64 * 2);
        mux.poll_devices(&clock).unwrap();
        let dev = mux.device_mut(0).unwrap();
        let evs = dev.pull_events().unwrap();
        assert_eq!(evs.len(), 2);
        assert!(evs.iter().all(|e| e.cmd == Cmd::Tic));
    }

    #[test]
    fn non_realtime_device_never_receives_tic_bytes() {
        let mut dev = Device::new("loop0", Box::new(NullBackend::new()));
        dev.open().unwrap();
        dev.send_realtime = false;
        let mut mux = Multiplexer::new(vec![dev], ClockRole::Master);
        mux.set_tempo_usec24_per_beat(crate::event::tempo_to_usec24(120, 24), 24);
        let clock = SimulatedClock::new();
        clock.advance(mux.usec24_per_tick as u64 * 2);
        mux.poll_devices(&clock).unwrap();
        let dev = mux.device_mut(0).unwrap();
        assert!(dev.pull_events().unwrap().is_empty());
    }

    #[test]
    fn slaved_device_at_half_ticrate_advances_two_song_ticks_per_tic() {
        let mut dev = Device::new("clockin", Box::new(NullBackend::new()));
        dev.ticrate = 48;
        dev.open().unwrap();
        let mut mux = Multiplexer::new(vec![dev], ClockRole::SlaveToClock(0));
        mux.set_tics_per_unit(96);
        let clock = SimulatedClock::new();
        {
            let dev = mux.device_mut(0).unwrap();
            dev.push_event(&Event::new(Cmd::Tic, 0, 0, 0, 0)).unwrap();
        }
        mux.poll_devices(&clock).unwrap();
        assert_eq!(mux.tick(), 2);
    }

    #[test]
    fn active_sensing_timeout_cancels_hanging_notes_on_that_device() {
        let mut dev = Device::new("loop0", Box::new(NullBackend::new()));
        dev.isensto = 1_000;
        dev.open().unwrap();
        let mut mux = Multiplexer::new(vec![dev], ClockRole::Master);
        let clock = SimulatedClock::new();
        mux.emit(0, 0, Event::new(Cmd::Non, 0, 0, 60, 100)).unwrap();
        // one read establishes the watchdog's baseline timestamp.
        mux.poll_devices(&clock).unwrap();
        let dev = mux.device_mut(0).unwrap();
        dev.pull_events().unwrap();
        clock.advance(2_000);
        mux.device_mut(0).unwrap().open().unwrap();
        // force a readable byte so poll_devices arms the watchdog, then
        // let enough time pass past isensto with no further input.
        mux.device_mut(0)
            .unwrap()
            .push_event(&Event::new(Cmd::Ctl, 0, 0, 1, 0))
            .unwrap();
        mux.poll_devices(&clock).unwrap();
        mux.device_mut(0).unwrap().pull_events().unwrap();
        clock.advance(2_000);
        mux.poll_devices(&clock).unwrap();
        let dev = mux.device_mut(0).unwrap();
        let evs = dev.pull_events().unwrap();
        assert!(evs.iter().any(|e| e.cmd == Cmd::Noff && e.v0 == 60));
    }

    #[test]
    fn mtc_assembler_completes_after_eight_quarter_frames() {
        let mut asm = MtcAssembler::new();
        for piece in 0..7 {
            assert!(asm.feed(piece, 0).is_none());
        }
        assert!(asm.feed(7, 0).is_some());
    }

    #[test]
    fn panic_emits_note_off_for_every_open_note() {
        let dev = Device::new("loop0", Box::new(NullBackend::new()));
        let mut mux = Multiplexer::new(vec![dev], ClockRole::Master);
        mux.device_mut(0).unwrap().open().unwrap();
        mux.emit(0, 0, Event::new(Cmd::Non, 0, 0, 60, 100)).unwrap();
        mux.panic().unwrap();
        let dev = mux.device_mut(0).unwrap();
        let evs = dev.pull_events().unwrap();
        assert!(evs.iter().any(|e| e.cmd == Cmd::Noff));
    }
}
