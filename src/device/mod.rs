//! The device backend contract and the per-device state the engine keeps
//! regardless of which backend is plugged in.
//!
//! Grounded on `examples/original_source/mididev.h`'s `struct devops {
//! open; read; write; nfds; pollfd; revents; close; del; }` — a
//! function-pointer vtable dispatched per backend kind (`RAW`, `ALSA_SEQ`,
//! `SNDIO` in the original; see its `mididev_listinit`/`raw_new`). That
//! vtable becomes the [`PortBackend`] trait here; concrete OS backends
//! (ALSA/CoreMIDI/WinMM/etc.) are explicitly out of scope for this crate,
//! so the only backend shipped is [`NullBackend`], an in-process loopback
//! used by tests and by callers who want to drive the engine without a
//! real port.

pub mod codec;

use crate::error::{Error, Result};

/// Readiness bits a backend reports for its underlying file descriptor(s),
/// mirroring `devops.revents`'s poll-event bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// The capability contract every MIDI port backend must implement
/// (`struct devops`). The multiplexer only ever talks to `dyn
/// PortBackend`; it never knows whether bytes ultimately go to ALSA
/// sequencer, a sndio device, or (as here) an in-process loopback.
pub trait PortBackend: Send {
    /// Opens the underlying port. Implementations that don't need a
    /// two-phase open/construct can make this a no-op.
    fn open(&mut self) -> Result<()>;

    /// Reads as many available bytes as fit in `buf`, returning the
    /// number read. Returns `Ok(0)` rather than blocking when nothing is
    /// available — the multiplexer polls before calling this.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Writes `buf` in full or returns an error; partial writes are not
    /// exposed to callers, matching the original's internal output
    /// buffering (`mididev.obuf`) which always drains completely before
    /// returning control to the caller.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Current readiness, polled once per multiplexer tick
    /// (`devops.pollfd`/`devops.revents` folded into one call since this
    /// crate has no real file descriptor to hand to an external `poll(2)`
    /// — the multiplexer's poll/select loop contract is itself out of
    /// scope here, only its *shape* matters).
    fn poll(&mut self) -> Readiness;

    /// Closes the port. Called once, before the backend is dropped.
    fn close(&mut self) -> Result<()>;
}

/// Per-device configuration and parser state layered on top of a
/// [`PortBackend`] (`struct mididev`, minus its intrusive list links,
/// which the owning [`crate::song::Song`]'s `Vec<Device>` replaces).
pub struct Device {
    pub name: String,
    backend: Box<dyn PortBackend>,
    /// Tick subdivision this device's clock runs at; `DEFAULT_TPU = 96` in
    /// `default.h`. Devices slaved to a coarser external clock (e.g. MIDI
    /// beat clock at 24 ppqn) use a different value here so the mux can
    /// convert between its internal tick rate and this device's.
    pub ticrate: u32,
    /// Device-specific Active Sensing timeouts, overriding the global
    /// `MIDIDEV_ISENSTO`/`MIDIDEV_OSENSTO` defaults (`mididev.h`'s
    /// `isensto`/`osensto` fields).
    pub isensto: u32,
    pub osensto: u32,
    /// Whether this device accepts real-time bytes (clock/start/stop) at
    /// all (`mididev.sendrt`).
    pub send_realtime: bool,
    pub codec: codec::Codec,
}

/// Default Active Sensing timeouts, in microseconds, from
/// `mididev.h`: `MIDIDEV_ISENSTO = 350*24*1000`ns-scale constant
/// expressed here directly in microseconds for this crate's microsecond-
/// tick clock representation.
pub const DEFAULT_ISENSTO_US: u32 = 350_000;
pub const DEFAULT_OSENSTO_US: u32 = 250_000;

/// `mididev.h`'s `MIDIDEV_BUFLEN` — the size of one read/write burst.
pub const BUFLEN: usize = 0x400;

impl Device {
    pub fn new(name: impl Into<String>, backend: Box<dyn PortBackend>) -> Self {
        Device {
            name: name.into(),
            backend,
            ticrate: 96,
            isensto: DEFAULT_ISENSTO_US,
            osensto: DEFAULT_OSENSTO_US,
            send_realtime: true,
            codec: codec::Codec::new(),
        }
    }

    pub fn open(&mut self) -> Result<()> {
        self.backend.open()
    }

    pub fn close(&mut self) -> Result<()> {
        self.backend.close()
    }

    pub fn poll(&mut self) -> Readiness {
        self.backend.poll()
    }

    /// Reads raw bytes from the backend and feeds them through this
    /// device's decoder, returning every complete event produced.
    pub fn pull_events(&mut self) -> Result<Vec<crate::event::Event>> {
        let mut buf = [0u8; BUFLEN];
        let n = self.backend.read(&mut buf)?;
        Ok(self.codec.decode(&buf[..n]))
    }

    /// Encodes `ev` and writes the resulting bytes to the backend.
    ///
    /// Clock/transport bytes (`Tic`/`Start`/`Stop`) are dropped silently
    /// when `send_realtime` is off (`mididev.sendrt`): a device that
    /// hasn't opted into real-time messages never sees them on the wire.
    pub fn push_event(&mut self, ev: &crate::event::Event) -> Result<()> {
        use crate::event::Cmd;
        if !self.send_realtime && matches!(ev.cmd, Cmd::Tic | Cmd::Start | Cmd::Stop) {
            return Ok(());
        }
        let bytes = self.codec.encode(ev);
        if !bytes.is_empty() {
            self.backend.write(&bytes)?;
        }
        Ok(())
    }
}

/// An in-process loopback backend: writes simply become the next reads.
/// Used by tests and by integrations that want to drive the engine
/// without a real MIDI port.
#[derive(Debug, Default)]
pub struct NullBackend {
    pending: std::collections::VecDeque<u8>,
    open: bool,
}

impl NullBackend {
    pub fn new() -> Self {
        NullBackend::default()
    }

    /// Test/loopback helper: injects bytes as if they had arrived from the
    /// wire, for [`Device::pull_events`] to decode on its next call.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes.iter().copied());
    }
}

impl PortBackend for NullBackend {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.open {
            return Err(Error::io("device_read", "port not open"));
        }
        let n = self.pending.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.pending.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        if !self.open {
            return Err(Error::io("device_write", "port not open"));
        }
        self.pending.extend(buf.iter().copied());
        Ok(())
    }

    fn poll(&mut self) -> Readiness {
        Readiness {
            readable: !self.pending.is_empty(),
            writable: self.open,
        }
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Cmd, Event};

    #[test]
    fn loopback_round_trips_a_note_on() {
        let mut dev = Device::new("loop0", Box::new(NullBackend::new()));
        dev.open().unwrap();
        dev.push_event(&Event::new(Cmd::Non, 0, 0, 60, 100)).unwrap();
        let decoded = dev.pull_events().unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].cmd, Cmd::Non);
        assert_eq!(decoded[0].v0, 60);
    }

    #[test]
    fn reading_before_open_is_an_io_error() {
        let mut dev = Device::new("loop0", Box::new(NullBackend::new()));
        assert!(dev.pull_events().is_err());
    }
}
