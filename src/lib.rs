//! Event-timing and routing engine for a MIDI sequencer: a stateful model
//! of timed MIDI events (tracks, frames, cursor state), the seek/merge/
//! filter algorithms that manipulate them, and a real-time multiplexer
//! that drives I/O devices in lockstep with a tick clock, optionally
//! slaved to external MIDI clock or MTC.
//!
//! The crate is organized bottom-up:
//!
//! - [`event`] — the tagged-union `Event` type and its matcher [`event::spec`].
//! - [`pool`] — a generation-checked arena allocator used wherever the
//!   engine needs stable handles into growable collections.
//! - [`track`] — the doubly-linked event list and its stateful cursor
//!   ([`track::seqptr`]), plus frame-level edit operations
//!   ([`track::frame`]).
//! - [`filter`] — per-channel rewrite rules (remap, transpose, velocity
//!   curve) applied to live event traffic.
//! - [`convert`] — packing and unpacking of multi-message MIDI constructs
//!   (14-bit CC, bank-select + program change, RPN/NRPN).
//! - [`sysex`] — chunked SysEx storage and wildcard pattern matching.
//! - [`device`] — the byte-oriented wire codec ([`device::codec`]) and the
//!   [`device::PortBackend`] trait I/O backends implement.
//! - [`mux`] — the tick-synchronous scheduler that drives devices and
//!   arbitrates their combined output.
//! - [`song`] — the top-level aggregate: tracks, channels, filters, SysEx
//!   banks, transport, and tap tempo.
//! - [`undo`] — the grouped undo journal [`song::Song`] records into and
//!   reverses out of.
//! - [`error`] — the crate's `Result`/`Error` types.
//! - [`command`] — the tagged [`command::Value`] a command dispatcher
//!   trades with [`song::Song`]'s operations; the dispatcher itself is
//!   outside this crate's scope.

pub mod command;
pub mod convert;
pub mod device;
pub mod error;
pub mod event;
pub mod filter;
pub mod mux;
pub mod pool;
pub mod song;
pub mod sysex;
pub mod track;
pub mod undo;

pub use error::{Error, ErrorKind, Result};
pub use event::{Cmd, Event};
pub use song::Song;
