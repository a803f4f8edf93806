//! High-level emulation of the console's audio/graphics DSP coprocessor.
//!
//! The host CPU uploads one of a small set of known microcode programs
//! into shared WRAM and talks to it through a fixed MMIO register
//! protocol. Instead of interpreting DSP instructions, this crate
//! recognizes the uploaded program by content hash and substitutes a
//! native reimplementation with the same host-visible behavior: the same
//! register and pipe traffic, the same side effects on shared memory,
//! approximately the same completion timing, and the same interrupt and
//! semaphore handshakes.

pub mod bus;
pub mod dsp;
pub mod emulator;
pub mod fifo;
pub mod hle;
pub mod i2s;
pub mod mic;
pub mod sched;
pub mod snapshot;

pub use bus::{Bus, Ram, SharedWram};
pub use dsp::DspPort;
pub use emulator::Emulator;
pub use snapshot::{Snapshot, SnapshotError};
