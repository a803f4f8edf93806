//! High-level DSP engine cores.
//!
//! The DSP front-end drives exactly one engine at a time through the
//! [`DspCore`] trait: one of the native ucode reimplementations in this
//! module, or an externally supplied low-level interpreter. Engines get
//! no back-reference to the rest of the system; every entry point
//! receives a [`DspCtx`] borrowing the host bus, the shared WRAM banks,
//! the scheduler and the mic hub for the duration of the call.

pub mod aac;
pub mod base;
pub mod g711;
pub mod graphics;

use crate::bus::{Bus, SharedWram};
use crate::mic::Mic;
use crate::sched::Scheduler;
use crate::snapshot::UcodeSnapshot;

/// Ucode class identifiers, the high half of an engine identity.
pub const CLASS_AAC: u32 = 0;
pub const CLASS_GRAPHICS: u32 = 1;
pub const CLASS_G711: u32 = 2;

/// Identity of the low-level fallback engine.
pub const LLE_ID: u32 = 0xFFFF_FFFF;

/// Interrupt requests accumulated during one engine call.
///
/// The front-end consumes these after every routed call and applies its
/// own gating (reply IRQ enables, sticky semaphore status bit).
#[derive(Debug, Default, Clone, Copy)]
pub struct IrqFlags {
    pub rep: [bool; 3],
    pub sem: bool,
}

/// Borrowed system context handed to every engine entry point.
pub struct DspCtx<'a> {
    pub mem: &'a mut dyn Bus,
    pub wram: &'a mut SharedWram,
    pub sched: &'a mut Scheduler,
    pub mic: &'a mut Mic,
    pub irq: &'a mut IrqFlags,
}

/// A DSP engine as seen by the MMIO front-end.
pub trait DspCore {
    /// `(class << 16) | (version & 0xFFFF)`, used for savestate selection.
    fn id(&self) -> u32;

    fn reset(&mut self);

    /// Called once when the DSP is released from reset and this engine
    /// has been selected.
    fn start(&mut self, ctx: &mut DspCtx);

    /// Advance the engine clock. Native ucodes complete through scheduled
    /// events instead, so this is a no-op for them.
    fn run(&mut self, _cycles: u32) {}

    /// Host write to `CMDn`.
    fn send_data(&mut self, ctx: &mut DspCtx, index: usize, val: u16);

    /// Host read of `REPn`. Returns 0 when no reply is pending.
    fn recv_data(&mut self, ctx: &mut DspCtx, index: usize) -> u16;

    fn recv_data_ready(&self, index: usize) -> bool;
    fn send_data_empty(&self, index: usize) -> bool;

    /// DSP→host semaphore value.
    fn semaphore(&self) -> u16;
    /// Host→DSP semaphore OR-set.
    fn set_semaphore(&mut self, val: u16);
    /// Clear DSP→host semaphore bits.
    fn clear_semaphore(&mut self, val: u16);
    /// Host-side mask for the DSP→host semaphore.
    fn mask_semaphore(&mut self, val: u16);

    /// One I2S frame: `output` receives a stereo frame from the engine,
    /// `input` is the current mic sample.
    fn sample_clock(&mut self, ctx: &mut DspCtx, output: &mut [i16; 2], input: i16);

    /// A scheduled command-completion deadline was reached.
    fn finish_cmd(&mut self, ctx: &mut DspCtx, param: u32);

    /// DSP-side MMIO space, reachable through the PDATA port.
    fn mmio_read(&mut self, _addr: u16) -> u16 {
        0
    }
    fn mmio_write(&mut self, _addr: u16, _val: u16) {}

    fn snapshot(&self) -> UcodeSnapshot;
    fn restore(&mut self, snap: &UcodeSnapshot);
}
