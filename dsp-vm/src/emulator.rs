//! Top-level wiring: host memory, shared WRAM, scheduler, mic hub, I2S
//! mixer and the DSP port, driven by a single cooperative event loop.

use std::collections::VecDeque;

use crate::bus::{Bus, SharedWram};
use crate::dsp::DspPort;
use crate::hle::{DspCtx, IrqFlags};
use crate::i2s::{FrameSource, I2s, Silence};
use crate::mic::Mic;
use crate::sched::{EventId, Scheduler};
use crate::snapshot::{
    I2sSnapshot, MemWindowSnapshot, MicSnapshot, SchedSnapshot, Snapshot, SnapshotError,
    WramSnapshot, SNAPSHOT_VERSION,
};

/// Mixed frames kept for the host to drain (about a third of a second at
/// the low I2S rate).
const AUDIO_QUEUE_CAP: usize = 16384;

pub struct Emulator {
    pub mem: Box<dyn Bus>,
    pub wram: SharedWram,
    pub sched: Scheduler,
    pub mic: Mic,
    pub i2s: I2s,
    pub dsp: DspPort,

    spu: Box<dyn FrameSource>,
    audio_out: VecDeque<[i16; 2]>,
}

macro_rules! ctx {
    ($self:ident, $irq:ident) => {
        DspCtx {
            mem: &mut *$self.mem,
            wram: &mut $self.wram,
            sched: &mut $self.sched,
            mic: &mut $self.mic,
            irq: &mut $irq,
        }
    };
}

impl Emulator {
    pub fn new(mem: Box<dyn Bus>) -> Self {
        let mut emu = Self {
            mem,
            wram: SharedWram::new(),
            sched: Scheduler::new(),
            mic: Mic::new(),
            i2s: I2s::new(),
            dsp: DspPort::new(),
            spu: Box::new(Silence),
            audio_out: VecDeque::new(),
        };
        emu.i2s.reset(&mut emu.sched);
        emu
    }

    /// Replace the legacy sound unit feeding the mixer.
    pub fn set_spu_source(&mut self, spu: Box<dyn FrameSource>) {
        self.spu = spu;
    }

    /// Run the system forward. Due events fire in order; the DSP clock
    /// catches up on its next MMIO access.
    pub fn advance(&mut self, cycles: u64) {
        let target = self.sched.now() + cycles;

        self.mic.advance(cycles as u32);

        while let Some((id, param)) = self.sched.pop_due(target) {
            match id {
                EventId::HleFinish => {
                    let mut irq = IrqFlags::default();
                    let mut ctx = ctx!(self, irq);
                    self.dsp.finish_cmd(&mut ctx, param);
                }
                EventId::I2sTick => self.i2s_tick(),
            }
        }

        self.sched.advance(target);
    }

    fn i2s_tick(&mut self) {
        let nitro = self.spu.next_frame();
        let input = self.mic.read_sample();

        let mut dsp_frame = [0i16; 2];
        let mut irq = IrqFlags::default();
        let mut ctx = ctx!(self, irq);
        self.dsp.sample_clock(&mut ctx, &mut dsp_frame, input);

        let mixed = self.i2s.mix(nitro, dsp_frame);
        if self.audio_out.len() >= AUDIO_QUEUE_CAP {
            self.audio_out.pop_front();
        }
        self.audio_out.push_back(mixed);

        self.i2s.reschedule(&mut self.sched);
    }

    /// Drain mixed output frames for host playback.
    pub fn drain_audio(&mut self) -> Vec<[i16; 2]> {
        self.audio_out.drain(..).collect()
    }

    pub fn feed_mic(&mut self, samples: &[i16]) {
        self.mic.feed_frame(samples);
    }

    // DSP register access, as the host CPU sees it

    pub fn dsp_read8(&mut self, addr: u32) -> u8 {
        let mut irq = IrqFlags::default();
        let mut ctx = ctx!(self, irq);
        self.dsp.read8(&mut ctx, addr)
    }

    pub fn dsp_read16(&mut self, addr: u32) -> u16 {
        let mut irq = IrqFlags::default();
        let mut ctx = ctx!(self, irq);
        self.dsp.read16(&mut ctx, addr)
    }

    pub fn dsp_read32(&mut self, addr: u32) -> u32 {
        let mut irq = IrqFlags::default();
        let mut ctx = ctx!(self, irq);
        self.dsp.read32(&mut ctx, addr)
    }

    pub fn dsp_write8(&mut self, addr: u32, val: u8) {
        let mut irq = IrqFlags::default();
        let mut ctx = ctx!(self, irq);
        self.dsp.write8(&mut ctx, addr, val);
    }

    pub fn dsp_write16(&mut self, addr: u32, val: u16) {
        let mut irq = IrqFlags::default();
        let mut ctx = ctx!(self, irq);
        self.dsp.write16(&mut ctx, addr, val);
    }

    pub fn dsp_write32(&mut self, addr: u32, val: u32) {
        let mut irq = IrqFlags::default();
        let mut ctx = ctx!(self, irq);
        self.dsp.write32(&mut ctx, addr, val);
    }

    pub fn set_rst_line(&mut self, release: bool) {
        let mut irq = IrqFlags::default();
        let mut ctx = ctx!(self, irq);
        self.dsp.set_rst_line(&mut ctx, release);
    }

    /// Load a raw ucode image into the program bank and start the DSP
    /// through the reset-hold sequence.
    pub fn boot_program(&mut self, image: &[u8]) {
        self.wram.load_program(image);
        self.set_rst_line(true);
        self.dsp_write16(0x08, 1);
        self.dsp_write16(0x08, 0);
    }

    // Savestate

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION.to_string(),
            sched: SchedSnapshot {
                now: self.sched.now(),
                seq: self.sched.snapshot_seq(),
                entries: self.sched.snapshot_entries(),
            },
            port: self.dsp.snapshot_state(),
            wram: WramSnapshot {
                prog: self
                    .wram
                    .dump_windows(true)
                    .iter()
                    .map(|w| MemWindowSnapshot::from_window(w.as_deref()))
                    .collect(),
                data: self
                    .wram
                    .dump_windows(false)
                    .iter()
                    .map(|w| MemWindowSnapshot::from_window(w.as_deref()))
                    .collect(),
            },
            mic: {
                let (open_mask, cycle_count, cur_sample) = self.mic.snapshot_state();
                MicSnapshot { open_mask, cycle_count, cur_sample }
            },
            i2s: I2sSnapshot { snd_ex_cnt: self.i2s.snapshot_state() },
        }
    }

    pub fn restore(&mut self, snap: &Snapshot) -> Result<(), SnapshotError> {
        if snap.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                got: snap.version.clone(),
                expected: SNAPSHOT_VERSION.to_string(),
            });
        }

        let mut prog = Vec::new();
        for (slot, win) in snap.wram.prog.iter().enumerate() {
            prog.push(win.verified("program", slot)?);
        }
        let mut data = Vec::new();
        for (slot, win) in snap.wram.data.iter().enumerate() {
            data.push(win.verified("data", slot)?);
        }

        self.sched
            .restore(snap.sched.now, snap.sched.seq, &snap.sched.entries);
        self.dsp.restore_state(&snap.port)?;
        self.wram.restore_windows(true, &prog);
        self.wram.restore_windows(false, &data);
        self.mic
            .restore_state(snap.mic.open_mask, snap.mic.cycle_count, snap.mic.cur_sample);
        self.i2s.restore_state(snap.i2s.snd_ex_cnt);
        self.audio_out.clear();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Ram;
    use crate::hle::g711::G711Ucode;
    use crate::hle::graphics::GraphicsUcode;
    use crate::hle::aac::AacUcode;
    use crate::hle::aac::SilentAacDecoder;

    // DSP register offsets used by the scenarios
    const PDATA: u32 = 0x00;
    const PADR: u32 = 0x04;
    const PCFG: u32 = 0x08;
    const PSTS: u32 = 0x0C;
    const PMASK: u32 = 0x14;
    const PCLEAR: u32 = 0x18;
    const SEM: u32 = 0x1C;
    const CMD0: u32 = 0x20;
    const REP0: u32 = 0x24;
    const CMD1: u32 = 0x28;
    const REP1: u32 = 0x2C;
    const CMD2: u32 = 0x30;
    const REP2: u32 = 0x34;

    fn emu_with_core(core: Box<dyn crate::hle::DspCore>) -> Emulator {
        let mut emu = Emulator::new(Box::new(Ram::new(0, 0x2_0000)));
        emu.set_rst_line(true);
        let mut irq = IrqFlags::default();
        let mut ctx = ctx!(emu, irq);
        emu.dsp.install_core(&mut ctx, core);
        emu
    }

    /// Drain the three initial replies plus the pipe-table repost, so the
    /// protocol is in its steady state.
    fn finish_init(emu: &mut Emulator) {
        assert_eq!(emu.dsp_read16(REP0), 1);
        assert_eq!(emu.dsp_read16(REP1), 1);
        assert_eq!(emu.dsp_read16(REP2), 1);
        assert_eq!(emu.dsp_read16(REP2), 0x0800);
        emu.dsp_write16(PCLEAR, 0x8000);
        emu.dsp.take_irq();
    }

    /// Queue words into a pipe the way the host does it: through PDATA
    /// writes into DSP data memory, then a descriptor update.
    fn host_write_pipe(emu: &mut Emulator, pipe: u8, words: &[u16]) {
        let desc = 0x0800 + pipe as u32 * 5;

        // fetch the descriptor over the DMA port (data space, burst 8,
        // auto-increment)
        emu.dsp_write16(PADR, desc as u16);
        emu.dsp_write16(PCFG, (1 << 1) | (1 << 2) | (1 << 4));
        let bufaddr = emu.dsp_read16(PDATA) as u32;
        let buflen = emu.dsp_read16(PDATA) as u32;
        let _rd = emu.dsp_read16(PDATA);
        let wr = emu.dsp_read16(PDATA);
        emu.dsp_write16(PCFG, 0); // cancel the prefetch

        let pipelen = buflen >> 1;
        let mut wrptr = ((wr & 0x7FFF) >> 1) as u32;
        let mut wrphase = wr & 0x8000;

        // write the payload words
        emu.dsp_write16(PCFG, 1 << 1);
        for &word in words {
            emu.dsp_write16(PADR, (bufaddr + wrptr) as u16);
            emu.dsp_write16(PDATA, word);
            wrptr += 1;
            if wrptr >= pipelen {
                wrptr = 0;
                wrphase ^= 0x8000;
            }
        }

        // update the write pointer
        emu.dsp_write16(PADR, (desc + 3) as u16);
        emu.dsp_write16(PDATA, ((wrptr << 1) as u16) | wrphase);
        emu.dsp_write16(PCFG, 0);
    }

    #[test]
    fn g711_ulaw_encode_round_trip() {
        let mut emu = emu_with_core(Box::new(G711Ucode::new(0)));
        finish_init(&mut emu);

        for (i, s) in [0x0000u16, 0x4000, 0xC000, 0x7FFF].iter().enumerate() {
            emu.mem.write16(0x100 + i as u32 * 2, *s);
        }

        // encode mu-law, src 0x100, dst 0x200, len 4
        host_write_pipe(&mut emu, 7, &[0x0000, 0x0101, 0, 0x100, 0, 0x200, 0, 4]);
        emu.dsp_write16(CMD2, 7);

        // completion lands after 200 + 31 * 4 cycles
        emu.advance(200 + 31 * 4);

        // pipe 6 echoes the processed length
        emu.dsp_read16(REP2); // pipe-7 read echo
        emu.dsp_read16(REP2); // pipe-6 write echo

        assert_eq!(emu.mem.read8(0x200), 0x7F);
        assert_eq!(emu.mem.read8(0x201), 0x8F);
        assert_eq!(emu.mem.read8(0x202), 0x0F);
        assert_eq!(emu.mem.read8(0x203), 0x80);
    }

    #[test]
    fn g711_response_pipe_carries_length() {
        let mut emu = emu_with_core(Box::new(G711Ucode::new(0)));
        finish_init(&mut emu);

        host_write_pipe(&mut emu, 7, &[0x0000, 0x0101, 0, 0x100, 0, 0x200, 0, 4]);
        emu.dsp_write16(CMD2, 7);
        emu.advance(400);

        // read the two-word response out of pipe 6 through the DMA port
        let desc = 0x0800 + 6 * 5;
        emu.dsp_write16(PADR, desc as u16);
        emu.dsp_write16(PCFG, (1 << 1) | (1 << 2) | (1 << 4));
        let bufaddr = emu.dsp_read16(PDATA);
        let _len = emu.dsp_read16(PDATA);
        let rd = emu.dsp_read16(PDATA);
        let wr = emu.dsp_read16(PDATA);
        emu.dsp_write16(PCFG, 0);

        assert_eq!(rd, 0);
        assert_eq!(wr, 4); // two words queued
        emu.dsp_write16(PADR, bufaddr);
        emu.dsp_write16(PCFG, (1 << 1) | (1 << 4));
        assert_eq!(emu.dsp_read16(PDATA), 0);
        assert_eq!(emu.dsp_read16(PDATA), 4);
        emu.dsp_write16(PCFG, 0);
    }

    #[test]
    fn g711_unknown_type_is_noop_with_response() {
        let mut emu = emu_with_core(Box::new(G711Ucode::new(0)));
        finish_init(&mut emu);

        emu.mem.write16(0x100, 0x1234);
        host_write_pipe(&mut emu, 7, &[0x0000, 0x0107, 0, 0x100, 0, 0x200, 0, 4]);
        emu.dsp_write16(CMD2, 7);

        // unknown types take the constant 1000-cycle path
        emu.advance(199);
        assert_eq!(emu.mem.read8(0x200), 0);
        emu.advance(1001);

        // destination untouched, response still posted
        assert_eq!(emu.mem.read8(0x200), 0);
        emu.dsp_read16(REP2);
        emu.dsp_read16(REP2);
        let desc = 0x0800 + 6 * 5;
        emu.dsp_write16(PADR, (desc + 3) as u16);
        emu.dsp_write16(PCFG, (1 << 1) | (1 << 4));
        assert_eq!(emu.dsp_read16(PDATA), 4);
        emu.dsp_write16(PCFG, 0);
    }

    #[test]
    fn graphics_yuv_quad() {
        let mut emu = emu_with_core(Box::new(GraphicsUcode::new(0)));
        finish_init(&mut emu);

        emu.mem.write32(0x1000, 0x8080_8080);

        emu.dsp_write16(CMD0, 2);
        host_write_pipe(&mut emu, 7, &[4, 0, 0x1000, 0, 0x2000, 0]);
        emu.dsp_write16(CMD2, 7);

        emu.advance(24 * 2 + 200);

        assert_eq!(emu.dsp_read16(REP1), 1);
        // y = 128, u = v = 128: all channels 128 >> 3 = 16
        let expect = 0x8000u32 | 16 | (16 << 5) | (16 << 10);
        assert_eq!(emu.mem.read32(0x2000), expect | (expect << 16));
    }

    #[test]
    fn graphics_one_third_rejects_non_multiple_of_three() {
        let mut emu = emu_with_core(Box::new(GraphicsUcode::new(0)));
        finish_init(&mut emu);

        emu.dsp_write16(CMD0, 1);
        // mode 10, rect 4x3
        host_write_pipe(
            &mut emu,
            7,
            &[0, 0x1000, 0, 0x2000, 10, 16, 16, 1000, 1000, 0, 0, 4, 3, 0],
        );
        emu.dsp_write16(CMD2, 7);

        // rejected synchronously with a zero reply
        assert_eq!(emu.dsp_read16(PSTS) & (1 << 11), 1 << 11);
        assert_eq!(emu.dsp_read16(REP1), 0);
    }

    #[test]
    fn graphics_unknown_command_rejected() {
        let mut emu = emu_with_core(Box::new(GraphicsUcode::new(0)));
        finish_init(&mut emu);

        emu.dsp_write16(CMD0, 9);
        assert_eq!(emu.dsp_read16(PSTS) & (1 << 11), 1 << 11);
        assert_eq!(emu.dsp_read16(REP1), 0);
    }

    #[test]
    fn aac_parameter_rejection() {
        let mut emu = emu_with_core(Box::new(AacUcode::new(0, Box::new(SilentAacDecoder))));
        finish_init(&mut emu);

        emu.dsp_write16(CMD1, 1);
        for _ in 0..10 {
            emu.dsp_write16(CMD1, 0);
        }

        emu.advance(256);
        assert_eq!(emu.dsp_read16(REP0), 1);
    }

    #[test]
    fn semaphore_gating() {
        let mut emu = emu_with_core(Box::new(G711Ucode::new(0)));
        finish_init(&mut emu);

        // mask bit 15, then run a pipe operation that raises it
        // (the PDATA traffic itself pulses the IRQ line, so it is taken
        // after the pipe is queued)
        emu.dsp_write16(PMASK, 0x8000);
        host_write_pipe(&mut emu, 7, &[0x0000, 0x0101, 0, 0x100, 0, 0x200, 0, 4]);
        emu.dsp.take_irq();
        emu.dsp_write16(CMD2, 7);
        emu.advance(400);

        assert!(!emu.dsp.irq_pending());
        assert_eq!(emu.dsp_read16(PSTS) & (1 << 9), 0);
        assert_eq!(emu.dsp_read16(SEM) & 0x8000, 0x8000);

        // unmask: the next raise interrupts and sets the sticky bit
        emu.dsp_write16(PCLEAR, 0xFFFF);
        emu.dsp_write16(PMASK, 0x0000);
        emu.dsp_read16(REP2);
        emu.dsp_read16(REP2);
        host_write_pipe(&mut emu, 7, &[0x0000, 0x0101, 0, 0x100, 0, 0x200, 0, 4]);
        emu.dsp.take_irq();
        emu.dsp_write16(CMD2, 7);
        emu.advance(400);

        assert!(emu.dsp.irq_pending());
        assert_eq!(emu.dsp_read16(PSTS) & (1 << 9), 1 << 9);

        // clearing all semaphore bits clears the sticky status
        emu.dsp_write16(PCLEAR, 0xFFFF);
        assert_eq!(emu.dsp_read16(PSTS) & (1 << 9), 0);
    }

    #[test]
    fn audio_play_completion() {
        let mut emu = emu_with_core(Box::new(G711Ucode::new(0)));
        finish_init(&mut emu);

        for (i, s) in [100i16, 200, 300, 400].iter().enumerate() {
            emu.mem.write16(0x500 + i as u32 * 2, *s as u16);
        }

        // play sound: cmd 0x1100, addr 0x500, len 4
        host_write_pipe(&mut emu, 5, &[0x0000, 0x1100, 0, 0x500, 0, 4, 0, 0]);
        emu.dsp_write16(CMD2, 5);

        // six I2S ticks: four real frames, then silence
        emu.advance(1024 * 6 + 1);
        let frames = emu.drain_audio();
        let non_silent: Vec<_> = frames.iter().filter(|f| **f != [0, 0]).collect();
        assert_eq!(non_silent.len(), 4);
        assert_eq!(*non_silent[0], [100, 100]);
        assert_eq!(*non_silent[3], [400, 400]);

        // REP2 carries the pipe-5 read echo; draining it triggers the
        // completion message into pipe 4
        assert_eq!(emu.dsp_read16(REP2), 5);
        assert_eq!(emu.dsp_read16(REP2), 4);

        let desc = 0x0800 + 4 * 5;
        emu.dsp_write16(PADR, (desc + 3) as u16);
        emu.dsp_write16(PCFG, (1 << 1) | (1 << 4));
        assert_eq!(emu.dsp_read16(PDATA), 8); // four words queued
        emu.dsp_write16(PCFG, 0);

        emu.dsp_write16(PADR, 0x1400); // pipe 4 buffer
        emu.dsp_write16(PCFG, (1 << 1) | (1 << 2) | (1 << 4));
        assert_eq!(emu.dsp_read16(PDATA), 0x0000);
        assert_eq!(emu.dsp_read16(PDATA), 0x1200);
        assert_eq!(emu.dsp_read16(PDATA), 0x0000);
        assert_eq!(emu.dsp_read16(PDATA), 0x0000);
        emu.dsp_write16(PCFG, 0);
    }

    #[test]
    fn psts_tracks_command_and_reply_state() {
        let mut emu = emu_with_core(Box::new(AacUcode::new(0, Box::new(SilentAacDecoder))));

        // three replies ready after start
        let psts = emu.dsp_read16(PSTS);
        assert_eq!(psts & (7 << 10), 7 << 10);
        assert_eq!(psts & (1 << 8), 1 << 8);

        finish_init(&mut emu);
        let psts = emu.dsp_read16(PSTS);
        assert_eq!(psts & (7 << 10), 0);
    }

    #[test]
    fn dma_fifo_burst_and_infinite_modes() {
        let mut emu = emu_with_core(Box::new(G711Ucode::new(0)));
        finish_init(&mut emu);

        for i in 0..64u32 {
            emu.wram.data_write(0x3000 + i, 0x4400 + i as u16);
        }

        // burst of 8 from data space with auto-increment
        emu.dsp_write16(PADR, 0x3000);
        emu.dsp_write16(PCFG, (1 << 1) | (1 << 2) | (1 << 4));
        for i in 0..8u16 {
            assert_eq!(emu.dsp_read16(PDATA), 0x4400 + i);
        }
        // burst exhausted: FIFO empty again
        assert_eq!(emu.dsp_read16(PSTS) & 1, 0);
        emu.dsp_write16(PCFG, 0);

        // infinite mode keeps refilling
        emu.dsp_write16(PADR, 0x3000);
        emu.dsp_write16(PCFG, (1 << 1) | (3 << 2) | (1 << 4));
        for i in 0..32u16 {
            assert_eq!(emu.dsp_read16(PDATA), 0x4400 + i);
        }
        assert_eq!(emu.dsp_read16(PSTS) & 1, 1);
        // cancel flushes the FIFO
        emu.dsp_write16(PCFG, 0);
        assert_eq!(emu.dsp_read16(PSTS) & 1, 0);
    }

    #[test]
    fn reg_mirroring_and_width_aliases() {
        let mut emu = emu_with_core(Box::new(G711Ucode::new(0)));
        finish_init(&mut emu);

        emu.dsp_write16(PCFG, 0x0200);
        assert_eq!(emu.dsp_read16(PCFG + 0x40), 0x0200);
        assert_eq!(emu.dsp_read32(PCFG), 0x0200);
        assert_eq!(emu.dsp_read8(PCFG + 1), 0x02);

        // byte writes only touch the addressed half
        emu.dsp_write8(PCFG + 1, 0x04);
        assert_eq!(emu.dsp_read16(PCFG), 0x0400);

        emu.dsp_write16(CMD0 + 0x40, 0x7777);
        assert_eq!(emu.dsp_read16(CMD0), 0x7777);
    }

    #[test]
    fn snapshot_round_trip_preserves_pending_completion() {
        let mut emu = emu_with_core(Box::new(G711Ucode::new(0)));
        finish_init(&mut emu);

        for (i, s) in [0x0000u16, 0x4000, 0xC000, 0x7FFF].iter().enumerate() {
            emu.mem.write16(0x100 + i as u32 * 2, *s);
        }
        host_write_pipe(&mut emu, 7, &[0x0000, 0x0101, 0, 0x100, 0, 0x200, 0, 4]);
        emu.dsp_write16(CMD2, 7);

        // snapshot mid-command, before the completion deadline
        let snap = emu.snapshot();
        let bytes = snap.to_bytes().unwrap();
        let restored = Snapshot::from_bytes(&bytes).unwrap();

        let mut emu2 = Emulator::new(Box::new(Ram::new(0, 0x2_0000)));
        for (i, s) in [0x0000u16, 0x4000, 0xC000, 0x7FFF].iter().enumerate() {
            emu2.mem.write16(0x100 + i as u32 * 2, *s);
        }
        emu2.restore(&restored).unwrap();
        assert_eq!(emu2.dsp.core_id(), Some((2 << 16) | 0));

        emu2.advance(400);
        assert_eq!(emu2.mem.read8(0x200), 0x7F);
        assert_eq!(emu2.mem.read8(0x203), 0x80);
    }

    #[test]
    fn snapshot_of_idle_port_restores_cleanly() {
        let emu = Emulator::new(Box::new(Ram::new(0, 0x1000)));
        let snap = emu.snapshot();
        let mut emu2 = Emulator::new(Box::new(Ram::new(0, 0x1000)));
        emu2.restore(&snap).unwrap();
        assert_eq!(emu2.dsp.core_id(), None);
    }

    #[test]
    fn stop_command_exits_engine() {
        let mut emu = emu_with_core(Box::new(G711Ucode::new(0)));
        finish_init(&mut emu);

        emu.dsp_write16(CMD2, 0x8000);
        assert_eq!(emu.dsp_read16(REP2), 0x8000);
    }

    #[test]
    fn reset_hold_stops_engine() {
        let mut emu = emu_with_core(Box::new(G711Ucode::new(0)));
        finish_init(&mut emu);
        assert!(emu.dsp.core_id().is_some());

        emu.dsp_write16(PCFG, 1);
        assert!(emu.dsp.core_id().is_none());
        // replies read as zero with no engine
        assert_eq!(emu.dsp_read16(REP0), 0);
    }
}
