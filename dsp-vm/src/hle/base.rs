//! Shared host-protocol substrate for the native ucodes.
//!
//! Every ucode the console ships speaks the same protocol to the host:
//! three command and three reply registers, sixteen message pipes in DSP
//! data memory, a pair of semaphore bitmaps, a mono audio output channel
//! and a mic input channel fed through the DSP's serial port. The
//! substrate owns that state; the concrete ucodes layer their command
//! decoding on top.

use serde::{Deserialize, Serialize};

use super::DspCtx;
use crate::fifo::Fifo;
use crate::mic::MicSource;
use crate::snapshot::UcodeBaseState;

/// Word address of the 16 pipe descriptors in DSP data memory.
pub const PIPE_MONITOR_ADDR: u32 = 0x0800;
/// Word address of the first default pipe buffer.
pub const PIPE_BUFFER_ADDR: u32 = 0x1000;
/// Word address of the mic ring buffer.
pub const MIC_BUFFER_ADDR: u32 = 0x2000;

/// Deferred action fired when the host drains a specific reply register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyCallback {
    /// Post the pipe monitor address and raise semaphore bit 15 once the
    /// three post-start replies have been read.
    InitDone,
    /// Write the "play sound" completion message into pipe 4.
    AudioPlayDone(u32),
    /// Write a mic command response (with the mic buffer address) into
    /// pipe 4.
    MicCmdDone(u32),
}

pub struct UcodeBase {
    pub(super) class: u32,
    pub(super) version: i32,

    exit: bool,

    pub(super) cmd_reg: [u16; 3],
    pub(super) cmd_written: [bool; 3],
    reply_reg: [u16; 3],
    reply_written: [bool; 3],
    reply_cb: [Option<ReplyCallback>; 3],

    sem_in: u16,
    sem_out: u16,
    sem_mask: u16,

    audio_playing: bool,
    audio_halve: bool,
    audio_addr: u32,
    audio_len: u32,
    audio_fifo: Fifo<i16, 16>,

    mic_sampling: bool,
    mic_fifo: Fifo<i16, 8>,
}

impl UcodeBase {
    pub fn new(class: u32, version: i32) -> Self {
        Self {
            class,
            version,
            exit: false,
            cmd_reg: [0; 3],
            cmd_written: [false; 3],
            reply_reg: [0; 3],
            reply_written: [false; 3],
            reply_cb: [None; 3],
            sem_in: 0,
            sem_out: 0,
            sem_mask: 0,
            audio_playing: false,
            audio_halve: false,
            audio_addr: 0,
            audio_len: 0,
            audio_fifo: Fifo::new(),
            mic_sampling: false,
            mic_fifo: Fifo::new(),
        }
    }

    pub fn id(&self) -> u32 {
        (self.class << 16) | (self.version as u32 & 0xFFFF)
    }

    pub fn reset(&mut self) {
        self.exit = false;

        self.cmd_reg = [0; 3];
        self.cmd_written = [false; 3];
        self.reply_reg = [0; 3];
        self.reply_written = [false; 3];
        self.reply_cb = [None; 3];

        self.sem_in = 0;
        self.sem_out = 0;
        self.sem_mask = 0;

        self.audio_playing = false;
        self.audio_halve = false;
        self.audio_addr = 0;
        self.audio_len = 0;
        self.audio_fifo.clear();

        self.mic_sampling = false;
        self.mic_fifo.clear();
    }

    /// Write the pipe descriptor table and post the three initial replies.
    pub fn start(&mut self, ctx: &mut DspCtx) {
        let mut addr = PIPE_MONITOR_ADDR;
        for i in 0..16u16 {
            ctx.wram.data_write(addr, (PIPE_BUFFER_ADDR + 0x100 * i as u32) as u16);
            ctx.wram.data_write(addr + 1, 0x200);
            ctx.wram.data_write(addr + 2, 0);
            ctx.wram.data_write(addr + 3, 0);
            ctx.wram.data_write(addr + 4, i);
            addr += 5;
        }

        self.send_reply(ctx, 0, 1);
        self.send_reply(ctx, 1, 1);
        self.send_reply(ctx, 2, 1);
        self.set_reply_read_callback(ctx, 2, ReplyCallback::InitDone);
    }

    pub fn recv_data_ready(&self, index: usize) -> bool {
        self.reply_written[index]
    }

    pub fn send_data_empty(&self, index: usize) -> bool {
        !self.cmd_written[index]
    }

    pub fn recv_data(&mut self, ctx: &mut DspCtx, index: usize) -> u16 {
        if !self.reply_written[index] {
            return 0;
        }

        let ret = self.reply_reg[index];
        self.reply_written[index] = false;

        if let Some(cb) = self.reply_cb[index].take() {
            self.on_reply_read(ctx, index, cb);
        }

        ret
    }

    /// Common part of a host command write. The concrete ucodes run their
    /// own handling after this, whether or not the write was accepted.
    pub fn send_data(&mut self, ctx: &mut DspCtx, index: usize, val: u16) {
        if self.cmd_written[index] {
            log::warn!("[DSP HLE] CMD{} write {:04X} dropped, register still full", index, val);
            return;
        }

        self.cmd_reg[index] = val;
        self.cmd_written[index] = true;

        if self.exit {
            return;
        }

        if index == 2 {
            if val == 0x8000 {
                // stop request
                self.send_reply(ctx, 2, 0x8000);
                self.exit = true;
            } else if val == 5 {
                // data arrived on the audio pipe
                self.try_start_audio_cmd(ctx);
            }

            self.cmd_written[2] = false;
        }
    }

    pub fn send_reply(&mut self, ctx: &mut DspCtx, index: usize, val: u16) {
        if self.reply_written[index] {
            log::warn!("[DSP HLE] REP{} write {:04X} dropped, register still full", index, val);
            return;
        }

        self.reply_reg[index] = val;
        self.reply_written[index] = true;
        ctx.irq.rep[index] = true;
    }

    /// Install a deferred action on a reply register. If the register is
    /// currently empty the action fires immediately.
    pub fn set_reply_read_callback(&mut self, ctx: &mut DspCtx, index: usize, cb: ReplyCallback) {
        self.reply_cb[index] = Some(cb);

        if !self.reply_written[index] {
            if let Some(cb) = self.reply_cb[index].take() {
                self.on_reply_read(ctx, index, cb);
            }
        }
    }

    fn on_reply_read(&mut self, ctx: &mut DspCtx, index: usize, cb: ReplyCallback) {
        if index != 2 {
            return;
        }

        match cb {
            ReplyCallback::InitDone => {
                // after the sync replies were read, publish the pipe table
                self.send_reply(ctx, 2, PIPE_MONITOR_ADDR as u16);
                self.set_semaphore_out(ctx, 0x8000);
            }
            ReplyCallback::AudioPlayDone(outlen) => {
                let resp = [0x0000, 0x1200, (outlen >> 16) as u16, outlen as u16];
                self.write_pipe(ctx, 4, &resp);
            }
            ReplyCallback::MicCmdDone(cmd) => {
                let resp = [
                    (cmd >> 16) as u16,
                    cmd as u16,
                    (MIC_BUFFER_ADDR >> 16) as u16,
                    MIC_BUFFER_ADDR as u16,
                ];
                self.write_pipe(ctx, 4, &resp);
            }
        }
    }

    // Semaphores

    pub fn semaphore(&self) -> u16 {
        self.sem_out
    }

    pub fn set_semaphore(&mut self, val: u16) {
        self.sem_in |= val;
    }

    pub fn clear_semaphore(&mut self, val: u16) {
        self.sem_out &= !val;
    }

    pub fn mask_semaphore(&mut self, val: u16) {
        self.sem_mask = val;
    }

    /// DSP-side semaphore raise. Any unmasked bit requests the host IRQ.
    pub fn set_semaphore_out(&mut self, ctx: &mut DspCtx, val: u16) {
        self.sem_out |= val;
        if self.sem_out & !self.sem_mask != 0 {
            ctx.irq.sem = true;
        }
    }

    // Pipes

    fn pipe_desc_addr(index: u8) -> u32 {
        PIPE_MONITOR_ADDR + index as u32 * 5
    }

    /// Queued length of a pipe, in words.
    pub fn pipe_length(&self, ctx: &DspCtx, index: u8) -> u32 {
        let desc = Self::pipe_desc_addr(index);
        let len = ctx.wram.data_read(desc + 1) as u32;
        let p2 = ctx.wram.data_read(desc + 2);
        let p3 = ctx.wram.data_read(desc + 3);
        let rdptr = (p2 & 0x7FFF) as u32;
        let wrptr = (p3 & 0x7FFF) as u32;

        let ret = if (p2 ^ p3) & 0x8000 != 0 {
            wrptr + len - rdptr
        } else {
            wrptr.wrapping_sub(rdptr)
        };

        if ret & 1 != 0 {
            log::warn!("[DSP HLE] pipe {} has odd byte length {}", index, ret);
        }
        ret >> 1
    }

    /// Dequeue up to `dst.len()` words. Posts the pipe index on REP2 and
    /// raises semaphore bit 15.
    pub fn read_pipe(&mut self, ctx: &mut DspCtx, index: u8, dst: &mut [u16]) -> usize {
        let desc = Self::pipe_desc_addr(index);
        let bufaddr = ctx.wram.data_read(desc) as u32;
        let pipelen = (ctx.wram.data_read(desc + 1) >> 1) as u32;
        let p2 = ctx.wram.data_read(desc + 2);
        let p3 = ctx.wram.data_read(desc + 3);
        let mut rdptr = ((p2 & 0x7FFF) >> 1) as u32;
        let mut rdphase = p2 & 0x8000;
        let wrptr = ((p3 & 0x7FFF) >> 1) as u32;

        let mut rdlen = 0;
        for slot in dst.iter_mut() {
            *slot = ctx.wram.data_read(bufaddr + rdptr);
            rdptr += 1;
            rdlen += 1;
            if rdptr >= pipelen {
                rdptr = 0;
                rdphase ^= 0x8000;
            }
            if rdptr == wrptr {
                break;
            }
        }

        ctx.wram.data_write(desc + 2, ((rdptr << 1) as u16) | rdphase);
        let echo = ctx.wram.data_read(desc + 4);
        self.send_reply(ctx, 2, echo);
        self.set_semaphore_out(ctx, 0x8000);

        rdlen
    }

    /// Enqueue words. Stops early when the pipe fills; the remaining
    /// words are discarded. Posts the pipe index on REP2 and raises
    /// semaphore bit 15.
    pub fn write_pipe(&mut self, ctx: &mut DspCtx, index: u8, data: &[u16]) -> usize {
        let desc = Self::pipe_desc_addr(index);
        let bufaddr = ctx.wram.data_read(desc) as u32;
        let pipelen = (ctx.wram.data_read(desc + 1) >> 1) as u32;
        let p2 = ctx.wram.data_read(desc + 2);
        let p3 = ctx.wram.data_read(desc + 3);
        let rdptr = ((p2 & 0x7FFF) >> 1) as u32;
        let mut wrptr = ((p3 & 0x7FFF) >> 1) as u32;
        let mut wrphase = p3 & 0x8000;

        let mut wrlen = 0;
        for &val in data {
            ctx.wram.data_write(bufaddr + wrptr, val);
            wrptr += 1;
            wrlen += 1;
            if wrptr >= pipelen {
                wrptr = 0;
                wrphase ^= 0x8000;
            }
            if wrptr == rdptr {
                log::error!("[DSP HLE] pipe {} is full", index);
                break;
            }
        }

        ctx.wram.data_write(desc + 3, ((wrptr << 1) as u16) | wrphase);
        let echo = ctx.wram.data_read(desc + 4);
        self.send_reply(ctx, 2, echo);
        self.set_semaphore_out(ctx, 0x8000);

        wrlen
    }

    // Audio output and mic input

    /// Decode an 8-word command from pipe 5 and start the matching audio
    /// or mic operation.
    pub fn try_start_audio_cmd(&mut self, ctx: &mut DspCtx) {
        if self.pipe_length(ctx, 5) < 8 {
            return;
        }

        let mut params = [0u16; 8];
        self.read_pipe(ctx, 5, &mut params);
        let cmd = ((params[0] as u32) << 16) | params[1] as u32;
        let addr = ((params[2] as u32) << 16) | params[3] as u32;
        let len = ((params[4] as u32) << 16) | params[5] as u32;

        let cmdtype = (cmd >> 12) & 0xF;
        let cmdaction = (cmd >> 8) & 0xF;
        if cmdtype == 1 && cmdaction == 1 {
            // play sound
            self.audio_halve = cmd & (1 << 1) != 0;
            self.audio_addr = addr;
            self.audio_len = len;
            self.audio_playing = true;

            if self.audio_fifo.is_empty() {
                self.audio_out_advance(ctx);
            }
        } else if cmdtype == 2 {
            if cmdaction == 1 {
                // start mic sampling
                self.mic_sampling = true;
                self.mic_fifo.clear();
                ctx.mic.start(MicSource::DsiDsp);
            } else if cmdaction == 2 {
                // stop mic sampling
                ctx.mic.stop(MicSource::DsiDsp);
                self.mic_sampling = false;
            }

            if cmdaction == 1 || cmdaction == 2 {
                // reinitialize the mic ring
                let mut addr = MIC_BUFFER_ADDR;
                ctx.wram.data_write(addr, (MIC_BUFFER_ADDR + 3) as u16);
                ctx.wram.data_write(addr + 1, 0x1000);
                ctx.wram.data_write(addr + 2, 0);
                addr += 3;
                for i in 0..0x1000 {
                    ctx.wram.data_write(addr + i, 0);
                }
            }

            // tell the host where the mic buffer is
            self.set_reply_read_callback(ctx, 2, ReplyCallback::MicCmdDone(cmd));
        }
    }

    /// Refill the audio FIFO from host memory. Samples are mono and
    /// duplicated into a stereo pair.
    pub fn audio_out_advance(&mut self, ctx: &mut DspCtx) {
        while !self.audio_fifo.is_full() {
            let mut sample = ctx.mem.read16(self.audio_addr) as i16;

            // the halve bit isn't supported by the early AAC ucode
            if self.audio_halve && self.version != -1 {
                let s = sample as i32;
                sample = ((s + (s >> 15)) >> 1) as i16;
            }

            self.audio_fifo.push(sample);
            self.audio_fifo.push(sample);

            self.audio_addr = self.audio_addr.wrapping_add(2);
            self.audio_len = self.audio_len.wrapping_sub(1);
            if self.audio_len == 0 {
                self.audio_playing = false;

                self.set_reply_read_callback(ctx, 2, ReplyCallback::AudioPlayDone(self.audio_len));
                break;
            }
        }
    }

    /// Drain the mic FIFO into the ring buffer in DSP data memory.
    ///
    /// The ring header declares a length of 0x1000 words, but the write
    /// index is masked with 0x3FFF, so positions past the declared length
    /// land in the words after the ring. Observed hardware/ucode behavior,
    /// kept as is.
    pub fn mic_in_advance(&mut self, ctx: &mut DspCtx) {
        let buflen = ctx.wram.data_read(MIC_BUFFER_ADDR + 1);
        let mut wrpos = ctx.wram.data_read(MIC_BUFFER_ADDR + 2);
        let data_base = MIC_BUFFER_ADDR + 3;

        while let Some(val) = self.mic_fifo.pop() {
            ctx.wram.data_write(data_base + (wrpos & 0x3FFF) as u32, val as u16);

            wrpos = wrpos.wrapping_add(1);
            if wrpos >= buflen {
                wrpos = 0;
            }
        }

        ctx.wram.data_write(MIC_BUFFER_ADDR + 2, wrpos);
    }

    /// One I2S frame: capture a mic sample, emit one stereo frame.
    pub fn sample_clock(&mut self, ctx: &mut DspCtx, output: &mut [i16; 2], input: i16) {
        if self.mic_sampling && !self.mic_fifo.is_full() {
            self.mic_fifo.push(input);
            if self.mic_fifo.is_full() {
                self.mic_in_advance(ctx);
            }
        }

        if self.audio_fifo.is_empty() && self.audio_playing {
            self.audio_out_advance(ctx);
        }

        if self.audio_fifo.is_empty() {
            output[0] = 0;
            output[1] = 0;
        } else {
            output[0] = self.audio_fifo.pop().unwrap_or(0);
            output[1] = self.audio_fifo.pop().unwrap_or(0);
        }
    }

    pub fn audio_playing(&self) -> bool {
        self.audio_playing
    }

    // Snapshot support

    pub fn snapshot_state(&self) -> UcodeBaseState {
        UcodeBaseState {
            exit: self.exit,
            cmd_reg: self.cmd_reg,
            cmd_written: self.cmd_written,
            reply_reg: self.reply_reg,
            reply_written: self.reply_written,
            reply_cb: self.reply_cb,
            sem_in: self.sem_in,
            sem_out: self.sem_out,
            sem_mask: self.sem_mask,
            audio_playing: self.audio_playing,
            audio_halve: self.audio_halve,
            audio_addr: self.audio_addr,
            audio_len: self.audio_len,
            audio_fifo: self.audio_fifo.contents(),
            mic_sampling: self.mic_sampling,
            mic_fifo: self.mic_fifo.contents(),
        }
    }

    pub fn restore_state(&mut self, state: &UcodeBaseState) {
        self.exit = state.exit;
        self.cmd_reg = state.cmd_reg;
        self.cmd_written = state.cmd_written;
        self.reply_reg = state.reply_reg;
        self.reply_written = state.reply_written;
        self.reply_cb = state.reply_cb;
        self.sem_in = state.sem_in;
        self.sem_out = state.sem_out;
        self.sem_mask = state.sem_mask;
        self.audio_playing = state.audio_playing;
        self.audio_halve = state.audio_halve;
        self.audio_addr = state.audio_addr;
        self.audio_len = state.audio_len;
        self.audio_fifo.restore(&state.audio_fifo);
        self.mic_sampling = state.mic_sampling;
        self.mic_fifo.restore(&state.mic_fifo);
    }
}

/// Copy a block of host memory into DSP data memory.
///
/// Transfers are 16-bit-aligned on both ends; `len` is in bytes.
pub(crate) fn read_host_block(ctx: &mut DspCtx, mut dsp_addr: u32, mut addr: u32, mut len: u32) {
    if len >= 2 && addr & 2 != 0 {
        let v = ctx.mem.read16(addr);
        ctx.wram.data_write(dsp_addr, v);
        dsp_addr += 1;
        addr += 2;
        len -= 2;
    }
    while len >= 4 {
        let v = ctx.mem.read32(addr);
        ctx.wram.data_write(dsp_addr, v as u16);
        ctx.wram.data_write(dsp_addr + 1, (v >> 16) as u16);
        dsp_addr += 2;
        addr += 4;
        len -= 4;
    }
    if len != 0 {
        let v = ctx.mem.read16(addr);
        ctx.wram.data_write(dsp_addr, v);
    }
}

/// Copy a block of DSP data memory out to host memory.
pub(crate) fn write_host_block(ctx: &mut DspCtx, mut dsp_addr: u32, mut addr: u32, mut len: u32) {
    if len >= 2 && addr & 2 != 0 {
        let v = ctx.wram.data_read(dsp_addr);
        ctx.mem.write16(addr, v);
        dsp_addr += 1;
        addr += 2;
        len -= 2;
    }
    while len >= 4 {
        let lo = ctx.wram.data_read(dsp_addr) as u32;
        let hi = ctx.wram.data_read(dsp_addr + 1) as u32;
        ctx.mem.write32(addr, lo | (hi << 16));
        dsp_addr += 2;
        addr += 4;
        len -= 4;
    }
    if len != 0 {
        let v = ctx.wram.data_read(dsp_addr);
        ctx.mem.write16(addr, v);
    }
}
