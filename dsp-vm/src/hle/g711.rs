//! G.711 companding ucode.
//!
//! Commands arrive as 8-word messages on pipe 7; the host notifies the
//! DSP with a `CMD2 = 7` write after queueing one. Encoding maps 16-bit
//! PCM in host memory to A-law or mu-law bytes, decoding goes the other
//! way. Lengths count samples.

use super::base::UcodeBase;
use super::{CLASS_G711, DspCore, DspCtx};
use crate::sched::EventId;
use crate::snapshot::{UcodeSnapshot, UcodeVar};

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;

pub struct G711Ucode {
    base: UcodeBase,
    cmd_state: u8,
    cmd_params: [u16; 8],
}

impl G711Ucode {
    pub fn new(version: i32) -> Self {
        log::info!("[DSP HLE] initializing G711 SDK ucode version {:02X}", version);
        Self {
            base: UcodeBase::new(CLASS_G711, version),
            cmd_state: STATE_IDLE,
            cmd_params: [0; 8],
        }
    }

    fn try_start_cmd(&mut self, ctx: &mut DspCtx) {
        if self.cmd_state != STATE_IDLE {
            return;
        }

        // runnable as soon as 8 words have been queued on pipe 7
        if self.base.pipe_length(ctx, 7) < 8 {
            return;
        }

        let mut params = [0u16; 8];
        self.base.read_pipe(ctx, 7, &mut params);
        self.cmd_params = params;

        let cmd = ((params[0] as u32) << 16) | params[1] as u32;
        let len = ((params[6] as u32) << 16) | params[7] as u32;

        let action = (cmd >> 8) & 0xF;
        let cmdtype = cmd & 0xFF;

        // gross estimation of the time the command takes on hardware
        let cmdtime = if cmdtype != 1 && cmdtype != 2 {
            1000
        } else if action == 1 {
            31u32.wrapping_mul(len)
        } else {
            14u32.wrapping_mul(len)
        };

        self.cmd_state = STATE_RUNNING;
        ctx.sched.schedule(EventId::HleFinish, 200 + cmdtime as u64, 0);
    }

    fn cmd_encode_alaw(&mut self, ctx: &mut DspCtx) {
        let mut src_addr = ((self.cmd_params[2] as u32) << 16) | self.cmd_params[3] as u32;
        let mut dst_addr = ((self.cmd_params[4] as u32) << 16) | self.cmd_params[5] as u32;
        let len = ((self.cmd_params[6] as u32) << 16) | self.cmd_params[7] as u32;

        for _ in 0..len {
            let val16 = ctx.mem.read16(src_addr) as i16;
            ctx.mem.write8(dst_addr, alaw_encode_sample(val16));
            src_addr = src_addr.wrapping_add(2);
            dst_addr = dst_addr.wrapping_add(1);
        }
    }

    fn cmd_encode_ulaw(&mut self, ctx: &mut DspCtx) {
        let mut src_addr = ((self.cmd_params[2] as u32) << 16) | self.cmd_params[3] as u32;
        let mut dst_addr = ((self.cmd_params[4] as u32) << 16) | self.cmd_params[5] as u32;
        let len = ((self.cmd_params[6] as u32) << 16) | self.cmd_params[7] as u32;

        for _ in 0..len {
            let val16 = ctx.mem.read16(src_addr) as i16;
            ctx.mem.write8(dst_addr, ulaw_encode_sample(val16));
            src_addr = src_addr.wrapping_add(2);
            dst_addr = dst_addr.wrapping_add(1);
        }
    }

    fn cmd_decode_alaw(&mut self, ctx: &mut DspCtx) {
        let mut src_addr = ((self.cmd_params[2] as u32) << 16) | self.cmd_params[3] as u32;
        let mut dst_addr = ((self.cmd_params[4] as u32) << 16) | self.cmd_params[5] as u32;
        let len = ((self.cmd_params[6] as u32) << 16) | self.cmd_params[7] as u32;

        for _ in 0..len {
            let val8 = ctx.mem.read8(src_addr);
            ctx.mem.write16(dst_addr, alaw_decode_sample(val8) as u16);
            src_addr = src_addr.wrapping_add(1);
            dst_addr = dst_addr.wrapping_add(2);
        }
    }

    fn cmd_decode_ulaw(&mut self, ctx: &mut DspCtx) {
        let mut src_addr = ((self.cmd_params[2] as u32) << 16) | self.cmd_params[3] as u32;
        let mut dst_addr = ((self.cmd_params[4] as u32) << 16) | self.cmd_params[5] as u32;
        let len = ((self.cmd_params[6] as u32) << 16) | self.cmd_params[7] as u32;

        for _ in 0..len {
            let val8 = ctx.mem.read8(src_addr);
            ctx.mem.write16(dst_addr, ulaw_decode_sample(val8) as u16);
            src_addr = src_addr.wrapping_add(1);
            dst_addr = dst_addr.wrapping_add(2);
        }
    }
}

fn alaw_encode_sample(val16: i16) -> u8 {
    const SEG_TBL: [i16; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];

    let mut val8: i16 = val16 >> 3;
    let xor8: i16;
    if val8 > 0 {
        xor8 = 0xD5;
    } else {
        val8 = !val8;
        xor8 = 0x55;
    }

    let mut seg = 0;
    while seg < 8 {
        if val8 <= SEG_TBL[seg] {
            break;
        }
        seg += 1;
    }

    if seg < 8 {
        let tmp = (seg as i16) << 4;
        let shift = if seg == 0 { 1 } else { seg };
        val8 = tmp | ((val8 >> shift) & 0xF);
    } else {
        val8 = 0x7F;
    }

    (val8 ^ xor8) as u8
}

fn ulaw_encode_sample(val16: i16) -> u8 {
    const SEG_TBL: [i16; 8] = [0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF, 0x1FFF];

    let mut val8: i16 = val16 >> 2;
    let xor8: i16;
    if val8 > 0 {
        xor8 = 0xFF;
    } else {
        val8 = !val8 + 1;
        xor8 = 0x7F;
    }

    if val8 > 0x1FDF {
        val8 = 0x1FDF;
    }
    val8 += 0x21;

    let mut seg = 0;
    while seg < 8 {
        if val8 <= SEG_TBL[seg] {
            break;
        }
        seg += 1;
    }

    if seg < 8 {
        let tmp = (seg as i16) << 4;
        val8 = tmp | ((val8 >> (seg + 1)) & 0xF);
    } else {
        val8 = 0x7F;
    }

    (val8 ^ xor8) as u8
}

fn alaw_decode_sample(input: u8) -> i16 {
    let val8 = (input as i8) ^ 0x55;
    let mut val16: i16 = (((val8 & 0xF) as i16) << 4) + 8;
    let shift = (val8 >> 4) & 7;
    if shift != 0 {
        val16 = (val16 + 0x100) << (shift - 1);
    }
    if val8 as u8 & 0x80 != 0 {
        val16 = -val16;
    }
    val16
}

fn ulaw_decode_sample(input: u8) -> i16 {
    let val8 = !(input as i8);
    let mut val16: i16 = (((val8 & 0xF) as i16) << 3) + 0x84;
    let shift = (val8 >> 4) & 7;
    val16 = 0x84 - (val16 << shift);
    if val8 as u8 & 0x80 != 0 {
        val16 = -val16;
    }
    val16
}

impl DspCore for G711Ucode {
    fn id(&self) -> u32 {
        self.base.id()
    }

    fn reset(&mut self) {
        self.base.reset();
        self.cmd_state = STATE_IDLE;
        self.cmd_params = [0; 8];
    }

    fn start(&mut self, ctx: &mut DspCtx) {
        self.base.start(ctx);
    }

    fn send_data(&mut self, ctx: &mut DspCtx, index: usize, val: u16) {
        self.base.send_data(ctx, index, val);

        // pipe 7 carries commands and parameters; a CMD2 = 7 write tells
        // us the pipe has been written
        if index == 2 {
            if val == 7 {
                self.try_start_cmd(ctx);
            }
            self.base.cmd_written[2] = false;
        }
    }

    fn recv_data(&mut self, ctx: &mut DspCtx, index: usize) -> u16 {
        self.base.recv_data(ctx, index)
    }

    fn recv_data_ready(&self, index: usize) -> bool {
        self.base.recv_data_ready(index)
    }

    fn send_data_empty(&self, index: usize) -> bool {
        self.base.send_data_empty(index)
    }

    fn semaphore(&self) -> u16 {
        self.base.semaphore()
    }

    fn set_semaphore(&mut self, val: u16) {
        self.base.set_semaphore(val);
    }

    fn clear_semaphore(&mut self, val: u16) {
        self.base.clear_semaphore(val);
    }

    fn mask_semaphore(&mut self, val: u16) {
        self.base.mask_semaphore(val);
    }

    fn sample_clock(&mut self, ctx: &mut DspCtx, output: &mut [i16; 2], input: i16) {
        self.base.sample_clock(ctx, output, input);
    }

    fn finish_cmd(&mut self, ctx: &mut DspCtx, _param: u32) {
        if self.cmd_state != STATE_RUNNING {
            return;
        }

        let cmd = ((self.cmd_params[0] as u32) << 16) | self.cmd_params[1] as u32;
        let action = (cmd >> 8) & 0xF;
        let cmdtype = cmd & 0xFF;

        if action == 1 {
            match cmdtype {
                1 => self.cmd_encode_alaw(ctx),
                2 => self.cmd_encode_ulaw(ctx),
                _ => {}
            }
        } else {
            match cmdtype {
                1 => self.cmd_decode_alaw(ctx),
                2 => self.cmd_decode_ulaw(ctx),
                _ => {}
            }
        }

        // response = processed length (even for invalid cmd type)
        let resp = [self.cmd_params[6], self.cmd_params[7]];
        self.base.write_pipe(ctx, 6, &resp);

        self.cmd_state = STATE_IDLE;
        self.try_start_cmd(ctx);
    }

    fn snapshot(&self) -> UcodeSnapshot {
        UcodeSnapshot {
            id: self.id(),
            base: self.base.snapshot_state(),
            var: UcodeVar::G711 {
                cmd_state: self.cmd_state,
                cmd_params: self.cmd_params.to_vec(),
            },
        }
    }

    fn restore(&mut self, snap: &UcodeSnapshot) {
        self.base.restore_state(&snap.base);
        if let UcodeVar::G711 { cmd_state, cmd_params } = &snap.var {
            self.cmd_state = *cmd_state;
            for (dst, src) in self.cmd_params.iter_mut().zip(cmd_params.iter()) {
                *dst = *src;
            }
        }
    }
}
