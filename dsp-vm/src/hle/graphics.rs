//! Graphics SDK ucode: image scaling and YUV conversion.
//!
//! `CMD0` selects the operation (1 = scale, 2 = YUV to RGB); pipe 7
//! carries the parameter block, and a `CMD2 = 7` write signals that the
//! pipe has been written. All pixels are RGB555 with the top bit set.
//!
//! The scalers stage rows through two scratch areas in DSP data memory
//! (sources at word 0x4000, output rows at word 0xC000), like the real
//! ucode does.

use super::base::{UcodeBase, read_host_block, write_host_block};
use super::{CLASS_GRAPHICS, DspCore, DspCtx};
use crate::sched::EventId;
use crate::snapshot::{UcodeSnapshot, UcodeVar};

const STATE_IDLE: u8 = 0;
const STATE_COLLECTING: u8 = 1;
const STATE_RUNNING: u8 = 2;

const SRC_SCRATCH: u32 = 0x4000;
const DST_SCRATCH: u32 = 0xC000;

pub struct GraphicsUcode {
    base: UcodeBase,
    cmd_state: u8,
    cmd_index: u16,
    cmd_params: [u16; 16],
}

impl GraphicsUcode {
    pub fn new(version: i32) -> Self {
        log::info!("[DSP HLE] initializing Graphics SDK ucode version {:02X}", version);
        Self {
            base: UcodeBase::new(CLASS_GRAPHICS, version),
            cmd_state: STATE_IDLE,
            cmd_index: 0,
            cmd_params: [0; 16],
        }
    }

    fn try_start_cmd(&mut self, ctx: &mut DspCtx) {
        if self.cmd_state == STATE_IDLE {
            if !self.base.cmd_written[0] {
                return;
            }

            self.cmd_state = STATE_COLLECTING;
            self.cmd_index = self.base.cmd_reg[0];
            self.base.cmd_written[0] = false;
        }

        if self.cmd_state != STATE_COLLECTING {
            return;
        }

        // runnable once all parameters are in pipe 7; the command time is
        // a gross estimation of how long the operation takes on hardware
        // (bicubic scaling is in fact quite slow)
        let pipelen = self.base.pipe_length(ctx, 7);

        let cmdtime: u32;

        match self.cmd_index {
            1 => {
                // scaling
                if pipelen < 14 {
                    return;
                }
                let mut params = [0u16; 14];
                self.base.read_pipe(ctx, 7, &mut params);
                self.cmd_params[..14].copy_from_slice(&params);

                let src_width = self.cmd_params[11] as u32;
                let src_height = self.cmd_params[12] as u32;

                if self.cmd_params[4] == 10 {
                    // one-third scaling fails unless both sub-rectangle
                    // dimensions are multiples of 3
                    if src_width % 3 != 0 || src_height % 3 != 0 {
                        self.base.send_reply(ctx, 1, 0);
                        self.cmd_state = STATE_IDLE;
                        return;
                    }

                    cmdtime = 30u32.wrapping_mul(src_width).wrapping_mul(src_height);
                } else {
                    let dst_width = (src_width * self.cmd_params[7] as u32) / 1000;
                    let dst_height = (src_height * self.cmd_params[8] as u32) / 1000;

                    let base_time = 4u32.wrapping_mul(src_width).wrapping_mul(src_height);
                    let area = dst_width.wrapping_mul(dst_height);
                    cmdtime = base_time.wrapping_add(match self.cmd_params[4] {
                        2 => 58u32.wrapping_mul(area),
                        3 => 605u32.wrapping_mul(area),
                        _ => 26u32.wrapping_mul(area),
                    });
                }
            }

            2 => {
                // yuv2rgb
                if pipelen < 6 {
                    return;
                }
                let mut params = [0u16; 6];
                self.base.read_pipe(ctx, 7, &mut params);
                self.cmd_params[..6].copy_from_slice(&params);

                let len = ((self.cmd_params[1] as u32) << 16) | self.cmd_params[0] as u32;
                cmdtime = 24u32.wrapping_mul(len >> 1);
            }

            _ => {
                self.base.send_reply(ctx, 1, 0);
                self.cmd_state = STATE_IDLE;
                return;
            }
        }

        self.cmd_state = STATE_RUNNING;
        ctx.sched.schedule(EventId::HleFinish, 200 + cmdtime as u64, 0);
    }

    fn cmd_scaling_nearest(&mut self, ctx: &mut DspCtx) {
        let src_addr = ((self.cmd_params[1] as u32) << 16) | self.cmd_params[0] as u32;
        let mut dst_addr = ((self.cmd_params[3] as u32) << 16) | self.cmd_params[2] as u32;
        let src_width = self.cmd_params[5] as u32;
        let width_scale = self.cmd_params[7] as u32;
        let height_scale = self.cmd_params[8] as u32;
        let rect_xoffset = self.cmd_params[9] as u32;
        let rect_yoffset = self.cmd_params[10] as u32;
        let rect_width = self.cmd_params[11] as u32;
        let rect_height = self.cmd_params[12] as u32;

        let dst_width = (rect_width * width_scale) / 1000;
        let dst_height = (rect_height * height_scale) / 1000;

        if dst_width == 0 || dst_height == 0 || rect_width > 16384 || dst_width > 16384 {
            log::warn!("[DSP HLE] incorrect parameters for nearest scaling");
            return;
        }

        let sx_incr = step_increment(rect_width, 2, dst_width);
        let sy_incr = step_increment(rect_height, 2, dst_height);

        let src_addr = src_addr.wrapping_add(((rect_yoffset * src_width) + rect_xoffset) << 1);
        let mut sy = 0x3FFu32;

        // first line
        read_host_block(ctx, SRC_SCRATCH, src_addr, rect_width << 1);

        for _dy in 0..dst_height {
            let mut sx = 0x3FFu32;

            for dx in 0..dst_width {
                let val = ctx.wram.data_read(SRC_SCRATCH + (sx >> 10));
                ctx.wram.data_write(DST_SCRATCH + dx, val);

                sx = sx.wrapping_add(sx_incr);
            }

            write_host_block(ctx, DST_SCRATCH, dst_addr, dst_width << 1);
            dst_addr = dst_addr.wrapping_add(dst_width << 1);

            let synext = sy.wrapping_add(sy_incr);
            if (synext >> 10) != (sy >> 10) {
                // the row reload steps by the sub-rectangle width, not
                // the full source stride; kept from the original
                read_host_block(
                    ctx,
                    SRC_SCRATCH,
                    src_addr.wrapping_add(((synext >> 10).wrapping_mul(rect_width)) << 1),
                    rect_width << 1,
                );
            }
            sy = synext;
        }
    }

    fn cmd_scaling_bilinear(&mut self, ctx: &mut DspCtx) {
        let src_addr = ((self.cmd_params[1] as u32) << 16) | self.cmd_params[0] as u32;
        let mut dst_addr = ((self.cmd_params[3] as u32) << 16) | self.cmd_params[2] as u32;
        let src_width = self.cmd_params[5] as u32;
        let width_scale = self.cmd_params[7] as u32;
        let height_scale = self.cmd_params[8] as u32;
        let rect_xoffset = self.cmd_params[9] as u32;
        let rect_yoffset = self.cmd_params[10] as u32;
        let rect_width = self.cmd_params[11] as u32;
        let rect_height = self.cmd_params[12] as u32;

        let dst_width = (rect_width * width_scale) / 1000;
        let dst_height = (rect_height * height_scale) / 1000;

        if dst_width == 0 || dst_height == 0 || rect_width > 8192 || dst_width > 8192 {
            log::warn!("[DSP HLE] incorrect parameters for bilinear scaling");
            return;
        }

        let sx_incr = step_increment(rect_width, 2, dst_width);
        let sy_incr = step_increment(rect_height, 2, dst_height);

        let src_addr = src_addr.wrapping_add(((rect_yoffset * src_width) + rect_xoffset) << 1);
        let mut sy = 0x200u32;

        // the current line and the next one stay staged; both start as
        // the first source line
        read_host_block(ctx, SRC_SCRATCH, src_addr, rect_width << 1);
        read_host_block(ctx, SRC_SCRATCH + rect_width, src_addr, rect_width << 1);

        for _dy in 0..dst_height {
            let mut sx = 0x200u32;

            for dx in 0..dst_width {
                let v00 = ctx.wram.data_read(SRC_SCRATCH + (sx >> 10)) as u32;
                let v10 = ctx.wram.data_read(SRC_SCRATCH + (sx >> 10) + 1) as u32;
                let v01 = ctx.wram.data_read(SRC_SCRATCH + rect_width + (sx >> 10)) as u32;
                let v11 = ctx.wram.data_read(SRC_SCRATCH + rect_width + (sx >> 10) + 1) as u32;

                let fx0 = sx & 0x3FF;
                let fx1 = 0x400 - fx0;
                let fy0 = sy & 0x3FF;
                let fy1 = 0x400 - fy0;

                let mut out = 0x8000u16;
                for shift in [0u32, 5, 10] {
                    let c00 = (v00 >> shift) & 0x1F;
                    let c10 = (v10 >> shift) & 0x1F;
                    let c01 = (v01 >> shift) & 0x1F;
                    let c11 = (v11 >> shift) & 0x1F;

                    let f = (((c00 * fx1 + c10 * fx0) * fy1)
                        + ((c01 * fx1 + c11 * fx0) * fy0))
                        >> 20;
                    out |= ((f & 0x1F) << shift) as u16;
                }

                ctx.wram.data_write(DST_SCRATCH + dx, out);

                sx = sx.wrapping_add(sx_incr);
            }

            write_host_block(ctx, DST_SCRATCH, dst_addr, dst_width << 1);
            dst_addr = dst_addr.wrapping_add(dst_width << 1);

            let synext = sy.wrapping_add(sy_incr);
            if (synext >> 10) != (sy >> 10) {
                let row_addr =
                    src_addr.wrapping_add(((synext >> 10).wrapping_mul(src_width)) << 1);
                read_host_block(ctx, SRC_SCRATCH, row_addr, rect_width << 1);
                read_host_block(ctx, SRC_SCRATCH + rect_width, row_addr, rect_width << 1);
            }
            sy = synext;
        }
    }

    fn cmd_scaling_bicubic(&mut self, ctx: &mut DspCtx) {
        let src_addr = ((self.cmd_params[1] as u32) << 16) | self.cmd_params[0] as u32;
        let mut dst_addr = ((self.cmd_params[3] as u32) << 16) | self.cmd_params[2] as u32;
        let src_width = self.cmd_params[5] as u32;
        let width_scale = self.cmd_params[7] as u32;
        let height_scale = self.cmd_params[8] as u32;
        let rect_xoffset = self.cmd_params[9] as u32;
        let rect_yoffset = self.cmd_params[10] as u32;
        let rect_width = self.cmd_params[11] as u32;
        let rect_height = self.cmd_params[12] as u32;

        let dst_width = (rect_width * width_scale) / 1000;
        let dst_height = (rect_height * height_scale) / 1000;

        if dst_width == 0 || dst_height == 0 || rect_width > 4096 || dst_width > 4096 {
            log::warn!("[DSP HLE] incorrect parameters for bicubic scaling");
            return;
        }

        let sx_incr = step_increment(rect_width, 4, dst_width);
        let sy_incr = step_increment(rect_height, 4, dst_height);

        let src_addr = src_addr.wrapping_add(((rect_yoffset * src_width) + rect_xoffset) << 1);
        let mut sy = 0x200u32;

        // four lines around the current position stay staged
        for i in 0..4u32 {
            read_host_block(
                ctx,
                SRC_SCRATCH + rect_width * i,
                src_addr.wrapping_add((src_width * i) << 1),
                rect_width << 1,
            );
        }

        for _dy in 0..dst_height {
            let mut sx = 0x200u32;

            for dx in 0..dst_width {
                let fx = (sx & 0x3FF) as i32;
                let fy = (sy & 0x3FF) as i32;

                let wx = [
                    bicubic_weight(0x400 + fx),
                    bicubic_weight(fx),
                    bicubic_weight(0x400 - fx),
                    bicubic_weight(0x800 - fx),
                ];
                let wy = [
                    bicubic_weight(0x400 + fy),
                    bicubic_weight(fy),
                    bicubic_weight(0x400 - fy),
                    bicubic_weight(0x800 - fy),
                ];

                let mut tr = 0i64;
                let mut tg = 0i64;
                let mut tb = 0i64;

                for i in 0..4u32 {
                    for j in 0..4u32 {
                        let val =
                            ctx.wram.data_read(SRC_SCRATCH + rect_width * i + (sx >> 10) + j);

                        let vr = (val & 0x1F) as i32;
                        let vg = ((val >> 5) & 0x1F) as i32;
                        let vb = ((val >> 10) & 0x1F) as i32;

                        let weight =
                            ((wx[j as usize] >> 1) * (wy[i as usize] >> 1)) >> 6;

                        tr += (vr * weight) as i64;
                        tg += (vg * weight) as i64;
                        tb += (vb * weight) as i64;
                    }
                }

                // round and clamp the final colors
                let fr = (((tr + 0x80_0000) >> 24) as i32).clamp(0, 31);
                let fg = (((tg + 0x80_0000) >> 24) as i32).clamp(0, 31);
                let fb = (((tb + 0x80_0000) >> 24) as i32).clamp(0, 31);

                let out =
                    0x8000 | (fr as u16 & 0x1F) | ((fg as u16 & 0x1F) << 5) | ((fb as u16 & 0x1F) << 10);
                ctx.wram.data_write(DST_SCRATCH + dx, out);

                sx = sx.wrapping_add(sx_incr);
            }

            write_host_block(ctx, DST_SCRATCH, dst_addr, dst_width << 1);
            dst_addr = dst_addr.wrapping_add(dst_width << 1);

            let synext = sy.wrapping_add(sy_incr);
            if (synext >> 10) != (sy >> 10) {
                for i in 0..4u32 {
                    read_host_block(
                        ctx,
                        SRC_SCRATCH + rect_width * i,
                        src_addr.wrapping_add((((synext >> 10) + i).wrapping_mul(src_width)) << 1),
                        rect_width << 1,
                    );
                }
            }
            sy = synext;
        }
    }

    fn cmd_scaling_one_third(&mut self, ctx: &mut DspCtx) {
        let src_addr = ((self.cmd_params[1] as u32) << 16) | self.cmd_params[0] as u32;
        let mut dst_addr = ((self.cmd_params[3] as u32) << 16) | self.cmd_params[2] as u32;
        let src_width = self.cmd_params[5] as u32;
        let rect_xoffset = self.cmd_params[9] as u32;
        let rect_yoffset = self.cmd_params[10] as u32;
        let rect_width = self.cmd_params[11] as u32;
        let rect_height = self.cmd_params[12] as u32;

        // multiples of 3 were verified before the command was scheduled
        let dst_width = rect_width / 3;
        let dst_height = rect_height / 3;

        if rect_width > 16384 {
            log::warn!("[DSP HLE] incorrect parameters for one-third scaling");
            return;
        }

        let src_addr = src_addr.wrapping_add(((rect_yoffset * src_width) + rect_xoffset) << 1);
        let mut sy = 0u32;

        for _dy in 0..dst_height {
            let mut sx = 0u32;

            for i in 0..3u32 {
                read_host_block(
                    ctx,
                    SRC_SCRATCH + rect_width * i,
                    src_addr.wrapping_add(((sy + i).wrapping_mul(src_width)) << 1),
                    rect_width << 1,
                );
            }

            // each output pixel averages the 8 outer pixels of a 3x3 block
            for dx in 0..dst_width {
                let val = [
                    ctx.wram.data_read(SRC_SCRATCH + sx),
                    ctx.wram.data_read(SRC_SCRATCH + sx + 1),
                    ctx.wram.data_read(SRC_SCRATCH + sx + 2),
                    ctx.wram.data_read(SRC_SCRATCH + rect_width + sx),
                    ctx.wram.data_read(SRC_SCRATCH + rect_width + sx + 2),
                    ctx.wram.data_read(SRC_SCRATCH + rect_width * 2 + sx),
                    ctx.wram.data_read(SRC_SCRATCH + rect_width * 2 + sx + 1),
                    ctx.wram.data_read(SRC_SCRATCH + rect_width * 2 + sx + 2),
                ];

                let mut fr = 0u32;
                let mut fg = 0u32;
                let mut fb = 0u32;
                for v in val {
                    fr += (v & 0x1F) as u32;
                    fg += ((v >> 5) & 0x1F) as u32;
                    fb += ((v >> 10) & 0x1F) as u32;
                }

                let out = 0x8000 | (fr >> 3) as u16 | (((fg << 2) & 0x3E0) as u16)
                    | (((fb << 7) & 0x7C00) as u16);
                ctx.wram.data_write(DST_SCRATCH + dx, out);

                sx += 3;
            }

            write_host_block(ctx, DST_SCRATCH, dst_addr, dst_width << 1);
            dst_addr = dst_addr.wrapping_add(dst_width << 1);

            sy += 3;
        }
    }

    fn cmd_yuv_to_rgb(&mut self, ctx: &mut DspCtx) {
        let len = ((self.cmd_params[1] as u32) << 16) | self.cmd_params[0] as u32;
        let mut src_addr = ((self.cmd_params[3] as u32) << 16) | self.cmd_params[2] as u32;
        let mut dst_addr = ((self.cmd_params[5] as u32) << 16) | self.cmd_params[4] as u32;

        let mut i = 0u32;
        while i < len {
            let val = ctx.mem.read32(src_addr);
            src_addr = src_addr.wrapping_add(4);

            let y1 = (val & 0xFF) as i32;
            let u = ((val >> 8) & 0xFF) as i32 - 128;
            let y2 = ((val >> 16) & 0xFF) as i32;
            let v = ((val >> 24) & 0xFF) as i32 - 128;

            // the ucode uses a bitshift based conversion; these formulas
            // are an equivalent
            let r = (v * 359) >> 8;
            let g = (-((u * 352) + (v * 731))) >> 10;
            let b = (u * 1815) >> 10;

            let r1 = (y1 + r).clamp(0, 255);
            let g1 = (y1 + g).clamp(0, 255);
            let b1 = (y1 + b).clamp(0, 255);

            let r2 = (y2 + r).clamp(0, 255);
            let g2 = (y2 + g).clamp(0, 255);
            let b2 = (y2 + b).clamp(0, 255);

            let col1 = ((r1 >> 3) | ((g1 >> 3) << 5) | ((b1 >> 3) << 10) | 0x8000) as u32;
            let col2 = ((r2 >> 3) | ((g2 >> 3) << 5) | ((b2 >> 3) << 10) | 0x8000) as u32;

            ctx.mem.write32(dst_addr, col1 | (col2 << 16));
            dst_addr = dst_addr.wrapping_add(4);

            i += 4;
        }
    }
}

/// Fixed-point source step: `((span - bias) << 10) / (dst - 1)`.
///
/// The numerator wraps to u32 before the division, which is unsigned;
/// degenerate spans below the bias keep that wraparound behavior. A
/// single-column output uses step 0.
fn step_increment(span: u32, bias: i32, dst: u32) -> u32 {
    if dst > 1 {
        (((span as i32 - bias) << 10) as u32) / (dst - 1)
    } else {
        0
    }
}

/// Bicubic convolution weight with a = -1, 16 fractional bits.
///
/// `x` is the absolute distance in 1.10 fixed point. The second segment
/// routes the cube through u32 so the intermediate wraps instead of
/// overflowing; the wrapped value is what the hardware computes.
fn bicubic_weight(x: i32) -> i32 {
    if x <= 0x400 {
        // x <= 1: W(x) = x^3 - 2x^2 + 1
        let mut square = (x * x) >> 2;
        let cube = (square * x) >> 12;
        square = 2 * (square >> 2);

        cube - square + 0x10000
    } else if x <= 0x800 {
        // 1 < x <= 2: W(x) = -x^3 + 5x^2 - 8x + 4
        let cube = ((((x * x) >> 2) as u32).wrapping_mul(x as u32) >> 12) as i32;
        let square = (5 * x * x) >> 4;
        let one = (-8 * x) << 6;

        -cube + square + one + 0x40000
    } else {
        0
    }
}

impl DspCore for GraphicsUcode {
    fn id(&self) -> u32 {
        self.base.id()
    }

    fn reset(&mut self) {
        self.base.reset();
        self.cmd_state = STATE_IDLE;
        self.cmd_index = 0;
        self.cmd_params = [0; 16];
    }

    fn start(&mut self, ctx: &mut DspCtx) {
        self.base.start(ctx);
    }

    fn send_data(&mut self, ctx: &mut DspCtx, index: usize, val: u16) {
        self.base.send_data(ctx, index, val);

        // CMD0 carries the command index, pipe 7 the parameters; CMD2 = 7
        // notifies us of pipe writes
        if index == 0 {
            self.try_start_cmd(ctx);
        } else if index == 2 {
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

        match self.cmd_index {
            1 => match self.cmd_params[4] {
                2 => self.cmd_scaling_bilinear(ctx),
                3 => self.cmd_scaling_bicubic(ctx),
                10 => self.cmd_scaling_one_third(ctx),
                _ => self.cmd_scaling_nearest(ctx),
            },
            2 => self.cmd_yuv_to_rgb(ctx),
            _ => {}
        }

        self.base.send_reply(ctx, 1, 1);
        self.cmd_state = STATE_IDLE;
        self.try_start_cmd(ctx);
    }

    fn snapshot(&self) -> UcodeSnapshot {
        UcodeSnapshot {
            id: self.id(),
            base: self.base.snapshot_state(),
            var: UcodeVar::Graphics {
                cmd_state: self.cmd_state,
                cmd_index: self.cmd_index,
                cmd_params: self.cmd_params.to_vec(),
            },
        }
    }

    fn restore(&mut self, snap: &UcodeSnapshot) {
        self.base.restore_state(&snap.base);
        if let UcodeVar::Graphics { cmd_state, cmd_index, cmd_params } = &snap.var {
            self.cmd_state = *cmd_state;
            self.cmd_index = *cmd_index;
            for (dst, src) in self.cmd_params.iter_mut().zip(cmd_params.iter()) {
                *dst = *src;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, Ram, SharedWram};
    use crate::hle::IrqFlags;
    use crate::mic::Mic;
    use crate::sched::Scheduler;

    struct Harness {
        ram: Ram,
        wram: SharedWram,
        sched: Scheduler,
        mic: Mic,
        irq: IrqFlags,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                ram: Ram::new(0, 0x4_0000),
                wram: SharedWram::new(),
                sched: Scheduler::new(),
                mic: Mic::new(),
                irq: IrqFlags::default(),
            }
        }

        fn ctx(&mut self) -> DspCtx<'_> {
            DspCtx {
                mem: &mut self.ram,
                wram: &mut self.wram,
                sched: &mut self.sched,
                mic: &mut self.mic,
                irq: &mut self.irq,
            }
        }
    }

    fn started_ucode(h: &mut Harness) -> GraphicsUcode {
        let mut uc = GraphicsUcode::new(0);
        uc.reset();
        uc.start(&mut h.ctx());
        for i in 0..3 {
            uc.recv_data(&mut h.ctx(), i);
        }
        uc.recv_data(&mut h.ctx(), 2);
        uc
    }

    /// Queue a command and run it to completion, returning the scheduled
    /// cycle delay.
    fn run_cmd(h: &mut Harness, uc: &mut GraphicsUcode, index: u16, params: &[u16]) -> u64 {
        let before = h.sched.now();
        uc.send_data(&mut h.ctx(), 0, index);
        uc.base.write_pipe(&mut h.ctx(), 7, params);
        uc.send_data(&mut h.ctx(), 2, 7);
        let (id, param) = h.sched.pop_due(u64::MAX).expect("command not scheduled");
        assert_eq!(id, EventId::HleFinish);
        let delay = h.sched.now() - before;
        uc.finish_cmd(&mut h.ctx(), param);
        delay
    }

    fn fill_host_image(h: &mut Harness, addr: u32, pixels: usize, value: u16) {
        for i in 0..pixels {
            h.ram.write16(addr + i as u32 * 2, value);
        }
    }

    #[test]
    fn nearest_copies_pixels_verbatim() {
        let mut h = Harness::new();
        // nearest does not repack channels, so the top bit stays clear
        fill_host_image(&mut h, 0x1000, 8 * 8, 0x7FFF);
        let mut uc = started_ucode(&mut h);

        let delay = run_cmd(
            &mut h,
            &mut uc,
            1,
            // src 0x1000, dst 0x8000, mode 0, stride 8, height 8,
            // scale 1000/1000, rect (0,0) 8x8
            &[0x1000, 0, 0x8000, 0, 0, 8, 8, 1000, 1000, 0, 0, 8, 8, 0],
        );
        assert_eq!(delay, 200 + (4 * 8 * 8 + 26 * 8 * 8) as u64);

        assert_eq!(uc.recv_data(&mut h.ctx(), 1), 1);
        for i in 0..64u32 {
            assert_eq!(h.ram.read16(0x8000 + i * 2), 0x7FFF);
        }
    }

    #[test]
    fn bilinear_uniform_image_repacks_with_top_bit() {
        let mut h = Harness::new();
        fill_host_image(&mut h, 0x1000, 8 * 8, 0x7FFF);
        let mut uc = started_ucode(&mut h);

        let delay = run_cmd(
            &mut h,
            &mut uc,
            1,
            &[0x1000, 0, 0x8000, 0, 2, 8, 8, 1000, 1000, 0, 0, 8, 8, 0],
        );
        assert_eq!(delay, 200 + (4 * 8 * 8 + 58 * 8 * 8) as u64);

        assert_eq!(uc.recv_data(&mut h.ctx(), 1), 1);
        for i in 0..64u32 {
            assert_eq!(h.ram.read16(0x8000 + i * 2), 0xFFFF);
        }
    }

    #[test]
    fn bilinear_width_boundary() {
        let mut h = Harness::new();
        fill_host_image(&mut h, 0x10000, 8192 * 4, 0x7FFF);
        let mut uc = started_ucode(&mut h);

        // 8192 is accepted
        run_cmd(
            &mut h,
            &mut uc,
            1,
            &[0x0000, 1, 0x0000, 2, 2, 8192, 4, 1000, 1000, 0, 0, 8192, 4, 0],
        );
        assert_eq!(uc.recv_data(&mut h.ctx(), 1), 1);
        assert_eq!(h.ram.read16(0x20000), 0xFFFF);
        assert_eq!(h.ram.read16(0x20000 + (8192 * 4 - 1) * 2), 0xFFFF);

        // 8193 aborts silently: the reply still arrives but nothing is
        // written
        let mut h = Harness::new();
        fill_host_image(&mut h, 0x10000, 100, 0x7FFF);
        let mut uc = started_ucode(&mut h);
        run_cmd(
            &mut h,
            &mut uc,
            1,
            &[0x0000, 1, 0x0000, 2, 2, 8193, 4, 1000, 1000, 0, 0, 8193, 4, 0],
        );
        assert_eq!(uc.recv_data(&mut h.ctx(), 1), 1);
        assert_eq!(h.ram.read16(0x20000), 0);
    }

    #[test]
    fn bicubic_uniform_image_and_width_boundary() {
        let mut h = Harness::new();
        fill_host_image(&mut h, 0x10000, 4096 * 4, 0x4210);
        let mut uc = started_ucode(&mut h);

        // 4096 accepted; height scale 200 gives one output row
        run_cmd(
            &mut h,
            &mut uc,
            1,
            &[0x0000, 1, 0x0000, 3, 3, 4096, 5, 1000, 200, 0, 0, 4096, 5, 0],
        );
        assert_eq!(uc.recv_data(&mut h.ctx(), 1), 1);
        assert_eq!(h.ram.read16(0x30000), 0xC210);
        assert_eq!(h.ram.read16(0x30000 + 4095 * 2), 0xC210);

        // 4097 aborts silently
        let mut h = Harness::new();
        let mut uc = started_ucode(&mut h);
        run_cmd(
            &mut h,
            &mut uc,
            1,
            &[0x0000, 1, 0x0000, 3, 3, 4097, 5, 1000, 200, 0, 0, 4097, 5, 0],
        );
        assert_eq!(uc.recv_data(&mut h.ctx(), 1), 1);
        assert_eq!(h.ram.read16(0x30000), 0);
    }

    #[test]
    fn one_third_averages_outer_pixels() {
        let mut h = Harness::new();
        // 3x3 block: outer pixels r=9 g=5 b=3, center full white
        let outer = 9u16 | (5 << 5) | (3 << 10);
        for i in 0..9u32 {
            h.ram.write16(0x1000 + i * 2, outer);
        }
        h.ram.write16(0x1000 + 4 * 2, 0x7FFF); // center, excluded
        let mut uc = started_ucode(&mut h);

        let delay = run_cmd(
            &mut h,
            &mut uc,
            1,
            &[0x1000, 0, 0x2000, 0, 10, 3, 3, 1000, 1000, 0, 0, 3, 3, 0],
        );
        assert_eq!(delay, 200 + (30 * 3 * 3) as u64);

        assert_eq!(uc.recv_data(&mut h.ctx(), 1), 1);
        assert_eq!(h.ram.read16(0x2000), 0x8000 | outer);
    }

    #[test]
    fn yuv_conversion_clamps_and_packs_pairs() {
        let mut h = Harness::new();
        // quad (y1 = 255, u = 0, y2 = 0, v = 255)
        h.ram.write32(0x1000, 0xFF00_00FF);
        let mut uc = started_ucode(&mut h);

        let delay = run_cmd(&mut h, &mut uc, 2, &[4, 0, 0x1000, 0, 0x2000, 0]);
        assert_eq!(delay, 200 + 24 * 2);

        assert_eq!(uc.recv_data(&mut h.ctx(), 1), 1);
        // r = +178, g = -47, b = -227 before clamping
        assert_eq!(h.ram.read32(0x2000), 0x8016_8F5F);
    }

    #[test]
    fn second_command_queued_during_execution_starts_at_completion() {
        let mut h = Harness::new();
        fill_host_image(&mut h, 0x1000, 3 * 3, 0x7FFF);
        h.ram.write32(0x3000, 0x8080_8080);
        let mut uc = started_ucode(&mut h);

        // first command: one-third 3x3
        uc.send_data(&mut h.ctx(), 0, 1);
        uc.base
            .write_pipe(&mut h.ctx(), 7, &[0x1000, 0, 0x2000, 0, 10, 3, 3, 1000, 1000, 0, 0, 3, 3, 0]);
        uc.send_data(&mut h.ctx(), 2, 7);

        // queue a YUV command behind it
        uc.send_data(&mut h.ctx(), 0, 2);
        uc.base.write_pipe(&mut h.ctx(), 7, &[4, 0, 0x3000, 0, 0x4000, 0]);
        uc.send_data(&mut h.ctx(), 2, 7);

        let (id, param) = h.sched.pop_due(u64::MAX).unwrap();
        assert_eq!(id, EventId::HleFinish);
        uc.finish_cmd(&mut h.ctx(), param);
        assert_eq!(uc.recv_data(&mut h.ctx(), 1), 1);

        // the queued command was latched and scheduled at completion
        let (id, param) = h.sched.pop_due(u64::MAX).unwrap();
        assert_eq!(id, EventId::HleFinish);
        uc.finish_cmd(&mut h.ctx(), param);
        assert_eq!(uc.recv_data(&mut h.ctx(), 1), 1);
        let expect = 0x8000u32 | 16 | (16 << 5) | (16 << 10);
        assert_eq!(h.ram.read32(0x4000), expect | (expect << 16));
    }

    #[test]
    fn bicubic_weight_segments() {
        // W(0) = 1.0 in 16.16
        assert_eq!(bicubic_weight(0), 0x10000);
        // the kernel hits zero at both unit distances
        assert_eq!(bicubic_weight(0x400), 0);
        assert_eq!(bicubic_weight(0x800), 0);
        // beyond 2: zero
        assert_eq!(bicubic_weight(0x801), 0);
    }

    #[test]
    fn bicubic_weight_center_column_sums_to_one() {
        // at fx = 0 the four taps are W(1), W(0), W(1), W(2)
        let w = [
            bicubic_weight(0x400),
            bicubic_weight(0),
            bicubic_weight(0x400),
            bicubic_weight(0x800),
        ];
        let sum: i32 = w.iter().sum();
        assert_eq!(sum, 0x10000);
    }

    #[test]
    fn step_increment_matches_fixed_point_division() {
        assert_eq!(step_increment(256, 2, 128), ((254 << 10) / 127) as u32);
        // single output column uses a zero step
        assert_eq!(step_increment(256, 2, 1), 0);
        // spans below the bias wrap to u32 before the division
        assert_eq!(step_increment(1, 2, 2), (-1024i32) as u32);
        // the division itself is unsigned on the wrapped numerator
        assert_eq!(step_increment(1, 2, 3), ((-1024i32) as u32) / 2);
        assert_eq!(step_increment(1, 2, 3), 2147483136);
    }
}
