//! AAC decoder ucode.
//!
//! `CMD1` carries a one-word command followed by ten parameter words.
//! Each decode command wraps one raw AAC frame from host memory in an
//! ADTS header, hands it to the external decoder backend, and scatters
//! the resulting 1024 stereo samples to two output buffers in host
//! memory. The reply on `REP0` is 0 on success and 1 when the parameters
//! are rejected.

use super::base::UcodeBase;
use super::{CLASS_AAC, DspCore, DspCtx};
use crate::sched::EventId;
use crate::snapshot::{UcodeSnapshot, UcodeVar};

const STATE_IDLE: u8 = 0;
const STATE_COLLECTING: u8 = 1;
const STATE_EXECUTING: u8 = 2;

/// Largest raw frame the command format accepts, plus the ADTS header.
const FRAME_BUF_SIZE: usize = 1700 + 7;

const FREQ_LIST: [u32; 9] = [
    48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000,
];

/// External AAC decoder backend.
///
/// The backend is configured for AAC-LC, 48 kHz default rate and signed
/// 16-bit output at construction. `init` receives the first complete
/// ADTS frame; its result is ignored by the ucode. `decode` returns 1024
/// interleaved stereo sample pairs, or `None` on failure (the ucode then
/// leaves the output buffers untouched and still reports success).
pub trait AacDecoder {
    fn init(&mut self, frame: &[u8]) -> Option<(u32, u8)>;
    fn decode(&mut self, frame: &[u8]) -> Option<&[i16]>;
}

/// Backend stand-in that decodes nothing. Protocol traffic behaves
/// normally; output regions stay unchanged.
pub struct SilentAacDecoder;

impl AacDecoder for SilentAacDecoder {
    fn init(&mut self, _frame: &[u8]) -> Option<(u32, u8)> {
        Some((48000, 2))
    }

    fn decode(&mut self, _frame: &[u8]) -> Option<&[i16]> {
        None
    }
}

pub struct AacUcode {
    base: UcodeBase,
    decoder: Box<dyn AacDecoder>,

    cmd_state: u8,
    cmd_index: u16,
    cmd_param_count: u16,
    cmd_params: [u16; 10],

    frame_buf: Box<[u8; FRAME_BUF_SIZE]>,
    /// Counts decode commands up to 2: the backend is initialized when
    /// the second command arrives and never again, even if the stream
    /// configuration changes afterwards. Kept from the original.
    init_stage: u8,
}

impl AacUcode {
    pub fn new(version: i32, decoder: Box<dyn AacDecoder>) -> Self {
        if version == -1 {
            log::info!("[DSP HLE] initializing AAC decoder ucode (console sound app)");
        } else {
            log::info!("[DSP HLE] initializing AAC SDK ucode version {:02X}", version);
        }

        Self {
            base: UcodeBase::new(CLASS_AAC, version),
            decoder,
            cmd_state: STATE_IDLE,
            cmd_index: 0,
            cmd_param_count: 0,
            cmd_params: [0; 10],
            frame_buf: Box::new([0; FRAME_BUF_SIZE]),
            init_stage: 0,
        }
    }

    fn recv_cmd_word(&mut self, ctx: &mut DspCtx) {
        let val = self.base.cmd_reg[1];

        if self.cmd_state == STATE_IDLE {
            if val == 1 {
                self.cmd_state = STATE_COLLECTING;
                self.cmd_index = val;
                self.cmd_param_count = 0;
            }
        } else if self.cmd_state == STATE_COLLECTING {
            self.cmd_params[self.cmd_param_count as usize] = val;
            self.cmd_param_count += 1;

            if self.cmd_param_count == 10 {
                self.cmd_state = STATE_EXECUTING;
                self.cmd_decode_frame(ctx);
            }
        } else {
            return;
        }

        self.base.cmd_written[1] = false;
    }

    fn cmd_decode_frame(&mut self, ctx: &mut DspCtx) {
        let framelen = self.cmd_params[0];
        let freq = ((self.cmd_params[1] as u32) << 16) | self.cmd_params[2] as u32;
        let chan = self.cmd_params[3] as u32;
        let frameaddr = ((self.cmd_params[4] as u32) << 16) | self.cmd_params[5] as u32;
        let mut leftaddr = ((self.cmd_params[6] as u32) << 16) | self.cmd_params[7] as u32;
        let mut rightaddr = ((self.cmd_params[8] as u32) << 16) | self.cmd_params[9] as u32;

        log::debug!(
            "[DSP HLE] AAC frame: len={} freq={} chan={} in={:08X} out={:08X}/{:08X}",
            framelen, freq, chan, frameaddr, leftaddr, rightaddr
        );

        let mut fail = false;

        if framelen == 0 || framelen > 1700 {
            fail = true;
        }
        if freq == 0 || freq > 48000 {
            fail = true;
        }
        if chan != 1 && chan != 2 {
            fail = true;
        }
        if frameaddr == 0 {
            fail = true;
        }
        if leftaddr == 0 {
            fail = true;
        }
        if chan != 1 && rightaddr == 0 {
            fail = true;
        }

        // in the real ucode any rate outside this list fails decoder
        // init, whose result is then ignored; the reject still surfaces
        // through the parameter check
        let mut freqnum = 0xFu32;
        for (i, &f) in FREQ_LIST.iter().enumerate() {
            if freq == f {
                freqnum = 3 + i as u32;
                break;
            }
        }
        if freqnum == 0xF {
            fail = true;
        }

        if fail {
            // end the command with return code 1 (invalid parameters)
            ctx.sched.schedule(EventId::HleFinish, 256, 1);
            return;
        }

        // build the ADTS header: MPEG-4 LC profile, matching rate index
        // and channel configuration, fill bits all ones
        let totallen = framelen as u32 + 7;
        let rsv = 0x7FFu32;
        self.frame_buf[0] = 0xFF;
        self.frame_buf[1] = 0xF1;
        self.frame_buf[2] = (0x40 | (freqnum << 2) | (chan >> 2)) as u8;
        self.frame_buf[3] = ((chan << 6) | (totallen >> 11)) as u8;
        self.frame_buf[4] = (totallen >> 3) as u8;
        self.frame_buf[5] = ((totallen << 5) | (rsv >> 6)) as u8;
        self.frame_buf[6] = (rsv << 2) as u8;

        for i in 0..framelen as u32 {
            self.frame_buf[7 + i as usize] = ctx.mem.read8(frameaddr.wrapping_add(i));
        }

        if self.init_stage < 2 {
            if self.init_stage == 1 {
                let res = self.decoder.init(&self.frame_buf[..totallen as usize]);
                log::debug!("[DSP HLE] AAC decoder init: {:?}", res);
            }
            self.init_stage += 1;
        }

        // both channels are always written, whatever the channel count
        if let Some(samples) = self.decoder.decode(&self.frame_buf[..totallen as usize]) {
            let mut samples = samples.iter().copied();
            for _ in 0..1024 {
                let left = samples.next().unwrap_or(0);
                let right = samples.next().unwrap_or(0);
                ctx.mem.write16(leftaddr, left as u16);
                ctx.mem.write16(rightaddr, right as u16);
                leftaddr = leftaddr.wrapping_add(2);
                rightaddr = rightaddr.wrapping_add(2);
            }
        }

        // 115000 cycles approximates the hardware decode time
        ctx.sched.schedule(EventId::HleFinish, 115_000, 0);
    }
}

impl DspCore for AacUcode {
    fn id(&self) -> u32 {
        self.base.id()
    }

    fn reset(&mut self) {
        self.base.reset();
        self.cmd_state = STATE_IDLE;
        self.cmd_index = 0;
        self.cmd_param_count = 0;
        self.cmd_params = [0; 10];
        self.frame_buf.fill(0);
        self.init_stage = 0;
    }

    fn start(&mut self, ctx: &mut DspCtx) {
        self.base.start(ctx);
    }

    fn send_data(&mut self, ctx: &mut DspCtx, index: usize, val: u16) {
        self.base.send_data(ctx, index, val);

        // CMD1 carries both commands and parameters
        if index == 1 {
            self.recv_cmd_word(ctx);
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

    fn finish_cmd(&mut self, ctx: &mut DspCtx, param: u32) {
        self.cmd_state = STATE_IDLE;
        self.cmd_param_count = 0;

        self.base.send_reply(ctx, 0, param as u16);

        // consume a command word that arrived while we were executing
        if self.base.cmd_written[1] {
            self.recv_cmd_word(ctx);
        }
    }

    fn snapshot(&self) -> UcodeSnapshot {
        UcodeSnapshot {
            id: self.id(),
            base: self.base.snapshot_state(),
            var: UcodeVar::Aac {
                cmd_state: self.cmd_state,
                cmd_index: self.cmd_index,
                cmd_param_count: self.cmd_param_count,
                cmd_params: self.cmd_params.to_vec(),
                init_stage: self.init_stage,
            },
        }
    }

    fn restore(&mut self, snap: &UcodeSnapshot) {
        self.base.restore_state(&snap.base);
        if let UcodeVar::Aac {
            cmd_state,
            cmd_index,
            cmd_param_count,
            cmd_params,
            init_stage,
        } = &snap.var
        {
            self.cmd_state = *cmd_state;
            self.cmd_index = *cmd_index;
            self.cmd_param_count = *cmd_param_count;
            for (dst, src) in self.cmd_params.iter_mut().zip(cmd_params.iter()) {
                *dst = *src;
            }
            self.init_stage = *init_stage;
        }
    }
}
