//! DSP MMIO front-end and engine dispatcher.
//!
//! The host CPU talks to the DSP through a small register bank (mirrored
//! every 0x40 bytes): a PDATA port with a 16-entry prefetch FIFO for
//! bursted memory transfers, a config/status pair, the semaphore
//! registers, and three command/reply register pairs routed into the
//! active engine.
//!
//! When the reset hold in `PCFG` is released, the loaded program region
//! is hashed and a matching native ucode is instantiated; unknown
//! programs fall back to an externally registered low-level interpreter.

use crate::bus::WRAM_WINDOW_SIZE;
use crate::fifo::Fifo;
use crate::hle::aac::{AacDecoder, AacUcode, SilentAacDecoder};
use crate::hle::g711::G711Ucode;
use crate::hle::graphics::GraphicsUcode;
use crate::hle::{CLASS_AAC, CLASS_G711, CLASS_GRAPHICS, DspCore, DspCtx, IrqFlags, LLE_ID};
use crate::snapshot::{PortSnapshot, SnapshotError};

// Register offsets within the 0x40-byte mirror.
const REG_PDATA: u32 = 0x00;
const REG_PADR: u32 = 0x04;
const REG_PCFG: u32 = 0x08;
const REG_PSTS: u32 = 0x0C;
const REG_PSEM: u32 = 0x10;
const REG_PMASK: u32 = 0x14;
const REG_PCLEAR: u32 = 0x18;
const REG_SEM: u32 = 0x1C;
const REG_CMD0: u32 = 0x20;
const REG_REP0: u32 = 0x24;
const REG_CMD1: u32 = 0x28;
const REG_REP1: u32 = 0x2C;
const REG_CMD2: u32 = 0x30;
const REG_REP2: u32 = 0x34;

// PCFG bits.
const PCFG_RESET_HOLD: u16 = 1 << 0;
const PCFG_AUTO_INC: u16 = 1 << 1;
const PCFG_DMA_START: u16 = 1 << 4;

type AacFactory = Box<dyn Fn() -> Box<dyn AacDecoder>>;
type LleFactory = Box<dyn Fn() -> Box<dyn DspCore>>;

pub struct DspPort {
    core: Option<Box<dyn DspCore>>,

    rst_released: bool,
    timestamp: u64,

    padr: u16,
    pcfg: u16,
    psts: u16,
    psem: u16,
    pmask: u16,
    pclear: u16,
    cmd: [u16; 3],
    rep: [u16; 3],

    dma_fifo: Fifo<u16, 16>,
    dma_len: i32,

    irq_line: bool,

    aac_factory: AacFactory,
    lle_factory: Option<LleFactory>,
}

impl DspPort {
    pub fn new() -> Self {
        Self {
            core: None,
            rst_released: false,
            timestamp: 0,
            padr: 0,
            pcfg: 0,
            psts: 0,
            psem: 0,
            pmask: 0xFF,
            pclear: 0,
            cmd: [0; 3],
            rep: [0; 3],
            dma_fifo: Fifo::new(),
            dma_len: 0,
            irq_line: false,
            aac_factory: Box::new(|| Box::new(SilentAacDecoder)),
            lle_factory: None,
        }
    }

    /// Provide the AAC backend used when an AAC ucode is instantiated.
    pub fn set_aac_backend_factory(&mut self, factory: AacFactory) {
        self.aac_factory = factory;
    }

    /// Provide the low-level interpreter used for unrecognized programs.
    pub fn set_lle_factory(&mut self, factory: LleFactory) {
        self.lle_factory = Some(factory);
    }

    pub fn reset(&mut self) {
        self.timestamp = 0;

        self.padr = 0;
        self.pcfg = 0;
        self.psts = 0;
        self.psem = 0;
        self.pmask = 0xFF;
        self.pclear = 0;
        self.cmd = [0; 3];
        self.rep = [0; 3];
        self.dma_len = 0;

        self.dma_fifo.clear();
        self.core = None;
    }

    /// Reset-line transition. Releasing the line resets the register
    /// bank and re-bases the DSP clock; holding it stops the engine.
    pub fn set_rst_line(&mut self, ctx: &mut DspCtx, release: bool) {
        self.rst_released = release;
        self.reset();
        self.timestamp = ctx.sched.now();
    }

    pub fn is_rst_released(&self) -> bool {
        self.rst_released
    }

    pub fn core_id(&self) -> Option<u32> {
        self.core.as_ref().map(|c| c.id())
    }

    /// Host interrupt line, latched until taken.
    pub fn irq_pending(&self) -> bool {
        self.irq_line
    }

    pub fn take_irq(&mut self) -> bool {
        std::mem::take(&mut self.irq_line)
    }

    fn core_enabled(&self) -> bool {
        self.rst_released && self.pcfg & PCFG_RESET_HOLD == 0
    }

    /// Advance the DSP clock to the scheduler's current time. Native
    /// ucodes do no per-cycle work; their completions arrive as scheduled
    /// events, so catching up is a timestamp bump.
    fn catch_up(&mut self, ctx: &mut DspCtx) {
        let now = ctx.sched.now();
        if self.timestamp < now {
            if self.core_enabled() {
                let cycles = (now - self.timestamp) as u32;
                if let Some(core) = self.core.as_mut() {
                    core.run(cycles);
                }
            }
            self.timestamp = now;
        }
    }

    fn apply_irq(&mut self, flags: &mut IrqFlags) {
        for i in 0..3 {
            if flags.rep[i] && self.pcfg & (1 << (9 + i)) != 0 {
                self.irq_line = true;
            }
            flags.rep[i] = false;
        }
        if flags.sem {
            self.psts |= 1 << 9;
            self.irq_line = true;
            flags.sem = false;
        }
    }

    fn get_psts(&self) -> u16 {
        let mut r = self.psts & (1 << 9); // the only sticky bit
        r |= 1 << 8; // write FIFO is modeled as instantaneous, so always empty

        if self.dma_fifo.is_full() {
            r |= 1 << 5;
        }
        if !self.dma_fifo.is_empty() {
            r |= (1 << 6) | (1 << 0);
        }

        if let Some(core) = &self.core {
            if !core.send_data_empty(0) {
                r |= 1 << 13;
            }
            if !core.send_data_empty(1) {
                r |= 1 << 14;
            }
            if !core.send_data_empty(2) {
                r |= 1 << 15;
            }
            if core.recv_data_ready(0) {
                r |= 1 << 10;
            }
            if core.recv_data_ready(1) {
                r |= 1 << 11;
            }
            if core.recv_data_ready(2) {
                r |= 1 << 12;
            }
        }

        r
    }

    // PDATA transfers

    fn pdata_dma_write(&mut self, ctx: &mut DspCtx, wrval: u16) {
        let addr = self.padr as u32;

        if self.core.is_some() {
            match (self.pcfg >> 12) & 7 {
                0 => ctx.wram.data_write(addr, wrval),
                1 => {
                    if let Some(core) = self.core.as_mut() {
                        core.mmio_write((addr & 0x7FF) as u16, wrval);
                    }
                }
                5 => ctx.wram.prog_write(addr, wrval),
                7 => {
                    // external-bus space: the native ucodes report their
                    // transfer unit as reads only, so writes are dropped
                }
                _ => return,
            }
        }

        if self.pcfg & PCFG_AUTO_INC != 0 {
            self.padr = self.padr.wrapping_add(1);
        }

        self.irq_line = true; // write FIFO drained instantly
    }

    fn pdata_dma_read(&mut self, ctx: &mut DspCtx) -> u16 {
        let mut r = 0;
        let addr = self.padr as u32;

        if self.core.is_some() {
            match (self.pcfg >> 12) & 7 {
                0 => r = ctx.wram.data_read(addr),
                1 => {
                    if let Some(core) = self.core.as_mut() {
                        r = core.mmio_read((addr & 0x7FF) as u16);
                    }
                }
                5 => r = ctx.wram.prog_read(addr),
                7 => {
                    // external-bus space with the fixed 8-bit read unit
                    // the native ucodes report
                    r = ctx.mem.read8(addr) as u16;
                }
                _ => return r,
            }
        }

        if self.pcfg & PCFG_AUTO_INC != 0 {
            self.padr = self.padr.wrapping_add(1);
        }

        r
    }

    fn pdata_dma_fetch(&mut self, ctx: &mut DspCtx) {
        if self.dma_len == 0 || self.dma_fifo.is_full() {
            return;
        }

        let val = self.pdata_dma_read(ctx);
        self.dma_fifo.push(val);

        if self.dma_len > 0 {
            self.dma_len -= 1;
        }
    }

    fn pdata_dma_start(&mut self, ctx: &mut DspCtx) {
        self.dma_len = match (self.pcfg >> 2) & 3 {
            0 => 1,
            1 => 8,
            2 => 16,
            _ => -1, // refill forever
        };

        // prime one FIFO's worth
        let amt = if self.dma_len < 0 { 16 } else { self.dma_len };
        for _ in 0..amt {
            self.pdata_dma_fetch(ctx);
        }

        self.irq_line = true;
    }

    fn pdata_dma_cancel(&mut self) {
        self.dma_len = 0;
        self.dma_fifo.clear();
    }

    fn pdata_read_fifo(&mut self, ctx: &mut DspCtx) -> u16 {
        let ret = self.dma_fifo.pop().unwrap_or(0);

        // more data due: top the FIFO back up
        if self.dma_len != 0 {
            let mut left = 16 - self.dma_fifo.len() as i32;
            if self.dma_len > 0 && self.dma_len < left {
                left = self.dma_len;
            }
            for _ in 0..left {
                self.pdata_dma_fetch(ctx);
            }
        }

        if !self.dma_fifo.is_empty() || self.dma_fifo.is_full() {
            self.irq_line = true;
        }

        ret
    }

    // Engine lifecycle

    /// Hash the program region and instantiate the matching ucode, or
    /// the registered low-level fallback.
    fn start_dsp(&mut self, ctx: &mut DspCtx) {
        let zeros = vec![0u8; WRAM_WINDOW_SIZE];
        let mut hasher = crc32fast::Hasher::new();
        for slot in 0..8 {
            match ctx.wram.prog_window(slot) {
                Some(window) => hasher.update(window),
                None => hasher.update(&zeros),
            }
        }
        let crc = hasher.finalize();

        log::info!("[DSP] program CRC = {:08X}", crc);

        let core: Option<Box<dyn DspCore>> = match crc {
            // console sound app AAC ucode
            0x7867C94B => Some(Box::new(AacUcode::new(-1, (self.aac_factory)()))),
            // AAC SDK ucode v0
            0x0CAFEF48 => Some(Box::new(AacUcode::new(0x00, (self.aac_factory)()))),
            // AAC SDK ucode v0 patch
            0xEF5174AA => Some(Box::new(AacUcode::new(0x01, (self.aac_factory)()))),
            // AAC SDK ucode v2
            0x1D320185 => Some(Box::new(AacUcode::new(0x20, (self.aac_factory)()))),
            // AAC SDK ucode v4
            0xAE11D2FB => Some(Box::new(AacUcode::new(0x40, (self.aac_factory)()))),

            // G711 SDK ucode v0..v5
            0xFAA1B612 => Some(Box::new(G711Ucode::new(0x00))),
            0x7EEE19FE => Some(Box::new(G711Ucode::new(0x10))),
            0x6056C6FF => Some(Box::new(G711Ucode::new(0x20))),
            0x2C281DAE => Some(Box::new(G711Ucode::new(0x30))),
            0x2A1D7F94 => Some(Box::new(G711Ucode::new(0x40))),
            0x4EBEB519 => Some(Box::new(G711Ucode::new(0x50))),

            // Graphics SDK ucode v0..v5 (plus the v1 patch)
            0xCD2A8B1B => Some(Box::new(GraphicsUcode::new(0x00))),
            0x7323B75B => Some(Box::new(GraphicsUcode::new(0x10))),
            0xBD4B63B6 => Some(Box::new(GraphicsUcode::new(0x11))),
            0x448BB6A2 => Some(Box::new(GraphicsUcode::new(0x20))),
            0x63CAEC33 => Some(Box::new(GraphicsUcode::new(0x30))),
            0x1451EB84 => Some(Box::new(GraphicsUcode::new(0x40))),
            0x2C974FC8 => Some(Box::new(GraphicsUcode::new(0x50))),

            _ => None,
        };

        let core = match core {
            Some(core) => Some(core),
            None => match &self.lle_factory {
                Some(factory) => {
                    log::info!("[DSP] unknown ucode, falling back to the low-level engine");
                    Some(factory())
                }
                None => {
                    log::warn!("[DSP] unknown ucode and no low-level engine registered");
                    None
                }
            },
        };

        if let Some(mut core) = core {
            core.reset();
            core.start(ctx);
            self.core = Some(core);
        }
    }

    fn stop_dsp(&mut self) {
        self.core = None;
    }

    // Host MMIO

    pub fn read8(&mut self, ctx: &mut DspCtx, addr: u32) -> u8 {
        self.catch_up(ctx);

        match addr & 0x3F {
            0x08 => self.pcfg as u8,
            0x09 => (self.pcfg >> 8) as u8,
            0x0C => self.get_psts() as u8,
            0x0D => (self.get_psts() >> 8) as u8,
            0x10 => self.psem as u8,
            0x11 => (self.psem >> 8) as u8,
            0x14 => self.pmask as u8,
            0x15 => (self.pmask >> 8) as u8,
            0x1C => match &self.core {
                Some(core) => core.semaphore() as u8,
                None => 0,
            },
            0x1D => match &self.core {
                Some(core) => (core.semaphore() >> 8) as u8,
                None => 0,
            },
            _ => 0,
        }
    }

    pub fn read16(&mut self, ctx: &mut DspCtx, addr: u32) -> u16 {
        self.catch_up(ctx);

        match addr & 0x3E {
            REG_PDATA => self.pdata_read_fifo(ctx),
            REG_PCFG => self.pcfg,
            REG_PSTS => self.get_psts(),
            REG_PSEM => self.psem,
            REG_PMASK => self.pmask,
            REG_SEM => match &self.core {
                Some(core) => core.semaphore(),
                None => 0,
            },

            REG_CMD0 => self.cmd[0],
            REG_CMD1 => self.cmd[1],
            REG_CMD2 => self.cmd[2],

            REG_REP0 | REG_REP1 | REG_REP2 => {
                let index = ((addr & 0x3E) - REG_REP0) as usize / 8;
                match self.core.as_mut() {
                    Some(core) => {
                        let r = core.recv_data(ctx, index);
                        self.rep[index] = r;
                        self.apply_irq(ctx.irq);
                        r
                    }
                    None => 0,
                }
            }

            _ => 0,
        }
    }

    pub fn read32(&mut self, ctx: &mut DspCtx, addr: u32) -> u32 {
        // 16-bit registers on 4-byte strides; the upper half reads zero
        self.read16(ctx, addr & 0x3C) as u32
    }

    pub fn write8(&mut self, ctx: &mut DspCtx, addr: u32, val: u8) {
        self.catch_up(ctx);

        // only the PCFG halves accept byte writes, without the start or
        // transfer side effects of a full write
        match addr & 0x3F {
            0x08 => self.pcfg = (self.pcfg & 0xFF00) | val as u16,
            0x09 => self.pcfg = (self.pcfg & 0x00FF) | ((val as u16) << 8),
            _ => {}
        }
    }

    pub fn write16(&mut self, ctx: &mut DspCtx, addr: u32, val: u16) {
        self.catch_up(ctx);

        match addr & 0x3E {
            REG_PDATA => {
                self.pdata_dma_write(ctx, val);
            }
            REG_PADR => self.padr = val,

            REG_PCFG => {
                if self.pcfg & PCFG_RESET_HOLD != 0 && val & PCFG_RESET_HOLD == 0 {
                    if self.rst_released {
                        self.start_dsp(ctx);
                        // the initial replies are gated by the enables in
                        // effect before this write
                        self.apply_irq(ctx.irq);
                    }
                } else if self.pcfg & PCFG_RESET_HOLD == 0 && val & PCFG_RESET_HOLD != 0 {
                    self.stop_dsp();
                }
                self.pcfg = val;
                if self.pcfg & PCFG_DMA_START != 0 {
                    self.pdata_dma_start(ctx);
                } else {
                    self.pdata_dma_cancel();
                }
            }

            REG_PSEM => {
                self.psem = val;
                if let Some(core) = self.core.as_mut() {
                    core.set_semaphore(val);
                }
            }
            REG_PMASK => {
                self.pmask = val;
                if let Some(core) = self.core.as_mut() {
                    core.mask_semaphore(val);
                }
            }
            REG_PCLEAR => {
                match self.core.as_mut() {
                    Some(core) => {
                        core.clear_semaphore(val);
                        if core.semaphore() == 0 {
                            self.psts &= !(1 << 9);
                        }
                    }
                    None => self.psts &= !(1 << 9),
                }
            }

            REG_CMD0 | REG_CMD1 | REG_CMD2 => {
                let index = ((addr & 0x3E) - REG_CMD0) as usize / 8;
                self.cmd[index] = val;
                if let Some(core) = self.core.as_mut() {
                    core.send_data(ctx, index, val);
                    self.apply_irq(ctx.irq);
                }
            }

            _ => {}
        }
    }

    pub fn write32(&mut self, ctx: &mut DspCtx, addr: u32, val: u32) {
        self.write16(ctx, addr & 0x3C, val as u16);
    }

    // Non-MMIO entry points

    pub fn sample_clock(&mut self, ctx: &mut DspCtx, output: &mut [i16; 2], input: i16) {
        match self.core.as_mut() {
            Some(core) => {
                core.sample_clock(ctx, output, input);
                self.apply_irq(ctx.irq);
            }
            None => {
                output[0] = 0;
                output[1] = 0;
            }
        }
    }

    pub fn finish_cmd(&mut self, ctx: &mut DspCtx, param: u32) {
        self.catch_up(ctx);
        if let Some(core) = self.core.as_mut() {
            core.finish_cmd(ctx, param);
            self.apply_irq(ctx.irq);
        }
    }

    // Snapshot support

    pub fn snapshot_state(&self) -> PortSnapshot {
        PortSnapshot {
            timestamp: self.timestamp,
            rst_released: self.rst_released,
            padr: self.padr,
            pcfg: self.pcfg,
            psts: self.psts,
            psem: self.psem,
            pmask: self.pmask,
            pclear: self.pclear,
            cmd: self.cmd,
            rep: self.rep,
            dma_fifo: self.dma_fifo.contents(),
            dma_len: self.dma_len,
            ucode: self.core.as_ref().map(|c| c.snapshot()),
        }
    }

    pub fn restore_state(&mut self, snap: &PortSnapshot) -> Result<(), SnapshotError> {
        self.timestamp = snap.timestamp;
        self.rst_released = snap.rst_released;
        self.padr = snap.padr;
        self.pcfg = snap.pcfg;
        self.psts = snap.psts;
        self.psem = snap.psem;
        self.pmask = snap.pmask;
        self.pclear = snap.pclear;
        self.cmd = snap.cmd;
        self.rep = snap.rep;
        self.dma_fifo.restore(&snap.dma_fifo);
        self.dma_len = snap.dma_len;
        self.irq_line = false;

        self.core = match &snap.ucode {
            None => None,
            Some(ucode) => {
                let mut core = self.make_core_for_id(ucode.id)?;
                core.restore(ucode);
                Some(core)
            }
        };

        Ok(())
    }

    fn make_core_for_id(&self, id: u32) -> Result<Box<dyn DspCore>, SnapshotError> {
        if id == LLE_ID {
            return match &self.lle_factory {
                Some(factory) => Ok(factory()),
                None => Err(SnapshotError::NoFallbackEngine(id)),
            };
        }

        let class = id >> 16;
        let version = (id & 0xFFFF) as u16 as i16 as i32;
        match class {
            CLASS_AAC => Ok(Box::new(AacUcode::new(version, (self.aac_factory)()))),
            CLASS_G711 => Ok(Box::new(G711Ucode::new(version))),
            CLASS_GRAPHICS => Ok(Box::new(GraphicsUcode::new(version))),
            _ => Err(SnapshotError::UnknownUcode(id)),
        }
    }

    /// Slot in a specific engine without going through the program hash.
    pub fn install_core(&mut self, ctx: &mut DspCtx, mut core: Box<dyn DspCore>) {
        core.reset();
        core.start(ctx);
        self.core = Some(core);
        self.apply_irq(ctx.irq);
    }
}

impl Default for DspPort {
    fn default() -> Self {
        Self::new()
    }
}
