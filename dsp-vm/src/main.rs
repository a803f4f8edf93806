use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use dsp_vm::bus::Ram;
use dsp_vm::emulator::Emulator;
use dsp_vm::hle::{CLASS_AAC, CLASS_G711, CLASS_GRAPHICS};

#[derive(Parser, Debug)]
#[command(author, version, about = "DSP coprocessor HLE emulator", long_about = None)]
struct Args {
    /// Raw DSP program image (up to 256 KiB) to load and identify
    #[arg(short, long)]
    ucode: PathBuf,

    /// After identification, run a G.711 A-law encode demo over the full
    /// MMIO protocol (requires a G.711 ucode image)
    #[arg(long)]
    demo_g711: bool,

    /// Write a savestate of the booted emulator to this path
    #[arg(long)]
    snapshot_out: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let image = match fs::read(&args.ucode) {
        Ok(image) => image,
        Err(err) => {
            eprintln!("failed to read {}: {}", args.ucode.display(), err);
            return ExitCode::FAILURE;
        }
    };
    if image.len() > 0x40000 {
        eprintln!("program image is larger than 256 KiB ({} bytes)", image.len());
        return ExitCode::FAILURE;
    }

    let mut emu = Emulator::new(Box::new(Ram::new(0, 0x10_0000)));
    emu.boot_program(&image);

    match emu.dsp.core_id() {
        Some(id) => {
            let class = match id >> 16 {
                CLASS_AAC => "AAC",
                CLASS_GRAPHICS => "Graphics",
                CLASS_G711 => "G711",
                _ => "low-level engine",
            };
            let version = (id & 0xFFFF) as u16 as i16;
            println!("identified ucode: {} (version {:02X})", class, version);
        }
        None => {
            println!("unknown ucode image; no low-level engine registered");
            return ExitCode::FAILURE;
        }
    }

    if args.demo_g711 {
        if emu.dsp.core_id().map(|id| id >> 16) != Some(CLASS_G711) {
            eprintln!("--demo-g711 needs a G.711 ucode image");
            return ExitCode::FAILURE;
        }
        run_g711_demo(&mut emu);
    }

    if let Some(path) = args.snapshot_out {
        let snap = emu.snapshot();
        match snap.to_bytes() {
            Ok(bytes) => {
                if let Err(err) = fs::write(&path, bytes) {
                    eprintln!("failed to write {}: {}", path.display(), err);
                    return ExitCode::FAILURE;
                }
                println!("savestate written to {}", path.display());
            }
            Err(err) => {
                eprintln!("savestate encoding failed: {}", err);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

/// Encode one millisecond of a ramp through the A-law path, driving the
/// protocol exactly like the console's library would: parameters through
/// a pipe via PDATA, kickoff via CMD2, completion via the response pipe.
fn run_g711_demo(emu: &mut Emulator) {
    const SRC: u32 = 0x1000;
    const DST: u32 = 0x2000;
    const LEN: u32 = 8;

    // drain the three boot replies and the pipe-table notification
    for reg in [0x24u32, 0x2C, 0x34, 0x34] {
        emu.dsp_read16(reg);
    }
    emu.dsp_write16(0x18, 0x8000);

    for i in 0..LEN {
        let sample = (i as i16 - 4) * 0x0800;
        emu.mem.write16(SRC + i * 2, sample as u16);
    }

    // encode A-law: cmd 0x00000101, src, dst, len
    let params = [
        0x0000,
        0x0101,
        (SRC >> 16) as u16,
        SRC as u16,
        (DST >> 16) as u16,
        DST as u16,
        (LEN >> 16) as u16,
        LEN as u16,
    ];
    host_write_pipe(emu, 7, &params);
    emu.dsp_write16(0x30, 7);

    emu.advance(200 + 31 * LEN as u64);

    print!("a-law bytes:");
    for i in 0..LEN {
        print!(" {:02X}", emu.mem.read8(DST + i));
    }
    println!();
}

/// Queue words into a pipe through the PDATA port, the way the host CPU
/// does it.
fn host_write_pipe(emu: &mut Emulator, pipe: u8, words: &[u16]) {
    const PDATA: u32 = 0x00;
    const PADR: u32 = 0x04;
    const PCFG: u32 = 0x08;

    let desc = 0x0800 + pipe as u32 * 5;

    emu.dsp_write16(PADR, desc as u16);
    emu.dsp_write16(PCFG, (1 << 1) | (1 << 2) | (1 << 4));
    let bufaddr = emu.dsp_read16(PDATA) as u32;
    let buflen = emu.dsp_read16(PDATA) as u32;
    let _rd = emu.dsp_read16(PDATA);
    let wr = emu.dsp_read16(PDATA);
    emu.dsp_write16(PCFG, 0);

    let pipelen = buflen >> 1;
    let mut wrptr = ((wr & 0x7FFF) >> 1) as u32;
    let mut wrphase = wr & 0x8000;

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

    emu.dsp_write16(PADR, (desc + 3) as u16);
    emu.dsp_write16(PDATA, ((wrptr << 1) as u16) | wrphase);
    emu.dsp_write16(PCFG, 0);
}
