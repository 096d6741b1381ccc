use std::fs::File;
use std::io::{Read, Write};

use clap::Parser;
use goblin::elf::program_header::PT_LOAD;
use space_time::SpaceTime;
use svarog_core::core::{Config, Core};
use svarog_core::debug::{DebugController, StopReason};
use svarog_core::interconnect::MemoryMap;
use svarog_core::{address_range, AddressRange};

/// Runs a single riscv-tests/riscv-compliance style ELF to completion and reports the result the
/// way the upstream harnesses expect: a "tohost" magic store for pass/fail, or a signature dump
/// for the `rv32i-p-*` comparison tests.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Signature file to write the `begin_signature..end_signature` memory region to.
    #[arg(long, short)]
    signature: Option<String>,

    /// Upper bound on cycles to run before declaring the test hung.
    #[arg(long, default_value_t = 1_000_000)]
    cycle_budget: u64,

    /// Elf file to run.
    elf: String,
}

/// A generous flat RAM big enough to hold any riscv-tests image plus its signature region,
/// mapped where the tests' own linker scripts put `.text`/`.data` (spec.md §6.1).
const RAM_BASE: u32 = 0x8000_0000;
const RAM_SIZE: usize = 0x0010_0000;

fn main() -> std::io::Result<()> {
    let args = Args::parse();

    let mut buf = Vec::new();
    File::open(&args.elf)?.read_to_end(&mut buf)?;
    let elf = goblin::elf::Elf::parse(&buf).expect("failed to parse elf file");

    let tohost = elf
        .syms
        .iter()
        .find_map(|sym| (elf.strtab.get_at(sym.st_name) == Some("tohost")).then_some(sym.st_value as u32));

    let mut allocator = SpaceTime::new();
    let config = Config {
        hart_id: 0,
        reset_vector: elf.entry as u32,
        mul_latency: 3,
        div_latency: 8,
        btb_entries: 64,
        memory_map: MemoryMap {
            rom: address_range!(0x0000_0000, 0x0000_0FFF),
            ram: AddressRange::new(RAM_BASE, RAM_BASE + RAM_SIZE as u32 - 1).unwrap(),
            clint: address_range!(0x0200_0000, 0x0200_FFFF),
            uart: address_range!(0x1000_0000, 0x1000_00FF),
        },
        ram_size: RAM_SIZE,
    };
    let core = Core::new(&mut allocator, config, &[]).expect("built-in test configuration is valid");

    for header in elf.program_headers.iter().filter(|h| h.p_type == PT_LOAD) {
        let segment = &buf[header.file_range()];
        core.interconnect().load_image(&mut allocator, header.p_paddr as u32, segment);
    }

    let mut debug = DebugController::new();
    if let Some(address) = tohost {
        debug.set_watchpoint(&core, &allocator, address);
    }
    let reason = debug.run(&core, &mut allocator, args.cycle_budget, || false);

    if let Some(path) = args.signature {
        write_signature(&elf, &core, &allocator, &path)?;
    }

    match reason {
        StopReason::Watchpoint(address) if Some(address) == tohost => {
            let value = debug
                .read_mem(&core, &allocator, address, svarog_core::debug::Width::Word)
                .expect("tohost address must be mapped, it was just written to");
            if value == 1 {
                Ok(())
            } else {
                eprintln!("test {} failed: tohost = {value:#010x}", args.elf);
                std::process::exit(1);
            }
        }
        StopReason::CycleBudget => {
            eprintln!("test {} timed out after {} cycles", args.elf, args.cycle_budget);
            std::process::exit(2);
        }
        other => {
            eprintln!("test {} stopped unexpectedly: {other:?}", args.elf);
            std::process::exit(1);
        }
    }
}

fn write_signature(
    elf: &goblin::elf::Elf,
    core: &Core<SpaceTime>,
    allocator: &SpaceTime,
    path: &str,
) -> std::io::Result<()> {
    let mut signature_start = None;
    let mut signature_end = None;
    for sym in elf.syms.iter() {
        let Some(name) = elf.strtab.get_at(sym.st_name) else {
            continue;
        };
        if name == "begin_signature" {
            signature_start = Some(sym.st_value as u32);
        } else if name == "end_signature" {
            signature_end = Some(sym.st_value as u32);
        }
    }
    let signature_start = signature_start.expect("missing symbol `begin_signature`");
    let signature_end = signature_end.expect("missing symbol `end_signature`");

    assert_eq!(signature_start % 16, 0);
    assert_eq!(signature_end % 4, 0);
    assert!(signature_start <= signature_end);

    let mut file = File::create(path)?;
    for address in (signature_start..signature_end).step_by(4) {
        let mut buf = [0u8; 4];
        core.interconnect()
            .read_pure(&mut buf, allocator, address)
            .expect("guest memory error while reading signature");
        writeln!(file, "{:08x}", u32::from_le_bytes(buf))?;
    }
    Ok(())
}
