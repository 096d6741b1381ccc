mod config;
mod gdb;
mod target;
mod tcp;

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use log::{error, info};
use svarog_core::core::Core;
use svarog_core::simulator::{SimulationAllocator, Simulator};

use target::GdbTarget;

/// Cycle-accurate functional model of a 5-stage in-order RV32I(M+Zicsr) pipeline.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML configuration describing the memory map and core parameters.
    #[arg(long)]
    config: PathBuf,

    /// ELF or raw binary loaded into memory before the first cycle. ELF files are placed at
    /// their program headers' physical addresses; a raw binary is placed at the reset vector.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Run a gdbstub server on this address (e.g. `127.0.0.1:9001`) instead of free-running.
    #[arg(long)]
    gdb: Option<String>,

    /// Free-run mode only: exit 0 once the program counter reaches this address.
    #[arg(long, value_parser = parse_hex_u32)]
    halt_addr: Option<u32>,

    /// Free-run mode only: exit with a distinct failure status if this many cycles elapse
    /// without reaching `halt_addr`.
    #[arg(long)]
    cycle_budget: Option<u64>,
}

fn parse_hex_u32(text: &str) -> Result<u32, std::num::ParseIntError> {
    u32::from_str_radix(text.trim_start_matches("0x"), 16)
}

/// Exit code reserved for a free run that exhausts its cycle budget without halting, distinct
/// from both success and a generic configuration/IO failure.
const EXIT_TIMEOUT: u8 = 2;

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let loaded = match config::load(&args.config) {
        Ok(loaded) => loaded,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let image = match &args.image {
        Some(path) => match std::fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                error!("failed to read image {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let core_config = loaded.core;
    let rom_image = loaded.rom_image;
    let mut simulator = Simulator::new(move |allocator| {
        Core::new(allocator, core_config, &rom_image)
            .expect("configuration was already validated while loading it")
    });

    if let Some(bytes) = image {
        load_image(&mut simulator, &bytes);
    }

    match args.gdb {
        Some(addr) => run_gdb_server(&addr, simulator),
        None => run_free(simulator, args.halt_addr, args.cycle_budget),
    }
}

/// Writes `bytes` into the core's address space before its first cycle. ELF images are placed
/// segment-by-segment at their own physical addresses; anything else is treated as a raw binary
/// and placed at the reset vector, matching what a boot ROM would otherwise have placed there.
fn load_image(simulator: &mut Simulator<Core<SimulationAllocator>>, bytes: &[u8]) {
    match Elf::parse(bytes) {
        Ok(elf) => {
            for header in elf.program_headers.iter().filter(|h| h.p_type == PT_LOAD) {
                let range = header.file_range();
                let segment = bytes[range].to_vec();
                let base = header.p_paddr as u32;
                simulator.step_with("load ELF segment", move |allocator, core| {
                    core.interconnect().load_image(allocator, base, &segment);
                });
            }
        }
        Err(_) => {
            let raw = bytes.to_vec();
            simulator.step_with("load raw image", move |allocator, core| {
                let base = core.pc(allocator);
                core.interconnect().load_image(allocator, base, &raw);
            });
        }
    }
}

fn run_free(
    mut simulator: Simulator<Core<SimulationAllocator>>,
    halt_addr: Option<u32>,
    cycle_budget: Option<u64>,
) -> ExitCode {
    let budget = cycle_budget.unwrap_or(u64::MAX);
    let mut cycles = 0u64;
    loop {
        if cycles >= budget {
            error!("cycle budget of {budget} exhausted without reaching a halt condition");
            return ExitCode::from(EXIT_TIMEOUT);
        }
        simulator.step();
        cycles += 1;

        let (allocator, core) = simulator.inspect();
        let pc = core.pc(allocator);
        if halt_addr == Some(pc) {
            info!("halted at {pc:#010x} after {cycles} cycles");
            return ExitCode::SUCCESS;
        }
    }
}

fn run_gdb_server(addr: &str, simulator: Simulator<Core<SimulationAllocator>>) -> ExitCode {
    let listener = match TcpListener::bind(addr) {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {addr}: {err}");
            return ExitCode::FAILURE;
        }
    };
    info!("waiting for a gdb connection on {addr}");

    let (stream, peer) = match listener.accept() {
        Ok(pair) => pair,
        Err(err) => {
            error!("failed to accept a connection: {err}");
            return ExitCode::FAILURE;
        }
    };
    info!("gdb connected from {peer}");

    let mut target = GdbTarget::new(simulator);
    match gdb::run_session(tcp::TcpStream::new(stream), &mut target) {
        Ok(reason) => {
            info!("gdb session ended: {reason:?}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("gdb session error: {err:?}");
            ExitCode::FAILURE
        }
    }
}
