//! Declarative configuration (spec.md §6.4): a TOML file naming the memory map and core
//! parameters, deserialized with `serde`/`toml` and translated into a
//! [`svarog_core::core::Config`]. There's deliberately no general-purpose region layout here —
//! spec.md §1 excludes a configurable memory-region front end beyond what's needed to describe
//! *this* core's fixed ROM/RAM/CLINT/UART slave set, so [`load`] validates that the declared
//! regions and peripherals actually match that shape instead of building a more general bus out of
//! whatever the file says.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use svarog_core::address_range::InvalidBoundsError;
use svarog_core::core::Config as CoreConfig;
use svarog_core::interconnect::MemoryMap;
use svarog_core::AddressRange;
use thiserror::Error;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    Ram,
    Rom,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryRegion {
    pub base: u32,
    pub size: u32,
    pub kind: RegionKind,
    /// Path to a raw binary loaded at `base` before the first cycle. ROM regions require this;
    /// RAM regions may omit it and start zeroed.
    pub init_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeripheralBase {
    pub base: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UartConfig {
    pub base: u32,
    #[allow(dead_code)] // surfaced to the host for logging only; the device itself is anonymous
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Peripherals {
    pub timer: Option<PeripheralBase>,
    pub mswi: Option<PeripheralBase>,
    #[serde(default)]
    pub uarts: Vec<UartConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IsaExtensions {
    #[serde(default = "default_true")]
    pub m: bool,
    #[serde(default = "default_true")]
    pub zicsr: bool,
    #[serde(default)]
    pub zicntr: bool,
}

impl Default for IsaExtensions {
    fn default() -> Self {
        Self {
            m: true,
            zicsr: true,
            zicntr: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_num_harts() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_num_harts")]
    pub num_harts: u32,
    pub memory_regions: Vec<MemoryRegion>,
    #[serde(default)]
    pub peripherals: Peripherals,
    pub reset_vector: u32,
    #[serde(default)]
    pub isa_extensions: IsaExtensions,
    pub mul_latency: u32,
    pub div_latency: u32,
    pub btb_entries: usize,
}

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("this core models exactly one hart, but num_harts = {0}")]
    MultipleHarts(u32),
    #[error(
        "this core needs exactly one RAM region and one ROM region, found {ram} RAM and {rom} ROM"
    )]
    RegionShape { ram: usize, rom: usize },
    #[error("a ROM region needs an init_file")]
    RomWithoutImage,
    #[error("failed to read ROM image {path}: {source}")]
    RomImageIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("the timer and MSWI peripherals share one CLINT device on this core and must share one base address")]
    SplitClint,
    #[error("the timer/MSWI peripheral is required on this core")]
    MissingClint,
    #[error("this core models exactly one UART, found {0}")]
    UartShape(usize),
    #[error("invalid memory region bounds: {0}")]
    InvalidRange(#[from] InvalidBoundsError),
    #[error("the M extension and Zicsr are required on this core and cannot be disabled")]
    RequiredExtensionDisabled,
}

/// A [`CoreConfig`] plus the binary images [`load`] read off disk for it.
pub struct LoadedConfig {
    pub core: CoreConfig,
    pub rom_image: Vec<u8>,
}

pub fn load(path: &Path) -> Result<LoadedConfig, ConfigLoadError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let file: FileConfig = toml::from_str(&text)?;
    build(file)
}

fn build(file: FileConfig) -> Result<LoadedConfig, ConfigLoadError> {
    if file.num_harts != 1 {
        return Err(ConfigLoadError::MultipleHarts(file.num_harts));
    }
    if !(file.isa_extensions.m && file.isa_extensions.zicsr) {
        return Err(ConfigLoadError::RequiredExtensionDisabled);
    }

    let rom_regions: Vec<_> = file
        .memory_regions
        .iter()
        .filter(|r| r.kind == RegionKind::Rom)
        .collect();
    let ram_regions: Vec<_> = file
        .memory_regions
        .iter()
        .filter(|r| r.kind == RegionKind::Ram)
        .collect();
    if rom_regions.len() != 1 || ram_regions.len() != 1 {
        return Err(ConfigLoadError::RegionShape {
            ram: ram_regions.len(),
            rom: rom_regions.len(),
        });
    }
    let rom_region = rom_regions[0];
    let ram_region = ram_regions[0];

    let clint_base = match (&file.peripherals.timer, &file.peripherals.mswi) {
        (Some(timer), Some(mswi)) if timer.base == mswi.base => timer.base,
        (Some(_), Some(_)) => return Err(ConfigLoadError::SplitClint),
        (Some(timer), None) => timer.base,
        (None, Some(mswi)) => mswi.base,
        (None, None) => return Err(ConfigLoadError::MissingClint),
    };
    if file.peripherals.uarts.len() != 1 {
        return Err(ConfigLoadError::UartShape(file.peripherals.uarts.len()));
    }
    let uart_base = file.peripherals.uarts[0].base;

    let rom_path = rom_region
        .init_file
        .as_ref()
        .ok_or(ConfigLoadError::RomWithoutImage)?;
    let rom_image = fs::read(rom_path).map_err(|source| ConfigLoadError::RomImageIo {
        path: rom_path.clone(),
        source,
    })?;

    let memory_map = MemoryMap {
        rom: region_range(rom_region)?,
        ram: region_range(ram_region)?,
        // The CLINT maps mtime/mtimecmp/msip across a 64 KiB window starting at its base,
        // matching `resources::clint`'s address constants.
        clint: AddressRange::new(clint_base, clint_base + 0xFFFF)?,
        uart: AddressRange::new(uart_base, uart_base + 0xFF)?,
    };

    let core = CoreConfig {
        hart_id: 0,
        reset_vector: file.reset_vector,
        mul_latency: file.mul_latency,
        div_latency: file.div_latency,
        btb_entries: file.btb_entries,
        memory_map,
        ram_size: ram_region.size as usize,
    };

    Ok(LoadedConfig { core, rom_image })
}

fn region_range(region: &MemoryRegion) -> Result<AddressRange, InvalidBoundsError> {
    AddressRange::new(region.base, region.base + region.size - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileConfig {
        toml::from_str(
            r#"
            reset_vector = 0x8000_0000
            mul_latency = 3
            div_latency = 8
            btb_entries = 64

            [[memory_regions]]
            base = 0x0000_0000
            size = 0x1000
            kind = "rom"
            init_file = "boot.bin"

            [[memory_regions]]
            base = 0x8000_0000
            size = 0x10000
            kind = "ram"

            [peripherals.timer]
            base = 0x0200_0000

            [peripherals.mswi]
            base = 0x0200_0000

            [[peripherals.uarts]]
            base = 0x1000_0000
            name = "uart0"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn rejects_multiple_harts() {
        let mut file = sample();
        file.num_harts = 2;
        assert!(matches!(build(file), Err(ConfigLoadError::MultipleHarts(2))));
    }

    #[test]
    fn rejects_split_clint_bases() {
        let mut file = sample();
        file.peripherals.mswi.as_mut().unwrap().base = 0x0201_0000;
        assert!(matches!(build(file), Err(ConfigLoadError::SplitClint)));
    }

    #[test]
    fn rejects_wrong_region_shape() {
        let mut file = sample();
        file.memory_regions.pop();
        assert!(matches!(
            build(file),
            Err(ConfigLoadError::RegionShape { ram: 0, rom: 1 })
        ));
    }
}
