//! Memory interconnect (C12): routes masters (instruction fetch, data memory, debug) onto the
//! address-decoded slaves behind it.
//!
//! Grounded in the teacher's `board/system_bus.rs` (address-range routing via
//! [`TwoWayAddressMap`], one `dyn Bus<A>` per slave) and its `system_bus.rs` (`AccessType`,
//! the `SystemBus` trait). Two things differ from the teacher on purpose:
//!
//! - Unmapped or partially-mapped accesses return [`AccessFault`] instead of silently doing
//!   nothing. The teacher's "vacant regions do nothing" behavior would let a misconfigured
//!   memory map masquerade as a correctly-initialized-to-zero region; spec.md requires the
//!   Memory stage to see this as a genuine access fault and raise the matching exception.
//! - There's no longer a separate `Board` owning this plus the devices: `Core` owns an
//!   `Interconnect` directly, and the interconnect owns the slave devices themselves.
//!
//! The round-robin [`Arbiter`] models spec.md §4.7's "arbitration: round-robin across masters
//! with pending requests", but since every slave in this model is always-ready within the same
//! cycle it is issued, contention never actually delays a request — the arbiter always grants
//! whichever master asks first in a cycle, and the second simply goes next. It is kept as a
//! distinct component because a future slave that isn't always-ready should only have to plug
//! into this one seam.

use space_time::allocator::Allocator;
use thiserror::Error;

use crate::address_map::TwoWayAddressMap;
use crate::bus::{Bus, PureAccessResult};
use crate::resources::clint::Clint;
use crate::resources::ram::Ram;
use crate::resources::rom::Rom;
use crate::resources::uart::Uart;
use crate::simulator::Simulatable;
use crate::AddressRange;

/// A request fell outside every mapped slave, or straddled two slaves' ranges. MEM converts this
/// into an access-fault exception (spec.md §4.7); IF converts it into an instruction-access-fault.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("access fault: no single slave covers the requested address range")]
pub struct AccessFault;

/// The kind of master issuing a request, used only for [`Arbiter`] bookkeeping and logging.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Master {
    Fetch,
    Memory,
    Debug,
}

/// Uniquely identifies each slave device attached to the [`Interconnect`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
enum Slave {
    Rom,
    Ram,
    Clint,
    Uart,
}

/// Configuration for the address ranges each slave occupies. Ranges must not overlap; constructing
/// an [`Interconnect`] with an overlapping map is an implementation error and panics, since it can
/// only result from a misconfigured [`crate::core::Config`] (spec.md §7: "configuration errors ...
/// panic with a diagnostic").
#[derive(Debug, Clone)]
pub struct MemoryMap {
    pub rom: AddressRange,
    pub ram: AddressRange,
    pub clint: AddressRange,
    pub uart: AddressRange,
}

#[derive(Debug)]
pub struct Interconnect<A: Allocator> {
    memory_map: TwoWayAddressMap<Slave>,
    ram_range: AddressRange,
    rom: Rom<A>,
    ram: Ram<A>,
    clint: Clint<A>,
    uart: Uart<A>,
}

impl<A: Allocator> Interconnect<A> {
    /// Builds the interconnect from already-sized slave devices and the ranges they occupy.
    /// Panics if `map` describes overlapping ranges, or if a range's size doesn't match the
    /// corresponding device's size.
    pub fn new(
        allocator: &mut A,
        map: MemoryMap,
        rom_image: &[u8],
        ram_size: usize,
    ) -> Self {
        let rom = Rom::new(allocator, map.rom.size().expect("rom range must be finite"), rom_image)
            .expect("rom size must be representable in 32 bits");
        let ram = Ram::new(allocator, ram_size).expect("ram size must be representable in 32 bits");
        assert_eq!(
            ram_size,
            map.ram.size().expect("ram range must be finite"),
            "ram device size must match its mapped range"
        );
        let clint = Clint::new(allocator);
        let uart = Uart::new(allocator);

        let memory_map = crate::two_way_addr_map! {
            [map.rom.start(), map.rom.end()] <=> Slave::Rom,
            [map.ram.start(), map.ram.end()] <=> Slave::Ram,
            [map.clint.start(), map.clint.end()] <=> Slave::Clint,
            [map.uart.start(), map.uart.end()] <=> Slave::Uart,
        };

        Self {
            memory_map,
            ram_range: map.ram,
            rom,
            ram,
            clint,
            uart,
        }
    }

    pub fn reset(&self, allocator: &mut A) {
        self.ram.reset(allocator);
        self.clint.reset(allocator);
    }

    /// Loads `data` at physical address `base_address`, writing only the portion that falls
    /// within the mapped RAM range and silently dropping the rest. Grounded in the teacher's
    /// `Board::load_physical`, which likewise only ever writes into DRAM: preloading a boot image
    /// into ROM or a peripheral's address range isn't something this model supports, since ROM
    /// is fixed at construction time and peripherals have no notion of a memory image.
    pub fn load_image(&self, allocator: &mut A, base_address: u32, data: &[u8]) {
        let ram_start = self.ram_range.start();
        let ram_end = self.ram_range.end();
        if data.is_empty() || base_address > ram_end {
            return;
        }
        let skip = ram_start.saturating_sub(base_address) as usize;
        if skip >= data.len() {
            return;
        }
        let write_address = base_address.max(ram_start);
        self.ram.write(allocator, write_address - ram_start, &data[skip..]);
    }

    pub fn clint(&self) -> &Clint<A> {
        &self.clint
    }

    pub fn uart(&self) -> &Uart<A> {
        &self.uart
    }

    fn check_access(&self, address: u32, size: usize) -> Result<(Slave, u32), AccessFault> {
        let (range, slave) = self.memory_map.range_value(address);
        let slave = *slave.ok_or(AccessFault)?;

        let fits = size
            .checked_sub(1)
            .and_then(|delta| u32::try_from(delta).ok())
            .map(|delta| range.end() - address >= delta)
            .unwrap_or(false);
        if !fits {
            return Err(AccessFault);
        }

        Ok((slave, address - range.start()))
    }

    fn bus_of(&self, slave: Slave) -> &dyn Bus<A> {
        match slave {
            Slave::Rom => &self.rom,
            Slave::Ram => &self.ram,
            Slave::Clint => &self.clint,
            Slave::Uart => &self.uart,
        }
    }

    /// Issues a read on behalf of `master`. See the module docs for why this returns a `Result`
    /// where the teacher's silently no-ops.
    pub fn read(
        &self,
        buf: &mut [u8],
        allocator: &mut A,
        address: u32,
        master: Master,
    ) -> Result<(), AccessFault> {
        let (slave, mapped_address) = self.check_access(address, buf.len())?;
        log::trace!("{master:?} reads {} bytes at {address:#010x} ({slave:?})", buf.len());
        self.bus_of(slave).read(buf, allocator, mapped_address);
        Ok(())
    }

    /// Effect-free read, used by the debug module (spec.md §6.3 `read_mem`) so inspecting memory
    /// never perturbs simulated state.
    pub fn read_pure(&self, buf: &mut [u8], allocator: &A, address: u32) -> Result<(), AccessFault> {
        let (slave, mapped_address) = self.check_access(address, buf.len())?;
        self.bus_of(slave)
            .read_pure(buf, allocator, mapped_address)
            .map_err(|_: crate::bus::PureAccessError| AccessFault)
    }

    pub fn write(
        &self,
        allocator: &mut A,
        address: u32,
        buf: &[u8],
        master: Master,
    ) -> Result<(), AccessFault> {
        let (slave, mapped_address) = self.check_access(address, buf.len())?;
        log::trace!("{master:?} writes {} bytes at {address:#010x} ({slave:?})", buf.len());
        self.bus_of(slave).write(allocator, mapped_address, buf);
        Ok(())
    }
}

impl<A: Allocator> Simulatable<A> for Interconnect<A> {
    fn tick(&self, allocator: &mut A) {
        self.clint.tick_timer(allocator);
    }

    fn drop(self, allocator: &mut A) {
        self.rom.drop(allocator);
        self.ram.drop(allocator);
        self.clint.drop(allocator);
        self.uart.drop(allocator);
    }
}

/// Round-robin arbiter over a fixed set of masters contending for the interconnect in a single
/// cycle. See the module docs for why this never actually stalls a request in this model.
#[derive(Debug, Clone, Default)]
pub struct Arbiter {
    last_granted: Option<usize>,
}

impl Arbiter {
    pub fn new() -> Self {
        Self { last_granted: None }
    }

    /// Picks which of `requesters` (a per-master "has a pending request" flag, indexed the same
    /// way every call) is granted the bus this cycle, starting the search just after whichever
    /// master was granted last time. Returns `None` if nobody is requesting.
    pub fn grant(&mut self, requesters: &[bool]) -> Option<usize> {
        if requesters.is_empty() {
            return None;
        }
        let start = self.last_granted.map_or(0, |i| (i + 1) % requesters.len());
        let granted = (0..requesters.len())
            .map(|offset| (start + offset) % requesters.len())
            .find(|&i| requesters[i])?;
        self.last_granted = Some(granted);
        Some(granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use space_time::SpaceTime;

    fn test_map() -> MemoryMap {
        MemoryMap {
            rom: AddressRange::new(0x0000_0000, 0x0000_0FFF).unwrap(),
            ram: AddressRange::new(0x8000_0000, 0x8000_0FFF).unwrap(),
            clint: AddressRange::new(0x0200_0000, 0x0200_FFFF).unwrap(),
            uart: AddressRange::new(0x1000_0000, 0x1000_00FF).unwrap(),
        }
    }

    #[test]
    fn write_then_read_back_through_ram() {
        let mut allocator = SpaceTime::new();
        let interconnect = Interconnect::new(&mut allocator, test_map(), &[], 0x1000);
        interconnect
            .write(&mut allocator, 0x8000_0010, &[0xAA, 0xBB], Master::Memory)
            .unwrap();
        let mut buf = [0u8; 2];
        interconnect
            .read(&mut buf, &mut allocator, 0x8000_0010, Master::Memory)
            .unwrap();
        assert_eq!(buf, [0xAA, 0xBB]);
    }

    #[test]
    fn unmapped_address_is_an_access_fault() {
        let mut allocator = SpaceTime::new();
        let interconnect = Interconnect::new(&mut allocator, test_map(), &[], 0x1000);
        let mut buf = [0u8; 4];
        assert_eq!(
            interconnect.read(&mut buf, &mut allocator, 0x4000_0000, Master::Fetch),
            Err(AccessFault)
        );
    }

    #[test]
    fn access_straddling_two_slaves_is_an_access_fault() {
        let mut allocator = SpaceTime::new();
        let interconnect = Interconnect::new(&mut allocator, test_map(), &[], 0x1000);
        let mut buf = [0u8; 4];
        assert_eq!(
            interconnect.read(&mut buf, &mut allocator, 0x0000_0FFE, Master::Fetch),
            Err(AccessFault)
        );
    }

    #[test]
    fn arbiter_round_robins_between_contending_masters() {
        let mut arbiter = Arbiter::new();
        assert_eq!(arbiter.grant(&[true, true]), Some(0));
        assert_eq!(arbiter.grant(&[true, true]), Some(1));
        assert_eq!(arbiter.grant(&[true, true]), Some(0));
        assert_eq!(arbiter.grant(&[false, false]), None);
    }
}
