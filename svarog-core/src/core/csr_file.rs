//! CSR file (C6): the 12-bit addressable control/status register space.
//!
//! Unifies what the teacher split across a deprecated `cs_registers.rs` crossbar and a newer
//! `csr.rs` diplomatic crossbar (see spec.md's REDESIGN FLAGS: "the specification ... describes
//! the union of their intended behavior; an implementer should unify") into the single module
//! spec.md's table in §3 implies: one addressable device, dispatched by a plain `match` on the
//! 12-bit address rather than a crossbar of per-feature device objects, since this core has
//! exactly one hart and exactly one CSR-bearing component.
//!
//! Reads are combinational (same-cycle, no side effects); writes are committed by whichever
//! caller holds the single per-cycle commit point (`Core::cycle`'s Writeback stage, or the trap
//! controller's [`CsrFile::trap_entry`]/[`CsrFile::mret`] hardware-driven mutators).

use space_time::allocator::Allocator;
use thiserror::Error;

use super::counters::Counters;
use crate::Allocated;

/// A 12-bit CSR address. Only the low 12 bits are ever meaningful.
pub type CsrSpecifier = u16;

pub mod addr {
    use super::CsrSpecifier;

    pub const MSTATUS: CsrSpecifier = 0x300;
    pub const MISA: CsrSpecifier = 0x301;
    pub const MIE: CsrSpecifier = 0x304;
    pub const MTVEC: CsrSpecifier = 0x305;
    pub const MCOUNTINHIBIT: CsrSpecifier = 0x320;
    pub const MSCRATCH: CsrSpecifier = 0x340;
    pub const MEPC: CsrSpecifier = 0x341;
    pub const MCAUSE: CsrSpecifier = 0x342;
    pub const MTVAL: CsrSpecifier = 0x343;
    pub const MIP: CsrSpecifier = 0x344;
    pub const MCYCLE: CsrSpecifier = 0xB00;
    pub const MINSTRET: CsrSpecifier = 0xB02;
    pub const MHPMCOUNTER3: CsrSpecifier = 0xB03;
    pub const MHPMCOUNTER4: CsrSpecifier = 0xB04;
    pub const MCYCLEH: CsrSpecifier = 0xB80;
    pub const MINSTRETH: CsrSpecifier = 0xB82;
    pub const MHPMCOUNTER3H: CsrSpecifier = 0xB83;
    pub const MHPMCOUNTER4H: CsrSpecifier = 0xB84;
    pub const MVENDORID: CsrSpecifier = 0xF11;
    pub const MARCHID: CsrSpecifier = 0xF12;
    pub const MIMPID: CsrSpecifier = 0xF13;
    pub const MHARTID: CsrSpecifier = 0xF14;
}

/// `MIE`(3)/`MPIE`(7)/`MPP`(12:11, hard-wired to `0b11`) are the only meaningful bits of
/// `mstatus` in an M-mode-only core (spec.md §3: "MPP hard-wired to 3 in M-only").
const MSTATUS_MIE: u32 = 1 << 3;
const MSTATUS_MPIE: u32 = 1 << 7;
const MSTATUS_MPP: u32 = 0b11 << 11;

const MIP_MSIP: u32 = 1 << 3;
const MIP_MTIP: u32 = 1 << 7;
const MIP_MEIP: u32 = 1 << 11;
const MIE_MASK: u32 = MIP_MSIP | MIP_MTIP | MIP_MEIP;

/// RV32IM + Zicsr: `MXL = 1` (32-bit), extensions `I` (bit 8) and `M` (bit 12).
const MISA: u32 = (1 << 30) | (1 << 8) | (1 << 12);

#[derive(Debug, Clone, Eq, PartialEq)]
struct State {
    mstatus_mie: bool,
    mstatus_mpie: bool,
    mie: u32,
    /// Software-settable external-interrupt-pending bit. Per spec.md's table, `MEIP` is
    /// "externally driven"; this core has no external interrupt controller behind it, so (per
    /// SPEC_FULL.md §5.6) the only way to set it is a direct CSR write, kept for testability.
    meip: bool,
    mtvec: u32,
    mepc: u32,
    mcause: u32,
    mtval: u32,
    mscratch: u32,
    hart_id: u32,
    counters: Counters,
}

#[derive(Debug)]
pub struct CsrFile<A: Allocator> {
    state: Allocated<A, State>,
}

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("unsupported CSR address {0:#05x}")]
pub struct CsrAccessError(pub CsrSpecifier);

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum CsrWriteError {
    #[error(transparent)]
    Access(#[from] CsrAccessError),
    #[error("write to read-only CSR {0:#05x}")]
    ReadOnly(CsrSpecifier),
}

impl<A: Allocator> CsrFile<A> {
    pub fn new(allocator: &mut A, hart_id: u32) -> Self {
        Self {
            state: Allocated::new(
                allocator,
                State {
                    mstatus_mie: false,
                    mstatus_mpie: false,
                    mie: 0,
                    meip: false,
                    mtvec: 0,
                    mepc: 0,
                    mcause: 0,
                    mtval: 0,
                    mscratch: 0,
                    hart_id,
                    counters: Counters::new(),
                },
            ),
        }
    }

    pub fn reset(&self, allocator: &mut A) {
        let state = self.state.get_mut(allocator);
        state.mstatus_mie = false;
        state.mstatus_mpie = false;
        state.mie = 0;
        state.meip = false;
        state.mepc = 0;
        state.mcause = 0;
        state.mtval = 0;
        // mtvec, mscratch survive reset per the RISC-V privileged spec's reset-value table
        // (unspecified, so this model preserves them rather than clearing them).
        state.counters.reset();
    }

    /// `true` iff global interrupts are enabled and at least one enabled interrupt is pending
    /// (spec.md §4.6: `interrupt_pending = (mip & mie) != 0 && mstatus.MIE`).
    pub fn interrupt_pending(&self, allocator: &A, msip: bool, mtip: bool) -> bool {
        let state = self.state.get(allocator);
        state.mstatus_mie && (Self::mip(state, msip, mtip) & state.mie) != 0
    }

    /// Priority-encoded pending-and-enabled interrupt cause, highest priority first: MEIP(11) >
    /// MSIP(3) > MTIP(7) (spec.md §4.6). `None` if [`Self::interrupt_pending`] would be `false`.
    pub fn pending_interrupt_cause(&self, allocator: &A, msip: bool, mtip: bool) -> Option<u32> {
        let state = self.state.get(allocator);
        if !state.mstatus_mie {
            return None;
        }
        let active = Self::mip(state, msip, mtip) & state.mie;
        if active & MIP_MEIP != 0 {
            Some(11)
        } else if active & MIP_MSIP != 0 {
            Some(3)
        } else if active & MIP_MTIP != 0 {
            Some(7)
        } else {
            None
        }
    }

    fn mip(state: &State, msip: bool, mtip: bool) -> u32 {
        (msip as u32) << 3 | (mtip as u32) << 7 | (state.meip as u32) << 11
    }

    /// Combinational read of `addr`. `msip`/`mtip` are this cycle's externally-driven bits from
    /// the timer/MSWI device (spec.md §3: "mip: ... MTIP/MEIP externally driven").
    pub fn read(
        &self,
        allocator: &A,
        addr: CsrSpecifier,
        msip: bool,
        mtip: bool,
    ) -> Result<u32, CsrAccessError> {
        let state = self.state.get(allocator);
        Ok(match addr {
            addr::MSTATUS => {
                (state.mstatus_mie as u32) << 3 | (state.mstatus_mpie as u32) << 7 | MSTATUS_MPP
            }
            addr::MISA => MISA,
            addr::MIE => state.mie,
            addr::MTVEC => state.mtvec,
            addr::MCOUNTINHIBIT => state.counters.read_mcountinhibit(),
            addr::MSCRATCH => state.mscratch,
            addr::MEPC => state.mepc,
            addr::MCAUSE => state.mcause,
            addr::MTVAL => state.mtval,
            addr::MIP => Self::mip(state, msip, mtip),
            addr::MCYCLE => state.counters.read_mcycle(),
            addr::MCYCLEH => state.counters.read_mcycleh(),
            addr::MINSTRET => state.counters.read_minstret(),
            addr::MINSTRETH => state.counters.read_minstreth(),
            addr::MHPMCOUNTER3 => state.counters.read_mhpmcounter3(),
            addr::MHPMCOUNTER3H => state.counters.read_mhpmcounter3h(),
            addr::MHPMCOUNTER4 => state.counters.read_mhpmcounter4(),
            addr::MHPMCOUNTER4H => state.counters.read_mhpmcounter4h(),
            addr::MVENDORID | addr::MARCHID | addr::MIMPID => 0,
            addr::MHARTID => state.hart_id,
            _ => return Err(CsrAccessError(addr)),
        })
    }

    /// Commits `value` to `addr`. The caller (the EX/WB dataflow in `Core::cycle`) is responsible
    /// for having already computed the read-modify-write result per the instruction's `CsrOp`;
    /// this method only applies the documented per-register write masks (spec.md §4.5).
    pub fn write(&self, allocator: &mut A, addr: CsrSpecifier, value: u32) -> Result<(), CsrWriteError> {
        let state = self.state.get_mut(allocator);
        match addr {
            addr::MSTATUS => {
                state.mstatus_mie = value & MSTATUS_MIE != 0;
                state.mstatus_mpie = value & MSTATUS_MPIE != 0;
            }
            addr::MIE => state.mie = value & MIE_MASK,
            addr::MTVEC => state.mtvec = value & !0b11,
            addr::MCOUNTINHIBIT => state.counters.write_mcountinhibit(value),
            addr::MSCRATCH => state.mscratch = value,
            addr::MEPC => state.mepc = value & !0b11,
            addr::MCAUSE => state.mcause = value,
            addr::MTVAL => state.mtval = value,
            addr::MIP => state.meip = value & MIP_MEIP != 0,
            addr::MCYCLE => state.counters.write_mcycle(value),
            addr::MCYCLEH => state.counters.write_mcycleh(value),
            addr::MINSTRET => state.counters.write_minstret(value),
            addr::MINSTRETH => state.counters.write_minstreth(value),
            addr::MHPMCOUNTER3 => state.counters.write_mhpmcounter3(value),
            addr::MHPMCOUNTER3H => state.counters.write_mhpmcounter3h(value),
            addr::MHPMCOUNTER4 => state.counters.write_mhpmcounter4(value),
            addr::MHPMCOUNTER4H => state.counters.write_mhpmcounter4h(value),
            addr::MISA | addr::MVENDORID | addr::MARCHID | addr::MIMPID | addr::MHARTID => {
                return Err(CsrWriteError::ReadOnly(addr))
            }
            _ => return Err(CsrWriteError::Access(CsrAccessError(addr))),
        }
        Ok(())
    }

    /// `true` iff `addr` names a register this CSR file recognizes, regardless of whether it's
    /// writable. Used by the decoder's illegal-instruction check for `CSRRW`/`CSRRS`/`CSRRC`.
    pub fn is_valid(addr: CsrSpecifier) -> bool {
        matches!(
            addr,
            addr::MSTATUS
                | addr::MISA
                | addr::MIE
                | addr::MTVEC
                | addr::MCOUNTINHIBIT
                | addr::MSCRATCH
                | addr::MEPC
                | addr::MCAUSE
                | addr::MTVAL
                | addr::MIP
                | addr::MCYCLE
                | addr::MCYCLEH
                | addr::MINSTRET
                | addr::MINSTRETH
                | addr::MHPMCOUNTER3
                | addr::MHPMCOUNTER3H
                | addr::MHPMCOUNTER4
                | addr::MHPMCOUNTER4H
                | addr::MVENDORID
                | addr::MARCHID
                | addr::MIMPID
                | addr::MHARTID
        )
    }

    /// Hardware-driven trap entry (spec.md §4.5 "Side-effects driven by hardware"), called by the
    /// trap controller (C10) rather than through the normal [`Self::write`] path.
    pub fn trap_entry(&self, allocator: &mut A, cause: u32, epc: u32, tval: u32) {
        let state = self.state.get_mut(allocator);
        state.mepc = epc & !0b11;
        state.mcause = cause;
        state.mtval = tval;
        state.mstatus_mpie = state.mstatus_mie;
        state.mstatus_mie = false;
    }

    /// Hardware-driven `MRET`; returns the PC to resume at (`mepc`).
    pub fn mret(&self, allocator: &mut A) -> u32 {
        let state = self.state.get_mut(allocator);
        state.mstatus_mie = state.mstatus_mpie;
        state.mstatus_mpie = true;
        state.mepc
    }

    pub fn tick_cycle(&self, allocator: &mut A) {
        self.state.get_mut(allocator).counters.tick_cycle();
    }

    pub fn retire_instruction(&self, allocator: &mut A) {
        self.state.get_mut(allocator).counters.retire_instruction();
    }

    pub fn retire_branch(&self, allocator: &mut A) {
        self.state.get_mut(allocator).counters.retire_branch();
    }

    pub fn count_stall_cycle(&self, allocator: &mut A) {
        self.state.get_mut(allocator).counters.count_stall_cycle();
    }

    pub fn mtvec(&self, allocator: &A) -> u32 {
        self.state.get(allocator).mtvec
    }

    pub fn drop(self, allocator: &mut A) {
        self.state.drop(allocator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use space_time::SpaceTime;

    #[test]
    fn mstatus_mpp_always_reads_as_machine_mode() {
        let mut allocator = SpaceTime::new();
        let csrs = CsrFile::new(&mut allocator, 0);
        assert_eq!(csrs.read(&allocator, addr::MSTATUS, false, false).unwrap() & MSTATUS_MPP, MSTATUS_MPP);
    }

    #[test]
    fn mepc_low_bits_are_cleared_on_write() {
        let mut allocator = SpaceTime::new();
        let csrs = CsrFile::new(&mut allocator, 0);
        csrs.write(&mut allocator, addr::MEPC, 0x8000_0003).unwrap();
        assert_eq!(csrs.read(&allocator, addr::MEPC, false, false).unwrap(), 0x8000_0000);
    }

    #[test]
    fn write_to_read_only_csr_is_rejected() {
        let mut allocator = SpaceTime::new();
        let csrs = CsrFile::new(&mut allocator, 0);
        assert_eq!(
            csrs.write(&mut allocator, addr::MISA, 0),
            Err(CsrWriteError::ReadOnly(addr::MISA))
        );
    }

    #[test]
    fn trap_entry_then_mret_restores_interrupt_enable() {
        let mut allocator = SpaceTime::new();
        let csrs = CsrFile::new(&mut allocator, 0);
        csrs.write(&mut allocator, addr::MSTATUS, MSTATUS_MIE).unwrap();
        csrs.trap_entry(&mut allocator, 11, 0x1000, 0);
        assert_eq!(csrs.read(&allocator, addr::MSTATUS, false, false).unwrap() & MSTATUS_MIE, 0);
        let resume_pc = csrs.mret(&mut allocator);
        assert_eq!(resume_pc, 0x1000);
        assert_eq!(csrs.read(&allocator, addr::MSTATUS, false, false).unwrap() & MSTATUS_MIE, MSTATUS_MIE);
    }

    #[test]
    fn interrupt_priority_is_meip_then_msip_then_mtip() {
        let mut allocator = SpaceTime::new();
        let csrs = CsrFile::new(&mut allocator, 0);
        csrs.write(&mut allocator, addr::MSTATUS, MSTATUS_MIE).unwrap();
        csrs.write(&mut allocator, addr::MIE, MIE_MASK).unwrap();
        csrs.write(&mut allocator, addr::MIP, MIP_MEIP).unwrap();
        assert_eq!(csrs.pending_interrupt_cause(&allocator, true, true), Some(11));
    }

    #[test]
    fn mhartid_reports_configured_hart() {
        let mut allocator = SpaceTime::new();
        let csrs = CsrFile::new(&mut allocator, 3);
        assert_eq!(csrs.read(&allocator, addr::MHARTID, false, false).unwrap(), 3);
    }
}
