//! Trap controller (C10): arbitrates between the exception sources the pipeline's stages attach
//! to an instruction and the asynchronous interrupts reported by [`super::interrupt_ctrl`], and
//! drives the single commit point where a trap is actually taken.
//!
//! M-mode only: there is no `S`/`U` privilege level to trap into or delegate to, so unlike the
//! teacher's `trap.rs` this has no `scause`/`stval`/delegation-mask handling — every trap enters
//! at `mtvec` (spec.md §3: "privilege mode: M only").

use space_time::allocator::Allocator;

use super::csr_file::CsrFile;
use super::pipeline::MemWb;

/// A synchronous exception source. Ordered (via [`ExceptionCause::priority`]) per spec.md §4.6,
/// independent of which pipeline stage raised it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ExceptionCause {
    InstructionAddressMisaligned,
    InstructionAccessFault,
    IllegalInstruction,
    Breakpoint,
    LoadAddressMisaligned,
    LoadAccessFault,
    StoreAddressMisaligned,
    StoreAccessFault,
    EcallFromM,
}

impl ExceptionCause {
    /// Lower returns first. Mirrors the order spec.md §4.6 lists the seven synchronous sources in
    /// (interrupts, an eighth and lowest-priority source, are handled separately in
    /// [`resolve_interrupt`]).
    fn priority(self) -> u8 {
        match self {
            ExceptionCause::InstructionAddressMisaligned => 0,
            ExceptionCause::InstructionAccessFault => 0,
            ExceptionCause::IllegalInstruction => 1,
            ExceptionCause::Breakpoint => 2,
            ExceptionCause::LoadAddressMisaligned | ExceptionCause::LoadAccessFault => 3,
            ExceptionCause::StoreAddressMisaligned | ExceptionCause::StoreAccessFault => 4,
            ExceptionCause::EcallFromM => 5,
        }
    }

    /// The standard RISC-V `mcause` exception code (privileged spec table 3.6).
    pub fn code(self) -> u32 {
        match self {
            ExceptionCause::InstructionAddressMisaligned => 0,
            ExceptionCause::InstructionAccessFault => 1,
            ExceptionCause::IllegalInstruction => 2,
            ExceptionCause::Breakpoint => 3,
            ExceptionCause::LoadAddressMisaligned => 4,
            ExceptionCause::LoadAccessFault => 5,
            ExceptionCause::StoreAddressMisaligned => 6,
            ExceptionCause::StoreAccessFault => 7,
            ExceptionCause::EcallFromM => 11,
        }
    }
}

/// Keeps the higher-priority (per spec.md §4.6) of two candidate exceptions for the same
/// instruction. In practice at most one pipeline stage ever attaches an exception to a given
/// instruction (an illegal instruction never reaches Memory to also fault there), but later
/// stages use this rather than unconditionally overwriting, so the carried-forward exception from
/// an earlier stage is never silently dropped.
pub fn keep_higher_priority(current: Option<ExceptionCause>, candidate: ExceptionCause) -> ExceptionCause {
    match current {
        Some(existing) if existing.priority() <= candidate.priority() => existing,
        _ => candidate,
    }
}

/// The interrupt bit of `mcause` (privileged spec: MSB set for interrupts, clear for exceptions).
const INTERRUPT_BIT: u32 = 1 << 31;

/// Outcome of taking a trap: the caller must flush the pipeline and redirect Fetch here.
pub struct TrapEntry {
    pub redirect_pc: u32,
}

/// Takes a trap for the instruction retiring this cycle (spec.md §4.6's seven synchronous
/// sources), if it carries one. Synchronous exceptions always take priority over interrupts for
/// the same retiring slot, since the instruction that caused them must never appear to have
/// retired (spec.md §4.4: "retires ... with no exception").
pub fn resolve_exception<A: Allocator>(
    csr: &CsrFile<A>,
    allocator: &mut A,
    retiring: &MemWb,
    tval: u32,
) -> Option<TrapEntry> {
    let cause = retiring.exception?;
    csr.trap_entry(allocator, cause.code(), retiring.pc, tval);
    Some(TrapEntry {
        redirect_pc: csr.mtvec(allocator),
    })
}

/// Injects a pending interrupt at the current instruction boundary, i.e. when nothing is
/// retiring this cycle that would itself need to take a (higher-priority) synchronous trap.
/// `resume_pc` is the address of the next instruction that would otherwise have executed: the
/// pipelined equivalent of spec.md §4.6's "interrupts: PC of next instruction to execute", taken
/// from the oldest valid instruction still in the pipeline, or the architectural PC if the
/// pipeline is empty (e.g. just flushed).
pub fn resolve_interrupt<A: Allocator>(
    csr: &CsrFile<A>,
    allocator: &mut A,
    msip: bool,
    mtip: bool,
    resume_pc: u32,
) -> Option<TrapEntry> {
    let cause = csr.pending_interrupt_cause(allocator, msip, mtip)?;
    csr.trap_entry(allocator, cause | INTERRUPT_BIT, resume_pc, 0);
    Some(TrapEntry {
        redirect_pc: csr.mtvec(allocator),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earlier_pipeline_stage_exception_is_not_displaced_by_lower_priority_candidate() {
        let kept = keep_higher_priority(Some(ExceptionCause::IllegalInstruction), ExceptionCause::EcallFromM);
        assert_eq!(kept, ExceptionCause::IllegalInstruction);
    }

    #[test]
    fn higher_priority_candidate_does_replace_a_lower_priority_one() {
        let kept = keep_higher_priority(Some(ExceptionCause::EcallFromM), ExceptionCause::InstructionAddressMisaligned);
        assert_eq!(kept, ExceptionCause::InstructionAddressMisaligned);
    }

    #[test]
    fn exception_codes_match_privileged_spec_table() {
        assert_eq!(ExceptionCause::InstructionAddressMisaligned.code(), 0);
        assert_eq!(ExceptionCause::IllegalInstruction.code(), 2);
        assert_eq!(ExceptionCause::Breakpoint.code(), 3);
        assert_eq!(ExceptionCause::LoadAddressMisaligned.code(), 4);
        assert_eq!(ExceptionCause::StoreAccessFault.code(), 7);
        assert_eq!(ExceptionCause::EcallFromM.code(), 11);
    }
}
