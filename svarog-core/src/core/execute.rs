//! Execute and Memory stage combinational logic (part of C13's scheduler).
//!
//! Adapted from the teacher's per-instruction `execute.rs` (same per-opcode dispatch, the same
//! ALU-op/address/CSR computations) but restructured as two pure-ish functions over the pipeline
//! latches instead of a method per mnemonic on an `Executor` tied to `&Core`/`&mut A` — Execute
//! and Memory are each one combinational step per cycle here, not an eagerly side-effecting call
//! per instruction, so they return plain result records for `Core::cycle` to latch and commit.

use space_time::allocator::Allocator;

use super::alu::{self, AluOp};
use super::csr_file::CsrFile;
use super::muldiv::MulDiv;
use super::pipeline::{ExMem, IdEx, MemWidth};
use super::trap::ExceptionCause;
use crate::instruction::{CsrOp, Instruction, LoadWidth, RegRegOp, StoreWidth};
use crate::interconnect::{AccessFault, Interconnect, Master};
use crate::Alignment;

/// What Execute produced for the instruction currently in `id_ex`, ready to latch into `ExMem`.
#[derive(Debug, Clone)]
pub struct ExecuteOutput {
    pub result: u32,
    pub is_load: bool,
    pub is_store: bool,
    pub load_signed: bool,
    pub mem_addr: u32,
    pub mem_store_data: u32,
    pub mem_width: MemWidth,
    pub is_csr_op: bool,
    pub csr_write: Option<(u16, u32)>,
    pub is_control_transfer: bool,
    /// The address this instruction resolved to, if it is a taken control-transfer (branch
    /// found taken, or JAL/JALR/MRET, which are always "taken"). `Core::cycle` compares this
    /// against `id_ex.predicted_*` to decide whether Fetch mispredicted.
    pub resolved_target: Option<u32>,
    /// `true` for MRET. The actual `mstatus.MIE`/`MPIE` swap is deferred to the Memory stage
    /// (see [`ExMem::is_mret`](super::pipeline::ExMem::is_mret)'s doc comment) rather than
    /// performed here, so a trap taken by an older, still-retiring instruction this same cycle
    /// can still squash it before its side effect commits.
    pub is_mret: bool,
    pub exception: Option<ExceptionCause>,
    /// `mtval` to report if `exception` is taken: the misaligned target for a control-transfer,
    /// the raw instruction word for an illegal instruction, or 0 for everything else (Ecall,
    /// Ebreak, and anything carried over from an earlier stage's exception).
    pub tval: u32,
    /// `true` while a just-issued or still in-flight multiply/divide holds this instruction in
    /// Execute; the caller stalls Decode/Fetch and re-presents the same `id_ex` next cycle while
    /// this holds.
    pub busy: bool,
}

/// Runs the instruction currently latched in `id_ex` through Execute. `rs1_val`/`rs2_val` must
/// already have forwarding applied (see [`super::hazard::forward_operand`]).
#[allow(clippy::too_many_arguments)]
pub fn execute<A: Allocator>(
    id_ex: &IdEx,
    rs1_val: u32,
    rs2_val: u32,
    csr: &CsrFile<A>,
    allocator: &mut A,
    muldiv: &mut MulDiv,
    msip: bool,
    mtip: bool,
) -> ExecuteOutput {
    let pc = id_ex.pc;
    let pc_plus4 = pc.wrapping_add(4);

    let mut out = ExecuteOutput {
        result: 0,
        is_load: false,
        is_store: false,
        load_signed: false,
        mem_addr: 0,
        mem_store_data: 0,
        mem_width: MemWidth::Word,
        is_csr_op: false,
        csr_write: None,
        is_control_transfer: false,
        resolved_target: None,
        is_mret: false,
        exception: id_ex.exception,
        tval: id_ex.tval,
        busy: false,
    };
    if out.exception.is_some() {
        return out;
    }

    let Some(instruction) = id_ex.instruction else {
        // A bubble: nothing further to compute.
        return out;
    };

    match instruction {
        Instruction::OpImm { op, immediate, .. } => {
            out.result = alu::alu(AluOp::from(op), rs1_val, immediate as u32);
        }
        Instruction::OpShiftImm { op, shift_amount_u5, .. } => {
            out.result = alu::alu(AluOp::from(op), rs1_val, shift_amount_u5);
        }
        Instruction::Auipc { immediate, .. } => {
            out.result = alu::auipc(pc, immediate);
        }
        Instruction::Lui { immediate, .. } => {
            out.result = alu::lui(immediate);
        }
        Instruction::Op { op, .. } => match AluOp::try_from(op) {
            Ok(alu_op) => out.result = alu::alu(alu_op, rs1_val, rs2_val),
            Err(()) => return execute_muldiv(out, op, rs1_val, rs2_val, muldiv, id_ex.muldiv_issued),
        },
        Instruction::Jal { .. } => {
            out.is_control_transfer = true;
            out.result = pc_plus4;
            let target = jump_target(pc, instruction, rs1_val);
            if !Alignment::WORD.is_aligned(target) {
                out.exception = Some(ExceptionCause::InstructionAddressMisaligned);
                out.tval = target;
            }
            out.resolved_target = Some(target);
        }
        Instruction::Jalr { .. } => {
            out.is_control_transfer = true;
            out.result = pc_plus4;
            let target = jump_target(pc, instruction, rs1_val);
            if !Alignment::WORD.is_aligned(target) {
                out.exception = Some(ExceptionCause::InstructionAddressMisaligned);
                out.tval = target;
            }
            out.resolved_target = Some(target);
        }
        Instruction::Branch { condition, offset, .. } => {
            out.is_control_transfer = true;
            if condition.taken(rs1_val, rs2_val) {
                let target = pc.wrapping_add_signed(offset);
                if !Alignment::WORD.is_aligned(target) {
                    out.exception = Some(ExceptionCause::InstructionAddressMisaligned);
                    out.tval = target;
                }
                out.resolved_target = Some(target);
            } else {
                out.resolved_target = Some(pc_plus4);
            }
        }
        Instruction::Load { width, offset, .. } => {
            out.is_load = true;
            out.mem_addr = alu::effective_address(rs1_val, offset);
            let (mem_width, signed) = match width {
                LoadWidth::Lb => (MemWidth::Byte, true),
                LoadWidth::Lbu => (MemWidth::Byte, false),
                LoadWidth::Lh => (MemWidth::Halfword, true),
                LoadWidth::Lhu => (MemWidth::Halfword, false),
                LoadWidth::Lw => (MemWidth::Word, true),
            };
            out.mem_width = mem_width;
            out.load_signed = signed;
        }
        Instruction::Store { width, offset, .. } => {
            out.is_store = true;
            out.mem_addr = alu::effective_address(rs1_val, offset);
            out.mem_store_data = rs2_val;
            out.mem_width = match width {
                StoreWidth::Sb => MemWidth::Byte,
                StoreWidth::Sh => MemWidth::Halfword,
                StoreWidth::Sw => MemWidth::Word,
            };
        }
        Instruction::Fence { .. } => {}
        Instruction::FenceI => {
            // FENCE.I only needs to guarantee Fetch re-reads memory for addresses a preceding
            // Store may have modified; flushing IF/ID (spec.md §4.4) is sufficient since this
            // core has no instruction cache to invalidate.
            out.is_control_transfer = true;
            out.resolved_target = Some(pc_plus4);
        }
        Instruction::Ecall => {
            out.exception = Some(ExceptionCause::EcallFromM);
        }
        Instruction::Ebreak => {
            out.exception = Some(ExceptionCause::Breakpoint);
        }
        Instruction::Mret => {
            out.is_control_transfer = true;
            out.is_mret = true;
            // Non-mutating: reads mepc without yet swapping MIE/MPIE, so a squash of this
            // instruction (by an older trap retiring the same cycle) leaves CSR state untouched.
            out.resolved_target = csr.read(allocator, super::csr_file::addr::MEPC, msip, mtip).ok();
        }
        Instruction::Csr { op, csr: addr, src, .. } => {
            out.is_csr_op = true;
            execute_csr(&mut out, csr, allocator, op, addr, rs1_val, src, msip, mtip, id_ex.instruction_word);
        }
        Instruction::Csri { op, csr: addr, immediate, .. } => {
            out.is_csr_op = true;
            execute_csr(&mut out, csr, allocator, op, addr, immediate, None, msip, mtip, id_ex.instruction_word);
        }
    }

    out
}

fn jump_target(pc: u32, instruction: Instruction, rs1_val: u32) -> u32 {
    match instruction {
        Instruction::Jal { offset, .. } => pc.wrapping_add_signed(offset),
        Instruction::Jalr { offset, .. } => alu::effective_address(rs1_val, offset) & !0b1,
        _ => unreachable!("jump_target only called for Jal/Jalr"),
    }
}

fn execute_muldiv(
    mut out: ExecuteOutput,
    op: RegRegOp,
    lhs: u32,
    rhs: u32,
    muldiv: &mut MulDiv,
    already_issued: bool,
) -> ExecuteOutput {
    if !already_issued {
        muldiv.issue(op, lhs, rhs);
        out.busy = true;
        return out;
    }
    match muldiv.tick() {
        Some(result) => out.result = result,
        None => out.busy = true,
    }
    out
}

/// `csr` being `None` means the immediate form: the written-back side effects still run, but the
/// "old value combined with rs1" read-modify-write never reads `rs1` (there is none).
#[allow(clippy::too_many_arguments)]
fn execute_csr<A: Allocator>(
    out: &mut ExecuteOutput,
    csr: &CsrFile<A>,
    allocator: &mut A,
    op: CsrOp,
    addr: u16,
    operand: u32,
    src_specifier: Option<crate::registers::Specifier>,
    msip: bool,
    mtip: bool,
    instruction_word: u32,
) {
    let old = match csr.read(allocator, addr, msip, mtip) {
        Ok(value) => value,
        Err(_) => {
            out.exception = Some(ExceptionCause::IllegalInstruction);
            out.tval = instruction_word;
            return;
        }
    };
    out.result = old;

    // CSRRS/CSRRC with rs1 = x0 (or a zero immediate) only read; CSRRW always writes.
    let suppress_write = match op {
        CsrOp::ReadWrite => false,
        CsrOp::ReadSet | CsrOp::ReadClear => {
            src_specifier.is_some_and(|s| s == crate::registers::Specifier::X0) || (src_specifier.is_none() && operand == 0)
        }
    };
    if suppress_write {
        return;
    }
    let new_value = match op {
        CsrOp::ReadWrite => operand,
        CsrOp::ReadSet => old | operand,
        CsrOp::ReadClear => old & !operand,
    };
    if !CsrFile::<A>::is_valid(addr) {
        out.exception = Some(ExceptionCause::IllegalInstruction);
        out.tval = instruction_word;
        return;
    }
    out.csr_write = Some((addr, new_value));
}

/// Outcome of the Memory stage's bus access for the instruction currently in `ex_mem`.
#[derive(Debug, Clone, Copy)]
pub struct MemoryOutput {
    pub result: u32,
    pub exception: Option<ExceptionCause>,
    pub tval: u32,
}

/// Performs the Load/Store bus access for `ex_mem`, if any, folding the loaded (sign-extended, if
/// applicable) value into `result`; non-memory instructions pass `ex_mem.result` through
/// unchanged.
pub fn access_memory<A: Allocator>(ex_mem: &ExMem, interconnect: &Interconnect<A>, allocator: &mut A) -> MemoryOutput {
    if ex_mem.exception.is_some() || (!ex_mem.is_load && !ex_mem.is_store) {
        return MemoryOutput {
            result: ex_mem.result,
            exception: ex_mem.exception,
            tval: ex_mem.tval,
        };
    }

    let size = ex_mem.mem_width.size();
    let alignment = Alignment::natural_for_size(size).expect("mem_width is always a power of two");
    if !alignment.is_aligned(ex_mem.mem_addr) {
        let cause = if ex_mem.is_load {
            ExceptionCause::LoadAddressMisaligned
        } else {
            ExceptionCause::StoreAddressMisaligned
        };
        return MemoryOutput {
            result: 0,
            exception: Some(cause),
            tval: ex_mem.mem_addr,
        };
    }

    if ex_mem.is_load {
        let mut buf = [0u8; 4];
        let buf = &mut buf[..size as usize];
        match interconnect.read(buf, allocator, ex_mem.mem_addr, Master::Memory) {
            Ok(()) => MemoryOutput {
                result: widen(buf, ex_mem.load_signed),
                exception: None,
                tval: 0,
            },
            Err(AccessFault) => MemoryOutput {
                result: 0,
                exception: Some(ExceptionCause::LoadAccessFault),
                tval: ex_mem.mem_addr,
            },
        }
    } else {
        let bytes = ex_mem.mem_store_data.to_le_bytes();
        match interconnect.write(allocator, ex_mem.mem_addr, &bytes[..size as usize], Master::Memory) {
            Ok(()) => MemoryOutput {
                result: ex_mem.result,
                exception: None,
                tval: 0,
            },
            Err(AccessFault) => MemoryOutput {
                result: 0,
                exception: Some(ExceptionCause::StoreAccessFault),
                tval: ex_mem.mem_addr,
            },
        }
    }
}

fn widen(buf: &[u8], signed: bool) -> u32 {
    match buf.len() {
        1 => {
            let byte = buf[0];
            if signed {
                byte as i8 as i32 as u32
            } else {
                byte as u32
            }
        }
        2 => {
            let half = u16::from_le_bytes([buf[0], buf[1]]);
            if signed {
                half as i16 as i32 as u32
            } else {
                half as u32
            }
        }
        4 => u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
        _ => unreachable!("mem_width is always byte, halfword or word"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use space_time::SpaceTime;

    #[test]
    fn widen_sign_extends_byte() {
        assert_eq!(widen(&[0xFF], true), 0xFFFF_FFFF);
        assert_eq!(widen(&[0xFF], false), 0x0000_00FF);
    }

    #[test]
    fn widen_sign_extends_halfword() {
        assert_eq!(widen(&[0x00, 0x80], true), 0xFFFF_8000);
        assert_eq!(widen(&[0x00, 0x80], false), 0x0000_8000);
    }

    #[test]
    fn csrrs_with_x0_source_suppresses_write() {
        let mut allocator = SpaceTime::new();
        let csr = CsrFile::new(&mut allocator, 0);
        let mut out = ExecuteOutput {
            result: 0,
            is_load: false,
            is_store: false,
            load_signed: false,
            mem_addr: 0,
            mem_store_data: 0,
            mem_width: MemWidth::Word,
            is_csr_op: false,
            csr_write: None,
            is_control_transfer: false,
            resolved_target: None,
            is_mret: false,
            exception: None,
            tval: 0,
            busy: false,
        };
        execute_csr(
            &mut out,
            &csr,
            &mut allocator,
            CsrOp::ReadSet,
            super::super::csr_file::addr::MSCRATCH,
            0xFF,
            Some(crate::registers::Specifier::X0),
            false,
            false,
            0,
        );
        assert_eq!(out.csr_write, None);
    }
}
