//! Hazard detection and forwarding (C9).
//!
//! Pure functions over the pipeline latches (spec.md §4.4). `Core::cycle` combines these with the
//! multiply/divide busy signal and the (currently always-false, see `interconnect.rs`'s doc
//! comment) interconnect-not-ready signal to decide whether Decode stalls this cycle.

use crate::core::pipeline::{ExMem, IdEx, MemWb};
use crate::registers::Specifier;

/// Resolves the value Execute should use for a source register this cycle: the value latched at
/// Decode time, unless a more recent producer's result is available by forwarding.
///
/// Forwarding from `ex_mem` only applies to non-load producers: a load's value isn't ready until
/// Memory computes it combinationally this same cycle, one stage too late for Execute to use it
/// here, so a load producer is instead picked up one cycle later, already merged into `mem_wb`.
/// `ex_mem` wins over `mem_wb` when both apply, since it is the more recently produced value.
pub fn forward_operand(specifier: Option<Specifier>, latched_value: u32, ex_mem: &ExMem, mem_wb: &MemWb) -> u32 {
    let Some(rs) = specifier else {
        return latched_value;
    };
    if rs == Specifier::X0 {
        return latched_value;
    }
    if ex_mem.valid && ex_mem.reg_write && !ex_mem.is_load && ex_mem.rd == Some(rs) {
        return ex_mem.result;
    }
    if mem_wb.valid && mem_wb.reg_write && mem_wb.rd == Some(rs) {
        return mem_wb.result;
    }
    latched_value
}

/// Classic load-use hazard: the instruction currently decoding needs a register that the
/// instruction about to enter Execute (`id_ex`) is still loading from memory. One bubble cycle is
/// inserted (spec.md §8 scenario 2).
pub fn load_use_stall(decode_rs1: Option<Specifier>, decode_rs2: Option<Specifier>, id_ex: &IdEx) -> bool {
    if !id_ex.valid || !id_ex.reg_write {
        return false;
    }
    let Some(producer_rd) = id_ex.rd.filter(|rd| *rd != Specifier::X0) else {
        return false;
    };
    let is_load = matches!(id_ex.instruction, Some(crate::instruction::Instruction::Load { .. }));
    is_load && (decode_rs1 == Some(producer_rd) || decode_rs2 == Some(producer_rd))
}

/// Stalls a CSR op entering Execute while another CSR op is still in Memory or Writeback, so the
/// combinational CSR read it performs always sees the effects of every earlier CSR write
/// (spec.md §4.5's single commit point makes same-cycle CSR-to-CSR forwarding unsound, since the
/// producer in Memory hasn't committed its write yet when the consumer in Execute reads).
pub fn csr_hazard_stall(id_ex_is_csr_op: bool, ex_mem: &ExMem, mem_wb: &MemWb) -> bool {
    id_ex_is_csr_op
        && ((ex_mem.valid && ex_mem.is_csr_op) || (mem_wb.valid && mem_wb.is_csr_op))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Instruction, LoadWidth};

    fn spec(n: u8) -> Specifier {
        Specifier::from_u5(n)
    }

    #[test]
    fn forwards_from_ex_mem_over_mem_wb() {
        let ex_mem = ExMem {
            valid: true,
            reg_write: true,
            rd: Some(spec(5)),
            result: 111,
            ..Default::default()
        };
        let mem_wb = MemWb {
            valid: true,
            reg_write: true,
            rd: Some(spec(5)),
            result: 222,
            ..Default::default()
        };
        assert_eq!(forward_operand(Some(spec(5)), 0, &ex_mem, &mem_wb), 111);
    }

    #[test]
    fn does_not_forward_load_result_from_ex_mem() {
        let ex_mem = ExMem {
            valid: true,
            reg_write: true,
            is_load: true,
            rd: Some(spec(5)),
            result: 999,
            ..Default::default()
        };
        assert_eq!(forward_operand(Some(spec(5)), 42, &ex_mem, &MemWb::default()), 42);
    }

    #[test]
    fn forwards_load_result_from_mem_wb() {
        let mem_wb = MemWb {
            valid: true,
            reg_write: true,
            rd: Some(spec(5)),
            result: 77,
            ..Default::default()
        };
        assert_eq!(forward_operand(Some(spec(5)), 0, &ExMem::default(), &mem_wb), 77);
    }

    #[test]
    fn x0_is_never_forwarded() {
        let ex_mem = ExMem {
            valid: true,
            reg_write: true,
            rd: Some(Specifier::X0),
            result: 999,
            ..Default::default()
        };
        assert_eq!(forward_operand(Some(Specifier::X0), 0, &ex_mem, &MemWb::default()), 0);
    }

    #[test]
    fn load_in_ex_followed_by_dependent_use_stalls() {
        let id_ex = IdEx {
            valid: true,
            reg_write: true,
            rd: Some(spec(3)),
            instruction: Some(Instruction::Load {
                width: LoadWidth::Lw,
                dest: spec(3),
                base: spec(1),
                offset: 0,
            }),
            ..Default::default()
        };
        assert!(load_use_stall(Some(spec(3)), None, &id_ex));
        assert!(!load_use_stall(Some(spec(4)), None, &id_ex));
    }

    #[test]
    fn csr_op_stalls_while_another_is_in_mem_or_wb() {
        let ex_mem = ExMem {
            valid: true,
            is_csr_op: true,
            ..Default::default()
        };
        assert!(csr_hazard_stall(true, &ex_mem, &MemWb::default()));
        assert!(!csr_hazard_stall(false, &ex_mem, &MemWb::default()));
        assert!(!csr_hazard_stall(true, &ExMem::default(), &MemWb::default()));
    }
}
