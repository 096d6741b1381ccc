//! Pipelined multiplier and iterative divider (C2).
//!
//! Both units are modeled as small latency-counting state machines rather than combinational
//! logic: [`MulDiv::issue`] latches the operands and a cycle count, [`MulDiv::tick`] counts down
//! once per [`super::Core::cycle`] call and produces the result on the cycle it reaches zero.
//! [`MulDiv::is_busy`] is the signal the hazard unit (C9) stalls Decode on.

use crate::instruction::RegRegOp;

/// Default multiplier latency (in cycles), per spec.md §4.2.
pub const DEFAULT_MUL_LATENCY: u32 = 3;

/// Default divider latency (in cycles), per spec.md §4.2.
pub const DEFAULT_DIV_LATENCY: u32 = 32;

#[derive(Debug, Clone, Copy)]
struct InFlight {
    op: RegRegOp,
    lhs: u32,
    rhs: u32,
    cycles_left: u32,
}

/// Multiplier/divider functional unit. At most one multiply and one divide can be in flight at
/// once (the two units are independent pipelines), but the decoder only ever issues one
/// register-register M-extension op per cycle, so in practice only one of the two is ever
/// occupied at a time.
#[derive(Debug, Clone)]
pub struct MulDiv {
    mul_latency: u32,
    div_latency: u32,
    mul: Option<InFlight>,
    div: Option<InFlight>,
}

impl MulDiv {
    /// Constructs a new, idle unit. `mul_latency` and `div_latency` must both be at least `1`;
    /// this is a configuration invariant checked at `Core` construction time, not here.
    pub fn new(mul_latency: u32, div_latency: u32) -> Self {
        Self {
            mul_latency,
            div_latency,
            mul: None,
            div: None,
        }
    }

    /// `true` iff a multiply or a divide is currently in flight. The hazard unit stalls Decode
    /// while this holds (spec.md §4.4, "Multi-cycle busy").
    pub fn is_busy(&self) -> bool {
        self.mul.is_some() || self.div.is_some()
    }

    /// Latches a new multiply or divide. Panics if the relevant unit is already busy; the hazard
    /// unit is responsible for never issuing while [`Self::is_busy`] holds.
    pub fn issue(&mut self, op: RegRegOp, lhs: u32, rhs: u32) {
        let slot = InFlight {
            op,
            lhs,
            rhs,
            cycles_left: if op.is_div() {
                self.div_latency
            } else {
                self.mul_latency
            },
        };
        if op.is_div() {
            assert!(self.div.is_none(), "divider issued a second op while busy");
            self.div = Some(slot);
        } else {
            assert!(
                self.mul.is_none(),
                "multiplier issued a second op while busy"
            );
            self.mul = Some(slot);
        }
    }

    /// Advances both units by one cycle. Returns the result of whichever unit completes this
    /// cycle (at most one can complete on any given cycle, since only one is ever issued at a
    /// time in this single-issue core).
    pub fn tick(&mut self) -> Option<u32> {
        if let Some(result) = Self::tick_unit(&mut self.mul) {
            return Some(result);
        }
        Self::tick_unit(&mut self.div)
    }

    fn tick_unit(slot: &mut Option<InFlight>) -> Option<u32> {
        let in_flight = slot.as_mut()?;
        in_flight.cycles_left -= 1;
        if in_flight.cycles_left > 0 {
            return None;
        }
        let InFlight { op, lhs, rhs, .. } = slot.take().unwrap();
        Some(compute(op, lhs, rhs))
    }
}

/// Pure computation for the eight M-extension ops, including the required RV32M zero-divisor and
/// signed-overflow edge cases (spec.md §4.2, §8 R4).
fn compute(op: RegRegOp, lhs: u32, rhs: u32) -> u32 {
    match op {
        RegRegOp::Mul => lhs.wrapping_mul(rhs),
        RegRegOp::Mulh => ((lhs as i32 as i64 * rhs as i32 as i64) >> 32) as u32,
        RegRegOp::Mulhsu => ((lhs as i32 as i64 * rhs as i64) >> 32) as u32,
        RegRegOp::Mulhu => (((lhs as u64) * (rhs as u64)) >> 32) as u32,
        // Signed division overflow (INT_MIN / -1) is handled by `overflowing_div`/`overflowing_rem`
        // wrapping back to INT_MIN / 0 exactly as the ISA requires, with no special case needed.
        RegRegOp::Div => match rhs {
            0 => 0xFFFF_FFFF,
            _ => (lhs as i32).overflowing_div(rhs as i32).0 as u32,
        },
        RegRegOp::Divu => lhs.checked_div(rhs).unwrap_or(0xFFFF_FFFF),
        RegRegOp::Rem => match rhs {
            0 => lhs,
            _ => (lhs as i32).overflowing_rem(rhs as i32).0 as u32,
        },
        RegRegOp::Remu => lhs.checked_rem(rhs).unwrap_or(lhs),
        _ => unreachable!("compute() only called for M-extension ops"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_completes_after_configured_latency() {
        let mut unit = MulDiv::new(3, 32);
        unit.issue(RegRegOp::Mul, 6, 7);
        assert!(unit.is_busy());
        assert_eq!(unit.tick(), None);
        assert_eq!(unit.tick(), None);
        assert_eq!(unit.tick(), Some(42));
        assert!(!unit.is_busy());
    }

    #[test]
    fn divu_by_zero_is_all_ones_remu_is_dividend() {
        assert_eq!(compute(RegRegOp::Divu, 5, 0), 0xFFFF_FFFF);
        assert_eq!(compute(RegRegOp::Remu, 5, 0), 5);
    }

    #[test]
    fn div_by_zero_is_all_ones_rem_is_dividend() {
        assert_eq!(compute(RegRegOp::Div, 5, 0), 0xFFFF_FFFF);
        assert_eq!(compute(RegRegOp::Rem, 5, 0), 5);
    }

    #[test]
    fn signed_overflow_div_int_min_by_minus_one() {
        assert_eq!(compute(RegRegOp::Div, i32::MIN as u32, (-1i32) as u32), i32::MIN as u32);
        assert_eq!(compute(RegRegOp::Rem, i32::MIN as u32, (-1i32) as u32), 0);
    }

    #[test]
    fn mul_low_bits_match_wrapping_multiplication() {
        assert_eq!(compute(RegRegOp::Mul, 0xFFFF_FFFF, 2), (0xFFFF_FFFFu32).wrapping_mul(2));
    }

    #[test]
    fn div_latency_defaults_match_spec() {
        assert_eq!(DEFAULT_MUL_LATENCY, 3);
        assert_eq!(DEFAULT_DIV_LATENCY, 32);
    }
}
