//! Strength reduction.
//!
//! Rewrites multiplies, unsigned divides and unsigned modulos by a power
//! of two into shifts and masks.

use super::{MicroPass, PassCtx};
use crate::micro::{AluOp, MicroOpcode, MicroOperand};

fn is_power_of_two(value: u64) -> bool {
    value != 0 && value & (value - 1) == 0
}

fn integer_log2(value: u64) -> u64 {
    debug_assert!(is_power_of_two(value));
    u64::from(63 - value.leading_zeros())
}

pub struct StrengthReducePass;

impl MicroPass for StrengthReducePass {
    fn name(&self) -> &'static str {
        "strength-reduce"
    }

    fn run(&mut self, ctx: &mut PassCtx) -> bool {
        let mut changed = false;
        let mut cursor = ctx.insts.first();
        while let Some(inst_ref) = cursor {
            cursor = ctx.insts.next(inst_ref);
            let inst = *ctx.insts.at(inst_ref);
            if inst.op != MicroOpcode::OpBinaryRegImm {
                continue;
            }
            let (reg, bits, op, value) = {
                let ops = ctx.operands.ops(&inst);
                (ops[0].reg(), ops[1].bits(), ops[2].alu_op(), ops[3].u64())
            };
            if !reg.is_int() {
                continue;
            }
            // Only rewrite when the shift amount stays inside the width.
            if !is_power_of_two(value) || integer_log2(value) >= u64::from(bits.num_bits()) {
                continue;
            }
            let replacement = match op {
                AluOp::MultiplySigned | AluOp::MultiplyUnsigned => {
                    Some((AluOp::ShiftLeft, integer_log2(value)))
                }
                AluOp::DivideUnsigned => Some((AluOp::ShiftRight, integer_log2(value))),
                AluOp::ModuloUnsigned => Some((AluOp::And, value - 1)),
                _ => None,
            };
            if let Some((new_op, new_value)) = replacement {
                let ops = ctx.operands.ops_mut(&inst);
                ops[2] = MicroOperand::Op(new_op);
                ops[3] = MicroOperand::U64(new_value);
                changed = true;
            }
        }
        changed
    }
}
