//! Instruction combining.
//!
//! Merges two consecutive immediate operations on the same destination and
//! width into one. Example: `add r1, 2; add r1, 3` becomes `add r1, 5`;
//! two same-direction shifts collapse with the amount saturated at the
//! width.

use super::{MicroPass, PassCtx};
use crate::micro::{AluOp, MicroOpcode, MicroOperand, OpBits};

fn normalize(value: u64, bits: OpBits) -> u64 {
    value & bits.mask()
}

fn combine_arithmetic(
    first_op: AluOp,
    first: u64,
    second_op: AluOp,
    second: u64,
    bits: OpBits,
) -> Option<(AluOp, u64)> {
    let is_arith = |op| matches!(op, AluOp::Add | AluOp::Subtract);
    if !is_arith(first_op) || !is_arith(second_op) {
        return None;
    }
    let signed = |op: AluOp, v: u64| if op == AluOp::Add { v as i64 } else { (v as i64).wrapping_neg() };
    let combined = signed(first_op, first).wrapping_add(signed(second_op, second)) as u64;
    Some((AluOp::Add, normalize(combined, bits)))
}

fn combine_bitwise(
    first_op: AluOp,
    first: u64,
    second_op: AluOp,
    second: u64,
    bits: OpBits,
) -> Option<(AluOp, u64)> {
    if first_op != second_op {
        return None;
    }
    let value = match first_op {
        AluOp::And => first & second,
        AluOp::Or => first | second,
        AluOp::Xor => first ^ second,
        _ => return None,
    };
    Some((first_op, normalize(value, bits)))
}

fn combine_shift(
    first_op: AluOp,
    first: u64,
    second_op: AluOp,
    second: u64,
    bits: OpBits,
) -> Option<(AluOp, u64)> {
    if first_op != second_op {
        return None;
    }
    if !matches!(
        first_op,
        AluOp::ShiftLeft | AluOp::ShiftRight | AluOp::ShiftArithmeticRight
    ) {
        return None;
    }
    let max_shift = u64::from(bits.num_bits()) - 1;
    Some((first_op, first.saturating_add(second).min(max_shift)))
}

fn combine(
    first_op: AluOp,
    first: u64,
    second_op: AluOp,
    second: u64,
    bits: OpBits,
) -> Option<(AluOp, u64)> {
    combine_arithmetic(first_op, first, second_op, second, bits)
        .or_else(|| combine_bitwise(first_op, first, second_op, second, bits))
        .or_else(|| combine_shift(first_op, first, second_op, second, bits))
}

pub struct InstCombinePass;

impl MicroPass for InstCombinePass {
    fn name(&self) -> &'static str {
        "inst-combine"
    }

    fn run(&mut self, ctx: &mut PassCtx) -> bool {
        let mut changed = false;
        let mut cursor = ctx.insts.first();
        while let Some(first_ref) = cursor {
            let first = *ctx.insts.at(first_ref);
            if first.op != MicroOpcode::OpBinaryRegImm {
                cursor = ctx.insts.next(first_ref);
                continue;
            }
            let Some(second_ref) = ctx.insts.next(first_ref) else {
                break;
            };
            let second = *ctx.insts.at(second_ref);
            if second.op != MicroOpcode::OpBinaryRegImm {
                cursor = ctx.insts.next(first_ref);
                continue;
            }

            let (first_reg, first_bits, first_op, first_value) = {
                let ops = ctx.operands.ops(&first);
                (ops[0].reg(), ops[1].bits(), ops[2].alu_op(), ops[3].u64())
            };
            let (second_reg, second_bits, second_op, second_value) = {
                let ops = ctx.operands.ops(&second);
                (ops[0].reg(), ops[1].bits(), ops[2].alu_op(), ops[3].u64())
            };
            if first_reg != second_reg || first_bits != second_bits {
                cursor = ctx.insts.next(first_ref);
                continue;
            }

            match combine(first_op, first_value, second_op, second_value, first_bits) {
                Some((op, value)) => {
                    let ops = ctx.operands.ops_mut(&first);
                    ops[2] = MicroOperand::Op(op);
                    ops[3] = MicroOperand::U64(value);
                    ctx.insts.erase(second_ref);
                    changed = true;
                    // Stay on the combined instruction; it may merge again.
                }
                None => cursor = ctx.insts.next(first_ref),
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::InstCombinePass;
    use crate::micro::builder::MicroBuilder;
    use crate::micro::passes::run_one;
    use crate::micro::{AluOp, EmitFlags, OpBits, RegClass};

    fn op_and_value(b: &MicroBuilder, r: crate::entities::InstRef) -> (AluOp, u64) {
        let inst = *b.insts().at(r);
        let ops = b.operands().ops(&inst);
        (ops[2].alu_op(), ops[3].u64())
    }

    #[test]
    fn add_add_merges() {
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        let first = b.encode_op_binary_reg_imm(r0, 2, AluOp::Add, OpBits::B32, EmitFlags::ZERO);
        let second = b.encode_op_binary_reg_imm(r0, 3, AluOp::Add, OpBits::B32, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, InstCombinePass);
        assert!(b.insts().is_erased(second));
        assert_eq!(op_and_value(&b, first), (AluOp::Add, 5));
    }

    #[test]
    fn add_sub_wraps_signed() {
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        let first = b.encode_op_binary_reg_imm(r0, 2, AluOp::Add, OpBits::B32, EmitFlags::ZERO);
        b.encode_op_binary_reg_imm(r0, 7, AluOp::Subtract, OpBits::B32, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, InstCombinePass);
        // 2 - 7 = -5, wrapped at 32 bits.
        assert_eq!(op_and_value(&b, first), (AluOp::Add, 0xffff_fffb));
    }

    #[test]
    fn xor_xor_merges() {
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        let first = b.encode_op_binary_reg_imm(r0, 0xff, AluOp::Xor, OpBits::B32, EmitFlags::ZERO);
        b.encode_op_binary_reg_imm(r0, 0x0f, AluOp::Xor, OpBits::B32, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, InstCombinePass);
        assert_eq!(op_and_value(&b, first), (AluOp::Xor, 0xf0));
    }

    #[test]
    fn shifts_saturate_at_width() {
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        let first =
            b.encode_op_binary_reg_imm(r0, 20, AluOp::ShiftLeft, OpBits::B32, EmitFlags::ZERO);
        b.encode_op_binary_reg_imm(r0, 20, AluOp::ShiftLeft, OpBits::B32, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, InstCombinePass);
        assert_eq!(op_and_value(&b, first), (AluOp::ShiftLeft, 31));
    }

    #[test]
    fn different_destinations_do_not_merge() {
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        let r1 = b.new_vreg(RegClass::Int);
        b.encode_op_binary_reg_imm(r0, 2, AluOp::Add, OpBits::B32, EmitFlags::ZERO);
        let second = b.encode_op_binary_reg_imm(r1, 3, AluOp::Add, OpBits::B32, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, InstCombinePass);
        assert!(!b.insts().is_erased(second));
    }

    #[test]
    fn chains_collapse_to_one() {
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        let first = b.encode_op_binary_reg_imm(r0, 1, AluOp::Add, OpBits::B64, EmitFlags::ZERO);
        b.encode_op_binary_reg_imm(r0, 2, AluOp::Add, OpBits::B64, EmitFlags::ZERO);
        b.encode_op_binary_reg_imm(r0, 3, AluOp::Add, OpBits::B64, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, InstCombinePass);
        assert_eq!(op_and_value(&b, first), (AluOp::Add, 6));
        assert_eq!(b.insts().len(), 2);
    }
}
