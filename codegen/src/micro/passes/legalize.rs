//! Legalization.
//!
//! Rewrites operand forms the encoder cannot emit directly, as reported by
//! the encoder's conformance query: wide immediates are loaded through a
//! scratch register, divides by an immediate take the register form, and
//! unsigned divides and modulos by a power of two become shifts and masks
//! right here since the hardware has no immediate divide at all.
//!
//! After this pass every instruction matches one encoder entry point.

use super::{MicroPass, PassCtx};
use crate::entities::InstRef;
use crate::isa::ConformanceIssue;
use crate::micro::{AluOp, EmitFlags, MicroInst, MicroOpcode, MicroOperand, MicroReg, OpBits};
use crate::storage::{InstStore, OperandStore};

fn is_power_of_two(value: u64) -> bool {
    value != 0 && value & (value - 1) == 0
}

fn integer_log2(value: u64) -> u64 {
    u64::from(63 - value.leading_zeros())
}

/// Insert `mov scratch, imm64` before `at` and return the scratch used.
fn load_imm_before(
    insts: &mut InstStore,
    operands: &mut OperandStore,
    at: InstRef,
    scratch: MicroReg,
    value: u64,
) {
    let ops = operands.alloc(&[
        MicroOperand::Reg(scratch),
        MicroOperand::Bits(OpBits::B64),
        MicroOperand::U64(value),
    ]);
    insts.insert_before(
        at,
        MicroInst {
            op: MicroOpcode::LoadRegImm,
            flags: EmitFlags::ZERO,
            num_ops: 3,
            ops,
        },
    );
}

pub struct LegalizePass;

impl MicroPass for LegalizePass {
    fn name(&self) -> &'static str {
        "legalize"
    }

    fn run(&mut self, ctx: &mut PassCtx) -> bool {
        let mut changed = false;
        let conv = ctx.call_conv.get();
        let (scratch_a, scratch_b) = conv
            .try_pick_int_scratch_regs()
            .expect("supported conventions always have scratch registers");

        let mut cursor = ctx.insts.first();
        while let Some(inst_ref) = cursor {
            cursor = ctx.insts.next(inst_ref);
            let inst = *ctx.insts.at(inst_ref);

            // Unsigned divide/modulo by a power of two has a cheap legal
            // form; rewrite before consulting the encoder.
            if inst.op == MicroOpcode::OpBinaryRegImm {
                let (op, value) = {
                    let ops = ctx.operands.ops(&inst);
                    (ops[2].alu_op(), ops[3].u64())
                };
                let bits = ctx.operands.ops(&inst)[1].bits();
                if is_power_of_two(value) && integer_log2(value) < u64::from(bits.num_bits()) {
                    let replacement = match op {
                        AluOp::DivideUnsigned => Some((AluOp::ShiftRight, integer_log2(value))),
                        AluOp::ModuloUnsigned => Some((AluOp::And, value - 1)),
                        _ => None,
                    };
                    if let Some((new_op, new_value)) = replacement {
                        let ops = ctx.operands.ops_mut(&inst);
                        ops[2] = MicroOperand::Op(new_op);
                        ops[3] = MicroOperand::U64(new_value);
                        changed = true;
                        continue;
                    }
                }
            }

            let issue = ctx
                .encoder
                .query_conformance_issue(&inst, ctx.operands.ops(&inst));
            let Some(issue) = issue else {
                continue;
            };

            match issue {
                ConformanceIssue::ImmediateTooWide | ConformanceIssue::NoImmediateForm => {
                    match inst.op {
                        MicroOpcode::OpBinaryRegImm => {
                            // [reg, bits, op, imm] becomes
                            // mov scratch, imm; op reg, scratch.
                            let (reg, bits, op, value) = {
                                let ops = ctx.operands.ops(&inst);
                                (ops[0].reg(), ops[1].bits(), ops[2].alu_op(), ops[3].u64())
                            };
                            let scratch = if reg == scratch_a { scratch_b } else { scratch_a };
                            load_imm_before(ctx.insts, ctx.operands, inst_ref, scratch, value);
                            let rewritten = MicroInst {
                                op: MicroOpcode::OpBinaryRegReg,
                                ..inst
                            };
                            *ctx.insts.at_mut(inst_ref) = rewritten;
                            let ops = ctx.operands.ops_mut(&rewritten);
                            ops[0] = MicroOperand::Reg(reg);
                            ops[1] = MicroOperand::Reg(scratch);
                            ops[2] = MicroOperand::Bits(bits);
                            ops[3] = MicroOperand::Op(op);
                        }
                        MicroOpcode::CmpRegImm => {
                            let (reg, bits, value) = {
                                let ops = ctx.operands.ops(&inst);
                                (ops[0].reg(), ops[1].bits(), ops[2].u64())
                            };
                            let scratch = if reg == scratch_a { scratch_b } else { scratch_a };
                            load_imm_before(ctx.insts, ctx.operands, inst_ref, scratch, value);
                            let rewritten = MicroInst {
                                op: MicroOpcode::CmpRegReg,
                                ..inst
                            };
                            *ctx.insts.at_mut(inst_ref) = rewritten;
                            let ops = ctx.operands.ops_mut(&rewritten);
                            ops[0] = MicroOperand::Reg(reg);
                            ops[1] = MicroOperand::Reg(scratch);
                            ops[2] = MicroOperand::Bits(bits);
                        }
                        MicroOpcode::CmpMemImm => {
                            let (mem, bits, offset, value) = {
                                let ops = ctx.operands.ops(&inst);
                                (ops[0].reg(), ops[1].bits(), ops[2].u64(), ops[3].u64())
                            };
                            let scratch = if mem == scratch_a { scratch_b } else { scratch_a };
                            load_imm_before(ctx.insts, ctx.operands, inst_ref, scratch, value);
                            let rewritten = MicroInst {
                                op: MicroOpcode::CmpMemReg,
                                ..inst
                            };
                            *ctx.insts.at_mut(inst_ref) = rewritten;
                            let ops = ctx.operands.ops_mut(&rewritten);
                            ops[0] = MicroOperand::Reg(mem);
                            ops[1] = MicroOperand::Reg(scratch);
                            ops[2] = MicroOperand::Bits(bits);
                            ops[3] = MicroOperand::U64(offset);
                        }
                        MicroOpcode::LoadMemImm => {
                            let (mem, bits, offset, value) = {
                                let ops = ctx.operands.ops(&inst);
                                (ops[0].reg(), ops[1].bits(), ops[2].u64(), ops[3].u64())
                            };
                            let scratch = if mem == scratch_a { scratch_b } else { scratch_a };
                            load_imm_before(ctx.insts, ctx.operands, inst_ref, scratch, value);
                            let rewritten = MicroInst {
                                op: MicroOpcode::LoadMemReg,
                                ..inst
                            };
                            *ctx.insts.at_mut(inst_ref) = rewritten;
                            let ops = ctx.operands.ops_mut(&rewritten);
                            ops[0] = MicroOperand::Reg(mem);
                            ops[1] = MicroOperand::Reg(scratch);
                            ops[2] = MicroOperand::Bits(bits);
                            ops[3] = MicroOperand::U64(offset);
                        }
                        MicroOpcode::OpBinaryMemImm => {
                            let (mem, bits, op, offset, value) = {
                                let ops = ctx.operands.ops(&inst);
                                (
                                    ops[0].reg(),
                                    ops[1].bits(),
                                    ops[2].alu_op(),
                                    ops[3].u64(),
                                    ops[4].u64(),
                                )
                            };
                            let scratch = if mem == scratch_a { scratch_b } else { scratch_a };
                            load_imm_before(ctx.insts, ctx.operands, inst_ref, scratch, value);
                            let rewritten = MicroInst {
                                op: MicroOpcode::OpBinaryMemReg,
                                ..inst
                            };
                            *ctx.insts.at_mut(inst_ref) = rewritten;
                            let ops = ctx.operands.ops_mut(&rewritten);
                            ops[0] = MicroOperand::Reg(mem);
                            ops[1] = MicroOperand::Reg(scratch);
                            ops[2] = MicroOperand::Bits(bits);
                            ops[3] = MicroOperand::Op(op);
                            ops[4] = MicroOperand::U64(offset);
                        }
                        other => panic!("conformance issue {issue:?} on unexpected opcode {other:?}"),
                    }
                    changed = true;
                }
                ConformanceIssue::UnsignedConvertTooWide => {
                    panic!(
                        "unsigned 64-bit to float conversion must be lowered to a runtime \
                         call by the front end"
                    );
                }
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::LegalizePass;
    use crate::micro::builder::MicroBuilder;
    use crate::micro::passes::run_one;
    use crate::micro::{AluOp, EmitFlags, MicroOpcode, OpBits, RegClass};

    #[test]
    fn wide_add_immediate_goes_through_scratch() {
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        let add = b.encode_op_binary_reg_imm(
            r0,
            0x1_0000_0000,
            AluOp::Add,
            OpBits::B64,
            EmitFlags::ZERO,
        );
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, LegalizePass);
        let inst = *b.insts().at(add);
        assert_eq!(inst.op, MicroOpcode::OpBinaryRegReg);
        // A scratch load was inserted ahead of the op.
        assert_eq!(b.insts().len(), 3);
        let first = b.insts().first().unwrap();
        assert_eq!(b.insts().at(first).op, MicroOpcode::LoadRegImm);
    }

    #[test]
    fn narrow_immediates_stay_immediate() {
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        let add = b.encode_op_binary_reg_imm(r0, 100, AluOp::Add, OpBits::B64, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, LegalizePass);
        assert_eq!(b.insts().at(add).op, MicroOpcode::OpBinaryRegImm);
        assert_eq!(b.insts().len(), 2);
    }

    #[test]
    fn divide_by_immediate_takes_register_form() {
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        let div =
            b.encode_op_binary_reg_imm(r0, 10, AluOp::DivideUnsigned, OpBits::B32, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, LegalizePass);
        assert_eq!(b.insts().at(div).op, MicroOpcode::OpBinaryRegReg);
    }

    #[test]
    fn unsigned_divide_by_power_of_two_becomes_shift() {
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        let div =
            b.encode_op_binary_reg_imm(r0, 8, AluOp::DivideUnsigned, OpBits::B32, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, LegalizePass);
        let inst = *b.insts().at(div);
        assert_eq!(inst.op, MicroOpcode::OpBinaryRegImm);
        let ops = b.operands().ops(&inst);
        assert_eq!(ops[2].alu_op(), AluOp::ShiftRight);
        assert_eq!(ops[3].u64(), 3);
    }

    #[test]
    fn wide_compare_immediate_goes_through_scratch() {
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        let cmp = b.encode_cmp_reg_imm(r0, 0x1_2345_6789, OpBits::B64, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, LegalizePass);
        assert_eq!(b.insts().at(cmp).op, MicroOpcode::CmpRegReg);
    }

    #[test]
    fn wide_store_immediate_goes_through_scratch() {
        let mut b = MicroBuilder::new();
        let addr = b.new_vreg(RegClass::Int);
        let store =
            b.encode_load_mem_imm(addr, 0, 0xdead_beef_0000, OpBits::B64, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, LegalizePass);
        assert_eq!(b.insts().at(store).op, MicroOpcode::LoadMemReg);
    }
}
