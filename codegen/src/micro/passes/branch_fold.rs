//! Branch folding.
//!
//! Tracks registers with known constant values inside a basic block. When
//! a compare runs on known values, the following conditional jump is
//! evaluated: always-taken jumps become unconditional and never-taken
//! jumps are deleted. Tracking never crosses labels, calls, or compares of
//! unknown registers.

use super::{is_terminator, MicroPass, PassCtx};
use crate::micro::{collect_use_def, AluOp, Cond, MicroOpcode, OpBits};
use rustc_hash::FxHashMap;

#[derive(Clone, Copy)]
struct KnownConstant {
    value: u64,
    bits: OpBits,
}

#[derive(Clone, Copy, Default)]
struct CompareState {
    valid: bool,
    lhs: u64,
    rhs: u64,
    bits: Option<OpBits>,
}

fn normalize(value: u64, bits: OpBits) -> u64 {
    value & bits.mask()
}

fn to_signed(value: u64, bits: OpBits) -> i64 {
    let normalized = normalize(value, bits);
    match bits {
        OpBits::B8 => i64::from(normalized as u8 as i8),
        OpBits::B16 => i64::from(normalized as u16 as i16),
        OpBits::B32 => i64::from(normalized as u32 as i32),
        _ => normalized as i64,
    }
}

/// Evaluate a condition over a known compare. Signed and unsigned
/// interpretations follow the condition's domain; conditions over flags we
/// do not model return `None`.
fn evaluate_condition(cond: Cond, lhs: u64, rhs: u64, bits: OpBits) -> Option<bool> {
    let lhs_u = normalize(lhs, bits);
    let rhs_u = normalize(rhs, bits);
    let lhs_s = to_signed(lhs, bits);
    let rhs_s = to_signed(rhs, bits);
    match cond {
        Cond::Unconditional => Some(true),
        Cond::Equal | Cond::Zero => Some(lhs_u == rhs_u),
        Cond::NotEqual | Cond::NotZero => Some(lhs_u != rhs_u),
        Cond::Above => Some(lhs_u > rhs_u),
        Cond::AboveOrEqual => Some(lhs_u >= rhs_u),
        Cond::Below => Some(lhs_u < rhs_u),
        Cond::BelowOrEqual | Cond::NotAbove => Some(lhs_u <= rhs_u),
        Cond::Greater => Some(lhs_s > rhs_s),
        Cond::GreaterOrEqual => Some(lhs_s >= rhs_s),
        Cond::Less => Some(lhs_s < rhs_s),
        Cond::LessOrEqual => Some(lhs_s <= rhs_s),
        _ => None,
    }
}

/// Constant-fold one immediate operation, mirroring what the target will
/// compute at the given width. Returns `None` for operations we do not
/// fold.
fn fold_binary_immediate(value: u64, imm: u64, op: AluOp, bits: OpBits) -> Option<u64> {
    let value = normalize(value, bits);
    let imm = normalize(imm, bits);
    let folded = match op {
        AluOp::Add => value.wrapping_add(imm),
        AluOp::Subtract => value.wrapping_sub(imm),
        AluOp::And => value & imm,
        AluOp::Or => value | imm,
        AluOp::Xor => value ^ imm,
        AluOp::ShiftLeft | AluOp::ShiftRight | AluOp::ShiftArithmeticRight => {
            let num_bits = u64::from(bits.num_bits());
            let amount = imm.min(num_bits - 1);
            match op {
                AluOp::ShiftLeft => value << amount,
                AluOp::ShiftRight => value >> amount,
                _ => match bits {
                    OpBits::B8 => ((value as u8 as i8) >> amount) as u8 as u64,
                    OpBits::B16 => ((value as u16 as i16) >> amount) as u16 as u64,
                    OpBits::B32 => ((value as u32 as i32) >> amount) as u32 as u64,
                    _ => ((value as i64) >> amount) as u64,
                },
            }
        }
        _ => return None,
    };
    Some(normalize(folded, bits))
}

pub struct BranchFoldPass;

impl MicroPass for BranchFoldPass {
    fn name(&self) -> &'static str {
        "branch-fold"
    }

    fn run(&mut self, ctx: &mut PassCtx) -> bool {
        let mut changed = false;
        let mut known: FxHashMap<u32, KnownConstant> = FxHashMap::default();
        let mut compare = CompareState::default();

        let mut cursor = ctx.insts.first();
        while let Some(inst_ref) = cursor {
            cursor = ctx.insts.next(inst_ref);
            let inst = *ctx.insts.at(inst_ref);

            match inst.op {
                MicroOpcode::JumpCond | MicroOpcode::JumpCondImm => {
                    if compare.valid {
                        let cond = ctx.operands.ops(&inst)[0].cond();
                        let bits = compare.bits.unwrap();
                        if let Some(taken) = evaluate_condition(cond, compare.lhs, compare.rhs, bits)
                        {
                            if taken {
                                if cond != Cond::Unconditional {
                                    ctx.operands.ops_mut(&inst)[0] =
                                        crate::micro::MicroOperand::Cond(Cond::Unconditional);
                                    changed = true;
                                }
                            } else {
                                // Never taken: the block falls through, so
                                // known values survive the deletion.
                                ctx.insts.erase(inst_ref);
                                changed = true;
                                compare.valid = false;
                                continue;
                            }
                        }
                    }
                    compare.valid = false;
                }
                MicroOpcode::CmpRegImm => {
                    let ops = ctx.operands.ops(&inst);
                    let reg = ops[0].reg();
                    compare.valid = false;
                    if reg.is_int() {
                        if let Some(k) = known.get(&reg.packed()) {
                            let bits = ops[1].bits();
                            compare = CompareState {
                                valid: true,
                                lhs: normalize(k.value, bits),
                                rhs: normalize(ops[2].u64(), bits),
                                bits: Some(bits),
                            };
                        }
                    }
                }
                MicroOpcode::CmpRegZero => {
                    let ops = ctx.operands.ops(&inst);
                    let reg = ops[0].reg();
                    compare.valid = false;
                    if reg.is_int() {
                        if let Some(k) = known.get(&reg.packed()) {
                            let bits = ops[1].bits();
                            compare = CompareState {
                                valid: true,
                                lhs: normalize(k.value, bits),
                                rhs: 0,
                                bits: Some(bits),
                            };
                        }
                    }
                }
                MicroOpcode::CmpRegReg => {
                    let ops = ctx.operands.ops(&inst);
                    let (a, b) = (ops[0].reg(), ops[1].reg());
                    compare.valid = false;
                    if a.is_int() && b.is_int() {
                        if let (Some(ka), Some(kb)) =
                            (known.get(&a.packed()), known.get(&b.packed()))
                        {
                            let bits = ops[2].bits();
                            compare = CompareState {
                                valid: true,
                                lhs: normalize(ka.value, bits),
                                rhs: normalize(kb.value, bits),
                                bits: Some(bits),
                            };
                        }
                    }
                }
                // Debug markers do not disturb the compare window.
                MicroOpcode::Debug => {}
                _ => compare.valid = false,
            }

            let use_def = collect_use_def(&inst, ctx.operands.ops(&inst), Some(&*ctx.encoder));
            for def in &use_def.defs {
                known.remove(&def.packed());
            }

            if use_def.is_call {
                known.clear();
                compare.valid = false;
                continue;
            }

            let ops = ctx.operands.ops(&inst);
            match inst.op {
                MicroOpcode::LoadRegImm if ops[0].reg().is_int() => {
                    let bits = ops[1].bits();
                    known.insert(
                        ops[0].reg().packed(),
                        KnownConstant {
                            value: normalize(ops[2].u64(), bits),
                            bits,
                        },
                    );
                }
                MicroOpcode::ClearReg if ops[0].reg().is_int() => {
                    known.insert(
                        ops[0].reg().packed(),
                        KnownConstant {
                            value: 0,
                            bits: ops[1].bits(),
                        },
                    );
                }
                MicroOpcode::LoadRegReg if ops[0].reg().is_int() && ops[1].reg().is_int() => {
                    if let Some(&src) = known.get(&ops[1].reg().packed()) {
                        let bits = ops[2].bits();
                        known.insert(
                            ops[0].reg().packed(),
                            KnownConstant {
                                value: normalize(src.value, bits),
                                bits,
                            },
                        );
                    }
                }
                MicroOpcode::OpBinaryRegImm if ops[0].reg().is_int() => {
                    let key = ops[0].reg().packed();
                    if let Some(&k) = known.get(&key) {
                        let bits = ops[1].bits();
                        if let Some(folded) =
                            fold_binary_immediate(k.value, ops[3].u64(), ops[2].alu_op(), bits)
                        {
                            known.insert(key, KnownConstant {
                                value: folded,
                                bits,
                            });
                        } else {
                            known.remove(&key);
                        }
                    }
                }
                _ => {}
            }

            if inst.op == MicroOpcode::Label || is_terminator(&inst) {
                known.clear();
                compare.valid = false;
            }
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::micro::builder::MicroBuilder;
    use crate::micro::passes::run_one;
    use crate::micro::{EmitFlags, MicroOperand, RegClass};

    #[test]
    fn never_taken_jump_is_deleted() {
        let mut b = MicroBuilder::new();
        let label = b.encode_label();
        let r0 = b.new_vreg(RegClass::Int);
        b.encode_load_reg_imm(r0, 0, OpBits::B32, EmitFlags::ZERO);
        b.encode_cmp_reg_imm(r0, 0, OpBits::B32, EmitFlags::ZERO);
        let jump = b.encode_jump_to_label(Cond::NotEqual, OpBits::B32, label, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, BranchFoldPass);
        assert!(b.insts().is_erased(jump));
    }

    #[test]
    fn always_taken_jump_becomes_unconditional() {
        let mut b = MicroBuilder::new();
        let label = b.encode_label();
        let r0 = b.new_vreg(RegClass::Int);
        b.encode_load_reg_imm(r0, 5, OpBits::B32, EmitFlags::ZERO);
        b.encode_cmp_reg_imm(r0, 0, OpBits::B32, EmitFlags::ZERO);
        let jump = b.encode_jump_to_label(Cond::NotEqual, OpBits::B32, label, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, BranchFoldPass);
        let inst = *b.insts().at(jump);
        assert_eq!(
            b.operands().ops(&inst)[0],
            MicroOperand::Cond(Cond::Unconditional)
        );
    }

    #[test]
    fn unknown_register_blocks_folding() {
        let mut b = MicroBuilder::new();
        let label = b.encode_label();
        let r0 = b.new_vreg(RegClass::Int);
        b.encode_cmp_reg_imm(r0, 0, OpBits::B32, EmitFlags::ZERO);
        let jump = b.encode_jump_to_label(Cond::NotEqual, OpBits::B32, label, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, BranchFoldPass);
        let inst = *b.insts().at(jump);
        assert!(!b.insts().is_erased(jump));
        assert_eq!(b.operands().ops(&inst)[0], MicroOperand::Cond(Cond::NotEqual));
    }

    #[test]
    fn call_clears_known_values() {
        use crate::isa::call_conv::CallConvKind;
        use crate::micro::builder::SymbolKind;
        let mut b = MicroBuilder::new();
        let label = b.encode_label();
        let sym = b.add_symbol("helper", SymbolKind::Extern, 0);
        let r0 = b.new_vreg(RegClass::Int);
        b.encode_load_reg_imm(r0, 1, OpBits::B32, EmitFlags::ZERO);
        b.encode_call_extern(sym, CallConvKind::Host, EmitFlags::ZERO);
        b.encode_cmp_reg_imm(r0, 1, OpBits::B32, EmitFlags::ZERO);
        let jump = b.encode_jump_to_label(Cond::Equal, OpBits::B32, label, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, BranchFoldPass);
        let inst = *b.insts().at(jump);
        assert_eq!(b.operands().ops(&inst)[0], MicroOperand::Cond(Cond::Equal));
    }

    #[test]
    fn signed_evaluation_uses_sign_domain() {
        // 0xffff_ffff is -1 signed at 32 bits: less-than 1 signed, above 1
        // unsigned.
        assert_eq!(
            evaluate_condition(Cond::Less, 0xffff_ffff, 1, OpBits::B32),
            Some(true)
        );
        assert_eq!(
            evaluate_condition(Cond::Above, 0xffff_ffff, 1, OpBits::B32),
            Some(true)
        );
        assert_eq!(
            evaluate_condition(Cond::Greater, 0xffff_ffff, 1, OpBits::B32),
            Some(false)
        );
    }

    #[test]
    fn folds_immediate_chains() {
        let mut b = MicroBuilder::new();
        let label = b.encode_label();
        let r0 = b.new_vreg(RegClass::Int);
        b.encode_load_reg_imm(r0, 6, OpBits::B32, EmitFlags::ZERO);
        b.encode_op_binary_reg_imm(r0, 4, AluOp::Add, OpBits::B32, EmitFlags::ZERO);
        b.encode_cmp_reg_imm(r0, 10, OpBits::B32, EmitFlags::ZERO);
        let jump = b.encode_jump_to_label(Cond::NotEqual, OpBits::B32, label, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, BranchFoldPass);
        // 6 + 4 == 10, so the not-equal jump is never taken.
        assert!(b.insts().is_erased(jump));
    }
}
