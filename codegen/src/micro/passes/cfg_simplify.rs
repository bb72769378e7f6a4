//! Control-flow simplification.
//!
//! Three rewrites: jumps whose target label is the next instruction are
//! deleted, code between an unconditional transfer and the next label is
//! unreachable and removed, and labels no jump refers to are dropped.

use super::{MicroPass, PassCtx};
use crate::entities::InstRef;
use crate::micro::{Cond, MicroInst, MicroOpcode, MicroOperand};
use crate::storage::{InstStore, OperandStore};
use rustc_hash::FxHashSet;

const NO_LABEL: u32 = u32::MAX;

fn jump_target(inst: &MicroInst, operands: &OperandStore) -> Option<u32> {
    if inst.op != MicroOpcode::JumpCond {
        return None;
    }
    match operands.ops(inst)[2] {
        MicroOperand::U32(label) if label != NO_LABEL => Some(label),
        _ => None,
    }
}

fn is_unconditional_transfer(inst: &MicroInst, operands: &OperandStore) -> bool {
    match inst.op {
        MicroOpcode::JumpCond | MicroOpcode::JumpCondImm => {
            operands.ops(inst)[0].cond() == Cond::Unconditional
        }
        MicroOpcode::JumpReg | MicroOpcode::JumpTable => true,
        _ => false,
    }
}

/// Whether a jump lands on the label immediately following it, with only
/// debug markers in between.
fn jumps_to_next_label(
    insts: &InstStore,
    operands: &OperandStore,
    jump_ref: InstRef,
    target: u32,
) -> bool {
    let mut cursor = insts.next(jump_ref);
    while let Some(inst_ref) = cursor {
        cursor = insts.next(inst_ref);
        let inst = insts.at(inst_ref);
        match inst.op {
            MicroOpcode::Debug => continue,
            MicroOpcode::Label => {
                if operands.ops(inst)[0].u32() == target {
                    return true;
                }
                continue;
            }
            _ => return false,
        }
    }
    false
}

pub struct CfgSimplifyPass;

impl MicroPass for CfgSimplifyPass {
    fn name(&self) -> &'static str {
        "cfg-simplify"
    }

    fn run(&mut self, ctx: &mut PassCtx) -> bool {
        let mut changed = false;

        // Jump-to-next elision and unreachable-code removal.
        let mut cursor = ctx.insts.first();
        while let Some(inst_ref) = cursor {
            cursor = ctx.insts.next(inst_ref);
            let inst = *ctx.insts.at(inst_ref);

            if let Some(target) = jump_target(&inst, ctx.operands) {
                if jumps_to_next_label(ctx.insts, ctx.operands, inst_ref, target) {
                    ctx.insts.erase(inst_ref);
                    changed = true;
                    continue;
                }
            }

            if inst.op != MicroOpcode::Ret && !is_unconditional_transfer(&inst, ctx.operands) {
                continue;
            }

            // Everything up to the next label is unreachable. Labels stay,
            // and so do patch directives: they instruct the emit pass and
            // are not executable code.
            let mut scan = cursor;
            while let Some(dead_ref) = scan {
                let dead = ctx.insts.at(dead_ref);
                if matches!(
                    dead.op,
                    MicroOpcode::Label | MicroOpcode::PatchJump | MicroOpcode::Debug
                ) {
                    break;
                }
                scan = ctx.insts.next(dead_ref);
                ctx.insts.erase(dead_ref);
                changed = true;
            }
            cursor = scan;
        }

        // Unreferenced-label removal.
        let mut referenced: FxHashSet<u32> = FxHashSet::default();
        let mut cursor = ctx.insts.first();
        while let Some(inst_ref) = cursor {
            cursor = ctx.insts.next(inst_ref);
            let inst = ctx.insts.at(inst_ref);
            if let Some(target) = jump_target(inst, ctx.operands) {
                referenced.insert(target);
            }
        }
        let mut cursor = ctx.insts.first();
        while let Some(inst_ref) = cursor {
            cursor = ctx.insts.next(inst_ref);
            let inst = *ctx.insts.at(inst_ref);
            if inst.op != MicroOpcode::Label {
                continue;
            }
            let label = ctx.operands.ops(&inst)[0].u32();
            if !referenced.contains(&label) {
                ctx.insts.erase(inst_ref);
                changed = true;
            }
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::CfgSimplifyPass;
    use crate::micro::builder::MicroBuilder;
    use crate::micro::passes::run_one;
    use crate::micro::{Cond, EmitFlags, OpBits, RegClass};

    #[test]
    fn jump_to_next_label_is_deleted() {
        use crate::micro::MicroOperand;
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        b.encode_load_reg_imm(r0, 1, OpBits::B32, EmitFlags::ZERO);
        // Forward jump whose target is the immediately following label.
        let jump = b.encode_jump(Cond::NotZero, OpBits::B32, EmitFlags::ZERO);
        let label = b.encode_label();
        let jump_inst = *b.insts().at(jump);
        b.operands_mut().ops_mut(&jump_inst)[2] = MicroOperand::U32(label.as_u32());
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, CfgSimplifyPass);
        assert!(b.insts().is_erased(jump));
    }

    #[test]
    fn backward_jump_survives() {
        let mut b = MicroBuilder::new();
        let label = b.encode_label();
        b.encode_nop(EmitFlags::ZERO);
        let jump = b.encode_jump_to_label(Cond::Unconditional, OpBits::B32, label, EmitFlags::ZERO);
        run_one(&mut b, CfgSimplifyPass);
        assert!(!b.insts().is_erased(jump));
        assert!(!b.insts().is_erased(label));
    }

    #[test]
    fn unreachable_code_after_ret_is_removed() {
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        b.encode_ret(EmitFlags::ZERO);
        let dead = b.encode_load_reg_imm(r0, 1, OpBits::B32, EmitFlags::ZERO);
        let dead2 = b.encode_nop(EmitFlags::ZERO);
        run_one(&mut b, CfgSimplifyPass);
        assert!(b.insts().is_erased(dead));
        assert!(b.insts().is_erased(dead2));
    }

    #[test]
    fn reachable_code_after_label_survives() {
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        let label = b.encode_label();
        b.encode_op_binary_reg_imm(r0, 1, crate::micro::AluOp::Add, OpBits::B32, EmitFlags::ZERO);
        b.encode_cmp_reg_imm(r0, 10, OpBits::B32, EmitFlags::ZERO);
        b.encode_jump_to_label(Cond::Less, OpBits::B32, label, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        let after = b.encode_label();
        let live = b.encode_nop(EmitFlags::ZERO);
        // Keep `after` referenced so it is not dropped as unused.
        b.encode_jump_to_label(Cond::Unconditional, OpBits::B32, after, EmitFlags::ZERO);
        run_one(&mut b, CfgSimplifyPass);
        assert!(!b.insts().is_erased(live));
    }

    #[test]
    fn unreferenced_label_is_removed() {
        let mut b = MicroBuilder::new();
        let label = b.encode_label();
        b.encode_nop(EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, CfgSimplifyPass);
        assert!(b.insts().is_erased(label));
    }

    #[test]
    fn referenced_label_is_kept() {
        let mut b = MicroBuilder::new();
        let label = b.encode_label();
        b.encode_nop(EmitFlags::ZERO);
        b.encode_jump_to_label(Cond::Unconditional, OpBits::B32, label, EmitFlags::ZERO);
        run_one(&mut b, CfgSimplifyPass);
        assert!(!b.insts().is_erased(label));
    }
}
