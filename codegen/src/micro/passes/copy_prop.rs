//! Copy propagation.
//!
//! Follows register aliases created by 64-bit register-to-register moves
//! and rewrites later pure uses to the original source.
//! Example: `mov r2, r1; add r3, r2` becomes `add r3, r1`, which shortens
//! copy chains and lets dead-copy elimination fire.

use super::{is_local_dataflow_barrier, is_same_register_class, MicroPass, PassCtx};
use crate::micro::{collect_use_def, for_each_reg_operand, MicroOpcode, MicroReg, OpBits, RegUse};
use rustc_hash::FxHashMap;

const MAX_ALIAS_HOPS: u32 = 32;

fn resolve_alias(aliases: &FxHashMap<u32, MicroReg>, reg: MicroReg) -> MicroReg {
    let mut current = reg;
    for _ in 0..MAX_ALIAS_HOPS {
        match aliases.get(&current.packed()) {
            Some(&next) if next != current => current = next,
            _ => return current,
        }
    }
    current
}

fn kill_alias_for_definition(aliases: &mut FxHashMap<u32, MicroReg>, reg: MicroReg) {
    aliases.retain(|&from, &mut to| from != reg.packed() && to != reg);
}

pub struct CopyPropPass;

impl MicroPass for CopyPropPass {
    fn name(&self) -> &'static str {
        "copy-prop"
    }

    fn run(&mut self, ctx: &mut PassCtx) -> bool {
        let mut changed = false;
        let mut aliases: FxHashMap<u32, MicroReg> = FxHashMap::default();

        let mut cursor = ctx.insts.first();
        while let Some(inst_ref) = cursor {
            cursor = ctx.insts.next(inst_ref);
            let inst = *ctx.insts.at(inst_ref);
            if inst.op == MicroOpcode::Label {
                aliases.clear();
                continue;
            }

            for_each_reg_operand(inst.op, ctx.operands.ops_mut(&inst), |reg, role| {
                if role != RegUse::Use {
                    return;
                }
                let resolved = resolve_alias(&aliases, *reg);
                if resolved != *reg && is_same_register_class(*reg, resolved) {
                    *reg = resolved;
                    changed = true;
                }
            });

            let use_def = collect_use_def(&inst, ctx.operands.ops(&inst), Some(&*ctx.encoder));
            for &def in &use_def.defs {
                kill_alias_for_definition(&mut aliases, def);
            }

            if inst.op == MicroOpcode::LoadRegReg {
                let ops = ctx.operands.ops(&inst);
                let dst = ops[0].reg();
                let src = resolve_alias(&aliases, ops[1].reg());
                if dst != src && is_same_register_class(dst, src) && ops[2].bits() == OpBits::B64 {
                    aliases.insert(dst.packed(), src);
                }
            }

            if is_local_dataflow_barrier(&inst, &use_def) {
                aliases.clear();
            }
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::CopyPropPass;
    use crate::micro::builder::MicroBuilder;
    use crate::micro::passes::run_one;
    use crate::micro::{AluOp, EmitFlags, MicroOperand, OpBits, RegClass};

    fn run_pass(builder: &mut MicroBuilder) {
        run_one(builder, CopyPropPass);
    }

    #[test]
    fn propagates_through_move() {
        let mut b = MicroBuilder::new();
        let r1 = b.new_vreg(RegClass::Int);
        let r2 = b.new_vreg(RegClass::Int);
        let r3 = b.new_vreg(RegClass::Int);
        b.encode_load_reg_reg(r2, r1, OpBits::B64, EmitFlags::ZERO);
        let add = b.encode_op_binary_reg_reg(r3, r2, AluOp::Add, OpBits::B64, EmitFlags::ZERO);
        run_pass(&mut b);
        let inst = *b.insts().at(add);
        assert_eq!(b.operands().ops(&inst)[1], MicroOperand::Reg(r1));
    }

    #[test]
    fn narrow_moves_do_not_alias() {
        let mut b = MicroBuilder::new();
        let r1 = b.new_vreg(RegClass::Int);
        let r2 = b.new_vreg(RegClass::Int);
        let r3 = b.new_vreg(RegClass::Int);
        b.encode_load_reg_reg(r2, r1, OpBits::B32, EmitFlags::ZERO);
        let add = b.encode_op_binary_reg_reg(r3, r2, AluOp::Add, OpBits::B32, EmitFlags::ZERO);
        run_pass(&mut b);
        let inst = *b.insts().at(add);
        assert_eq!(b.operands().ops(&inst)[1], MicroOperand::Reg(r2));
    }

    #[test]
    fn redefinition_kills_alias() {
        let mut b = MicroBuilder::new();
        let r1 = b.new_vreg(RegClass::Int);
        let r2 = b.new_vreg(RegClass::Int);
        let r3 = b.new_vreg(RegClass::Int);
        b.encode_load_reg_reg(r2, r1, OpBits::B64, EmitFlags::ZERO);
        b.encode_load_reg_imm(r1, 7, OpBits::B64, EmitFlags::ZERO);
        let add = b.encode_op_binary_reg_reg(r3, r2, AluOp::Add, OpBits::B64, EmitFlags::ZERO);
        run_pass(&mut b);
        // r1 was redefined between the copy and the use; r2 must survive.
        let inst = *b.insts().at(add);
        assert_eq!(b.operands().ops(&inst)[1], MicroOperand::Reg(r2));
    }

    #[test]
    fn label_is_a_barrier() {
        let mut b = MicroBuilder::new();
        let r1 = b.new_vreg(RegClass::Int);
        let r2 = b.new_vreg(RegClass::Int);
        let r3 = b.new_vreg(RegClass::Int);
        b.encode_load_reg_reg(r2, r1, OpBits::B64, EmitFlags::ZERO);
        b.encode_label();
        let add = b.encode_op_binary_reg_reg(r3, r2, AluOp::Add, OpBits::B64, EmitFlags::ZERO);
        run_pass(&mut b);
        let inst = *b.insts().at(add);
        assert_eq!(b.operands().ops(&inst)[1], MicroOperand::Reg(r2));
    }
}
