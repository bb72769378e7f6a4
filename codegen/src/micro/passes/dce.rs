//! Dead code elimination.
//!
//! A pure definition whose register is redefined, without an intervening
//! use, before the next control-flow barrier cannot be observed and is
//! removed. Instructions writing the stack pointer, the instruction
//! pointer, or a call result are never candidates.

use super::{MicroPass, PassCtx};
use crate::entities::InstRef;
use crate::isa::Encoder;
use crate::micro::{collect_use_def, MicroInst, MicroOpcode, MicroReg, UseDef};
use rustc_hash::{FxHashMap, FxHashSet};

fn is_removable_instruction(inst: &MicroInst) -> bool {
    matches!(
        inst.op,
        MicroOpcode::LoadRegReg
            | MicroOpcode::LoadRegImm
            | MicroOpcode::LoadSignedExtRegReg
            | MicroOpcode::LoadZeroExtRegReg
            | MicroOpcode::LoadAddrRegMem
            | MicroOpcode::LoadAddrAmcRegMem
            | MicroOpcode::SetCondReg
            | MicroOpcode::LoadCondRegReg
            | MicroOpcode::ClearReg
            | MicroOpcode::OpUnaryReg
            | MicroOpcode::OpBinaryRegReg
            | MicroOpcode::OpBinaryRegImm
            | MicroOpcode::CmpRegReg
            | MicroOpcode::CmpRegImm
            | MicroOpcode::CmpRegZero
            | MicroOpcode::CmpMemReg
            | MicroOpcode::CmpMemImm
    )
}

fn defines_special_register(defs: &[MicroReg], encoder: &dyn Encoder) -> bool {
    let stack_pointer = encoder.stack_pointer_reg();
    defs.iter().any(|&reg| {
        reg.is_instruction_pointer() || reg == stack_pointer || (reg.is_int() && !reg.is_virtual() && reg.index() == 4)
    })
}

fn is_control_flow_barrier(inst: &MicroInst, use_def: &UseDef) -> bool {
    if use_def.is_call {
        return true;
    }
    matches!(
        inst.op,
        MicroOpcode::Label
            | MicroOpcode::JumpCond
            | MicroOpcode::JumpCondImm
            | MicroOpcode::JumpReg
            | MicroOpcode::JumpTable
            | MicroOpcode::Ret
    )
}

pub struct DcePass;

impl MicroPass for DcePass {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn run(&mut self, ctx: &mut PassCtx) -> bool {
        let mut changed = false;
        let mut last_pure_def_by_reg: FxHashMap<u32, InstRef> = FxHashMap::default();

        let mut cursor = ctx.insts.first();
        while let Some(inst_ref) = cursor {
            cursor = ctx.insts.next(inst_ref);
            let inst = *ctx.insts.at(inst_ref);
            let use_def = collect_use_def(&inst, ctx.operands.ops(&inst), Some(&*ctx.encoder));

            if is_control_flow_barrier(&inst, &use_def) {
                last_pure_def_by_reg.clear();
                continue;
            }

            // A use keeps the previous definition alive.
            for use_reg in &use_def.uses {
                last_pure_def_by_reg.remove(&use_reg.packed());
            }

            for def_reg in &use_def.defs {
                if let Some(previous) = last_pure_def_by_reg.remove(&def_reg.packed()) {
                    ctx.insts.erase(previous);
                    changed = true;
                }
            }

            let track_as_pure_def = is_removable_instruction(&inst)
                && !defines_special_register(&use_def.defs, &*ctx.encoder)
                && use_def.defs.len() == 1
                && !use_def.is_call;

            if track_as_pure_def {
                last_pure_def_by_reg.insert(use_def.defs[0].packed(), inst_ref);
            }
        }

        // Second phase: a virtual register that is never read anywhere in
        // the function cannot be observed, whatever the block structure,
        // and neither can condition flags, which never outlive a function.
        // Pure definitions of such registers are dead. This is what
        // finally deletes a copy once propagation has rewritten all of its
        // readers, and a compare once its jump has been folded away.
        let mut read_anywhere: FxHashSet<u32> = FxHashSet::default();
        let mut cursor = ctx.insts.first();
        while let Some(inst_ref) = cursor {
            cursor = ctx.insts.next(inst_ref);
            let inst = *ctx.insts.at(inst_ref);
            let use_def = collect_use_def(&inst, ctx.operands.ops(&inst), Some(&*ctx.encoder));
            for use_reg in &use_def.uses {
                read_anywhere.insert(use_reg.packed());
            }
        }
        let mut cursor = ctx.insts.first();
        while let Some(inst_ref) = cursor {
            cursor = ctx.insts.next(inst_ref);
            let inst = *ctx.insts.at(inst_ref);
            if !is_removable_instruction(&inst) {
                continue;
            }
            let use_def = collect_use_def(&inst, ctx.operands.ops(&inst), Some(&*ctx.encoder));
            let unobservable = |reg: &MicroReg| {
                reg.is_virtual() || reg.class() == crate::micro::RegClass::Flags
            };
            let removable = use_def.defs.len() == 1
                && unobservable(&use_def.defs[0])
                && !read_anywhere.contains(&use_def.defs[0].packed())
                && !use_def.is_call
                && !defines_special_register(&use_def.defs, &*ctx.encoder);
            if removable {
                ctx.insts.erase(inst_ref);
                changed = true;
            }
        }

        changed
    }
}
