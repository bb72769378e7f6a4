//! Prolog and epilog insertion.
//!
//! Entry code pushes the callee-saved registers the function writes and
//! reserves the spill area in one stack-pointer adjustment sized so the
//! stack stays aligned; matching exit code runs before every return. With
//! `preserve_persistent_regs` off nothing is saved, which trampolines rely
//! on.

use super::{MicroPass, PassCtx};
use crate::micro::{AluOp, EmitFlags, MicroInst, MicroOpcode, MicroOperand, MicroReg, OpBits};
use crate::storage::OperandStore;

const PUSH_SIZE: u32 = 8;

fn reg_inst(operands: &mut OperandStore, op: MicroOpcode, reg: MicroReg) -> MicroInst {
    let ops = operands.alloc(&[MicroOperand::Reg(reg)]);
    MicroInst {
        op,
        flags: EmitFlags::ZERO,
        num_ops: 1,
        ops,
    }
}

fn stack_adjust_inst(
    operands: &mut OperandStore,
    stack_pointer: MicroReg,
    op: AluOp,
    amount: u32,
) -> MicroInst {
    let ops = operands.alloc(&[
        MicroOperand::Reg(stack_pointer),
        MicroOperand::Bits(OpBits::B64),
        MicroOperand::Op(op),
        MicroOperand::U64(u64::from(amount)),
    ]);
    MicroInst {
        op: MicroOpcode::OpBinaryRegImm,
        flags: EmitFlags::ZERO,
        num_ops: 4,
        ops,
    }
}

pub struct PrologEpilogPass;

impl MicroPass for PrologEpilogPass {
    fn name(&self) -> &'static str {
        "prolog-epilog"
    }

    fn run(&mut self, ctx: &mut PassCtx) -> bool {
        let conv = ctx.call_conv.get();
        let stack_pointer = ctx.encoder.stack_pointer_reg();

        let saved: Vec<MicroReg> = if ctx.preserve_persistent_regs {
            ctx.frame.saved_int_regs.clone()
        } else {
            Vec::new()
        };

        let frame_size = ctx.frame.spill_area_size.next_multiple_of(8);
        // Account for the pushes and the implicit return-address push when
        // padding the frame to the convention's alignment.
        let alignment = conv.stack_alignment.max(8);
        let pushed = saved.len() as u32 * PUSH_SIZE + PUSH_SIZE;
        let misalign = (pushed + frame_size) % alignment;
        let pad = if misalign == 0 { 0 } else { alignment - misalign };
        let sub_size = frame_size + pad;

        if saved.is_empty() && sub_size == 0 {
            return false;
        }
        let Some(first) = ctx.insts.first() else {
            return false;
        };

        for &reg in &saved {
            let push = reg_inst(ctx.operands, MicroOpcode::Push, reg);
            ctx.insts.insert_before(first, push);
        }
        if sub_size > 0 {
            let sub = stack_adjust_inst(ctx.operands, stack_pointer, AluOp::Subtract, sub_size);
            ctx.insts.insert_before(first, sub);
        }

        // Matching exit code ahead of every return.
        let mut cursor = ctx.insts.first();
        while let Some(inst_ref) = cursor {
            cursor = ctx.insts.next(inst_ref);
            if ctx.insts.at(inst_ref).op != MicroOpcode::Ret {
                continue;
            }
            if sub_size > 0 {
                let add = stack_adjust_inst(ctx.operands, stack_pointer, AluOp::Add, sub_size);
                ctx.insts.insert_before(inst_ref, add);
            }
            for &reg in saved.iter().rev() {
                let pop = reg_inst(ctx.operands, MicroOpcode::Pop, reg);
                ctx.insts.insert_before(inst_ref, pop);
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::x64::{regs, X64Encoder};
    use crate::micro::builder::{MicroBuilder, RunOptions};
    use crate::micro::passes::{PassManager, RegAllocPass};
    use crate::micro::RegClass;
    use crate::settings::OptLevel;

    fn opcodes(b: &MicroBuilder) -> Vec<MicroOpcode> {
        b.insts()
            .sequence()
            .iter()
            .map(|&r| b.insts().at(r).op)
            .collect()
    }

    fn run_pipeline(b: &mut MicroBuilder, preserve: bool) {
        let mut encoder = X64Encoder::new();
        let mut manager = PassManager::new();
        manager.add(RegAllocPass);
        manager.add(PrologEpilogPass);
        b.run_passes(
            &mut manager,
            &mut encoder,
            RunOptions {
                preserve_persistent_regs: preserve,
                opt_level: OptLevel::O0,
                ..Default::default()
            },
        );
    }

    #[test]
    fn callee_saved_writes_are_saved_and_restored() {
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        b.encode_load_reg_imm(r0, 1, OpBits::B64, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_pipeline(&mut b, true);
        let ops = opcodes(&b);
        // Pushes first, pops right before the return, balanced.
        let pushes = ops.iter().filter(|&&op| op == MicroOpcode::Push).count();
        let pops = ops.iter().filter(|&&op| op == MicroOpcode::Pop).count();
        assert!(pushes > 0, "allocator handed out a callee-saved register");
        assert_eq!(pushes, pops);
        assert_eq!(*ops.first().unwrap(), MicroOpcode::Push);
        assert_eq!(*ops.last().unwrap(), MicroOpcode::Ret);
        assert_eq!(ops[ops.len() - 2], MicroOpcode::Pop);
    }

    #[test]
    fn trampolines_save_nothing() {
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        b.encode_load_reg_imm(r0, 1, OpBits::B64, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_pipeline(&mut b, false);
        let ops = opcodes(&b);
        assert!(!ops.contains(&MicroOpcode::Push));
        assert!(!ops.contains(&MicroOpcode::Pop));
    }

    #[test]
    fn explicit_callee_saved_write_is_noticed() {
        let mut b = MicroBuilder::new();
        b.encode_load_reg_imm(regs::RBX, 7, OpBits::B64, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_pipeline(&mut b, true);
        let ops = opcodes(&b);
        assert_eq!(ops.iter().filter(|&&op| op == MicroOpcode::Push).count(), 1);
    }

    #[test]
    fn stack_adjustment_keeps_alignment() {
        let mut b = MicroBuilder::new();
        b.encode_load_reg_imm(regs::RBX, 7, OpBits::B64, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_pipeline(&mut b, true);
        // One push (rbx) plus the return address is 16 bytes: any stack
        // adjustment must keep multiples of 16.
        let mut cursor = b.insts().first();
        while let Some(inst_ref) = cursor {
            cursor = b.insts().next(inst_ref);
            let inst = *b.insts().at(inst_ref);
            if inst.op == MicroOpcode::OpBinaryRegImm {
                let ops = b.operands().ops(&inst);
                assert_eq!(ops[3].u64() % 16, 0);
            }
        }
    }
}
