//! The emit pass.
//!
//! Walks the final instruction stream in order and dispatches every
//! instruction to the encoder. Label offsets are collected as labels are
//! visited; jumps to labels are patched at the end, and a jump that never
//! resolves is a fatal internal error. Relocation records are bound to the
//! byte offsets the encoder reports.

use super::{MicroPass, PassCtx};
use crate::binemit::{CodeReloc, RelocKind};
use crate::micro::{MicroJump, MicroOpcode, OpBits};
use rustc_hash::{FxHashMap, FxHashSet};

const NO_LABEL: u32 = u32::MAX;

pub struct EmitPass;

impl MicroPass for EmitPass {
    fn name(&self) -> &'static str {
        "emit"
    }

    fn run(&mut self, ctx: &mut PassCtx) -> bool {
        let mut label_offsets: FxHashMap<u32, u32> = FxHashMap::default();
        let mut jumps: FxHashMap<u32, MicroJump> = FxHashMap::default();
        let mut pending_label_jumps: Vec<(MicroJump, u32)> = Vec::new();
        let mut unpatched: FxHashSet<u32> = FxHashSet::default();

        let mut cursor = ctx.insts.first();
        while let Some(inst_ref) = cursor {
            cursor = ctx.insts.next(inst_ref);
            let inst = *ctx.insts.at(inst_ref);
            let ops = ctx.operands.ops(&inst);
            let encoder = &mut *ctx.encoder;
            let flags = inst.flags;
            match inst.op {
                MicroOpcode::End => break,
                MicroOpcode::Ignore | MicroOpcode::Debug => {}
                MicroOpcode::Label => {
                    label_offsets.insert(ops[0].u32(), encoder.current_offset());
                }
                MicroOpcode::Enter | MicroOpcode::Leave => {
                    panic!("{:?} must be rewritten before emission", inst.op)
                }
                MicroOpcode::Push => encoder.encode_push(ops[0].reg(), flags),
                MicroOpcode::Pop => encoder.encode_pop(ops[0].reg(), flags),
                MicroOpcode::Nop => encoder.encode_nop(flags),
                MicroOpcode::Ret => encoder.encode_ret(flags),
                MicroOpcode::SymbolRelocAddr => {
                    let offset = encoder.encode_load_symbol_reloc_addr(ops[0].reg(), flags);
                    ctx.relocs.push(CodeReloc {
                        kind: RelocKind::Abs64,
                        inst: inst_ref,
                        symbol: ops[1].u32(),
                        offset,
                        addend: ops[2].u32() as i32,
                    });
                }
                MicroOpcode::SymbolRelocValue => {
                    let offset =
                        encoder.encode_load_symbol_reloc_value(ops[0].reg(), ops[1].bits(), flags);
                    ctx.relocs.push(CodeReloc {
                        kind: RelocKind::Rel32,
                        inst: inst_ref,
                        symbol: ops[2].u32(),
                        offset,
                        addend: ops[3].u32() as i32 - 4,
                    });
                }
                MicroOpcode::CallLocal => {
                    let offset = encoder.encode_call_local(ops[1].call_conv(), flags);
                    ctx.relocs.push(CodeReloc {
                        kind: RelocKind::Rel32,
                        inst: inst_ref,
                        symbol: ops[0].u32(),
                        offset,
                        addend: -4,
                    });
                }
                MicroOpcode::CallExtern => {
                    let offset = encoder.encode_call_extern(ops[1].call_conv(), flags);
                    ctx.relocs.push(CodeReloc {
                        kind: RelocKind::Rel32,
                        inst: inst_ref,
                        symbol: ops[0].u32(),
                        offset,
                        addend: -4,
                    });
                }
                MicroOpcode::CallIndirect => {
                    encoder.encode_call_reg(ops[0].reg(), ops[1].call_conv(), flags)
                }
                MicroOpcode::JumpTable => {
                    encoder.encode_jump_table(ops[0].reg(), ops[1].reg(), ops[2].u32(), flags)
                }
                MicroOpcode::JumpCond => {
                    let jump = encoder.encode_jump(ops[0].cond(), ops[1].bits(), flags);
                    jumps.insert(inst_ref.as_u32(), jump);
                    let label = ops[2].u32();
                    if label != NO_LABEL {
                        pending_label_jumps.push((jump, label));
                    } else {
                        // Awaiting a patch directive further down.
                        unpatched.insert(inst_ref.as_u32());
                    }
                }
                MicroOpcode::JumpCondImm => {
                    // The immediate is the branch target byte offset.
                    let bits = ops[1].bits();
                    let bits = if bits == OpBits::B8 { bits } else { OpBits::B32 };
                    let jump = encoder.encode_jump(ops[0].cond(), bits, flags);
                    encoder.encode_patch_jump(&jump, ops[2].u64());
                }
                MicroOpcode::PatchJump => {
                    let jump = jumps
                        .get(&ops[0].u32())
                        .expect("patch directive references an unemitted jump");
                    assert!(jump.is_valid());
                    if ops[2].u64() == 1 {
                        encoder.encode_patch_jump(jump, ops[1].u64());
                    } else {
                        encoder.encode_patch_jump_here(jump);
                    }
                    unpatched.remove(&ops[0].u32());
                }
                MicroOpcode::JumpReg => encoder.encode_jump_reg(ops[0].reg(), flags),
                MicroOpcode::LoadRegReg => {
                    encoder.encode_load_reg_reg(ops[0].reg(), ops[1].reg(), ops[2].bits(), flags)
                }
                MicroOpcode::LoadRegImm => {
                    encoder.encode_load_reg_imm(ops[0].reg(), ops[2].u64(), ops[1].bits(), flags)
                }
                MicroOpcode::LoadRegMem => encoder.encode_load_reg_mem(
                    ops[0].reg(),
                    ops[1].reg(),
                    ops[3].u64() as i64,
                    ops[2].bits(),
                    flags,
                ),
                MicroOpcode::LoadMemReg => encoder.encode_load_mem_reg(
                    ops[0].reg(),
                    ops[3].u64() as i64,
                    ops[1].reg(),
                    ops[2].bits(),
                    flags,
                ),
                MicroOpcode::LoadMemImm => encoder.encode_load_mem_imm(
                    ops[0].reg(),
                    ops[2].u64() as i64,
                    ops[3].u64(),
                    ops[1].bits(),
                    flags,
                ),
                MicroOpcode::LoadSignedExtRegMem => encoder.encode_load_signed_ext_reg_mem(
                    ops[0].reg(),
                    ops[1].reg(),
                    ops[4].u64() as i64,
                    ops[2].bits(),
                    ops[3].bits(),
                    flags,
                ),
                MicroOpcode::LoadZeroExtRegMem => encoder.encode_load_zero_ext_reg_mem(
                    ops[0].reg(),
                    ops[1].reg(),
                    ops[4].u64() as i64,
                    ops[2].bits(),
                    ops[3].bits(),
                    flags,
                ),
                MicroOpcode::LoadSignedExtRegReg => encoder.encode_load_signed_ext_reg_reg(
                    ops[0].reg(),
                    ops[1].reg(),
                    ops[2].bits(),
                    ops[3].bits(),
                    flags,
                ),
                MicroOpcode::LoadZeroExtRegReg => encoder.encode_load_zero_ext_reg_reg(
                    ops[0].reg(),
                    ops[1].reg(),
                    ops[2].bits(),
                    ops[3].bits(),
                    flags,
                ),
                MicroOpcode::LoadAddrRegMem => encoder.encode_load_addr_reg_mem(
                    ops[0].reg(),
                    ops[1].reg(),
                    ops[3].u64() as i64,
                    ops[2].bits(),
                    flags,
                ),
                MicroOpcode::LoadAmcRegMem => encoder.encode_load_amc_reg_mem(
                    ops[0].reg(),
                    ops[3].bits(),
                    ops[1].reg(),
                    ops[2].reg(),
                    ops[5].u64(),
                    ops[6].u64() as i64,
                    ops[4].bits(),
                    flags,
                ),
                MicroOpcode::LoadAmcMemReg => encoder.encode_load_amc_mem_reg(
                    ops[0].reg(),
                    ops[1].reg(),
                    ops[4].u64(),
                    ops[5].u64() as i64,
                    ops[2].reg(),
                    ops[3].bits(),
                    flags,
                ),
                MicroOpcode::LoadAmcMemImm => encoder.encode_load_amc_mem_imm(
                    ops[0].reg(),
                    ops[1].reg(),
                    ops[3].u64(),
                    ops[4].u64() as i64,
                    ops[5].u64(),
                    ops[2].bits(),
                    flags,
                ),
                MicroOpcode::LoadAddrAmcRegMem => encoder.encode_load_addr_amc_reg_mem(
                    ops[0].reg(),
                    ops[1].reg(),
                    ops[2].reg(),
                    ops[3].u64(),
                    ops[4].u64() as i64,
                    flags,
                ),
                MicroOpcode::CmpRegReg => {
                    encoder.encode_cmp_reg_reg(ops[0].reg(), ops[1].reg(), ops[2].bits(), flags)
                }
                MicroOpcode::CmpRegImm => {
                    encoder.encode_cmp_reg_imm(ops[0].reg(), ops[2].u64(), ops[1].bits(), flags)
                }
                MicroOpcode::CmpRegZero => {
                    encoder.encode_cmp_reg_zero(ops[0].reg(), ops[1].bits(), flags)
                }
                MicroOpcode::CmpMemReg => encoder.encode_cmp_mem_reg(
                    ops[0].reg(),
                    ops[3].u64() as i64,
                    ops[1].reg(),
                    ops[2].bits(),
                    flags,
                ),
                MicroOpcode::CmpMemImm => encoder.encode_cmp_mem_imm(
                    ops[0].reg(),
                    ops[2].u64() as i64,
                    ops[3].u64(),
                    ops[1].bits(),
                    flags,
                ),
                MicroOpcode::SetCondReg => {
                    encoder.encode_set_cond_reg(ops[0].reg(), ops[1].cond(), flags)
                }
                MicroOpcode::LoadCondRegReg => encoder.encode_load_cond_reg_reg(
                    ops[0].reg(),
                    ops[1].reg(),
                    ops[2].cond(),
                    ops[3].bits(),
                    flags,
                ),
                MicroOpcode::ClearReg => {
                    encoder.encode_clear_reg(ops[0].reg(), ops[1].bits(), flags)
                }
                MicroOpcode::OpUnaryMem => encoder.encode_op_unary_mem(
                    ops[0].reg(),
                    ops[3].u64() as i64,
                    ops[2].alu_op(),
                    ops[1].bits(),
                    flags,
                ),
                MicroOpcode::OpUnaryReg => encoder.encode_op_unary_reg(
                    ops[0].reg(),
                    ops[2].alu_op(),
                    ops[1].bits(),
                    flags,
                ),
                MicroOpcode::OpBinaryRegReg => encoder.encode_op_binary_reg_reg(
                    ops[0].reg(),
                    ops[1].reg(),
                    ops[3].alu_op(),
                    ops[2].bits(),
                    flags,
                ),
                MicroOpcode::OpBinaryRegImm => encoder.encode_op_binary_reg_imm(
                    ops[0].reg(),
                    ops[3].u64(),
                    ops[2].alu_op(),
                    ops[1].bits(),
                    flags,
                ),
                MicroOpcode::OpBinaryRegMem => encoder.encode_op_binary_reg_mem(
                    ops[0].reg(),
                    ops[1].reg(),
                    ops[4].u64() as i64,
                    ops[3].alu_op(),
                    ops[2].bits(),
                    flags,
                ),
                MicroOpcode::OpBinaryMemReg => encoder.encode_op_binary_mem_reg(
                    ops[0].reg(),
                    ops[4].u64() as i64,
                    ops[1].reg(),
                    ops[3].alu_op(),
                    ops[2].bits(),
                    flags,
                ),
                MicroOpcode::OpBinaryMemImm => encoder.encode_op_binary_mem_imm(
                    ops[0].reg(),
                    ops[3].u64() as i64,
                    ops[4].u64(),
                    ops[2].alu_op(),
                    ops[1].bits(),
                    flags,
                ),
                MicroOpcode::OpTernaryRegRegReg => encoder.encode_op_ternary_reg_reg_reg(
                    ops[0].reg(),
                    ops[1].reg(),
                    ops[2].reg(),
                    ops[4].alu_op(),
                    ops[3].bits(),
                    flags,
                ),
            }
        }

        for (jump, label) in pending_label_jumps {
            let offset = *label_offsets
                .get(&label)
                .unwrap_or_else(|| panic!("jump targets unemitted label {label}"));
            ctx.encoder.encode_patch_jump(&jump, u64::from(offset));
        }
        assert!(
            unpatched.is_empty(),
            "{} jump(s) were never patched",
            unpatched.len()
        );

        false
    }
}
