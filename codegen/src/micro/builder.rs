//! The micro-instruction builder.
//!
//! Front-ends lower each function into one `MicroBuilder`: an append-only
//! stream of micro-instructions plus the symbol and relocation tables that
//! travel with it. The builder owns the paged arenas; every `encode_*`
//! method appends exactly one instruction and returns its stable reference.

use crate::binemit::CodeReloc;
use crate::entities::InstRef;
use crate::isa::call_conv::CallConvKind;
use crate::isa::Encoder;
use crate::micro::passes::{PassCtx, PassManager};
use crate::micro::{
    AluOp, Cond, EmitFlags, MicroInst, MicroOpcode, MicroOperand, MicroReg, OpBits, RegClass,
};
use crate::settings::OptLevel;
use crate::storage::{InstStore, OperandStore};
use core::fmt::Write;

/// What a symbol refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Extern,
    Custom,
    Constant,
}

/// One entry of the builder's symbol table.
#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub index: u32,
    pub value: u32,
}

/// Options for one pass-pipeline run.
#[derive(Clone, Copy, Debug)]
pub struct RunOptions {
    pub call_conv: CallConvKind,
    /// When false, callee-saved registers are not preserved; used for
    /// trampolines that never return to compiled code.
    pub preserve_persistent_regs: bool,
    pub opt_level: OptLevel,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            call_conv: CallConvKind::Host,
            preserve_persistent_regs: true,
            opt_level: OptLevel::O0,
        }
    }
}

/// Builder and owner of one function's micro-instruction stream.
pub struct MicroBuilder {
    insts: InstStore,
    operands: OperandStore,
    symbols: Vec<Symbol>,
    relocs: Vec<CodeReloc>,
    next_vreg: u32,
}

impl MicroBuilder {
    pub fn new() -> Self {
        MicroBuilder {
            insts: InstStore::new(),
            operands: OperandStore::new(),
            symbols: Vec::new(),
            relocs: Vec::new(),
            next_vreg: 0,
        }
    }

    /// Hand out a fresh virtual register of the given class.
    pub fn new_vreg(&mut self, class: RegClass) -> MicroReg {
        let reg = MicroReg::virt(class, self.next_vreg);
        self.next_vreg += 1;
        reg
    }

    /// Register a symbol and return its table index.
    pub fn add_symbol(&mut self, name: impl Into<String>, kind: SymbolKind, value: u32) -> u32 {
        let index = self.symbols.len() as u32;
        self.symbols.push(Symbol {
            name: name.into(),
            kind,
            index,
            value,
        });
        index
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn insts(&self) -> &InstStore {
        &self.insts
    }

    pub fn operands(&self) -> &OperandStore {
        &self.operands
    }

    #[cfg(test)]
    pub(crate) fn operands_mut(&mut self) -> &mut OperandStore {
        &mut self.operands
    }

    /// Code relocations recorded by the emit pass, bound to final offsets.
    pub fn code_relocations(&self) -> &[CodeReloc] {
        &self.relocs
    }

    /// Reset the relocation table before (re)running the pass pipeline.
    pub fn clear_code_relocations(&mut self) {
        self.relocs.clear();
    }

    /// Run a pass pipeline over this builder's stream.
    pub fn run_passes(
        &mut self,
        manager: &mut PassManager,
        encoder: &mut dyn Encoder,
        options: RunOptions,
    ) {
        let mut ctx = PassCtx {
            encoder,
            insts: &mut self.insts,
            operands: &mut self.operands,
            relocs: &mut self.relocs,
            frame: Default::default(),
            call_conv: options.call_conv,
            preserve_persistent_regs: options.preserve_persistent_regs,
            opt_level: options.opt_level,
        };
        manager.run(&mut ctx);
    }

    fn push(&mut self, op: MicroOpcode, flags: EmitFlags, ops: &[MicroOperand]) -> InstRef {
        debug_assert!(ops.len() <= u8::MAX as usize);
        let ops_ref = self.operands.alloc(ops);
        self.insts.append(MicroInst {
            op,
            flags,
            num_ops: ops.len() as u8,
            ops: ops_ref,
        })
    }

    pub fn encode_end(&mut self) -> InstRef {
        self.push(MicroOpcode::End, EmitFlags::ZERO, &[])
    }

    pub fn encode_enter(&mut self) -> InstRef {
        self.push(MicroOpcode::Enter, EmitFlags::ZERO, &[])
    }

    pub fn encode_leave(&mut self) -> InstRef {
        self.push(MicroOpcode::Leave, EmitFlags::ZERO, &[])
    }

    pub fn encode_debug(&mut self, marker: u32) -> InstRef {
        self.push(MicroOpcode::Debug, EmitFlags::ZERO, &[MicroOperand::U32(marker)])
    }

    /// Append a label. The label's identity is its own instruction
    /// reference, stored in its first operand.
    pub fn encode_label(&mut self) -> InstRef {
        let label = self.push(MicroOpcode::Label, EmitFlags::ZERO, &[MicroOperand::U32(0)]);
        let inst = *self.insts.at(label);
        self.operands.ops_mut(&inst)[0] = MicroOperand::U32(label.as_u32());
        label
    }

    pub fn encode_push(&mut self, reg: MicroReg, flags: EmitFlags) -> InstRef {
        self.push(MicroOpcode::Push, flags, &[MicroOperand::Reg(reg)])
    }

    pub fn encode_pop(&mut self, reg: MicroReg, flags: EmitFlags) -> InstRef {
        self.push(MicroOpcode::Pop, flags, &[MicroOperand::Reg(reg)])
    }

    pub fn encode_nop(&mut self, flags: EmitFlags) -> InstRef {
        self.push(MicroOpcode::Nop, flags, &[])
    }

    pub fn encode_ret(&mut self, flags: EmitFlags) -> InstRef {
        self.push(MicroOpcode::Ret, flags, &[])
    }

    /// Load the absolute address of `symbol` plus `addend` into `reg`,
    /// leaving an `Abs64` relocation for the linker.
    pub fn encode_symbol_reloc_addr(
        &mut self,
        reg: MicroReg,
        symbol: u32,
        addend: u32,
        flags: EmitFlags,
    ) -> InstRef {
        debug_assert!((symbol as usize) < self.symbols.len());
        self.push(
            MicroOpcode::SymbolRelocAddr,
            flags,
            &[
                MicroOperand::Reg(reg),
                MicroOperand::U32(symbol),
                MicroOperand::U32(addend),
            ],
        )
    }

    /// Load the value stored at `symbol` plus `offset` into `reg` through a
    /// PC-relative access, leaving a `Rel32` relocation.
    pub fn encode_symbol_reloc_value(
        &mut self,
        reg: MicroReg,
        bits: OpBits,
        symbol: u32,
        offset: u32,
        flags: EmitFlags,
    ) -> InstRef {
        debug_assert!((symbol as usize) < self.symbols.len());
        self.push(
            MicroOpcode::SymbolRelocValue,
            flags,
            &[
                MicroOperand::Reg(reg),
                MicroOperand::Bits(bits),
                MicroOperand::U32(symbol),
                MicroOperand::U32(offset),
            ],
        )
    }

    pub fn encode_call_local(
        &mut self,
        symbol: u32,
        conv: CallConvKind,
        flags: EmitFlags,
    ) -> InstRef {
        debug_assert!((symbol as usize) < self.symbols.len());
        self.push(
            MicroOpcode::CallLocal,
            flags,
            &[MicroOperand::U32(symbol), MicroOperand::CallConv(conv)],
        )
    }

    pub fn encode_call_extern(
        &mut self,
        symbol: u32,
        conv: CallConvKind,
        flags: EmitFlags,
    ) -> InstRef {
        debug_assert!((symbol as usize) < self.symbols.len());
        self.push(
            MicroOpcode::CallExtern,
            flags,
            &[MicroOperand::U32(symbol), MicroOperand::CallConv(conv)],
        )
    }

    pub fn encode_call_reg(
        &mut self,
        reg: MicroReg,
        conv: CallConvKind,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::CallIndirect,
            flags,
            &[MicroOperand::Reg(reg), MicroOperand::CallConv(conv)],
        )
    }

    /// Indexed jump through a table of offsets; `table` holds the table
    /// base address and `index` the entry number. Both are clobbered.
    pub fn encode_jump_table(
        &mut self,
        table: MicroReg,
        index: MicroReg,
        num_entries: u32,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::JumpTable,
            flags,
            &[
                MicroOperand::Reg(table),
                MicroOperand::Reg(index),
                MicroOperand::U32(num_entries),
            ],
        )
    }

    /// Append a conditional jump to `label`.
    pub fn encode_jump_to_label(
        &mut self,
        cond: Cond,
        bits: OpBits,
        label: InstRef,
        flags: EmitFlags,
    ) -> InstRef {
        debug_assert_eq!(self.insts.at(label).op, MicroOpcode::Label);
        self.push(
            MicroOpcode::JumpCond,
            flags,
            &[
                MicroOperand::Cond(cond),
                MicroOperand::Bits(bits),
                MicroOperand::U32(label.as_u32()),
            ],
        )
    }

    /// Append a conditional jump with an unfilled displacement. The
    /// returned reference is the jump's handle for a later
    /// [`MicroBuilder::encode_patch_jump`].
    pub fn encode_jump(&mut self, cond: Cond, bits: OpBits, flags: EmitFlags) -> InstRef {
        self.push(
            MicroOpcode::JumpCond,
            flags,
            &[
                MicroOperand::Cond(cond),
                MicroOperand::Bits(bits),
                MicroOperand::U32(u32::MAX),
            ],
        )
    }

    /// Patch a previously appended jump. With `Some(target)` the jump lands
    /// on the given byte offset; with `None` it lands wherever the encoder
    /// is when the patch instruction is reached.
    pub fn encode_patch_jump(
        &mut self,
        jump: InstRef,
        target: Option<u64>,
        flags: EmitFlags,
    ) -> InstRef {
        debug_assert_eq!(self.insts.at(jump).op, MicroOpcode::JumpCond);
        self.push(
            MicroOpcode::PatchJump,
            flags,
            &[
                MicroOperand::U32(jump.as_u32()),
                MicroOperand::U64(target.unwrap_or(0)),
                MicroOperand::U64(u64::from(target.is_some())),
            ],
        )
    }

    pub fn encode_load_reg_reg(
        &mut self,
        dst: MicroReg,
        src: MicroReg,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::LoadRegReg,
            flags,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(src),
                MicroOperand::Bits(bits),
            ],
        )
    }

    pub fn encode_load_reg_imm(
        &mut self,
        reg: MicroReg,
        value: u64,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::LoadRegImm,
            flags,
            &[
                MicroOperand::Reg(reg),
                MicroOperand::Bits(bits),
                MicroOperand::U64(value),
            ],
        )
    }

    pub fn encode_load_reg_mem(
        &mut self,
        reg: MicroReg,
        mem: MicroReg,
        offset: u64,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::LoadRegMem,
            flags,
            &[
                MicroOperand::Reg(reg),
                MicroOperand::Reg(mem),
                MicroOperand::Bits(bits),
                MicroOperand::U64(offset),
            ],
        )
    }

    pub fn encode_load_mem_reg(
        &mut self,
        mem: MicroReg,
        offset: u64,
        src: MicroReg,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::LoadMemReg,
            flags,
            &[
                MicroOperand::Reg(mem),
                MicroOperand::Reg(src),
                MicroOperand::Bits(bits),
                MicroOperand::U64(offset),
            ],
        )
    }

    pub fn encode_load_mem_imm(
        &mut self,
        mem: MicroReg,
        offset: u64,
        value: u64,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::LoadMemImm,
            flags,
            &[
                MicroOperand::Reg(mem),
                MicroOperand::Bits(bits),
                MicroOperand::U64(offset),
                MicroOperand::U64(value),
            ],
        )
    }

    pub fn encode_load_signed_ext_reg_mem(
        &mut self,
        reg: MicroReg,
        mem: MicroReg,
        offset: u64,
        dst_bits: OpBits,
        src_bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::LoadSignedExtRegMem,
            flags,
            &[
                MicroOperand::Reg(reg),
                MicroOperand::Reg(mem),
                MicroOperand::Bits(dst_bits),
                MicroOperand::Bits(src_bits),
                MicroOperand::U64(offset),
            ],
        )
    }

    pub fn encode_load_zero_ext_reg_mem(
        &mut self,
        reg: MicroReg,
        mem: MicroReg,
        offset: u64,
        dst_bits: OpBits,
        src_bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::LoadZeroExtRegMem,
            flags,
            &[
                MicroOperand::Reg(reg),
                MicroOperand::Reg(mem),
                MicroOperand::Bits(dst_bits),
                MicroOperand::Bits(src_bits),
                MicroOperand::U64(offset),
            ],
        )
    }

    pub fn encode_load_signed_ext_reg_reg(
        &mut self,
        dst: MicroReg,
        src: MicroReg,
        dst_bits: OpBits,
        src_bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::LoadSignedExtRegReg,
            flags,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(src),
                MicroOperand::Bits(dst_bits),
                MicroOperand::Bits(src_bits),
            ],
        )
    }

    pub fn encode_load_zero_ext_reg_reg(
        &mut self,
        dst: MicroReg,
        src: MicroReg,
        dst_bits: OpBits,
        src_bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::LoadZeroExtRegReg,
            flags,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(src),
                MicroOperand::Bits(dst_bits),
                MicroOperand::Bits(src_bits),
            ],
        )
    }

    pub fn encode_load_addr_reg_mem(
        &mut self,
        reg: MicroReg,
        mem: MicroReg,
        offset: u64,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::LoadAddrRegMem,
            flags,
            &[
                MicroOperand::Reg(reg),
                MicroOperand::Reg(mem),
                MicroOperand::Bits(bits),
                MicroOperand::U64(offset),
            ],
        )
    }

    pub fn encode_load_amc_reg_mem(
        &mut self,
        dst: MicroReg,
        dst_bits: OpBits,
        base: MicroReg,
        index: MicroReg,
        scale: u64,
        disp: u64,
        src_bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::LoadAmcRegMem,
            flags,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(base),
                MicroOperand::Reg(index),
                MicroOperand::Bits(dst_bits),
                MicroOperand::Bits(src_bits),
                MicroOperand::U64(scale),
                MicroOperand::U64(disp),
            ],
        )
    }

    pub fn encode_load_amc_mem_reg(
        &mut self,
        base: MicroReg,
        index: MicroReg,
        scale: u64,
        disp: u64,
        src: MicroReg,
        src_bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::LoadAmcMemReg,
            flags,
            &[
                MicroOperand::Reg(base),
                MicroOperand::Reg(index),
                MicroOperand::Reg(src),
                MicroOperand::Bits(src_bits),
                MicroOperand::U64(scale),
                MicroOperand::U64(disp),
            ],
        )
    }

    pub fn encode_load_amc_mem_imm(
        &mut self,
        base: MicroReg,
        index: MicroReg,
        scale: u64,
        disp: u64,
        value: u64,
        val_bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::LoadAmcMemImm,
            flags,
            &[
                MicroOperand::Reg(base),
                MicroOperand::Reg(index),
                MicroOperand::Bits(val_bits),
                MicroOperand::U64(scale),
                MicroOperand::U64(disp),
                MicroOperand::U64(value),
            ],
        )
    }

    pub fn encode_load_addr_amc_reg_mem(
        &mut self,
        dst: MicroReg,
        base: MicroReg,
        index: MicroReg,
        scale: u64,
        disp: u64,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::LoadAddrAmcRegMem,
            flags,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(base),
                MicroOperand::Reg(index),
                MicroOperand::U64(scale),
                MicroOperand::U64(disp),
            ],
        )
    }

    pub fn encode_cmp_reg_reg(
        &mut self,
        a: MicroReg,
        b: MicroReg,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::CmpRegReg,
            flags,
            &[
                MicroOperand::Reg(a),
                MicroOperand::Reg(b),
                MicroOperand::Bits(bits),
            ],
        )
    }

    pub fn encode_cmp_reg_imm(
        &mut self,
        reg: MicroReg,
        value: u64,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::CmpRegImm,
            flags,
            &[
                MicroOperand::Reg(reg),
                MicroOperand::Bits(bits),
                MicroOperand::U64(value),
            ],
        )
    }

    pub fn encode_cmp_reg_zero(
        &mut self,
        reg: MicroReg,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::CmpRegZero,
            flags,
            &[MicroOperand::Reg(reg), MicroOperand::Bits(bits)],
        )
    }

    pub fn encode_cmp_mem_reg(
        &mut self,
        mem: MicroReg,
        offset: u64,
        reg: MicroReg,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::CmpMemReg,
            flags,
            &[
                MicroOperand::Reg(mem),
                MicroOperand::Reg(reg),
                MicroOperand::Bits(bits),
                MicroOperand::U64(offset),
            ],
        )
    }

    pub fn encode_cmp_mem_imm(
        &mut self,
        mem: MicroReg,
        offset: u64,
        value: u64,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::CmpMemImm,
            flags,
            &[
                MicroOperand::Reg(mem),
                MicroOperand::Bits(bits),
                MicroOperand::U64(offset),
                MicroOperand::U64(value),
            ],
        )
    }

    pub fn encode_set_cond_reg(&mut self, reg: MicroReg, cond: Cond, flags: EmitFlags) -> InstRef {
        self.push(
            MicroOpcode::SetCondReg,
            flags,
            &[MicroOperand::Reg(reg), MicroOperand::Cond(cond)],
        )
    }

    pub fn encode_load_cond_reg_reg(
        &mut self,
        dst: MicroReg,
        src: MicroReg,
        cond: Cond,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::LoadCondRegReg,
            flags,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(src),
                MicroOperand::Cond(cond),
                MicroOperand::Bits(bits),
            ],
        )
    }

    pub fn encode_clear_reg(&mut self, reg: MicroReg, bits: OpBits, flags: EmitFlags) -> InstRef {
        self.push(
            MicroOpcode::ClearReg,
            flags,
            &[MicroOperand::Reg(reg), MicroOperand::Bits(bits)],
        )
    }

    pub fn encode_op_unary_mem(
        &mut self,
        mem: MicroReg,
        offset: u64,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::OpUnaryMem,
            flags,
            &[
                MicroOperand::Reg(mem),
                MicroOperand::Bits(bits),
                MicroOperand::Op(op),
                MicroOperand::U64(offset),
            ],
        )
    }

    pub fn encode_op_unary_reg(
        &mut self,
        reg: MicroReg,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::OpUnaryReg,
            flags,
            &[
                MicroOperand::Reg(reg),
                MicroOperand::Bits(bits),
                MicroOperand::Op(op),
            ],
        )
    }

    pub fn encode_op_binary_reg_reg(
        &mut self,
        dst: MicroReg,
        src: MicroReg,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::OpBinaryRegReg,
            flags,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(src),
                MicroOperand::Bits(bits),
                MicroOperand::Op(op),
            ],
        )
    }

    pub fn encode_op_binary_reg_imm(
        &mut self,
        reg: MicroReg,
        value: u64,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::OpBinaryRegImm,
            flags,
            &[
                MicroOperand::Reg(reg),
                MicroOperand::Bits(bits),
                MicroOperand::Op(op),
                MicroOperand::U64(value),
            ],
        )
    }

    pub fn encode_op_binary_reg_mem(
        &mut self,
        dst: MicroReg,
        mem: MicroReg,
        offset: u64,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::OpBinaryRegMem,
            flags,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(mem),
                MicroOperand::Bits(bits),
                MicroOperand::Op(op),
                MicroOperand::U64(offset),
            ],
        )
    }

    pub fn encode_op_binary_mem_reg(
        &mut self,
        mem: MicroReg,
        offset: u64,
        src: MicroReg,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::OpBinaryMemReg,
            flags,
            &[
                MicroOperand::Reg(mem),
                MicroOperand::Reg(src),
                MicroOperand::Bits(bits),
                MicroOperand::Op(op),
                MicroOperand::U64(offset),
            ],
        )
    }

    pub fn encode_op_binary_mem_imm(
        &mut self,
        mem: MicroReg,
        offset: u64,
        value: u64,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::OpBinaryMemImm,
            flags,
            &[
                MicroOperand::Reg(mem),
                MicroOperand::Bits(bits),
                MicroOperand::Op(op),
                MicroOperand::U64(offset),
                MicroOperand::U64(value),
            ],
        )
    }

    pub fn encode_op_ternary_reg_reg_reg(
        &mut self,
        r0: MicroReg,
        r1: MicroReg,
        r2: MicroReg,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) -> InstRef {
        self.push(
            MicroOpcode::OpTernaryRegRegReg,
            flags,
            &[
                MicroOperand::Reg(r0),
                MicroOperand::Reg(r1),
                MicroOperand::Reg(r2),
                MicroOperand::Bits(bits),
                MicroOperand::Op(op),
            ],
        )
    }

    /// Render the live instruction stream, one instruction per line.
    pub fn write_ir(&self) -> String {
        let mut out = String::new();
        let mut cursor = self.insts.first();
        while let Some(inst_ref) = cursor {
            let inst = self.insts.at(inst_ref);
            let _ = write!(out, "{inst_ref}: {:?}", inst.op);
            for (i, operand) in self.operands.ops(inst).iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                let _ = write!(out, "{sep}{operand:?}");
            }
            out.push('\n');
            cursor = self.insts.next(inst_ref);
        }
        out
    }
}

impl Default for MicroBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_appends_and_labels() {
        let mut b = MicroBuilder::new();
        let label = b.encode_label();
        let r0 = b.new_vreg(RegClass::Int);
        b.encode_load_reg_imm(r0, 42, OpBits::B32, EmitFlags::ZERO);
        b.encode_jump_to_label(Cond::NotZero, OpBits::B32, label, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        assert_eq!(b.insts().len(), 4);

        // The label names itself in its first operand.
        let label_inst = *b.insts().at(label);
        assert_eq!(
            b.operands().ops(&label_inst)[0],
            MicroOperand::U32(label.as_u32())
        );
    }

    #[test]
    fn vregs_are_dense_and_classed() {
        let mut b = MicroBuilder::new();
        let a = b.new_vreg(RegClass::Int);
        let c = b.new_vreg(RegClass::Float);
        assert_eq!(a.index(), 0);
        assert_eq!(c.index(), 1);
        assert!(a.is_virtual() && a.is_int());
        assert!(c.is_virtual() && c.is_float());
    }

    #[test]
    fn ir_dump_mentions_opcodes() {
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        b.encode_load_reg_imm(r0, 1, OpBits::B64, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        let ir = b.write_ir();
        assert!(ir.contains("LoadRegImm"));
        assert!(ir.contains("Ret"));
    }
}
