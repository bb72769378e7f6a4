//! Target encoders.
//!
//! An [`Encoder`] turns individual micro-instructions into machine code
//! bytes. The trait is the seam where other architectures would plug in;
//! today x86-64 is the only implementation, and [`lookup`] rejects every
//! other triple.

pub mod call_conv;
pub mod x64;

use crate::binemit::CodeOffset;
use crate::micro::{
    AluOp, Cond, EmitFlags, MicroInst, MicroJump, MicroOperand, MicroReg, OpBits, UseDef,
};
use crate::result::{CodegenError, CodegenResult};
use call_conv::CallConvKind;
use target_lexicon::{Architecture, Triple};

/// Why an instruction cannot be encoded as written.
///
/// Reported by [`Encoder::query_conformance_issue`] and consumed by the
/// legalize pass, which rewrites the instruction into an encodable form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConformanceIssue {
    /// The immediate does not fit the widest immediate field of the
    /// instruction; load it into a scratch register first.
    ImmediateTooWide,
    /// The operation has no immediate form at all; load the immediate
    /// into a scratch register first.
    NoImmediateForm,
    /// Unsigned 64-bit to float conversion needs a runtime helper.
    UnsignedConvertTooWide,
}

/// The capability set every target encoder provides.
///
/// Byte buffer and offsets are owned by the encoder until
/// [`Encoder::copy_to`] hands the finished code out. All `encode_*`
/// methods assert their operand preconditions: a width or register-class
/// mismatch after legalization is a bug, not an input error.
pub trait Encoder: std::fmt::Debug {
    /// Current end-of-buffer offset.
    fn current_offset(&self) -> CodeOffset;

    /// Number of bytes emitted so far.
    fn size(&self) -> usize;

    /// The emitted bytes.
    fn bytes(&self) -> &[u8];

    /// Copy the emitted bytes into `out`.
    fn copy_to(&self, out: &mut Vec<u8>);

    /// The target's stack pointer register.
    fn stack_pointer_reg(&self) -> MicroReg;

    /// Render a register name for diagnostics.
    fn format_register_name(&self, reg: MicroReg, bits: OpBits) -> String;

    /// Merge target-implicit uses and defs (fixed hardware operands,
    /// condition flags) into `info`.
    fn update_reg_use_def(&self, inst: &MicroInst, ops: &[MicroOperand], info: &mut UseDef);

    /// Check whether the instruction can be encoded as written.
    fn query_conformance_issue(
        &self,
        inst: &MicroInst,
        ops: &[MicroOperand],
    ) -> Option<ConformanceIssue>;

    fn encode_push(&mut self, reg: MicroReg, flags: EmitFlags);
    fn encode_pop(&mut self, reg: MicroReg, flags: EmitFlags);
    fn encode_nop(&mut self, flags: EmitFlags);
    fn encode_ret(&mut self, flags: EmitFlags);

    /// Emit a call to a symbol in the same module. Returns the offset of
    /// the 32-bit displacement field, for relocation binding.
    fn encode_call_local(&mut self, conv: CallConvKind, flags: EmitFlags) -> CodeOffset;

    /// Emit a call to an external symbol. Returns the offset of the 32-bit
    /// displacement field.
    fn encode_call_extern(&mut self, conv: CallConvKind, flags: EmitFlags) -> CodeOffset;

    fn encode_call_reg(&mut self, reg: MicroReg, conv: CallConvKind, flags: EmitFlags);

    /// Emit an indexed jump through a table of 32-bit offsets relative to
    /// the table base. `table` holds the table address, `index` the entry
    /// index; both are clobbered.
    fn encode_jump_table(
        &mut self,
        table: MicroReg,
        index: MicroReg,
        num_entries: u32,
        flags: EmitFlags,
    );

    /// Emit a jump with a zeroed displacement of the given width and
    /// return the patch record for it.
    fn encode_jump(&mut self, cond: Cond, bits: OpBits, flags: EmitFlags) -> MicroJump;

    /// Overwrite a recorded jump's displacement so it lands on `dest`.
    /// A displacement that does not fit the recorded width is a fatal
    /// error; choosing a wide enough form was legalize's job.
    fn encode_patch_jump(&mut self, jump: &MicroJump, dest: u64);

    /// Patch a recorded jump to land at the current offset.
    fn encode_patch_jump_here(&mut self, jump: &MicroJump);

    fn encode_jump_reg(&mut self, reg: MicroReg, flags: EmitFlags);

    /// Load the absolute address of a symbol. Returns the offset of the
    /// 8-byte immediate field for `Abs64` relocation binding.
    fn encode_load_symbol_reloc_addr(&mut self, reg: MicroReg, flags: EmitFlags) -> CodeOffset;

    /// Load the value stored at a symbol through a RIP-relative access.
    /// Returns the offset of the 32-bit displacement field for `Rel32`
    /// relocation binding.
    fn encode_load_symbol_reloc_value(
        &mut self,
        reg: MicroReg,
        bits: OpBits,
        flags: EmitFlags,
    ) -> CodeOffset;

    fn encode_load_reg_reg(&mut self, dst: MicroReg, src: MicroReg, bits: OpBits, flags: EmitFlags);
    fn encode_load_reg_imm(&mut self, reg: MicroReg, value: u64, bits: OpBits, flags: EmitFlags);
    fn encode_load_reg_mem(
        &mut self,
        reg: MicroReg,
        mem: MicroReg,
        offset: i64,
        bits: OpBits,
        flags: EmitFlags,
    );
    fn encode_load_mem_reg(
        &mut self,
        mem: MicroReg,
        offset: i64,
        src: MicroReg,
        bits: OpBits,
        flags: EmitFlags,
    );
    fn encode_load_mem_imm(
        &mut self,
        mem: MicroReg,
        offset: i64,
        value: u64,
        bits: OpBits,
        flags: EmitFlags,
    );

    fn encode_load_signed_ext_reg_mem(
        &mut self,
        reg: MicroReg,
        mem: MicroReg,
        offset: i64,
        dst_bits: OpBits,
        src_bits: OpBits,
        flags: EmitFlags,
    );
    fn encode_load_signed_ext_reg_reg(
        &mut self,
        dst: MicroReg,
        src: MicroReg,
        dst_bits: OpBits,
        src_bits: OpBits,
        flags: EmitFlags,
    );
    fn encode_load_zero_ext_reg_mem(
        &mut self,
        reg: MicroReg,
        mem: MicroReg,
        offset: i64,
        dst_bits: OpBits,
        src_bits: OpBits,
        flags: EmitFlags,
    );
    fn encode_load_zero_ext_reg_reg(
        &mut self,
        dst: MicroReg,
        src: MicroReg,
        dst_bits: OpBits,
        src_bits: OpBits,
        flags: EmitFlags,
    );

    fn encode_load_addr_reg_mem(
        &mut self,
        reg: MicroReg,
        mem: MicroReg,
        offset: i64,
        bits: OpBits,
        flags: EmitFlags,
    );

    fn encode_load_amc_reg_mem(
        &mut self,
        dst: MicroReg,
        dst_bits: OpBits,
        base: MicroReg,
        index: MicroReg,
        scale: u64,
        disp: i64,
        src_bits: OpBits,
        flags: EmitFlags,
    );
    fn encode_load_amc_mem_reg(
        &mut self,
        base: MicroReg,
        index: MicroReg,
        scale: u64,
        disp: i64,
        src: MicroReg,
        src_bits: OpBits,
        flags: EmitFlags,
    );
    fn encode_load_amc_mem_imm(
        &mut self,
        base: MicroReg,
        index: MicroReg,
        scale: u64,
        disp: i64,
        value: u64,
        val_bits: OpBits,
        flags: EmitFlags,
    );
    fn encode_load_addr_amc_reg_mem(
        &mut self,
        dst: MicroReg,
        base: MicroReg,
        index: MicroReg,
        scale: u64,
        disp: i64,
        flags: EmitFlags,
    );

    fn encode_cmp_reg_reg(&mut self, a: MicroReg, b: MicroReg, bits: OpBits, flags: EmitFlags);
    fn encode_cmp_reg_imm(&mut self, reg: MicroReg, value: u64, bits: OpBits, flags: EmitFlags);
    fn encode_cmp_reg_zero(&mut self, reg: MicroReg, bits: OpBits, flags: EmitFlags);
    fn encode_cmp_mem_reg(
        &mut self,
        mem: MicroReg,
        offset: i64,
        reg: MicroReg,
        bits: OpBits,
        flags: EmitFlags,
    );
    fn encode_cmp_mem_imm(
        &mut self,
        mem: MicroReg,
        offset: i64,
        value: u64,
        bits: OpBits,
        flags: EmitFlags,
    );

    fn encode_set_cond_reg(&mut self, reg: MicroReg, cond: Cond, flags: EmitFlags);
    fn encode_load_cond_reg_reg(
        &mut self,
        dst: MicroReg,
        src: MicroReg,
        cond: Cond,
        bits: OpBits,
        flags: EmitFlags,
    );
    fn encode_clear_reg(&mut self, reg: MicroReg, bits: OpBits, flags: EmitFlags);

    fn encode_op_unary_mem(
        &mut self,
        mem: MicroReg,
        offset: i64,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    );
    fn encode_op_unary_reg(&mut self, reg: MicroReg, op: AluOp, bits: OpBits, flags: EmitFlags);

    fn encode_op_binary_reg_reg(
        &mut self,
        dst: MicroReg,
        src: MicroReg,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    );
    fn encode_op_binary_reg_imm(
        &mut self,
        reg: MicroReg,
        value: u64,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    );
    fn encode_op_binary_reg_mem(
        &mut self,
        dst: MicroReg,
        mem: MicroReg,
        offset: i64,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    );
    fn encode_op_binary_mem_reg(
        &mut self,
        mem: MicroReg,
        offset: i64,
        src: MicroReg,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    );
    fn encode_op_binary_mem_imm(
        &mut self,
        mem: MicroReg,
        offset: i64,
        value: u64,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    );

    fn encode_op_ternary_reg_reg_reg(
        &mut self,
        r0: MicroReg,
        r1: MicroReg,
        r2: MicroReg,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    );
}

/// Build an encoder for the given target triple.
pub fn lookup(triple: &Triple) -> CodegenResult<Box<dyn Encoder>> {
    match triple.architecture {
        Architecture::X86_64 => Ok(Box::new(x64::X64Encoder::new())),
        _ => Err(CodegenError::Unsupported(triple.to_string())),
    }
}

/// Build an encoder for the machine we are running on.
pub fn lookup_host() -> CodegenResult<Box<dyn Encoder>> {
    lookup(&Triple::host())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;

    #[test]
    fn lookup_rejects_foreign_targets() {
        let triple = Triple::from_str("aarch64-unknown-linux-gnu").unwrap();
        match lookup(&triple) {
            Err(CodegenError::Unsupported(name)) => assert!(name.contains("aarch64")),
            other => panic!("expected unsupported-target error, got {other:?}"),
        }
    }

    #[test]
    fn lookup_x86_64() {
        let triple = Triple::from_str("x86_64-unknown-linux-gnu").unwrap();
        assert!(lookup(&triple).is_ok());
    }
}
