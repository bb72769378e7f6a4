//! Byte-level x86-64 emission.
//!
//! One method per encodable form. Encoding is REX-prefix based (no VEX or
//! EVEX); float operations use the SSE scalar forms. Operand mistakes that
//! survive legalization are bugs and fail assertions rather than being
//! reported.

use super::regs::{self, enc};
use crate::binemit::CodeOffset;
use crate::isa::call_conv::CallConvKind;
use crate::isa::{ConformanceIssue, Encoder};
use crate::micro::{
    AluOp, Cond, EmitFlags, MicroInst, MicroJump, MicroOpcode, MicroOperand, MicroReg, OpBits,
    UseDef,
};

/// Encode the ModR/M byte.
#[inline]
fn modrm(m0d: u8, reg: u8, rm: u8) -> u8 {
    debug_assert!(m0d < 4);
    ((m0d & 3) << 6) | ((reg & 7) << 3) | (rm & 7)
}

/// Encode the SIB byte (scale-index-base).
#[inline]
fn sib(scale_log2: u8, index: u8, base: u8) -> u8 {
    debug_assert!(scale_log2 < 4);
    ((scale_log2 & 3) << 6) | ((index & 7) << 3) | (base & 7)
}

/// An 8-bit access to `spl`, `bpl`, `sil` or `dil` needs an empty REX
/// prefix to disambiguate from the legacy high-byte registers.
#[inline]
fn byte_reg_needs_rex(enc: u8) -> bool {
    (4..=7).contains(&enc)
}

fn low32_will_sign_extend_to_64(value: u64) -> bool {
    value as i64 == i64::from(value as i64 as i32)
}

fn low8_will_sign_extend(value: u64, bits: OpBits) -> bool {
    let masked = value & bits.mask();
    let signed = match bits {
        OpBits::B8 => i64::from(masked as u8 as i8),
        OpBits::B16 => i64::from(masked as u16 as i16),
        OpBits::B32 => i64::from(masked as u32 as i32),
        _ => masked as i64,
    };
    i8::try_from(signed).is_ok()
}

/// Condition code field for `jcc`, `setcc` and `cmovcc`.
fn cc(cond: Cond) -> u8 {
    match cond {
        Cond::Overflow => 0x0,
        Cond::NotOverflow => 0x1,
        Cond::Below => 0x2,
        Cond::AboveOrEqual => 0x3,
        Cond::Equal | Cond::Zero => 0x4,
        Cond::NotEqual | Cond::NotZero => 0x5,
        Cond::BelowOrEqual | Cond::NotAbove => 0x6,
        Cond::Above => 0x7,
        Cond::Sign => 0x8,
        Cond::Parity | Cond::EvenParity => 0xa,
        Cond::NotParity | Cond::NotEvenParity => 0xb,
        Cond::Less => 0xc,
        Cond::GreaterOrEqual => 0xd,
        Cond::LessOrEqual => 0xe,
        Cond::Greater => 0xf,
        Cond::Unconditional => panic!("unconditional jumps have no condition code"),
    }
}

/// Opcode byte for the register-to-memory direction of the basic integer
/// group, paired `(8-bit, wider)`.
fn alu_mr_opcode(op: AluOp) -> Option<(u8, u8)> {
    match op {
        AluOp::Add => Some((0x00, 0x01)),
        AluOp::Or => Some((0x08, 0x09)),
        AluOp::And => Some((0x20, 0x21)),
        AluOp::Subtract => Some((0x28, 0x29)),
        AluOp::Xor => Some((0x30, 0x31)),
        AluOp::Move => Some((0x88, 0x89)),
        _ => None,
    }
}

/// Immediate-group digit for the basic integer group.
fn alu_imm_digit(op: AluOp) -> Option<u8> {
    match op {
        AluOp::Add => Some(0),
        AluOp::Or => Some(1),
        AluOp::And => Some(4),
        AluOp::Subtract => Some(5),
        AluOp::Xor => Some(6),
        _ => None,
    }
}

/// Shift-group digit for `C0/C1/D2/D3`.
fn shift_digit(op: AluOp) -> Option<u8> {
    match op {
        AluOp::RotateLeft => Some(0),
        AluOp::RotateRight => Some(1),
        AluOp::ShiftLeft | AluOp::ShiftArithmeticLeft => Some(4),
        AluOp::ShiftRight => Some(5),
        AluOp::ShiftArithmeticRight => Some(7),
        _ => None,
    }
}

/// Scalar SSE opcode (after the mandatory `F3/F2 0F` prefix bytes).
fn sse_scalar_opcode(op: AluOp) -> Option<u8> {
    match op {
        AluOp::FloatSqrt => Some(0x51),
        AluOp::FloatAdd => Some(0x58),
        AluOp::FloatMultiply => Some(0x59),
        AluOp::FloatSubtract => Some(0x5c),
        AluOp::FloatMin => Some(0x5d),
        AluOp::FloatDivide => Some(0x5e),
        AluOp::FloatMax => Some(0x5f),
        _ => None,
    }
}

/// Packed bitwise SSE opcode (after `0F`, `66` prefix for the double form).
fn sse_bitwise_opcode(op: AluOp) -> Option<u8> {
    match op {
        AluOp::FloatAnd => Some(0x54),
        AluOp::FloatXor => Some(0x57),
        _ => None,
    }
}

fn is_divide_or_modulo(op: AluOp) -> bool {
    matches!(
        op,
        AluOp::DivideSigned | AluOp::DivideUnsigned | AluOp::ModuloSigned | AluOp::ModuloUnsigned
    )
}

fn is_shift_or_rotate(op: AluOp) -> bool {
    shift_digit(op).is_some()
}

/// A memory operand: base register, optional scaled index, displacement.
#[derive(Clone, Copy)]
struct Mem {
    base: u8,
    index: Option<(u8, u8)>,
    offset: i64,
}

impl Mem {
    fn base_disp(base: MicroReg, offset: i64) -> Mem {
        Mem {
            base: enc(base),
            index: None,
            offset,
        }
    }

    fn amc(base: MicroReg, index: MicroReg, scale: u64, offset: i64) -> Mem {
        let scale_log2 = match scale {
            1 => 0,
            2 => 1,
            4 => 2,
            8 => 3,
            _ => panic!("invalid addressing-mode scale {scale}"),
        };
        let index = enc(index);
        assert!(index != 4, "rsp cannot be an index register");
        Mem {
            base: enc(base),
            index: Some((index, scale_log2)),
            offset,
        }
    }
}

/// The x86-64 encoder. Owns the byte buffer until `copy_to`.
#[derive(Debug)]
pub struct X64Encoder {
    buf: Vec<u8>,
}

impl X64Encoder {
    pub fn new() -> Self {
        X64Encoder { buf: Vec::new() }
    }

    #[inline]
    fn put1(&mut self, b: u8) {
        self.buf.push(b);
    }

    #[inline]
    fn put2(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    fn put4(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    fn put8(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Emit a REX prefix if any extension bit is set or emission is forced.
    /// `reg`, `index` and `base` are full 4-bit encodings.
    fn rex(&mut self, w: bool, reg: u8, index: u8, base: u8, force: bool) {
        let byte = 0x40
            | u8::from(w) << 3
            | ((reg >> 3) & 1) << 2
            | ((index >> 3) & 1) << 1
            | ((base >> 3) & 1);
        if byte != 0x40 || force {
            self.put1(byte);
        }
    }

    /// Emit ModR/M (+ SIB, + displacement) for a memory operand.
    fn mem_operand(&mut self, reg_field: u8, mem: Mem) {
        let offset = mem.offset;
        assert!(
            i32::try_from(offset).is_ok(),
            "memory displacement {offset:#x} does not fit in 32 bits"
        );
        let offset = offset as i32;
        // rbp/r13 as base cannot use the no-displacement form.
        let m0d = if offset == 0 && mem.base & 7 != 5 {
            0
        } else if i8::try_from(offset).is_ok() {
            1
        } else {
            2
        };
        match mem.index {
            None => {
                if mem.base & 7 == 4 {
                    // rsp/r12 as base requires a SIB byte.
                    self.put1(modrm(m0d, reg_field, 4));
                    self.put1(sib(0, 4, mem.base));
                } else {
                    self.put1(modrm(m0d, reg_field, mem.base));
                }
            }
            Some((index, scale_log2)) => {
                self.put1(modrm(m0d, reg_field, 4));
                self.put1(sib(scale_log2, index, mem.base));
            }
        }
        match m0d {
            0 => {}
            1 => self.put1(offset as u8),
            _ => self.put4(offset as u32),
        }
    }

    /// Prefix + REX + opcode + ModR/M for a register-register form.
    fn op_reg_reg(
        &mut self,
        prefix: Option<u8>,
        w: bool,
        opcode: &[u8],
        reg_field: u8,
        rm: u8,
        force_rex: bool,
    ) {
        if let Some(p) = prefix {
            self.put1(p);
        }
        self.rex(w, reg_field, 0, rm, force_rex);
        self.buf.extend_from_slice(opcode);
        self.put1(modrm(3, reg_field, rm));
    }

    /// Prefix + REX + opcode + memory operand.
    fn op_mem(
        &mut self,
        prefix: Option<u8>,
        w: bool,
        opcode: &[u8],
        reg_field: u8,
        mem: Mem,
        force_rex: bool,
    ) {
        if let Some(p) = prefix {
            self.put1(p);
        }
        let index = mem.index.map_or(0, |(i, _)| i);
        self.rex(w, reg_field, index, mem.base, force_rex);
        self.buf.extend_from_slice(opcode);
        self.mem_operand(reg_field, mem);
    }

    /// Prefix + REX + opcode + RIP-relative operand with a zeroed
    /// 32-bit displacement. Returns the offset of the displacement field.
    fn op_riprel(&mut self, prefix: Option<u8>, w: bool, opcode: &[u8], reg_field: u8) -> CodeOffset {
        if let Some(p) = prefix {
            self.put1(p);
        }
        self.rex(w, reg_field, 0, 0, false);
        self.buf.extend_from_slice(opcode);
        self.put1(modrm(0, reg_field, 5));
        let at = self.current_offset();
        self.put4(0);
        at
    }

    fn operand_size_prefix(bits: OpBits) -> Option<u8> {
        if bits == OpBits::B16 {
            Some(0x66)
        } else {
            None
        }
    }

    /// Emit an integer immediate of the operation width (32-bit for B64,
    /// sign-extended at runtime).
    fn put_imm(&mut self, value: u64, bits: OpBits) {
        match bits {
            OpBits::B8 => self.put1(value as u8),
            OpBits::B16 => self.put2(value as u16),
            OpBits::B32 => self.put4(value as u32),
            OpBits::B64 => {
                assert!(
                    low32_will_sign_extend_to_64(value),
                    "64-bit immediate {value:#x} must be legalized through a register"
                );
                self.put4(value as u32);
            }
            OpBits::B128 => panic!("no 128-bit immediates"),
        }
    }

    /// `mov` between two integer registers.
    fn mov_int_reg_reg(&mut self, dst: MicroReg, src: MicroReg, bits: OpBits) {
        let (dst, src) = (enc(dst), enc(src));
        let force = bits == OpBits::B8 && (byte_reg_needs_rex(dst) || byte_reg_needs_rex(src));
        let opcode: &[u8] = if bits == OpBits::B8 { &[0x88] } else { &[0x89] };
        self.op_reg_reg(
            Self::operand_size_prefix(bits),
            bits == OpBits::B64,
            opcode,
            src,
            dst,
            force,
        );
    }

    /// SSE prefix byte for a scalar operation of the given width.
    fn sse_scalar_prefix(bits: OpBits) -> u8 {
        match bits {
            OpBits::B32 => 0xf3,
            OpBits::B64 => 0xf2,
            _ => panic!("scalar float operations are 32- or 64-bit, got {bits}"),
        }
    }

    /// `div`/`idiv` with the quotient or remainder moved into `dst`.
    ///
    /// The accumulator pair is a fixed hardware operand here; the implicit
    /// clobbers are reported through `update_reg_use_def`.
    fn int_divide(&mut self, dst: MicroReg, src: MicroReg, op: AluOp, bits: OpBits) {
        assert!(
            bits == OpBits::B32 || bits == OpBits::B64,
            "divides are lowered at 32 or 64 bits, got {bits}"
        );
        assert!(dst != regs::RDX, "divide destination cannot be rdx");
        assert!(
            src != regs::RAX && src != regs::RDX,
            "divide source conflicts with the accumulator pair"
        );
        let w = bits == OpBits::B64;
        if dst != regs::RAX {
            self.mov_int_reg_reg(regs::RAX, dst, bits);
        }
        let signed = matches!(op, AluOp::DivideSigned | AluOp::ModuloSigned);
        if signed {
            // cdq/cqo
            self.rex(w, 0, 0, 0, false);
            self.put1(0x99);
        } else {
            // xor edx, edx
            self.put1(0x31);
            self.put1(modrm(3, 2, 2));
        }
        let digit = if signed { 7 } else { 6 };
        self.op_reg_reg(None, w, &[0xf7], digit, enc(src), false);
        let result = if matches!(op, AluOp::ModuloSigned | AluOp::ModuloUnsigned) {
            regs::RDX
        } else {
            regs::RAX
        };
        if dst != result {
            self.mov_int_reg_reg(dst, result, bits);
        }
    }

    /// Shift or rotate `dst` by a register count. The count travels in
    /// `cl`, so `rcx` is moved into if the source is anywhere else.
    fn int_shift_by_reg(&mut self, dst: MicroReg, src: MicroReg, op: AluOp, bits: OpBits) {
        assert!(dst != regs::RCX, "shift destination cannot be rcx");
        if src != regs::RCX {
            self.mov_int_reg_reg(regs::RCX, src, OpBits::B64);
        }
        let digit = shift_digit(op).unwrap();
        let dst = enc(dst);
        let force = bits == OpBits::B8 && byte_reg_needs_rex(dst);
        let opcode: &[u8] = if bits == OpBits::B8 { &[0xd2] } else { &[0xd3] };
        self.op_reg_reg(
            Self::operand_size_prefix(bits),
            bits == OpBits::B64,
            opcode,
            digit,
            dst,
            force,
        );
    }
}

impl Default for X64Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for X64Encoder {
    fn current_offset(&self) -> CodeOffset {
        self.buf.len() as CodeOffset
    }

    fn size(&self) -> usize {
        self.buf.len()
    }

    fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn copy_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.buf);
    }

    fn stack_pointer_reg(&self) -> MicroReg {
        regs::RSP
    }

    fn format_register_name(&self, reg: MicroReg, bits: OpBits) -> String {
        regs::name(reg, bits)
    }

    fn update_reg_use_def(&self, inst: &MicroInst, ops: &[MicroOperand], info: &mut UseDef) {
        match inst.op {
            MicroOpcode::OpBinaryRegReg | MicroOpcode::OpBinaryRegImm
            | MicroOpcode::OpBinaryRegMem => {
                let op = match inst.op {
                    MicroOpcode::OpBinaryRegImm => ops[2].alu_op(),
                    _ => ops[3].alu_op(),
                };
                if is_divide_or_modulo(op) {
                    info.uses.push(regs::RAX);
                    info.defs.push(regs::RAX);
                    info.defs.push(regs::RDX);
                } else if is_shift_or_rotate(op) && inst.op == MicroOpcode::OpBinaryRegReg {
                    // The count is shuttled through cl.
                    info.defs.push(regs::RCX);
                } else if op == AluOp::CompareExchange {
                    info.uses.push(regs::RAX);
                    info.defs.push(regs::RAX);
                } else if op == AluOp::ConvertUIntToFloat64 {
                    // The source is zero-extended in place.
                    if inst.op == MicroOpcode::OpBinaryRegReg {
                        info.defs.push(ops[1].reg());
                    }
                }
            }
            MicroOpcode::OpBinaryMemReg => {
                if ops[3].alu_op() == AluOp::CompareExchange {
                    info.uses.push(regs::RAX);
                    info.defs.push(regs::RAX);
                }
            }
            MicroOpcode::OpTernaryRegRegReg => {
                if ops[4].alu_op() == AluOp::MultiplyAdd {
                    // The product is built in the first source.
                    info.defs.push(ops[1].reg());
                }
            }
            MicroOpcode::CmpRegReg | MicroOpcode::CmpRegImm | MicroOpcode::CmpRegZero
            | MicroOpcode::CmpMemReg | MicroOpcode::CmpMemImm => {
                info.defs.push(MicroReg::flags());
            }
            MicroOpcode::SetCondReg | MicroOpcode::LoadCondRegReg | MicroOpcode::JumpCond
            | MicroOpcode::JumpCondImm => {
                info.uses.push(MicroReg::flags());
            }
            MicroOpcode::CallLocal | MicroOpcode::CallExtern | MicroOpcode::CallIndirect => {
                info.defs.push(regs::RAX);
                info.defs.push(regs::XMM0);
            }
            _ => {}
        }
    }

    fn query_conformance_issue(
        &self,
        inst: &MicroInst,
        ops: &[MicroOperand],
    ) -> Option<ConformanceIssue> {
        match inst.op {
            MicroOpcode::OpBinaryRegImm => {
                let bits = ops[1].bits();
                let op = ops[2].alu_op();
                let value = ops[3].u64();
                if is_divide_or_modulo(op) || op == AluOp::Exchange || op == AluOp::CompareExchange
                {
                    return Some(ConformanceIssue::NoImmediateForm);
                }
                if is_shift_or_rotate(op) {
                    return None;
                }
                if bits == OpBits::B64 && !low32_will_sign_extend_to_64(value) {
                    return Some(ConformanceIssue::ImmediateTooWide);
                }
                None
            }
            MicroOpcode::OpBinaryMemImm => {
                let bits = ops[1].bits();
                let op = ops[2].alu_op();
                let value = ops[4].u64();
                if is_shift_or_rotate(op) {
                    return None;
                }
                if bits == OpBits::B64 && !low32_will_sign_extend_to_64(value) {
                    return Some(ConformanceIssue::ImmediateTooWide);
                }
                None
            }
            MicroOpcode::CmpMemImm => {
                let bits = ops[1].bits();
                let value = ops[3].u64();
                if bits == OpBits::B64 && !low32_will_sign_extend_to_64(value) {
                    return Some(ConformanceIssue::ImmediateTooWide);
                }
                None
            }
            MicroOpcode::CmpRegImm => {
                let bits = ops[1].bits();
                let value = ops[2].u64();
                if bits == OpBits::B64 && !low32_will_sign_extend_to_64(value) {
                    return Some(ConformanceIssue::ImmediateTooWide);
                }
                None
            }
            MicroOpcode::LoadMemImm => {
                let bits = ops[1].bits();
                let value = ops[3].u64();
                if bits == OpBits::B64 && !low32_will_sign_extend_to_64(value) {
                    return Some(ConformanceIssue::ImmediateTooWide);
                }
                None
            }
            MicroOpcode::OpBinaryRegReg => {
                if ops[3].alu_op() == AluOp::ConvertUIntToFloat64 && ops[2].bits() == OpBits::B64 {
                    return Some(ConformanceIssue::UnsignedConvertTooWide);
                }
                None
            }
            _ => None,
        }
    }

    fn encode_push(&mut self, reg: MicroReg, _flags: EmitFlags) {
        assert!(reg.is_int(), "push is integer-only");
        let r = enc(reg);
        self.rex(false, 0, 0, r, false);
        self.put1(0x50 + (r & 7));
    }

    fn encode_pop(&mut self, reg: MicroReg, _flags: EmitFlags) {
        assert!(reg.is_int(), "pop is integer-only");
        let r = enc(reg);
        self.rex(false, 0, 0, r, false);
        self.put1(0x58 + (r & 7));
    }

    fn encode_nop(&mut self, _flags: EmitFlags) {
        self.put1(0x90);
    }

    fn encode_ret(&mut self, _flags: EmitFlags) {
        self.put1(0xc3);
    }

    fn encode_call_local(&mut self, _conv: CallConvKind, _flags: EmitFlags) -> CodeOffset {
        self.put1(0xe8);
        let at = self.current_offset();
        self.put4(0);
        at
    }

    fn encode_call_extern(&mut self, conv: CallConvKind, flags: EmitFlags) -> CodeOffset {
        // Same near-call form; the relocation kind is the caller's concern.
        self.encode_call_local(conv, flags)
    }

    fn encode_call_reg(&mut self, reg: MicroReg, _conv: CallConvKind, _flags: EmitFlags) {
        let r = enc(reg);
        self.rex(false, 0, 0, r, false);
        self.put1(0xff);
        self.put1(modrm(3, 2, r));
    }

    fn encode_jump_table(
        &mut self,
        table: MicroReg,
        index: MicroReg,
        num_entries: u32,
        _flags: EmitFlags,
    ) {
        debug_assert!(num_entries > 0);
        assert!(table.is_int() && index.is_int());
        // movsxd index, dword [table + index*4]
        let idx = enc(index);
        self.op_mem(
            None,
            true,
            &[0x63],
            idx,
            Mem::amc(table, index, 4, 0),
            false,
        );
        // add table, index
        self.op_reg_reg(None, true, &[0x01], idx, enc(table), false);
        // jmp table
        self.encode_jump_reg(table, EmitFlags::ZERO);
    }

    fn encode_jump(&mut self, cond: Cond, bits: OpBits, _flags: EmitFlags) -> MicroJump {
        assert!(
            bits == OpBits::B8 || bits == OpBits::B32,
            "jump displacements are 8- or 32-bit, got {bits}"
        );
        match (cond, bits) {
            (Cond::Unconditional, OpBits::B8) => self.put1(0xeb),
            (Cond::Unconditional, _) => self.put1(0xe9),
            (cond, OpBits::B8) => self.put1(0x70 + cc(cond)),
            (cond, _) => {
                self.put1(0x0f);
                self.put1(0x80 + cc(cond));
            }
        }
        let patch_at = self.current_offset();
        if bits == OpBits::B8 {
            self.put1(0);
        } else {
            self.put4(0);
        }
        MicroJump {
            patch_at,
            from: self.current_offset(),
            bits: Some(bits),
        }
    }

    fn encode_patch_jump(&mut self, jump: &MicroJump, dest: u64) {
        let bits = jump.bits.expect("patching an unrecorded jump");
        let disp = dest as i64 - i64::from(jump.from);
        let at = jump.patch_at as usize;
        match bits {
            OpBits::B8 => {
                let disp = i8::try_from(disp)
                    .unwrap_or_else(|_| panic!("jump displacement {disp} overflows 8 bits"));
                self.buf[at] = disp as u8;
            }
            _ => {
                let disp = i32::try_from(disp)
                    .unwrap_or_else(|_| panic!("jump displacement {disp} overflows 32 bits"));
                self.buf[at..at + 4].copy_from_slice(&disp.to_le_bytes());
            }
        }
    }

    fn encode_patch_jump_here(&mut self, jump: &MicroJump) {
        self.encode_patch_jump(jump, u64::from(self.current_offset()));
    }

    fn encode_jump_reg(&mut self, reg: MicroReg, _flags: EmitFlags) {
        let r = enc(reg);
        self.rex(false, 0, 0, r, false);
        self.put1(0xff);
        self.put1(modrm(3, 4, r));
    }

    fn encode_load_symbol_reloc_addr(&mut self, reg: MicroReg, _flags: EmitFlags) -> CodeOffset {
        // movabs reg, imm64 with the immediate patched by the relocation.
        assert!(reg.is_int());
        let r = enc(reg);
        self.rex(true, 0, 0, r, false);
        self.put1(0xb8 + (r & 7));
        let at = self.current_offset();
        self.put8(0);
        at
    }

    fn encode_load_symbol_reloc_value(
        &mut self,
        reg: MicroReg,
        bits: OpBits,
        flags: EmitFlags,
    ) -> CodeOffset {
        let _ = flags;
        if reg.is_float() {
            let prefix = Self::sse_scalar_prefix(bits);
            return self.op_riprel(Some(prefix), false, &[0x0f, 0x10], enc(reg));
        }
        let opcode: &[u8] = if bits == OpBits::B8 { &[0x8a] } else { &[0x8b] };
        if bits == OpBits::B16 {
            self.put1(0x66);
        }
        self.op_riprel(None, bits == OpBits::B64, opcode, enc(reg))
    }

    fn encode_load_reg_reg(&mut self, dst: MicroReg, src: MicroReg, bits: OpBits, _flags: EmitFlags) {
        match (dst.is_float(), src.is_float()) {
            (false, false) => self.mov_int_reg_reg(dst, src, bits),
            (true, true) => {
                if bits == OpBits::B128 {
                    // movaps
                    self.op_reg_reg(None, false, &[0x0f, 0x28], enc(dst), enc(src), false);
                } else {
                    let prefix = Self::sse_scalar_prefix(bits);
                    self.op_reg_reg(Some(prefix), false, &[0x0f, 0x10], enc(dst), enc(src), false);
                }
            }
            (true, false) => {
                // movd/movq xmm, r
                self.op_reg_reg(
                    Some(0x66),
                    bits == OpBits::B64,
                    &[0x0f, 0x6e],
                    enc(dst),
                    enc(src),
                    false,
                );
            }
            (false, true) => {
                // movd/movq r, xmm
                self.op_reg_reg(
                    Some(0x66),
                    bits == OpBits::B64,
                    &[0x0f, 0x7e],
                    enc(src),
                    enc(dst),
                    false,
                );
            }
        }
    }

    fn encode_load_reg_imm(&mut self, reg: MicroReg, value: u64, bits: OpBits, _flags: EmitFlags) {
        assert!(reg.is_int(), "immediates load into integer registers");
        let r = enc(reg);
        match bits {
            OpBits::B8 => {
                self.rex(false, 0, 0, r, byte_reg_needs_rex(r));
                self.put1(0xb0 + (r & 7));
                self.put1(value as u8);
            }
            OpBits::B16 => {
                self.put1(0x66);
                self.rex(false, 0, 0, r, false);
                self.put1(0xb8 + (r & 7));
                self.put2(value as u16);
            }
            OpBits::B32 => {
                self.rex(false, 0, 0, r, false);
                self.put1(0xb8 + (r & 7));
                self.put4(value as u32);
            }
            OpBits::B64 => {
                if u32::try_from(value).is_ok() {
                    // The 32-bit form zero-extends.
                    self.rex(false, 0, 0, r, false);
                    self.put1(0xb8 + (r & 7));
                    self.put4(value as u32);
                } else {
                    self.rex(true, 0, 0, r, false);
                    self.put1(0xb8 + (r & 7));
                    self.put8(value);
                }
            }
            OpBits::B128 => panic!("no 128-bit immediates"),
        }
    }

    fn encode_load_reg_mem(
        &mut self,
        reg: MicroReg,
        mem: MicroReg,
        offset: i64,
        bits: OpBits,
        _flags: EmitFlags,
    ) {
        let m = Mem::base_disp(mem, offset);
        if reg.is_float() {
            if bits == OpBits::B128 {
                self.op_mem(None, false, &[0x0f, 0x10], enc(reg), m, false);
            } else {
                let prefix = Self::sse_scalar_prefix(bits);
                self.op_mem(Some(prefix), false, &[0x0f, 0x10], enc(reg), m, false);
            }
            return;
        }
        let r = enc(reg);
        let force = bits == OpBits::B8 && byte_reg_needs_rex(r);
        let opcode: &[u8] = if bits == OpBits::B8 { &[0x8a] } else { &[0x8b] };
        self.op_mem(
            Self::operand_size_prefix(bits),
            bits == OpBits::B64,
            opcode,
            r,
            m,
            force,
        );
    }

    fn encode_load_mem_reg(
        &mut self,
        mem: MicroReg,
        offset: i64,
        src: MicroReg,
        bits: OpBits,
        _flags: EmitFlags,
    ) {
        let m = Mem::base_disp(mem, offset);
        if src.is_float() {
            if bits == OpBits::B128 {
                self.op_mem(None, false, &[0x0f, 0x11], enc(src), m, false);
            } else {
                let prefix = Self::sse_scalar_prefix(bits);
                self.op_mem(Some(prefix), false, &[0x0f, 0x11], enc(src), m, false);
            }
            return;
        }
        let r = enc(src);
        let force = bits == OpBits::B8 && byte_reg_needs_rex(r);
        let opcode: &[u8] = if bits == OpBits::B8 { &[0x88] } else { &[0x89] };
        self.op_mem(
            Self::operand_size_prefix(bits),
            bits == OpBits::B64,
            opcode,
            r,
            m,
            force,
        );
    }

    fn encode_load_mem_imm(
        &mut self,
        mem: MicroReg,
        offset: i64,
        value: u64,
        bits: OpBits,
        _flags: EmitFlags,
    ) {
        let m = Mem::base_disp(mem, offset);
        let opcode: &[u8] = if bits == OpBits::B8 { &[0xc6] } else { &[0xc7] };
        self.op_mem(
            Self::operand_size_prefix(bits),
            bits == OpBits::B64,
            opcode,
            0,
            m,
            false,
        );
        self.put_imm(value, bits);
    }

    fn encode_load_signed_ext_reg_mem(
        &mut self,
        reg: MicroReg,
        mem: MicroReg,
        offset: i64,
        dst_bits: OpBits,
        src_bits: OpBits,
        _flags: EmitFlags,
    ) {
        assert!(dst_bits.num_bits() > src_bits.num_bits());
        let m = Mem::base_disp(mem, offset);
        let r = enc(reg);
        let w = dst_bits == OpBits::B64;
        match src_bits {
            OpBits::B8 => self.op_mem(Self::operand_size_prefix(dst_bits), w, &[0x0f, 0xbe], r, m, false),
            OpBits::B16 => self.op_mem(None, w, &[0x0f, 0xbf], r, m, false),
            OpBits::B32 => self.op_mem(None, true, &[0x63], r, m, false),
            _ => panic!("cannot sign-extend from {src_bits}"),
        }
    }

    fn encode_load_signed_ext_reg_reg(
        &mut self,
        dst: MicroReg,
        src: MicroReg,
        dst_bits: OpBits,
        src_bits: OpBits,
        _flags: EmitFlags,
    ) {
        assert!(dst_bits.num_bits() > src_bits.num_bits());
        let (d, s) = (enc(dst), enc(src));
        let w = dst_bits == OpBits::B64;
        match src_bits {
            OpBits::B8 => {
                let force = byte_reg_needs_rex(s);
                self.op_reg_reg(Self::operand_size_prefix(dst_bits), w, &[0x0f, 0xbe], d, s, force);
            }
            OpBits::B16 => self.op_reg_reg(None, w, &[0x0f, 0xbf], d, s, false),
            OpBits::B32 => self.op_reg_reg(None, true, &[0x63], d, s, false),
            _ => panic!("cannot sign-extend from {src_bits}"),
        }
    }

    fn encode_load_zero_ext_reg_mem(
        &mut self,
        reg: MicroReg,
        mem: MicroReg,
        offset: i64,
        dst_bits: OpBits,
        src_bits: OpBits,
        _flags: EmitFlags,
    ) {
        assert!(dst_bits.num_bits() > src_bits.num_bits());
        let m = Mem::base_disp(mem, offset);
        let r = enc(reg);
        let w = dst_bits == OpBits::B64;
        match src_bits {
            OpBits::B8 => self.op_mem(Self::operand_size_prefix(dst_bits), w, &[0x0f, 0xb6], r, m, false),
            OpBits::B16 => self.op_mem(None, w, &[0x0f, 0xb7], r, m, false),
            // A plain 32-bit load zero-extends to 64 bits.
            OpBits::B32 => self.op_mem(None, false, &[0x8b], r, m, false),
            _ => panic!("cannot zero-extend from {src_bits}"),
        }
    }

    fn encode_load_zero_ext_reg_reg(
        &mut self,
        dst: MicroReg,
        src: MicroReg,
        dst_bits: OpBits,
        src_bits: OpBits,
        _flags: EmitFlags,
    ) {
        assert!(dst_bits.num_bits() > src_bits.num_bits());
        let (d, s) = (enc(dst), enc(src));
        let w = dst_bits == OpBits::B64;
        match src_bits {
            OpBits::B8 => {
                let force = byte_reg_needs_rex(s);
                self.op_reg_reg(Self::operand_size_prefix(dst_bits), w, &[0x0f, 0xb6], d, s, force);
            }
            OpBits::B16 => self.op_reg_reg(None, w, &[0x0f, 0xb7], d, s, false),
            OpBits::B32 => self.op_reg_reg(None, false, &[0x89], s, d, false),
            _ => panic!("cannot zero-extend from {src_bits}"),
        }
    }

    fn encode_load_addr_reg_mem(
        &mut self,
        reg: MicroReg,
        mem: MicroReg,
        offset: i64,
        bits: OpBits,
        _flags: EmitFlags,
    ) {
        assert!(bits == OpBits::B32 || bits == OpBits::B64);
        self.op_mem(
            None,
            bits == OpBits::B64,
            &[0x8d],
            enc(reg),
            Mem::base_disp(mem, offset),
            false,
        );
    }

    fn encode_load_amc_reg_mem(
        &mut self,
        dst: MicroReg,
        _dst_bits: OpBits,
        base: MicroReg,
        index: MicroReg,
        scale: u64,
        disp: i64,
        src_bits: OpBits,
        _flags: EmitFlags,
    ) {
        let m = Mem::amc(base, index, scale, disp);
        if dst.is_float() {
            let prefix = Self::sse_scalar_prefix(src_bits);
            self.op_mem(Some(prefix), false, &[0x0f, 0x10], enc(dst), m, false);
            return;
        }
        let r = enc(dst);
        let force = src_bits == OpBits::B8 && byte_reg_needs_rex(r);
        let opcode: &[u8] = if src_bits == OpBits::B8 { &[0x8a] } else { &[0x8b] };
        self.op_mem(
            Self::operand_size_prefix(src_bits),
            src_bits == OpBits::B64,
            opcode,
            r,
            m,
            force,
        );
    }

    fn encode_load_amc_mem_reg(
        &mut self,
        base: MicroReg,
        index: MicroReg,
        scale: u64,
        disp: i64,
        src: MicroReg,
        src_bits: OpBits,
        _flags: EmitFlags,
    ) {
        let m = Mem::amc(base, index, scale, disp);
        if src.is_float() {
            let prefix = Self::sse_scalar_prefix(src_bits);
            self.op_mem(Some(prefix), false, &[0x0f, 0x11], enc(src), m, false);
            return;
        }
        let r = enc(src);
        let force = src_bits == OpBits::B8 && byte_reg_needs_rex(r);
        let opcode: &[u8] = if src_bits == OpBits::B8 { &[0x88] } else { &[0x89] };
        self.op_mem(
            Self::operand_size_prefix(src_bits),
            src_bits == OpBits::B64,
            opcode,
            r,
            m,
            force,
        );
    }

    fn encode_load_amc_mem_imm(
        &mut self,
        base: MicroReg,
        index: MicroReg,
        scale: u64,
        disp: i64,
        value: u64,
        val_bits: OpBits,
        _flags: EmitFlags,
    ) {
        let m = Mem::amc(base, index, scale, disp);
        let opcode: &[u8] = if val_bits == OpBits::B8 { &[0xc6] } else { &[0xc7] };
        self.op_mem(
            Self::operand_size_prefix(val_bits),
            val_bits == OpBits::B64,
            opcode,
            0,
            m,
            false,
        );
        self.put_imm(value, val_bits);
    }

    fn encode_load_addr_amc_reg_mem(
        &mut self,
        dst: MicroReg,
        base: MicroReg,
        index: MicroReg,
        scale: u64,
        disp: i64,
        _flags: EmitFlags,
    ) {
        self.op_mem(
            None,
            true,
            &[0x8d],
            enc(dst),
            Mem::amc(base, index, scale, disp),
            false,
        );
    }

    fn encode_cmp_reg_reg(&mut self, a: MicroReg, b: MicroReg, bits: OpBits, _flags: EmitFlags) {
        if a.is_float() {
            assert!(b.is_float());
            // ucomiss/ucomisd
            let prefix = if bits == OpBits::B64 { Some(0x66) } else { None };
            self.op_reg_reg(prefix, false, &[0x0f, 0x2e], enc(a), enc(b), false);
            return;
        }
        let (ea, eb) = (enc(a), enc(b));
        let force = bits == OpBits::B8 && (byte_reg_needs_rex(ea) || byte_reg_needs_rex(eb));
        let opcode: &[u8] = if bits == OpBits::B8 { &[0x38] } else { &[0x39] };
        self.op_reg_reg(
            Self::operand_size_prefix(bits),
            bits == OpBits::B64,
            opcode,
            eb,
            ea,
            force,
        );
    }

    fn encode_cmp_reg_imm(&mut self, reg: MicroReg, value: u64, bits: OpBits, _flags: EmitFlags) {
        assert!(reg.is_int());
        let r = enc(reg);
        let force = bits == OpBits::B8 && byte_reg_needs_rex(r);
        if bits == OpBits::B8 {
            self.op_reg_reg(None, false, &[0x80], 7, r, force);
            self.put1(value as u8);
        } else if low8_will_sign_extend(value, bits) {
            self.op_reg_reg(
                Self::operand_size_prefix(bits),
                bits == OpBits::B64,
                &[0x83],
                7,
                r,
                false,
            );
            self.put1(value as u8);
        } else {
            self.op_reg_reg(
                Self::operand_size_prefix(bits),
                bits == OpBits::B64,
                &[0x81],
                7,
                r,
                false,
            );
            match bits {
                OpBits::B16 => self.put2(value as u16),
                _ => self.put_imm(value, bits),
            }
        }
    }

    fn encode_cmp_reg_zero(&mut self, reg: MicroReg, bits: OpBits, _flags: EmitFlags) {
        assert!(reg.is_int());
        let r = enc(reg);
        let force = bits == OpBits::B8 && byte_reg_needs_rex(r);
        let opcode: &[u8] = if bits == OpBits::B8 { &[0x84] } else { &[0x85] };
        self.op_reg_reg(
            Self::operand_size_prefix(bits),
            bits == OpBits::B64,
            opcode,
            r,
            r,
            force,
        );
    }

    fn encode_cmp_mem_reg(
        &mut self,
        mem: MicroReg,
        offset: i64,
        reg: MicroReg,
        bits: OpBits,
        _flags: EmitFlags,
    ) {
        let r = enc(reg);
        let force = bits == OpBits::B8 && byte_reg_needs_rex(r);
        let opcode: &[u8] = if bits == OpBits::B8 { &[0x38] } else { &[0x39] };
        self.op_mem(
            Self::operand_size_prefix(bits),
            bits == OpBits::B64,
            opcode,
            r,
            Mem::base_disp(mem, offset),
            force,
        );
    }

    fn encode_cmp_mem_imm(
        &mut self,
        mem: MicroReg,
        offset: i64,
        value: u64,
        bits: OpBits,
        _flags: EmitFlags,
    ) {
        let m = Mem::base_disp(mem, offset);
        if bits == OpBits::B8 {
            self.op_mem(None, false, &[0x80], 7, m, false);
            self.put1(value as u8);
        } else if low8_will_sign_extend(value, bits) {
            self.op_mem(
                Self::operand_size_prefix(bits),
                bits == OpBits::B64,
                &[0x83],
                7,
                m,
                false,
            );
            self.put1(value as u8);
        } else {
            self.op_mem(
                Self::operand_size_prefix(bits),
                bits == OpBits::B64,
                &[0x81],
                7,
                m,
                false,
            );
            self.put_imm(value, bits);
        }
    }

    fn encode_set_cond_reg(&mut self, reg: MicroReg, cond: Cond, _flags: EmitFlags) {
        assert!(reg.is_int());
        let r = enc(reg);
        self.op_reg_reg(
            None,
            false,
            &[0x0f, 0x90 + cc(cond)],
            0,
            r,
            byte_reg_needs_rex(r),
        );
    }

    fn encode_load_cond_reg_reg(
        &mut self,
        dst: MicroReg,
        src: MicroReg,
        cond: Cond,
        bits: OpBits,
        _flags: EmitFlags,
    ) {
        assert!(dst.is_int() && src.is_int());
        assert!(bits != OpBits::B8, "cmov has no 8-bit form");
        self.op_reg_reg(
            Self::operand_size_prefix(bits),
            bits == OpBits::B64,
            &[0x0f, 0x40 + cc(cond)],
            enc(dst),
            enc(src),
            false,
        );
    }

    fn encode_clear_reg(&mut self, reg: MicroReg, bits: OpBits, _flags: EmitFlags) {
        if reg.is_float() {
            // xorps reg, reg
            self.op_reg_reg(None, false, &[0x0f, 0x57], enc(reg), enc(reg), false);
            return;
        }
        let r = enc(reg);
        match bits {
            OpBits::B8 => {
                self.op_reg_reg(None, false, &[0x30], r, r, byte_reg_needs_rex(r));
            }
            OpBits::B16 => self.op_reg_reg(Some(0x66), false, &[0x31], r, r, false),
            // The 32-bit form clears the whole register.
            _ => self.op_reg_reg(None, false, &[0x31], r, r, false),
        }
    }

    fn encode_op_unary_mem(
        &mut self,
        mem: MicroReg,
        offset: i64,
        op: AluOp,
        bits: OpBits,
        _flags: EmitFlags,
    ) {
        let digit = match op {
            AluOp::BitwiseNot => 2,
            AluOp::Negate => 3,
            _ => panic!("unary op {op:?} has no memory form"),
        };
        let m = Mem::base_disp(mem, offset);
        let opcode: &[u8] = if bits == OpBits::B8 { &[0xf6] } else { &[0xf7] };
        self.op_mem(
            Self::operand_size_prefix(bits),
            bits == OpBits::B64,
            opcode,
            digit,
            m,
            false,
        );
    }

    fn encode_op_unary_reg(&mut self, reg: MicroReg, op: AluOp, bits: OpBits, _flags: EmitFlags) {
        match op {
            AluOp::BitwiseNot | AluOp::Negate => {
                assert!(reg.is_int());
                let digit = if op == AluOp::BitwiseNot { 2 } else { 3 };
                let r = enc(reg);
                let force = bits == OpBits::B8 && byte_reg_needs_rex(r);
                let opcode: &[u8] = if bits == OpBits::B8 { &[0xf6] } else { &[0xf7] };
                self.op_reg_reg(
                    Self::operand_size_prefix(bits),
                    bits == OpBits::B64,
                    opcode,
                    digit,
                    r,
                    force,
                );
            }
            AluOp::ByteSwap => {
                assert!(reg.is_int());
                assert!(bits == OpBits::B32 || bits == OpBits::B64);
                let r = enc(reg);
                self.rex(bits == OpBits::B64, 0, 0, r, false);
                self.put1(0x0f);
                self.put1(0xc8 + (r & 7));
            }
            AluOp::FloatSqrt => {
                assert!(reg.is_float());
                let prefix = Self::sse_scalar_prefix(bits);
                self.op_reg_reg(Some(prefix), false, &[0x0f, 0x51], enc(reg), enc(reg), false);
            }
            _ => panic!("unary op {op:?} is not encodable"),
        }
    }

    fn encode_op_binary_reg_reg(
        &mut self,
        dst: MicroReg,
        src: MicroReg,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) {
        // Float and conversion forms first; everything else is integer.
        if let Some(opc) = sse_scalar_opcode(op) {
            assert!(dst.is_float() && src.is_float());
            let prefix = Self::sse_scalar_prefix(bits);
            self.op_reg_reg(Some(prefix), false, &[0x0f, opc], enc(dst), enc(src), false);
            return;
        }
        if let Some(opc) = sse_bitwise_opcode(op) {
            assert!(dst.is_float() && src.is_float());
            let prefix = if bits == OpBits::B64 { Some(0x66) } else { None };
            self.op_reg_reg(prefix, false, &[0x0f, opc], enc(dst), enc(src), false);
            return;
        }
        match op {
            AluOp::ConvertIntToFloat => {
                // cvtsi2ss/cvtsi2sd from a 64-bit integer source.
                assert!(dst.is_float() && src.is_int());
                let prefix = Self::sse_scalar_prefix(bits);
                self.op_reg_reg(Some(prefix), true, &[0x0f, 0x2a], enc(dst), enc(src), false);
                return;
            }
            AluOp::ConvertFloatToInt => {
                // Truncating cvttss2si/cvttsd2si into a 64-bit integer.
                assert!(dst.is_int() && src.is_float());
                let prefix = Self::sse_scalar_prefix(bits);
                self.op_reg_reg(Some(prefix), true, &[0x0f, 0x2c], enc(dst), enc(src), false);
                return;
            }
            AluOp::ConvertFloatToFloat => {
                assert!(dst.is_float() && src.is_float());
                let prefix = Self::sse_scalar_prefix(bits);
                self.op_reg_reg(Some(prefix), false, &[0x0f, 0x5a], enc(dst), enc(src), false);
                return;
            }
            AluOp::ConvertUIntToFloat64 => {
                assert!(dst.is_float() && src.is_int());
                // Normalize the source in place, then convert the
                // zero-extended 64-bit value.
                match bits {
                    OpBits::B8 => self.encode_load_zero_ext_reg_reg(
                        src,
                        src,
                        OpBits::B64,
                        OpBits::B8,
                        flags,
                    ),
                    OpBits::B16 => self.encode_load_zero_ext_reg_reg(
                        src,
                        src,
                        OpBits::B64,
                        OpBits::B16,
                        flags,
                    ),
                    OpBits::B32 => self.mov_int_reg_reg(src, src, OpBits::B32),
                    _ => panic!("64-bit unsigned conversion requires a runtime helper"),
                }
                self.op_reg_reg(Some(0xf2), true, &[0x0f, 0x2a], enc(dst), enc(src), false);
                return;
            }
            _ => {}
        }
        assert!(dst.is_int() && src.is_int(), "integer op on {dst:?}, {src:?}");
        if let Some((opc8, opc)) = alu_mr_opcode(op) {
            let (d, s) = (enc(dst), enc(src));
            let force = bits == OpBits::B8 && (byte_reg_needs_rex(d) || byte_reg_needs_rex(s));
            let opcode: &[u8] = if bits == OpBits::B8 { &[opc8] } else { &[opc] };
            self.op_reg_reg(
                Self::operand_size_prefix(bits),
                bits == OpBits::B64,
                opcode,
                s,
                d,
                force,
            );
            return;
        }
        match op {
            AluOp::MultiplySigned | AluOp::MultiplyUnsigned => {
                // Two-operand imul computes the low half, which is the
                // same for both signednesses.
                assert!(bits != OpBits::B8);
                self.op_reg_reg(
                    Self::operand_size_prefix(bits),
                    bits == OpBits::B64,
                    &[0x0f, 0xaf],
                    enc(dst),
                    enc(src),
                    false,
                );
            }
            AluOp::DivideSigned | AluOp::DivideUnsigned | AluOp::ModuloSigned
            | AluOp::ModuloUnsigned => self.int_divide(dst, src, op, bits),
            AluOp::ShiftLeft | AluOp::ShiftRight | AluOp::ShiftArithmeticLeft
            | AluOp::ShiftArithmeticRight | AluOp::RotateLeft | AluOp::RotateRight => {
                self.int_shift_by_reg(dst, src, op, bits)
            }
            AluOp::Exchange => {
                let (d, s) = (enc(dst), enc(src));
                let force = bits == OpBits::B8 && (byte_reg_needs_rex(d) || byte_reg_needs_rex(s));
                let opcode: &[u8] = if bits == OpBits::B8 { &[0x86] } else { &[0x87] };
                self.op_reg_reg(
                    Self::operand_size_prefix(bits),
                    bits == OpBits::B64,
                    opcode,
                    s,
                    d,
                    force,
                );
            }
            AluOp::CompareExchange => {
                let (d, s) = (enc(dst), enc(src));
                let opcode: &[u8] = if bits == OpBits::B8 {
                    &[0x0f, 0xb0]
                } else {
                    &[0x0f, 0xb1]
                };
                self.op_reg_reg(
                    Self::operand_size_prefix(bits),
                    bits == OpBits::B64,
                    opcode,
                    s,
                    d,
                    false,
                );
            }
            AluOp::BitScanForward => {
                self.op_reg_reg(
                    Self::operand_size_prefix(bits),
                    bits == OpBits::B64,
                    &[0x0f, 0xbc],
                    enc(dst),
                    enc(src),
                    false,
                );
            }
            AluOp::BitScanReverse => {
                self.op_reg_reg(
                    Self::operand_size_prefix(bits),
                    bits == OpBits::B64,
                    &[0x0f, 0xbd],
                    enc(dst),
                    enc(src),
                    false,
                );
            }
            AluOp::PopCount => {
                if let Some(p) = Self::operand_size_prefix(bits) {
                    self.put1(p);
                }
                self.put1(0xf3);
                self.rex(bits == OpBits::B64, enc(dst), 0, enc(src), false);
                self.buf.extend_from_slice(&[0x0f, 0xb8]);
                self.put1(modrm(3, enc(dst), enc(src)));
            }
            AluOp::LoadEffectiveAddress => {
                panic!("address computations use the dedicated load-address forms")
            }
            _ => panic!("binary op {op:?} is not encodable register-register"),
        }
    }

    fn encode_op_binary_reg_imm(
        &mut self,
        reg: MicroReg,
        value: u64,
        op: AluOp,
        bits: OpBits,
        _flags: EmitFlags,
    ) {
        assert!(reg.is_int());
        let r = enc(reg);
        if let Some(digit) = shift_digit(op) {
            let force = bits == OpBits::B8 && byte_reg_needs_rex(r);
            let opcode: &[u8] = if bits == OpBits::B8 { &[0xc0] } else { &[0xc1] };
            self.op_reg_reg(
                Self::operand_size_prefix(bits),
                bits == OpBits::B64,
                opcode,
                digit,
                r,
                force,
            );
            self.put1(value as u8);
            return;
        }
        if let Some(digit) = alu_imm_digit(op) {
            let force = bits == OpBits::B8 && byte_reg_needs_rex(r);
            if bits == OpBits::B8 {
                self.op_reg_reg(None, false, &[0x80], digit, r, force);
                self.put1(value as u8);
            } else if low8_will_sign_extend(value, bits) {
                self.op_reg_reg(
                    Self::operand_size_prefix(bits),
                    bits == OpBits::B64,
                    &[0x83],
                    digit,
                    r,
                    false,
                );
                self.put1(value as u8);
            } else {
                self.op_reg_reg(
                    Self::operand_size_prefix(bits),
                    bits == OpBits::B64,
                    &[0x81],
                    digit,
                    r,
                    false,
                );
                self.put_imm(value, bits);
            }
            return;
        }
        match op {
            AluOp::MultiplySigned | AluOp::MultiplyUnsigned => {
                assert!(bits != OpBits::B8);
                if low8_will_sign_extend(value, bits) {
                    self.op_reg_reg(
                        Self::operand_size_prefix(bits),
                        bits == OpBits::B64,
                        &[0x6b],
                        r,
                        r,
                        false,
                    );
                    self.put1(value as u8);
                } else {
                    self.op_reg_reg(
                        Self::operand_size_prefix(bits),
                        bits == OpBits::B64,
                        &[0x69],
                        r,
                        r,
                        false,
                    );
                    self.put_imm(value, bits);
                }
            }
            _ => panic!("binary op {op:?} has no immediate form"),
        }
    }

    fn encode_op_binary_reg_mem(
        &mut self,
        dst: MicroReg,
        mem: MicroReg,
        offset: i64,
        op: AluOp,
        bits: OpBits,
        _flags: EmitFlags,
    ) {
        let m = Mem::base_disp(mem, offset);
        if let Some(opc) = sse_scalar_opcode(op) {
            assert!(dst.is_float());
            let prefix = Self::sse_scalar_prefix(bits);
            self.op_mem(Some(prefix), false, &[0x0f, opc], enc(dst), m, false);
            return;
        }
        if let Some((opc8, opc)) = alu_mr_opcode(op) {
            // Memory-source direction: opcode + 2.
            let r = enc(dst);
            let force = bits == OpBits::B8 && byte_reg_needs_rex(r);
            let opcode: &[u8] = if bits == OpBits::B8 {
                &[opc8 + 2]
            } else {
                &[opc + 2]
            };
            self.op_mem(
                Self::operand_size_prefix(bits),
                bits == OpBits::B64,
                opcode,
                r,
                m,
                force,
            );
            return;
        }
        match op {
            AluOp::MultiplySigned | AluOp::MultiplyUnsigned => {
                assert!(bits != OpBits::B8);
                self.op_mem(
                    Self::operand_size_prefix(bits),
                    bits == OpBits::B64,
                    &[0x0f, 0xaf],
                    enc(dst),
                    m,
                    false,
                );
            }
            _ => panic!("binary op {op:?} is not encodable with a memory source"),
        }
    }

    fn encode_op_binary_mem_reg(
        &mut self,
        mem: MicroReg,
        offset: i64,
        src: MicroReg,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) {
        let m = Mem::base_disp(mem, offset);
        if flags.contains(EmitFlags::LOCK) {
            self.put1(0xf0);
        }
        if let Some((opc8, opc)) = alu_mr_opcode(op) {
            let r = enc(src);
            let force = bits == OpBits::B8 && byte_reg_needs_rex(r);
            let opcode: &[u8] = if bits == OpBits::B8 { &[opc8] } else { &[opc] };
            self.op_mem(
                Self::operand_size_prefix(bits),
                bits == OpBits::B64,
                opcode,
                r,
                m,
                force,
            );
            return;
        }
        match op {
            AluOp::Exchange => {
                let r = enc(src);
                let opcode: &[u8] = if bits == OpBits::B8 { &[0x86] } else { &[0x87] };
                self.op_mem(
                    Self::operand_size_prefix(bits),
                    bits == OpBits::B64,
                    opcode,
                    r,
                    m,
                    false,
                );
            }
            AluOp::CompareExchange => {
                let r = enc(src);
                let opcode: &[u8] = if bits == OpBits::B8 {
                    &[0x0f, 0xb0]
                } else {
                    &[0x0f, 0xb1]
                };
                self.op_mem(
                    Self::operand_size_prefix(bits),
                    bits == OpBits::B64,
                    opcode,
                    r,
                    m,
                    false,
                );
            }
            _ => panic!("binary op {op:?} is not encodable with a memory destination"),
        }
    }

    fn encode_op_binary_mem_imm(
        &mut self,
        mem: MicroReg,
        offset: i64,
        value: u64,
        op: AluOp,
        bits: OpBits,
        _flags: EmitFlags,
    ) {
        let m = Mem::base_disp(mem, offset);
        if let Some(digit) = shift_digit(op) {
            let opcode: &[u8] = if bits == OpBits::B8 { &[0xc0] } else { &[0xc1] };
            self.op_mem(
                Self::operand_size_prefix(bits),
                bits == OpBits::B64,
                opcode,
                digit,
                m,
                false,
            );
            self.put1(value as u8);
            return;
        }
        let digit = alu_imm_digit(op)
            .unwrap_or_else(|| panic!("binary op {op:?} has no memory-immediate form"));
        if bits == OpBits::B8 {
            self.op_mem(None, false, &[0x80], digit, m, false);
            self.put1(value as u8);
        } else if low8_will_sign_extend(value, bits) {
            self.op_mem(
                Self::operand_size_prefix(bits),
                bits == OpBits::B64,
                &[0x83],
                digit,
                m,
                false,
            );
            self.put1(value as u8);
        } else {
            self.op_mem(
                Self::operand_size_prefix(bits),
                bits == OpBits::B64,
                &[0x81],
                digit,
                m,
                false,
            );
            self.put_imm(value, bits);
        }
    }

    fn encode_op_ternary_reg_reg_reg(
        &mut self,
        r0: MicroReg,
        r1: MicroReg,
        r2: MicroReg,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) {
        match op {
            AluOp::MultiplyAdd => {
                // r0 += r1 * r2, with the product built in r1.
                assert!(r0.is_int() && r1.is_int() && r2.is_int());
                assert!(bits != OpBits::B8);
                self.encode_op_binary_reg_reg(r1, r2, AluOp::MultiplySigned, bits, flags);
                self.encode_op_binary_reg_reg(r0, r1, AluOp::Add, bits, flags);
            }
            _ => panic!("ternary op {op:?} is not encodable"),
        }
    }
}
