//! Byte-for-byte encoder checks.
//!
//! Each entry pairs an encoder call with the bytes a reference assembler
//! produces for the printed form. To double-check an entry:
//!
//!     echo 'mov eax, 42' | as -msyntax=intel -mnaked-reg -o /tmp/t.o -
//!     objdump -d /tmp/t.o

use super::regs::*;
use super::X64Encoder;
use crate::isa::Encoder;
use crate::micro::{AluOp, Cond, EmitFlags, OpBits};

const F: EmitFlags = EmitFlags::ZERO;

type EncodeFn = Box<dyn Fn(&mut X64Encoder)>;

fn hex(encoder: &X64Encoder) -> String {
    encoder.bytes().iter().map(|b| format!("{b:02X}")).collect()
}

#[test]
fn x64_binemit() {
    let mut insns: Vec<(EncodeFn, &str, &str)> = Vec::new();

    insns.push((Box::new(|e| e.encode_ret(F)), "C3", "ret"));
    insns.push((Box::new(|e| e.encode_nop(F)), "90", "nop"));

    insns.push((Box::new(|e| e.encode_push(RAX, F)), "50", "push rax"));
    insns.push((Box::new(|e| e.encode_push(R12, F)), "4154", "push r12"));
    insns.push((Box::new(|e| e.encode_pop(RBX, F)), "5B", "pop rbx"));
    insns.push((Box::new(|e| e.encode_pop(R15, F)), "415F", "pop r15"));

    // Immediate loads.
    insns.push((
        Box::new(|e| e.encode_load_reg_imm(RAX, 0x2a, OpBits::B32, F)),
        "B82A000000",
        "mov eax, 42",
    ));
    insns.push((
        Box::new(|e| e.encode_load_reg_imm(R8, 1, OpBits::B32, F)),
        "41B801000000",
        "mov r8d, 1",
    ));
    insns.push((
        Box::new(|e| e.encode_load_reg_imm(RAX, 0x1122_3344_aabb_ccdd, OpBits::B64, F)),
        "48B8DDCCBBAA44332211",
        "movabs rax, 0x11223344aabbccdd",
    ));
    insns.push((
        Box::new(|e| e.encode_load_reg_imm(RAX, 0x10, OpBits::B64, F)),
        "B810000000",
        "mov eax, 16 ; zero-extends",
    ));
    insns.push((
        Box::new(|e| e.encode_load_reg_imm(RAX, 0x7f, OpBits::B8, F)),
        "B07F",
        "mov al, 127",
    ));
    insns.push((
        Box::new(|e| e.encode_load_reg_imm(RSI, 1, OpBits::B8, F)),
        "40B601",
        "mov sil, 1",
    ));
    insns.push((
        Box::new(|e| e.encode_load_reg_imm(RAX, 0x1234, OpBits::B16, F)),
        "66B83412",
        "mov ax, 0x1234",
    ));

    // Register moves.
    insns.push((
        Box::new(|e| e.encode_load_reg_reg(RBX, RCX, OpBits::B64, F)),
        "4889CB",
        "mov rbx, rcx",
    ));
    insns.push((
        Box::new(|e| e.encode_load_reg_reg(RBX, RCX, OpBits::B32, F)),
        "89CB",
        "mov ebx, ecx",
    ));
    insns.push((
        Box::new(|e| e.encode_load_reg_reg(RBX, RCX, OpBits::B8, F)),
        "88CB",
        "mov bl, cl",
    ));
    insns.push((
        Box::new(|e| e.encode_load_reg_reg(RSI, RDI, OpBits::B8, F)),
        "4088FE",
        "mov sil, dil",
    ));

    // Memory loads and stores.
    insns.push((
        Box::new(|e| e.encode_load_reg_mem(RAX, RCX, 8, OpBits::B64, F)),
        "488B4108",
        "mov rax, [rcx + 8]",
    ));
    insns.push((
        Box::new(|e| e.encode_load_reg_mem(RAX, RSP, 0, OpBits::B32, F)),
        "8B0424",
        "mov eax, [rsp]",
    ));
    insns.push((
        Box::new(|e| e.encode_load_reg_mem(RDX, RBP, 0, OpBits::B64, F)),
        "488B5500",
        "mov rdx, [rbp]",
    ));
    insns.push((
        Box::new(|e| e.encode_load_mem_reg(RCX, 0x100, RAX, OpBits::B64, F)),
        "48898100010000",
        "mov [rcx + 0x100], rax",
    ));
    insns.push((
        Box::new(|e| e.encode_load_mem_imm(RAX, 0, 7, OpBits::B32, F)),
        "C70007000000",
        "mov dword [rax], 7",
    ));
    insns.push((
        Box::new(|e| e.encode_load_mem_imm(RAX, 0, -1i64 as u64, OpBits::B64, F)),
        "48C700FFFFFFFF",
        "mov qword [rax], -1",
    ));

    // Widening loads and moves.
    insns.push((
        Box::new(|e| e.encode_load_zero_ext_reg_mem(RAX, RCX, 0, OpBits::B32, OpBits::B8, F)),
        "0FB601",
        "movzx eax, byte [rcx]",
    ));
    insns.push((
        Box::new(|e| e.encode_load_signed_ext_reg_mem(RAX, RDX, 0, OpBits::B64, OpBits::B16, F)),
        "480FBF02",
        "movsx rax, word [rdx]",
    ));
    insns.push((
        Box::new(|e| e.encode_load_signed_ext_reg_reg(RAX, RCX, OpBits::B64, OpBits::B32, F)),
        "4863C1",
        "movsxd rax, ecx",
    ));
    insns.push((
        Box::new(|e| e.encode_load_zero_ext_reg_reg(RAX, RCX, OpBits::B64, OpBits::B32, F)),
        "89C8",
        "mov eax, ecx ; zero-extends",
    ));

    // Address computations.
    insns.push((
        Box::new(|e| e.encode_load_addr_reg_mem(RAX, RCX, 16, OpBits::B64, F)),
        "488D4110",
        "lea rax, [rcx + 16]",
    ));
    insns.push((
        Box::new(|e| e.encode_load_addr_amc_reg_mem(RAX, RCX, RDX, 4, 8, F)),
        "488D449108",
        "lea rax, [rcx + rdx*4 + 8]",
    ));
    insns.push((
        Box::new(|e| e.encode_load_amc_reg_mem(RAX, OpBits::B32, RSI, RDI, 8, 0, OpBits::B32, F)),
        "8B04FE",
        "mov eax, [rsi + rdi*8]",
    ));

    // Compares and tests.
    insns.push((
        Box::new(|e| e.encode_cmp_reg_reg(RCX, RDX, OpBits::B32, F)),
        "39D1",
        "cmp ecx, edx",
    ));
    insns.push((
        Box::new(|e| e.encode_cmp_reg_imm(RAX, 100, OpBits::B64, F)),
        "4883F864",
        "cmp rax, 100",
    ));
    insns.push((
        Box::new(|e| e.encode_cmp_reg_imm(RAX, 0x1234_5678, OpBits::B32, F)),
        "81F878563412",
        "cmp eax, 0x12345678",
    ));
    insns.push((
        Box::new(|e| e.encode_cmp_reg_zero(RAX, OpBits::B32, F)),
        "85C0",
        "test eax, eax",
    ));
    insns.push((
        Box::new(|e| e.encode_cmp_reg_zero(R9, OpBits::B64, F)),
        "4D85C9",
        "test r9, r9",
    ));
    insns.push((
        Box::new(|e| e.encode_cmp_mem_reg(RAX, 4, RCX, OpBits::B32, F)),
        "394804",
        "cmp [rax + 4], ecx",
    ));

    // Conditional materialization.
    insns.push((
        Box::new(|e| e.encode_set_cond_reg(RAX, Cond::Equal, F)),
        "0F94C0",
        "sete al",
    ));
    insns.push((
        Box::new(|e| e.encode_set_cond_reg(RSI, Cond::Less, F)),
        "400F9CC6",
        "setl sil",
    ));
    insns.push((
        Box::new(|e| e.encode_load_cond_reg_reg(RAX, RCX, Cond::NotEqual, OpBits::B32, F)),
        "0F45C1",
        "cmovne eax, ecx",
    ));
    insns.push((
        Box::new(|e| e.encode_clear_reg(RAX, OpBits::B32, F)),
        "31C0",
        "xor eax, eax",
    ));
    insns.push((
        Box::new(|e| e.encode_clear_reg(R9, OpBits::B64, F)),
        "4531C9",
        "xor r9d, r9d",
    ));

    // Integer arithmetic.
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_reg(RBX, RCX, AluOp::Add, OpBits::B64, F)),
        "4801CB",
        "add rbx, rcx",
    ));
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_imm(RAX, 8, AluOp::Subtract, OpBits::B32, F)),
        "83E808",
        "sub eax, 8",
    ));
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_imm(RAX, 0x1000, AluOp::Add, OpBits::B64, F)),
        "4881C000100000",
        "add rax, 0x1000",
    ));
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_imm(RCX, 0x0f, AluOp::And, OpBits::B8, F)),
        "80E10F",
        "and cl, 15",
    ));
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_imm(RAX, 3, AluOp::ShiftLeft, OpBits::B32, F)),
        "C1E003",
        "shl eax, 3",
    ));
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_imm(RDX, 1, AluOp::ShiftArithmeticRight, OpBits::B64, F)),
        "48C1FA01",
        "sar rdx, 1",
    ));
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_reg(RAX, RCX, AluOp::MultiplySigned, OpBits::B32, F)),
        "0FAFC1",
        "imul eax, ecx",
    ));
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_imm(RAX, 8, AluOp::MultiplySigned, OpBits::B64, F)),
        "486BC008",
        "imul rax, rax, 8",
    ));
    insns.push((
        Box::new(|e| e.encode_op_unary_reg(RAX, AluOp::Negate, OpBits::B32, F)),
        "F7D8",
        "neg eax",
    ));
    insns.push((
        Box::new(|e| e.encode_op_unary_reg(RCX, AluOp::BitwiseNot, OpBits::B64, F)),
        "48F7D1",
        "not rcx",
    ));
    insns.push((
        Box::new(|e| e.encode_op_unary_reg(RAX, AluOp::ByteSwap, OpBits::B32, F)),
        "0FC8",
        "bswap eax",
    ));
    insns.push((
        Box::new(|e| e.encode_op_unary_reg(R10, AluOp::ByteSwap, OpBits::B64, F)),
        "490FCA",
        "bswap r10",
    ));
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_reg(RAX, RCX, AluOp::PopCount, OpBits::B32, F)),
        "F30FB8C1",
        "popcnt eax, ecx",
    ));
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_reg(RAX, RDX, AluOp::BitScanForward, OpBits::B32, F)),
        "0FBCC2",
        "bsf eax, edx",
    ));
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_reg(RAX, RCX, AluOp::Exchange, OpBits::B32, F)),
        "87C8",
        "xchg eax, ecx",
    ));

    // Divides build their accumulator dance.
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_reg(RCX, RBX, AluOp::DivideUnsigned, OpBits::B32, F)),
        "89C831D2F7F389C1",
        "mov eax, ecx ; xor edx, edx ; div ebx ; mov ecx, eax",
    ));
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_reg(RAX, RBX, AluOp::DivideSigned, OpBits::B64, F)),
        "489948F7FB",
        "cqo ; idiv rbx",
    ));
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_reg(RAX, RBX, AluOp::ModuloUnsigned, OpBits::B32, F)),
        "31D2F7F389D0",
        "xor edx, edx ; div ebx ; mov eax, edx",
    ));

    // Shifts by a register count go through cl.
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_reg(RAX, RCX, AluOp::ShiftLeft, OpBits::B32, F)),
        "D3E0",
        "shl eax, cl",
    ));
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_reg(RAX, RBX, AluOp::ShiftLeft, OpBits::B32, F)),
        "4889D9D3E0",
        "mov rcx, rbx ; shl eax, cl",
    ));

    // Calls and indirect jumps.
    insns.push((
        Box::new(|e| e.encode_call_reg(RAX, crate::isa::call_conv::CallConvKind::Host, F)),
        "FFD0",
        "call rax",
    ));
    insns.push((
        Box::new(|e| e.encode_call_reg(R12, crate::isa::call_conv::CallConvKind::Host, F)),
        "41FFD4",
        "call r12",
    ));
    insns.push((Box::new(|e| e.encode_jump_reg(RAX, F)), "FFE0", "jmp rax"));
    insns.push((
        Box::new(|e| {
            e.encode_call_local(crate::isa::call_conv::CallConvKind::Host, F);
        }),
        "E800000000",
        "call rel32 ; displacement left for the relocation",
    ));

    // Jump tables: signed 32-bit offsets relative to the table base.
    insns.push((
        Box::new(|e| e.encode_jump_table(RAX, RCX, 4, F)),
        "48630C884801C8FFE0",
        "movsxd rcx, [rax + rcx*4] ; add rax, rcx ; jmp rax",
    ));

    // Scalar float operations.
    insns.push((
        Box::new(|e| e.encode_load_reg_reg(XMM0, XMM1, OpBits::B32, F)),
        "F30F10C1",
        "movss xmm0, xmm1",
    ));
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_reg(XMM2, XMM3, AluOp::FloatAdd, OpBits::B64, F)),
        "F20F58D3",
        "addsd xmm2, xmm3",
    ));
    insns.push((
        Box::new(|e| e.encode_load_reg_mem(XMM1, RAX, 8, OpBits::B64, F)),
        "F20F104808",
        "movsd xmm1, [rax + 8]",
    ));
    insns.push((
        Box::new(|e| e.encode_load_mem_reg(RSP, 4, XMM0, OpBits::B32, F)),
        "F30F11442404",
        "movss [rsp + 4], xmm0",
    ));
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_reg(XMM0, RAX, AluOp::ConvertIntToFloat, OpBits::B64, F)),
        "F2480F2AC0",
        "cvtsi2sd xmm0, rax",
    ));
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_reg(RAX, XMM1, AluOp::ConvertFloatToInt, OpBits::B64, F)),
        "F2480F2CC1",
        "cvttsd2si rax, xmm1",
    ));
    insns.push((
        Box::new(|e| e.encode_load_reg_reg(XMM0, RAX, OpBits::B64, F)),
        "66480F6EC0",
        "movq xmm0, rax",
    ));
    insns.push((
        Box::new(|e| e.encode_load_reg_reg(RAX, XMM0, OpBits::B64, F)),
        "66480F7EC0",
        "movq rax, xmm0",
    ));
    insns.push((
        Box::new(|e| e.encode_op_binary_reg_reg(XMM1, XMM1, AluOp::FloatXor, OpBits::B32, F)),
        "0F57C9",
        "xorps xmm1, xmm1",
    ));
    insns.push((
        Box::new(|e| e.encode_op_unary_reg(XMM2, AluOp::FloatSqrt, OpBits::B64, F)),
        "F20F51D2",
        "sqrtsd xmm2, xmm2",
    ));

    for (encode, expected, asm) in insns {
        let mut encoder = X64Encoder::new();
        encode(&mut encoder);
        let got = hex(&encoder);
        assert_eq!(got, expected, "incorrect encoding of `{asm}`");
    }
}

#[test]
fn jumps_record_patchable_displacements() {
    let mut e = X64Encoder::new();
    let jump = e.encode_jump(Cond::NotEqual, OpBits::B32, F);
    assert_eq!(hex(&e), "0F8500000000");
    assert_eq!(jump.patch_at, 2);
    assert_eq!(jump.from, 6);
    e.encode_nop(F);
    e.encode_patch_jump_here(&jump);
    // Displacement 1 skips the nop.
    assert_eq!(hex(&e), "0F850100000090");
}

#[test]
fn short_jumps_use_one_byte() {
    let mut e = X64Encoder::new();
    let jump = e.encode_jump(Cond::Unconditional, OpBits::B8, F);
    assert_eq!(hex(&e), "EB00");
    e.encode_patch_jump(&jump, 0x10);
    assert_eq!(hex(&e), "EB0E");
}

#[test]
#[should_panic(expected = "overflows 8 bits")]
fn short_jump_overflow_is_fatal() {
    let mut e = X64Encoder::new();
    let jump = e.encode_jump(Cond::Unconditional, OpBits::B8, F);
    e.encode_patch_jump(&jump, 0x1000);
}

#[test]
#[should_panic(expected = "virtual register")]
fn virtual_registers_are_rejected() {
    use crate::micro::{MicroReg, RegClass};
    let mut e = X64Encoder::new();
    e.encode_push(MicroReg::virt(RegClass::Int, 0), F);
}

#[test]
fn rip_relative_symbol_value_load() {
    let mut e = X64Encoder::new();
    let offset = e.encode_load_symbol_reloc_value(RAX, OpBits::B64, F);
    // mov rax, [rip + 0]: REX.W 8B modrm(00, rax, 101).
    assert_eq!(hex(&e), "488B0500000000");
    assert_eq!(offset, 3);
}

#[test]
fn conformance_flags_wide_immediates() {
    use crate::isa::ConformanceIssue;
    use crate::micro::builder::MicroBuilder;
    use crate::micro::RegClass;

    let mut b = MicroBuilder::new();
    let r0 = b.new_vreg(RegClass::Int);
    let wide = b.encode_op_binary_reg_imm(r0, 1 << 40, AluOp::Add, OpBits::B64, F);
    let narrow = b.encode_op_binary_reg_imm(r0, 1, AluOp::Add, OpBits::B64, F);
    let div = b.encode_op_binary_reg_imm(r0, 10, AluOp::DivideSigned, OpBits::B32, F);

    let e = X64Encoder::new();
    let wide_inst = *b.insts().at(wide);
    assert_eq!(
        e.query_conformance_issue(&wide_inst, b.operands().ops(&wide_inst)),
        Some(ConformanceIssue::ImmediateTooWide)
    );
    let narrow_inst = *b.insts().at(narrow);
    assert_eq!(
        e.query_conformance_issue(&narrow_inst, b.operands().ops(&narrow_inst)),
        None
    );
    let div_inst = *b.insts().at(div);
    assert_eq!(
        e.query_conformance_issue(&div_inst, b.operands().ops(&div_inst)),
        Some(ConformanceIssue::NoImmediateForm)
    );
}
