//! x86-64 register definitions and names.

use crate::micro::{MicroReg, OpBits, RegClass};

pub const RAX: MicroReg = MicroReg::int(0);
pub const RCX: MicroReg = MicroReg::int(1);
pub const RDX: MicroReg = MicroReg::int(2);
pub const RBX: MicroReg = MicroReg::int(3);
pub const RSP: MicroReg = MicroReg::int(4);
pub const RBP: MicroReg = MicroReg::int(5);
pub const RSI: MicroReg = MicroReg::int(6);
pub const RDI: MicroReg = MicroReg::int(7);
pub const R8: MicroReg = MicroReg::int(8);
pub const R9: MicroReg = MicroReg::int(9);
pub const R10: MicroReg = MicroReg::int(10);
pub const R11: MicroReg = MicroReg::int(11);
pub const R12: MicroReg = MicroReg::int(12);
pub const R13: MicroReg = MicroReg::int(13);
pub const R14: MicroReg = MicroReg::int(14);
pub const R15: MicroReg = MicroReg::int(15);

pub const XMM0: MicroReg = MicroReg::float(0);
pub const XMM1: MicroReg = MicroReg::float(1);
pub const XMM2: MicroReg = MicroReg::float(2);
pub const XMM3: MicroReg = MicroReg::float(3);
pub const XMM4: MicroReg = MicroReg::float(4);
pub const XMM5: MicroReg = MicroReg::float(5);
pub const XMM6: MicroReg = MicroReg::float(6);
pub const XMM7: MicroReg = MicroReg::float(7);
pub const XMM8: MicroReg = MicroReg::float(8);
pub const XMM9: MicroReg = MicroReg::float(9);
pub const XMM10: MicroReg = MicroReg::float(10);
pub const XMM11: MicroReg = MicroReg::float(11);
pub const XMM12: MicroReg = MicroReg::float(12);
pub const XMM13: MicroReg = MicroReg::float(13);
pub const XMM14: MicroReg = MicroReg::float(14);
pub const XMM15: MicroReg = MicroReg::float(15);

/// Hardware encoding of a physical register; passes must have rewritten
/// every virtual index before encoding starts.
#[track_caller]
pub fn enc(reg: MicroReg) -> u8 {
    assert!(!reg.is_virtual(), "virtual register {reg:?} reached the encoder");
    let index = reg.index();
    assert!(index < 16, "invalid register index {index}");
    index as u8
}

const GPR64: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];
const GPR32: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d", "r12d",
    "r13d", "r14d", "r15d",
];
const GPR16: [&str; 16] = [
    "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w", "r12w", "r13w",
    "r14w", "r15w",
];
const GPR8: [&str; 16] = [
    "al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b", "r12b",
    "r13b", "r14b", "r15b",
];
const XMM: [&str; 16] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7", "xmm8", "xmm9", "xmm10",
    "xmm11", "xmm12", "xmm13", "xmm14", "xmm15",
];

/// Register name at the given access width, for diagnostics.
pub fn name(reg: MicroReg, bits: OpBits) -> String {
    if reg.is_virtual() {
        return format!("{reg:?}");
    }
    match reg.class() {
        RegClass::Int => {
            let i = reg.index() as usize & 15;
            match bits {
                OpBits::B8 => GPR8[i],
                OpBits::B16 => GPR16[i],
                OpBits::B32 => GPR32[i],
                _ => GPR64[i],
            }
            .to_string()
        }
        RegClass::Float => XMM[reg.index() as usize & 15].to_string(),
        RegClass::Flags => "rflags".to_string(),
        RegClass::Ip => "rip".to_string(),
    }
}
