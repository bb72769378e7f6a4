//! Calling convention descriptions.
//!
//! A small closed set of named conventions is baked in as constant tables;
//! the registry is immutable and safe to read from any thread.

use crate::isa::x64::regs;
use crate::micro::MicroReg;
use crate::result::{CodegenError, CodegenResult};
use core::fmt;
use core::str::FromStr;

/// Calling convention identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallConvKind {
    /// Whatever the host platform uses natively.
    Host,
    /// Windows x64 "fastcall".
    Windows64,
    /// System V AMD64, used on most Unix-like platforms.
    SystemV,
}

impl CallConvKind {
    /// Resolve to the concrete convention record.
    pub fn get(self) -> &'static CallConv {
        match self {
            CallConvKind::Host => {
                if cfg!(windows) {
                    &WINDOWS_64
                } else {
                    &SYSTEM_V
                }
            }
            CallConvKind::Windows64 => &WINDOWS_64,
            CallConvKind::SystemV => &SYSTEM_V,
        }
    }
}

impl fmt::Display for CallConvKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            CallConvKind::Host => "host",
            CallConvKind::Windows64 => "windows_fastcall",
            CallConvKind::SystemV => "system_v",
        })
    }
}

impl FromStr for CallConvKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(CallConvKind::Host),
            "windows_fastcall" => Ok(CallConvKind::Windows64),
            "system_v" => Ok(CallConvKind::SystemV),
            _ => Err(()),
        }
    }
}

/// Register and stack layout rules for one calling convention.
pub struct CallConv {
    /// Integer argument registers, in argument order.
    pub int_arg_regs: &'static [MicroReg],
    /// Float argument registers, in argument order. Floats share the slot
    /// budget with integers by position.
    pub float_arg_regs: &'static [MicroReg],
    pub int_return: MicroReg,
    pub float_return: MicroReg,
    pub stack_pointer: MicroReg,
    /// Bytes of shadow space the caller reserves above outgoing stack
    /// arguments.
    pub stack_shadow_space: u32,
    /// Required stack alignment at call sites, in bytes.
    pub stack_alignment: u32,
    /// Size of one outgoing stack argument slot, in bytes.
    pub stack_slot_size: u32,
    /// Registers the callee must preserve.
    pub callee_saved_int: &'static [MicroReg],
    pub callee_saved_float: &'static [MicroReg],
    /// Caller-saved registers that are never used for arguments or
    /// returns, free for shuttling values around a call.
    pub scratch_int: &'static [MicroReg],
    pub scratch_float: &'static [MicroReg],
}

impl CallConv {
    /// Number of argument register slots. Float arguments consume the same
    /// per-index slots, so this equals the integer register count.
    pub fn num_arg_register_slots(&self) -> u32 {
        self.int_arg_regs.len() as u32
    }

    /// Pick two distinct integer scratch registers.
    ///
    /// Fails with [`CodegenError::NoScratchRegisters`] when the convention
    /// does not have two; none of the supported conventions do.
    pub fn try_pick_int_scratch_regs(&self) -> CodegenResult<(MicroReg, MicroReg)> {
        match self.scratch_int {
            [a, b, ..] => Ok((*a, *b)),
            _ => Err(CodegenError::NoScratchRegisters),
        }
    }
}

static WINDOWS_64: CallConv = CallConv {
    int_arg_regs: &[regs::RCX, regs::RDX, regs::R8, regs::R9],
    float_arg_regs: &[regs::XMM0, regs::XMM1, regs::XMM2, regs::XMM3],
    int_return: regs::RAX,
    float_return: regs::XMM0,
    stack_pointer: regs::RSP,
    stack_shadow_space: 32,
    stack_alignment: 16,
    stack_slot_size: 8,
    callee_saved_int: &[
        regs::RBX,
        regs::RBP,
        regs::RDI,
        regs::RSI,
        regs::R12,
        regs::R13,
        regs::R14,
        regs::R15,
    ],
    callee_saved_float: &[
        regs::XMM6,
        regs::XMM7,
        regs::XMM8,
        regs::XMM9,
        regs::XMM10,
        regs::XMM11,
        regs::XMM12,
        regs::XMM13,
        regs::XMM14,
        regs::XMM15,
    ],
    scratch_int: &[regs::R10, regs::R11],
    scratch_float: &[regs::XMM4, regs::XMM5],
};

static SYSTEM_V: CallConv = CallConv {
    int_arg_regs: &[
        regs::RDI,
        regs::RSI,
        regs::RDX,
        regs::RCX,
        regs::R8,
        regs::R9,
    ],
    float_arg_regs: &[
        regs::XMM0,
        regs::XMM1,
        regs::XMM2,
        regs::XMM3,
        regs::XMM4,
        regs::XMM5,
        regs::XMM6,
        regs::XMM7,
    ],
    int_return: regs::RAX,
    float_return: regs::XMM0,
    stack_pointer: regs::RSP,
    stack_shadow_space: 0,
    stack_alignment: 16,
    stack_slot_size: 8,
    callee_saved_int: &[regs::RBX, regs::RBP, regs::R12, regs::R13, regs::R14, regs::R15],
    callee_saved_float: &[],
    scratch_int: &[regs::R10, regs::R11],
    scratch_float: &[regs::XMM8, regs::XMM9],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_layout() {
        let conv = CallConvKind::Windows64.get();
        assert_eq!(conv.num_arg_register_slots(), 4);
        assert_eq!(conv.stack_shadow_space, 32);
        assert_eq!(conv.int_arg_regs[0], regs::RCX);
        assert_eq!(conv.float_arg_regs[1], regs::XMM1);
    }

    #[test]
    fn system_v_layout() {
        let conv = CallConvKind::SystemV.get();
        assert_eq!(conv.num_arg_register_slots(), 6);
        assert_eq!(conv.stack_shadow_space, 0);
        assert_eq!(conv.int_arg_regs[0], regs::RDI);
    }

    #[test]
    fn scratch_regs_distinct() {
        for kind in [CallConvKind::Windows64, CallConvKind::SystemV] {
            let (a, b) = kind.get().try_pick_int_scratch_regs().unwrap();
            assert_ne!(a, b);
            assert!(a.is_int() && b.is_int());
        }
    }

    #[test]
    fn kind_roundtrip() {
        for kind in [CallConvKind::Host, CallConvKind::Windows64, CallConvKind::SystemV] {
            assert_eq!(kind.to_string().parse::<CallConvKind>(), Ok(kind));
        }
    }
}
