//! ABI-driven call lowering.
//!
//! Given a prepared argument list and a callee, emits the
//! micro-instructions that place each argument into its convention slot,
//! perform the call, and shuttle the return value back. The stack
//! adjustment computed here is the only place where call-frame shape is
//! decided; prolog/epilog only stacks callee-saved storage on top.

use crate::isa::call_conv::{CallConv, CallConvKind};
use crate::micro::builder::MicroBuilder;
use crate::micro::{AluOp, EmitFlags, MicroReg, OpBits};
use crate::result::CodegenResult;
use core::mem::offset_of;

/// Size of the return address the call instruction itself pushes.
const CALL_PUSH_SIZE: u32 = 8;

/// A fat interface value: the object pointer travels as the argument, the
/// method table rides along.
#[repr(C)]
pub struct Interface {
    pub obj: *mut core::ffi::c_void,
    pub itable: *mut core::ffi::c_void,
}

/// How a prepared argument reaches its slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreparedArgKind {
    /// The source register's value goes straight to the slot.
    Direct,
    /// The source register holds an [`Interface`]; the object pointer is
    /// loaded from it before placement.
    InterfaceObject,
}

/// One argument already materialized in a register.
#[derive(Clone, Copy, Debug)]
pub struct PreparedArg {
    pub kind: PreparedArgKind,
    pub src: MicroReg,
    pub is_float: bool,
    pub num_bits: u8,
}

impl PreparedArg {
    pub fn direct(src: MicroReg) -> Self {
        PreparedArg {
            kind: PreparedArgKind::Direct,
            src,
            is_float: false,
            num_bits: 64,
        }
    }

    /// Build a prepared argument from a normalized ABI type. Indirect
    /// values pass their hidden pointer, so the register slot is always an
    /// integer one.
    pub fn from_normalized(src: MicroReg, ty: &crate::abi::NormalizedType) -> Self {
        debug_assert!(!ty.is_void);
        if ty.is_indirect {
            return PreparedArg::direct(src);
        }
        PreparedArg {
            kind: PreparedArgKind::Direct,
            src,
            is_float: ty.is_float,
            num_bits: ty.num_bits,
        }
    }

    fn op_bits(&self) -> OpBits {
        if self.is_float {
            OpBits::from_bit_width(u32::from(self.num_bits)).expect("float widths are 32 or 64")
        } else {
            OpBits::B64
        }
    }
}

/// One argument stored in an in-memory argument block, for calls whose
/// operands live in a buffer rather than registers.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct AbiCallArg {
    pub value: u64,
    pub is_float: bool,
    pub num_bits: u8,
}

/// Where a call's return value goes.
#[derive(Clone, Copy, Debug)]
pub struct AbiCallReturn {
    /// Address the return value is stored to; unused for void or indirect
    /// returns.
    pub value_ptr: u64,
    pub is_void: bool,
    pub is_float: bool,
    pub is_indirect: bool,
    pub num_bits: u8,
}

impl AbiCallReturn {
    pub fn void() -> Self {
        AbiCallReturn {
            value_ptr: 0,
            is_void: true,
            is_float: false,
            is_indirect: false,
            num_bits: 0,
        }
    }

    /// Build a return descriptor from a normalized ABI type.
    pub fn from_normalized(ty: &crate::abi::NormalizedType, value_ptr: u64) -> Self {
        AbiCallReturn {
            value_ptr,
            is_void: ty.is_void,
            is_float: ty.is_float,
            is_indirect: ty.is_indirect,
            num_bits: ty.num_bits,
        }
    }
}

/// Outgoing stack space for a call: shadow space plus overflowing
/// arguments, padded so the stack pointer stays aligned across the
/// implicit return-address push.
pub fn compute_call_stack_adjust(conv: &CallConv, num_args: u32) -> u32 {
    let num_reg_args = conv.num_arg_register_slots();
    let num_stack_args = num_args.saturating_sub(num_reg_args);
    let frame_base_size = conv.stack_shadow_space + num_stack_args * conv.stack_slot_size;
    let alignment = if conv.stack_alignment == 0 {
        16
    } else {
        conv.stack_alignment
    };
    let align_pad = (alignment + CALL_PUSH_SIZE - (frame_base_size % alignment)) % alignment;
    frame_base_size + align_pad
}

/// Move prepared arguments into their convention slots. Returns the
/// argument count, which the matching call emission needs for its stack
/// adjustment.
pub fn prepare_args(
    builder: &mut MicroBuilder,
    conv_kind: CallConvKind,
    args: &[PreparedArg],
) -> CodegenResult<u32> {
    let conv = conv_kind.get();
    if args.is_empty() {
        return Ok(0);
    }
    let num_reg_args = conv.num_arg_register_slots() as usize;
    let (_, tmp) = conv.try_pick_int_scratch_regs()?;
    let obj_offset = offset_of!(Interface, obj) as u64;

    for (i, arg) in args.iter().enumerate() {
        let in_register = i < num_reg_args;
        match arg.kind {
            PreparedArgKind::Direct => {
                let bits = arg.op_bits();
                if in_register {
                    let slot = if arg.is_float {
                        conv.float_arg_regs[i]
                    } else {
                        conv.int_arg_regs[i]
                    };
                    builder.encode_load_reg_reg(slot, arg.src, bits, EmitFlags::ZERO);
                } else {
                    let stack_offset = u64::from(conv.stack_shadow_space)
                        + (i - num_reg_args) as u64 * u64::from(conv.stack_slot_size);
                    builder.encode_load_mem_reg(
                        conv.stack_pointer,
                        stack_offset,
                        arg.src,
                        bits,
                        EmitFlags::ZERO,
                    );
                }
            }
            PreparedArgKind::InterfaceObject => {
                debug_assert!(!arg.is_float);
                if in_register {
                    builder.encode_load_reg_mem(
                        conv.int_arg_regs[i],
                        arg.src,
                        obj_offset,
                        OpBits::B64,
                        EmitFlags::ZERO,
                    );
                } else {
                    let stack_offset = u64::from(conv.stack_shadow_space)
                        + (i - num_reg_args) as u64 * u64::from(conv.stack_slot_size);
                    builder.encode_load_reg_mem(tmp, arg.src, obj_offset, OpBits::B64, EmitFlags::ZERO);
                    builder.encode_load_mem_reg(
                        conv.stack_pointer,
                        stack_offset,
                        tmp,
                        OpBits::B64,
                        EmitFlags::ZERO,
                    );
                }
            }
        }
    }
    Ok(args.len() as u32)
}

fn emit_block_args(
    builder: &mut MicroBuilder,
    conv: &CallConv,
    args: &[AbiCallArg],
    reg_base: MicroReg,
    reg_tmp: MicroReg,
) {
    if args.is_empty() {
        return;
    }
    let num_reg_args = conv.num_arg_register_slots() as usize;
    let stride = core::mem::size_of::<AbiCallArg>() as u64;
    builder.encode_load_reg_imm(reg_base, args.as_ptr() as u64, OpBits::B64, EmitFlags::ZERO);
    for (i, arg) in args.iter().enumerate() {
        let arg_offset = i as u64 * stride;
        let bits = if arg.is_float {
            OpBits::from_bit_width(u32::from(arg.num_bits)).expect("float widths are 32 or 64")
        } else {
            OpBits::B64
        };
        if i < num_reg_args {
            let slot = if arg.is_float {
                conv.float_arg_regs[i]
            } else {
                conv.int_arg_regs[i]
            };
            builder.encode_load_reg_mem(slot, reg_base, arg_offset, bits, EmitFlags::ZERO);
        } else {
            let stack_offset = u64::from(conv.stack_shadow_space)
                + (i - num_reg_args) as u64 * u64::from(conv.stack_slot_size);
            builder.encode_load_reg_mem(reg_tmp, reg_base, arg_offset, bits, EmitFlags::ZERO);
            builder.encode_load_mem_reg(conv.stack_pointer, stack_offset, reg_tmp, bits, EmitFlags::ZERO);
        }
    }
}

fn emit_return_copy(builder: &mut MicroBuilder, conv: &CallConv, ret: &AbiCallReturn, base: MicroReg) {
    if ret.is_void || ret.is_indirect {
        return;
    }
    debug_assert!(ret.value_ptr != 0);
    let bits = OpBits::from_bit_width(u32::from(ret.num_bits)).unwrap_or(OpBits::B64);
    builder.encode_load_reg_imm(base, ret.value_ptr, OpBits::B64, EmitFlags::ZERO);
    let source = if ret.is_float {
        conv.float_return
    } else {
        conv.int_return
    };
    builder.encode_load_mem_reg(base, 0, source, bits, EmitFlags::ZERO);
}

/// Call a function at a known absolute address with arguments taken from
/// an in-memory block.
///
/// The block behind `args` must stay alive until the generated code has
/// run; its address is baked into the instruction stream.
pub fn call_by_address(
    builder: &mut MicroBuilder,
    conv_kind: CallConvKind,
    target_address: u64,
    args: &[AbiCallArg],
    ret: &AbiCallReturn,
) -> CodegenResult<()> {
    let conv = conv_kind.get();
    let stack_adjust = compute_call_stack_adjust(conv, args.len() as u32);
    let (reg_base, reg_tmp) = conv.try_pick_int_scratch_regs()?;

    if stack_adjust > 0 {
        builder.encode_op_binary_reg_imm(
            conv.stack_pointer,
            u64::from(stack_adjust),
            AluOp::Subtract,
            OpBits::B64,
            EmitFlags::ZERO,
        );
    }

    emit_block_args(builder, conv, args, reg_base, reg_tmp);
    builder.encode_load_reg_imm(reg_tmp, target_address, OpBits::B64, EmitFlags::ZERO);
    builder.encode_call_reg(reg_tmp, conv_kind, EmitFlags::ZERO);

    emit_return_copy(builder, conv, ret, reg_base);

    if stack_adjust > 0 {
        builder.encode_op_binary_reg_imm(
            conv.stack_pointer,
            u64::from(stack_adjust),
            AluOp::Add,
            OpBits::B64,
            EmitFlags::ZERO,
        );
    }
    Ok(())
}

/// Call through a register, with `num_prepared_args` arguments already
/// placed by [`prepare_args`].
pub fn call_by_reg(
    builder: &mut MicroBuilder,
    conv_kind: CallConvKind,
    target: MicroReg,
    num_prepared_args: u32,
) -> CodegenResult<()> {
    let conv = conv_kind.get();
    let stack_adjust = compute_call_stack_adjust(conv, num_prepared_args);

    if stack_adjust > 0 {
        builder.encode_op_binary_reg_imm(
            conv.stack_pointer,
            u64::from(stack_adjust),
            AluOp::Subtract,
            OpBits::B64,
            EmitFlags::ZERO,
        );
    }
    builder.encode_call_reg(target, conv_kind, EmitFlags::ZERO);
    if stack_adjust > 0 {
        builder.encode_op_binary_reg_imm(
            conv.stack_pointer,
            u64::from(stack_adjust),
            AluOp::Add,
            OpBits::B64,
            EmitFlags::ZERO,
        );
    }
    Ok(())
}

/// Call a symbol with `num_prepared_args` arguments already placed by
/// [`prepare_args`].
pub fn call_by_symbol(
    builder: &mut MicroBuilder,
    conv_kind: CallConvKind,
    symbol: u32,
    num_prepared_args: u32,
) -> CodegenResult<()> {
    let conv = conv_kind.get();
    let stack_adjust = compute_call_stack_adjust(conv, num_prepared_args);

    if stack_adjust > 0 {
        builder.encode_op_binary_reg_imm(
            conv.stack_pointer,
            u64::from(stack_adjust),
            AluOp::Subtract,
            OpBits::B64,
            EmitFlags::ZERO,
        );
    }
    builder.encode_call_extern(symbol, conv_kind, EmitFlags::ZERO);
    if stack_adjust > 0 {
        builder.encode_op_binary_reg_imm(
            conv.stack_pointer,
            u64::from(stack_adjust),
            AluOp::Add,
            OpBits::B64,
            EmitFlags::ZERO,
        );
    }
    Ok(())
}
