//! Compile a function with the backend, load it into executable memory,
//! and run it.

use capstan_codegen::isa::x64::regs;
use capstan_codegen::lower_micro_instructions;
use capstan_codegen::micro::builder::MicroBuilder;
use capstan_codegen::micro::{AluOp, EmitFlags, OpBits};
use capstan_codegen::settings::{CodeGenOptions, OptLevel};
use capstan_jit::JitMemoryManager;

const F: EmitFlags = EmitFlags::ZERO;

#[cfg(target_arch = "x86_64")]
#[test]
fn execute_constant_function() {
    let mut builder = MicroBuilder::new();
    builder.encode_load_reg_imm(regs::RAX, 42, OpBits::B32, F);
    builder.encode_ret(F);
    let code = lower_micro_instructions(&mut builder, &CodeGenOptions::default()).unwrap();
    assert!(code.code_relocations.is_empty());

    let manager = JitMemoryManager::new();
    let memory = manager.allocate_and_copy(&code.bytes).unwrap();
    manager.make_executable(&memory).unwrap();

    let entry: extern "C" fn() -> u32 = unsafe { std::mem::transmute(memory.entry_point()) };
    assert_eq!(entry(), 42);
}

#[cfg(target_arch = "x86_64")]
#[test]
fn execute_optimized_multiply() {
    let mut builder = MicroBuilder::new();
    builder.encode_load_reg_imm(regs::RAX, 5, OpBits::B32, F);
    builder.encode_op_binary_reg_imm(regs::RAX, 8, AluOp::MultiplyUnsigned, OpBits::B32, F);
    builder.encode_ret(F);
    let options = CodeGenOptions {
        opt_level: OptLevel::O2,
        ..Default::default()
    };
    let code = lower_micro_instructions(&mut builder, &options).unwrap();

    let manager = JitMemoryManager::new();
    let memory = manager.allocate_and_copy(&code.bytes).unwrap();
    manager.make_executable(&memory).unwrap();

    let entry: extern "C" fn() -> u32 = unsafe { std::mem::transmute(memory.entry_point()) };
    assert_eq!(entry(), 40);
}

#[test]
fn allocation_outside_any_block_size() {
    let manager = JitMemoryManager::new();
    let memory = manager.allocate(1024 * 1024).unwrap();
    assert_eq!(memory.size(), 1024 * 1024);
}
