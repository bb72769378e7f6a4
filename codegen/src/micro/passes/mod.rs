//! The pass pipeline.
//!
//! Passes run in registration order over one function's instruction
//! stream. The mandatory passes (legalize, register allocation,
//! prolog/epilog, emit) run exactly once; the optimization passes run
//! inside a bounded fixed-point loop.

mod branch_fold;
mod cfg_simplify;
mod copy_prop;
mod dce;
mod emit;
mod inst_combine;
mod legalize;
mod load_store_forward;
mod prolog_epilog;
mod regalloc;
mod strength_reduce;

pub use branch_fold::BranchFoldPass;
pub use cfg_simplify::CfgSimplifyPass;
pub use copy_prop::CopyPropPass;
pub use dce::DcePass;
pub use emit::EmitPass;
pub use inst_combine::InstCombinePass;
pub use legalize::LegalizePass;
pub use load_store_forward::LoadStoreForwardPass;
pub use prolog_epilog::PrologEpilogPass;
pub use regalloc::RegAllocPass;
pub use strength_reduce::StrengthReducePass;

use crate::binemit::CodeReloc;
use crate::isa::call_conv::CallConvKind;
use crate::isa::Encoder;
use crate::micro::{MicroInst, MicroOpcode, MicroReg, UseDef};
use crate::settings::OptLevel;
use crate::storage::{InstStore, OperandStore};
use log::debug;

/// Frame facts flowing from register allocation to prolog/epilog.
#[derive(Default, Debug)]
pub struct FrameLayout {
    /// Bytes of stack needed for spill slots, 8-byte aligned.
    pub spill_area_size: u32,
    /// Callee-saved integer registers the function actually writes.
    pub saved_int_regs: Vec<MicroReg>,
}

/// State threaded through every pass.
pub struct PassCtx<'a> {
    pub encoder: &'a mut dyn Encoder,
    pub insts: &'a mut InstStore,
    pub operands: &'a mut OperandStore,
    pub relocs: &'a mut Vec<CodeReloc>,
    pub frame: FrameLayout,
    pub call_conv: CallConvKind,
    pub preserve_persistent_regs: bool,
    pub opt_level: OptLevel,
}

/// One transformation over the instruction stream.
pub trait MicroPass {
    fn name(&self) -> &'static str;

    /// Run once; returns true when the stream changed.
    fn run(&mut self, ctx: &mut PassCtx) -> bool;
}

/// Runs registered passes in order.
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn MicroPass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pass: impl MicroPass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn run(&mut self, ctx: &mut PassCtx) {
        for pass in &mut self.passes {
            let changed = pass.run(ctx);
            debug!("pass {}: changed={}", pass.name(), changed);
        }
    }
}

/// The optimization passes, iterated to a fixed point.
///
/// A full round runs every pass once; rounds repeat until one reports no
/// change, bounded at eight rounds.
pub struct OptimizationLoopPass {
    passes: Vec<Box<dyn MicroPass>>,
}

impl OptimizationLoopPass {
    const MAX_ROUNDS: u32 = 8;

    pub fn new() -> Self {
        let mut passes: Vec<Box<dyn MicroPass>> = Vec::new();
        passes.push(Box::new(CopyPropPass));
        passes.push(Box::new(DcePass));
        passes.push(Box::new(LoadStoreForwardPass));
        passes.push(Box::new(InstCombinePass));
        passes.push(Box::new(StrengthReducePass));
        passes.push(Box::new(BranchFoldPass));
        passes.push(Box::new(CfgSimplifyPass));
        OptimizationLoopPass { passes }
    }
}

impl Default for OptimizationLoopPass {
    fn default() -> Self {
        Self::new()
    }
}

impl MicroPass for OptimizationLoopPass {
    fn name(&self) -> &'static str {
        "optimize"
    }

    fn run(&mut self, ctx: &mut PassCtx) -> bool {
        let mut any_changed = false;
        for round in 0..Self::MAX_ROUNDS {
            let mut round_changed = false;
            for pass in &mut self.passes {
                let changed = pass.run(ctx);
                debug!("  {} (round {round}): changed={changed}", pass.name());
                round_changed |= changed;
            }
            any_changed |= round_changed;
            if !round_changed {
                break;
            }
        }
        any_changed
    }
}

/// Whether an instruction invalidates block-local dataflow facts: anything
/// that transfers control, can be jumped to, or calls out.
pub fn is_local_dataflow_barrier(inst: &MicroInst, use_def: &UseDef) -> bool {
    if use_def.is_call {
        return true;
    }
    matches!(
        inst.op,
        MicroOpcode::Label
            | MicroOpcode::JumpCond
            | MicroOpcode::JumpCondImm
            | MicroOpcode::JumpReg
            | MicroOpcode::JumpTable
            | MicroOpcode::Ret
    )
}

/// Whether an instruction ends a basic block.
pub fn is_terminator(inst: &MicroInst) -> bool {
    matches!(
        inst.op,
        MicroOpcode::JumpCond
            | MicroOpcode::JumpCondImm
            | MicroOpcode::JumpReg
            | MicroOpcode::JumpTable
            | MicroOpcode::Ret
    )
}

pub fn is_same_register_class(a: MicroReg, b: MicroReg) -> bool {
    a.is_valid() && b.is_valid() && a.class() == b.class()
}

#[cfg(test)]
pub(crate) fn run_one(
    builder: &mut crate::micro::builder::MicroBuilder,
    pass: impl MicroPass + 'static,
) {
    let mut encoder = crate::isa::x64::X64Encoder::new();
    let mut manager = PassManager::new();
    manager.add(pass);
    builder.run_passes(&mut manager, &mut encoder, Default::default());
}
