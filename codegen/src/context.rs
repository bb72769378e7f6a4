//! Top-level lowering entry point: builder in, machine code out.

use crate::binemit::CodeReloc;
use crate::isa;
use crate::micro::builder::{MicroBuilder, RunOptions};
use crate::micro::passes::{
    EmitPass, LegalizePass, OptimizationLoopPass, PassManager, PrologEpilogPass, RegAllocPass,
};
use crate::result::CodegenResult;
use crate::settings::CodeGenOptions;
use log::debug;

/// The finished output of one lowering job: executable-image bytes plus
/// the relocations a linker (or the JIT loader) must apply.
#[derive(Default, Debug)]
pub struct LoweredMicroCode {
    pub bytes: Vec<u8>,
    pub code_relocations: Vec<CodeReloc>,
}

/// Lower one function's micro-instruction stream to host machine code.
///
/// Pass order is fixed: legalize, register allocation, prolog/epilog, the
/// optimization fixed-point loop (skipped at `O0`), emit.
pub fn lower_micro_instructions(
    builder: &mut MicroBuilder,
    options: &CodeGenOptions,
) -> CodegenResult<LoweredMicroCode> {
    let mut encoder = isa::lookup_host()?;

    let mut manager = PassManager::new();
    manager.add(LegalizePass);
    manager.add(RegAllocPass);
    manager.add(PrologEpilogPass);
    if options.opt_level.optimizations_enabled() {
        manager.add(OptimizationLoopPass::new());
    }
    manager.add(EmitPass);

    debug!(
        "lowering {} at {}: {} instructions",
        options.module_name,
        options.opt_level,
        builder.insts().len()
    );

    builder.clear_code_relocations();
    builder.run_passes(
        &mut manager,
        encoder.as_mut(),
        RunOptions {
            opt_level: options.opt_level,
            ..Default::default()
        },
    );

    let mut out = LoweredMicroCode::default();
    encoder.copy_to(&mut out.bytes);
    out.code_relocations = builder.code_relocations().to_vec();
    debug!(
        "lowered {} bytes, {} relocations",
        out.bytes.len(),
        out.code_relocations.len()
    );
    Ok(out)
}
