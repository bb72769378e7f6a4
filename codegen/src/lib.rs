//! Machine-code backend for micro-instruction streams.
//!
//! A front end lowers each function into a [`micro::builder::MicroBuilder`]
//! full of target-agnostic micro-instructions, then calls
//! [`lower_micro_instructions`] to run the pass pipeline (legalization,
//! register allocation, prolog/epilog insertion, peephole optimization)
//! and encode the result into x86-64 bytes plus a relocation table.
//!
//! The [`isa::Encoder`] trait is the seam where further targets would be
//! added; the calling-convention registry, ABI type normalization, and
//! call lowering live alongside it.

pub mod abi;
pub mod binemit;
pub mod entities;
pub mod isa;
pub mod micro;
pub mod result;
pub mod settings;
pub mod storage;

mod context;

pub use context::{lower_micro_instructions, LoweredMicroCode};
pub use result::{CodegenError, CodegenResult};
