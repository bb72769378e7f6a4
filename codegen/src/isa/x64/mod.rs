//! The x86-64 encoder.

pub mod regs;

mod encoder;

pub use encoder::X64Encoder;

#[cfg(test)]
mod emit_tests;
