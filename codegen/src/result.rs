//! Result and error types for code generation.
//!
//! Almost every backend failure is a bug in an earlier stage or in the
//! backend itself and is reported by panicking. The errors below are the
//! few conditions a correct caller can actually run into.

use thiserror::Error;

/// An error produced while generating code.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodegenError {
    /// The target is not supported by any registered encoder.
    #[error("unsupported target: {0}")]
    Unsupported(String),

    /// The calling convention has no free integer scratch registers left.
    #[error("calling convention has no free integer scratch registers")]
    NoScratchRegisters,

    /// A PC-relative relocation target is farther than 2 GiB away.
    #[error("relocation out of range: symbol {symbol} at code offset {offset:#x}")]
    RelocOutOfRange {
        /// Index of the symbol being relocated.
        symbol: u32,
        /// Byte offset of the relocated field in the code.
        offset: u32,
    },
}

/// A convenient alias for a `Result` using the `CodegenError` type.
pub type CodegenResult<T> = Result<T, CodegenError>;
