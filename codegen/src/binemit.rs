//! Binary emission support: code offsets, relocations and their wire
//! format.

use crate::entities::InstRef;
use crate::result::{CodegenError, CodegenResult};

/// Offset in bytes from the beginning of the function's code.
pub type CodeOffset = u32;

/// PE-COFF relocation type for an absolute 64-bit address.
pub const IMAGE_REL_AMD64_ADDR64: u16 = 0x0001;
/// PE-COFF relocation type for a 32-bit PC-relative field.
pub const IMAGE_REL_AMD64_REL32: u16 = 0x0004;

/// Relocation kinds emitted by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RelocKind {
    /// Absolute 64-bit pointer immediate.
    Abs64 = 1,
    /// PC-relative 32-bit field, for calls and RIP-relative loads.
    Rel32 = 2,
}

impl RelocKind {
    /// The matching PE-COFF relocation type, for linker interoperability.
    pub fn coff_type(self) -> u16 {
        match self {
            RelocKind::Abs64 => IMAGE_REL_AMD64_ADDR64,
            RelocKind::Rel32 => IMAGE_REL_AMD64_REL32,
        }
    }
}

/// One code relocation.
///
/// Recorded by the builder when a symbol-relocating instruction is
/// appended; the emit pass binds `offset` to the final byte position of the
/// patched field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeReloc {
    pub kind: RelocKind,
    /// The instruction that carries this relocation.
    pub inst: InstRef,
    /// Index of the target symbol in the builder's symbol table.
    pub symbol: u32,
    /// Byte offset of the patched field; bound by the emit pass.
    pub offset: CodeOffset,
    pub addend: i32,
}

impl CodeReloc {
    /// Serialize in the little-endian wire format:
    /// `u8 kind, u32 code_offset, u32 symbol_index, i32 addend`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.kind as u8);
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.symbol.to_le_bytes());
        out.extend_from_slice(&self.addend.to_le_bytes());
    }

    /// Patch `code` in place, resolving this relocation against the final
    /// address of its symbol. `code_base` is the address `code` will live
    /// at when executed.
    ///
    /// `Abs64` overwrites 8 bytes with `symbol + addend`. `Rel32`
    /// overwrites 4 bytes with `symbol + addend - field_address` and fails
    /// if the displacement does not fit in 32 bits.
    pub fn apply(&self, code: &mut [u8], code_base: u64, symbol_addr: u64) -> CodegenResult<()> {
        let at = self.offset as usize;
        match self.kind {
            RelocKind::Abs64 => {
                let value = symbol_addr.wrapping_add(self.addend as i64 as u64);
                code[at..at + 8].copy_from_slice(&value.to_le_bytes());
            }
            RelocKind::Rel32 => {
                let field = code_base.wrapping_add(self.offset as u64);
                let value = (symbol_addr as i64)
                    .wrapping_add(self.addend as i64)
                    .wrapping_sub(field as i64);
                let value = i32::try_from(value).map_err(|_| CodegenError::RelocOutOfRange {
                    symbol: self.symbol,
                    offset: self.offset,
                })?;
                code[at..at + 4].copy_from_slice(&value.to_le_bytes());
            }
        }
        Ok(())
    }
}
