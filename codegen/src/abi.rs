//! ABI type normalization.
//!
//! Call and return lowering never looks at language types directly; a type
//! that crosses a call boundary is first normalized to one of a handful of
//! ABI shapes: nothing, a scalar in an integer or float register slot, or
//! an indirect value passed behind a hidden pointer.

use crate::micro::OpBits;

/// Whether a type is being passed as an argument or returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Usage {
    Argument,
    Return,
}

/// The shape of a language type as seen by the normalizer.
///
/// This is the whole type knowledge the backend needs: sizes, alignment,
/// and whether the leaves of an aggregate are all scalar.
#[derive(Clone, Copy, Debug)]
pub enum AbiType {
    Void,
    /// An integer of the given bit width (not necessarily a power of two
    /// register width; widths above 64 go indirect).
    Int { bits: u32 },
    /// A 32- or 64-bit float.
    Float { bits: u32 },
    /// A compound type.
    Aggregate {
        size: u32,
        align: u32,
        /// True when every leaf field is a scalar; such aggregates up to
        /// 16 bytes can travel in registers.
        scalar_leaves: bool,
        /// True when the first eight bytes contain only float leaves.
        first_half_float: bool,
        /// True when the second eight bytes contain only float leaves.
        second_half_float: bool,
    },
}

/// One register slot of a normalized value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbiSlot {
    pub is_float: bool,
    pub num_bits: u8,
}

/// A language type normalized for one side of a call boundary.
#[derive(Clone, Copy, Debug, Default)]
pub struct NormalizedType {
    pub is_void: bool,
    pub is_float: bool,
    pub is_indirect: bool,
    /// Indirect arguments are copied to a temporary the callee may
    /// scribble on; indirect returns write straight through the hidden
    /// pointer.
    pub needs_indirect_copy: bool,
    pub num_bits: u8,
    pub indirect_size: u32,
    pub indirect_align: u32,
    /// Second register slot for a two-eightbyte aggregate.
    pub second_slot: Option<AbiSlot>,
}

impl NormalizedType {
    fn void() -> Self {
        NormalizedType {
            is_void: true,
            ..Default::default()
        }
    }

    fn scalar(is_float: bool, num_bits: u8) -> Self {
        NormalizedType {
            is_float,
            num_bits,
            ..Default::default()
        }
    }

    fn indirect(size: u32, align: u32, usage: Usage) -> Self {
        NormalizedType {
            is_indirect: true,
            needs_indirect_copy: usage == Usage::Argument,
            indirect_size: size,
            indirect_align: align,
            ..Default::default()
        }
    }

    /// Width of the value's first slot as an operand width.
    pub fn op_bits(&self) -> Option<OpBits> {
        OpBits::from_bit_width(u32::from(self.num_bits))
    }
}

/// Classify a type at a call or return boundary.
pub fn normalize(ty: AbiType, usage: Usage) -> NormalizedType {
    match ty {
        AbiType::Void => NormalizedType::void(),
        AbiType::Int { bits } if bits <= 64 => {
            NormalizedType::scalar(false, round_up_scalar_bits(bits))
        }
        AbiType::Int { .. } => {
            // Wide integers travel behind a pointer like any oversized
            // aggregate; 16-byte alignment covers every supported width.
            NormalizedType::indirect(16, 16, usage)
        }
        AbiType::Float { bits } => {
            debug_assert!(bits == 32 || bits == 64, "unsupported float width {bits}");
            NormalizedType::scalar(true, bits as u8)
        }
        AbiType::Aggregate {
            size,
            align,
            scalar_leaves,
            first_half_float,
            second_half_float,
        } => {
            if !scalar_leaves || size > 16 {
                return NormalizedType::indirect(size, align, usage);
            }
            if size <= 8 {
                return NormalizedType::scalar(first_half_float, eightbyte_bits(size));
            }
            let mut n = NormalizedType::scalar(first_half_float, 64);
            n.second_slot = Some(AbiSlot {
                is_float: second_half_float,
                num_bits: eightbyte_bits(size - 8),
            });
            n
        }
    }
}

fn round_up_scalar_bits(bits: u32) -> u8 {
    match bits {
        0..=8 => 8,
        9..=16 => 16,
        17..=32 => 32,
        _ => 64,
    }
}

fn eightbyte_bits(bytes: u32) -> u8 {
    debug_assert!(bytes >= 1 && bytes <= 8);
    match bytes {
        1 => 8,
        2 => 16,
        3..=4 => 32,
        _ => 64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn void_and_scalars() {
        assert!(normalize(AbiType::Void, Usage::Argument).is_void);

        let int = normalize(AbiType::Int { bits: 17 }, Usage::Argument);
        assert!(!int.is_float && !int.is_indirect);
        assert_eq!(int.num_bits, 32);

        let f = normalize(AbiType::Float { bits: 64 }, Usage::Return);
        assert!(f.is_float);
        assert_eq!(f.num_bits, 64);
    }

    #[test]
    fn wide_int_goes_indirect() {
        let n = normalize(AbiType::Int { bits: 128 }, Usage::Argument);
        assert!(n.is_indirect);
        assert!(n.needs_indirect_copy);

        let r = normalize(AbiType::Int { bits: 128 }, Usage::Return);
        assert!(r.is_indirect);
        assert!(!r.needs_indirect_copy);
    }

    #[test]
    fn small_scalar_aggregate_in_registers() {
        let ty = AbiType::Aggregate {
            size: 12,
            align: 4,
            scalar_leaves: true,
            first_half_float: false,
            second_half_float: true,
        };
        let n = normalize(ty, Usage::Argument);
        assert!(!n.is_indirect);
        assert_eq!(n.num_bits, 64);
        assert_eq!(
            n.second_slot,
            Some(AbiSlot {
                is_float: true,
                num_bits: 32
            })
        );
    }

    #[test]
    fn large_aggregate_indirect() {
        let ty = AbiType::Aggregate {
            size: 24,
            align: 8,
            scalar_leaves: true,
            first_half_float: false,
            second_half_float: false,
        };
        let n = normalize(ty, Usage::Argument);
        assert!(n.is_indirect);
        assert_eq!(n.indirect_size, 24);
        assert_eq!(n.indirect_align, 8);
    }

    #[test]
    fn non_scalar_leaves_indirect() {
        let ty = AbiType::Aggregate {
            size: 16,
            align: 8,
            scalar_leaves: false,
            first_half_float: false,
            second_half_float: false,
        };
        assert!(normalize(ty, Usage::Argument).is_indirect);
    }
}
