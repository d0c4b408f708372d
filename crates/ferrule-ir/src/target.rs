//! Target data layout
//!
//! ABI sizes and alignment for IR types, and element offsets of struct
//! types. Structs use natural (non-packed) layout: each element is aligned
//! to its own alignment and the total size is rounded up to the struct's
//! alignment.

use crate::error::{IrError, IrResult};
use crate::types::{IrType, TypeId, TypeTable};

/// Computed layout of a struct type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateLayout {
    /// Byte offset of each element
    pub offsets: Vec<u64>,
    /// Total size in bytes, including tail padding
    pub size: u64,
    /// Alignment in bytes
    pub align: u64,
}

impl AggregateLayout {
    /// Byte offset of element `index`
    pub fn element_offset(&self, index: usize) -> Option<u64> {
        self.offsets.get(index).copied()
    }

    /// Index of the element starting exactly at `offset`
    pub fn element_at(&self, offset: u64) -> Option<usize> {
        self.offsets.iter().position(|&o| o == offset)
    }
}

/// Target description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetData {
    pointer_size: u64,
}

impl TargetData {
    /// Create target data for the given pointer width in bits
    pub fn new(pointer_bits: u32) -> IrResult<Self> {
        match pointer_bits {
            32 | 64 => Ok(Self {
                pointer_size: u64::from(pointer_bits / 8),
            }),
            other => Err(IrError::PointerWidth(other)),
        }
    }

    /// Pointer size in bytes
    pub fn pointer_size(&self) -> u64 {
        self.pointer_size
    }

    /// Pointer width in bits
    pub fn pointer_bits(&self) -> u32 {
        (self.pointer_size * 8) as u32
    }

    /// The pointer-sized unsigned integer type (`size_t`)
    pub fn size_type(&self, types: &mut TypeTable) -> TypeId {
        types.int(self.pointer_bits())
    }

    /// ABI size of a type in bytes
    pub fn size_of(&self, types: &TypeTable, ty: TypeId) -> IrResult<u64> {
        match types.get(ty) {
            IrType::Int(bits) => Ok(u64::from(bits.div_ceil(8))),
            IrType::F32 => Ok(4),
            IrType::F64 => Ok(8),
            IrType::Ptr(_) => Ok(self.pointer_size),
            IrType::Array { elem, len } => Ok(self.size_of(types, *elem)? * len),
            IrType::Struct(_) => Ok(self.struct_layout(types, ty)?.size),
            IrType::Void | IrType::Function { .. } | IrType::Opaque => Err(IrError::Unsized {
                ty: types.display(ty),
            }),
        }
    }

    /// ABI alignment of a type in bytes
    pub fn align_of(&self, types: &TypeTable, ty: TypeId) -> IrResult<u64> {
        match types.get(ty) {
            IrType::Int(bits) => Ok(u64::from(bits.div_ceil(8)).clamp(1, 8)),
            IrType::F32 => Ok(4),
            IrType::F64 => Ok(8),
            IrType::Ptr(_) => Ok(self.pointer_size),
            IrType::Array { elem, .. } => self.align_of(types, *elem),
            IrType::Struct(_) => Ok(self.struct_layout(types, ty)?.align),
            IrType::Void | IrType::Function { .. } | IrType::Opaque => Err(IrError::Unsized {
                ty: types.display(ty),
            }),
        }
    }

    /// Element offsets, size and alignment of a struct type
    pub fn struct_layout(&self, types: &TypeTable, ty: TypeId) -> IrResult<AggregateLayout> {
        let fields = types.struct_fields(ty).ok_or_else(|| IrError::Unsized {
            ty: types.display(ty),
        })?;

        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0u64;
        let mut align = 1u64;
        for &field in fields {
            let field_align = self.align_of(types, field)?;
            offset = align_to(offset, field_align);
            offsets.push(offset);
            offset += self.size_of(types, field)?;
            align = align.max(field_align);
        }

        Ok(AggregateLayout {
            offsets,
            size: align_to(offset, align),
            align,
        })
    }
}

/// Round `offset` up to a multiple of `align`
pub fn align_to(offset: u64, align: u64) -> u64 {
    if align <= 1 {
        return offset;
    }
    offset.div_ceil(align) * align
}
