//! Layout resolver
//!
//! Turns an offset-annotated field list into the sequence of data slots of
//! a composite type. Fields sharing an offset form a union and share one
//! slot; a field strictly inside the span of the previous slot is a member
//! nested in a union alternative and is addressed by slot plus micro-offset.
//! Slot indices assigned here are the only source of truth for field
//! indexing and descriptor field tables.

use ferrule_ir::{Constant, TargetData, TypeId, TypeTable};
use tracing::trace;

use crate::decl::{ClassId, StructId};
use crate::error::{LowerError, LowerResult};

/// Aggregate a field is declared in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregate {
    Class(ClassId),
    Struct(StructId),
    /// Enclosing-context pointer introduced by a nested class
    Context(ClassId),
}

/// Identifies a declared field: its aggregate and its index in the field list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldKey {
    pub owner: Aggregate,
    pub index: usize,
}

/// Position of a field in the composite type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSlot {
    /// Data slot index (the composite header is not counted)
    pub slot: usize,
    /// Offset inside the slot, in units of the field's own size
    pub micro_offset: u64,
}

/// A field handed to the resolver
#[derive(Debug, Clone)]
pub struct LayoutInput {
    pub key: FieldKey,
    pub offset: u64,
    pub ty: TypeId,
    pub init: Constant,
}

/// A field after resolution
#[derive(Debug, Clone)]
pub struct LayoutField {
    pub key: FieldKey,
    pub offset: u64,
    pub size: u64,
    pub ty: TypeId,
    pub init: Constant,
    pub slot: FieldSlot,
}

/// One composite data slot
#[derive(Debug, Clone)]
pub struct DataSlot {
    pub ty: TypeId,
    /// Source byte offset of the slot
    pub offset: u64,
    /// Default value stored in the static image
    pub init: Constant,
    /// Field that governs the slot; `None` for synthesized padding
    pub field: Option<FieldKey>,
}

/// Resolved layout of a class or struct
#[derive(Debug, Clone, Default)]
pub struct StructLayout {
    /// Every field, in ascending offset order
    pub fields: Vec<LayoutField>,
    pub slots: Vec<DataSlot>,
    /// Bytes of synthesized padding
    pub padding: u64,
    pub has_unions: bool,
}

impl StructLayout {
    pub fn slot_types(&self) -> Vec<TypeId> {
        self.slots.iter().map(|s| s.ty).collect()
    }

    /// Field starting at `offset` with exactly type `ty`
    pub fn field_at(&self, offset: u64, ty: TypeId) -> Option<&LayoutField> {
        self.fields.iter().find(|f| f.offset == offset && f.ty == ty)
    }

    /// First field starting at `offset`
    pub fn first_field_at(&self, offset: u64) -> Option<&LayoutField> {
        self.fields.iter().find(|f| f.offset == offset)
    }

    /// Field whose span contains `offset`
    pub fn field_containing(&self, offset: u64) -> Option<&LayoutField> {
        self.fields
            .iter()
            .find(|f| f.offset <= offset && offset < f.offset + f.size)
    }

    pub fn field(&self, key: FieldKey) -> Option<&LayoutField> {
        self.fields.iter().find(|f| f.key == key)
    }
}

/// Slot being accumulated during the scan
struct OpenSlot {
    offset: u64,
    size: u64,
    ty: TypeId,
    init: Constant,
    field: FieldKey,
    /// Extra bytes needed when a wider union alternative follows
    widen: u64,
}

/// Resolve the data slots of an aggregate.
///
/// `start` is the byte offset of the first data slot (the header size for
/// classes, zero for structs). Inputs are stably sorted by offset so that
/// inherited fields precede own fields at equal offsets.
pub fn resolve_layout(
    owner: &str,
    start: u64,
    mut inputs: Vec<LayoutInput>,
    types: &mut TypeTable,
    target: &TargetData,
) -> LowerResult<StructLayout> {
    inputs.sort_by_key(|f| f.offset);

    let mut layout = StructLayout::default();
    let mut cursor = start;
    let mut open: Option<OpenSlot> = None;

    for input in inputs {
        let size = target.size_of(types, input.ty)?;

        let mut placed = None;
        if let Some(slot) = open.as_mut() {
            let slot_index = layout.slots.len();
            if input.offset == slot.offset {
                if size > slot.size + slot.widen {
                    trace!(
                        class = owner,
                        offset = input.offset,
                        from = slot.size + slot.widen,
                        to = size,
                        "widening union slot"
                    );
                    slot.widen = size - slot.size;
                }
                layout.has_unions = true;
                placed = Some(FieldSlot {
                    slot: slot_index,
                    micro_offset: 0,
                });
            } else if input.offset < slot.offset + slot.size + slot.widen {
                let slot_end = slot.offset + slot.size + slot.widen;
                if input.offset + size > slot_end {
                    return Err(LowerError::UnionOverlap {
                        class: owner.to_string(),
                        offset: input.offset,
                        size,
                        slot_offset: slot.offset,
                        slot_size: slot.size + slot.widen,
                    });
                }
                let micro_offset = if size == 0 {
                    0
                } else {
                    (input.offset - slot.offset) / size
                };
                trace!(
                    class = owner,
                    offset = input.offset,
                    slot = slot_index,
                    micro_offset,
                    "field nested in union member"
                );
                layout.has_unions = true;
                placed = Some(FieldSlot {
                    slot: slot_index,
                    micro_offset,
                });
            }
        }

        let slot = match placed {
            Some(slot) => slot,
            None => {
                if let Some(prev) = open.take() {
                    cursor = commit_slot(owner, &mut layout, prev, types, target)?;
                }
                let align = target.align_of(types, input.ty)?;
                if input.offset > ferrule_ir::target::align_to(cursor, align) {
                    let gap = input.offset - cursor;
                    trace!(class = owner, offset = cursor, bytes = gap, "padding gap");
                    push_padding(&mut layout, types, cursor, gap);
                    cursor = input.offset;
                }
                open = Some(OpenSlot {
                    offset: input.offset,
                    size,
                    ty: input.ty,
                    init: input.init.clone(),
                    field: input.key,
                    widen: 0,
                });
                FieldSlot {
                    slot: layout.slots.len(),
                    micro_offset: 0,
                }
            }
        };

        layout.fields.push(LayoutField {
            key: input.key,
            offset: input.offset,
            size,
            ty: input.ty,
            init: input.init,
            slot,
        });
    }

    if let Some(prev) = open.take() {
        commit_slot(owner, &mut layout, prev, types, target)?;
    }

    Ok(layout)
}

/// Emit a slot (plus widening padding) and return the byte cursor after it
fn commit_slot(
    owner: &str,
    layout: &mut StructLayout,
    slot: OpenSlot,
    types: &mut TypeTable,
    target: &TargetData,
) -> LowerResult<u64> {
    let size = target.size_of(types, slot.ty)?;
    layout.slots.push(DataSlot {
        ty: slot.ty,
        offset: slot.offset,
        init: slot.init,
        field: Some(slot.field),
    });
    let mut end = slot.offset + size;
    if slot.widen > 0 {
        trace!(class = owner, offset = end, bytes = slot.widen, "union padding");
        push_padding(layout, types, end, slot.widen);
        end += slot.widen;
    }
    Ok(end)
}

fn push_padding(layout: &mut StructLayout, types: &mut TypeTable, offset: u64, bytes: u64) {
    let i8 = types.i8();
    let ty = types.array(i8, bytes);
    layout.slots.push(DataSlot {
        ty,
        offset,
        init: Constant::Zero(ty),
        field: None,
    });
    layout.padding += bytes;
}
