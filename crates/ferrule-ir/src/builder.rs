//! Function body builder
//!
//! Straight-line instruction emission. Lowering of call sites (allocation,
//! casts, field access, virtual calls) appends instructions to the body of
//! the function being compiled; control flow belongs to the outer code
//! generator and is not modelled here.

use crate::constant::Constant;
use crate::error::{IrError, IrResult};
use crate::types::{IrType, TypeId, TypeTable};

/// SSA value produced by an instruction or a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Instruction operand
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(ValueId),
    Const(Constant),
}

impl From<ValueId> for Operand {
    fn from(v: ValueId) -> Self {
        Operand::Value(v)
    }
}

impl From<Constant> for Operand {
    fn from(c: Constant) -> Self {
        Operand::Const(c)
    }
}

/// Value conversions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    /// Reinterpret without changing bits
    BitCast,
    /// Narrow an integer
    Trunc,
    /// Widen a signed integer
    SExt,
    /// Widen an unsigned integer
    ZExt,
    /// Narrow a float
    FpTrunc,
    /// Widen a float
    FpExt,
}

/// Instructions
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Frame-local slot; `dest` is a pointer to `ty`
    Alloca { dest: ValueId, ty: TypeId },
    Load { dest: ValueId, ptr: Operand },
    Store { value: Operand, ptr: Operand },
    /// Address of an element inside an aggregate (first index steps over the pointer)
    FieldAddr {
        dest: ValueId,
        base: Operand,
        indices: Vec<u64>,
    },
    /// Pointer advanced by `index` elements of its pointee type
    ElementOffset {
        dest: ValueId,
        base: Operand,
        index: i64,
    },
    Cast {
        dest: ValueId,
        kind: CastKind,
        value: Operand,
        to: TypeId,
    },
    Call {
        dest: Option<ValueId>,
        callee: Operand,
        args: Vec<Operand>,
    },
    /// Copy `len` bytes from `src` to `dst`
    MemCopy { dst: Operand, src: Operand, len: u64 },
}

/// Block terminator
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Return(Option<Operand>),
}

/// Body of a function under construction
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    pub params: Vec<ValueId>,
    pub value_types: Vec<TypeId>,
    pub instrs: Vec<Instr>,
    pub terminator: Option<Terminator>,
}

impl FunctionBody {
    pub fn value_type(&self, v: ValueId) -> TypeId {
        self.value_types[v.0 as usize]
    }
}

/// Builder appending instructions to a function body
pub struct FunctionBuilder {
    body: FunctionBody,
}

impl FunctionBuilder {
    /// Start a body for a function of type `fn_ty`
    pub fn new(types: &TypeTable, fn_ty: TypeId) -> IrResult<Self> {
        let params = match types.get(fn_ty) {
            IrType::Function { params, .. } => params.clone(),
            _ => {
                return Err(IrError::NotAFunction {
                    ty: types.display(fn_ty),
                })
            }
        };
        let mut body = FunctionBody {
            params: Vec::with_capacity(params.len()),
            value_types: Vec::new(),
            instrs: Vec::new(),
            terminator: None,
        };
        for ty in params {
            let v = ValueId(body.value_types.len() as u32);
            body.value_types.push(ty);
            body.params.push(v);
        }
        Ok(Self { body })
    }

    /// Parameter `index` of the function
    pub fn param(&self, index: usize) -> Option<ValueId> {
        self.body.params.get(index).copied()
    }

    /// All parameters, in order
    pub fn params(&self) -> &[ValueId] {
        &self.body.params
    }

    fn new_value(&mut self, ty: TypeId) -> ValueId {
        let v = ValueId(self.body.value_types.len() as u32);
        self.body.value_types.push(ty);
        v
    }

    /// IR type of an operand
    pub fn operand_type(&self, op: &Operand) -> TypeId {
        match op {
            Operand::Value(v) => self.body.value_type(*v),
            Operand::Const(c) => c.ty(),
        }
    }

    fn pointee(&self, types: &TypeTable, op: &Operand) -> IrResult<TypeId> {
        let ty = self.operand_type(op);
        types.pointee(ty).ok_or_else(|| IrError::NotAPointer {
            ty: types.display(ty),
        })
    }

    pub fn alloca(&mut self, types: &mut TypeTable, ty: TypeId) -> ValueId {
        let ptr = types.ptr(ty);
        let dest = self.new_value(ptr);
        self.body.instrs.push(Instr::Alloca { dest, ty });
        dest
    }

    pub fn load(&mut self, types: &TypeTable, ptr: impl Into<Operand>) -> IrResult<ValueId> {
        let ptr = ptr.into();
        let ty = self.pointee(types, &ptr)?;
        let dest = self.new_value(ty);
        self.body.instrs.push(Instr::Load { dest, ptr });
        Ok(dest)
    }

    pub fn store(&mut self, value: impl Into<Operand>, ptr: impl Into<Operand>) {
        self.body.instrs.push(Instr::Store {
            value: value.into(),
            ptr: ptr.into(),
        });
    }

    /// Address of a nested element; `indices[0]` indexes the pointer itself
    pub fn field_addr(
        &mut self,
        types: &mut TypeTable,
        base: impl Into<Operand>,
        indices: &[u64],
    ) -> IrResult<ValueId> {
        let base = base.into();
        let mut ty = self.pointee(types, &base)?;
        for &index in indices.iter().skip(1) {
            ty = types.element_type(ty, index)?;
        }
        let ptr = types.ptr(ty);
        let dest = self.new_value(ptr);
        self.body.instrs.push(Instr::FieldAddr {
            dest,
            base,
            indices: indices.to_vec(),
        });
        Ok(dest)
    }

    /// Pointer arithmetic in units of the pointee type
    pub fn element_offset(
        &mut self,
        types: &TypeTable,
        base: impl Into<Operand>,
        index: i64,
    ) -> IrResult<ValueId> {
        let base = base.into();
        self.pointee(types, &base)?;
        let ty = self.operand_type(&base);
        let dest = self.new_value(ty);
        self.body.instrs.push(Instr::ElementOffset { dest, base, index });
        Ok(dest)
    }

    pub fn cast(&mut self, kind: CastKind, value: impl Into<Operand>, to: TypeId) -> ValueId {
        let dest = self.new_value(to);
        self.body.instrs.push(Instr::Cast {
            dest,
            kind,
            value: value.into(),
            to,
        });
        dest
    }

    /// Reinterpret a value; returns the operand unchanged if it already has type `to`
    pub fn bitcast(&mut self, value: impl Into<Operand>, to: TypeId) -> Operand {
        let value = value.into();
        if self.operand_type(&value) == to {
            return value;
        }
        Operand::Value(self.cast(CastKind::BitCast, value, to))
    }

    /// Call through a function pointer; `None` for void results
    pub fn call(
        &mut self,
        types: &TypeTable,
        callee: impl Into<Operand>,
        args: Vec<Operand>,
    ) -> IrResult<Option<ValueId>> {
        let callee = callee.into();
        let fn_ty = self.pointee(types, &callee)?;
        let ret = match types.get(fn_ty) {
            IrType::Function { ret, .. } => *ret,
            _ => {
                return Err(IrError::NotAFunction {
                    ty: types.display(fn_ty),
                })
            }
        };
        let dest = match types.get(ret) {
            IrType::Void => None,
            _ => Some(self.new_value(ret)),
        };
        self.body.instrs.push(Instr::Call { dest, callee, args });
        Ok(dest)
    }

    /// Call whose result is required
    pub fn call_value(
        &mut self,
        types: &TypeTable,
        callee: impl Into<Operand>,
        args: Vec<Operand>,
    ) -> IrResult<ValueId> {
        let callee = callee.into();
        let callee_ty = self.operand_type(&callee);
        self.call(types, callee, args)?.ok_or_else(|| IrError::VoidCall {
            ty: types.display(callee_ty),
        })
    }

    pub fn memcpy(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>, len: u64) {
        self.body.instrs.push(Instr::MemCopy {
            dst: dst.into(),
            src: src.into(),
            len,
        });
    }

    pub fn ret(&mut self, value: Option<Operand>) {
        self.body.terminator = Some(Terminator::Return(value));
    }

    /// Instructions emitted so far
    pub fn instrs(&self) -> &[Instr] {
        &self.body.instrs
    }

    pub fn finish(self) -> FunctionBody {
        self.body
    }
}
