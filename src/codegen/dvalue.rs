use super::CodegenCtx;
use crate::{
    ast::{FuncId, Type, VarId},
    errors::{LowerError, LowerResult},
    lir::{IrType, Value},
    span::Loc,
};

/// The result of lowering an expression.
///
/// Values of by-reference types (structs, static arrays) are always carried
/// as the address of their storage. An immediate marked `in_place` was built
/// directly into the destination of the enclosing assignment and holds that
/// destination's address.
#[derive(Clone, Debug, PartialEq)]
pub enum DValue {
    Imm {
        ty: Type,
        val: Value,
        in_place: bool,
    },
    /// Addressable storage, loaded lazily.
    Var {
        ty: Type,
        addr: Value,
        var: Option<VarId>,
    },
    Const {
        ty: Type,
        val: Value,
    },
    Null {
        ty: Type,
        val: Value,
    },
    /// A dynamic array view that was never materialized in memory.
    Slice {
        ty: Type,
        len: Value,
        ptr: Value,
    },
    Func {
        ty: Type,
        func: Option<FuncId>,
        val: Value,
        vthis: Option<Value>,
    },
    /// `arr.length` as an assignment target; `arr` is the array's address.
    ArrayLen {
        ty: Type,
        arr: Value,
    },
    Complex {
        ty: Type,
        re: Value,
        im: Value,
    },
}

impl DValue {
    pub fn imm(ty: Type, val: Value) -> DValue {
        DValue::Imm {
            ty,
            val,
            in_place: false,
        }
    }

    pub fn in_place(ty: Type, addr: Value) -> DValue {
        DValue::Imm {
            ty,
            val: addr,
            in_place: true,
        }
    }

    pub fn var(ty: Type, addr: Value) -> DValue {
        DValue::Var {
            ty,
            addr,
            var: None,
        }
    }

    /// The value of expressions that produce nothing.
    pub fn void() -> DValue {
        DValue::Const {
            ty: Type::void(),
            val: Value::undef(IrType::Void),
        }
    }

    pub fn ty(&self) -> &Type {
        match self {
            DValue::Imm { ty, .. }
            | DValue::Var { ty, .. }
            | DValue::Const { ty, .. }
            | DValue::Null { ty, .. }
            | DValue::Slice { ty, .. }
            | DValue::Func { ty, .. }
            | DValue::ArrayLen { ty, .. }
            | DValue::Complex { ty, .. } => ty,
        }
    }

    pub fn is_in_place(&self) -> bool {
        matches!(self, DValue::Imm { in_place: true, .. })
    }

    pub fn is_slice(&self) -> bool {
        matches!(self, DValue::Slice { .. })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DValue::Null { .. })
    }

    /// The constant behind constants and null literals.
    pub fn as_const(&self) -> Option<&Value> {
        match self {
            DValue::Const { val, .. } | DValue::Null { val, .. } => Some(val),
            DValue::Imm { val, in_place: false, .. } if val.is_const() => Some(val),
            _ => None,
        }
    }

    /// The same value seen at another frontend type with an identical IR
    /// representation.
    pub fn retag(self, to: Type) -> DValue {
        match self {
            DValue::Imm { val, in_place, .. } => DValue::Imm {
                ty: to,
                val,
                in_place,
            },
            DValue::Var { addr, var, .. } => DValue::Var { ty: to, addr, var },
            DValue::Const { val, .. } => DValue::Const { ty: to, val },
            DValue::Null { val, .. } => DValue::Null { ty: to, val },
            DValue::Slice { len, ptr, .. } => DValue::Slice { ty: to, len, ptr },
            DValue::Func {
                func, val, vthis, ..
            } => DValue::Func {
                ty: to,
                func,
                val,
                vthis,
            },
            DValue::ArrayLen { arr, .. } => DValue::ArrayLen { ty: to, arr },
            DValue::Complex { re, im, .. } => DValue::Complex { ty: to, re, im },
        }
    }
}

impl<'a> CodegenCtx<'a> {
    /// The value of `v` as a first-class operand. By-reference types answer
    /// with their address.
    pub fn rval(&mut self, v: &DValue) -> Value {
        match v {
            DValue::Imm {
                ty,
                val,
                in_place: true,
            } => {
                if self.is_by_ref(ty) {
                    val.clone()
                } else {
                    self.load(val.clone())
                }
            }
            DValue::Imm { val, .. }
            | DValue::Const { val, .. }
            | DValue::Null { val, .. }
            | DValue::Func { val, .. } => val.clone(),
            DValue::Var { ty, addr, .. } => {
                if self.is_by_ref(ty) {
                    addr.clone()
                } else {
                    self.load(addr.clone())
                }
            }
            DValue::Slice { ty, len, ptr } => {
                let ty = ty.clone();
                self.pack_pair(&ty, len.clone(), ptr.clone(), "tmpslice")
            }
            DValue::ArrayLen { arr, .. } => {
                let len = self.gepi(arr.clone(), 0, 0);
                self.load(len)
            }
            DValue::Complex { ty, re, im } => {
                let ty = ty.clone();
                self.pack_pair(&ty, re.clone(), im.clone(), "tmpcomplex")
            }
        }
    }

    /// Builds a two-field first-class record, folding to a constant when both
    /// halves are constant.
    pub(crate) fn pack_pair(&mut self, ty: &Type, a: Value, b: Value, name: &str) -> Value {
        let irty = self.ir_type(ty);
        if a.is_const() && b.is_const() {
            return Value::aggregate(irty, vec![a, b]);
        }
        let mem = self.alloca(irty, name);
        let p0 = self.gepi(mem.clone(), 0, 0);
        self.store(a, p0);
        let p1 = self.gepi(mem.clone(), 0, 1);
        self.store(b, p1);
        self.load(mem)
    }

    /// The address of `v`. Fails for values without backing storage.
    pub fn lval(&mut self, v: &DValue, loc: &Loc) -> LowerResult<Value> {
        match v {
            DValue::Var { addr, .. } => Ok(addr.clone()),
            DValue::ArrayLen { arr, .. } => Ok(arr.clone()),
            DValue::Imm {
                val,
                in_place: true,
                ..
            } => Ok(val.clone()),
            DValue::Imm { ty, val, .. } if self.is_by_ref(ty) => Ok(val.clone()),
            DValue::Func { val, .. } => Ok(val.clone()),
            _ => Err(LowerError::compile(
                format!(
                    "cannot take the address of an rvalue of type `{}`",
                    v.ty().name(self.src)
                ),
                loc,
            )),
        }
    }

    /// The address of `v`, spilling rvalues into a fresh stack slot.
    pub(crate) fn spill(&mut self, v: &DValue, name: &str) -> Value {
        match v {
            DValue::Var { addr, .. } => addr.clone(),
            DValue::Imm { val, in_place: true, .. } => val.clone(),
            DValue::Imm { ty, val, .. } if self.is_by_ref(ty) => val.clone(),
            _ => {
                let ty = v.ty().clone();
                let irty = self.ir_type(&ty);
                let val = self.rval(v);
                let mem = self.alloca(irty, name);
                self.store(val, mem.clone());
                mem
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use crate::lir::{Inst, IrType, Value};

    #[test]
    fn immediates_have_no_address() {
        let t = TestModule::new();
        let mut ctx = t.ctx();
        let v = DValue::imm(Type::int(), Value::const_int(IrType::i32(), 3));
        let err = ctx.lval(&v, &t.loc()).unwrap_err();
        assert_eq!(err.kind, LowerErrorKind::Compile);
        assert!(!err.is_fatal());
    }

    #[test]
    fn variables_load_lazily() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        let slot = ctx.alloca(IrType::i32(), "x");
        let v = DValue::var(Type::int(), slot.clone());
        assert_eq!(ctx.lval(&v, &t.loc()).unwrap(), slot);
        assert_eq!(ctx.count(|i| matches!(i, Inst::Load(_))), 0);
        let loaded = ctx.rval(&v);
        assert_eq!(loaded.ty, IrType::i32());
        assert_eq!(ctx.count(|i| matches!(i, Inst::Load(_))), 1);
    }

    #[test]
    fn constant_slices_pack_without_memory() {
        let t = TestModule::new();
        let mut ctx = t.ctx();
        let ty = Type::int().array_of();
        let slice = DValue::Slice {
            ty,
            len: ctx.const_size(0),
            ptr: Value::null(IrType::i32().ptr_to()),
        };
        let packed = ctx.rval(&slice);
        assert!(packed.is_const());
        assert_eq!(packed.elements().map(|e| e.len()), Some(2));
    }
}
