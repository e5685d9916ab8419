//! Arrays: length and pointer views, indexing, slicing, concatenation and
//! associative array lookups.

use super::{Codegen, CodegenCtx, DValue};
use crate::{
    ast::{Expr, Type},
    errors::{LowerError, LowerResult},
    lir::{Op, Value},
};

impl<'a> CodegenCtx<'a> {
    /// The element count of an array value.
    pub fn array_len(&mut self, v: &DValue) -> Value {
        let t = v.ty().to_base(self.src);
        if let Type::SArray(_, n) = t {
            return self.const_size(n);
        }
        match v {
            DValue::Slice { len, .. } => len.clone(),
            DValue::Null { .. } => self.const_size(0),
            DValue::Const { val, .. } => match val.elements() {
                Some(elems) => elems[0].clone(),
                None => self.const_size(0),
            },
            _ => {
                let addr = self.spill(v, "tmparray");
                let len = self.gepi(addr, 0, 0);
                self.load(len)
            }
        }
    }

    /// Pointer to the first element of an array value.
    pub fn array_ptr(&mut self, v: &DValue) -> Value {
        let t = v.ty().to_base(self.src);
        match t {
            Type::SArray(..) => {
                let addr = self.spill(v, "tmparray");
                self.gepi(addr, 0, 0)
            }
            Type::Pointer(_) => self.rval(v),
            _ => {
                if let Some(elems) = v.as_const().and_then(|c| c.elements()) {
                    return elems[1].clone();
                }
                match v {
                    DValue::Slice { ptr, .. } => ptr.clone(),
                    DValue::Null { .. } => {
                        let elem = t.next().cloned().unwrap_or_else(Type::void);
                        let elem = self.elem_ir_type(&elem);
                        Value::null(elem.ptr_to())
                    }
                    _ => {
                        let addr = self.spill(v, "tmparray");
                        let ptr = self.gepi(addr, 0, 1);
                        self.load(ptr)
                    }
                }
            }
        }
    }

    /// A dynamic array value for `v`; static arrays are sliced whole.
    pub(crate) fn array_value(&mut self, v: &DValue) -> Value {
        let t = v.ty().to_base(self.src);
        match &t {
            Type::SArray(elem, _) => {
                let len = self.array_len(v);
                let ptr = self.array_ptr(v);
                let ty = Type::DArray(elem.clone());
                self.pack_pair(&ty, len, ptr, "tmpslice")
            }
            _ => self.rval(v),
        }
    }

    pub(crate) fn lower_index(&mut self, e: &Expr, base: &Expr, idx: &Expr) -> LowerResult<DValue> {
        let b = base.codegen(self)?;
        let bt = base.ty.to_base(self.src);
        let size_t = self.ir.size_t();
        match &bt {
            Type::Pointer(_) => {
                let i = idx.codegen(self)?;
                let i = self.rval(&i);
                let i = self.int_cast(i, size_t, !idx.ty.is_unsigned());
                let p = self.rval(&b);
                let p = self.offset(p, i);
                Ok(DValue::var(e.ty.clone(), p))
            }
            Type::SArray(..) | Type::DArray(_) => {
                let i = self.with_array(b.clone(), |ctx| idx.codegen(ctx))?;
                let i = self.rval(&i);
                let i = self.int_cast(i, size_t, !idx.ty.is_unsigned());
                let p = self.array_ptr(&b);
                let p = self.offset(p, i);
                Ok(DValue::var(e.ty.clone(), p))
            }
            Type::AArray(_, key) => {
                let k = idx.codegen(self)?;
                let aa = self.lval(&b, &base.loc)?;
                let keyti = self.typeinfo(key);
                let val_ir = self.ir_type(&e.ty);
                let valsize = self.const_size(self.ir.alloc_size(&val_ir));
                let pkey = self.spill(&k, "aakey");
                let p = self.call_runtime("_aaGet", vec![aa, keyti, valsize, pkey]);
                let p = self.bitcast(p, val_ir.ptr_to());
                Ok(DValue::var(e.ty.clone(), p))
            }
            t => Err(LowerError::compile(
                format!("`{}` cannot be indexed", t.name(self.src)),
                &e.loc,
            )),
        }
    }

    /// `hi - lo` for lengths, folded when both ends are constant and
    /// skipped when `lo` is zero.
    fn length_between(&mut self, lo: Value, hi: Value) -> Value {
        match (lo.as_const_int(), hi.as_const_int()) {
            (Some(l), Some(h)) => self.const_size(h.wrapping_sub(l)),
            (Some(0), None) => hi,
            _ => self.bin(Op::Sub, hi, lo),
        }
    }

    pub(crate) fn lower_slice(
        &mut self,
        e: &Expr,
        base: &Expr,
        lo: Option<&Expr>,
        hi: Option<&Expr>,
    ) -> LowerResult<DValue> {
        let b = base.codegen(self)?;
        let bt = base.ty.to_base(self.src);
        if !matches!(bt, Type::Pointer(_) | Type::SArray(..) | Type::DArray(_)) {
            bug!("slicing a value of type {}", bt.name(self.src));
        }

        let (lo, hi) = match (lo, hi) {
            (Some(lo), Some(hi)) => (lo, hi),
            _ => {
                if bt.is_pointer() {
                    return Err(LowerError::compile("pointers can only be sliced with bounds", &e.loc));
                }
                let len = self.array_len(&b);
                let ptr = self.array_ptr(&b);
                return Ok(DValue::Slice {
                    ty: e.ty.clone(),
                    len,
                    ptr,
                });
            }
        };

        let (l, h) = self.with_array(b.clone(), |ctx| {
            let l = lo.codegen(ctx)?;
            let h = hi.codegen(ctx)?;
            Ok((l, h))
        })?;
        let size_t = self.ir.size_t();
        let l = self.rval(&l);
        let l = self.int_cast(l, size_t.clone(), false);
        let h = self.rval(&h);
        let h = self.int_cast(h, size_t, false);

        let src = self.array_ptr(&b);
        let ptr = if l.is_zero() { src } else { self.offset(src, l.clone()) };
        let len = self.length_between(l, h);
        let elem = e.ty.to_base(self.src).next().cloned().unwrap_or_else(Type::void);
        let elem_ir = self.elem_ir_type(&elem);
        let ptr = self.bitcast(ptr, elem_ir.ptr_to());
        Ok(DValue::Slice {
            ty: e.ty.clone(),
            len,
            ptr,
        })
    }

    pub(crate) fn lower_dollar(&mut self, e: &Expr) -> LowerResult<DValue> {
        let arr = match self.enclosing_array() {
            Some(arr) => arr.clone(),
            None => bug!("`$` outside of an index or slice"),
        };
        let len = self.array_len(&arr);
        Ok(DValue::imm(e.ty.clone(), len))
    }

    pub(crate) fn lower_array_length(&mut self, e: &Expr, arr: &Expr) -> LowerResult<DValue> {
        let v = arr.codegen(self)?;
        if self.is_assign_lhs(e) {
            let addr = self.lval(&v, &arr.loc)?;
            return Ok(DValue::ArrayLen {
                ty: arr.ty.clone(),
                arr: addr,
            });
        }
        let len = self.array_len(&v);
        Ok(DValue::imm(e.ty.clone(), len))
    }

    /// A one-element view of `v` for concatenation with arrays.
    fn singleton(&mut self, v: &DValue, arr_ty: &Type) -> Value {
        let ptr = self.spill(v, "catelem");
        let len = self.const_size(1);
        self.pack_pair(arr_ty, len, ptr, "tmpslice")
    }

    fn is_element_of(&self, v: &Type, arr: &Type) -> bool {
        let arr = arr.to_base(self.src);
        let v = v.to_base(self.src);
        arr.next() == Some(&v) && !matches!(v, Type::DArray(_) | Type::SArray(..))
    }

    pub(crate) fn lower_cat(&mut self, e: &Expr, lhs: &Expr, rhs: &Expr) -> LowerResult<DValue> {
        let l = lhs.codegen(self)?;
        let r = rhs.codegen(self)?;
        let a = if self.is_element_of(&lhs.ty, &e.ty) {
            self.singleton(&l, &e.ty)
        } else {
            self.array_value(&l)
        };
        let b = if self.is_element_of(&rhs.ty, &e.ty) {
            self.singleton(&r, &e.ty)
        } else {
            self.array_value(&r)
        };
        let ti = self.typeinfo(&e.ty);
        let res = self.call_runtime("_d_arraycatT", vec![ti, a, b]);

        let arr_ir = self.ir_type(&e.ty);
        if let Some(DValue::Var { addr, .. }) = self.assign_dest(e) {
            if addr.ty.pointee() == Some(&arr_ir) {
                self.store_runtime_array(res, addr.clone());
                return Ok(DValue::in_place(e.ty.clone(), addr));
            }
        }
        let mem = self.alloca(arr_ir, "catresult");
        self.store_runtime_array(res, mem.clone());
        Ok(DValue::var(e.ty.clone(), mem))
    }

    pub(crate) fn lower_cat_assign(&mut self, e: &Expr, lhs: &Expr, rhs: &Expr) -> LowerResult<DValue> {
        let l = lhs.codegen(self)?;
        let addr = self.lval(&l, &lhs.loc)?;
        let r = rhs.codegen(self)?;
        let ti = self.typeinfo(&lhs.ty);
        let res = if self.is_element_of(&rhs.ty, &lhs.ty) {
            let elem = self.spill(&r, "appendelem");
            self.call_runtime("_d_arrayappendcT", vec![ti, addr.clone(), elem])
        } else {
            let arr = self.array_value(&r);
            self.call_runtime("_d_arrayappendT", vec![ti, addr.clone(), arr])
        };
        self.store_runtime_array(res, addr);
        log::trace!("appended to {}", e.ty.name(self.src));
        Ok(l)
    }

    pub(crate) fn lower_in(&mut self, e: &Expr, key: &Expr, aa: &Expr) -> LowerResult<DValue> {
        let k = key.codegen(self)?;
        let a = aa.codegen(self)?;
        let keyty = match aa.ty.to_base(self.src) {
            Type::AArray(_, k) => *k,
            t => bug!("`in` on {}", t.name(self.src)),
        };
        let keyti = self.typeinfo(&keyty);
        let aav = self.rval(&a);
        let pkey = self.spill(&k, "aakey");
        let res = self.call_runtime("_aaIn", vec![aav, keyti, pkey]);
        let ty = self.ir_type(&e.ty);
        let res = self.bitcast(res, ty);
        Ok(DValue::imm(e.ty.clone(), res))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use crate::lir::{Inst, Op};

    fn slice_of(t: &TestModule, a: VarId, lo: Option<Expr>, hi: Option<Expr>) -> Expr {
        let ty = t.m.var(a).ty.next().cloned().unwrap().array_of();
        t.expr(ExprKind::Slice(Box::new(t.var(a)), lo.map(Box::new), hi.map(Box::new)), ty)
    }

    #[test]
    fn constant_bounds_fold_the_length() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let a = t.m.add_local(f, "a", Type::int().array_of());
        let s = slice_of(&t, a, Some(t.typed_int(2, Type::Basic(Basic::ULong))), Some(t.typed_int(5, Type::Basic(Basic::ULong))));
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(a);
        match s.codegen(&mut ctx).unwrap() {
            DValue::Slice { len, .. } => assert_eq!(len.as_const_int(), Some(3)),
            v => panic!("expected a slice, got {:?}", v),
        }
        assert_eq!(ctx.count(|i| matches!(i, Inst::Bin { op: Op::Sub, .. })), 0);
    }

    #[test]
    fn zero_lower_bound_reuses_the_pointer() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let a = t.m.add_local(f, "a", Type::int().array_of());
        let n = t.m.add_local(f, "n", Type::Basic(Basic::ULong));
        let s = slice_of(&t, a, Some(t.typed_int(0, Type::Basic(Basic::ULong))), Some(t.var(n)));
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(a);
        ctx.declare_local_for_test(n);
        s.codegen(&mut ctx).unwrap();
        // the only element offsets read the pointer field, none advance it
        assert_eq!(
            ctx.count(|i| matches!(i, Inst::Gep { indices, .. } if indices.len() == 1)),
            0
        );
        assert_eq!(ctx.count(|i| matches!(i, Inst::Bin { op: Op::Sub, .. })), 0);
    }

    #[test]
    fn dollar_is_the_length_of_the_indexed_array() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let a = t.m.add_local(f, "a", Type::SArray(Box::new(Type::int()), 6));
        let size_t = Type::Basic(Basic::ULong);
        let dollar = t.expr(ExprKind::Dollar, size_t.clone());
        let last = t.binary(BinOp::Sub, dollar, t.typed_int(1, size_t.clone()), size_t);
        let idx = t.expr(ExprKind::Index(Box::new(t.var(a)), Box::new(last)), Type::int());
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(a);
        let v = idx.codegen(&mut ctx).unwrap();
        assert!(matches!(v, DValue::Var { .. }));
    }

    #[test]
    fn length_assignment_resizes_through_the_runtime() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let a = t.m.add_local(f, "a", Type::int().array_of());
        let size_t = Type::Basic(Basic::ULong);
        let len = t.expr(ExprKind::ArrayLength(Box::new(t.var(a))), size_t.clone());
        let e = t.assign(len, t.typed_int(10, size_t));
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(a);
        e.codegen(&mut ctx).unwrap();
        assert!(ctx.ir.function("_d_arraysetlengthT").is_some());
    }

    #[test]
    fn concatenation_builds_into_the_destination() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let arr = Type::int().array_of();
        let a = t.m.add_local(f, "a", arr.clone());
        let b = t.m.add_local(f, "b", arr.clone());
        let cat = t.expr(ExprKind::Cat(Box::new(t.var(a)), Box::new(t.var(b))), arr);
        let e = t.assign(t.var(a), cat);
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(a);
        ctx.declare_local_for_test(b);
        e.codegen(&mut ctx).unwrap();
        assert_eq!(ctx.count(|i| matches!(i, Inst::Memcpy { .. })), 0);
        assert_eq!(
            ctx.count(|i| matches!(i, Inst::Alloca { name, .. } if name == "catresult")),
            0
        );
    }
}
