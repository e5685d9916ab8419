//! Assignment and copies between lowered values.

use super::{Codegen, CodegenCtx, DValue};
use crate::{
    ast::{Expr, Type},
    errors::LowerResult,
    lir::{IntPred, IrType, Op, Value},
    span::Loc,
};

impl<'a> CodegenCtx<'a> {
    pub(crate) fn lower_assign(&mut self, e: &Expr, lhs: &Expr, rhs: &Expr) -> LowerResult<DValue> {
        self.with_frame(Some(lhs), rhs, None, |ctx| {
            let l = lhs.codegen(ctx)?;
            ctx.set_frame_dest(l.clone());
            let r = rhs.codegen(ctx)?;
            if r.is_in_place() {
                log::trace!("{} constructed in place", rhs.kind.name());
            } else {
                ctx.assign(&l, &r, &e.loc)?;
            }
            Ok(l)
        })
    }

    /// Stores `r` into the storage behind `l`.
    pub fn assign(&mut self, l: &DValue, r: &DValue, loc: &Loc) -> LowerResult {
        let t = l.ty().to_base(self.src);
        match l {
            DValue::ArrayLen { ty, arr } => {
                let len = self.rval(r);
                let size_t = self.ir.size_t();
                let len = self.int_cast(len, size_t, false);
                self.resize_array(ty, arr.clone(), len);
                return Ok(());
            }
            DValue::Slice { len, ptr, .. } => {
                let elem = t.next().cloned().unwrap_or_else(Type::void);
                return self.assign_elements(&elem, ptr.clone(), len.clone(), r);
            }
            _ => {}
        }

        let addr = self.lval(l, loc)?;
        match &t {
            Type::Struct(_) => self.copy_aggregate(addr, r),
            Type::SArray(elem, n) => {
                let rt = r.ty().to_base(self.src);
                if matches!(rt, Type::SArray(..)) && rt.next() == Some(&**elem) {
                    self.copy_aggregate(addr, r)
                } else {
                    let ptr = self.gepi(addr, 0, 0);
                    let len = self.const_size(*n);
                    self.assign_elements(elem, ptr, len, r)
                }
            }
            Type::DArray(_) => {
                match r {
                    DValue::Slice { len, ptr, .. } => {
                        let lp = self.gepi(addr.clone(), 0, 0);
                        self.store(len.clone(), lp);
                        let pp = self.gepi(addr, 0, 1);
                        let ptr = self.coerce_store(ptr.clone(), &pp);
                        self.store(ptr, pp);
                    }
                    _ => {
                        let v = self.array_value(r);
                        let v = self.coerce_store(v, &addr);
                        self.store(v, addr);
                    }
                }
                Ok(())
            }
            t if t.is_complex() => {
                let part = self.complex_part_type(t);
                let (re, im) = self.complex_parts(r, &part);
                let rp = self.gepi(addr.clone(), 0, 0);
                self.store(re, rp);
                let ip = self.gepi(addr, 0, 1);
                self.store(im, ip);
                Ok(())
            }
            _ => {
                let v = self.rval(r);
                let v = self.coerce_store(v, &addr);
                self.store(v, addr);
                Ok(())
            }
        }
    }

    /// Copies a struct or static array value into `dest`.
    fn copy_aggregate(&mut self, dest: Value, r: &DValue) -> LowerResult {
        let ty = match dest.ty.pointee() {
            Some(t) => t.clone(),
            None => bug!("copy into non-pointer {}", dest),
        };
        if let Some(c) = r.as_const() {
            if c.is_zero() {
                let size = self.const_size(self.ir.alloc_size(&ty));
                self.memset_zero(dest, size);
            } else {
                let c = if c.ty == ty { c.clone() } else { Value::const_bitcast(c.clone(), ty) };
                self.store(c, dest);
            }
            return Ok(());
        }
        let src = self.spill(r, "tmpcopy");
        if src == dest {
            return Ok(());
        }
        let size = self.const_size(self.ir.alloc_size(&ty));
        self.memcpy(dest, src, size);
        Ok(())
    }

    /// `dest[0 .. len] = r`, either an array copy or a fill with one element.
    fn assign_elements(&mut self, elem: &Type, ptr: Value, len: Value, r: &DValue) -> LowerResult {
        let rt = r.ty().to_base(self.src);
        let is_array = matches!(rt, Type::DArray(_) | Type::SArray(..)) && rt.next() == Some(elem);
        if !is_array {
            return self.fill_array(elem, ptr, len, r);
        }
        let src = self.array_ptr(r);
        let elem_ir = self.elem_ir_type(elem);
        let size = self.ir.alloc_size(&elem_ir);
        let bytes = match len.as_const_int() {
            Some(n) => self.const_size(n * size),
            None => self.bin(Op::Mul, len, self.const_size(size)),
        };
        self.memcpy(ptr, src, bytes);
        Ok(())
    }

    /// Stores `val` into each of the `len` elements starting at `ptr`.
    pub(crate) fn fill_array(&mut self, elem: &Type, ptr: Value, len: Value, val: &DValue) -> LowerResult {
        let size_t = self.ir.size_t();
        let idx = self.alloca(size_t.clone(), "arrayinit.idx");
        self.store(Value::const_int(size_t.clone(), 0), idx.clone());

        let cond = self.append_block("arrayinit.cond");
        let body = self.append_block("arrayinit.body");
        let end = self.append_block("arrayinit.end");
        self.br(cond);

        self.position_at(cond);
        let i = self.load(idx.clone());
        let more = self.icmp(IntPred::Ult, i.clone(), len);
        self.cond_br(more, body, end);

        self.position_at(body);
        let slot = self.offset(ptr, i.clone());
        self.assign(&DValue::var(elem.clone(), slot), val, &Loc::unknown())?;
        let next = self.bin(Op::Add, i, Value::const_int(size_t, 1));
        self.store(next, idx);
        self.br(cond);

        self.position_at(end);
        Ok(())
    }

    fn coerce_store(&mut self, v: Value, addr: &Value) -> Value {
        let want = match addr.ty.pointee() {
            Some(t) => t.clone(),
            None => bug!("store through non-pointer {}", addr),
        };
        self.coerce_to(v, want)
    }

    /// Reinterprets `v` as `want` where the IR types differ only in pointer
    /// or constant shape.
    pub(crate) fn coerce_to(&mut self, v: Value, want: IrType) -> Value {
        if v.ty == want {
            return v;
        }
        match (&v.ty, &want) {
            (IrType::Ptr(_), IrType::Ptr(_)) => self.bitcast(v, want),
            (IrType::Int(_), IrType::Int(_)) => self.int_cast(v, want, true),
            _ if v.is_zero() => Value::zero(want),
            _ if v.is_const() => Value::const_bitcast(v, want),
            _ => {
                let mem = self.alloca(v.ty.clone(), "tmpcoerce");
                self.store(v, mem.clone());
                let cast = self.bitcast(mem, want.ptr_to());
                self.load(cast)
            }
        }
    }

    /// `arr.length = len` through the runtime; the new array is written back
    /// through `arr`.
    pub(crate) fn resize_array(&mut self, ty: &Type, arr: Value, len: Value) -> DValue {
        let ti = self.typeinfo(ty);
        let res = self.call_runtime("_d_arraysetlengthT", vec![ti, len, arr.clone()]);
        self.store_runtime_array(res, arr.clone());
        DValue::var(ty.clone(), arr)
    }

    /// Writes a `{size_t, i8*}` runtime result into array storage `dest`.
    pub(crate) fn store_runtime_array(&mut self, res: Value, dest: Value) {
        let cast = self.bitcast(dest, res.ty.clone().ptr_to());
        self.store(res, cast);
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use crate::lir::Inst;

    #[test]
    fn scalar_assignment_is_a_single_store() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let x = t.m.add_local(f, "x", Type::int());
        let e = t.assign(t.var(x), t.int(4));
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(x);
        let v = e.codegen(&mut ctx).unwrap();
        assert!(matches!(v, DValue::Var { .. }));
        assert_eq!(ctx.count(|i| matches!(i, Inst::Store { .. })), 1);
    }

    #[test]
    fn struct_assignment_copies_bytes() {
        let mut t = TestModule::new();
        let s = t.pair_struct();
        let f = t.func("f", Type::void(), vec![]);
        let a = t.m.add_local(f, "a", Type::Struct(s));
        let b = t.m.add_local(f, "b", Type::Struct(s));
        let e = t.assign(t.var(a), t.var(b));
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(a);
        ctx.declare_local_for_test(b);
        e.codegen(&mut ctx).unwrap();
        assert_eq!(ctx.count(|i| matches!(i, Inst::Memcpy { .. })), 1);
        assert_eq!(ctx.count(|i| matches!(i, Inst::Load(_))), 0);
    }

    #[test]
    fn the_frame_is_popped_after_a_failed_assignment() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let x = t.m.add_local(f, "x", Type::int());
        let bad = t.expr(ExprKind::TypeExp, Type::int());
        let e = t.assign(t.var(x), bad);
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(x);
        assert!(e.codegen(&mut ctx).is_err());
        match &e.kind {
            ExprKind::Assign(lhs, _) => assert!(!ctx.is_assign_lhs(lhs)),
            k => panic!("unexpected {:?}", k),
        }
    }

    #[test]
    fn filling_a_static_array_loops() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let a = t.m.add_local(f, "a", Type::SArray(Box::new(Type::int()), 8));
        let e = t.assign(t.var(a), t.int(0));
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(a);
        e.codegen(&mut ctx).unwrap();
        let func = ctx.ir.func(ctx.fs().func);
        assert!(func.block_named("arrayinit.body").is_some());
        assert!(func.block_named("arrayinit.end").is_some());
    }
}
