//! `new` and `delete`.

use super::{Codegen, CodegenCtx, DValue};
use crate::{
    ast::{AggId, Expr, ExprKind, FuncId, StorageClass, Symbol, Type},
    errors::LowerResult,
    lir::{IrType, Value},
};

impl<'a> CodegenCtx<'a> {
    pub(crate) fn lower_new(
        &mut self,
        e: &Expr,
        newtype: &Type,
        args: &[Expr],
        ctor: Option<FuncId>,
        on_stack: bool,
    ) -> LowerResult<DValue> {
        let t = newtype.to_base(self.src);
        log::debug!("allocating {}", t.name(self.src));
        match &t {
            Type::Class(id) => {
                let rec = self.agg_ir_type(*id);
                let obj = if on_stack {
                    self.alloca(rec.clone(), "newclass_alloca")
                } else {
                    let info = self.classinfo(*id);
                    let raw = self.call_runtime("_d_allocclass", vec![info]);
                    self.bitcast(raw, rec.clone().ptr_to())
                };
                let image = self.init_image(*id)?;
                let size = self.const_size(self.ir.alloc_size(&rec));
                self.memcpy(obj.clone(), image, size);
                if let Some(ctor) = ctor {
                    self.call_method(ctor, obj.clone(), args, &e.loc)?;
                }
                Ok(DValue::imm(e.ty.clone(), obj))
            }
            Type::DArray(elem) => {
                let n = match args.first() {
                    Some(n) => n,
                    None => bug!("new array without a length"),
                };
                let len = n.codegen(self)?;
                let len = self.rval(&len);
                let size_t = self.ir.size_t();
                let len = self.int_cast(len, size_t, false);
                let ti = self.typeinfo(newtype);
                let raw = self.call_runtime("_d_newarrayT", vec![ti, len.clone()]);
                let elem_ir = self.elem_ir_type(elem);
                let ptr = self.bitcast(raw, elem_ir.ptr_to());

                if let Some(DValue::Var { addr, .. }) = self.assign_dest(e) {
                    let arr_ir = self.ir_type(&e.ty);
                    if addr.ty.pointee() == Some(&arr_ir) {
                        let lp = self.gepi(addr.clone(), 0, 0);
                        self.store(len, lp);
                        let pp = self.gepi(addr.clone(), 0, 1);
                        self.store(ptr, pp);
                        return Ok(DValue::in_place(e.ty.clone(), addr));
                    }
                }
                Ok(DValue::Slice {
                    ty: e.ty.clone(),
                    len,
                    ptr,
                })
            }
            Type::Struct(id) => {
                let rec = self.agg_ir_type(*id);
                let mem = self.heap_alloc(&rec);
                let size = self.const_size(self.ir.alloc_size(&rec));
                if self.src.agg(*id).zero_init {
                    self.memset_zero(mem.clone(), size);
                } else {
                    let image = self.init_image(*id)?;
                    self.memcpy(mem.clone(), image, size);
                }
                if let Some(ctor) = ctor {
                    self.call_method(ctor, mem.clone(), args, &e.loc)?;
                }
                Ok(DValue::imm(e.ty.clone(), mem))
            }
            _ => {
                let irty = self.ir_type(newtype);
                let mem = self.heap_alloc(&irty);
                let slot = DValue::var(newtype.clone(), mem.clone());
                match args.first() {
                    Some(init) => self.init_into(slot, init)?,
                    None => {
                        let d = self.default_init(newtype)?;
                        self.store(d, mem.clone());
                    }
                }
                Ok(DValue::imm(e.ty.clone(), mem))
            }
        }
    }

    fn heap_alloc(&mut self, ty: &IrType) -> Value {
        let size = self.const_size(self.ir.alloc_size(ty));
        let raw = self.call_runtime("_d_allocmemory", vec![size]);
        self.bitcast(raw, ty.clone().ptr_to())
    }

    /// Destructors of a class, most derived first.
    fn dtors(&self, id: AggId) -> Vec<FuncId> {
        let mut out = vec![];
        let mut cur = Some(id);
        while let Some(c) = cur {
            let agg = self.src.agg(c);
            out.extend(agg.dtors.iter().copied());
            cur = agg.base;
        }
        out
    }

    /// Whether `e` names a `scope` local, whose class instance lives on the stack.
    fn is_scope_local(&self, e: &Expr) -> bool {
        match &e.kind {
            ExprKind::Var(Symbol::Var(v)) => self.src.var(*v).storage.contains(StorageClass::SCOPE),
            _ => false,
        }
    }

    pub(crate) fn lower_delete(&mut self, e: &Expr, inner: &Expr) -> LowerResult<DValue> {
        let v = inner.codegen(self)?;
        let t = inner.ty.to_base(self.src);
        match &t {
            Type::Pointer(_) => {
                let p = self.rval(&v);
                self.call_runtime("_d_delmemory", vec![p.clone()]);
                let addr = self.lval(&v, &inner.loc)?;
                self.store(Value::null(p.ty), addr);
            }
            Type::Class(id) => {
                let obj = self.rval(&v);
                for dtor in self.dtors(*id) {
                    self.call_method(dtor, obj.clone(), &[], &e.loc)?;
                }
                if !self.is_scope_local(inner) {
                    self.call_runtime("_d_delmemory", vec![obj.clone()]);
                }
                if let Ok(addr) = self.lval(&v, &inner.loc) {
                    self.store(Value::null(obj.ty), addr);
                }
            }
            Type::DArray(_) => {
                let ptr = self.array_ptr(&v);
                self.call_runtime("_d_delmemory", vec![ptr]);
                let addr = self.lval(&v, &inner.loc)?;
                let irty = self.ir_type(&inner.ty);
                self.store(Value::zero(irty), addr);
            }
            t => bug!("delete of {}", t.name(self.src)),
        }
        Ok(DValue::void())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use crate::lir::{Inst, Value};

    #[test]
    fn class_instances_copy_their_initializer_and_run_the_constructor() {
        let mut t = TestModule::new();
        let c = t.m.add_aggregate("C", AggKind::Class, None);
        t.m.add_field(c, "x", Type::int());
        let ctor = t.func("__ctor", Type::Class(c), vec![]);
        let this = t.m.add_param(ctor, "this", Type::Class(c), StorageClass::empty());
        t.m.funcs[ctor.index()].params.clear();
        t.m.funcs[ctor.index()].vthis = Some(this);
        t.m.funcs[ctor.index()].member_of = Some(c);
        let f = t.func("f", Type::void(), vec![]);
        let e = t.expr(
            ExprKind::New {
                newtype: Type::Class(c),
                args: vec![],
                ctor: Some(ctor),
                on_stack: false,
            },
            Type::Class(c),
        );
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        e.codegen(&mut ctx).unwrap();
        assert!(ctx.ir.function("_d_allocclass").is_some());
        assert_eq!(ctx.count(|i| matches!(i, Inst::Memcpy { .. })), 1);
        assert_eq!(ctx.count(|i| matches!(i, Inst::Call { .. })), 2);
    }

    #[test]
    fn deleting_a_pointer_nulls_it() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let p = t.m.add_local(f, "p", Type::int().ptr_to());
        let e = t.expr(ExprKind::Delete(Box::new(t.var(p))), Type::void());
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(p);
        e.codegen(&mut ctx).unwrap();
        let null = Value::null(crate::lir::IrType::i32().ptr_to());
        assert_eq!(
            ctx.count(|i| matches!(i, Inst::Store { value, .. } if *value == null)),
            1
        );
    }

    #[test]
    fn new_arrays_write_into_the_destination() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let arr = Type::int().array_of();
        let a = t.m.add_local(f, "a", arr.clone());
        let n = t.typed_int(4, Type::Basic(Basic::ULong));
        let new = t.expr(
            ExprKind::New {
                newtype: arr.clone(),
                args: vec![n],
                ctor: None,
                on_stack: false,
            },
            arr,
        );
        let e = t.assign(t.var(a), new);
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(a);
        e.codegen(&mut ctx).unwrap();
        assert_eq!(ctx.count(|i| matches!(i, Inst::Store { .. })), 2);
    }
}
