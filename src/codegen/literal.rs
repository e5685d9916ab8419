//! Array and struct literals built element by element, directly into the
//! destination of the enclosing assignment when there is one.

use super::{CodegenCtx, DValue};
use crate::{
    ast::{AggId, Expr, Type},
    errors::LowerResult,
    lir::{IrType, Value},
};

impl<'a> CodegenCtx<'a> {
    /// The destination storage `e` may be built into, if its IR type matches.
    pub(crate) fn literal_dest(&mut self, e: &Expr) -> Option<Value> {
        let dest = match self.assign_dest(e)? {
            DValue::Var { addr, .. } => addr,
            _ => return None,
        };
        let ty = self.ir_type(&e.ty);
        if dest.ty.pointee() == Some(&ty) {
            Some(dest)
        } else {
            None
        }
    }

    pub(crate) fn lower_array_literal(&mut self, e: &Expr, elems: &[Expr]) -> LowerResult<DValue> {
        let t = e.ty.to_base(self.src);
        let elem = t.next().cloned().unwrap_or_else(Type::void);
        let elem_ir = self.elem_ir_type(&elem);
        let dest = self.literal_dest(e);

        match &t {
            Type::SArray(..) | Type::Vector(..) => {
                let mem = match &dest {
                    Some(d) => d.clone(),
                    None => {
                        let ty = self.ir_type(&e.ty);
                        self.alloca(ty, "arrayliteral")
                    }
                };
                for (i, x) in elems.iter().enumerate() {
                    let slot = self.gepi(mem.clone(), 0, i as u64);
                    self.init_into(DValue::var(elem.clone(), slot), x)?;
                }
                Ok(match dest {
                    Some(_) => DValue::in_place(e.ty.clone(), mem),
                    None => DValue::var(e.ty.clone(), mem),
                })
            }
            Type::DArray(_) | Type::Pointer(_) => {
                let n = elems.len() as u64;
                let arr_ty = Type::DArray(Box::new(elem.clone()));
                let ti = self.typeinfo(&arr_ty);
                let len = self.const_size(n);
                let raw = self.call_runtime("_d_arrayliteralT", vec![ti, len.clone()]);
                let ptr = self.bitcast(raw, elem_ir.ptr_to());
                for (i, x) in elems.iter().enumerate() {
                    let slot = self.offset(ptr.clone(), self.const_size(i as u64));
                    self.init_into(DValue::var(elem.clone(), slot), x)?;
                }
                if t.is_pointer() {
                    return Ok(DValue::imm(e.ty.clone(), ptr));
                }
                match dest {
                    Some(d) => {
                        let lp = self.gepi(d.clone(), 0, 0);
                        self.store(len, lp);
                        let pp = self.gepi(d.clone(), 0, 1);
                        self.store(ptr, pp);
                        Ok(DValue::in_place(e.ty.clone(), d))
                    }
                    None => Ok(DValue::Slice {
                        ty: e.ty.clone(),
                        len,
                        ptr,
                    }),
                }
            }
            t => bug!("array literal of type {}", t.name(self.src)),
        }
    }

    pub(crate) fn lower_struct_literal(
        &mut self,
        e: &Expr,
        agg: AggId,
        elems: &[Option<Expr>],
    ) -> LowerResult<DValue> {
        let dest = self.literal_dest(e);
        let ty = self.agg_ir_type(agg);
        let mem = match &dest {
            Some(d) => d.clone(),
            None => self.alloca(ty.clone(), "tmpstructliteral"),
        };

        // fields left out keep their default value
        if elems.iter().any(Option::is_none) {
            let size = self.const_size(self.ir.alloc_size(&ty));
            if self.src.agg(agg).zero_init {
                self.memset_zero(mem.clone(), size);
            } else {
                let image = self.init_image(agg)?;
                self.memcpy(mem.clone(), image, size);
            }
        }

        let fields = self.src.agg(agg).fields.clone();
        for (field, x) in fields.iter().zip(elems.iter()) {
            let x = unless!(x, else continue);
            let idx = self.field_index(agg, *field);
            let slot = self.gepi(mem.clone(), 0, idx);
            let fty = self.src.var(*field).ty.clone();
            self.init_into(DValue::var(fty, slot), x)?;
        }

        Ok(match dest {
            Some(_) => DValue::in_place(e.ty.clone(), mem),
            None => DValue::var(e.ty.clone(), mem),
        })
    }

    /// Literal string contents at runtime: slices and pointers refer to an
    /// internal global, static arrays are constants.
    pub(crate) fn lower_string(&mut self, e: &Expr) -> LowerResult<DValue> {
        let val = self.const_expr(e)?;
        if let IrType::Struct(_) = &val.ty {
            if let Some(elems) = val.elements() {
                return Ok(DValue::Slice {
                    ty: e.ty.clone(),
                    len: elems[0].clone(),
                    ptr: elems[1].clone(),
                });
            }
        }
        Ok(DValue::Const {
            ty: e.ty.clone(),
            val,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use crate::lir::Inst;

    #[test]
    fn struct_literals_are_built_in_place() {
        let mut t = TestModule::new();
        let s = t.pair_struct();
        let f = t.func("f", Type::void(), vec![]);
        let p = t.m.add_local(f, "p", Type::Struct(s));
        let x = t.m.add_local(f, "x", Type::Basic(Basic::Float));
        let lit = t.struct_lit(s, vec![Some(t.var(x)), Some(t.float(2.0))]);
        let e = t.assign(t.var(p), lit);
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(p);
        ctx.declare_local_for_test(x);
        e.codegen(&mut ctx).unwrap();
        assert_eq!(ctx.count(|i| matches!(i, Inst::Memcpy { .. })), 0);
        assert_eq!(
            ctx.count(|i| matches!(i, Inst::Alloca { name, .. } if name == "tmpstructliteral")),
            0
        );
        assert_eq!(ctx.count(|i| matches!(i, Inst::Store { .. })), 2);
    }

    #[test]
    fn static_array_literals_fill_their_slots() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let ty = Type::SArray(Box::new(Type::int()), 3);
        let a = t.m.add_local(f, "a", ty.clone());
        let lit = t.expr(ExprKind::ArrayLiteral(vec![t.int(1), t.int(2), t.int(3)]), ty);
        let e = t.assign(t.var(a), lit);
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(a);
        e.codegen(&mut ctx).unwrap();
        assert_eq!(ctx.count(|i| matches!(i, Inst::Store { .. })), 3);
        assert_eq!(ctx.count(|i| matches!(i, Inst::Memcpy { .. })), 0);
    }

    #[test]
    fn dynamic_array_literals_allocate_through_the_runtime() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let lit = t.expr(
            ExprKind::ArrayLiteral(vec![t.int(1), t.int(2)]),
            Type::int().array_of(),
        );
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        match lit.codegen(&mut ctx).unwrap() {
            DValue::Slice { len, .. } => assert_eq!(len.as_const_int(), Some(2)),
            v => panic!("expected a slice, got {:?}", v),
        }
        assert!(ctx.ir.function("_d_arrayliteralT").is_some());
    }

    #[test]
    fn partial_struct_literals_start_from_zero() {
        let mut t = TestModule::new();
        let s = t.pair_struct();
        let f = t.func("f", Type::void(), vec![]);
        let lit = t.struct_lit(s, vec![Some(t.float(1.0)), None]);
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        lit.codegen(&mut ctx).unwrap();
        assert_eq!(ctx.count(|i| matches!(i, Inst::Memset { .. })), 1);
    }
}
