//! Dispatch of expressions to their lowering rules, plus the rules that only
//! move values around: variables, declarations, member access, control flow
//! producing a value, and assertions.

use super::{Codegen, CodegenCtx, DValue};
use crate::{
    ast::{Basic, Decl, Expr, ExprKind, Symbol, Type, VarId},
    errors::{LowerError, LowerResult},
    lir::{IrType, Op, Value},
    span::Loc,
};

impl Codegen for Expr {
    type Output = LowerResult<DValue>;

    fn codegen(&self, ctx: &mut CodegenCtx) -> Self::Output {
        log::trace!("lowering {} at {}", self.kind.name(), self.loc);
        let e = self;
        match &self.kind {
            ExprKind::Integer(_) | ExprKind::Real(_) | ExprKind::Complex(..) => Ok(DValue::Const {
                ty: e.ty.clone(),
                val: ctx.const_expr(e)?,
            }),
            ExprKind::Null => {
                let ty = ctx.ir_type(&e.ty);
                Ok(DValue::Null {
                    ty: e.ty.clone(),
                    val: Value::zero(ty),
                })
            }
            ExprKind::String(_) => ctx.lower_string(e),
            ExprKind::ArrayLiteral(elems) => ctx.lower_array_literal(e, elems),
            ExprKind::StructLiteral(agg, elems) => ctx.lower_struct_literal(e, *agg, elems),
            ExprKind::Var(sym) => ctx.lower_symbol(e, sym),
            ExprKind::Dollar => ctx.lower_dollar(e),
            ExprKind::This => match &ctx.fs().this {
                Some(this) => Ok(this.clone()),
                None => bug!("`this` outside of a method"),
            },
            ExprKind::Declaration(decl) => ctx.lower_declaration(decl),
            ExprKind::Func(fid) => ctx.lower_func_literal(e, *fid),
            ExprKind::Delegate(obj, fid) => ctx.lower_delegate(e, Some(&**obj), *fid),
            ExprKind::Assign(lhs, rhs) => ctx.lower_assign(e, lhs, rhs),
            ExprKind::BinAssign(op, lhs, rhs) => ctx.lower_bin_assign(e, *op, lhs, rhs),
            ExprKind::Binary(op, lhs, rhs) => ctx.lower_binary(e, *op, lhs, rhs),
            ExprKind::Cmp(op, lhs, rhs) => ctx.lower_cmp(e, *op, lhs, rhs),
            ExprKind::Equal(eq, lhs, rhs) => ctx.lower_equal(e, *eq, false, lhs, rhs),
            ExprKind::Identity(eq, lhs, rhs) => ctx.lower_equal(e, *eq, true, lhs, rhs),
            ExprKind::AndAnd(lhs, rhs) => ctx.lower_logical(e, true, lhs, rhs),
            ExprKind::OrOr(lhs, rhs) => ctx.lower_logical(e, false, lhs, rhs),
            ExprKind::Not(inner) => ctx.lower_not(e, inner),
            ExprKind::Com(inner) => ctx.lower_com(e, inner),
            ExprKind::Neg(inner) => ctx.lower_neg(e, inner),
            ExprKind::Post(op, inner) => ctx.lower_post(e, *op, inner),
            ExprKind::Cast(inner) => ctx.lower_cast(e, inner),
            ExprKind::Addr(inner) => ctx.lower_addr(e, inner),
            ExprKind::Deref(inner) => ctx.lower_deref(e, inner),
            ExprKind::DotVar(obj, sym) => ctx.lower_dot_var(e, obj, sym),
            ExprKind::Index(base, idx) => ctx.lower_index(e, base, idx),
            ExprKind::Slice(base, lo, hi) => ctx.lower_slice(e, base, lo.as_deref(), hi.as_deref()),
            ExprKind::ArrayLength(arr) => ctx.lower_array_length(e, arr),
            ExprKind::Call(callee, args) => ctx.lower_call(e, callee, args),
            ExprKind::New {
                newtype,
                args,
                ctor,
                on_stack,
            } => ctx.lower_new(e, newtype, args, *ctor, *on_stack),
            ExprKind::Delete(inner) => ctx.lower_delete(e, inner),
            ExprKind::Assert(cond, msg) => ctx.lower_assert(e, cond, msg.as_deref()),
            ExprKind::Halt => ctx.lower_halt(e),
            ExprKind::Comma(lhs, rhs) => {
                lhs.codegen(ctx)?;
                rhs.codegen(ctx)
            }
            ExprKind::Cond(cond, a, b) => ctx.lower_cond(e, cond, a, b),
            ExprKind::Cat(lhs, rhs) => ctx.lower_cat(e, lhs, rhs),
            ExprKind::CatAssign(lhs, rhs) => ctx.lower_cat_assign(e, lhs, rhs),
            ExprKind::In(key, aa) => ctx.lower_in(e, key, aa),
            ExprKind::TypeExp => ctx.unsupported("type expression", e),
            ExprKind::Scope(_) => ctx.unsupported("scope expression", e),
            ExprKind::DotType(_) => ctx.unsupported("dot-type expression", e),
            ExprKind::Remove(..) => ctx.unsupported("associative array remove", e),
            ExprKind::AssocArrayLiteral(..) => ctx.unsupported("associative array literal", e),
            ExprKind::Tuple(_) => ctx.unsupported("tuple expression", e),
        }
    }
}

impl<'a> CodegenCtx<'a> {
    fn lower_symbol(&mut self, e: &Expr, sym: &Symbol) -> LowerResult<DValue> {
        match sym {
            Symbol::Var(v) => self.lower_var(e, *v),
            Symbol::StaticInit(agg) => {
                let image = self.init_image(*agg)?;
                let ty = self.ir_type(&e.ty);
                Ok(DValue::var(e.ty.clone(), Value::const_bitcast(image, ty.ptr_to())))
            }
            Symbol::Func(fid) => {
                let idx = self.declare_func(*fid);
                Ok(DValue::Func {
                    ty: e.ty.clone(),
                    func: Some(*fid),
                    val: self.ir.func_value(idx),
                    vthis: None,
                })
            }
        }
    }

    fn lower_var(&mut self, e: &Expr, v: VarId) -> LowerResult<DValue> {
        let var = self.src.var(v);
        if var.is_dataseg() {
            let g = self.global_var(v)?;
            return Ok(DValue::Var {
                ty: e.ty.clone(),
                addr: g,
                var: Some(v),
            });
        }

        if let Some(addr) = self.fs().vars.get(&v) {
            return Ok(DValue::Var {
                ty: e.ty.clone(),
                addr: addr.clone(),
                var: Some(v),
            });
        }

        let parent = match var.parent {
            Some(p) if var.nested_ref => p,
            _ => bug!("{} has no storage in {}", var.name, self.current_func().pretty),
        };
        if self.current_func().nested_in != Some(parent) {
            return Err(LowerError::unsupported(
                format!("`{}` is reached through more than one enclosing frame", var.name),
                &e.loc,
            ));
        }
        let nest = match &self.fs().nest {
            Some(n) => n.clone(),
            None => bug!("nested function without a context"),
        };
        let frame_ty = self.frame_type(parent);
        let frame = self.bitcast(nest, frame_ty.ptr_to());
        let idx = match self.src.func(parent).nested_vars.iter().position(|x| *x == v) {
            Some(i) => i as u64,
            None => bug!("{} is not in its function's frame", var.name),
        };
        let slot = self.gepi(frame, 0, idx);
        let addr = if var.is_ref() { self.load(slot) } else { slot };
        Ok(DValue::Var {
            ty: e.ty.clone(),
            addr,
            var: Some(v),
        })
    }

    fn lower_declaration(&mut self, decl: &Decl) -> LowerResult<DValue> {
        let v = match decl {
            Decl::Var(v) => *v,
            Decl::Func(_) | Decl::Aggregate(_) | Decl::Enum(_) | Decl::Alias(_) => {
                return Ok(DValue::void())
            }
        };
        let var = self.src.var(v);
        if var.is_dataseg() {
            self.global_var(v)?;
            return Ok(DValue::void());
        }

        let addr = match self.fs().vars.get(&v) {
            // captured variables already live in the frame record
            Some(addr) => addr.clone(),
            None => {
                let ty = self.ir_type(&var.ty);
                let addr = self.alloca(ty, &var.name);
                self.fs_mut().vars.insert(v, addr.clone());
                addr
            }
        };
        self.emit_local_variable(&addr, v, false)?;

        let dest = DValue::Var {
            ty: var.ty.clone(),
            addr,
            var: Some(v),
        };
        match &var.init {
            Some(init) => self.init_into(dest.clone(), init)?,
            None => {
                let val = self.default_init(&var.ty)?;
                let init = DValue::Const {
                    ty: var.ty.clone(),
                    val,
                };
                self.assign(&dest, &init, &var.loc)?;
            }
        }
        Ok(dest)
    }

    fn lower_addr(&mut self, e: &Expr, inner: &Expr) -> LowerResult<DValue> {
        let ty = self.ir_type(&e.ty);
        let v = inner.codegen(self)?;
        let addr = match &v {
            DValue::Func { val, .. } => val.clone(),
            _ => self.lval(&v, &inner.loc)?,
        };
        let addr = self.bitcast(addr, ty);
        Ok(DValue::imm(e.ty.clone(), addr))
    }

    fn lower_deref(&mut self, e: &Expr, inner: &Expr) -> LowerResult<DValue> {
        let v = inner.codegen(self)?;
        let p = self.rval(&v);
        if let Type::Function(_) = e.ty.to_base(self.src) {
            return Ok(DValue::Func {
                ty: e.ty.clone(),
                func: None,
                val: p,
                vthis: None,
            });
        }
        let ty = self.ir_type(&e.ty);
        let addr = self.bitcast(p, ty.ptr_to());
        Ok(DValue::var(e.ty.clone(), addr))
    }

    fn lower_dot_var(&mut self, e: &Expr, obj: &Expr, sym: &Symbol) -> LowerResult<DValue> {
        let field = match sym {
            Symbol::Var(v) => *v,
            Symbol::Func(fid) => return self.method_ref(e, obj, *fid),
            Symbol::StaticInit(_) => bug!("static initializer used as a member"),
        };
        if self.src.var(field).is_dataseg() {
            obj.codegen(self)?;
            return self.lower_var(e, field);
        }

        let o = obj.codegen(self)?;
        let (agg, base) = match obj.ty.to_base(self.src) {
            Type::Struct(id) => {
                let addr = match self.lval(&o, &obj.loc) {
                    Ok(addr) => addr,
                    Err(_) => self.spill(&o, "tmpstruct"),
                };
                (id, addr)
            }
            Type::Class(id) => (id, self.rval(&o)),
            Type::Pointer(inner) => match *inner {
                Type::Struct(id) => (id, self.rval(&o)),
                t => bug!("member access through `{}*`", t.name(self.src)),
            },
            t => bug!("member access on `{}`", t.name(self.src)),
        };
        let rec = self.agg_ir_type(agg);
        let base = self.bitcast(base, rec.ptr_to());
        let idx = self.field_index(agg, field);
        let slot = self.gepi(base, 0, idx);
        Ok(DValue::var(e.ty.clone(), slot))
    }

    /// `a && b` and `a || b`. The result slot is allocated before the left
    /// operand is evaluated and reloaded at the join.
    fn lower_logical(&mut self, e: &Expr, and: bool, lhs: &Expr, rhs: &Expr) -> LowerResult<DValue> {
        let (name, body_name, end_name) = if and {
            ("andandtmp", "andand", "andandend")
        } else {
            ("orortmp", "oror", "ororend")
        };
        let tmp = self.alloca(IrType::i1(), name);

        let l = lhs.codegen(self)?;
        let lb = self.to_bool(&l, &lhs.loc)?;
        self.store(lb.clone(), tmp.clone());

        let body = self.append_block(body_name);
        let end = self.append_block(end_name);
        if and {
            self.cond_br(lb.clone(), body, end);
        } else {
            self.cond_br(lb.clone(), end, body);
        }

        self.position_at(body);
        let r = rhs.codegen(self)?;
        if !rhs.ty.is_void() {
            let rb = self.to_bool(&r, &rhs.loc)?;
            let op = if and { Op::And } else { Op::Or };
            let res = self.bin(op, lb, rb);
            self.store(res, tmp.clone());
        }
        self.br(end);

        self.position_at(end);
        if e.ty.is_void() {
            return Ok(DValue::void());
        }
        let res = self.load(tmp);
        Ok(DValue::imm(e.ty.clone(), res))
    }

    fn lower_cond(&mut self, e: &Expr, cond: &Expr, a: &Expr, b: &Expr) -> LowerResult<DValue> {
        let tmp = if e.ty.is_void() {
            None
        } else {
            let ty = self.ir_type(&e.ty);
            Some(DValue::var(e.ty.clone(), self.alloca(ty, "condtmp")))
        };

        let c = cond.codegen(self)?;
        let c = self.to_bool(&c, &cond.loc)?;
        let yes = self.append_block("condtrue");
        let no = self.append_block("condfalse");
        let end = self.append_block("condend");
        self.cond_br(c, yes, no);

        for (block, arm) in [(yes, a), (no, b)].iter() {
            self.position_at(*block);
            let v = arm.codegen(self)?;
            if let Some(tmp) = &tmp {
                self.assign(tmp, &v, &arm.loc)?;
            }
            self.br(end);
        }

        self.position_at(end);
        Ok(tmp.unwrap_or_else(DValue::void))
    }

    /// The module file name as a `string` slice for runtime failure calls.
    fn file_name_slice(&mut self) -> Value {
        let file = self.src.srcfile.to_string();
        let (g, len) = self.string_global(&file, &Type::Basic(Basic::Char), true);
        let ptr = Value::const_offset(g, vec![0, 0], IrType::i8_ptr());
        let ty = IrType::Struct(vec![self.ir.size_t(), IrType::i8_ptr()]);
        Value::aggregate(ty, vec![self.const_size(len), ptr])
    }

    fn lower_assert(&mut self, e: &Expr, cond: &Expr, msg: Option<&Expr>) -> LowerResult<DValue> {
        let c = cond.codegen(self)?;
        let c = self.to_bool(&c, &cond.loc)?;
        let passed = self.append_block("assertpassed");
        let failed = self.append_block("assertfailed");
        self.cond_br(c, passed, failed);

        self.position_at(failed);
        self.runtime_failure(msg, &e.loc)?;
        self.position_at(passed);
        Ok(DValue::void())
    }

    fn lower_halt(&mut self, e: &Expr) -> LowerResult<DValue> {
        self.runtime_failure(None, &e.loc)?;
        let after = self.append_block("afterhalt");
        self.position_at(after);
        Ok(DValue::void())
    }

    /// Calls the runtime's assertion handler and ends the block.
    fn runtime_failure(&mut self, msg: Option<&Expr>, loc: &Loc) -> LowerResult {
        let file = self.file_name_slice();
        let line = Value::const_int(IrType::i32(), loc.line as u64);
        match msg {
            Some(msg) => {
                let m = msg.codegen(self)?;
                let m = self.array_value(&m);
                self.call_runtime("_d_assert_msg", vec![m, file, line]);
            }
            None => {
                self.call_runtime("_d_assert", vec![file, line]);
            }
        }
        self.unreachable();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use crate::lir::Inst;

    #[test]
    fn constant_and_keeps_its_branch_shape() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let b = t.m.add_local(f, "b", Type::bool());
        let e = t.expr(
            ExprKind::AndAnd(Box::new(t.bool(false)), Box::new(t.var(b))),
            Type::bool(),
        );
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(b);
        let v = e.codegen(&mut ctx).unwrap();
        assert!(matches!(v, DValue::Imm { .. }));
        let func = ctx.ir.func(ctx.fs().func);
        assert!(func.block_named("andand").is_some());
        assert!(func.block_named("andandend").is_some());
        assert_eq!(ctx.count(|i| matches!(i, Inst::CondBr { .. })), 1);
        assert_eq!(
            ctx.count(|i| matches!(i, Inst::Alloca { name, .. } if name == "andandtmp")),
            1
        );
    }

    #[test]
    fn conditionals_join_through_a_temporary() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let c = t.m.add_local(f, "c", Type::bool());
        let e = t.expr(
            ExprKind::Cond(Box::new(t.var(c)), Box::new(t.int(1)), Box::new(t.int(2))),
            Type::int(),
        );
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(c);
        let v = e.codegen(&mut ctx).unwrap();
        assert!(matches!(v, DValue::Var { .. }));
        let func = ctx.ir.func(ctx.fs().func);
        assert!(func.block_named("condend").is_some());
        assert_eq!(ctx.count(|i| matches!(i, Inst::Store { .. })), 2);
    }

    #[test]
    fn failed_assertions_call_the_runtime_and_stop() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let c = t.m.add_local(f, "c", Type::bool());
        let e = t.expr(ExprKind::Assert(Box::new(t.var(c)), None), Type::void());
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(c);
        e.codegen(&mut ctx).unwrap();
        assert!(ctx.ir.function("_d_assert").is_some());
        assert_eq!(ctx.count(|i| matches!(i, Inst::Unreachable)), 1);
        let func = ctx.ir.func(ctx.fs().func);
        assert_eq!(ctx.fs().at.block, func.block_named("assertpassed").unwrap());
    }

    #[test]
    fn local_declarations_get_a_default_value() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let x = t.m.add_local(f, "x", Type::Basic(Basic::Double));
        let e = t.expr(ExprKind::Declaration(Decl::Var(x)), Type::void());
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        e.codegen(&mut ctx).unwrap();
        let stored = ctx
            .ir
            .func(ctx.fs().func)
            .iter_insts()
            .find_map(|d| match &d.inst {
                Inst::Store { value, .. } => Some(value.clone()),
                _ => None,
            });
        match stored.map(|v| v.kind) {
            Some(crate::lir::ValueKind::Const(crate::lir::Const::Float(f))) => assert!(f.is_nan()),
            k => panic!("unexpected {:?}", k),
        }
    }

    #[test]
    fn struct_fields_are_addressed_through_the_record() {
        let mut t = TestModule::new();
        let s = t.pair_struct();
        let im = t.m.agg(s).fields[1];
        let f = t.func("f", Type::void(), vec![]);
        let p = t.m.add_local(f, "p", Type::Struct(s));
        let e = t.expr(
            ExprKind::DotVar(Box::new(t.var(p)), Symbol::Var(im)),
            Type::Basic(Basic::Float),
        );
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(p);
        match e.codegen(&mut ctx).unwrap() {
            DValue::Var { addr, .. } => assert_eq!(addr.ty, crate::lir::IrType::F32.ptr_to()),
            v => panic!("expected storage, got {:?}", v),
        }
    }

    #[test]
    fn unsupported_nodes_are_fatal() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let e = t.expr(ExprKind::Tuple(vec![]), Type::Tuple(vec![]));
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        let err = e.codegen(&mut ctx).unwrap_err();
        assert_eq!(err.kind, LowerErrorKind::Unsupported);
        assert_eq!(ctx.count(|_| true), 0);
    }
}
