//! Function bodies and the module driver.

use super::{Codegen, CodegenCtx, CodegenOptions, DValue, FuncState};
use crate::{
    ast::{self, Expr, FuncId, Stmt, VarArgs},
    errors::{LowerError, LowerResult},
    lir::{self, IrType, Value},
    span::Loc,
};

/// Lowers every global and every function with a body. Lowering stops at
/// the first unsupported construct; other errors discard the failing
/// function and are returned together once the module is done.
pub fn codegen_module(src: &ast::Module, opts: CodegenOptions) -> Result<lir::Module, Vec<LowerError>> {
    log::info!("lowering module {} for {}", src.name, opts.target);
    let mut ctx = CodegenCtx::new(src, opts);
    ctx.emit_compile_unit();

    let mut errors = vec![];
    for var in src.vars.iter().filter(|v| v.is_dataseg()) {
        if let Err(err) = ctx.global_var(var.id) {
            let fatal = err.is_fatal();
            errors.push(err);
            if fatal {
                return Err(errors);
            }
        }
    }

    for f in src.funcs.iter() {
        if f.body.is_none() || f.intrinsic.is_some() {
            continue;
        }
        if let Err(err) = ctx.lower_function(f.id) {
            log::debug!("{} failed: {}", f.pretty, err);
            let fatal = err.is_fatal();
            errors.push(err);
            if fatal {
                return Err(errors);
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    ctx.emit_module_flags();
    Ok(ctx.finish())
}

impl Codegen for Stmt {
    type Output = LowerResult;

    fn codegen(&self, ctx: &mut CodegenCtx) -> Self::Output {
        match self {
            Stmt::Expr(e) => {
                ctx.emit_stop_point(&e.loc);
                e.codegen(ctx)?;
                Ok(())
            }
            Stmt::Block { body, loc, end_loc } => {
                ctx.emit_block_start(loc);
                for s in body.iter() {
                    s.codegen(ctx)?;
                }
                ctx.emit_stop_point(end_loc);
                ctx.emit_block_end();
                Ok(())
            }
            Stmt::Return(e, loc) => ctx.lower_return(e.as_ref(), loc),
            Stmt::If {
                cond,
                then,
                els,
                loc,
            } => ctx.lower_if(cond, then, els.as_deref(), loc),
        }
    }
}

impl<'a> CodegenCtx<'a> {
    /// The record holding the variables of `fid` that nested functions
    /// reach; `ref` variables are stored as pointers.
    pub(crate) fn frame_type(&mut self, fid: FuncId) -> IrType {
        let decl = self.src.func(fid);
        let mut fields = vec![];
        for v in decl.nested_vars.iter() {
            let var = self.src.var(*v);
            let ty = self.ir_type(&var.ty);
            fields.push(if var.is_ref() { ty.ptr_to() } else { ty });
        }
        IrType::Struct(fields)
    }

    /// Emits the body of `fid`. A function that fails to lower is left as a
    /// declaration.
    pub fn lower_function(&mut self, fid: FuncId) -> LowerResult {
        let decl = self.src.func(fid);
        let body = match &decl.body {
            Some(body) => body,
            None => return Ok(()),
        };
        let idx = self.declare_func(fid);
        if !self.ir.func(idx).is_declaration() {
            bug!("{} is lowered twice", decl.pretty);
        }
        log::debug!("lowering function {}", decl.pretty);

        let entry = self.ir.func_mut(idx).append_block("entry");
        self.fs = Some(FuncState::new(fid, idx, entry));
        let res = self.lower_body(fid, body);
        if res.is_err() {
            self.ir.func_mut(idx).clear_body();
        }
        self.fs = None;
        res
    }

    fn lower_body(&mut self, fid: FuncId, body: &[Stmt]) -> LowerResult {
        let decl = self.src.func(fid);
        self.emit_func_start(fid)?;
        self.lower_params(fid)?;
        self.build_frame(fid)?;

        for s in body.iter() {
            s.codegen(self)?;
        }

        if !self.is_terminated() {
            self.emit_stop_point(&decl.end_loc);
            let returns_nothing = decl.ty.ret.is_void() || self.fs().sret.is_some();
            if returns_nothing && self.is_reachable() {
                self.ret(None);
            } else {
                self.unreachable();
            }
        }
        self.emit_func_end(fid);
        log::trace!("{} done", decl.pretty);
        Ok(())
    }

    fn ret(&mut self, value: Option<Value>) {
        let at = self.at();
        self.ir.build_ret(&at, value)
    }

    /// Gives every incoming argument its storage. Arguments follow the
    /// hidden return pointer, the receiver or context, the declared
    /// parameters, then the D variadic pair.
    fn lower_params(&mut self, fid: FuncId) -> LowerResult {
        let decl = self.src.func(fid);
        let func = self.fs().func;
        let mut n = 0;

        if self.ret_in_ptr(&decl.ty) {
            let sret = self.ir.func(func).arg(n);
            self.fs_mut().sret = Some(sret);
            n += 1;
        }

        if let Some(this) = decl.vthis {
            let arg = self.ir.func(func).arg(n);
            n += 1;
            let ty = self.src.var(this).ty.clone();
            if self.is_by_ref(&ty) {
                self.fs_mut().vars.insert(this, arg.clone());
                self.fs_mut().this = Some(DValue::Var {
                    ty,
                    addr: arg.clone(),
                    var: Some(this),
                });
                self.emit_local_variable(&arg, this, true)?;
            } else {
                self.fs_mut().this = Some(DValue::imm(ty, arg.clone()));
                self.emit_this_value(&arg, this)?;
            }
        } else if decl.is_nested() {
            let nest = self.ir.func(func).arg(n);
            self.fs_mut().nest = Some(nest);
            n += 1;
        }

        for p in decl.params.iter() {
            let var = self.src.var(*p);
            let arg = self.ir.func(func).arg(n);
            n += 1;
            let addr = if var.is_ref() || self.is_by_ref(&var.ty) {
                arg
            } else {
                let slot = self.alloca(arg.ty.clone(), &var.name);
                self.store(arg, slot.clone());
                slot
            };
            self.fs_mut().vars.insert(*p, addr.clone());
            self.emit_local_variable(&addr, *p, false)?;
        }

        if decl.ty.varargs == VarArgs::D {
            let arguments = self.ir.func(func).arg(n);
            let argptr = self.ir.func(func).arg(n + 1);
            if let Some(v) = decl.arguments {
                let ty = self.ir_type(&self.src.var(v).ty);
                let addr = self.bitcast(arguments, ty.ptr_to());
                self.fs_mut().vars.insert(v, addr.clone());
                self.emit_local_variable(&addr, v, false)?;
            }
            if let Some(v) = decl.argptr {
                let slot = self.alloca(IrType::i8_ptr(), "_argptr");
                self.store(argptr, slot.clone());
                self.fs_mut().vars.insert(v, slot.clone());
                self.emit_local_variable(&slot, v, false)?;
            }
        }
        Ok(())
    }

    /// Moves the variables nested functions reach into one stack record.
    /// Parameters are copied in; locals get their slot here and are
    /// initialized by their declaration.
    fn build_frame(&mut self, fid: FuncId) -> LowerResult {
        let decl = self.src.func(fid);
        if decl.nested_vars.is_empty() {
            return Ok(());
        }
        let ty = self.frame_type(fid);
        let frame = self.alloca(ty, "nestedframe");
        for (i, v) in decl.nested_vars.iter().enumerate() {
            let var = self.src.var(*v);
            let slot = self.gepi(frame.clone(), 0, i as u64);
            let old = self.fs().vars.get(v).cloned();
            if var.is_ref() {
                if let Some(addr) = old {
                    self.store(addr, slot);
                }
                continue;
            }
            if let Some(old) = old {
                let dest = DValue::var(var.ty.clone(), slot.clone());
                let cur = DValue::var(var.ty.clone(), old);
                self.assign(&dest, &cur, &var.loc)?;
            }
            self.fs_mut().vars.insert(*v, slot);
        }
        log::trace!("{} captured variables in {}", decl.nested_vars.len(), decl.pretty);
        self.fs_mut().frame = Some(frame);
        Ok(())
    }

    fn lower_return(&mut self, e: Option<&Expr>, loc: &Loc) -> LowerResult {
        self.emit_stop_point(loc);
        let ret_ty = self.current_func().ty.ret.clone();
        let sret = self.fs().sret.clone();
        match (e, sret) {
            (Some(e), Some(sret)) => {
                self.init_into(DValue::var(ret_ty, sret), e)?;
                self.ret(None);
            }
            (Some(e), None) => {
                let v = e.codegen(self)?;
                if ret_ty.is_void() {
                    self.ret(None);
                } else {
                    let v = self.cast_to(v, &ret_ty, &e.loc)?;
                    let v = self.rval(&v);
                    let want = self.ir.func(self.fs().func).ty.ret.clone();
                    let v = self.coerce_to(v, want);
                    self.ret(Some(v));
                }
            }
            (None, _) => self.ret(None),
        }
        let next = self.append_block("afterreturn");
        self.position_at(next);
        Ok(())
    }

    fn lower_if(&mut self, cond: &Expr, then: &Stmt, els: Option<&Stmt>, loc: &Loc) -> LowerResult {
        self.emit_stop_point(loc);
        let c = cond.codegen(self)?;
        let c = self.to_bool(&c, &cond.loc)?;

        let then_block = self.append_block("if");
        let else_block = match els {
            Some(_) => Some(self.append_block("else")),
            None => None,
        };
        let end = self.append_block("endif");
        self.cond_br(c, then_block, else_block.unwrap_or(end));

        self.position_at(then_block);
        then.codegen(self)?;
        if !self.is_terminated() {
            self.br(end);
        }

        if let (Some(els), Some(block)) = (els, else_block) {
            self.position_at(block);
            els.codegen(self)?;
            if !self.is_terminated() {
                self.br(end);
            }
        }

        self.position_at(end);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::codegen_module;
    use crate::lir::Inst;

    fn set_body(t: &mut TestModule, f: FuncId, body: Vec<Stmt>) {
        t.m.funcs[f.index()].body = Some(body);
    }

    #[test]
    fn by_value_parameters_get_a_stack_slot() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::int(), vec![("a", Type::int())]);
        let r = t.m.add_param(f, "r", Type::int(), StorageClass::REF);
        t.m.funcs[f.index()].ty.params.push(Param {
            ty: Type::int(),
            storage: ParamStorage::Ref,
        });
        let a = t.m.funcs[f.index()].params[0];
        let sum = t.binary(BinOp::Add, t.var(a), t.var(r), Type::int());
        let ret = Stmt::Return(Some(sum), t.loc());
        set_body(&mut t, f, vec![ret]);
        let mut ctx = t.ctx();
        ctx.lower_function(f).unwrap();
        let func = ctx.ir.function(&t.m.func(f).mangled).unwrap();
        assert_eq!(func.count(|i| matches!(i, Inst::Alloca { .. })), 1);
        assert_eq!(func.count(|i| matches!(i, Inst::Ret(Some(_)))), 1);
    }

    #[test]
    fn returned_structs_are_built_in_the_hidden_pointer() {
        let mut t = TestModule::new();
        let s = t.pair_struct();
        let make = t.func("make", Type::Struct(s), vec![]);
        let f = t.func("f", Type::Struct(s), vec![]);
        let call = t.call(make, vec![]);
        let ret = Stmt::Return(Some(call), t.loc());
        set_body(&mut t, f, vec![ret]);
        let mut ctx = t.ctx();
        ctx.lower_function(f).unwrap();
        let func = ctx.ir.function(&t.m.func(f).mangled).unwrap();
        assert_eq!(func.count(|i| matches!(i, Inst::Memcpy { .. })), 0);
        assert_eq!(func.count(|i| matches!(i, Inst::Alloca { .. })), 0);
        assert_eq!(func.count(|i| matches!(i, Inst::Ret(None))), 1);
        // nothing branches to the block opened after the return
        assert_eq!(func.count(|i| matches!(i, Inst::Unreachable)), 1);
    }

    #[test]
    fn if_statements_join_after_both_arms() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![("c", Type::bool())]);
        let c = t.m.funcs[f.index()].params[0];
        let x = t.m.add_local(f, "x", Type::int());
        let decl = t.expr(ExprKind::Declaration(Decl::Var(x)), Type::void());
        let set = t.assign(t.var(x), t.int(1));
        let body = vec![
            Stmt::Expr(decl),
            Stmt::If {
                cond: t.var(c),
                then: Box::new(Stmt::Expr(set)),
                els: Some(Box::new(Stmt::Return(None, t.loc()))),
                loc: t.loc(),
            },
        ];
        set_body(&mut t, f, body);
        let mut ctx = t.ctx();
        ctx.lower_function(f).unwrap();
        let func = ctx.ir.function(&t.m.func(f).mangled).unwrap();
        for name in &["if", "else", "endif", "afterreturn"] {
            assert!(func.block_named(name).is_some(), "missing block {}", name);
        }
        assert_eq!(func.count(|i| matches!(i, Inst::CondBr { .. })), 1);
        assert_eq!(func.count(|i| matches!(i, Inst::Ret(None))), 2);
    }

    #[test]
    fn nested_functions_reach_the_enclosing_frame() {
        let mut t = TestModule::new();
        let outer = t.func("outer", Type::void(), vec![]);
        let x = t.m.add_local(outer, "x", Type::int());
        t.m.vars[x.index()].nested_ref = true;
        t.m.funcs[outer.index()].nested_vars = vec![x];
        let inner = t.func("inner", Type::int(), vec![]);
        t.m.funcs[inner.index()].nested_in = Some(outer);

        let decl = t.expr(ExprKind::Declaration(Decl::Var(x)), Type::void());
        let call = t.call(inner, vec![]);
        set_body(&mut t, outer, vec![Stmt::Expr(decl), Stmt::Expr(call)]);
        let ret = Stmt::Return(Some(t.var(x)), t.loc());
        set_body(&mut t, inner, vec![ret]);

        let ir = codegen_module(&t.m, TestModule::options(DebugLevel::None)).unwrap();
        let o = ir.function(&t.m.func(outer).mangled).unwrap();
        assert_eq!(
            o.count(|i| matches!(i, Inst::Alloca { name, .. } if name == "nestedframe")),
            1
        );
        assert_eq!(o.count(|i| matches!(i, Inst::Alloca { name, .. } if name == "x")), 0);
        let i = ir.function(&t.m.func(inner).mangled).unwrap();
        assert_eq!(i.ty.params.len(), 1);
        assert_eq!(i.count(|i| matches!(i, Inst::Load(_))), 1);
    }

    #[test]
    fn failing_functions_are_dropped_and_lowering_continues() {
        let mut t = TestModule::new();
        let a = t.func("a", Type::void(), vec![]);
        let b = t.func("b", Type::void(), vec![]);
        for f in [a, b].iter() {
            let addr = t.expr(ExprKind::Addr(Box::new(t.int(1))), Type::int().ptr_to());
            set_body(&mut t, *f, vec![Stmt::Expr(addr)]);
        }
        let errs = codegen_module(&t.m, TestModule::options(DebugLevel::None)).unwrap_err();
        assert_eq!(errs.len(), 2);
        assert!(errs.iter().all(|e| e.kind == LowerErrorKind::Compile));
    }

    #[test]
    fn unsupported_constructs_stop_the_module() {
        let mut t = TestModule::new();
        let a = t.func("a", Type::void(), vec![]);
        let b = t.func("b", Type::void(), vec![]);
        let bad = t.expr(ExprKind::TypeExp, Type::int());
        set_body(&mut t, a, vec![Stmt::Expr(bad)]);
        let addr = t.expr(ExprKind::Addr(Box::new(t.int(1))), Type::int().ptr_to());
        set_body(&mut t, b, vec![Stmt::Expr(addr)]);
        let errs = codegen_module(&t.m, TestModule::options(DebugLevel::None)).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].is_fatal());
    }

    #[test]
    fn debug_modules_carry_version_flags() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        set_body(&mut t, f, vec![]);
        let ir = codegen_module(&t.m, TestModule::options(DebugLevel::Full)).unwrap();
        assert!(ir.dbg_cu.is_some());
        assert!(ir.flags.contains(&(str!("Debug Info Version"), 3)));
        assert!(ir.flags.contains(&(str!("Dwarf Version"), 4)));
        let func = ir.function(&t.m.func(f).mangled).unwrap();
        assert!(func.subprogram.is_some());
        assert!(func.iter_insts().all(|i| i.dbg.is_some()));
    }
}
