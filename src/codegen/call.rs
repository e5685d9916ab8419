//! Calls, method and delegate references, and the contexts passed to nested
//! functions.

use super::{Codegen, CodegenCtx, DValue};
use crate::{
    ast::{Expr, ExprKind, FuncId, FuncType, Intrinsic, Symbol, Type, VarArgs},
    errors::{LowerError, LowerResult},
    lir::{self, FnType, IrType, Value},
    span::Loc,
    target::CallConv,
};

/// A resolved call target with the receiver or context it is invoked with.
struct Callee {
    val: Value,
    ft: FuncType,
    cc: CallConv,
    ctx: Option<Value>,
}

impl<'a> CodegenCtx<'a> {
    pub(crate) fn lower_call(&mut self, e: &Expr, callee: &Expr, args: &[Expr]) -> LowerResult<DValue> {
        if let ExprKind::Var(Symbol::Func(f)) = &callee.kind {
            if let Some(intr) = &self.src.func(*f).intrinsic {
                if let Some(v) = self.lower_intrinsic(e, intr, args)? {
                    return Ok(v);
                }
            }
        }

        let fv = callee.codegen(self)?;
        let c = self.resolve_callee(&fv, &callee.loc)?;
        self.emit_call(Some(e), &e.ty, c, args, &e.loc)
    }

    /// Calls method `fid` on the receiver `this`.
    pub(crate) fn call_method(
        &mut self,
        fid: FuncId,
        this: Value,
        args: &[Expr],
        loc: &Loc,
    ) -> LowerResult<DValue> {
        let decl = self.src.func(fid);
        let idx = self.declare_func(fid);
        let c = Callee {
            val: self.ir.func_value(idx),
            ft: decl.ty.clone(),
            cc: self.call_conv(decl),
            ctx: Some(this),
        };
        self.emit_call(None, &decl.ty.ret, c, args, loc)
    }

    fn resolve_callee(&mut self, fv: &DValue, loc: &Loc) -> LowerResult<Callee> {
        if let DValue::Func {
            func: Some(fid),
            val,
            vthis,
            ..
        } = fv
        {
            let decl = self.src.func(*fid);
            let ctx = match vthis {
                Some(this) => Some(this.clone()),
                None if decl.is_nested() => Some(self.nested_context(*fid)),
                None => None,
            };
            return Ok(Callee {
                val: val.clone(),
                ft: decl.ty.clone(),
                cc: self.call_conv(decl),
                ctx,
            });
        }

        match fv.ty().to_base(self.src) {
            Type::Delegate(ft) => {
                let dg = self.spill(fv, "tmpdelegate");
                let cp = self.gepi(dg.clone(), 0, 0);
                let ctx = self.load(cp);
                let fp = self.gepi(dg, 0, 1);
                let fptr = self.load(fp);
                Ok(Callee {
                    val: fptr,
                    cc: self.abi.calling_conv(ft.linkage),
                    ft: *ft,
                    ctx: Some(ctx),
                })
            }
            Type::Function(ft) => {
                let val = self.rval(fv);
                Ok(Callee {
                    val,
                    cc: self.abi.calling_conv(ft.linkage),
                    ft: *ft,
                    ctx: None,
                })
            }
            Type::Pointer(inner) => match *inner {
                Type::Function(ft) => {
                    let val = self.rval(fv);
                    Ok(Callee {
                        val,
                        cc: self.abi.calling_conv(ft.linkage),
                        ft: *ft,
                        ctx: None,
                    })
                }
                t => Err(LowerError::compile(
                    format!("`{}*` is not callable", t.name(self.src)),
                    loc,
                )),
            },
            t => Err(LowerError::compile(
                format!("`{}` is not callable", t.name(self.src)),
                loc,
            )),
        }
    }

    fn emit_call(
        &mut self,
        call: Option<&Expr>,
        ret_ty: &Type,
        c: Callee,
        args: &[Expr],
        loc: &Loc,
    ) -> LowerResult<DValue> {
        let sig: FnType = match c.val.ty.pointee().and_then(IrType::fn_type) {
            Some(sig) => sig.clone(),
            None => bug!("call through non-function {}", c.val),
        };
        let mut irargs = vec![];

        let sret = if self.ret_in_ptr(&c.ft) {
            let reuse = call.and_then(|e| self.sret_destination(e));
            let in_place = reuse.is_some();
            let mem = match reuse {
                Some(dest) => dest,
                None => {
                    let rt = self.ir_type(&c.ft.ret);
                    self.alloca(rt, "rettmp")
                }
            };
            irargs.push(mem.clone());
            Some((mem, in_place))
        } else {
            None
        };

        if let Some(ctx) = c.ctx {
            let want = match sig.params.get(irargs.len()) {
                Some(t) => t.clone(),
                None => bug!("receiver passed to a function without one"),
            };
            let ctx = self.coerce_to(ctx, want);
            irargs.push(ctx);
        }

        let base = irargs.len();
        for (i, (p, a)) in c.ft.params.iter().zip(args.iter()).enumerate() {
            let v = a.codegen(self)?;
            let val = if p.storage.is_ref() {
                self.lval(&v, &a.loc)?
            } else if self.is_by_ref(&p.ty) {
                // the callee may write to its copy
                let irty = self.ir_type(&p.ty);
                let mem = self.alloca(irty, "structarg");
                self.assign(&DValue::var(p.ty.clone(), mem.clone()), &v, &a.loc)?;
                mem
            } else {
                let v = self.cast_to(v, &p.ty, &a.loc)?;
                self.rval(&v)
            };
            let want = match sig.params.get(base + i) {
                Some(t) => t.clone(),
                None => bug!("argument {} beyond the signature", i),
            };
            let val = self.coerce_to(val, want);
            irargs.push(val);
        }

        let extra = args.get(c.ft.params.len()..).unwrap_or(&[]);
        match c.ft.varargs {
            VarArgs::C => {
                if self.abi.target.is_wasm() && !extra.is_empty() {
                    return Err(LowerError::target(
                        format!("{} has no native variadic calls", self.abi.target),
                        loc,
                    ));
                }
                for a in extra {
                    let v = a.codegen(self)?;
                    let v = self.rval(&v);
                    irargs.push(v);
                }
            }
            VarArgs::D => {
                let (arguments, argptr) = self.pack_d_varargs(extra)?;
                irargs.push(arguments);
                irargs.push(argptr);
            }
            VarArgs::None | VarArgs::Typesafe => {
                if !extra.is_empty() {
                    bug!("{} arguments passed to a non-variadic function", args.len());
                }
            }
        }

        log::trace!("call {} with {} arguments", c.val, irargs.len());
        let ret = self.call(c.val, irargs, c.cc);
        Ok(match sret {
            Some((mem, true)) => DValue::in_place(ret_ty.clone(), mem),
            Some((mem, false)) => DValue::var(ret_ty.clone(), mem),
            None if ret_ty.is_void() => DValue::void(),
            None => DValue::imm(ret_ty.clone(), ret),
        })
    }

    /// Packs the trailing arguments of a D-variadic call into a record of
    /// their values and an array of their type infos.
    fn pack_d_varargs(&mut self, extra: &[Expr]) -> LowerResult<(Value, Value)> {
        let mut vals = vec![];
        for a in extra {
            vals.push(a.codegen(self)?);
        }

        let argptr = if vals.is_empty() {
            Value::null(IrType::i8_ptr())
        } else {
            let tys = extra.iter().map(|a| self.ir_type(&a.ty)).collect();
            let storage = self.alloca(IrType::Struct(tys), "_argptr_storage");
            for (i, (a, v)) in extra.iter().zip(vals.iter()).enumerate() {
                let slot = self.gepi(storage.clone(), 0, i as u64);
                self.assign(&DValue::var(a.ty.clone(), slot), v, &a.loc)?;
            }
            self.bitcast(storage, IrType::i8_ptr())
        };

        let n = extra.len() as u64;
        let infos = self.alloca(IrType::i8_ptr().array_of(n), "_arguments_storage");
        for (i, a) in extra.iter().enumerate() {
            let ti = self.typeinfo(&a.ty);
            let ti = self.bitcast(ti, IrType::i8_ptr());
            let slot = self.gepi(infos.clone(), 0, i as u64);
            self.store(ti, slot);
        }

        let arr_ty = self.ir_type(&Type::void().ptr_to().array_of());
        let arr = self.alloca(arr_ty, "_arguments_array");
        let lp = self.gepi(arr.clone(), 0, 0);
        self.store(self.const_size(n), lp);
        let first = self.gepi(infos, 0, 0);
        let pp = self.gepi(arr.clone(), 0, 1);
        self.store(first, pp);
        Ok((arr, argptr))
    }

    fn lower_intrinsic(&mut self, e: &Expr, intr: &Intrinsic, args: &[Expr]) -> LowerResult<Option<DValue>> {
        let first = match (intr, args.first()) {
            (Intrinsic::Named(_), _) => return Ok(None),
            (_, Some(a)) => a,
            (_, None) => bug!("intrinsic call without arguments"),
        };

        match intr {
            Intrinsic::VaStart => {
                let ap = first.codegen(self)?;
                let addr = self.lval(&ap, &first.loc)?;
                match self.current_func().argptr {
                    Some(argptr) => {
                        let slot = match self.fs().vars.get(&argptr) {
                            Some(s) => s.clone(),
                            None => bug!("_argptr has no storage"),
                        };
                        let p = self.load(slot);
                        let p = self.coerce_to(p, IrType::i8_ptr());
                        let addr = self.bitcast(addr, IrType::i8_ptr().ptr_to());
                        self.store(p, addr);
                    }
                    None => {
                        let ty = FnType {
                            ret: IrType::Void,
                            params: vec![IrType::i8_ptr()],
                            c_varargs: false,
                        };
                        let f = self
                            .ir
                            .declare_function("llvm.va_start", ty, CallConv::C, lir::Linkage::External);
                        let f = self.ir.func_value(f);
                        let list = self.bitcast(addr, IrType::i8_ptr());
                        self.call(f, vec![list], CallConv::C);
                    }
                }
                Ok(Some(DValue::void()))
            }
            Intrinsic::VaArg => {
                let ap = first.codegen(self)?;
                let addr = self.lval(&ap, &first.loc)?;
                let list = self.bitcast(addr, IrType::i8_ptr());
                let ty = self.ir_type(&e.ty);
                let at = self.at();
                let v = self.ir.build_va_arg(&at, list, ty);
                Ok(Some(DValue::imm(e.ty.clone(), v)))
            }
            Intrinsic::Alloca => {
                let n = first.codegen(self)?;
                let n = self.rval(&n);
                let size_t = self.ir.size_t();
                let n = self.int_cast(n, size_t, false);
                let at = self.at();
                let mem = self.ir.build_dyn_alloca(&at, IrType::i8(), n, "alloca");
                let ty = self.ir_type(&e.ty);
                let mem = self.bitcast(mem, ty);
                Ok(Some(DValue::imm(e.ty.clone(), mem)))
            }
            Intrinsic::Named(_) => Ok(None),
        }
    }

    /// The `i8*` context a call to nested function `fid` receives from the
    /// current function.
    pub(crate) fn nested_context(&mut self, fid: FuncId) -> Value {
        let parent = self.src.func(fid).nested_in;
        let cur = self.fs().decl;
        let ctx = if parent == Some(cur) {
            self.fs().frame.clone()
        } else if parent.is_some() && self.current_func().nested_in == parent {
            self.fs().nest.clone()
        } else {
            None
        };
        match ctx {
            Some(v) => self.bitcast(v, IrType::i8_ptr()),
            None => Value::null(IrType::i8_ptr()),
        }
    }

    /// The function pointer of a virtual method, read from the object's
    /// vtable.
    pub(crate) fn virtual_fn(&mut self, obj: Value, fid: FuncId) -> Value {
        let decl = self.src.func(fid);
        let slot = match decl.virtual_index {
            Some(i) => i as u64,
            None => bug!("{} is not virtual", decl.pretty),
        };
        let vp = self.gepi(obj, 0, 0);
        let vtbl = self.load(vp);
        let fp = self.offset(vtbl, self.const_size(slot));
        let fp = self.load(fp);
        let fty = IrType::Func(Box::new(self.func_ir_type(fid))).ptr_to();
        self.bitcast(fp, fty)
    }

    /// `obj.method` as a callee bound to its receiver.
    pub(crate) fn method_ref(&mut self, e: &Expr, obj: &Expr, fid: FuncId) -> LowerResult<DValue> {
        let o = obj.codegen(self)?;
        let this = self.receiver(&o, &obj.loc)?;
        let decl = self.src.func(fid);
        let val = if decl.is_virtual() && obj.ty.to_base(self.src).is_class() {
            self.virtual_fn(this.clone(), fid)
        } else {
            let idx = self.declare_func(fid);
            self.ir.func_value(idx)
        };
        Ok(DValue::Func {
            ty: e.ty.clone(),
            func: Some(fid),
            val,
            vthis: Some(this),
        })
    }

    /// The `this` argument for a method called on `o`: class references and
    /// struct pointers as they are, struct values by address.
    fn receiver(&mut self, o: &DValue, loc: &Loc) -> LowerResult<Value> {
        match o.ty().to_base(self.src) {
            Type::Struct(_) => match self.lval(o, loc) {
                Ok(addr) => Ok(addr),
                Err(_) => Ok(self.spill(o, "tmpthis")),
            },
            _ => Ok(self.rval(o)),
        }
    }

    /// `&obj.method` or a nested function literal as a delegate value.
    pub(crate) fn lower_delegate(&mut self, e: &Expr, obj: Option<&Expr>, fid: FuncId) -> LowerResult<DValue> {
        let decl = self.src.func(fid);
        let (ctx, fptr) = match obj {
            Some(obj) if !decl.is_nested() => {
                let o = obj.codegen(self)?;
                let this = self.receiver(&o, &obj.loc)?;
                let fptr = if decl.is_virtual() && obj.ty.to_base(self.src).is_class() {
                    self.virtual_fn(this.clone(), fid)
                } else {
                    let idx = self.declare_func(fid);
                    self.ir.func_value(idx)
                };
                (this, fptr)
            }
            _ => {
                let ctx = self.nested_context(fid);
                let idx = self.declare_func(fid);
                (ctx, self.ir.func_value(idx))
            }
        };

        let dg_ty = self.ir_type(&e.ty);
        let fty = match &dg_ty {
            IrType::Struct(fields) if fields.len() == 2 => fields[1].clone(),
            t => bug!("delegate lowered to {}", t),
        };
        let dest = self.literal_dest(e);
        let mem = match &dest {
            Some(d) => d.clone(),
            None => self.alloca(dg_ty, "tmpdelegate"),
        };
        let cp = self.gepi(mem.clone(), 0, 0);
        let ctx = self.coerce_to(ctx, IrType::i8_ptr());
        self.store(ctx, cp);
        let fp = self.gepi(mem.clone(), 0, 1);
        let fptr = self.coerce_to(fptr, fty);
        self.store(fptr, fp);
        Ok(match dest {
            Some(_) => DValue::in_place(e.ty.clone(), mem),
            None => DValue::var(e.ty.clone(), mem),
        })
    }

    /// A function literal: a delegate when it needs a context, a plain
    /// function pointer otherwise.
    pub(crate) fn lower_func_literal(&mut self, e: &Expr, fid: FuncId) -> LowerResult<DValue> {
        match e.ty.to_base(self.src) {
            Type::Delegate(_) => self.lower_delegate(e, None, fid),
            Type::Function(_) => {
                let idx = self.declare_func(fid);
                Ok(DValue::Func {
                    ty: e.ty.clone(),
                    func: Some(fid),
                    val: self.ir.func_value(idx),
                    vthis: None,
                })
            }
            _ => {
                let idx = self.declare_func(fid);
                let f = self.ir.func_value(idx);
                let ty = self.ir_type(&e.ty);
                let f = self.bitcast(f, ty);
                Ok(DValue::imm(e.ty.clone(), f))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use crate::lir::{Inst, IrType};

    #[test]
    fn struct_results_are_constructed_in_the_destination() {
        let mut t = TestModule::new();
        let s = t.pair_struct();
        let make = t.func("make", Type::Struct(s), vec![]);
        let f = t.func("f", Type::void(), vec![]);
        let p = t.m.add_local(f, "p", Type::Struct(s));
        let e = t.assign(t.var(p), t.call(make, vec![]));
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(p);
        e.codegen(&mut ctx).unwrap();
        assert_eq!(
            ctx.count(|i| matches!(i, Inst::Alloca { name, .. } if name == "rettmp")),
            0
        );
        assert_eq!(ctx.count(|i| matches!(i, Inst::Memcpy { .. })), 0);
        assert_eq!(ctx.count(|i| matches!(i, Inst::Call { .. })), 1);
    }

    #[test]
    fn struct_results_outside_assignments_use_a_temporary() {
        let mut t = TestModule::new();
        let s = t.pair_struct();
        let make = t.func("make", Type::Struct(s), vec![]);
        let f = t.func("f", Type::void(), vec![]);
        let e = t.call(make, vec![]);
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        let v = e.codegen(&mut ctx).unwrap();
        assert!(matches!(v, DValue::Var { .. }));
        assert_eq!(
            ctx.count(|i| matches!(i, Inst::Alloca { name, .. } if name == "rettmp")),
            1
        );
    }

    #[test]
    fn struct_arguments_are_copied() {
        let mut t = TestModule::new();
        let s = t.pair_struct();
        let g = t.func("g", Type::void(), vec![("p", Type::Struct(s))]);
        let f = t.func("f", Type::void(), vec![]);
        let p = t.m.add_local(f, "p", Type::Struct(s));
        let e = t.call(g, vec![t.var(p)]);
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        ctx.declare_local_for_test(p);
        e.codegen(&mut ctx).unwrap();
        assert_eq!(ctx.count(|i| matches!(i, Inst::Memcpy { .. })), 1);
    }

    #[test]
    fn d_variadic_calls_pass_type_infos_and_a_data_blob() {
        let mut t = TestModule::new();
        let mut ft = FuncType::new(Type::void(), vec![]);
        ft.varargs = VarArgs::D;
        let g = t.m.add_func("g", ft);
        let f = t.func("f", Type::void(), vec![]);
        let e = t.call(g, vec![t.int(1), t.float(2.0)]);
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        e.codegen(&mut ctx).unwrap();
        for name in &["_argptr_storage", "_arguments_storage", "_arguments_array"] {
            assert_eq!(
                ctx.count(|i| matches!(i, Inst::Alloca { name: n, .. } if n == name)),
                1,
                "{}",
                name
            );
        }
        let call_args = ctx
            .ir
            .func(ctx.fs().func)
            .iter_insts()
            .find_map(|d| match &d.inst {
                Inst::Call { args, .. } => Some(args.len()),
                _ => None,
            });
        assert_eq!(call_args, Some(2));
    }

    #[test]
    fn alloca_intrinsic_allocates_dynamically() {
        let mut t = TestModule::new();
        let ft = FuncType::new(
            Type::void().ptr_to(),
            vec![Param {
                ty: Type::Basic(Basic::ULong),
                storage: ParamStorage::In,
            }],
        );
        let a = t.m.add_func("alloca", ft);
        t.m.funcs[a.index()].intrinsic = Some(Intrinsic::Alloca);
        let f = t.func("f", Type::void(), vec![]);
        let e = t.call(a, vec![t.typed_int(16, Type::Basic(Basic::ULong))]);
        let mut ctx = t.ctx();
        ctx.begin_test_function(f);
        let v = e.codegen(&mut ctx).unwrap();
        assert_eq!(v.ty(), &Type::void().ptr_to());
        assert_eq!(ctx.count(|i| matches!(i, Inst::Call { .. })), 0);
        assert!(ctx.count(|i| matches!(i, Inst::Alloca { count: Some(_), .. })) == 1);
    }

    #[test]
    fn nested_calls_without_a_frame_pass_null() {
        let mut t = TestModule::new();
        let outer = t.func("outer", Type::void(), vec![]);
        let inner = t.func("inner", Type::void(), vec![]);
        t.m.funcs[inner.index()].nested_in = Some(outer);
        let e = t.call(inner, vec![]);
        let mut ctx = t.ctx();
        ctx.begin_test_function(outer);
        e.codegen(&mut ctx).unwrap();
        let null = crate::lir::Value::null(IrType::i8_ptr());
        let passed = ctx
            .ir
            .func(ctx.fs().func)
            .iter_insts()
            .any(|d| matches!(&d.inst, Inst::Call { args, .. } if args.first() == Some(&null)));
        assert!(passed);
    }
}
