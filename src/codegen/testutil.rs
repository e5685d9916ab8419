//! Helpers for building small frontend modules in unit tests.

pub use super::{Codegen, CodegenCtx, CodegenOptions, DValue, DebugLevel};
pub use crate::ast::*;
pub use crate::errors::LowerErrorKind;

use super::FuncState;
use crate::{
    lir::Inst,
    span::Loc,
    target::Target,
};

pub struct TestModule {
    pub m: Module,
}

impl TestModule {
    pub fn new() -> TestModule {
        TestModule {
            m: Module::new("test", "test.d"),
        }
    }

    pub fn options(debug: DebugLevel) -> CodegenOptions {
        CodegenOptions {
            target: Target::X86_64Linux,
            debug,
            optimize: false,
            producer: str!("dlower test"),
        }
    }

    pub fn ctx(&self) -> CodegenCtx<'_> {
        CodegenCtx::new(&self.m, TestModule::options(DebugLevel::None))
    }

    pub fn ctx_with_debug(&self) -> CodegenCtx<'_> {
        CodegenCtx::new(&self.m, TestModule::options(DebugLevel::Full))
    }

    pub fn loc(&self) -> Loc {
        self.m.loc(2, 5)
    }

    /// A D function with `params` passed by value and an empty body.
    pub fn func(&mut self, name: &str, ret: Type, params: Vec<(&str, Type)>) -> FuncId {
        let ft = FuncType::new(
            ret,
            params
                .iter()
                .map(|(_, ty)| Param {
                    ty: ty.clone(),
                    storage: ParamStorage::In,
                })
                .collect(),
        );
        let f = self.m.add_func(name, ft);
        for (pname, ty) in params {
            self.m.add_param(f, pname, ty, StorageClass::empty());
        }
        self.m.funcs[f.index()].body = Some(vec![]);
        f
    }

    /// `struct Pair { float re; float im; }`
    pub fn pair_struct(&mut self) -> AggId {
        let s = self.m.add_struct("Pair");
        self.m.add_field(s, "re", Type::Basic(Basic::Float));
        self.m.add_field(s, "im", Type::Basic(Basic::Float));
        s
    }

    pub fn expr(&self, kind: ExprKind, ty: Type) -> Expr {
        Expr::new(kind, ty, self.loc())
    }

    pub fn int(&self, v: u64) -> Expr {
        self.typed_int(v, Type::int())
    }

    pub fn typed_int(&self, v: u64, ty: Type) -> Expr {
        self.expr(ExprKind::Integer(v), ty)
    }

    pub fn float(&self, v: f64) -> Expr {
        self.expr(ExprKind::Real(v), Type::Basic(Basic::Float))
    }

    pub fn bool(&self, b: bool) -> Expr {
        self.expr(ExprKind::Integer(b as u64), Type::bool())
    }

    pub fn var(&self, v: VarId) -> Expr {
        self.expr(ExprKind::Var(Symbol::Var(v)), self.m.var(v).ty.clone())
    }

    pub fn struct_lit(&self, agg: AggId, elems: Vec<Option<Expr>>) -> Expr {
        self.expr(ExprKind::StructLiteral(agg, elems), Type::Struct(agg))
    }

    pub fn binary(&self, op: BinOp, l: Expr, r: Expr, ty: Type) -> Expr {
        self.expr(ExprKind::Binary(op, Box::new(l), Box::new(r)), ty)
    }

    pub fn assign(&self, l: Expr, r: Expr) -> Expr {
        let ty = l.ty.clone();
        self.expr(ExprKind::Assign(Box::new(l), Box::new(r)), ty)
    }

    pub fn call(&self, f: FuncId, args: Vec<Expr>) -> Expr {
        let ft = self.m.func(f).ty.clone();
        let callee = self.expr(ExprKind::Var(Symbol::Func(f)), Type::Function(Box::new(ft.clone())));
        self.expr(ExprKind::Call(Box::new(callee), args), ft.ret)
    }
}

impl<'a> CodegenCtx<'a> {
    /// Opens the entry block of `f` without running the function prologue.
    pub fn begin_test_function(&mut self, f: FuncId) {
        let idx = self.declare_func(f);
        let entry = self.ir.func_mut(idx).append_block("entry");
        self.fs = Some(FuncState::new(f, idx, entry));
    }

    /// Gives a local of the current test function a stack slot.
    pub fn declare_local_for_test(&mut self, v: VarId) {
        let ty = self.src.var(v).ty.clone();
        let irty = self.ir_type(&ty);
        let name = self.src.var(v).name.clone();
        let slot = self.alloca(irty, &name);
        self.fs_mut().vars.insert(v, slot);
    }

    /// Instructions of the current function matching `pred`.
    pub fn count<F: Fn(&Inst) -> bool>(&self, pred: F) -> usize {
        self.ir.func(self.fs().func).count(pred)
    }
}
