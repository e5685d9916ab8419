//! Lowering of the typed tree into `lir`.
//!
//! All state lives in [`CodegenCtx`]: the output module, the per-function
//! [`FuncState`] (insertion cursor, variable storage, assignment frames, the
//! enclosing-array stack and the debug scope stack) and the caches for
//! declarations that are emitted lazily on first use.

use std::ptr;

use fnv::FnvHashMap;

use crate::{
    ast::{self, AggId, Expr, FuncId, VarId},
    debug::DIBuilder,
    errors::{LowerError, LowerResult},
    lir::{self, BlockId, CastOp, Cursor, FloatPred, FuncIdx, IntPred, IrType, MdId, Op, Value},
    target::{AbiPolicy, CallConv, Target},
};

mod alloc;
mod arith;
mod array;
mod assign;
mod call;
mod consts;
mod dvalue;
mod expr;
mod func;
mod irtype;
mod literal;
mod runtime;

#[cfg(test)]
pub(crate) mod testutil;

pub use dvalue::DValue;
pub use func::codegen_module;

pub trait Codegen {
    type Output;

    fn codegen(&self, ctx: &mut CodegenCtx) -> Self::Output;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DebugLevel {
    None,
    Full,
    /// Full debug info tagged as C for debuggers without D support.
    CCompat,
}

#[derive(Clone, Debug)]
pub struct CodegenOptions {
    pub target: Target,
    pub debug: DebugLevel,
    pub optimize: bool,
    pub producer: String,
}

impl Default for CodegenOptions {
    fn default() -> CodegenOptions {
        CodegenOptions {
            target: Target::default(),
            debug: DebugLevel::None,
            optimize: false,
            producer: format!("dlower {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// The destination of the assignment (or aggregate slot initialization)
/// currently being lowered. Expressions compare themselves against `lhs`
/// and `rhs` by address.
pub(crate) struct AssignFrame {
    lhs: *const Expr,
    rhs: *const Expr,
    dest: Option<DValue>,
}

/// Lowering state of the function whose body is being emitted.
pub(crate) struct FuncState {
    pub decl: FuncId,
    pub func: FuncIdx,
    pub at: Cursor,
    pub vars: FnvHashMap<VarId, Value>,
    pub this: Option<DValue>,
    /// Incoming context of a nested function, as `i8*`.
    pub nest: Option<Value>,
    /// Own record of variables captured by nested functions.
    pub frame: Option<Value>,
    pub sret: Option<Value>,
    frames: Vec<AssignFrame>,
    arrays: Vec<DValue>,
    pub scopes: Vec<MdId>,
    pub di_vars: FnvHashMap<VarId, MdId>,
}

impl FuncState {
    pub fn new(decl: FuncId, func: FuncIdx, entry: BlockId) -> FuncState {
        FuncState {
            decl,
            func,
            at: Cursor {
                func,
                block: entry,
                dbg: None,
            },
            vars: FnvHashMap::default(),
            this: None,
            nest: None,
            frame: None,
            sret: None,
            frames: vec![],
            arrays: vec![],
            scopes: vec![],
            di_vars: FnvHashMap::default(),
        }
    }
}

pub struct CodegenCtx<'a> {
    pub(crate) src: &'a ast::Module,
    pub ir: lir::Module,
    pub(crate) abi: AbiPolicy,
    pub(crate) opts: CodegenOptions,
    pub(crate) di: DIBuilder,
    pub(crate) fs: Option<FuncState>,
    funcs: FnvHashMap<FuncId, FuncIdx>,
    globals: FnvHashMap<VarId, Value>,
    agg_types: FnvHashMap<AggId, IrType>,
    init_images: FnvHashMap<AggId, Value>,
    vtbls: FnvHashMap<AggId, Value>,
}

impl<'a> CodegenCtx<'a> {
    pub fn new(src: &'a ast::Module, opts: CodegenOptions) -> CodegenCtx<'a> {
        let abi = AbiPolicy::for_target(opts.target);
        let ir = lir::Module::new(&src.name, &abi);
        let di = DIBuilder::new(opts.debug);
        CodegenCtx {
            src,
            ir,
            abi,
            opts,
            di,
            fs: None,
            funcs: FnvHashMap::default(),
            globals: FnvHashMap::default(),
            agg_types: FnvHashMap::default(),
            init_images: FnvHashMap::default(),
            vtbls: FnvHashMap::default(),
        }
    }

    pub fn finish(self) -> lir::Module {
        self.ir
    }

    pub(crate) fn fs(&self) -> &FuncState {
        match &self.fs {
            Some(fs) => fs,
            None => bug!("lowering outside of a function body"),
        }
    }

    pub(crate) fn fs_mut(&mut self) -> &mut FuncState {
        match &mut self.fs {
            Some(fs) => fs,
            None => bug!("lowering outside of a function body"),
        }
    }

    pub(crate) fn at(&self) -> Cursor {
        self.fs().at
    }

    pub(crate) fn position_at(&mut self, block: BlockId) {
        self.fs_mut().at.block = block;
    }

    pub(crate) fn append_block(&mut self, name: &str) -> BlockId {
        let func = self.fs().func;
        self.ir.func_mut(func).append_block(name)
    }

    pub(crate) fn is_terminated(&self) -> bool {
        let at = self.at();
        self.ir.func(at.func).is_terminated(at.block)
    }

    pub(crate) fn is_reachable(&self) -> bool {
        let at = self.at();
        self.ir.func(at.func).is_reachable(at.block)
    }

    pub(crate) fn current_func(&self) -> &'a ast::FuncDecl {
        self.src.func(self.fs().decl)
    }

    //
    // instruction helpers on the current cursor
    //

    pub(crate) fn alloca(&mut self, ty: IrType, name: &str) -> Value {
        let at = self.at();
        self.ir.build_alloca(&at, ty, name)
    }

    pub(crate) fn load(&mut self, ptr: Value) -> Value {
        let at = self.at();
        self.ir.build_load(&at, ptr)
    }

    pub(crate) fn store(&mut self, value: Value, ptr: Value) {
        let at = self.at();
        self.ir.build_store(&at, value, ptr)
    }

    pub(crate) fn gepi(&mut self, base: Value, i0: u64, i1: u64) -> Value {
        let at = self.at();
        self.ir.build_gepi(&at, base, i0, i1)
    }

    pub(crate) fn offset(&mut self, base: Value, idx: Value) -> Value {
        let at = self.at();
        self.ir.build_offset(&at, base, idx)
    }

    pub(crate) fn bin(&mut self, op: Op, lhs: Value, rhs: Value) -> Value {
        let at = self.at();
        self.ir.build_bin(&at, op, lhs, rhs)
    }

    pub(crate) fn icmp(&mut self, pred: IntPred, lhs: Value, rhs: Value) -> Value {
        let at = self.at();
        self.ir.build_icmp(&at, pred, lhs, rhs)
    }

    pub(crate) fn fcmp(&mut self, pred: FloatPred, lhs: Value, rhs: Value) -> Value {
        let at = self.at();
        self.ir.build_fcmp(&at, pred, lhs, rhs)
    }

    pub(crate) fn cast(&mut self, op: CastOp, value: Value, to: IrType) -> Value {
        let at = self.at();
        self.ir.build_cast(&at, op, value, to)
    }

    pub(crate) fn bitcast(&mut self, value: Value, to: IrType) -> Value {
        let at = self.at();
        self.ir.build_bitcast(&at, value, to)
    }

    pub(crate) fn call(&mut self, callee: Value, args: Vec<Value>, cc: CallConv) -> Value {
        let at = self.at();
        self.ir.build_call(&at, callee, args, cc)
    }

    pub(crate) fn br(&mut self, dest: BlockId) {
        let at = self.at();
        self.ir.build_br(&at, dest)
    }

    pub(crate) fn cond_br(&mut self, cond: Value, then: BlockId, els: BlockId) {
        let at = self.at();
        self.ir.build_cond_br(&at, cond, then, els)
    }

    pub(crate) fn unreachable(&mut self) {
        let at = self.at();
        self.ir.build_unreachable(&at)
    }

    /// Copies `bytes` bytes between two addresses of any pointer type.
    pub(crate) fn memcpy(&mut self, dst: Value, src: Value, bytes: Value) {
        let dst = self.bitcast(dst, IrType::i8_ptr());
        let src = self.bitcast(src, IrType::i8_ptr());
        let at = self.at();
        self.ir.build_memcpy(&at, dst, src, bytes)
    }

    pub(crate) fn memset_zero(&mut self, dst: Value, bytes: Value) {
        let dst = self.bitcast(dst, IrType::i8_ptr());
        let at = self.at();
        self.ir.build_memset(&at, dst, 0, bytes)
    }

    pub(crate) fn const_size(&self, n: u64) -> Value {
        Value::const_int(self.ir.size_t(), n)
    }

    //
    // assignment frames and the enclosing-array stack
    //

    /// Runs `f` with an assignment frame for `lhs = rhs` pushed. The frame is
    /// popped again whether or not `f` succeeds.
    pub(crate) fn with_frame<T, F>(
        &mut self,
        lhs: Option<&Expr>,
        rhs: &Expr,
        dest: Option<DValue>,
        f: F,
    ) -> LowerResult<T>
    where
        F: FnOnce(&mut Self) -> LowerResult<T>,
    {
        let frame = AssignFrame {
            lhs: lhs.map_or(ptr::null(), |e| e as *const Expr),
            rhs: rhs as *const Expr,
            dest,
        };
        self.fs_mut().frames.push(frame);
        let res = f(self);
        self.fs_mut().frames.pop();
        res
    }

    pub(crate) fn set_frame_dest(&mut self, dest: DValue) {
        match self.fs_mut().frames.last_mut() {
            Some(frame) => frame.dest = Some(dest),
            None => bug!("no assignment frame to record a destination in"),
        }
    }

    /// Whether `e` is the left-hand side of the innermost assignment.
    pub(crate) fn is_assign_lhs(&self, e: &Expr) -> bool {
        let fs = unless!(self.fs.as_ref(), else return false);
        fs.frames.last().map_or(false, |f| ptr::eq(f.lhs, e))
    }

    /// The destination of the innermost assignment if `e` is its right-hand side.
    pub(crate) fn assign_dest(&self, e: &Expr) -> Option<DValue> {
        let frame = self.fs.as_ref()?.frames.last()?;
        if ptr::eq(frame.rhs, e) {
            frame.dest.clone()
        } else {
            None
        }
    }

    /// Storage a call returning through a hidden pointer can construct its
    /// result into: the destination of the innermost assignment, when `call`
    /// is its right-hand side and the destination is addressable storage of
    /// exactly the returned IR type. Slices and length pseudo-lvalues never
    /// qualify.
    pub(crate) fn sret_destination(&mut self, call: &Expr) -> Option<Value> {
        let dest = self.assign_dest(call)?;
        let addr = match &dest {
            DValue::Var { addr, .. } => addr.clone(),
            _ => return None,
        };
        let ret = self.ir_type(&call.ty);
        if addr.ty.pointee() == Some(&ret) {
            Some(addr)
        } else {
            None
        }
    }

    pub(crate) fn with_array<T, F>(&mut self, arr: DValue, f: F) -> LowerResult<T>
    where
        F: FnOnce(&mut Self) -> LowerResult<T>,
    {
        self.fs_mut().arrays.push(arr);
        let res = f(self);
        self.fs_mut().arrays.pop();
        res
    }

    pub(crate) fn enclosing_array(&self) -> Option<&DValue> {
        self.fs().arrays.last()
    }

    /// Lowers `e` as the initializer of `dest` and copies the result into it
    /// unless it was constructed there already.
    pub(crate) fn init_into(&mut self, dest: DValue, e: &Expr) -> LowerResult {
        let val = self.with_frame(None, e, Some(dest.clone()), |ctx| e.codegen(ctx))?;
        if !val.is_in_place() {
            self.assign(&dest, &val, &e.loc)?;
        }
        Ok(())
    }

    pub(crate) fn unsupported<T>(&self, what: &str, e: &Expr) -> LowerResult<T> {
        Err(LowerError::unsupported(
            format!("{} `{}` has no lowering", what, e.kind.name()),
            &e.loc,
        ))
    }
}
