//! Debug information for the lowered module.
//!
//! Every operation here checks `DIBuilder::enabled` on entry and returns
//! without touching the metadata arena when debug info is off. Callers are
//! spread over expression lowering and the function driver, so the gate is
//! not centralized.

use fnv::FnvHashMap;

use crate::{
    ast::{AggId, FuncId, Protection, VarId},
    codegen::{CodegenCtx, DebugLevel},
    errors::LowerResult,
    lir::{DIFlags, DebugLoc, DwLang, MdId, MdNode, Value, VarKind},
    pathlib::FilePath,
    span::Loc,
};

mod types;

/// Per compilation unit debug state. The nodes themselves live in the
/// module's metadata arena.
pub struct DIBuilder {
    level: DebugLevel,
    cu: Option<MdId>,
    files: FnvHashMap<String, MdId>,
    composites: FnvHashMap<AggId, MdId>,
    types: FnvHashMap<String, MdId>,
    // forward declared aggregates met so far
    incomplete: usize,
    subprograms: FnvHashMap<FuncId, MdId>,
    globals: FnvHashMap<VarId, MdId>,
}

impl DIBuilder {
    pub fn new(level: DebugLevel) -> DIBuilder {
        DIBuilder {
            level,
            cu: None,
            files: FnvHashMap::default(),
            composites: FnvHashMap::default(),
            types: FnvHashMap::default(),
            incomplete: 0,
            subprograms: FnvHashMap::default(),
            globals: FnvHashMap::default(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.level != DebugLevel::None
    }

    fn lang(&self) -> DwLang {
        match self.level {
            DebugLevel::CCompat => DwLang::C,
            _ => DwLang::D,
        }
    }
}

pub(crate) fn visibility(p: Protection) -> DIFlags {
    match p {
        Protection::Public | Protection::Export => DIFlags::PUBLIC,
        Protection::Protected => DIFlags::PROTECTED,
        Protection::Private | Protection::Package => DIFlags::PRIVATE,
    }
}

impl<'a> CodegenCtx<'a> {
    pub fn emit_compile_unit(&mut self) {
        if !self.di.enabled() {
            return;
        }
        self.compile_unit();
    }

    /// The compile unit node, created on first use.
    fn compile_unit(&mut self) -> MdId {
        if let Some(cu) = self.di.cu {
            return cu;
        }
        let src = self.src;
        let file = self.create_file(&src.srcfile);
        let lang = self.di.lang();
        log::debug!("compile unit for {} ({:?})", self.src.srcfile, lang);
        let cu = self.ir.md.push(MdNode::CompileUnit {
            lang,
            file,
            producer: self.opts.producer.clone(),
            optimized: self.opts.optimize,
        });
        self.di.cu = Some(cu);
        self.ir.dbg_cu = Some(cu);
        cu
    }

    pub fn emit_module_flags(&mut self) {
        if !self.di.enabled() {
            return;
        }
        self.ir.add_flag("Debug Info Version", 3);
        if self.abi.emit_codeview {
            self.ir.add_flag("CodeView", 1);
        } else {
            self.ir.add_flag("Dwarf Version", 4);
        }
    }

    pub(crate) fn create_file(&mut self, path: &FilePath) -> MdId {
        let abs = path.absolute();
        let key = abs.to_string();
        if let Some(id) = self.di.files.get(&key) {
            return *id;
        }
        let id = self.ir.md.push(MdNode::File {
            name: abs.file_name(),
            dir: abs.parent().to_string(),
        });
        self.di.files.insert(key, id);
        id
    }

    /// File record of the module being lowered.
    pub(crate) fn unit_file(&mut self) -> MdId {
        let src = self.src;
        self.create_file(&src.srcfile)
    }

    pub(crate) fn current_scope(&self) -> Option<MdId> {
        self.fs.as_ref()?.scopes.last().copied()
    }

    pub fn emit_subprogram(&mut self, fid: FuncId) -> LowerResult<Option<MdId>> {
        if !self.di.enabled() {
            return Ok(None);
        }
        if let Some(sp) = self.di.subprograms.get(&fid) {
            return Ok(Some(*sp));
        }
        let decl = self.src.func(fid);
        let cu = self.compile_unit();
        let file = self.unit_file();
        let ret = self.di_type(&decl.ty.ret)?;
        let ty = self.ir.md.push(MdNode::SubroutineType { types: vec![ret] });
        let sp = self.ir.md.push(MdNode::Subprogram {
            name: decl.pretty.clone(),
            linkage_name: decl.mangled.clone(),
            scope: cu,
            file,
            line: decl.loc.line,
            ty,
            local_to_unit: decl.protection == Protection::Private,
            definition: true,
            scope_line: decl.loc.line,
            flags: visibility(decl.protection) | DIFlags::PROTOTYPED,
            optimized: self.opts.optimize,
        });
        self.di.subprograms.insert(fid, sp);
        Ok(Some(sp))
    }

    /// Attaches the subprogram to the function being lowered and makes it
    /// the base of the scope stack.
    pub fn emit_func_start(&mut self, fid: FuncId) -> LowerResult {
        if !self.di.enabled() {
            return Ok(());
        }
        let sp = unless!(self.emit_subprogram(fid)?, else return Ok(()));
        log::debug!("subprogram {} for {}", sp, self.src.func(fid).mangled);
        let func = self.fs().func;
        self.ir.func_mut(func).subprogram = Some(sp);
        self.fs_mut().scopes.push(sp);
        let loc = self.src.func(fid).loc.clone();
        self.emit_stop_point(&loc);
        Ok(())
    }

    pub fn emit_func_end(&mut self, fid: FuncId) {
        if !self.di.enabled() {
            return;
        }
        let end = self.src.func(fid).end_loc.clone();
        self.emit_stop_point(&end);
        let fs = self.fs_mut();
        if fs.scopes.len() != 1 {
            bug!(
                "unbalanced debug scopes at the end of a function: {} open",
                fs.scopes.len()
            );
        }
        fs.scopes.pop();
    }

    pub fn emit_block_start(&mut self, loc: &Loc) {
        if !self.di.enabled() {
            return;
        }
        let scope = match self.current_scope() {
            Some(s) => s,
            None => bug!("lexical block outside of a subprogram"),
        };
        let file = self.unit_file();
        let block = self.ir.md.push(MdNode::LexicalBlock {
            scope,
            file,
            line: loc.line,
            col: loc.col,
        });
        self.fs_mut().scopes.push(block);
        self.emit_stop_point(loc);
    }

    pub fn emit_block_end(&mut self) {
        if !self.di.enabled() {
            return;
        }
        let fs = self.fs_mut();
        if fs.scopes.len() < 2 {
            bug!("block end without an open lexical block");
        }
        fs.scopes.pop();
    }

    /// Attributes the following instructions to `loc`. An unknown line does
    /// not replace a location that is already set.
    pub fn emit_stop_point(&mut self, loc: &Loc) {
        if !self.di.enabled() {
            return;
        }
        let scope = unless!(self.current_scope(), else return);
        let fs = self.fs_mut();
        if loc.is_unknown() && fs.at.dbg.is_some() {
            return;
        }
        fs.at.dbg = Some(DebugLoc {
            line: loc.line,
            col: loc.col,
            scope,
        });
    }

    /// Builds the variable node for `v` once per function.
    fn register_variable(&mut self, v: VarId, is_this: bool) -> LowerResult<Option<MdId>> {
        if let Some(id) = self.fs().di_vars.get(&v) {
            return Ok(Some(*id));
        }
        let scope = unless!(self.current_scope(), else return Ok(None));
        let var = self.src.var(v);
        let decl = self.current_func();
        let is_this = is_this || decl.vthis == Some(v);

        let mut ty = self.di_type(&var.ty)?;
        if var.is_ref() {
            ty = Some(self.ir.md.push(MdNode::ReferenceType { base: ty }));
        }

        let receiver = decl.vthis.is_some() as u32;
        let kind = if is_this {
            VarKind::Arg(1)
        } else if var.is_parameter() {
            match decl.params.iter().position(|p| *p == v) {
                Some(i) => VarKind::Arg(i as u32 + 1 + receiver),
                None => VarKind::Auto,
            }
        } else {
            VarKind::Auto
        };
        let flags = if is_this {
            DIFlags::ARTIFICIAL | DIFlags::OBJECT_POINTER
        } else {
            DIFlags::empty()
        };

        let file = self.unit_file();
        let id = self.ir.md.push(MdNode::LocalVariable {
            kind,
            scope,
            name: var.name.clone(),
            file,
            line: var.loc.line,
            ty,
            flags,
        });
        self.fs_mut().di_vars.insert(v, id);
        Ok(Some(id))
    }

    /// Registers a local or parameter living at `addr` and emits its
    /// declare annotation. Later calls for the same variable do nothing.
    pub fn emit_local_variable(&mut self, addr: &Value, v: VarId, is_this: bool) -> LowerResult {
        if !self.di.enabled() || self.fs().di_vars.contains_key(&v) {
            return Ok(());
        }
        let var = unless!(self.register_variable(v, is_this)?, else return Ok(()));
        log::trace!("dbg.declare {} for {}", var, self.src.var(v).name);
        let at = self.at();
        self.ir.build_dbg_declare(&at, addr.clone(), var);
        Ok(())
    }

    /// Records that `value` now holds `v`. Variables without a node are
    /// skipped.
    pub fn emit_value(&mut self, value: &Value, v: VarId) {
        if !self.di.enabled() {
            return;
        }
        let var = unless!(self.fs().di_vars.get(&v).copied(), else return);
        let at = self.at();
        self.ir.build_dbg_value(&at, value.clone(), var);
    }

    /// A receiver passed as a plain value: registered without storage and
    /// described through a value annotation.
    pub fn emit_this_value(&mut self, value: &Value, v: VarId) -> LowerResult {
        if !self.di.enabled() {
            return Ok(());
        }
        self.register_variable(v, true)?;
        self.emit_value(value, v);
        Ok(())
    }

    pub fn emit_global_variable(&mut self, g: &Value, v: VarId) -> LowerResult {
        if !self.di.enabled() || self.di.globals.contains_key(&v) {
            return Ok(());
        }
        let var = self.src.var(v);
        let cu = self.compile_unit();
        let file = self.unit_file();
        let ty = self.di_type(&var.ty)?;
        log::trace!("debug global {} for {}", var.name, g);
        let id = self.ir.md.push(MdNode::GlobalVariable {
            name: var.name.clone(),
            linkage_name: var.mangled.clone(),
            scope: cu,
            file,
            line: var.loc.line,
            ty,
            local_to_unit: !matches!(var.protection, Protection::Public | Protection::Export)
                || var.parent.is_some(),
        });
        self.di.globals.insert(v, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::codegen::testutil::*;
    use crate::lir::{Inst, MdNode};
    use crate::span::Loc;

    fn has_body(t: &mut TestModule, f: FuncId, body: Vec<Stmt>) {
        t.m.funcs[f.index()].body = Some(body);
    }

    #[test]
    fn nothing_is_emitted_without_debug_info() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::int(), vec![("a", Type::int())]);
        let x = t.m.add_local(f, "x", Type::Basic(Basic::Double));
        let decl = t.expr(ExprKind::Declaration(Decl::Var(x)), Type::void());
        let inner = Stmt::Block {
            body: vec![Stmt::Expr(decl)],
            loc: t.m.loc(3, 1),
            end_loc: t.m.loc(5, 1),
        };
        let ret = Stmt::Return(Some(t.int(0)), t.m.loc(6, 1));
        has_body(&mut t, f, vec![inner, ret]);
        let ir = crate::codegen::codegen_module(&t.m, TestModule::options(DebugLevel::None)).unwrap();
        assert_eq!(ir.md.len(), 0);
        assert!(ir.dbg_cu.is_none());
        assert!(ir.flags.is_empty());
        for func in ir.funcs.iter() {
            assert!(func.subprogram.is_none());
            assert!(func.iter_insts().all(|i| i.dbg.is_none()));
            assert_eq!(
                func.count(|i| matches!(i, Inst::DbgDeclare { .. } | Inst::DbgValue { .. })),
                0
            );
        }
    }

    #[test]
    fn lexical_blocks_nest_and_balance() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let x = t.m.add_local(f, "x", Type::int());
        let decl = t.expr(ExprKind::Declaration(Decl::Var(x)), Type::void());
        let inner = Stmt::Block {
            body: vec![Stmt::Expr(decl)],
            loc: t.m.loc(3, 1),
            end_loc: t.m.loc(4, 1),
        };
        let outer = Stmt::Block {
            body: vec![inner],
            loc: t.m.loc(2, 1),
            end_loc: t.m.loc(5, 1),
        };
        has_body(&mut t, f, vec![outer]);
        let mut ctx = t.ctx_with_debug();
        ctx.emit_compile_unit();
        ctx.lower_function(f).unwrap();
        assert_eq!(ctx.ir.md.count(|n| matches!(n, MdNode::LexicalBlock { .. })), 2);
        assert_eq!(ctx.ir.md.count(|n| matches!(n, MdNode::Subprogram { .. })), 1);
        // the inner block is scoped to the outer one
        let blocks: Vec<_> = ctx
            .ir
            .md
            .iter()
            .filter(|(_, n)| matches!(n, MdNode::LexicalBlock { .. }))
            .collect();
        match blocks[1].1 {
            MdNode::LexicalBlock { scope, .. } => assert_eq!(*scope, blocks[0].0),
            n => panic!("unexpected {}", n),
        }
        assert!(ctx.fs.is_none());
    }

    #[test]
    fn variables_are_registered_once() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let x = t.m.add_local(f, "x", Type::int());
        let mut ctx = t.ctx_with_debug();
        ctx.begin_test_function(f);
        ctx.emit_func_start(f).unwrap();
        ctx.declare_local_for_test(x);
        let slot = ctx.fs().vars[&x].clone();
        ctx.emit_local_variable(&slot, x, false).unwrap();
        ctx.emit_local_variable(&slot, x, false).unwrap();
        assert_eq!(ctx.ir.md.count(|n| matches!(n, MdNode::LocalVariable { .. })), 1);
        assert_eq!(ctx.count(|i| matches!(i, Inst::DbgDeclare { .. })), 1);
    }

    #[test]
    fn parameters_are_numbered_after_the_receiver() {
        let mut t = TestModule::new();
        let s = t.pair_struct();
        let f = t.func("get", Type::int(), vec![("a", Type::int()), ("b", Type::int())]);
        let this = t.m.add_local(f, "this", Type::Struct(s).ptr_to());
        t.m.funcs[f.index()].vthis = Some(this);
        let b = t.m.funcs[f.index()].params[1];
        let mut ctx = t.ctx_with_debug();
        ctx.begin_test_function(f);
        ctx.emit_func_start(f).unwrap();
        let slot = ctx.alloca(crate::lir::IrType::i32(), "b");
        ctx.emit_local_variable(&slot, b, false).unwrap();
        let kinds: Vec<_> = ctx
            .ir
            .md
            .iter()
            .filter_map(|(_, n)| match n {
                MdNode::LocalVariable { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![crate::lir::VarKind::Arg(3)]);
    }

    #[test]
    fn unknown_lines_keep_the_current_location() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let mut ctx = t.ctx_with_debug();
        ctx.begin_test_function(f);
        ctx.emit_func_start(f).unwrap();
        let loc = t.m.loc(7, 3);
        ctx.emit_stop_point(&loc);
        ctx.emit_stop_point(&Loc::unknown());
        assert_eq!(ctx.fs().at.dbg.map(|d| d.line), Some(7));
    }

    #[test]
    fn values_of_unregistered_variables_are_skipped() {
        let mut t = TestModule::new();
        let f = t.func("f", Type::void(), vec![]);
        let x = t.m.add_local(f, "x", Type::int());
        let mut ctx = t.ctx_with_debug();
        ctx.begin_test_function(f);
        ctx.emit_func_start(f).unwrap();
        ctx.emit_value(&crate::lir::Value::const_int(crate::lir::IrType::i32(), 1), x);
        assert_eq!(ctx.count(|i| matches!(i, Inst::DbgValue { .. })), 0);
    }

    #[test]
    fn compatibility_mode_tags_the_unit_as_c() {
        let t = TestModule::new();
        let mut ctx = CodegenCtx::new(&t.m, TestModule::options(DebugLevel::CCompat));
        ctx.emit_compile_unit();
        ctx.emit_compile_unit();
        assert_eq!(ctx.ir.md.count(|n| matches!(n, MdNode::CompileUnit { .. })), 1);
        match ctx.ir.dbg_cu.map(|cu| ctx.ir.md.get(cu)) {
            Some(MdNode::CompileUnit { lang, .. }) => assert_eq!(*lang, crate::lir::DwLang::C),
            n => panic!("unexpected {:?}", n),
        }
    }
}
