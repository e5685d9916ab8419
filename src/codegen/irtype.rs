//! Mapping of frontend types onto machine types, and the ABI questions that
//! depend on it.

use super::CodegenCtx;
use crate::{
    ast::{
        AggId, AggKind, Basic, FuncDecl, FuncId, FuncType, Intrinsic, Linkage, Type, VarArgs, VarId,
    },
    lir::{self, FnType, FuncIdx, IrType},
    target::CallConv,
};

impl<'a> CodegenCtx<'a> {
    pub fn ir_type(&mut self, ty: &Type) -> IrType {
        match ty {
            Type::Basic(b) => self.basic_ir_type(*b),
            Type::Null => IrType::i8_ptr(),
            Type::Pointer(t) => match &**t {
                Type::Basic(Basic::Void) => IrType::i8_ptr(),
                t => self.ir_type(t).ptr_to(),
            },
            Type::Vector(t, n) => IrType::Vector(Box::new(self.ir_type(t)), *n),
            Type::SArray(t, n) => self.ir_type(t).array_of(*n),
            Type::DArray(t) => {
                let elem = match &**t {
                    Type::Basic(Basic::Void) => IrType::i8(),
                    t => self.ir_type(t),
                };
                IrType::Struct(vec![self.ir.size_t(), elem.ptr_to()])
            }
            // the runtime owns the layout of associative arrays
            Type::AArray(..) => IrType::i8_ptr(),
            Type::Struct(id) => self.agg_ir_type(*id),
            Type::Class(id) => self.agg_ir_type(*id).ptr_to(),
            Type::Enum(_) => {
                let base = ty.to_base(self.src);
                self.ir_type(&base)
            }
            Type::Function(ft) => IrType::Func(Box::new(self.fn_ir_type(ft, None))),
            Type::Delegate(ft) => {
                let fptr = IrType::Func(Box::new(self.fn_ir_type(ft, Some(IrType::i8_ptr()))));
                IrType::Struct(vec![IrType::i8_ptr(), fptr.ptr_to()])
            }
            Type::Tuple(ts) => IrType::Struct(ts.iter().map(|t| self.ir_type(t)).collect()),
        }
    }

    fn basic_ir_type(&self, b: Basic) -> IrType {
        match b {
            Basic::Void => IrType::Void,
            Basic::Bool => IrType::i1(),
            Basic::Char | Basic::Byte | Basic::UByte => IrType::i8(),
            Basic::WChar | Basic::Short | Basic::UShort => IrType::Int(16),
            Basic::DChar | Basic::Int | Basic::UInt => IrType::i32(),
            Basic::Long | Basic::ULong => IrType::Int(64),
            Basic::Float | Basic::IFloat => IrType::F32,
            Basic::Double | Basic::IDouble => IrType::F64,
            Basic::Real | Basic::IReal => IrType::F80,
            Basic::CFloat | Basic::CDouble | Basic::CReal => {
                let part = self.basic_ir_type(b.real_part());
                IrType::Struct(vec![part.clone(), part])
            }
        }
    }

    /// The identified record of a struct or class. The body is registered
    /// once the layout is known; recursive references see the name first.
    pub fn agg_ir_type(&mut self, id: AggId) -> IrType {
        if let Some(ty) = self.agg_types.get(&id) {
            return ty.clone();
        }

        let agg = self.src.agg(id);
        let prefix = match agg.kind {
            AggKind::Struct => "struct",
            AggKind::Class | AggKind::Interface => "class",
        };
        let name = format!("{}.{}", prefix, agg.mangled);
        let ty = self.ir.declare_struct(&name);
        self.agg_types.insert(id, ty.clone());
        if !agg.layout_done {
            return ty;
        }

        let mut body = vec![];
        if agg.kind != AggKind::Struct {
            body.push(IrType::i8_ptr().ptr_to());
            body.push(IrType::i8_ptr());
        }
        let fields = match agg.kind {
            AggKind::Struct => agg.fields.clone(),
            _ => self.src.all_fields(id),
        };
        for f in fields {
            let fty = self.src.var(f).ty.clone();
            body.push(self.ir_type(&fty));
        }
        log::trace!("record %{} has {} fields", name, body.len());
        self.ir.set_struct_body(&name, body);
        ty
    }

    /// Position of a field inside the IR record of its aggregate.
    pub fn field_index(&self, agg: AggId, field: VarId) -> u64 {
        let decl = self.src.agg(agg);
        let (fields, skip) = match decl.kind {
            AggKind::Struct => (decl.fields.clone(), 0),
            _ => (self.src.all_fields(agg), 2),
        };
        match fields.iter().position(|f| *f == field) {
            Some(i) => (i + skip) as u64,
            None => bug!(
                "{} is not a field of {}",
                self.src.var(field).name,
                decl.name
            ),
        }
    }

    /// Types passed and stored by address rather than as first-class values.
    pub fn is_by_ref(&self, ty: &Type) -> bool {
        matches!(ty.to_base(self.src), Type::Struct(_) | Type::SArray(..))
    }

    /// Whether results of this function type come back through a hidden
    /// pointer parameter.
    pub fn ret_in_ptr(&self, ft: &FuncType) -> bool {
        match ft.ret.to_base(self.src) {
            Type::Struct(_) | Type::SArray(..) => true,
            Type::DArray(_) | Type::Delegate(_) => ft.linkage == Linkage::D,
            t if t.is_complex() => ft.linkage == Linkage::D,
            _ => false,
        }
    }

    /// Signature of a function type; `ctx` is the receiver or context
    /// parameter following the hidden return pointer.
    pub fn fn_ir_type(&mut self, ft: &FuncType, ctx: Option<IrType>) -> FnType {
        let mut params = vec![];
        let ret = if self.ret_in_ptr(ft) {
            let rt = self.ir_type(&ft.ret);
            params.push(rt.ptr_to());
            IrType::Void
        } else {
            self.ir_type(&ft.ret)
        };
        if let Some(ctx) = ctx {
            params.push(ctx);
        }
        for p in ft.params.iter() {
            let t = self.ir_type(&p.ty);
            if p.storage.is_ref() || self.is_by_ref(&p.ty) {
                params.push(t.ptr_to());
            } else {
                params.push(t);
            }
        }
        if ft.varargs == VarArgs::D {
            let typeinfos = self.ir_type(&Type::Basic(Basic::Void).ptr_to().array_of());
            params.push(typeinfos.ptr_to());
            params.push(IrType::i8_ptr());
        }
        FnType {
            ret,
            params,
            c_varargs: ft.varargs == VarArgs::C,
        }
    }

    /// Signature of a declared function including its receiver or context.
    pub fn func_ir_type(&mut self, f: FuncId) -> FnType {
        let decl = self.src.func(f);
        let ctx = match (decl.vthis, decl.nested_in) {
            (Some(this), _) => {
                let ty = self.src.var(this).ty.clone();
                let t = self.ir_type(&ty);
                Some(if self.is_by_ref(&ty) { t.ptr_to() } else { t })
            }
            (None, Some(_)) => Some(IrType::i8_ptr()),
            (None, None) => None,
        };
        self.fn_ir_type(&decl.ty, ctx)
    }

    pub fn call_conv(&self, f: &FuncDecl) -> CallConv {
        if let Some(cc) = f.cc_override {
            cc
        } else if f.intrinsic.is_some() {
            CallConv::C
        } else {
            self.abi.calling_conv(f.ty.linkage)
        }
    }

    /// Declares a function in the output module on first use.
    pub fn declare_func(&mut self, f: FuncId) -> FuncIdx {
        if let Some(idx) = self.funcs.get(&f) {
            return *idx;
        }

        let decl = self.src.func(f);
        let name = match &decl.intrinsic {
            Some(Intrinsic::Named(name)) => name.as_str(),
            _ => decl.mangled.as_str(),
        };
        let ty = self.func_ir_type(f);
        let cc = self.call_conv(decl);
        let linkage = if decl.is_nested() {
            lir::Linkage::Internal
        } else {
            lir::Linkage::External
        };
        log::debug!("declaring {} as {}", decl.pretty, name);
        let idx = self.ir.declare_function(name, ty, cc, linkage);
        self.funcs.insert(f, idx);
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use crate::lir::IrType;

    #[test]
    fn aggregates_return_through_a_hidden_pointer() {
        let mut t = TestModule::new();
        let s = t.pair_struct();
        let f = t.func("make", Type::Struct(s), vec![]);
        let mut ctx = t.ctx();
        let ft = ctx.func_ir_type(f);
        assert_eq!(ft.ret, IrType::Void);
        assert_eq!(ft.params.len(), 1);
        assert!(ft.params[0].is_ptr());
    }

    #[test]
    fn arrays_return_directly_from_c_functions() {
        let mut t = TestModule::new();
        let mut ft = FuncType::new(Type::int().array_of(), vec![]);
        ft.linkage = Linkage::C;
        let f = t.m.add_func("arr", ft.clone());
        let mut ctx = t.ctx();
        assert!(!ctx.ret_in_ptr(&ft));
        let sig = ctx.func_ir_type(f);
        assert_eq!(sig.ret, IrType::Struct(vec![IrType::Int(64), IrType::i32().ptr_to()]));
    }

    #[test]
    fn ref_and_struct_params_are_pointers() {
        let mut t = TestModule::new();
        let s = t.pair_struct();
        let ft = FuncType::new(
            Type::void(),
            vec![
                Param {
                    ty: Type::int(),
                    storage: ParamStorage::Ref,
                },
                Param {
                    ty: Type::Struct(s),
                    storage: ParamStorage::In,
                },
                Param {
                    ty: Type::int(),
                    storage: ParamStorage::In,
                },
            ],
        );
        let mut ctx = t.ctx();
        let sig = ctx.fn_ir_type(&ft, None);
        assert_eq!(sig.params[0], IrType::i32().ptr_to());
        assert!(sig.params[1].is_ptr());
        assert_eq!(sig.params[2], IrType::i32());
    }

    #[test]
    fn self_referential_structs_get_a_named_record() {
        let mut t = TestModule::new();
        let s = t.m.add_struct("Node");
        t.m.add_field(s, "next", Type::Struct(s).ptr_to());
        t.m.add_field(s, "value", Type::int());
        let mut ctx = t.ctx();
        let ty = ctx.ir_type(&Type::Struct(s));
        let fields = ctx.ir.fields_of(&ty).map(|f| f.to_vec());
        assert_eq!(fields, Some(vec![ty.clone().ptr_to(), IrType::i32()]));
        assert_eq!(ctx.ir.alloc_size(&ty), 16);
    }

    #[test]
    fn class_fields_follow_the_header() {
        let mut t = TestModule::new();
        let a = t.m.add_aggregate("A", AggKind::Class, None);
        let x = t.m.add_field(a, "x", Type::int());
        let b = t.m.add_aggregate("B", AggKind::Class, Some(a));
        let y = t.m.add_field(b, "y", Type::int());
        let ctx = t.ctx();
        assert_eq!(ctx.field_index(b, x), 2);
        assert_eq!(ctx.field_index(b, y), 3);
    }
}
