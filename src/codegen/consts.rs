//! The constant folder: literal expressions and default initializers turned
//! into IR constants without touching any basic block.

use super::CodegenCtx;
use crate::{
    ast::{AggId, AggKind, Basic, Expr, ExprKind, StorageClass, Symbol, Type, VarId},
    errors::{LowerError, LowerResult},
    lir::{self, IrType, Value},
    span::Loc,
};

/// Code units of a string literal at the width of its element type.
pub(crate) fn encode_string(s: &str, elem: Basic) -> Vec<u64> {
    match elem {
        Basic::WChar => s.encode_utf16().map(u64::from).collect(),
        Basic::DChar => s.chars().map(|c| c as u64).collect(),
        _ => s.bytes().map(u64::from).collect(),
    }
}

impl<'a> CodegenCtx<'a> {
    pub fn const_expr(&mut self, e: &Expr) -> LowerResult<Value> {
        log::debug!("folding {} of type {}", e.kind.name(), e.ty.name(self.src));
        let ty = e.ty.to_base(self.src);
        let irty = self.ir_type(&ty);
        Ok(match &e.kind {
            ExprKind::Integer(v) => match &irty {
                IrType::Int(bits) => Value::const_int(irty.clone(), mask(*v, *bits)),
                IrType::Ptr(_) => {
                    let int = Value::const_int(self.ir.size_t(), *v);
                    Value::new(lir::Const::IntToPtr(Box::new(int)), irty.clone())
                }
                t if t.is_float() => Value::const_float(irty.clone(), *v as f64),
                _ => return self.unsupported("integer literal of aggregate type", e),
            },
            ExprKind::Real(v) => {
                if ty.is_complex() {
                    let part = self.complex_part_type(&ty);
                    Value::aggregate(
                        irty,
                        vec![Value::const_float(part.clone(), *v), Value::const_float(part, 0.0)],
                    )
                } else {
                    Value::const_float(irty, *v)
                }
            }
            ExprKind::Complex(re, im) => self.const_complex(&ty, *re, *im),
            ExprKind::Null => Value::zero(irty),
            ExprKind::String(s) => self.const_string(s, &ty, &e.loc)?,
            ExprKind::ArrayLiteral(elems) => {
                let vals = elems
                    .iter()
                    .map(|x| self.const_expr(x))
                    .collect::<LowerResult<Vec<_>>>()?;
                match &ty {
                    Type::SArray(..) | Type::Vector(..) => Value::aggregate(irty, vals),
                    Type::DArray(elem) => {
                        let elem_ty = self.ir_type(elem);
                        let arr_ty = elem_ty.clone().array_of(vals.len() as u64);
                        let name = self.ir.unique_global_name("arrayliteral");
                        let g = self.ir.add_global(lir::Global {
                            name,
                            ty: arr_ty.clone(),
                            init: Some(Value::aggregate(arr_ty, vals.clone())),
                            constant: false,
                            linkage: lir::Linkage::Internal,
                        });
                        let ptr = Value::const_offset(g, vec![0, 0], elem_ty.ptr_to());
                        Value::aggregate(irty, vec![self.const_size(vals.len() as u64), ptr])
                    }
                    _ => return self.unsupported("array literal of non-array type", e),
                }
            }
            ExprKind::StructLiteral(agg, elems) => {
                let fields = self.src.agg(*agg).fields.clone();
                let mut vals = vec![];
                for (field, elem) in fields.iter().zip(elems.iter()) {
                    vals.push(match elem {
                        Some(x) => self.const_expr(x)?,
                        None => self.field_init(*field)?,
                    });
                }
                Value::aggregate(irty, vals)
            }
            ExprKind::Var(Symbol::StaticInit(agg)) => self.init_const(*agg)?,
            ExprKind::Var(Symbol::Var(v)) if self.is_const_var(*v) => {
                let init = match &self.src.var(*v).init {
                    Some(init) => init,
                    None => bug!("manifest constant without initializer"),
                };
                self.const_expr(init)?
            }
            ExprKind::Addr(inner) => match &inner.kind {
                ExprKind::Var(Symbol::Func(f)) => {
                    let idx = self.declare_func(*f);
                    Value::const_bitcast(self.ir.func_value(idx), irty)
                }
                ExprKind::Var(Symbol::Var(v)) if self.src.var(*v).is_dataseg() => {
                    let g = self.global_var(*v)?;
                    Value::const_bitcast(g, irty)
                }
                _ => return self.unsupported("address expression in a constant", e),
            },
            ExprKind::Cast(inner) => {
                let v = self.const_expr(inner)?;
                self.const_cast(v, irty, e)?
            }
            _ => return self.unsupported("expression in a constant initializer", e),
        })
    }

    fn is_const_var(&self, v: VarId) -> bool {
        let var = self.src.var(v);
        var.init.is_some() && var.storage.contains(StorageClass::CONST) && var.is_dataseg()
    }

    fn const_cast(&mut self, v: Value, to: IrType, e: &Expr) -> LowerResult<Value> {
        if v.ty == to {
            return Ok(v);
        }
        Ok(match (v.ty.clone(), to.clone()) {
            (IrType::Int(_), IrType::Int(bits)) => match v.as_const_int() {
                Some(n) => Value::const_int(to, mask(n, bits)),
                None => return self.unsupported("integer cast in a constant", e),
            },
            (IrType::Int(_), IrType::Ptr(_)) => Value::new(lir::Const::IntToPtr(Box::new(v)), to),
            (IrType::Ptr(_), IrType::Ptr(_)) => Value::const_bitcast(v, to),
            (f, t) if f.is_float() && t.is_float() => match v.kind {
                lir::ValueKind::Const(lir::Const::Float(x)) => Value::const_float(t, x),
                _ => return self.unsupported("float cast in a constant", e),
            },
            _ => return self.unsupported("cast in a constant", e),
        })
    }

    pub(crate) fn complex_part_type(&mut self, ty: &Type) -> IrType {
        match ty.basic() {
            Some(b) => self.ir_type(&Type::Basic(b.real_part())),
            None => bug!("{} is not a complex type", ty.name(self.src)),
        }
    }

    /// A complex constant; an all-zero value still gets both parts spelled out.
    pub(crate) fn const_complex(&mut self, ty: &Type, re: f64, im: f64) -> Value {
        let part = self.complex_part_type(ty);
        let irty = IrType::Struct(vec![part.clone(), part.clone()]);
        Value::aggregate(
            irty,
            vec![
                Value::const_float(part.clone(), re),
                Value::const_float(part, im),
            ],
        )
    }

    /// The internal global holding a string literal's code units. Pointer
    /// and slice uses get a null terminator after the last unit.
    pub(crate) fn string_global(&mut self, s: &str, elem: &Type, terminated: bool) -> (Value, u64) {
        let b = elem.to_base(self.src).basic().unwrap_or(Basic::Char);
        let mut units = encode_string(s, b);
        let len = units.len() as u64;
        if terminated {
            units.push(0);
        }
        let unit_ty = self.ir_type(&Type::Basic(b));
        let arr_ty = unit_ty.clone().array_of(units.len() as u64);
        let init = match b {
            Basic::WChar | Basic::DChar => Value::aggregate(
                arr_ty.clone(),
                units
                    .iter()
                    .map(|u| Value::const_int(unit_ty.clone(), *u))
                    .collect(),
            ),
            _ => Value::new(
                lir::Const::Bytes(units.iter().map(|u| *u as u8).collect()),
                arr_ty.clone(),
            ),
        };
        let name = self.ir.unique_global_name("stringliteral");
        let g = self.ir.add_global(lir::Global {
            name,
            ty: arr_ty,
            init: Some(init),
            constant: true,
            linkage: lir::Linkage::Internal,
        });
        (g, len)
    }

    fn const_string(&mut self, s: &str, ty: &Type, loc: &Loc) -> LowerResult<Value> {
        let irty = self.ir_type(ty);
        match ty {
            Type::DArray(elem) => {
                let (g, len) = self.string_global(s, elem, true);
                let unit = self.ir_type(elem);
                let ptr = Value::const_offset(g, vec![0, 0], unit.ptr_to());
                Ok(Value::aggregate(irty, vec![self.const_size(len), ptr]))
            }
            Type::Pointer(elem) => {
                let (g, _) = self.string_global(s, elem, true);
                Ok(Value::const_offset(g, vec![0, 0], irty))
            }
            Type::SArray(elem, n) => {
                let b = elem.to_base(self.src).basic().unwrap_or(Basic::Char);
                let mut units = encode_string(s, b);
                units.resize(*n as usize, 0);
                let unit_ty = self.ir_type(elem);
                Ok(Value::aggregate(
                    irty,
                    units
                        .into_iter()
                        .map(|u| Value::const_int(unit_ty.clone(), u))
                        .collect(),
                ))
            }
            _ => Err(LowerError::unsupported(
                format!("string literal of type `{}`", ty.name(self.src)),
                loc,
            )),
        }
    }

    /// The value a variable of type `ty` holds before any assignment.
    pub fn default_init(&mut self, ty: &Type) -> LowerResult<Value> {
        let irty = self.ir_type(ty);
        Ok(match ty {
            Type::Basic(b) => match b {
                Basic::Void => Value::undef(irty),
                Basic::Char => Value::const_int(irty, 0xFF),
                Basic::WChar | Basic::DChar => Value::const_int(irty, 0xFFFF),
                b if b.is_complex() => self.const_complex(ty, f64::NAN, f64::NAN),
                b if b.is_floating() => Value::const_float(irty, f64::NAN),
                _ => Value::zero(irty),
            },
            Type::Null | Type::Pointer(_) | Type::Class(_) | Type::AArray(..) => Value::null(irty),
            Type::DArray(_) | Type::Delegate(_) | Type::Function(_) => Value::zero(irty),
            Type::SArray(elem, n) | Type::Vector(elem, n) => {
                let v = self.default_init(elem)?;
                if v.is_zero() {
                    Value::zero(irty)
                } else {
                    Value::aggregate(irty, vec![v; *n as usize])
                }
            }
            Type::Struct(agg) => self.init_const(*agg)?,
            Type::Enum(id) => match self.src.enum_(*id).members.first() {
                Some(first) => {
                    let bits = irty.int_bits().unwrap_or(64);
                    Value::const_int(irty, mask(first.value as u64, bits))
                }
                None => self.default_init(&ty.to_base(self.src))?,
            },
            Type::Tuple(_) => {
                return Err(LowerError::unsupported(
                    "default value of a tuple",
                    &self.src.loc(0, 0),
                ))
            }
        })
    }

    fn field_init(&mut self, field: VarId) -> LowerResult<Value> {
        let var = self.src.var(field);
        match &var.init {
            Some(init) => self.const_expr(init),
            None => self.default_init(&var.ty),
        }
    }

    /// The constant contents of an aggregate's initializer image. Class
    /// images start with the vtable and an empty monitor.
    pub fn init_const(&mut self, agg: AggId) -> LowerResult<Value> {
        let decl = self.src.agg(agg);
        if !decl.layout_done {
            return Err(LowerError::compile(
                format!("`{}` is used before its layout is known", decl.name),
                &decl.loc,
            ));
        }
        let ty = self.agg_ir_type(agg);
        let mut vals = vec![];
        let fields = match decl.kind {
            AggKind::Struct => decl.fields.clone(),
            _ => {
                let vtbl = self.vtbl(agg);
                vals.push(vtbl);
                vals.push(Value::null(IrType::i8_ptr()));
                self.src.all_fields(agg)
            }
        };
        for f in fields {
            vals.push(self.field_init(f)?);
        }
        Ok(Value::aggregate(ty, vals))
    }

    /// The global holding an aggregate's initializer image.
    pub fn init_image(&mut self, agg: AggId) -> LowerResult<Value> {
        if let Some(g) = self.init_images.get(&agg) {
            return Ok(g.clone());
        }
        let init = self.init_const(agg)?;
        let name = format!("_D{}6__initZ", self.src.agg(agg).mangled);
        let g = self.ir.add_global(lir::Global {
            name,
            ty: init.ty.clone(),
            init: Some(init),
            constant: true,
            linkage: lir::Linkage::External,
        });
        self.init_images.insert(agg, g.clone());
        Ok(g)
    }

    /// Pointer to the first slot of a class's vtable, as `i8**`.
    pub fn vtbl(&mut self, agg: AggId) -> Value {
        if let Some(v) = self.vtbls.get(&agg) {
            return v.clone();
        }
        let decl = self.src.agg(agg);
        let slots = decl
            .vtbl
            .iter()
            .map(|f| {
                let idx = self.declare_func(*f);
                Value::const_bitcast(self.ir.func_value(idx), IrType::i8_ptr())
            })
            .collect::<Vec<_>>();
        let arr_ty = IrType::i8_ptr().array_of(slots.len() as u64);
        let g = self.ir.add_global(lir::Global {
            name: format!("_D{}6__vtblZ", decl.mangled),
            ty: arr_ty.clone(),
            init: Some(Value::aggregate(arr_ty, slots)),
            constant: true,
            linkage: lir::Linkage::External,
        });
        let v = Value::const_offset(g, vec![0, 0], IrType::i8_ptr().ptr_to());
        self.vtbls.insert(agg, v.clone());
        v
    }

    /// The global of a module-level or static variable, defined on first use.
    pub fn global_var(&mut self, v: VarId) -> LowerResult<Value> {
        if let Some(g) = self.globals.get(&v) {
            return Ok(g.clone());
        }
        let var = self.src.var(v);
        let ty = self.ir_type(&var.ty);
        let external = var.storage.contains(StorageClass::EXTERN);
        let linkage = if var.parent.is_some() {
            lir::Linkage::Internal
        } else {
            lir::Linkage::External
        };
        log::debug!("defining global {}", var.mangled);
        // cached before folding so initializers may take the global's address
        let g = self.ir.add_global(lir::Global {
            name: var.mangled.clone(),
            ty,
            init: None,
            constant: var
                .storage
                .intersects(StorageClass::CONST | StorageClass::IMMUTABLE),
            linkage,
        });
        self.globals.insert(v, g.clone());
        if !external {
            let init = match &var.init {
                Some(init) => self.const_expr(init)?,
                None => self.default_init(&var.ty)?,
            };
            match self.ir.global_mut(&g) {
                Some(global) => global.init = Some(init),
                None => bug!("global {} vanished from the module", var.mangled),
            }
            self.emit_global_variable(&g, v)?;
        }
        Ok(g)
    }
}

fn mask(v: u64, bits: u32) -> u64 {
    if bits >= 64 {
        v
    } else {
        v & ((1u64 << bits) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;

    #[test]
    fn complex_struct_literal_folds_field_by_field() {
        let mut t = TestModule::new();
        let s = t.pair_struct();
        let lit = t.struct_lit(s, vec![Some(t.float(1.5)), Some(t.float(-2.0))]);
        let mut ctx = t.ctx();
        let c = ctx.const_expr(&lit).unwrap();
        let elems = c.elements().unwrap();
        assert_eq!(elems.len(), 2);
        assert_eq!(elems[0], Value::const_float(IrType::F32, 1.5));
        assert_eq!(elems[1], Value::const_float(IrType::F32, -2.0));
        assert_eq!(c.ty, ctx.ir_type(&Type::Struct(s)));
    }

    #[test]
    fn missing_struct_fields_use_their_defaults() {
        let mut t = TestModule::new();
        let s = t.pair_struct();
        let lit = t.struct_lit(s, vec![Some(t.float(1.0)), None]);
        let mut ctx = t.ctx();
        let c = ctx.const_expr(&lit).unwrap();
        match &c.elements().unwrap()[1].kind {
            lir::ValueKind::Const(lir::Const::Float(f)) => assert!(f.is_nan()),
            k => panic!("unexpected {:?}", k),
        }
    }

    #[test]
    fn pointer_typed_integers_become_int_to_ptr() {
        let t = TestModule::new();
        let e = t.expr(ExprKind::Integer(0x1000), Type::int().ptr_to());
        let mut ctx = t.ctx();
        let c = ctx.const_expr(&e).unwrap();
        assert!(matches!(c.kind, lir::ValueKind::Const(lir::Const::IntToPtr(_))));
        assert_eq!(c.ty, IrType::i32().ptr_to());
    }

    #[test]
    fn zero_complex_is_a_pair_of_zeros() {
        let t = TestModule::new();
        let e = t.expr(ExprKind::Complex(0.0, 0.0), Type::Basic(Basic::CDouble));
        let mut ctx = t.ctx();
        let c = ctx.const_expr(&e).unwrap();
        assert_eq!(c.elements().map(|e| e.len()), Some(2));
        assert!(c.is_zero());
    }

    #[test]
    fn string_literals_become_terminated_internal_globals() {
        let t = TestModule::new();
        let e = t.expr(ExprKind::String(str!("hi")), Type::Basic(Basic::Char).array_of());
        let mut ctx = t.ctx();
        let c = ctx.const_expr(&e).unwrap();
        let elems = c.elements().unwrap();
        assert_eq!(elems[0].as_const_int(), Some(2));
        let g = &ctx.ir.globals[0];
        assert_eq!(g.linkage, lir::Linkage::Internal);
        assert!(g.constant);
        assert_eq!(g.ty, IrType::i8().array_of(3));
    }

    #[test]
    fn wide_strings_use_wide_code_units() {
        assert_eq!(encode_string("é", Basic::Char), vec![0xC3, 0xA9]);
        assert_eq!(encode_string("é", Basic::WChar), vec![0xE9]);
        assert_eq!(encode_string("\u{1F600}", Basic::WChar).len(), 2);
        assert_eq!(encode_string("\u{1F600}", Basic::DChar), vec![0x1F600]);
    }

    #[test]
    fn static_arrays_of_chars_are_raw_arrays() {
        let t = TestModule::new();
        let e = t.expr(
            ExprKind::String(str!("ab")),
            Type::SArray(Box::new(Type::Basic(Basic::Char)), 2),
        );
        let mut ctx = t.ctx();
        let c = ctx.const_expr(&e).unwrap();
        assert_eq!(c.ty, IrType::i8().array_of(2));
        assert!(ctx.ir.globals.is_empty());
    }

    #[test]
    fn char_types_default_to_invalid_code_units() {
        let t = TestModule::new();
        let mut ctx = t.ctx();
        let c = ctx.default_init(&Type::Basic(Basic::Char)).unwrap();
        assert_eq!(c.as_const_int(), Some(0xFF));
        let d = ctx.default_init(&Type::Basic(Basic::DChar)).unwrap();
        assert_eq!(d.as_const_int(), Some(0xFFFF));
        let i = ctx.default_init(&Type::int()).unwrap();
        assert!(i.is_zero());
    }

    #[test]
    fn unfoldable_expressions_are_fatal() {
        let t = TestModule::new();
        let e = t.expr(ExprKind::Halt, Type::void());
        let mut ctx = t.ctx();
        let err = ctx.const_expr(&e).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn globals_are_defined_once() {
        let mut t = TestModule::new();
        let v = t.m.add_global("counter", Type::int(), None);
        let mut ctx = t.ctx();
        let a = ctx.global_var(v).unwrap();
        let b = ctx.global_var(v).unwrap();
        assert_eq!(a, b);
        assert_eq!(ctx.ir.globals.len(), 1);
        assert_eq!(ctx.ir.globals[0].init, Some(Value::const_int(IrType::i32(), 0)));
    }

    fn address_of(t: &TestModule, v: VarId) -> Expr {
        t.expr(ExprKind::Addr(Box::new(t.var(v))), Type::void().ptr_to())
    }

    #[test]
    fn globals_may_take_their_own_address() {
        let mut t = TestModule::new();
        let p = t.m.add_global("self_ptr", Type::void().ptr_to(), None);
        let init = address_of(&t, p);
        t.m.vars[p.index()].init = Some(init);
        let mut ctx = t.ctx();
        let g = ctx.global_var(p).unwrap();
        assert_eq!(ctx.ir.globals.len(), 1);
        assert_eq!(
            ctx.ir.globals[0].init,
            Some(Value::const_bitcast(g, IrType::i8_ptr()))
        );
    }

    #[test]
    fn globals_may_point_at_each_other() {
        let mut t = TestModule::new();
        let a = t.m.add_global("a", Type::void().ptr_to(), None);
        let b = t.m.add_global("b", Type::void().ptr_to(), None);
        let (to_b, to_a) = (address_of(&t, b), address_of(&t, a));
        t.m.vars[a.index()].init = Some(to_b);
        t.m.vars[b.index()].init = Some(to_a);
        let mut ctx = t.ctx();
        let ga = ctx.global_var(a).unwrap();
        let gb = ctx.global_var(b).unwrap();
        assert_eq!(ctx.ir.globals.len(), 2);
        assert_eq!(
            ctx.ir.global_mut(&ga).unwrap().init,
            Some(Value::const_bitcast(gb.clone(), IrType::i8_ptr()))
        );
        assert_eq!(
            ctx.ir.global_mut(&gb).unwrap().init,
            Some(Value::const_bitcast(ga, IrType::i8_ptr()))
        );
    }
}
