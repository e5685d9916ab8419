//! Debug type descriptors. Composites are forward declared in the metadata
//! arena before their members are built, so self references resolve to the
//! placeholder slot, which is patched once the members are known.

use crate::{
    ast::{AggId, AggKind, Basic, FuncType, Type, VarId},
    codegen::CodegenCtx,
    errors::{LowerError, LowerResult},
    lir::{CompositeTag, DIFlags, DwAte, IrType, MdId, MdNode},
    span::Loc,
};

use super::visibility;

impl<'a> CodegenCtx<'a> {
    /// The descriptor of `ty`, or `None` for `void`. Descriptors are shared
    /// by every use of the same mangled type, except those that reached a
    /// forward declared aggregate.
    pub(super) fn di_type(&mut self, ty: &Type) -> LowerResult<Option<MdId>> {
        if ty.is_void() {
            return Ok(None);
        }
        let key = ty.mangle(self.src);
        if let Some(id) = self.di.types.get(&key) {
            return Ok(Some(*id));
        }
        let incomplete = self.di.incomplete;
        let id = self.build_di_type(ty)?;
        if let Some(id) = id {
            if self.di.incomplete == incomplete {
                self.di.types.insert(key, id);
            }
        }
        Ok(id)
    }

    fn build_di_type(&mut self, ty: &Type) -> LowerResult<Option<MdId>> {
        log::trace!("debug type for {}", ty.name(self.src));
        Ok(match ty {
            Type::Basic(Basic::Void) => None,
            Type::Basic(b) => Some(self.di_basic(*b)),
            Type::Enum(id) => {
                let decl = self.src.enum_(*id);
                match &decl.memtype {
                    None => Some(self.ir.md.push(MdNode::Unspecified {
                        name: decl.name.clone(),
                    })),
                    Some(memtype) => {
                        let base = self.di_type(memtype)?;
                        let (size_bits, align_bits) = self.layout_bits(ty);
                        let elements = decl
                            .members
                            .iter()
                            .map(|m| {
                                self.ir.md.push(MdNode::Enumerator {
                                    name: m.name.clone(),
                                    value: m.value,
                                })
                            })
                            .collect();
                        let file = self.unit_file();
                        Some(self.ir.md.push(MdNode::Enumeration {
                            name: decl.name.clone(),
                            file,
                            line: decl.loc.line,
                            size_bits,
                            align_bits,
                            base,
                            elements,
                        }))
                    }
                }
            }
            Type::Null => Some(self.di_pointer(None)),
            Type::Pointer(inner) => {
                let pointee = match &**inner {
                    Type::Basic(Basic::Void) => Some(self.di_basic(Basic::UByte)),
                    t => self.di_type(t)?,
                };
                Some(self.di_pointer(pointee))
            }
            Type::SArray(..) | Type::Vector(..) => Some(self.di_array(ty)?),
            Type::DArray(elem) => {
                let word = self.size_t_basic();
                let size_t = self.di_basic(word);
                let elem = match &**elem {
                    Type::Basic(Basic::Void) => Some(self.di_basic(Basic::UByte)),
                    t => self.di_type(t)?,
                };
                let ptr = self.di_pointer(elem);
                let name = ty.name(self.src);
                let ptr_bits = self.abi.ptr_bits();
                let fields = vec![("length", Some(size_t), 0), ("ptr", Some(ptr), ptr_bits)];
                Some(self.di_record(&name, &ty.mangle(self.src), fields, ptr_bits))
            }
            Type::AArray(..) => Some(self.di_pointer(None)),
            Type::Struct(id) => self.di_composite(*id)?,
            Type::Class(id) => {
                let rec = self.di_composite(*id)?;
                Some(self.di_pointer(rec))
            }
            Type::Function(f) => Some(self.di_function(f)?),
            Type::Delegate(f) => {
                let ctx = self.di_pointer(None);
                let sub = self.di_function(f)?;
                let fptr = self.di_pointer(Some(sub));
                let name = ty.name(self.src);
                let ptr_bits = self.abi.ptr_bits();
                let fields = vec![("context", Some(ctx), 0), ("funcptr", Some(fptr), ptr_bits)];
                Some(self.di_record(&name, &ty.mangle(self.src), fields, ptr_bits))
            }
            Type::Tuple(_) => {
                return Err(LowerError::unsupported(
                    format!("no debug description for {}", ty.name(self.src)),
                    &Loc::unknown(),
                ))
            }
        })
    }

    fn size_t_basic(&self) -> Basic {
        if self.abi.ptr_size == 8 {
            Basic::ULong
        } else {
            Basic::UInt
        }
    }

    fn layout_bits(&mut self, ty: &Type) -> (u64, u64) {
        let irty = self.ir_type(ty);
        self.ir_layout_bits(&irty)
    }

    fn ir_layout_bits(&self, irty: &IrType) -> (u64, u64) {
        (self.ir.alloc_size(irty) * 8, self.ir.abi_align(irty) * 8)
    }

    fn di_basic(&mut self, b: Basic) -> MdId {
        let key = Type::Basic(b).mangle(self.src);
        if let Some(id) = self.di.types.get(&key) {
            return *id;
        }
        let id = self.build_di_basic(b);
        self.di.types.insert(key, id);
        id
    }

    fn build_di_basic(&mut self, b: Basic) -> MdId {
        if b.is_complex() && !self.abi.complex_encoding {
            return self.di_complex_record(b);
        }
        let irty = self.ir_type(&Type::Basic(b));
        let size_bits = self.ir.size_bits(&irty);
        let align_bits = self.ir.abi_align(&irty) * 8;
        let abi = &self.abi;
        let encoding = match b {
            Basic::Bool => DwAte::Boolean,
            b if b.is_char() => {
                if abi.utf_char_encoding {
                    DwAte::Utf
                } else {
                    DwAte::Unsigned
                }
            }
            Basic::Byte if abi.char_byte_encoding => DwAte::SignedChar,
            Basic::UByte if abi.char_byte_encoding => DwAte::UnsignedChar,
            b if b.is_integral() && b.is_unsigned() => DwAte::Unsigned,
            b if b.is_integral() => DwAte::Signed,
            b if b.is_imaginary() && abi.imaginary_encoding => DwAte::ImaginaryFloat,
            b if b.is_complex() => DwAte::ComplexFloat,
            _ => DwAte::Float,
        };
        self.ir.md.push(MdNode::BasicType {
            name: b.name().to_string(),
            size_bits,
            align_bits,
            encoding,
        })
    }

    /// `{re, im}` for debuggers without complex float encodings.
    fn di_complex_record(&mut self, b: Basic) -> MdId {
        let part = self.di_basic(b.real_part());
        let part_ir = self.ir_type(&Type::Basic(b.real_part()));
        let part_bits = self.ir.alloc_size(&part_ir) * 8;
        let fields = vec![("re", Some(part), 0), ("im", Some(part), part_bits)];
        self.di_record(b.name(), b.deco(), fields, part_bits)
    }

    fn di_pointer(&mut self, pointee: Option<MdId>) -> MdId {
        let bits = self.abi.ptr_bits();
        self.ir.md.push(MdNode::PointerType {
            pointee,
            size_bits: bits,
            align_bits: bits,
        })
    }

    /// Static arrays of static arrays become one multi-dimensional array.
    fn di_array(&mut self, ty: &Type) -> LowerResult<MdId> {
        let mut subscripts = vec![];
        let mut elem = ty;
        let vector = matches!(ty, Type::Vector(..));
        loop {
            match elem {
                Type::SArray(inner, n) => {
                    subscripts.push(self.ir.md.push(MdNode::Subrange { count: *n as i64 }));
                    elem = inner;
                }
                Type::Vector(inner, n) if subscripts.is_empty() => {
                    subscripts.push(self.ir.md.push(MdNode::Subrange { count: *n as i64 }));
                    elem = inner;
                }
                _ => break,
            }
        }
        let elem = self.di_type(elem)?;
        let (size_bits, align_bits) = self.layout_bits(ty);
        Ok(self.ir.md.push(MdNode::Array {
            size_bits,
            align_bits,
            elem,
            subscripts,
            vector,
        }))
    }

    /// Only the return type is described.
    fn di_function(&mut self, f: &FuncType) -> LowerResult<MdId> {
        let ret = self.di_type(&f.ret)?;
        Ok(self.ir.md.push(MdNode::SubroutineType { types: vec![ret] }))
    }

    /// A synthesized two-field struct such as a slice or delegate.
    fn di_record(
        &mut self,
        name: &str,
        identifier: &str,
        fields: Vec<(&str, Option<MdId>, u64)>,
        field_bits: u64,
    ) -> MdId {
        let file = self.unit_file();
        let elements = fields
            .into_iter()
            .map(|(fname, base, offset_bits)| {
                self.ir.md.push(MdNode::Member {
                    name: fname.to_string(),
                    file,
                    line: 0,
                    size_bits: field_bits,
                    align_bits: field_bits,
                    offset_bits,
                    flags: DIFlags::PUBLIC,
                    base,
                })
            })
            .collect::<Vec<_>>();
        let size_bits = field_bits * elements.len() as u64;
        self.ir.md.push(MdNode::Composite {
            tag: CompositeTag::Struct,
            name: name.to_string(),
            file,
            line: 0,
            size_bits,
            align_bits: field_bits,
            flags: DIFlags::empty(),
            derived_from: None,
            elements,
            identifier: identifier.to_string(),
        })
    }

    /// The struct or class record of `agg`, built once per aggregate.
    pub(super) fn di_composite(&mut self, agg: AggId) -> LowerResult<Option<MdId>> {
        if let Some(id) = self.di.composites.get(&agg) {
            return Ok(Some(*id));
        }
        let decl = self.src.agg(agg);
        if !decl.layout_done {
            log::debug!("{} is only forward declared", decl.name);
            self.di.incomplete += 1;
            return Ok(Some(self.ir.md.push(MdNode::Unspecified {
                name: decl.name.clone(),
            })));
        }

        let tag = match decl.kind {
            AggKind::Struct => CompositeTag::Struct,
            AggKind::Class | AggKind::Interface => CompositeTag::Class,
        };
        let file = self.unit_file();
        let placeholder = self.ir.md.push(MdNode::Temporary {
            tag,
            name: decl.name.clone(),
            file,
            line: decl.loc.line,
        });
        self.di.composites.insert(agg, placeholder);
        log::debug!("debug record {} for {}", placeholder, decl.name);

        let (fields, derived_from) = match decl.kind {
            AggKind::Struct => (decl.fields.clone(), None),
            AggKind::Class => {
                let base = match decl.base {
                    Some(b) => self.di_composite(b)?,
                    None => None,
                };
                (self.src.all_fields(agg), base)
            }
            AggKind::Interface => (vec![], None),
        };
        let mut elements = vec![];
        for f in fields {
            elements.push(self.di_member(f)?);
        }

        let rec = self.agg_ir_type(agg);
        let (size_bits, align_bits) = self.ir_layout_bits(&rec);
        self.ir.md.replace_temporary(
            placeholder,
            MdNode::Composite {
                tag,
                name: decl.name.clone(),
                file,
                line: decl.loc.line,
                size_bits,
                align_bits,
                flags: visibility(decl.protection),
                derived_from,
                elements,
                identifier: decl.mangled.clone(),
            },
        );
        Ok(Some(placeholder))
    }

    fn di_member(&mut self, field: VarId) -> LowerResult<MdId> {
        let var = self.src.var(field);
        let base = match &var.ty {
            Type::Function(f) => {
                let sub = self.di_function(f)?;
                Some(self.di_pointer(Some(sub)))
            }
            t => self.di_type(t)?,
        };
        let (size_bits, align_bits) = match &var.ty {
            Type::Function(_) => (self.abi.ptr_bits(), self.abi.ptr_bits()),
            t => self.layout_bits(t),
        };
        let file = self.unit_file();
        Ok(self.ir.md.push(MdNode::Member {
            name: var.name.clone(),
            file,
            line: var.loc.line,
            size_bits,
            align_bits,
            offset_bits: var.offset * 8,
            flags: visibility(var.protection),
            base,
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::codegen::testutil::*;
    use crate::lir::{DwAte, MdNode};
    use crate::target::Target;

    #[test]
    fn composites_are_built_once() {
        let mut t = TestModule::new();
        let s = t.pair_struct();
        let mut ctx = t.ctx_with_debug();
        let a = ctx.di_type(&Type::Struct(s)).unwrap();
        let n = ctx.ir.md.len();
        let b = ctx.di_type(&Type::Struct(s)).unwrap();
        assert_eq!(a, b);
        assert_eq!(ctx.ir.md.len(), n);
        match a.map(|id| ctx.ir.md.get(id)) {
            Some(MdNode::Composite { elements, .. }) => assert_eq!(elements.len(), 2),
            n => panic!("unexpected {:?}", n),
        }
    }

    #[test]
    fn self_referential_structs_terminate() {
        let mut t = TestModule::new();
        let s = t.m.add_struct("Node");
        t.m.add_field(s, "value", Type::int());
        t.m.add_field(s, "next", Type::Struct(s).ptr_to());
        let mut ctx = t.ctx_with_debug();
        let id = ctx.di_type(&Type::Struct(s)).unwrap().unwrap();
        assert_eq!(ctx.ir.md.count(|n| n.is_temporary()), 0);
        let next = match ctx.ir.md.get(id) {
            MdNode::Composite { elements, .. } => elements[1],
            n => panic!("unexpected {}", n),
        };
        let ptr = match ctx.ir.md.get(next) {
            MdNode::Member { base: Some(p), .. } => *p,
            n => panic!("unexpected {}", n),
        };
        assert!(matches!(ctx.ir.md.get(ptr), MdNode::PointerType { pointee: Some(p), .. } if *p == id));
    }

    #[test]
    fn forward_declared_aggregates_are_not_cached() {
        let mut t = TestModule::new();
        let s = t.m.add_struct("Opaque");
        t.m.aggregates[s.index()].layout_done = false;
        let mut ctx = t.ctx_with_debug();
        let a = ctx.di_type(&Type::Struct(s)).unwrap();
        let b = ctx.di_type(&Type::Struct(s)).unwrap();
        assert_ne!(a, b);
        assert!(matches!(a.map(|id| ctx.ir.md.get(id)), Some(MdNode::Unspecified { .. })));
    }

    #[test]
    fn classes_list_base_fields_first() {
        let mut t = TestModule::new();
        let base = t.m.add_aggregate("Base", AggKind::Class, None);
        t.m.add_field(base, "a", Type::int());
        let derived = t.m.add_aggregate("Derived", AggKind::Class, Some(base));
        t.m.add_field(derived, "b", Type::int());
        let mut ctx = t.ctx_with_debug();
        let id = ctx.di_composite(derived).unwrap().unwrap();
        let base_id = ctx.di_composite(base).unwrap();
        match ctx.ir.md.get(id).clone() {
            MdNode::Composite {
                elements,
                derived_from,
                ..
            } => {
                assert_eq!(derived_from, base_id);
                let names: Vec<_> = elements
                    .iter()
                    .map(|e| match ctx.ir.md.get(*e) {
                        MdNode::Member { name, .. } => name.clone(),
                        n => panic!("unexpected {}", n),
                    })
                    .collect();
                assert_eq!(names, vec!["a", "b"]);
            }
            n => panic!("unexpected {}", n),
        }
    }

    #[test]
    fn static_arrays_of_arrays_flatten() {
        let t = TestModule::new();
        let mut ctx = t.ctx_with_debug();
        let ty = Type::SArray(Box::new(Type::SArray(Box::new(Type::int()), 3)), 2);
        let id = ctx.di_type(&ty).unwrap().unwrap();
        match ctx.ir.md.get(id) {
            MdNode::Array { subscripts, size_bits, .. } => {
                assert_eq!(subscripts.len(), 2);
                assert_eq!(*size_bits, 6 * 32);
            }
            n => panic!("unexpected {}", n),
        }
    }

    #[test]
    fn slices_are_length_and_pointer() {
        let t = TestModule::new();
        let mut ctx = t.ctx_with_debug();
        let id = ctx.di_type(&Type::int().array_of()).unwrap().unwrap();
        match ctx.ir.md.get(id).clone() {
            MdNode::Composite { elements, .. } => {
                let offsets: Vec<_> = elements
                    .iter()
                    .map(|e| match ctx.ir.md.get(*e) {
                        MdNode::Member { offset_bits, .. } => *offset_bits,
                        n => panic!("unexpected {}", n),
                    })
                    .collect();
                assert_eq!(offsets, vec![0, 64]);
            }
            n => panic!("unexpected {}", n),
        }
    }

    #[test]
    fn descriptors_are_shared_by_mangled_type() {
        let t = TestModule::new();
        let mut ctx = t.ctx_with_debug();
        let int = ctx.di_type(&Type::int()).unwrap();
        let a = ctx.di_type(&Type::int().array_of()).unwrap();
        let n = ctx.ir.md.len();
        let b = ctx.di_type(&Type::int().array_of()).unwrap();
        assert_eq!(a, b);
        assert_eq!(ctx.ir.md.len(), n);
        assert_eq!(ctx.di_type(&Type::int()).unwrap(), int);
        let ints = ctx
            .ir
            .md
            .count(|n| matches!(n, MdNode::BasicType { name, .. } if name == "int"));
        assert_eq!(ints, 1);
        let slices = ctx.ir.md.count(|n| matches!(n, MdNode::Composite { .. }));
        assert_eq!(slices, 1);
    }

    #[test]
    fn pointers_to_forward_declared_aggregates_are_not_shared() {
        let mut t = TestModule::new();
        let s = t.m.add_struct("Opaque");
        t.m.aggregates[s.index()].layout_done = false;
        let mut ctx = t.ctx_with_debug();
        let a = ctx.di_type(&Type::Struct(s).ptr_to()).unwrap();
        let b = ctx.di_type(&Type::Struct(s).ptr_to()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn opaque_enums_are_unspecified() {
        let mut t = TestModule::new();
        let e = t.m.add_enum("Handle", None, vec![]);
        let mut ctx = t.ctx_with_debug();
        let id = ctx.di_type(&Type::Enum(e)).unwrap().unwrap();
        assert!(matches!(ctx.ir.md.get(id), MdNode::Unspecified { .. }));
    }

    #[test]
    fn msvc_substitutes_unsupported_encodings() {
        let t = TestModule::new();
        let mut opts = TestModule::options(DebugLevel::Full);
        opts.target = Target::X86_64WindowsMsvc;
        let mut ctx = CodegenCtx::new(&t.m, opts);
        let im = ctx.di_type(&Type::Basic(Basic::IDouble)).unwrap().unwrap();
        assert!(matches!(ctx.ir.md.get(im), MdNode::BasicType { encoding: DwAte::Float, .. }));
        let c = ctx.di_type(&Type::Basic(Basic::CFloat)).unwrap().unwrap();
        assert!(matches!(ctx.ir.md.get(c), MdNode::Composite { .. }));
        let ch = ctx.di_type(&Type::Basic(Basic::Char)).unwrap().unwrap();
        assert!(matches!(ctx.ir.md.get(ch), MdNode::BasicType { encoding: DwAte::Unsigned, .. }));
    }

    #[test]
    fn tuples_have_no_description() {
        let t = TestModule::new();
        let mut ctx = t.ctx_with_debug();
        let err = ctx.di_type(&Type::Tuple(vec![Type::int()])).unwrap_err();
        assert!(err.is_fatal());
    }
}
