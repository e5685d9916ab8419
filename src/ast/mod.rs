//! The typed tree handed over by the frontend. Everything here is fully
//! resolved: symbols are ids into the owning [`Module`], types carry their
//! mangled identity and aggregates their layout.

use serde::{Deserialize, Serialize};

use crate::pathlib::FilePath;
use crate::span::Loc;

mod decl;
mod expr;
mod ty;

pub use decl::*;
pub use expr::*;
pub use ty::*;

macro_rules! decl_id {
    ($name:ident) => {
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(&self) -> usize {
                self.0 as usize
            }
        }
    };
}

decl_id!(AggId);
decl_id!(EnumId);
decl_id!(FuncId);
decl_id!(VarId);

/// One compilation unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub srcfile: FilePath,
    pub aggregates: Vec<AggregateDecl>,
    pub enums: Vec<EnumDecl>,
    pub funcs: Vec<FuncDecl>,
    pub vars: Vec<VarDecl>,
}

impl Module {
    pub fn new<P: Into<FilePath>>(name: &str, srcfile: P) -> Module {
        Module {
            name: name.to_string(),
            srcfile: srcfile.into(),
            aggregates: vec![],
            enums: vec![],
            funcs: vec![],
            vars: vec![],
        }
    }

    pub fn agg(&self, id: AggId) -> &AggregateDecl {
        &self.aggregates[id.index()]
    }

    pub fn enum_(&self, id: EnumId) -> &EnumDecl {
        &self.enums[id.index()]
    }

    pub fn func(&self, id: FuncId) -> &FuncDecl {
        &self.funcs[id.index()]
    }

    pub fn var(&self, id: VarId) -> &VarDecl {
        &self.vars[id.index()]
    }

    /// All fields of an aggregate with base class fields first.
    pub fn all_fields(&self, id: AggId) -> Vec<VarId> {
        let agg = self.agg(id);
        let mut fields = match agg.base {
            Some(base) => self.all_fields(base),
            None => vec![],
        };
        fields.extend(agg.fields.iter().copied());
        fields
    }

    pub fn loc(&self, line: u32, col: u32) -> Loc {
        Loc::new(self.srcfile.clone(), line, col)
    }

    fn qualify(&self, name: &str) -> String {
        format!("{}{}{}{}", self.name.len(), self.name, name.len(), name)
    }

    pub fn add_aggregate(&mut self, name: &str, kind: AggKind, base: Option<AggId>) -> AggId {
        let id = AggId(self.aggregates.len() as u32);
        let (size, vtbl) = match (kind, base) {
            (AggKind::Struct, _) => (0, vec![]),
            (_, Some(b)) => (self.agg(b).size, self.agg(b).vtbl.clone()),
            // vtable pointer and monitor
            (_, None) => (16, vec![]),
        };
        self.aggregates.push(AggregateDecl {
            id,
            name: name.to_string(),
            mangled: self.qualify(name),
            kind,
            loc: self.loc(1, 1),
            protection: Protection::Public,
            fields: vec![],
            base,
            size,
            align: 8,
            layout_done: true,
            zero_init: true,
            vtbl,
            dtors: vec![],
        });
        id
    }

    pub fn add_struct(&mut self, name: &str) -> AggId {
        self.add_aggregate(name, AggKind::Struct, None)
    }

    /// Appends a field, placing it at the next naturally aligned offset for
    /// a 64-bit target.
    pub fn add_field(&mut self, agg: AggId, name: &str, ty: Type) -> VarId {
        let size = self.type_size(&ty, 8);
        let align = size.min(8).max(1);
        let offset = (self.agg(agg).size + align - 1) / align * align;
        let id = VarId(self.vars.len() as u32);
        self.vars.push(VarDecl {
            id,
            name: name.to_string(),
            mangled: name.to_string(),
            ty,
            loc: self.loc(1, 1),
            storage: StorageClass::FIELD,
            protection: Protection::Public,
            parent: None,
            offset,
            init: None,
            nested_ref: false,
        });
        let a = &mut self.aggregates[agg.index()];
        a.fields.push(id);
        a.size = offset + size;
        id
    }

    pub fn add_enum(&mut self, name: &str, memtype: Option<Type>, members: Vec<(&str, i64)>) -> EnumId {
        let id = EnumId(self.enums.len() as u32);
        self.enums.push(EnumDecl {
            id,
            name: name.to_string(),
            mangled: self.qualify(name),
            loc: self.loc(1, 1),
            memtype,
            members: members
                .into_iter()
                .map(|(name, value)| EnumMember {
                    name: name.to_string(),
                    value,
                })
                .collect(),
        });
        id
    }

    fn push_var(&mut self, name: &str, ty: Type, storage: StorageClass, parent: Option<FuncId>) -> VarId {
        let id = VarId(self.vars.len() as u32);
        let mangled = format!("_D{}{}", self.qualify(name), ty.mangle(self));
        self.vars.push(VarDecl {
            id,
            name: name.to_string(),
            mangled,
            ty,
            loc: self.loc(1, 1),
            storage,
            protection: Protection::Public,
            parent,
            offset: 0,
            init: None,
            nested_ref: false,
        });
        id
    }

    pub fn add_global(&mut self, name: &str, ty: Type, init: Option<Expr>) -> VarId {
        let id = self.push_var(name, ty, StorageClass::empty(), None);
        self.vars[id.index()].init = init;
        id
    }

    pub fn add_func(&mut self, name: &str, ty: FuncType) -> FuncId {
        let id = FuncId(self.funcs.len() as u32);
        let mangled = match ty.linkage {
            Linkage::D => format!(
                "_D{}{}",
                self.qualify(name),
                Type::Function(Box::new(ty.clone())).mangle(self)
            ),
            _ => name.to_string(),
        };
        self.funcs.push(FuncDecl {
            id,
            name: name.to_string(),
            mangled,
            pretty: format!("{}.{}", self.name, name),
            ty,
            loc: self.loc(1, 1),
            end_loc: self.loc(1, 1),
            protection: Protection::Public,
            params: vec![],
            vthis: None,
            member_of: None,
            nested_in: None,
            nested_vars: vec![],
            intrinsic: None,
            virtual_index: None,
            is_final: false,
            cc_override: None,
            arguments: None,
            argptr: None,
            body: None,
        });
        id
    }

    /// Adds a parameter variable; the function type must already list it.
    pub fn add_param(&mut self, func: FuncId, name: &str, ty: Type, storage: StorageClass) -> VarId {
        let id = self.push_var(name, ty, storage | StorageClass::PARAMETER, Some(func));
        self.funcs[func.index()].params.push(id);
        id
    }

    pub fn add_local(&mut self, func: FuncId, name: &str, ty: Type) -> VarId {
        self.push_var(name, ty, StorageClass::empty(), Some(func))
    }

    /// Size of a type for frontend-side layout of test aggregates.
    pub fn type_size(&self, ty: &Type, ptr_size: u64) -> u64 {
        match ty {
            Type::Basic(b) if b.is_complex() => {
                2 * self.type_size(&Type::Basic(b.real_part()), ptr_size)
            }
            Type::Basic(Basic::Real) | Type::Basic(Basic::IReal) => 16,
            Type::Basic(b) => b.size(),
            Type::Null | Type::Pointer(_) | Type::AArray(..) | Type::Function(_) => ptr_size,
            Type::Class(_) => ptr_size,
            Type::Vector(t, n) | Type::SArray(t, n) => self.type_size(t, ptr_size) * n,
            Type::DArray(_) | Type::Delegate(_) => 2 * ptr_size,
            Type::Struct(id) => self.agg(*id).size,
            Type::Enum(_) => self.type_size(&ty.to_base(self), ptr_size),
            Type::Tuple(ts) => ts.iter().map(|t| self.type_size(t, ptr_size)).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_laid_out_in_declaration_order() {
        let mut m = Module::new("test", "test.d");
        let s = m.add_struct("S");
        let a = m.add_field(s, "a", Type::Basic(Basic::Byte));
        let b = m.add_field(s, "b", Type::int());
        let c = m.add_field(s, "c", Type::Struct(s).ptr_to());
        assert_eq!(m.var(a).offset, 0);
        assert_eq!(m.var(b).offset, 4);
        assert_eq!(m.var(c).offset, 8);
        assert_eq!(m.agg(s).size, 16);
    }

    #[test]
    fn base_class_fields_come_first() {
        let mut m = Module::new("test", "test.d");
        let base = m.add_aggregate("A", AggKind::Class, None);
        let x = m.add_field(base, "x", Type::int());
        let derived = m.add_aggregate("B", AggKind::Class, Some(base));
        let y = m.add_field(derived, "y", Type::int());
        assert_eq!(m.all_fields(derived), vec![x, y]);
        assert_eq!(m.var(y).offset, 20);
    }

    #[test]
    fn d_functions_get_mangled_names() {
        let mut m = Module::new("test", "test.d");
        let f = m.add_func("foo", FuncType::new(Type::void(), vec![]));
        assert_eq!(m.func(f).mangled, "_D4test3fooFZv");
    }
}
