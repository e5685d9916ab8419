use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::{AggId, EnumId, Expr, FuncId, FuncType, Stmt, Type, VarId};
use crate::span::Loc;
use crate::target::CallConv;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Linkage {
    D,
    C,
    Cpp,
    Windows,
    Pascal,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Protection {
    Public,
    Export,
    Package,
    Protected,
    Private,
}

bitflags! {
    #[derive(Serialize, Deserialize)]
    pub struct StorageClass: u32 {
        const REF = 1 << 0;
        const OUT = 1 << 1;
        const LAZY = 1 << 2;
        const STATIC = 1 << 3;
        const EXTERN = 1 << 4;
        const CONST = 1 << 5;
        const IMMUTABLE = 1 << 6;
        const SCOPE = 1 << 7;
        const PARAMETER = 1 << 8;
        const FIELD = 1 << 9;
        const TLS = 1 << 10;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AggKind {
    Struct,
    Class,
    Interface,
}

/// A struct, class or interface after semantic analysis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregateDecl {
    pub id: AggId,
    pub name: String,
    /// Length-prefixed qualified name, e.g. `4test3Foo`.
    pub mangled: String,
    pub kind: AggKind,
    pub loc: Loc,
    pub protection: Protection,
    /// Own fields in declaration order.
    pub fields: Vec<VarId>,
    pub base: Option<AggId>,
    pub size: u64,
    pub align: u64,
    /// False while only forward declared.
    pub layout_done: bool,
    /// The default value is all zero bits.
    pub zero_init: bool,
    pub vtbl: Vec<FuncId>,
    pub dtors: Vec<FuncId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnumDecl {
    pub id: EnumId,
    pub name: String,
    pub mangled: String,
    pub loc: Loc,
    /// `None` for opaque enums.
    pub memtype: Option<Type>,
    pub members: Vec<EnumMember>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VarDecl {
    pub id: VarId,
    pub name: String,
    pub mangled: String,
    pub ty: Type,
    pub loc: Loc,
    pub storage: StorageClass,
    pub protection: Protection,
    /// Function the variable is local to, if any.
    pub parent: Option<FuncId>,
    /// Byte offset for fields.
    pub offset: u64,
    pub init: Option<Expr>,
    /// Referenced from a nested function.
    pub nested_ref: bool,
}

impl VarDecl {
    pub fn is_ref(&self) -> bool {
        self.storage.intersects(StorageClass::REF | StorageClass::OUT)
    }

    pub fn is_parameter(&self) -> bool {
        self.storage.contains(StorageClass::PARAMETER)
    }

    pub fn is_field(&self) -> bool {
        self.storage.contains(StorageClass::FIELD)
    }

    /// Lives in the data segment rather than on a stack frame.
    pub fn is_dataseg(&self) -> bool {
        self.parent.is_none() && !self.is_field() || self.storage.contains(StorageClass::STATIC)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Intrinsic {
    VaStart,
    VaArg,
    Alloca,
    /// A target intrinsic called by name, e.g. `llvm.sqrt.f64`.
    Named(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FuncDecl {
    pub id: FuncId,
    pub name: String,
    pub mangled: String,
    /// Fully qualified display name.
    pub pretty: String,
    pub ty: FuncType,
    pub loc: Loc,
    pub end_loc: Loc,
    pub protection: Protection,
    pub params: Vec<VarId>,
    pub vthis: Option<VarId>,
    pub member_of: Option<AggId>,
    pub nested_in: Option<FuncId>,
    /// Own variables that nested functions reach through the frame record.
    pub nested_vars: Vec<VarId>,
    pub intrinsic: Option<Intrinsic>,
    pub virtual_index: Option<u32>,
    pub is_final: bool,
    pub cc_override: Option<CallConv>,
    /// `_arguments` and `_argptr` of D-variadic functions.
    pub arguments: Option<VarId>,
    pub argptr: Option<VarId>,
    pub body: Option<Vec<Stmt>>,
}

impl FuncDecl {
    pub fn is_virtual(&self) -> bool {
        self.virtual_index.is_some() && !self.is_final
    }

    pub fn is_nested(&self) -> bool {
        self.nested_in.is_some()
    }
}
