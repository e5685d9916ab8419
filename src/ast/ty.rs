use serde::{Deserialize, Serialize};

use super::{AggId, AggKind, EnumId, Linkage, Module};
use crate::utils::map_join;

/// Built-in scalar types.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Basic {
    Void,
    Bool,
    Char,
    WChar,
    DChar,
    Byte,
    UByte,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
    Real,
    IFloat,
    IDouble,
    IReal,
    CFloat,
    CDouble,
    CReal,
}

impl Basic {
    pub fn name(&self) -> &'static str {
        match self {
            Basic::Void => "void",
            Basic::Bool => "bool",
            Basic::Char => "char",
            Basic::WChar => "wchar",
            Basic::DChar => "dchar",
            Basic::Byte => "byte",
            Basic::UByte => "ubyte",
            Basic::Short => "short",
            Basic::UShort => "ushort",
            Basic::Int => "int",
            Basic::UInt => "uint",
            Basic::Long => "long",
            Basic::ULong => "ulong",
            Basic::Float => "float",
            Basic::Double => "double",
            Basic::Real => "real",
            Basic::IFloat => "ifloat",
            Basic::IDouble => "idouble",
            Basic::IReal => "ireal",
            Basic::CFloat => "cfloat",
            Basic::CDouble => "cdouble",
            Basic::CReal => "creal",
        }
    }

    pub fn deco(&self) -> &'static str {
        match self {
            Basic::Void => "v",
            Basic::Bool => "b",
            Basic::Char => "a",
            Basic::WChar => "u",
            Basic::DChar => "w",
            Basic::Byte => "g",
            Basic::UByte => "h",
            Basic::Short => "s",
            Basic::UShort => "t",
            Basic::Int => "i",
            Basic::UInt => "k",
            Basic::Long => "l",
            Basic::ULong => "m",
            Basic::Float => "f",
            Basic::Double => "d",
            Basic::Real => "e",
            Basic::IFloat => "o",
            Basic::IDouble => "p",
            Basic::IReal => "j",
            Basic::CFloat => "q",
            Basic::CDouble => "r",
            Basic::CReal => "c",
        }
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Basic::Bool
                | Basic::Char
                | Basic::WChar
                | Basic::DChar
                | Basic::Byte
                | Basic::UByte
                | Basic::Short
                | Basic::UShort
                | Basic::Int
                | Basic::UInt
                | Basic::Long
                | Basic::ULong
        )
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            Basic::Bool
                | Basic::Char
                | Basic::WChar
                | Basic::DChar
                | Basic::UByte
                | Basic::UShort
                | Basic::UInt
                | Basic::ULong
        )
    }

    pub fn is_char(&self) -> bool {
        matches!(self, Basic::Char | Basic::WChar | Basic::DChar)
    }

    pub fn is_floating(&self) -> bool {
        self.is_real() || self.is_imaginary() || self.is_complex()
    }

    pub fn is_real(&self) -> bool {
        matches!(self, Basic::Float | Basic::Double | Basic::Real)
    }

    pub fn is_imaginary(&self) -> bool {
        matches!(self, Basic::IFloat | Basic::IDouble | Basic::IReal)
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, Basic::CFloat | Basic::CDouble | Basic::CReal)
    }

    /// The real type backing a component of an imaginary or complex type.
    pub fn real_part(&self) -> Basic {
        match self {
            Basic::IFloat | Basic::CFloat => Basic::Float,
            Basic::IDouble | Basic::CDouble => Basic::Double,
            Basic::IReal | Basic::CReal => Basic::Real,
            b => *b,
        }
    }

    /// Storage size in bytes, independent of the target. `real` answers with
    /// the width of its value bits.
    pub fn size(&self) -> u64 {
        match self {
            Basic::Void => 1,
            Basic::Bool | Basic::Char | Basic::Byte | Basic::UByte => 1,
            Basic::WChar | Basic::Short | Basic::UShort => 2,
            Basic::DChar | Basic::Int | Basic::UInt | Basic::Float | Basic::IFloat => 4,
            Basic::Long | Basic::ULong | Basic::Double | Basic::IDouble | Basic::CFloat => 8,
            Basic::Real | Basic::IReal => 10,
            Basic::CDouble => 16,
            Basic::CReal => 20,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum VarArgs {
    None,
    /// `extern(C)` style, passed through the target's native varargs.
    C,
    /// `extern(D)` style, passed as a type array plus a data blob.
    D,
    /// `T[] args...`, already rewritten by the frontend.
    Typesafe,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ParamStorage {
    In,
    Ref,
    Out,
    Lazy,
}

impl ParamStorage {
    pub fn is_ref(&self) -> bool {
        matches!(self, ParamStorage::Ref | ParamStorage::Out)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub ty: Type,
    pub storage: ParamStorage,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FuncType {
    pub ret: Type,
    pub params: Vec<Param>,
    pub varargs: VarArgs,
    pub linkage: Linkage,
}

impl FuncType {
    pub fn new(ret: Type, params: Vec<Param>) -> FuncType {
        FuncType {
            ret,
            params,
            varargs: VarArgs::None,
            linkage: Linkage::D,
        }
    }
}

/// A resolved frontend type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Type {
    Basic(Basic),
    Null,
    Pointer(Box<Type>),
    Vector(Box<Type>, u64),
    SArray(Box<Type>, u64),
    DArray(Box<Type>),
    /// Value type, key type.
    AArray(Box<Type>, Box<Type>),
    Struct(AggId),
    Class(AggId),
    Enum(EnumId),
    Function(Box<FuncType>),
    Delegate(Box<FuncType>),
    Tuple(Vec<Type>),
}

impl Type {
    pub fn void() -> Type {
        Type::Basic(Basic::Void)
    }

    pub fn bool() -> Type {
        Type::Basic(Basic::Bool)
    }

    pub fn int() -> Type {
        Type::Basic(Basic::Int)
    }

    pub fn ptr_to(self) -> Type {
        Type::Pointer(Box::new(self))
    }

    pub fn array_of(self) -> Type {
        Type::DArray(Box::new(self))
    }

    pub fn basic(&self) -> Option<Basic> {
        match self {
            Type::Basic(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Basic(Basic::Void))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Type::Basic(Basic::Bool))
    }

    pub fn is_integral(&self) -> bool {
        self.basic().map_or(false, |b| b.is_integral())
    }

    pub fn is_unsigned(&self) -> bool {
        self.basic().map_or(false, |b| b.is_unsigned())
    }

    pub fn is_floating(&self) -> bool {
        self.basic().map_or(false, |b| b.is_floating())
    }

    pub fn is_complex(&self) -> bool {
        self.basic().map_or(false, |b| b.is_complex())
    }

    pub fn is_imaginary(&self) -> bool {
        self.basic().map_or(false, |b| b.is_imaginary())
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    pub fn is_class(&self) -> bool {
        matches!(self, Type::Class(_))
    }

    /// Element type of pointers, arrays and vectors.
    pub fn next(&self) -> Option<&Type> {
        match self {
            Type::Pointer(t)
            | Type::Vector(t, _)
            | Type::SArray(t, _)
            | Type::DArray(t)
            | Type::AArray(t, _) => Some(t),
            _ => None,
        }
    }

    /// Resolves enums to their member type. Opaque enums answer `int`.
    pub fn to_base(&self, m: &Module) -> Type {
        match self {
            Type::Enum(id) => match &m.enum_(*id).memtype {
                Some(t) => t.to_base(m),
                None => Type::int(),
            },
            t => t.clone(),
        }
    }

    /// The frontend's canonical mangled identity of the type.
    pub fn mangle(&self, m: &Module) -> String {
        match self {
            Type::Basic(b) => b.deco().to_string(),
            Type::Null => str!("n"),
            Type::Pointer(t) => format!("P{}", t.mangle(m)),
            Type::Vector(t, n) => format!("NhG{}{}", n, t.mangle(m)),
            Type::SArray(t, n) => format!("G{}{}", n, t.mangle(m)),
            Type::DArray(t) => format!("A{}", t.mangle(m)),
            Type::AArray(v, k) => format!("H{}{}", k.mangle(m), v.mangle(m)),
            Type::Struct(id) => format!("S{}", m.agg(*id).mangled),
            Type::Class(id) => format!("C{}", m.agg(*id).mangled),
            Type::Enum(id) => format!("E{}", m.enum_(*id).mangled),
            Type::Function(f) => mangle_func(f, m),
            Type::Delegate(f) => format!("D{}", mangle_func(f, m)),
            Type::Tuple(ts) => {
                let args = ts.iter().map(|t| t.mangle(m)).collect::<String>();
                format!("B{}{}", ts.len(), args)
            }
        }
    }

    /// Source-level spelling used for debug names.
    pub fn name(&self, m: &Module) -> String {
        match self {
            Type::Basic(b) => b.name().to_string(),
            Type::Null => str!("typeof(null)"),
            Type::Pointer(t) => format!("{}*", t.name(m)),
            Type::Vector(t, n) => format!("__vector({}[{}])", t.name(m), n),
            Type::SArray(t, n) => format!("{}[{}]", t.name(m), n),
            Type::DArray(t) => format!("{}[]", t.name(m)),
            Type::AArray(v, k) => format!("{}[{}]", v.name(m), k.name(m)),
            Type::Struct(id) | Type::Class(id) => m.agg(*id).name.clone(),
            Type::Enum(id) => m.enum_(*id).name.clone(),
            Type::Function(f) => format!(
                "{} function({})",
                f.ret.name(m),
                map_join(&f.params, ", ", |p| p.ty.name(m))
            ),
            Type::Delegate(f) => format!(
                "{} delegate({})",
                f.ret.name(m),
                map_join(&f.params, ", ", |p| p.ty.name(m))
            ),
            Type::Tuple(ts) => format!("({})", map_join(ts, ", ", |t| t.name(m))),
        }
    }

    /// Whether `Class` names an interface rather than a class.
    pub fn is_interface(&self, m: &Module) -> bool {
        match self {
            Type::Class(id) => m.agg(*id).kind == AggKind::Interface,
            _ => false,
        }
    }
}

fn mangle_func(f: &FuncType, m: &Module) -> String {
    let mut s = String::from(match f.linkage {
        Linkage::D => "F",
        Linkage::C => "U",
        Linkage::Windows => "W",
        Linkage::Pascal => "V",
        Linkage::Cpp => "R",
    });
    for p in f.params.iter() {
        match p.storage {
            ParamStorage::In => {}
            ParamStorage::Out => s.push('J'),
            ParamStorage::Ref => s.push('K'),
            ParamStorage::Lazy => s.push('L'),
        }
        s.push_str(&p.ty.mangle(m));
    }
    s.push(match f.varargs {
        VarArgs::None => 'Z',
        VarArgs::C | VarArgs::D => 'Y',
        VarArgs::Typesafe => 'X',
    });
    s.push_str(&f.ret.mangle(m));
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mangles_derived_types() {
        let m = Module::new("test", "test.d");
        let t = Type::Basic(Basic::Char).array_of().ptr_to();
        assert_eq!(t.mangle(&m), "PAa");

        let f = Type::Function(Box::new(FuncType::new(
            Type::void(),
            vec![Param {
                ty: Type::int(),
                storage: ParamStorage::Ref,
            }],
        )));
        assert_eq!(f.mangle(&m), "FKiZv");
    }

    #[test]
    fn opaque_enums_resolve_to_int() {
        let mut m = Module::new("test", "test.d");
        let e = m.add_enum("E", None, vec![]);
        assert_eq!(Type::Enum(e).to_base(&m), Type::int());
        assert_eq!(Type::Enum(e).mangle(&m), "E4test1E");
    }
}
