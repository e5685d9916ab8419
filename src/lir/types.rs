use std::fmt;

use crate::utils::join;

/// Machine-level types of the IR.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IrType {
    Void,
    Int(u32),
    F32,
    F64,
    F80,
    Ptr(Box<IrType>),
    Array(Box<IrType>, u64),
    Vector(Box<IrType>, u64),
    /// Literal (structurally typed) record.
    Struct(Vec<IrType>),
    /// Identified record whose body is registered on the module.
    Named(String),
    Func(Box<FnType>),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FnType {
    pub ret: IrType,
    pub params: Vec<IrType>,
    pub c_varargs: bool,
}

impl IrType {
    pub fn i1() -> IrType {
        IrType::Int(1)
    }

    pub fn i8() -> IrType {
        IrType::Int(8)
    }

    pub fn i32() -> IrType {
        IrType::Int(32)
    }

    pub fn i8_ptr() -> IrType {
        IrType::i8().ptr_to()
    }

    pub fn ptr_to(self) -> IrType {
        IrType::Ptr(Box::new(self))
    }

    pub fn array_of(self, n: u64) -> IrType {
        IrType::Array(Box::new(self), n)
    }

    pub fn func(ret: IrType, params: Vec<IrType>) -> IrType {
        IrType::Func(Box::new(FnType {
            ret,
            params,
            c_varargs: false,
        }))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, IrType::Void)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, IrType::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, IrType::F32 | IrType::F64 | IrType::F80)
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, IrType::Ptr(_))
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            IrType::Struct(_) | IrType::Named(_) | IrType::Array(..) | IrType::Vector(..)
        )
    }

    pub fn int_bits(&self) -> Option<u32> {
        match self {
            IrType::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn pointee(&self) -> Option<&IrType> {
        match self {
            IrType::Ptr(t) => Some(t),
            _ => None,
        }
    }

    pub fn fn_type(&self) -> Option<&FnType> {
        match self {
            IrType::Func(f) => Some(f),
            IrType::Ptr(t) => t.fn_type(),
            _ => None,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::Int(n) => write!(f, "i{}", n),
            IrType::F32 => write!(f, "float"),
            IrType::F64 => write!(f, "double"),
            IrType::F80 => write!(f, "x86_fp80"),
            IrType::Ptr(t) => write!(f, "{}*", t),
            IrType::Array(t, n) => write!(f, "[{} x {}]", n, t),
            IrType::Vector(t, n) => write!(f, "<{} x {}>", n, t),
            IrType::Struct(fields) if fields.is_empty() => write!(f, "{{}}"),
            IrType::Struct(fields) => write!(f, "{{ {} }}", join(fields, ", ")),
            IrType::Named(name) => write!(f, "%{}", name),
            IrType::Func(ft) => write!(f, "{}", ft),
        }
    }
}

impl fmt::Display for FnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}", self.ret, join(&self.params, ", "))?;
        if self.c_varargs {
            if self.params.is_empty() {
                write!(f, "...")?;
            } else {
                write!(f, ", ...")?;
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_like_llvm_types() {
        let slice = IrType::Struct(vec![IrType::Int(64), IrType::i8_ptr()]);
        assert_eq!(slice.to_string(), "{ i64, i8* }");
        assert_eq!(IrType::F32.array_of(4).to_string(), "[4 x float]");
        let f = IrType::func(IrType::Void, vec![IrType::i32()]);
        assert_eq!(f.ptr_to().to_string(), "void (i32)*");
    }
}
