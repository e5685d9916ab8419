use std::fmt;

use super::{GlobalId, InstId, IrType};
use crate::utils::{escape_bytes, join, map_join};

/// Constant payloads. The type lives on the enclosing [`Value`].
#[derive(Clone, Debug, PartialEq)]
pub enum Const {
    Int(u64),
    Float(f64),
    Null,
    Zero,
    Undef,
    /// Struct, array or vector elements in order.
    Aggregate(Vec<Value>),
    /// Raw bytes of an `i8` array.
    Bytes(Vec<u8>),
    /// Constant element offset from a global, `getelementptr` with constant indices.
    Offset(Box<Value>, Vec<u64>),
    IntToPtr(Box<Value>),
    BitCast(Box<Value>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueKind {
    Inst(InstId),
    Arg(u32),
    Global(GlobalId, String),
    Func(String),
    Const(Const),
}

LirImplInto!(ValueKind for Const);

/// A typed IR operand.
#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    pub kind: ValueKind,
    pub ty: IrType,
}

impl Value {
    pub fn new<K: Into<ValueKind>>(kind: K, ty: IrType) -> Value {
        Value {
            kind: kind.into(),
            ty,
        }
    }

    pub fn const_int(ty: IrType, v: u64) -> Value {
        Value::new(Const::Int(v), ty)
    }

    pub fn const_bool(b: bool) -> Value {
        Value::const_int(IrType::i1(), b as u64)
    }

    pub fn const_float(ty: IrType, v: f64) -> Value {
        Value::new(Const::Float(v), ty)
    }

    pub fn null(ty: IrType) -> Value {
        Value::new(Const::Null, ty)
    }

    pub fn zero(ty: IrType) -> Value {
        match ty {
            IrType::Int(_) => Value::const_int(ty, 0),
            IrType::F32 | IrType::F64 | IrType::F80 => Value::const_float(ty, 0.0),
            IrType::Ptr(_) => Value::null(ty),
            _ => Value::new(Const::Zero, ty),
        }
    }

    pub fn undef(ty: IrType) -> Value {
        Value::new(Const::Undef, ty)
    }

    pub fn aggregate(ty: IrType, elems: Vec<Value>) -> Value {
        Value::new(Const::Aggregate(elems), ty)
    }

    pub fn const_offset(base: Value, indices: Vec<u64>, ty: IrType) -> Value {
        Value::new(Const::Offset(Box::new(base), indices), ty)
    }

    pub fn const_bitcast(v: Value, ty: IrType) -> Value {
        if v.ty == ty {
            return v;
        }
        Value::new(Const::BitCast(Box::new(v)), ty)
    }

    pub fn func_ref(name: &str, ty: IrType) -> Value {
        Value::new(ValueKind::Func(name.to_string()), ty)
    }

    pub fn is_const(&self) -> bool {
        matches!(self.kind, ValueKind::Const(_) | ValueKind::Global(..) | ValueKind::Func(_))
    }

    pub fn as_const_int(&self) -> Option<u64> {
        match &self.kind {
            ValueKind::Const(Const::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        match &self.kind {
            ValueKind::Const(Const::Int(0)) | ValueKind::Const(Const::Null) | ValueKind::Const(Const::Zero) => true,
            ValueKind::Const(Const::Float(f)) => *f == 0.0 && f.is_sign_positive(),
            ValueKind::Const(Const::Aggregate(elems)) => elems.iter().all(Value::is_zero),
            _ => false,
        }
    }

    pub fn as_inst(&self) -> Option<InstId> {
        match self.kind {
            ValueKind::Inst(id) => Some(id),
            _ => None,
        }
    }

    /// Elements of a constant aggregate.
    pub fn elements(&self) -> Option<&[Value]> {
        match &self.kind {
            ValueKind::Const(Const::Aggregate(elems)) => Some(elems),
            _ => None,
        }
    }

    /// The operand without its type prefix.
    pub fn operand(&self) -> String {
        match &self.kind {
            ValueKind::Inst(id) => format!("%{}", id.0),
            ValueKind::Arg(n) => format!("%arg{}", n),
            ValueKind::Global(_, name) => format!("@{}", name),
            ValueKind::Func(name) => format!("@{}", name),
            ValueKind::Const(c) => match c {
                Const::Int(v) => match self.ty {
                    IrType::Int(1) => str!(if *v != 0 { "true" } else { "false" }),
                    IrType::Int(n) if n < 64 && *v >> (n - 1) & 1 == 1 => {
                        format!("{}", (*v | !((1u64 << n) - 1)) as i64)
                    }
                    IrType::Int(64) => format!("{}", *v as i64),
                    _ => v.to_string(),
                },
                Const::Float(v) => format!("{:e}", v),
                Const::Null => str!("null"),
                Const::Zero => str!("zeroinitializer"),
                Const::Undef => str!("undef"),
                Const::Aggregate(elems) => match self.ty {
                    IrType::Array(..) => format!("[{}]", join(elems, ", ")),
                    IrType::Vector(..) => format!("<{}>", join(elems, ", ")),
                    _ => format!("{{ {} }}", join(elems, ", ")),
                },
                Const::Bytes(bytes) => format!("c\"{}\"", escape_bytes(bytes)),
                Const::Offset(base, indices) => format!(
                    "getelementptr ({}, {}{})",
                    base.ty.pointee().unwrap_or(&base.ty),
                    base,
                    map_join(indices, "", |i| format!(", i32 {}", i))
                ),
                Const::IntToPtr(v) => format!("inttoptr ({} to {})", v, self.ty),
                Const::BitCast(v) => format!("bitcast ({} to {})", v, self.ty),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.ty, self.operand())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_signed_constants() {
        assert_eq!(Value::const_int(IrType::i32(), 0xFFFF_FFFF).to_string(), "i32 -1");
        assert_eq!(Value::const_bool(true).to_string(), "i1 true");
        let pair = Value::aggregate(
            IrType::Struct(vec![IrType::F32, IrType::F32]),
            vec![
                Value::const_float(IrType::F32, 1.5),
                Value::const_float(IrType::F32, 0.0),
            ],
        );
        assert_eq!(pair.to_string(), "{ float, float } { float 1.5e0, float 0e0 }");
    }

    #[test]
    fn zero_detection_looks_through_aggregates() {
        let z = Value::aggregate(
            IrType::Struct(vec![IrType::i32(), IrType::i8_ptr()]),
            vec![Value::zero(IrType::i32()), Value::zero(IrType::i8_ptr())],
        );
        assert!(z.is_zero());
        assert!(!Value::const_int(IrType::i32(), 1).is_zero());
    }
}
