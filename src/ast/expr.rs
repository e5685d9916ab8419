use std::fmt;

use serde::{Deserialize, Serialize};

use super::{AggId, EnumId, FuncId, Type, VarId};
use crate::span::Loc;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Ushr => ">>>",
        })
    }
}

/// Relational operators, including the unordered floating point forms.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    /// `!<>=`
    Unord,
    /// `<>`
    Lg,
    /// `<>=`
    Leg,
    /// `!>`
    Ule,
    /// `!>=`
    Ul,
    /// `!<`
    Uge,
    /// `!<=`
    Ug,
    /// `!<>`
    Ue,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum PostOp {
    Inc,
    Dec,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Symbol {
    Var(VarId),
    Func(FuncId),
    /// The static initializer image of an aggregate.
    StaticInit(AggId),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Decl {
    Var(VarId),
    Func(FuncId),
    Aggregate(AggId),
    Enum(EnumId),
    Alias(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub loc: Loc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Integer(u64),
    Real(f64),
    Complex(f64, f64),
    Null,
    String(String),
    ArrayLiteral(Vec<Expr>),
    /// One entry per field of the aggregate; `None` keeps the field default.
    StructLiteral(AggId, Vec<Option<Expr>>),
    AssocArrayLiteral(Vec<Expr>, Vec<Expr>),
    Var(Symbol),
    /// `$`, the length of the innermost array being indexed or sliced.
    Dollar,
    This,
    Declaration(Decl),
    Func(FuncId),
    Delegate(Box<Expr>, FuncId),
    Assign(Box<Expr>, Box<Expr>),
    BinAssign(BinOp, Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    /// `==` when the flag is true, `!=` otherwise.
    Equal(bool, Box<Expr>, Box<Expr>),
    /// `is` when the flag is true, `!is` otherwise.
    Identity(bool, Box<Expr>, Box<Expr>),
    AndAnd(Box<Expr>, Box<Expr>),
    OrOr(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Com(Box<Expr>),
    Neg(Box<Expr>),
    Post(PostOp, Box<Expr>),
    Cast(Box<Expr>),
    Addr(Box<Expr>),
    Deref(Box<Expr>),
    DotVar(Box<Expr>, Symbol),
    Index(Box<Expr>, Box<Expr>),
    Slice(Box<Expr>, Option<Box<Expr>>, Option<Box<Expr>>),
    ArrayLength(Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    New {
        newtype: Type,
        args: Vec<Expr>,
        ctor: Option<FuncId>,
        on_stack: bool,
    },
    Delete(Box<Expr>),
    Assert(Box<Expr>, Option<Box<Expr>>),
    Halt,
    Comma(Box<Expr>, Box<Expr>),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
    Cat(Box<Expr>, Box<Expr>),
    CatAssign(Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
    TypeExp,
    Scope(String),
    DotType(Box<Expr>),
    Remove(Box<Expr>, Box<Expr>),
    Tuple(Vec<Expr>),
}

impl ExprKind {
    pub fn name(&self) -> &'static str {
        match self {
            ExprKind::Integer(_) => "IntegerExp",
            ExprKind::Real(_) => "RealExp",
            ExprKind::Complex(..) => "ComplexExp",
            ExprKind::Null => "NullExp",
            ExprKind::String(_) => "StringExp",
            ExprKind::ArrayLiteral(_) => "ArrayLiteralExp",
            ExprKind::StructLiteral(..) => "StructLiteralExp",
            ExprKind::AssocArrayLiteral(..) => "AssocArrayLiteralExp",
            ExprKind::Var(_) => "VarExp",
            ExprKind::Dollar => "DollarExp",
            ExprKind::This => "ThisExp",
            ExprKind::Declaration(_) => "DeclarationExp",
            ExprKind::Func(_) => "FuncExp",
            ExprKind::Delegate(..) => "DelegateExp",
            ExprKind::Assign(..) => "AssignExp",
            ExprKind::BinAssign(..) => "BinAssignExp",
            ExprKind::Binary(..) => "BinExp",
            ExprKind::Cmp(..) => "CmpExp",
            ExprKind::Equal(..) => "EqualExp",
            ExprKind::Identity(..) => "IdentityExp",
            ExprKind::AndAnd(..) => "AndAndExp",
            ExprKind::OrOr(..) => "OrOrExp",
            ExprKind::Not(_) => "NotExp",
            ExprKind::Com(_) => "ComExp",
            ExprKind::Neg(_) => "NegExp",
            ExprKind::Post(..) => "PostExp",
            ExprKind::Cast(_) => "CastExp",
            ExprKind::Addr(_) => "AddrExp",
            ExprKind::Deref(_) => "PtrExp",
            ExprKind::DotVar(..) => "DotVarExp",
            ExprKind::Index(..) => "IndexExp",
            ExprKind::Slice(..) => "SliceExp",
            ExprKind::ArrayLength(_) => "ArrayLengthExp",
            ExprKind::Call(..) => "CallExp",
            ExprKind::New { .. } => "NewExp",
            ExprKind::Delete(_) => "DeleteExp",
            ExprKind::Assert(..) => "AssertExp",
            ExprKind::Halt => "HaltExp",
            ExprKind::Comma(..) => "CommaExp",
            ExprKind::Cond(..) => "CondExp",
            ExprKind::Cat(..) => "CatExp",
            ExprKind::CatAssign(..) => "CatAssignExp",
            ExprKind::In(..) => "InExp",
            ExprKind::TypeExp => "TypeExp",
            ExprKind::Scope(_) => "ScopeExp",
            ExprKind::DotType(_) => "DotTypeExp",
            ExprKind::Remove(..) => "RemoveExp",
            ExprKind::Tuple(_) => "TupleExp",
        }
    }
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type, loc: Loc) -> Expr {
        Expr { kind, ty, loc }
    }

    pub fn boxed(kind: ExprKind, ty: Type, loc: Loc) -> Box<Expr> {
        Box::new(Expr::new(kind, ty, loc))
    }

    pub fn is_integer(&self, value: u64) -> bool {
        matches!(self.kind, ExprKind::Integer(v) if v == value)
    }

    pub fn integer_value(&self) -> Option<u64> {
        match self.kind {
            ExprKind::Integer(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Expr(Expr),
    Block {
        body: Vec<Stmt>,
        loc: Loc,
        end_loc: Loc,
    },
    Return(Option<Expr>, Loc),
    If {
        cond: Expr,
        then: Box<Stmt>,
        els: Option<Box<Stmt>>,
        loc: Loc,
    },
}
