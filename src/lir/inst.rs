use std::fmt;

use super::{BlockId, IrType, MdId, Value};
use crate::target::CallConv;
use crate::utils::join;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Op {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
    And,
    Or,
    Xor,
    Shl,
    AShr,
    LShr,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::SDiv => "sdiv",
            Op::UDiv => "udiv",
            Op::SRem => "srem",
            Op::URem => "urem",
            Op::FAdd => "fadd",
            Op::FSub => "fsub",
            Op::FMul => "fmul",
            Op::FDiv => "fdiv",
            Op::FRem => "frem",
            Op::And => "and",
            Op::Or => "or",
            Op::Xor => "xor",
            Op::Shl => "shl",
            Op::AShr => "ashr",
            Op::LShr => "lshr",
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum IntPred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl fmt::Display for IntPred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IntPred::Eq => "eq",
            IntPred::Ne => "ne",
            IntPred::Slt => "slt",
            IntPred::Sle => "sle",
            IntPred::Sgt => "sgt",
            IntPred::Sge => "sge",
            IntPred::Ult => "ult",
            IntPred::Ule => "ule",
            IntPred::Ugt => "ugt",
            IntPred::Uge => "uge",
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FloatPred {
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
    Ord,
    Uno,
    Ueq,
    Une,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl fmt::Display for FloatPred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FloatPred::Oeq => "oeq",
            FloatPred::One => "one",
            FloatPred::Olt => "olt",
            FloatPred::Ole => "ole",
            FloatPred::Ogt => "ogt",
            FloatPred::Oge => "oge",
            FloatPred::Ord => "ord",
            FloatPred::Uno => "uno",
            FloatPred::Ueq => "ueq",
            FloatPred::Une => "une",
            FloatPred::Ult => "ult",
            FloatPred::Ule => "ule",
            FloatPred::Ugt => "ugt",
            FloatPred::Uge => "uge",
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FPTrunc,
    FPExt,
    FPToSI,
    FPToUI,
    SIToFP,
    UIToFP,
    PtrToInt,
    IntToPtr,
    BitCast,
}

impl fmt::Display for CastOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CastOp::Trunc => "trunc",
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::FPTrunc => "fptrunc",
            CastOp::FPExt => "fpext",
            CastOp::FPToSI => "fptosi",
            CastOp::FPToUI => "fptoui",
            CastOp::SIToFP => "sitofp",
            CastOp::UIToFP => "uitofp",
            CastOp::PtrToInt => "ptrtoint",
            CastOp::IntToPtr => "inttoptr",
            CastOp::BitCast => "bitcast",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Inst {
    /// Stack slot; `count` elements when given, one otherwise.
    Alloca { ty: IrType, count: Option<Value>, name: String },
    Load(Value),
    Store { value: Value, ptr: Value },
    /// Address computation; a single index is a plain pointer offset.
    Gep { base: Value, indices: Vec<Value> },
    Bin { op: Op, lhs: Value, rhs: Value },
    ICmp { pred: IntPred, lhs: Value, rhs: Value },
    FCmp { pred: FloatPred, lhs: Value, rhs: Value },
    Cast { op: CastOp, value: Value },
    Call { callee: Value, args: Vec<Value>, cc: CallConv },
    Br(BlockId),
    CondBr { cond: Value, then: BlockId, els: BlockId },
    Ret(Option<Value>),
    Unreachable,
    Memcpy { dst: Value, src: Value, len: Value },
    Memset { dst: Value, byte: Value, len: Value },
    VaArg { list: Value },
    DbgDeclare { addr: Value, var: MdId },
    DbgValue { value: Value, var: MdId },
}

impl Inst {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Inst::Br(_) | Inst::CondBr { .. } | Inst::Ret(_) | Inst::Unreachable
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Inst::Alloca { .. } => "alloca",
            Inst::Load(_) => "load",
            Inst::Store { .. } => "store",
            Inst::Gep { .. } => "getelementptr",
            Inst::Bin { .. } => "binop",
            Inst::ICmp { .. } => "icmp",
            Inst::FCmp { .. } => "fcmp",
            Inst::Cast { .. } => "cast",
            Inst::Call { .. } => "call",
            Inst::Br(_) => "br",
            Inst::CondBr { .. } => "condbr",
            Inst::Ret(_) => "ret",
            Inst::Unreachable => "unreachable",
            Inst::Memcpy { .. } => "memcpy",
            Inst::Memset { .. } => "memset",
            Inst::VaArg { .. } => "va_arg",
            Inst::DbgDeclare { .. } => "dbg.declare",
            Inst::DbgValue { .. } => "dbg.value",
        }
    }
}

/// Prints an instruction given its result type.
pub struct InstDisplay<'a>(pub &'a Inst, pub &'a IrType);

impl<'a> fmt::Display for InstDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ty = self.1;
        match self.0 {
            Inst::Alloca { ty: t, count: None, .. } => write!(f, "alloca {}", t),
            Inst::Alloca { ty: t, count: Some(n), .. } => write!(f, "alloca {}, {}", t, n),
            Inst::Load(p) => write!(f, "load {}, {}", ty, p),
            Inst::Store { value, ptr } => write!(f, "store {}, {}", value, ptr),
            Inst::Gep { base, indices } => write!(
                f,
                "getelementptr {}, {}, {}",
                base.ty.pointee().unwrap_or(&base.ty),
                base,
                join(indices, ", ")
            ),
            Inst::Bin { op, lhs, rhs } => write!(f, "{} {}, {}", op, lhs, rhs.operand()),
            Inst::ICmp { pred, lhs, rhs } => write!(f, "icmp {} {}, {}", pred, lhs, rhs.operand()),
            Inst::FCmp { pred, lhs, rhs } => write!(f, "fcmp {} {}, {}", pred, lhs, rhs.operand()),
            Inst::Cast { op, value } => write!(f, "{} {} to {}", op, value, ty),
            Inst::Call { callee, args, cc } => {
                let cc = match cc {
                    CallConv::C => str!(""),
                    cc => format!("{} ", cc),
                };
                write!(f, "call {}{} {}({})", cc, ty, callee.operand(), join(args, ", "))
            }
            Inst::Br(b) => write!(f, "br label %bb{}", b.0),
            Inst::CondBr { cond, then, els } => {
                write!(f, "br {}, label %bb{}, label %bb{}", cond, then.0, els.0)
            }
            Inst::Ret(Some(v)) => write!(f, "ret {}", v),
            Inst::Ret(None) => write!(f, "ret void"),
            Inst::Unreachable => write!(f, "unreachable"),
            Inst::Memcpy { dst, src, len } => {
                write!(f, "call void @llvm.memcpy({}, {}, {})", dst, src, len)
            }
            Inst::Memset { dst, byte, len } => {
                write!(f, "call void @llvm.memset({}, {}, {})", dst, byte, len)
            }
            Inst::VaArg { list } => write!(f, "va_arg {}, {}", list, ty),
            Inst::DbgDeclare { addr, var } => {
                write!(f, "call void @llvm.dbg.declare(metadata {}, metadata {})", addr, var)
            }
            Inst::DbgValue { value, var } => {
                write!(f, "call void @llvm.dbg.value(metadata {}, metadata {})", value, var)
            }
        }
    }
}
