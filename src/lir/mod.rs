//! The target IR: typed SSA-ish instructions in basic blocks, module-level
//! globals and a metadata arena for debug information.

macro_rules! LirImplInto {
    ($dst:ident for $src:ident) => {
        impl Into<$dst> for $src {
            fn into(self) -> $dst {
                $dst::$src(self)
            }
        }
    };
}

mod build;
mod inst;
mod md;
mod module;
mod types;
mod value;

pub use build::Cursor;
pub use inst::{CastOp, FloatPred, Inst, IntPred, Op};
pub use md::{
    CompositeTag, DIFlags, DebugLoc, DwAte, DwLang, MdId, MdNode, Metadata, VarKind,
};
pub use module::{
    BasicBlock, BlockId, FuncIdx, Function, Global, GlobalId, InstData, InstId, Linkage, Module,
};
pub use types::{FnType, IrType};
pub use value::{Const, Value, ValueKind};
