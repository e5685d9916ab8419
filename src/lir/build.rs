//! Instruction construction. Result types are derived from the operands the
//! same way the textual IR would type them.

use super::{
    BlockId, CastOp, DebugLoc, FloatPred, FuncIdx, Inst, InstData, IntPred, IrType, MdId, Module,
    Op, Value, ValueKind,
};
use crate::target::CallConv;

/// Insertion point: a block of a function plus the location stamped on new
/// instructions.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Cursor {
    pub func: FuncIdx,
    pub block: BlockId,
    pub dbg: Option<DebugLoc>,
}

impl Module {
    fn insert(&mut self, at: &Cursor, inst: Inst, ty: IrType) -> Value {
        log::trace!("emit {} in bb{}", inst.name(), at.block.0);
        let id = self.func_mut(at.func).push(
            at.block,
            InstData {
                inst,
                ty: ty.clone(),
                dbg: at.dbg,
            },
        );
        Value::new(ValueKind::Inst(id), ty)
    }

    pub fn build_alloca(&mut self, at: &Cursor, ty: IrType, name: &str) -> Value {
        let ptr = ty.clone().ptr_to();
        let id = self.func_mut(at.func).push_alloca(InstData {
            inst: Inst::Alloca {
                ty,
                count: None,
                name: name.to_string(),
            },
            ty: ptr.clone(),
            dbg: None,
        });
        Value::new(ValueKind::Inst(id), ptr)
    }

    /// Stack allocation of a runtime number of elements at the insertion point.
    pub fn build_dyn_alloca(&mut self, at: &Cursor, ty: IrType, count: Value, name: &str) -> Value {
        let ptr = ty.clone().ptr_to();
        let inst = Inst::Alloca {
            ty,
            count: Some(count),
            name: name.to_string(),
        };
        self.insert(at, inst, ptr)
    }

    pub fn build_load(&mut self, at: &Cursor, ptr: Value) -> Value {
        let ty = match ptr.ty.pointee() {
            Some(t) => t.clone(),
            None => panic!("COMPILER BUG: load from non-pointer {}", ptr),
        };
        self.insert(at, Inst::Load(ptr), ty)
    }

    pub fn build_store(&mut self, at: &Cursor, value: Value, ptr: Value) {
        self.insert(at, Inst::Store { value, ptr }, IrType::Void);
    }

    pub fn gep_type(&self, base: &IrType, indices: &[Value]) -> IrType {
        let mut ty = match base.pointee() {
            Some(t) => t.clone(),
            None => panic!("COMPILER BUG: element offset from non-pointer {}", base),
        };
        for idx in indices.iter().skip(1) {
            ty = match &ty {
                IrType::Array(t, _) | IrType::Vector(t, _) => (**t).clone(),
                IrType::Struct(_) | IrType::Named(_) => {
                    let i = idx
                        .as_const_int()
                        .unwrap_or_else(|| panic!("COMPILER BUG: non-constant field index {}", idx));
                    let fields = self
                        .fields_of(&ty)
                        .unwrap_or_else(|| panic!("COMPILER BUG: field of opaque {}", ty));
                    fields[i as usize].clone()
                }
                t => panic!("COMPILER BUG: cannot index into {}", t),
            };
        }
        ty.ptr_to()
    }

    pub fn build_gep(&mut self, at: &Cursor, base: Value, indices: Vec<Value>) -> Value {
        let ty = self.gep_type(&base.ty, &indices);
        self.insert(at, Inst::Gep { base, indices }, ty)
    }

    /// Element offset with two constant indices, `gep base, 0, i` style.
    pub fn build_gepi(&mut self, at: &Cursor, base: Value, i0: u64, i1: u64) -> Value {
        let indices = vec![
            Value::const_int(IrType::i32(), i0),
            Value::const_int(IrType::i32(), i1),
        ];
        self.build_gep(at, base, indices)
    }

    /// Pointer plus element count.
    pub fn build_offset(&mut self, at: &Cursor, base: Value, idx: Value) -> Value {
        self.build_gep(at, base, vec![idx])
    }

    pub fn build_bin(&mut self, at: &Cursor, op: Op, lhs: Value, rhs: Value) -> Value {
        let ty = lhs.ty.clone();
        self.insert(at, Inst::Bin { op, lhs, rhs }, ty)
    }

    pub fn build_icmp(&mut self, at: &Cursor, pred: IntPred, lhs: Value, rhs: Value) -> Value {
        self.insert(at, Inst::ICmp { pred, lhs, rhs }, IrType::i1())
    }

    pub fn build_fcmp(&mut self, at: &Cursor, pred: FloatPred, lhs: Value, rhs: Value) -> Value {
        self.insert(at, Inst::FCmp { pred, lhs, rhs }, IrType::i1())
    }

    pub fn build_cast(&mut self, at: &Cursor, op: CastOp, value: Value, to: IrType) -> Value {
        if value.ty == to {
            return value;
        }
        self.insert(at, Inst::Cast { op, value }, to)
    }

    pub fn build_bitcast(&mut self, at: &Cursor, value: Value, to: IrType) -> Value {
        if value.is_const() {
            return Value::const_bitcast(value, to);
        }
        self.build_cast(at, CastOp::BitCast, value, to)
    }

    pub fn build_call(&mut self, at: &Cursor, callee: Value, args: Vec<Value>, cc: CallConv) -> Value {
        let ret = match callee.ty.fn_type() {
            Some(ft) => ft.ret.clone(),
            None => panic!("COMPILER BUG: calling non-function {}", callee),
        };
        self.insert(at, Inst::Call { callee, args, cc }, ret)
    }

    pub fn build_br(&mut self, at: &Cursor, dest: BlockId) {
        self.insert(at, Inst::Br(dest), IrType::Void);
    }

    pub fn build_cond_br(&mut self, at: &Cursor, cond: Value, then: BlockId, els: BlockId) {
        self.insert(at, Inst::CondBr { cond, then, els }, IrType::Void);
    }

    pub fn build_ret(&mut self, at: &Cursor, value: Option<Value>) {
        self.insert(at, Inst::Ret(value), IrType::Void);
    }

    pub fn build_unreachable(&mut self, at: &Cursor) {
        self.insert(at, Inst::Unreachable, IrType::Void);
    }

    pub fn build_memcpy(&mut self, at: &Cursor, dst: Value, src: Value, len: Value) {
        self.insert(at, Inst::Memcpy { dst, src, len }, IrType::Void);
    }

    pub fn build_memset(&mut self, at: &Cursor, dst: Value, byte: u8, len: Value) {
        let byte = Value::const_int(IrType::i8(), byte as u64);
        self.insert(at, Inst::Memset { dst, byte, len }, IrType::Void);
    }

    pub fn build_va_arg(&mut self, at: &Cursor, list: Value, ty: IrType) -> Value {
        self.insert(at, Inst::VaArg { list }, ty)
    }

    pub fn build_dbg_declare(&mut self, at: &Cursor, addr: Value, var: MdId) {
        self.insert(at, Inst::DbgDeclare { addr, var }, IrType::Void);
    }

    pub fn build_dbg_value(&mut self, at: &Cursor, value: Value, var: MdId) {
        self.insert(at, Inst::DbgValue { value, var }, IrType::Void);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::{FnType, Linkage};
    use crate::target::{AbiPolicy, Target};

    fn function(m: &mut Module) -> Cursor {
        let f = m.declare_function(
            "f",
            FnType {
                ret: IrType::Void,
                params: vec![],
                c_varargs: false,
            },
            CallConv::C,
            Linkage::External,
        );
        let entry = m.func_mut(f).append_block("entry");
        Cursor {
            func: f,
            block: entry,
            dbg: None,
        }
    }

    #[test]
    fn allocas_stay_in_front_of_the_entry_block() {
        let mut m = Module::new("test", &AbiPolicy::for_target(Target::X86_64Linux));
        let at = function(&mut m);
        let a = m.build_alloca(&at, IrType::i32(), "a");
        m.build_store(&at, Value::const_int(IrType::i32(), 1), a);
        let b = m.build_alloca(&at, IrType::i32(), "b");
        m.build_ret(&at, None);

        let f = m.func(at.func);
        let names = f.iter_insts().map(|d| d.inst.name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["alloca", "alloca", "store", "ret"]);
        assert_eq!(b.ty, IrType::i32().ptr_to());
        assert!(f.is_terminated(at.block));
    }

    #[test]
    fn element_offsets_walk_into_records() {
        let mut m = Module::new("test", &AbiPolicy::for_target(Target::X86_64Linux));
        let at = function(&mut m);
        let slice = IrType::Struct(vec![IrType::Int(64), IrType::F64.ptr_to()]);
        let p = m.build_alloca(&at, slice, "s");
        let field = m.build_gepi(&at, p, 0, 1);
        assert_eq!(field.ty, IrType::F64.ptr_to().ptr_to());
        let elem = m.build_load(&at, field);
        assert_eq!(elem.ty, IrType::F64.ptr_to());
    }
}
