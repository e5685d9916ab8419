use std::fmt;

use fnv::FnvHashMap;
use itertools::Itertools;

use super::{
    inst::InstDisplay, DebugLoc, FnType, Inst, IrType, MdId, Metadata, Value, ValueKind,
};
use crate::target::{AbiPolicy, CallConv, RealRepr, Target};
use crate::utils::{indent, join};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct FuncIdx(pub u32);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GlobalId(pub u32);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Linkage {
    External,
    Internal,
    Private,
    WeakOdr,
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Linkage::External => "external",
            Linkage::Internal => "internal",
            Linkage::Private => "private",
            Linkage::WeakOdr => "weak_odr",
        })
    }
}

#[derive(Clone, Debug)]
pub struct Global {
    pub name: String,
    /// Type of the stored value; the global itself is a pointer to it.
    pub ty: IrType,
    pub init: Option<Value>,
    pub constant: bool,
    pub linkage: Linkage,
}

#[derive(Clone, Debug)]
pub struct InstData {
    pub inst: Inst,
    pub ty: IrType,
    pub dbg: Option<DebugLoc>,
}

#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub name: String,
    pub insts: Vec<InstId>,
}

#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub ty: FnType,
    pub cc: CallConv,
    pub linkage: Linkage,
    pub blocks: Vec<BasicBlock>,
    pub insts: Vec<InstData>,
    pub subprogram: Option<MdId>,
    alloca_point: usize,
}

impl Function {
    fn new(name: &str, ty: FnType, cc: CallConv, linkage: Linkage) -> Function {
        Function {
            name: name.to_string(),
            ty,
            cc,
            linkage,
            blocks: vec![],
            insts: vec![],
            subprogram: None,
            alloca_point: 0,
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn inst(&self, id: InstId) -> &InstData {
        &self.insts[id.0 as usize]
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    pub fn block_named(&self, name: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|b| b.name == name)
            .map(|i| BlockId(i as u32))
    }

    /// Instructions in block order.
    pub fn iter_insts(&self) -> impl Iterator<Item = &InstData> {
        self.blocks
            .iter()
            .flat_map(move |b| b.insts.iter().map(move |id| &self.insts[id.0 as usize]))
    }

    pub fn count<F: Fn(&Inst) -> bool>(&self, f: F) -> usize {
        self.iter_insts().filter(|d| f(&d.inst)).count()
    }

    pub fn is_terminated(&self, block: BlockId) -> bool {
        self.block(block)
            .insts
            .last()
            .map_or(false, |id| self.inst(*id).inst.is_terminator())
    }

    /// Whether control can reach `block`: the entry block, or any block some
    /// terminator branches to.
    pub fn is_reachable(&self, block: BlockId) -> bool {
        block.0 == 0
            || self
                .blocks
                .iter()
                .filter_map(|b| b.insts.last())
                .any(|id| match &self.inst(*id).inst {
                    Inst::Br(to) => *to == block,
                    Inst::CondBr { then, els, .. } => *then == block || *els == block,
                    _ => false,
                })
    }

    pub fn arg(&self, n: usize) -> Value {
        Value::new(ValueKind::Arg(n as u32), self.ty.params[n].clone())
    }

    pub fn append_block(&mut self, name: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            name: name.to_string(),
            insts: vec![],
        });
        id
    }

    /// Drops the body, leaving a declaration.
    pub fn clear_body(&mut self) {
        self.blocks.clear();
        self.insts.clear();
        self.subprogram = None;
        self.alloca_point = 0;
    }

    pub(super) fn push(&mut self, block: BlockId, data: InstData) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(data);
        self.blocks[block.0 as usize].insts.push(id);
        id
    }

    /// Stack slots go to the front of the entry block so they dominate every
    /// later insertion point.
    pub(super) fn push_alloca(&mut self, data: InstData) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(data);
        self.blocks[0].insts.insert(self.alloca_point, id);
        self.alloca_point += 1;
        id
    }
}

/// The IR of one compilation unit.
#[derive(Clone, Debug)]
pub struct Module {
    pub name: String,
    pub target: Target,
    ptr_size: u64,
    real: RealRepr,
    structs: Vec<(String, Option<Vec<IrType>>)>,
    struct_index: FnvHashMap<String, usize>,
    pub globals: Vec<Global>,
    global_index: FnvHashMap<String, GlobalId>,
    pub funcs: Vec<Function>,
    func_index: FnvHashMap<String, FuncIdx>,
    pub flags: Vec<(String, u64)>,
    pub md: Metadata,
    pub dbg_cu: Option<MdId>,
}

impl Module {
    pub fn new(name: &str, abi: &AbiPolicy) -> Module {
        Module {
            name: name.to_string(),
            target: abi.target,
            ptr_size: abi.ptr_size,
            real: abi.real,
            structs: vec![],
            struct_index: FnvHashMap::default(),
            globals: vec![],
            global_index: FnvHashMap::default(),
            funcs: vec![],
            func_index: FnvHashMap::default(),
            flags: vec![],
            md: Metadata::new(),
            dbg_cu: None,
        }
    }

    pub fn size_t(&self) -> IrType {
        IrType::Int(self.ptr_size as u32 * 8)
    }

    /// Registers an identified record without a body, or returns the existing one.
    pub fn declare_struct(&mut self, name: &str) -> IrType {
        if !self.struct_index.contains_key(name) {
            self.struct_index.insert(name.to_string(), self.structs.len());
            self.structs.push((name.to_string(), None));
        }
        IrType::Named(name.to_string())
    }

    pub fn set_struct_body(&mut self, name: &str, fields: Vec<IrType>) {
        match self.struct_index.get(name) {
            Some(&i) => self.structs[i].1 = Some(fields),
            None => panic!("COMPILER BUG: setting body of undeclared struct %{}", name),
        }
    }

    pub fn struct_body(&self, name: &str) -> Option<&[IrType]> {
        self.struct_index
            .get(name)
            .and_then(|&i| self.structs[i].1.as_deref())
    }

    /// Field types of a literal or identified record.
    pub fn fields_of<'a>(&'a self, ty: &'a IrType) -> Option<&'a [IrType]> {
        match ty {
            IrType::Struct(fields) => Some(fields),
            IrType::Named(name) => self.struct_body(name),
            _ => None,
        }
    }

    pub fn abi_align(&self, ty: &IrType) -> u64 {
        match ty {
            IrType::Void => 1,
            IrType::Int(n) => int_bytes(*n).min(8),
            IrType::F32 => 4,
            IrType::F64 => 8,
            IrType::F80 => match self.real {
                RealRepr::X87 { align, .. } => align,
                RealRepr::Double => 8,
            },
            IrType::Ptr(_) | IrType::Func(_) => self.ptr_size,
            IrType::Array(t, _) => self.abi_align(t),
            IrType::Vector(..) => self.alloc_size(ty).next_power_of_two(),
            IrType::Struct(_) | IrType::Named(_) => self
                .fields_of(ty)
                .unwrap_or_else(|| panic!("COMPILER BUG: layout of opaque type {}", ty))
                .iter()
                .map(|t| self.abi_align(t))
                .max()
                .unwrap_or(1),
        }
    }

    /// Bytes between consecutive elements of this type in an array.
    pub fn alloc_size(&self, ty: &IrType) -> u64 {
        match ty {
            IrType::Void => 0,
            IrType::Int(n) => int_bytes(*n),
            IrType::F32 => 4,
            IrType::F64 => 8,
            IrType::F80 => match self.real {
                RealRepr::X87 { size, .. } => size,
                RealRepr::Double => 8,
            },
            IrType::Ptr(_) | IrType::Func(_) => self.ptr_size,
            IrType::Array(t, n) => self.alloc_size(t) * n,
            IrType::Vector(t, n) => (self.alloc_size(t) * n).next_power_of_two(),
            IrType::Struct(_) | IrType::Named(_) => {
                let fields = self
                    .fields_of(ty)
                    .unwrap_or_else(|| panic!("COMPILER BUG: layout of opaque type {}", ty));
                let mut size = 0;
                for f in fields {
                    size = align_to(size, self.abi_align(f)) + self.alloc_size(f);
                }
                align_to(size, self.abi_align(ty))
            }
        }
    }

    /// Size in bits, ignoring tail padding of scalars.
    pub fn size_bits(&self, ty: &IrType) -> u64 {
        match ty {
            IrType::Int(n) => *n as u64,
            IrType::F80 if self.real != RealRepr::Double => 80,
            _ => self.alloc_size(ty) * 8,
        }
    }

    pub fn field_offset(&self, ty: &IrType, idx: usize) -> u64 {
        let fields = self
            .fields_of(ty)
            .unwrap_or_else(|| panic!("COMPILER BUG: field offset into non-record {}", ty));
        let mut offset = 0;
        for (i, f) in fields.iter().enumerate() {
            offset = align_to(offset, self.abi_align(f));
            if i == idx {
                return offset;
            }
            offset += self.alloc_size(f);
        }
        panic!("COMPILER BUG: field {} out of range for {}", idx, ty)
    }

    pub fn add_global(&mut self, global: Global) -> Value {
        let ty = global.ty.clone().ptr_to();
        let name = global.name.clone();
        let id = match self.global_index.get(&name) {
            Some(id) => *id,
            None => {
                let id = GlobalId(self.globals.len() as u32);
                self.global_index.insert(name.clone(), id);
                self.globals.push(global);
                id
            }
        };
        Value::new(ValueKind::Global(id, name), ty)
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.global_index.get(name).map(|id| {
            let g = &self.globals[id.0 as usize];
            Value::new(ValueKind::Global(*id, name.to_string()), g.ty.clone().ptr_to())
        })
    }

    pub fn global_mut(&mut self, v: &Value) -> Option<&mut Global> {
        match v.kind {
            ValueKind::Global(id, _) => self.globals.get_mut(id.0 as usize),
            _ => None,
        }
    }

    /// A global name not used yet, derived from `base`.
    pub fn unique_global_name(&self, base: &str) -> String {
        if !self.global_index.contains_key(base) {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{}.{}", base, i))
            .find(|n| !self.global_index.contains_key(n))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn declare_function(&mut self, name: &str, ty: FnType, cc: CallConv, linkage: Linkage) -> FuncIdx {
        if let Some(idx) = self.func_index.get(name) {
            return *idx;
        }
        let idx = FuncIdx(self.funcs.len() as u32);
        self.funcs.push(Function::new(name, ty, cc, linkage));
        self.func_index.insert(name.to_string(), idx);
        idx
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.func_index.get(name).map(|idx| &self.funcs[idx.0 as usize])
    }

    pub fn func(&self, idx: FuncIdx) -> &Function {
        &self.funcs[idx.0 as usize]
    }

    pub fn func_mut(&mut self, idx: FuncIdx) -> &mut Function {
        &mut self.funcs[idx.0 as usize]
    }

    pub fn func_value(&self, idx: FuncIdx) -> Value {
        let f = self.func(idx);
        Value::func_ref(&f.name, IrType::Func(Box::new(f.ty.clone())).ptr_to())
    }

    pub fn add_flag(&mut self, name: &str, value: u64) {
        self.flags.push((name.to_string(), value));
    }
}

fn int_bytes(bits: u32) -> u64 {
    ((bits as u64 + 7) / 8).next_power_of_two()
}

fn align_to(n: u64, align: u64) -> u64 {
    (n + align - 1) / align * align
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .ty
            .params
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{} %arg{}", t, i))
            .join(", ");
        let kw = if self.is_declaration() { "declare" } else { "define" };
        let cc = match self.cc {
            CallConv::C => str!(""),
            cc => format!("{} ", cc),
        };
        write!(f, "{} {}{} @{}({})", kw, cc, self.ty.ret, self.name, params)?;
        if let Some(sp) = self.subprogram {
            write!(f, " !dbg {}", sp)?;
        }
        if self.is_declaration() {
            return writeln!(f);
        }
        writeln!(f, " {{")?;
        for (i, b) in self.blocks.iter().enumerate() {
            writeln!(f, "bb{}: ; {}", i, b.name)?;
            let body = b
                .insts
                .iter()
                .map(|id| {
                    let data = self.inst(*id);
                    let text = InstDisplay(&data.inst, &data.ty).to_string();
                    let text = if data.ty.is_void() || matches!(data.inst, Inst::Store { .. }) {
                        text
                    } else {
                        format!("%{} = {}", id.0, text)
                    };
                    match &data.dbg {
                        Some(loc) => format!("{}, !dbg {}", text, loc),
                        None => text,
                    }
                })
                .join("\n");
            writeln!(f, "{}", indent(body, 1))?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        writeln!(f, "target triple = \"{}\"", self.target)?;
        writeln!(f)?;
        for (name, body) in self.structs.iter() {
            match body {
                Some(fields) => writeln!(f, "%{} = type {{ {} }}", name, join(fields, ", "))?,
                None => writeln!(f, "%{} = type opaque", name)?,
            }
        }
        for g in self.globals.iter() {
            let kind = if g.constant { "constant" } else { "global" };
            match &g.init {
                Some(init) => writeln!(f, "@{} = {} {} {}", g.name, g.linkage, kind, init)?,
                None => writeln!(f, "@{} = external {} {}", g.name, kind, g.ty)?,
            }
        }
        for func in self.funcs.iter() {
            writeln!(f)?;
            write!(f, "{}", func)?;
        }
        if !self.flags.is_empty() {
            writeln!(f)?;
            for (name, value) in self.flags.iter() {
                writeln!(f, "!llvm.module.flags = !{{i32 2, !\"{}\", i32 {}}}", name, value)?;
            }
        }
        if let Some(cu) = self.dbg_cu {
            writeln!(f, "!llvm.dbg.cu = !{{{}}}", cu)?;
        }
        for (id, node) in self.md.iter() {
            writeln!(f, "{} = {}", id, node)?;
        }
        Ok(())
    }
}
