//! Debug metadata nodes. Nodes live in an arena owned by the module and are
//! referenced by [`MdId`]. Forward declarations are arena slots that get
//! overwritten once the full node is known, so every reference handed out
//! earlier sees the final node.

use std::fmt;

use bitflags::bitflags;

use crate::utils::{join, map_join};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct MdId(pub u32);

impl fmt::Display for MdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{}", self.0)
    }
}

bitflags! {
    pub struct DIFlags: u32 {
        const PRIVATE = 1;
        const PROTECTED = 2;
        const PUBLIC = 3;
        const FWD_DECL = 1 << 2;
        const ARTIFICIAL = 1 << 6;
        const PROTOTYPED = 1 << 8;
        const OBJECT_POINTER = 1 << 10;
    }
}

/// DWARF base type encodings.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DwAte {
    Address,
    Boolean,
    ComplexFloat,
    Float,
    Signed,
    SignedChar,
    Unsigned,
    UnsignedChar,
    ImaginaryFloat,
    Utf,
}

impl DwAte {
    pub fn code(&self) -> u32 {
        match self {
            DwAte::Address => 0x01,
            DwAte::Boolean => 0x02,
            DwAte::ComplexFloat => 0x03,
            DwAte::Float => 0x04,
            DwAte::Signed => 0x05,
            DwAte::SignedChar => 0x06,
            DwAte::Unsigned => 0x07,
            DwAte::UnsignedChar => 0x08,
            DwAte::ImaginaryFloat => 0x09,
            DwAte::Utf => 0x10,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DwAte::Address => "DW_ATE_address",
            DwAte::Boolean => "DW_ATE_boolean",
            DwAte::ComplexFloat => "DW_ATE_complex_float",
            DwAte::Float => "DW_ATE_float",
            DwAte::Signed => "DW_ATE_signed",
            DwAte::SignedChar => "DW_ATE_signed_char",
            DwAte::Unsigned => "DW_ATE_unsigned",
            DwAte::UnsignedChar => "DW_ATE_unsigned_char",
            DwAte::ImaginaryFloat => "DW_ATE_imaginary_float",
            DwAte::Utf => "DW_ATE_UTF",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DwLang {
    C,
    D,
}

impl DwLang {
    pub fn code(&self) -> u32 {
        match self {
            DwLang::C => 0x02,
            DwLang::D => 0x13,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CompositeTag {
    Struct,
    Class,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum VarKind {
    Auto,
    /// 1-based argument number.
    Arg(u32),
}

#[derive(Clone, Debug, PartialEq)]
pub enum MdNode {
    CompileUnit {
        lang: DwLang,
        file: MdId,
        producer: String,
        optimized: bool,
    },
    File {
        name: String,
        dir: String,
    },
    BasicType {
        name: String,
        size_bits: u64,
        align_bits: u64,
        encoding: DwAte,
    },
    PointerType {
        pointee: Option<MdId>,
        size_bits: u64,
        align_bits: u64,
    },
    ReferenceType {
        base: Option<MdId>,
    },
    Unspecified {
        name: String,
    },
    Member {
        name: String,
        file: MdId,
        line: u32,
        size_bits: u64,
        align_bits: u64,
        offset_bits: u64,
        flags: DIFlags,
        base: Option<MdId>,
    },
    Composite {
        tag: CompositeTag,
        name: String,
        file: MdId,
        line: u32,
        size_bits: u64,
        align_bits: u64,
        flags: DIFlags,
        derived_from: Option<MdId>,
        elements: Vec<MdId>,
        identifier: String,
    },
    Array {
        size_bits: u64,
        align_bits: u64,
        elem: Option<MdId>,
        subscripts: Vec<MdId>,
        vector: bool,
    },
    Subrange {
        count: i64,
    },
    Enumeration {
        name: String,
        file: MdId,
        line: u32,
        size_bits: u64,
        align_bits: u64,
        base: Option<MdId>,
        elements: Vec<MdId>,
    },
    Enumerator {
        name: String,
        value: i64,
    },
    SubroutineType {
        types: Vec<Option<MdId>>,
    },
    Subprogram {
        name: String,
        linkage_name: String,
        scope: MdId,
        file: MdId,
        line: u32,
        ty: MdId,
        local_to_unit: bool,
        definition: bool,
        scope_line: u32,
        flags: DIFlags,
        optimized: bool,
    },
    LexicalBlock {
        scope: MdId,
        file: MdId,
        line: u32,
        col: u32,
    },
    LocalVariable {
        kind: VarKind,
        scope: MdId,
        name: String,
        file: MdId,
        line: u32,
        ty: Option<MdId>,
        flags: DIFlags,
    },
    GlobalVariable {
        name: String,
        linkage_name: String,
        scope: MdId,
        file: MdId,
        line: u32,
        ty: Option<MdId>,
        local_to_unit: bool,
    },
    /// Replaceable forward declaration of a composite.
    Temporary {
        tag: CompositeTag,
        name: String,
        file: MdId,
        line: u32,
    },
}

impl MdNode {
    pub fn is_temporary(&self) -> bool {
        matches!(self, MdNode::Temporary { .. })
    }
}

/// Source location attached to an instruction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DebugLoc {
    pub line: u32,
    pub col: u32,
    pub scope: MdId,
}

#[derive(Clone, Debug, Default)]
pub struct Metadata {
    nodes: Vec<MdNode>,
}

impl Metadata {
    pub fn new() -> Metadata {
        Metadata { nodes: vec![] }
    }

    pub fn push(&mut self, node: MdNode) -> MdId {
        let id = MdId(self.nodes.len() as u32);
        log::trace!("metadata {} = {}", id, node);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: MdId) -> &MdNode {
        &self.nodes[id.0 as usize]
    }

    /// Overwrites a forward declaration with its final node.
    pub fn replace_temporary(&mut self, id: MdId, node: MdNode) {
        let slot = &mut self.nodes[id.0 as usize];
        if !slot.is_temporary() {
            panic!("COMPILER BUG: {} is not a temporary node: {}", id, slot);
        }
        *slot = node;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MdId, &MdNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (MdId(i as u32), n))
    }

    pub fn count<F: Fn(&MdNode) -> bool>(&self, f: F) -> usize {
        self.nodes.iter().filter(|n| f(n)).count()
    }
}

fn opt(id: &Option<MdId>) -> String {
    match id {
        Some(id) => id.to_string(),
        None => str!("null"),
    }
}

fn flags(f: &DIFlags) -> String {
    let mut names = vec![];
    let vis = *f & DIFlags::PUBLIC;
    if vis == DIFlags::PUBLIC {
        names.push("DIFlagPublic");
    } else if vis == DIFlags::PROTECTED {
        names.push("DIFlagProtected");
    } else if vis == DIFlags::PRIVATE {
        names.push("DIFlagPrivate");
    }
    if f.contains(DIFlags::FWD_DECL) {
        names.push("DIFlagFwdDecl");
    }
    if f.contains(DIFlags::ARTIFICIAL) {
        names.push("DIFlagArtificial");
    }
    if f.contains(DIFlags::PROTOTYPED) {
        names.push("DIFlagPrototyped");
    }
    if f.contains(DIFlags::OBJECT_POINTER) {
        names.push("DIFlagObjectPointer");
    }
    if names.is_empty() {
        str!("0")
    } else {
        join(names, " | ")
    }
}

impl fmt::Display for MdNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MdNode::CompileUnit {
                lang,
                file,
                producer,
                optimized,
            } => write!(
                f,
                "distinct !DICompileUnit(language: {:#x}, file: {}, producer: {:?}, isOptimized: {})",
                lang.code(),
                file,
                producer,
                optimized
            ),
            MdNode::File { name, dir } => {
                write!(f, "!DIFile(filename: {:?}, directory: {:?})", name, dir)
            }
            MdNode::BasicType {
                name,
                size_bits,
                align_bits,
                encoding,
            } => write!(
                f,
                "!DIBasicType(name: {:?}, size: {}, align: {}, encoding: {})",
                name,
                size_bits,
                align_bits,
                encoding.name()
            ),
            MdNode::PointerType {
                pointee,
                size_bits,
                align_bits,
            } => write!(
                f,
                "!DIDerivedType(tag: DW_TAG_pointer_type, baseType: {}, size: {}, align: {})",
                opt(pointee),
                size_bits,
                align_bits
            ),
            MdNode::ReferenceType { base } => write!(
                f,
                "!DIDerivedType(tag: DW_TAG_reference_type, baseType: {})",
                opt(base)
            ),
            MdNode::Unspecified { name } => {
                write!(f, "!DIBasicType(tag: DW_TAG_unspecified_type, name: {:?})", name)
            }
            MdNode::Member {
                name,
                file,
                line,
                size_bits,
                align_bits,
                offset_bits,
                flags: fl,
                base,
            } => write!(
                f,
                "!DIDerivedType(tag: DW_TAG_member, name: {:?}, file: {}, line: {}, baseType: {}, size: {}, align: {}, offset: {}, flags: {})",
                name,
                file,
                line,
                opt(base),
                size_bits,
                align_bits,
                offset_bits,
                flags(fl)
            ),
            MdNode::Composite {
                tag,
                name,
                file,
                line,
                size_bits,
                align_bits,
                flags: fl,
                derived_from,
                elements,
                identifier,
            } => write!(
                f,
                "!DICompositeType(tag: {}, name: {:?}, file: {}, line: {}, size: {}, align: {}, flags: {}, baseType: {}, elements: !{{{}}}, identifier: {:?})",
                match tag {
                    CompositeTag::Struct => "DW_TAG_structure_type",
                    CompositeTag::Class => "DW_TAG_class_type",
                },
                name,
                file,
                line,
                size_bits,
                align_bits,
                flags(fl),
                opt(derived_from),
                join(elements, ", "),
                identifier
            ),
            MdNode::Array {
                size_bits,
                align_bits,
                elem,
                subscripts,
                vector,
            } => write!(
                f,
                "!DICompositeType(tag: DW_TAG_array_type, baseType: {}, size: {}, align: {}, elements: !{{{}}}{})",
                opt(elem),
                size_bits,
                align_bits,
                join(subscripts, ", "),
                if *vector { ", flags: DIFlagVector" } else { "" }
            ),
            MdNode::Subrange { count } => write!(f, "!DISubrange(count: {})", count),
            MdNode::Enumeration {
                name,
                file,
                line,
                size_bits,
                align_bits,
                base,
                elements,
            } => write!(
                f,
                "!DICompositeType(tag: DW_TAG_enumeration_type, name: {:?}, file: {}, line: {}, baseType: {}, size: {}, align: {}, elements: !{{{}}})",
                name,
                file,
                line,
                opt(base),
                size_bits,
                align_bits,
                join(elements, ", ")
            ),
            MdNode::Enumerator { name, value } => {
                write!(f, "!DIEnumerator(name: {:?}, value: {})", name, value)
            }
            MdNode::SubroutineType { types } => write!(
                f,
                "!DISubroutineType(types: !{{{}}})",
                map_join(types, ", ", opt)
            ),
            MdNode::Subprogram {
                name,
                linkage_name,
                scope,
                file,
                line,
                ty,
                local_to_unit,
                definition,
                scope_line,
                flags: fl,
                optimized,
            } => write!(
                f,
                "distinct !DISubprogram(name: {:?}, linkageName: {:?}, scope: {}, file: {}, line: {}, type: {}, isLocal: {}, isDefinition: {}, scopeLine: {}, flags: {}, isOptimized: {})",
                name,
                linkage_name,
                scope,
                file,
                line,
                ty,
                local_to_unit,
                definition,
                scope_line,
                flags(fl),
                optimized
            ),
            MdNode::LexicalBlock {
                scope,
                file,
                line,
                col,
            } => write!(
                f,
                "distinct !DILexicalBlock(scope: {}, file: {}, line: {}, column: {})",
                scope, file, line, col
            ),
            MdNode::LocalVariable {
                kind,
                scope,
                name,
                file,
                line,
                ty,
                flags: fl,
            } => {
                write!(f, "!DILocalVariable(name: {:?}, ", name)?;
                if let VarKind::Arg(n) = kind {
                    write!(f, "arg: {}, ", n)?;
                }
                write!(
                    f,
                    "scope: {}, file: {}, line: {}, type: {}, flags: {})",
                    scope,
                    file,
                    line,
                    opt(ty),
                    flags(fl)
                )
            }
            MdNode::GlobalVariable {
                name,
                linkage_name,
                scope,
                file,
                line,
                ty,
                local_to_unit,
            } => write!(
                f,
                "distinct !DIGlobalVariable(name: {:?}, linkageName: {:?}, scope: {}, file: {}, line: {}, type: {}, isLocal: {}, isDefinition: true)",
                name,
                linkage_name,
                scope,
                file,
                line,
                opt(ty),
                local_to_unit
            ),
            MdNode::Temporary {
                tag,
                name,
                file,
                line,
            } => write!(
                f,
                "!DICompositeType(tag: {}, name: {:?}, file: {}, line: {}, flags: DIFlagFwdDecl)",
                match tag {
                    CompositeTag::Struct => "DW_TAG_structure_type",
                    CompositeTag::Class => "DW_TAG_class_type",
                },
                name,
                file,
                line
            ),
        }
    }
}

impl fmt::Display for DebugLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "!DILocation(line: {}, column: {}, scope: {})",
            self.line, self.col, self.scope
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporaries_are_replaced_in_place() {
        let mut md = Metadata::new();
        let file = md.push(MdNode::File {
            name: str!("a.d"),
            dir: str!("/src"),
        });
        let tmp = md.push(MdNode::Temporary {
            tag: CompositeTag::Struct,
            name: str!("S"),
            file,
            line: 1,
        });
        let ptr = md.push(MdNode::PointerType {
            pointee: Some(tmp),
            size_bits: 64,
            align_bits: 64,
        });
        md.replace_temporary(
            tmp,
            MdNode::Composite {
                tag: CompositeTag::Struct,
                name: str!("S"),
                file,
                line: 1,
                size_bits: 64,
                align_bits: 64,
                flags: DIFlags::empty(),
                derived_from: None,
                elements: vec![],
                identifier: str!("S4test1S"),
            },
        );
        assert_eq!(md.len(), 3);
        assert!(matches!(md.get(tmp), MdNode::Composite { .. }));
        assert!(matches!(md.get(ptr), MdNode::PointerType { pointee: Some(p), .. } if *p == tmp));
    }

    #[test]
    #[should_panic(expected = "COMPILER BUG")]
    fn replacing_a_final_node_is_a_bug() {
        let mut md = Metadata::new();
        let id = md.push(MdNode::Subrange { count: 3 });
        md.replace_temporary(id, MdNode::Subrange { count: 4 });
    }

    #[test]
    fn visibility_flags_print_by_name() {
        assert_eq!(flags(&(DIFlags::PROTECTED | DIFlags::PROTOTYPED)), "DIFlagProtected | DIFlagPrototyped");
        assert_eq!(flags(&DIFlags::PUBLIC), "DIFlagPublic");
    }
}
