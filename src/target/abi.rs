use super::{CallConv, Target};
use crate::ast::Linkage;

/// How the `real` floating point type is stored on a target.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RealRepr {
    /// x87 80-bit extended precision, padded to `size` bytes.
    X87 { size: u64, align: u64 },
    Double,
}

/// Target quirks resolved once per compilation. Lowering and debug info
/// consult these flags instead of testing the target directly.
#[derive(Clone, Debug)]
pub struct AbiPolicy {
    pub target: Target,
    pub ptr_size: u64,
    pub real: RealRepr,
    /// `DW_ATE_UTF` is understood by the debugger.
    pub utf_char_encoding: bool,
    /// `DW_ATE_signed_char`/`DW_ATE_unsigned_char` for 8-bit integers.
    pub char_byte_encoding: bool,
    pub imaginary_encoding: bool,
    pub complex_encoding: bool,
    pub emit_codeview: bool,
}

impl AbiPolicy {
    pub fn for_target(target: Target) -> AbiPolicy {
        let msvc = target.is_msvc();
        let real = if target.is_x86_64() && !msvc {
            RealRepr::X87 { size: 16, align: 16 }
        } else if target.is_x86() && !msvc {
            RealRepr::X87 { size: 12, align: 4 }
        } else {
            RealRepr::Double
        };

        AbiPolicy {
            target,
            ptr_size: target.ptr_size(),
            real,
            utf_char_encoding: !msvc,
            char_byte_encoding: !msvc,
            imaginary_encoding: !msvc,
            complex_encoding: !msvc,
            emit_codeview: msvc,
        }
    }

    pub fn ptr_bits(&self) -> u64 {
        self.ptr_size * 8
    }

    /// Maps a declared linkage to the convention put on calls and definitions.
    pub fn calling_conv(&self, linkage: Linkage) -> CallConv {
        match linkage {
            Linkage::C | Linkage::Cpp => CallConv::C,
            Linkage::D if self.target.is_x86() => {
                if self.target.is_windows() {
                    CallConv::C
                } else {
                    CallConv::X86Std
                }
            }
            Linkage::D => CallConv::Fast,
            Linkage::Windows | Linkage::Pascal if self.target.is_x86() => CallConv::X86Std,
            Linkage::Windows | Linkage::Pascal => CallConv::C,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msvc_disables_debugger_encodings() {
        let abi = AbiPolicy::for_target(Target::X86_64WindowsMsvc);
        assert!(!abi.imaginary_encoding);
        assert!(!abi.complex_encoding);
        assert!(!abi.utf_char_encoding);
        assert!(abi.emit_codeview);
        assert_eq!(abi.real, RealRepr::Double);

        let abi = AbiPolicy::for_target(Target::X86_64Linux);
        assert!(abi.imaginary_encoding && abi.complex_encoding && !abi.emit_codeview);
        assert_eq!(abi.real, RealRepr::X87 { size: 16, align: 16 });
    }

    #[test]
    fn d_linkage_convention_depends_on_architecture() {
        let x64 = AbiPolicy::for_target(Target::X86_64Linux);
        assert_eq!(x64.calling_conv(Linkage::D), CallConv::Fast);
        assert_eq!(x64.calling_conv(Linkage::C), CallConv::C);

        let x86 = AbiPolicy::for_target(Target::I686Linux);
        assert_eq!(x86.calling_conv(Linkage::D), CallConv::X86Std);
        assert_eq!(x86.calling_conv(Linkage::Windows), CallConv::X86Std);

        let win32 = AbiPolicy::for_target(Target::I686WindowsMsvc);
        assert_eq!(win32.calling_conv(Linkage::D), CallConv::C);
    }
}
