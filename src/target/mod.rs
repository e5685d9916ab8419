use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod abi;

pub use abi::{AbiPolicy, RealRepr};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Target {
    X86_64Linux,
    I686Linux,
    X86_64WindowsMsvc,
    I686WindowsMsvc,
    Aarch64Linux,
    Wasm32,
    Wasm32Wasi,
}

impl Target {
    #[allow(dead_code)]
    pub fn available() -> Vec<Target> {
        vec![
            Target::X86_64Linux,
            Target::I686Linux,
            Target::X86_64WindowsMsvc,
            Target::I686WindowsMsvc,
            Target::Aarch64Linux,
            Target::Wasm32,
            Target::Wasm32Wasi,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::X86_64Linux => "x86_64-unknown-linux-gnu",
            Target::I686Linux => "i686-unknown-linux-gnu",
            Target::X86_64WindowsMsvc => "x86_64-pc-windows-msvc",
            Target::I686WindowsMsvc => "i686-pc-windows-msvc",
            Target::Aarch64Linux => "aarch64-unknown-linux-gnu",
            Target::Wasm32 => "wasm32-unknown-unknown",
            Target::Wasm32Wasi => "wasm32-wasi",
        }
    }

    pub fn ptr_size(&self) -> u64 {
        match self {
            Target::X86_64Linux | Target::X86_64WindowsMsvc | Target::Aarch64Linux => 8,
            Target::I686Linux | Target::I686WindowsMsvc | Target::Wasm32 | Target::Wasm32Wasi => 4,
        }
    }

    pub fn is_msvc(&self) -> bool {
        matches!(self, Target::X86_64WindowsMsvc | Target::I686WindowsMsvc)
    }

    pub fn is_windows(&self) -> bool {
        self.is_msvc()
    }

    pub fn is_x86(&self) -> bool {
        matches!(self, Target::I686Linux | Target::I686WindowsMsvc)
    }

    pub fn is_wasm(&self) -> bool {
        matches!(self, Target::Wasm32 | Target::Wasm32Wasi)
    }

    pub fn is_x86_64(&self) -> bool {
        matches!(self, Target::X86_64Linux | Target::X86_64WindowsMsvc)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Target, Self::Err> {
        match s {
            "x86_64" | "x86_64-linux" | "x86_64-unknown-linux-gnu" => Ok(Target::X86_64Linux),
            "i686" | "x86" | "i686-linux" | "i686-unknown-linux-gnu" => Ok(Target::I686Linux),
            "x86_64-windows" | "x86_64-windows-msvc" | "x86_64-pc-windows-msvc" => {
                Ok(Target::X86_64WindowsMsvc)
            }
            "i686-windows" | "i686-windows-msvc" | "i686-pc-windows-msvc" => {
                Ok(Target::I686WindowsMsvc)
            }
            "aarch64" | "aarch64-linux" | "aarch64-unknown-linux-gnu" => Ok(Target::Aarch64Linux),
            "wasm" | "wasm32" | "wasm32-unknown-unknown" => Ok(Target::Wasm32),
            "wasi" | "wasm32-wasi" => Ok(Target::Wasm32Wasi),
            _ => Err(format!("{} is not a valid target", s)),
        }
    }
}

impl Default for Target {
    fn default() -> Target {
        Target::X86_64Linux
    }
}

/// Calling conventions the IR call instructions can carry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum CallConv {
    C,
    Fast,
    X86Std,
}

impl fmt::Display for CallConv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            CallConv::C => "ccc",
            CallConv::Fast => "fastcc",
            CallConv::X86Std => "x86_stdcallcc",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_triples_and_aliases() {
        assert_eq!("wasi".parse::<Target>(), Ok(Target::Wasm32Wasi));
        assert_eq!(
            "x86_64-pc-windows-msvc".parse::<Target>(),
            Ok(Target::X86_64WindowsMsvc)
        );
        assert!("sparc".parse::<Target>().is_err());
    }

    #[test]
    fn every_target_round_trips_through_its_triple() {
        for t in Target::available() {
            assert_eq!(t.as_str().parse::<Target>(), Ok(t));
        }
    }
}
