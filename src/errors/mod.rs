use crate::span::Loc;

use colored::*;
use std::fmt;
use std::fs;
use std::io;

pub type LowerResult<T = ()> = Result<T, LowerError>;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum LowerErrorKind {
    Unsupported,
    Compile,
    Target,
    IO,
}

impl fmt::Display for LowerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                LowerErrorKind::Unsupported => "unsupported construct",
                LowerErrorKind::Compile => "compile error",
                LowerErrorKind::Target => "target error",
                LowerErrorKind::IO => "i/o error",
            }
        )
    }
}

#[derive(Clone, Debug)]
pub struct LowerError {
    pub msg: String,
    pub src: Vec<Loc>,
    pub kind: LowerErrorKind,
}

impl LowerError {
    pub fn new<S: Into<String>>(kind: LowerErrorKind, msg: S, loc: &Loc) -> LowerError {
        LowerError {
            msg: msg.into(),
            src: vec![loc.clone()],
            kind,
        }
    }

    /// A construct with no lowering rule. Compilation cannot continue past it.
    pub fn unsupported<S: Into<String>>(msg: S, loc: &Loc) -> LowerError {
        LowerError::new(LowerErrorKind::Unsupported, msg, loc)
    }

    pub fn compile<S: Into<String>>(msg: S, loc: &Loc) -> LowerError {
        LowerError::new(LowerErrorKind::Compile, msg, loc)
    }

    pub fn target<S: Into<String>>(msg: S, loc: &Loc) -> LowerError {
        LowerError::new(LowerErrorKind::Target, msg, loc)
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == LowerErrorKind::Unsupported
    }

    pub fn emit(self) {
        let kind = format!("{}:", self.kind);
        eprintln!("{} {}", kind.bold().red(), self.msg.bold());

        for loc in self.src {
            let arrow = "-->".bold();
            if loc.is_unknown() {
                eprintln!(" {} {}", arrow, loc.filename);
                continue;
            }

            eprintln!(" {} {}", arrow, loc);
            let line = fs::read_to_string(&loc.filename)
                .ok()
                .and_then(|buf| buf.lines().nth(loc.line as usize - 1).map(str::to_string));
            if let Some(line) = line {
                let lineno = loc.line.to_string();
                let spacing = " ".repeat(lineno.len() + 1);
                let pipe = "|".bold();
                eprintln!("{}{}", spacing, pipe);
                eprintln!("{} {} {}", lineno.bold(), pipe, line);
                let indent = " ".repeat(loc.col.saturating_sub(1) as usize);
                eprintln!("{}{} {}{}", spacing, pipe, indent, "^".bold().red());
            }
        }
        eprintln!()
    }
}

impl fmt::Display for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.msg)?;
        if let Some(loc) = self.src.first() {
            write!(f, " ({})", loc)?;
        }
        Ok(())
    }
}

impl From<LowerError> for Vec<LowerError> {
    fn from(err: LowerError) -> Vec<LowerError> {
        vec![err]
    }
}

impl From<io::Error> for LowerError {
    fn from(err: io::Error) -> LowerError {
        LowerError {
            msg: err.to_string(),
            src: vec![],
            kind: LowerErrorKind::IO,
        }
    }
}

impl From<bincode::Error> for LowerError {
    fn from(err: bincode::Error) -> LowerError {
        LowerError {
            msg: format!("could not decode module: {}", err),
            src: vec![],
            kind: LowerErrorKind::IO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathlib::FilePath;

    #[test]
    fn only_unsupported_constructs_are_fatal() {
        let loc = Loc::new(FilePath::from("a.d"), 3, 7);
        assert!(LowerError::unsupported("tuple expression", &loc).is_fatal());
        assert!(!LowerError::compile("not an lvalue", &loc).is_fatal());
        assert!(!LowerError::target("no varargs here", &loc).is_fatal());
    }

    #[test]
    fn display_includes_kind_and_location() {
        let loc = Loc::new(FilePath::from("a.d"), 3, 7);
        let err = LowerError::compile("not an lvalue", &loc);
        assert_eq!(err.to_string(), "compile error: not an lvalue (a.d:3:7)");
    }
}
