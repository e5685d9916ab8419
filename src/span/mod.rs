use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pathlib::FilePath;

/// A source location as handed over by the frontend. Lines and columns are
/// 1-based; line 0 means the location is unknown.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Loc {
    pub filename: FilePath,
    pub line: u32,
    pub col: u32,
}

impl Loc {
    pub fn new(filename: FilePath, line: u32, col: u32) -> Loc {
        Loc {
            filename,
            line,
            col,
        }
    }

    pub fn unknown() -> Loc {
        Loc::default()
    }

    pub fn is_unknown(&self) -> bool {
        self.line == 0
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.col != 0 {
            write!(f, "{}:{}:{}", self.filename, self.line, self.col)
        } else {
            write!(f, "{}:{}", self.filename, self.line)
        }
    }
}
