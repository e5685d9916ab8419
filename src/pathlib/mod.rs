use std::env;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
pub struct FilePath {
    buf: PathBuf,
}

impl FilePath {
    pub fn is_absolute(&self) -> bool {
        self.buf.is_absolute()
    }

    /// Returns the final component of the `FilePath`, or an empty string if
    /// the path terminates in `..`.
    pub fn file_name(&self) -> String {
        self.buf
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Returns the path without its final component.
    pub fn parent(&self) -> FilePath {
        FilePath {
            buf: self
                .buf
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        }
    }

    /// Makes the path absolute against the working directory and folds `.`
    /// and `..` components lexically. The filesystem is never consulted
    /// beyond reading the working directory.
    pub fn absolute(&self) -> FilePath {
        let joined = if self.is_absolute() {
            self.buf.clone()
        } else {
            match env::current_dir() {
                Ok(cwd) => cwd.join(&self.buf),
                Err(_) => self.buf.clone(),
            }
        };

        let mut buf = PathBuf::new();
        for c in joined.components() {
            match c {
                Component::CurDir => {}
                Component::ParentDir => {
                    buf.pop();
                }
                c => buf.push(c.as_os_str()),
            }
        }
        FilePath { buf }
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.buf.display())
    }
}

impl<T: Into<PathBuf>> From<T> for FilePath {
    fn from(s: T) -> FilePath {
        FilePath { buf: s.into() }
    }
}

impl FromStr for FilePath {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<FilePath, &'static str> {
        Ok(FilePath { buf: s.into() })
    }
}

impl AsRef<Path> for FilePath {
    fn as_ref(&self) -> &Path {
        self.buf.as_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_folds_dot_components() {
        let p = FilePath::from("/src/./pkg/../mod/a.d").absolute();
        assert_eq!(p.to_string(), "/src/mod/a.d");
        assert_eq!(p.file_name(), "a.d");
        assert_eq!(p.parent().to_string(), "/src/mod");
    }

    #[test]
    fn relative_paths_become_absolute() {
        let p = FilePath::from("a.d").absolute();
        assert!(p.is_absolute());
        assert_eq!(p.file_name(), "a.d");
    }
}
