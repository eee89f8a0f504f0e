//! Error types for the compiler and build driver.
//!
//! Every category is fatal for the invocation: the driver never emits global
//! artifacts from a partial or inconsistent set of files.

use crate::ast::Loc;
use std::fmt;
use std::path::PathBuf;

/// A located message produced by a checking pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub loc: Loc,
    pub message: String,
}

impl Diagnostic {
    pub fn new(loc: Loc, message: impl Into<String>) -> Self {
        Diagnostic { loc, message: message.into() }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: error: {}", self.loc, self.message)
    }
}

/// One or more diagnostics, printed one per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    /// `Ok(())` when empty, the diagnostics otherwise.
    pub fn into_result(self) -> Result<(), Diagnostics> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.0.iter().any(|d| d.message.contains(needle))
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", d)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("{}: {message}", .file.display())]
    Syntax { file: PathBuf, message: String },
    #[error("{location}: can't locate include file `{file_name}` for `{name}`")]
    IncludeNotFound { location: Loc, name: String, file_name: String },
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{origin}: {message}")]
    Syntax { origin: String, message: String },
    #[error("{origin}:{line}: [{section}] {message}")]
    Entry {
        origin: String,
        line: usize,
        section: String,
        message: String,
    },
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Invocation-level failure.
#[derive(Debug, thiserror::Error)]
pub enum IpdlError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{}: type checking failed\n{errors}", .file.display())]
    Type { file: PathBuf, errors: Diagnostics },
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Sync message missing from the allow-list, or a malformed allow-list.
    #[error("sync message governance check failed\n{0}")]
    Governance(Diagnostics),
    #[error("consistency error: {0}")]
    Consistency(String),
    #[error("{}: code generation failed: {message}", .file.display())]
    Codegen { file: PathBuf, message: String },
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("worker pool: {0}")]
    Pool(String),
}

impl IpdlError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IpdlError::Io { path: path.into(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_display_one_per_line() {
        let d = Diagnostics(vec![
            Diagnostic::new(Loc::new("PFoo.ipdl", 3), "first"),
            Diagnostic::new(Loc::new("PFoo.ipdl", 7), "second"),
        ]);
        assert_eq!(d.to_string(), "PFoo.ipdl:3: error: first\nPFoo.ipdl:7: error: second");
        assert!(d.contains("second"));
        assert!(Diagnostics::default().into_result().is_ok());
    }
}
