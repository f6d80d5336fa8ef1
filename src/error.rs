//! Error taxonomy (`spec.md` §7). Grounded on
//! `examples/PRQL-prql/prqlc/prqlc-parser/src/error/mod.rs`'s
//! `Error { kind, span, reason, hints, code }` / `Errors(Vec<Error>)` /
//! `WithErrorInfo` shape. FunSQL has no source text or lexical span (parsing
//! is out of scope, `spec.md` §1), so `span: Option<Span>` is replaced with
//! `path: Path` — the chain of node labels `spec.md` §7 requires every
//! diagnostic to carry — and the open `Reason` enum becomes the closed
//! eleven-entry `ErrorKind` taxonomy.

use std::fmt;

use strum_macros::{Display as StrumDisplay, EnumDiscriminants};

use crate::ir::handle::Handle;
use crate::node::symbol::Symbol;

/// The chain of original-tree node labels from the root down to the node
/// where an error was detected, used for diagnostic breadcrumbs in place of
/// a source span.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Path(pub Vec<Symbol>);

impl Path {
    pub fn root() -> Self {
        Path(Vec::new())
    }

    pub fn push(&self, label: Symbol) -> Path {
        let mut labels = self.0.clone();
        labels.push(label);
        Path(labels)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" >> ")?;
            }
            write!(f, "{label}")?;
        }
        Ok(())
    }
}

/// `spec.md` §7's closed eleven-entry taxonomy (plus `AmbiguousAgg`). The
/// `EnumDiscriminants` derive mints a fieldless sibling, `ErrorCode`, whose
/// `strum::Display` gives each kind the kebab-case machine-readable code
/// `prqlc`'s `Error::code` plays the same role for.
#[derive(Clone, Debug, PartialEq, EnumDiscriminants)]
#[strum_discriminants(name(ErrorCode))]
#[strum_discriminants(derive(StrumDisplay))]
#[strum_discriminants(strum(serialize_all = "kebab-case"))]
pub enum ErrorKind {
    DuplicateLabel { label: Symbol },
    IllFormed,
    UndefinedTableRef { name: Symbol },
    InvalidTableRef { name: Symbol },
    UndefinedName { name: Symbol },
    AmbiguousName { name: Symbol },
    UndefinedHandle { handle: Handle },
    AmbiguousHandle { handle: Handle },
    UnexpectedRowType { name: Symbol },
    UnexpectedScalarType { name: Symbol },
    UnexpectedAgg,
    AmbiguousAgg,
}

impl ErrorKind {
    /// Machine-readable identifier, analogous to `prqlc`'s `Error::code`.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::from(self)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::DuplicateLabel { label } => {
                write!(f, "duplicate label `{label}`")
            }
            ErrorKind::IllFormed => write!(f, "node is ill-formed in tabular position"),
            ErrorKind::UndefinedTableRef { name } => {
                write!(f, "`{name}` is neither a CTE nor a catalog table")
            }
            ErrorKind::InvalidTableRef { name } => {
                write!(f, "`{name}` does not expose a row type of that name")
            }
            ErrorKind::UndefinedName { name } => {
                write!(f, "`{name}` is not a scalar field of the current row type")
            }
            ErrorKind::AmbiguousName { name } => write!(f, "`{name}` resolves ambiguously"),
            ErrorKind::UndefinedHandle { handle } => {
                write!(f, "handle {handle:?} is not present in the current handle map")
            }
            ErrorKind::AmbiguousHandle { handle } => {
                write!(f, "handle {handle:?} maps ambiguously")
            }
            ErrorKind::UnexpectedRowType { name } => {
                write!(f, "`{name}` targets a nested row, not a scalar")
            }
            ErrorKind::UnexpectedScalarType { name } => {
                write!(f, "`{name}` is scalar mid-chain, expected a row")
            }
            ErrorKind::UnexpectedAgg => write!(f, "aggregate outside a Group/Partition"),
            ErrorKind::AmbiguousAgg => write!(f, "aggregate in an ambiguous grouping context"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub path: Path,
    pub hints: Vec<String>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error {
            kind,
            path: Path::root(),
            hints: Vec::new(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} (at {})", self.kind.code(), self.kind, self.path)?;
        for hint in &self.hints {
            write!(f, "\n  hint: {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Errors(pub Vec<Error>);

impl From<Error> for Errors {
    fn from(e: Error) -> Self {
        Errors(vec![e])
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Errors {}

pub trait WithErrorInfo: Sized {
    fn with_path(self, path: Path) -> Self;
    fn push_hint(self, hint: impl Into<String>) -> Self;
}

impl WithErrorInfo for Error {
    fn with_path(mut self, path: Path) -> Self {
        self.path = path;
        self
    }

    fn push_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }
}

impl<T> WithErrorInfo for Result<T> {
    fn with_path(self, path: Path) -> Self {
        self.map_err(|e| e.with_path(path))
    }

    fn push_hint(self, hint: impl Into<String>) -> Self {
        self.map_err(|e| e.push_hint(hint))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
