//! Dense integer identifiers used across the annotated IR. Grounded directly
//! on `examples/PRQL-prql/prql-compiler/src/ast/rq/ids.rs`'s `CId`/`TId`
//! newtype-over-`usize` pattern (custom `Debug`, `From<usize>`, `Ord`), which
//! is the idiomatic Rust substitute for Python's `id(obj)`-based handle table
//! (`spec.md` §3, "Annotated tree" / Glossary "Handle").

use std::fmt;

/// A node reached via `annotate`'s handle table: dense integer assigned to
/// every node used as the target of a bound reference (`HandleBound`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(usize);

impl Handle {
    pub fn get(&self) -> usize {
        self.0
    }
}

impl From<usize> for Handle {
    fn from(id: usize) -> Self {
        Handle(id)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

/// Identifies a `Box` within an `AnnotateContext`'s arena. The `Knot`↔`Box`
/// cycle `spec.md` §9 flags is represented as a cycle of `BoxId`s into that
/// arena rather than a cycle of pointers/`Rc`s.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoxId(usize);

impl From<usize> for BoxId {
    fn from(id: usize) -> Self {
        BoxId(id)
    }
}

impl BoxId {
    pub fn get(&self) -> usize {
        self.0
    }
}

impl fmt::Debug for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "box-{}", self.0)
    }
}
