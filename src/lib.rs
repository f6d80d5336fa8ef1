//! FunSQL: construct SQL queries as composable algebraic expressions and
//! compile them, through a fixed five-pass pipeline, to dialect-specific SQL
//! text (`spec.md` §1).
//!
//! A query is built as a tree of [`node::SQLNode`]s (tabular operations
//! chained via an explicit `over` predecessor) and compiled with [`render`]
//! or [`render_clause`]. The pipeline — `annotate`, `resolve`, `link`,
//! `translate`, `serialize` — is implemented in [`passes`]; see that
//! module's doc comment and `DESIGN.md` for the grounding behind each
//! pass's design.

pub mod clause;
pub mod dialect;
pub mod error;
pub mod ir;
pub mod node;
pub mod passes;

pub use clause::Clause;
pub use dialect::SQLDialect;
pub use error::{Error, ErrorKind, Result};
pub use ir::{AnnotateContext, BoxId};
pub use node::{SQLCatalog, SQLNode};
pub use passes::{SQLString, TranslateContext};

/// How far through the pipeline [`render`] should run (`spec.md` §6,
/// `render(node, depth = Serialize, ...)`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Depth {
    Annotated,
    Resolved,
    Linked,
    Translated,
    #[default]
    Serialized,
}

/// The IR produced by [`render`] at the requested [`Depth`].
#[derive(Debug)]
pub enum RenderOutput {
    /// After `Annotate`, `Resolve`, or `Link` — all three share this shape,
    /// differing only in how many of the box arena's fields are populated.
    Annotated { actx: AnnotateContext, root: BoxId },
    Translated { clause: Clause, tctx: TranslateContext },
    Serialized(SQLString),
}

impl RenderOutput {
    pub fn into_serialized(self) -> Option<SQLString> {
        match self {
            RenderOutput::Serialized(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_clause(self) -> Option<Clause> {
        match self {
            RenderOutput::Translated { clause, .. } => Some(clause),
            _ => None,
        }
    }
}

/// Runs the pipeline over `node` up to `depth`, against `dialect` (consulted
/// only by the `Translated`/`Serialized` depths) and `catalog` (reserved for
/// schema cross-checks a future pass may add; unused by the current passes
/// since every `From` node already carries its own resolved [`node::SQLTable`]
/// — see DESIGN.md).
///
/// `spec.md` §6's public entry point.
pub fn render(
    node: &SQLNode,
    depth: Depth,
    dialect: &SQLDialect,
    _catalog: &SQLCatalog,
) -> Result<RenderOutput> {
    let mut actx = AnnotateContext::new();
    let root = passes::annotate(node, &mut actx)?;
    if depth == Depth::Annotated {
        return Ok(RenderOutput::Annotated { actx, root });
    }

    passes::resolve(root, &mut actx)?;
    if depth == Depth::Resolved {
        return Ok(RenderOutput::Annotated { actx, root });
    }

    passes::link(root, &mut actx)?;
    if depth == Depth::Linked {
        return Ok(RenderOutput::Annotated { actx, root });
    }

    let (clause, tctx) = passes::translate(&actx, root)?;
    if depth == Depth::Translated {
        return Ok(RenderOutput::Translated { clause, tctx });
    }

    Ok(RenderOutput::Serialized(passes::serialize(&clause, dialect)))
}

/// Serializes a pre-built clause tree (`spec.md` §6 `render_clause`),
/// skipping the first four passes entirely.
pub fn render_clause(clause: &Clause, dialect: &SQLDialect) -> SQLString {
    passes::serialize(clause, dialect)
}
