//! The user-facing node tree (`spec.md` §3). A `SQLNode` is a cheap-clone
//! handle (`Rc`-backed, like `prqlc::ir::pl::Expr`'s structural-sharing
//! story) onto a closed `SQLNodeKind` tagged union — the representation
//! `spec.md` §9 recommends over the source's `singledispatch` registry.
//!
//! Nodes are immutable once built: unlike the Python source (which attaches
//! `highlight`/other attributes directly to shared node objects, see
//! `spec.md` §5), `annotate` never mutates a `SQLNode` — it only reads the
//! tree while building a fresh, separately-owned `Box` arena. This makes
//! sharing a `SQLNode` across compilations safe by construction; see
//! DESIGN.md for the `spec.md` §5 discussion this relaxes.

pub mod build;
pub mod catalog;
pub mod symbol;
pub mod value;

use std::rc::Rc;

use crate::error::{Error, ErrorKind, Result};
use crate::node::catalog::ValuesTable;
use crate::node::symbol::Symbol;
use crate::node::value::Value;

pub use catalog::{SQLCatalog, SQLTable};
pub use symbol::{s, Symbol as Sym};
pub use value::Value as Lit;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FromSource {
    Table(SQLTable),
    /// References a CTE introduced by an enclosing `With`/`WithExternal`/
    /// `Iterate`, resolved against the annotate-time CTE stack.
    Reference(Symbol),
    Values(ValuesTable),
    Nothing,
}

/// Maps each arg's label to its index, built by [`LabelMap::build`] and
/// required to be duplicate-free (`spec.md` §3 invariant 1).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LabelMap(Vec<(Symbol, usize)>);

impl LabelMap {
    pub fn build(args: &[SQLNode]) -> Result<LabelMap> {
        let mut map = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let label = arg.label();
            if map.iter().any(|(l, _): &(Symbol, usize)| *l == label) {
                return Err(Error::new(ErrorKind::DuplicateLabel { label }));
            }
            map.push((label, i));
        }
        Ok(LabelMap(map))
    }

    pub fn get(&self, label: &Symbol) -> Option<usize> {
        self.0.iter().find(|(l, _)| l == label).map(|(_, i)| *i)
    }

    pub fn contains(&self, label: &Symbol) -> bool {
        self.get(label).is_some()
    }

    pub fn labels(&self) -> impl Iterator<Item = &Symbol> {
        self.0.iter().map(|(l, _)| l)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `ROWS`/`RANGE` window frame attached to a `Partition` node.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub mode: FrameMode,
    pub start: FrameBound,
    pub end: FrameBound,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameMode {
    Rows,
    Range,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(i64),
    CurrentRow,
    Following(i64),
    UnboundedFollowing,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SQLNodeKind {
    // --- tabular-position nodes ---
    From(FromSource),
    Select {
        over: SQLNode,
        args: Vec<SQLNode>,
        label_map: LabelMap,
    },
    Where {
        over: SQLNode,
        cond: SQLNode,
    },
    Join {
        over: SQLNode,
        joinee: SQLNode,
        on: SQLNode,
        left: bool,
        right: bool,
        skip: bool,
        lateral: bool,
    },
    Group {
        over: SQLNode,
        by: Vec<SQLNode>,
        label_map: LabelMap,
    },
    Partition {
        over: SQLNode,
        by: Vec<SQLNode>,
        order_by: Vec<SQLNode>,
        frame: Option<Frame>,
    },
    Order {
        over: SQLNode,
        by: Vec<SQLNode>,
    },
    Limit {
        over: SQLNode,
        limit: Option<u64>,
        offset: Option<u64>,
    },
    Append {
        over: SQLNode,
        args: Vec<SQLNode>,
    },
    Define {
        over: SQLNode,
        args: Vec<SQLNode>,
        label_map: LabelMap,
    },
    /// Recursive CTE: `iterator` is re-evaluated against `over` (the seed)
    /// until it stops producing new rows (`spec.md` §3, §4.1 `Iterate`).
    Iterate {
        over: SQLNode,
        iterator: SQLNode,
    },
    With {
        over: SQLNode,
        args: Vec<SQLNode>,
        label_map: LabelMap,
        materialized: Option<bool>,
    },
    WithExternal {
        over: SQLNode,
        args: Vec<SQLNode>,
        label_map: LabelMap,
        schema: Option<Symbol>,
    },
    /// Dual-purpose node: in tabular position it wraps a namespace
    /// (`spec.md` §3's `As(name)` tabular variant); in scalar position it
    /// renames a column. Both share this one shape.
    As {
        over: SQLNode,
        name: Symbol,
    },
    /// Despite being listed among the scalar node kinds in `spec.md` §3,
    /// `Bind` box-wraps a tabular predecessor exactly like `As` — every
    /// later section (§4.1's `IntBind`, §4.2's resolve rule, §4.3's link
    /// rule, §4.4's translate rule) treats it as box-producing. Resolved in
    /// DESIGN.md's Open Questions as a tabular-position node here.
    Bind {
        over: SQLNode,
        args: Vec<SQLNode>,
        label_map: LabelMap,
    },

    // --- scalar-position nodes ---
    Lit(Value),
    Var(Symbol),
    /// Column reference. `over`, when present, qualifies the name (e.g.
    /// `Get(over=Get("visit"), name="person_id")` for `Get.visit.person_id`).
    Get {
        over: Option<SQLNode>,
        name: Symbol,
    },
    Fun {
        name: Symbol,
        args: Vec<SQLNode>,
    },
    Agg {
        over: Option<SQLNode>,
        name: Symbol,
        args: Vec<SQLNode>,
        distinct: bool,
        filter: Option<SQLNode>,
    },
    Sort {
        over: SQLNode,
        dir: SortDir,
        nulls: Option<NullsOrder>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SQLNode(Rc<SQLNodeKind>);

impl SQLNode {
    pub fn new(kind: SQLNodeKind) -> SQLNode {
        SQLNode(Rc::new(kind))
    }

    pub fn kind(&self) -> &SQLNodeKind {
        &self.0
    }

    /// Identity, for use as a `PathMap`/handle-table key — two clones of the
    /// same `SQLNode` compare equal even though `SQLNodeKind` is only
    /// structurally `PartialEq`.
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn is_same(&self, other: &SQLNode) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// The node's predecessor in the chain it participates in, if any
    /// (`spec.md` §3, "Each node has an optional `over` field").
    pub fn over(&self) -> Option<&SQLNode> {
        use SQLNodeKind::*;
        match self.kind() {
            From(_) | Lit(_) | Var(_) | Fun { .. } => None,
            Select { over, .. }
            | Where { over, .. }
            | Join { over, .. }
            | Group { over, .. }
            | Partition { over, .. }
            | Order { over, .. }
            | Limit { over, .. }
            | Append { over, .. }
            | Define { over, .. }
            | Iterate { over, .. }
            | With { over, .. }
            | WithExternal { over, .. }
            | As { over, .. }
            | Bind { over, .. }
            | Sort { over, .. } => Some(over),
            Get { over, .. } => over.as_ref(),
            Agg { over, .. } => over.as_ref(),
        }
    }

    /// Node labeling (`spec.md` §3, "Node labeling").
    pub fn label(&self) -> Symbol {
        use SQLNodeKind::*;
        match self.kind() {
            Agg { name, .. } | Fun { name, .. } | Get { name, .. } => name.clone(),
            As { name, .. } => name.clone(),
            From(FromSource::Table(t)) => t.name.clone(),
            From(FromSource::Reference(name)) => name.clone(),
            From(FromSource::Values(_)) => Symbol::new("values"),
            From(FromSource::Nothing) => Symbol::new("_"),
            Append { over, args } => {
                let base = over.label();
                if args.iter().all(|a| a.label() == base) {
                    base
                } else {
                    Symbol::new("union")
                }
            }
            _ => self
                .over()
                .map(|o| o.label())
                .unwrap_or_else(|| Symbol::new("_")),
        }
    }

    /// Whether this node is valid in a tabular position for `annotate`'s
    /// ill-formed check (`spec.md` §4.1): tabular nodes, plus `As`/`Bind`
    /// which both legitimately box-wrap a predecessor.
    pub fn is_tabular_position_ok(&self) -> bool {
        use SQLNodeKind::*;
        matches!(
            self.kind(),
            From(_)
                | Select { .. }
                | Where { .. }
                | Join { .. }
                | Group { .. }
                | Partition { .. }
                | Order { .. }
                | Limit { .. }
                | Append { .. }
                | Define { .. }
                | Iterate { .. }
                | With { .. }
                | WithExternal { .. }
                | As { .. }
                | Bind { .. }
        )
    }
}
