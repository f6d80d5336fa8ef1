//! The clause tree `translate` produces and `serialize` walks (`spec.md`
//! §4.4-§4.5). Grounded on `examples/PRQL-prql/prqlc/prqlc/src/sql/pq/ast.rs`'s
//! `SqlTransform`/`SqlQuery` shape: a closed Rust `enum` whose variants name
//! the lexical SQL constructs `spec.md` §4.4 lists (`SELECT`, `FROM`, `JOIN`,
//! `WHERE`, `GROUP`, `HAVING`, `ORDER`, `LIMIT`, `UNION`, `WITH`, `VALUES`,
//! `CASE`, `AGG`, `FUN`, `OP`, `ID`, `LIT`, `VAR`, `NOTE`, `KW`, `AS`,
//! `PARTITION`, `WINDOW`, `SORT`, `FRAME`), not a per-type registry.
//!
//! Unlike the annotated IR (which is addressed by `BoxId` into an arena),
//! the clause tree is a plain owned tree: by the time `translate` runs there
//! is no more cyclic structure to represent (a `Knot` becomes one `UNION
//! ALL` clause registered under a CTE alias), so ordinary `Box<Clause>`
//! ownership is sufficient.

use crate::node::symbol::Symbol;
use crate::node::value::Value;
use crate::node::{Frame, NullsOrder, SortDir};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOp {
    UnionAll,
}

/// `PARTITION BY ... ORDER BY ... frame`, inlined into an `AGG`'s `OVER (...)`
/// rather than emitted as a separately-named top-level `WINDOW` clause — both
/// render identical result sets; see DESIGN.md.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct WindowSpec {
    pub partition_by: Vec<Clause>,
    pub order_by: Vec<Clause>,
    pub frame: Option<Frame>,
}

impl WindowSpec {
    pub fn is_empty(&self) -> bool {
        self.partition_by.is_empty() && self.order_by.is_empty() && self.frame.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopStyle {
    /// `SELECT TOP n`.
    Top,
    /// `SELECT TOP n WITH TIES` — reserved for dialects that distinguish the
    /// two; currently unused since `spec.md`'s three canonical dialects all
    /// express "top n" via `LIMIT`/`FETCH`, not `TOP` (`limit_style`
    /// handles that branch in `serialize`). Kept so a future `TOP`-style
    /// dialect doesn't require reshaping the clause tree.
    TopWithTies,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CteDef {
    pub name: Symbol,
    pub columns: Vec<Symbol>,
    pub body: Box<Clause>,
    pub materialized: Option<bool>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FromBody {
    Table {
        schema: Option<Symbol>,
        name: Symbol,
    },
    /// `FROM cte_name AS alias` — resolved against the emitted/pending CTE
    /// table, not re-inlined.
    Cte(Symbol),
    Values {
        columns: Vec<Symbol>,
        rows: Vec<Vec<Clause>>,
        row_constructor: Option<String>,
    },
    /// A zero-column, one-row source (`spec.md` §3 `FromNothing`); dialects
    /// without a bare `FROM` substitute emit `(SELECT 1) AS alias` — see
    /// `serialize`.
    Nothing,
    /// A fully nested subquery, e.g. the right side of a non-bare `JOIN`.
    Subquery(Box<Clause>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectBody {
    pub distinct: bool,
    pub top: Option<(u64, TopStyle)>,
    /// Select-list, in emission order; the alias is what downstream boxes
    /// address this column by.
    pub columns: Vec<(Symbol, Clause)>,
    pub from: Option<Box<Clause>>,
    pub where_: Option<Box<Clause>>,
    pub group_by: Vec<Clause>,
    pub having: Option<Box<Clause>>,
    pub order_by: Vec<Clause>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectBody {
    pub fn bare(from: Clause) -> Self {
        SelectBody {
            distinct: false,
            top: None,
            columns: Vec::new(),
            from: Some(Box::new(from)),
            where_: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Clause {
    // --- scalar ---
    Lit(Value),
    Var(Symbol),
    /// A column reference, qualified by the alias it was assembled under.
    Id { table: Option<Symbol>, column: Symbol },
    Fun { name: Symbol, args: Vec<Clause> },
    Op { name: Symbol, args: Vec<Clause> },
    Agg {
        name: Symbol,
        args: Vec<Clause>,
        distinct: bool,
        filter: Option<Box<Clause>>,
        over: Option<WindowSpec>,
    },
    Case {
        branches: Vec<(Clause, Clause)>,
        else_: Option<Box<Clause>>,
    },
    Sort {
        value: Box<Clause>,
        dir: SortDir,
        nulls: Option<NullsOrder>,
    },
    /// `value AS alias` — used both for select-list aliasing and table
    /// aliasing (`FROM ... AS alias`).
    As { value: Box<Clause>, name: Symbol },
    /// A bare keyword/literal passthrough (`TRUE`, `CURRENT_DATE`, the
    /// dialect's `(1=1)` boolean-literal substitute).
    Kw(&'static str),
    Note(String),

    // --- tabular ---
    From { body: FromBody, alias: Symbol },
    Join {
        left: Box<Clause>,
        right: Box<Clause>,
        on: Box<Clause>,
        kind: JoinKind,
        lateral: bool,
    },
    Select(SelectBody),
    Union { op: SetOp, args: Vec<Clause> },
    With {
        ctes: Vec<CteDef>,
        recursive: bool,
        body: Box<Clause>,
    },
}

impl Clause {
    pub fn id(table: impl Into<Symbol>, column: impl Into<Symbol>) -> Clause {
        Clause::Id {
            table: Some(table.into()),
            column: column.into(),
        }
    }

    pub fn unqualified_id(column: impl Into<Symbol>) -> Clause {
        Clause::Id { table: None, column: column.into() }
    }
}
