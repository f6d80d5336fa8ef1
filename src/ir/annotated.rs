//! The annotated tree `annotate` builds from a user `SQLNode` tree
//! (`spec.md` §3, "Annotated tree" / §4.1). Tabular nodes become `Box`es
//! addressed by `BoxId` in a flat, append-only arena (`AnnotateContext`);
//! scalar nodes become `Ref` trees hung off a box. This mirrors
//! `compiler/annotate.py`'s `Box`/`populate_dict` shape, but replaces its
//! `id(obj)`-keyed Python dict with a `BoxId`-indexed `Vec` arena — the
//! representation `spec.md` §9 flags as an open question for the `Knot`↔`Box`
//! cycle.

use std::collections::BTreeMap;

use crate::ir::handle::{BoxId, Handle};
use crate::ir::types::BoxType;
use crate::node::catalog::ValuesTable;
use crate::node::symbol::Symbol;
use crate::node::value::Value;
use crate::node::{Frame, NullsOrder, SQLTable, SortDir};

/// A scalar expression in the annotated tree. `Get`/`Agg` start out
/// unresolved (mirroring the user tree's shape) and `link` rewrites them in
/// place into `NameBound`/`HandleBound` once their target is known
/// (`spec.md` §4.3).
#[derive(Clone, Debug, PartialEq)]
pub enum Ref {
    Lit(Value),
    Var(Symbol),
    /// Not yet bound to a row-type field or handle; `over`, when present, is
    /// itself a `Ref` chain (e.g. `Get.visit.person_id`).
    Get {
        over: Option<Box<Ref>>,
        name: Symbol,
    },
    /// Resolved: `name` is a field of the row type reached by `over`, or of
    /// the current box's own row when `over` is `None`.
    NameBound { name: Symbol, over: Option<Box<Ref>> },
    /// Resolved: a recorded `Handle` gives the base box to navigate from,
    /// with `over` (when present) chaining further `Get`s past it.
    HandleBound { handle: Handle, over: Option<Box<Ref>> },
    Fun {
        name: Symbol,
        args: Vec<Ref>,
    },
    Agg {
        over: Option<Box<Ref>>,
        name: Symbol,
        args: Vec<Ref>,
        distinct: bool,
        filter: Option<Box<Ref>>,
    },
    Sort {
        over: Box<Ref>,
        dir: SortDir,
        nulls: Option<NullsOrder>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum BoxKind {
    FromNothing,
    FromTable(SQLTable),
    /// A reference to an enclosing CTE or `Knot`, resolved eagerly at
    /// annotate time against `AnnotateContext`'s name scope. When `target`
    /// is itself a `Knot` box, this is the recursive member's self-reference
    /// (`spec.md` §4.1, "IntIterate") rather than an ordinary CTE use;
    /// `translate` tells the two apart by inspecting `target`'s kind.
    FromReference { name: Symbol, target: BoxId },
    FromValues(ValuesTable),
    Select {
        over: BoxId,
        args: Vec<(Symbol, Ref)>,
    },
    Where {
        over: BoxId,
        cond: Ref,
    },
    /// A two-sided join, routed from the user's linear `Join` chain
    /// (`spec.md` §4.1, "IntJoin"): `left`/`right` are `BoxId`s rather than
    /// nested `over` chains, so `translate` can assemble a single `JOIN`
    /// clause per pair instead of re-deriving the pairing.
    IntJoin {
        left: BoxId,
        right: BoxId,
        on: Ref,
        is_left: bool,
        is_right: bool,
        lateral: bool,
    },
    Group {
        over: BoxId,
        by: Vec<(Symbol, Ref)>,
    },
    Partition {
        over: BoxId,
        by: Vec<Ref>,
        order_by: Vec<Ref>,
        frame: Option<Frame>,
    },
    Order {
        over: BoxId,
        by: Vec<Ref>,
    },
    Limit {
        over: BoxId,
        limit: Option<u64>,
        offset: Option<u64>,
    },
    Append {
        args: Vec<BoxId>,
    },
    Define {
        over: BoxId,
        args: Vec<(Symbol, Ref)>,
    },
    /// `Bind` box-wraps its predecessor despite being listed as scalar in
    /// `spec.md` §3 — see `node/mod.rs` and DESIGN.md's Open Questions.
    IntBind {
        over: BoxId,
        args: Vec<(Symbol, Ref)>,
        owned: bool,
    },
    With {
        over: BoxId,
        ctes: Vec<(Symbol, BoxId)>,
        materialized: Option<bool>,
    },
    WithExternal {
        over: BoxId,
        ctes: Vec<Symbol>,
        schema: Option<Symbol>,
    },
    As {
        over: BoxId,
        name: Symbol,
    },
    /// Recursive CTE pair (`spec.md` §3/§4.1, Glossary "Knot"): `seed` is the
    /// non-recursive base case, `iterator` the recursive step re-evaluated
    /// against the knot's own growing result until `resolve`'s fixed point
    /// (`ir::types::is_subset`) is reached.
    Knot {
        seed: BoxId,
        iterator: BoxId,
        name: Symbol,
    },
}

#[derive(Clone, Debug)]
pub struct AnnotatedBox {
    pub id: BoxId,
    pub kind: BoxKind,
    pub label: Symbol,
    pub typ: Option<BoxType>,
    /// Set when this box is the target of a bound reference elsewhere in the
    /// tree (`spec.md` §3 invariant 3).
    pub handle: Option<Handle>,
}

/// Owns the per-compilation `Box` arena, handle table and CTE name stack —
/// the single owner of mutable compile-scoped state `spec.md` §5 calls for,
/// grounded on `prqlc::sql::srq::context::AnchorContext`'s role as the one
/// mutable-state owner threaded through a compile
/// (`examples/PRQL-prql/prqlc/prqlc/src/sql/srq/context.rs`).
#[derive(Debug, Default)]
pub struct AnnotateContext {
    boxes: Vec<AnnotatedBox>,
    handles: crate::utils::id_gen::IdGenerator<Handle>,
    /// Name -> box stack, for resolving `FromSource::Reference` against the
    /// innermost enclosing `With`/`WithExternal`/`Iterate` (`spec.md` §4.1).
    pub cte_scopes: Vec<BTreeMap<Symbol, BoxId>>,
}

impl AnnotateContext {
    pub fn new() -> Self {
        AnnotateContext::default()
    }

    pub fn push_box(&mut self, kind: BoxKind, label: Symbol) -> BoxId {
        let id = BoxId::from(self.boxes.len());
        self.boxes.push(AnnotatedBox {
            id,
            kind,
            label,
            typ: None,
            handle: None,
        });
        id
    }

    /// Allocates a `BoxId` ahead of its contents being known, so a `Knot`
    /// can bind its own name to an id before `seed`/`iterator` are annotated
    /// (`spec.md` §4.1). `set_box` fills it in once both sides exist.
    pub fn reserve_box(&mut self) -> BoxId {
        self.push_box(BoxKind::FromNothing, Symbol::new("_"))
    }

    pub fn set_box(&mut self, id: BoxId, kind: BoxKind, label: Symbol) {
        let b = &mut self.boxes[id.get()];
        b.kind = kind;
        b.label = label;
    }

    pub fn get(&self, id: BoxId) -> &AnnotatedBox {
        &self.boxes[id.get()]
    }

    pub fn get_mut(&mut self, id: BoxId) -> &mut AnnotatedBox {
        &mut self.boxes[id.get()]
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnnotatedBox> {
        self.boxes.iter()
    }

    pub fn gen_handle(&mut self) -> Handle {
        self.handles.gen()
    }

    /// Looks up `name` against the innermost enclosing CTE scope,
    /// `spec.md` §4.1's scoping rule for `FromSource::Reference`.
    pub fn resolve_cte(&self, name: &Symbol) -> Option<BoxId> {
        self.cte_scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    /// Pushes a fresh CTE scope, returning a guard that pops it again on
    /// drop — covering every exit path including `?`-propagated errors
    /// (`spec.md` §5; see DESIGN.md).
    pub fn enter_cte_scope(&mut self) -> CteScope<'_> {
        self.cte_scopes.push(BTreeMap::new());
        CteScope { ctx: self }
    }

    pub fn bind_cte(&mut self, name: Symbol, id: BoxId) {
        if let Some(scope) = self.cte_scopes.last_mut() {
            scope.insert(name, id);
        }
    }
}

/// RAII guard for a pushed CTE scope, returned by
/// [`AnnotateContext::enter_cte_scope`]. Derefs to the context it borrows, so
/// callers thread it through `annotate_tabular` exactly like a plain
/// `&mut AnnotateContext`; the scope pops itself when the guard drops.
pub struct CteScope<'a> {
    ctx: &'a mut AnnotateContext,
}

impl std::ops::Deref for CteScope<'_> {
    type Target = AnnotateContext;
    fn deref(&self) -> &AnnotateContext {
        self.ctx
    }
}

impl std::ops::DerefMut for CteScope<'_> {
    fn deref_mut(&mut self) -> &mut AnnotateContext {
        self.ctx
    }
}

impl Drop for CteScope<'_> {
    fn drop(&mut self) {
        self.ctx.cte_scopes.pop();
    }
}
