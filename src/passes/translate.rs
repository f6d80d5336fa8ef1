//! Pass 4: walks the annotated/resolved/linked `Box` arena bottom-up and
//! assembles a `Clause` tree (`spec.md` §4.4). Grounded on
//! `compiler/translate.py`'s `Assemblage`/`translate_toplevel` shape, adapted
//! to this crate's simpler `resolve`/`link` design: instead of reading a
//! per-box `refs` list pushed down from parents, each box is assembled once
//! (memoized by `BoxId`) and exposes every column `resolve` gave it, so a
//! parent just looks its wanted names up in the child's `cols` map.
//!
//! An `Assemblage` is a half-built `SELECT`: `from`/`where_`/`group_by`/...
//! still open for a passthrough box (`Where`, `Order`, ...) to extend in
//! place, or already closed (`completed_columns: Some(..)`) once an explicit
//! `Select` fixes the output column list. Closing an assemblage and reusing
//! it elsewhere (a `JOIN` operand, a `UNION ALL` arm, a CTE body) always goes
//! through [`wrap_as_subquery`] or [`finalize_as_relation`], which is also
//! where a fresh alias is minted.

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::clause::{Clause, CteDef, FromBody, JoinKind, SelectBody, WindowSpec};
use crate::error::{Error, ErrorKind, Result, WithErrorInfo};
use crate::ir::annotated::{AnnotateContext, BoxKind, Ref};
use crate::ir::handle::BoxId;
use crate::ir::types::GroupType;
use crate::node::symbol::Symbol;
use crate::utils::id_gen::NameGenerator;

/// A CTE registered by `With`/`WithExternal` but routed outside the final
/// `WITH` clause, standing in for the dropped I/O handler callback
/// (`spec.md` §4.4 `WithExternal`; see DESIGN.md).
#[derive(Clone, Debug)]
pub struct ExternalCte {
    pub name: Symbol,
    pub schema: Option<Symbol>,
    pub columns: Vec<Symbol>,
    pub body: Clause,
}

/// Per-compilation state threaded through `assemble`/`resolve_ref`: alias
/// allocation, memoized assemblages, CTE bookkeeping, and the `vars_`/lateral
/// scopes `Bind`/`Var` and correlated joins consult.
#[derive(Debug, Default)]
pub struct TranslateContext {
    aliases: BTreeMap<String, NameGenerator>,
    assembled: BTreeMap<BoxId, Assemblage>,
    cte_alias: BTreeMap<BoxId, Symbol>,
    cte_columns: BTreeMap<BoxId, Vec<Symbol>>,
    /// Finished CTE bodies, in registration order, collected into the final
    /// leading `WITH` clause by [`translate`].
    pub cte_defs: Vec<CteDef>,
    pub external_ctes: Vec<ExternalCte>,
    vars: Vec<BTreeMap<Symbol, Clause>>,
    /// The left side of the innermost `JOIN` currently being assembled, so a
    /// `Bind` on the right side correlates against it (`spec.md` §4.4's
    /// lateral-join use of `Bind`; see DESIGN.md for the scope this
    /// simplification covers).
    lateral_scope: Vec<BoxId>,
    pub recursive: bool,
}

impl TranslateContext {
    pub fn new() -> Self {
        TranslateContext::default()
    }

    fn alloc_alias(&mut self, label: &Symbol) -> Symbol {
        let gen = self
            .aliases
            .entry(label.as_str().to_string())
            .or_insert_with(|| NameGenerator::new(label.as_str()));
        Symbol::new(gen.gen())
    }

    /// Pushes `left` as the innermost lateral-join scope, returning a guard
    /// that pops it on drop — covering the `?`-propagated error paths a bare
    /// push/pop pair around `assemble`'s right-hand side would leak past
    /// (`spec.md` §5; see DESIGN.md).
    fn enter_lateral_scope(&mut self, left: BoxId) -> LateralScope<'_> {
        self.lateral_scope.push(left);
        LateralScope { tctx: self }
    }
}

struct LateralScope<'a> {
    tctx: &'a mut TranslateContext,
}

impl std::ops::Deref for LateralScope<'_> {
    type Target = TranslateContext;
    fn deref(&self) -> &TranslateContext {
        self.tctx
    }
}

impl std::ops::DerefMut for LateralScope<'_> {
    fn deref_mut(&mut self) -> &mut TranslateContext {
        self.tctx
    }
}

impl Drop for LateralScope<'_> {
    fn drop(&mut self) {
        self.tctx.lateral_scope.pop();
    }
}

/// A box's column availability and (possibly still-open) `SELECT` shape.
#[derive(Clone, Debug)]
struct Assemblage {
    /// The owning box's own node label, used to mint a fresh alias whenever
    /// this assemblage is later wrapped into a subquery (`wrap_as_subquery`)
    /// — distinct from `alias`, which names the relation as it stands now.
    label: Symbol,
    /// The alias other boxes qualify this one's columns by, once it is (or
    /// becomes) a nested relation.
    alias: Symbol,
    from: Option<Box<Clause>>,
    where_: Option<Box<Clause>>,
    group_by: Vec<Clause>,
    having: Option<Box<Clause>>,
    order_by: Vec<Clause>,
    limit: Option<u64>,
    offset: Option<u64>,
    distinct: bool,
    /// `Some` once an explicit `Select` has fixed the output column list;
    /// further passthrough ops must wrap rather than extend in place.
    completed_columns: Option<Vec<(Symbol, Clause)>>,
    cols: BTreeMap<Symbol, Clause>,
    col_order: Vec<Symbol>,
    /// Sub-namespaces reachable from here (`As(name)`/`IntJoin`'s side
    /// labels), for qualified `Get.alias.column` chains.
    subs: BTreeMap<Symbol, BoxId>,
}

impl Assemblage {
    fn is_bare_relation(&self) -> bool {
        self.completed_columns.is_none()
            && self.where_.is_none()
            && self.group_by.is_empty()
            && self.having.is_none()
            && self.order_by.is_empty()
            && self.limit.is_none()
            && self.offset.is_none()
            && !self.distinct
    }
}

/// Translates `root` into a single `Clause`, with any registered CTEs
/// collected into a leading `WITH` (`spec.md` §4.4 `translate_toplevel`).
pub fn translate(actx: &AnnotateContext, root: BoxId) -> Result<(Clause, TranslateContext)> {
    log::debug!("translate: assembling {} boxes into a clause tree", actx.len());
    let mut tctx = TranslateContext::new();
    let asmb = assemble(&mut tctx, actx, root)?;
    let cols = ordered_columns(actx, root)?;
    let select = finalize_select_with_columns(&asmb, &cols)?;
    let cte_count = tctx.cte_defs.len();
    let top = if tctx.cte_defs.is_empty() {
        select
    } else {
        Clause::With {
            ctes: std::mem::take(&mut tctx.cte_defs),
            recursive: tctx.recursive,
            body: Box::new(select),
        }
    };
    log::debug!("translate: done, {cte_count} CTE(s) registered, {} external", tctx.external_ctes.len());
    Ok((top, tctx))
}

fn undefined(name: &Symbol) -> Error {
    Error::new(ErrorKind::UndefinedName { name: name.clone() })
}

// ---------------------------------------------------------------------
// assemble: one Assemblage per box, memoized.
// ---------------------------------------------------------------------

fn assemble(tctx: &mut TranslateContext, actx: &AnnotateContext, id: BoxId) -> Result<Assemblage> {
    if let Some(a) = tctx.assembled.get(&id) {
        return Ok(a.clone());
    }
    let kind = actx.get(id).kind.clone();
    let label = actx.get(id).label.clone();
    let asmb = match kind {
        BoxKind::FromNothing => {
            let alias = tctx.alloc_alias(&label);
            bare_relation(label.clone(), Clause::From { body: FromBody::Nothing, alias: alias.clone() }, alias, vec![], vec![])
        }
        BoxKind::FromTable(t) => {
            let alias = tctx.alloc_alias(&label);
            let cols: Vec<(Symbol, Clause)> = t
                .columns
                .iter()
                .map(|c| (c.clone(), Clause::id(alias.clone(), c.clone())))
                .collect();
            let body = FromBody::Table { schema: t.schema.clone(), name: t.name.clone() };
            bare_relation(label.clone(), Clause::From { body, alias: alias.clone() }, alias, t.columns.clone(), cols)
        }
        BoxKind::FromValues(v) => {
            let alias = tctx.alloc_alias(&label);
            let rows = v
                .rows
                .iter()
                .map(|row| row.iter().map(|val| Clause::Lit(val.clone())).collect())
                .collect();
            let body = FromBody::Values { columns: v.columns.clone(), rows, row_constructor: None };
            let cols: Vec<(Symbol, Clause)> = v
                .columns
                .iter()
                .map(|c| (c.clone(), Clause::id(alias.clone(), c.clone())))
                .collect();
            bare_relation(label.clone(), Clause::From { body, alias: alias.clone() }, alias, v.columns.clone(), cols)
        }
        BoxKind::FromReference { name, target } => {
            let alias = tctx.alloc_alias(&name);
            let cte_alias = tctx
                .cte_alias
                .get(&target)
                .cloned()
                .ok_or_else(|| Error::new(ErrorKind::IllFormed).push_hint("CTE referenced before it was registered"))?;
            let cols_list = tctx.cte_columns.get(&target).cloned().unwrap_or_default();
            let cols: Vec<(Symbol, Clause)> =
                cols_list.iter().map(|c| (c.clone(), Clause::id(alias.clone(), c.clone()))).collect();
            bare_relation(name.clone(), Clause::From { body: FromBody::Cte(cte_alias), alias: alias.clone() }, alias, cols_list, cols)
        }
        BoxKind::Select { over, args } => assemble_select(tctx, actx, over, &args)?,
        BoxKind::Where { over, cond } => assemble_where(tctx, actx, over, &cond)?,
        BoxKind::IntJoin { left, right, on, is_left, is_right, lateral } => {
            assemble_join(tctx, actx, id, left, right, &on, is_left, is_right, lateral)?
        }
        BoxKind::Group { over, by } => assemble_group(tctx, actx, over, &by)?,
        BoxKind::Partition { over, .. } => assemble(tctx, actx, over)?,
        BoxKind::Order { over, by } => assemble_order(tctx, actx, over, &by)?,
        BoxKind::Limit { over, limit, offset } => {
            let mut base = assemble(tctx, actx, over)?;
            base = inline_base(tctx, base)?;
            base.limit = limit;
            base.offset = offset;
            base
        }
        BoxKind::Append { args } => assemble_append(tctx, actx, id, &args)?,
        BoxKind::Define { over, args } => assemble_define(tctx, actx, over, &args)?,
        BoxKind::IntBind { over, args, .. } => assemble_bind(tctx, actx, over, &args)?,
        BoxKind::With { over, ctes, materialized } => assemble_with(tctx, actx, over, &ctes, materialized)?,
        BoxKind::WithExternal { over, ctes, schema } => assemble_with_external(tctx, actx, over, &ctes, schema)?,
        BoxKind::As { over, name } => {
            let mut base = assemble(tctx, actx, over)?;
            base.subs.insert(name, over);
            base
        }
        BoxKind::Knot { seed, iterator, name } => assemble_knot(tctx, actx, id, seed, iterator, name)?,
    };
    let asmb = Assemblage { label: label.clone(), ..asmb };
    tctx.assembled.insert(id, asmb.clone());
    Ok(asmb)
}

fn bare_relation(
    label: Symbol,
    clause: Clause,
    alias: Symbol,
    col_order: Vec<Symbol>,
    cols: Vec<(Symbol, Clause)>,
) -> Assemblage {
    Assemblage {
        label,
        alias,
        from: Some(Box::new(clause)),
        where_: None,
        group_by: vec![],
        having: None,
        order_by: vec![],
        limit: None,
        offset: None,
        distinct: false,
        completed_columns: None,
        cols: cols.into_iter().collect(),
        col_order,
        subs: BTreeMap::new(),
    }
}

/// If `base` already has a fixed column list, wraps it in a subquery so a
/// further passthrough op (`Where`, `Group`, ...) has an open builder to
/// extend again (`spec.md` §4.4, "else wrap the base in a subquery").
fn inline_base(tctx: &mut TranslateContext, base: Assemblage) -> Result<Assemblage> {
    if base.completed_columns.is_some() {
        wrap_as_subquery(tctx, &base)
    } else {
        Ok(base)
    }
}

/// A box used as a `JOIN`/`Append`/CTE operand must become a concrete
/// relation: a bare `FROM x AS alias` is used unwrapped, anything with
/// pending modifiers is finalized into `(SELECT ...) AS alias`
/// (`spec.md` §4.4, "allocate an alias only if the clause is not a bare
/// `FROM ... AS id`").
fn finalize_as_relation(tctx: &mut TranslateContext, base: Assemblage) -> Result<Assemblage> {
    if base.is_bare_relation() {
        Ok(base)
    } else {
        wrap_as_subquery(tctx, &base)
    }
}

fn wrap_as_subquery(tctx: &mut TranslateContext, base: &Assemblage) -> Result<Assemblage> {
    let cols = default_columns(base);
    let select = finalize_select_with_columns(base, &default_order(base))?;
    let alias = tctx.alloc_alias(&base.label);
    let new_cols: Vec<(Symbol, Clause)> =
        cols.iter().map(|c| (c.clone(), Clause::id(alias.clone(), c.clone()))).collect();
    Ok(Assemblage {
        label: base.label.clone(),
        alias: alias.clone(),
        from: Some(Box::new(Clause::From { body: FromBody::Subquery(Box::new(select)), alias })),
        where_: None,
        group_by: vec![],
        having: None,
        order_by: vec![],
        limit: None,
        offset: None,
        distinct: false,
        completed_columns: None,
        cols: new_cols.into_iter().collect(),
        col_order: cols,
        subs: BTreeMap::new(),
    })
}

fn default_order(base: &Assemblage) -> Vec<Symbol> {
    base.completed_columns
        .as_ref()
        .map(|c| c.iter().map(|(l, _)| l.clone()).collect())
        .unwrap_or_else(|| base.col_order.clone())
}

fn default_columns(base: &Assemblage) -> Vec<Symbol> {
    default_order(base)
}

/// Builds the `SELECT` `base` represents, with an explicit column list of
/// `cols` (drawn from `base.cols`, or `base.completed_columns` directly when
/// already fixed). Degrades a grouping-only-for-dedup shape to
/// `SELECT DISTINCT` when no aggregate made it into the column list
/// (`spec.md` §4.4 `Group`, "if no aggregates are requested").
fn finalize_select_with_columns(base: &Assemblage, cols: &[Symbol]) -> Result<Clause> {
    let columns: Vec<(Symbol, Clause)> = match &base.completed_columns {
        Some(fixed) => fixed.clone(),
        None => cols
            .iter()
            .map(|c| {
                base.cols
                    .get(c)
                    .cloned()
                    .map(|clause| (c.clone(), clause))
                    .ok_or_else(|| undefined(c))
            })
            .collect::<Result<_>>()?,
    };
    let mut group_by = base.group_by.clone();
    let mut distinct = base.distinct;
    if !group_by.is_empty() && columns.iter().all(|(_, c)| group_by.contains(c)) {
        distinct = true;
        group_by.clear();
    }
    let from = match &base.from {
        Some(f) if matches!(f.as_ref(), Clause::From { body: FromBody::Nothing, .. }) => None,
        other => other.clone(),
    };
    Ok(Clause::Select(SelectBody {
        distinct,
        top: None,
        columns,
        from,
        where_: base.where_.clone(),
        group_by,
        having: base.having.clone(),
        order_by: base.order_by.clone(),
        limit: base.limit,
        offset: base.offset,
    }))
}

// ---------------------------------------------------------------------
// Per-BoxKind assembly.
// ---------------------------------------------------------------------

fn assemble_select(tctx: &mut TranslateContext, actx: &AnnotateContext, over: BoxId, args: &[(Symbol, Ref)]) -> Result<Assemblage> {
    let base = assemble(tctx, actx, over)?;
    let mut base = inline_base(tctx, base)?;
    let mut columns = Vec::with_capacity(args.len());
    for (label, r) in args {
        let c = resolve_ref(tctx, actx, over, r)?;
        columns.push((label.clone(), c));
    }
    base.completed_columns = Some(columns);
    Ok(base)
}

fn assemble_where(tctx: &mut TranslateContext, actx: &AnnotateContext, over: BoxId, cond: &Ref) -> Result<Assemblage> {
    let base = assemble(tctx, actx, over)?;
    let mut base = inline_base(tctx, base)?;
    let c = resolve_ref(tctx, actx, over, cond)?;
    if !is_literal_true(&c) {
        if !base.group_by.is_empty() {
            let merged = and_merge(base.having.take().map(|b| *b), c);
            base.having = Some(Box::new(merged));
        } else {
            let merged = and_merge(base.where_.take().map(|b| *b), c);
            base.where_ = Some(Box::new(merged));
        }
    }
    Ok(base)
}

fn assemble_group(tctx: &mut TranslateContext, actx: &AnnotateContext, over: BoxId, by: &[(Symbol, Ref)]) -> Result<Assemblage> {
    let base = assemble(tctx, actx, over)?;
    let base = inline_base(tctx, base)?;
    let mut cols = BTreeMap::new();
    let mut col_order = vec![];
    let mut group_by = vec![];
    for (label, r) in by {
        let c = resolve_ref(tctx, actx, over, r)?;
        group_by.push(c.clone());
        cols.insert(label.clone(), c);
        col_order.push(label.clone());
    }
    Ok(Assemblage {
        label: base.label,
        alias: base.alias,
        from: base.from,
        where_: base.where_,
        group_by,
        having: base.having,
        order_by: vec![],
        limit: None,
        offset: None,
        distinct: false,
        completed_columns: None,
        cols,
        col_order,
        subs: BTreeMap::new(),
    })
}

fn assemble_order(tctx: &mut TranslateContext, actx: &AnnotateContext, over: BoxId, by: &[Ref]) -> Result<Assemblage> {
    let base = assemble(tctx, actx, over)?;
    let mut base = inline_base(tctx, base)?;
    base.order_by = by.iter().map(|r| resolve_ref(tctx, actx, over, r)).collect::<Result<_>>()?;
    Ok(base)
}

fn assemble_define(tctx: &mut TranslateContext, actx: &AnnotateContext, over: BoxId, args: &[(Symbol, Ref)]) -> Result<Assemblage> {
    let base = assemble(tctx, actx, over)?;
    let base = inline_base(tctx, base)?;
    let mut cols = base.cols;
    let mut col_order = base.col_order;
    for (label, r) in args {
        let c = resolve_ref(tctx, actx, over, r)?;
        if !cols.contains_key(label) {
            col_order.push(label.clone());
        }
        cols.insert(label.clone(), c);
    }
    Ok(Assemblage { cols, col_order, ..base_shape(base.label, base.alias, base.from, base.where_, base.group_by, base.having, base.order_by, base.limit, base.offset, base.distinct) })
}

#[allow(clippy::too_many_arguments)]
fn base_shape(
    label: Symbol,
    alias: Symbol,
    from: Option<Box<Clause>>,
    where_: Option<Box<Clause>>,
    group_by: Vec<Clause>,
    having: Option<Box<Clause>>,
    order_by: Vec<Clause>,
    limit: Option<u64>,
    offset: Option<u64>,
    distinct: bool,
) -> Assemblage {
    Assemblage {
        label,
        alias,
        from,
        where_,
        group_by,
        having,
        order_by,
        limit,
        offset,
        distinct,
        completed_columns: None,
        cols: BTreeMap::new(),
        col_order: vec![],
        subs: BTreeMap::new(),
    }
}

fn assemble_bind(tctx: &mut TranslateContext, actx: &AnnotateContext, over: BoxId, args: &[(Symbol, Ref)]) -> Result<Assemblage> {
    let scope_box = tctx.lateral_scope.last().copied().unwrap_or(over);
    let mut vars = BTreeMap::new();
    for (label, r) in args {
        let c = resolve_ref(tctx, actx, scope_box, r)?;
        vars.insert(label.clone(), c);
    }
    tctx.vars.push(vars);
    let result = assemble(tctx, actx, over);
    tctx.vars.pop();
    result
}

#[allow(clippy::too_many_arguments)]
fn assemble_join(
    tctx: &mut TranslateContext,
    actx: &AnnotateContext,
    id: BoxId,
    left: BoxId,
    right: BoxId,
    on: &Ref,
    is_left: bool,
    is_right: bool,
    lateral: bool,
) -> Result<Assemblage> {
    let left_asmb = assemble(tctx, actx, left)?;
    let left_asmb = inline_base(tctx, left_asmb)?;
    let left_rel = finalize_as_relation(tctx, left_asmb)?;

    let right_rel = {
        let mut scope = tctx.enter_lateral_scope(left);
        let right_asmb = assemble(&mut scope, actx, right)?;
        finalize_as_relation(&mut scope, right_asmb)?
    };

    let left_label = actx.get(left).label.clone();
    let right_label = actx.get(right).label.clone();
    let mut merged_cols = left_rel.cols.clone();
    for (k, v) in &right_rel.cols {
        merged_cols.entry(k.clone()).or_insert_with(|| v.clone());
    }
    let mut merged_subs = left_rel.subs.clone();
    merged_subs.extend(right_rel.subs.clone());
    merged_subs.insert(left_label, left);
    merged_subs.insert(right_label, right);

    let on_clause = resolve_ref_in(tctx, actx, id, &merged_cols, &merged_subs, on)?;
    let kind = match (is_left, is_right) {
        (true, true) => JoinKind::Full,
        (true, false) => JoinKind::Left,
        (false, true) => JoinKind::Right,
        (false, false) => JoinKind::Inner,
    };
    let join_clause = Clause::Join {
        left: left_rel.from.clone().expect("finalize_as_relation always produces a from clause"),
        right: right_rel.from.clone().expect("finalize_as_relation always produces a from clause"),
        on: Box::new(on_clause),
        kind,
        lateral,
    };

    let mut col_order = left_rel.col_order.clone();
    for c in &right_rel.col_order {
        if !col_order.contains(c) {
            col_order.push(c.clone());
        }
    }

    Ok(Assemblage {
        label: left_rel.label,
        alias: left_rel.alias,
        from: Some(Box::new(join_clause)),
        where_: left_rel.where_,
        group_by: left_rel.group_by,
        having: left_rel.having,
        order_by: left_rel.order_by,
        limit: left_rel.limit,
        offset: left_rel.offset,
        distinct: left_rel.distinct,
        completed_columns: None,
        cols: merged_cols,
        col_order,
        subs: merged_subs,
    })
}

fn assemble_append(tctx: &mut TranslateContext, actx: &AnnotateContext, id: BoxId, args: &[BoxId]) -> Result<Assemblage> {
    if args.is_empty() {
        return Err(Error::new(ErrorKind::IllFormed));
    }
    let target_cols = ordered_columns(actx, args[0])?;
    let mut arms = Vec::with_capacity(args.len());
    for &a in args {
        let asmb = assemble(tctx, actx, a)?;
        arms.push(finalize_select_with_columns(&asmb, &target_cols)?);
    }
    let label = actx.get(id).label.clone();
    let alias = tctx.alloc_alias(&label);
    let union_clause = Clause::Union { op: crate::clause::SetOp::UnionAll, args: arms };
    let cols: Vec<(Symbol, Clause)> =
        target_cols.iter().map(|c| (c.clone(), Clause::id(alias.clone(), c.clone()))).collect();
    Ok(bare_relation(
        label,
        Clause::From { body: FromBody::Subquery(Box::new(union_clause)), alias: alias.clone() },
        alias,
        target_cols,
        cols,
    ))
}

fn assemble_with(
    tctx: &mut TranslateContext,
    actx: &AnnotateContext,
    over: BoxId,
    ctes: &[(Symbol, BoxId)],
    materialized: Option<bool>,
) -> Result<Assemblage> {
    for (name, cte_box) in ctes {
        let alias = tctx.alloc_alias(name);
        tctx.cte_alias.insert(*cte_box, alias.clone());
        let asmb = assemble(tctx, actx, *cte_box)?;
        let cols = ordered_columns(actx, *cte_box)?;
        tctx.cte_columns.insert(*cte_box, cols.clone());
        let body = finalize_select_with_columns(&asmb, &cols)?;
        tctx.cte_defs.push(CteDef { name: alias, columns: cols, body: Box::new(body), materialized });
    }
    assemble(tctx, actx, over)
}

fn assemble_with_external(
    tctx: &mut TranslateContext,
    actx: &AnnotateContext,
    over: BoxId,
    ctes: &[Symbol],
    schema: Option<Symbol>,
) -> Result<Assemblage> {
    for name in ctes {
        let cte_box = actx
            .resolve_cte(name)
            .ok_or_else(|| Error::new(ErrorKind::UndefinedTableRef { name: name.clone() }))?;
        let alias = tctx.alloc_alias(name);
        tctx.cte_alias.insert(cte_box, alias.clone());
        let asmb = assemble(tctx, actx, cte_box)?;
        let cols = ordered_columns(actx, cte_box)?;
        tctx.cte_columns.insert(cte_box, cols.clone());
        let body = finalize_select_with_columns(&asmb, &cols)?;
        tctx.external_ctes.push(ExternalCte {
            name: alias,
            schema: schema.clone(),
            columns: cols,
            body,
        });
    }
    assemble(tctx, actx, over)
}

/// Registers the CTE alias before assembling `iterator`, so the
/// self-`FromReference` inside it resolves without re-entering this call
/// (`spec.md` §4.4 `Knot`).
fn assemble_knot(
    tctx: &mut TranslateContext,
    actx: &AnnotateContext,
    id: BoxId,
    seed: BoxId,
    iterator: BoxId,
    name: Symbol,
) -> Result<Assemblage> {
    let seed_cols = ordered_columns(actx, seed)?;
    let cte_alias = tctx.alloc_alias(&name);
    tctx.cte_alias.insert(id, cte_alias.clone());
    tctx.cte_columns.insert(id, seed_cols.clone());

    let seed_asmb = assemble(tctx, actx, seed)?;
    let seed_select = finalize_select_with_columns(&seed_asmb, &seed_cols)?;
    let iter_asmb = assemble(tctx, actx, iterator)?;
    let iter_select = finalize_select_with_columns(&iter_asmb, &seed_cols)?;

    let body = Clause::Union { op: crate::clause::SetOp::UnionAll, args: vec![seed_select, iter_select] };
    tctx.cte_defs.push(CteDef {
        name: cte_alias.clone(),
        columns: seed_cols.clone(),
        body: Box::new(body),
        materialized: None,
    });
    tctx.recursive = true;

    let use_alias = tctx.alloc_alias(&name);
    let cols: Vec<(Symbol, Clause)> =
        seed_cols.iter().map(|c| (c.clone(), Clause::id(use_alias.clone(), c.clone()))).collect();
    Ok(bare_relation(
        name,
        Clause::From { body: FromBody::Cte(cte_alias), alias: use_alias.clone() },
        use_alias,
        seed_cols,
        cols,
    ))
}

// ---------------------------------------------------------------------
// Output column order (independent of BoxType, which loses insertion order
// through its BTreeMap — see `ir::types::RowType`).
// ---------------------------------------------------------------------

fn ordered_columns(actx: &AnnotateContext, id: BoxId) -> Result<Vec<Symbol>> {
    match &actx.get(id).kind {
        BoxKind::FromNothing => Ok(vec![]),
        BoxKind::FromTable(t) => Ok(t.columns.clone()),
        BoxKind::FromValues(v) => Ok(v.columns.clone()),
        BoxKind::FromReference { target, .. } => ordered_columns(actx, *target),
        BoxKind::Select { args, .. } => Ok(args.iter().map(|(l, _)| l.clone()).collect()),
        BoxKind::Where { over, .. }
        | BoxKind::Partition { over, .. }
        | BoxKind::Order { over, .. }
        | BoxKind::Limit { over, .. }
        | BoxKind::IntBind { over, .. }
        | BoxKind::With { over, .. }
        | BoxKind::WithExternal { over, .. }
        | BoxKind::As { over, .. } => ordered_columns(actx, *over),
        BoxKind::IntJoin { left, right, .. } => {
            let left_cols = ordered_columns(actx, *left)?;
            let right_cols = ordered_columns(actx, *right)?;
            Ok(left_cols.into_iter().chain(right_cols).unique().collect())
        }
        BoxKind::Group { by, .. } => Ok(by.iter().map(|(l, _)| l.clone()).collect()),
        BoxKind::Append { args } => {
            if args.is_empty() {
                return Err(Error::new(ErrorKind::IllFormed));
            }
            ordered_columns(actx, args[0])
        }
        BoxKind::Define { over, args } => {
            let mut cols = ordered_columns(actx, *over)?;
            for (l, _) in args {
                if !cols.contains(l) {
                    cols.push(l.clone());
                }
            }
            Ok(cols)
        }
        BoxKind::Knot { seed, .. } => ordered_columns(actx, *seed),
    }
}

// ---------------------------------------------------------------------
// Scalar ref resolution.
// ---------------------------------------------------------------------

fn resolve_ref(tctx: &mut TranslateContext, actx: &AnnotateContext, box_id: BoxId, r: &Ref) -> Result<Clause> {
    let asmb = assemble(tctx, actx, box_id)?;
    resolve_ref_in(tctx, actx, box_id, &asmb.cols, &asmb.subs, r)
}

fn resolve_ref_in(
    tctx: &mut TranslateContext,
    actx: &AnnotateContext,
    box_id: BoxId,
    cols: &BTreeMap<Symbol, Clause>,
    subs: &BTreeMap<Symbol, BoxId>,
    r: &Ref,
) -> Result<Clause> {
    match r {
        Ref::Lit(v) => Ok(Clause::Lit(v.clone())),
        Ref::Var(name) => Ok(resolve_var(tctx, name)),
        Ref::NameBound { name, over: None } => cols.get(name).cloned().ok_or_else(|| undefined(name)),
        Ref::NameBound { name, over: Some(inner) } => {
            let ns_box = resolve_namespace(tctx, actx, subs, inner)?;
            resolve_ref(tctx, actx, ns_box, &Ref::NameBound { name: name.clone(), over: None })
        }
        Ref::Get { name, .. } => {
            // `link` rewrites every reachable `Get` into `NameBound`/
            // `HandleBound` before `translate` runs; surviving one means a
            // box's scalar fields were not fully linked.
            Err(Error::new(ErrorKind::IllFormed).push_hint(format!("unresolved Get(\"{name}\") reached translate")))
        }
        Ref::HandleBound { .. } => {
            // Never minted by this crate's `annotate` (see DESIGN.md's Open
            // Questions on the simplified Get/Agg rebinding).
            Err(Error::new(ErrorKind::IllFormed).push_hint("HandleBound is unreachable in this crate's annotate design"))
        }
        Ref::Fun { name, args } => translate_fun(tctx, actx, box_id, cols, subs, name, args),
        Ref::Agg { over, name, args, distinct, filter } => {
            resolve_agg(tctx, actx, box_id, subs, over, name, args, *distinct, filter)
        }
        Ref::Sort { over, dir, nulls } => {
            let value = resolve_ref_in(tctx, actx, box_id, cols, subs, over)?;
            Ok(Clause::Sort { value: Box::new(value), dir: *dir, nulls: *nulls })
        }
    }
}

fn resolve_var(tctx: &TranslateContext, name: &Symbol) -> Clause {
    for scope in tctx.vars.iter().rev() {
        if let Some(c) = scope.get(name) {
            return c.clone();
        }
    }
    Clause::Var(name.clone())
}

fn resolve_namespace(
    tctx: &mut TranslateContext,
    actx: &AnnotateContext,
    subs: &BTreeMap<Symbol, BoxId>,
    r: &Ref,
) -> Result<BoxId> {
    match r {
        Ref::NameBound { name, over: None } => subs.get(name).copied().ok_or_else(|| undefined(name)),
        Ref::NameBound { name, over: Some(inner) } => {
            let inner_box = resolve_namespace(tctx, actx, subs, inner)?;
            let inner_asmb = assemble(tctx, actx, inner_box)?;
            inner_asmb.subs.get(name).copied().ok_or_else(|| undefined(name))
        }
        _ => Err(Error::new(ErrorKind::IllFormed).push_hint("namespace chain must be made of Get/NameBound refs")),
    }
}

#[allow(clippy::too_many_arguments)]
fn resolve_agg(
    tctx: &mut TranslateContext,
    actx: &AnnotateContext,
    box_id: BoxId,
    subs: &BTreeMap<Symbol, BoxId>,
    over: &Option<Box<Ref>>,
    name: &Symbol,
    args: &[Ref],
    distinct: bool,
    filter: &Option<Box<Ref>>,
) -> Result<Clause> {
    let (agg_box, window) = match over {
        Some(inner) => (resolve_namespace(tctx, actx, subs, inner)?, None),
        None => {
            let row = actx
                .get(box_id)
                .typ
                .as_ref()
                .expect("resolve must run before translate")
                .row
                .clone();
            let gp_box = match &row.group {
                GroupType::Row(_, b) => *b,
                _ => return Err(Error::new(ErrorKind::UnexpectedAgg)),
            };
            match actx.get(gp_box).kind.clone() {
                BoxKind::Group { over: pre, .. } => (pre, None),
                BoxKind::Partition { over: pre, by, order_by, frame } => {
                    let partition_by = by.iter().map(|r| resolve_ref(tctx, actx, pre, r)).collect::<Result<Vec<_>>>()?;
                    let order_by = order_by.iter().map(|r| resolve_ref(tctx, actx, pre, r)).collect::<Result<Vec<_>>>()?;
                    (pre, Some(WindowSpec { partition_by, order_by, frame }))
                }
                _ => return Err(Error::new(ErrorKind::IllFormed)),
            }
        }
    };
    let mut resolved_args = args.iter().map(|a| resolve_ref(tctx, actx, agg_box, a)).collect::<Result<Vec<_>>>()?;
    let resolved_filter = match filter {
        Some(f) => Some(Box::new(resolve_ref(tctx, actx, agg_box, f)?)),
        None => None,
    };
    // `COUNT` with no arguments means `COUNT(*)`, not `COUNT()`
    // (`examples/original_source/src/funsql/compiler/translate.py`'s `Agg`
    // case: a bare `*` op standing in for the argument list).
    let upper = name.as_str().to_ascii_uppercase();
    if upper == "COUNT" && resolved_args.is_empty() {
        resolved_args.push(Clause::Op { name: Symbol::new("*"), args: vec![] });
    }
    Ok(Clause::Agg { name: Symbol::new(upper), args: resolved_args, distinct, filter: resolved_filter, over: window })
}

// ---------------------------------------------------------------------
// Function/operator translation (`spec.md` §4.4).
// ---------------------------------------------------------------------

fn translate_fun(
    tctx: &mut TranslateContext,
    actx: &AnnotateContext,
    box_id: BoxId,
    cols: &BTreeMap<Symbol, Clause>,
    subs: &BTreeMap<Symbol, BoxId>,
    name: &Symbol,
    args: &[Ref],
) -> Result<Clause> {
    let resolved = args
        .iter()
        .map(|a| resolve_ref_in(tctx, actx, box_id, cols, subs, a))
        .collect::<Result<Vec<_>>>()?;
    Ok(build_fun(name.as_str(), resolved))
}

fn build_fun(name: &str, args: Vec<Clause>) -> Clause {
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "=" if args.len() == 2 && args[0] == args[1] => Clause::Lit(crate::node::value::Value::Bool(true)),
        "=" => Clause::Op { name: Symbol::new("="), args },
        "!=" | "<>" => Clause::Op { name: Symbol::new("!="), args },
        "and" => flatten_bool_op(args, "AND", true),
        "or" => flatten_bool_op(args, "OR", false),
        "not" => Clause::Op { name: Symbol::new("NOT"), args },
        "in" => Clause::Op { name: Symbol::new("IN"), args },
        "not_in" | "not in" => Clause::Op { name: Symbol::new("NOT IN"), args },
        "is_null" | "is null" => Clause::Op { name: Symbol::new("IS NULL"), args },
        "is_not_null" | "is not null" => Clause::Op { name: Symbol::new("IS NOT NULL"), args },
        "like" => Clause::Op { name: Symbol::new("LIKE"), args },
        "exists" => Clause::Op { name: Symbol::new("EXISTS"), args },
        "between" => Clause::Op { name: Symbol::new("BETWEEN"), args },
        "not_between" | "not between" => Clause::Op { name: Symbol::new("NOT BETWEEN"), args },
        "cast" => Clause::Op { name: Symbol::new("CAST_AS"), args },
        "extract" => Clause::Op { name: Symbol::new("EXTRACT_FROM"), args },
        "current_date" => Clause::Op { name: Symbol::new("CURRENT_DATE"), args: vec![] },
        "current_timestamp" => Clause::Op { name: Symbol::new("CURRENT_TIMESTAMP"), args: vec![] },
        "case" => build_case(args),
        "count" if args.is_empty() => Clause::Fun { name: Symbol::new("COUNT"), args: vec![] },
        _ => {
            if name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
                Clause::Fun { name: Symbol::new(name.to_ascii_uppercase()), args }
            } else {
                Clause::Op { name: Symbol::new(name), args }
            }
        }
    }
}

fn build_case(mut args: Vec<Clause>) -> Clause {
    let else_ = if args.len() % 2 == 1 { args.pop() } else { None };
    let mut branches = Vec::with_capacity(args.len() / 2);
    let mut it = args.into_iter();
    while let (Some(cond), Some(result)) = (it.next(), it.next()) {
        branches.push((cond, result));
    }
    Clause::Case { branches, else_: else_.map(Box::new) }
}

fn is_literal_true(c: &Clause) -> bool {
    matches!(c, Clause::Lit(v) if v.as_bool() == Some(&true))
}

fn and_merge(existing: Option<Clause>, new: Clause) -> Clause {
    match existing {
        None => new,
        Some(e) => {
            let mut args = match e {
                Clause::Op { name, args } if name.as_str() == "AND" => args,
                other => vec![other],
            };
            match new {
                Clause::Op { name, args: more } if name.as_str() == "AND" => args.extend(more),
                other => args.push(other),
            }
            Clause::Op { name: Symbol::new("AND"), args }
        }
    }
}

fn flatten_bool_op(args: Vec<Clause>, op: &str, identity_true: bool) -> Clause {
    let mut flat = Vec::with_capacity(args.len());
    for a in args {
        match a {
            Clause::Op { name, args: inner } if name.as_str() == op => flat.extend(inner),
            Clause::Lit(ref v) if v.as_bool() == Some(&identity_true) => {}
            other => flat.push(other),
        }
    }
    if flat.is_empty() {
        Clause::Lit(crate::node::value::Value::Bool(identity_true))
    } else if flat.len() == 1 {
        flat.into_iter().next().expect("len checked above")
    } else {
        Clause::Op { name: Symbol::new(op), args: flat }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::build as b;
    use crate::node::SQLTable;
    use crate::passes::{annotate, link, resolve};

    #[test]
    fn alloc_alias_dedups_repeated_labels() {
        let mut tctx = TranslateContext::new();
        let a = tctx.alloc_alias(&Symbol::new("person"));
        let b = tctx.alloc_alias(&Symbol::new("person"));
        let c = tctx.alloc_alias(&Symbol::new("visit"));
        assert_eq!(a.as_str(), "person_1");
        assert_eq!(b.as_str(), "person_2");
        assert_eq!(c.as_str(), "visit_1");
    }

    #[test]
    fn knot_registers_a_recursive_cte_once() {
        let seed = b::define(b::from_nothing(), vec![b::as_(b::lit(1i64), "n")]).unwrap();
        let step = b::define(
            b::where_(b::from_reference("factorial"), b::fun("<", vec![b::get("n"), b::lit(10i64)])),
            vec![b::as_(b::fun("+", vec![b::get("n"), b::lit(1i64)]), "n")],
        )
        .unwrap();
        let node = b::iterate(seed, step);

        let mut actx = AnnotateContext::new();
        let root = annotate(&node, &mut actx).unwrap();
        resolve(root, &mut actx).unwrap();
        link(root, &mut actx).unwrap();
        let (_, tctx) = translate(&actx, root).unwrap();

        assert!(tctx.recursive);
        assert_eq!(tctx.cte_defs.len(), 1);
        assert!(matches!(tctx.cte_defs[0].body.as_ref(), Clause::Union { .. }));
    }

    #[test]
    fn select_over_a_table_produces_one_select_clause() {
        let from = b::from_table(SQLTable::new("person", ["name"]));
        let node = b::select(from, vec![b::get("name")]).unwrap();

        let mut actx = AnnotateContext::new();
        let root = annotate(&node, &mut actx).unwrap();
        resolve(root, &mut actx).unwrap();
        link(root, &mut actx).unwrap();
        let (clause, _) = translate(&actx, root).unwrap();

        match clause {
            Clause::Select(body) => assert_eq!(body.columns.len(), 1),
            other => panic!("expected a bare Select, got {other:?}"),
        }
    }
}
