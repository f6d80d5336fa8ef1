//! Pass 2: bottom-up `BoxType` computation (`spec.md` §4.2). Grounded on
//! `compiler/resolve.py`'s `resolve_boxes`/`resolve` dispatch, including its
//! `resolve_knot` fixed-point loop, translated onto `ir::types`'s
//! `intersect`/`union`/`is_subset` functions.

use crate::error::{Error, ErrorKind, Result};
use crate::ir::annotated::{AnnotateContext, BoxKind, Ref};
use crate::ir::handle::BoxId;
use crate::ir::types::{intersect, union_row, BoxType, FieldType, GroupType, RowType};
use crate::node::symbol::Symbol;

/// Bound on `Knot` fixed-point iterations (`spec.md` §3 invariant 5);
/// exceeding it means the recursive member never stabilizes.
const MAX_KNOT_ITERATIONS: usize = 64;

pub fn resolve(root: BoxId, ctx: &mut AnnotateContext) -> Result<()> {
    log::debug!("resolve: {} boxes to type bottom-up", ctx.len());
    resolve_box(root, ctx)?;
    log::debug!("resolve: done");
    Ok(())
}

fn resolve_box(id: BoxId, ctx: &mut AnnotateContext) -> Result<BoxType> {
    if let Some(t) = ctx.get(id).typ.clone() {
        return Ok(t);
    }
    let kind = ctx.get(id).kind.clone();
    let label = ctx.get(id).label.clone();

    let typ = match kind {
        BoxKind::FromNothing => BoxType::new(label, RowType::empty()),
        BoxKind::FromTable(t) => {
            let fields = t.columns.iter().map(|c| (c.clone(), FieldType::Scalar)).collect();
            BoxType::new(label, RowType::new(fields))
        }
        BoxKind::FromValues(v) => {
            let fields = v.columns.iter().map(|c| (c.clone(), FieldType::Scalar)).collect();
            BoxType::new(label, RowType::new(fields))
        }
        BoxKind::FromReference { name, target } => {
            let target_typ = ctx.get(target).typ.clone().ok_or_else(|| {
                Error::new(ErrorKind::IllFormed)
            })?;
            // A `Knot`'s own type is already the flat recursive row (see
            // `resolve_knot`), not wrapped under its own name the way an
            // ordinary `As`/CTE box is, so its self-reference skips the
            // `fields[name]` unwrap below and reuses the row directly.
            if matches!(ctx.get(target).kind, BoxKind::Knot { .. }) {
                BoxType::new(label, target_typ.row)
            } else {
                match target_typ.row.fields.get(&name) {
                    Some(FieldType::Row(r)) => BoxType::new(label, r.clone()),
                    _ => return Err(Error::new(ErrorKind::InvalidTableRef { name })),
                }
            }
        }
        BoxKind::Select { over, args } => {
            let over_t = resolve_box(over, ctx)?;
            let mut fields = std::collections::BTreeMap::new();
            for (l, r) in &args {
                fields.insert(l.clone(), field_type_of_ref(r, &over_t));
            }
            BoxType::new(label, RowType::new(fields))
        }
        BoxKind::Where { over, .. } => {
            let over_t = resolve_box(over, ctx)?;
            BoxType::new(label, over_t.row)
        }
        BoxKind::IntJoin { left, right, .. } => {
            let left_t = resolve_box(left, ctx)?;
            let right_t = resolve_box(right, ctx)?;
            BoxType::new(label, union_row(&left_t.row, &right_t.row))
        }
        BoxKind::Group { over, by } => {
            let over_t = resolve_box(over, ctx)?;
            let mut fields = std::collections::BTreeMap::new();
            for (l, r) in &by {
                fields.insert(l.clone(), field_type_of_ref(r, &over_t));
            }
            BoxType::new(label, RowType::with_group(fields, GroupType::Row(over_t.row, id)))
        }
        BoxKind::Partition { over, .. } => {
            let over_t = resolve_box(over, ctx)?;
            BoxType::new(label, RowType::with_group(over_t.row.fields.clone(), GroupType::Row(over_t.row, id)))
        }
        BoxKind::Order { over, .. } | BoxKind::Limit { over, .. } => {
            let over_t = resolve_box(over, ctx)?;
            BoxType::new(label, over_t.row)
        }
        BoxKind::Append { args } => {
            if args.is_empty() {
                return Err(Error::new(ErrorKind::IllFormed));
            }
            let mut acc = resolve_box(args[0], ctx)?;
            for a in &args[1..] {
                let t = resolve_box(*a, ctx)?;
                acc = intersect(&acc, &t);
            }
            BoxType::new(label, acc.row)
        }
        BoxKind::Define { over, args } => {
            let over_t = resolve_box(over, ctx)?;
            let mut row = over_t.row.clone();
            for (l, r) in &args {
                row.fields.insert(l.clone(), field_type_of_ref(r, &over_t));
            }
            BoxType::new(label, row)
        }
        // `Bind`'s args set named variables consulted via `Var` lookups
        // (`spec.md` §4.4); they are not new selectable columns, so unlike
        // `Define` this is a pure passthrough of `over`'s row.
        BoxKind::IntBind { over, .. } => {
            let over_t = resolve_box(over, ctx)?;
            BoxType::new(label, over_t.row)
        }
        BoxKind::With { over, ctes, .. } => {
            for (_, cte_id) in &ctes {
                resolve_box(*cte_id, ctx)?;
            }
            let over_t = resolve_box(over, ctx)?;
            BoxType::new(label, over_t.row)
        }
        BoxKind::WithExternal { over, .. } => {
            let over_t = resolve_box(over, ctx)?;
            BoxType::new(label, over_t.row)
        }
        BoxKind::As { over, name } => {
            let over_t = resolve_box(over, ctx)?;
            let mut fields = std::collections::BTreeMap::new();
            fields.insert(name, FieldType::Row(over_t.row.clone()));
            BoxType::with_handle_map(label, RowType::new(fields), over_t.handle_map.clone())
        }
        BoxKind::Knot { seed, iterator, name } => resolve_knot(id, seed, iterator, name, ctx)?,
    };

    ctx.get_mut(id).typ = Some(typ.clone());
    Ok(typ)
}

fn resolve_knot(id: BoxId, seed: BoxId, iterator: BoxId, name: Symbol, ctx: &mut AnnotateContext) -> Result<BoxType> {
    let seed_t = resolve_box(seed, ctx)?;
    let mut tentative = BoxType::new(name.clone(), seed_t.row.clone());
    ctx.get_mut(id).typ = Some(tentative.clone());

    for iteration in 0..MAX_KNOT_ITERATIONS {
        clear_subtree(iterator, ctx);
        let iter_t = resolve_box(iterator, ctx)?;
        let new_row = union_row(&tentative.row, &iter_t.row);
        if new_row == tentative.row {
            log::trace!("resolve: knot `{name}` reached a fixed point after {iteration} iterations");
            return Ok(tentative);
        }
        tentative = BoxType::new(name.clone(), new_row);
        ctx.get_mut(id).typ = Some(tentative.clone());
        log::trace!("resolve: knot `{name}` iteration {iteration} widened its row type");
    }
    Err(Error::new(ErrorKind::IllFormed).push_hint(format!(
        "recursive member `{name}` did not reach a fixed point within {MAX_KNOT_ITERATIONS} iterations"
    )))
}

/// Clears memoized types across `id`'s subtree so a `Knot` fixed-point
/// iteration can recompute it against the knot's widened tentative type.
/// Does not cross into a nested `Knot`'s own self-reference.
fn clear_subtree(id: BoxId, ctx: &mut AnnotateContext) {
    ctx.get_mut(id).typ = None;
    let children = box_children(&ctx.get(id).kind.clone());
    for c in children {
        clear_subtree(c, ctx);
    }
}

fn box_children(kind: &BoxKind) -> Vec<BoxId> {
    match kind {
        BoxKind::FromNothing | BoxKind::FromTable(_) | BoxKind::FromValues(_) => vec![],
        // Do not descend into the referenced box: for an ordinary CTE it is
        // resolved independently, and for a `Knot` self-reference it is the
        // very box whose tentative type drives this loop.
        BoxKind::FromReference { .. } => vec![],
        BoxKind::Select { over, .. }
        | BoxKind::Where { over, .. }
        | BoxKind::Group { over, .. }
        | BoxKind::Partition { over, .. }
        | BoxKind::Order { over, .. }
        | BoxKind::Limit { over, .. }
        | BoxKind::Define { over, .. }
        | BoxKind::IntBind { over, .. }
        | BoxKind::As { over, .. } => vec![*over],
        BoxKind::IntJoin { left, right, .. } => vec![*left, *right],
        BoxKind::Append { args } => args.clone(),
        BoxKind::With { over, ctes, .. } => {
            let mut v: Vec<BoxId> = ctes.iter().map(|(_, id)| *id).collect();
            v.push(*over);
            v
        }
        BoxKind::WithExternal { over, .. } => vec![*over],
        BoxKind::Knot { .. } => vec![],
    }
}

/// The resulting field type of a `Select`/`Group`/`Define` argument,
/// computed structurally over the still-unbound `Ref` tree (`link` is what
/// turns `Get`s into `NameBound`/`HandleBound`, so this walk re-derives just
/// enough structure to type each arg without mutating it).
fn field_type_of_ref(r: &Ref, over: &BoxType) -> FieldType {
    match r {
        Ref::Get { over: None, name } => over.row.fields.get(name).cloned().unwrap_or(FieldType::Scalar),
        Ref::Get { over: Some(inner), name } => match field_type_of_ref(inner, over) {
            FieldType::Row(row) => row.fields.get(name).cloned().unwrap_or(FieldType::Scalar),
            _ => FieldType::Scalar,
        },
        _ => FieldType::Scalar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::build as b;

    /// The recursive factorial `Knot` (`spec.md` §8 S6) reaches a fixed point
    /// whose row exposes exactly the seed's columns.
    #[test]
    fn knot_fixed_point_exposes_seed_columns() {
        let seed = b::define(b::from_nothing(), vec![b::as_(b::lit(1i64), "n"), b::as_(b::lit(1i64), "fact")])
            .unwrap();
        let step = b::define(
            b::where_(b::from_reference("factorial"), b::fun("<", vec![b::get("n"), b::lit(10i64)])),
            vec![
                b::as_(b::fun("+", vec![b::get("n"), b::lit(1i64)]), "n"),
                b::as_(b::fun("*", vec![b::get("n"), b::get("fact")]), "fact"),
            ],
        )
        .unwrap();
        let node = b::iterate(seed, step);

        let mut ctx = AnnotateContext::new();
        let root = crate::passes::annotate(&node, &mut ctx).unwrap();
        let typ = resolve_box(root, &mut ctx).unwrap();

        assert_eq!(typ.row.fields.len(), 2);
        assert!(typ.row.fields.contains_key(&Symbol::new("n")));
        assert!(typ.row.fields.contains_key(&Symbol::new("fact")));
    }

    #[test]
    fn from_table_resolves_every_column_to_scalar() {
        let table = crate::node::SQLTable::new("person", ["person_id", "name"]);
        let node = b::from_table(table);
        let mut ctx = AnnotateContext::new();
        let root = crate::passes::annotate(&node, &mut ctx).unwrap();
        let typ = resolve_box(root, &mut ctx).unwrap();
        assert_eq!(typ.row.fields[&Symbol::new("person_id")], FieldType::Scalar);
        assert_eq!(typ.row.fields[&Symbol::new("name")], FieldType::Scalar);
    }

    #[test]
    fn as_wraps_the_operand_under_its_own_name_only() {
        let table = crate::node::SQLTable::new("visit", ["visit_id", "person_id"]);
        let node = b::as_(b::from_table(table), "visit");
        let mut ctx = AnnotateContext::new();
        let root = crate::passes::annotate(&node, &mut ctx).unwrap();
        let typ = resolve_box(root, &mut ctx).unwrap();
        assert_eq!(typ.row.fields.len(), 1);
        assert!(matches!(typ.row.fields[&Symbol::new("visit")], FieldType::Row(_)));
    }

    /// A CTE bound without an enclosing `As` exposes its own flat columns,
    /// not a `{name: Row}` namespace, so a `FromReference` against it is
    /// invalid (`examples/original_source/src/funsql/compiler/resolve.py:94-98`).
    #[test]
    fn from_reference_into_an_unwrapped_cte_is_invalid() {
        let table = crate::node::SQLTable::new("t", ["x"]);
        let node = b::with(b::from_reference("t"), vec![b::from_table(table)], None).unwrap();
        let mut ctx = AnnotateContext::new();
        let root = crate::passes::annotate(&node, &mut ctx).unwrap();
        let err = resolve_box(root, &mut ctx).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidTableRef { ref name } if name.as_str() == "t"));
    }
}
