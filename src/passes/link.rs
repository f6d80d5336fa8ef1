//! Pass 3: rewrites each box's unbound `Get`/`Agg` refs into `NameBound`
//! refs (and validates them), walking top-down with the row type `resolve`
//! already computed at each box (`spec.md` §4.3). Grounded on
//! `compiler/link.py`'s reference-binding walk; the `IntJoin` "routing"
//! `spec.md` §4.3 describes is implicit here, since `resolve` already folds
//! both join sides into one row (see `passes::resolve`), so an unqualified
//! `Get` simply looks itself up in that merged row.

use crate::error::{Error, ErrorKind, Path, Result, WithErrorInfo};
use crate::ir::annotated::{AnnotateContext, BoxKind, Ref};
use crate::ir::handle::BoxId;
use crate::ir::types::{FieldType, GroupType, RowType};

pub fn link(root: BoxId, ctx: &mut AnnotateContext) -> Result<()> {
    log::debug!("link: {} boxes to bind top-down", ctx.len());
    let result = link_box(root, ctx, &Path::root());
    log::debug!("link: done");
    result
}

fn link_box(id: BoxId, ctx: &mut AnnotateContext, path: &Path) -> Result<()> {
    let label = ctx.get(id).label.clone();
    let here = path.push(label);
    let row = ctx
        .get(id)
        .typ
        .clone()
        .expect("resolve must run before link")
        .row;

    let mut kind = ctx.get(id).kind.clone();
    match &mut kind {
        BoxKind::FromNothing
        | BoxKind::FromTable(_)
        | BoxKind::FromValues(_)
        | BoxKind::FromReference { .. } => {}
        BoxKind::Select { over, args } => {
            let over_t = ctx.get(*over).typ.clone().unwrap();
            for (_, r) in args.iter_mut() {
                link_ref(r, &over_t.row, &over_t.row.group, true, &here)?;
            }
            link_box(*over, ctx, &here)?;
        }
        BoxKind::Where { over, cond } => {
            let over_t = ctx.get(*over).typ.clone().unwrap();
            link_ref(cond, &over_t.row, &over_t.row.group, true, &here)?;
            link_box(*over, ctx, &here)?;
        }
        BoxKind::IntJoin { left, right, on, .. } => {
            link_ref(on, &row, &row.group, true, &here)?;
            link_box(*left, ctx, &here)?;
            link_box(*right, ctx, &here)?;
        }
        BoxKind::Group { over, by } => {
            let over_t = ctx.get(*over).typ.clone().unwrap();
            for (_, r) in by.iter_mut() {
                link_ref(r, &over_t.row, &over_t.row.group, true, &here)?;
            }
            link_box(*over, ctx, &here)?;
        }
        BoxKind::Partition { over, by, order_by, .. } => {
            let over_t = ctx.get(*over).typ.clone().unwrap();
            for r in by.iter_mut().chain(order_by.iter_mut()) {
                link_ref(r, &over_t.row, &over_t.row.group, true, &here)?;
            }
            link_box(*over, ctx, &here)?;
        }
        BoxKind::Order { over, by } => {
            let over_t = ctx.get(*over).typ.clone().unwrap();
            for r in by.iter_mut() {
                link_ref(r, &over_t.row, &over_t.row.group, true, &here)?;
            }
            link_box(*over, ctx, &here)?;
        }
        BoxKind::Limit { over, .. } => {
            link_box(*over, ctx, &here)?;
        }
        BoxKind::Append { args } => {
            for a in args.clone() {
                link_box(a, ctx, &here)?;
            }
        }
        BoxKind::Define { over, args } => {
            let over_t = ctx.get(*over).typ.clone().unwrap();
            for (_, r) in args.iter_mut() {
                link_ref(r, &over_t.row, &over_t.row.group, true, &here)?;
            }
            link_box(*over, ctx, &here)?;
        }
        BoxKind::IntBind { over, args, .. } => {
            let over_t = ctx.get(*over).typ.clone().unwrap();
            for (_, r) in args.iter_mut() {
                link_ref(r, &over_t.row, &over_t.row.group, true, &here)?;
            }
            link_box(*over, ctx, &here)?;
        }
        BoxKind::With { over, ctes, .. } => {
            for (_, cte_id) in ctes.clone() {
                link_box(cte_id, ctx, &here)?;
            }
            link_box(*over, ctx, &here)?;
        }
        BoxKind::WithExternal { over, .. } => {
            link_box(*over, ctx, &here)?;
        }
        BoxKind::As { over, .. } => {
            link_box(*over, ctx, &here)?;
        }
        BoxKind::Knot { seed, iterator, .. } => {
            link_box(*seed, ctx, &here)?;
            link_box(*iterator, ctx, &here)?;
        }
    }
    ctx.get_mut(id).kind = kind;
    Ok(())
}

/// Resolves and rewrites `r` in place against `row` (the current box's
/// visible columns) and, when inside an aggregating context, `group` (the
/// pre-grouping row `Agg`s without an explicit `over` reach through).
/// `terminal` marks call sites where `r`'s value is consumed directly as a
/// scalar (a `Select`/`Where`/`Fun` argument, ...) rather than navigated
/// through by an enclosing `Get`/`Agg`'s own `over` — only terminal call
/// sites reject a `Get` that bottoms out on a nested row.
/// Returns `r`'s own resolved type, so a caller navigating one more `Get`/
/// `Agg` level can tell whether it bottomed out on a nested row or a scalar.
fn link_ref(r: &mut Ref, row: &RowType, group: &GroupType, terminal: bool, path: &Path) -> Result<FieldType> {
    match r {
        Ref::Lit(_) | Ref::Var(_) => Ok(FieldType::Scalar),
        Ref::Get { over, name } => {
            let field_row = match over {
                None => row.clone(),
                Some(inner) => match link_ref(inner, row, group, false, path)? {
                    FieldType::Row(r) => r,
                    _ => {
                        return Err(Error::new(ErrorKind::UnexpectedScalarType { name: name.clone() })
                            .with_path(path.clone()))
                    }
                },
            };
            let ty = field_row.fields.get(name).cloned().ok_or_else(|| {
                Error::new(ErrorKind::UndefinedName { name: name.clone() }).with_path(path.clone())
            })?;
            if matches!(ty, FieldType::Ambiguous) {
                return Err(Error::new(ErrorKind::AmbiguousName { name: name.clone() }).with_path(path.clone()));
            }
            if terminal {
                if let FieldType::Row(_) = ty {
                    return Err(Error::new(ErrorKind::UnexpectedRowType { name: name.clone() }).with_path(path.clone()));
                }
            }
            *r = Ref::NameBound {
                name: name.clone(),
                over: over.take(),
            };
            Ok(ty)
        }
        Ref::Fun { args, .. } => {
            for a in args.iter_mut() {
                link_ref(a, row, group, true, path)?;
            }
            Ok(FieldType::Scalar)
        }
        Ref::Agg { over, args, filter, .. } => {
            let agg_row = match over {
                None => match group {
                    GroupType::Row(g, _) => g.clone(),
                    GroupType::Ambiguous => return Err(Error::new(ErrorKind::AmbiguousAgg).with_path(path.clone())),
                    GroupType::Empty => return Err(Error::new(ErrorKind::UnexpectedAgg).with_path(path.clone())),
                },
                Some(inner) => match link_ref(inner, row, group, false, path)? {
                    FieldType::Row(r) => r,
                    _ => return Err(Error::new(ErrorKind::UnexpectedAgg).with_path(path.clone())),
                },
            };
            for a in args.iter_mut() {
                link_ref(a, &agg_row, &GroupType::Empty, true, path)?;
            }
            if let Some(f) = filter {
                link_ref(f, &agg_row, &GroupType::Empty, true, path)?;
            }
            Ok(FieldType::Scalar)
        }
        Ref::Sort { over, .. } => link_ref(over, row, group, terminal, path),
        Ref::NameBound { .. } | Ref::HandleBound { .. } => Ok(FieldType::Scalar),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::build as b;
    use crate::node::SQLTable;
    use crate::passes::{annotate, resolve};

    fn linked(node: &crate::node::SQLNode) -> Result<()> {
        let mut ctx = AnnotateContext::new();
        let root = annotate(node, &mut ctx).unwrap();
        resolve(root, &mut ctx).unwrap();
        link(root, &mut ctx)
    }

    #[test]
    fn undefined_name_is_reported_with_the_missing_column() {
        let from = b::from_table(SQLTable::new("person", ["name"]));
        let node = b::select(from, vec![b::get("missing")]).unwrap();
        let err = linked(&node).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UndefinedName { ref name } if name.as_str() == "missing"));
    }

    #[test]
    fn agg_without_enclosing_group_is_unexpected() {
        let from = b::from_table(SQLTable::new("person", ["name"]));
        let node = b::select(from, vec![b::agg_count()]).unwrap();
        let err = linked(&node).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnexpectedAgg));
    }

    #[test]
    fn get_through_a_scalar_field_is_rejected() {
        let from = b::from_table(SQLTable::new("person", ["name"]));
        let node = b::select(from, vec![b::get_via(b::get("name"), "nested")]).unwrap();
        let err = linked(&node).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnexpectedScalarType { .. }));
    }

    #[test]
    fn plain_columns_link_cleanly() {
        let from = b::from_table(SQLTable::new("person", ["person_id", "name"]));
        let node = b::select(from, vec![b::get("name")]).unwrap();
        assert!(linked(&node).is_ok());
    }

    /// A bare qualifying `Get` that bottoms out on a namespace rather than a
    /// scalar (e.g. `Select(Get.visit)` instead of `Select(Get.visit.id)`) is
    /// rejected rather than silently carried through as a row-valued column.
    #[test]
    fn select_arg_bottoming_out_on_a_row_is_rejected() {
        let visit = b::as_(b::from_table(SQLTable::new("visit", ["visit_id"])), "visit");
        let node = b::select(visit, vec![b::get("visit")]).unwrap();
        let err = linked(&node).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnexpectedRowType { ref name } if name.as_str() == "visit"));
    }

    /// Joining two independently-grouped relations leaves the merged group
    /// context ambiguous (`ir::types::union_row`), so a bare `Agg` above the
    /// join is rejected distinctly from the plain "no group at all" case.
    #[test]
    fn agg_above_a_join_of_differently_grouped_sides_is_ambiguous() {
        let left = b::group(b::from_table(SQLTable::new("a", ["x"])), vec![b::get("x")]).unwrap();
        let right = b::group(b::from_table(SQLTable::new("b", ["y"])), vec![b::get("y")]).unwrap();
        let joined = b::join(left, right, b::lit(true), false, false, false, false);
        let node = b::select(joined, vec![b::agg_count()]).unwrap();
        let err = linked(&node).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::AmbiguousAgg));
    }
}
