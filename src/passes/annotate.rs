//! Pass 1: rewrites a user `SQLNode` tree into an `AnnotateContext`'s `Box`
//! arena (`spec.md` §4.1). Grounded on `compiler/annotate.py`'s
//! `populate_dict`/`Annotation` walk, restructured as two mutually recursive
//! functions — one per tabular/scalar position — over the closed
//! `SQLNodeKind` union instead of `singledispatch`.

use crate::error::{Error, ErrorKind, Path, Result, WithErrorInfo};
use crate::ir::annotated::{AnnotateContext, BoxKind, Ref};
use crate::ir::handle::BoxId;
use crate::node::{FromSource, SQLNode, SQLNodeKind};

/// Entry point: annotates `root` and returns the id of its outermost box.
pub fn annotate(root: &SQLNode, ctx: &mut AnnotateContext) -> Result<BoxId> {
    log::debug!("annotate: starting from a fresh box arena");
    let result = annotate_tabular(root, ctx, &Path::root());
    log::debug!("annotate: produced {} boxes", ctx.len());
    result
}

fn annotate_tabular(node: &SQLNode, ctx: &mut AnnotateContext, path: &Path) -> Result<BoxId> {
    if !node.is_tabular_position_ok() {
        return Err(Error::new(ErrorKind::IllFormed).with_path(path.clone()));
    }
    let label = node.label();
    let here = path.push(label.clone());

    match node.kind() {
        SQLNodeKind::From(FromSource::Nothing) => Ok(ctx.push_box(BoxKind::FromNothing, label)),
        SQLNodeKind::From(FromSource::Table(t)) => {
            Ok(ctx.push_box(BoxKind::FromTable(t.clone()), label))
        }
        SQLNodeKind::From(FromSource::Values(v)) => {
            Ok(ctx.push_box(BoxKind::FromValues(v.clone()), label))
        }
        SQLNodeKind::From(FromSource::Reference(name)) => {
            let target = ctx
                .resolve_cte(name)
                .ok_or_else(|| Error::new(ErrorKind::UndefinedTableRef { name: name.clone() }).with_path(here.clone()))?;
            Ok(ctx.push_box(
                BoxKind::FromReference {
                    name: name.clone(),
                    target,
                },
                label,
            ))
        }
        SQLNodeKind::Select { over, args, .. } => {
            let over_id = annotate_tabular(over, ctx, &here)?;
            let mut out = Vec::with_capacity(args.len());
            for a in args {
                out.push((a.label(), annotate_scalar(a, over_id, ctx, &here)?));
            }
            Ok(ctx.push_box(BoxKind::Select { over: over_id, args: out }, label))
        }
        SQLNodeKind::Where { over, cond } => {
            let over_id = annotate_tabular(over, ctx, &here)?;
            let cond = annotate_scalar(cond, over_id, ctx, &here)?;
            Ok(ctx.push_box(BoxKind::Where { over: over_id, cond }, label))
        }
        SQLNodeKind::Join {
            over,
            joinee,
            on,
            left,
            right,
            lateral,
            ..
        } => {
            let left_id = annotate_tabular(over, ctx, &here)?;
            let right_id = annotate_tabular(joinee, ctx, &here)?;
            // `on` may reference either side; both are in scope, so we link
            // it against the left box and let `link` re-resolve unbound
            // `Get`s against whichever side actually defines the name
            // (`spec.md` §4.1's IntJoin routing notes).
            let on_ref = annotate_scalar(on, left_id, ctx, &here)?;
            Ok(ctx.push_box(
                BoxKind::IntJoin {
                    left: left_id,
                    right: right_id,
                    on: on_ref,
                    is_left: *left,
                    is_right: *right,
                    lateral: *lateral,
                },
                label,
            ))
        }
        SQLNodeKind::Group { over, by, .. } => {
            let over_id = annotate_tabular(over, ctx, &here)?;
            let mut out = Vec::with_capacity(by.len());
            for b in by {
                out.push((b.label(), annotate_scalar(b, over_id, ctx, &here)?));
            }
            Ok(ctx.push_box(BoxKind::Group { over: over_id, by: out }, label))
        }
        SQLNodeKind::Partition { over, by, order_by, frame } => {
            let over_id = annotate_tabular(over, ctx, &here)?;
            let by = by
                .iter()
                .map(|b| annotate_scalar(b, over_id, ctx, &here))
                .collect::<Result<Vec<_>>>()?;
            let order_by = order_by
                .iter()
                .map(|o| annotate_scalar(o, over_id, ctx, &here))
                .collect::<Result<Vec<_>>>()?;
            Ok(ctx.push_box(
                BoxKind::Partition {
                    over: over_id,
                    by,
                    order_by,
                    frame: frame.clone(),
                },
                label,
            ))
        }
        SQLNodeKind::Order { over, by } => {
            let over_id = annotate_tabular(over, ctx, &here)?;
            let by = by
                .iter()
                .map(|o| annotate_scalar(o, over_id, ctx, &here))
                .collect::<Result<Vec<_>>>()?;
            Ok(ctx.push_box(BoxKind::Order { over: over_id, by }, label))
        }
        SQLNodeKind::Limit { over, limit, offset } => {
            let over_id = annotate_tabular(over, ctx, &here)?;
            Ok(ctx.push_box(
                BoxKind::Limit {
                    over: over_id,
                    limit: *limit,
                    offset: *offset,
                },
                label,
            ))
        }
        SQLNodeKind::Append { over, args } => {
            let over_id = annotate_tabular(over, ctx, &here)?;
            let mut ids = vec![over_id];
            for a in args {
                ids.push(annotate_tabular(a, ctx, &here)?);
            }
            Ok(ctx.push_box(BoxKind::Append { args: ids }, label))
        }
        SQLNodeKind::Define { over, args, .. } => {
            let over_id = annotate_tabular(over, ctx, &here)?;
            let mut out = Vec::with_capacity(args.len());
            for a in args {
                out.push((a.label(), annotate_scalar(a, over_id, ctx, &here)?));
            }
            Ok(ctx.push_box(BoxKind::Define { over: over_id, args: out }, label))
        }
        SQLNodeKind::Bind { over, args, .. } => {
            let over_id = annotate_tabular(over, ctx, &here)?;
            let mut out = Vec::with_capacity(args.len());
            for a in args {
                out.push((a.label(), annotate_scalar(a, over_id, ctx, &here)?));
            }
            Ok(ctx.push_box(
                BoxKind::IntBind {
                    over: over_id,
                    args: out,
                    owned: true,
                },
                label,
            ))
        }
        SQLNodeKind::With { over, args, materialized, .. } => {
            let mut ctes = Vec::with_capacity(args.len());
            let over_id = {
                let mut scope = ctx.enter_cte_scope();
                for a in args {
                    let id = annotate_tabular(a, &mut scope, &here)?;
                    let name = a.label();
                    scope.bind_cte(name.clone(), id);
                    ctes.push((name, id));
                }
                annotate_tabular(over, &mut scope, &here)?
            };
            Ok(ctx.push_box(
                BoxKind::With {
                    over: over_id,
                    ctes,
                    materialized: *materialized,
                },
                label,
            ))
        }
        SQLNodeKind::WithExternal { over, args, schema, .. } => {
            let mut ctes = Vec::with_capacity(args.len());
            let over_id = {
                let mut scope = ctx.enter_cte_scope();
                for a in args {
                    let id = annotate_tabular(a, &mut scope, &here)?;
                    let name = a.label();
                    scope.bind_cte(name.clone(), id);
                    ctes.push(name);
                }
                annotate_tabular(over, &mut scope, &here)?
            };
            Ok(ctx.push_box(
                BoxKind::WithExternal {
                    over: over_id,
                    ctes,
                    schema: schema.clone(),
                },
                label,
            ))
        }
        SQLNodeKind::Iterate { over, iterator } => {
            // The CTE name is the recursive member's own label (e.g. the
            // `From(factorial)` inside `iterator`), not `node.label()` —
            // that falls back to `over`'s (the seed's) label and would bind
            // the wrong name, leaving `From(factorial)` unresolvable.
            let knot_name = iterator.label();
            let knot_id = ctx.reserve_box();
            let seed_id = annotate_tabular(over, ctx, &here)?;
            let iter_id = {
                let mut scope = ctx.enter_cte_scope();
                scope.bind_cte(knot_name.clone(), knot_id);
                annotate_tabular(iterator, &mut scope, &here)?
            };
            ctx.set_box(
                knot_id,
                BoxKind::Knot {
                    seed: seed_id,
                    iterator: iter_id,
                    name: knot_name,
                },
                label,
            );
            Ok(knot_id)
        }
        SQLNodeKind::As { over, name } => {
            let over_id = annotate_tabular(over, ctx, &here)?;
            Ok(ctx.push_box(BoxKind::As { over: over_id, name: name.clone() }, label))
        }
        _ => unreachable!("is_tabular_position_ok guards against non-tabular kinds"),
    }
}

/// Annotates a scalar expression. `current` is the box the expression is
/// evaluated against — an unqualified `Get`/`Agg` resolves implicitly
/// against it.
fn annotate_scalar(node: &SQLNode, current: BoxId, ctx: &mut AnnotateContext, path: &Path) -> Result<Ref> {
    match node.kind() {
        SQLNodeKind::Lit(v) => Ok(Ref::Lit(v.clone())),
        SQLNodeKind::Var(name) => Ok(Ref::Var(name.clone())),
        SQLNodeKind::Get { over, name } => {
            let over = match over {
                Some(o) => Some(Box::new(annotate_scalar(o, current, ctx, path)?)),
                None => None,
            };
            Ok(Ref::Get { over, name: name.clone() })
        }
        SQLNodeKind::Fun { name, args } => {
            let args = args
                .iter()
                .map(|a| annotate_scalar(a, current, ctx, path))
                .collect::<Result<Vec<_>>>()?;
            Ok(Ref::Fun { name: name.clone(), args })
        }
        SQLNodeKind::Agg { over, name, args, distinct, filter } => {
            let over = match over {
                Some(o) => Some(Box::new(annotate_scalar(o, current, ctx, path)?)),
                None => None,
            };
            let args = args
                .iter()
                .map(|a| annotate_scalar(a, current, ctx, path))
                .collect::<Result<Vec<_>>>()?;
            let filter = match filter {
                Some(f) => Some(Box::new(annotate_scalar(f, current, ctx, path)?)),
                None => None,
            };
            Ok(Ref::Agg {
                over,
                name: name.clone(),
                args,
                distinct: *distinct,
                filter,
            })
        }
        SQLNodeKind::Sort { over, dir, nulls } => {
            let over = Box::new(annotate_scalar(over, current, ctx, path)?);
            Ok(Ref::Sort { over, dir: *dir, nulls: *nulls })
        }
        // `As` used in scalar position renames a column; annotate its
        // operand and carry the rename as a plain re-`Get` under the new
        // name (resolved again during `link`).
        SQLNodeKind::As { over, .. } => annotate_scalar(over, current, ctx, path),
        _ => Err(Error::new(ErrorKind::IllFormed).with_path(path.clone())),
    }
}
