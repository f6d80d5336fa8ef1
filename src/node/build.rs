//! Plain constructor functions over `SQLNode`, supplementing the "surface
//! sugar" `spec.md` §1 excludes with the bare ergonomics
//! `examples/original_source/src/funsql/nodes.py` provides directly on top
//! of its node constructors (see `SPEC_FULL.md` §4.7). Every constructor
//! that carries a `label_map` validates it eagerly, surfacing
//! *duplicate-label* at construction time per `spec.md` §7.

use crate::error::Result;
use crate::node::symbol::Symbol;
use crate::node::value::Value;
use crate::node::{
    Frame, FromSource, LabelMap, NullsOrder, SQLNode, SQLNodeKind, SQLTable, SortDir,
};
use crate::node::catalog::ValuesTable;

pub fn from_table(table: SQLTable) -> SQLNode {
    SQLNode::new(SQLNodeKind::From(FromSource::Table(table)))
}

pub fn from_reference(name: impl Into<Symbol>) -> SQLNode {
    SQLNode::new(SQLNodeKind::From(FromSource::Reference(name.into())))
}

pub fn from_values(values: ValuesTable) -> SQLNode {
    SQLNode::new(SQLNodeKind::From(FromSource::Values(values)))
}

pub fn from_nothing() -> SQLNode {
    SQLNode::new(SQLNodeKind::From(FromSource::Nothing))
}

pub fn select(over: SQLNode, args: Vec<SQLNode>) -> Result<SQLNode> {
    let label_map = LabelMap::build(&args)?;
    Ok(SQLNode::new(SQLNodeKind::Select { over, args, label_map }))
}

pub fn where_(over: SQLNode, cond: SQLNode) -> SQLNode {
    SQLNode::new(SQLNodeKind::Where { over, cond })
}

#[allow(clippy::too_many_arguments)]
pub fn join(
    over: SQLNode,
    joinee: SQLNode,
    on: SQLNode,
    left: bool,
    right: bool,
    skip: bool,
    lateral: bool,
) -> SQLNode {
    SQLNode::new(SQLNodeKind::Join {
        over,
        joinee,
        on,
        left,
        right,
        skip,
        lateral,
    })
}

pub fn group(over: SQLNode, by: Vec<SQLNode>) -> Result<SQLNode> {
    let label_map = LabelMap::build(&by)?;
    Ok(SQLNode::new(SQLNodeKind::Group { over, by, label_map }))
}

pub fn partition(
    over: SQLNode,
    by: Vec<SQLNode>,
    order_by: Vec<SQLNode>,
    frame: Option<Frame>,
) -> SQLNode {
    SQLNode::new(SQLNodeKind::Partition {
        over,
        by,
        order_by,
        frame,
    })
}

pub fn order(over: SQLNode, by: Vec<SQLNode>) -> SQLNode {
    SQLNode::new(SQLNodeKind::Order { over, by })
}

pub fn limit(over: SQLNode, limit: Option<u64>, offset: Option<u64>) -> SQLNode {
    SQLNode::new(SQLNodeKind::Limit { over, limit, offset })
}

pub fn append(over: SQLNode, args: Vec<SQLNode>) -> SQLNode {
    SQLNode::new(SQLNodeKind::Append { over, args })
}

pub fn define(over: SQLNode, args: Vec<SQLNode>) -> Result<SQLNode> {
    let label_map = LabelMap::build(&args)?;
    Ok(SQLNode::new(SQLNodeKind::Define { over, args, label_map }))
}

pub fn iterate(over: SQLNode, iterator: SQLNode) -> SQLNode {
    SQLNode::new(SQLNodeKind::Iterate { over, iterator })
}

pub fn with(over: SQLNode, args: Vec<SQLNode>, materialized: Option<bool>) -> Result<SQLNode> {
    let label_map = LabelMap::build(&args)?;
    Ok(SQLNode::new(SQLNodeKind::With {
        over,
        args,
        label_map,
        materialized,
    }))
}

pub fn with_external(
    over: SQLNode,
    args: Vec<SQLNode>,
    schema: Option<Symbol>,
) -> Result<SQLNode> {
    let label_map = LabelMap::build(&args)?;
    Ok(SQLNode::new(SQLNodeKind::WithExternal {
        over,
        args,
        label_map,
        schema,
    }))
}

pub fn as_(over: SQLNode, name: impl Into<Symbol>) -> SQLNode {
    SQLNode::new(SQLNodeKind::As { over, name: name.into() })
}

pub fn bind(over: SQLNode, args: Vec<SQLNode>) -> Result<SQLNode> {
    let label_map = LabelMap::build(&args)?;
    Ok(SQLNode::new(SQLNodeKind::Bind { over, args, label_map }))
}

pub fn lit(value: impl Into<Value>) -> SQLNode {
    SQLNode::new(SQLNodeKind::Lit(value.into()))
}

pub fn var(name: impl Into<Symbol>) -> SQLNode {
    SQLNode::new(SQLNodeKind::Var(name.into()))
}

pub fn get(name: impl Into<Symbol>) -> SQLNode {
    SQLNode::new(SQLNodeKind::Get { over: None, name: name.into() })
}

/// Qualified column reference, e.g. `get_via(get("visit"), "person_id")` for
/// `Get.visit.person_id`.
pub fn get_via(over: SQLNode, name: impl Into<Symbol>) -> SQLNode {
    SQLNode::new(SQLNodeKind::Get {
        over: Some(over),
        name: name.into(),
    })
}

pub fn fun(name: impl Into<Symbol>, args: Vec<SQLNode>) -> SQLNode {
    SQLNode::new(SQLNodeKind::Fun { name: name.into(), args })
}

pub fn agg(name: impl Into<Symbol>, args: Vec<SQLNode>, distinct: bool, filter: Option<SQLNode>) -> SQLNode {
    SQLNode::new(SQLNodeKind::Agg {
        over: None,
        name: name.into(),
        args,
        distinct,
        filter,
    })
}

pub fn agg_count() -> SQLNode {
    agg("count", Vec::new(), false, None)
}

pub fn sort(over: SQLNode, dir: SortDir, nulls: Option<NullsOrder>) -> SQLNode {
    SQLNode::new(SQLNodeKind::Sort { over, dir, nulls })
}

pub fn asc(over: SQLNode) -> SQLNode {
    sort(over, SortDir::Asc, None)
}

pub fn desc(over: SQLNode) -> SQLNode {
    sort(over, SortDir::Desc, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::node::SQLTable;

    #[test]
    fn select_rejects_duplicate_labels() {
        let from = from_table(SQLTable::new("t", ["a", "b"]));
        let err = select(from, vec![get("a"), get("a")]).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DuplicateLabel { ref label } if label.as_str() == "a"));
    }

    #[test]
    fn select_allows_distinct_labels_including_renames() {
        let from = from_table(SQLTable::new("t", ["a", "b"]));
        let node = select(from, vec![get("a"), as_(get("b"), "b_renamed")]);
        assert!(node.is_ok());
    }

    #[test]
    fn get_via_chains_over_without_touching_the_outer_name() {
        let qualified = get_via(get("visit"), "person_id");
        assert_eq!(qualified.label(), Symbol::new("person_id"));
    }

    #[test]
    fn from_reference_label_is_the_referenced_name() {
        let node = from_reference("factorial");
        assert_eq!(node.label(), Symbol::new("factorial"));
    }
}
