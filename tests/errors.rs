//! The four error scenarios a malformed node tree can raise, one per
//! diagnostic path through `annotate`/`link` (`spec.md` §8).

use funsql::node::build as b;
use funsql::node::catalog::SQLTable;
use funsql::{render, Depth, ErrorKind, SQLCatalog, SQLDialect};

fn person_table() -> SQLTable {
    SQLTable::new("person", ["person_id", "name", "year_of_birth"])
}

fn compile_err(node: &funsql::SQLNode) -> ErrorKind {
    render(node, Depth::Serialized, &SQLDialect::postgresql(), &SQLCatalog::new())
        .unwrap_err()
        .kind
}

/// `Select(Get.a, Get.a)` — two args with the same label.
#[test]
fn duplicate_label_rejected_at_construction() {
    let from = b::from_table(person_table());
    let err = b::select(from, vec![b::get("name"), b::get("name")]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DuplicateLabel { .. }), "{err:?}");
}

/// `From(person) >> Select(Get.missing)` — no such column on `person`.
#[test]
fn undefined_name_on_missing_column() {
    let from = b::from_table(person_table());
    let node = b::select(from, vec![b::get("missing")]).unwrap();
    let kind = compile_err(&node);
    assert!(matches!(kind, ErrorKind::UndefinedName { name } if name.as_str() == "missing"), "{kind:?}");
}

/// `From(missing_table)` — no such CTE or catalog entry.
#[test]
fn undefined_table_ref_on_missing_cte() {
    let node = b::from_reference("missing_table");
    let kind = compile_err(&node);
    assert!(matches!(kind, ErrorKind::UndefinedTableRef { name } if name.as_str() == "missing_table"), "{kind:?}");
}

/// `From(person) >> Select(Agg.count())` with no enclosing `Group`/`Partition`.
#[test]
fn unexpected_agg_outside_group() {
    let from = b::from_table(person_table());
    let node = b::select(from, vec![b::agg_count()]).unwrap();
    let kind = compile_err(&node);
    assert!(matches!(kind, ErrorKind::UnexpectedAgg), "{kind:?}");
}
