//! Dialect round-trip matrix: the same node tree compiled against all three
//! canonical dialects, checking the emission knobs each one owns (`spec.md`
//! §6) rather than a full `assert_eq!` per dialect — mirroring `prqlc`'s own
//! `#[rstest]` dialect matrices in `tests/integration/sql.rs`.

use rstest::rstest;

use funsql::node::build as b;
use funsql::node::catalog::SQLTable;
use funsql::{render, Depth, SQLCatalog, SQLDialect, SQLString};

fn person_table() -> SQLTable {
    SQLTable::new("person", ["person_id", "name", "year_of_birth"])
}

fn compile(node: &funsql::SQLNode, dialect: &SQLDialect) -> SQLString {
    render(node, Depth::Serialized, dialect, &SQLCatalog::new())
        .unwrap()
        .into_serialized()
        .unwrap()
}

#[rstest]
#[case::postgresql(SQLDialect::postgresql(), "\"name\"")]
#[case::mysql(SQLDialect::mysql(), "`name`")]
#[case::sqlite(SQLDialect::sqlite(), "\"name\"")]
fn trivial_select_quotes_identifiers_per_dialect(#[case] dialect: SQLDialect, #[case] quoted_name: &str) {
    let from = b::from_table(person_table());
    let node = b::select(from, vec![b::get("name")]).unwrap();
    let sql = compile(&node, &dialect);
    assert!(sql.query.contains(quoted_name), "{}", sql.query);
}

#[rstest]
#[case::postgresql(SQLDialect::postgresql(), "OFFSET 5 ROWS\nFETCH FIRST 10 ROWS ONLY")]
#[case::mysql(SQLDialect::mysql(), "LIMIT 5, 10")]
#[case::sqlite(SQLDialect::sqlite(), "LIMIT 10 OFFSET 5")]
fn limit_offset_uses_each_dialects_own_syntax(#[case] dialect: SQLDialect, #[case] expected_tail: &str) {
    let from = b::from_table(person_table());
    let selected = b::select(from, vec![b::get("name")]).unwrap();
    let node = b::limit(selected, Some(10), Some(5));
    let sql = compile(&node, &dialect);
    assert!(sql.query.ends_with(expected_tail), "{}", sql.query);
}

#[rstest]
#[case::postgresql_numbered(SQLDialect::postgresql(), "$1")]
#[case::sqlite_numbered(SQLDialect::sqlite(), "?1")]
#[case::mysql_positional(SQLDialect::mysql(), "?")]
fn bound_variables_use_each_dialects_placeholder_style(#[case] dialect: SQLDialect, #[case] placeholder: &str) {
    let cond = b::fun("=", vec![b::get("person_id"), b::var("PID")]);
    let from = b::where_(b::from_table(person_table()), cond);
    let node = b::select(from, vec![b::get("name")]).unwrap();
    let sql = compile(&node, &dialect);
    assert!(sql.query.contains(placeholder), "{}", sql.query);
    assert_eq!(sql.variables, vec!["PID".into()]);
}

/// `spec.md` §3 invariant 6: group-only-for-dedup degrades to `SELECT
/// DISTINCT` instead of emitting a `GROUP BY` with no aggregate consuming it.
#[rstest]
#[case::postgresql(SQLDialect::postgresql())]
#[case::mysql(SQLDialect::mysql())]
#[case::sqlite(SQLDialect::sqlite())]
fn group_without_aggregate_degrades_to_distinct(#[case] dialect: SQLDialect) {
    let from = b::from_table(person_table());
    let grouped = b::group(from, vec![b::get("year_of_birth")]).unwrap();
    let node = b::select(grouped, vec![b::get("year_of_birth")]).unwrap();
    let sql = compile(&node, &dialect);
    assert!(sql.query.contains("SELECT DISTINCT"), "{}", sql.query);
    assert!(!sql.query.contains("GROUP BY"), "{}", sql.query);
}
