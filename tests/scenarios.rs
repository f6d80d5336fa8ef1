//! "This node tree compiles to this SQL" tests, mirroring the shape of
//! `prqlc`'s own `tests/integration/sql.rs` (`assert_snapshot!`/`assert_eq!`
//! against a fixed compile output) but building a `SQLNode` tree directly
//! since there's no source text to feed a parser.

use funsql::node::build as b;
use funsql::node::catalog::SQLTable;
use funsql::{render, Depth, SQLCatalog, SQLDialect, SQLNode};

fn person_table() -> SQLTable {
    SQLTable::new("person", ["person_id", "name", "year_of_birth"])
}

fn visit_table() -> SQLTable {
    SQLTable::new("visit", ["visit_id", "person_id", "visit_start_date"])
}

fn compile(node: &SQLNode, dialect: &SQLDialect) -> String {
    render(node, Depth::Serialized, dialect, &SQLCatalog::new())
        .unwrap()
        .into_serialized()
        .unwrap()
        .query
}

/// S1: `From(person) >> Select(Get.name)`.
#[test]
fn trivial_select() {
    let from = b::from_table(person_table());
    let node = b::select(from, vec![b::get("name")]).unwrap();
    let sql = compile(&node, &SQLDialect::postgresql());
    assert_eq!(sql, "SELECT \"person_1\".\"name\"\nFROM \"person\" AS \"person_1\"");
}

/// S2: `From(person) >> Where(Get.year_of_birth > 2000) >> Select(Get.name)`.
#[test]
fn filtered_select() {
    let from = b::from_table(person_table());
    let cond = b::fun(">", vec![b::get("year_of_birth"), b::lit(2000i64)]);
    let filtered = b::where_(from, cond);
    let node = b::select(filtered, vec![b::get("name")]).unwrap();
    let sql = compile(&node, &SQLDialect::postgresql());
    assert_eq!(
        sql,
        "SELECT \"person_1\".\"name\"\n\
         FROM \"person\" AS \"person_1\"\n\
         WHERE (\"person_1\".\"year_of_birth\" > 2000)"
    );
}

/// S3: `From(person) >> Group(Get.year_of_birth) >> Select(Get.year_of_birth, Agg.count())`.
#[test]
fn group_and_count() {
    let from = b::from_table(person_table());
    let grouped = b::group(from, vec![b::get("year_of_birth")]).unwrap();
    let node = b::select(grouped, vec![b::get("year_of_birth"), b::agg_count()]).unwrap();
    let sql = compile(&node, &SQLDialect::postgresql());
    assert_eq!(
        sql,
        "SELECT\n  \
         \"person_1\".\"year_of_birth\",\n  \
         COUNT(*) AS \"count\"\n\
         FROM \"person\" AS \"person_1\"\n\
         GROUP BY \"person_1\".\"year_of_birth\""
    );
}

/// S4: inner join of `person` and `visit` on `person_id`, selecting from both sides.
#[test]
fn inner_join() {
    let person = b::from_table(person_table());
    let visit = b::as_(b::from_table(visit_table()), "visit");
    let on = b::fun(
        "=",
        vec![b::get("person_id"), b::get_via(b::get("visit"), "person_id")],
    );
    let joined = b::join(person, visit, on, false, false, false, false);
    let node = b::select(
        joined,
        vec![b::get("name"), b::get_via(b::get("visit"), "visit_start_date")],
    )
    .unwrap();
    let sql = compile(&node, &SQLDialect::postgresql());
    assert_eq!(
        sql,
        "SELECT\n  \
         \"person_1\".\"name\",\n  \
         \"visit_1\".\"visit_start_date\"\n\
         FROM \"person\" AS \"person_1\"\n\
         JOIN \"visit\" AS \"visit_1\" ON (\"person_1\".\"person_id\" = \"visit_1\".\"person_id\")"
    );
}

/// S5-like: a `LEFT JOIN LATERAL` correlated to the most recent visit per
/// person, built from `Where`/`Order`/`Limit`/`Bind`/`As` the way a lateral
/// subquery join is expressed without surface syntax.
#[test]
fn lateral_join_correlates_on_bound_variable() {
    let person = b::from_table(person_table());

    let cond = b::fun("=", vec![b::get("person_id"), b::var("PID")]);
    let recent_visit = b::limit(
        b::order(b::where_(b::from_table(visit_table()), cond), vec![b::desc(b::get("visit_start_date"))]),
        Some(1),
        None,
    );
    let bound = b::bind(recent_visit, vec![b::as_(b::get("person_id"), "PID")]).unwrap();
    let last_visit = b::as_(bound, "last");

    let joined = b::join(person, last_visit, b::lit(true), true, false, false, true);
    let node = b::select(joined, vec![b::get("name")]).unwrap();
    let sql = compile(&node, &SQLDialect::postgresql());

    assert!(sql.contains("LEFT JOIN LATERAL"), "{sql}");
    assert!(sql.contains("ON TRUE"), "{sql}");
    assert!(sql.contains("\"person_1\".\"person_id\""), "{sql}");
    assert!(sql.contains("ORDER BY \"visit_1\".\"visit_start_date\" DESC"), "{sql}");
    assert!(sql.contains("FETCH FIRST 1 ROW ONLY"), "{sql}");
}

/// S6: factorial computed to 10 via a recursive CTE (`Knot`/`IntIterate`).
#[test]
fn recursive_factorial() {
    let seed = b::define(
        b::from_nothing(),
        vec![b::as_(b::lit(1i64), "n"), b::as_(b::lit(1i64), "fact")],
    )
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

    let sql = compile(&node, &SQLDialect::postgresql());
    assert!(sql.starts_with("WITH RECURSIVE"), "{sql}");
    assert!(sql.contains("\"factorial_1\""), "{sql}");
    assert!(sql.contains("UNION ALL"), "{sql}");
    assert!(sql.contains("(\"n\" < 10)") || sql.contains("\"n\" < 10"), "{sql}");
}
