//! A single-query benchmark, basically the criterion quick-start pattern
//! `prql-compiler/benches/bench.rs` uses: build one representative query
//! in-process (there's no source text to `include_str!`, `spec.md` §1 having
//! no front-end) and time `render` running it through all five passes.

use criterion::{criterion_group, criterion_main, Criterion};

use funsql::node::build as b;
use funsql::node::catalog::SQLTable;
use funsql::{render, Depth, Result, SQLCatalog, SQLDialect, SQLNode};

fn query() -> SQLNode {
    let from = b::from_table(SQLTable::new("person", ["person_id", "name", "year_of_birth"]));
    let cond = b::fun(">", vec![b::get("year_of_birth"), b::lit(2000i64)]);
    let filtered = b::where_(from, cond);
    b::select(filtered, vec![b::get("name")]).expect("well-formed benchmark query")
}

fn compile_query(node: &SQLNode, dialect: &SQLDialect, catalog: &SQLCatalog) -> Result<()> {
    render(node, Depth::Serialized, dialect, catalog)?;
    Ok(())
}

fn criterion_benchmark(c: &mut Criterion) {
    let node = query();
    let dialect = SQLDialect::postgresql();
    let catalog = SQLCatalog::new();
    c.bench_function("filter-select-query", |b| {
        b.iter(|| compile_query(&node, &dialect, &catalog))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
