//! External-facing catalog types (`spec.md` §6), grounded on
//! `examples/original_source/src/funsql/sqlcontext.py`'s `SQLTable`/
//! `SQLCatalog`/`ValuesTable`, restructured as plain Rust value types.

use std::collections::BTreeMap;

use crate::node::symbol::Symbol;
use crate::node::value::Value;

/// A known table (or view) a `From` node may reference.
#[derive(Clone, Debug, PartialEq)]
pub struct SQLTable {
    pub name: Symbol,
    pub columns: Vec<Symbol>,
    pub schema: Option<Symbol>,
}

impl SQLTable {
    pub fn new(name: impl Into<Symbol>, columns: impl IntoIterator<Item = impl Into<Symbol>>) -> Self {
        SQLTable {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<Symbol>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

/// An inline row set, rendered as `FROM (VALUES ...) AS t(col1, col2, ...)`
/// or a dialect-specific alternative (`spec.md` §4.4, `FromValues`).
#[derive(Clone, Debug, PartialEq)]
pub struct ValuesTable {
    pub columns: Vec<Symbol>,
    pub rows: Vec<Vec<Value>>,
}

impl ValuesTable {
    /// Builds a `ValuesTable`, enforcing invariant 7 of `spec.md` §3: every
    /// row's arity equals the column count.
    pub fn new(
        columns: impl IntoIterator<Item = impl Into<Symbol>>,
        rows: Vec<Vec<Value>>,
    ) -> Self {
        let columns: Vec<Symbol> = columns.into_iter().map(Into::into).collect();
        for row in &rows {
            assert_eq!(
                row.len(),
                columns.len(),
                "ValuesTable row arity must match column count"
            );
        }
        ValuesTable { columns, rows }
    }
}

/// Catalog of known tables, paired with the dialect queries against it
/// should be compiled for.
#[derive(Clone, Debug, Default)]
pub struct SQLCatalog {
    pub tables: BTreeMap<Symbol, SQLTable>,
}

impl SQLCatalog {
    pub fn new() -> Self {
        SQLCatalog::default()
    }

    pub fn table(mut self, table: SQLTable) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    pub fn get(&self, name: &Symbol) -> Option<&SQLTable> {
        self.tables.get(name)
    }
}
