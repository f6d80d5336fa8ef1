//! Pass 5: walks a `Clause` tree into SQL text (`spec.md` §4.5). Grounded on
//! `examples/original_source/src/funsql/compiler/serialize.py`'s
//! `serialize`/`Serializer` walk, restructured as a `Serializer` struct that
//! owns the output buffer, indentation level and bind-variable bookkeeping —
//! the Rust analogue of `prqlc::sql::postprocess::pad_case_body`-style
//! stateful printing, but dispatched over this crate's own closed `Clause`
//! enum rather than over `sqlparser`'s AST.
//!
//! Every dialect-dependent decision `spec.md` §6 lists (variable style,
//! limit shape, id quoting, boolean/datetime literal rendering, `VALUES`
//! column naming, the recursive-CTE annotation) is resolved here, not in
//! `translate` — see `translate`'s module doc and DESIGN.md.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::clause::{Clause, CteDef, FromBody, JoinKind, SelectBody, TopStyle};
use crate::dialect::{LimitStyle, SQLDialect, VarStyle};
use crate::node::symbol::Symbol;
use crate::node::value::Value;

/// A fully rendered query: the SQL text plus the bind variables it
/// references, in placeholder order (`spec.md` §4.5, §6 "Output"). `Serialize`
/// backs the `funsql` binary's `--format yaml` dump (`prqlc`'s `cli::Format`
/// plays the same role for its own intermediate representations).
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct SQLString {
    pub query: String,
    pub variables: Vec<Symbol>,
}

/// Renders `clause` for `dialect` (`spec.md` §6 `render_clause`).
pub fn serialize(clause: &Clause, dialect: &SQLDialect) -> SQLString {
    log::debug!("serialize: rendering for dialect `{}`", dialect.name);
    let mut s = Serializer::new(dialect);
    s.write_clause(clause);
    log::debug!("serialize: done, {} chars, {} variable(s)", s.buf.len(), s.variables.len());
    SQLString { query: s.buf, variables: s.variables }
}

struct Serializer<'d> {
    dialect: &'d SQLDialect,
    buf: String,
    level: usize,
    variables: Vec<Symbol>,
    /// First-occurrence index of each variable name, for numbered/named
    /// dialect deduplication (`spec.md` §4.5 "VAR").
    var_seen: BTreeMap<Symbol, usize>,
}

const INDENT: &str = "  ";

impl<'d> Serializer<'d> {
    fn new(dialect: &'d SQLDialect) -> Self {
        Serializer {
            dialect,
            buf: String::new(),
            level: 0,
            variables: Vec::new(),
            var_seen: BTreeMap::new(),
        }
    }

    fn newline(&mut self) {
        self.buf.push('\n');
        for _ in 0..self.level {
            self.buf.push_str(INDENT);
        }
    }

    fn quote_id(&self, name: &Symbol) -> String {
        let (open, close) = self.dialect.id_quotes;
        let escaped = name.as_str().replace(close, &format!("{close}{close}"));
        format!("{open}{escaped}{close}")
    }

    fn write_qualified_id(&mut self, table: &Option<Symbol>, column: &Symbol) {
        if let Some(t) = table {
            let _ = write!(self.buf, "{}.", self.quote_id(t));
        }
        let _ = write!(self.buf, "{}", self.quote_id(column));
    }

    fn write_value(&mut self, v: &Value) {
        match v {
            Value::Null => self.buf.push_str("NULL"),
            Value::Bool(b) => {
                if self.dialect.has_bool_literals {
                    self.buf.push_str(if *b { "TRUE" } else { "FALSE" });
                } else {
                    self.buf.push_str(if *b { "(1=1)" } else { "(1=0)" });
                }
            }
            Value::Int(i) => {
                let _ = write!(self.buf, "{i}");
            }
            Value::Float(f) => {
                let _ = write!(self.buf, "{f}");
            }
            Value::Str(s) => self.write_quoted_str(s),
            Value::Date(d) => self.write_typed_or_str("DATE", &d.to_string()),
            Value::DateTime(dt) => self.write_typed_or_str("TIMESTAMP", &dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            Value::Time(t) => self.write_typed_or_str("TIME", &t.to_string()),
            Value::Interval { seconds, microseconds } => {
                if *microseconds == 0 {
                    let _ = write!(self.buf, "INTERVAL '{seconds}' SECOND");
                } else {
                    let _ = write!(self.buf, "INTERVAL '{seconds}.{:06}' SECOND", microseconds.unsigned_abs());
                }
            }
        }
    }

    fn write_typed_or_str(&mut self, keyword: &str, text: &str) {
        if self.dialect.has_datetime_types {
            let _ = write!(self.buf, "{keyword} ");
        }
        self.write_quoted_str(text);
    }

    fn write_quoted_str(&mut self, s: &str) {
        let _ = write!(self.buf, "'{}'", s.replace('\'', "''"));
    }

    fn write_var(&mut self, name: &Symbol) {
        match self.dialect.var_style {
            VarStyle::Positional => {
                self.variables.push(name.clone());
                self.buf.push_str(&self.dialect.var_prefix);
            }
            VarStyle::Numbered => {
                let idx = self.dedup_index(name);
                let _ = write!(self.buf, "{}{idx}", self.dialect.var_prefix);
            }
            VarStyle::Named => {
                self.dedup_index(name);
                let _ = write!(self.buf, "{}{name}", self.dialect.var_prefix);
            }
        }
    }

    /// Returns `name`'s 1-based placeholder index, recording it in
    /// `variables` the first time it's seen (`spec.md` §8 property 8).
    fn dedup_index(&mut self, name: &Symbol) -> usize {
        if let Some(i) = self.var_seen.get(name) {
            return *i;
        }
        self.variables.push(name.clone());
        let idx = self.variables.len();
        self.var_seen.insert(name.clone(), idx);
        idx
    }

    fn write_clause(&mut self, c: &Clause) {
        match c {
            Clause::Lit(v) => self.write_value(v),
            Clause::Var(name) => self.write_var(name),
            Clause::Id { table, column } => self.write_qualified_id(table, column),
            Clause::Fun { name, args } => self.write_fun(name, args),
            Clause::Op { name, args } => self.write_op(name, args),
            Clause::Agg { name, args, distinct, filter, over } => {
                self.write_agg(name, args, *distinct, filter, over.as_ref())
            }
            Clause::Case { branches, else_ } => self.write_case(branches, else_),
            Clause::Sort { value, dir, nulls } => self.write_sort(value, *dir, *nulls),
            Clause::As { value, name } => {
                self.write_clause(value);
                let _ = write!(self.buf, " AS {}", self.quote_id(name));
            }
            Clause::Kw(kw) => self.buf.push_str(kw),
            Clause::Note(text) => {
                let _ = write!(self.buf, "/* {text} */");
            }
            Clause::From { body, alias } => self.write_from(body, alias),
            Clause::Join { left, right, on, kind, lateral } => {
                self.write_clause(left);
                self.newline();
                self.buf.push_str(join_keyword(*kind));
                if *lateral {
                    self.buf.push_str(" LATERAL");
                }
                self.buf.push(' ');
                self.write_clause(right);
                self.buf.push_str(" ON ");
                self.write_clause(on);
            }
            Clause::Select(body) => self.write_select(body),
            Clause::Union { args, .. } => self.write_union(args),
            Clause::With { ctes, recursive, body } => self.write_with(ctes, *recursive, body),
        }
    }

    fn write_fun(&mut self, name: &Symbol, args: &[Clause]) {
        let _ = write!(self.buf, "{name}(");
        self.write_comma_list(args);
        self.buf.push(')');
    }

    /// `OP`: zero args is the bare name, one is `(name arg)`, and two or
    /// more is `(a1 name a2 name ...)` (`spec.md` §4.5 "OP"), except the two
    /// pseudo-ops `translate` mints for `cast`/`extract` (`CAST_AS`,
    /// `EXTRACT_FROM`), which need SQL's own infix-keyword shape rather than
    /// the generic one.
    fn write_op(&mut self, name: &Symbol, args: &[Clause]) {
        match name.as_str() {
            "CAST_AS" if args.len() == 2 => {
                self.buf.push_str("CAST(");
                self.write_clause(&args[0]);
                self.buf.push_str(" AS ");
                self.write_clause(&args[1]);
                self.buf.push(')');
                return;
            }
            "EXTRACT_FROM" if args.len() == 2 => {
                self.buf.push_str("EXTRACT(");
                self.write_clause(&args[0]);
                self.buf.push_str(" FROM ");
                self.write_clause(&args[1]);
                self.buf.push(')');
                return;
            }
            _ => {}
        }
        match args.len() {
            0 => self.buf.push_str(name.as_str()),
            1 => {
                self.buf.push('(');
                let _ = write!(self.buf, "{name} ");
                self.write_clause(&args[0]);
                self.buf.push(')');
            }
            _ => {
                self.buf.push('(');
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        let _ = write!(self.buf, " {name} ");
                    }
                    self.write_clause(a);
                }
                self.buf.push(')');
            }
        }
    }

    fn write_agg(
        &mut self,
        name: &Symbol,
        args: &[Clause],
        distinct: bool,
        filter: &Option<Box<Clause>>,
        over: Option<&crate::clause::WindowSpec>,
    ) {
        let wrap = filter.is_some() || over.is_some_and(|w| !w.is_empty());
        if wrap {
            self.buf.push('(');
        }
        let _ = write!(self.buf, "{name}(");
        if distinct {
            self.buf.push_str("DISTINCT ");
        }
        self.write_comma_list(args);
        self.buf.push(')');
        if let Some(f) = filter {
            self.buf.push_str(" FILTER (WHERE ");
            self.write_clause(f);
            self.buf.push(')');
        }
        if let Some(w) = over {
            self.buf.push_str(" OVER (");
            let mut wrote = false;
            if !w.partition_by.is_empty() {
                self.buf.push_str("PARTITION BY ");
                self.write_comma_list(&w.partition_by);
                wrote = true;
            }
            if !w.order_by.is_empty() {
                if wrote {
                    self.buf.push(' ');
                }
                self.buf.push_str("ORDER BY ");
                self.write_comma_list(&w.order_by);
                wrote = true;
            }
            if let Some(frame) = &w.frame {
                if wrote {
                    self.buf.push(' ');
                }
                self.write_frame(frame);
            }
            self.buf.push(')');
        }
        if wrap {
            self.buf.push(')');
        }
    }

    fn write_frame(&mut self, frame: &crate::node::Frame) {
        use crate::node::{FrameBound, FrameMode};
        self.buf.push_str(match frame.mode {
            FrameMode::Rows => "ROWS BETWEEN ",
            FrameMode::Range => "RANGE BETWEEN ",
        });
        self.write_frame_bound(&frame.start);
        self.buf.push_str(" AND ");
        self.write_frame_bound(&frame.end);
    }

    fn write_frame_bound(&mut self, bound: &crate::node::FrameBound) {
        use crate::node::FrameBound::*;
        match bound {
            UnboundedPreceding => self.buf.push_str("UNBOUNDED PRECEDING"),
            Preceding(n) => {
                let _ = write!(self.buf, "{n} PRECEDING");
            }
            CurrentRow => self.buf.push_str("CURRENT ROW"),
            Following(n) => {
                let _ = write!(self.buf, "{n} FOLLOWING");
            }
            UnboundedFollowing => self.buf.push_str("UNBOUNDED FOLLOWING"),
        }
    }

    fn write_case(&mut self, branches: &[(Clause, Clause)], else_: &Option<Box<Clause>>) {
        self.buf.push_str("CASE");
        for (cond, result) in branches {
            self.buf.push_str(" WHEN ");
            self.write_clause(cond);
            self.buf.push_str(" THEN ");
            self.write_clause(result);
        }
        if let Some(e) = else_ {
            self.buf.push_str(" ELSE ");
            self.write_clause(e);
        }
        self.buf.push_str(" END");
    }

    fn write_sort(&mut self, value: &Clause, dir: crate::node::SortDir, nulls: Option<crate::node::NullsOrder>) {
        self.write_clause(value);
        self.buf.push_str(match dir {
            crate::node::SortDir::Asc => " ASC",
            crate::node::SortDir::Desc => " DESC",
        });
        if let Some(n) = nulls {
            self.buf.push_str(match n {
                crate::node::NullsOrder::First => " NULLS FIRST",
                crate::node::NullsOrder::Last => " NULLS LAST",
            });
        }
    }

    fn write_comma_list(&mut self, items: &[Clause]) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.buf.push_str(", ");
            }
            self.write_clause(item);
        }
    }

    fn write_from(&mut self, body: &FromBody, alias: &Symbol) {
        match body {
            FromBody::Table { schema, name } => {
                if let Some(s) = schema {
                    let _ = write!(self.buf, "{}.", self.quote_id(s));
                }
                let _ = write!(self.buf, "{} AS {}", self.quote_id(name), self.quote_id(alias));
            }
            FromBody::Cte(name) => {
                let _ = write!(self.buf, "{} AS {}", self.quote_id(name), self.quote_id(alias));
            }
            FromBody::Values { columns, rows, .. } => self.write_values(columns, rows, alias),
            FromBody::Nothing => {
                let _ = write!(self.buf, "(SELECT 1) AS {}", self.quote_id(alias));
            }
            FromBody::Subquery(inner) => {
                self.buf.push('(');
                self.level += 1;
                self.newline();
                self.write_clause(inner);
                self.level -= 1;
                self.newline();
                let _ = write!(self.buf, ") AS {}", self.quote_id(alias));
            }
        }
    }

    /// `spec.md` §4.5 "VALUES": one row inline, many rows one per line; the
    /// row-constructor keyword and column-aliasing ability come from the
    /// dialect, not from the (always-`None`) field `translate` leaves on
    /// `FromBody::Values` — see DESIGN.md.
    fn write_values(&mut self, columns: &[Symbol], rows: &[Vec<Clause>], alias: &Symbol) {
        self.buf.push_str("(VALUES");
        if rows.len() > 1 {
            self.level += 1;
        }
        for (i, row) in rows.iter().enumerate() {
            if i > 0 {
                self.buf.push(',');
            }
            if rows.len() > 1 {
                self.newline();
            } else {
                self.buf.push(' ');
            }
            if let Some(kw) = &self.dialect.values_row_constructor {
                let _ = write!(self.buf, "{kw}(");
            } else {
                self.buf.push('(');
            }
            self.write_comma_list(row);
            self.buf.push(')');
        }
        if rows.len() > 1 {
            self.level -= 1;
            self.newline();
        }
        self.buf.push(')');
        let _ = write!(self.buf, " AS {}", self.quote_id(alias));
        if self.dialect.has_as_columns {
            self.buf.push('(');
            for (i, c) in columns.iter().enumerate() {
                if i > 0 {
                    self.buf.push_str(", ");
                }
                self.buf.push_str(&self.quote_id(c));
            }
            self.buf.push(')');
        }
    }

    /// Writes a `SELECT`'s column list: a single column stays on the
    /// `SELECT` line, more than one goes one per indented line (mirrors
    /// `clausedefs.serialize_lines`). A column already a bare identifier
    /// matching its own label is written without a redundant `AS`.
    fn write_select_columns(&mut self, columns: &[(Symbol, Clause)]) {
        if columns.is_empty() {
            return;
        }
        if columns.len() == 1 {
            self.buf.push(' ');
            self.write_select_column(&columns[0].0, &columns[0].1);
            return;
        }
        self.level += 1;
        for (i, (label, clause)) in columns.iter().enumerate() {
            if i > 0 {
                self.buf.push(',');
            }
            self.newline();
            self.write_select_column(label, clause);
        }
        self.level -= 1;
    }

    fn write_select_column(&mut self, label: &Symbol, clause: &Clause) {
        self.write_clause(clause);
        if !matches!(clause, Clause::Id { column, .. } if column == label) {
            let _ = write!(self.buf, " AS {}", self.quote_id(label));
        }
    }

    fn write_select(&mut self, body: &SelectBody) {
        self.buf.push_str("SELECT");
        if let Some((n, style)) = &body.top {
            let _ = write!(self.buf, " TOP {n}");
            if matches!(style, TopStyle::TopWithTies) {
                self.buf.push_str(" WITH TIES");
            }
        }
        if body.distinct {
            self.buf.push_str(" DISTINCT");
        }
        self.write_select_columns(&body.columns);
        if let Some(from) = &body.from {
            self.newline();
            self.buf.push_str("FROM ");
            self.write_clause(from);
        }
        if let Some(w) = &body.where_ {
            self.newline();
            self.buf.push_str("WHERE ");
            self.write_clause(w);
        }
        if !body.group_by.is_empty() {
            self.newline();
            self.buf.push_str("GROUP BY ");
            self.write_comma_list(&body.group_by);
        }
        if let Some(h) = &body.having {
            self.newline();
            self.buf.push_str("HAVING ");
            self.write_clause(h);
        }
        if !body.order_by.is_empty() {
            self.newline();
            self.buf.push_str("ORDER BY ");
            self.write_comma_list(&body.order_by);
        }
        self.write_limit(body.limit, body.offset);
    }

    fn write_limit(&mut self, limit: Option<u64>, offset: Option<u64>) {
        if limit.is_none() && offset.is_none() {
            return;
        }
        self.newline();
        match self.dialect.limit_style {
            LimitStyle::Regular => {
                if let Some(o) = offset {
                    let unit = if o == 1 { "ROW" } else { "ROWS" };
                    let _ = write!(self.buf, "OFFSET {o} {unit}");
                    if limit.is_some() {
                        self.newline();
                    }
                }
                if let Some(n) = limit {
                    let unit = if n == 1 { "ROW" } else { "ROWS" };
                    let _ = write!(self.buf, "FETCH FIRST {n} {unit} ONLY");
                }
            }
            LimitStyle::MySQL => {
                match (offset, limit) {
                    (Some(o), Some(n)) => {
                        let _ = write!(self.buf, "LIMIT {o}, {n}");
                    }
                    (Some(o), None) => {
                        let _ = write!(self.buf, "LIMIT {o}, {}", u64::MAX);
                    }
                    (None, Some(n)) => {
                        let _ = write!(self.buf, "LIMIT {n}");
                    }
                    (None, None) => unreachable!("guarded above"),
                }
            }
            LimitStyle::SQLite => {
                match limit {
                    Some(n) => {
                        let _ = write!(self.buf, "LIMIT {n}");
                    }
                    None => self.buf.push_str("LIMIT -1"),
                }
                if let Some(o) = offset {
                    let _ = write!(self.buf, " OFFSET {o}");
                }
            }
        }
    }

    fn write_union(&mut self, args: &[Clause]) {
        for (i, a) in args.iter().enumerate() {
            if i > 0 {
                self.newline();
                self.buf.push_str("UNION ALL");
                self.newline();
            }
            self.write_clause(a);
        }
    }

    fn write_with(&mut self, ctes: &[CteDef], recursive: bool, body: &Clause) {
        self.buf.push_str("WITH");
        if recursive && self.dialect.has_recursive_annotation {
            self.buf.push_str(" RECURSIVE");
        }
        self.level += 1;
        for (i, cte) in ctes.iter().enumerate() {
            if i > 0 {
                self.buf.push(',');
            }
            self.newline();
            let _ = write!(self.buf, "{} (", self.quote_id(&cte.name));
            for (j, c) in cte.columns.iter().enumerate() {
                if j > 0 {
                    self.buf.push_str(", ");
                }
                self.buf.push_str(&self.quote_id(c));
            }
            self.buf.push_str(") AS (");
            self.level += 1;
            self.newline();
            self.write_clause(&cte.body);
            self.level -= 1;
            self.newline();
            self.buf.push(')');
        }
        self.level -= 1;
        self.newline();
        self.write_clause(body);
    }
}

fn join_keyword(kind: JoinKind) -> &'static str {
    match kind {
        JoinKind::Inner => "JOIN",
        JoinKind::Left => "LEFT JOIN",
        JoinKind::Right => "RIGHT JOIN",
        JoinKind::Full => "FULL JOIN",
        JoinKind::Cross => "CROSS JOIN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::{Clause, FromBody, SelectBody};
    use crate::node::value::Value;

    fn id(table: &str, col: &str) -> Clause {
        Clause::id(table, col)
    }

    #[test]
    fn bare_select_postgresql() {
        let dialect = SQLDialect::postgresql();
        let body = SelectBody {
            distinct: false,
            top: None,
            columns: vec![(Symbol::new("id"), id("t", "id"))],
            from: Some(Box::new(Clause::From {
                body: FromBody::Table { schema: None, name: Symbol::new("people") },
                alias: Symbol::new("t"),
            })),
            where_: None,
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: None,
            offset: None,
        };
        let out = serialize(&Clause::Select(body), &dialect);
        assert_eq!(out.query, "SELECT \"t\".\"id\"\nFROM \"people\" AS \"t\"");
        assert!(out.variables.is_empty());
    }

    #[test]
    fn multi_column_select_goes_one_per_line() {
        let dialect = SQLDialect::postgresql();
        let body = SelectBody {
            distinct: false,
            top: None,
            columns: vec![
                (Symbol::new("id"), id("t", "id")),
                (Symbol::new("count"), Clause::Lit(Value::Int(1))),
            ],
            from: Some(Box::new(Clause::From {
                body: FromBody::Table { schema: None, name: Symbol::new("people") },
                alias: Symbol::new("t"),
            })),
            where_: None,
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: None,
            offset: None,
        };
        let out = serialize(&Clause::Select(body), &dialect);
        assert_eq!(
            out.query,
            "SELECT\n  \"t\".\"id\",\n  1 AS \"count\"\nFROM \"people\" AS \"t\""
        );
    }

    #[test]
    fn numbered_variable_dedup() {
        let dialect = SQLDialect::postgresql();
        let mut s = Serializer::new(&dialect);
        s.write_clause(&Clause::Op {
            name: Symbol::new("="),
            args: vec![Clause::Var(Symbol::new("x")), Clause::Var(Symbol::new("x"))],
        });
        assert_eq!(s.buf, "($1 = $1)");
        assert_eq!(s.variables, vec![Symbol::new("x")]);
    }

    #[test]
    fn positional_variable_not_deduped() {
        let dialect = SQLDialect::mysql();
        let mut s = Serializer::new(&dialect);
        s.write_clause(&Clause::Op {
            name: Symbol::new("="),
            args: vec![Clause::Var(Symbol::new("x")), Clause::Var(Symbol::new("x"))],
        });
        assert_eq!(s.buf, "(? = ?)");
        assert_eq!(s.variables, vec![Symbol::new("x"), Symbol::new("x")]);
    }

    #[test]
    fn bool_literal_without_bool_support() {
        let mut dialect = SQLDialect::postgresql();
        dialect.has_bool_literals = false;
        let mut s = Serializer::new(&dialect);
        s.write_clause(&Clause::Lit(Value::Bool(true)));
        assert_eq!(s.buf, "(1=1)");
    }

    #[test]
    fn mysql_limit_offset_only() {
        let dialect = SQLDialect::mysql();
        let mut s = Serializer::new(&dialect);
        s.write_limit(None, Some(5));
        assert_eq!(s.buf, "\nLIMIT 5, 18446744073709551615");
    }

    #[test]
    fn sqlite_limit_no_count() {
        let dialect = SQLDialect::sqlite();
        let mut s = Serializer::new(&dialect);
        s.write_limit(None, Some(5));
        assert_eq!(s.buf, "\nLIMIT -1 OFFSET 5");
    }

    #[test]
    fn string_literal_escapes_quotes() {
        let dialect = SQLDialect::postgresql();
        let mut s = Serializer::new(&dialect);
        s.write_clause(&Clause::Lit(Value::Str("it's".to_string())));
        assert_eq!(s.buf, "'it''s'");
    }

    #[test]
    fn cast_and_extract_render_specially() {
        let dialect = SQLDialect::postgresql();
        let mut s = Serializer::new(&dialect);
        s.write_clause(&Clause::Op {
            name: Symbol::new("CAST_AS"),
            args: vec![id("t", "a"), Clause::Kw("INTEGER")],
        });
        assert_eq!(s.buf, "CAST(\"t\".\"a\" AS INTEGER)");
    }
}
