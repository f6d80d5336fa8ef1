//! Thin demonstration CLI over the `funsql` library (`funsql` crate's `cli`
//! feature). `spec.md` §1 excludes a surface parser, so unlike
//! `prqlc`'s `prqlc` binary (which reads PRQL source text) this one compiles
//! one of a handful of query trees built in-process with `funsql::node::build`
//! — there is no text format to read a query tree from.

use clap::{Parser, ValueEnum};
use color_eyre::eyre::{eyre, Result};

use funsql::dialect::SQLDialect;
use funsql::node::build as b;
use funsql::node::catalog::SQLTable;
use funsql::{render, Depth, SQLCatalog, SQLNode};

#[derive(Parser, Debug)]
#[command(name = "funsql", about = "Compile a bundled demo query to SQL", version)]
struct Cli {
    /// Which bundled example query to compile.
    #[arg(value_enum, default_value = "select")]
    demo: Demo,

    /// Target SQL dialect.
    #[arg(long, value_enum, default_value = "postgresql")]
    dialect: DialectArg,

    /// Output shape: plain SQL text, or a structured dump of the rendered
    /// query and its bind variables (mirrors `prqlc`'s own `--format` dump).
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Yaml,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Demo {
    /// `spec.md` §8 S1 — trivial select.
    Select,
    /// `spec.md` §8 S2 — filtered select.
    Filter,
    /// `spec.md` §8 S3 — group + count.
    Group,
    /// `spec.md` §8 S4 — inner join.
    Join,
    /// `spec.md` §8 S6 — recursive CTE (factorial to 10).
    Recursive,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DialectArg {
    Postgresql,
    Mysql,
    Sqlite,
}

impl From<DialectArg> for SQLDialect {
    fn from(d: DialectArg) -> Self {
        match d {
            DialectArg::Postgresql => SQLDialect::postgresql(),
            DialectArg::Mysql => SQLDialect::mysql(),
            DialectArg::Sqlite => SQLDialect::sqlite(),
        }
    }
}

fn person_table() -> SQLTable {
    SQLTable::new("person", ["person_id", "name", "year_of_birth"])
}

fn visit_table() -> SQLTable {
    SQLTable::new("visit", ["visit_id", "person_id", "visit_start_date"])
}

fn demo_query(demo: Demo) -> Result<SQLNode> {
    match demo {
        Demo::Select => {
            let from = b::from_table(person_table());
            b::select(from, vec![b::get("name")]).map_err(|e| eyre!("{e}"))
        }
        Demo::Filter => {
            let from = b::from_table(person_table());
            let cond = b::fun(">", vec![b::get("year_of_birth"), b::lit(2000i64)]);
            let filtered = b::where_(from, cond);
            b::select(filtered, vec![b::get("name")]).map_err(|e| eyre!("{e}"))
        }
        Demo::Group => {
            let from = b::from_table(person_table());
            let grouped = b::group(from, vec![b::get("year_of_birth")]).map_err(|e| eyre!("{e}"))?;
            b::select(grouped, vec![b::get("year_of_birth"), b::agg_count()]).map_err(|e| eyre!("{e}"))
        }
        Demo::Join => {
            let person = b::from_table(person_table());
            let visit = b::as_(b::from_table(visit_table()), "visit");
            let on = b::fun(
                "=",
                vec![b::get("person_id"), b::get_via(b::get("visit"), "person_id")],
            );
            let joined = b::join(person, visit, on, false, false, false, false);
            b::select(
                joined,
                vec![b::get("name"), b::get_via(b::get("visit"), "visit_start_date")],
            )
            .map_err(|e| eyre!("{e}"))
        }
        Demo::Recursive => {
            let seed = b::define(
                b::from_nothing(),
                vec![b::as_(b::lit(1i64), "n"), b::as_(b::lit(1i64), "fact")],
            )
            .map_err(|e| eyre!("{e}"))?;
            let step = b::define(
                b::where_(
                    b::from_reference("factorial"),
                    b::fun("<", vec![b::get("n"), b::lit(10i64)]),
                ),
                vec![
                    b::as_(b::fun("+", vec![b::get("n"), b::lit(1i64)]), "n"),
                    b::as_(b::fun("*", vec![b::get("n"), b::get("fact")]), "fact"),
                ],
            )
            .map_err(|e| eyre!("{e}"))?;
            Ok(b::iterate(seed, step))
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let node = demo_query(cli.demo)?;
    let dialect: SQLDialect = cli.dialect.into();
    let catalog = SQLCatalog::new();

    let output =
        render(&node, Depth::Serialized, &dialect, &catalog).map_err(|e| eyre!("{e}"))?;
    let sql = output
        .into_serialized()
        .expect("Depth::Serialized always yields a SQLString");

    match cli.format {
        OutputFormat::Text => {
            println!("{}", sql.query);
            if !sql.variables.is_empty() {
                eprintln!("-- variables: {:?}", sql.variables);
            }
        }
        OutputFormat::Yaml => {
            #[cfg(feature = "serde_yaml")]
            {
                print!("{}", serde_yaml::to_string(&sql)?);
            }
            #[cfg(not(feature = "serde_yaml"))]
            {
                return Err(eyre!("--format yaml requires building with the `serde_yaml` feature"));
            }
        }
    }
    Ok(())
}
