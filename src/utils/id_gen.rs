//! Grounded directly on `prqlc::utils::id_gen::{IdGenerator, NameGenerator}`
//! (`examples/PRQL-prql/prqlc/prqlc/src/utils/id_gen.rs`): a generic
//! monotonic counter typed by the newtype it mints, plus a prefixed string
//! generator used for alias allocation (`spec.md` §4.4, "Alias allocation").

use std::marker::PhantomData;

#[derive(Debug, Clone)]
pub struct IdGenerator<T: From<usize>> {
    next_id: usize,
    phantom: PhantomData<T>,
}

impl<T: From<usize>> IdGenerator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gen(&mut self) -> T {
        let id = self.next_id;
        self.next_id += 1;
        T::from(id)
    }
}

impl<T: From<usize>> Default for IdGenerator<T> {
    fn default() -> IdGenerator<T> {
        IdGenerator {
            next_id: 0,
            phantom: PhantomData,
        }
    }
}

/// Allocates `{prefix}_{n}`-style names, e.g. table/column aliases
/// (`ctx.aliases: name -> counter`, `spec.md` §4.4) or generated column names
/// (`col_name = NameGenerator::new("_expr_")`, grounded on
/// `examples/PRQL-prql/prqlc/prqlc/src/sql/srq/context.rs`'s
/// `AnchorContext::col_name`/`table_name`).
#[derive(Debug, Clone, Default)]
pub struct NameGenerator {
    prefix: String,
    id: IdGenerator<usize>,
}

impl NameGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        NameGenerator {
            prefix: prefix.into(),
            id: IdGenerator::new(),
        }
    }

    pub fn gen(&mut self) -> String {
        format!("{}_{}", self.prefix, self.id.gen() + 1)
    }
}
