//! The five-pass compiler pipeline (`spec.md` §4): `annotate` builds the
//! `Box` arena from a user tree, `resolve` computes each box's `BoxType`
//! bottom-up, `link` rewrites scalar refs top-down against those types,
//! `translate` assembles a `Clause` tree, and `serialize` renders that tree
//! to dialect-specific SQL text. Each module is a free function (or small
//! family of them) over `&mut AnnotateContext`/`&mut TranslateContext`,
//! mirroring `examples/original_source/src/funsql/compiler/*.py`'s one
//! module per pass rather than a single monolithic compiler struct.

pub mod annotate;
pub mod link;
pub mod resolve;
pub mod serialize;
pub mod translate;

pub use annotate::annotate;
pub use link::link;
pub use resolve::resolve;
pub use serialize::{serialize, SQLString};
pub use translate::{translate, TranslateContext};
