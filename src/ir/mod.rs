//! The intermediate representation `annotate` produces and `resolve`/`link`
//! refine in place: box arena, handle ids, and the type lattice (`spec.md`
//! §3, §4.1-§4.3).

pub mod annotated;
pub mod handle;
pub mod types;

pub use annotated::{AnnotateContext, AnnotatedBox, BoxKind, Ref};
pub use handle::{BoxId, Handle};
pub use types::BoxType;
