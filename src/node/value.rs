//! Scalar literal values embeddable in a node tree via `Lit`, and in a
//! `ValuesTable`'s rows. Grounded on `examples/original_source/src/funsql/compiler/serialize.py`'s
//! `singledispatch`-based `serialize` overloads for `int`/`float`/`bool`/
//! `datetime`/`date`/`time`/`timedelta`/`str`/`None`, which enumerate exactly
//! the literal kinds FunSQL needs to render.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

/// `EnumAsInner` gives each variant an `as_*`/`is_*` pair (e.g. `as_bool`),
/// used by `translate`'s boolean-literal folding (`AND`/`OR` identity
/// elimination) instead of a bespoke `matches!` per call site.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, EnumAsInner)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    /// An interval, stored as whole seconds plus a fractional-microsecond
    /// remainder, matching `timedelta`'s own normalized representation.
    Interval { seconds: i64, microseconds: i64 },
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
