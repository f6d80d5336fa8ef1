//! Type system over box/row references (`spec.md` §3, §4.2). Grounded on
//! `examples/original_source/src/funsql/compiler/types.py`, translated from
//! its `EmptyType`/`ScalarType`/`AmbiguousType`/`RowType`/`BoxType` classes
//! plus `intersect`/`union`/`is_subset` into closed Rust enums and matching
//! recursive functions — the representation choice `spec.md` §9 flags as an
//! open question ("one using an enum `UnitType`... choose one") is resolved
//! here in favor of enums (see DESIGN.md), since Rust pattern matching makes
//! the enum form exhaustive and avoids the singleton-struct dance `types.py`
//! only uses because Python lacks zero-sized enum variants.

use std::collections::BTreeMap;

use crate::ir::handle::{BoxId, Handle};
use crate::node::symbol::Symbol;

/// A reference's type when it is not (or not yet known to be) a
/// sub-namespace: `Scalar` (selectable column) or `Ambiguous` (conflicting
/// definitions merged by `union`/`intersect`).
#[derive(Clone, Debug, PartialEq)]
pub enum FieldType {
    Scalar,
    Row(RowType),
    Ambiguous,
}

/// The type of a box's `group` attribute: `Empty` before any `Group`/
/// `Partition`, or the pre-grouping row type, or `Ambiguous`. The `BoxId`
/// alongside `Row` is a translate-time addition (not in `spec.md`'s type
/// grammar): `resolve`/`link` only need the `RowType` to validate `Agg`
/// refs, but `translate` additionally needs to know *which* box's assemblage
/// to evaluate an aggregate's arguments against, since a `Get`/`Agg` ref can
/// sit arbitrarily far downstream of the `Group`/`Partition` that produced
/// this `group` value (passed through unchanged by `Where`/`Select`/...).
#[derive(Clone, Debug, PartialEq)]
pub enum GroupType {
    Empty,
    Row(RowType, BoxId),
    Ambiguous,
}

#[derive(Clone, Debug, PartialEq)]
pub enum HandleType {
    Row(RowType),
    Ambiguous,
}

/// The set of column references available at a tabular node, plus the
/// pre-grouping row type (`group`) aggregates can reach through.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowType {
    pub fields: BTreeMap<Symbol, FieldType>,
    pub group: GroupType,
}

impl Default for GroupType {
    fn default() -> Self {
        GroupType::Empty
    }
}

impl RowType {
    pub fn new(fields: BTreeMap<Symbol, FieldType>) -> Self {
        RowType {
            fields,
            group: GroupType::Empty,
        }
    }

    pub fn with_group(fields: BTreeMap<Symbol, FieldType>, group: GroupType) -> Self {
        RowType { fields, group }
    }

    pub fn empty() -> Self {
        RowType::default()
    }
}

/// Type assigned to a `Box` after `resolve` (`spec.md` §3, §4.2).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoxType {
    pub name: Symbol,
    pub row: RowType,
    pub handle_map: BTreeMap<Handle, HandleType>,
}

impl BoxType {
    pub fn new(name: Symbol, row: RowType) -> Self {
        BoxType {
            name,
            row,
            handle_map: BTreeMap::new(),
        }
    }

    pub fn with_handle_map(name: Symbol, row: RowType, handle_map: BTreeMap<Handle, HandleType>) -> Self {
        BoxType { name, row, handle_map }
    }

    pub fn empty() -> Self {
        BoxType::new(Symbol::new("_"), RowType::empty())
    }

    /// `box.handle` equals the handle assigned iff the original node is the
    /// target of a bound reference (`spec.md` §3 invariant 3): a negative/
    /// absent handle leaves the type unchanged.
    pub fn add_handle(&self, handle: Option<Handle>) -> BoxType {
        match handle {
            None => self.clone(),
            Some(h) => {
                let mut handle_map = self.handle_map.clone();
                handle_map.insert(h, HandleType::Row(self.row.clone()));
                BoxType {
                    name: self.name.clone(),
                    row: self.row.clone(),
                    handle_map,
                }
            }
        }
    }
}

/// Used to deduce the references available at an `Append` node: the union of
/// multiple tables results in a single table, so only references available
/// in *each* of them survive — an `intersect` (`compiler/types.py::intersect`).
pub fn intersect_field(a: &FieldType, b: &FieldType) -> Option<FieldType> {
    match (a, b) {
        (FieldType::Ambiguous, _) | (_, FieldType::Ambiguous) => Some(FieldType::Ambiguous),
        (FieldType::Scalar, FieldType::Scalar) => Some(FieldType::Scalar),
        (FieldType::Row(a), FieldType::Row(b)) => Some(FieldType::Row(intersect_row(a, b))),
        _ => None,
    }
}

pub fn intersect_group(a: &GroupType, b: &GroupType) -> GroupType {
    match (a, b) {
        (GroupType::Ambiguous, _) | (_, GroupType::Ambiguous) => GroupType::Ambiguous,
        (GroupType::Row(a_row, a_src), GroupType::Row(b_row, b_src)) if a_src == b_src => {
            GroupType::Row(intersect_row(a_row, b_row), *a_src)
        }
        (GroupType::Row(..), GroupType::Row(..)) => GroupType::Ambiguous,
        _ => GroupType::Empty,
    }
}

pub fn intersect_row(a: &RowType, b: &RowType) -> RowType {
    if a == b {
        return a.clone();
    }
    let mut fields = BTreeMap::new();
    for (field, a_ty) in &a.fields {
        if let Some(b_ty) = b.fields.get(field) {
            if let Some(ty) = intersect_field(a_ty, b_ty) {
                fields.insert(field.clone(), ty);
            }
        }
    }
    RowType {
        fields,
        group: intersect_group(&a.group, &b.group),
    }
}

pub fn intersect(a: &BoxType, b: &BoxType) -> BoxType {
    if a == b {
        return a.clone();
    }
    let mut handle_map = BTreeMap::new();
    for (h, a_ty) in &a.handle_map {
        if let Some(b_ty) = b.handle_map.get(h) {
            let ty = match (a_ty, b_ty) {
                (HandleType::Row(a), HandleType::Row(b)) => Some(HandleType::Row(intersect_row(a, b))),
                (HandleType::Ambiguous, _) | (_, HandleType::Ambiguous) => Some(HandleType::Ambiguous),
            };
            if let Some(ty) = ty {
                handle_map.insert(*h, ty);
            }
        }
    }
    let name = if a.name == b.name {
        a.name.clone()
    } else {
        Symbol::new("union")
    };
    BoxType::with_handle_map(name, intersect_row(&a.row, &b.row), handle_map)
}

/// Used to deduce the box type (references available) at an `IntJoin`,
/// using the box types for the two sides being joined — downstream nodes
/// may access references from *either* side, hence `union`.
pub fn union_row(a: &RowType, b: &RowType) -> RowType {
    let mut fields = BTreeMap::new();
    for (field, a_ty) in &a.fields {
        match b.fields.get(field) {
            Some(b_ty) => {
                let ty = match (a_ty, b_ty) {
                    (FieldType::Row(a), FieldType::Row(b)) => FieldType::Row(union_row(a, b)),
                    _ => FieldType::Ambiguous,
                };
                fields.insert(field.clone(), ty);
            }
            None => {
                fields.insert(field.clone(), a_ty.clone());
            }
        }
    }
    for (field, b_ty) in &b.fields {
        fields.entry(field.clone()).or_insert_with(|| b_ty.clone());
    }
    let group = match (&a.group, &b.group) {
        (GroupType::Empty, g) => g.clone(),
        (g, GroupType::Empty) => g.clone(),
        (GroupType::Row(a_row, a_src), GroupType::Row(b_row, b_src)) if a_src == b_src => {
            GroupType::Row(intersect_row(a_row, b_row), *a_src)
        }
        _ => GroupType::Ambiguous,
    };
    RowType { fields, group }
}

pub fn union(a: &BoxType, b: &BoxType) -> BoxType {
    let mut handle_map = BTreeMap::new();
    for (h, a_ty) in &a.handle_map {
        if !b.handle_map.contains_key(h) {
            handle_map.insert(*h, a_ty.clone());
        } else {
            handle_map.insert(*h, HandleType::Ambiguous);
        }
    }
    for (h, b_ty) in &b.handle_map {
        handle_map.entry(*h).or_insert_with(|| b_ty.clone());
    }
    BoxType::with_handle_map(a.name.clone(), union_row(&a.row, &b.row), handle_map)
}

/// `is_subset(knot_box.row, iterator_box.row)` drives the `Knot` fixed-point
/// loop in both `resolve` and `link` (`spec.md` §3 invariant 5, §8 property 4).
pub fn is_subset_row(a: &RowType, b: &RowType) -> bool {
    if a == b {
        return true;
    }
    for (field, a_ty) in &a.fields {
        match b.fields.get(field) {
            None => return false,
            Some(b_ty) => {
                let ok = match (a_ty, b_ty) {
                    (FieldType::Row(a), FieldType::Row(b)) => is_subset_row(a, b),
                    (x, y) => std::mem::discriminant(x) == std::mem::discriminant(y),
                };
                if !ok {
                    return false;
                }
            }
        }
    }
    true
}

pub fn is_subset(a: &BoxType, b: &BoxType) -> bool {
    if a == b {
        return true;
    }
    if a.name != b.name {
        return false;
    }
    if !is_subset_row(&a.row, &b.row) {
        return false;
    }
    for (h, a_ty) in &a.handle_map {
        match b.handle_map.get(h) {
            None => return false,
            Some(b_ty) => {
                let ok = matches!(
                    (a_ty, b_ty),
                    (HandleType::Ambiguous, HandleType::Ambiguous) | (HandleType::Row(_), HandleType::Row(_))
                );
                if !ok {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_row(fields: &[&str]) -> RowType {
        RowType::new(fields.iter().map(|f| (Symbol::new(*f), FieldType::Scalar)).collect())
    }

    #[test]
    fn union_row_keeps_fields_present_on_either_side() {
        let left = scalar_row(&["a", "b"]);
        let right = scalar_row(&["b", "c"]);
        let merged = union_row(&left, &right);
        assert_eq!(merged.fields.len(), 3);
        assert_eq!(merged.fields[&Symbol::new("a")], FieldType::Scalar);
        assert_eq!(merged.fields[&Symbol::new("c")], FieldType::Scalar);
    }

    #[test]
    fn union_row_marks_conflicting_scalar_fields_ambiguous() {
        let left = RowType::new(BTreeMap::from([(Symbol::new("x"), FieldType::Scalar)]));
        let right =
            RowType::new(BTreeMap::from([(Symbol::new("x"), FieldType::Row(RowType::empty()))]));
        let merged = union_row(&left, &right);
        assert_eq!(merged.fields[&Symbol::new("x")], FieldType::Ambiguous);
    }

    #[test]
    fn intersect_row_drops_fields_not_shared_by_both_sides() {
        let left = scalar_row(&["a", "b"]);
        let right = scalar_row(&["b", "c"]);
        let merged = intersect_row(&left, &right);
        assert_eq!(merged.fields.len(), 1);
        assert!(merged.fields.contains_key(&Symbol::new("b")));
    }

    #[test]
    fn is_subset_row_requires_every_field_of_a_in_b_with_a_compatible_shape() {
        let a = scalar_row(&["n", "fact"]);
        let wider = scalar_row(&["n", "fact", "extra"]);
        assert!(is_subset_row(&a, &wider));
        assert!(!is_subset_row(&wider, &a));
    }

    #[test]
    fn is_subset_row_rejects_a_row_field_that_became_scalar() {
        let a = RowType::new(BTreeMap::from([(Symbol::new("x"), FieldType::Row(RowType::empty()))]));
        let b = RowType::new(BTreeMap::from([(Symbol::new("x"), FieldType::Scalar)]));
        assert!(!is_subset_row(&a, &b));
    }

    #[test]
    fn is_subset_reflexive_for_equal_types() {
        let t = BoxType::new(Symbol::new("t"), scalar_row(&["a"]));
        assert!(is_subset(&t, &t));
    }
}
