//! Semantic BSON comparison, for filter evaluation and sort ordering.
//!
//! This is deliberately a different code path from
//! [`crate::keystring`]'s byte-comparable encoder: `compare_bson` ranks by
//! MongoDB's canonical type order but compares *values* (numeric types
//! cross-compare, strings compare as UTF-8), where `keystring` instead
//! produces bytes whose memcmp order matches that same canonical order.
//! Conflating the two would make an index's on-disk key order diverge from
//! what a query's `$gt`/`$lt` filter considers true. Grounded on the
//! teacher's `query/eval.rs::compare_bson`/`type_rank`, generalized to also
//! rank `Null`/`MinKey`/`MaxKey` fully per BSON's documented type order.

use std::cmp::Ordering;

use bson::Bson;

/// Canonical BSON comparison order (MongoDB manual, "Comparison/Sort Order").
#[must_use]
pub fn type_rank(v: &Bson) -> u8 {
    match v {
        Bson::MinKey => 0,
        Bson::Null => 1,
        Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::Symbol(_) | Bson::String(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::DbPointer(_) => 12,
        Bson::JavaScriptCode(_) => 13,
        Bson::JavaScriptCodeWithScope(_) => 14,
        Bson::MaxKey => 15,
    }
}

fn is_numeric(v: &Bson) -> bool {
    matches!(v, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_))
}

fn as_f64(v: &Bson) -> f64 {
    match v {
        Bson::Int32(i) => f64::from(*i),
        Bson::Int64(i) => *i as f64,
        Bson::Double(f) => *f,
        Bson::Decimal128(d) => d.to_string().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// Compares two BSON values by MongoDB's semantic ordering: same-rank
/// numerics cross-compare by value, strings compare lexicographically,
/// everything else falls back to [`type_rank`].
#[must_use]
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    if is_numeric(a) && is_numeric(b) {
        return as_f64(a).total_cmp(&as_f64(b));
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::Timestamp(x), Bson::Timestamp(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.cmp(y),
        (Bson::Array(x), Bson::Array(y)) => compare_arrays(x, y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn compare_arrays(a: &[Bson], b: &[Bson]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = compare_bson(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numerics_cross_compare_by_value() {
        assert_eq!(compare_bson(&Bson::Int32(1), &Bson::Double(1.5)), Ordering::Less);
        assert_eq!(compare_bson(&Bson::Int64(5), &Bson::Int32(5)), Ordering::Equal);
    }

    #[test]
    fn type_rank_orders_null_before_numbers_before_strings() {
        assert!(type_rank(&Bson::Null) < type_rank(&Bson::Int32(0)));
        assert!(type_rank(&Bson::Int32(0)) < type_rank(&Bson::String(String::new())));
    }

    #[test]
    fn minkey_and_maxkey_bound_the_order() {
        assert!(type_rank(&Bson::MinKey) < type_rank(&Bson::Null));
        assert!(type_rank(&Bson::MaxKey) > type_rank(&Bson::RegularExpression(bson::Regex { pattern: String::new(), options: String::new() })));
    }
}
