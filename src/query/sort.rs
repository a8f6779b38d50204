//! Stable multi-key sort over a sort specification document (`{field: 1 |
//! -1, ...}`), used by `find`'s `sort` option and `$sort` pipeline stages.
//! Grounded on the teacher's `query/eval.rs::compare_docs`, generalized
//! from a typed `SortSpec` list to a raw sort document and MongoDB's
//! missing-sorts-before-present rule.

use std::cmp::Ordering;

use bson::Document;

use crate::catalog::get_dotted;
use crate::query::compare::compare_bson;

/// Parses a `{field: 1|-1, ...}` document into `(path, ascending)` pairs.
#[must_use]
pub fn parse_sort_spec(spec: &Document) -> Vec<(String, bool)> {
    spec.iter()
        .map(|(k, v)| (k.clone(), v.as_i32().or_else(|| v.as_i64().map(|n| n as i32)).unwrap_or(1) >= 0))
        .collect()
}

/// Compares two documents by `spec` (as produced by [`parse_sort_spec`]).
/// A document missing a sort field sorts before one that has it, matching
/// MongoDB's documented "missing fields sort first ascending" behavior.
#[must_use]
pub fn compare_docs(a: &Document, b: &Document, spec: &[(String, bool)]) -> Ordering {
    for (path, ascending) in spec {
        let va = get_dotted(a, path);
        let vb = get_dotted(b, path);
        let a_missing = matches!(va, bson::Bson::Null) && !a.contains_key(path);
        let b_missing = matches!(vb, bson::Bson::Null) && !b.contains_key(path);
        let ord = match (a_missing, b_missing) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => compare_bson(&va, &vb),
        };
        if ord != Ordering::Equal {
            return if *ascending { ord } else { ord.reverse() };
        }
    }
    Ordering::Equal
}

/// Sorts `docs` in place by `spec`.
pub fn sort_documents(docs: &mut [Document], spec: &Document) {
    let parsed = parse_sort_spec(spec);
    if parsed.is_empty() {
        return;
    }
    docs.sort_by(|a, b| compare_docs(a, b, &parsed));
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn sorts_ascending_and_descending() {
        let mut docs = vec![doc! {"n": 3}, doc! {"n": 1}, doc! {"n": 2}];
        sort_documents(&mut docs, &doc! {"n": 1});
        let ns: Vec<i32> = docs.iter().map(|d| d.get_i32("n").unwrap()).collect();
        assert_eq!(ns, vec![1, 2, 3]);

        sort_documents(&mut docs, &doc! {"n": -1});
        let ns: Vec<i32> = docs.iter().map(|d| d.get_i32("n").unwrap()).collect();
        assert_eq!(ns, vec![3, 2, 1]);
    }

    #[test]
    fn missing_field_sorts_first() {
        let mut docs = vec![doc! {"n": 1}, doc! {"other": true}];
        sort_documents(&mut docs, &doc! {"n": 1});
        assert!(!docs[0].contains_key("n"));
    }
}
