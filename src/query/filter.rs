//! The filter matcher: evaluates a MongoDB-style query document against a
//! candidate document, recursively, the way `find`/`update`/`delete`
//! selectors are evaluated against a collection scan. Grounded on the
//! teacher's `query/eval.rs::eval_filter`, generalized from its narrow
//! `Filter` enum to operate directly on the raw BSON query document (no
//! separate parse step), and extended with the full operator surface a
//! MongoDB-compatible matcher needs: `$and`/`$or`/`$nor`/`$not`,
//! `$eq`/`$ne`/`$gt`/`$gte`/`$lt`/`$lte`, `$in`/`$nin`, `$exists`, `$type`,
//! `$regex`, `$size`, `$all`, `$elemMatch`, `$mod`.

use bson::{Bson, Document};

use crate::catalog::get_dotted;
use crate::query::compare::{compare_bson, type_rank};

/// Returns whether `doc` satisfies `filter`.
#[must_use]
pub fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, cond)| {
        if key.starts_with('$') {
            match_logical(doc, key, cond)
        } else {
            field_matches(doc, key, cond)
        }
    })
}

fn match_logical(doc: &Document, op: &str, value: &Bson) -> bool {
    match op {
        "$and" => as_doc_array(value).is_some_and(|fs| fs.iter().all(|f| matches(doc, f))),
        "$or" => as_doc_array(value).is_some_and(|fs| fs.iter().any(|f| matches(doc, f))),
        "$nor" => as_doc_array(value).is_some_and(|fs| !fs.iter().any(|f| matches(doc, f))),
        // Unknown top-level operators don't match anything, rather than panicking.
        _ => false,
    }
}

fn as_doc_array(value: &Bson) -> Option<Vec<Document>> {
    let Bson::Array(items) = value else { return None };
    items
        .iter()
        .map(|i| if let Bson::Document(d) = i { Some(d.clone()) } else { None })
        .collect()
}

/// Evaluates a single `{path: condition}` clause. `condition` is either an
/// implicit-equality value or an operator document (`{"$gt": 5}`).
fn field_matches(doc: &Document, path: &str, condition: &Bson) -> bool {
    let actual = get_dotted(doc, path);
    matches_value(&actual, condition)
}

/// Evaluates `condition` against a standalone value, without a containing
/// document/path (so `$exists` degrades to presence-of-non-null). Shared by
/// [`field_matches`] and by update operators (`$pull`'s element test) that
/// need the same implicit-equality / operator-document duality outside a
/// `find` filter context.
#[must_use]
pub fn matches_value(actual: &Bson, condition: &Bson) -> bool {
    if let Bson::Document(ops) = condition {
        if is_operator_document(ops) {
            let empty = Document::new();
            return ops.iter().all(|(op, arg)| eval_operator(&empty, "", actual, op, arg));
        }
    }
    value_or_array_element_equals(actual, condition)
}

fn is_operator_document(d: &Document) -> bool {
    !d.is_empty() && d.keys().all(|k| k.starts_with('$'))
}

/// Implicit equality: matches the field's value directly, or (MongoDB's
/// array-element semantics) any element of the field when it is an array.
fn value_or_array_element_equals(actual: &Bson, expected: &Bson) -> bool {
    if actual == expected {
        return true;
    }
    if let Bson::Array(items) = actual {
        return items.iter().any(|v| v == expected);
    }
    false
}

fn eval_operator(doc: &Document, path: &str, actual: &Bson, op: &str, arg: &Bson) -> bool {
    match op {
        "$eq" => value_or_array_element_equals(actual, arg),
        "$ne" => !value_or_array_element_equals(actual, arg),
        "$gt" => cmp_matches(actual, arg, |o| o == std::cmp::Ordering::Greater),
        "$gte" => cmp_matches(actual, arg, |o| o != std::cmp::Ordering::Less),
        "$lt" => cmp_matches(actual, arg, |o| o == std::cmp::Ordering::Less),
        "$lte" => cmp_matches(actual, arg, |o| o != std::cmp::Ordering::Greater),
        "$in" => {
            let Bson::Array(set) = arg else { return false };
            set.iter().any(|v| value_or_array_element_equals(actual, v))
        }
        "$nin" => {
            let Bson::Array(set) = arg else { return false };
            !set.iter().any(|v| value_or_array_element_equals(actual, v))
        }
        "$exists" => {
            let want = matches!(arg, Bson::Boolean(true));
            let present = !matches!(actual, Bson::Null) || doc_has_path(doc, path);
            present == want
        }
        "$type" => match_type(actual, arg),
        "$size" => match_size(actual, arg),
        "$all" => {
            let Bson::Array(set) = arg else { return false };
            let Bson::Array(items) = actual else { return false };
            set.iter().all(|want| items.contains(want))
        }
        "$elemMatch" => match_elem(actual, arg),
        "$mod" => match_mod(actual, arg),
        "$not" => !match_not(doc, path, actual, arg),
        "$regex" => match_regex(actual, arg, doc.get(path)),
        "$options" => true, // consumed alongside $regex
        _ => false,
    }
}

fn match_not(doc: &Document, path: &str, actual: &Bson, arg: &Bson) -> bool {
    if let Bson::Document(ops) = arg {
        if is_operator_document(ops) {
            return ops.iter().all(|(op, a)| eval_operator(doc, path, actual, op, a));
        }
    }
    value_or_array_element_equals(actual, arg)
}

fn cmp_matches(actual: &Bson, expected: &Bson, accept: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    if matches!(actual, Bson::Null) {
        return false;
    }
    if let Bson::Array(items) = actual {
        return items.iter().any(|v| accept(compare_bson(v, expected)));
    }
    accept(compare_bson(actual, expected))
}

fn doc_has_path(doc: &Document, path: &str) -> bool {
    let mut parts = path.split('.');
    let Some(first) = parts.next() else { return false };
    let Some(mut current) = doc.get(first) else { return false };
    for part in parts {
        match current {
            Bson::Document(d) => match d.get(part) {
                Some(v) => current = v,
                None => return false,
            },
            _ => return false,
        }
    }
    true
}

fn match_type(actual: &Bson, arg: &Bson) -> bool {
    let wanted: Vec<String> = match arg {
        Bson::Array(items) => items.iter().filter_map(bson_type_alias_or_code).collect(),
        other => bson_type_alias_or_code(other).into_iter().collect(),
    };
    let actual_alias = type_alias(actual);
    let actual_code = type_rank_code(actual);
    wanted.iter().any(|w| w == actual_alias || w == actual_code.to_string().as_str())
}

fn bson_type_alias_or_code(v: &Bson) -> Option<String> {
    match v {
        Bson::String(s) => Some(s.clone()),
        Bson::Int32(i) => Some(i.to_string()),
        Bson::Double(f) => Some((*f as i64).to_string()),
        _ => None,
    }
}

fn type_alias(v: &Bson) -> &'static str {
    match v {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        Bson::Binary(_) => "binData",
        Bson::Undefined => "undefined",
        Bson::ObjectId(_) => "objectId",
        Bson::Boolean(_) => "bool",
        Bson::DateTime(_) => "date",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::DbPointer(_) => "dbPointer",
        Bson::JavaScriptCode(_) => "javascript",
        Bson::Symbol(_) => "symbol",
        Bson::JavaScriptCodeWithScope(_) => "javascriptWithScope",
        Bson::Int32(_) => "int",
        Bson::Timestamp(_) => "timestamp",
        Bson::Int64(_) => "long",
        Bson::Decimal128(_) => "decimal",
        Bson::MinKey => "minKey",
        Bson::MaxKey => "maxKey",
    }
}

/// Numeric BSON type code as MongoDB documents it (distinct from our
/// internal `type_rank`, which is an ordering rank, not the wire code).
fn type_rank_code(v: &Bson) -> i32 {
    match v {
        Bson::Double(_) => 1,
        Bson::String(_) => 2,
        Bson::Document(_) => 3,
        Bson::Array(_) => 4,
        Bson::Binary(_) => 5,
        Bson::Undefined => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Null => 10,
        Bson::RegularExpression(_) => 11,
        Bson::DbPointer(_) => 12,
        Bson::JavaScriptCode(_) => 13,
        Bson::Symbol(_) => 14,
        Bson::JavaScriptCodeWithScope(_) => 15,
        Bson::Int32(_) => 16,
        Bson::Timestamp(_) => 17,
        Bson::Int64(_) => 18,
        Bson::Decimal128(_) => 19,
        Bson::MinKey => -1,
        Bson::MaxKey => 127,
    }
}

fn match_size(actual: &Bson, arg: &Bson) -> bool {
    let Bson::Array(items) = actual else { return false };
    let Some(want) = arg.as_i64() else { return false };
    items.len() as i64 == want
}

fn match_elem(actual: &Bson, arg: &Bson) -> bool {
    let Bson::Array(items) = actual else { return false };
    let Bson::Document(sub) = arg else { return false };
    if is_operator_document(sub) {
        items.iter().any(|item| sub.iter().all(|(op, a)| eval_operator(&Document::new(), "", item, op, a)))
    } else {
        items.iter().any(|item| match item {
            Bson::Document(d) => matches(d, sub),
            _ => false,
        })
    }
}

fn match_mod(actual: &Bson, arg: &Bson) -> bool {
    let Bson::Array(parts) = arg else { return false };
    if parts.len() != 2 {
        return false;
    }
    let (Some(divisor), Some(remainder), Some(value)) = (parts[0].as_i64(), parts[1].as_i64(), actual.as_i64().or_else(|| actual.as_f64().map(|f| f as i64))) else {
        return false;
    };
    if divisor == 0 {
        return false;
    }
    value % divisor == remainder
}

fn match_regex(actual: &Bson, pattern_arg: &Bson, _raw: Option<&Bson>) -> bool {
    let Bson::String(s) = actual else { return false };
    let (pattern, options) = match pattern_arg {
        Bson::String(p) => (p.as_str(), ""),
        Bson::RegularExpression(r) => (r.pattern.as_str(), r.options.as_str()),
        _ => return false,
    };
    regex_is_match(pattern, options, s)
}

#[cfg(feature = "regex")]
fn regex_is_match(pattern: &str, options: &str, haystack: &str) -> bool {
    let mut builder = regex::RegexBuilder::new(pattern);
    builder.case_insensitive(options.contains('i'));
    builder.multi_line(options.contains('m'));
    builder.dot_matches_new_line(options.contains('s'));
    builder.ignore_whitespace(options.contains('x'));
    builder.build().is_ok_and(|re| re.is_match(haystack))
}

#[cfg(not(feature = "regex"))]
fn regex_is_match(pattern: &str, _options: &str, haystack: &str) -> bool {
    haystack.contains(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn implicit_equality_matches_scalar_and_array_elements() {
        let d = doc! {"tags": ["a", "b"]};
        assert!(matches(&d, &doc! {"tags": "a"}));
        assert!(!matches(&d, &doc! {"tags": "z"}));
    }

    #[test]
    fn comparison_operators() {
        let d = doc! {"age": 30};
        assert!(matches(&d, &doc! {"age": {"$gte": 30}}));
        assert!(!matches(&d, &doc! {"age": {"$lt": 30}}));
    }

    #[test]
    fn logical_and_or_nor() {
        let d = doc! {"a": 1, "b": 2};
        assert!(matches(&d, &doc! {"$and": [{"a": 1}, {"b": 2}]}));
        assert!(matches(&d, &doc! {"$or": [{"a": 99}, {"b": 2}]}));
        assert!(matches(&d, &doc! {"$nor": [{"a": 99}]}));
    }

    #[test]
    fn exists_and_in() {
        let d = doc! {"a": 1};
        assert!(matches(&d, &doc! {"a": {"$exists": true}}));
        assert!(matches(&d, &doc! {"b": {"$exists": false}}));
        assert!(matches(&d, &doc! {"a": {"$in": [1, 2, 3]}}));
    }

    #[test]
    fn elem_match_and_all() {
        let d = doc! {"scores": [{"x": 1}, {"x": 5}]};
        assert!(matches(&d, &doc! {"scores": {"$elemMatch": {"x": {"$gt": 3}}}}));
        let d2 = doc! {"tags": ["a", "b", "c"]};
        assert!(matches(&d2, &doc! {"tags": {"$all": ["a", "c"]}}));
    }

    #[test]
    fn mod_and_size() {
        let d = doc! {"n": 10, "arr": [1, 2, 3]};
        assert!(matches(&d, &doc! {"n": {"$mod": [5, 0]}}));
        assert!(matches(&d, &doc! {"arr": {"$size": 3}}));
    }

    #[test]
    fn type_rank_is_unused_directly_but_stays_consistent_with_compare() {
        assert!(type_rank(&Bson::Null) < type_rank(&Bson::Int32(0)));
    }
}
