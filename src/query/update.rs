//! Update-document operators: `$set`, `$unset`, `$inc`, `$mul`, `$min`,
//! `$max`, `$rename`, `$push` (with `$each`), `$pop`, `$pull`, `$pullAll`,
//! `$addToSet` (with `$each`), `$currentDate`, `$setOnInsert`. Grounded on
//! the teacher's `query/exec.rs::apply_update`, which only covered
//! `$set`/`$inc`/`$unset`; the rest follow the same dotted-path-mutation
//! shape generalized to the full operator set a MongoDB-compatible `update`
//! command needs.

use bson::{Bson, DateTime, Document};

use crate::catalog::{get_dotted, set_dotted, unset_dotted};
use crate::errors::{DbError, DbResult};
use crate::query::filter::matches_value;

/// Applies `update` (a document of `$operator: {field: arg, ...}` clauses)
/// to `doc` in place. `is_insert` gates `$setOnInsert`, which only applies
/// when an upsert is creating a brand-new document.
///
/// # Errors
/// Returns `DbError::BadValue` if `update` contains an unrecognized
/// top-level key (not a `$operator`) when `doc` already has content, which
/// signals a full-document replacement was intended instead of an update
/// document — callers should detect that case before calling this.
pub fn apply_update(doc: &mut Document, update: &Document, is_insert: bool) -> DbResult<bool> {
    let mut changed = false;
    for (op, args) in update {
        let Bson::Document(args) = args else {
            return Err(DbError::BadValue(format!("{op} expects a document of field: value pairs")));
        };
        match op.as_str() {
            "$set" => {
                for (path, value) in args {
                    set_dotted(doc, path, value.clone());
                    changed = true;
                }
            }
            "$setOnInsert" => {
                if is_insert {
                    for (path, value) in args {
                        set_dotted(doc, path, value.clone());
                        changed = true;
                    }
                }
            }
            "$unset" => {
                for (path, _) in args {
                    unset_dotted(doc, path);
                    changed = true;
                }
            }
            "$inc" => {
                for (path, delta) in args {
                    let current = get_dotted(doc, path);
                    set_dotted(doc, path, add_numeric(&current, delta)?);
                    changed = true;
                }
            }
            "$mul" => {
                for (path, factor) in args {
                    let current = get_dotted(doc, path);
                    let base = if matches!(current, Bson::Null) { zero_like(factor) } else { current };
                    set_dotted(doc, path, mul_numeric(&base, factor)?);
                    changed = true;
                }
            }
            "$min" => {
                for (path, candidate) in args {
                    let current = get_dotted(doc, path);
                    if matches!(current, Bson::Null) || crate::query::compare::compare_bson(candidate, &current) == std::cmp::Ordering::Less {
                        set_dotted(doc, path, candidate.clone());
                        changed = true;
                    }
                }
            }
            "$max" => {
                for (path, candidate) in args {
                    let current = get_dotted(doc, path);
                    if matches!(current, Bson::Null) || crate::query::compare::compare_bson(candidate, &current) == std::cmp::Ordering::Greater {
                        set_dotted(doc, path, candidate.clone());
                        changed = true;
                    }
                }
            }
            "$rename" => {
                for (from, to) in args {
                    let Bson::String(to_path) = to else { continue };
                    let value = get_dotted(doc, from);
                    if !matches!(value, Bson::Null) {
                        unset_dotted(doc, from);
                        set_dotted(doc, to_path, value);
                        changed = true;
                    }
                }
            }
            "$currentDate" => {
                for (path, spec) in args {
                    let as_timestamp = matches!(spec, Bson::Document(d) if d.get_str("$type").ok() == Some("timestamp"));
                    let value = if as_timestamp {
                        Bson::Timestamp(bson::Timestamp { time: now_unix_secs(), increment: 0 })
                    } else {
                        Bson::DateTime(DateTime::now())
                    };
                    set_dotted(doc, path, value);
                    changed = true;
                }
            }
            "$push" => {
                for (path, spec) in args {
                    push_into(doc, path, spec);
                    changed = true;
                }
            }
            "$addToSet" => {
                for (path, spec) in args {
                    add_to_set(doc, path, spec);
                    changed = true;
                }
            }
            "$pop" => {
                for (path, dir) in args {
                    pop_from(doc, path, dir);
                    changed = true;
                }
            }
            "$pull" => {
                for (path, condition) in args {
                    pull_from(doc, path, condition);
                    changed = true;
                }
            }
            "$pullAll" => {
                for (path, values) in args {
                    let Bson::Array(to_remove) = values else { continue };
                    if let Bson::Array(items) = get_dotted(doc, path) {
                        let filtered: Vec<Bson> = items.into_iter().filter(|v| !to_remove.contains(v)).collect();
                        set_dotted(doc, path, Bson::Array(filtered));
                        changed = true;
                    }
                }
            }
            other => return Err(DbError::BadValue(format!("unknown update operator {other}"))),
        }
    }
    Ok(changed)
}

fn zero_like(sample: &Bson) -> Bson {
    match sample {
        Bson::Double(_) => Bson::Double(0.0),
        Bson::Int64(_) => Bson::Int64(0),
        _ => Bson::Int32(0),
    }
}

fn add_numeric(a: &Bson, b: &Bson) -> DbResult<Bson> {
    numeric_op(a, b, |x, y| x + y, |x, y| x.wrapping_add(y))
}

fn mul_numeric(a: &Bson, b: &Bson) -> DbResult<Bson> {
    numeric_op(a, b, |x, y| x * y, |x, y| x.wrapping_mul(y))
}

fn numeric_op(a: &Bson, b: &Bson, f64_op: impl Fn(f64, f64) -> f64, i64_op: impl Fn(i64, i64) -> i64) -> DbResult<Bson> {
    let a_num = if matches!(a, Bson::Null) { zero_like(b) } else { a.clone() };
    match (&a_num, b) {
        (Bson::Int32(x), Bson::Int32(y)) => Ok(Bson::Int32(i64_op(i64::from(*x), i64::from(*y)) as i32)),
        (Bson::Int64(x), Bson::Int32(y)) | (Bson::Int32(y), Bson::Int64(x)) => Ok(Bson::Int64(i64_op(*x, i64::from(*y)))),
        (Bson::Int64(x), Bson::Int64(y)) => Ok(Bson::Int64(i64_op(*x, *y))),
        (x, y) if x.as_f64().is_some() && y.as_f64().is_some() => {
            Ok(Bson::Double(f64_op(x.as_f64().unwrap(), y.as_f64().unwrap())))
        }
        _ => Err(DbError::BadValue("cannot apply numeric update operator to non-numeric field".into())),
    }
}

fn push_into(doc: &mut Document, path: &str, spec: &Bson) {
    let mut items = match get_dotted(doc, path) {
        Bson::Array(items) => items,
        Bson::Null => Vec::new(),
        other => vec![other],
    };
    if let Bson::Document(d) = spec {
        if let Some(each) = d.get_array("$each").ok() {
            items.extend(each.iter().cloned());
            set_dotted(doc, path, Bson::Array(items));
            return;
        }
    }
    items.push(spec.clone());
    set_dotted(doc, path, Bson::Array(items));
}

fn add_to_set(doc: &mut Document, path: &str, spec: &Bson) {
    let mut items = match get_dotted(doc, path) {
        Bson::Array(items) => items,
        Bson::Null => Vec::new(),
        other => vec![other],
    };
    let to_add: Vec<Bson> = if let Bson::Document(d) = spec {
        if let Ok(each) = d.get_array("$each") { each.clone() } else { vec![spec.clone()] }
    } else {
        vec![spec.clone()]
    };
    for v in to_add {
        if !items.contains(&v) {
            items.push(v);
        }
    }
    set_dotted(doc, path, Bson::Array(items));
}

fn pop_from(doc: &mut Document, path: &str, dir: &Bson) {
    let Bson::Array(mut items) = get_dotted(doc, path) else { return };
    if items.is_empty() {
        return;
    }
    let from_end = dir.as_i32().unwrap_or(1) >= 0;
    if from_end {
        items.pop();
    } else {
        items.remove(0);
    }
    set_dotted(doc, path, Bson::Array(items));
}

fn pull_from(doc: &mut Document, path: &str, condition: &Bson) {
    let Bson::Array(items) = get_dotted(doc, path) else { return };
    let filtered: Vec<Bson> = items.into_iter().filter(|item| !matches_value(item, condition)).collect();
    set_dotted(doc, path, Bson::Array(filtered));
}

fn now_unix_secs() -> u32 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0)
}

/// Returns whether `update` is an operator document (every top-level key
/// starts with `$`) as opposed to a full-document replacement.
#[must_use]
pub fn is_operator_update(update: &Document) -> bool {
    !update.is_empty() && update.keys().all(|k| k.starts_with('$'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn set_and_unset() {
        let mut d = doc! {"a": 1};
        apply_update(&mut d, &doc! {"$set": {"b": 2}, "$unset": {"a": ""}}, false).unwrap();
        assert_eq!(d, doc! {"b": 2});
    }

    #[test]
    fn inc_and_mul_create_field_when_missing() {
        let mut d = doc! {};
        apply_update(&mut d, &doc! {"$inc": {"n": 5}}, false).unwrap();
        assert_eq!(d.get_i32("n").unwrap(), 5);
        apply_update(&mut d, &doc! {"$mul": {"n": 3}}, false).unwrap();
        assert_eq!(d.get_i32("n").unwrap(), 15);
    }

    #[test]
    fn min_max() {
        let mut d = doc! {"n": 5};
        apply_update(&mut d, &doc! {"$min": {"n": 3}}, false).unwrap();
        assert_eq!(d.get_i32("n").unwrap(), 3);
        apply_update(&mut d, &doc! {"$max": {"n": 10}}, false).unwrap();
        assert_eq!(d.get_i32("n").unwrap(), 10);
    }

    #[test]
    fn push_each_and_pull() {
        let mut d = doc! {"tags": ["a"]};
        apply_update(&mut d, &doc! {"$push": {"tags": {"$each": ["b", "c"]}}}, false).unwrap();
        assert_eq!(d.get_array("tags").unwrap().len(), 3);
        apply_update(&mut d, &doc! {"$pull": {"tags": "b"}}, false).unwrap();
        let tags = d.get_array("tags").unwrap();
        assert!(!tags.contains(&Bson::String("b".into())));
    }

    #[test]
    fn pull_with_operator_condition() {
        let mut d = doc! {"scores": [1, 5, 10]};
        apply_update(&mut d, &doc! {"$pull": {"scores": {"$gte": 5}}}, false).unwrap();
        assert_eq!(d.get_array("scores").unwrap(), &vec![Bson::Int32(1)]);
    }

    #[test]
    fn add_to_set_dedupes() {
        let mut d = doc! {"tags": ["a"]};
        apply_update(&mut d, &doc! {"$addToSet": {"tags": "a"}}, false).unwrap();
        assert_eq!(d.get_array("tags").unwrap().len(), 1);
    }

    #[test]
    fn rename_moves_value() {
        let mut d = doc! {"old": 1};
        apply_update(&mut d, &doc! {"$rename": {"old": "new"}}, false).unwrap();
        assert!(!d.contains_key("old"));
        assert_eq!(d.get_i32("new").unwrap(), 1);
    }

    #[test]
    fn set_on_insert_only_applies_on_insert() {
        let mut d = doc! {};
        apply_update(&mut d, &doc! {"$setOnInsert": {"a": 1}}, false).unwrap();
        assert!(!d.contains_key("a"));
        apply_update(&mut d, &doc! {"$setOnInsert": {"a": 1}}, true).unwrap();
        assert_eq!(d.get_i32("a").unwrap(), 1);
    }
}
