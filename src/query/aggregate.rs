//! Aggregation pipeline execution over an already-materialized document
//! vector (the collection scan result): `$match`, `$group` (with `$sum`,
//! `$count`, `$avg`, `$min`, `$max` accumulators), `$sort`, `$project`,
//! `$limit`, `$skip`, `$unwind`. There is no pipeline-stage-to-index
//! pushdown: per the engine's collection-scan-only design, `$match` simply
//! filters the in-memory vector the same way `find` does. Grounded on the
//! teacher's `query/exec.rs` execution shape, generalized from find/update
//! execution to a staged pipeline the way `small-db-small-db`'s planner
//! chains relational operators.

use bson::{Bson, Document};

use crate::errors::{DbError, DbResult};
use crate::query::compare::compare_bson;
use crate::query::filter;
use crate::query::projection;
use crate::query::sort;

/// Runs `pipeline` (a list of single-key stage documents) over `input`.
///
/// # Errors
/// Returns `DbError::BadValue` for a malformed or unsupported stage.
pub fn run_pipeline(mut input: Vec<Document>, pipeline: &[Document]) -> DbResult<Vec<Document>> {
    for stage in pipeline {
        let Some((name, arg)) = stage.iter().next() else { continue };
        input = run_stage(input, name, arg)?;
    }
    Ok(input)
}

fn run_stage(input: Vec<Document>, name: &str, arg: &Bson) -> DbResult<Vec<Document>> {
    match name {
        "$match" => {
            let Bson::Document(f) = arg else { return Err(DbError::BadValue("$match requires a document".into())) };
            Ok(input.into_iter().filter(|d| filter::matches(d, f)).collect())
        }
        "$sort" => {
            let Bson::Document(spec) = arg else { return Err(DbError::BadValue("$sort requires a document".into())) };
            let mut out = input;
            sort::sort_documents(&mut out, spec);
            Ok(out)
        }
        "$project" => {
            let Bson::Document(spec) = arg else { return Err(DbError::BadValue("$project requires a document".into())) };
            Ok(input.iter().map(|d| projection::apply(d, spec)).collect())
        }
        "$limit" => {
            let n = arg.as_i64().ok_or_else(|| DbError::BadValue("$limit requires a number".into()))?;
            Ok(input.into_iter().take(n.max(0) as usize).collect())
        }
        "$skip" => {
            let n = arg.as_i64().ok_or_else(|| DbError::BadValue("$skip requires a number".into()))?;
            Ok(input.into_iter().skip(n.max(0) as usize).collect())
        }
        "$unwind" => unwind(input, arg),
        "$group" => group(input, arg),
        other => Err(DbError::BadValue(format!("unsupported aggregation stage {other}"))),
    }
}

fn field_path(arg: &Bson) -> DbResult<&str> {
    match arg {
        Bson::String(s) if s.starts_with('$') => Ok(&s[1..]),
        _ => Err(DbError::BadValue("$unwind requires a field path string like \"$field\"".into())),
    }
}

fn unwind(input: Vec<Document>, arg: &Bson) -> DbResult<Vec<Document>> {
    let path = field_path(arg)?.to_string();
    let mut out = Vec::new();
    for doc in input {
        match doc.get(&path) {
            Some(Bson::Array(items)) => {
                for item in items {
                    let mut clone = doc.clone();
                    clone.insert(path.clone(), item.clone());
                    out.push(clone);
                }
            }
            Some(_) => out.push(doc),
            None => {}
        }
    }
    Ok(out)
}

fn resolve_group_key(doc: &Document, key_spec: &Bson) -> Bson {
    match key_spec {
        Bson::String(s) if s.starts_with('$') => crate::catalog::get_dotted(doc, &s[1..]),
        other => other.clone(),
    }
}

fn resolve_field_expr(doc: &Document, expr: &Bson) -> Bson {
    match expr {
        Bson::String(s) if s.starts_with('$') => crate::catalog::get_dotted(doc, &s[1..]),
        other => other.clone(),
    }
}

struct GroupBucket {
    key: Bson,
    docs: Vec<Document>,
}

fn group(input: Vec<Document>, arg: &Bson) -> DbResult<Vec<Document>> {
    let Bson::Document(spec) = arg else { return Err(DbError::BadValue("$group requires a document".into())) };
    let id_spec = spec.get("_id").ok_or_else(|| DbError::BadValue("$group requires an _id expression".into()))?;

    let mut buckets: Vec<GroupBucket> = Vec::new();
    for doc in input {
        let key = resolve_group_key(&doc, id_spec);
        match buckets.iter_mut().find(|b| b.key == key) {
            Some(b) => b.docs.push(doc),
            None => buckets.push(GroupBucket { key, docs: vec![doc] }),
        }
    }

    let accumulators: Vec<(&String, &Bson)> = spec.iter().filter(|(k, _)| k.as_str() != "_id").collect();

    let mut out = Vec::with_capacity(buckets.len());
    for bucket in &buckets {
        let mut result = Document::new();
        result.insert("_id", bucket.key.clone());
        for (field, acc_spec) in &accumulators {
            let Bson::Document(acc) = acc_spec else {
                return Err(DbError::BadValue(format!("accumulator for {field} must be a document")));
            };
            let Some((op, expr)) = acc.iter().next() else { continue };
            result.insert((*field).clone(), apply_accumulator(op, expr, &bucket.docs)?);
        }
        out.push(result);
    }
    Ok(out)
}

fn apply_accumulator(op: &str, expr: &Bson, docs: &[Document]) -> DbResult<Bson> {
    match op {
        "$sum" => {
            if let Bson::Int32(1) = expr {
                return Ok(Bson::Int64(docs.len() as i64));
            }
            let total: f64 = docs.iter().map(|d| resolve_field_expr(d, expr).as_f64().unwrap_or(0.0)).sum();
            Ok(numeric_result(total, docs.iter().all(|d| resolve_field_expr(d, expr).as_i64().is_some())))
        }
        "$count" => Ok(Bson::Int64(docs.len() as i64)),
        "$avg" => {
            if docs.is_empty() {
                return Ok(Bson::Null);
            }
            let values: Vec<f64> = docs.iter().map(|d| resolve_field_expr(d, expr).as_f64().unwrap_or(0.0)).collect();
            Ok(Bson::Double(values.iter().sum::<f64>() / values.len() as f64))
        }
        "$min" => Ok(docs
            .iter()
            .map(|d| resolve_field_expr(d, expr))
            .min_by(compare_bson)
            .unwrap_or(Bson::Null)),
        "$max" => Ok(docs
            .iter()
            .map(|d| resolve_field_expr(d, expr))
            .max_by(compare_bson)
            .unwrap_or(Bson::Null)),
        "$first" => Ok(docs.first().map(|d| resolve_field_expr(d, expr)).unwrap_or(Bson::Null)),
        "$last" => Ok(docs.last().map(|d| resolve_field_expr(d, expr)).unwrap_or(Bson::Null)),
        "$push" => Ok(Bson::Array(docs.iter().map(|d| resolve_field_expr(d, expr)).collect())),
        other => Err(DbError::BadValue(format!("unsupported accumulator {other}"))),
    }
}

fn numeric_result(total: f64, all_integral: bool) -> Bson {
    if all_integral && total.fract() == 0.0 && total.abs() < i64::MAX as f64 {
        Bson::Int64(total as i64)
    } else {
        Bson::Double(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn match_then_sort_then_limit() {
        let docs = vec![doc! {"n": 3}, doc! {"n": 1}, doc! {"n": 2}];
        let pipeline = vec![doc! {"$match": {"n": {"$gt": 0}}}, doc! {"$sort": {"n": 1}}, doc! {"$limit": 2}];
        let out = run_pipeline(docs, &pipeline).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get_i32("n").unwrap(), 1);
    }

    #[test]
    fn group_sum_and_count() {
        let docs = vec![
            doc! {"cat": "a", "amount": 10},
            doc! {"cat": "a", "amount": 5},
            doc! {"cat": "b", "amount": 1},
        ];
        let pipeline = vec![doc! {"$group": {"_id": "$cat", "total": {"$sum": "$amount"}, "n": {"$sum": 1}}}];
        let mut out = run_pipeline(docs, &pipeline).unwrap();
        out.sort_by_key(|d| d.get_str("_id").unwrap().to_string());
        assert_eq!(out[0].get_str("_id").unwrap(), "a");
        assert_eq!(out[0].get_i64("total").unwrap(), 15);
        assert_eq!(out[1].get_i64("n").unwrap(), 1);
    }

    #[test]
    fn unwind_expands_array_field() {
        let docs = vec![doc! {"_id": 1, "tags": ["x", "y"]}];
        let pipeline = vec![doc! {"$unwind": "$tags"}];
        let out = run_pipeline(docs, &pipeline).unwrap();
        assert_eq!(out.len(), 2);
    }
}
