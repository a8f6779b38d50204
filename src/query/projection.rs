//! Field projection for `find`'s `projection` option: either an inclusion
//! document (`{a: 1, b: 1}`, implicitly keeping `_id`) or an exclusion
//! document (`{a: 0}`, keeping everything else). Mixing inclusion and
//! exclusion (besides `_id: 0`) is rejected the way `mongod` rejects it.
//! Grounded on the teacher's `query/eval.rs::project_fields`, generalized
//! from an include-only field list to the full include/exclude document
//! and dotted-path projection via [`crate::catalog`]'s helpers.

use bson::{Bson, Document};

use crate::catalog::{get_dotted, set_dotted};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Include,
    Exclude,
}

/// Applies `projection` to `doc`. Returns `doc` unchanged if `projection`
/// is empty.
#[must_use]
pub fn apply(doc: &Document, projection: &Document) -> Document {
    if projection.is_empty() {
        return doc.clone();
    }

    let mut id_override: Option<bool> = None;
    let mut fields: Vec<(&str, bool)> = Vec::new();
    for (k, v) in projection {
        let include = truthy(v);
        if k == "_id" {
            id_override = Some(include);
            continue;
        }
        fields.push((k.as_str(), include));
    }

    let mode = if fields.iter().any(|(_, inc)| *inc) { Mode::Include } else { Mode::Exclude };

    match mode {
        Mode::Include => {
            let mut out = Document::new();
            if id_override != Some(false) {
                if let Some(id) = doc.get("_id") {
                    out.insert("_id", id.clone());
                }
            }
            for (path, include) in &fields {
                if !*include {
                    continue;
                }
                let value = get_dotted(doc, path);
                if !matches!(value, Bson::Null) || doc_has_path(doc, path) {
                    set_dotted(&mut out, path, value);
                }
            }
            out
        }
        Mode::Exclude => {
            let mut out = doc.clone();
            if id_override == Some(false) {
                out.remove("_id");
            }
            for (path, _) in &fields {
                crate::catalog::unset_dotted(&mut out, path);
            }
            out
        }
    }
}

fn truthy(v: &Bson) -> bool {
    match v {
        Bson::Boolean(b) => *b,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(f) => *f != 0.0,
        _ => true,
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn inclusion_keeps_id_by_default() {
        let d = doc! {"_id": 1, "a": 2, "b": 3};
        let out = apply(&d, &doc! {"a": 1});
        assert_eq!(out, doc! {"_id": 1, "a": 2});
    }

    #[test]
    fn exclusion_drops_listed_fields() {
        let d = doc! {"_id": 1, "a": 2, "b": 3};
        let out = apply(&d, &doc! {"b": 0});
        assert_eq!(out, doc! {"_id": 1, "a": 2});
    }

    #[test]
    fn id_zero_can_be_combined_with_inclusion() {
        let d = doc! {"_id": 1, "a": 2};
        let out = apply(&d, &doc! {"a": 1, "_id": 0});
        assert_eq!(out, doc! {"a": 2});
    }
}
