//! Full-text tokenization and per-record term extraction.
//!
//! Terms are lowercased alphanumeric runs. The same normalization is applied
//! at indexing time and at query time so that stored term bags and search
//! phrases agree.

use std::collections::HashSet;

use serde_json::Value;

use crate::keys::value_at_path;
use crate::schema::KeyPath;

/// Tokenize and normalize a search phrase into an ordered, deduplicated
/// term list.
pub fn break_and_normalize_phrase(phrase: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    for raw in phrase.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        let term = raw.to_lowercase();
        if seen.insert(term.clone()) {
            terms.push(term);
        }
    }
    terms
}

/// Extract the normalized terms a record contributes to a full-text index.
/// The indexed value may be a string or an array of strings; anything else
/// contributes nothing.
pub fn terms_for_record(key_path: &KeyPath, record: &Value) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    let paths: Vec<&str> = match key_path {
        KeyPath::Single(p) => vec![p.as_str()],
        KeyPath::Compound(ps) => ps.iter().map(|p| p.as_str()).collect(),
    };
    for path in paths {
        if let Some(value) = value_at_path(record, path) {
            collect_terms(value, &mut seen, &mut terms);
        }
    }
    terms
}

fn collect_terms(value: &Value, seen: &mut HashSet<String>, terms: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            for term in break_and_normalize_phrase(text) {
                if seen.insert(term.clone()) {
                    terms.push(term);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                if item.is_string() {
                    collect_terms(item, seen, terms);
                }
            }
        }
        _ => {}
    }
}

// ============================================================================
// Tests
// ============================================================================
