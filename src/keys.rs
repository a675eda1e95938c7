//! Order-preserving key codec.
//!
//! Every key is encoded to a string whose lexical ordering matches the
//! logical ordering of the key, with a fixed cross-type order of
//! number < date < string (type-tag prefixes `A`/`B`/`C`). Numbers and
//! dates are rendered as fixed-width hex of their order-adjusted bit
//! patterns so that lexical comparison agrees with numeric comparison.
//! Compound keys encode component-wise, joined by a separator that sorts
//! below every type tag.

use serde_json::Value;

use crate::error::KeyError;
use crate::schema::KeyPath;

/// Sorts below the `A`/`B`/`C` type tags, so a shorter tuple prefix orders
/// before any longer tuple sharing it.
const COMPONENT_SEPARATOR: char = '\u{1}';

// ============================================================================
// Key
// ============================================================================

/// A logical key: a scalar, a date (millis since the epoch), or an ordered
/// tuple for compound keys. Tuples may not nest.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Number(f64),
    Date(i64),
    String(String),
    Tuple(Vec<Key>),
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Key::Number(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<Vec<Key>> for Key {
    fn from(parts: Vec<Key>) -> Self {
        Key::Tuple(parts)
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode a key into its order-preserving string form.
pub fn encode_key(key: &Key) -> Result<String, KeyError> {
    match key {
        Key::Tuple(parts) => {
            let mut out = String::new();
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    out.push(COMPONENT_SEPARATOR);
                }
                out.push_str(&encode_scalar(part)?);
            }
            Ok(out)
        }
        scalar => encode_scalar(scalar),
    }
}

fn encode_scalar(key: &Key) -> Result<String, KeyError> {
    match key {
        Key::Number(n) => {
            if n.is_nan() {
                return Err(KeyError::UnsupportedShape("NaN key".to_string()));
            }
            Ok(format!("A{}", orderable_f64(*n)))
        }
        Key::Date(millis) => Ok(format!("B{}", orderable_i64(*millis))),
        Key::String(s) => Ok(format!("C{s}")),
        Key::Tuple(_) => Err(KeyError::NestedContainer),
    }
}

/// Hex of the IEEE-754 bits, sign-adjusted so lexical order equals numeric
/// order: positives get the sign bit set, negatives get all bits inverted.
/// Negative zero collapses onto positive zero so equal numbers encode
/// identically.
fn orderable_f64(n: f64) -> String {
    let n = if n == 0.0 { 0.0 } else { n };
    let bits = n.to_bits();
    let ordered = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
    format!("{ordered:016x}")
}

fn orderable_i64(n: i64) -> String {
    let ordered = (n as u64) ^ (1 << 63);
    format!("{ordered:016x}")
}

/// Encode a caller-supplied key against a key path: compound paths require
/// tuple keys (matched component-wise), single paths require scalars.
pub fn encode_key_for_path(key: &Key, key_path: &KeyPath) -> Result<String, KeyError> {
    if key_path.is_compound() {
        match key {
            Key::Tuple(_) => encode_key(key),
            _ => Err(KeyError::UnsupportedShape(
                "compound key path requires a tuple key".to_string(),
            )),
        }
    } else {
        match key {
            Key::Tuple(_) => Err(KeyError::UnsupportedShape(
                "tuple key given for a non-compound key path".to_string(),
            )),
            scalar => encode_key(scalar),
        }
    }
}

/// Encode an ordered list of keys against one key path.
pub fn form_encoded_list(keys: &[Key], key_path: &KeyPath) -> Result<Vec<String>, KeyError> {
    keys.iter().map(|k| encode_key_for_path(k, key_path)).collect()
}

// ============================================================================
// Extraction from records
// ============================================================================

/// Resolve a dotted path (`"a.b"`) inside a record.
pub fn value_at_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Interpret a JSON value found at a key path as a key. Arrays become
/// tuples of scalars; anything else non-scalar is rejected.
pub fn key_from_value(value: &Value) -> Result<Key, KeyError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(Key::Number)
            .ok_or_else(|| KeyError::UnsupportedShape("non-finite number key".to_string())),
        Value::String(s) => Ok(Key::String(s.clone())),
        Value::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match key_from_value(item)? {
                    Key::Tuple(_) => return Err(KeyError::NestedContainer),
                    scalar => parts.push(scalar),
                }
            }
            Ok(Key::Tuple(parts))
        }
        Value::Null => Err(KeyError::UnsupportedShape("null key".to_string())),
        Value::Bool(_) => Err(KeyError::UnsupportedShape("boolean key".to_string())),
        Value::Object(_) => Err(KeyError::NestedContainer),
    }
}

/// Encode the key found at `key_path` inside `record`. Fails when the path
/// is absent.
pub fn encode_key_for_keypath(record: &Value, key_path: &KeyPath) -> Result<String, KeyError> {
    try_encode_key_for_keypath(record, key_path)?.ok_or_else(|| KeyError::MissingKeyPath {
        path: keypath_display(key_path),
    })
}

/// Like `encode_key_for_keypath`, but an absent path yields `None` rather
/// than an error. Unsupported shapes at a present path still fail.
pub fn try_encode_key_for_keypath(
    record: &Value,
    key_path: &KeyPath,
) -> Result<Option<String>, KeyError> {
    match key_path {
        KeyPath::Single(path) => match value_at_path(record, path) {
            None => Ok(None),
            Some(value) => encode_key(&key_from_value(value)?).map(Some),
        },
        KeyPath::Compound(paths) => {
            let mut parts = Vec::with_capacity(paths.len());
            for path in paths {
                let Some(value) = value_at_path(record, path) else {
                    return Ok(None);
                };
                match key_from_value(value)? {
                    Key::Tuple(_) => return Err(KeyError::NestedContainer),
                    scalar => parts.push(scalar),
                }
            }
            encode_key(&Key::Tuple(parts)).map(Some)
        }
    }
}

fn keypath_display(key_path: &KeyPath) -> String {
    match key_path {
        KeyPath::Single(p) => p.clone(),
        KeyPath::Compound(ps) => ps.join(","),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn enc(key: Key) -> String {
        encode_key(&key).expect("encode")
    }

    #[track_caller]
    fn assert_ordered(a: Key, b: Key) {
        let ea = enc(a.clone());
        let eb = enc(b.clone());
        assert!(ea < eb, "expected {a:?} ({ea}) < {b:?} ({eb})");
    }

    #[test]
    fn number_ordering_matches_lexical_ordering() {
        assert_ordered(Key::Number(1.0), Key::Number(2.0));
        assert_ordered(Key::Number(2.0), Key::Number(10.0));
        assert_ordered(Key::Number(-1.0), Key::Number(0.0));
        assert_ordered(Key::Number(-10.0), Key::Number(-2.0));
        assert_ordered(Key::Number(-0.5), Key::Number(0.25));
        assert_ordered(Key::Number(0.1), Key::Number(0.2));
        assert_ordered(Key::Number(f64::MIN), Key::Number(f64::MAX));
    }

    #[test]
    fn date_ordering_matches_lexical_ordering() {
        assert_ordered(Key::Date(-86_400_000), Key::Date(0));
        assert_ordered(Key::Date(0), Key::Date(1_700_000_000_000));
    }

    #[test]
    fn string_ordering_matches_lexical_ordering() {
        assert_ordered(Key::from("apple"), Key::from("banana"));
        assert_ordered(Key::from("a"), Key::from("aa"));
    }

    #[test]
    fn cross_type_order_is_number_then_date_then_string() {
        assert_ordered(Key::Number(f64::MAX), Key::Date(i64::MIN));
        assert_ordered(Key::Date(i64::MAX), Key::from(""));
    }

    #[test]
    fn tuple_orders_component_wise() {
        assert_ordered(
            Key::Tuple(vec![Key::Number(1.0), Key::Number(9.0)]),
            Key::Tuple(vec![Key::Number(2.0), Key::Number(0.0)]),
        );
        // A shorter tuple is a prefix of a longer one sharing components.
        assert_ordered(
            Key::Tuple(vec![Key::Number(1.0)]),
            Key::Tuple(vec![Key::Number(1.0), Key::Number(0.0)]),
        );
    }

    #[test]
    fn negative_zero_encodes_like_positive_zero() {
        assert_eq!(enc(Key::Number(-0.0)), enc(Key::Number(0.0)));
        assert_ordered(Key::Number(-f64::MIN_POSITIVE), Key::Number(-0.0));
        assert_ordered(Key::Number(-0.0), Key::Number(f64::MIN_POSITIVE));
    }

    #[test]
    fn nan_key_is_rejected() {
        assert!(encode_key(&Key::Number(f64::NAN)).is_err());
    }

    #[test]
    fn nested_tuple_is_rejected() {
        let nested = Key::Tuple(vec![Key::Number(1.0), Key::Tuple(vec![Key::Number(2.0)])]);
        assert!(matches!(encode_key(&nested), Err(KeyError::NestedContainer)));
    }

    #[test]
    fn nested_array_key_in_record_is_rejected() {
        let record = json!({"id": [[1, 2], 3]});
        let err = encode_key_for_keypath(&record, &KeyPath::from("id")).unwrap_err();
        assert!(matches!(err, KeyError::NestedContainer));
    }

    #[test]
    fn keypath_extraction_supports_dotted_paths() {
        let record = json!({"user": {"id": "u1"}});
        let encoded = encode_key_for_keypath(&record, &KeyPath::from("user.id")).unwrap();
        assert_eq!(encoded, enc(Key::from("u1")));
    }

    #[test]
    fn compound_keypath_encodes_like_tuple_key() {
        let record = json!({"a": 1, "b": "x"});
        let path = KeyPath::from(["a", "b"].as_slice());
        let from_record = encode_key_for_keypath(&record, &path).unwrap();
        let from_key =
            encode_key_for_path(&Key::Tuple(vec![Key::Number(1.0), Key::from("x")]), &path)
                .unwrap();
        assert_eq!(from_record, from_key);
    }

    #[test]
    fn missing_keypath_is_distinguished_from_unsupported() {
        let record = json!({"other": 1});
        assert!(matches!(
            try_encode_key_for_keypath(&record, &KeyPath::from("id")),
            Ok(None)
        ));
        let bad = json!({"id": true});
        assert!(try_encode_key_for_keypath(&bad, &KeyPath::from("id")).is_err());
    }

    #[test]
    fn scalar_key_rejected_for_compound_path() {
        let path = KeyPath::from(["a", "b"].as_slice());
        assert!(encode_key_for_path(&Key::from("x"), &path).is_err());
        assert!(encode_key_for_path(&Key::Tuple(vec![Key::from("x")]), &path).is_ok());
    }

    #[test]
    fn form_encoded_list_preserves_order() {
        let path = KeyPath::from("id");
        let encoded =
            form_encoded_list(&[Key::from("b"), Key::from("a")], &path).unwrap();
        assert_eq!(encoded.len(), 2);
        assert!(encoded[0] > encoded[1]);
    }
}
