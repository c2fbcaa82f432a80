use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hashes the JSON form of `value` with all object keys sorted, so the digest does not depend
/// on map iteration or insertion order.
pub(crate) fn canonical_sha256<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let canonical = canonicalize(serde_json::to_value(value)?);
    let bytes = serde_json::to_vec(&canonical)?;

    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<_> = object.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, canonicalize(value)))
                    .collect(),
            )
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canonicalize).collect()),
        value => value,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn key_order_does_not_change_digest() {
        let a: serde_json::Map<_, _> = [("a", json!(1)), ("b", json!({"x": 1, "y": 2}))]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let b: serde_json::Map<_, _> = [("b", json!({"y": 2, "x": 1})), ("a", json!(1))]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        assert_eq!(
            canonical_sha256(&a).unwrap(),
            canonical_sha256(&b).unwrap()
        );
    }

    #[test]
    fn digest_is_lowercase_hex() {
        let digest = canonical_sha256(&json!({"hello": "world"})).unwrap();

        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
    }
}
