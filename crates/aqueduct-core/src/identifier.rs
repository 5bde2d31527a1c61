//! Two-part document identifiers (`collection/key`).

use crate::error::{AdapterError, Result};

pub fn to_global_id(collection: &str, key: &str) -> String {
    format!("{collection}/{key}")
}

/// Split a global id into `(collection, key)`.
pub fn split(global_id: &str) -> Result<(&str, &str)> {
    match global_id.split_once('/') {
        Some((collection, key)) if is_token(collection) && is_token(key) => Ok((collection, key)),
        _ => Err(AdapterError::InvalidFormat(format!(
            "expected `<collection>/<key>`, got `{global_id}`"
        ))),
    }
}

pub fn validate(global_id: &str) -> Result<()> {
    split(global_id).map(|_| ())
}

/// Key part of a global id, or the input itself when it is already a bare key.
pub fn key_from_id(id: &str) -> Result<&str> {
    if id.contains('/') {
        split(id).map(|(_, key)| key)
    } else if is_token(id) {
        Ok(id)
    } else {
        Err(AdapterError::InvalidFormat(format!("empty document key `{id}`")))
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && !s.contains('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_collection_and_key() {
        for (c, k) in [("users", "123"), ("a", "b"), ("user_posts", "x-y:z")] {
            let id = to_global_id(c, k);
            assert_eq!(split(&id).unwrap(), (c, k));
        }
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["users", "/123", "users/", "a/b/c", ""] {
            assert!(
                matches!(validate(bad), Err(AdapterError::InvalidFormat(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn key_from_id_accepts_both_forms() {
        assert_eq!(key_from_id("users/42").unwrap(), "42");
        assert_eq!(key_from_id("42").unwrap(), "42");
        assert!(key_from_id("").is_err());
    }
}
