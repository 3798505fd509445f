//! Round-trip token codec.
//!
//! When a save attempt fails, the temporary metadata references are encoded
//! into an opaque token the form carries back on resubmission. The token's
//! plaintext is controlled by an untrusted client, so decoding re-validates
//! every reference against the database: a reference is accepted only if the
//! record exists, is still temporary, and matches the stated key. Anything
//! else is silently dropped -- a hostile token must never claim a permanent
//! record or a temp record whose content key differs.

use std::collections::BTreeMap;

use base64::Engine;

use crate::field::TempRef;
use crate::storage::{Database, DatabaseError};

/// Encode per-attribute temp references as base64(JSON).
pub fn encode(refs: &BTreeMap<String, Vec<TempRef>>) -> String {
    let json = serde_json::to_vec(refs).expect("token payload serializes");
    base64::engine::general_purpose::STANDARD.encode(json)
}

/// Decode a token, keeping only references that still check out. Malformed
/// tokens decode to the empty set.
pub fn decode(
    db: &Database,
    token: &str,
) -> Result<BTreeMap<String, Vec<TempRef>>, DatabaseError> {
    let Ok(json) = base64::engine::general_purpose::STANDARD.decode(token.trim()) else {
        return Ok(BTreeMap::new());
    };
    let Ok(parsed) = serde_json::from_slice::<BTreeMap<String, Vec<TempRef>>>(&json) else {
        return Ok(BTreeMap::new());
    };

    let mut accepted = BTreeMap::new();
    for (attr, refs) in parsed {
        let mut valid = Vec::new();
        for temp_ref in refs {
            match db.get_upload(&temp_ref.id)? {
                Some(record) if record.temporary && record.key == temp_ref.key => {
                    valid.push(temp_ref);
                }
                _ => {
                    tracing::debug!(
                        id = %temp_ref.id,
                        attr = %attr,
                        "Dropping round-trip reference that failed re-validation"
                    );
                }
            }
        }
        if !valid.is_empty() {
            accepted.insert(attr, valid);
        }
    }
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_transport_safe() {
        let mut refs = BTreeMap::new();
        refs.insert(
            "manual".to_string(),
            vec![TempRef {
                id: "7".to_string(),
                key: "abc".to_string(),
            }],
        );
        let token = encode(&refs);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='));
    }
}
