//! The key-value ledger the engine runs on.
//!
//! The engine never touches storage directly. Every read and write goes
//! through a [`Ledger`] handle that belongs to exactly one engine operation:
//! all writes made through the handle share its transaction id, and each
//! write is atomic for its own key only. Nothing spans keys.
use chrono::Utc;

use crate::error::{EngineError, Result};
use crate::types::TimeStamp;

const COMPOSITE_KEY_NAMESPACE: char = '\u{0}';

/// One entry of a key's modification history.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct KeyModification {
    #[n(0)]
    pub tx_id: String,
    #[n(1)]
    #[cbor(with = "minicbor::bytes")]
    pub value: Vec<u8>, // empty when is_delete
    #[n(2)]
    pub timestamp: TimeStamp<Utc>,
    #[n(3)]
    pub is_delete: bool,
}

pub type StateIter<'a> = Box<dyn Iterator<Item = Result<(String, Vec<u8>)>> + 'a>;
pub type HistoryIter<'a> = Box<dyn Iterator<Item = Result<KeyModification>> + 'a>;

pub trait Ledger {
    /// Transaction id shared by every write made through this handle.
    fn tx_id(&self) -> &str;

    /// Returns `Ok(None)` for absent keys.
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put_state(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Deleting an absent key is not an error.
    fn del_state(&self, key: &str) -> Result<()>;

    fn create_composite_key(&self, object_type: &str, attributes: &[&str]) -> Result<String> {
        composite_key(object_type, attributes)
    }

    /// All entries whose composite key starts with `object_type` followed by
    /// `attributes`, in ledger key order.
    fn state_by_partial_composite_key(
        &self,
        object_type: &str,
        attributes: &[&str],
    ) -> Result<StateIter<'_>>;

    /// Oldest modification first. Read-only paths only.
    fn history_for_key(&self, key: &str) -> Result<HistoryIter<'_>>;
}

/// Builds `\0type\0attr1\0attr2\0`. A partial attribute list yields a prefix
/// of every key that extends it, and never of a key whose attribute merely
/// starts with the same characters.
pub fn composite_key(object_type: &str, attributes: &[&str]) -> Result<String> {
    check_key_part(object_type)?;
    let mut key = String::with_capacity(
        2 + object_type.len() + attributes.iter().map(|a| a.len() + 1).sum::<usize>(),
    );
    key.push(COMPOSITE_KEY_NAMESPACE);
    key.push_str(object_type);
    key.push(COMPOSITE_KEY_NAMESPACE);
    for attribute in attributes {
        check_key_part(attribute)?;
        key.push_str(attribute);
        key.push(COMPOSITE_KEY_NAMESPACE);
    }
    Ok(key)
}

/// Inverse of [`composite_key`].
pub fn split_composite_key(key: &str) -> Option<(&str, Vec<&str>)> {
    let body = key
        .strip_prefix(COMPOSITE_KEY_NAMESPACE)?
        .strip_suffix(COMPOSITE_KEY_NAMESPACE)?;
    let mut parts = body.split(COMPOSITE_KEY_NAMESPACE);
    let object_type = parts.next()?;
    Some((object_type, parts.collect()))
}

fn check_key_part(part: &str) -> Result<()> {
    if part.contains(COMPOSITE_KEY_NAMESPACE) {
        return Err(EngineError::validation(format!(
            "composite key part {part:?} contains a NUL character"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_layout() {
        let key = composite_key("Order", &["12", "alice"]).unwrap();
        assert_eq!(key, "\u{0}Order\u{0}12\u{0}alice\u{0}");

        let (object_type, parts) = split_composite_key(&key).unwrap();
        assert_eq!(object_type, "Order");
        assert_eq!(parts, vec!["12", "alice"]);
    }

    #[test]
    fn partial_key_does_not_match_longer_attribute() {
        let prefix = composite_key("Order", &["1"]).unwrap();
        let other = composite_key("Order", &["12", "alice"]).unwrap();
        let own = composite_key("Order", &["1", "alice"]).unwrap();

        assert!(!other.starts_with(&prefix));
        assert!(own.starts_with(&prefix));
    }

    #[test]
    fn nul_in_part_is_rejected() {
        assert!(matches!(
            composite_key("Order", &["1\u{0}2"]),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn key_modification_cbor() {
        let entry = KeyModification {
            tx_id: "tx1abc".into(),
            value: b"{\"a\":1}".to_vec(),
            timestamp: TimeStamp::new(),
            is_delete: false,
        };

        let encoded = minicbor::to_vec(&entry).unwrap();
        let decoded: KeyModification = minicbor::decode(&encoded).unwrap();
        assert_eq!(entry, decoded);
    }
}
