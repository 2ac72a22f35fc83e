//! Typed access to the ledger's byte-addressed key space.
//!
//! Key conventions:
//! - participants live at their plain user id
//! - credits, LoBs and tickets live at a prefixed id (`Credit_<userID>`, ...)
//! - orders live at the composite key `("Order", [ticketID, userID])`
//! - grants live at the composite key `("Grant", [userID, grantID])`
//! - the ticket counter and participant index are single well-known keys
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{EngineError, Result};
use crate::ledger::Ledger;
use crate::model::{Grant, Order};

pub mod keys {
    pub const CREDIT_PREFIX: &str = "Credit_";
    pub const LOB_PREFIX: &str = "LoB_";
    pub const TICKET_PREFIX: &str = "Ticket_";
    pub const TICKET_COUNTER: &str = "TicketCounter";
    pub const PARTICIPANT_INDEX: &str = "ParticipantIDIndex";
    pub const ORDER_OBJECT_TYPE: &str = "Order";
    pub const GRANT_OBJECT_TYPE: &str = "Grant";

    pub fn participant(user_id: &str) -> String {
        user_id.to_string()
    }
    pub fn credit(user_id: &str) -> String {
        format!("{CREDIT_PREFIX}{user_id}")
    }
    pub fn lob(lob_id: u32) -> String {
        format!("{LOB_PREFIX}{lob_id}")
    }
    pub fn ticket(ticket_id: u64) -> String {
        format!("{TICKET_PREFIX}{ticket_id}")
    }
}

/// Rejects user ids that would collide with another key family.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(EngineError::validation("userID must not be empty"));
    }
    if user_id.contains('\u{0}') {
        return Err(EngineError::validation("userID must not contain NUL"));
    }
    let reserved_prefix = [keys::CREDIT_PREFIX, keys::LOB_PREFIX, keys::TICKET_PREFIX]
        .into_iter()
        .find(|prefix| user_id.starts_with(prefix));
    if let Some(prefix) = reserved_prefix {
        return Err(EngineError::validation(format!(
            "userID {user_id} uses reserved prefix {prefix}"
        )));
    }
    if user_id == keys::TICKET_COUNTER || user_id == keys::PARTICIPANT_INDEX {
        return Err(EngineError::validation(format!(
            "userID {user_id} is a reserved key"
        )));
    }
    Ok(())
}

pub struct EntityStore<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
}

impl<'a, L: Ledger + ?Sized> EntityStore<'a, L> {
    pub fn new(ledger: &'a L) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &'a L {
        self.ledger
    }

    /// Empty payloads count as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.ledger.get_state(key)? {
            Some(bytes) if !bytes.is_empty() => Ok(Some(serde_json::from_slice(&bytes)?)),
            _ => Ok(None),
        }
    }

    pub fn require<T: DeserializeOwned>(&self, kind: &'static str, key: &str) -> Result<T> {
        self.get(key)?
            .ok_or_else(|| EngineError::not_found(kind, key))
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self
            .ledger
            .get_state(key)?
            .is_some_and(|bytes| !bytes.is_empty()))
    }

    pub fn put<T: Serialize>(&self, key: &str, entity: &T) -> Result<()> {
        let bytes = serde_json::to_vec(entity)?;
        self.ledger.put_state(key, &bytes)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.ledger.del_state(key)
    }

    pub fn order_key(&self, ticket_id: u64, user_id: &str) -> Result<String> {
        let ticket = ticket_id.to_string();
        self.ledger
            .create_composite_key(keys::ORDER_OBJECT_TYPE, &[ticket.as_str(), user_id])
    }

    pub fn orders_for_ticket(&self, ticket_id: u64) -> Result<Vec<Order>> {
        let ticket = ticket_id.to_string();
        self.scan(keys::ORDER_OBJECT_TYPE, &[ticket.as_str()])
    }

    pub fn grant_key(&self, user_id: &str, grant_id: &str) -> Result<String> {
        self.ledger
            .create_composite_key(keys::GRANT_OBJECT_TYPE, &[user_id, grant_id])
    }

    /// Key order, which is grant id order.
    pub fn grants_for_user(&self, user_id: &str) -> Result<Vec<Grant>> {
        self.scan(keys::GRANT_OBJECT_TYPE, &[user_id])
    }

    fn scan<T: DeserializeOwned>(&self, object_type: &str, attributes: &[&str]) -> Result<Vec<T>> {
        self.ledger
            .state_by_partial_composite_key(object_type, attributes)?
            .filter(|item| !matches!(item, Ok((_, bytes)) if bytes.is_empty()))
            .map(|item| -> Result<T> {
                let (_, bytes) = item?;
                Ok(serde_json::from_slice(&bytes)?)
            })
            .collect()
    }
}
