//! Stored entities. Field names on the wire are fixed; existing ledger data
//! must stay readable.
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{AdjustmentSource, OrderStatus, TicketStatus, TimeStamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    pub password: String,
    #[serde(rename = "isAdmin")]
    pub is_admin: bool,
    #[serde(rename = "lobID")]
    pub lob_id: u32,
}

impl Participant {
    pub fn new(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        password: impl Into<String>,
        is_admin: bool,
        lob_id: u32,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            password: password.into(),
            is_admin,
            lob_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub value: i64,
    #[serde(rename = "ticketIDs", default)]
    pub ticket_ids: Vec<AdjustmentSource>,
}

impl Credit {
    pub fn new(user_id: impl Into<String>, value: i64) -> Self {
        Self {
            user_id: user_id.into(),
            value,
            ticket_ids: Vec::new(),
        }
    }

    pub fn has_award_for(&self, ticket_id: u64) -> bool {
        self.ticket_ids
            .iter()
            .any(|source| source.ticket_id() == Some(ticket_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lob {
    #[serde(rename = "lobID")]
    pub lob_id: u32,
    #[serde(rename = "totalCredit")]
    pub total_credit: i64,
    #[serde(rename = "userIDs", default)]
    pub user_ids: Vec<String>,
}

impl Lob {
    pub fn new(lob_id: u32) -> Self {
        Self {
            lob_id,
            total_credit: 0,
            user_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    #[serde(rename = "ticketID")]
    pub ticket_id: u64,
    pub status: TicketStatus,
    pub title: String,
    #[serde(rename = "type")]
    pub ticket_type: String,
    pub value: i64,
    #[serde(rename = "ownerUserID")]
    pub owner_user_id: String,
    pub deadline: TimeStamp<Utc>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub policy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "ticketID")]
    pub ticket_id: u64,
    #[serde(rename = "userID")]
    pub user_id: String,
    pub status: OrderStatus,
}

/// Global list of participant ids, in creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantIndex {
    #[serde(rename = "userIDs", default)]
    pub user_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketCounter {
    #[serde(rename = "lastTicketID")]
    pub last_ticket_id: u64,
}

/// One administrator grant, kept next to the balance it changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    #[serde(rename = "grantID")]
    pub grant_id: String,
    #[serde(rename = "adminID")]
    pub admin_id: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    pub delta: i64,
    #[serde(default)]
    pub note: String,
    #[serde(rename = "txID")]
    pub tx_id: String,
    #[serde(rename = "grantedAt")]
    pub granted_at: TimeStamp<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_field_names() {
        let p = Participant::new("u1", "Ada", "", false, 0);
        let json: serde_json::Value = serde_json::to_value(&p).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "userID": "u1",
                "userName": "Ada",
                "password": "",
                "isAdmin": false,
                "lobID": 0
            })
        );
    }

    #[test]
    fn ticket_field_names() {
        let ticket = Ticket {
            ticket_id: 7,
            status: TicketStatus::Applied,
            title: "Fix build".into(),
            ticket_type: "chore".into(),
            value: 50,
            owner_user_id: "owner".into(),
            deadline: TimeStamp::new_with(2025, 1, 31, 0, 0, 0).unwrap(),
            comment: String::new(),
            policy: "any".into(),
        };
        let json = serde_json::to_value(&ticket).unwrap();

        assert_eq!(json["ticketID"], 7);
        assert_eq!(json["status"], 1);
        assert_eq!(json["type"], "chore");
        assert_eq!(json["ownerUserID"], "owner");
        assert_eq!(json["deadline"], "2025-01-31T00:00:00Z");

        let back: Ticket = serde_json::from_value(json).unwrap();
        assert_eq!(back, ticket);
    }

    #[test]
    fn credit_reads_legacy_ticket_list() {
        let credit: Credit =
            serde_json::from_str(r#"{"userID":"u1","value":30,"ticketIDs":["4","ManualAdd","ManualAdd"]}"#)
                .unwrap();

        assert!(credit.has_award_for(4));
        assert!(!credit.has_award_for(5));
        assert_eq!(credit.ticket_ids.len(), 3);
    }
}
