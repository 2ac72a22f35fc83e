//! Ticket drafts, the ticket registry and derived ticket status
use chrono::Utc;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::ledger::Ledger;
use crate::model::{Ticket, TicketCounter};
use crate::store::{EntityStore, keys};
use crate::types::{TicketStatus, TimeStamp};

// Used for constructing drafts. The id and status are assigned on creation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TicketDraft {
    title: Option<String>,
    ticket_type: Option<String>,
    value: Option<i64>,
    owner_user_id: Option<String>,
    deadline: Option<TimeStamp<Utc>>,
    comment: String,
    policy: String,
}

impl TicketDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
    pub fn set_type(mut self, ticket_type: impl Into<String>) -> Self {
        self.ticket_type = Some(ticket_type.into());
        self
    }
    pub fn set_value(mut self, value: i64) -> Self {
        self.value = Some(value);
        self
    }
    pub fn set_owner(mut self, owner_user_id: impl Into<String>) -> Self {
        self.owner_user_id = Some(owner_user_id.into());
        self
    }
    pub fn set_deadline(mut self, deadline: TimeStamp<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
    pub fn set_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
    pub fn set_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = policy.into();
        self
    }

    // Checks required fields and turns the draft into a ticket at `Applied`
    pub fn validate_and_finalise(self, ticket_id: u64) -> Result<Ticket> {
        let value = self
            .value
            .ok_or_else(|| EngineError::validation("value is required"))?;
        let deadline = self
            .deadline
            .ok_or_else(|| EngineError::validation("deadline is required"))?;

        let ticket = Ticket {
            ticket_id,
            status: TicketStatus::Applied,
            title: self.title.unwrap_or_default(),
            ticket_type: self.ticket_type.unwrap_or_default(),
            value,
            owner_user_id: self.owner_user_id.unwrap_or_default(),
            deadline,
            comment: self.comment,
            policy: self.policy,
        };
        check_fields(&ticket)?;
        Ok(ticket)
    }
}

/// Field rules shared by creation and update.
fn check_fields(ticket: &Ticket) -> Result<()> {
    for (field, value) in [
        ("title", &ticket.title),
        ("type", &ticket.ticket_type),
        ("ownerUserID", &ticket.owner_user_id),
    ] {
        if value.trim().is_empty() {
            return Err(EngineError::validation(format!("{field} is required")));
        }
    }
    if ticket.value < 0 {
        return Err(EngineError::validation(format!(
            "value must not be negative, got {}",
            ticket.value
        )));
    }
    Ok(())
}

pub fn read_counter<L: Ledger + ?Sized>(store: &EntityStore<'_, L>) -> Result<TicketCounter> {
    Ok(store.get(keys::TICKET_COUNTER)?.unwrap_or_default())
}

pub fn init_counter<L: Ledger + ?Sized>(store: &EntityStore<'_, L>) -> Result<()> {
    if !store.exists(keys::TICKET_COUNTER)? {
        store.put(keys::TICKET_COUNTER, &TicketCounter::default())?;
    }
    Ok(())
}

pub fn create<L: Ledger + ?Sized>(store: &EntityStore<'_, L>, draft: TicketDraft) -> Result<Ticket> {
    let mut counter = read_counter(store)?;
    let ticket = draft.validate_and_finalise(counter.last_ticket_id + 1)?;

    counter.last_ticket_id = ticket.ticket_id;
    store.put(keys::TICKET_COUNTER, &counter)?;
    store.put(&keys::ticket(ticket.ticket_id), &ticket)?;

    info!(ticket_id = ticket.ticket_id, value = ticket.value, "ticket created");
    Ok(ticket)
}

pub fn read<L: Ledger + ?Sized>(store: &EntityStore<'_, L>, ticket_id: u64) -> Result<Ticket> {
    store
        .get(&keys::ticket(ticket_id))?
        .ok_or_else(|| EngineError::not_found("ticket", ticket_id))
}

/// Walks every id the counter has handed out. Deleted ids are skipped.
pub fn read_all<L: Ledger + ?Sized>(store: &EntityStore<'_, L>) -> Result<Vec<Ticket>> {
    let counter = read_counter(store)?;
    let mut tickets = Vec::new();
    for ticket_id in 1..=counter.last_ticket_id {
        if let Some(ticket) = store.get(&keys::ticket(ticket_id))? {
            tickets.push(ticket);
        }
    }
    Ok(tickets)
}

/// Overwrites every field except `status`, which only orders drive.
pub fn update<L: Ledger + ?Sized>(store: &EntityStore<'_, L>, ticket: Ticket) -> Result<Ticket> {
    check_fields(&ticket)?;
    let existing = read(store, ticket.ticket_id)?;
    let ticket = Ticket {
        status: existing.status,
        ..ticket
    };
    store.put(&keys::ticket(ticket.ticket_id), &ticket)?;
    Ok(ticket)
}

pub fn delete<L: Ledger + ?Sized>(store: &EntityStore<'_, L>, ticket_id: u64) -> Result<()> {
    let key = keys::ticket(ticket_id);
    if !store.exists(&key)? {
        return Err(EngineError::not_found("ticket", ticket_id));
    }
    store.delete(&key)?;
    info!(ticket_id, "ticket deleted");
    Ok(())
}

/// Sets the ticket's status to the highest status among its orders.
/// A ticket without orders keeps its status.
pub fn recompute_status<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    ticket_id: u64,
) -> Result<Option<TicketStatus>> {
    let orders = store.orders_for_ticket(ticket_id)?;
    let Some(highest) = orders.iter().map(|order| order.status).max() else {
        return Ok(None);
    };

    let mut ticket = read(store, ticket_id)?;
    let status = TicketStatus::from(highest);
    if ticket.status != status {
        debug!(ticket_id, from = ?ticket.status, to = ?status, "ticket status changed");
        ticket.status = status;
        store.put(&keys::ticket(ticket_id), &ticket)?;
    }
    Ok(Some(status))
}
