//! Per-(ticket, participant) orders and the workflow that moves them.
//!
//! Orders advance one stage per call: `Applied -> Confirmed -> Done ->
//! Awarded`. A bulk call moves only the orders sitting exactly one stage
//! below the target and reports the rest as skipped. `Closed` is the escape
//! hatch and is forced from any stage. Every call ends by recomputing the
//! ticket's status.
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::credit;
use crate::error::{EngineError, Result};
use crate::ledger::Ledger;
use crate::model::{Order, Participant};
use crate::participant;
use crate::store::EntityStore;
use crate::ticket;
use crate::types::{AdjustmentSource, OrderStatus, TicketStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum TransitionOutcome {
    Moved { from: OrderStatus, to: OrderStatus },
    /// Not at the stage below the target.
    Skipped { current: OrderStatus },
    /// The participant never applied.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserTransition {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(flatten)]
    pub outcome: TransitionOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionReport {
    #[serde(rename = "ticketID")]
    pub ticket_id: u64,
    pub target: OrderStatus,
    pub transitions: Vec<UserTransition>,
    pub ticket_status: Option<TicketStatus>,
}

impl TransitionReport {
    pub fn moved(&self) -> impl Iterator<Item = &str> {
        self.transitions
            .iter()
            .filter(|t| matches!(t.outcome, TransitionOutcome::Moved { .. }))
            .map(|t| t.user_id.as_str())
    }

    /// For callers that treat any skipped participant as a failure.
    pub fn ensure_all_moved(&self) -> Result<()> {
        for transition in &self.transitions {
            let current = match transition.outcome {
                TransitionOutcome::Moved { .. } => continue,
                TransitionOutcome::Skipped { current } => current,
                TransitionOutcome::Missing => {
                    return Err(EngineError::not_found(
                        "order",
                        format!("({}, {})", self.ticket_id, transition.user_id),
                    ));
                }
            };
            return Err(EngineError::SequenceViolation {
                ticket_id: self.ticket_id,
                user_id: transition.user_id.clone(),
                current: current.into(),
                target: self.target.into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardReport {
    #[serde(rename = "ticketID")]
    pub ticket_id: u64,
    pub value: i64,
    pub transition: TransitionReport,
    /// Credited by this call.
    pub awarded: Vec<String>,
    /// Not at `Awarded`, or already credited for this ticket.
    pub skipped: Vec<String>,
}

pub fn read<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    ticket_id: u64,
    user_id: &str,
) -> Result<Option<Order>> {
    store.get(&store.order_key(ticket_id, user_id)?)
}

/// Ledger iteration order.
pub fn read_for_ticket<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    ticket_id: u64,
) -> Result<Vec<Order>> {
    store.orders_for_ticket(ticket_id)
}

pub fn apply<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    ticket_id: u64,
    user_id: &str,
) -> Result<Order> {
    ticket::read(store, ticket_id)?;
    participant::read(store, user_id)?;
    let key = store.order_key(ticket_id, user_id)?;
    if store.exists(&key)? {
        return Err(EngineError::AlreadyApplied {
            ticket_id,
            user_id: user_id.to_string(),
        });
    }

    let order = Order {
        ticket_id,
        user_id: user_id.to_string(),
        status: OrderStatus::Applied,
    };
    store.put(&key, &order)?;
    ticket::recompute_status(store, ticket_id)?;

    info!(ticket_id, user_id, "participant applied");
    Ok(order)
}

/// Moves each listed order towards `target`; see the module docs for the
/// rules. Missing orders are reported, never created.
pub fn bulk_transition<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    ticket_id: u64,
    user_ids: &[String],
    target: OrderStatus,
) -> Result<TransitionReport> {
    if target == OrderStatus::Applied {
        return Err(EngineError::validation(
            "orders enter Applied through apply, not a bulk transition",
        ));
    }

    let mut transitions = Vec::with_capacity(user_ids.len());
    for user_id in user_ids {
        let key = store.order_key(ticket_id, user_id)?;
        let outcome = match store.get::<Order>(&key)? {
            None => TransitionOutcome::Missing,
            Some(mut order) => {
                let from = order.status;
                let allowed = match target.predecessor() {
                    Some(required) => from == required,
                    None => target == OrderStatus::Closed,
                };
                if allowed {
                    order.status = target;
                    store.put(&key, &order)?;
                    TransitionOutcome::Moved { from, to: target }
                } else {
                    TransitionOutcome::Skipped { current: from }
                }
            }
        };
        if !matches!(outcome, TransitionOutcome::Moved { .. }) {
            debug!(ticket_id, user_id = %user_id, ?outcome, "order not moved");
        }
        transitions.push(UserTransition {
            user_id: user_id.clone(),
            outcome,
        });
    }

    let ticket_status = ticket::recompute_status(store, ticket_id)?;
    Ok(TransitionReport {
        ticket_id,
        target,
        transitions,
        ticket_status,
    })
}

pub fn confirm<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    ticket_id: u64,
    user_ids: &[String],
) -> Result<TransitionReport> {
    bulk_transition(store, ticket_id, user_ids, OrderStatus::Confirmed)
}

pub fn done<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    ticket_id: u64,
    user_ids: &[String],
) -> Result<TransitionReport> {
    bulk_transition(store, ticket_id, user_ids, OrderStatus::Done)
}

pub fn close<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    ticket_id: u64,
    user_ids: &[String],
) -> Result<TransitionReport> {
    bulk_transition(store, ticket_id, user_ids, OrderStatus::Closed)
}

/// Moves orders to `Awarded`, then credits each participant whose order is
/// there and who has not yet been credited for this ticket: first the
/// participant's balance, then their LoB total. The two writes are separate;
/// a failure between them is returned and not undone.
pub fn award<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    ticket_id: u64,
    user_ids: &[String],
) -> Result<AwardReport> {
    let value = ticket::read(store, ticket_id)?.value;
    let transition = bulk_transition(store, ticket_id, user_ids, OrderStatus::Awarded)?;

    let mut awarded = Vec::new();
    let mut skipped = Vec::new();
    for user_id in user_ids {
        let at_awarded = read(store, ticket_id, user_id)?
            .is_some_and(|order| order.status == OrderStatus::Awarded);
        if !at_awarded {
            skipped.push(user_id.clone());
            continue;
        }

        // every lookup happens before the first write
        let member: Participant = participant::read(store, user_id)?;
        participant::read_lob(store, member.lob_id)?;
        let balance = credit::read(store, user_id)?;
        if balance.has_award_for(ticket_id) {
            skipped.push(user_id.clone());
            continue;
        }

        credit::adjust(store, user_id, value, AdjustmentSource::TicketAward(ticket_id))?;
        if let Err(e) = participant::add_lob_credit(store, member.lob_id, value) {
            warn!(
                ticket_id,
                user_id = %user_id,
                lob_id = member.lob_id,
                error = %e,
                "credit persisted but LoB total was not updated"
            );
            return Err(e);
        }
        awarded.push(user_id.clone());
    }

    info!(
        ticket_id,
        value,
        awarded = awarded.len(),
        skipped = skipped.len(),
        "award processed"
    );
    Ok(AwardReport {
        ticket_id,
        value,
        transition,
        awarded,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sled_ledger::SledLedger;
    use crate::ticket::TicketDraft;
    use crate::types::TimeStamp;

    fn temp_ledger() -> SledLedger {
        let db = sled::Config::new().temporary(true).open().unwrap();
        SledLedger::new(Arc::new(db)).unwrap()
    }

    fn seed<L: Ledger + ?Sized>(store: &EntityStore<'_, L>, users: &[&str]) -> u64 {
        participant::init_indexes(store, 8).unwrap();
        for (i, user) in users.iter().enumerate() {
            participant::add(
                store,
                &Participant::new(*user, *user, "pw", false, (i % 2) as u32),
                8,
            )
            .unwrap();
        }
        let draft = TicketDraft::new()
            .set_title("Quarterly report")
            .set_type("writing")
            .set_value(50)
            .set_owner("owner")
            .set_deadline(TimeStamp::new_with(2030, 6, 30, 0, 0, 0).unwrap());
        ticket::create(store, draft).unwrap().ticket_id
    }

    fn ids(users: &[&str]) -> Vec<String> {
        users.iter().map(|u| u.to_string()).collect()
    }

    #[test]
    fn apply_twice_is_rejected() {
        let ledger = temp_ledger();
        let tx = ledger.begin();
        let store = EntityStore::new(&tx);
        let ticket_id = seed(&store, &["u1"]);

        apply(&store, ticket_id, "u1").unwrap();
        assert!(matches!(
            apply(&store, ticket_id, "u1"),
            Err(EngineError::AlreadyApplied { .. })
        ));
        assert!(matches!(
            apply(&store, ticket_id, "stranger"),
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            apply(&store, 99, "u1"),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn absent_order_is_none_not_closed() {
        let ledger = temp_ledger();
        let tx = ledger.begin();
        let store = EntityStore::new(&tx);
        let ticket_id = seed(&store, &["u1", "u2"]);
        apply(&store, ticket_id, "u1").unwrap();
        close(&store, ticket_id, &ids(&["u1"])).unwrap();

        assert_eq!(read(&store, ticket_id, "u2").unwrap(), None);
        assert_eq!(
            read(&store, ticket_id, "u1").unwrap().map(|o| o.status),
            Some(OrderStatus::Closed)
        );
    }

    #[test]
    fn transitions_are_one_step_at_a_time() {
        let ledger = temp_ledger();
        let tx = ledger.begin();
        let store = EntityStore::new(&tx);
        let ticket_id = seed(&store, &["u1", "u2"]);
        apply(&store, ticket_id, "u1").unwrap();
        apply(&store, ticket_id, "u2").unwrap();

        // u1 cannot jump from Applied to Done
        let report = done(&store, ticket_id, &ids(&["u1"])).unwrap();
        assert_eq!(
            report.transitions[0].outcome,
            TransitionOutcome::Skipped {
                current: OrderStatus::Applied
            }
        );
        assert!(matches!(
            report.ensure_all_moved(),
            Err(EngineError::SequenceViolation { current: 1, target: 3, .. })
        ));

        let report = confirm(&store, ticket_id, &ids(&["u1", "u2", "ghost"])).unwrap();
        assert_eq!(report.moved().collect::<Vec<_>>(), vec!["u1", "u2"]);
        assert_eq!(report.transitions[2].outcome, TransitionOutcome::Missing);
        assert_eq!(report.ticket_status, Some(TicketStatus::Ongoing));

        // already confirmed: a second confirm moves nothing
        let report = confirm(&store, ticket_id, &ids(&["u1"])).unwrap();
        assert_eq!(report.moved().count(), 0);
    }

    #[test]
    fn close_is_forced_from_any_stage() {
        let ledger = temp_ledger();
        let tx = ledger.begin();
        let store = EntityStore::new(&tx);
        let ticket_id = seed(&store, &["u1"]);
        apply(&store, ticket_id, "u1").unwrap();
        confirm(&store, ticket_id, &ids(&["u1"])).unwrap();
        done(&store, ticket_id, &ids(&["u1"])).unwrap();

        let report = close(&store, ticket_id, &ids(&["u1"])).unwrap();

        assert_eq!(
            report.transitions[0].outcome,
            TransitionOutcome::Moved {
                from: OrderStatus::Done,
                to: OrderStatus::Closed
            }
        );
        assert_eq!(report.ticket_status, Some(TicketStatus::Created));
    }

    #[test]
    fn award_credits_once() {
        let ledger = temp_ledger();
        let tx = ledger.begin();
        let store = EntityStore::new(&tx);
        let ticket_id = seed(&store, &["u1", "u2"]);
        for user in ["u1", "u2"] {
            apply(&store, ticket_id, user).unwrap();
        }
        confirm(&store, ticket_id, &ids(&["u1", "u2"])).unwrap();
        done(&store, ticket_id, &ids(&["u1"])).unwrap();

        let report = award(&store, ticket_id, &ids(&["u1", "u2"])).unwrap();
        assert_eq!(report.awarded, vec!["u1"]);
        assert_eq!(report.skipped, vec!["u2"]);
        assert_eq!(credit::read(&store, "u1").unwrap().value, 50);
        assert_eq!(credit::read(&store, "u2").unwrap().value, 0);
        assert_eq!(participant::read_lob(&store, 0).unwrap().total_credit, 50);

        let again = award(&store, ticket_id, &ids(&["u1"])).unwrap();
        assert!(again.awarded.is_empty());
        assert_eq!(credit::read(&store, "u1").unwrap().value, 50);
        assert_eq!(participant::read_lob(&store, 0).unwrap().total_credit, 50);
    }

    #[test]
    fn award_keeps_credit_when_lob_total_overflows() {
        let ledger = temp_ledger();
        let tx = ledger.begin();
        let store = EntityStore::new(&tx);
        let ticket_id = seed(&store, &["u1"]);
        participant::add_lob_credit(&store, 0, i64::MAX).unwrap();
        apply(&store, ticket_id, "u1").unwrap();
        confirm(&store, ticket_id, &ids(&["u1"])).unwrap();
        done(&store, ticket_id, &ids(&["u1"])).unwrap();

        assert!(matches!(
            award(&store, ticket_id, &ids(&["u1"])),
            Err(EngineError::Overflow { .. })
        ));

        // the balance write stays in place; the LoB total does not move
        let balance = credit::read(&store, "u1").unwrap();
        assert_eq!(balance.value, 50);
        assert!(balance.has_award_for(ticket_id));
        assert_eq!(participant::read_lob(&store, 0).unwrap().total_credit, i64::MAX);

        // a later award sees the ticket as credited and skips the user
        let again = award(&store, ticket_id, &ids(&["u1"])).unwrap();
        assert_eq!(again.skipped, vec!["u1"]);
        assert_eq!(credit::read(&store, "u1").unwrap().value, 50);
    }

    #[test]
    fn award_retries_an_uncredited_awarded_order() {
        let ledger = temp_ledger();
        let tx = ledger.begin();
        let store = EntityStore::new(&tx);
        let ticket_id = seed(&store, &["u1"]);
        // order already at Awarded but the credit step never ran
        let order = Order {
            ticket_id,
            user_id: "u1".into(),
            status: OrderStatus::Awarded,
        };
        store
            .put(&store.order_key(ticket_id, "u1").unwrap(), &order)
            .unwrap();

        let report = award(&store, ticket_id, &ids(&["u1"])).unwrap();

        assert_eq!(report.awarded, vec!["u1"]);
        assert_eq!(
            report.transition.transitions[0].outcome,
            TransitionOutcome::Skipped {
                current: OrderStatus::Awarded
            }
        );
        assert_eq!(credit::read(&store, "u1").unwrap().value, 50);
    }
}
