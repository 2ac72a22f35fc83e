//! Per-participant credit balances.
//!
//! A balance remembers every source that changed it. A ticket may credit a
//! participant once; manual adjustments may repeat.
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::ledger::Ledger;
use crate::model::{Credit, Grant};
use crate::participant;
use crate::store::{EntityStore, keys};
use crate::types::{AdjustmentSource, TimeStamp};
use crate::utils::new_sortable_id;

pub fn create<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    user_id: &str,
    initial_value: i64,
) -> Result<Credit> {
    let key = keys::credit(user_id);
    if store.exists(&key)? {
        return Err(EngineError::already_exists("credit", user_id));
    }
    let credit = Credit::new(user_id, initial_value);
    store.put(&key, &credit)?;
    Ok(credit)
}

pub fn read<L: Ledger + ?Sized>(store: &EntityStore<'_, L>, user_id: &str) -> Result<Credit> {
    store
        .get(&keys::credit(user_id))?
        .ok_or_else(|| EngineError::not_found("credit", user_id))
}

/// Adds `delta` and records `source`, rejecting a ticket that has already
/// credited this participant.
pub fn adjust<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    user_id: &str,
    delta: i64,
    source: AdjustmentSource,
) -> Result<Credit> {
    let mut credit = read(store, user_id)?;
    if let AdjustmentSource::TicketAward(ticket_id) = source {
        if credit.has_award_for(ticket_id) {
            return Err(EngineError::DuplicateAward {
                user_id: user_id.to_string(),
                ticket_id,
            });
        }
    }
    credit.value = credit
        .value
        .checked_add(delta)
        .ok_or_else(|| EngineError::Overflow {
            id: keys::credit(user_id),
            current: credit.value,
            delta,
        })?;
    credit.ticket_ids.push(source);
    store.put(&keys::credit(user_id), &credit)?;

    debug!(user_id, delta, %source, balance = credit.value, "credit adjusted");
    Ok(credit)
}

/// Manual adjustment on behalf of an administrator. The balance is written
/// first, then a [`Grant`] record carrying `note`.
pub fn grant<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    admin_id: &str,
    admin_password: &str,
    user_id: &str,
    delta: i64,
    note: &str,
) -> Result<Credit> {
    let admin = participant::verify_credentials(store, admin_id, admin_password)?;
    if !admin.is_admin {
        return Err(EngineError::NotAuthorized(admin_id.to_string()));
    }
    let credit = adjust(store, user_id, delta, AdjustmentSource::ManualAdjustment)?;

    let record = Grant {
        grant_id: new_sortable_id(),
        admin_id: admin_id.to_string(),
        user_id: user_id.to_string(),
        delta,
        note: note.to_string(),
        tx_id: store.ledger().tx_id().to_string(),
        granted_at: TimeStamp::new(),
    };
    store.put(&store.grant_key(user_id, &record.grant_id)?, &record)?;

    info!(admin_id, user_id, delta, note, "manual credit granted");
    Ok(credit)
}

/// Grants made to `user_id`, oldest first.
pub fn grants<L: Ledger + ?Sized>(store: &EntityStore<'_, L>, user_id: &str) -> Result<Vec<Grant>> {
    store.grants_for_user(user_id)
}

/// Absence is not an error.
pub fn delete<L: Ledger + ?Sized>(store: &EntityStore<'_, L>, user_id: &str) -> Result<()> {
    store.delete(&keys::credit(user_id))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::Participant;
    use crate::sled_ledger::SledLedger;

    fn temp_ledger() -> SledLedger {
        let db = sled::Config::new().temporary(true).open().unwrap();
        SledLedger::new(Arc::new(db)).unwrap()
    }

    #[test]
    fn create_is_not_repeatable() {
        let ledger = temp_ledger();
        let tx = ledger.begin();
        let store = EntityStore::new(&tx);

        assert_eq!(create(&store, "alice", 10).unwrap().value, 10);
        assert!(matches!(
            create(&store, "alice", 0),
            Err(EngineError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn ticket_award_is_idempotent() {
        let ledger = temp_ledger();
        let tx = ledger.begin();
        let store = EntityStore::new(&tx);
        create(&store, "alice", 0).unwrap();

        adjust(&store, "alice", 50, AdjustmentSource::TicketAward(1)).unwrap();
        let err = adjust(&store, "alice", 50, AdjustmentSource::TicketAward(1)).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateAward { ticket_id: 1, .. }));

        let credit = read(&store, "alice").unwrap();
        assert_eq!(credit.value, 50);
        assert_eq!(credit.ticket_ids, vec![AdjustmentSource::TicketAward(1)]);
    }

    #[test]
    fn manual_adjustments_repeat() {
        let ledger = temp_ledger();
        let tx = ledger.begin();
        let store = EntityStore::new(&tx);
        create(&store, "alice", 0).unwrap();

        adjust(&store, "alice", 5, AdjustmentSource::ManualAdjustment).unwrap();
        adjust(&store, "alice", -2, AdjustmentSource::ManualAdjustment).unwrap();

        let credit = read(&store, "alice").unwrap();
        assert_eq!(credit.value, 3);
        assert_eq!(credit.ticket_ids.len(), 2);
    }

    #[test]
    fn overflowing_adjustment_is_rejected() {
        let ledger = temp_ledger();
        let tx = ledger.begin();
        let store = EntityStore::new(&tx);
        create(&store, "alice", i64::MAX).unwrap();

        assert!(matches!(
            adjust(&store, "alice", 1, AdjustmentSource::ManualAdjustment),
            Err(EngineError::Overflow { current: i64::MAX, delta: 1, .. })
        ));
        assert!(matches!(
            adjust(&store, "alice", 1, AdjustmentSource::TicketAward(3)),
            Err(EngineError::Overflow { .. })
        ));
        // nothing was written
        let credit = read(&store, "alice").unwrap();
        assert_eq!(credit.value, i64::MAX);
        assert!(credit.ticket_ids.is_empty());
    }

    #[test]
    fn adjust_missing_credit() {
        let ledger = temp_ledger();
        let tx = ledger.begin();
        let store = EntityStore::new(&tx);

        assert!(matches!(
            adjust(&store, "nobody", 1, AdjustmentSource::ManualAdjustment),
            Err(EngineError::NotFound { .. })
        ));
        // deleting an absent credit is fine
        delete(&store, "nobody").unwrap();
    }

    #[test]
    fn grant_requires_admin() {
        let ledger = temp_ledger();
        let tx = ledger.begin();
        let store = EntityStore::new(&tx);
        participant::add(&store, &Participant::new("root", "Root", "pw", true, 0), 8).unwrap();
        participant::add(&store, &Participant::new("eve", "Eve", "pw", false, 0), 8).unwrap();

        assert!(matches!(
            grant(&store, "root", "nope", "eve", 5, ""),
            Err(EngineError::InvalidCredentials(_))
        ));
        assert!(matches!(
            grant(&store, "eve", "pw", "eve", 5, ""),
            Err(EngineError::NotAuthorized(_))
        ));
        assert_eq!(grant(&store, "root", "pw", "eve", 5, "").unwrap().value, 5);
        // rejected grants leave no record
        assert_eq!(grants(&store, "eve").unwrap().len(), 1);
    }

    #[test]
    fn grants_keep_their_note() {
        let ledger = temp_ledger();
        let tx = ledger.begin();
        let store = EntityStore::new(&tx);
        participant::add(&store, &Participant::new("root", "Root", "pw", true, 0), 8).unwrap();
        participant::add(&store, &Participant::new("eve", "Eve", "pw", false, 1), 8).unwrap();
        participant::add(&store, &Participant::new("bob", "Bob", "pw", false, 1), 8).unwrap();

        grant(&store, "root", "pw", "eve", 10, "hackathon prize").unwrap();
        grant(&store, "root", "pw", "eve", -3, "").unwrap();
        grant(&store, "root", "pw", "bob", 7, "onboarding").unwrap();

        let records = grants(&store, "eve").unwrap();
        let notes: Vec<(i64, &str)> = records.iter().map(|g| (g.delta, g.note.as_str())).collect();
        assert_eq!(notes, vec![(10, "hackathon prize"), (-3, "")]);
        assert!(records.iter().all(|g| g.admin_id == "root" && g.tx_id == tx.tx_id()));
        assert_eq!(grants(&store, "bob").unwrap().len(), 1);
        assert!(grants(&store, "nobody").unwrap().is_empty());
        assert_eq!(read(&store, "eve").unwrap().value, 7);
    }

    #[test]
    fn overflowing_grant_leaves_no_record() {
        let ledger = temp_ledger();
        let tx = ledger.begin();
        let store = EntityStore::new(&tx);
        participant::add(&store, &Participant::new("root", "Root", "pw", true, 0), 8).unwrap();
        participant::add(&store, &Participant::new("eve", "Eve", "pw", false, 0), 8).unwrap();
        grant(&store, "root", "pw", "eve", i64::MAX, "").unwrap();

        assert!(matches!(
            grant(&store, "root", "pw", "eve", 1, "one more"),
            Err(EngineError::Overflow { .. })
        ));
        assert_eq!(grants(&store, "eve").unwrap().len(), 1);
    }
}
