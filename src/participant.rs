//! Participants, the global participant index and LoB member lists.
//!
//! The index and the LoB lists are plain records maintained by hand. Each
//! write below is atomic on its own key only, so a failure between two
//! writes leaves the records out of step; [`reconcile`] repairs that.
use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::credit;
use crate::error::{EngineError, Result};
use crate::ledger::Ledger;
use crate::model::{Credit, Lob, Participant, ParticipantIndex};
use crate::store::{EntityStore, keys, validate_user_id};

pub fn read_index<L: Ledger + ?Sized>(store: &EntityStore<'_, L>) -> Result<ParticipantIndex> {
    Ok(store.get(keys::PARTICIPANT_INDEX)?.unwrap_or_default())
}

/// Creates every missing LoB record and the empty participant index.
pub fn init_indexes<L: Ledger + ?Sized>(store: &EntityStore<'_, L>, lob_count: u32) -> Result<()> {
    for lob_id in 0..lob_count {
        let key = keys::lob(lob_id);
        if !store.exists(&key)? {
            store.put(&key, &Lob::new(lob_id))?;
        }
    }
    if !store.exists(keys::PARTICIPANT_INDEX)? {
        store.put(keys::PARTICIPANT_INDEX, &ParticipantIndex::default())?;
    }
    Ok(())
}

fn check_lob_id(lob_id: u32, lob_count: u32) -> Result<()> {
    if lob_id >= lob_count {
        return Err(EngineError::validation(format!(
            "lobID {lob_id} is outside [0, {lob_count})"
        )));
    }
    Ok(())
}

fn load_lob_for_write<L: Ledger + ?Sized>(store: &EntityStore<'_, L>, lob_id: u32) -> Result<Lob> {
    Ok(store.get(&keys::lob(lob_id))?.unwrap_or_else(|| Lob::new(lob_id)))
}

pub fn add<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    participant: &Participant,
    lob_count: u32,
) -> Result<()> {
    let user_id = participant.user_id.as_str();
    validate_user_id(user_id)?;
    check_lob_id(participant.lob_id, lob_count)?;
    if store.exists(&keys::participant(user_id))? {
        return Err(EngineError::already_exists("participant", user_id));
    }
    if store.exists(&keys::credit(user_id))? {
        return Err(EngineError::already_exists("credit", user_id));
    }

    store.put(&keys::participant(user_id), participant)?;
    credit::create(store, user_id, 0)?;

    let mut lob = load_lob_for_write(store, participant.lob_id)?;
    if !lob.user_ids.iter().any(|id| id == user_id) {
        lob.user_ids.push(user_id.to_string());
    }
    store.put(&keys::lob(participant.lob_id), &lob)?;

    let mut index = read_index(store)?;
    if !index.user_ids.iter().any(|id| id == user_id) {
        index.user_ids.push(user_id.to_string());
    }
    store.put(keys::PARTICIPANT_INDEX, &index)?;

    info!(user_id, lob_id = participant.lob_id, "participant added");
    Ok(())
}

pub fn read<L: Ledger + ?Sized>(store: &EntityStore<'_, L>, user_id: &str) -> Result<Participant> {
    store
        .get(&keys::participant(user_id))?
        .ok_or_else(|| EngineError::not_found("participant", user_id))
}

/// Every participant named by the global index, in index order.
pub fn read_all<L: Ledger + ?Sized>(store: &EntityStore<'_, L>) -> Result<Vec<Participant>> {
    read_index(store)?
        .user_ids
        .iter()
        .map(|user_id| -> Result<Participant> {
            store
                .get(&keys::participant(user_id))?
                .ok_or_else(|| EngineError::IndexCorrupt {
                    index: keys::PARTICIPANT_INDEX.to_string(),
                    id: user_id.clone(),
                })
        })
        .collect()
}

/// Full overwrite. A changed `lobID` moves the id between member lists.
pub fn update<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    participant: &Participant,
    lob_count: u32,
) -> Result<()> {
    let user_id = participant.user_id.as_str();
    check_lob_id(participant.lob_id, lob_count)?;
    let previous = read(store, user_id)?;

    store.put(&keys::participant(user_id), participant)?;

    if previous.lob_id != participant.lob_id {
        let mut old_lob = load_lob_for_write(store, previous.lob_id)?;
        old_lob.user_ids.retain(|id| id != user_id);
        store.put(&keys::lob(previous.lob_id), &old_lob)?;

        let mut new_lob = load_lob_for_write(store, participant.lob_id)?;
        if !new_lob.user_ids.iter().any(|id| id == user_id) {
            new_lob.user_ids.push(user_id.to_string());
        }
        store.put(&keys::lob(participant.lob_id), &new_lob)?;
        info!(
            user_id,
            from = previous.lob_id,
            to = participant.lob_id,
            "participant moved between lines of business"
        );
    }
    Ok(())
}

pub fn delete<L: Ledger + ?Sized>(store: &EntityStore<'_, L>, user_id: &str) -> Result<()> {
    let participant = read(store, user_id)?;
    store.delete(&keys::participant(user_id))?;

    let mut index = read_index(store)?;
    let Some(position) = index.user_ids.iter().position(|id| id == user_id) else {
        warn!(user_id, "deleted participant was not in the global index");
        return Err(EngineError::IndexEntryMissing {
            index: keys::PARTICIPANT_INDEX.to_string(),
            id: user_id.to_string(),
        });
    };
    index.user_ids.remove(position);
    store.put(keys::PARTICIPANT_INDEX, &index)?;

    let lob_key = keys::lob(participant.lob_id);
    let mut lob = load_lob_for_write(store, participant.lob_id)?;
    let Some(position) = lob.user_ids.iter().position(|id| id == user_id) else {
        warn!(user_id, lob_id = participant.lob_id, "deleted participant was not a LoB member");
        return Err(EngineError::IndexEntryMissing {
            index: lob_key,
            id: user_id.to_string(),
        });
    };
    lob.user_ids.remove(position);
    store.put(&lob_key, &lob)?;

    credit::delete(store, user_id)?;
    info!(user_id, "participant deleted");
    Ok(())
}

pub fn verify_credentials<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    user_id: &str,
    password: &str,
) -> Result<Participant> {
    let participant = read(store, user_id)?;
    if participant.password != password {
        return Err(EngineError::InvalidCredentials(user_id.to_string()));
    }
    Ok(participant)
}

pub fn change_password<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    user_id: &str,
    old_password: &str,
    new_password: &str,
) -> Result<()> {
    let mut participant = verify_credentials(store, user_id, old_password)?;
    participant.password = new_password.to_string();
    store.put(&keys::participant(user_id), &participant)
}

pub fn read_lob<L: Ledger + ?Sized>(store: &EntityStore<'_, L>, lob_id: u32) -> Result<Lob> {
    store.require("line of business", &keys::lob(lob_id))
}

pub fn read_all_lobs<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    lob_count: u32,
) -> Result<Vec<Lob>> {
    (0..lob_count).map(|lob_id| read_lob(store, lob_id)).collect()
}

pub fn add_lob_credit<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    lob_id: u32,
    delta: i64,
) -> Result<Lob> {
    let mut lob = load_lob_for_write(store, lob_id)?;
    lob.total_credit = lob
        .total_credit
        .checked_add(delta)
        .ok_or_else(|| EngineError::Overflow {
            id: keys::lob(lob_id),
            current: lob.total_credit,
            delta,
        })?;
    store.put(&keys::lob(lob_id), &lob)?;
    Ok(lob)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobMembership {
    #[serde(rename = "lobID")]
    pub lob_id: u32,
    #[serde(rename = "userID")]
    pub user_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub dropped_index_entries: Vec<String>,
    pub lob_members_removed: Vec<LobMembership>,
    pub lob_members_added: Vec<LobMembership>,
    pub credits_created: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.dropped_index_entries.is_empty()
            && self.lob_members_removed.is_empty()
            && self.lob_members_added.is_empty()
            && self.credits_created.is_empty()
    }
}

/// Brings the global index, LoB member lists and credit records back in
/// line with the participant records the index can reach. LoB totals are
/// left alone.
pub fn reconcile<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    lob_count: u32,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    let index = read_index(store)?;
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(index.user_ids.len());
    let mut participants = Vec::with_capacity(index.user_ids.len());
    for user_id in index.user_ids {
        if !seen.insert(user_id.clone()) {
            report.dropped_index_entries.push(user_id);
            continue;
        }
        match store.get::<Participant>(&keys::participant(&user_id))? {
            Some(participant) => {
                kept.push(user_id);
                participants.push(participant);
            }
            None => report.dropped_index_entries.push(user_id),
        }
    }
    if !report.dropped_index_entries.is_empty() {
        store.put(keys::PARTICIPANT_INDEX, &ParticipantIndex { user_ids: kept })?;
    }

    for lob_id in 0..lob_count {
        let key = keys::lob(lob_id);
        let stored = store.get::<Lob>(&key)?;
        let missing_record = stored.is_none();
        let mut lob = stored.unwrap_or_else(|| Lob::new(lob_id));

        let expected: Vec<&str> = participants
            .iter()
            .filter(|p| p.lob_id == lob_id)
            .map(|p| p.user_id.as_str())
            .collect();

        let mut members = Vec::with_capacity(expected.len());
        let mut present = HashSet::new();
        let mut changed = false;
        for user_id in lob.user_ids.drain(..) {
            if expected.contains(&user_id.as_str()) && present.insert(user_id.clone()) {
                members.push(user_id);
            } else {
                report.lob_members_removed.push(LobMembership { lob_id, user_id });
                changed = true;
            }
        }
        for user_id in expected {
            if !present.contains(user_id) {
                members.push(user_id.to_string());
                report.lob_members_added.push(LobMembership {
                    lob_id,
                    user_id: user_id.to_string(),
                });
                changed = true;
            }
        }
        if changed || missing_record {
            lob.user_ids = members;
            store.put(&key, &lob)?;
        }
    }

    for participant in &participants {
        if !store.exists(&keys::credit(&participant.user_id))? {
            store.put(
                &keys::credit(&participant.user_id),
                &Credit::new(participant.user_id.clone(), 0),
            )?;
            report.credits_created.push(participant.user_id.clone());
        }
    }

    if report.is_clean() {
        info!("indexes consistent");
    } else {
        warn!(
            dropped = report.dropped_index_entries.len(),
            removed = report.lob_members_removed.len(),
            added = report.lob_members_added.len(),
            credits = report.credits_created.len(),
            "indexes repaired"
        );
    }
    Ok(report)
}
