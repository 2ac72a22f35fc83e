//! Read-only views: credit ranking, LoB summaries and key history
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::ledger::{KeyModification, Ledger};
use crate::model::{Credit, Participant};
use crate::participant;
use crate::store::{EntityStore, keys};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankEntry {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = "lobID")]
    pub lob_id: u32,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LobSummary {
    #[serde(rename = "lobID")]
    pub lob_id: u32,
    pub name: String,
    #[serde(rename = "totalCredit")]
    pub total_credit: i64,
    #[serde(rename = "memberCount")]
    pub member_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryRecord {
    pub tx_id: String,
    /// The stored JSON when it parses, otherwise the raw bytes as text.
    pub value: serde_json::Value,
    pub timestamp: String,
    pub is_delete: bool,
}

impl From<KeyModification> for HistoryRecord {
    fn from(modification: KeyModification) -> Self {
        let value = if modification.is_delete {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&modification.value).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&modification.value).into_owned())
            })
        };
        Self {
            tx_id: modification.tx_id,
            value,
            timestamp: modification.timestamp.to_rfc3339(),
            is_delete: modification.is_delete,
        }
    }
}

/// The `n` highest balances among indexed participants. Equal balances keep
/// their index order.
pub fn top_n<L: Ledger + ?Sized>(store: &EntityStore<'_, L>, n: usize) -> Result<Vec<RankEntry>> {
    let index = participant::read_index(store)?;
    let mut entries = Vec::with_capacity(index.user_ids.len());
    for user_id in &index.user_ids {
        let corrupt = || EngineError::IndexCorrupt {
            index: keys::PARTICIPANT_INDEX.to_string(),
            id: user_id.clone(),
        };
        let credit: Credit = store.get(&keys::credit(user_id))?.ok_or_else(corrupt)?;
        let member: Participant = store.get(&keys::participant(user_id))?.ok_or_else(corrupt)?;
        entries.push(RankEntry {
            user_id: member.user_id,
            user_name: member.user_name,
            lob_id: member.lob_id,
            value: credit.value,
        });
    }

    // sort_by is stable
    entries.sort_by(|a, b| b.value.cmp(&a.value));
    entries.truncate(n);
    Ok(entries)
}

pub fn lob_summaries<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    config: &EngineConfig,
) -> Result<Vec<LobSummary>> {
    participant::read_all_lobs(store, config.lob_count())?
        .into_iter()
        .map(|lob| -> Result<LobSummary> {
            Ok(LobSummary {
                lob_id: lob.lob_id,
                name: config.lob_name(lob.lob_id).unwrap_or_default().to_string(),
                total_credit: lob.total_credit,
                member_count: lob.user_ids.len(),
            })
        })
        .collect()
}

/// Every write to `key`, oldest first.
pub fn history_for_key<L: Ledger + ?Sized>(
    store: &EntityStore<'_, L>,
    key: &str,
) -> Result<Vec<HistoryRecord>> {
    store
        .ledger()
        .history_for_key(key)?
        .map(|item| item.map(HistoryRecord::from))
        .collect()
}
