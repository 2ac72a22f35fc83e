//! [`Ledger`] over sled.
//!
//! Two trees: `state` holds current values, `history` holds one minicbor
//! encoded [`KeyModification`] per write. A history key is the length-prefixed
//! state key followed by a big-endian sequence number from
//! `Db::generate_id`, so a prefix scan returns a key's history oldest first.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use sled::Transactional;
use sled::transaction::{ConflictableTransactionResult, TransactionError};

use crate::error::{EngineError, Result};
use crate::ledger::{HistoryIter, KeyModification, Ledger, StateIter, composite_key};
use crate::types::TimeStamp;
use crate::utils;

const STATE_TREE: &str = "state";
const HISTORY_TREE: &str = "history";

#[derive(Debug, Default)]
pub struct LedgerStats {
    get_state: AtomicU64,
    put_state: AtomicU64,
    del_state: AtomicU64,
    get_history: AtomicU64,
    range_query: AtomicU64,
    success: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatsSnapshot {
    pub get_state: u64,
    pub put_state: u64,
    pub del_state: u64,
    pub get_history: u64,
    pub range_query: u64,
    pub success: u64,
    pub errors: u64,
}

impl LedgerStats {
    pub fn record_outcome(&self, ok: bool) {
        let counter = if ok { &self.success } else { &self.errors };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            get_state: self.get_state.load(Ordering::Relaxed),
            put_state: self.put_state.load(Ordering::Relaxed),
            del_state: self.del_state.load(Ordering::Relaxed),
            get_history: self.get_history.load(Ordering::Relaxed),
            range_query: self.range_query.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

pub struct SledLedger {
    instance: Arc<sled::Db>,
    state: sled::Tree,
    history: sled::Tree,
    stats: LedgerStats,
}

impl SledLedger {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self> {
        let state = instance.open_tree(STATE_TREE)?;
        let history = instance.open_tree(HISTORY_TREE)?;
        Ok(Self {
            instance,
            state,
            history,
            stats: LedgerStats::default(),
        })
    }

    /// Handle for one engine operation.
    pub fn begin(&self) -> SledTx<'_> {
        SledTx {
            ledger: self,
            tx_id: utils::new_tx_id(),
        }
    }

    pub fn stats(&self) -> &LedgerStats {
        &self.stats
    }

    pub fn flush(&self) -> Result<()> {
        self.instance.flush()?;
        Ok(())
    }
}

pub struct SledTx<'a> {
    ledger: &'a SledLedger,
    tx_id: String,
}

impl SledTx<'_> {
    // state and history change together or not at all
    fn record(&self, key: &str, value: Option<&[u8]>) -> Result<()> {
        let modification = KeyModification {
            tx_id: self.tx_id.clone(),
            value: value.map(<[u8]>::to_vec).unwrap_or_default(),
            timestamp: TimeStamp::new(),
            is_delete: value.is_none(),
        };
        let entry = minicbor::to_vec(&modification)
            .map_err(|e| EngineError::HistoryCodec(e.to_string()))?;
        let seq = self.ledger.instance.generate_id()?;
        let history_key = history_key(key, seq);

        (&self.ledger.state, &self.ledger.history)
            .transaction(|(state, history)| -> ConflictableTransactionResult<()> {
                match value {
                    Some(bytes) => {
                        state.insert(key.as_bytes(), bytes)?;
                    }
                    None => {
                        state.remove(key.as_bytes())?;
                    }
                }
                history.insert(history_key.as_slice(), entry.as_slice())?;
                Ok(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(()) => EngineError::TransactionAborted(key.to_string()),
                TransactionError::Storage(e) => EngineError::Ledger(e),
            })
    }
}

impl Ledger for SledTx<'_> {
    fn tx_id(&self) -> &str {
        &self.tx_id
    }

    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ledger.stats.get_state.fetch_add(1, Ordering::Relaxed);
        Ok(self.ledger.state.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn put_state(&self, key: &str, value: &[u8]) -> Result<()> {
        self.ledger.stats.put_state.fetch_add(1, Ordering::Relaxed);
        self.record(key, Some(value))
    }

    fn del_state(&self, key: &str) -> Result<()> {
        self.ledger.stats.del_state.fetch_add(1, Ordering::Relaxed);
        if self.ledger.state.contains_key(key.as_bytes())? {
            self.record(key, None)?;
        }
        Ok(())
    }

    fn state_by_partial_composite_key(
        &self,
        object_type: &str,
        attributes: &[&str],
    ) -> Result<StateIter<'_>> {
        self.ledger.stats.range_query.fetch_add(1, Ordering::Relaxed);
        let prefix = composite_key(object_type, attributes)?;
        let iter = self
            .ledger
            .state
            .scan_prefix(prefix.as_bytes())
            .map(|item| -> Result<(String, Vec<u8>)> {
                let (key, value) = item?;
                let key = String::from_utf8(key.to_vec()).map_err(|e| {
                    EngineError::validation(format!("ledger key is not utf-8: {e}"))
                })?;
                Ok((key, value.to_vec()))
            });
        Ok(Box::new(iter))
    }

    fn history_for_key(&self, key: &str) -> Result<HistoryIter<'_>> {
        self.ledger.stats.get_history.fetch_add(1, Ordering::Relaxed);
        let iter = self
            .ledger
            .history
            .scan_prefix(history_prefix(key))
            .map(|item| -> Result<KeyModification> {
                let (_, entry) = item?;
                minicbor::decode::<KeyModification>(&entry)
                    .map_err(|e| EngineError::HistoryCodec(e.to_string()))
            });
        Ok(Box::new(iter))
    }
}

fn history_prefix(key: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(4 + key.len() + 8);
    prefix.extend_from_slice(&(key.len() as u32).to_be_bytes());
    prefix.extend_from_slice(key.as_bytes());
    prefix
}

fn history_key(key: &str, seq: u64) -> Vec<u8> {
    let mut history_key = history_prefix(key);
    history_key.extend_from_slice(&seq.to_be_bytes());
    history_key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_ledger() -> SledLedger {
        let db = sled::Config::new().temporary(true).open().unwrap();
        SledLedger::new(Arc::new(db)).unwrap()
    }

    #[test]
    fn put_get_delete() {
        let ledger = temp_ledger();
        let tx = ledger.begin();

        assert_eq!(tx.get_state("alice").unwrap(), None);
        tx.put_state("alice", b"1").unwrap();
        assert_eq!(tx.get_state("alice").unwrap(), Some(b"1".to_vec()));
        tx.del_state("alice").unwrap();
        assert_eq!(tx.get_state("alice").unwrap(), None);
        // absent key
        tx.del_state("alice").unwrap();
    }

    #[test]
    fn history_is_ordered_and_flags_deletes() {
        let ledger = temp_ledger();
        let first = ledger.begin();
        first.put_state("k", b"a").unwrap();
        let second = ledger.begin();
        second.put_state("k", b"b").unwrap();
        second.del_state("k").unwrap();
        // a key sharing the prefix must not leak in
        second.put_state("kk", b"z").unwrap();

        let history: Vec<KeyModification> = second
            .history_for_key("k")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(history.len(), 3);
        assert_eq!(history[0].value, b"a");
        assert_eq!(history[0].tx_id, first.tx_id());
        assert_eq!(history[1].value, b"b");
        assert!(history[2].is_delete);
        assert_eq!(history[2].tx_id, second.tx_id());
    }

    #[test]
    fn partial_composite_key_scan() {
        let ledger = temp_ledger();
        let tx = ledger.begin();
        for (ticket, user) in [("1", "a"), ("1", "b"), ("12", "a"), ("2", "c")] {
            let key = tx.create_composite_key("Order", &[ticket, user]).unwrap();
            tx.put_state(&key, user.as_bytes()).unwrap();
        }

        let found: Vec<(String, Vec<u8>)> = tx
            .state_by_partial_composite_key("Order", &["1"])
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].1, b"a");
        assert_eq!(found[1].1, b"b");
    }

    #[test]
    fn stats_count_calls() {
        let ledger = temp_ledger();
        let tx = ledger.begin();
        tx.put_state("x", b"1").unwrap();
        tx.get_state("x").unwrap();
        tx.get_state("y").unwrap();
        ledger.stats().record_outcome(true);
        ledger.stats().record_outcome(false);

        let snapshot = ledger.stats().snapshot();
        assert_eq!(snapshot.put_state, 1);
        assert_eq!(snapshot.get_state, 2);
        assert_eq!(snapshot.success, 1);
        assert_eq!(snapshot.errors, 1);
    }
}
