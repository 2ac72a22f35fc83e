//! Service layer API for the exchange workflow
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::credit;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::model::{Credit, Grant, Lob, Order, Participant, Ticket};
use crate::order::{self, AwardReport, TransitionReport};
use crate::participant::{self, ReconcileReport};
use crate::report::{self, HistoryRecord, LobSummary, RankEntry};
use crate::sled_ledger::{SledLedger, SledTx, StatsSnapshot};
use crate::store::EntityStore;
use crate::ticket::{self, TicketDraft};
use crate::types::{AdjustmentSource, OrderStatus, TicketStatus};

/// Every method runs as one ledger transaction: its writes share a
/// transaction id and nothing is rolled back if a later write fails.
pub struct Exchain {
    ledger: SledLedger,
    config: EngineConfig,
}

impl Exchain {
    pub fn new(instance: Arc<sled::Db>, config: EngineConfig) -> Result<Self> {
        Ok(Self {
            ledger: SledLedger::new(instance)?,
            config,
        })
    }

    /// Opens (or creates) the database at `config.db_path`.
    pub fn open(config: EngineConfig) -> anyhow::Result<Self> {
        let db = sled::open(&config.db_path)
            .with_context(|| format!("failed to open ledger at {}", config.db_path.display()))?;
        Ok(Self::new(Arc::new(db), config)?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.ledger.stats().snapshot()
    }

    fn run<T>(
        &self,
        operation: &'static str,
        mutates: bool,
        body: impl FnOnce(&EntityStore<'_, SledTx<'_>>) -> Result<T>,
    ) -> Result<T> {
        let tx = self.ledger.begin();
        debug!(operation, tx_id = tx.tx_id(), "operation started");

        let mut result = body(&EntityStore::new(&tx));
        if result.is_ok() && mutates && self.config.flush_on_write {
            result = self.ledger.flush().and(result);
        }

        match &result {
            Ok(_) => debug!(operation, tx_id = tx.tx_id(), "operation committed"),
            Err(e) if e.is_caller_error() => {
                info!(operation, tx_id = tx.tx_id(), error = %e, "operation rejected")
            }
            Err(e) => warn!(operation, tx_id = tx.tx_id(), error = %e, "operation failed"),
        }
        self.ledger.stats().record_outcome(result.is_ok());
        result
    }

    /// Creates missing LoB records, the participant index and the ticket counter
    pub fn init_ledger(&self) -> Result<()> {
        let lob_count = self.config.lob_count();
        self.run("InitLedger", true, |store| {
            participant::init_indexes(store, lob_count)?;
            ticket::init_counter(store)
        })
    }

    // participants and lines of business

    pub fn add_participant(&self, participant: &Participant) -> Result<()> {
        let lob_count = self.config.lob_count();
        self.run("CreateParticipant", true, |store| {
            participant::add(store, participant, lob_count)
        })
    }

    pub fn read_participant(&self, user_id: &str) -> Result<Participant> {
        self.run("ReadParticipant", false, |store| participant::read(store, user_id))
    }

    pub fn read_all_participants(&self) -> Result<Vec<Participant>> {
        self.run("ReadAllParticipants", false, |store| participant::read_all(store))
    }

    pub fn update_participant(&self, participant: &Participant) -> Result<()> {
        let lob_count = self.config.lob_count();
        self.run("UpdateParticipant", true, |store| {
            participant::update(store, participant, lob_count)
        })
    }

    pub fn delete_participant(&self, user_id: &str) -> Result<()> {
        self.run("DeleteParticipant", true, |store| participant::delete(store, user_id))
    }

    pub fn change_password(&self, user_id: &str, old: &str, new: &str) -> Result<()> {
        self.run("ChangePassword", true, |store| {
            participant::change_password(store, user_id, old, new)
        })
    }

    /// Checks a password without changing anything.
    pub fn login(&self, user_id: &str, password: &str) -> Result<Participant> {
        self.run("Login", false, |store| {
            participant::verify_credentials(store, user_id, password)
        })
    }

    pub fn read_lob(&self, lob_id: u32) -> Result<Lob> {
        self.run("ReadLoB", false, |store| participant::read_lob(store, lob_id))
    }

    pub fn read_all_lobs(&self) -> Result<Vec<Lob>> {
        let lob_count = self.config.lob_count();
        self.run("ReadAllLoBs", false, |store| {
            participant::read_all_lobs(store, lob_count)
        })
    }

    pub fn reconcile_indexes(&self) -> Result<ReconcileReport> {
        let lob_count = self.config.lob_count();
        self.run("ReconcileIndexes", true, |store| {
            participant::reconcile(store, lob_count)
        })
    }

    // credit

    pub fn create_credit(&self, user_id: &str, initial_value: i64) -> Result<Credit> {
        self.run("CreateCredit", true, |store| {
            credit::create(store, user_id, initial_value)
        })
    }

    pub fn read_credit(&self, user_id: &str) -> Result<Credit> {
        self.run("ReadCredit", false, |store| credit::read(store, user_id))
    }

    pub fn adjust_credit(
        &self,
        user_id: &str,
        delta: i64,
        source: AdjustmentSource,
    ) -> Result<Credit> {
        self.run("AdjustCredit", true, |store| {
            credit::adjust(store, user_id, delta, source)
        })
    }

    /// Manual adjustment authorised by an administrator's credentials
    pub fn grant_credit(
        &self,
        admin_id: &str,
        admin_password: &str,
        user_id: &str,
        delta: i64,
        note: &str,
    ) -> Result<Credit> {
        self.run("GrantCredit", true, |store| {
            credit::grant(store, admin_id, admin_password, user_id, delta, note)
        })
    }

    pub fn read_grants(&self, user_id: &str) -> Result<Vec<Grant>> {
        self.run("ReadGrants", false, |store| credit::grants(store, user_id))
    }

    pub fn delete_credit(&self, user_id: &str) -> Result<()> {
        self.run("DeleteCredit", true, |store| credit::delete(store, user_id))
    }

    // tickets

    pub fn create_ticket(&self, draft: TicketDraft) -> Result<Ticket> {
        self.run("CreateTicket", true, |store| ticket::create(store, draft))
    }

    pub fn read_ticket(&self, ticket_id: u64) -> Result<Ticket> {
        self.run("ReadTicket", false, |store| ticket::read(store, ticket_id))
    }

    pub fn read_all_tickets(&self) -> Result<Vec<Ticket>> {
        self.run("ReadAllTickets", false, |store| ticket::read_all(store))
    }

    pub fn update_ticket(&self, ticket: Ticket) -> Result<Ticket> {
        self.run("UpdateTicket", true, |store| ticket::update(store, ticket))
    }

    pub fn delete_ticket(&self, ticket_id: u64) -> Result<()> {
        self.run("DeleteTicket", true, |store| ticket::delete(store, ticket_id))
    }

    pub fn recompute_status(&self, ticket_id: u64) -> Result<Option<TicketStatus>> {
        self.run("RecomputeStatus", true, |store| {
            ticket::recompute_status(store, ticket_id)
        })
    }

    // orders

    pub fn apply(&self, ticket_id: u64, user_id: &str) -> Result<Order> {
        self.run("Apply", true, |store| order::apply(store, ticket_id, user_id))
    }

    pub fn bulk_transition(
        &self,
        ticket_id: u64,
        user_ids: &[String],
        target: OrderStatus,
    ) -> Result<TransitionReport> {
        self.run("BulkTransition", true, |store| {
            order::bulk_transition(store, ticket_id, user_ids, target)
        })
    }

    pub fn confirm(&self, ticket_id: u64, user_ids: &[String]) -> Result<TransitionReport> {
        self.run("Confirm", true, |store| order::confirm(store, ticket_id, user_ids))
    }

    pub fn done(&self, ticket_id: u64, user_ids: &[String]) -> Result<TransitionReport> {
        self.run("Done", true, |store| order::done(store, ticket_id, user_ids))
    }

    pub fn close(&self, ticket_id: u64, user_ids: &[String]) -> Result<TransitionReport> {
        self.run("Close", true, |store| order::close(store, ticket_id, user_ids))
    }

    /// Moves orders to `Awarded` and credits each participant at most once per ticket
    pub fn award(&self, ticket_id: u64, user_ids: &[String]) -> Result<AwardReport> {
        self.run("Award", true, |store| order::award(store, ticket_id, user_ids))
    }

    pub fn read_order(&self, ticket_id: u64, user_id: &str) -> Result<Option<Order>> {
        self.run("ReadOrder", false, |store| order::read(store, ticket_id, user_id))
    }

    pub fn read_orders_for_ticket(&self, ticket_id: u64) -> Result<Vec<Order>> {
        self.run("ReadOrdersForTicket", false, |store| {
            order::read_for_ticket(store, ticket_id)
        })
    }

    // reporting

    pub fn top_n(&self, n: usize) -> Result<Vec<RankEntry>> {
        self.run("TopN", false, |store| report::top_n(store, n))
    }

    pub fn lob_summaries(&self) -> Result<Vec<LobSummary>> {
        self.run("LoBSummaries", false, |store| {
            report::lob_summaries(store, &self.config)
        })
    }

    pub fn history_for_key(&self, key: &str) -> Result<Vec<HistoryRecord>> {
        self.run("GetHistoryForKey", false, |store| {
            report::history_for_key(store, key)
        })
    }
}
