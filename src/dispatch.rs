//! Named operations over flat string arguments.
//!
//! Arguments are decoded into an [`Operation`] before anything touches the
//! ledger, so malformed input never produces a partial write. Results are
//! returned as JSON bytes.
use anyhow::Context;
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::model::{Participant, Ticket};
use crate::service::Exchain;
use crate::ticket::TicketDraft;
use crate::types::{AdjustmentSource, OrderStatus, TimeStamp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    InitLedger,
    CreateParticipant(Participant),
    ReadParticipant { user_id: String },
    ReadAllParticipants,
    UpdateParticipant(Participant),
    DeleteParticipant { user_id: String },
    ChangePassword { user_id: String, old: String, new: String },
    Login { user_id: String, password: String },
    CreateCredit { user_id: String, initial_value: i64 },
    ReadCredit { user_id: String },
    AdjustCredit { user_id: String, delta: i64, source: AdjustmentSource },
    GrantCredit {
        admin_id: String,
        admin_password: String,
        user_id: String,
        delta: i64,
        note: String,
    },
    ReadGrants { user_id: String },
    DeleteCredit { user_id: String },
    CreateTicket(TicketDraft),
    ReadTicket { ticket_id: u64 },
    ReadAllTickets,
    UpdateTicket(Ticket),
    DeleteTicket { ticket_id: u64 },
    RecomputeStatus { ticket_id: u64 },
    Apply { ticket_id: u64, user_id: String },
    Transition { ticket_id: u64, user_ids: Vec<String>, target: OrderStatus },
    Award { ticket_id: u64, user_ids: Vec<String> },
    ReadOrder { ticket_id: u64, user_id: String },
    ReadOrdersForTicket { ticket_id: u64 },
    TopN { n: usize },
    ReadLob { lob_id: u32 },
    ReadAllLobs,
    LobSummaries,
    GetHistoryForKey { key: String },
    GetStats,
    ReconcileIndexes,
}

struct Args<'a> {
    function: &'a str,
    args: &'a [&'a str],
}

impl Args<'_> {
    fn exactly(&self, count: usize) -> Result<()> {
        if self.args.len() != count {
            return Err(EngineError::validation(format!(
                "{} expects {count} argument(s), got {}",
                self.function,
                self.args.len()
            )));
        }
        Ok(())
    }

    fn at_least(&self, count: usize) -> Result<()> {
        if self.args.len() < count {
            return Err(EngineError::validation(format!(
                "{} expects at least {count} argument(s), got {}",
                self.function,
                self.args.len()
            )));
        }
        Ok(())
    }

    fn text(&self, i: usize) -> String {
        self.args[i].to_string()
    }

    fn number<T: std::str::FromStr>(&self, i: usize, name: &str) -> Result<T> {
        self.args[i].trim().parse::<T>().map_err(|_| {
            EngineError::validation(format!("{name} must be a number, got {:?}", self.args[i]))
        })
    }

    fn flag(&self, i: usize, name: &str) -> Result<bool> {
        match self.args[i].trim() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(EngineError::validation(format!(
                "{name} must be true or false, got {other:?}"
            ))),
        }
    }

    fn ticket_only(&self) -> Result<u64> {
        self.exactly(1)?;
        self.number(0, "ticketID")
    }

    fn rest(&self, from: usize) -> Vec<String> {
        self.args[from..].iter().map(|s| s.to_string()).collect()
    }

    // userID userName password isAdmin lobID
    fn participant(&self) -> Result<Participant> {
        self.exactly(5)?;
        Ok(Participant::new(
            self.text(0),
            self.text(1),
            self.text(2),
            self.flag(3, "isAdmin")?,
            self.number(4, "lobID")?,
        ))
    }
}

impl Operation {
    pub fn parse(function: &str, args: &[&str]) -> Result<Self> {
        let a = Args { function, args };
        let op = match function {
            "InitLedger" => {
                a.exactly(0)?;
                Operation::InitLedger
            }
            "CreateParticipant" => Operation::CreateParticipant(a.participant()?),
            "ReadParticipant" => {
                a.exactly(1)?;
                Operation::ReadParticipant { user_id: a.text(0) }
            }
            "ReadAllParticipants" => {
                a.exactly(0)?;
                Operation::ReadAllParticipants
            }
            "UpdateParticipant" => Operation::UpdateParticipant(a.participant()?),
            "DeleteParticipant" => {
                a.exactly(1)?;
                Operation::DeleteParticipant { user_id: a.text(0) }
            }
            "ChangePassword" => {
                a.exactly(3)?;
                Operation::ChangePassword {
                    user_id: a.text(0),
                    old: a.text(1),
                    new: a.text(2),
                }
            }
            "Login" => {
                a.exactly(2)?;
                Operation::Login {
                    user_id: a.text(0),
                    password: a.text(1),
                }
            }
            "CreateCredit" => {
                a.exactly(2)?;
                Operation::CreateCredit {
                    user_id: a.text(0),
                    initial_value: a.number(1, "initialValue")?,
                }
            }
            "ReadCredit" => {
                a.exactly(1)?;
                Operation::ReadCredit { user_id: a.text(0) }
            }
            "AdjustCredit" => {
                a.exactly(3)?;
                Operation::AdjustCredit {
                    user_id: a.text(0),
                    delta: a.number(1, "delta")?,
                    source: args[2].parse::<AdjustmentSource>().map_err(|_| {
                        EngineError::validation(format!(
                            "source must be a ticket id or ManualAdd, got {:?}",
                            args[2]
                        ))
                    })?,
                }
            }
            // adminID adminPassword userID delta [note]
            "GrantCredit" => {
                a.at_least(4)?;
                if args.len() > 5 {
                    a.exactly(5)?;
                }
                Operation::GrantCredit {
                    admin_id: a.text(0),
                    admin_password: a.text(1),
                    user_id: a.text(2),
                    delta: a.number(3, "delta")?,
                    note: args.get(4).map(|s| s.to_string()).unwrap_or_default(),
                }
            }
            "ReadGrants" => {
                a.exactly(1)?;
                Operation::ReadGrants { user_id: a.text(0) }
            }
            "DeleteCredit" => {
                a.exactly(1)?;
                Operation::DeleteCredit { user_id: a.text(0) }
            }
            // title type value ownerUserID deadline [comment [policy]]
            "CreateTicket" => {
                a.at_least(5)?;
                if args.len() > 7 {
                    a.exactly(7)?;
                }
                let deadline = TimeStamp::parse_rfc3339(args[4]).ok_or_else(|| {
                    EngineError::validation(format!(
                        "deadline must be an RFC 3339 timestamp, got {:?}",
                        args[4]
                    ))
                })?;
                let mut draft = TicketDraft::new()
                    .set_title(a.text(0))
                    .set_type(a.text(1))
                    .set_value(a.number(2, "value")?)
                    .set_owner(a.text(3))
                    .set_deadline(deadline);
                if let Some(comment) = args.get(5) {
                    draft = draft.set_comment(*comment);
                }
                if let Some(policy) = args.get(6) {
                    draft = draft.set_policy(*policy);
                }
                Operation::CreateTicket(draft)
            }
            "ReadTicket" => Operation::ReadTicket { ticket_id: a.ticket_only()? },
            "ReadAllTickets" => {
                a.exactly(0)?;
                Operation::ReadAllTickets
            }
            "UpdateTicket" => {
                a.exactly(1)?;
                let ticket = serde_json::from_str(args[0]).map_err(|e| {
                    EngineError::validation(format!("ticket payload is not valid: {e}"))
                })?;
                Operation::UpdateTicket(ticket)
            }
            "DeleteTicket" => Operation::DeleteTicket { ticket_id: a.ticket_only()? },
            "RecomputeStatus" => Operation::RecomputeStatus { ticket_id: a.ticket_only()? },
            "Apply" => {
                a.exactly(2)?;
                Operation::Apply {
                    ticket_id: a.number(0, "ticketID")?,
                    user_id: a.text(1),
                }
            }
            "Confirm" | "Done" | "Close" => {
                a.at_least(1)?;
                let target = match function {
                    "Confirm" => OrderStatus::Confirmed,
                    "Done" => OrderStatus::Done,
                    _ => OrderStatus::Closed,
                };
                Operation::Transition {
                    ticket_id: a.number(0, "ticketID")?,
                    user_ids: a.rest(1),
                    target,
                }
            }
            "Award" => {
                a.at_least(1)?;
                Operation::Award {
                    ticket_id: a.number(0, "ticketID")?,
                    user_ids: a.rest(1),
                }
            }
            "ReadOrder" => {
                a.exactly(2)?;
                Operation::ReadOrder {
                    ticket_id: a.number(0, "ticketID")?,
                    user_id: a.text(1),
                }
            }
            "ReadOrdersForTicket" => Operation::ReadOrdersForTicket { ticket_id: a.ticket_only()? },
            "TopN" => {
                a.exactly(1)?;
                Operation::TopN { n: a.number(0, "n")? }
            }
            "ReadLoB" => {
                a.exactly(1)?;
                Operation::ReadLob { lob_id: a.number(0, "lobID")? }
            }
            "ReadAllLoBs" => {
                a.exactly(0)?;
                Operation::ReadAllLobs
            }
            "LoBSummaries" => {
                a.exactly(0)?;
                Operation::LobSummaries
            }
            "GetHistoryForKey" => {
                a.exactly(1)?;
                Operation::GetHistoryForKey { key: a.text(0) }
            }
            "GetStats" => {
                a.exactly(0)?;
                Operation::GetStats
            }
            "ReconcileIndexes" => {
                a.exactly(0)?;
                Operation::ReconcileIndexes
            }
            unknown => {
                return Err(EngineError::validation(format!("unknown function {unknown}")));
            }
        };
        Ok(op)
    }
}

fn to_json<T: Serialize>(value: &T) -> anyhow::Result<Vec<u8>> {
    serde_json::to_vec(value).context("failed to encode result")
}

#[derive(Serialize)]
struct Ack {
    ok: bool,
}

const ACK: Ack = Ack { ok: true };

impl Exchain {
    /// Runs `function` with positional `args` and returns its result as JSON.
    pub fn invoke(&self, function: &str, args: &[&str]) -> anyhow::Result<Vec<u8>> {
        let operation = Operation::parse(function, args)
            .with_context(|| format!("invalid call to {function}"))?;
        self.execute(operation)
            .with_context(|| format!("{function} failed"))
    }

    pub fn execute(&self, operation: Operation) -> anyhow::Result<Vec<u8>> {
        match operation {
            Operation::InitLedger => {
                self.init_ledger()?;
                to_json(&ACK)
            }
            Operation::CreateParticipant(participant) => {
                self.add_participant(&participant)?;
                to_json(&participant)
            }
            Operation::ReadParticipant { user_id } => to_json(&self.read_participant(&user_id)?),
            Operation::ReadAllParticipants => to_json(&self.read_all_participants()?),
            Operation::UpdateParticipant(participant) => {
                self.update_participant(&participant)?;
                to_json(&participant)
            }
            Operation::DeleteParticipant { user_id } => {
                self.delete_participant(&user_id)?;
                to_json(&ACK)
            }
            Operation::ChangePassword { user_id, old, new } => {
                self.change_password(&user_id, &old, &new)?;
                to_json(&ACK)
            }
            Operation::Login { user_id, password } => {
                self.login(&user_id, &password)?;
                to_json(&ACK)
            }
            Operation::CreateCredit { user_id, initial_value } => {
                to_json(&self.create_credit(&user_id, initial_value)?)
            }
            Operation::ReadCredit { user_id } => to_json(&self.read_credit(&user_id)?),
            Operation::AdjustCredit { user_id, delta, source } => {
                to_json(&self.adjust_credit(&user_id, delta, source)?)
            }
            Operation::GrantCredit {
                admin_id,
                admin_password,
                user_id,
                delta,
                note,
            } => to_json(&self.grant_credit(&admin_id, &admin_password, &user_id, delta, &note)?),
            Operation::ReadGrants { user_id } => to_json(&self.read_grants(&user_id)?),
            Operation::DeleteCredit { user_id } => {
                self.delete_credit(&user_id)?;
                to_json(&ACK)
            }
            Operation::CreateTicket(draft) => to_json(&self.create_ticket(draft)?),
            Operation::ReadTicket { ticket_id } => to_json(&self.read_ticket(ticket_id)?),
            Operation::ReadAllTickets => to_json(&self.read_all_tickets()?),
            Operation::UpdateTicket(ticket) => to_json(&self.update_ticket(ticket)?),
            Operation::DeleteTicket { ticket_id } => {
                self.delete_ticket(ticket_id)?;
                to_json(&ACK)
            }
            Operation::RecomputeStatus { ticket_id } => {
                to_json(&self.recompute_status(ticket_id)?)
            }
            Operation::Apply { ticket_id, user_id } => to_json(&self.apply(ticket_id, &user_id)?),
            Operation::Transition {
                ticket_id,
                user_ids,
                target,
            } => to_json(&self.bulk_transition(ticket_id, &user_ids, target)?),
            Operation::Award { ticket_id, user_ids } => to_json(&self.award(ticket_id, &user_ids)?),
            Operation::ReadOrder { ticket_id, user_id } => {
                to_json(&self.read_order(ticket_id, &user_id)?)
            }
            Operation::ReadOrdersForTicket { ticket_id } => {
                to_json(&self.read_orders_for_ticket(ticket_id)?)
            }
            Operation::TopN { n } => to_json(&self.top_n(n)?),
            Operation::ReadLob { lob_id } => to_json(&self.read_lob(lob_id)?),
            Operation::ReadAllLobs => to_json(&self.read_all_lobs()?),
            Operation::LobSummaries => to_json(&self.lob_summaries()?),
            Operation::GetHistoryForKey { key } => to_json(&self.history_for_key(&key)?),
            Operation::GetStats => to_json(&self.stats()),
            Operation::ReconcileIndexes => to_json(&self.reconcile_indexes()?),
        }
    }
}
