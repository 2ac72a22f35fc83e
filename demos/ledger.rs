//! Walks one ticket from creation to award on a throwaway ledger.
//!
//! `cargo run --example ledger` uses a temporary directory. Pass a TOML
//! config path to run against a real database instead; set `log_level` there
//! (or `RUST_LOG`-style directives) to see the engine's own events.

use anyhow::Context;
use exchain::Exchain;
use exchain::config::{EngineConfig, init_logging};
use exchain::model::Participant;
use exchain::ticket::TicketDraft;
use exchain::types::TimeStamp;

fn main() -> anyhow::Result<()> {
    // keep the temp dir alive until the end of main
    let scratch = tempfile::tempdir()?;
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default().with_db_path(scratch.path().join("ledger")),
    };
    init_logging(&config);

    let service = Exchain::open(config)?;
    service.init_ledger()?;

    service.add_participant(&Participant::new("root", "Root", "secret", true, 0))?;
    service.add_participant(&Participant::new("ada", "Ada", "pw", false, 1))?;
    service.add_participant(&Participant::new("grace", "Grace", "pw", false, 1))?;
    service.add_participant(&Participant::new("linus", "Linus", "pw", false, 4))?;

    let deadline = TimeStamp::new_with(2030, 6, 30, 17, 0, 0).context("valid deadline")?;
    let ticket = service.create_ticket(
        TicketDraft::new()
            .set_title("Migrate settlement batch")
            .set_type("engineering")
            .set_value(120)
            .set_owner("root")
            .set_deadline(deadline)
            .set_comment("cut over before quarter end"),
    )?;
    println!("created ticket {} worth {}", ticket.ticket_id, ticket.value);

    let team: Vec<String> = ["ada", "grace", "linus"].map(String::from).to_vec();
    for user in &team {
        service.apply(ticket.ticket_id, user)?;
    }

    // linus drops out; the others move one stage per call
    service.close(ticket.ticket_id, &team[2..])?;
    let confirmed = service.confirm(ticket.ticket_id, &team)?;
    println!("confirmed: {:?}", confirmed.moved().collect::<Vec<_>>());
    service.done(ticket.ticket_id, &team[..2])?;

    let award = service.award(ticket.ticket_id, &team)?;
    println!("awarded {:?}, skipped {:?}", award.awarded, award.skipped);

    // a second award call credits nobody twice
    let again = service.award(ticket.ticket_id, &team)?;
    println!("second award credited {} participant(s)", again.awarded.len());

    service.grant_credit("root", "secret", "linus", 15, "on-call cover")?;

    for entry in service.top_n(3)? {
        println!("{:>8} {:>5}", entry.user_name, entry.value);
    }
    for summary in service.lob_summaries()? {
        if summary.member_count > 0 {
            println!(
                "{:<12} members={} total={}",
                summary.name, summary.member_count, summary.total_credit
            );
        }
    }
    println!("{}", serde_json::to_string_pretty(&service.stats())?);
    Ok(())
}
