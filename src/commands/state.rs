use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};

use ticketdesk::models::StateType;
use ticketdesk::Database;

pub fn run(db: &Database, id: i64, state_name: &str, until: Option<&str>, actor_id: i64) -> Result<()> {
    let Some(mut ticket) = db.get_ticket(id)? else {
        bail!("Ticket #{} not found", id);
    };
    let state = db.find_state_by_name(state_name)?;
    match state.state_type {
        StateType::Merged => bail!("Use 'ticketdesk merge' to merge tickets"),
        StateType::Pending if until.is_none() => {
            bail!("State '{}' needs --until", state.name)
        }
        _ => {}
    }

    let pending_time = match until {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .with_context(|| format!("Invalid --until '{}', expected RFC 3339", raw))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    ticket.state_id = state.id;
    ticket.pending_time = pending_time;
    db.save_ticket(&mut ticket, actor_id)?;

    match ticket.pending_time {
        Some(t) => println!(
            "Ticket {} is now {} until {}",
            id,
            state.name,
            t.format("%Y-%m-%d %H:%M")
        ),
        None => println!("Ticket {} is now {}", id, state.name),
    }
    Ok(())
}
