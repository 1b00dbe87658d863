use anyhow::{bail, Result};

use ticketdesk::models::AccessLevel;
use ticketdesk::Database;

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

/// Returns `(read, full)` and prints both.
pub fn run(db: &Database, id: i64, login: &str) -> Result<(bool, bool)> {
    let Some(user) = db.find_user_by_login(login)? else {
        bail!("User '{}' not found", login);
    };
    let read = db.ticket_access(id, user.id, AccessLevel::Read)?;
    let full = db.ticket_access(id, user.id, AccessLevel::Full)?;
    println!("{} on ticket {}: read={} full={}", login, id, yes_no(read), yes_no(full));
    Ok((read, full))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use ticketdesk::db::NewUser;
    use ticketdesk::models::SYSTEM_USER_ID;
    use ticketdesk::ticket::NewTicket;

    #[test]
    fn test_access_report() {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        let customer = db
            .create_user(&NewUser {
                login: "jane",
                is_customer: true,
                ..Default::default()
            })
            .unwrap();
        db.create_user(&NewUser {
            login: "agent",
            is_agent: true,
            ..Default::default()
        })
        .unwrap();
        let ticket = db
            .create_ticket(&NewTicket::new("Access", 1, customer), SYSTEM_USER_ID)
            .unwrap();

        assert_eq!(run(&db, ticket, "jane").unwrap(), (true, true));
        assert_eq!(run(&db, ticket, "agent").unwrap(), (false, false));
        assert!(run(&db, ticket, "nobody").is_err());
        assert!(run(&db, 99999, "jane").is_err());
    }
}
