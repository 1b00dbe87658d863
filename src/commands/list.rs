use anyhow::Result;

use ticketdesk::Database;

pub fn run(db: &Database, state: Option<&str>) -> Result<()> {
    let tickets = db.list_tickets(state)?;

    if tickets.is_empty() {
        println!("No tickets found.");
        return Ok(());
    }

    for ticket in tickets {
        let state_name = db
            .get_state(ticket.state_id)?
            .map(|s| s.name)
            .unwrap_or_else(|| "?".to_string());
        let state_display = format!("[{}]", state_name);
        let date = ticket.created_at.format("%Y-%m-%d");
        println!(
            "#{:<14} {:18} {:<40} {:6} {}",
            ticket.number,
            state_display,
            truncate(&ticket.title, 40),
            ticket.priority,
            date
        );
    }

    Ok(())
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars - 3).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;
    use ticketdesk::db::NewUser;
    use ticketdesk::models::SYSTEM_USER_ID;
    use ticketdesk::ticket::NewTicket;

    fn setup_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(&db_path).unwrap();
        (db, dir)
    }

    #[test]
    fn test_list_empty_and_filtered() {
        let (db, _dir) = setup_test_db();
        run(&db, Some("all")).unwrap();

        let customer = db
            .create_user(&NewUser {
                login: "jane",
                is_customer: true,
                ..Default::default()
            })
            .unwrap();
        db.create_ticket(&NewTicket::new("One", 1, customer), SYSTEM_USER_ID)
            .unwrap();
        run(&db, Some("new")).unwrap();
        run(&db, Some("closed")).unwrap();
        run(&db, None).unwrap();
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly10!", 10), "exactly10!");
        assert_eq!(truncate("a longer title here", 10), "a longe...");
    }

    proptest! {
        #[test]
        fn prop_truncate_bounded(s in ".{0,80}", max in 4usize..50) {
            prop_assert!(truncate(&s, max).chars().count() <= max);
        }
    }
}
