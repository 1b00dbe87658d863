use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use ticketdesk::models::AccessLevel;
use ticketdesk::selector::parse_selector;
use ticketdesk::Database;

use super::list::truncate;

pub fn run(
    db: &Database,
    selector_path: &Path,
    limit: usize,
    offset: usize,
    permission: Option<(i64, AccessLevel)>,
) -> Result<usize> {
    let content = fs::read_to_string(selector_path)
        .with_context(|| format!("Failed to read {}", selector_path.display()))?;
    let selector = parse_selector(&content)?;

    let (count, tickets) = db.select_tickets(&selector, limit, offset, permission)?;
    println!("{} matching ticket(s)", count);
    for ticket in &tickets {
        println!(
            "  #{:<14} {:<40} {}",
            ticket.number,
            truncate(&ticket.title, 40),
            ticket.priority
        );
    }
    if offset + tickets.len() < count {
        println!("  ... use --offset {} for more", offset + tickets.len());
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use ticketdesk::db::NewUser;
    use ticketdesk::models::SYSTEM_USER_ID;
    use ticketdesk::ticket::NewTicket;

    #[test]
    fn test_search_file() {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        let customer = db
            .create_user(&NewUser {
                login: "jane",
                is_customer: true,
                ..Default::default()
            })
            .unwrap();
        let agent = db
            .create_user(&NewUser {
                login: "alice",
                is_agent: true,
                ..Default::default()
            })
            .unwrap();
        db.create_ticket(&NewTicket::new("VPN down", 1, customer), SYSTEM_USER_ID)
            .unwrap();
        db.create_ticket(&NewTicket::new("Printer jam", 1, customer), SYSTEM_USER_ID)
            .unwrap();

        let path = dir.path().join("selector.json");
        fs::write(&path, r#"{"ticket.title": {"operator": "contains", "value": "VPN"}}"#).unwrap();
        assert_eq!(run(&db, &path, 10, 0, None).unwrap(), 1);
        assert_eq!(run(&db, &path, 10, 0, Some((customer, AccessLevel::Full))).unwrap(), 1);
        assert_eq!(run(&db, &path, 10, 0, Some((agent, AccessLevel::Read))).unwrap(), 0);
        db.grant_group_access(agent, 1, AccessLevel::Read).unwrap();
        assert_eq!(run(&db, &path, 10, 0, Some((agent, AccessLevel::Read))).unwrap(), 1);

        fs::write(&path, r#"{"ticket.title": {"operator": "like", "value": "VPN"}}"#).unwrap();
        assert!(run(&db, &path, 10, 0, None).is_err());
    }
}
