use anyhow::{bail, Result};

use ticketdesk::Database;

pub fn add(db: &Database, id: i64, tags: &[String]) -> Result<()> {
    if db.get_ticket(id)?.is_none() {
        bail!("Ticket #{} not found", id);
    }
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        if db.add_tag(id, tag)? {
            println!("Tagged ticket {} with '{}'", id, tag);
        } else {
            println!("Ticket {} already has tag '{}'", id, tag);
        }
    }
    Ok(())
}

pub fn remove(db: &Database, id: i64, tags: &[String]) -> Result<()> {
    if db.get_ticket(id)?.is_none() {
        bail!("Ticket #{} not found", id);
    }
    for tag in tags {
        if db.remove_tag(id, tag.trim())? {
            println!("Removed tag '{}' from ticket {}", tag.trim(), id);
        } else {
            println!("Tag '{}' not found on ticket {}", tag.trim(), id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;
    use ticketdesk::db::NewUser;
    use ticketdesk::models::SYSTEM_USER_ID;
    use ticketdesk::ticket::NewTicket;

    fn setup_test_db() -> (Database, tempfile::TempDir, i64) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(&db_path).unwrap();
        let customer = db
            .create_user(&NewUser {
                login: "jane",
                is_customer: true,
                ..Default::default()
            })
            .unwrap();
        let ticket = db
            .create_ticket(&NewTicket::new("Tags", 1, customer), SYSTEM_USER_ID)
            .unwrap();
        (db, dir, ticket)
    }

    fn strings(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_add_and_remove() {
        let (db, _dir, ticket) = setup_test_db();
        add(&db, ticket, &strings(&["vip", " billing ", "", "vip"])).unwrap();
        assert_eq!(db.get_tags(ticket).unwrap(), vec!["billing", "vip"]);

        remove(&db, ticket, &strings(&["vip", "missing"])).unwrap();
        assert_eq!(db.get_tags(ticket).unwrap(), vec!["billing"]);
    }

    #[test]
    fn test_missing_ticket() {
        let (db, _dir, _ticket) = setup_test_db();
        assert!(add(&db, 99999, &strings(&["x"])).is_err());
        assert!(remove(&db, 99999, &strings(&["x"])).is_err());
    }

    proptest! {
        #[test]
        fn prop_tags_deduplicated(tags in proptest::collection::vec("[a-z]{1,6}", 1..8)) {
            let (db, _dir, ticket) = setup_test_db();
            add(&db, ticket, &tags).unwrap();
            let mut expected = tags.clone();
            expected.sort();
            expected.dedup();
            prop_assert_eq!(db.get_tags(ticket).unwrap(), expected);
        }
    }
}
