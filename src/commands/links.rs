use anyhow::{bail, Result};

use ticketdesk::Database;

pub fn link(db: &Database, source_id: i64, target_id: i64, link_type: &str) -> Result<()> {
    if db.get_ticket(source_id)?.is_none() {
        bail!("Ticket #{} not found", source_id);
    }
    if db.get_ticket(target_id)?.is_none() {
        bail!("Ticket #{} not found", target_id);
    }

    if source_id == target_id {
        bail!("A ticket cannot be linked to itself");
    }

    let already = db
        .get_links(source_id)?
        .iter()
        .any(|l| l.source_ticket_id == source_id && l.target_ticket_id == target_id);
    if already {
        println!("Link already exists");
        return Ok(());
    }

    db.add_link(source_id, target_id, link_type)?;
    println!("Linked ticket {} -> {} ({})", source_id, target_id, link_type);
    Ok(())
}

pub fn unlink(db: &Database, source_id: i64, target_id: i64) -> Result<()> {
    if db.remove_link(source_id, target_id)? {
        println!("Removed link {} -> {}", source_id, target_id);
    } else {
        println!("No such link found");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use ticketdesk::db::NewUser;
    use ticketdesk::models::SYSTEM_USER_ID;
    use ticketdesk::ticket::NewTicket;

    fn setup_test_db() -> (Database, tempfile::TempDir, i64, i64) {
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
        let a = db
            .create_ticket(&NewTicket::new("A", 1, customer), SYSTEM_USER_ID)
            .unwrap();
        let b = db
            .create_ticket(&NewTicket::new("B", 1, customer), SYSTEM_USER_ID)
            .unwrap();
        (db, dir, a, b)
    }

    #[test]
    fn test_link_and_unlink() {
        let (db, _dir, a, b) = setup_test_db();
        link(&db, a, b, "parent").unwrap();
        link(&db, a, b, "parent").unwrap();
        assert_eq!(db.count_links().unwrap(), 1);
        assert_eq!(db.get_links(b).unwrap()[0].link_type, "parent");

        unlink(&db, a, b).unwrap();
        assert_eq!(db.count_links().unwrap(), 0);
        unlink(&db, a, b).unwrap();
    }

    #[test]
    fn test_link_rejections() {
        let (db, _dir, a, _b) = setup_test_db();
        assert!(link(&db, a, a, "normal").is_err());
        assert!(link(&db, a, 99999, "normal").is_err());
        assert!(link(&db, 99999, a, "normal").is_err());
        assert_eq!(db.count_links().unwrap(), 0);
    }
}
