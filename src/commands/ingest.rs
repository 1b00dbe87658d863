use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use ticketdesk::Database;

pub fn run(db: &Database, path: &Path, group: &str) -> Result<()> {
    let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let ingested = db.ingest_email(&raw, group)?;
    let ticket = db.find_ticket(ingested.ticket_id)?;

    println!(
        "Created ticket #{} (id {}) with {} attachment(s)",
        ticket.number,
        ticket.id,
        ingested.attachment_ids.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const EMAIL: &str = "From: Jane Doe <jane@example.com>\r\n\
Subject: VPN down\r\n\
Content-Type: text/plain\r\n\
\r\n\
Cannot connect since this morning.\r\n";

    #[test]
    fn test_ingest_file() {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        let path = dir.path().join("mail.eml");
        fs::write(&path, EMAIL).unwrap();

        run(&db, &path, "Users").unwrap();

        let tickets = db.list_tickets(None).unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].title, "VPN down");
        assert!(db.find_user_by_email("JANE@example.com").unwrap().is_some());
    }

    #[test]
    fn test_ingest_errors() {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        assert!(run(&db, &dir.path().join("missing.eml"), "Users").is_err());

        let path = dir.path().join("mail.eml");
        fs::write(&path, EMAIL).unwrap();
        assert!(run(&db, &path, "Nowhere").is_err());
    }
}
