use anyhow::{bail, Result};
use std::io::{self, Write};

use ticketdesk::Database;

pub fn run(db: &Database, id: i64, force: bool) -> Result<()> {
    let ticket = match db.get_ticket(id)? {
        Some(t) => t,
        None => bail!("Ticket #{} not found", id),
    };

    if !force {
        print!("Delete ticket #{} \"{}\" and everything attached to it? [y/N] ", ticket.number, ticket.title);
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    if db.destroy_ticket(id)? {
        println!("Deleted ticket #{}", ticket.number);
    } else {
        bail!("Failed to delete ticket #{}", ticket.number);
    }

    Ok(())
}

/// Internal function for testing without stdin interaction
#[cfg(test)]
pub fn run_force(db: &Database, id: i64) -> Result<()> {
    run(db, id, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;
    use ticketdesk::db::NewUser;
    use ticketdesk::models::{NewArticle, SYSTEM_USER_ID};
    use ticketdesk::ticket::{NewTicket, OWNED_COLLECTIONS};

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
        (db, dir, customer)
    }

    fn ticket(db: &Database, customer: i64, title: &str) -> i64 {
        db.create_ticket(&NewTicket::new(title, 1, customer), SYSTEM_USER_ID)
            .unwrap()
    }

    // ==================== Unit Tests ====================

    #[test]
    fn test_delete_existing_ticket_force() {
        let (db, _dir, customer) = setup_test_db();
        let id = ticket(&db, customer, "To delete");

        run_force(&db, id).unwrap();
        assert!(db.get_ticket(id).unwrap().is_none());
    }

    #[test]
    fn test_delete_nonexistent_ticket() {
        let (db, _dir, _customer) = setup_test_db();

        let result = run_force(&db, 99999);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[test]
    fn test_delete_cascades_owned_rows() {
        let (db, _dir, customer) = setup_test_db();
        let id = ticket(&db, customer, "Test");
        db.add_tag(id, "bug").unwrap();
        let article = db
            .add_article(id, &NewArticle::note("Comment 1"), SYSTEM_USER_ID)
            .unwrap();
        db.add_attachment(id, Some(article), "a.txt", "text/plain", b"a")
            .unwrap();
        db.add_recent_view(id, customer).unwrap();

        run_force(&db, id).unwrap();

        for collection in OWNED_COLLECTIONS {
            assert_eq!(db.count_owned(collection, id).unwrap(), 0, "{}", collection.table);
        }
        assert_eq!(db.store_file_count().unwrap(), 0);
    }

    #[test]
    fn test_delete_removes_links_both_ways() {
        let (db, _dir, customer) = setup_test_db();
        let a = ticket(&db, customer, "A");
        let b = ticket(&db, customer, "B");
        let c = ticket(&db, customer, "C");
        db.add_link(a, b, "normal").unwrap();
        db.add_link(c, a, "normal").unwrap();

        run_force(&db, a).unwrap();

        assert!(db.get_links(b).unwrap().is_empty());
        assert!(db.get_links(c).unwrap().is_empty());
    }

    #[test]
    fn test_delete_closed_ticket() {
        let (db, _dir, customer) = setup_test_db();
        let id = ticket(&db, customer, "Closed ticket");
        let mut t = db.find_ticket(id).unwrap();
        t.state_id = db.find_state_by_name("closed").unwrap().id;
        db.save_ticket(&mut t, SYSTEM_USER_ID).unwrap();

        run_force(&db, id).unwrap();
        assert!(db.get_ticket(id).unwrap().is_none());
    }

    #[test]
    fn test_delete_multiple_tickets() {
        let (db, _dir, customer) = setup_test_db();
        let id1 = ticket(&db, customer, "Ticket 1");
        let id2 = ticket(&db, customer, "Ticket 2");
        let id3 = ticket(&db, customer, "Ticket 3");

        run_force(&db, id1).unwrap();
        run_force(&db, id2).unwrap();

        let tickets = db.list_tickets(None).unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].id, id3);
    }

    // ==================== Property-Based Tests ====================

    proptest! {
        #[test]
        fn prop_delete_force_removes_ticket(title in "[a-zA-Z0-9 ]{1,50}") {
            let (db, _dir, customer) = setup_test_db();
            let id = ticket(&db, customer, &title);

            run_force(&db, id).unwrap();

            prop_assert!(db.get_ticket(id).unwrap().is_none());
        }

        #[test]
        fn prop_delete_nonexistent_fails(id in 1000i64..10000) {
            let (db, _dir, _customer) = setup_test_db();
            prop_assert!(run_force(&db, id).is_err());
        }

        #[test]
        fn prop_delete_cascade_articles(count in 1usize..5) {
            let (db, _dir, customer) = setup_test_db();
            let id = ticket(&db, customer, "Test");

            for i in 0..count {
                db.add_article(id, &NewArticle::note(&format!("Comment {}", i)), SYSTEM_USER_ID).unwrap();
            }

            run_force(&db, id).unwrap();

            prop_assert!(db.get_articles(id).unwrap().is_empty());
        }
    }
}
