use anyhow::{bail, Result};

use ticketdesk::models::{ArticleSender, NewArticle};
use ticketdesk::Database;

pub fn run(db: &Database, id: i64, text: &str, internal: bool, actor_id: i64) -> Result<()> {
    if db.get_ticket(id)?.is_none() {
        bail!("Ticket #{} not found", id);
    }
    if text.trim().is_empty() {
        bail!("Article text must not be empty");
    }

    let author = db.find_user(actor_id)?;
    let sender = if author.is_agent {
        ArticleSender::Agent
    } else if author.is_customer {
        ArticleSender::Customer
    } else {
        ArticleSender::System
    };

    let article_id = db.add_article(
        id,
        &NewArticle {
            sender,
            from: author.email.as_deref(),
            to: None,
            subject: None,
            body: text,
            internal,
        },
        actor_id,
    )?;
    db.touch_ticket(id, actor_id)?;
    println!("Added article {} to ticket {}", article_id, id);
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
                email: Some("jane@example.com"),
                is_customer: true,
                ..Default::default()
            })
            .unwrap();
        let ticket = db
            .create_ticket(&NewTicket::new("Comment", 1, customer), SYSTEM_USER_ID)
            .unwrap();
        (db, dir, customer, ticket)
    }

    #[test]
    fn test_customer_comment() {
        let (db, _dir, customer, ticket) = setup_test_db();
        run(&db, ticket, "still broken", false, customer).unwrap();

        let article = db.latest_article(ticket).unwrap().unwrap();
        assert_eq!(article.sender, ArticleSender::Customer);
        assert_eq!(article.from.as_deref(), Some("jane@example.com"));
        assert!(!article.internal);
        assert_eq!(db.find_ticket(ticket).unwrap().updated_by_id, customer);
    }

    #[test]
    fn test_system_note() {
        let (db, _dir, _customer, ticket) = setup_test_db();
        run(&db, ticket, "internal note", true, SYSTEM_USER_ID).unwrap();
        let article = db.latest_article(ticket).unwrap().unwrap();
        assert_eq!(article.sender, ArticleSender::System);
        assert!(article.internal);
    }

    #[test]
    fn test_rejections() {
        let (db, _dir, customer, ticket) = setup_test_db();
        assert!(run(&db, 99999, "text", false, customer).is_err());
        assert!(run(&db, ticket, "   ", false, customer).is_err());
    }
}
