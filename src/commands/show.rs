use anyhow::{bail, Result};

use ticketdesk::models::User;
use ticketdesk::Database;

fn describe(user: Option<&User>) -> String {
    match user {
        Some(u) if !u.fullname().is_empty() => format!("{} ({})", u.fullname(), u.login),
        Some(u) => u.login.clone(),
        None => "(unknown)".to_string(),
    }
}

pub fn run(db: &Database, id: i64) -> Result<()> {
    let Some(ticket) = db.get_ticket(id)? else {
        bail!("Ticket #{} not found", id);
    };
    let view = db.ticket_view(id)?;

    println!("Ticket #{}: {}", ticket.number, ticket.title);
    println!(
        "State: {}",
        view.state.as_ref().map(|s| s.name.as_str()).unwrap_or("?")
    );
    if let Some(until) = ticket.pending_time {
        println!("Pending until: {}", until.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(target) = ticket.merged_into_id {
        println!("Merged into: ticket id {}", target);
    }
    println!("Priority: {}", ticket.priority);
    println!(
        "Group: {}",
        view.group.as_ref().map(|g| g.name.as_str()).unwrap_or("?")
    );
    println!("Owner: {}", describe(view.owner.as_ref()));
    println!("Customer: {}", describe(view.customer.as_ref()));
    if let Some(org) = &view.organization {
        println!("Organization: {}", org.name);
    }
    println!("Created: {}", ticket.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Updated: {}", ticket.updated_at.format("%Y-%m-%d %H:%M:%S"));

    let tags = db.get_tags(id)?;
    if !tags.is_empty() {
        println!("Tags: {}", tags.join(", "));
    }

    let links = db.get_links(id)?;
    if !links.is_empty() {
        println!("\nLinks:");
        for link in links {
            if link.source_ticket_id == id {
                println!("  -> #{} ({})", link.target_ticket_id, link.link_type);
            } else {
                println!("  <- #{} ({})", link.source_ticket_id, link.link_type);
            }
        }
    }

    let articles = db.get_articles(id)?;
    if !articles.is_empty() {
        println!("\nArticles:");
        for article in articles {
            println!(
                "  [{}] {}{} {}",
                article.created_at.format("%Y-%m-%d %H:%M"),
                article.sender.as_str(),
                if article.internal { " (internal)" } else { "" },
                article.subject.as_deref().unwrap_or("")
            );
            for line in article.body.lines() {
                println!("    {}", line);
            }
        }
    }

    let attachments = db.get_attachments(id)?;
    if !attachments.is_empty() {
        println!("\nAttachments:");
        for attachment in attachments {
            println!(
                "  {} ({}, {} bytes, sha256 {})",
                attachment.filename,
                attachment.content_type,
                attachment.size,
                &attachment.sha256[..12]
            );
        }
    }

    let history = db.get_history(id)?;
    println!("\nHistory: {} entries", history.len());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use ticketdesk::db::NewUser;
    use ticketdesk::models::{NewArticle, SYSTEM_USER_ID};
    use ticketdesk::ticket::NewTicket;

    fn setup_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(&db_path).unwrap();
        (db, dir)
    }

    #[test]
    fn test_show_full_ticket() {
        let (db, _dir) = setup_test_db();
        let org = db.create_organization("Acme", true).unwrap();
        let customer = db
            .create_user(&NewUser {
                login: "jane",
                firstname: "Jane",
                organization_id: Some(org),
                is_customer: true,
                ..Default::default()
            })
            .unwrap();
        let id = db
            .create_ticket(&NewTicket::new("Show me", 1, customer), SYSTEM_USER_ID)
            .unwrap();
        let other = db
            .create_ticket(&NewTicket::new("Other", 1, customer), SYSTEM_USER_ID)
            .unwrap();
        db.add_tag(id, "vip").unwrap();
        db.add_link(id, other, "normal").unwrap();
        let article = db
            .add_article(id, &NewArticle::note("line one\nline two"), SYSTEM_USER_ID)
            .unwrap();
        db.add_attachment(id, Some(article), "a.txt", "text/plain", b"abc")
            .unwrap();

        assert!(run(&db, id).is_ok());
        assert!(run(&db, other).is_ok());
    }

    #[test]
    fn test_show_missing_ticket() {
        let (db, _dir) = setup_test_db();
        let err = run(&db, 99999).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(None), "(unknown)");
    }
}
