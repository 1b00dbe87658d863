#![no_main]

//! Creates, edits, merges and destroys tickets with arbitrary text.
//! Titles and tags may hold any Unicode; nothing here may panic.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tempfile::tempdir;

use ticketdesk::db::NewUser;
use ticketdesk::merge::MergeOptions;
use ticketdesk::models::{NewArticle, SYSTEM_USER_ID};
use ticketdesk::ticket::NewTicket;
use ticketdesk::Database;

#[derive(Arbitrary, Debug)]
struct TicketInput {
    title: String,
    body: Option<String>,
    tag: String,
    attachment: Vec<u8>,
    num_tickets: u8,
    merge: bool,
}

fuzz_target!(|input: TicketInput| {
    let num_tickets = (input.num_tickets % 8).max(1);

    let dir = match tempdir() {
        Ok(d) => d,
        Err(_) => return,
    };
    let db = match Database::open(&dir.path().join("desk.db")) {
        Ok(d) => d,
        Err(_) => return,
    };
    let customer = match db.create_user(&NewUser {
        login: "fuzz",
        is_customer: true,
        ..Default::default()
    }) {
        Ok(id) => id,
        Err(_) => return,
    };

    let mut created = Vec::new();
    for i in 0..num_tickets {
        let title = format!("{} {}", input.title, i);
        if let Ok(id) = db.create_ticket(&NewTicket::new(&title, 1, customer), SYSTEM_USER_ID) {
            created.push(id);
        }
    }

    if let Some(&first) = created.first() {
        if let Some(body) = &input.body {
            if let Ok(article) = db.add_article(first, &NewArticle::note(body), SYSTEM_USER_ID) {
                let _ = db.add_attachment(first, Some(article), &input.tag, "application/octet-stream", &input.attachment);
            }
        }
        let _ = db.add_tag(first, &input.tag);
        let _ = db.get_tags(first);
    }

    let _ = db.list_tickets(None);
    let _ = db.list_tickets(Some(&input.tag));

    if input.merge && created.len() >= 2 {
        let _ = db.merge_ticket(created[0], created[1], SYSTEM_USER_ID, &MergeOptions::default());
    }

    for id in &created {
        let _ = db.destroy_ticket(*id);
    }
    assert_eq!(db.store_file_count().unwrap_or(0), 0);
});
