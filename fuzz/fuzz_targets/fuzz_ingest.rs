#![no_main]

use libfuzzer_sys::fuzz_target;
use tempfile::tempdir;

use ticketdesk::ingest::parse_message;
use ticketdesk::Database;

fuzz_target!(|data: &[u8]| {
    if parse_message(data).is_err() {
        return;
    }

    let dir = match tempdir() {
        Ok(d) => d,
        Err(_) => return,
    };
    let db = match Database::open(&dir.path().join("desk.db")) {
        Ok(d) => d,
        Err(_) => return,
    };

    if let Ok(ingested) = db.ingest_email(data, "Users") {
        let _ = db.destroy_ticket(ingested.ticket_id);
    }
});
