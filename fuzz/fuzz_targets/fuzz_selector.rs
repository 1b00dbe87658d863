#![no_main]

//! Feeds arbitrary JSON to the selector parser and the SQL builder.
//! Rejected selectors must come back as errors, not panics or SQL failures
//! on well-formed input.

use libfuzzer_sys::fuzz_target;
use tempfile::tempdir;

use ticketdesk::selector::parse_selector;
use ticketdesk::Database;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(selector) = parse_selector(json) else {
        return;
    };

    let dir = match tempdir() {
        Ok(d) => d,
        Err(_) => return,
    };
    let db = match Database::open(&dir.path().join("desk.db")) {
        Ok(d) => d,
        Err(_) => return,
    };

    let _ = db.select_tickets(&selector, 10, 0, None);
});
