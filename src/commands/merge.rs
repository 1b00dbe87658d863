use anyhow::Result;

use ticketdesk::merge::MergeOptions;
use ticketdesk::Database;

pub fn run(db: &Database, source_id: i64, target_id: i64, actor_id: i64, options: &MergeOptions) -> Result<()> {
    let outcome = db.merge_ticket(source_id, target_id, actor_id, options)?;
    println!(
        "Merged ticket {} into {} ({} links reassigned, {} articles moved)",
        source_id, target_id, outcome.links_reassigned, outcome.articles_moved
    );
    Ok(())
}
