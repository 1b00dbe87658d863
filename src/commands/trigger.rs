use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use ticketdesk::notify::LogNotifier;
use ticketdesk::perform::{Actions, BatchPolicy, RuleEngine, SourceObject, TriggerContext};
use ticketdesk::Database;

pub fn run(
    db: &Database,
    id: i64,
    actions_path: &Path,
    article: Option<i64>,
    name: &str,
    actor_id: i64,
    policy: BatchPolicy,
) -> Result<()> {
    let content = fs::read_to_string(actions_path)
        .with_context(|| format!("Failed to read {}", actions_path.display()))?;
    let actions: Actions = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", actions_path.display()))?;

    let source = match article {
        Some(article_id) => SourceObject::Article(article_id),
        None => SourceObject::Ticket(id),
    };
    let notifier = LogNotifier;
    let outcome = RuleEngine::new(db, &notifier)
        .with_policy(policy)
        .perform_changes(id, &actions, &TriggerContext { name }, Some(source), actor_id)?;

    if !outcome.changed.is_empty() {
        println!("Changed: {}", outcome.changed.join(", "));
    }
    if outcome.notifications > 0 {
        println!("Notifications sent: {}", outcome.notifications);
    }
    if !outcome.skipped.is_empty() {
        println!("Skipped: {}", outcome.skipped.join(", "));
    }
    if outcome.deleted {
        println!("Deleted ticket {}", id);
    }
    Ok(())
}
