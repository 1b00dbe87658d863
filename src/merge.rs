//! Merging one ticket into another.

use anyhow::{Context, Result};
use rusqlite::params;

use crate::db::Database;
use crate::error::TicketError;
use crate::models::{ArticleSender, NewArticle, StateType, Ticket, SYSTEM_USER_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Move the source's articles and attachments to the target.
    pub move_articles: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptions {
            move_articles: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub links_reassigned: usize,
    pub articles_moved: usize,
}

impl Database {
    fn is_merged(&self, ticket: &Ticket) -> Result<bool> {
        if ticket.merged_into_id.is_some() {
            return Ok(true);
        }
        Ok(self
            .get_state(ticket.state_id)?
            .is_some_and(|state| state.state_type == StateType::Merged))
    }

    /// Merges `source_id` into `target_id`.
    ///
    /// Links that reference the source are rewritten in place to reference the
    /// target. The source ends up in the `merged` state pointing at the target.
    /// Everything runs in one savepoint; an error leaves both tickets as they
    /// were.
    pub fn merge_ticket(
        &self,
        source_id: i64,
        target_id: i64,
        actor_id: i64,
        options: &MergeOptions,
    ) -> Result<MergeOutcome> {
        if source_id == target_id {
            return Err(TicketError::SelfMerge { id: source_id }.into());
        }

        self.transaction("merge_ticket", |db| {
            let mut source = db.find_ticket(source_id)?;
            let target = db.find_ticket(target_id)?;
            if db.is_merged(&target)? {
                return Err(TicketError::AlreadyMerged { id: target_id }.into());
            }
            let merged_state = db.find_state_by_name("merged")?;

            // Links joining the two tickets directly are left alone, rewriting
            // them would produce a self-link.
            let mut links_reassigned = db.conn().execute(
                "UPDATE links SET source_ticket_id = ?2 WHERE source_ticket_id = ?1 AND target_ticket_id != ?2",
                params![source_id, target_id],
            )?;
            links_reassigned += db.conn().execute(
                "UPDATE links SET target_ticket_id = ?2 WHERE target_ticket_id = ?1 AND source_ticket_id != ?2",
                params![source_id, target_id],
            )?;

            let mut articles_moved = 0;
            if options.move_articles {
                articles_moved = db
                    .conn()
                    .execute(
                        "UPDATE articles SET ticket_id = ?2 WHERE ticket_id = ?1",
                        params![source_id, target_id],
                    )
                    .with_context(|| format!("Failed to move articles of ticket #{}", source_id))?;
                db.conn().execute(
                    "UPDATE attachments SET ticket_id = ?2 WHERE ticket_id = ?1",
                    params![source_id, target_id],
                )?;

                let note = format!("merged into #{}", target.number);
                db.add_article(
                    source_id,
                    &NewArticle {
                        sender: ArticleSender::System,
                        from: None,
                        to: None,
                        subject: Some("Ticket merged"),
                        body: &note,
                        internal: true,
                    },
                    actor_id,
                )?;
            }

            source.state_id = merged_state.id;
            source.merged_into_id = Some(target_id);
            source.owner_id = SYSTEM_USER_ID;
            db.save_ticket(&mut source, actor_id)?;

            db.add_history(target_id, "merged_from", None, Some(&source.number), actor_id)?;
            db.touch_ticket(target_id, actor_id)?;

            tracing::info!(
                source_id,
                target_id,
                links_reassigned,
                articles_moved,
                "ticket merged"
            );
            Ok(MergeOutcome {
                links_reassigned,
                articles_moved,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewUser;
    use crate::error::kind;
    use crate::ticket::NewTicket;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn setup_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(&db_path).unwrap();
        (db, dir)
    }

    fn tickets(db: &Database, n: usize) -> Vec<i64> {
        let customer = db
            .create_user(&NewUser {
                login: "customer",
                email: Some("customer@example.com"),
                is_customer: true,
                ..Default::default()
            })
            .unwrap();
        (0..n)
            .map(|i| {
                db.create_ticket(
                    &NewTicket::new(&format!("Ticket {}", i), 1, customer),
                    SYSTEM_USER_ID,
                )
                .unwrap()
            })
            .collect()
    }

    fn link_pairs(db: &Database, ticket: i64) -> Vec<(i64, i64)> {
        db.get_links(ticket)
            .unwrap()
            .into_iter()
            .map(|l| (l.source_ticket_id, l.target_ticket_id))
            .collect()
    }

    // ==================== Unit Tests ====================

    #[test]
    fn test_self_merge_is_rejected() {
        let (db, _dir) = setup_test_db();
        let t = tickets(&db, 1);
        let before = db.find_ticket(t[0]).unwrap();

        let err = db
            .merge_ticket(t[0], t[0], SYSTEM_USER_ID, &MergeOptions::default())
            .unwrap_err();

        assert_eq!(kind(&err), Some(&TicketError::SelfMerge { id: t[0] }));
        assert_eq!(db.find_ticket(t[0]).unwrap(), before);
    }

    #[test]
    fn test_merge_into_merged_ticket_is_rejected() {
        let (db, _dir) = setup_test_db();
        let t = tickets(&db, 4);
        db.add_link(t[0], t[3], "normal").unwrap();
        db.merge_ticket(t[0], t[1], SYSTEM_USER_ID, &MergeOptions::default())
            .unwrap();
        let links_of_first = link_pairs(&db, t[0]);
        let third = db.find_ticket(t[2]).unwrap();

        let err = db
            .merge_ticket(t[2], t[0], SYSTEM_USER_ID, &MergeOptions::default())
            .unwrap_err();

        assert_eq!(kind(&err), Some(&TicketError::AlreadyMerged { id: t[0] }));
        assert_eq!(link_pairs(&db, t[0]), links_of_first);
        assert_eq!(db.find_ticket(t[2]).unwrap(), third);
    }

    #[test]
    fn test_reverse_merge_is_rejected() {
        let (db, _dir) = setup_test_db();
        let t = tickets(&db, 2);
        db.merge_ticket(t[0], t[1], SYSTEM_USER_ID, &MergeOptions::default())
            .unwrap();

        let err = db
            .merge_ticket(t[1], t[0], SYSTEM_USER_ID, &MergeOptions::default())
            .unwrap_err();
        assert!(matches!(kind(&err), Some(TicketError::AlreadyMerged { .. })));
    }

    #[test]
    fn test_links_are_rewritten_in_place() {
        let (db, _dir) = setup_test_db();
        let t = tickets(&db, 4);
        let (source, target, a, b) = (t[0], t[1], t[2], t[3]);
        let outgoing = db.add_link(source, a, "normal").unwrap();
        let incoming = db.add_link(b, source, "parent").unwrap();
        let direct = db.add_link(source, target, "normal").unwrap();
        let count = db.count_links().unwrap();

        let outcome = db
            .merge_ticket(source, target, SYSTEM_USER_ID, &MergeOptions::default())
            .unwrap();

        assert_eq!(outcome.links_reassigned, 2);
        assert_eq!(db.count_links().unwrap(), count);
        let links = db.get_links(target).unwrap();
        let by_id = |id: i64| links.iter().find(|l| l.id == id).unwrap();
        assert_eq!(
            (by_id(outgoing).source_ticket_id, by_id(outgoing).target_ticket_id),
            (target, a)
        );
        assert_eq!(
            (by_id(incoming).source_ticket_id, by_id(incoming).target_ticket_id),
            (b, target)
        );
        assert_eq!(by_id(incoming).link_type, "parent");
        assert_eq!(
            (by_id(direct).source_ticket_id, by_id(direct).target_ticket_id),
            (source, target)
        );
    }

    #[test]
    fn test_source_state_after_merge() {
        let (db, _dir) = setup_test_db();
        let t = tickets(&db, 2);
        let agent = db
            .create_user(&NewUser {
                login: "agent",
                is_agent: true,
                ..Default::default()
            })
            .unwrap();
        let mut source = db.find_ticket(t[0]).unwrap();
        source.owner_id = agent;
        db.save_ticket(&mut source, agent).unwrap();

        db.merge_ticket(t[0], t[1], agent, &MergeOptions::default())
            .unwrap();

        let source = db.find_ticket(t[0]).unwrap();
        let state = db.get_state(source.state_id).unwrap().unwrap();
        assert_eq!(state.state_type, StateType::Merged);
        assert_eq!(source.merged_into_id, Some(t[1]));
        assert_eq!(source.owner_id, SYSTEM_USER_ID);

        let history = db.get_history(t[0]).unwrap();
        assert!(history.iter().any(|h| h.attribute == "merged_into_id"
            && h.value_to.as_deref() == Some(t[1].to_string().as_str())));
        let target_history = db.get_history(t[1]).unwrap();
        assert!(target_history
            .iter()
            .any(|h| h.attribute == "merged_from" && h.value_to.as_deref() == Some(source.number.as_str())));
    }

    #[test]
    fn test_articles_and_attachments_move() {
        let (db, _dir) = setup_test_db();
        let t = tickets(&db, 2);
        let first = db
            .add_article(t[0], &NewArticle::note("first"), SYSTEM_USER_ID)
            .unwrap();
        db.add_article(t[0], &NewArticle::note("second"), SYSTEM_USER_ID)
            .unwrap();
        db.add_attachment(t[0], Some(first), "log.txt", "text/plain", b"log")
            .unwrap();

        let outcome = db
            .merge_ticket(t[0], t[1], SYSTEM_USER_ID, &MergeOptions::default())
            .unwrap();

        assert_eq!(outcome.articles_moved, 2);
        let moved: Vec<String> = db
            .get_articles(t[1])
            .unwrap()
            .into_iter()
            .map(|a| a.body)
            .collect();
        assert_eq!(moved, vec!["first", "second"]);
        assert_eq!(db.get_attachments(t[1]).unwrap().len(), 1);
        assert!(db.get_attachments(t[0]).unwrap().is_empty());

        let remaining = db.get_articles(t[0]).unwrap();
        assert_eq!(remaining.len(), 1);
        let target_number = db.find_ticket(t[1]).unwrap().number;
        assert_eq!(remaining[0].body, format!("merged into #{}", target_number));
        assert_eq!(remaining[0].sender, ArticleSender::System);
    }

    #[test]
    fn test_merge_without_moving_articles() {
        let (db, _dir) = setup_test_db();
        let t = tickets(&db, 2);
        db.add_article(t[0], &NewArticle::note("stays"), SYSTEM_USER_ID)
            .unwrap();

        let outcome = db
            .merge_ticket(
                t[0],
                t[1],
                SYSTEM_USER_ID,
                &MergeOptions {
                    move_articles: false,
                },
            )
            .unwrap();

        assert_eq!(outcome.articles_moved, 0);
        assert_eq!(db.get_articles(t[0]).unwrap().len(), 1);
        assert!(db.get_articles(t[1]).unwrap().is_empty());
    }

    #[test]
    fn test_missing_target_changes_nothing() {
        let (db, _dir) = setup_test_db();
        let t = tickets(&db, 2);
        db.add_link(t[0], t[1], "normal").unwrap();
        let before = db.find_ticket(t[0]).unwrap();

        let err = db
            .merge_ticket(t[0], 404, SYSTEM_USER_ID, &MergeOptions::default())
            .unwrap_err();

        assert_eq!(kind(&err), Some(&TicketError::not_found("Ticket", 404)));
        assert_eq!(db.find_ticket(t[0]).unwrap(), before);
        assert_eq!(link_pairs(&db, t[0]), vec![(t[0], t[1])]);
    }

    // ==================== Property-Based Tests ====================

    proptest! {
        #[test]
        fn prop_merge_keeps_link_count(edges in proptest::collection::vec((0usize..5, 0usize..5), 0..10)) {
            let (db, _dir) = setup_test_db();
            let t = tickets(&db, 5);
            for (from, to) in &edges {
                if from != to {
                    db.add_link(t[*from], t[*to], "normal").unwrap();
                }
            }
            let count = db.count_links().unwrap();

            db.merge_ticket(t[0], t[1], SYSTEM_USER_ID, &MergeOptions::default()).unwrap();

            prop_assert_eq!(db.count_links().unwrap(), count);
            for link in db.get_links(t[0]).unwrap() {
                let joins_pair = (link.source_ticket_id == t[0] && link.target_ticket_id == t[1])
                    || (link.source_ticket_id == t[1] && link.target_ticket_id == t[0]);
                prop_assert!(joins_pair);
            }
        }
    }
}
