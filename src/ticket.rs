//! The ticket aggregate: creation, validated saves and cascading destroy.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{parse_datetime, Database};
use crate::error::TicketError;
use crate::models::{validate_priority, StateType, Ticket, SYSTEM_USER_ID, VALID_PRIORITIES};

/// A table holding rows owned by a ticket, and the column pointing at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnedCollection {
    pub table: &'static str,
    pub foreign_key: &'static str,
}

/// Every collection removed together with its ticket, in deletion order.
/// Attachments come first: they reference articles and release store files.
pub const OWNED_COLLECTIONS: &[OwnedCollection] = &[
    OwnedCollection { table: "attachments", foreign_key: "ticket_id" },
    OwnedCollection { table: "articles", foreign_key: "ticket_id" },
    OwnedCollection { table: "activity_streams", foreign_key: "ticket_id" },
    OwnedCollection { table: "online_notifications", foreign_key: "ticket_id" },
    OwnedCollection { table: "tags", foreign_key: "ticket_id" },
    OwnedCollection { table: "histories", foreign_key: "ticket_id" },
    OwnedCollection { table: "activity_logs", foreign_key: "ticket_id" },
    OwnedCollection { table: "recent_views", foreign_key: "ticket_id" },
];

/// Input for `Database::create_ticket`.
#[derive(Debug, Clone)]
pub struct NewTicket<'a> {
    pub title: &'a str,
    pub group_id: i64,
    pub customer_id: i64,
    pub owner_id: Option<i64>,
    /// State name; `new` when absent.
    pub state: Option<&'a str>,
    pub priority: Option<&'a str>,
    pub pending_time: Option<DateTime<Utc>>,
}

impl<'a> NewTicket<'a> {
    pub fn new(title: &'a str, group_id: i64, customer_id: i64) -> Self {
        NewTicket {
            title,
            group_id,
            customer_id,
            owner_id: None,
            state: None,
            priority: None,
            pending_time: None,
        }
    }
}

/// Strips NUL bytes, which SQLite text columns and mail clients choke on.
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title.chars().filter(|c| *c != '\0').collect();
    if cleaned.trim().is_empty() {
        "-".to_string()
    } else {
        cleaned
    }
}

const TICKET_COLUMNS: &str = "id, number, title, group_id, owner_id, customer_id, organization_id, state_id, priority, pending_time, merged_into_id, created_by_id, updated_by_id, created_at, updated_at";

pub(crate) fn ticket_from_row(row: &Row) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: row.get(0)?,
        number: row.get(1)?,
        title: row.get(2)?,
        group_id: row.get(3)?,
        owner_id: row.get(4)?,
        customer_id: row.get(5)?,
        organization_id: row.get(6)?,
        state_id: row.get(7)?,
        priority: row.get(8)?,
        pending_time: row.get::<_, Option<String>>(9)?.map(parse_datetime),
        merged_into_id: row.get(10)?,
        created_by_id: row.get(11)?,
        updated_by_id: row.get(12)?,
        created_at: parse_datetime(row.get::<_, String>(13)?),
        updated_at: parse_datetime(row.get::<_, String>(14)?),
    })
}

impl Database {
    pub fn create_ticket(&self, new: &NewTicket, actor_id: i64) -> Result<i64> {
        self.transaction("create_ticket", |db| {
            let title = sanitize_title(new.title);
            let priority = new.priority.unwrap_or("normal");
            if !validate_priority(priority) {
                return Err(TicketError::validation(format!(
                    "invalid priority '{}'. Must be one of: {}",
                    priority,
                    VALID_PRIORITIES.join(", ")
                ))
                .into());
            }

            let state = db.find_state_by_name(new.state.unwrap_or("new"))?;
            let pending_time = if state.state_type == StateType::Pending {
                new.pending_time
            } else {
                None
            };

            if db.get_group(new.group_id)?.is_none() {
                return Err(TicketError::not_found("Group", new.group_id).into());
            }
            let customer = db.find_user(new.customer_id)?;
            let owner_id = new.owner_id.unwrap_or(SYSTEM_USER_ID);
            db.find_user(owner_id)?;

            let now = Utc::now();
            let now_str = now.to_rfc3339();
            db.conn().execute(
                "INSERT INTO tickets (number, title, group_id, owner_id, customer_id, organization_id, state_id, priority, pending_time, created_by_id, updated_by_id, created_at, updated_at)
                 VALUES ('', ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?10, ?10)",
                params![
                    title,
                    new.group_id,
                    owner_id,
                    customer.id,
                    customer.organization_id,
                    state.id,
                    priority,
                    pending_time.map(|t| t.to_rfc3339()),
                    actor_id,
                    now_str
                ],
            )?;
            let id = db.conn().last_insert_rowid();

            let number = format!("{}{:05}", now.format("%Y%m%d"), id);
            db.conn()
                .execute("UPDATE tickets SET number = ?1 WHERE id = ?2", params![number, id])?;
            db.add_history(id, "created", None, Some(&title), actor_id)?;

            tracing::debug!(ticket_id = id, %number, "ticket created");
            Ok(id)
        })
    }

    pub fn get_ticket(&self, id: i64) -> Result<Option<Ticket>> {
        let ticket = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM tickets WHERE id = ?1", TICKET_COLUMNS),
                [id],
                ticket_from_row,
            )
            .optional()?;
        Ok(ticket)
    }

    /// Like `get_ticket`, but a missing ticket is a `NotFound` error.
    pub fn find_ticket(&self, id: i64) -> Result<Ticket> {
        self.get_ticket(id)?
            .ok_or_else(|| TicketError::not_found("Ticket", id).into())
    }

    pub(crate) fn get_tickets(&self, ids: &[i64]) -> Result<Vec<Ticket>> {
        let mut tickets = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(ticket) = self.get_ticket(*id)? {
                tickets.push(ticket);
            }
        }
        Ok(tickets)
    }

    pub fn list_tickets(&self, state_filter: Option<&str>) -> Result<Vec<Ticket>> {
        let columns = TICKET_COLUMNS
            .split(", ")
            .map(|c| format!("t.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "SELECT {} FROM tickets t JOIN ticket_states s ON s.id = t.state_id",
            columns
        );
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(state) = state_filter {
            if state != "all" {
                sql.push_str(" WHERE (s.name = ?1 OR s.state_type = ?1)");
                params_vec.push(Box::new(state.to_string()));
            }
        }
        sql.push_str(" ORDER BY t.id DESC");

        let mut stmt = self.conn().prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        let tickets = stmt
            .query_map(params_refs.as_slice(), ticket_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tickets)
    }

    /// Persists `ticket` after validating it against the model invariants.
    ///
    /// The title is re-sanitized, a state id that resolves to no state is
    /// rejected, and `pending_time` is cleared unless the state is a pending
    /// one. One history row is written per changed attribute. `ticket` is
    /// updated in place with what was stored.
    pub fn save_ticket(&self, ticket: &mut Ticket, actor_id: i64) -> Result<()> {
        self.transaction("save_ticket", |db| {
            let previous = db.find_ticket(ticket.id)?;

            let state = db.get_state(ticket.state_id)?.ok_or_else(|| {
                TicketError::validation(format!(
                    "state_id {} does not reference a ticket state",
                    ticket.state_id
                ))
            })?;
            if state.state_type != StateType::Pending {
                ticket.pending_time = None;
            }

            ticket.title = sanitize_title(&ticket.title);
            if !validate_priority(&ticket.priority) {
                return Err(TicketError::validation(format!(
                    "invalid priority '{}'. Must be one of: {}",
                    ticket.priority,
                    VALID_PRIORITIES.join(", ")
                ))
                .into());
            }
            if db.get_group(ticket.group_id)?.is_none() {
                return Err(TicketError::not_found("Group", ticket.group_id).into());
            }
            db.find_user(ticket.owner_id)?;
            if ticket.customer_id != previous.customer_id {
                let customer = db.find_user(ticket.customer_id)?;
                ticket.organization_id = customer.organization_id;
            }

            ticket.updated_at = Utc::now();
            ticket.updated_by_id = actor_id;

            db.conn()
                .execute(
                    "UPDATE tickets SET title = ?1, group_id = ?2, owner_id = ?3, customer_id = ?4, organization_id = ?5,
                     state_id = ?6, priority = ?7, pending_time = ?8, merged_into_id = ?9, updated_by_id = ?10, updated_at = ?11
                     WHERE id = ?12",
                    params![
                        ticket.title,
                        ticket.group_id,
                        ticket.owner_id,
                        ticket.customer_id,
                        ticket.organization_id,
                        ticket.state_id,
                        ticket.priority,
                        ticket.pending_time.map(|t| t.to_rfc3339()),
                        ticket.merged_into_id,
                        ticket.updated_by_id,
                        ticket.updated_at.to_rfc3339(),
                        ticket.id
                    ],
                )
                .with_context(|| format!("Failed to save ticket #{}", ticket.id))?;

            for (attribute, from, to) in changed_attributes(&previous, ticket) {
                db.add_history(ticket.id, attribute, from.as_deref(), to.as_deref(), actor_id)?;
            }
            Ok(())
        })
    }

    /// Marks the ticket as changed without altering attributes.
    pub fn touch_ticket(&self, id: i64, actor_id: i64) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE tickets SET updated_at = ?1, updated_by_id = ?2 WHERE id = ?3",
            params![Utc::now().to_rfc3339(), actor_id, id],
        )?;
        Ok(rows > 0)
    }

    /// Deletes the ticket with every row it owns and every link touching it.
    ///
    /// Runs in one savepoint: a failing child delete leaves the ticket and
    /// all of its rows in place. Returns `false` when no such ticket exists.
    pub fn destroy_ticket(&self, id: i64) -> Result<bool> {
        self.transaction("destroy_ticket", |db| {
            if db.get_ticket(id)?.is_none() {
                return Ok(false);
            }

            let released = db.release_ticket_attachments(id)?;
            for collection in OWNED_COLLECTIONS {
                let removed = db
                    .conn()
                    .execute(
                        &format!(
                            "DELETE FROM {} WHERE {} = ?1",
                            collection.table, collection.foreign_key
                        ),
                        [id],
                    )
                    .with_context(|| {
                        format!("Failed to delete {} of ticket #{}", collection.table, id)
                    })?;
                tracing::trace!(ticket_id = id, table = collection.table, removed, "owned rows deleted");
            }

            let links = db.conn().execute(
                "DELETE FROM links WHERE source_ticket_id = ?1 OR target_ticket_id = ?1",
                [id],
            )?;
            db.conn().execute(
                "UPDATE tickets SET merged_into_id = NULL WHERE merged_into_id = ?1",
                [id],
            )?;
            db.conn()
                .execute("DELETE FROM tickets WHERE id = ?1", [id])
                .with_context(|| format!("Failed to delete ticket #{}", id))?;

            tracing::info!(ticket_id = id, links, released_files = released, "ticket destroyed");
            Ok(true)
        })
    }

    /// Number of rows in `collection` that belong to the ticket.
    pub fn count_owned(&self, collection: &OwnedCollection, ticket_id: i64) -> Result<i64> {
        let count = self.conn().query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ?1",
                collection.table, collection.foreign_key
            ),
            [ticket_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn changed_attributes(
    before: &Ticket,
    after: &Ticket,
) -> Vec<(&'static str, Option<String>, Option<String>)> {
    let mut changes = Vec::new();
    if before.title != after.title {
        changes.push(("title", Some(before.title.clone()), Some(after.title.clone())));
    }
    if before.state_id != after.state_id {
        changes.push((
            "state_id",
            Some(before.state_id.to_string()),
            Some(after.state_id.to_string()),
        ));
    }
    if before.owner_id != after.owner_id {
        changes.push((
            "owner_id",
            Some(before.owner_id.to_string()),
            Some(after.owner_id.to_string()),
        ));
    }
    if before.customer_id != after.customer_id {
        changes.push((
            "customer_id",
            Some(before.customer_id.to_string()),
            Some(after.customer_id.to_string()),
        ));
    }
    if before.group_id != after.group_id {
        changes.push((
            "group_id",
            Some(before.group_id.to_string()),
            Some(after.group_id.to_string()),
        ));
    }
    if before.priority != after.priority {
        changes.push((
            "priority",
            Some(before.priority.clone()),
            Some(after.priority.clone()),
        ));
    }
    if before.pending_time != after.pending_time {
        changes.push((
            "pending_time",
            before.pending_time.map(|t| t.to_rfc3339()),
            after.pending_time.map(|t| t.to_rfc3339()),
        ));
    }
    if before.merged_into_id != after.merged_into_id {
        changes.push((
            "merged_into_id",
            before.merged_into_id.map(|id| id.to_string()),
            after.merged_into_id.map(|id| id.to_string()),
        ));
    }
    changes
}
