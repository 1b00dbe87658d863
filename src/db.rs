use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::TicketError;
use crate::models::{
    AccessLevel, Article, ArticleSender, Group, HistoryEntry, Link, NewArticle, Organization,
    TicketState, User,
};

const SCHEMA_VERSION: i32 = 1;

pub struct Database {
    conn: Connection,
}

/// Fields of a new user account.
#[derive(Debug, Clone, Default)]
pub struct NewUser<'a> {
    pub login: &'a str,
    pub email: Option<&'a str>,
    pub firstname: &'a str,
    pub lastname: &'a str,
    pub organization_id: Option<i64>,
    pub is_agent: bool,
    pub is_customer: bool,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open database")?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    fn init_schema(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap_or(0);

        if version < SCHEMA_VERSION {
            self.conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS organizations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    shared INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    login TEXT NOT NULL UNIQUE,
                    email TEXT,
                    firstname TEXT NOT NULL DEFAULT '',
                    lastname TEXT NOT NULL DEFAULT '',
                    organization_id INTEGER,
                    is_agent INTEGER NOT NULL DEFAULT 0,
                    is_customer INTEGER NOT NULL DEFAULT 0,
                    active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (organization_id) REFERENCES organizations(id)
                );

                CREATE TABLE IF NOT EXISTS access_groups (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE
                );

                -- Per-user grants on a group (user may read / fully handle its tickets)
                CREATE TABLE IF NOT EXISTS group_access (
                    user_id INTEGER NOT NULL,
                    group_id INTEGER NOT NULL,
                    level TEXT NOT NULL CHECK (level IN ('read', 'full')),
                    PRIMARY KEY (user_id, group_id),
                    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                    FOREIGN KEY (group_id) REFERENCES access_groups(id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS ticket_states (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    state_type TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS tickets (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    number TEXT NOT NULL,
                    title TEXT NOT NULL,
                    group_id INTEGER NOT NULL,
                    owner_id INTEGER NOT NULL,
                    customer_id INTEGER NOT NULL,
                    organization_id INTEGER,
                    state_id INTEGER NOT NULL,
                    priority TEXT NOT NULL DEFAULT 'normal',
                    pending_time TEXT,
                    merged_into_id INTEGER,
                    created_by_id INTEGER NOT NULL,
                    updated_by_id INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    FOREIGN KEY (group_id) REFERENCES access_groups(id),
                    FOREIGN KEY (owner_id) REFERENCES users(id),
                    FOREIGN KEY (customer_id) REFERENCES users(id),
                    FOREIGN KEY (organization_id) REFERENCES organizations(id),
                    FOREIGN KEY (state_id) REFERENCES ticket_states(id),
                    FOREIGN KEY (merged_into_id) REFERENCES tickets(id)
                );

                -- Ticket-owned rows reference tickets without ON DELETE CASCADE:
                -- destroy_ticket removes them explicitly, in one savepoint.
                CREATE TABLE IF NOT EXISTS articles (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL,
                    sender TEXT NOT NULL,
                    from_addr TEXT,
                    to_addr TEXT,
                    subject TEXT,
                    body TEXT NOT NULL,
                    internal INTEGER NOT NULL DEFAULT 0,
                    created_by_id INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id),
                    FOREIGN KEY (created_by_id) REFERENCES users(id)
                );

                CREATE TABLE IF NOT EXISTS links (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    link_type TEXT NOT NULL DEFAULT 'normal',
                    source_ticket_id INTEGER NOT NULL,
                    target_ticket_id INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (source_ticket_id) REFERENCES tickets(id),
                    FOREIGN KEY (target_ticket_id) REFERENCES tickets(id)
                );

                CREATE TABLE IF NOT EXISTS tags (
                    ticket_id INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    PRIMARY KEY (ticket_id, name),
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id)
                );

                CREATE TABLE IF NOT EXISTS histories (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL,
                    attribute TEXT NOT NULL,
                    value_from TEXT,
                    value_to TEXT,
                    created_by_id INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id)
                );

                CREATE TABLE IF NOT EXISTS activity_streams (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL,
                    user_id INTEGER NOT NULL,
                    verb TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id)
                );

                CREATE TABLE IF NOT EXISTS online_notifications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL,
                    user_id INTEGER NOT NULL,
                    seen INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id)
                );

                CREATE TABLE IF NOT EXISTS recent_views (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL,
                    user_id INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id)
                );

                CREATE TABLE IF NOT EXISTS activity_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL,
                    user_id INTEGER NOT NULL,
                    activity TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id)
                );

                -- Content-addressed attachment payloads, shared between tickets
                CREATE TABLE IF NOT EXISTS store_files (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    sha256 TEXT NOT NULL UNIQUE,
                    size INTEGER NOT NULL,
                    data BLOB NOT NULL,
                    ref_count INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS attachments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL,
                    article_id INTEGER,
                    store_file_id INTEGER NOT NULL,
                    filename TEXT NOT NULL,
                    content_type TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id),
                    FOREIGN KEY (article_id) REFERENCES articles(id),
                    FOREIGN KEY (store_file_id) REFERENCES store_files(id)
                );

                -- Seed data
                INSERT OR IGNORE INTO ticket_states (id, name, state_type) VALUES
                    (1, 'new', 'new'),
                    (2, 'open', 'open'),
                    (3, 'pending reminder', 'pending'),
                    (4, 'closed', 'closed'),
                    (5, 'merged', 'merged'),
                    (6, 'removed', 'removed'),
                    (7, 'pending close', 'pending');
                INSERT OR IGNORE INTO users (id, login, firstname, lastname, created_at)
                    VALUES (1, '-', '-', '', '1970-01-01T00:00:00+00:00');
                INSERT OR IGNORE INTO access_groups (id, name) VALUES (1, 'Users');

                -- Indexes
                CREATE INDEX IF NOT EXISTS idx_tickets_state ON tickets(state_id);
                CREATE INDEX IF NOT EXISTS idx_tickets_group ON tickets(group_id);
                CREATE INDEX IF NOT EXISTS idx_tickets_customer ON tickets(customer_id);
                CREATE INDEX IF NOT EXISTS idx_articles_ticket ON articles(ticket_id);
                CREATE INDEX IF NOT EXISTS idx_links_source ON links(source_ticket_id);
                CREATE INDEX IF NOT EXISTS idx_links_target ON links(target_ticket_id);
                CREATE INDEX IF NOT EXISTS idx_histories_ticket ON histories(ticket_id);
                CREATE INDEX IF NOT EXISTS idx_attachments_ticket ON attachments(ticket_id);
                CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);
                "#,
            )?;

            self.conn
                .execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
        }

        self.conn.execute_batch("PRAGMA foreign_keys = ON")?;

        Ok(())
    }

    /// Runs `f` inside a named savepoint. Nested calls nest; an error rolls
    /// back everything `f` wrote.
    pub fn transaction<T>(&self, name: &'static str, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.conn.execute_batch(&format!("SAVEPOINT {}", name))?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch(&format!("RELEASE {}", name))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self
                    .conn
                    .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}", name = name))
                {
                    tracing::error!(savepoint = name, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    // Organizations
    pub fn create_organization(&self, name: &str, shared: bool) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO organizations (name, shared, created_at) VALUES (?1, ?2, ?3)",
                params![name, shared, now],
            )
            .with_context(|| format!("Failed to create organization '{}'", name))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_organization(&self, id: i64) -> Result<Option<Organization>> {
        let org = self
            .conn
            .query_row(
                "SELECT id, name, shared, created_at FROM organizations WHERE id = ?1",
                [id],
                organization_from_row,
            )
            .optional()?;
        Ok(org)
    }

    pub fn find_organization_by_name(&self, name: &str) -> Result<Option<Organization>> {
        let org = self
            .conn
            .query_row(
                "SELECT id, name, shared, created_at FROM organizations WHERE name = ?1",
                [name],
                organization_from_row,
            )
            .optional()?;
        Ok(org)
    }

    pub fn set_organization_shared(&self, id: i64, shared: bool) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE organizations SET shared = ?1 WHERE id = ?2",
            params![shared, id],
        )?;
        Ok(rows > 0)
    }

    // Groups
    pub fn create_group(&self, name: &str) -> Result<i64> {
        self.conn
            .execute("INSERT INTO access_groups (name) VALUES (?1)", [name])
            .with_context(|| format!("Failed to create group '{}'", name))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_group(&self, id: i64) -> Result<Option<Group>> {
        let group = self
            .conn
            .query_row(
                "SELECT id, name FROM access_groups WHERE id = ?1",
                [id],
                |row| {
                    Ok(Group {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(group)
    }

    pub fn find_group_by_name(&self, name: &str) -> Result<Option<Group>> {
        let group = self
            .conn
            .query_row(
                "SELECT id, name FROM access_groups WHERE name = ?1",
                [name],
                |row| {
                    Ok(Group {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(group)
    }

    // Users
    pub fn create_user(&self, user: &NewUser) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO users (login, email, firstname, lastname, organization_id, is_agent, is_customer, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    user.login,
                    user.email,
                    user.firstname,
                    user.lastname,
                    user.organization_id,
                    user.is_agent,
                    user.is_customer,
                    now
                ],
            )
            .with_context(|| format!("Failed to create user '{}'", user.login))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                [id],
                user_from_row,
            )
            .optional()?;
        match user {
            Some(mut user) => {
                user.group_access = self.get_group_access(user.id)?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// Like `get_user`, but a missing user is a `NotFound` error.
    pub fn find_user(&self, id: i64) -> Result<User> {
        self.get_user(id)?
            .ok_or_else(|| TicketError::not_found("User", id).into())
    }

    pub fn find_user_by_login(&self, login: &str) -> Result<Option<User>> {
        let id: Option<i64> = self
            .conn
            .query_row("SELECT id FROM users WHERE login = ?1", [login], |row| {
                row.get(0)
            })
            .optional()?;
        match id {
            Some(id) => self.get_user(id),
            None => Ok(None),
        }
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM users WHERE lower(email) = lower(?1) ORDER BY id LIMIT 1",
                [email],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => self.get_user(id),
            None => Ok(None),
        }
    }

    pub fn set_user_active(&self, id: i64, active: bool) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE users SET active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        Ok(rows > 0)
    }

    pub fn grant_group_access(&self, user_id: i64, group_id: i64, level: AccessLevel) -> Result<()> {
        self.conn.execute(
            "INSERT INTO group_access (user_id, group_id, level) VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id, group_id) DO UPDATE SET level = excluded.level",
            params![user_id, group_id, level.as_str()],
        )?;
        Ok(())
    }

    pub fn revoke_group_access(&self, user_id: i64, group_id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM group_access WHERE user_id = ?1 AND group_id = ?2",
            params![user_id, group_id],
        )?;
        Ok(rows > 0)
    }

    fn get_group_access(&self, user_id: i64) -> Result<BTreeMap<i64, AccessLevel>> {
        let mut stmt = self
            .conn
            .prepare("SELECT group_id, level FROM group_access WHERE user_id = ?1")?;
        let rows = stmt
            .query_map([user_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut access = BTreeMap::new();
        for (group_id, level) in rows {
            access.insert(group_id, level.parse::<AccessLevel>()?);
        }
        Ok(access)
    }

    /// Active users holding at least `level` on the group, in id order.
    pub fn users_with_group_access(&self, group_id: i64, level: AccessLevel) -> Result<Vec<i64>> {
        let levels: &[&str] = match level {
            AccessLevel::Read => &["read", "full"],
            AccessLevel::Full => &["full"],
        };
        let mut stmt = self.conn.prepare(
            "SELECT u.id FROM users u JOIN group_access ga ON ga.user_id = u.id
             WHERE ga.group_id = ?1 AND u.active = 1 AND ga.level IN (?2, ?3)
             ORDER BY u.id",
        )?;
        let ids = stmt
            .query_map(
                params![group_id, levels[0], levels[levels.len() - 1]],
                |row| row.get(0),
            )?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    // States
    pub fn get_state(&self, id: i64) -> Result<Option<TicketState>> {
        let state = self
            .conn
            .query_row(
                "SELECT id, name, state_type FROM ticket_states WHERE id = ?1",
                [id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()?;
        match state {
            Some((id, name, state_type)) => Ok(Some(TicketState {
                id,
                name,
                state_type: state_type.parse()?,
            })),
            None => Ok(None),
        }
    }

    pub fn find_state_by_name(&self, name: &str) -> Result<TicketState> {
        let id: Option<i64> = self
            .conn
            .query_row("SELECT id FROM ticket_states WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?;
        match id {
            Some(id) => self
                .get_state(id)?
                .ok_or_else(|| TicketError::not_found("State", name).into()),
            None => Err(TicketError::not_found("State", name).into()),
        }
    }

    // Articles
    pub fn add_article(&self, ticket_id: i64, article: &NewArticle, actor_id: i64) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO articles (ticket_id, sender, from_addr, to_addr, subject, body, internal, created_by_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    ticket_id,
                    article.sender.as_str(),
                    article.from,
                    article.to,
                    article.subject,
                    article.body,
                    article.internal,
                    actor_id,
                    now
                ],
            )
            .with_context(|| format!("Failed to add article to ticket #{}", ticket_id))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let article = self
            .conn
            .query_row(
                &format!("SELECT {} FROM articles WHERE id = ?1", ARTICLE_COLUMNS),
                [id],
                article_from_row,
            )
            .optional()?;
        Ok(article)
    }

    pub fn get_articles(&self, ticket_id: i64) -> Result<Vec<Article>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM articles WHERE ticket_id = ?1 ORDER BY id",
            ARTICLE_COLUMNS
        ))?;
        let articles = stmt
            .query_map([ticket_id], article_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(articles)
    }

    pub fn latest_article(&self, ticket_id: i64) -> Result<Option<Article>> {
        let article = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM articles WHERE ticket_id = ?1 ORDER BY id DESC LIMIT 1",
                    ARTICLE_COLUMNS
                ),
                [ticket_id],
                article_from_row,
            )
            .optional()?;
        Ok(article)
    }

    // Links
    pub fn add_link(&self, source_id: i64, target_id: i64, link_type: &str) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO links (link_type, source_ticket_id, target_ticket_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![link_type, source_id, target_id, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn remove_link(&self, source_id: i64, target_id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM links WHERE source_ticket_id = ?1 AND target_ticket_id = ?2",
            params![source_id, target_id],
        )?;
        Ok(rows > 0)
    }

    /// Links where the ticket is either endpoint.
    pub fn get_links(&self, ticket_id: i64) -> Result<Vec<Link>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, link_type, source_ticket_id, target_ticket_id, created_at FROM links
             WHERE source_ticket_id = ?1 OR target_ticket_id = ?1 ORDER BY id",
        )?;
        let links = stmt
            .query_map([ticket_id], |row| {
                Ok(Link {
                    id: row.get(0)?,
                    link_type: row.get(1)?,
                    source_ticket_id: row.get(2)?,
                    target_ticket_id: row.get(3)?,
                    created_at: parse_datetime(row.get::<_, String>(4)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(links)
    }

    pub fn count_links(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;
        Ok(count)
    }

    // Tags
    pub fn add_tag(&self, ticket_id: i64, name: &str) -> Result<bool> {
        let result = self.conn.execute(
            "INSERT OR IGNORE INTO tags (ticket_id, name) VALUES (?1, ?2)",
            params![ticket_id, name],
        )?;
        Ok(result > 0)
    }

    pub fn remove_tag(&self, ticket_id: i64, name: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM tags WHERE ticket_id = ?1 AND name = ?2",
            params![ticket_id, name],
        )?;
        Ok(rows > 0)
    }

    pub fn get_tags(&self, ticket_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM tags WHERE ticket_id = ?1 ORDER BY name")?;
        let tags = stmt
            .query_map([ticket_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(tags)
    }

    // History
    pub fn add_history(
        &self,
        ticket_id: i64,
        attribute: &str,
        value_from: Option<&str>,
        value_to: Option<&str>,
        actor_id: i64,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO histories (ticket_id, attribute, value_from, value_to, created_by_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![ticket_id, attribute, value_from, value_to, actor_id, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_history(&self, ticket_id: i64) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ticket_id, attribute, value_from, value_to, created_by_id, created_at
             FROM histories WHERE ticket_id = ?1 ORDER BY id",
        )?;
        let entries = stmt
            .query_map([ticket_id], |row| {
                Ok(HistoryEntry {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    attribute: row.get(2)?,
                    value_from: row.get(3)?,
                    value_to: row.get(4)?,
                    created_by_id: row.get(5)?,
                    created_at: parse_datetime(row.get::<_, String>(6)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // Activity, notifications, views
    pub fn add_activity_stream(&self, ticket_id: i64, user_id: i64, verb: &str) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO activity_streams (ticket_id, user_id, verb, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![ticket_id, user_id, verb, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn add_online_notification(&self, ticket_id: i64, user_id: i64) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO online_notifications (ticket_id, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![ticket_id, user_id, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn add_recent_view(&self, ticket_id: i64, user_id: i64) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO recent_views (ticket_id, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![ticket_id, user_id, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn add_activity_log(&self, ticket_id: i64, user_id: i64, activity: &str) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO activity_logs (ticket_id, user_id, activity, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![ticket_id, user_id, activity, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

const USER_COLUMNS: &str =
    "id, login, email, firstname, lastname, organization_id, is_agent, is_customer, active, created_at";

const ARTICLE_COLUMNS: &str =
    "id, ticket_id, sender, from_addr, to_addr, subject, body, internal, created_by_id, created_at";

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        login: row.get(1)?,
        email: row.get(2)?,
        firstname: row.get(3)?,
        lastname: row.get(4)?,
        organization_id: row.get(5)?,
        is_agent: row.get(6)?,
        is_customer: row.get(7)?,
        active: row.get(8)?,
        group_access: BTreeMap::new(),
        created_at: parse_datetime(row.get::<_, String>(9)?),
    })
}

fn organization_from_row(row: &Row) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: row.get(0)?,
        name: row.get(1)?,
        shared: row.get(2)?,
        created_at: parse_datetime(row.get::<_, String>(3)?),
    })
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        sender: ArticleSender::parse(&row.get::<_, String>(2)?),
        from: row.get(3)?,
        to: row.get(4)?,
        subject: row.get(5)?,
        body: row.get(6)?,
        internal: row.get(7)?,
        created_by_id: row.get(8)?,
        created_at: parse_datetime(row.get::<_, String>(9)?),
    })
}

pub(crate) fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
