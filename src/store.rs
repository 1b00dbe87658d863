//! Content-addressed attachment storage.
//!
//! Payloads live once in `store_files`, keyed by their SHA-256, with an
//! explicit reference count. Each `attachments` row holds one reference.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::db::Database;
use crate::models::Attachment;

pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

impl Database {
    /// Stores `data` (or reuses an identical payload) and takes one reference.
    fn retain_content(&self, data: &[u8]) -> Result<i64> {
        let hash = content_hash(data);
        let existing: Option<i64> = self
            .conn()
            .query_row(
                "SELECT id FROM store_files WHERE sha256 = ?1",
                [&hash],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                self.conn().execute(
                    "UPDATE store_files SET ref_count = ref_count + 1 WHERE id = ?1",
                    [id],
                )?;
                Ok(id)
            }
            None => {
                self.conn().execute(
                    "INSERT INTO store_files (sha256, size, data, ref_count) VALUES (?1, ?2, ?3, 1)",
                    params![hash, data.len() as i64, data],
                )?;
                Ok(self.conn().last_insert_rowid())
            }
        }
    }

    pub fn add_attachment(
        &self,
        ticket_id: i64,
        article_id: Option<i64>,
        filename: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<i64> {
        self.transaction("add_attachment", |db| {
            let store_file_id = db.retain_content(data)?;
            db.conn()
                .execute(
                    "INSERT INTO attachments (ticket_id, article_id, store_file_id, filename, content_type, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        ticket_id,
                        article_id,
                        store_file_id,
                        filename,
                        content_type,
                        Utc::now().to_rfc3339()
                    ],
                )
                .with_context(|| format!("Failed to attach '{}' to ticket #{}", filename, ticket_id))?;
            Ok(db.conn().last_insert_rowid())
        })
    }

    pub fn get_attachments(&self, ticket_id: i64) -> Result<Vec<Attachment>> {
        let mut stmt = self.conn().prepare(
            "SELECT a.id, a.ticket_id, a.article_id, a.store_file_id, a.filename, a.content_type, f.size, f.sha256
             FROM attachments a JOIN store_files f ON f.id = a.store_file_id
             WHERE a.ticket_id = ?1 ORDER BY a.id",
        )?;
        let attachments = stmt
            .query_map([ticket_id], |row| {
                Ok(Attachment {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    article_id: row.get(2)?,
                    store_file_id: row.get(3)?,
                    filename: row.get(4)?,
                    content_type: row.get(5)?,
                    size: row.get(6)?,
                    sha256: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(attachments)
    }

    pub fn attachment_content(&self, attachment_id: i64) -> Result<Option<Vec<u8>>> {
        let data = self
            .conn()
            .query_row(
                "SELECT f.data FROM attachments a JOIN store_files f ON f.id = a.store_file_id WHERE a.id = ?1",
                [attachment_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data)
    }

    /// Number of physically stored payloads.
    pub fn store_file_count(&self) -> Result<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM store_files", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Drops the ticket's attachment rows, releasing one store reference per
    /// row and deleting payloads nobody references any more. Returns how many
    /// payloads were freed.
    pub(crate) fn release_ticket_attachments(&self, ticket_id: i64) -> Result<usize> {
        let store_ids: Vec<i64> = {
            let mut stmt = self
                .conn()
                .prepare("SELECT store_file_id FROM attachments WHERE ticket_id = ?1")?;
            let ids = stmt
                .query_map([ticket_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            ids
        };

        self.conn()
            .execute("DELETE FROM attachments WHERE ticket_id = ?1", [ticket_id])?;
        for store_id in &store_ids {
            self.conn().execute(
                "UPDATE store_files SET ref_count = ref_count - 1 WHERE id = ?1",
                [store_id],
            )?;
        }
        let freed = self
            .conn()
            .execute("DELETE FROM store_files WHERE ref_count <= 0", [])?;
        Ok(freed)
    }
}
