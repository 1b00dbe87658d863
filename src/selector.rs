//! Ticket search over ticket, article, customer and organization fields.
//!
//! A selector maps dotted field paths to conditions:
//!
//! ```json
//! {
//!   "ticket.state_id": { "operator": "is", "value": [1, 2] },
//!   "article.from":    { "operator": "contains", "value": "@example.com" }
//! }
//! ```
//!
//! All conditions must hold. Tickets are returned once even when several of
//! their articles match.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::access::access;
use crate::db::Database;
use crate::error::TicketError;
use crate::models::{AccessLevel, Organization, Ticket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "is")]
    Is,
    #[serde(rename = "is not")]
    IsNot,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "contains not")]
    ContainsNot,
    #[serde(rename = "starts with")]
    StartsWith,
    #[serde(rename = "ends with")]
    EndsWith,
    #[serde(rename = "before")]
    Before,
    #[serde(rename = "after")]
    After,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(operator: Operator, value: impl Into<Value>) -> Self {
        Condition {
            operator,
            value: value.into(),
        }
    }
}

pub type Selector = BTreeMap<String, Condition>;

/// Parses a selector from JSON. Malformed input, including an unknown
/// operator, is a validation error.
pub fn parse_selector(json: &str) -> Result<Selector> {
    serde_json::from_str(json)
        .map_err(|e| TicketError::validation(format!("invalid selector: {}", e)).into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Join {
    Article,
    Customer,
    Organization,
}

impl Join {
    fn sql(self) -> &'static str {
        match self {
            Join::Article => "LEFT JOIN articles a ON a.ticket_id = t.id",
            Join::Customer => "LEFT JOIN users c ON c.id = t.customer_id",
            Join::Organization => "LEFT JOIN organizations o ON o.id = t.organization_id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Text,
    Integer,
    Flag,
    Time,
}

struct Field {
    column: &'static str,
    kind: Kind,
    join: Option<Join>,
}

fn field(path: &str) -> Option<Field> {
    let (column, kind, join) = match path {
        "ticket.id" => ("t.id", Kind::Integer, None),
        "ticket.number" => ("t.number", Kind::Text, None),
        "ticket.title" => ("t.title", Kind::Text, None),
        "ticket.state_id" => ("t.state_id", Kind::Integer, None),
        "ticket.group_id" => ("t.group_id", Kind::Integer, None),
        "ticket.owner_id" => ("t.owner_id", Kind::Integer, None),
        "ticket.customer_id" => ("t.customer_id", Kind::Integer, None),
        "ticket.organization_id" => ("t.organization_id", Kind::Integer, None),
        "ticket.priority" => ("t.priority", Kind::Text, None),
        "ticket.pending_time" => ("t.pending_time", Kind::Time, None),
        "ticket.created_at" => ("t.created_at", Kind::Time, None),
        "article.from" => ("a.from_addr", Kind::Text, Some(Join::Article)),
        "article.to" => ("a.to_addr", Kind::Text, Some(Join::Article)),
        "article.subject" => ("a.subject", Kind::Text, Some(Join::Article)),
        "article.body" => ("a.body", Kind::Text, Some(Join::Article)),
        "article.sender" => ("a.sender", Kind::Text, Some(Join::Article)),
        "article.internal" => ("a.internal", Kind::Flag, Some(Join::Article)),
        "customer.login" => ("c.login", Kind::Text, Some(Join::Customer)),
        "customer.email" => ("c.email", Kind::Text, Some(Join::Customer)),
        "customer.firstname" => ("c.firstname", Kind::Text, Some(Join::Customer)),
        "customer.lastname" => ("c.lastname", Kind::Text, Some(Join::Customer)),
        "organization.name" => ("o.name", Kind::Text, Some(Join::Organization)),
        "organization.shared" => ("o.shared", Kind::Flag, Some(Join::Organization)),
        _ => return None,
    };
    Some(Field { column, kind, join })
}

fn invalid(path: &str, reason: impl std::fmt::Display) -> anyhow::Error {
    TicketError::validation(format!("condition on '{}': {}", path, reason)).into()
}

fn scalar(path: &str, kind: Kind, value: &Value) -> Result<SqlValue> {
    let converted = match (kind, value) {
        (Kind::Integer, Value::Number(n)) => n.as_i64().map(SqlValue::Integer),
        (Kind::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(SqlValue::Integer),
        (Kind::Flag, Value::Bool(b)) => Some(SqlValue::Integer(i64::from(*b))),
        (Kind::Flag, Value::Number(n)) => n.as_i64().map(|i| SqlValue::Integer(i64::from(i != 0))),
        (Kind::Text, Value::String(s)) => Some(SqlValue::Text(s.clone())),
        (Kind::Text, Value::Number(n)) => Some(SqlValue::Text(n.to_string())),
        (Kind::Time, Value::String(s)) => Some(SqlValue::Text(normalize_time(path, s)?)),
        _ => None,
    };
    converted.ok_or_else(|| invalid(path, format!("unsupported value {}", value)))
}

/// Stored timestamps are UTC RFC 3339 text, which orders chronologically.
fn normalize_time(path: &str, s: &str) -> Result<String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc).to_rfc3339())
        .map_err(|_| invalid(path, format!("'{}' is not an RFC 3339 time", s)))
}

fn like_pattern(path: &str, value: &Value, prefix: &str, suffix: &str) -> Result<SqlValue> {
    let Some(text) = value.as_str() else {
        return Err(invalid(path, "expected a string"));
    };
    let escaped = text
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    Ok(SqlValue::Text(format!("{}{}{}", prefix, escaped, suffix)))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Builds the SQL for one condition, pushing its parameters.
fn clause(path: &str, condition: &Condition, params: &mut Vec<SqlValue>) -> Result<(String, Option<Join>)> {
    let Some(field) = field(path) else {
        return Err(invalid(path, "unknown field"));
    };
    let col = field.column;

    let sql = match condition.operator {
        Operator::Is | Operator::IsNot => {
            let negate = condition.operator == Operator::IsNot;
            match &condition.value {
                Value::Null if negate => format!("{} IS NOT NULL", col),
                Value::Null => format!("{} IS NULL", col),
                Value::Array(items) => {
                    if items.is_empty() {
                        return Err(invalid(path, "empty value list"));
                    }
                    for item in items {
                        params.push(scalar(path, field.kind, item)?);
                    }
                    if negate {
                        format!("({} IS NULL OR {} NOT IN ({}))", col, col, placeholders(items.len()))
                    } else {
                        format!("{} IN ({})", col, placeholders(items.len()))
                    }
                }
                value => {
                    params.push(scalar(path, field.kind, value)?);
                    if negate {
                        format!("({} IS NULL OR {} != ?)", col, col)
                    } else {
                        format!("{} = ?", col)
                    }
                }
            }
        }
        Operator::Contains | Operator::ContainsNot | Operator::StartsWith | Operator::EndsWith => {
            if field.kind != Kind::Text {
                return Err(invalid(path, "text operator on a non-text field"));
            }
            let (prefix, suffix) = match condition.operator {
                Operator::StartsWith => ("", "%"),
                Operator::EndsWith => ("%", ""),
                _ => ("%", "%"),
            };
            params.push(like_pattern(path, &condition.value, prefix, suffix)?);
            if condition.operator == Operator::ContainsNot {
                format!("({} IS NULL OR {} NOT LIKE ? ESCAPE '\\')", col, col)
            } else {
                format!("{} LIKE ? ESCAPE '\\'", col)
            }
        }
        Operator::Before | Operator::After => {
            if field.kind != Kind::Time {
                return Err(invalid(path, "time operator on a non-time field"));
            }
            params.push(scalar(path, field.kind, &condition.value)?);
            let cmp = if condition.operator == Operator::Before { "<" } else { ">" };
            format!("{} {} ?", col, cmp)
        }
    };
    Ok((sql, field.join))
}

impl Database {
    /// Returns the number of matching tickets and the requested page of them.
    ///
    /// With `permission`, only tickets the user may access at that level are
    /// counted and returned. Tickets are ordered newest first.
    pub fn select_tickets(
        &self,
        selector: &Selector,
        limit: usize,
        offset: usize,
        permission: Option<(i64, AccessLevel)>,
    ) -> Result<(usize, Vec<Ticket>)> {
        let mut clauses = Vec::new();
        let mut joins = Vec::new();
        let mut params = Vec::new();
        for (path, condition) in selector {
            let (sql, join) = clause(path, condition, &mut params)?;
            clauses.push(sql);
            if let Some(join) = join {
                if !joins.contains(&join) {
                    joins.push(join);
                }
            }
        }
        joins.sort();

        let mut from = String::from("FROM tickets t");
        for join in &joins {
            from.push(' ');
            from.push_str(join.sql());
        }
        if !clauses.is_empty() {
            from.push_str(" WHERE ");
            from.push_str(&clauses.join(" AND "));
        }

        let Some((user_id, level)) = permission else {
            // No per-ticket check: SQL counts and pages directly.
            let count: i64 = self.conn().query_row(
                &format!("SELECT COUNT(DISTINCT t.id) {}", from),
                rusqlite::params_from_iter(params.iter()),
                |row| row.get(0),
            )?;
            let sql = format!(
                "SELECT DISTINCT t.id {} ORDER BY t.id DESC LIMIT {} OFFSET {}",
                from,
                limit.min(i64::MAX as usize),
                offset.min(i64::MAX as usize)
            );
            tracing::debug!(%sql, "ticket selector");
            let ids = self.select_ids(&sql, &params)?;
            return Ok((count as usize, self.get_tickets(&ids)?));
        };

        let sql = format!("SELECT DISTINCT t.id {} ORDER BY t.id DESC", from);
        tracing::debug!(%sql, user_id, %level, "ticket selector");
        let ids = self.select_ids(&sql, &params)?;

        let user = self.find_user(user_id)?;
        let mut organizations: HashMap<i64, Option<Organization>> = HashMap::new();
        let mut visible = Vec::new();
        for ticket in self.get_tickets(&ids)? {
            let organization = match ticket.organization_id {
                Some(id) => {
                    if !organizations.contains_key(&id) {
                        organizations.insert(id, self.get_organization(id)?);
                    }
                    organizations.get(&id).and_then(Option::as_ref)
                }
                None => None,
            };
            if access(&ticket, &user, organization, level) {
                visible.push(ticket);
            }
        }

        let count = visible.len();
        let page = visible.into_iter().skip(offset).take(limit).collect();
        Ok((count, page))
    }

    fn select_ids(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<i64>> {
        let mut stmt = self.conn().prepare(sql)?;
        let ids = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}
