use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::TicketError;

/// Id of the seeded system user (login `-`). Owns unassigned tickets and acts
/// for the CLI when no `--as` user is given.
pub const SYSTEM_USER_ID: i64 = 1;

pub const VALID_PRIORITIES: [&str; 3] = ["low", "normal", "high"];

pub fn validate_priority(priority: &str) -> bool {
    VALID_PRIORITIES.contains(&priority)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub number: String,
    pub title: String,
    pub group_id: i64,
    pub owner_id: i64,
    pub customer_id: i64,
    pub organization_id: Option<i64>,
    pub state_id: i64,
    pub priority: String,
    pub pending_time: Option<DateTime<Utc>>,
    pub merged_into_id: Option<i64>,
    pub created_by_id: i64,
    pub updated_by_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateType {
    New,
    Open,
    Pending,
    Closed,
    Merged,
    Removed,
}

impl StateType {
    pub fn as_str(self) -> &'static str {
        match self {
            StateType::New => "new",
            StateType::Open => "open",
            StateType::Pending => "pending",
            StateType::Closed => "closed",
            StateType::Merged => "merged",
            StateType::Removed => "removed",
        }
    }
}

impl FromStr for StateType {
    type Err = TicketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(StateType::New),
            "open" => Ok(StateType::Open),
            "pending" => Ok(StateType::Pending),
            "closed" => Ok(StateType::Closed),
            "merged" => Ok(StateType::Merged),
            "removed" => Ok(StateType::Removed),
            other => Err(TicketError::validation(format!(
                "unknown state type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketState {
    pub id: i64,
    pub name: String,
    pub state_type: StateType,
}

/// Permission level on a ticket. `Full` includes everything `Read` allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Full,
}

impl AccessLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::Read => "read",
            AccessLevel::Full => "full",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = TicketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(AccessLevel::Read),
            "full" => Ok(AccessLevel::Full),
            other => Err(TicketError::validation(format!(
                "invalid access level '{}'. Must be one of: read, full",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub email: Option<String>,
    pub firstname: String,
    pub lastname: String,
    pub organization_id: Option<i64>,
    pub is_agent: bool,
    pub is_customer: bool,
    pub active: bool,
    /// Group id -> granted level.
    pub group_access: BTreeMap<i64, AccessLevel>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn fullname(&self) -> String {
        format!("{} {}", self.firstname, self.lastname)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    /// Customers of a shared organization see each other's tickets.
    pub shared: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArticleSender {
    Customer,
    Agent,
    System,
}

impl ArticleSender {
    pub fn as_str(self) -> &'static str {
        match self {
            ArticleSender::Customer => "Customer",
            ArticleSender::Agent => "Agent",
            ArticleSender::System => "System",
        }
    }

    pub(crate) fn parse(s: &str) -> Self {
        match s {
            "Customer" => ArticleSender::Customer,
            "Agent" => ArticleSender::Agent,
            _ => ArticleSender::System,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub ticket_id: i64,
    pub sender: ArticleSender,
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    pub internal: bool,
    pub created_by_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Fields of a new article; the ticket and author are passed alongside.
#[derive(Debug, Clone)]
pub struct NewArticle<'a> {
    pub sender: ArticleSender,
    pub from: Option<&'a str>,
    pub to: Option<&'a str>,
    pub subject: Option<&'a str>,
    pub body: &'a str,
    pub internal: bool,
}

impl<'a> NewArticle<'a> {
    pub fn note(body: &'a str) -> Self {
        NewArticle {
            sender: ArticleSender::Agent,
            from: None,
            to: None,
            subject: None,
            body,
            internal: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: i64,
    pub link_type: String,
    pub source_ticket_id: i64,
    pub target_ticket_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub ticket_id: i64,
    pub article_id: Option<i64>,
    pub store_file_id: i64,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub ticket_id: i64,
    pub attribute: String,
    pub value_from: Option<String>,
    pub value_to: Option<String>,
    pub created_by_id: i64,
    pub created_at: DateTime<Utc>,
}
