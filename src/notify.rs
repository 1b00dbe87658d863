//! Notification dispatch for trigger batches.
//!
//! A batch captures a [`Snapshot`] once and hands it to every notification it
//! sends, so recipients and templates see the article that fired the trigger
//! even if more articles arrive while the batch runs.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::db::Database;
use crate::error::TicketError;
use crate::models::{
    AccessLevel, Article, Group, Organization, Ticket, TicketState, User, SYSTEM_USER_ID,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            other => Err(format!("unknown notification channel '{}'", other)),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symbolic recipients a trigger can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientRole {
    TicketOwner,
    TicketCustomer,
    TicketAgents,
    ArticleLastSender,
}

pub type RecipientResolver = fn(&Snapshot) -> Vec<i64>;

impl RecipientRole {
    pub fn resolver(self) -> RecipientResolver {
        match self {
            RecipientRole::TicketOwner => ticket_owner,
            RecipientRole::TicketCustomer => ticket_customer,
            RecipientRole::TicketAgents => ticket_agents,
            RecipientRole::ArticleLastSender => article_last_sender,
        }
    }
}

fn ticket_owner(snapshot: &Snapshot) -> Vec<i64> {
    vec![snapshot.ticket.ticket.owner_id]
}

fn ticket_customer(snapshot: &Snapshot) -> Vec<i64> {
    vec![snapshot.ticket.ticket.customer_id]
}

fn ticket_agents(snapshot: &Snapshot) -> Vec<i64> {
    snapshot.agents.clone()
}

fn article_last_sender(snapshot: &Snapshot) -> Vec<i64> {
    snapshot.article.iter().map(|a| a.created_by_id).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Role(RecipientRole),
    User(i64),
}

impl Recipient {
    pub fn resolve(self, snapshot: &Snapshot) -> Vec<i64> {
        match self {
            Recipient::Role(role) => (role.resolver())(snapshot),
            Recipient::User(id) => vec![id],
        }
    }
}

impl FromStr for Recipient {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "ticket_owner" => Ok(Recipient::Role(RecipientRole::TicketOwner)),
            "ticket_customer" => Ok(Recipient::Role(RecipientRole::TicketCustomer)),
            "ticket_agents" => Ok(Recipient::Role(RecipientRole::TicketAgents)),
            "article_last_sender" => Ok(Recipient::Role(RecipientRole::ArticleLastSender)),
            other => other
                .strip_prefix("userid_")
                .and_then(|id| id.parse::<i64>().ok())
                .map(Recipient::User)
                .ok_or_else(|| format!("unknown recipient '{}'", other)),
        }
    }
}

/// Ticket with the records templates commonly reach through it.
#[derive(Debug, Clone, Serialize)]
pub struct TicketView {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub state: Option<TicketState>,
    pub group: Option<Group>,
    pub owner: Option<User>,
    pub customer: Option<User>,
    pub organization: Option<Organization>,
}

/// Immutable view of the objects a trigger batch acts on.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub ticket: TicketView,
    pub article: Option<Article>,
    #[serde(skip)]
    pub agents: Vec<i64>,
}

impl Snapshot {
    /// Same article and agents, ticket view replaced.
    pub fn with_ticket(&self, ticket: TicketView) -> Snapshot {
        Snapshot {
            ticket,
            article: self.article.clone(),
            agents: self.agents.clone(),
        }
    }

    fn template_objects(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Database {
    pub fn ticket_view(&self, ticket_id: i64) -> Result<TicketView> {
        let ticket = self.find_ticket(ticket_id)?;
        let organization = match ticket.organization_id {
            Some(id) => self.get_organization(id)?,
            None => None,
        };
        Ok(TicketView {
            state: self.get_state(ticket.state_id)?,
            group: self.get_group(ticket.group_id)?,
            owner: self.get_user(ticket.owner_id)?,
            customer: self.get_user(ticket.customer_id)?,
            organization,
            ticket,
        })
    }

    /// Captures the snapshot for a batch. `article_id` names the article that
    /// fired the trigger and must belong to the ticket; without one the
    /// latest article at this moment is used.
    pub fn capture_snapshot(&self, ticket_id: i64, article_id: Option<i64>) -> Result<Snapshot> {
        let ticket = self.ticket_view(ticket_id)?;
        let article = match article_id {
            Some(id) => match self.get_article(id)? {
                Some(article) if article.ticket_id == ticket_id => Some(article),
                Some(article) => {
                    return Err(TicketError::validation(format!(
                        "article {} belongs to ticket #{}, not #{}",
                        id, article.ticket_id, ticket_id
                    ))
                    .into())
                }
                None => return Err(TicketError::not_found("Article", id).into()),
            },
            None => self.latest_article(ticket_id)?,
        };
        let agents = self.users_with_group_access(ticket.ticket.group_id, AccessLevel::Full)?;
        Ok(Snapshot {
            ticket,
            article,
            agents,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipientAddress {
    pub user_id: i64,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationObjects {
    pub ticket: Ticket,
    pub article: Option<Article>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationRequest {
    pub channel: Channel,
    pub subject: String,
    pub body: String,
    pub recipients: Vec<RecipientAddress>,
    pub objects: NotificationObjects,
}

/// Delivers notifications. Implementations may queue; from the caller's side
/// `dispatch` is synchronous.
pub trait Notifier {
    fn dispatch(&self, request: &NotificationRequest) -> Result<()>;
}

/// Writes each notification to the log instead of delivering it.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn dispatch(&self, request: &NotificationRequest) -> Result<()> {
        let to: Vec<String> = request
            .recipients
            .iter()
            .map(|r| r.email.clone().unwrap_or_else(|| format!("user#{}", r.user_id)))
            .collect();
        tracing::info!(
            channel = %request.channel,
            ticket_id = request.objects.ticket.id,
            article_id = ?request.objects.article.as_ref().map(|a| a.id),
            to = %to.join(", "),
            subject = %request.subject,
            "notification"
        );
        Ok(())
    }
}

/// Resolves recipients against the snapshot and loads their addresses.
/// Duplicates, the system user and inactive users are dropped; for email,
/// users without an address are dropped too.
pub(crate) fn resolve_recipients(
    db: &Database,
    channel: Channel,
    recipients: &[Recipient],
    snapshot: &Snapshot,
) -> Result<Vec<RecipientAddress>> {
    let mut seen = Vec::new();
    let mut addresses = Vec::new();
    for recipient in recipients {
        for user_id in recipient.resolve(snapshot) {
            if user_id == SYSTEM_USER_ID || seen.contains(&user_id) {
                continue;
            }
            seen.push(user_id);

            let Some(user) = db.get_user(user_id)? else {
                tracing::warn!(user_id, "notification recipient does not exist, skipped");
                continue;
            };
            if !user.active {
                continue;
            }
            if channel == Channel::Email && user.email.as_deref().unwrap_or("").is_empty() {
                tracing::warn!(user_id, "recipient has no email address, skipped");
                continue;
            }
            addresses.push(RecipientAddress {
                user_id,
                email: user.email,
            });
        }
    }
    Ok(addresses)
}

/// Expands `#{path.to.value}` placeholders against the snapshot. Paths that
/// resolve to nothing printable render as `-`.
pub fn render(template: &str, snapshot: &Snapshot) -> String {
    let objects = snapshot.template_objects();
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("#{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&lookup(&objects, after[..end].trim()));
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn lookup(objects: &Value, path: &str) -> String {
    let mut current = objects;
    for key in path.split('.') {
        match current.get(key) {
            Some(next) => current = next,
            None => return "-".to_string(),
        }
    }
    match current {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => "-".to_string(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every dispatched request for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<NotificationRequest>>,
    }

    impl RecordingNotifier {
        pub fn requests(&self) -> Vec<NotificationRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn dispatch(&self, request: &NotificationRequest) -> Result<()> {
            self.sent.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    /// Always fails, for error propagation tests.
    pub struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn dispatch(&self, _request: &NotificationRequest) -> Result<()> {
            anyhow::bail!("smtp unreachable")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewUser;
    use crate::models::NewArticle;
    use crate::ticket::NewTicket;
    use tempfile::tempdir;

    fn setup_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(&db_path).unwrap();
        (db, dir)
    }

    fn fixture(db: &Database) -> (i64, i64) {
        let org = db.create_organization("Acme", true).unwrap();
        let customer = db
            .create_user(&NewUser {
                login: "nicole",
                email: Some("nicole@example.com"),
                firstname: "Nicole",
                lastname: "Braun",
                organization_id: Some(org),
                is_customer: true,
                ..Default::default()
            })
            .unwrap();
        let ticket = db
            .create_ticket(&NewTicket::new("Welcome", 1, customer), SYSTEM_USER_ID)
            .unwrap();
        (ticket, customer)
    }

    #[test]
    fn test_recipient_parse() {
        assert_eq!(
            "ticket_owner".parse::<Recipient>(),
            Ok(Recipient::Role(RecipientRole::TicketOwner))
        );
        assert_eq!("userid_7".parse::<Recipient>(), Ok(Recipient::User(7)));
        assert!("everyone".parse::<Recipient>().is_err());
        assert!("userid_x".parse::<Recipient>().is_err());
    }

    #[test]
    fn test_render_interpolates_nested_fields() {
        let (db, _dir) = setup_test_db();
        let (ticket, _) = fixture(&db);
        let snapshot = db.capture_snapshot(ticket, None).unwrap();

        let rendered = render(
            "Hi #{ticket.customer.firstname}, #{ticket.title} is #{ticket.state.name} (#{ticket.organization.name})",
            &snapshot,
        );
        assert_eq!(rendered, "Hi Nicole, Welcome is new (Acme)");
    }

    #[test]
    fn test_render_missing_values() {
        let (db, _dir) = setup_test_db();
        let (ticket, _) = fixture(&db);
        let snapshot = db.capture_snapshot(ticket, None).unwrap();

        assert_eq!(render("#{article.body}", &snapshot), "-");
        assert_eq!(render("#{ticket.nope.deeper}", &snapshot), "-");
        assert_eq!(render("unterminated #{ticket.title", &snapshot), "unterminated #{ticket.title");
        assert_eq!(render("no placeholders", &snapshot), "no placeholders");
    }

    #[test]
    fn test_snapshot_uses_named_article() {
        let (db, _dir) = setup_test_db();
        let (ticket, _) = fixture(&db);
        let first = db.add_article(ticket, &NewArticle::note("first"), SYSTEM_USER_ID).unwrap();
        db.add_article(ticket, &NewArticle::note("second"), SYSTEM_USER_ID).unwrap();

        let named = db.capture_snapshot(ticket, Some(first)).unwrap();
        assert_eq!(named.article.unwrap().body, "first");

        let latest = db.capture_snapshot(ticket, None).unwrap();
        assert_eq!(latest.article.unwrap().body, "second");
    }

    #[test]
    fn test_snapshot_rejects_foreign_or_missing_article() {
        let (db, _dir) = setup_test_db();
        let (ticket, customer) = fixture(&db);
        let other = db
            .create_ticket(&NewTicket::new("Other", 1, customer), SYSTEM_USER_ID)
            .unwrap();
        let foreign = db
            .add_article(other, &NewArticle::note("private to other"), SYSTEM_USER_ID)
            .unwrap();

        let err = db.capture_snapshot(ticket, Some(foreign)).unwrap_err();
        assert!(matches!(crate::error::kind(&err), Some(TicketError::Validation { .. })));

        let err = db.capture_snapshot(ticket, Some(99999)).unwrap_err();
        assert!(matches!(
            crate::error::kind(&err),
            Some(TicketError::NotFound { entity: "Article", .. })
        ));
    }

    #[test]
    fn test_resolve_recipients_dedups_and_filters() {
        let (db, _dir) = setup_test_db();
        let (ticket, customer) = fixture(&db);
        let silent = db
            .create_user(&NewUser {
                login: "silent",
                is_agent: true,
                ..Default::default()
            })
            .unwrap();
        db.grant_group_access(silent, 1, AccessLevel::Full).unwrap();
        let snapshot = db.capture_snapshot(ticket, None).unwrap();

        let recipients = [
            Recipient::Role(RecipientRole::TicketCustomer),
            Recipient::User(customer),
            Recipient::Role(RecipientRole::TicketOwner),
            Recipient::Role(RecipientRole::TicketAgents),
        ];
        let email = resolve_recipients(&db, Channel::Email, &recipients, &snapshot).unwrap();
        assert_eq!(
            email,
            vec![RecipientAddress {
                user_id: customer,
                email: Some("nicole@example.com".to_string())
            }]
        );

        let sms = resolve_recipients(&db, Channel::Sms, &recipients, &snapshot).unwrap();
        let ids: Vec<i64> = sms.iter().map(|r| r.user_id).collect();
        assert_eq!(ids, vec![customer, silent]);
    }

    #[test]
    fn test_article_last_sender_without_article() {
        let (db, _dir) = setup_test_db();
        let (ticket, _) = fixture(&db);
        let snapshot = db.capture_snapshot(ticket, None).unwrap();
        assert!(Recipient::Role(RecipientRole::ArticleLastSender)
            .resolve(&snapshot)
            .is_empty());
    }
}
