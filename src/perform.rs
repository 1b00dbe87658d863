//! Applies trigger actions ("perform changes") to a ticket.
//!
//! A batch maps dotted keys to parameter records:
//!
//! ```json
//! {
//!   "ticket.state_id":    { "value": "4" },
//!   "ticket.tags":        { "operator": "add", "value": "vip, escalated" },
//!   "notification.email": { "recipient": ["ticket_customer"], "subject": "...", "body": "..." },
//!   "ticket.action":      { "value": "delete" }
//! }
//! ```
//!
//! Attribute, tag and note actions run first, in key order, and are saved
//! through [`Database::save_ticket`]. Notifications follow, then deletion.
//! Unknown keys are logged and skipped.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::db::Database;
use crate::error::TicketError;
use crate::models::{validate_priority, ArticleSender, NewArticle, Ticket, VALID_PRIORITIES};
use crate::notify::{
    render, resolve_recipients, Channel, NotificationObjects, NotificationRequest, Notifier,
    Recipient,
};

pub type Actions = BTreeMap<String, Value>;

/// What happens to changes already applied when a later action fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchPolicy {
    /// Earlier changes stay committed; the batch stops at the failure.
    #[default]
    BestEffort,
    /// The whole batch runs in one savepoint and is rolled back on failure.
    Atomic,
}

/// The trigger a batch belongs to.
#[derive(Debug, Clone, Copy)]
pub struct TriggerContext<'a> {
    pub name: &'a str,
}

/// The object whose change fired the trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceObject {
    Ticket(i64),
    Article(i64),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerformOutcome {
    /// Ticket attributes that were set.
    pub changed: Vec<String>,
    /// Keys that were not understood.
    pub skipped: Vec<String>,
    pub notifications: usize,
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attribute {
    Title,
    StateId,
    Priority,
    OwnerId,
    CustomerId,
    GroupId,
    PendingTime,
}

impl Attribute {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "title" => Some(Attribute::Title),
            "state_id" => Some(Attribute::StateId),
            "priority" => Some(Attribute::Priority),
            "owner_id" => Some(Attribute::OwnerId),
            "customer_id" => Some(Attribute::CustomerId),
            "group_id" => Some(Attribute::GroupId),
            "pending_time" => Some(Attribute::PendingTime),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Attribute::Title => "title",
            Attribute::StateId => "state_id",
            Attribute::Priority => "priority",
            Attribute::OwnerId => "owner_id",
            Attribute::CustomerId => "customer_id",
            Attribute::GroupId => "group_id",
            Attribute::PendingTime => "pending_time",
        }
    }
}

#[derive(Debug, Clone)]
enum Change {
    Set(Attribute, Value),
    AddTags(Vec<String>),
    RemoveTags(Vec<String>),
    Note {
        subject: Option<String>,
        body: String,
        internal: bool,
    },
}

#[derive(Debug, Clone)]
struct NotificationAction {
    key: String,
    channel: Channel,
    subject: String,
    body: String,
    recipients: Vec<Recipient>,
}

/// The engine's private, parsed copy of a batch.
#[derive(Debug, Default)]
struct Plan {
    changes: Vec<(String, Change)>,
    notifications: Vec<NotificationAction>,
    delete: bool,
    skipped: Vec<String>,
}

impl Plan {
    fn from_actions(actions: &Actions, trigger: &str) -> Plan {
        let mut plan = Plan::default();
        for (key, params) in actions {
            if !plan.add(key, params) {
                tracing::warn!(trigger, key = %key, "unrecognized action, skipped");
                plan.skipped.push(key.clone());
            }
        }
        plan
    }

    /// Returns `false` when the key is not understood.
    fn add(&mut self, key: &str, params: &Value) -> bool {
        let Some((object, attribute)) = key.split_once('.') else {
            return false;
        };

        match (object, attribute) {
            ("ticket", "action") => match param_value(params).as_str() {
                Some("delete") => {
                    self.delete = true;
                    true
                }
                _ => false,
            },
            ("ticket", "tags") => {
                let names = split_tags(param_value(params));
                match params.get("operator").and_then(Value::as_str).unwrap_or("add") {
                    "add" => self.changes.push((key.to_string(), Change::AddTags(names))),
                    "remove" => self.changes.push((key.to_string(), Change::RemoveTags(names))),
                    _ => return false,
                }
                true
            }
            ("ticket", name) => match Attribute::parse(name) {
                Some(attribute) => {
                    self.changes
                        .push((key.to_string(), Change::Set(attribute, params.clone())));
                    true
                }
                None => false,
            },
            ("article", "note") => {
                let Some(body) = params.get("body").and_then(Value::as_str) else {
                    return false;
                };
                self.changes.push((
                    key.to_string(),
                    Change::Note {
                        subject: params
                            .get("subject")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        body: body.to_string(),
                        internal: params.get("internal").and_then(Value::as_bool).unwrap_or(true),
                    },
                ));
                true
            }
            ("notification", channel) => {
                let Ok(channel) = channel.parse::<Channel>() else {
                    return false;
                };
                let recipients = parse_recipients(params.get("recipient"), key);
                self.notifications.push(NotificationAction {
                    key: key.to_string(),
                    channel,
                    subject: string_param(params, "subject"),
                    body: string_param(params, "body"),
                    recipients,
                });
                true
            }
            _ => false,
        }
    }
}

/// `{"value": X}` yields X; a bare value is taken as is.
fn param_value(params: &Value) -> &Value {
    match params {
        Value::Object(map) => map.get("value").unwrap_or(&Value::Null),
        other => other,
    }
}

fn string_param(params: &Value, name: &str) -> String {
    params
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn split_tags(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    raw.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn parse_recipients(value: Option<&Value>, key: &str) -> Vec<Recipient> {
    let names: Vec<&str> = match value {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    names
        .into_iter()
        .filter_map(|name| match name.parse::<Recipient>() {
            Ok(recipient) => Some(recipient),
            Err(reason) => {
                tracing::warn!(key, %reason, "recipient skipped");
                None
            }
        })
        .collect()
}

/// Accepts integers and integer strings.
fn coerce_id(value: &Value, attribute: Attribute) -> Result<i64> {
    let id = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Null => {
            return Err(TicketError::validation(format!("{} can't be blank", attribute.name())).into())
        }
        _ => None,
    };
    id.ok_or_else(|| {
        TicketError::validation(format!("{} must be an id, got {}", attribute.name(), value)).into()
    })
}

fn coerce_pending_time(params: &Value) -> Result<Option<DateTime<Utc>>> {
    if params.get("operator").and_then(Value::as_str) == Some("relative") {
        let amount = coerce_id(param_value(params), Attribute::PendingTime)?;
        let range = params.get("range").and_then(Value::as_str).unwrap_or("minute");
        let offset = match range {
            "minute" => Duration::minutes(amount),
            "hour" => Duration::hours(amount),
            "day" => Duration::days(amount),
            other => {
                return Err(TicketError::validation(format!(
                    "pending_time range must be minute, hour or day, got '{}'",
                    other
                ))
                .into())
            }
        };
        return Ok(Some(Utc::now() + offset));
    }

    match param_value(params) {
        Value::Null => Ok(None),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| {
                TicketError::validation(format!("pending_time '{}' is not an RFC 3339 time", s))
                    .into()
            }),
        other => Err(TicketError::validation(format!(
            "pending_time must be a timestamp, got {}",
            other
        ))
        .into()),
    }
}

pub struct RuleEngine<'a> {
    db: &'a Database,
    notifier: &'a dyn Notifier,
    policy: BatchPolicy,
}

impl<'a> RuleEngine<'a> {
    pub fn new(db: &'a Database, notifier: &'a dyn Notifier) -> Self {
        RuleEngine {
            db,
            notifier,
            policy: BatchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Applies `actions` to the ticket on behalf of `actor_id`.
    ///
    /// `actions` is only read. A failing action stops the batch and its error
    /// is returned; see [`BatchPolicy`] for what happens to earlier changes.
    pub fn perform_changes(
        &self,
        ticket_id: i64,
        actions: &Actions,
        context: &TriggerContext,
        source: Option<SourceObject>,
        actor_id: i64,
    ) -> Result<PerformOutcome> {
        match self.policy {
            BatchPolicy::Atomic => self.db.transaction("perform_changes", |_| {
                self.run_batch(ticket_id, actions, context, source, actor_id)
            }),
            BatchPolicy::BestEffort => self.run_batch(ticket_id, actions, context, source, actor_id),
        }
    }

    fn run_batch(
        &self,
        ticket_id: i64,
        actions: &Actions,
        context: &TriggerContext,
        source: Option<SourceObject>,
        actor_id: i64,
    ) -> Result<PerformOutcome> {
        let plan = Plan::from_actions(actions, context.name);
        let mut outcome = PerformOutcome {
            skipped: plan.skipped.clone(),
            ..Default::default()
        };

        let article_id = match source {
            Some(SourceObject::Article(id)) => Some(id),
            Some(SourceObject::Ticket(_)) | None => None,
        };
        let snapshot = self
            .db
            .capture_snapshot(ticket_id, article_id)
            .with_context(|| format!("Trigger '{}' cannot load ticket #{}", context.name, ticket_id))?;

        let mut ticket = snapshot.ticket.ticket.clone();
        let mut dirty = false;
        for (key, change) in &plan.changes {
            let applied = self.apply(&mut ticket, change, actor_id);
            if let Err(err) = applied {
                tracing::warn!(trigger = context.name, key = %key, error = %err, "action failed, batch halted");
                let mut err = err.context(format!("Trigger '{}' failed on '{}'", context.name, key));
                if dirty {
                    if let Err(save_err) = self.db.save_ticket(&mut ticket, actor_id) {
                        tracing::error!(trigger = context.name, ticket_id, error = %save_err, "earlier changes not saved");
                        err = err.context(format!("earlier changes were not saved either: {}", save_err));
                    }
                }
                return Err(err);
            }
            if let Change::Set(attribute, _) = change {
                dirty = true;
                outcome.changed.push(attribute.name().to_string());
            }
        }
        if dirty {
            self.db
                .save_ticket(&mut ticket, actor_id)
                .with_context(|| format!("Trigger '{}' failed to save ticket #{}", context.name, ticket_id))?;
        }

        // Notifications see this batch's attribute changes but keep the
        // article captured at batch start.
        let snapshot = if dirty || !plan.changes.is_empty() {
            snapshot.with_ticket(self.db.ticket_view(ticket_id)?)
        } else {
            snapshot
        };
        for notification in &plan.notifications {
            let recipients =
                resolve_recipients(self.db, notification.channel, &notification.recipients, &snapshot)?;
            if recipients.is_empty() {
                tracing::warn!(trigger = context.name, key = %notification.key, "no recipients, notification skipped");
                continue;
            }

            let request = NotificationRequest {
                channel: notification.channel,
                subject: render(&notification.subject, &snapshot),
                body: render(&notification.body, &snapshot),
                recipients,
                objects: NotificationObjects {
                    ticket: snapshot.ticket.ticket.clone(),
                    article: snapshot.article.clone(),
                },
            };
            self.notifier
                .dispatch(&request)
                .with_context(|| format!("Trigger '{}' failed to dispatch '{}'", context.name, notification.key))?;

            let delivered_to: Vec<String> = request
                .recipients
                .iter()
                .map(|r| r.email.clone().unwrap_or_else(|| r.user_id.to_string()))
                .collect();
            self.db.add_history(
                ticket_id,
                &notification.key,
                None,
                Some(&delivered_to.join(", ")),
                actor_id,
            )?;
            outcome.notifications += 1;
        }

        if plan.delete {
            self.db.destroy_ticket(ticket_id)?;
            outcome.deleted = true;
        }

        tracing::info!(
            trigger = context.name,
            ticket_id,
            changed = outcome.changed.len(),
            notifications = outcome.notifications,
            deleted = outcome.deleted,
            skipped = outcome.skipped.len(),
            "trigger performed"
        );
        Ok(outcome)
    }

    /// Validates and applies one change. `ticket` is only modified when the
    /// change is valid.
    fn apply(&self, ticket: &mut Ticket, change: &Change, actor_id: i64) -> Result<()> {
        match change {
            Change::Set(attribute, params) => self.set_attribute(ticket, *attribute, params),
            Change::AddTags(names) => {
                for name in names {
                    self.db.add_tag(ticket.id, name)?;
                }
                Ok(())
            }
            Change::RemoveTags(names) => {
                for name in names {
                    self.db.remove_tag(ticket.id, name)?;
                }
                Ok(())
            }
            Change::Note {
                subject,
                body,
                internal,
            } => {
                let article = NewArticle {
                    sender: ArticleSender::System,
                    from: None,
                    to: None,
                    subject: subject.as_deref(),
                    body,
                    internal: *internal,
                };
                self.db.add_article(ticket.id, &article, actor_id)?;
                Ok(())
            }
        }
    }

    fn set_attribute(&self, ticket: &mut Ticket, attribute: Attribute, params: &Value) -> Result<()> {
        let value = param_value(params);
        match attribute {
            Attribute::Title => match value.as_str() {
                Some(title) if !title.trim().is_empty() => ticket.title = title.to_string(),
                _ => return Err(TicketError::validation("title can't be blank").into()),
            },
            Attribute::StateId => {
                let id = coerce_id(value, attribute)?;
                if self.db.get_state(id)?.is_none() {
                    return Err(TicketError::validation(format!(
                        "state_id {} does not reference a ticket state",
                        id
                    ))
                    .into());
                }
                ticket.state_id = id;
            }
            Attribute::Priority => match value.as_str() {
                Some(priority) if validate_priority(priority) => {
                    ticket.priority = priority.to_string()
                }
                _ => {
                    return Err(TicketError::validation(format!(
                        "invalid priority {}. Must be one of: {}",
                        value,
                        VALID_PRIORITIES.join(", ")
                    ))
                    .into())
                }
            },
            Attribute::OwnerId => {
                let id = coerce_id(value, attribute)?;
                self.db.find_user(id)?;
                ticket.owner_id = id;
            }
            Attribute::CustomerId => {
                let id = coerce_id(value, attribute)?;
                self.db.find_user(id)?;
                ticket.customer_id = id;
            }
            Attribute::GroupId => {
                let id = coerce_id(value, attribute)?;
                if self.db.get_group(id)?.is_none() {
                    return Err(TicketError::not_found("Group", id).into());
                }
                ticket.group_id = id;
            }
            Attribute::PendingTime => ticket.pending_time = coerce_pending_time(params)?,
        }
        Ok(())
    }
}
