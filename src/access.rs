//! Read/full permission decisions for a user on a ticket.

use anyhow::Result;

use crate::db::Database;
use crate::models::{AccessLevel, Organization, Ticket, User};

/// Why access was granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Owner,
    Customer,
    Group(AccessLevel),
    SharedOrganization,
}

/// Evaluates the access rules in order and returns the first one that grants
/// `level`. `organization` is the ticket's organization, if it has one.
pub fn decide(
    ticket: &Ticket,
    user: &User,
    organization: Option<&Organization>,
    level: AccessLevel,
) -> Option<Grant> {
    if user.id == ticket.owner_id {
        return Some(Grant::Owner);
    }
    if user.id == ticket.customer_id {
        return Some(Grant::Customer);
    }
    if let Some(granted) = user.group_access.get(&ticket.group_id) {
        if *granted >= level {
            return Some(Grant::Group(*granted));
        }
    }
    if user.is_customer {
        if let (Some(org), Some(ticket_org)) = (organization, ticket.organization_id) {
            // Sharing grants both levels.
            if org.id == ticket_org && org.shared && user.organization_id == Some(org.id) {
                return Some(Grant::SharedOrganization);
            }
        }
    }
    None
}

pub fn access(
    ticket: &Ticket,
    user: &User,
    organization: Option<&Organization>,
    level: AccessLevel,
) -> bool {
    decide(ticket, user, organization, level).is_some()
}

impl Database {
    /// Loads ticket, user and organization, then applies `access`.
    pub fn ticket_access(&self, ticket_id: i64, user_id: i64, level: AccessLevel) -> Result<bool> {
        let ticket = self.find_ticket(ticket_id)?;
        let user = self.find_user(user_id)?;
        let organization = match ticket.organization_id {
            Some(id) => self.get_organization(id)?,
            None => None,
        };

        let grant = decide(&ticket, &user, organization.as_ref(), level);
        tracing::debug!(ticket_id, user_id, %level, ?grant, "access decision");
        Ok(grant.is_some())
    }
}
