//! Turns a raw RFC 5322 message into a ticket, its first article and its
//! attachments.

use anyhow::{Context, Result};
use mailparse::{addrparse, parse_mail, DispositionType, MailAddr, MailHeaderMap, ParsedMail};

use crate::db::{Database, NewUser};
use crate::error::TicketError;
use crate::models::{ArticleSender, NewArticle};
use crate::ticket::NewTicket;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub ticket_id: i64,
    pub article_id: i64,
    pub customer_id: i64,
    pub attachment_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAttachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// The parts of a message the ticket core cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    pub from: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub to: Option<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<MailAttachment>,
}

pub fn parse_message(raw: &[u8]) -> Result<ParsedMessage> {
    let parsed = parse_mail(raw).context("Failed to parse email")?;
    let headers = parsed.get_headers();

    let from = headers
        .get_first_value("From")
        .ok_or_else(|| TicketError::validation("email has no From header"))?;
    let (from_email, from_name) = sender_address(&from)?;

    let mut message = ParsedMessage {
        from,
        from_email,
        from_name,
        to: headers.get_first_value("To"),
        subject: headers.get_first_value("Subject").unwrap_or_default(),
        ..Default::default()
    };

    let mut html = None;
    collect_parts(&parsed, &mut message, &mut html)?;
    if message.body.is_empty() {
        message.body = html.unwrap_or_default();
    }
    Ok(message)
}

fn sender_address(from: &str) -> Result<(String, Option<String>)> {
    let list = addrparse(from).with_context(|| format!("Invalid From header '{}'", from))?;
    let single = list.iter().find_map(|addr| match addr {
        MailAddr::Single(info) => Some(info.clone()),
        MailAddr::Group(group) => group.addrs.first().cloned(),
    });
    match single {
        Some(info) if info.addr.contains('@') => Ok((info.addr, info.display_name)),
        _ => Err(TicketError::validation(format!("From header '{}' has no address", from)).into()),
    }
}

fn collect_parts(part: &ParsedMail, message: &mut ParsedMessage, html: &mut Option<String>) -> Result<()> {
    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned();

    if disposition.disposition == DispositionType::Attachment || filename.is_some() {
        let number = message.attachments.len() + 1;
        message.attachments.push(MailAttachment {
            filename: filename.unwrap_or_else(|| format!("attachment-{}", number)),
            content_type: part.ctype.mimetype.clone(),
            data: part.get_body_raw().context("Failed to decode attachment")?,
        });
        return Ok(());
    }

    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_parts(sub, message, html)?;
        }
        return Ok(());
    }

    match part.ctype.mimetype.as_str() {
        "text/plain" if message.body.is_empty() => {
            message.body = part.get_body().context("Failed to decode email body")?;
        }
        "text/html" if html.is_none() => {
            *html = Some(part.get_body().context("Failed to decode email body")?);
        }
        _ => {}
    }
    Ok(())
}

impl Database {
    /// Creates a ticket from a raw email in `group_name`.
    ///
    /// The sender becomes the customer, created on first contact. Attachment
    /// payloads go through the content store, so ingesting the same message
    /// twice stores each distinct payload once.
    pub fn ingest_email(&self, raw: &[u8], group_name: &str) -> Result<Ingested> {
        let message = parse_message(raw)?;

        self.transaction("ingest_email", |db| {
            let group = db
                .find_group_by_name(group_name)?
                .ok_or_else(|| TicketError::not_found("Group", group_name))?;

            let customer_id = match db.sender_account(&message.from_email)? {
                Some(id) => id,
                None => {
                    let display = message.from_name.clone().unwrap_or_default();
                    let (firstname, lastname) = display.trim().split_once(' ').unwrap_or((display.trim(), ""));
                    let login = db.unused_login(&message.from_email.to_lowercase())?;
                    let id = db.create_user(&NewUser {
                        login: &login,
                        email: Some(&message.from_email),
                        firstname,
                        lastname,
                        is_customer: true,
                        ..Default::default()
                    })?;
                    tracing::info!(user_id = id, email = %message.from_email, "customer created from email");
                    id
                }
            };

            let ticket_id = db.create_ticket(&NewTicket::new(&message.subject, group.id, customer_id), customer_id)?;
            let article_id = db.add_article(
                ticket_id,
                &NewArticle {
                    sender: ArticleSender::Customer,
                    from: Some(&message.from),
                    to: message.to.as_deref(),
                    subject: Some(&message.subject),
                    body: &message.body,
                    internal: false,
                },
                customer_id,
            )?;

            let mut attachment_ids = Vec::with_capacity(message.attachments.len());
            for attachment in &message.attachments {
                attachment_ids.push(db.add_attachment(
                    ticket_id,
                    Some(article_id),
                    &attachment.filename,
                    &attachment.content_type,
                    &attachment.data,
                )?);
            }

            tracing::info!(ticket_id, article_id, attachments = attachment_ids.len(), "email ingested");
            Ok(Ingested {
                ticket_id,
                article_id,
                customer_id,
                attachment_ids,
            })
        })
    }

    /// The user an inbound address belongs to: matched by email, or by a
    /// login equal to the address when that account has no email of its own.
    fn sender_account(&self, email: &str) -> Result<Option<i64>> {
        if let Some(user) = self.find_user_by_email(email)? {
            return Ok(Some(user.id));
        }
        match self.find_user_by_login(&email.to_lowercase())? {
            Some(user) if user.email.is_none() => Ok(Some(user.id)),
            _ => Ok(None),
        }
    }

    /// `base`, or `base` with the first numeric suffix no user holds yet.
    fn unused_login(&self, base: &str) -> Result<String> {
        if self.find_user_by_login(base)?.is_none() {
            return Ok(base.to_string());
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", base, n);
            if self.find_user_by_login(&candidate)?.is_none() {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}
