use anyhow::{bail, Result};

use ticketdesk::models::{validate_priority, ArticleSender, NewArticle, VALID_PRIORITIES};
use ticketdesk::ticket::NewTicket;
use ticketdesk::Database;

pub struct CreateArgs<'a> {
    pub title: &'a str,
    pub customer: &'a str,
    pub group: &'a str,
    pub owner: Option<&'a str>,
    pub priority: &'a str,
    pub body: Option<&'a str>,
}

pub fn run(db: &Database, args: &CreateArgs, actor_id: i64) -> Result<()> {
    if !validate_priority(args.priority) {
        bail!(
            "Invalid priority '{}'. Must be one of: {}",
            args.priority,
            VALID_PRIORITIES.join(", ")
        );
    }

    let Some(customer) = db.find_user_by_login(args.customer)? else {
        bail!("Customer '{}' not found", args.customer);
    };
    let Some(group) = db.find_group_by_name(args.group)? else {
        bail!("Group '{}' not found", args.group);
    };
    let owner_id = match args.owner {
        Some(login) => match db.find_user_by_login(login)? {
            Some(owner) => Some(owner.id),
            None => bail!("Owner '{}' not found", login),
        },
        None => None,
    };

    let mut new = NewTicket::new(args.title, group.id, customer.id);
    new.owner_id = owner_id;
    new.priority = Some(args.priority);

    let id = db.transaction("create_command", |db| {
        let id = db.create_ticket(&new, actor_id)?;
        if let Some(body) = args.body {
            db.add_article(
                id,
                &NewArticle {
                    sender: ArticleSender::Customer,
                    from: customer.email.as_deref(),
                    to: None,
                    subject: Some(args.title),
                    body,
                    internal: false,
                },
                customer.id,
            )?;
        }
        Ok(id)
    })?;

    let ticket = db.find_ticket(id)?;
    println!("Created ticket #{} (id {})", ticket.number, ticket.id);
    Ok(())
}
