use anyhow::{bail, Result};

use ticketdesk::db::NewUser;
use ticketdesk::models::AccessLevel;
use ticketdesk::Database;

pub struct UserArgs<'a> {
    pub login: &'a str,
    pub email: Option<&'a str>,
    pub firstname: &'a str,
    pub lastname: &'a str,
    pub organization: Option<&'a str>,
    pub agent: bool,
    pub customer: bool,
}

pub fn org_add(db: &Database, name: &str, shared: bool) -> Result<()> {
    if db.find_organization_by_name(name)?.is_some() {
        bail!("Organization '{}' already exists", name);
    }
    let id = db.create_organization(name, shared)?;
    println!(
        "Created organization #{} {}{}",
        id,
        name,
        if shared { " (shared)" } else { "" }
    );
    Ok(())
}

pub fn org_share(db: &Database, name: &str, shared: bool) -> Result<()> {
    let Some(org) = db.find_organization_by_name(name)? else {
        bail!("Organization '{}' not found", name);
    };
    db.set_organization_shared(org.id, shared)?;
    println!(
        "Organization {} is now {}",
        name,
        if shared { "shared" } else { "private" }
    );
    Ok(())
}

pub fn group_add(db: &Database, name: &str) -> Result<()> {
    if db.find_group_by_name(name)?.is_some() {
        bail!("Group '{}' already exists", name);
    }
    let id = db.create_group(name)?;
    println!("Created group #{} {}", id, name);
    Ok(())
}

pub fn user_add(db: &Database, args: &UserArgs) -> Result<()> {
    if !args.agent && !args.customer {
        bail!("A user needs a role: pass --agent, --customer or both");
    }
    if db.find_user_by_login(args.login)?.is_some() {
        bail!("User '{}' already exists", args.login);
    }
    let organization_id = match args.organization {
        Some(name) => match db.find_organization_by_name(name)? {
            Some(org) => Some(org.id),
            None => bail!("Organization '{}' not found", name),
        },
        None => None,
    };

    let id = db.create_user(&NewUser {
        login: args.login,
        email: args.email,
        firstname: args.firstname,
        lastname: args.lastname,
        organization_id,
        is_agent: args.agent,
        is_customer: args.customer,
    })?;
    println!("Created user #{} {}", id, args.login);
    Ok(())
}

pub fn user_grant(db: &Database, login: &str, group: &str, level: AccessLevel) -> Result<()> {
    let Some(user) = db.find_user_by_login(login)? else {
        bail!("User '{}' not found", login);
    };
    let Some(group_row) = db.find_group_by_name(group)? else {
        bail!("Group '{}' not found", group);
    };
    db.grant_group_access(user.id, group_row.id, level)?;
    println!("Granted {} access on {} to {}", level, group, login);
    Ok(())
}

pub fn user_disable(db: &Database, login: &str) -> Result<()> {
    let Some(user) = db.find_user_by_login(login)? else {
        bail!("User '{}' not found", login);
    };
    db.set_user_active(user.id, false)?;
    println!("Disabled user {}", login);
    Ok(())
}
