mod commands;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ticketdesk::config::{load_config, DeskConfig, LogConfig, LogFormat};
use ticketdesk::models::AccessLevel;
use ticketdesk::Database;

#[derive(Parser)]
#[command(name = "ticketdesk")]
#[command(about = "A helpdesk ticket core on SQLite")]
#[command(version)]
struct Cli {
    /// Login of the acting user (defaults to the system user)
    #[arg(long = "as", global = true, env = "TICKETDESK_USER", default_value = "-")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a ticket desk in the current directory
    Init,

    /// Manage organizations
    Org {
        #[command(subcommand)]
        action: OrgCommands,
    },

    /// Manage groups
    Group {
        #[command(subcommand)]
        action: GroupCommands,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        action: UserCommands,
    },

    /// Create a ticket
    Create {
        /// Ticket title
        title: String,
        /// Customer login
        #[arg(short, long)]
        customer: String,
        /// Group name
        #[arg(short, long, default_value = "Users")]
        group: String,
        /// Owner login
        #[arg(short, long)]
        owner: Option<String>,
        /// Priority (low, normal, high)
        #[arg(short, long, default_value = "normal")]
        priority: String,
        /// Initial article text
        #[arg(short, long)]
        body: Option<String>,
    },

    /// List tickets
    List {
        /// Filter by state name or type (new, open, closed, merged, all, ...)
        #[arg(short, long, default_value = "all")]
        state: String,
    },

    /// Show ticket details
    Show {
        /// Ticket ID
        id: i64,
    },

    /// Add an article to a ticket
    Comment {
        /// Ticket ID
        id: i64,
        /// Article text
        text: String,
        /// Make the article visible to the customer
        #[arg(long)]
        public: bool,
    },

    /// Change a ticket's state
    State {
        /// Ticket ID
        id: i64,
        /// State name
        state: String,
        /// Pending until (RFC 3339), for pending states
        #[arg(long)]
        until: Option<String>,
    },

    /// Add or remove tags
    Tag {
        /// Ticket ID
        id: i64,
        /// Tag names
        #[arg(required = true)]
        tags: Vec<String>,
        /// Remove instead of add
        #[arg(short, long)]
        remove: bool,
    },

    /// Link two tickets
    Link {
        /// Source ticket ID
        source: i64,
        /// Target ticket ID
        target: i64,
        /// Link type
        #[arg(short = 't', long = "type", default_value = "normal")]
        link_type: String,
    },

    /// Remove a link between two tickets
    Unlink {
        /// Source ticket ID
        source: i64,
        /// Target ticket ID
        target: i64,
    },

    /// Merge a ticket into another
    Merge {
        /// Ticket to merge
        source: i64,
        /// Ticket to merge into
        target: i64,
        /// Leave articles on the merged ticket
        #[arg(long)]
        keep_articles: bool,
    },

    /// Delete a ticket and everything it owns
    Delete {
        /// Ticket ID
        id: i64,
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Check a user's access to a ticket
    Access {
        /// Ticket ID
        id: i64,
        /// User login
        login: String,
    },

    /// Run trigger actions from a JSON file against a ticket
    Trigger {
        /// Ticket ID
        id: i64,
        /// Path to the actions JSON
        actions: PathBuf,
        /// Article that fired the trigger
        #[arg(long)]
        article: Option<i64>,
        /// Trigger name used in logs
        #[arg(long, default_value = "manual")]
        name: String,
    },

    /// Create a ticket from a raw email
    Ingest {
        /// Path to the .eml file
        file: PathBuf,
        /// Target group (defaults to ingest.default_group)
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Search tickets with a selector JSON
    Search {
        /// Path to the selector JSON
        selector: PathBuf,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Only tickets the acting user can access at this level (read, full)
        #[arg(long)]
        level: Option<AccessLevel>,
    },
}

#[derive(Subcommand)]
enum OrgCommands {
    /// Add an organization
    Add {
        name: String,
        /// Do not share tickets between members
        #[arg(long)]
        private: bool,
    },
    /// Set whether members see each other's tickets
    Share {
        name: String,
        #[arg(action = clap::ArgAction::Set)]
        shared: bool,
    },
}

#[derive(Subcommand)]
enum GroupCommands {
    /// Add a group
    Add { name: String },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Add a user
    Add {
        login: String,
        #[arg(short, long)]
        email: Option<String>,
        #[arg(long, default_value = "")]
        firstname: String,
        #[arg(long, default_value = "")]
        lastname: String,
        /// Organization name
        #[arg(long)]
        org: Option<String>,
        #[arg(long)]
        agent: bool,
        #[arg(long)]
        customer: bool,
    },
    /// Grant a user access to a group
    Grant {
        login: String,
        group: String,
        /// read or full
        #[arg(default_value = "full")]
        level: AccessLevel,
    },
    /// Deactivate a user
    Disable { login: String },
}

fn find_desk_dir() -> Result<PathBuf> {
    let mut current = env::current_dir()?;

    loop {
        let candidate = current.join(".ticketdesk");
        if candidate.exists() && candidate.is_dir() {
            return Ok(candidate);
        }

        if !current.pop() {
            bail!("Not a ticket desk (or any parent). Run 'ticketdesk init' first.");
        }
    }
}

fn open_db(desk_dir: &Path) -> Result<Database> {
    let db_path = desk_dir.join("desk.db");
    Database::open(&db_path).context("Failed to open database")
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_env("TICKETDESK_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("ticketdesk={},warn", log.level)));

    let registry = tracing_subscriber::registry().with(filter);
    match log.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
    }
}

fn resolve_actor(db: &Database, login: &str) -> Result<i64> {
    match db.find_user_by_login(login)? {
        Some(user) if user.active => Ok(user.id),
        Some(_) => bail!("User '{}' is inactive", login),
        None => bail!("User '{}' not found", login),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_tracing(&LogConfig::default());
        let cwd = env::current_dir()?;
        return commands::init::run(&cwd);
    }

    let desk_dir = find_desk_dir()?;
    let config: DeskConfig = load_config(&desk_dir)?;
    init_tracing(&config.log);
    let db = open_db(&desk_dir)?;
    let actor = resolve_actor(&db, &cli.actor)?;

    match cli.command {
        Commands::Init => commands::init::run(&env::current_dir()?),

        Commands::Org { action } => match action {
            OrgCommands::Add { name, private } => commands::directory::org_add(&db, &name, !private),
            OrgCommands::Share { name, shared } => commands::directory::org_share(&db, &name, shared),
        },

        Commands::Group { action } => match action {
            GroupCommands::Add { name } => commands::directory::group_add(&db, &name),
        },

        Commands::User { action } => match action {
            UserCommands::Add {
                login,
                email,
                firstname,
                lastname,
                org,
                agent,
                customer,
            } => commands::directory::user_add(
                &db,
                &commands::directory::UserArgs {
                    login: &login,
                    email: email.as_deref(),
                    firstname: &firstname,
                    lastname: &lastname,
                    organization: org.as_deref(),
                    agent,
                    customer,
                },
            ),
            UserCommands::Grant {
                login,
                group,
                level,
            } => commands::directory::user_grant(&db, &login, &group, level),
            UserCommands::Disable { login } => commands::directory::user_disable(&db, &login),
        },

        Commands::Create {
            title,
            customer,
            group,
            owner,
            priority,
            body,
        } => commands::create::run(
            &db,
            &commands::create::CreateArgs {
                title: &title,
                customer: &customer,
                group: &group,
                owner: owner.as_deref(),
                priority: &priority,
                body: body.as_deref(),
            },
            actor,
        ),

        Commands::List { state } => commands::list::run(&db, Some(&state)),

        Commands::Show { id } => commands::show::run(&db, id),

        Commands::Comment { id, text, public } => commands::comment::run(&db, id, &text, !public, actor),

        Commands::State { id, state, until } => {
            commands::state::run(&db, id, &state, until.as_deref(), actor)
        }

        Commands::Tag { id, tags, remove } => {
            if remove {
                commands::tag::remove(&db, id, &tags)
            } else {
                commands::tag::add(&db, id, &tags)
            }
        }

        Commands::Link {
            source,
            target,
            link_type,
        } => commands::links::link(&db, source, target, &link_type),

        Commands::Unlink { source, target } => commands::links::unlink(&db, source, target),

        Commands::Merge {
            source,
            target,
            keep_articles,
        } => {
            let mut options = config.merge_options();
            if keep_articles {
                options.move_articles = false;
            }
            commands::merge::run(&db, source, target, actor, &options)
        }

        Commands::Delete { id, force } => commands::delete::run(&db, id, force),

        Commands::Access { id, login } => commands::access::run(&db, id, &login).map(|_| ()),

        Commands::Trigger {
            id,
            actions,
            article,
            name,
        } => commands::trigger::run(&db, id, &actions, article, &name, actor, config.batch_policy()),

        Commands::Ingest { file, group } => {
            let group = group.unwrap_or_else(|| config.ingest.default_group.clone());
            commands::ingest::run(&db, &file, &group)
        }

        Commands::Search {
            selector,
            limit,
            offset,
            level,
        } => commands::search::run(&db, &selector, limit, offset, level.map(|l| (actor, l))).map(|_| ()),
    }
}
