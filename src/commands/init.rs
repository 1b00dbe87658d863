use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use ticketdesk::config::{CONFIG_FILE, DEFAULT_CONFIG};
use ticketdesk::Database;

pub fn run(path: &Path) -> Result<()> {
    let desk_dir = path.join(".ticketdesk");
    let db_path = desk_dir.join("desk.db");
    let config_path = desk_dir.join(CONFIG_FILE);

    if db_path.exists() && config_path.exists() {
        println!("Already initialized at {}", path.display());
        return Ok(());
    }

    fs::create_dir_all(&desk_dir).context("Failed to create .ticketdesk directory")?;

    if !db_path.exists() {
        Database::open(&db_path)?;
        println!("Created {}", db_path.display());
    }

    if !config_path.exists() {
        fs::write(&config_path, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("Created {}", config_path.display());
    }

    println!("Ticket desk initialized successfully!");
    println!("\nNext steps:");
    println!("  ticketdesk user add jane --customer --email jane@example.com");
    println!("  ticketdesk create \"Printer on fire\" --customer jane");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use ticketdesk::config::{load_config, DeskConfig};

    #[test]
    fn test_run_fresh_init() {
        let dir = tempdir().unwrap();
        run(dir.path()).unwrap();

        assert!(dir.path().join(".ticketdesk").is_dir());
        assert!(dir.path().join(".ticketdesk/desk.db").exists());
        assert!(dir.path().join(".ticketdesk/config.toml").exists());
    }

    #[test]
    fn test_written_config_loads_as_defaults() {
        let dir = tempdir().unwrap();
        run(dir.path()).unwrap();
        let config = load_config(&dir.path().join(".ticketdesk")).unwrap();
        assert_eq!(config, DeskConfig::default());
    }

    #[test]
    fn test_run_twice_keeps_data() {
        let dir = tempdir().unwrap();
        run(dir.path()).unwrap();

        let db_path = dir.path().join(".ticketdesk/desk.db");
        {
            let db = Database::open(&db_path).unwrap();
            db.create_group("Sales").unwrap();
        }
        run(dir.path()).unwrap();

        let db = Database::open(&db_path).unwrap();
        assert!(db.find_group_by_name("Sales").unwrap().is_some());
    }

    #[test]
    fn test_restores_missing_config() {
        let dir = tempdir().unwrap();
        run(dir.path()).unwrap();
        let config_path = dir.path().join(".ticketdesk/config.toml");
        fs::remove_file(&config_path).unwrap();

        run(dir.path()).unwrap();
        assert_eq!(fs::read_to_string(&config_path).unwrap(), DEFAULT_CONFIG);
    }
}
