use anyhow::{Context, Result};
use collwatch_core::{Config, SqliteStore};
use colored::Colorize;
use std::fs;
use std::path::PathBuf;

pub fn run(path: PathBuf) -> Result<()> {
    fs::create_dir_all(&path)?;
    let root = fs::canonicalize(&path)?;
    let config_path = Config::path_in(&root);

    let config = if config_path.exists() {
        println!("{}", "Existing configuration kept".yellow());
        Config::load(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?
    } else {
        let config = Config::default();
        config.save(&root)?;
        config
    };

    let db_path = config.db_path(&root);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to create store {}", db_path.display()))?;

    println!("{}", "✓ collwatch initialized".green().bold());
    println!("   {}: {:?}", "Root".bold(), root);
    println!("   {}: {:?}", "Config".bold(), config_path);
    println!("   {}: {:?}", "Database".bold(), db_path);
    println!("   {}: {}", "Bookmark".bold(), config.tracker.bookmark);
    println!();
    println!(
        "Run {} to record the first snapshot",
        "collwatch snapshot <dir>".cyan()
    );

    Ok(())
}
