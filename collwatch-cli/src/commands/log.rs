use super::{StoreArgs, Workspace};
use anyhow::Result;
use colored::Colorize;

pub fn run(limit: Option<usize>, args: StoreArgs) -> Result<()> {
    let workspace = Workspace::load(&args)?;
    let store = workspace.open_store()?;
    let bookmark = &workspace.config.tracker.bookmark;
    let entries = store.ref_log(bookmark, None)?;

    if entries.is_empty() {
        println!("{}", format!("Bookmark '{}' has never moved", bookmark).yellow());
        return Ok(());
    }

    println!("{}", format!("History of '{}'", bookmark).bold().cyan());
    println!();

    let to_show = limit.unwrap_or(entries.len()).min(entries.len());

    for entry in entries.iter().take(to_show) {
        println!(
            "{} {}",
            "move".yellow().bold(),
            entry.id.to_string().yellow()
        );
        println!(
            "{}: {} -> {}",
            "Target".bold(),
            entry
                .old_target
                .as_ref()
                .map_or("<none>", |t| t.short())
                .dimmed(),
            entry.new_target.short().cyan()
        );
        println!(
            "{}: {}",
            "Date".bold(),
            entry.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
        println!("    {}", entry.message);
        println!();
    }

    if entries.len() > to_show {
        println!(
            "{}",
            format!("... and {} more entries", entries.len() - to_show).dimmed()
        );
        println!("Use {} to see more", "--limit N".cyan());
    }

    Ok(())
}
