use super::{kind_icon, FilterArgs, StoreArgs, Workspace};
use anyhow::Result;
use colored::Colorize;

pub fn run(args: StoreArgs, filters: FilterArgs) -> Result<()> {
    let workspace = Workspace::load(&args)?.with_filters(&filters);
    let session = workspace.session()?;
    let tracker = &workspace.config.tracker;

    println!("{}", "Change Status".bold().cyan());
    println!("  {}: {}", "Bookmark".bold(), tracker.bookmark);
    println!("  {}: {}", "Base".bold(), session.base().short());
    println!("  {}: {}", "Head".bold(), session.dest().short());
    if !tracker.scopes.is_empty() {
        println!("  {}: {}", "Scopes".bold(), tracker.scopes.join(", "));
    }
    if !tracker.suffixes.is_empty() {
        println!("  {}: {}", "Suffixes".bold(), tracker.suffixes.join(", "));
    }
    println!();

    let changes = session.changes();
    if changes.is_empty() {
        println!("{}", "No pending changes".green());
        return Ok(());
    }

    println!(
        "{} {}",
        "Pending changes:".bold(),
        format!("({})", changes.len()).yellow()
    );
    println!();

    for change in changes {
        println!("  {} {}", kind_icon(change.kind), change.path());
    }

    println!();
    println!(
        "Run {} to acknowledge these changes",
        "collwatch ack".cyan()
    );

    Ok(())
}
