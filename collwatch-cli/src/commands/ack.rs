use super::{kind_icon, FilterArgs, StoreArgs, Workspace};
use anyhow::Result;
use collwatch_core::{Error, RefUpdate};
use colored::Colorize;
use dialoguer::Confirm;
use tracing::info;

pub fn run(yes: bool, args: StoreArgs, filters: FilterArgs) -> Result<()> {
    let workspace = Workspace::load(&args)?.with_filters(&filters);
    let session = workspace.session()?;
    let changes = session.changes();

    if !changes.is_empty() {
        println!("{}", "Changes to acknowledge:".bold());
        for change in changes {
            println!("  {} {}", kind_icon(change.kind), change.path());
        }
        println!();

        if !yes {
            let confirmed = Confirm::new()
                .with_prompt(format!("Acknowledge {} change(s)?", changes.len()))
                .default(false)
                .interact()?;
            if !confirmed {
                println!("{}", "Nothing acknowledged".yellow());
                return Ok(());
            }
        }
    }

    let outcome = match session.acknowledge() {
        Err(Error::AcknowledgeRejected { found, .. }) => {
            anyhow::bail!(
                "Bookmark '{}' was moved to {} by another consumer. Run 'collwatch status' again.",
                workspace.config.tracker.bookmark,
                found.as_deref().unwrap_or("<absent>")
            )
        }
        result => result?.unwrap_or(RefUpdate::Unchanged),
    };
    info!(
        "Acknowledge of {} change(s) at {}: {:?}",
        changes.len(),
        session.dest().short(),
        outcome
    );

    let bookmark = &workspace.config.tracker.bookmark;
    match outcome {
        RefUpdate::Created => println!(
            "{}",
            format!("✓ Bookmark '{}' created at {}", bookmark, session.dest().short())
                .green()
                .bold()
        ),
        RefUpdate::Updated => println!(
            "{}",
            format!(
                "✓ Acknowledged {} change(s), '{}' now at {}",
                changes.len(),
                bookmark,
                session.dest().short()
            )
            .green()
            .bold()
        ),
        RefUpdate::Unchanged | RefUpdate::Rejected => {
            println!("{}", "Nothing new to acknowledge".yellow())
        }
    }

    Ok(())
}
