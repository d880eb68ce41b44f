use super::{StoreArgs, Workspace};
use anyhow::Result;
use collwatch_core::config::CONFIG_DIR;
use collwatch_core::{RefUpdate, SnapshotId, SqliteStore, TreeStore, HEAD};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub fn run(dir: Option<PathBuf>, args: StoreArgs) -> Result<()> {
    let workspace = Workspace::load(&args)?;
    let store = workspace.open_store()?;
    let dir = dir.unwrap_or_else(|| workspace.root.clone());

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {pos} files {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));

    let ignore = vec![CONFIG_DIR.to_string(), ".git".to_string()];
    let snapshot = store.snapshot_directory(&dir, &ignore, &mut |path: &str| {
        spinner.inc(1);
        spinner.set_message(path.to_string());
    })?;
    let files = spinner.position();
    spinner.finish_and_clear();

    let previous = store.resolve_ref(HEAD)?;
    match move_head(&store, previous.as_ref(), &snapshot)? {
        RefUpdate::Unchanged => {
            println!("{}", "Head already at this snapshot".yellow());
        }
        _ => {
            println!("{}", "✓ Snapshot recorded".green().bold());
        }
    }

    println!("   {}: {:?}", "Directory".bold(), dir);
    println!("   {}: {}", "Files".bold(), files);
    println!("   {}: {}", "Snapshot".bold(), snapshot.short().cyan());
    if let Some(previous) = previous.filter(|p| *p != snapshot) {
        println!("   {}: {}", "Previous".bold(), previous.short());
    }

    Ok(())
}

/// Moves HEAD from `expected` to `snapshot`. Fails if another writer moved
/// HEAD after `expected` was read.
fn move_head(
    store: &SqliteStore,
    expected: Option<&SnapshotId>,
    snapshot: &SnapshotId,
) -> Result<RefUpdate> {
    let outcome = store.update_ref(HEAD, expected, snapshot, "Recorded new head")?;

    match outcome {
        RefUpdate::Rejected => {
            let current = store.resolve_ref(HEAD)?;
            anyhow::bail!(
                "HEAD was moved to {} while recording {}. Run 'collwatch snapshot' again.",
                current.as_ref().map(|s| s.short()).unwrap_or("<absent>"),
                snapshot.short()
            )
        }
        RefUpdate::Created | RefUpdate::Updated => {
            info!("HEAD moved to {}", snapshot.short());
        }
        RefUpdate::Unchanged => {}
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_head_outcomes() {
        let store = SqliteStore::in_memory().unwrap();
        let first = store.commit_files([("A.ics", "a")]).unwrap();
        let second = store.commit_files([("A.ics", "b")]).unwrap();

        assert_eq!(move_head(&store, None, &first).unwrap(), RefUpdate::Created);
        assert_eq!(
            move_head(&store, Some(&first), &first).unwrap(),
            RefUpdate::Unchanged
        );
        assert_eq!(
            move_head(&store, Some(&first), &second).unwrap(),
            RefUpdate::Updated
        );
    }

    #[test]
    fn test_move_head_from_stale_head_fails() {
        let store = SqliteStore::in_memory().unwrap();
        let first = store.commit_files([("A.ics", "a")]).unwrap();
        let second = store.commit_files([("A.ics", "b")]).unwrap();
        let third = store.commit_files([("A.ics", "c")]).unwrap();
        store.set_head(&first).unwrap();
        store.set_head(&second).unwrap();

        let err = move_head(&store, Some(&first), &third).err().unwrap();

        assert!(err.to_string().contains(second.short()));
        assert_eq!(store.resolve_ref(HEAD).unwrap(), Some(second));
    }
}
