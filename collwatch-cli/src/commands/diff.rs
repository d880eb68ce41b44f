use super::{kind_label, FilterArgs, StoreArgs, Workspace};
use anyhow::Result;
use collwatch_core::{ContentDiff, DiffLineType, PathFilter};
use colored::Colorize;

pub fn run(path: Option<String>, args: StoreArgs, filters: FilterArgs) -> Result<()> {
    let workspace = Workspace::load(&args)?.with_filters(&filters);
    let session = workspace.session()?;

    let selected = path.map(PathFilter::prefix);
    let changes: Vec<_> = session
        .changes()
        .iter()
        .filter(|c| selected.as_ref().map_or(true, |f| f.matches(c.path())))
        .collect();

    if changes.is_empty() {
        println!("{}", "No pending changes".green());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "Changes {}..{}",
            session.base().short(),
            session.dest().short()
        )
        .bold()
        .cyan()
    );
    println!();

    for change in changes {
        println!("{}", "━".repeat(80).bright_black());
        println!(
            "{} {}",
            kind_label(change.kind),
            change.path().white().bold()
        );
        println!();

        match ContentDiff::from_entry(change, &session) {
            Ok(diff) if diff.binary => {
                println!("  {}", "[Binary content]".dimmed());
            }
            Ok(diff) => {
                for line in &diff.diff_lines {
                    let (prefix, color): (&str, fn(&str) -> colored::ColoredString) =
                        match line.line_type {
                            DiffLineType::Addition => ("+", |s| s.green()),
                            DiffLineType::Deletion => ("-", |s| s.red()),
                            DiffLineType::Context => (" ", |s| s.normal()),
                        };
                    print!("{}", color(&format!("{}{}", prefix, line.content)));
                }
            }
            Err(e) => {
                println!("  {}", format!("[Unable to load content: {}]", e).dimmed());
            }
        }
        println!();
    }

    Ok(())
}
