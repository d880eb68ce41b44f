use super::{kind_label, FilterArgs, StoreArgs, Workspace};
use anyhow::Result;
use collwatch_core::{CalendarEventDiffer, ChangeEntry, DiffSession, StructuredEvent};
use colored::Colorize;
use serde::Serialize;

#[derive(Serialize)]
struct EventReport<'a> {
    #[serde(skip)]
    change: &'a ChangeEntry,
    path: &'a str,
    kind: &'static str,
    before: Option<StructuredEvent>,
    after: Option<StructuredEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(json: bool, args: StoreArgs, filters: FilterArgs) -> Result<()> {
    let workspace = Workspace::load(&args)?.with_filters(&filters);
    let session = workspace.session()?;
    let differ = CalendarEventDiffer::new();

    let reports: Vec<EventReport> = session
        .changes()
        .iter()
        .map(|change| report(&differ, change, &session))
        .filter(|r| r.before.is_some() || r.after.is_some() || r.error.is_some())
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!("{}", "No pending calendar events".green());
        return Ok(());
    }

    println!("{}", "Calendar Events".bold().cyan());
    println!();

    for report in &reports {
        println!(
            "{} {}",
            kind_label(report.change.kind),
            report.path.white().bold()
        );
        if let Some(error) = &report.error {
            println!("    {}", error.red());
        }
        if let Some(before) = &report.before {
            println!("    {} {}", "-".red(), describe(before));
        }
        if let Some(after) = &report.after {
            println!("    {} {}", "+".green(), describe(after));
        }
        println!();
    }

    Ok(())
}

fn report<'a>(
    differ: &CalendarEventDiffer,
    change: &'a ChangeEntry,
    session: &DiffSession,
) -> EventReport<'a> {
    let (before, after, error) = match differ.diff(change, session) {
        Ok(delta) => (delta.before, delta.after, None),
        Err(e) => (None, None, Some(e.to_string())),
    };

    EventReport {
        change,
        path: change.path(),
        kind: change.kind.as_str(),
        before,
        after,
        error,
    }
}

fn describe(event: &StructuredEvent) -> String {
    let summary = event.summary.as_deref().unwrap_or("(no summary)");
    let start = event.dtstart.as_ref().map(|start| match start.to_naive() {
        Some(naive) if start.date_only => naive.format("%Y-%m-%d").to_string(),
        Some(naive) => naive.format("%Y-%m-%d %H:%M").to_string(),
        None => start.value.clone(),
    });

    match start {
        Some(start) => format!("{} @ {} (seq {})", summary, start, event.sequence),
        None => format!("{} (seq {})", summary, event.sequence),
    }
}
