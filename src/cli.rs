use anyhow::{bail, Context, Result};
use log::info;
use std::sync::Arc;

use crate::core::config::AppConfig;
use crate::core::shared::state::{open_store, AppState};
use crate::core::shared::utils::{create_conn, limit_chars, run_migrations};
use crate::main_module::run_axum_server;
use crate::tasks::{
    run_bulk_classification, BulkClassifyOptions, BulkOutcome, BulkPreviewItem, BulkSummary,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Serve,
    BulkClassify(BulkClassifyOptions),
    Migrate,
    Help,
}

pub fn parse_args(args: &[String]) -> Result<Command> {
    let Some(command) = args.get(1) else {
        return Ok(Command::Serve);
    };

    match command.as_str() {
        "serve" => Ok(Command::Serve),
        "migrate" => Ok(Command::Migrate),
        "--help" | "-h" | "help" => Ok(Command::Help),
        "bulk-classify" => parse_bulk_options(&args[2..]).map(Command::BulkClassify),
        other => bail!("Unknown command: {other}"),
    }
}

fn parse_bulk_options(args: &[String]) -> Result<BulkClassifyOptions> {
    let mut options = BulkClassifyOptions::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag, Some(value.to_string())),
            None => (arg.as_str(), None),
        };
        let mut value = |name: &str| -> Result<String> {
            match inline.clone() {
                Some(v) => Ok(v),
                None => iter
                    .next()
                    .cloned()
                    .with_context(|| format!("{name} requires a value")),
            }
        };

        match flag {
            "--unclassified" => options.unclassified_only = true,
            "--dry-run" => options.dry_run = true,
            "--limit" => {
                options.limit = value("--limit")?
                    .parse()
                    .context("--limit must be a non-negative integer")?;
            }
            "--delay" => {
                let secs: u64 = value("--delay")?
                    .parse()
                    .context("--delay must be a whole number of seconds")?;
                options.delay_ms = secs.saturating_mul(1000);
            }
            other => bail!("Unknown option for bulk-classify: {other}"),
        }
    }

    Ok(options)
}

pub async fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let command = parse_args(&args)?;

    match command {
        Command::Help => {
            print_usage();
            Ok(())
        }
        Command::Serve => {
            let config = AppConfig::from_env()?;
            let store = open_store(&config)?;
            let state = Arc::new(AppState::new(config, store).await);
            run_axum_server(state).await?;
            Ok(())
        }
        Command::Migrate => {
            let config = AppConfig::from_env()?;
            let Some(url) = config.database.url.as_deref() else {
                bail!("DATABASE_URL must be set to run migrations");
            };
            let pool = create_conn(url, 1)?;
            run_migrations(&pool).map_err(|e| anyhow::anyhow!("Migration failed: {e}"))?;
            println!("Migrations applied.");
            Ok(())
        }
        Command::BulkClassify(options) => {
            let config = AppConfig::from_env()?;
            let store = open_store(&config)?;
            let state = AppState::new(config, store).await;
            bulk_classify(&state, &options).await
        }
    }
}

async fn bulk_classify(state: &AppState, options: &BulkClassifyOptions) -> Result<()> {
    if !options.dry_run {
        info!("Dispatching classification jobs to queue {}", state.queue.name());
    }

    let outcome = run_bulk_classification(state.store.as_ref(), &state.queue, options).await?;

    match outcome {
        BulkOutcome::Preview { tickets } if tickets.is_empty() => {
            println!("No tickets found to classify.");
        }
        BulkOutcome::Preview { tickets } => {
            println!("DRY RUN - Would process {} tickets:", tickets.len());
            print!("{}", preview_table(&tickets));
        }
        BulkOutcome::Dispatched(summary) if summary.total == 0 => {
            println!("No tickets found to classify.");
        }
        BulkOutcome::Dispatched(summary) => {
            println!("Classification jobs queued successfully!");
            print!("{}", summary_table(&summary));
            if summary.queued > 0 {
                println!(
                    "Waiting for {} job(s) on {} to finish...",
                    state.queue.pending(),
                    state.queue.name()
                );
                state.queue.wait_idle().await;
                println!("All classification jobs finished.");
            }
        }
    }
    Ok(())
}

pub fn preview_table(tickets: &[BulkPreviewItem]) -> String {
    let rows: Vec<[String; 4]> = tickets
        .iter()
        .map(|t| {
            [
                t.id.to_string(),
                limit_chars(&t.subject, 50),
                t.status.to_string(),
                t.category
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "None".to_string()),
            ]
        })
        .collect();
    render_table(&["ID", "Subject", "Status", "Current Category"], &rows)
}

pub fn summary_table(summary: &BulkSummary) -> String {
    let rows = [
        ["Total Tickets".to_string(), summary.total.to_string()],
        ["Successfully Queued".to_string(), summary.queued.to_string()],
        ["Errors".to_string(), summary.errors.to_string()],
    ];
    render_table(&["Metric", "Count"], &rows)
}

fn render_table<const N: usize>(headers: &[&str; N], rows: &[[String; N]]) -> String {
    let mut widths = [0usize; N];
    for (width, header) in widths.iter_mut().zip(headers) {
        *width = header.chars().count();
    }
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let border = {
        let parts: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
        format!("+{}+\n", parts.join("+"))
    };
    let line = |cells: Vec<&str>| {
        let parts: Vec<String> = cells
            .iter()
            .zip(widths.iter())
            .map(|(cell, width)| {
                let pad = width - cell.chars().count();
                format!(" {cell}{} ", " ".repeat(pad))
            })
            .collect();
        format!("|{}|\n", parts.join("|"))
    };

    let mut out = border.clone();
    out.push_str(&line(headers.to_vec()));
    out.push_str(&border);
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
    }
    out.push_str(&border);
    out
}

fn print_usage() {
    println!(
        "helpdesk - help-desk ticket tracker with AI classification

Usage:
  helpdesk [serve]              Start the HTTP API (default)
  helpdesk migrate              Apply database migrations
  helpdesk bulk-classify [options]
      --unclassified            Only classify tickets without a category
      --limit <N>               Maximum number of tickets to process (default 50)
      --delay <SECS>            Delay in seconds between job dispatches (default 1)
      --dry-run                 Show what would be processed without queuing jobs
  helpdesk --help               Show this message

Configuration is read from the environment and an optional .env file."
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tickets::{TicketCategory, TicketStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("helpdesk")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_default_command_is_serve() {
        assert_eq!(parse_args(&args(&[])).unwrap(), Command::Serve);
        assert_eq!(parse_args(&args(&["-h"])).unwrap(), Command::Help);
        assert!(parse_args(&args(&["frobnicate"])).is_err());
    }

    #[test]
    fn test_bulk_options() {
        let command = parse_args(&args(&[
            "bulk-classify",
            "--unclassified",
            "--limit",
            "10",
            "--delay=0",
            "--dry-run",
        ]))
        .unwrap();

        assert_eq!(
            command,
            Command::BulkClassify(BulkClassifyOptions {
                unclassified_only: true,
                limit: 10,
                delay_ms: 0,
                dry_run: true,
            })
        );
    }

    #[test]
    fn test_bulk_defaults_and_errors() {
        assert_eq!(
            parse_args(&args(&["bulk-classify"])).unwrap(),
            Command::BulkClassify(BulkClassifyOptions::default())
        );
        assert!(parse_args(&args(&["bulk-classify", "--limit"])).is_err());
        assert!(parse_args(&args(&["bulk-classify", "--limit", "lots"])).is_err());
        assert!(parse_args(&args(&["bulk-classify", "--force"])).is_err());
    }

    #[test]
    fn test_preview_table() {
        let item = BulkPreviewItem {
            id: Uuid::nil(),
            subject: "x".repeat(60),
            status: TicketStatus::Open,
            category: None,
            created_at: Utc::now(),
        };
        let classified = BulkPreviewItem {
            subject: "Printer".into(),
            category: Some(TicketCategory::HardwareIssue),
            ..item.clone()
        };
        let table = preview_table(&[item, classified]);

        assert!(table.contains("| Current Category |"));
        assert!(table.contains(&format!("{}...", "x".repeat(50))));
        assert!(!table.contains(&"x".repeat(51)));
        assert!(table.contains("None"));
        assert!(table.contains("hardware_issue"));
    }

    #[test]
    fn test_summary_table() {
        let table = summary_table(&BulkSummary {
            total: 5,
            queued: 4,
            errors: 1,
        });
        assert!(table.contains("| Successfully Queued | 4     |"));
        assert_eq!(table.lines().count(), 7);
    }
}
