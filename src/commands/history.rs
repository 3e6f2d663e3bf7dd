use crate::cli::HistoryCommand;
use crate::config::Config;
use crate::error::Result;
use crate::storage::{ScanRecord, ScanStore};
use chrono::Utc;
use colored::Colorize;
use prettytable::{format, Table};

use super::{require_user, session_manager};

/// Handle history commands for the logged-in account
pub async fn handle_history(config: &Config, command: HistoryCommand) -> Result<()> {
    let sessions = session_manager(config)?;
    let user = require_user(&sessions).await?;
    let store = ScanStore::from_config(&config.storage)?;

    match command {
        HistoryCommand::List { limit } => {
            let scans = store.list_scans(&user.id, limit)?;
            if scans.is_empty() {
                println!("{}", "No scans recorded yet.".yellow());
                return Ok(());
            }

            println!("\nScans for {}:", user.email.bold());
            scan_table(&scans).printstd();
            println!();
            println!(
                "Use {} to remove one.",
                "leafscan history delete <ID>".cyan()
            );
            println!();
        }
        HistoryCommand::Delete { id } => {
            let removed = store.delete_scan(&user.id, &id)?;
            if removed == 0 {
                println!("{}", format!("No scan matching {}", id).yellow());
                return Ok(());
            }
            println!("{}", format!("Deleted {} scan(s)", removed).green());
        }
        HistoryCommand::Clear => {
            let removed = store.clear_scans(&user.id)?;
            println!("{}", format!("Cleared {} scan(s)", removed).green());
        }
    }

    Ok(())
}

fn scan_table(scans: &[ScanRecord]) -> Table {
    let now = Utc::now();
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "ID".bold(),
        "File".bold(),
        "Diagnosis".bold(),
        "Confidence".bold(),
        "When".bold()
    ]);

    for scan in scans {
        let id_short = &scan.id[..scan.id.len().min(10)];
        let file = if scan.file_name.chars().count() > 32 {
            format!("{}...", scan.file_name.chars().take(29).collect::<String>())
        } else {
            scan.file_name.clone()
        };
        table.add_row(prettytable::row![
            id_short.cyan(),
            file,
            scan.label,
            format!("{}%", scan.confidence_percent()),
            scan.age_label(now)
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PredictionResult;

    #[test]
    fn test_scan_table_has_header_and_rows() {
        let result = PredictionResult::new("Healthy", 0.97).unwrap();
        let scans = vec![
            ScanRecord::new("1", "leaf-one.jpg", &result),
            ScanRecord::new("1", &"x".repeat(50), &result),
        ];
        let table = scan_table(&scans);
        assert_eq!(table.len(), 3);
        let rendered = table.to_string();
        assert!(rendered.contains("leaf-one.jpg"));
        assert!(rendered.contains("97%"));
        assert!(rendered.contains("..."));
    }
}
