//! Output formatting utilities.

use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use crate::config::OutputFormat;

/// Prints a success message.
pub fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Prints an error message.
pub fn error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Prints a warning message.
pub fn warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message);
}

/// Prints an info message.
pub fn info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// A row that has a primary identifier for quiet output.
pub trait Identified {
    /// Returns the identifier printed in quiet mode.
    fn identifier(&self) -> &str;
}

/// Outputs rows in the specified format.
pub fn output<T: Tabled + serde::Serialize + Identified>(
    data: &[T],
    format: OutputFormat,
) -> crate::CliResult<()> {
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                info("No results found.");
            } else {
                let table = Table::new(data).with(Style::rounded()).to_string();
                println!("{table}");
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(data)?;
            println!("{json}");
        }
        OutputFormat::Quiet => {
            for item in data {
                println!("{}", item.identifier());
            }
        }
    }
    Ok(())
}

/// Formats an optional timestamp for table cells.
pub fn display_time(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}
