//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn table<T: TableDisplay>(rows: &[&T]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(T::headers());
    for item in rows {
        table.add_row(item.row());
    }
    table
}

fn print_plain<T: TableDisplay>(item: &T) {
    for (header, value) in T::headers().iter().zip(item.row()) {
        println!("{}: {}", header, value);
    }
}

/// Render a serializable value as JSON or YAML
pub fn render<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
        _ => serde_json::to_string_pretty(value)?,
    })
}

/// Print a single item
pub fn print_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => println!("{}", table(&[item])),
        OutputFormat::Json | OutputFormat::Yaml => println!("{}", render(item, format)?),
        OutputFormat::Plain => print_plain(item),
    }
    Ok(())
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json | OutputFormat::Yaml => println!("{}", render(items, format)?),
        _ if items.is_empty() => println!("No items found."),
        OutputFormat::Table => println!("{}", table(&items.iter().collect::<Vec<_>>())),
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                print_plain(item);
            }
        }
    }
    Ok(())
}

/// Print the verdict of a check
pub fn print_verdict(passed: bool, message: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "passed": passed, "message": message })
        ),
        OutputFormat::Yaml => {
            println!("passed: {passed}");
            println!("message: {message:?}");
        }
        _ if passed => print_success(message),
        _ => print_failure(message),
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print failure message
pub fn print_failure(message: &str) {
    println!("{} {}", "✗".red(), message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "error:".red().bold(), message);
}
