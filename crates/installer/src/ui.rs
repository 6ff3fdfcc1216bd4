//! UI helpers for the pipeline CLI.
//!
//! Provides consistent formatting for console output during a run.

use colored::Colorize;

use crate::validation::CheckOutcome;

/// Print the banner.
pub fn print_banner() {
    println!();
    println!(
        "{}",
        r"
  _           _          _     _
 | |__  _   _| |__  _ __(_) __| |
 | '_ \| | | | '_ \| '__| |/ _` |
 | | | | |_| | |_) | |  | | (_| |
 |_| |_|\__, |_.__/|_|  |_|\__,_|
        |___/
"
        .cyan()
    );
    println!("  {}", "Hybrid home + cloud Kubernetes provisioning".bright_black());
    println!();
}

/// Section title, underlined to at least 40 columns.
pub fn print_section(title: &str) {
    let width = title.chars().count().max(40);
    println!();
    println!("{}", title.cyan().bold());
    println!("{}", "─".repeat(width).bright_black());
}

/// Print a progress step with step number.
pub fn print_progress_step(current: u8, total: u8, message: &str) {
    println!(
        "{} {} {}",
        format!("[{current}/{total}]").bright_black(),
        "▶".cyan(),
        message.bold()
    );
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a validation check result, with its remediation when it did not pass.
pub fn print_check_result(name: &str, outcome: CheckOutcome, message: &str, remediation: &str) {
    let status = match outcome {
        CheckOutcome::Pass => "✓".green(),
        CheckOutcome::Warn => "⚠".yellow(),
        CheckOutcome::Fail => "✗".red(),
    };

    if message.is_empty() {
        println!("  {status} {name}");
    } else {
        println!("  {status} {name} - {message}");
    }

    if outcome != CheckOutcome::Pass && !remediation.is_empty() {
        println!("      {} {}", "→".bright_black(), remediation.bright_black());
    }
}

/// Print a captured output snippet, indented.
pub fn print_output_tail(tail: &str) {
    for line in tail.lines() {
        println!("    {}", line.bright_black());
    }
}

/// Key-value row; keys are padded so values line up.
pub fn print_kv(key: &str, value: &str) {
    let key = format!("{:<16}", format!("{key}:"));
    println!("  {} {value}", key.bright_black());
}

/// Print a list item.
pub fn print_list_item(item: &str) {
    println!("  {} {item}", "•".bright_black());
}
