//! Shared terminal output helpers.

use colored::Colorize;

/// Brand banner: ">> duplex".
pub fn banner() {
    println!("  {} {}", ">>".bright_cyan().bold(), "duplex".bold());
    println!("     {}", "peer-to-peer envelope overlay".dimmed());
}

/// Section header: ">> Title" in cyan.
pub fn section(title: &str) {
    println!("  {} {}", ">>".bright_cyan().bold(), title.bold());
}

/// Print a success message.
pub fn success(msg: &str) {
    println!("  {} {}", "\u{2714}".bright_green(), msg);
}

/// Report a failure on stderr: "  error: message".
pub fn error(msg: &str) {
    eprintln!("  {} {}", "error:".bright_red().bold(), msg);
}

/// Failure plus the command or setting most likely to resolve it.
pub fn error_with_fix(msg: &str, fix: &str) {
    error(msg);
    eprintln!("  {}   {}", "try:".bright_yellow(), fix);
}

/// Key-value display: "  Label:       value".
pub fn kv(label: &str, value: &str) {
    println!("  {:<13}{}", format!("{label}:"), value);
}

/// Key-value with green value.
pub fn kv_ok(label: &str, value: &str) {
    println!("  {:<13}{}", format!("{label}:"), value.bright_green());
}

/// Hint line: "  hint: message" in dimmed text.
pub fn hint(msg: &str) {
    println!("  {} {}", "hint:".dimmed(), msg.dimmed());
}

/// Empty line.
pub fn blank() {
    println!();
}
