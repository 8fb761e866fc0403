//! Colored CLI display utilities for bridged sessions.
//!
//! Used by `line-bridge run` to show traffic with the child process. The
//! protocol stream is the child's stdio, so these write to our stdout.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Make control characters visible so one message stays on one line.
#[must_use]
pub fn escape_control(message: &str) -> String {
    message.escape_debug().to_string()
}

/// Print a message received from the child.
pub fn print_received(message: &str) {
    println!(
        "{} {} {}",
        timestamp().dimmed(),
        "[PEER]".blue().bold(),
        escape_control(message).blue()
    );
    let _ = io::stdout().flush();
}

/// Print a message sent to the child.
pub fn print_sent(message: &str) {
    println!(
        "{} {} {}",
        timestamp().dimmed(),
        "[HOST]".green().bold(),
        escape_control(message).green()
    );
    let _ = io::stdout().flush();
}

/// Print a line the child wrote to stderr, or a bridge error.
pub fn print_error(program: &str, error: &str) {
    println!(
        "{} {} {}: {}",
        timestamp().dimmed(),
        "[ERROR]".red().bold(),
        program,
        error.red()
    );
    let _ = io::stdout().flush();
}

/// Print the exit of the child.
pub fn print_closed(program: &str, code: Option<i32>) {
    let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
    println!(
        "{} {} {} closed with code {}",
        timestamp().dimmed(),
        "[CLOSE]".yellow().bold(),
        program,
        code.bold()
    );
    let _ = io::stdout().flush();
}
