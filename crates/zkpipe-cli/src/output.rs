//! Terminal output formatting for the zkpipe CLI.
//!
//! Colored output via the [`console`] crate: glyph-prefixed result lines
//! and aligned stage/key-value reporting.

use console::style;

/// Print a bold cyan section header with a dimmed rule under it.
pub fn print_header(text: &str) {
    println!("\n{}", style(text).bold().cyan());
    println!("{}", style("-".repeat(text.len())).dim());
}

/// Print a success line prefixed with a green check mark.
pub fn print_success(text: &str) {
    println!("{} {}", style("✓").green().bold(), text);
}

/// Print a warning line prefixed with yellow `warning:`.
pub fn print_warning(text: &str) {
    println!("{} {}", style("warning:").yellow().bold(), text);
}

/// Print an error line prefixed with red `error:`.
pub fn print_error(text: &str) {
    println!("{} {}", style("error:").red().bold(), text);
}

/// Print a pipeline stage line like `  ● circuit-compiled   complete`.
/// Completed stages get a filled green dot, pending or failed ones a
/// hollow yellow dot.
pub fn print_stage(name: &str, status: &str, done: bool) {
    let name = format!("{name:<18}");
    let (glyph, status) = if done {
        (style("●").green(), style(status).green())
    } else {
        (style("○").yellow(), style(status).yellow())
    };
    println!("  {glyph} {} {status}", style(name).dim());
}

/// Print a key-value pair with dimmed key formatting.
pub fn print_key_value(key: &str, value: &str) {
    println!("  {}: {}", style(key).dim(), value);
}
