//! Human and JSON output
//!
//! Results go to stdout; diagnostics go to stderr so `--json` output can be
//! piped. In JSON mode the only stdout write is the final document.

use std::io::Write;

/// Output format selector
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Where command results and diagnostics are written
pub trait OutputFormatter {
    /// A headline for a finished operation
    fn success(&self, message: &str);
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
    /// A detail line under the last headline
    fn info(&self, message: &str);
    /// The machine-readable result document
    fn print_json(&self, value: &serde_json::Value);
}

pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn success(&self, message: &str) {
        let _ = writeln!(std::io::stdout().lock(), "{message}");
    }

    fn error(&self, message: &str) {
        let _ = writeln!(std::io::stderr().lock(), "error: {message}");
    }

    fn warn(&self, message: &str) {
        let _ = writeln!(std::io::stderr().lock(), "warning: {message}");
    }

    fn info(&self, message: &str) {
        let _ = writeln!(std::io::stdout().lock(), "  {message}");
    }

    fn print_json(&self, _value: &serde_json::Value) {}
}

/// Prints one pretty document on stdout; diagnostics become single-line
/// JSON objects on stderr
pub struct JsonFormatter;

impl JsonFormatter {
    fn diagnostic(level: &str, message: &str) {
        let line = serde_json::json!({ "level": level, "message": message });
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }
}

impl OutputFormatter for JsonFormatter {
    fn success(&self, _message: &str) {}

    fn error(&self, message: &str) {
        Self::diagnostic("error", message);
    }

    fn warn(&self, message: &str) {
        Self::diagnostic("warning", message);
    }

    fn info(&self, _message: &str) {}

    fn print_json(&self, value: &serde_json::Value) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => {
                let _ = writeln!(std::io::stdout().lock(), "{text}");
            }
            Err(e) => Self::diagnostic("error", &format!("cannot render result: {e}")),
        }
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Human => Box::new(HumanFormatter),
    }
}

/// `1 message`, `2 messages`
pub fn plural(count: u64, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}
