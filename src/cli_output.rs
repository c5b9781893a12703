// Console output - colored for terminals, plain for pipes, JSON for agents
use colored::Colorize;
use serde::Serialize;
use std::io::{self, IsTerminal};
use std::time::Duration;

/// Output mode for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Colors and symbols
    Human,
    /// One JSON document on stdout
    Json,
    /// Plain text without colors (for pipes/logs)
    Plain,
}

impl OutputMode {
    /// `--json` wins, then `CONSENTFIX_JSON`, then terminal detection
    pub fn detect(json_flag: bool) -> Self {
        if json_flag || std::env::var_os("CONSENTFIX_JSON").is_some() {
            Self::Json
        } else if !io::stdout().is_terminal() {
            Self::Plain
        } else {
            Self::Human
        }
    }
}

/// Structured message for JSON mode
#[derive(Debug, Clone, Serialize)]
struct Message<'a> {
    level: &'a str,
    message: &'a str,
}

pub struct OutputWriter {
    mode: OutputMode,
}

impl OutputWriter {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        match self.mode {
            OutputMode::Human => {
                println!();
                println!("{}", title.cyan().bold());
                println!("{}", "═".repeat(title.chars().count()).cyan());
            }
            OutputMode::Plain => {
                println!();
                println!("{}", title);
                println!("{}", "=".repeat(title.len()));
            }
            OutputMode::Json => {}
        }
    }

    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Human => println!("  {} {}", "✓".green(), message),
            OutputMode::Plain => println!("  [OK] {}", message),
            OutputMode::Json => self.emit_message("ok", message),
        }
    }

    pub fn warning(&self, message: &str) {
        match self.mode {
            OutputMode::Human => println!("  {} {}", "⚠".yellow(), message),
            OutputMode::Plain => println!("  [WARN] {}", message),
            OutputMode::Json => self.emit_message("warning", message),
        }
    }

    pub fn info(&self, message: &str) {
        match self.mode {
            OutputMode::Human | OutputMode::Plain => println!("  {}", message),
            OutputMode::Json => {}
        }
    }

    /// Print a key-value table
    pub fn table(&self, rows: &[(&str, String)]) {
        let max_key_len = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        match self.mode {
            OutputMode::Human => {
                for (key, value) in rows {
                    println!("  {:width$} │ {}", key.yellow(), value, width = max_key_len);
                }
            }
            OutputMode::Plain => {
                for (key, value) in rows {
                    println!("  {:width$} : {}", key, value, width = max_key_len);
                }
            }
            OutputMode::Json => {}
        }
    }

    /// Print a rendered block (tables, inspect sections) verbatim
    pub fn block(&self, text: &str) {
        if !matches!(self.mode, OutputMode::Json) {
            println!("{}", text);
        }
    }

    /// Emit the command's final payload in JSON mode
    pub fn emit_json<T: Serialize>(&self, value: &T) {
        if matches!(self.mode, OutputMode::Json) {
            if let Ok(json) = serde_json::to_string_pretty(value) {
                println!("{}", json);
            }
        }
    }

    fn emit_message(&self, level: &str, message: &str) {
        if let Ok(json) = serde_json::to_string(&Message { level, message }) {
            eprintln!("{}", json);
        }
    }

    pub fn is_human(&self) -> bool {
        matches!(self.mode, OutputMode::Human)
    }
}

/// Format an elapsed time in human-readable form
pub fn format_duration(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1000 {
        return format!("{}ms", millis);
    }
    let seconds = elapsed.as_secs();
    if seconds < 60 {
        format!("{:.1}s", elapsed.as_secs_f64())
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
