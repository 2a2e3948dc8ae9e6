//! Output formatting utilities for the operator CLI
//!
//! Consistent, colored output with a JSON mode for automation.

use colored::Colorize;
use serde::{Deserialize, Serialize};

/// Result structure for JSON output
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandOutput {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<String>,
}

impl CommandOutput {
    /// Create a successful output
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            errors: Vec::new(),
        }
    }

    /// Create a successful output with data
    pub fn success_with_data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            errors: Vec::new(),
        }
    }

    /// Create a failed output
    pub fn failure(message: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            errors,
        }
    }

    /// Output as JSON to stdout
    pub fn output_json(&self) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            println!("{}", json);
        }
    }
}

/// Print success message with green checkmark
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg.green());
}

/// Print error message with red cross
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg.red());
}

/// Print warning message
pub fn print_warning(msg: &str) {
    println!("{} {}", "⚠".yellow().bold(), msg.yellow());
}

/// Print informational message
pub fn print_info(msg: &str) {
    println!("{} {}", "ℹ".blue().bold(), msg);
}

/// Print a dry-run notice
pub fn print_dry_run(msg: &str) {
    println!("{} {}", "[dry-run]".cyan().bold(), msg.dimmed());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_json_shape() {
        let out = CommandOutput::success_with_data("ok", serde_json::json!({"n": 1}));
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["n"], 1);
        assert!(json.get("errors").is_none());
    }
}
