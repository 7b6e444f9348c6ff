//! Utility functions for Spindle CLI

use anyhow::Result;
use console::style;
use serde_json::Value;
use std::time::Duration;

/// Format duration in human-readable format
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else if seconds > 0 {
        format!("{}.{:03}s", seconds, millis)
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Format a list of token ids the way they are written in policy files
pub fn format_tokens(tokens: &[u32]) -> String {
    let ids: Vec<String> = tokens.iter().map(u32::to_string).collect();
    format!("[{}]", ids.join(", "))
}

/// Print formatted output (JSON or human-readable)
pub fn print_output(data: &Value, json_output: bool) -> Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else {
        print_human_readable(data);
    }
    Ok(())
}

/// Print human-readable output
fn print_human_readable(data: &Value) {
    match data {
        Value::Object(map) => {
            for (key, value) in map {
                match value {
                    Value::Array(arr) => {
                        println!("{}:", style(key).bold());
                        for (i, item) in arr.iter().enumerate() {
                            println!("  {}: {}", i + 1, format_value(item));
                        }
                    }
                    Value::Object(_) => {
                        println!("{}:", style(key).bold());
                        print_nested_object(value, 1);
                    }
                    _ => println!("{}: {}", style(key).bold(), format_value(value)),
                }
            }
        }
        _ => println!("{}", format_value(data)),
    }
}

fn print_nested_object(data: &Value, indent: usize) {
    let prefix = "  ".repeat(indent);

    if let Value::Object(map) = data {
        for (key, value) in map {
            match value {
                Value::Object(_) => {
                    println!("{}{}:", prefix, style(key).bold());
                    print_nested_object(value, indent + 1);
                }
                _ => println!("{}{}: {}", prefix, style(key).bold(), format_value(value)),
            }
        }
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => value.to_string(),
    }
}

/// Print warning with styling
pub fn print_warning(message: &str) {
    eprintln!("{} {}", style("Warning:").yellow().bold(), message);
}

/// Print success message with styling
pub fn print_success(message: &str) {
    println!("{} {}", style("Success:").green().bold(), message);
}
