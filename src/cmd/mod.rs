use std::fs;

use anyhow::{Context, Result};
use crossterm::style::Stylize;
use serde::Serialize;

pub mod probe;
pub mod sizes;

/// Pretty-print `value` as JSON to stdout (`-`) or to the file at `dest`.
pub fn write_json<T: Serialize>(value: &T, dest: &str) -> Result<()> {
    let output = serde_json::to_string_pretty(value)?;
    if dest == "-" {
        println!("{output}");
    } else {
        fs::write(dest, &output).with_context(|| format!("Failed to write JSON to {dest}"))?;
        eprintln!("{} Wrote {dest}", "✔".green());
    }
    Ok(())
}
