use anyhow::{Context, Result};
use stagegate_core::normalize_roster;
use std::fs;
use std::path::Path;

/// Reads the canonical recording list. A CSV whose header has `column`
/// contributes that column; any other file is one recording per line.
pub fn load_roster(path: &Path, column: &str) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read roster {}", path.display()))?;
    parse_roster(&content, column).with_context(|| format!("invalid roster {}", path.display()))
}

pub fn parse_roster(content: &str, column: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let position = reader
        .headers()?
        .iter()
        .position(|header| header.eq_ignore_ascii_case(column.trim()));
    let Some(position) = position else {
        return Ok(normalize_roster(content.lines()));
    };

    let mut names = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(name) = record.get(position) {
            names.push(name.to_string());
        }
    }
    Ok(normalize_roster(names))
}

/// Roster entry at `index`, the way stage consumers address videos.
pub fn recording_at(roster: &[String], index: usize) -> Result<&str> {
    roster.get(index).map(String::as_str).with_context(|| {
        format!(
            "recording index {index} is out of range (roster has {} entries)",
            roster.len()
        )
    })
}
