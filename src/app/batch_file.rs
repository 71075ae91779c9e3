//! Plain-text inputs produced by the spreadsheet export, and the progress file
//! the web front end polls.

use std::fs;
use std::path::Path;

use crate::app::error::AutomationError;
use crate::app::models::{Batch, BatchSnapshot, OperationKind};

fn read_lines(path: &Path) -> Result<Vec<String>, AutomationError> {
    let raw = fs::read_to_string(path).map_err(|err| {
        AutomationError::InvalidBatch(format!("cannot read {}: {err}", path.display()))
    })?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// `transfer_data.txt`: from location, to location, then one IMEI per line.
pub fn parse_transfer_data(content: &str) -> Result<Batch, AutomationError> {
    let lines = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();
    match lines.as_slice() {
        [from, to, imeis @ ..] if !imeis.is_empty() => Batch::transfer(from, to, imeis),
        _ => Err(AutomationError::InvalidBatch(
            "transfer data needs from, to and at least one IMEI".to_string(),
        )),
    }
}

pub fn load_transfer_data(path: &Path) -> Result<Batch, AutomationError> {
    parse_transfer_data(&read_lines(path)?.join("\n"))
}

/// One identifier per line (stock add, receive).
pub fn load_identifiers(operation: OperationKind, path: &Path) -> Result<Batch, AutomationError> {
    Batch::identifiers(operation, read_lines(path)?)
}

/// IMEI / product id pairs, either `IMEI, ID` on one line or alternating lines.
/// A trailing IMEI without a product id is ignored.
pub fn parse_item_state_pairs(lines: &[String]) -> Vec<(String, String)> {
    if lines.iter().all(|line| line.contains(',')) {
        return lines
            .iter()
            .filter_map(|line| {
                let parts = line.split(',').map(str::trim).collect::<Vec<_>>();
                match parts.as_slice() {
                    [imei, product_id] => Some((imei.to_string(), product_id.to_string())),
                    _ => None,
                }
            })
            .collect();
    }
    lines
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect()
}

pub fn load_item_state_pairs(path: &Path) -> Result<Batch, AutomationError> {
    Batch::change_item_state(parse_item_state_pairs(&read_lines(path)?))
}

/// Writes `current,total`.
pub fn write_progress(path: &Path, snapshot: &BatchSnapshot) -> std::io::Result<()> {
    fs::write(path, format!("{},{}", snapshot.current_index, snapshot.total))
}
