use regex::Regex;

use crate::app::models::{ConnectionState, DeviceHandle};

/// Accepts both `adb devices` (tab separated) and `adb devices -l` output.
pub fn parse_adb_devices(output: &str) -> Vec<DeviceHandle> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains("list of devices"))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                return None;
            }
            let mut model = None;
            let mut product = None;
            let mut transport_id = None;
            for token in tokens.iter().skip(2) {
                if let Some(value) = token.strip_prefix("model:") {
                    model = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("product:") {
                    product = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("transport_id:") {
                    transport_id = Some(value.to_string());
                }
            }
            Some(DeviceHandle {
                serial: tokens[0].to_string(),
                state: ConnectionState::from_adb(tokens[1]),
                model,
                product,
                transport_id,
            })
        })
        .collect()
}

/// `wm size` prints the physical size and, when set, an override that is what
/// the app actually renders at.
pub fn parse_wm_size(output: &str) -> Option<(u32, u32)> {
    let size_re = Regex::new(r"(?i)(physical|override)\s+size:\s*(\d+)\s*x\s*(\d+)").ok()?;
    let mut physical = None;
    let mut override_size = None;
    for caps in size_re.captures_iter(output) {
        let width = caps[2].parse::<u32>().ok()?;
        let height = caps[3].parse::<u32>().ok()?;
        if caps[1].eq_ignore_ascii_case("override") {
            override_size = Some((width, height));
        } else {
            physical = Some((width, height));
        }
    }
    override_size.or(physical)
}

/// adb reports a missing or dropped device on stderr with a non-zero exit.
pub fn is_device_unreachable(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no devices")
        || lower.contains("device offline")
        || lower.contains("unauthorized")
        || (lower.contains("device") && lower.contains("not found"))
}
