//! Parsers for command-line tool output (ipmitool, smartctl, fdisk, nvidia-smi).

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::error::{HushError, Result};

static SMART_TEMPERATURE: OnceLock<Regex> = OnceLock::new();
static FDISK_DISK: OnceLock<Regex> = OnceLock::new();

/// One row of `ipmitool -c sdr`: `name,value,unit,status`.
#[derive(Debug, Clone, PartialEq)]
pub struct SdrReading {
    pub name: String,
    /// `None` for sensors that report no reading (`na` or empty).
    pub value: Option<f64>,
    pub unit: String,
}

/// Parse CSV SDR output.
/// Input: "Inlet Temp,21,degrees C,ok\nTemp,45,degrees C,ok\nFan1,3600,RPM,ok\n..."
pub fn parse_sdr(csv: &str) -> Vec<SdrReading> {
    csv.lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split(',').collect();
            if cols.len() < 2 || cols[0].trim().is_empty() {
                return None;
            }
            Some(SdrReading {
                name: cols[0].trim().to_string(),
                value: cols[1].trim().parse().ok(),
                unit: cols.get(2).map(|u| u.trim().to_string()).unwrap_or_default(),
            })
        })
        .collect()
}

/// Values of every SDR row whose name equals one of `labels`.
pub fn sdr_values(csv: &str, labels: &[&str]) -> Vec<f64> {
    parse_sdr(csv)
        .into_iter()
        .filter(|r| labels.contains(&r.name.as_str()))
        .filter_map(|r| r.value)
        .collect()
}

/// Parse `ipmitool fru` "key : value" lines into a map.
pub fn parse_fru(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// First hex byte of an `ipmitool raw` response, e.g. " 01" -> 1.
pub fn parse_raw_byte(text: &str) -> Result<u8> {
    let token = text
        .split_whitespace()
        .next()
        .ok_or_else(|| HushError::protocol("empty ipmitool raw response"))?;
    u8::from_str_radix(token.trim_start_matches("0x"), 16)
        .map_err(|_| HushError::protocol(format!("unexpected ipmitool raw response '{}'", text.trim())))
}

/// Drive paths listed by `fdisk -l` (`/dev/sdX` and `/dev/nvmeXnY`).
pub fn parse_fdisk_drives(text: &str) -> Vec<String> {
    let re = FDISK_DISK.get_or_init(|| {
        Regex::new(r"Disk (/dev/sd[a-z]+|/dev/nvme[0-9]+n[0-9]+)").expect("static regex")
    });
    re.captures_iter(text).map(|c| c[1].to_string()).collect()
}

/// Temperature from `smartctl -x` output. SATA drives print "Current Temperature:",
/// SAS drives "Current Drive Temperature:", NVMe drives "Temperature:".
pub fn parse_smart_temperature(text: &str) -> Option<f64> {
    let re = SMART_TEMPERATURE.get_or_init(|| {
        Regex::new(r"^(?:Current(?:\sDrive)?\s)?Temperature:\s*(\d+)").expect("static regex")
    });
    text.lines()
        .find_map(|line| re.captures(line.trim_start()))
        .and_then(|c| c[1].parse().ok())
}

/// One temperature per line from `nvidia-smi --query-gpu=temperature.gpu --format=csv,noheader`.
pub fn parse_nvidia_temperatures(text: &str) -> Result<Vec<f64>> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| {
            l.parse::<f64>()
                .map_err(|_| HushError::protocol(format!("unexpected nvidia-smi output '{}'", l)))
        })
        .collect()
}

/// Largest value, rounded down to whole degrees.
pub fn max_temperature(values: &[f64]) -> Option<i32> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
        .map(|v| v as i32)
}
