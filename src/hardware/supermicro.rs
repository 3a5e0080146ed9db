//! Supermicro X9/X10/X11 fan control over IPMI raw commands, plus GPU sensors.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::config::types::{Credentials, Vendor};
use crate::error::{HushError, Result};
use crate::hardware::types::{hex_byte, pwm_byte, SpeedValue};
use crate::hardware::Device;
use crate::system::ipmitool::IpmiTool;
use crate::system::parser::{max_temperature, parse_fru, parse_raw_byte, sdr_values};

pub const CPU_LABELS: [&str; 3] = ["CPU Temp", "CPU1 Temp", "CPU2 Temp"];
pub const GPU_LABELS: [&str; 7] = [
    "GPU Temp",
    "GPU1 Temp",
    "GPU2 Temp",
    "GPU3 Temp",
    "GPU4 Temp",
    "GPU5 Temp",
    "GPU6 Temp",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanMode {
    Standard = 0,
    Full = 1,
    Optimal = 2,
    HeavyIo = 4,
}

impl FanMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(FanMode::Standard),
            1 => Some(FanMode::Full),
            2 => Some(FanMode::Optimal),
            4 => Some(FanMode::HeavyIo),
            _ => None,
        }
    }
}

/// Sensor labels a driver reads, overridable by the discrete selection.
fn labels(defaults: &[&str], discrete: Option<Vec<String>>) -> Vec<String> {
    match discrete {
        Some(list) if !list.is_empty() => list,
        _ => defaults.iter().map(|s| s.to_string()).collect(),
    }
}

async fn read_max(ipmi: &IpmiTool, labels: &[String], what: &str) -> Result<i32> {
    let out = ipmi.sdr_csv().await?;
    let stdout = out.stdout();
    let wanted: Vec<&str> = labels.iter().map(String::as_str).collect();
    max_temperature(&sdr_values(&stdout, &wanted)).ok_or_else(|| {
        error!("{} failed to get {} temperature from: {}", ipmi.hostname(), what, stdout);
        HushError::protocol(format!("{} reported none of {:?}", ipmi.hostname(), labels))
    })
}

pub struct Supermicro {
    vendor: Vendor,
    ipmi: IpmiTool,
    cpu_labels: Vec<String>,
    zones: Option<Vec<String>>,
    fan_mode: Option<FanMode>,
    /// Set once this driver switched the board to full mode.
    controlling: bool,
    last_percent: Option<u8>,
    fru: Option<BTreeMap<String, String>>,
}

impl Supermicro {
    pub fn new(vendor: Vendor, oob: &Credentials, cpus: Option<Vec<String>>, zones: Option<Vec<String>>) -> Self {
        Self {
            vendor,
            ipmi: IpmiTool::new(oob),
            cpu_labels: labels(&CPU_LABELS, cpus),
            zones: zones.filter(|z| !z.is_empty()),
            fan_mode: None,
            controlling: false,
            last_percent: None,
            fru: None,
        }
    }

    pub async fn get_fan_mode(&mut self) -> Result<FanMode> {
        let out = self.ipmi.raw("0x30 0x45 0x00").await?;
        let byte = parse_raw_byte(&out.stdout())?;
        let mode = FanMode::from_byte(byte)
            .ok_or_else(|| HushError::protocol(format!("unknown Supermicro fan mode {}", byte)))?;
        self.fan_mode = Some(mode);
        Ok(mode)
    }

    pub async fn set_fan_mode(&mut self, mode: FanMode) -> Result<()> {
        if self.fan_mode != Some(mode) {
            self.ipmi.raw(&format!("0x30 0x45 0x01 {}", hex_byte(mode as u8))).await?;
            info!("{} fan mode set to {:?}", self.ipmi.hostname(), mode);
            self.fan_mode = Some(mode);
        }
        Ok(())
    }

    pub async fn board_part_number(&mut self) -> Result<String> {
        if self.fru.is_none() {
            let out = self.ipmi.fru().await?;
            let fru = parse_fru(&out.stdout());
            debug!("{} fru = {:?}", self.ipmi.hostname(), fru);
            self.fru = Some(fru);
        }
        Ok(self
            .fru
            .as_ref()
            .and_then(|f| f.get("Board Part Number").cloned())
            .unwrap_or_default())
    }

    /// X10/X11 fan zones: the configured list, else four zones on X10DRG boards and two elsewhere.
    pub async fn zones(&mut self) -> Result<Vec<String>> {
        if let Some(zones) = &self.zones {
            return Ok(zones.iter().map(|z| normalize_zone(z)).collect());
        }
        let part = self.board_part_number().await?;
        let defaults: &[&str] = if part.contains("X10DRG") { &["00", "01", "02", "03"] } else { &["00", "01"] };
        let zones: Vec<String> = defaults.iter().map(|z| z.to_string()).collect();
        info!("{} board {} uses zones {:?}", self.ipmi.hostname(), part, zones);
        self.zones = Some(zones.clone());
        Ok(zones)
    }

    /// Raw argument lists for one PWM write.
    async fn pwm_commands(&mut self, pwm: u8) -> Result<Vec<String>> {
        let pwm = hex_byte(pwm);
        match self.vendor {
            Vendor::SupermicroX9 => Ok(vec![
                format!("0x30 0x91 0x5A 0x03 0x10 {}", pwm),
                format!("0x30 0x91 0x5A 0x03 0x11 {}", pwm),
            ]),
            _ => Ok(self
                .zones()
                .await?
                .iter()
                .map(|zone| format!("0x30 0x70 0x66 0x01 0x{} {}", zone, pwm))
                .collect()),
        }
    }
}

/// "0x1", "1" and "01" all name zone 01.
fn normalize_zone(zone: &str) -> String {
    let digits = zone.trim().trim_start_matches("0x");
    format!("{:0>2}", digits)
}

#[async_trait]
impl Device for Supermicro {
    fn vendor(&self) -> Vendor {
        self.vendor
    }

    /// Learn the current fan mode so the first write only switches when needed.
    async fn initialize(&mut self) -> Result<()> {
        match self.get_fan_mode().await {
            Ok(mode) => debug!("{} fan mode is {:?}", self.ipmi.hostname(), mode),
            Err(e) => warn!("{} failed to read fan mode: {}", self.ipmi.hostname(), e),
        }
        Ok(())
    }

    async fn get_temp(&mut self) -> Result<i32> {
        read_max(&self.ipmi, &self.cpu_labels, "cpu").await
    }

    async fn set_speed(&mut self, speed: SpeedValue) -> Result<()> {
        self.set_fan_mode(FanMode::Full).await?;
        self.controlling = true;
        let percent = speed.to_percent();
        if self.last_percent == Some(percent) {
            return Ok(());
        }
        for command in self.pwm_commands(pwm_byte(percent)).await? {
            self.ipmi.raw(&command).await?;
        }
        self.last_percent = Some(percent);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.controlling {
            return Ok(());
        }
        self.controlling = false;
        self.last_percent = None;
        self.set_fan_mode(FanMode::Standard).await
    }
}

/// GPU temperatures reported by the Supermicro BMC. Sensor only.
pub struct SupermicroGpu {
    ipmi: IpmiTool,
    labels: Vec<String>,
}

impl SupermicroGpu {
    pub fn new(oob: &Credentials) -> Self {
        Self { ipmi: IpmiTool::new(oob), labels: labels(&GPU_LABELS, None) }
    }
}

#[async_trait]
impl Device for SupermicroGpu {
    fn vendor(&self) -> Vendor {
        Vendor::SupermicroGpu
    }

    async fn get_temp(&mut self) -> Result<i32> {
        read_max(&self.ipmi, &self.labels, "gpu").await
    }

    async fn set_speed(&mut self, _speed: SpeedValue) -> Result<()> {
        Err(HushError::config("Supermicro GPU is a sensor-only driver"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::ipmitool::recording;

    #[test]
    fn fan_mode_bytes() {
        assert_eq!(FanMode::from_byte(1), Some(FanMode::Full));
        assert_eq!(FanMode::from_byte(4), Some(FanMode::HeavyIo));
        assert_eq!(FanMode::from_byte(3), None);
    }

    #[test]
    fn zones_are_two_digit() {
        assert_eq!(normalize_zone("0x1"), "01");
        assert_eq!(normalize_zone("3"), "03");
        assert_eq!(normalize_zone("00"), "00");
    }

    #[test]
    fn discrete_cpus_override_defaults() {
        assert_eq!(labels(&CPU_LABELS, None).len(), 3);
        assert_eq!(labels(&CPU_LABELS, Some(vec![])).len(), 3);
        assert_eq!(labels(&CPU_LABELS, Some(vec!["CPU1 Temp".into()])), vec!["CPU1 Temp"]);
    }

    #[tokio::test]
    async fn x9_writes_both_fan_headers() {
        let mut board = Supermicro::new(Vendor::SupermicroX9, &Credentials::default(), None, None);
        let commands = board.pwm_commands(pwm_byte(50)).await.unwrap();
        assert_eq!(commands, vec!["0x30 0x91 0x5A 0x03 0x10 0x7f", "0x30 0x91 0x5A 0x03 0x11 0x7f"]);
    }

    #[tokio::test]
    async fn x10_uses_configured_zones_without_fru_lookup() {
        let mut board = Supermicro::new(
            Vendor::SupermicroX10,
            &Credentials::default(),
            None,
            Some(vec!["0".into(), "1".into(), "2".into()]),
        );
        let commands = board.pwm_commands(255).await.unwrap();
        assert_eq!(
            commands,
            vec![
                "0x30 0x70 0x66 0x01 0x00 0xff",
                "0x30 0x70 0x66 0x01 0x01 0xff",
                "0x30 0x70 0x66 0x01 0x02 0xff"
            ]
        );
    }

    #[tokio::test]
    async fn sensor_only_close_leaves_full_mode_alone() {
        let dir = tempfile::tempdir().unwrap();
        let (tool, log) = recording::ipmitool(dir.path());
        let mut speed = Supermicro::new(Vendor::SupermicroX9, &Credentials::default(), None, None);
        speed.ipmi = tool.clone();
        let mut cpu = Supermicro::new(Vendor::SupermicroX9, &Credentials::default(), None, None);
        cpu.ipmi = tool;

        speed.set_speed(SpeedValue::Percent(30)).await.unwrap();
        cpu.close().await.unwrap();
        speed.set_speed(SpeedValue::Percent(30)).await.unwrap();
        speed.close().await.unwrap();

        let modes: Vec<String> = recording::commands(&log)
            .into_iter()
            .filter(|c| c.starts_with("raw 0x30 0x45 0x01"))
            .collect();
        assert_eq!(modes, vec!["raw 0x30 0x45 0x01 0x01", "raw 0x30 0x45 0x01 0x00"]);
        assert_eq!(recording::commands(&log).len(), 4);
    }
}
