//! HP iLO 4: temperatures over Redfish, fan locks over the iLO SSH console.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::CachedValue;
use crate::config::types::{Credentials, SensorGroup, Vendor};
use crate::error::{HushError, Result};
use crate::hardware::idrac::reading;
use crate::hardware::types::{pwm_byte, SpeedValue};
use crate::hardware::Device;
use crate::system::http::JsonClient;
use crate::system::parser::max_temperature;
use crate::system::ssh::{Ssh, LEGACY_RSA_OPTIONS};

/// Age limit for thermal snapshots used to discover sensor and fan names.
pub const DISCOVERY_MAX_AGE: Duration = Duration::from_secs(60);
/// Age limit for thermal snapshots used for live temperature reads.
pub const READING_MAX_AGE: Duration = Duration::from_secs(3);

const CPU_FILTERS: [&str; 1] = ["CPU"];
const PCI_FILTERS: [&str; 3] = ["PCI", "HD", "LOM"];

/// Thermal snapshots keyed by BMC hostname, shared by every iLO driver of that BMC.
pub type ThermalCache = Arc<Mutex<HashMap<String, CachedValue<Value>>>>;

static FAN_NUMBER: OnceLock<Regex> = OnceLock::new();

pub struct Ilo4 {
    group: SensorGroup,
    hostname: String,
    client: JsonClient,
    ssh: Ssh,
    thermal: ThermalCache,
    fans: Option<Vec<String>>,
    temps: Vec<String>,
    locked: Vec<u32>,
}

impl Ilo4 {
    pub fn new(
        group: SensorGroup,
        oob: &Credentials,
        fans: Option<Vec<String>>,
        temps: Option<Vec<String>>,
        thermal: ThermalCache,
    ) -> Result<Self> {
        Ok(Self {
            group,
            hostname: oob.hostname.clone(),
            client: JsonClient::https(oob, "redfish/v1/")?,
            ssh: Ssh::new(oob, &oob.hostname).with_options(&LEGACY_RSA_OPTIONS),
            thermal,
            fans: fans.filter(|f| !f.is_empty()),
            temps: temps.unwrap_or_default(),
            locked: Vec::new(),
        })
    }

    async fn thermal_info(&self, max_age: Duration) -> Result<Value> {
        let mut snapshots = self.thermal.lock().await;
        let entry = snapshots
            .entry(self.hostname.clone())
            .or_insert_with(|| CachedValue::new(DISCOVERY_MAX_AGE));
        let client = &self.client;
        let snapshot = entry
            .get_or_refresh_within(Instant::now(), max_age, move || client.get("chassis/1/Thermal/"))
            .await?;
        Ok(snapshot.clone())
    }

    /// Names of enabled fans, e.g. "Fan 1".
    pub async fn fan_names(&self) -> Result<Vec<String>> {
        Ok(enabled_fans(&self.thermal_info(DISCOVERY_MAX_AGE).await?))
    }

    /// Enabled temperature sensors matching any filter, without their index prefix.
    pub async fn temp_names(&self, filters: &[&str]) -> Result<Vec<String>> {
        Ok(enabled_temperature_names(&self.thermal_info(DISCOVERY_MAX_AGE).await?, filters))
    }
}

fn is_enabled(entry: &Value) -> bool {
    entry["Status"]["State"].as_str() == Some("Enabled")
}

/// Sensor names as stored in the config: "01-Inlet Ambient" -> "Inlet Ambient".
fn short_name(name: &str) -> &str {
    name.get(3..).unwrap_or("")
}

pub(crate) fn enabled_fans(thermal: &Value) -> Vec<String> {
    thermal["Fans"]
        .as_array()
        .map(|fans| {
            fans.iter()
                .filter(|f| is_enabled(f))
                .filter_map(|f| f["FanName"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn enabled_temperature_names(thermal: &Value, filters: &[&str]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for temp in thermal["Temperatures"].as_array().into_iter().flatten() {
        let Some(name) = temp["Name"].as_str() else { continue };
        if is_enabled(temp) && filters.iter().any(|f| name.contains(f)) {
            let short = short_name(name).to_string();
            if !names.contains(&short) {
                names.push(short);
            }
        }
    }
    names
}

pub(crate) fn selected_readings(thermal: &Value, names: &[String]) -> Vec<f64> {
    thermal["Temperatures"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|t| is_enabled(t))
        .filter(|t| {
            t["Name"]
                .as_str()
                .is_some_and(|n| names.iter().any(|want| want == short_name(n)))
        })
        .filter_map(|t| reading(&t["CurrentReading"]))
        .collect()
}

/// Zero-based fan index from a fan name such as "Fan 3".
pub(crate) fn fan_index(name: &str) -> Result<u32> {
    let re = FAN_NUMBER.get_or_init(|| Regex::new(r"\d+").expect("static regex"));
    re.find(name)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .and_then(|n| n.checked_sub(1))
        .ok_or_else(|| HushError::config(format!("cannot derive a fan index from '{}'", name)))
}

#[async_trait]
impl Device for Ilo4 {
    fn vendor(&self) -> Vendor {
        Vendor::HpIlo4
    }

    /// Sensor groups without an explicit selection discover their names ("All" mode).
    async fn initialize(&mut self) -> Result<()> {
        if !self.temps.is_empty() {
            return Ok(());
        }
        let filters: &[&str] = match self.group {
            SensorGroup::Cpu => &CPU_FILTERS,
            SensorGroup::Pci => &PCI_FILTERS,
            _ => return Ok(()),
        };
        self.temps = self.temp_names(filters).await?;
        info!("{} discovered {} sensors: {:?}", self.hostname, self.group, self.temps);
        Ok(())
    }

    async fn get_temp(&mut self) -> Result<i32> {
        let thermal = self.thermal_info(READING_MAX_AGE).await?;
        max_temperature(&selected_readings(&thermal, &self.temps)).ok_or_else(|| {
            HushError::protocol(format!("{} reported none of the sensors {:?}", self.hostname, self.temps))
        })
    }

    async fn set_speed(&mut self, speed: SpeedValue) -> Result<()> {
        let pwm = pwm_byte(speed.to_percent());
        if self.fans.is_none() {
            let discovered = self.fan_names().await?;
            if discovered.is_empty() {
                return Err(HushError::protocol(format!("{} lists no enabled fans", self.hostname)));
            }
            debug!("{} discovered fans {:?}", self.hostname, discovered);
            self.fans = Some(discovered);
        }
        let indices = self
            .fans
            .iter()
            .flatten()
            .map(|f| fan_index(f))
            .collect::<Result<Vec<_>>>()?;
        for index in indices {
            self.ssh.run_checked(&format!("fan p {} lock {}", index, pwm)).await?;
            if !self.locked.contains(&index) {
                self.locked.push(index);
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        for index in std::mem::take(&mut self.locked) {
            if let Err(e) = self.ssh.run_checked(&format!("fan p {} unlock", index)).await {
                warn!("{} failed to unlock fan {}: {}", self.hostname, index, e);
            }
        }
        Ok(())
    }
}
