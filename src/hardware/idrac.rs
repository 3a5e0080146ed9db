//! Dell iDRAC drivers: IPMI raw commands (iDRAC 7/8) and Redfish (iDRAC 9).

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;
use tracing::{debug, error, info};

use crate::config::types::{Credentials, Vendor};
use crate::error::{HushError, Result};
use crate::hardware::types::{hex_byte, SpeedValue, Vocabulary};
use crate::hardware::Device;
use crate::system::http::JsonClient;
use crate::system::ipmitool::IpmiTool;
use crate::system::parser::{max_temperature, sdr_values};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FanMode {
    Manual = 0,
    Idrac = 1,
}

/// iDRAC 7/8: manual fan mode plus a direct percentage write for all fans.
pub struct IdracIpmi {
    vendor: Vendor,
    ipmi: IpmiTool,
    fan_mode: FanMode,
}

impl IdracIpmi {
    pub fn new(vendor: Vendor, oob: &Credentials) -> Self {
        Self { vendor, ipmi: IpmiTool::new(oob), fan_mode: FanMode::Idrac }
    }

    async fn set_fan_mode(&mut self, mode: FanMode) -> Result<()> {
        let out = self.ipmi.raw(&format!("0x30 0x30 0x01 0x0{}", mode as u8)).await?;
        expect_empty(&out.stdout(), self.ipmi.hostname())?;
        self.fan_mode = mode;
        info!("{} fan mode set to {:?}", self.ipmi.hostname(), mode);
        Ok(())
    }
}

/// OEM raw commands answer with a single empty line on success.
fn expect_empty(stdout: &str, hostname: &str) -> Result<()> {
    if stdout.trim().is_empty() {
        Ok(())
    } else {
        error!("{} unexpected raw response: {:?}", hostname, stdout);
        Err(HushError::protocol(format!("unexpected raw response from {}: {}", hostname, stdout.trim())))
    }
}

#[async_trait]
impl Device for IdracIpmi {
    fn vendor(&self) -> Vendor {
        self.vendor
    }

    async fn get_temp(&mut self) -> Result<i32> {
        let out = self.ipmi.sdr_csv().await?;
        let stdout = out.stdout();
        max_temperature(&sdr_values(&stdout, &["Temp"])).ok_or_else(|| {
            error!("{} failed to get cpu temperature from: {}", self.ipmi.hostname(), stdout);
            HushError::protocol(format!("{} reported no CPU temperature rows", self.ipmi.hostname()))
        })
    }

    async fn set_speed(&mut self, speed: SpeedValue) -> Result<()> {
        if self.fan_mode != FanMode::Manual {
            self.set_fan_mode(FanMode::Manual).await?;
        }
        let percent = speed.to_percent();
        let out = self.ipmi.raw(&format!("0x30 0x30 0x02 0xff {}", hex_byte(percent))).await?;
        expect_empty(&out.stdout(), self.ipmi.hostname())
    }

    /// Hand the fans back to the iDRAC, but only from the driver that took them.
    async fn close(&mut self) -> Result<()> {
        if self.fan_mode != FanMode::Manual {
            return Ok(());
        }
        self.set_fan_mode(FanMode::Idrac).await
    }
}

static CPU_SENSOR_PATH: OnceLock<Regex> = OnceLock::new();

const PATCH_SUCCESS_MARKERS: [&str; 2] = [
    "The request completed successfully.",
    "The operation successfully completed.",
];

/// iDRAC 9: CPU sensors over Redfish, fan speed offset through the attribute registry.
pub struct IdracRedfish {
    hostname: String,
    client: JsonClient,
    applied: Option<u8>,
}

impl IdracRedfish {
    pub fn new(oob: &Credentials) -> Result<Self> {
        Ok(Self {
            hostname: oob.hostname.clone(),
            client: JsonClient::https(oob, "redfish/v1/")?,
            applied: None,
        })
    }
}

/// Sensor paths below the Redfish root, in listing order without duplicates.
pub(crate) fn cpu_sensor_paths(listing: &Value) -> Vec<String> {
    let re = CPU_SENSOR_PATH.get_or_init(|| {
        Regex::new(r"Chassis/System\.Embedded\.1/Sensors/CPU\dTemp").expect("static regex")
    });
    let text = listing.to_string();
    let mut paths: Vec<String> = Vec::new();
    for m in re.find_iter(&text) {
        if !paths.iter().any(|p| p == m.as_str()) {
            paths.push(m.as_str().to_string());
        }
    }
    paths
}

/// Numeric reading that some firmware reports as a string.
pub(crate) fn reading(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn patch_succeeded(response: &Value) -> bool {
    let text = response.to_string();
    PATCH_SUCCESS_MARKERS.iter().all(|m| text.contains(m))
}

#[async_trait]
impl Device for IdracRedfish {
    fn vendor(&self) -> Vendor {
        Vendor::DellIdrac9
    }

    async fn get_temp(&mut self) -> Result<i32> {
        let listing = self.client.get("Chassis/System.Embedded.1/Sensors").await?;
        let mut temps = Vec::new();
        for path in cpu_sensor_paths(&listing) {
            let sensor = self.client.get(&path).await?;
            match reading(&sensor["Reading"]) {
                Some(t) => temps.push(t),
                None => {
                    error!("{} failed to get cpu temperature from: {}", self.hostname, sensor);
                    return Err(HushError::protocol(format!("{} has no Reading", path)));
                }
            }
        }
        max_temperature(&temps)
            .ok_or_else(|| HushError::protocol(format!("{} lists no CPU temperature sensors", self.hostname)))
    }

    async fn set_speed(&mut self, speed: SpeedValue) -> Result<()> {
        let vocabulary = Vocabulary::FanOffset;
        let tier = speed.to_tier(vocabulary);
        if self.applied == Some(tier) {
            debug!("{} fan offset already {}", self.hostname, vocabulary.name(tier));
            return Ok(());
        }

        let payload = json!({"Attributes": {"ThermalSettings.1.FanSpeedOffset": vocabulary.name(tier)}});
        let response = self
            .client
            .patch("Managers/System.Embedded.1/Attributes", &payload)
            .await?;
        if !patch_succeeded(&response) {
            error!("{} failed to set fan offset: {}", self.hostname, response);
            return Err(HushError::protocol(format!("{} did not confirm the fan offset change", self.hostname)));
        }
        info!("{} fan offset set to {}", self.hostname, vocabulary.name(tier));
        self.applied = Some(tier);
        Ok(())
    }
}
