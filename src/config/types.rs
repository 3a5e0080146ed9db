//! Configuration structs, vendor catalogue and defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::hardware::types::{SpeedValue, Vocabulary};

pub const REDACTED: &str = "********";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HushConfig {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub hosts: BTreeMap<String, HostConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Seconds between control ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval: f64,
}

pub fn default_log_level() -> String { "INFO".to_string() }
pub fn default_tick_interval() -> f64 { 1.0 }
pub fn default_delay() -> u64 { 30 }

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            tick_interval: default_tick_interval(),
        }
    }
}

/// Everything the control loop needs to know about one managed machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub oob: Credentials,
    #[serde(default)]
    pub os: Credentials,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt: Option<Credentials>,
    #[serde(default)]
    pub speed: DriverSelection,
    #[serde(default)]
    pub cpu: DriverSelection,
    #[serde(default)]
    pub pci: DriverSelection,
    #[serde(default)]
    pub drive: DriverSelection,
    #[serde(default)]
    pub gpu: DriverSelection,
    #[serde(default)]
    pub chassis: DriverSelection,
    /// Group -> host whose driver serves this group (only `speed` is used today).
    #[serde(default)]
    pub shared: BTreeMap<SensorGroup, String>,
    #[serde(default)]
    pub discrete: Discrete,
    #[serde(default = "default_delay")]
    pub delay: u64,
    #[serde(default)]
    pub algo: BTreeMap<SensorGroup, AlgoConfig>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            oob: Credentials::default(),
            os: Credentials::default(),
            mqtt: None,
            speed: DriverSelection::None,
            cpu: DriverSelection::None,
            pci: DriverSelection::None,
            drive: DriverSelection::None,
            gpu: DriverSelection::None,
            chassis: DriverSelection::None,
            shared: BTreeMap::new(),
            discrete: Discrete::default(),
            delay: default_delay(),
            algo: BTreeMap::new(),
        }
    }
}

impl HostConfig {
    pub fn selection(&self, group: SensorGroup) -> &DriverSelection {
        match group {
            SensorGroup::Speed => &self.speed,
            SensorGroup::Cpu => &self.cpu,
            SensorGroup::Pci => &self.pci,
            SensorGroup::Drive => &self.drive,
            SensorGroup::Gpu => &self.gpu,
            SensorGroup::Chassis => &self.chassis,
        }
    }

    pub fn selection_mut(&mut self, group: SensorGroup) -> &mut DriverSelection {
        match group {
            SensorGroup::Speed => &mut self.speed,
            SensorGroup::Cpu => &mut self.cpu,
            SensorGroup::Pci => &mut self.pci,
            SensorGroup::Drive => &mut self.drive,
            SensorGroup::Gpu => &mut self.gpu,
            SensorGroup::Chassis => &mut self.chassis,
        }
    }

    pub fn shared_target(&self, group: SensorGroup) -> Option<&str> {
        self.shared.get(&group).map(String::as_str).filter(|h| !h.is_empty())
    }

    /// Copy with every password replaced, for logs and `--show-config`.
    pub fn redacted(&self) -> HostConfig {
        let mut copy = self.clone();
        copy.oob.redact();
        copy.os.redact();
        if let Some(mqtt) = copy.mqtt.as_mut() {
            mqtt.redact();
        }
        copy
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl Credentials {
    pub fn password_or_empty(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }

    fn redact(&mut self) {
        if self.password.as_deref().is_some_and(|p| !p.is_empty()) {
            self.password = Some(REDACTED.to_string());
        }
    }
}

/// User-narrowed subsets of what a vendor would otherwise auto-discover.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Discrete {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fans: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drives: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<String>>,
}

/// Named role a driver fulfils for a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorGroup {
    Speed,
    Cpu,
    Pci,
    Drive,
    Gpu,
    Chassis,
}

impl SensorGroup {
    /// Groups that report temperatures, in evaluation order.
    pub const TEMPERATURE: [SensorGroup; 5] = [
        SensorGroup::Cpu,
        SensorGroup::Pci,
        SensorGroup::Drive,
        SensorGroup::Gpu,
        SensorGroup::Chassis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorGroup::Speed => "speed",
            SensorGroup::Cpu => "cpu",
            SensorGroup::Pci => "pci",
            SensorGroup::Drive => "drive",
            SensorGroup::Gpu => "gpu",
            SensorGroup::Chassis => "chassis",
        }
    }
}

impl fmt::Display for SensorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five curve levels, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    Min,
    Low,
    Medium,
    High,
    Max,
}

impl Level {
    pub const ALL: [Level; 5] = [Level::Min, Level::Low, Level::Medium, Level::High, Level::Max];
}

/// Which credential set a vendor driver authenticates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Management controller (IPMI, Redfish, XML API).
    Oob,
    /// Host operating system over SSH.
    Os,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    DellIdrac7,
    DellIdrac8,
    DellIdrac9,
    HpIlo4,
    SupermicroX9,
    SupermicroX10,
    SupermicroX11,
    SupermicroGpu,
    CiscoM3,
    CiscoM4,
    CiscoM5,
    Smart,
    Nvidia,
    OpenJbod,
}

impl Vendor {
    pub const ALL: [Vendor; 14] = [
        Vendor::DellIdrac7,
        Vendor::DellIdrac8,
        Vendor::DellIdrac9,
        Vendor::HpIlo4,
        Vendor::SupermicroX9,
        Vendor::SupermicroX10,
        Vendor::SupermicroX11,
        Vendor::SupermicroGpu,
        Vendor::CiscoM3,
        Vendor::CiscoM4,
        Vendor::CiscoM5,
        Vendor::Smart,
        Vendor::Nvidia,
        Vendor::OpenJbod,
    ];

    /// Display name, also the string stored in the config file.
    pub fn name(&self) -> &'static str {
        match self {
            Vendor::DellIdrac7 => "Dell iDRAC 7",
            Vendor::DellIdrac8 => "Dell iDRAC 8",
            Vendor::DellIdrac9 => "Dell iDRAC 9",
            Vendor::HpIlo4 => "HP iLO 4",
            Vendor::SupermicroX9 => "Supermicro X9",
            Vendor::SupermicroX10 => "Supermicro X10",
            Vendor::SupermicroX11 => "Supermicro X11",
            Vendor::SupermicroGpu => "Supermicro GPU",
            Vendor::CiscoM3 => "Cisco M3",
            Vendor::CiscoM4 => "Cisco M4",
            Vendor::CiscoM5 => "Cisco M5",
            Vendor::Smart => "SMART",
            Vendor::Nvidia => "Nvidia",
            Vendor::OpenJbod => "OpenJBOD",
        }
    }

    pub fn serves(&self, group: SensorGroup) -> bool {
        use SensorGroup::*;
        use Vendor::*;
        match group {
            Speed => matches!(
                self,
                DellIdrac7 | DellIdrac8 | DellIdrac9 | HpIlo4 | SupermicroX9 | SupermicroX10
                    | SupermicroX11 | CiscoM3 | CiscoM4 | CiscoM5 | Nvidia | OpenJbod
            ),
            Cpu => matches!(
                self,
                DellIdrac7 | DellIdrac8 | DellIdrac9 | HpIlo4 | SupermicroX9 | SupermicroX10
                    | SupermicroX11 | CiscoM3 | CiscoM4 | CiscoM5
            ),
            Pci => matches!(self, HpIlo4),
            Drive => matches!(self, Smart),
            Gpu => matches!(self, Nvidia | SupermicroGpu),
            Chassis => matches!(self, OpenJbod),
        }
    }

    pub fn credentials(&self) -> CredentialKind {
        match self {
            Vendor::Smart | Vendor::Nvidia => CredentialKind::Os,
            _ => CredentialKind::Oob,
        }
    }

    /// Symbolic vocabulary for speed drivers that take named levels.
    pub fn vocabulary(&self) -> Option<Vocabulary> {
        match self {
            Vendor::DellIdrac9 => Some(Vocabulary::FanOffset),
            Vendor::CiscoM3 | Vendor::CiscoM4 | Vendor::CiscoM5 => Some(Vocabulary::FanPolicy),
            _ => None,
        }
    }

    /// Bounds for the raw (pre-negation) PID controller output.
    pub fn pid_limits(&self) -> (f64, f64) {
        match self.vocabulary() {
            Some(_) => (-100.0, 0.0),
            None => (-100.0, -5.0),
        }
    }

    /// Speeds a curve uses for levels the user never set.
    pub fn default_curve_speeds(&self) -> [CurveSpeed; 5] {
        match self.vocabulary() {
            Some(vocabulary) => {
                let names = vocabulary.names();
                std::array::from_fn(|i| CurveSpeed::Name(names[i].to_string()))
            }
            None => [5.0, 20.0, 50.0, 70.0, 100.0].map(CurveSpeed::Percent),
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Vendor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Vendor::ALL
            .iter()
            .copied()
            .find(|v| v.name() == s)
            .ok_or_else(|| format!("unknown vendor '{}'", s))
    }
}

/// Driver choice for one sensor group: nothing, another host's driver, or a vendor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DriverSelection {
    #[default]
    None,
    Shared,
    Vendor(Vendor),
}

impl DriverSelection {
    pub fn vendor(&self) -> Option<Vendor> {
        match self {
            DriverSelection::Vendor(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, DriverSelection::Shared)
    }
}

impl TryFrom<String> for DriverSelection {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "" | "None" => Ok(DriverSelection::None),
            "Shared" => Ok(DriverSelection::Shared),
            other => other.parse().map(DriverSelection::Vendor),
        }
    }
}

impl From<DriverSelection> for String {
    fn from(value: DriverSelection) -> Self {
        match value {
            DriverSelection::None => "None".to_string(),
            DriverSelection::Shared => "Shared".to_string(),
            DriverSelection::Vendor(v) => v.name().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgoKind {
    #[default]
    Curve,
    Pid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgoConfig {
    #[serde(rename = "type", default)]
    pub kind: AlgoKind,
    #[serde(default)]
    pub curve: CurveConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<PidTuning>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurveConfig {
    #[serde(default)]
    pub temp: BTreeMap<Level, i32>,
    /// A level stored as `null` counts as unset.
    #[serde(default)]
    pub speed: BTreeMap<Level, Option<CurveSpeed>>,
}

/// One curve level's speed as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CurveSpeed {
    Percent(f64),
    Name(String),
}

impl CurveSpeed {
    /// Resolve against the speed driver's vocabulary. A symbolic name is looked up
    /// in `vocabulary`; a number is a percentage either way.
    pub fn resolve(&self, vocabulary: Option<Vocabulary>) -> Result<SpeedValue, String> {
        match self {
            CurveSpeed::Percent(p) => Ok(SpeedValue::percent(p.round() as i64)),
            CurveSpeed::Name(name) => {
                let vocabulary = vocabulary
                    .ok_or_else(|| format!("speed '{}' needs a vendor with named levels", name))?;
                SpeedValue::named(vocabulary, name)
                    .ok_or_else(|| format!("'{}' is not a valid level for this vendor", name))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidTuning {
    #[serde(rename = "Kp")]
    pub kp: f64,
    #[serde(rename = "Ki")]
    pub ki: f64,
    #[serde(rename = "Kd")]
    pub kd: f64,
    #[serde(rename = "Target")]
    pub target: f64,
}

impl Default for PidTuning {
    fn default() -> Self {
        Self { kp: 5.0, ki: 0.01, kd: 0.1, target: 40.0 }
    }
}
