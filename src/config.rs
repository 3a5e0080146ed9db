//! Configuration types, file persistence and the read accessors the control loop uses.

pub mod persistence;
pub mod types;

use std::collections::BTreeMap;

use crate::error::{HushError, Result};
use types::{AlgoConfig, CurveSpeed, HostConfig, HushConfig, Level, PidTuning, SensorGroup, Vendor};

/// Curve temperatures used when a level was never configured.
pub const DEFAULT_CURVE_TEMPS: [i32; 5] = [30, 40, 50, 60, 70];

impl HushConfig {
    /// The named host, or a `Config` error when it is not configured.
    pub fn host(&self, name: &str) -> Result<&HostConfig> {
        self.hosts
            .get(name)
            .ok_or_else(|| HushError::config(format!("host '{}' is not configured", name)))
    }

    /// Get-or-create with defaults, for callers that edit the configuration.
    pub fn host_mut(&mut self, name: &str) -> &mut HostConfig {
        self.hosts.entry(name.to_string()).or_default()
    }

    /// Algorithm definition for one group; an unset group is a default curve.
    pub fn algo_sensor(&self, host: &str, group: SensorGroup) -> Result<AlgoConfig> {
        Ok(self.host(host)?.algo.get(&group).cloned().unwrap_or_default())
    }

    /// Curve temperatures in level order, filling unset levels from the defaults.
    pub fn curve_temp(&self, host: &str, group: SensorGroup) -> Result<BTreeMap<Level, i32>> {
        let algo = self.algo_sensor(host, group)?;
        Ok(Level::ALL
            .iter()
            .zip(DEFAULT_CURVE_TEMPS)
            .map(|(level, default)| (*level, algo.curve.temp.get(level).copied().unwrap_or(default)))
            .collect())
    }

    /// Curve speeds in level order. Unset levels take the speed driver's defaults.
    pub fn curve_speed(
        &self,
        host: &str,
        group: SensorGroup,
        default: &[CurveSpeed; 5],
    ) -> Result<BTreeMap<Level, CurveSpeed>> {
        let algo = self.algo_sensor(host, group)?;
        Ok(Level::ALL
            .iter()
            .zip(default.iter())
            .map(|(level, fallback)| {
                let speed = algo
                    .curve
                    .speed
                    .get(level)
                    .cloned()
                    .flatten()
                    .unwrap_or_else(|| fallback.clone());
                (*level, speed)
            })
            .collect())
    }

    pub fn pid(&self, host: &str, group: SensorGroup) -> Result<PidTuning> {
        Ok(self.algo_sensor(host, group)?.pid.unwrap_or_default())
    }

    /// Vendor of the speed driver that serves `host`, following a shared selection.
    pub fn speed_vendor(&self, host: &str) -> Result<Option<Vendor>> {
        let cfg = self.host(host)?;
        if cfg.speed.is_shared() {
            let target = cfg.shared_target(SensorGroup::Speed).ok_or_else(|| {
                HushError::config(format!("{} shares its speed driver but names no target", host))
            })?;
            return Ok(self.host(target)?.speed.vendor());
        }
        Ok(cfg.speed.vendor())
    }

    /// Whole configuration with passwords masked.
    pub fn redacted(&self) -> HushConfig {
        HushConfig {
            agent: self.agent.clone(),
            hosts: self
                .hosts
                .iter()
                .map(|(name, host)| (name.clone(), host.redacted()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{AlgoKind, DriverSelection};

    fn config() -> HushConfig {
        serde_json::from_str(
            r#"{
                "hosts": {
                    "r720": {
                        "speed": "Dell iDRAC 8",
                        "algo": {
                            "cpu": {"type": "curve", "curve": {"temp": {"Min": 35}, "speed": {"Max": 90}}},
                            "drive": {"type": "pid", "pid": {"Kp": 1, "Ki": 0, "Kd": 0, "Target": 45}}
                        }
                    },
                    "jbod": {"speed": "Shared", "shared": {"speed": "r720"}}
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn missing_host_is_a_config_error() {
        assert!(matches!(config().host("nope"), Err(HushError::Config(_))));
    }

    #[test]
    fn curve_accessors_fill_defaults_per_level() {
        let cfg = config();
        let temps = cfg.curve_temp("r720", SensorGroup::Cpu).unwrap();
        assert_eq!(temps.values().copied().collect::<Vec<_>>(), vec![35, 40, 50, 60, 70]);

        let defaults = Vendor::DellIdrac8.default_curve_speeds();
        let speeds = cfg.curve_speed("r720", SensorGroup::Cpu, &defaults).unwrap();
        assert_eq!(speeds[&Level::Min], CurveSpeed::Percent(5.0));
        assert_eq!(speeds[&Level::Max], CurveSpeed::Percent(90.0));
    }

    #[test]
    fn unset_group_is_a_default_curve() {
        let cfg = config();
        let algo = cfg.algo_sensor("r720", SensorGroup::Gpu).unwrap();
        assert_eq!(algo.kind, AlgoKind::Curve);
        assert_eq!(cfg.pid("r720", SensorGroup::Gpu).unwrap(), PidTuning::default());
        assert_eq!(cfg.pid("r720", SensorGroup::Drive).unwrap().target, 45.0);
    }

    #[test]
    fn shared_speed_vendor_follows_target() {
        let mut cfg = config();
        assert_eq!(cfg.speed_vendor("jbod").unwrap(), Some(Vendor::DellIdrac8));

        cfg.host_mut("jbod").shared.clear();
        assert!(cfg.speed_vendor("jbod").is_err());

        cfg.host_mut("new").cpu = DriverSelection::Vendor(Vendor::CiscoM5);
        assert_eq!(cfg.host("new").unwrap().delay, 30);
    }
}
