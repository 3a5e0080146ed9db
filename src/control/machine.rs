//! One control cycle for a primary host and the hosts sharing its speed driver.

use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::types::{AlgoKind, HushConfig, SensorGroup};
use crate::control::curve::Curve;
use crate::control::pid::PidBank;
use crate::error::{HushError, Result};
use crate::hardware::types::SpeedValue;
use crate::hardware::Registry;
use crate::monitor::Status;

pub struct Machine<'a> {
    pub registry: &'a Registry,
    pub config: &'a HushConfig,
    pub pids: &'a mut PidBank,
}

impl Machine<'_> {
    /// Read every sensor of `primary` and `shared`, apply the highest demand through
    /// the primary's speed driver and return one status per host.
    pub async fn run(&mut self, primary: &str, shared: &[String], now: Instant) -> Result<Vec<Status>> {
        let hosts: Vec<&str> = std::iter::once(primary)
            .chain(shared.iter().map(String::as_str))
            .collect();

        let speed_driver = self.registry.driver(self.config, primary, SensorGroup::Speed).await?;
        let speed_vendor = match &speed_driver {
            Some(handle) => Some(handle.lock().await.vendor()),
            None => None,
        };

        let mut readings: Vec<(&str, BTreeMap<SensorGroup, i32>)> = Vec::with_capacity(hosts.len());
        let mut winner: Option<SpeedValue> = None;
        for host in hosts.iter().copied() {
            let mut temperatures = BTreeMap::new();
            for group in SensorGroup::TEMPERATURE {
                let Some(handle) = self.registry.driver(self.config, host, group).await? else {
                    continue;
                };
                let temp = handle.lock().await.get_temp().await?;
                debug!("{} {} temperature {}", host, group, temp);
                temperatures.insert(group, temp);

                let Some(vendor) = speed_vendor else { continue };
                let speed = match self.config.algo_sensor(host, group)?.kind {
                    AlgoKind::Pid => {
                        let tuning = self.config.pid(host, group)?;
                        self.pids.compute(host, group, tuning, vendor.pid_limits(), temp, now)
                    }
                    AlgoKind::Curve => Curve::from_config(self.config, host, group, vendor)?
                        .evaluate(temp)
                        .ok_or_else(|| HushError::config(format!("{} {} curve is empty", host, group)))?,
                };
                if winner.map_or(true, |w| speed.rank() > w.rank()) {
                    winner = Some(speed);
                }
            }
            readings.push((host, temperatures));
        }

        if readings.iter().all(|(_, temps)| temps.is_empty()) {
            return Err(HushError::NoReadings(primary.to_string()));
        }

        if let (Some(handle), Some(speed)) = (&speed_driver, winner) {
            handle.lock().await.set_speed(speed).await?;
            info!("{} speed set to {}", primary, speed);
        }

        Ok(readings
            .into_iter()
            .map(|(host, temps)| Status::success(host, winner, temps))
            .collect())
    }
}
