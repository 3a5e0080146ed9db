//! PID controllers, one per (host, sensor group), retuned from configuration every cycle.

use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

use crate::config::types::{PidTuning, SensorGroup};
use crate::hardware::types::SpeedValue;

/// Controller acting on temperature. Its output is negative fan demand.
#[derive(Debug, Clone)]
pub struct Pid {
    tuning: PidTuning,
    limits: (f64, f64),
    integral: f64,
    last: Option<(f64, Instant)>,
}

impl Pid {
    pub fn new(tuning: PidTuning, limits: (f64, f64)) -> Self {
        Self { tuning, limits, integral: 0.0, last: None }
    }

    pub fn tuning(&self) -> PidTuning {
        self.tuning
    }

    /// One controller step. The first step after construction is proportional only.
    pub fn update(&mut self, input: f64, now: Instant) -> f64 {
        let (low, high) = self.limits;
        let error = self.tuning.target - input;
        let proportional = self.tuning.kp * error;

        let mut derivative = 0.0;
        if let Some((last_input, last_time)) = self.last {
            let dt = now.saturating_duration_since(last_time).as_secs_f64();
            if dt > 0.0 {
                self.integral = (self.integral + self.tuning.ki * error * dt).clamp(low, high);
                derivative = -self.tuning.kd * (input - last_input) / dt;
            }
        }
        self.last = Some((input, now));

        (proportional + self.integral + derivative).clamp(low, high)
    }
}

/// Live controllers keyed by (host, group).
#[derive(Debug, Default)]
pub struct PidBank {
    controllers: HashMap<(String, SensorGroup), Pid>,
}

impl PidBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Speed demanded by the controller of (`host`, `group`) for `temp`. A controller
    /// whose tuning or limits differ from the given ones is replaced by a fresh one.
    pub fn compute(
        &mut self,
        host: &str,
        group: SensorGroup,
        tuning: PidTuning,
        limits: (f64, f64),
        temp: i32,
        now: Instant,
    ) -> SpeedValue {
        let pid = self
            .controllers
            .entry((host.to_string(), group))
            .or_insert_with(|| Pid::new(tuning, limits));
        if pid.tuning != tuning || pid.limits != limits {
            debug!("{} {} pid retuned to {:?}", host, group, tuning);
            *pid = Pid::new(tuning, limits);
        }
        let output = pid.update(f64::from(temp), now);
        SpeedValue::percent((-output).round() as i64)
    }

    /// Drop the controllers of hosts `keep` rejects.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.controllers.retain(|(host, _), _| keep(host));
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}
