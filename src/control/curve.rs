//! Temperature -> speed lookup over the five configured curve levels.

use crate::config::types::{HushConfig, SensorGroup, Vendor};
use crate::error::{HushError, Result};
use crate::hardware::types::SpeedValue;

/// Temperatures outside this range are clamped before lookup.
pub const MIN_TEMP: i32 = 1;
pub const MAX_TEMP: i32 = 120;

#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    /// (temperature, speed) in level order, Min first.
    points: Vec<(i32, SpeedValue)>,
}

impl Curve {
    pub fn new(points: Vec<(i32, SpeedValue)>) -> Self {
        Self { points }
    }

    /// The curve configured for (`host`, `group`), with unset speeds taken from
    /// the defaults of `speed_vendor`.
    pub fn from_config(config: &HushConfig, host: &str, group: SensorGroup, speed_vendor: Vendor) -> Result<Self> {
        let temps = config.curve_temp(host, group)?;
        let speeds = config.curve_speed(host, group, &speed_vendor.default_curve_speeds())?;
        let vocabulary = speed_vendor.vocabulary();
        let points = temps
            .into_iter()
            .zip(speeds)
            .map(|((level, temp), (_, speed))| {
                speed
                    .resolve(vocabulary)
                    .map(|s| (temp, s))
                    .map_err(|e| HushError::config(format!("{} {} curve level {:?}: {}", host, group, level, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(points))
    }

    /// Numeric curves interpolate; any symbolic level makes the curve step.
    pub fn is_numeric(&self) -> bool {
        self.points.iter().all(|(_, s)| matches!(s, SpeedValue::Percent(_)))
    }

    pub fn evaluate(&self, temp: i32) -> Option<SpeedValue> {
        if self.is_numeric() {
            self.interpolate(temp).map(SpeedValue::percent)
        } else {
            self.step(temp)
        }
    }

    fn sorted(&self) -> Vec<(i32, SpeedValue)> {
        let mut points = self.points.clone();
        points.sort_by_key(|(t, _)| *t);
        points
    }

    /// Piecewise-linear over the levels, extended flat to 1 and 120 degrees,
    /// rounded up to the next whole percent.
    fn interpolate(&self, temp: i32) -> Option<i64> {
        let sorted: Vec<(i64, i64)> = self
            .sorted()
            .into_iter()
            .map(|(t, s)| (i64::from(t.clamp(MIN_TEMP, MAX_TEMP)), i64::from(s.to_percent())))
            .collect();
        let (_, first) = *sorted.first()?;
        let (_, last) = *sorted.last()?;

        let mut table = Vec::with_capacity(sorted.len() + 2);
        table.push((i64::from(MIN_TEMP), first));
        table.extend(sorted);
        table.push((i64::from(MAX_TEMP), last));

        let t = i64::from(temp.clamp(MIN_TEMP, MAX_TEMP));
        for pair in table.windows(2) {
            let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
            if x1 > x0 && x0 <= t && t <= x1 {
                return Some((y0 + ceil_div((y1 - y0) * (t - x0), x1 - x0)).clamp(0, 100));
            }
        }
        Some(last)
    }

    fn step(&self, temp: i32) -> Option<SpeedValue> {
        let first_configured = self.points.first()?.1;
        let sorted = self.sorted();
        let mut distinct: Vec<i32> = sorted.iter().map(|(t, _)| *t).collect();
        distinct.dedup();
        if distinct.len() < 2 {
            return Some(first_configured);
        }
        let (first_temp, first_speed) = sorted[0];
        if temp <= first_temp {
            return Some(first_speed);
        }
        sorted
            .iter()
            .rev()
            .find(|(t, _)| *t < temp)
            .map(|(_, s)| *s)
    }
}

/// Ceiling division for a positive divisor.
fn ceil_div(numerator: i64, divisor: i64) -> i64 {
    let quotient = numerator / divisor;
    if numerator % divisor != 0 && numerator > 0 {
        quotient + 1
    } else {
        quotient
    }
}
