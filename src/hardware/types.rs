//! Actuation values shared by the control loop and the speed drivers.

use serde::{Serialize, Serializer};
use std::fmt;

/// Ordered symbolic speed levels a vendor accepts instead of a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vocabulary {
    /// iDRAC 9 `ThermalSettings.1.FanSpeedOffset`
    FanOffset,
    /// Cisco IMC `configuredFanPolicy`
    FanPolicy,
}

const FAN_OFFSET_NAMES: [&str; 5] = ["Off", "Low", "Medium", "High", "Max"];
const FAN_POLICY_NAMES: [&str; 5] = ["Low Power", "Balanced", "Performance", "High Power", "Max Power"];

impl Vocabulary {
    pub fn names(self) -> &'static [&'static str; 5] {
        match self {
            Vocabulary::FanOffset => &FAN_OFFSET_NAMES,
            Vocabulary::FanPolicy => &FAN_POLICY_NAMES,
        }
    }

    /// Position of `name` in this vocabulary. Cisco also reports the top policy
    /// as "Maximum Power", so both spellings are accepted.
    pub fn ordinal_of(self, name: &str) -> Option<u8> {
        if self == Vocabulary::FanPolicy && name == "Maximum Power" {
            return Some(4);
        }
        self.names().iter().position(|n| *n == name).map(|i| i as u8)
    }

    pub fn name(self, ordinal: u8) -> &'static str {
        let names = self.names();
        names[usize::from(ordinal).min(names.len() - 1)]
    }

    pub fn max_ordinal(self) -> u8 {
        (self.names().len() - 1) as u8
    }

    /// Map a percentage onto the tier breakpoints <25, <50, <75, <100, else top.
    pub fn tier(self, percent: u8) -> u8 {
        match percent {
            0..=24 => 0,
            25..=49 => 1,
            50..=74 => 2,
            75..=99 => 3,
            _ => self.max_ordinal(),
        }
    }
}

/// A computed fan demand: either a PWM percentage or a named vendor level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedValue {
    Percent(u8),
    Named { ordinal: u8, vocabulary: Vocabulary },
}

impl SpeedValue {
    /// Percentage clamped to 0..=100.
    pub fn percent(value: i64) -> Self {
        SpeedValue::Percent(value.clamp(0, 100) as u8)
    }

    pub fn named(vocabulary: Vocabulary, name: &str) -> Option<Self> {
        vocabulary
            .ordinal_of(name)
            .map(|ordinal| SpeedValue::Named { ordinal, vocabulary })
    }

    /// Position used to pick the winning demand of a cycle. Percentages compare by
    /// magnitude, named levels by ordinal. Named levels are placed on the
    /// percentage scale at the lowest percentage that selects the same tier, so
    /// a PID output and a symbolic curve of the same host can be compared.
    pub fn rank(&self) -> u8 {
        match *self {
            SpeedValue::Percent(p) => p,
            SpeedValue::Named { ordinal, .. } => ordinal.saturating_mul(25).min(100),
        }
    }

    /// Resolve to a tier of `vocabulary`, mapping percentages through the breakpoints.
    pub fn to_tier(&self, vocabulary: Vocabulary) -> u8 {
        match *self {
            SpeedValue::Percent(p) => vocabulary.tier(p),
            SpeedValue::Named { ordinal, .. } => ordinal.min(vocabulary.max_ordinal()),
        }
    }

    /// Resolve to a percentage. Named levels map onto their tier's lower bound.
    pub fn to_percent(&self) -> u8 {
        self.rank()
    }
}

impl fmt::Display for SpeedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SpeedValue::Percent(p) => write!(f, "{}%", p),
            SpeedValue::Named { ordinal, vocabulary } => f.write_str(vocabulary.name(ordinal)),
        }
    }
}

impl Serialize for SpeedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            SpeedValue::Percent(p) => serializer.serialize_u8(p),
            SpeedValue::Named { ordinal, vocabulary } => serializer.serialize_str(vocabulary.name(ordinal)),
        }
    }
}

/// Scale 0-100% to a 0-255 PWM duty byte.
pub fn pwm_byte(percent: u8) -> u8 {
    (u32::from(percent.min(100)) * 255 / 100) as u8
}

/// Format a byte as an ipmitool raw argument (`0x4c`).
pub fn hex_byte(value: u8) -> String {
    format!("0x{:02x}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_follow_breakpoints() {
        let v = Vocabulary::FanOffset;
        assert_eq!(v.tier(0), 0);
        assert_eq!(v.tier(24), 0);
        assert_eq!(v.tier(25), 1);
        assert_eq!(v.tier(74), 2);
        assert_eq!(v.tier(99), 3);
        assert_eq!(v.tier(100), 4);
    }

    #[test]
    fn named_levels_rank_by_ordinal() {
        let low = SpeedValue::named(Vocabulary::FanOffset, "Low").unwrap();
        let high = SpeedValue::named(Vocabulary::FanOffset, "High").unwrap();
        assert!(high.rank() > low.rank());
        assert_eq!(high.to_tier(Vocabulary::FanOffset), 3);
        assert_eq!(SpeedValue::Percent(80).to_tier(Vocabulary::FanOffset), high.to_tier(Vocabulary::FanOffset));
    }

    #[test]
    fn cisco_accepts_both_top_policy_spellings() {
        assert_eq!(Vocabulary::FanPolicy.ordinal_of("Max Power"), Some(4));
        assert_eq!(Vocabulary::FanPolicy.ordinal_of("Maximum Power"), Some(4));
        assert_eq!(Vocabulary::FanPolicy.ordinal_of("Turbo"), None);
    }

    #[test]
    fn pwm_scaling() {
        assert_eq!(pwm_byte(0), 0);
        assert_eq!(pwm_byte(50), 127);
        assert_eq!(pwm_byte(100), 255);
        assert_eq!(pwm_byte(250), 255);
        assert_eq!(hex_byte(pwm_byte(30)), "0x4c");
    }

    #[test]
    fn serializes_as_number_or_name() {
        assert_eq!(serde_json::to_string(&SpeedValue::Percent(55)).unwrap(), "55");
        let named = SpeedValue::named(Vocabulary::FanPolicy, "Balanced").unwrap();
        assert_eq!(serde_json::to_string(&named).unwrap(), "\"Balanced\"");
    }
}
