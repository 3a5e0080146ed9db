//! Per-host status records and the rolling history kept for display.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use crate::config::types::{HushConfig, SensorGroup};
use crate::hardware::types::SpeedValue;

/// Samples kept per host per series.
pub const HISTORY_LEN: usize = 100;

/// Outcome of one host cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub host: String,
    pub success: bool,
    /// Applied speed; `None` for monitor-only hosts and failed cycles.
    pub speed: Option<SpeedValue>,
    pub temperatures: BTreeMap<SensorGroup, i32>,
    pub timestamp: DateTime<Utc>,
}

impl Status {
    pub fn success(host: &str, speed: Option<SpeedValue>, temperatures: BTreeMap<SensorGroup, i32>) -> Self {
        Self { host: host.to_string(), success: true, speed, temperatures, timestamp: Utc::now() }
    }

    pub fn failed(host: &str) -> Self {
        Self {
            host: host.to_string(),
            success: false,
            speed: None,
            temperatures: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Receives every status the control loop produces.
pub trait StatusSink: Send + Sync {
    fn submit(&self, status: Status);

    /// Forget hosts that are no longer configured.
    fn retain(&self, _config: &HushConfig) {}
}

/// Rolling series for one host.
#[derive(Debug, Clone, Default, Serialize)]
pub struct History {
    pub timestamps: VecDeque<DateTime<Utc>>,
    /// Speed rank (0-100) of each sample; 0 when no speed was applied.
    pub speed: VecDeque<u8>,
    pub temperatures: BTreeMap<SensorGroup, VecDeque<i32>>,
}

impl History {
    fn push(&mut self, status: &Status) {
        if self.temperatures.len() != status.temperatures.len() {
            *self = History::default();
        }
        push_bounded(&mut self.timestamps, status.timestamp);
        push_bounded(&mut self.speed, status.speed.map(|s| s.rank()).unwrap_or(0));
        for (group, temp) in &status.temperatures {
            push_bounded(self.temperatures.entry(*group).or_default(), *temp);
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

fn push_bounded<T>(series: &mut VecDeque<T>, value: T) {
    if series.len() == HISTORY_LEN {
        series.pop_front();
    }
    series.push_back(value);
}

#[derive(Default)]
struct HostRecord {
    last: Option<Status>,
    history: History,
}

/// In-memory status store backing `--test` output and telemetry consumers.
#[derive(Default)]
pub struct Monitor {
    hosts: Mutex<HashMap<String, HostRecord>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self, host: &str) -> Option<Status> {
        let hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        hosts.get(host).and_then(|r| r.last.clone())
    }

    pub fn history(&self, host: &str) -> Option<History> {
        let hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        hosts.get(host).map(|r| r.history.clone())
    }

    /// Last status of every host, ordered by host name.
    pub fn snapshot(&self) -> Vec<Status> {
        let hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        let mut statuses: Vec<Status> = hosts.values().filter_map(|r| r.last.clone()).collect();
        statuses.sort_by(|a, b| a.host.cmp(&b.host));
        statuses
    }
}

impl StatusSink for Monitor {
    fn submit(&self, status: Status) {
        let mut hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        let record = hosts.entry(status.host.clone()).or_default();
        if status.success {
            record.history.push(&status);
        }
        record.last = Some(status);
    }

    fn retain(&self, config: &HushConfig) {
        let mut hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        hosts.retain(|host, _| config.hosts.contains_key(host));
    }
}
