//! Scripted devices for registry and control-loop tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::config::types::{SensorGroup, Vendor};
use crate::error::{HushError, Result};
use crate::hardware::factory::{DeviceFactory, DriverSpec};
use crate::hardware::types::SpeedValue;
use crate::hardware::Device;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Create(String, SensorGroup, Vendor),
    SetSpeed(String, SpeedValue),
    Close(String, SensorGroup),
}

#[derive(Default)]
struct Script {
    /// `None` makes `get_temp` fail.
    temps: HashMap<(String, SensorGroup), Option<i32>>,
    events: Vec<Event>,
    failing_close: bool,
    /// When set, every `get_temp` waits for a permit first.
    gate: Option<Arc<Notify>>,
}

/// Shared script plus event log. Clones observe the same state.
#[derive(Clone, Default)]
pub struct MockFactory {
    script: Arc<Mutex<Script>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_close(self) -> Self {
        self.script.lock().unwrap().failing_close = true;
        self
    }

    pub fn set_temp(&self, host: &str, group: SensorGroup, temp: i32) {
        self.script.lock().unwrap().temps.insert((host.to_string(), group), Some(temp));
    }

    pub fn fail_temp(&self, host: &str, group: SensorGroup) {
        self.script.lock().unwrap().temps.insert((host.to_string(), group), None);
    }

    /// Hold every temperature read until the returned gate is notified.
    pub fn hold_temps(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.script.lock().unwrap().gate = Some(gate.clone());
        gate
    }

    pub fn events(&self) -> Vec<Event> {
        self.script.lock().unwrap().events.clone()
    }

    pub fn speeds(&self) -> Vec<(String, SpeedValue)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::SetSpeed(host, speed) => Some((host, speed)),
                _ => None,
            })
            .collect()
    }

    pub fn creates(&self) -> usize {
        self.events().iter().filter(|e| matches!(e, Event::Create(..))).count()
    }

    pub fn closes(&self) -> usize {
        self.events().iter().filter(|e| matches!(e, Event::Close(..))).count()
    }
}

#[async_trait]
impl DeviceFactory for MockFactory {
    async fn create(&self, spec: &DriverSpec) -> Result<Box<dyn Device>> {
        self.script
            .lock()
            .unwrap()
            .events
            .push(Event::Create(spec.host.clone(), spec.group, spec.vendor));
        Ok(Box::new(MockDevice {
            host: spec.host.clone(),
            group: spec.group,
            vendor: spec.vendor,
            script: self.script.clone(),
        }))
    }
}

pub struct MockDevice {
    host: String,
    group: SensorGroup,
    vendor: Vendor,
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl Device for MockDevice {
    fn vendor(&self) -> Vendor {
        self.vendor
    }

    async fn get_temp(&mut self) -> Result<i32> {
        let gate = self.script.lock().unwrap().gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let script = self.script.lock().unwrap();
        match script.temps.get(&(self.host.clone(), self.group)) {
            Some(Some(t)) => Ok(*t),
            Some(None) => Err(HushError::protocol(format!("{} {} scripted failure", self.host, self.group))),
            None => Err(HushError::protocol(format!("{} {} has no scripted temperature", self.host, self.group))),
        }
    }

    async fn set_speed(&mut self, speed: SpeedValue) -> Result<()> {
        self.script.lock().unwrap().events.push(Event::SetSpeed(self.host.clone(), speed));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        script.events.push(Event::Close(self.host.clone(), self.group));
        if script.failing_close {
            return Err(HushError::protocol("scripted close failure"));
        }
        Ok(())
    }
}
