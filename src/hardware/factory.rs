//! Driver registry: one live driver per (host, sensor group), rebuilt when its
//! configuration changes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::types::{CredentialKind, Credentials, Discrete, DriverSelection, HushConfig, SensorGroup, Vendor};
use crate::error::{HushError, Result};
use crate::hardware::cisco::Cisco;
use crate::hardware::idrac::{IdracIpmi, IdracRedfish};
use crate::hardware::ilo::{Ilo4, ThermalCache};
use crate::hardware::nvidia::Nvidia;
use crate::hardware::openjbod::OpenJbod;
use crate::hardware::smart::Smart;
use crate::hardware::supermicro::{Supermicro, SupermicroGpu};
use crate::hardware::Device;

pub type DriverHandle = Arc<Mutex<Box<dyn Device>>>;

/// Everything a driver is built from. Two equal specs build equivalent drivers.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSpec {
    /// Host whose configuration the driver talks to (the shared target, if redirected).
    pub host: String,
    pub group: SensorGroup,
    pub vendor: Vendor,
    pub credentials: Credentials,
    pub discrete: Discrete,
}

impl DriverSpec {
    /// Resolve the driver for (`host`, `group`) and the cache key host it lives under.
    /// `Ok(None)` means the group has no driver.
    pub fn resolve(config: &HushConfig, host: &str, group: SensorGroup) -> Result<Option<(String, DriverSpec)>> {
        let mut key_host = host;
        let mut cfg = config.host(host)?;
        if cfg.selection(group).is_shared() {
            let target = cfg.shared_target(group).ok_or_else(|| {
                HushError::config(format!("{} shares its {} driver but names no target", host, group))
            })?;
            let target_cfg = config.host(target)?;
            if target_cfg.selection(group).is_shared() {
                return Err(HushError::config(format!(
                    "{} shares its {} driver with {}, which shares its own",
                    host, group, target
                )));
            }
            key_host = target;
            cfg = target_cfg;
        }

        let vendor = match cfg.selection(group) {
            DriverSelection::Vendor(v) => *v,
            _ => return Ok(None),
        };
        if !vendor.serves(group) {
            return Err(HushError::config(format!("{} cannot serve the {} group", vendor, group)));
        }

        let credentials = match vendor.credentials() {
            CredentialKind::Oob => cfg.oob.clone(),
            CredentialKind::Os => {
                let mut os = cfg.os.clone();
                if os.hostname.is_empty() {
                    os.hostname = key_host.to_string();
                }
                os
            }
        };
        let spec = DriverSpec {
            host: key_host.to_string(),
            group,
            vendor,
            credentials,
            discrete: cfg.discrete.clone(),
        };
        Ok(Some((key_host.to_string(), spec)))
    }
}

/// Builds an uninitialized driver for a resolved spec.
#[async_trait]
pub trait DeviceFactory: Send + Sync {
    async fn create(&self, spec: &DriverSpec) -> Result<Box<dyn Device>>;
}

/// Maps each vendor onto its driver constructor.
#[derive(Default)]
pub struct VendorFactory {
    thermal: ThermalCache,
}

impl VendorFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceFactory for VendorFactory {
    async fn create(&self, spec: &DriverSpec) -> Result<Box<dyn Device>> {
        let creds = &spec.credentials;
        let discrete = &spec.discrete;
        let device: Box<dyn Device> = match spec.vendor {
            Vendor::DellIdrac7 | Vendor::DellIdrac8 => Box::new(IdracIpmi::new(spec.vendor, creds)),
            Vendor::DellIdrac9 => Box::new(IdracRedfish::new(creds)?),
            Vendor::HpIlo4 => Box::new(Ilo4::new(
                spec.group,
                creds,
                discrete.fans.clone(),
                if spec.group == SensorGroup::Cpu { discrete.cpus.clone() } else { None },
                self.thermal.clone(),
            )?),
            Vendor::SupermicroX9 | Vendor::SupermicroX10 | Vendor::SupermicroX11 => Box::new(Supermicro::new(
                spec.vendor,
                creds,
                discrete.cpus.clone(),
                discrete.zones.clone(),
            )),
            Vendor::SupermicroGpu => Box::new(SupermicroGpu::new(creds)),
            Vendor::CiscoM3 | Vendor::CiscoM4 | Vendor::CiscoM5 => Box::new(Cisco::new(spec.vendor, creds)?),
            Vendor::Smart => Box::new(Smart::new(creds, &spec.host, discrete.drives.clone())),
            Vendor::Nvidia => Box::new(Nvidia::new(creds, &spec.host)),
            Vendor::OpenJbod => Box::new(OpenJbod::new(creds)?),
        };
        Ok(device)
    }
}

struct Entry {
    spec: DriverSpec,
    handle: DriverHandle,
}

type Key = (String, SensorGroup);

/// Cache of live drivers. At most one driver exists per key; a changed spec
/// closes the old driver before the new one is built.
pub struct Registry {
    factory: Arc<dyn DeviceFactory>,
    entries: Mutex<HashMap<Key, Entry>>,
}

impl Registry {
    pub fn new(factory: Arc<dyn DeviceFactory>) -> Self {
        Self { factory, entries: Mutex::new(HashMap::new()) }
    }

    /// The live driver serving (`host`, `group`), creating or replacing it as needed.
    pub async fn driver(&self, config: &HushConfig, host: &str, group: SensorGroup) -> Result<Option<DriverHandle>> {
        let resolved = DriverSpec::resolve(config, host, group)?;
        let mut entries = self.entries.lock().await;

        let Some((key_host, spec)) = resolved else {
            if let Some(entry) = entries.remove(&(host.to_string(), group)) {
                close_entry(host, group, entry).await;
            }
            return Ok(None);
        };

        if key_host != host {
            if let Some(own) = entries.remove(&(host.to_string(), group)) {
                info!("{} now shares the {} driver of {}", host, group, key_host);
                close_entry(host, group, own).await;
            }
        }

        let key = (key_host, group);
        if let Some(entry) = entries.get(&key) {
            if entry.spec == spec {
                return Ok(Some(entry.handle.clone()));
            }
        }
        if let Some(old) = entries.remove(&key) {
            info!("{} {} driver changed from {} to {}", key.0, group, old.spec.vendor, spec.vendor);
            close_entry(&key.0, group, old).await;
        }

        let mut device = self.factory.create(&spec).await?;
        if let Err(e) = device.initialize().await {
            if let Err(close_err) = device.close().await {
                warn!("{} {} close after failed setup: {}", key.0, group, close_err);
            }
            return Err(e);
        }
        debug!("{} {} driver {} ready", key.0, group, spec.vendor);
        let handle: DriverHandle = Arc::new(Mutex::new(device));
        entries.insert(key, Entry { spec, handle: handle.clone() });
        Ok(Some(handle))
    }

    /// Close and forget one driver. Close errors are logged.
    pub async fn close(&self, host: &str, group: SensorGroup) {
        let removed = self.entries.lock().await.remove(&(host.to_string(), group));
        if let Some(entry) = removed {
            close_entry(host, group, entry).await;
        }
    }

    pub async fn close_all(&self) {
        let drained: Vec<(Key, Entry)> = self.entries.lock().await.drain().collect();
        for ((host, group), entry) in drained {
            close_entry(&host, group, entry).await;
        }
    }

    /// Close every driver whose key no longer resolves to itself: removed hosts,
    /// deselected groups and groups now shared with another host.
    pub async fn retain_hosts(&self, config: &HushConfig) {
        let removed: Vec<(Key, Entry)> = {
            let mut entries = self.entries.lock().await;
            let stale: Vec<Key> = entries
                .keys()
                .filter(|(host, group)| !resolves_to_itself(config, host, *group))
                .cloned()
                .collect();
            stale
                .into_iter()
                .filter_map(|key| entries.remove(&key).map(|entry| (key, entry)))
                .collect()
        };
        for ((host, group), entry) in removed {
            info!("{} no longer owns a {} driver, closing it", host, group);
            close_entry(&host, group, entry).await;
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn resolves_to_itself(config: &HushConfig, host: &str, group: SensorGroup) -> bool {
    matches!(DriverSpec::resolve(config, host, group), Ok(Some((key_host, _))) if key_host == host)
}

async fn close_entry(host: &str, group: SensorGroup, entry: Entry) {
    let mut device = entry.handle.lock().await;
    if let Err(e) = device.close().await {
        warn!("{} failed to close {} driver {}: {}", host, group, entry.spec.vendor, e);
    }
}
