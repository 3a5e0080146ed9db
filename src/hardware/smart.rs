//! Drive temperatures from `smartctl` on the host OS, over SSH.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::types::{Credentials, Vendor};
use crate::error::{HushError, Result};
use crate::hardware::types::SpeedValue;
use crate::hardware::Device;
use crate::system::parser::{max_temperature, parse_fdisk_drives, parse_smart_temperature};
use crate::system::ssh::Ssh;

pub struct Smart {
    ssh: Ssh,
    drives: Option<Vec<String>>,
}

impl Smart {
    /// `drives` narrows the scan; otherwise every disk `fdisk -l` lists is read.
    pub fn new(os: &Credentials, host: &str, drives: Option<Vec<String>>) -> Self {
        Self { ssh: Ssh::new(os, host), drives: drives.filter(|d| !d.is_empty()) }
    }

    async fn drives(&mut self) -> Result<Vec<String>> {
        if let Some(drives) = &self.drives {
            return Ok(drives.clone());
        }
        let out = self.ssh.run_checked("fdisk -l").await?;
        let drives = parse_fdisk_drives(&out.stdout());
        if drives.is_empty() {
            return Err(HushError::protocol(format!("{} lists no disks", self.ssh.destination())));
        }
        info!("{} discovered drives {:?}", self.ssh.destination(), drives);
        self.drives = Some(drives.clone());
        Ok(drives)
    }
}

pub(crate) fn smartctl_command(drive: &str) -> String {
    format!(
        "smartctl -x {} | grep -E \"Temperature|temperature\"",
        shell_words::quote(drive)
    )
}

#[async_trait]
impl Device for Smart {
    fn vendor(&self) -> Vendor {
        Vendor::Smart
    }

    async fn get_temp(&mut self) -> Result<i32> {
        let mut temps = Vec::new();
        for drive in self.drives().await? {
            // smartctl exits with a status bitmask even when it printed a temperature
            let out = self.ssh.run(&smartctl_command(&drive)).await?;
            match parse_smart_temperature(&out.stdout()) {
                Some(t) => {
                    debug!("{} {} at {}", self.ssh.destination(), drive, t);
                    temps.push(t);
                }
                None => warn!("{} no temperature for {}", self.ssh.destination(), drive),
            }
        }
        max_temperature(&temps)
            .ok_or_else(|| HushError::protocol(format!("{} reported no drive temperatures", self.ssh.destination())))
    }

    async fn set_speed(&mut self, _speed: SpeedValue) -> Result<()> {
        Err(HushError::config("SMART is a sensor-only driver"))
    }
}
